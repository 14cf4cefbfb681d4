use crate::{
    ledger::LedgerError,
    movement::{Currency, OperationRef},
};

pub use exchange::{CurrencyExchange, ExchangeRequest, ExchangeState, Exchanges};
pub use loan::{Loan, LoanKind, LoanRequest, LoanState, Loans};
pub use voucher::{Voucher, VoucherRequest, VoucherState, Vouchers};
pub use withdrawal::{Withdrawal, WithdrawalRequest, WithdrawalState, Withdrawals};

pub mod exchange;
pub mod loan;
pub mod voucher;
pub mod withdrawal;

/// State transitions an adapter may request on its operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationAction {
    Collect,
    Void,
    Receive,
    Reject,
    Reverse,
}

/// A business operation that feeds the treasury chains.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOperation {
    Voucher(Voucher),
    Withdrawal(Withdrawal),
    Exchange(CurrencyExchange),
    Loan(Loan),
}

impl SourceOperation {
    pub fn reference(&self) -> OperationRef {
        match self {
            SourceOperation::Voucher(voucher) => voucher.reference(),
            SourceOperation::Withdrawal(withdrawal) => withdrawal.reference(),
            SourceOperation::Exchange(exchange) => exchange.reference(),
            SourceOperation::Loan(loan) => loan.reference(),
        }
    }

    /// Chains touched by this operation's movements.
    pub fn currencies(&self) -> Vec<Currency> {
        match self {
            SourceOperation::Voucher(voucher) => vec![voucher.currency],
            SourceOperation::Withdrawal(withdrawal) => vec![withdrawal.currency],
            SourceOperation::Exchange(exchange) => vec![exchange.from, exchange.to],
            SourceOperation::Loan(loan) => vec![loan.currency],
        }
    }

    pub fn state_name(&self) -> &'static str {
        match self {
            SourceOperation::Voucher(voucher) => voucher.state.name(),
            SourceOperation::Withdrawal(withdrawal) => withdrawal.state.name(),
            SourceOperation::Exchange(exchange) => exchange.state.name(),
            SourceOperation::Loan(loan) => loan.state.name(),
        }
    }

    pub fn permits(&self, action: OperationAction) -> bool {
        match self {
            SourceOperation::Voucher(voucher) => voucher.state.next(action).is_some(),
            SourceOperation::Withdrawal(withdrawal) => withdrawal.state.next(action).is_some(),
            SourceOperation::Exchange(exchange) => exchange.state.next(action).is_some(),
            SourceOperation::Loan(loan) => loan.state.next(action).is_some(),
        }
    }

    pub fn is_reversible(&self) -> bool {
        self.permits(OperationAction::Reverse)
    }

    pub(crate) fn apply(&mut self, action: OperationAction) -> Result<(), LedgerError> {
        match self {
            SourceOperation::Voucher(voucher) => voucher.apply(action),
            SourceOperation::Withdrawal(withdrawal) => withdrawal.apply(action),
            SourceOperation::Exchange(exchange) => exchange.apply(action),
            SourceOperation::Loan(loan) => loan.apply(action),
        }
    }
}

pub(crate) fn state_conflict(
    operation: OperationRef,
    state: &'static str,
    action: OperationAction,
) -> LedgerError {
    tracing::warn!(%operation, state, ?action, "transition rejected");
    LedgerError::StateConflict {
        operation,
        state,
        action,
    }
}
