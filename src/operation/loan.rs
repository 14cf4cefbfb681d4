use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::{
    ledger::{LedgerError, ValidationError, require_positive, require_text, stage_movement},
    movement::{
        ActorId, Currency, Direction, Movement, MovementDraft, OperationId, OperationRef,
        OperationType,
    },
    reversal::ReversalResult,
    store::{MovementStore, StoreTransaction},
    treasury::Treasury,
};

use super::{OperationAction, SourceOperation, state_conflict};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanKind {
    /// Cash lent out of the treasury.
    Loan,
    /// Cash handed back to the treasury.
    Return,
}

impl LoanKind {
    pub fn direction(self) -> Direction {
        match self {
            LoanKind::Loan => Direction::Expense,
            LoanKind::Return => Direction::Income,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanState {
    Active,
    Cancelled,
}

impl LoanState {
    pub fn name(self) -> &'static str {
        match self {
            LoanState::Active => "active",
            LoanState::Cancelled => "cancelled",
        }
    }

    pub fn next(self, action: OperationAction) -> Option<Self> {
        match (self, action) {
            (LoanState::Active, OperationAction::Reverse) => Some(LoanState::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Loan {
    pub id: OperationId,
    pub kind: LoanKind,
    pub counterparty: String,
    pub currency: Currency,
    pub amount: Decimal,
    pub concept: String,
    pub state: LoanState,
    pub actor: ActorId,
    pub recorded_at: DateTime<Utc>,
}

impl Loan {
    pub fn reference(&self) -> OperationRef {
        OperationRef::new(OperationType::Loan, self.id)
    }

    pub(crate) fn apply(&mut self, action: OperationAction) -> Result<(), LedgerError> {
        self.state = self
            .state
            .next(action)
            .ok_or_else(|| state_conflict(self.reference(), self.state.name(), action))?;
        Ok(())
    }

    /// What the counterparty owes the treasury because of this operation.
    pub fn outstanding(&self) -> Decimal {
        match (self.state, self.kind) {
            (LoanState::Cancelled, _) => Decimal::ZERO,
            (LoanState::Active, LoanKind::Loan) => self.amount,
            (LoanState::Active, LoanKind::Return) => -self.amount,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoanRequest {
    pub counterparty: String,
    pub currency: Currency,
    pub amount: Decimal,
    pub concept: String,
}

/// Loan/return adapter bound to a treasury.
pub struct Loans<'t, S: MovementStore> {
    treasury: &'t Treasury<S>,
}

impl<'t, S: MovementStore> Loans<'t, S> {
    pub(crate) fn new(treasury: &'t Treasury<S>) -> Self {
        Self { treasury }
    }

    pub fn lend(&self, request: LoanRequest, actor: ActorId) -> Result<(Loan, Movement), LedgerError> {
        self.record(LoanKind::Loan, request, actor)
    }

    pub fn record_return(
        &self,
        request: LoanRequest,
        actor: ActorId,
    ) -> Result<(Loan, Movement), LedgerError> {
        self.record(LoanKind::Return, request, actor)
    }

    pub fn cancel(
        &self,
        id: OperationId,
        actor: ActorId,
        reason: &str,
    ) -> Result<ReversalResult, LedgerError> {
        self.treasury
            .reverse(OperationRef::new(OperationType::Loan, id), actor, reason)
    }

    pub fn get(&self, id: OperationId) -> Result<Loan, LedgerError> {
        match self
            .treasury
            .operation(OperationRef::new(OperationType::Loan, id))?
        {
            SourceOperation::Loan(loan) => Ok(loan),
            other => Err(LedgerError::OperationNotFound(other.reference())),
        }
    }

    /// Net amount `counterparty` owes the treasury in `currency`.
    ///
    /// Derived from active loan operations, so it always agrees with the
    /// movements those operations left on the chain.
    pub fn counterparty_balance(
        &self,
        counterparty: &str,
        currency: Currency,
    ) -> Result<Decimal, LedgerError> {
        let counterparty = counterparty.trim();
        let balance = self
            .treasury
            .operations()?
            .into_iter()
            .filter_map(|operation| match operation {
                SourceOperation::Loan(loan) => Some(loan),
                _ => None,
            })
            .filter(|loan| {
                loan.currency == currency && loan.counterparty.eq_ignore_ascii_case(counterparty)
            })
            .try_fold(Decimal::ZERO, |total, loan| {
                total.checked_add(loan.outstanding())
            })
            .ok_or(ValidationError::AmountOverflow)?;
        Ok(balance)
    }

    fn record(
        &self,
        kind: LoanKind,
        request: LoanRequest,
        actor: ActorId,
    ) -> Result<(Loan, Movement), LedgerError> {
        require_positive(request.amount)?;
        require_text(&request.counterparty, "Counterparty")?;

        let (loan, movement) = self.treasury.transact(&[request.currency], |tx, now| {
            let loan = Loan {
                id: tx.next_operation_id(),
                kind,
                counterparty: request.counterparty.trim().to_string(),
                currency: request.currency,
                amount: request.amount,
                concept: request.concept.trim().to_string(),
                state: LoanState::Active,
                actor,
                recorded_at: now,
            };
            let label = match kind {
                LoanKind::Loan => "Loan",
                LoanKind::Return => "Loan return",
            };
            let mut concept = format!("{label} #{} with {}", loan.id, loan.counterparty);
            if !loan.concept.is_empty() {
                concept = format!("{concept}: {}", loan.concept);
            }
            let movement = stage_movement(
                tx,
                MovementDraft {
                    currency: loan.currency,
                    amount: loan.amount,
                    direction: kind.direction(),
                    concept,
                    operation: Some(loan.reference()),
                    actor,
                },
                now,
            )?;
            tx.put_operation(SourceOperation::Loan(loan.clone()));
            Ok((loan, movement))
        })?;

        info!(
            loan = loan.id,
            kind = ?loan.kind,
            counterparty = %loan.counterparty,
            amount = %loan.amount,
            "loan recorded"
        );
        Ok((loan, movement))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::config::TreasuryConfig;

    fn request(amount: Decimal) -> LoanRequest {
        LoanRequest {
            counterparty: "Casa Central".to_string(),
            currency: Currency::Real,
            amount,
            concept: String::new(),
        }
    }

    #[test]
    fn loan_debits_and_return_credits() {
        let treasury = Treasury::open(TreasuryConfig::default());
        let loans = treasury.loans();

        let (loan, lent) = loans.lend(request(dec!(300)), 5).unwrap();
        assert!(!lent.is_income());
        assert_eq!(lent.concept(), "Loan #1 with Casa Central");
        let (_, returned) = loans.record_return(request(dec!(120)), 5).unwrap();
        assert!(returned.is_income());

        assert_eq!(treasury.balance(Currency::Real).unwrap(), dec!(-180));
        assert_eq!(
            loans
                .counterparty_balance("casa central", Currency::Real)
                .unwrap(),
            dec!(180)
        );

        let result = loans.cancel(loan.id, 5, "never left the vault").unwrap();
        assert_eq!(result.state, "cancelled");
        assert!(result.compensations[0].is_income());
        assert_eq!(loans.get(loan.id).unwrap().state, LoanState::Cancelled);
        assert_eq!(treasury.balance(Currency::Real).unwrap(), dec!(120));
        // counterparty ledger follows the chain
        assert_eq!(
            loans
                .counterparty_balance("Casa Central", Currency::Real)
                .unwrap(),
            dec!(-120)
        );
        assert_eq!(
            loans
                .counterparty_balance("Casa Central", Currency::Dollar)
                .unwrap(),
            dec!(0)
        );
    }

    #[test]
    fn cancelled_loan_stays_cancelled() {
        let treasury = Treasury::open(TreasuryConfig::default());
        let loans = treasury.loans();
        let (loan, _) = loans.lend(request(dec!(10)), 5).unwrap();
        loans.cancel(loan.id, 5, "duplicate").unwrap();
        assert!(matches!(
            loans.cancel(loan.id, 5, "duplicate").unwrap_err(),
            LedgerError::StateConflict { .. }
        ));
    }

    #[test]
    fn return_past_decimal_range_is_refused() {
        let treasury = Treasury::open(TreasuryConfig::default());
        let loans = treasury.loans();
        loans.record_return(request(Decimal::MAX), 5).unwrap();

        let err = loans.record_return(request(dec!(1)), 5).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Validation(ValidationError::BalanceOverflow(Currency::Real))
        ));
        assert_eq!(treasury.balance(Currency::Real).unwrap(), Decimal::MAX);
        assert_eq!(treasury.operations().unwrap().len(), 1);
        // the chain is still writable afterwards
        loans.lend(request(dec!(1)), 5).unwrap();
    }
}
