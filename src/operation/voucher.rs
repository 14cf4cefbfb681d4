use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::{
    ledger::{LedgerError, require_positive, require_text, stage_movement},
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
pub enum VoucherState {
    Pending,
    Collected,
    Voided,
    Cancelled,
}

impl VoucherState {
    pub fn name(self) -> &'static str {
        match self {
            VoucherState::Pending => "pending",
            VoucherState::Collected => "collected",
            VoucherState::Voided => "voided",
            VoucherState::Cancelled => "cancelled",
        }
    }

    pub fn next(self, action: OperationAction) -> Option<Self> {
        match (self, action) {
            (VoucherState::Pending, OperationAction::Collect) => Some(VoucherState::Collected),
            (VoucherState::Pending, OperationAction::Void) => Some(VoucherState::Voided),
            (VoucherState::Pending, OperationAction::Reverse) => Some(VoucherState::Cancelled),
            _ => None,
        }
    }
}

/// A promise to pay, debited from the treasury when issued.
#[derive(Debug, Clone, PartialEq)]
pub struct Voucher {
    pub id: OperationId,
    pub currency: Currency,
    pub amount: Decimal,
    pub beneficiary: String,
    pub concept: String,
    pub state: VoucherState,
    pub issued_by: ActorId,
    pub issued_at: DateTime<Utc>,
}

impl Voucher {
    pub fn reference(&self) -> OperationRef {
        OperationRef::new(OperationType::Voucher, self.id)
    }

    pub(crate) fn apply(&mut self, action: OperationAction) -> Result<(), LedgerError> {
        self.state = self
            .state
            .next(action)
            .ok_or_else(|| state_conflict(self.reference(), self.state.name(), action))?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct VoucherRequest {
    pub currency: Currency,
    pub amount: Decimal,
    pub beneficiary: String,
    pub concept: String,
}

/// Voucher adapter bound to a treasury.
pub struct Vouchers<'t, S: MovementStore> {
    treasury: &'t Treasury<S>,
}

impl<'t, S: MovementStore> Vouchers<'t, S> {
    pub(crate) fn new(treasury: &'t Treasury<S>) -> Self {
        Self { treasury }
    }

    /// Issues a pending voucher and debits its amount from the treasury.
    pub fn issue(
        &self,
        request: VoucherRequest,
        actor: ActorId,
    ) -> Result<(Voucher, Movement), LedgerError> {
        require_positive(request.amount)?;
        require_text(&request.beneficiary, "Beneficiary")?;

        let (voucher, movement) = self.treasury.transact(&[request.currency], |tx, now| {
            let voucher = Voucher {
                id: tx.next_operation_id(),
                currency: request.currency,
                amount: request.amount,
                beneficiary: request.beneficiary.trim().to_string(),
                concept: request.concept.trim().to_string(),
                state: VoucherState::Pending,
                issued_by: actor,
                issued_at: now,
            };
            let mut concept = format!("Voucher #{} to {}", voucher.id, voucher.beneficiary);
            if !voucher.concept.is_empty() {
                concept = format!("{concept}: {}", voucher.concept);
            }
            let movement = stage_movement(
                tx,
                MovementDraft {
                    currency: voucher.currency,
                    amount: voucher.amount,
                    direction: Direction::Expense,
                    concept,
                    operation: Some(voucher.reference()),
                    actor,
                },
                now,
            )?;
            tx.put_operation(SourceOperation::Voucher(voucher.clone()));
            Ok((voucher, movement))
        })?;

        info!(
            voucher = voucher.id,
            currency = %voucher.currency,
            amount = %voucher.amount,
            actor,
            "voucher issued"
        );
        Ok((voucher, movement))
    }

    /// The beneficiary cashed the voucher. The issuing debit stands.
    pub fn collect(&self, id: OperationId, actor: ActorId) -> Result<Voucher, LedgerError> {
        self.transition(id, OperationAction::Collect, actor)
    }

    /// Administratively annulled without compensating the issuing debit.
    pub fn void(&self, id: OperationId, actor: ActorId) -> Result<Voucher, LedgerError> {
        self.transition(id, OperationAction::Void, actor)
    }

    /// Cancels a pending voucher, crediting its amount back.
    pub fn cancel(
        &self,
        id: OperationId,
        actor: ActorId,
        reason: &str,
    ) -> Result<ReversalResult, LedgerError> {
        self.treasury
            .reverse(OperationRef::new(OperationType::Voucher, id), actor, reason)
    }

    pub fn get(&self, id: OperationId) -> Result<Voucher, LedgerError> {
        into_voucher(
            self.treasury
                .operation(OperationRef::new(OperationType::Voucher, id))?,
        )
    }

    fn transition(
        &self,
        id: OperationId,
        action: OperationAction,
        actor: ActorId,
    ) -> Result<Voucher, LedgerError> {
        let operation = self
            .treasury
            .transition(OperationRef::new(OperationType::Voucher, id), action)?;
        let voucher = into_voucher(operation)?;
        info!(voucher = id, state = voucher.state.name(), actor, "voucher updated");
        Ok(voucher)
    }
}

fn into_voucher(operation: SourceOperation) -> Result<Voucher, LedgerError> {
    match operation {
        SourceOperation::Voucher(voucher) => Ok(voucher),
        other => Err(LedgerError::OperationNotFound(other.reference())),
    }
}
