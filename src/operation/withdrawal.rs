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
pub enum WithdrawalState {
    Pending,
    Received,
    Rejected,
}

impl WithdrawalState {
    pub fn name(self) -> &'static str {
        match self {
            WithdrawalState::Pending => "pending",
            WithdrawalState::Received => "received",
            WithdrawalState::Rejected => "rejected",
        }
    }

    pub fn next(self, action: OperationAction) -> Option<Self> {
        match (self, action) {
            (WithdrawalState::Pending, OperationAction::Receive) => Some(WithdrawalState::Received),
            (WithdrawalState::Pending, OperationAction::Reject) => Some(WithdrawalState::Rejected),
            // returning the cash to the branch puts the withdrawal back in the queue
            (WithdrawalState::Received, OperationAction::Reverse) => Some(WithdrawalState::Pending),
            _ => None,
        }
    }
}

/// Cash taken out of a branch register on its way to the treasury.
#[derive(Debug, Clone, PartialEq)]
pub struct Withdrawal {
    pub id: OperationId,
    pub branch: String,
    pub currency: Currency,
    pub amount: Decimal,
    pub state: WithdrawalState,
    pub requested_by: ActorId,
    pub requested_at: DateTime<Utc>,
    pub rejection_reason: Option<String>,
}

impl Withdrawal {
    pub fn reference(&self) -> OperationRef {
        OperationRef::new(OperationType::Withdrawal, self.id)
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
pub struct WithdrawalRequest {
    pub branch: String,
    pub currency: Currency,
    pub amount: Decimal,
}

/// Withdrawal adapter bound to a treasury.
pub struct Withdrawals<'t, S: MovementStore> {
    treasury: &'t Treasury<S>,
}

impl<'t, S: MovementStore> Withdrawals<'t, S> {
    pub(crate) fn new(treasury: &'t Treasury<S>) -> Self {
        Self { treasury }
    }

    /// Registers a withdrawal announced by a branch. No cash has moved yet.
    pub fn register(
        &self,
        request: WithdrawalRequest,
        actor: ActorId,
    ) -> Result<Withdrawal, LedgerError> {
        require_positive(request.amount)?;
        require_text(&request.branch, "Branch")?;

        let withdrawal = self.treasury.transact(&[request.currency], |tx, now| {
            let withdrawal = Withdrawal {
                id: tx.next_operation_id(),
                branch: request.branch.trim().to_string(),
                currency: request.currency,
                amount: request.amount,
                state: WithdrawalState::Pending,
                requested_by: actor,
                requested_at: now,
                rejection_reason: None,
            };
            tx.put_operation(SourceOperation::Withdrawal(withdrawal.clone()));
            Ok(withdrawal)
        })?;
        info!(
            withdrawal = withdrawal.id,
            branch = %withdrawal.branch,
            amount = %withdrawal.amount,
            "withdrawal registered"
        );
        Ok(withdrawal)
    }

    /// Receives the cash into the treasury, crediting the withdrawal amount.
    pub fn receive(
        &self,
        id: OperationId,
        actor: ActorId,
    ) -> Result<(Withdrawal, Movement), LedgerError> {
        let reference = OperationRef::new(OperationType::Withdrawal, id);
        let currency = self.get(id)?.currency;

        let (withdrawal, movement) = self.treasury.transact(&[currency], |tx, now| {
            let mut withdrawal = into_withdrawal(
                tx.operation(reference)?
                    .ok_or(LedgerError::OperationNotFound(reference))?,
            )?;
            withdrawal.apply(OperationAction::Receive)?;
            let movement = stage_movement(
                tx,
                MovementDraft {
                    currency: withdrawal.currency,
                    amount: withdrawal.amount,
                    direction: Direction::Income,
                    concept: format!(
                        "Withdrawal #{} received from {}",
                        withdrawal.id, withdrawal.branch
                    ),
                    operation: Some(reference),
                    actor,
                },
                now,
            )?;
            tx.put_operation(SourceOperation::Withdrawal(withdrawal.clone()));
            Ok((withdrawal, movement))
        })?;

        info!(
            withdrawal = id,
            currency = %withdrawal.currency,
            amount = %withdrawal.amount,
            balance_after = %movement.balance_after(),
            "withdrawal received"
        );
        Ok((withdrawal, movement))
    }

    pub fn reject(
        &self,
        id: OperationId,
        actor: ActorId,
        reason: &str,
    ) -> Result<Withdrawal, LedgerError> {
        require_text(reason, "Rejection reason")?;
        let reference = OperationRef::new(OperationType::Withdrawal, id);
        let currency = self.get(id)?.currency;

        let withdrawal = self.treasury.transact(&[currency], |tx, _| {
            let mut withdrawal = into_withdrawal(
                tx.operation(reference)?
                    .ok_or(LedgerError::OperationNotFound(reference))?,
            )?;
            withdrawal.apply(OperationAction::Reject)?;
            withdrawal.rejection_reason = Some(reason.trim().to_string());
            tx.put_operation(SourceOperation::Withdrawal(withdrawal.clone()));
            Ok(withdrawal)
        })?;
        info!(withdrawal = id, actor, reason, "withdrawal rejected");
        Ok(withdrawal)
    }

    /// Hands received cash back to the branch, debiting the treasury.
    pub fn return_to_branch(
        &self,
        id: OperationId,
        actor: ActorId,
        reason: &str,
    ) -> Result<ReversalResult, LedgerError> {
        self.treasury.reverse(
            OperationRef::new(OperationType::Withdrawal, id),
            actor,
            reason,
        )
    }

    pub fn get(&self, id: OperationId) -> Result<Withdrawal, LedgerError> {
        into_withdrawal(
            self.treasury
                .operation(OperationRef::new(OperationType::Withdrawal, id))?,
        )
    }
}

fn into_withdrawal(operation: SourceOperation) -> Result<Withdrawal, LedgerError> {
    match operation {
        SourceOperation::Withdrawal(withdrawal) => Ok(withdrawal),
        other => Err(LedgerError::OperationNotFound(other.reference())),
    }
}
