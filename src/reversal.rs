use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::{
    ledger::{LedgerError, require_text, stage_entry},
    movement::{ActorId, Movement, MovementId, NewMovement, OperationRef},
    operation::OperationAction,
    store::{MovementStore, StoreTransaction},
    treasury::Treasury,
};

/// Outcome of a successful reversal.
#[derive(Debug, Clone, PartialEq)]
pub struct ReversalResult {
    pub operation: OperationRef,
    /// One offsetting movement per movement that was still outstanding.
    pub compensations: Vec<Movement>,
    /// State the source operation was moved to.
    pub state: &'static str,
}

/// Movements of one operation that no later movement offsets yet.
///
/// Compensations themselves are never outstanding, so a reversal can't be
/// reversed again through the same operation.
pub fn outstanding_movements(movements: &[Movement]) -> Vec<&Movement> {
    let offset: HashSet<MovementId> = movements.iter().filter_map(Movement::reverses).collect();
    movements
        .iter()
        .filter(|movement| movement.reverses().is_none() && !offset.contains(&movement.id()))
        .collect()
}

/// Stages the compensation of `reference` inside `tx`.
///
/// The transaction must hold every chain the operation touches.
pub fn stage_reversal<T: StoreTransaction>(
    tx: &mut T,
    reference: OperationRef,
    actor: ActorId,
    reason: &str,
    marker: &str,
    now: DateTime<Utc>,
) -> Result<ReversalResult, LedgerError> {
    require_text(reason, "Reversal reason")?;

    // re-read under the latches: a concurrent reversal may have won the race
    let mut operation = tx
        .operation(reference)?
        .ok_or(LedgerError::OperationNotFound(reference))?;
    operation.apply(OperationAction::Reverse)?;

    let movements = tx.movements_for_operation(reference)?;
    let originals: Vec<Movement> = outstanding_movements(&movements)
        .into_iter()
        .cloned()
        .collect();
    if originals.is_empty() {
        return Err(LedgerError::MovementNotFound(reference));
    }

    let mut compensations = Vec::with_capacity(originals.len());
    for original in &originals {
        let compensation = stage_entry(
            tx,
            NewMovement {
                currency: original.currency(),
                amount: original.amount(),
                direction: original.direction().flipped(),
                concept: format!("Reversal of movement #{}: {}", original.id(), reason.trim()),
                operation: reference,
                actor,
                reverses: Some(original.id()),
                recorded_at: now,
            },
        )?;
        tx.annotate_concept(original.id(), original.currency(), marker)?;
        compensations.push(compensation);
    }

    let state = operation.state_name();
    tx.put_operation(operation);
    Ok(ReversalResult {
        operation: reference,
        compensations,
        state,
    })
}

impl<S: MovementStore> Treasury<S> {
    /// Offsets every outstanding movement of `reference` and moves the
    /// operation to its reversed state, all in one transaction.
    pub fn reverse(
        &self,
        reference: OperationRef,
        actor: ActorId,
        reason: &str,
    ) -> Result<ReversalResult, LedgerError> {
        let currencies = self.operation(reference)?.currencies();
        let marker = self.config().reversal_marker.as_str();

        let result = self.transact(&currencies, |tx, now| {
            stage_reversal(tx, reference, actor, reason, marker, now)
        })?;
        info!(
            operation = %reference,
            actor,
            reason,
            legs = result.compensations.len(),
            state = result.state,
            "operation reversed"
        );
        Ok(result)
    }
}
