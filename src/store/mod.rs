use rust_decimal::Decimal;
use thiserror::Error;

use crate::{
    movement::{Currency, Movement, MovementId, NewMovement, OperationId, OperationRef},
    operation::SourceOperation,
};

pub mod in_memory_store;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Timed out waiting for the {0} chain")]
    LockTimeout(Currency),
    #[error("The {0} chain is not part of this transaction")]
    CurrencyNotLocked(Currency),
    #[error("Movement #{id} does not exist in the {currency} chain")]
    MissingMovement { id: MovementId, currency: Currency },
    #[error("The {0} balance would leave the representable range")]
    BalanceOverflow(Currency),
    #[error("Movement store is closed")]
    Closed,
    #[error("Movement store lock poisoned")]
    Poisoned,
}

/// Durable home of the per-currency movement chains and their source operations.
///
/// Reads see the latest committed snapshot and never wait for writers. Every
/// write goes through a [`StoreTransaction`] that holds the chains it touches.
pub trait MovementStore: Send + Sync {
    type Transaction<'a>: StoreTransaction
    where
        Self: 'a;

    /// Opens a transaction holding exclusive write access to `currencies`.
    fn begin(&self, currencies: &[Currency]) -> Result<Self::Transaction<'_>, StoreError>;

    /// Balance after the newest committed movement, zero for an empty chain.
    fn latest_balance(&self, currency: Currency) -> Result<Decimal, StoreError>;

    /// Committed movements ordered by id, optionally restricted to one currency.
    fn movements(&self, currency: Option<Currency>) -> Result<Vec<Movement>, StoreError>;

    fn operation(&self, reference: OperationRef) -> Result<Option<SourceOperation>, StoreError>;

    fn operations(&self) -> Result<Vec<SourceOperation>, StoreError>;

    /// Refuses every later transaction. Reads keep working.
    fn close(&self);

    fn is_open(&self) -> bool;
}

/// Staged writes against a set of latched chains.
///
/// Nothing becomes visible before [`StoreTransaction::commit`]; dropping the
/// transaction discards everything staged.
pub trait StoreTransaction {
    fn latest_balance(&self, currency: Currency) -> Result<Decimal, StoreError>;

    fn append(&mut self, entry: NewMovement) -> Result<Movement, StoreError>;

    /// Prefixes the concept of a committed movement with `marker`.
    fn annotate_concept(
        &mut self,
        id: MovementId,
        currency: Currency,
        marker: &str,
    ) -> Result<(), StoreError>;

    fn movements_for_operation(&self, reference: OperationRef)
    -> Result<Vec<Movement>, StoreError>;

    fn operation(&self, reference: OperationRef) -> Result<Option<SourceOperation>, StoreError>;

    fn next_operation_id(&mut self) -> OperationId;

    fn put_operation(&mut self, operation: SourceOperation);

    fn commit(self) -> Result<(), StoreError>;
}
