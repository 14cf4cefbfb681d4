use std::{
    collections::HashMap,
    sync::{
        Condvar, Mutex, PoisonError, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::{
    movement::{Currency, Movement, MovementId, NewMovement, OperationId, OperationRef},
    operation::SourceOperation,
};

use super::{MovementStore, StoreError, StoreTransaction};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Exclusive write slot of one chain, acquirable with a deadline.
#[derive(Debug, Default)]
struct WriteLatch {
    held: Mutex<bool>,
    released: Condvar,
}

impl WriteLatch {
    fn acquire(&self, currency: Currency, timeout: Duration) -> Result<LatchGuard<'_>, StoreError> {
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock().map_err(|_| StoreError::Poisoned)?;
        while *held {
            let now = Instant::now();
            if now >= deadline {
                warn!(%currency, ?timeout, "gave up waiting for chain latch");
                return Err(StoreError::LockTimeout(currency));
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .map_err(|_| StoreError::Poisoned)?;
            held = guard;
        }
        *held = true;
        Ok(LatchGuard { latch: self })
    }
}

#[derive(Debug)]
struct LatchGuard<'a> {
    latch: &'a WriteLatch,
}

impl Drop for LatchGuard<'_> {
    fn drop(&mut self) {
        *self
            .latch
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = false;
        self.latch.released.notify_one();
    }
}

#[derive(Debug, Default)]
struct Chain {
    latch: WriteLatch,
    rows: RwLock<Vec<Movement>>,
}

/// Append-only in-process movement store.
///
/// Each currency chain has its own write latch, so writers of disjoint
/// currencies never wait for each other.
#[derive(Debug)]
pub struct InMemoryMovementStore {
    chains: [Chain; 3],
    operations: RwLock<HashMap<OperationRef, SourceOperation>>,
    /// Where each operation's movements live, in id order.
    by_operation: RwLock<HashMap<OperationRef, Vec<(Currency, MovementId)>>>,
    next_movement_id: AtomicU64,
    next_operation_id: AtomicU64,
    open: AtomicBool,
    lock_timeout: Duration,
}

impl Default for InMemoryMovementStore {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl InMemoryMovementStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            chains: Default::default(),
            operations: RwLock::default(),
            by_operation: RwLock::default(),
            next_movement_id: AtomicU64::new(1),
            next_operation_id: AtomicU64::new(1),
            open: AtomicBool::new(true),
            lock_timeout,
        }
    }

    fn chain(&self, currency: Currency) -> &Chain {
        &self.chains[currency.index()]
    }
}

impl MovementStore for InMemoryMovementStore {
    type Transaction<'a> = InMemoryTransaction<'a>;

    fn begin(&self, currencies: &[Currency]) -> Result<Self::Transaction<'_>, StoreError> {
        if !self.is_open() {
            return Err(StoreError::Closed);
        }
        let mut locked = [false; 3];
        for currency in currencies {
            locked[currency.index()] = true;
        }
        // fixed order, so two transactions never wait on each other in a cycle
        let mut latches = Vec::with_capacity(currencies.len());
        for currency in Currency::ALL {
            if locked[currency.index()] {
                latches.push(self.chain(currency).latch.acquire(currency, self.lock_timeout)?);
            }
        }
        Ok(InMemoryTransaction {
            store: self,
            _latches: latches,
            locked,
            staged: Vec::new(),
            annotations: Vec::new(),
            operations: Vec::new(),
        })
    }

    fn latest_balance(&self, currency: Currency) -> Result<Decimal, StoreError> {
        let rows = self
            .chain(currency)
            .rows
            .read()
            .map_err(|_| StoreError::Poisoned)?;
        Ok(rows
            .last()
            .map(|movement| movement.balance_after)
            .unwrap_or(Decimal::ZERO))
    }

    fn movements(&self, currency: Option<Currency>) -> Result<Vec<Movement>, StoreError> {
        let mut movements = Vec::new();
        for chain_currency in Currency::ALL {
            if currency.is_some_and(|wanted| wanted != chain_currency) {
                continue;
            }
            let rows = self
                .chain(chain_currency)
                .rows
                .read()
                .map_err(|_| StoreError::Poisoned)?;
            movements.extend(rows.iter().cloned());
        }
        movements.sort_by_key(|movement| movement.id);
        Ok(movements)
    }

    fn operation(&self, reference: OperationRef) -> Result<Option<SourceOperation>, StoreError> {
        let operations = self.operations.read().map_err(|_| StoreError::Poisoned)?;
        Ok(operations.get(&reference).cloned())
    }

    fn operations(&self) -> Result<Vec<SourceOperation>, StoreError> {
        let operations = self.operations.read().map_err(|_| StoreError::Poisoned)?;
        let mut operations: Vec<_> = operations.values().cloned().collect();
        operations.sort_by_key(|operation| operation.reference());
        Ok(operations)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        debug!("movement store closed");
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct Annotation {
    id: MovementId,
    currency: Currency,
    marker: String,
}

#[derive(Debug)]
pub struct InMemoryTransaction<'a> {
    store: &'a InMemoryMovementStore,
    _latches: Vec<LatchGuard<'a>>,
    locked: [bool; 3],
    staged: Vec<Movement>,
    annotations: Vec<Annotation>,
    operations: Vec<SourceOperation>,
}

impl InMemoryTransaction<'_> {
    fn ensure_locked(&self, currency: Currency) -> Result<(), StoreError> {
        if self.locked[currency.index()] {
            Ok(())
        } else {
            Err(StoreError::CurrencyNotLocked(currency))
        }
    }
}

impl StoreTransaction for InMemoryTransaction<'_> {
    fn latest_balance(&self, currency: Currency) -> Result<Decimal, StoreError> {
        self.ensure_locked(currency)?;
        match self
            .staged
            .iter()
            .rev()
            .find(|movement| movement.currency == currency)
        {
            Some(movement) => Ok(movement.balance_after),
            None => self.store.latest_balance(currency),
        }
    }

    fn append(&mut self, entry: NewMovement) -> Result<Movement, StoreError> {
        let balance_before = self.latest_balance(entry.currency)?;
        let balance_after = entry
            .direction
            .apply(balance_before, entry.amount)
            .ok_or(StoreError::BalanceOverflow(entry.currency))?;
        let movement = Movement {
            id: self.store.next_movement_id.fetch_add(1, Ordering::SeqCst),
            recorded_at: entry.recorded_at,
            currency: entry.currency,
            amount: entry.amount,
            direction: entry.direction,
            balance_before,
            balance_after,
            concept: entry.concept,
            operation: entry.operation,
            actor: entry.actor,
            reverses: entry.reverses,
        };
        self.staged.push(movement.clone());
        Ok(movement)
    }

    fn annotate_concept(
        &mut self,
        id: MovementId,
        currency: Currency,
        marker: &str,
    ) -> Result<(), StoreError> {
        self.ensure_locked(currency)?;
        self.annotations.push(Annotation {
            id,
            currency,
            marker: marker.to_string(),
        });
        Ok(())
    }

    fn movements_for_operation(
        &self,
        reference: OperationRef,
    ) -> Result<Vec<Movement>, StoreError> {
        let located = self
            .store
            .by_operation
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .get(&reference)
            .cloned()
            .unwrap_or_default();

        let mut movements = Vec::with_capacity(located.len());
        for (currency, id) in located {
            let rows = self
                .store
                .chain(currency)
                .rows
                .read()
                .map_err(|_| StoreError::Poisoned)?;
            let index = rows
                .binary_search_by_key(&id, |row| row.id)
                .map_err(|_| StoreError::MissingMovement { id, currency })?;
            movements.push(rows[index].clone());
        }
        movements.extend(
            self.staged
                .iter()
                .filter(|movement| movement.operation == reference)
                .cloned(),
        );
        movements.sort_by_key(|movement| movement.id);
        Ok(movements)
    }

    fn operation(&self, reference: OperationRef) -> Result<Option<SourceOperation>, StoreError> {
        match self
            .operations
            .iter()
            .rev()
            .find(|operation| operation.reference() == reference)
        {
            Some(operation) => Ok(Some(operation.clone())),
            None => self.store.operation(reference),
        }
    }

    fn next_operation_id(&mut self) -> OperationId {
        self.store.next_operation_id.fetch_add(1, Ordering::SeqCst)
    }

    fn put_operation(&mut self, operation: SourceOperation) {
        self.operations.push(operation);
    }

    fn commit(self) -> Result<(), StoreError> {
        let store = self.store;
        if !store.is_open() {
            return Err(StoreError::Closed);
        }

        // take every lock up front: once writing starts nothing can fail
        let mut operations = store
            .operations
            .write()
            .map_err(|_| StoreError::Poisoned)?;
        let mut by_operation = store
            .by_operation
            .write()
            .map_err(|_| StoreError::Poisoned)?;
        let mut chains = Vec::new();
        for currency in Currency::ALL {
            if self.locked[currency.index()] {
                let rows = store
                    .chain(currency)
                    .rows
                    .write()
                    .map_err(|_| StoreError::Poisoned)?;
                chains.push((currency, rows));
            }
        }

        for annotation in &self.annotations {
            let exists = chains.iter().any(|(currency, rows)| {
                *currency == annotation.currency && rows.iter().any(|row| row.id == annotation.id)
            });
            if !exists {
                return Err(StoreError::MissingMovement {
                    id: annotation.id,
                    currency: annotation.currency,
                });
            }
        }

        for (currency, rows) in chains.iter_mut() {
            rows.extend(
                self.staged
                    .iter()
                    .filter(|movement| movement.currency == *currency)
                    .cloned(),
            );
            for annotation in self.annotations.iter().filter(|a| a.currency == *currency) {
                if let Some(row) = rows.iter_mut().find(|row| row.id == annotation.id) {
                    if !row.concept.starts_with(&annotation.marker) {
                        row.concept = format!("{}{}", annotation.marker, row.concept);
                    }
                }
            }
        }

        for movement in &self.staged {
            by_operation
                .entry(movement.operation)
                .or_default()
                .push((movement.currency, movement.id));
        }
        for operation in self.operations {
            operations.insert(operation.reference(), operation);
        }
        debug!(movements = self.staged.len(), "transaction committed");
        Ok(())
    }
}
