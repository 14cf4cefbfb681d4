use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::{
    config::TreasuryConfig,
    ledger::{LedgerError, ValidationError, stage_entry, validate_draft},
    movement::{Currency, Movement, MovementDraft, OperationRef, OperationType},
    operation::{Exchanges, Loans, OperationAction, SourceOperation, Vouchers, Withdrawals},
    query::{
        ChainBreak, MonthSummary, MovementFilter, MovementPage, SortOrder, audit_chain, paginate,
        summarize_month,
    },
    store::{MovementStore, StoreTransaction, in_memory_store::InMemoryMovementStore},
};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<F> Clock for F
where
    F: Fn() -> DateTime<Utc> + Send + Sync,
{
    fn now(&self) -> DateTime<Utc> {
        self()
    }
}

/// The central treasury ledger ("caja mayor").
///
/// Owns the movement store handle; adapters borrow it through
/// [`Treasury::vouchers`], [`Treasury::withdrawals`], [`Treasury::exchanges`]
/// and [`Treasury::loans`].
pub struct Treasury<S: MovementStore = InMemoryMovementStore> {
    store: S,
    config: TreasuryConfig,
    clock: Box<dyn Clock>,
}

impl Treasury<InMemoryMovementStore> {
    pub fn open(config: TreasuryConfig) -> Self {
        let store = InMemoryMovementStore::new(config.lock_timeout());
        Self::with_store(store, config)
    }
}

impl<S: MovementStore> Treasury<S> {
    pub fn with_store(store: S, config: TreasuryConfig) -> Self {
        Self {
            store,
            config,
            clock: Box::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn config(&self) -> &TreasuryConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Stops accepting writes. Queries keep answering from the last commit.
    pub fn close(&self) {
        self.store.close();
        info!("treasury closed");
    }

    pub fn vouchers(&self) -> Vouchers<'_, S> {
        Vouchers::new(self)
    }

    pub fn withdrawals(&self) -> Withdrawals<'_, S> {
        Withdrawals::new(self)
    }

    pub fn exchanges(&self) -> Exchanges<'_, S> {
        Exchanges::new(self)
    }

    pub fn loans(&self) -> Loans<'_, S> {
        Loans::new(self)
    }

    /// Runs `work` in a transaction holding `currencies` and commits it.
    ///
    /// Any error drops the transaction, discarding everything it staged.
    pub(crate) fn transact<'s, T>(
        &'s self,
        currencies: &[Currency],
        work: impl FnOnce(&mut S::Transaction<'s>, DateTime<Utc>) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut tx = self.store.begin(currencies)?;
        let value = work(&mut tx, self.clock.now())?;
        tx.commit()?;
        Ok(value)
    }

    /// Applies a transition that moves no cash.
    pub(crate) fn transition(
        &self,
        reference: OperationRef,
        action: OperationAction,
    ) -> Result<SourceOperation, LedgerError> {
        let currencies = self.operation(reference)?.currencies();
        self.transact(&currencies, |tx, _| {
            let mut operation = tx
                .operation(reference)?
                .ok_or(LedgerError::OperationNotFound(reference))?;
            operation.apply(action)?;
            tx.put_operation(operation.clone());
            Ok(operation)
        })
    }

    /// Records a movement on behalf of a collaborator.
    ///
    /// The draft must reference an operation that already exists and moves
    /// `draft.currency`; a later reversal of that operation offsets it too.
    pub fn record_movement(&self, draft: MovementDraft) -> Result<Movement, LedgerError> {
        let movement = self.transact(&[draft.currency], |tx, now| {
            let entry = validate_draft(draft, now)?;
            let operation = tx
                .operation(entry.operation)?
                .ok_or(LedgerError::OperationNotFound(entry.operation))?;
            if !operation.currencies().contains(&entry.currency) {
                return Err(ValidationError::ForeignCurrency {
                    operation: entry.operation,
                    currency: entry.currency,
                }
                .into());
            }
            stage_entry(tx, entry)
        })?;
        info!(
            id = movement.id(),
            currency = %movement.currency(),
            operation = %movement.operation(),
            amount = %movement.amount(),
            "movement recorded"
        );
        Ok(movement)
    }

    pub fn balance(&self, currency: Currency) -> Result<Decimal, LedgerError> {
        Ok(self.store.latest_balance(currency)?)
    }

    pub fn balances(&self) -> Result<Vec<(Currency, Decimal)>, LedgerError> {
        Currency::ALL
            .into_iter()
            .map(|currency| Ok((currency, self.balance(currency)?)))
            .collect()
    }

    /// Every movement of every currency, in id order.
    pub fn movements(&self) -> Result<Vec<Movement>, LedgerError> {
        Ok(self.store.movements(None)?)
    }

    pub fn list_movements(
        &self,
        filter: &MovementFilter,
        page: usize,
        page_size: usize,
        sort: SortOrder,
    ) -> Result<MovementPage, LedgerError> {
        let movements = self.store.movements(filter.currency)?;
        Ok(paginate(
            movements,
            filter,
            page,
            page_size,
            self.config.max_page_size,
            sort,
        )?)
    }

    /// Income and expense totals of the current month.
    pub fn month_summary(&self) -> Result<MonthSummary, LedgerError> {
        let now = self.clock.now();
        self.month_summary_for(now.year(), now.month())
    }

    pub fn month_summary_for(&self, year: i32, month: u32) -> Result<MonthSummary, LedgerError> {
        Ok(summarize_month(&self.store.movements(None)?, year, month)?)
    }

    /// Operation types that have produced at least one movement.
    pub fn operation_types(&self) -> Result<BTreeSet<OperationType>, LedgerError> {
        Ok(self
            .store
            .movements(None)?
            .iter()
            .map(|movement| movement.operation().kind)
            .collect())
    }

    pub fn operation(&self, reference: OperationRef) -> Result<SourceOperation, LedgerError> {
        self.store
            .operation(reference)?
            .ok_or(LedgerError::OperationNotFound(reference))
    }

    pub fn operations(&self) -> Result<Vec<SourceOperation>, LedgerError> {
        Ok(self.store.operations()?)
    }

    /// Checks the chain of `currency`; an empty result means it is consistent.
    pub fn audit_chain(&self, currency: Currency) -> Result<Vec<ChainBreak>, LedgerError> {
        Ok(audit_chain(&self.store.movements(Some(currency))?))
    }
}
