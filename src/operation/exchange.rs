use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::{
    ledger::{LedgerError, ValidationError, require_positive, stage_movement},
    movement::{
        ActorId, Currency, Direction, Movement, MovementDraft, OperationId, OperationRef,
        OperationType,
    },
    reversal::ReversalResult,
    store::{MovementStore, StoreTransaction},
    treasury::Treasury,
};

use super::{OperationAction, SourceOperation, state_conflict};

/// Decimal places kept on the converted amount.
const CONVERTED_SCALE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Active,
    Cancelled,
}

impl ExchangeState {
    pub fn name(self) -> &'static str {
        match self {
            ExchangeState::Active => "active",
            ExchangeState::Cancelled => "cancelled",
        }
    }

    pub fn next(self, action: OperationAction) -> Option<Self> {
        match (self, action) {
            (ExchangeState::Active, OperationAction::Reverse) => Some(ExchangeState::Cancelled),
            _ => None,
        }
    }
}

/// Conversion of treasury cash from one currency into another.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrencyExchange {
    pub id: OperationId,
    pub from: Currency,
    pub to: Currency,
    /// Amount taken out of `from`.
    pub amount: Decimal,
    /// Units of `to` per unit of `from`.
    pub rate: Decimal,
    /// Amount put into `to`.
    pub converted: Decimal,
    pub state: ExchangeState,
    pub actor: ActorId,
    pub exchanged_at: DateTime<Utc>,
}

impl CurrencyExchange {
    pub fn reference(&self) -> OperationRef {
        OperationRef::new(OperationType::Exchange, self.id)
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
pub struct ExchangeRequest {
    pub from: Currency,
    pub amount: Decimal,
    pub to: Currency,
    pub rate: Decimal,
}

impl ExchangeRequest {
    /// Destination amount for this request.
    pub fn converted(&self) -> Result<Decimal, ValidationError> {
        if self.from == self.to {
            return Err(ValidationError::SameCurrencyExchange(self.from));
        }
        require_positive(self.amount)?;
        if self.rate <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveRate(self.rate));
        }
        let converted = self
            .amount
            .checked_mul(self.rate)
            .ok_or(ValidationError::AmountOverflow)?
            .round_dp(CONVERTED_SCALE);
        require_positive(converted)?;
        Ok(converted)
    }
}

/// Currency exchange adapter bound to a treasury.
pub struct Exchanges<'t, S: MovementStore> {
    treasury: &'t Treasury<S>,
}

impl<'t, S: MovementStore> Exchanges<'t, S> {
    pub(crate) fn new(treasury: &'t Treasury<S>) -> Self {
        Self { treasury }
    }

    /// Debits `amount` from the source chain and credits the converted amount
    /// to the destination chain, in one transaction.
    pub fn exchange(
        &self,
        request: ExchangeRequest,
        actor: ActorId,
    ) -> Result<(CurrencyExchange, [Movement; 2]), LedgerError> {
        let converted = request.converted()?;

        let (exchange, legs) = self
            .treasury
            .transact(&[request.from, request.to], |tx, now| {
                let exchange = CurrencyExchange {
                    id: tx.next_operation_id(),
                    from: request.from,
                    to: request.to,
                    amount: request.amount,
                    rate: request.rate,
                    converted,
                    state: ExchangeState::Active,
                    actor,
                    exchanged_at: now,
                };
                let concept = format!(
                    "Exchange #{}: {} {} -> {} {} at {}",
                    exchange.id,
                    exchange.amount,
                    exchange.from,
                    exchange.converted,
                    exchange.to,
                    exchange.rate
                );
                let outgoing = stage_movement(
                    tx,
                    MovementDraft {
                        currency: exchange.from,
                        amount: exchange.amount,
                        direction: Direction::Expense,
                        concept: concept.clone(),
                        operation: Some(exchange.reference()),
                        actor,
                    },
                    now,
                )?;
                let incoming = stage_movement(
                    tx,
                    MovementDraft {
                        currency: exchange.to,
                        amount: exchange.converted,
                        direction: Direction::Income,
                        concept,
                        operation: Some(exchange.reference()),
                        actor,
                    },
                    now,
                )?;
                tx.put_operation(SourceOperation::Exchange(exchange.clone()));
                Ok((exchange, [outgoing, incoming]))
            })?;

        info!(
            exchange = exchange.id,
            from = %exchange.from,
            to = %exchange.to,
            amount = %exchange.amount,
            converted = %exchange.converted,
            "currency exchanged"
        );
        Ok((exchange, legs))
    }

    /// Reverses both legs of an active exchange.
    pub fn cancel(
        &self,
        id: OperationId,
        actor: ActorId,
        reason: &str,
    ) -> Result<ReversalResult, LedgerError> {
        self.treasury
            .reverse(OperationRef::new(OperationType::Exchange, id), actor, reason)
    }

    pub fn get(&self, id: OperationId) -> Result<CurrencyExchange, LedgerError> {
        match self
            .treasury
            .operation(OperationRef::new(OperationType::Exchange, id))?
        {
            SourceOperation::Exchange(exchange) => Ok(exchange),
            other => Err(LedgerError::OperationNotFound(other.reference())),
        }
    }
}
