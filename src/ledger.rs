use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use crate::{
    movement::{Currency, Movement, MovementDraft, NewMovement, OperationRef},
    operation::OperationAction,
    store::{StoreError, StoreTransaction},
};

/// Input rejected before anything is written.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown currency code `{0}`")]
    UnknownCurrency(String),
    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("Movement must reference the operation that produced it")]
    MissingOperation,
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },
    #[error("Exchange rate must be positive, got {0}")]
    NonPositiveRate(Decimal),
    #[error("Cannot exchange {0} into itself")]
    SameCurrencyExchange(Currency),
    #[error("Page size must be between 1 and {max}, got {requested}")]
    PageSize { requested: usize, max: usize },
    #[error("Pages are numbered from 1")]
    ZeroPage,
    #[error("Month {month} of {year} is not a valid month")]
    InvalidMonth { year: i32, month: u32 },
    #[error("Amount is too large to be represented")]
    AmountOverflow,
    #[error("Movement would push the {0} balance out of range")]
    BalanceOverflow(Currency),
    #[error("Operation {operation} does not move {currency}")]
    ForeignCurrency {
        operation: OperationRef,
        currency: Currency,
    },
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{action:?} cannot be applied to {operation}, because it is {state}")]
    StateConflict {
        operation: OperationRef,
        state: &'static str,
        action: OperationAction,
    },
    #[error("Operation {0} does not exist")]
    OperationNotFound(OperationRef),
    #[error("Operation {0} has no movement left to offset")]
    MovementNotFound(OperationRef),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Coarse error categories exposed to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    StateConflict,
    NotFound,
    StorageFailure,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::StateConflict { .. } => ErrorKind::StateConflict,
            LedgerError::OperationNotFound(_) | LedgerError::MovementNotFound(_) => {
                ErrorKind::NotFound
            }
            LedgerError::Storage(_) => ErrorKind::StorageFailure,
        }
    }
}

pub(crate) fn require_text(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::EmptyField { field })
    } else {
        Ok(())
    }
}

pub(crate) fn require_positive(amount: Decimal) -> Result<(), ValidationError> {
    if amount > Decimal::ZERO {
        Ok(())
    } else {
        Err(ValidationError::NonPositiveAmount(amount))
    }
}

/// Checks a draft and turns it into a movement ready to be placed on its chain.
pub fn validate_draft(
    draft: MovementDraft,
    recorded_at: DateTime<Utc>,
) -> Result<NewMovement, ValidationError> {
    require_positive(draft.amount)?;
    let operation = match draft.operation {
        Some(operation) if operation.id > 0 => operation,
        _ => return Err(ValidationError::MissingOperation),
    };
    require_text(&draft.concept, "Concept")?;

    Ok(NewMovement {
        currency: draft.currency,
        amount: draft.amount,
        direction: draft.direction,
        concept: draft.concept.trim().to_string(),
        operation,
        actor: draft.actor,
        reverses: None,
        recorded_at,
    })
}

/// Validates `draft` and appends it to the open transaction.
///
/// The resulting balance is derived from the latest balance visible inside the
/// transaction, so the caller must have latched `draft.currency`.
pub fn stage_movement<T: StoreTransaction>(
    tx: &mut T,
    draft: MovementDraft,
    recorded_at: DateTime<Utc>,
) -> Result<Movement, LedgerError> {
    let entry = validate_draft(draft, recorded_at)?;
    stage_entry(tx, entry)
}

/// Appends an already validated entry, refusing it when the resulting balance
/// would not fit in a `Decimal`.
pub(crate) fn stage_entry<T: StoreTransaction>(
    tx: &mut T,
    entry: NewMovement,
) -> Result<Movement, LedgerError> {
    let balance = tx.latest_balance(entry.currency)?;
    if entry.direction.apply(balance, entry.amount).is_none() {
        return Err(ValidationError::BalanceOverflow(entry.currency).into());
    }
    let movement = tx.append(entry)?;
    debug!(
        currency = %movement.currency(),
        operation = %movement.operation(),
        amount = %movement.amount(),
        balance_after = %movement.balance_after(),
        "movement staged"
    );
    Ok(movement)
}
