use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::ledger::ValidationError;

pub type MovementId = u64;
pub type OperationId = u64;
pub type ActorId = u32;

/// The three currencies held by the treasury.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Currency {
    #[serde(rename = "PYG")]
    Guarani,
    #[serde(rename = "USD")]
    Dollar,
    #[serde(rename = "BRL")]
    Real,
}

impl Currency {
    /// Every currency, in the order their chains are latched.
    pub const ALL: [Currency; 3] = [Currency::Guarani, Currency::Dollar, Currency::Real];

    pub fn code(self) -> &'static str {
        match self {
            Currency::Guarani => "PYG",
            Currency::Dollar => "USD",
            Currency::Real => "BRL",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Currency::Guarani => 0,
            Currency::Dollar => 1,
            Currency::Real => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = ValidationError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        let code = code.trim();
        Currency::ALL
            .into_iter()
            .find(|currency| currency.code().eq_ignore_ascii_case(code))
            .ok_or_else(|| ValidationError::UnknownCurrency(code.to_string()))
    }
}

/// Which adapter produced a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Voucher,
    Withdrawal,
    Exchange,
    Loan,
}

impl OperationType {
    pub fn name(self) -> &'static str {
        match self {
            OperationType::Voucher => "voucher",
            OperationType::Withdrawal => "withdrawal",
            OperationType::Exchange => "exchange",
            OperationType::Loan => "loan",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Back-reference from a movement to the source operation that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationRef {
    pub kind: OperationType,
    pub id: OperationId,
}

impl OperationRef {
    pub fn new(kind: OperationType, id: OperationId) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for OperationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Income,
    Expense,
}

impl Direction {
    pub fn from_income(is_income: bool) -> Self {
        if is_income {
            Direction::Income
        } else {
            Direction::Expense
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            Direction::Income => Direction::Expense,
            Direction::Expense => Direction::Income,
        }
    }

    /// Balance after moving `amount` in this direction from `balance`, or
    /// `None` when it does not fit in a `Decimal`.
    pub fn apply(self, balance: Decimal, amount: Decimal) -> Option<Decimal> {
        match self {
            Direction::Income => balance.checked_add(amount),
            Direction::Expense => balance.checked_sub(amount),
        }
    }

    pub fn signed(self, amount: Decimal) -> Decimal {
        match self {
            Direction::Income => amount,
            Direction::Expense => -amount,
        }
    }
}

/// One immutable entry of a currency chain.
///
/// Only the store creates movements. After commit the sole permitted change is
/// prefixing [`Movement::concept`] with a reversal marker.
#[derive(Debug, Clone, PartialEq)]
pub struct Movement {
    pub(crate) id: MovementId,
    pub(crate) recorded_at: DateTime<Utc>,
    pub(crate) currency: Currency,
    pub(crate) amount: Decimal,
    pub(crate) direction: Direction,
    pub(crate) balance_before: Decimal,
    pub(crate) balance_after: Decimal,
    pub(crate) concept: String,
    pub(crate) operation: OperationRef,
    pub(crate) actor: ActorId,
    pub(crate) reverses: Option<MovementId>,
}

impl Movement {
    pub fn id(&self) -> MovementId {
        self.id
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_income(&self) -> bool {
        self.direction == Direction::Income
    }

    pub fn balance_before(&self) -> Decimal {
        self.balance_before
    }

    pub fn balance_after(&self) -> Decimal {
        self.balance_after
    }

    pub fn concept(&self) -> &str {
        &self.concept
    }

    pub fn operation(&self) -> OperationRef {
        self.operation
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    /// The movement this one offsets, when it is a compensation.
    pub fn reverses(&self) -> Option<MovementId> {
        self.reverses
    }

    pub fn signed_amount(&self) -> Decimal {
        self.direction.signed(self.amount)
    }
}

/// Unvalidated request to record a movement, as handed in by collaborators.
#[derive(Debug, Clone)]
pub struct MovementDraft {
    pub currency: Currency,
    pub amount: Decimal,
    pub direction: Direction,
    pub concept: String,
    pub operation: Option<OperationRef>,
    pub actor: ActorId,
}

/// A validated movement waiting for its position in a chain.
#[derive(Debug, Clone)]
pub struct NewMovement {
    pub currency: Currency,
    pub amount: Decimal,
    pub direction: Direction,
    pub concept: String,
    pub operation: OperationRef,
    pub actor: ActorId,
    pub reverses: Option<MovementId>,
    pub recorded_at: DateTime<Utc>,
}
