use std::io::Write;

use chrono::{DateTime, Utc};
use csv::Writer;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::movement::{ActorId, Currency, Direction, Movement, MovementId};

#[derive(Debug, Serialize)]
pub struct MovementRow {
    pub id: MovementId,
    pub recorded_at: DateTime<Utc>,
    pub currency: Currency,
    pub direction: Direction,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub operation: String,
    pub reverses: Option<MovementId>,
    pub actor: ActorId,
    pub concept: String,
}

impl From<&Movement> for MovementRow {
    fn from(movement: &Movement) -> Self {
        Self {
            id: movement.id(),
            recorded_at: movement.recorded_at(),
            currency: movement.currency(),
            direction: movement.direction(),
            amount: movement.amount(),
            balance_before: movement.balance_before(),
            balance_after: movement.balance_after(),
            operation: movement.operation().to_string(),
            reverses: movement.reverses(),
            actor: movement.actor(),
            concept: movement.concept().to_string(),
        }
    }
}

pub fn print_movements<W>(
    output: &mut W,
    movements: impl Iterator<Item = MovementRow>,
) -> anyhow::Result<()>
where
    W: Write,
{
    let mut writer = Writer::from_writer(output);
    for movement in movements {
        if let Err(err) = writer.serialize(movement) {
            anyhow::bail!("Failed to write to CSV: {err}")
        }
    }
    // Ensure all data is flushed to the output
    if let Err(err) = writer.flush() {
        anyhow::bail!("Failed to flush CSV writer: {err}")
    }
    Ok(())
}
