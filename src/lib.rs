/// Movement model: currencies, directions and the immutable ledger entry.
pub mod movement;

/// Validation and the ledger writer every adapter goes through, plus the
/// crate-wide error taxonomy.
pub mod ledger;

/// Movement store interface, plus "in memory" implementation with one
/// write latch per currency chain.
pub mod store;

/// Compensating reversals of previously recorded operations.
pub mod reversal;

/// Business operations feeding the treasury, each a small state machine.
pub mod operation;

/// Read side: paging, month summaries and chain audits.
pub mod query;

/// Runtime settings loaded from `TREASURY_*` environment variables.
pub mod config;

/// The treasury facade tying store, writer, reversals and adapters together.
pub mod treasury;

/// Bootstrap for the `caja-mayor` binary: replays an operations script and
/// prints the resulting chains. Lives here so integration tests can drive it.
pub mod bin_utils;

pub use ledger::{ErrorKind, LedgerError, ValidationError};
pub use movement::{Currency, Direction, Movement, MovementDraft, OperationRef, OperationType};
pub use treasury::Treasury;
