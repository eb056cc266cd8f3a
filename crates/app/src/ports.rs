//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the application core and the outside world.
//! They are defined here (in `app`) so that both the use-case layer and the
//! adapter layer can depend on them without creating circular dependencies.

pub mod command_store;
pub mod event_store;
pub mod ledger;
pub mod notifier;

pub use command_store::{CommandStore, CommandTransition, TransitionOutcome};
pub use event_store::{DueEvents, EventStore};
pub use ledger::{ClaimThenEnqueue, FireOutcome, OccurrenceFiring, OccurrenceLedger};
pub use notifier::CommandNotifier;
