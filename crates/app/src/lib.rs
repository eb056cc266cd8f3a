//! # growdash-app
//!
//! Application layer: use-cases and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound ports):
//!   - `EventStore`: calendar events and their execution marks
//!   - `CommandStore`: the device command queue with conditional transitions
//!   - `OccurrenceLedger`: claim an occurrence and enqueue its commands atomically
//!   - `CommandNotifier`: announce command status changes
//! - Define **driving/inbound ports** as use-case structs:
//!   - `EventScheduler`: expand due events and fire their occurrences
//!   - `CommandLifecycle`: time out commands no agent finished
//!   - `CommandService`: send user commands, record agent results
//! - Provide **in-process infrastructure** that doesn't need IO (status bus)
//! - Provide an in-memory store for use-case tests, compiled only for tests
//!
//! ## Dependency rule
//! Depends on `growdash-domain` only (plus `tokio::sync` for channels).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod command_bus;
pub mod lifecycle;
#[cfg(test)]
pub(crate) mod memory;
pub mod ports;
pub mod scheduler;
pub mod services;
