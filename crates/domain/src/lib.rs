//! # growdash-domain
//!
//! Pure domain model for the growdash scheduling core.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps
//! - Define **Events** (calendar entries that drive device actions, one-shot or recurring)
//! - Define **Recurrence rules** (RFC-5545 `RRULE` subset) and their expansion into occurrences
//! - Define the **Action compiler** (event action metadata → device command payload)
//! - Define **Commands** and their lifecycle state machine
//! - Contain all invariant enforcement and domain logic
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod action;
pub mod command;
pub mod event;
pub mod recurrence;
