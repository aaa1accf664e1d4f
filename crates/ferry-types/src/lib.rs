//! Shared ferry data model: legacy entries, transformed records, usage
//! events, state-log entries, and the structured error model.
//!
//! This crate is dependency-light so both the state backend and the engine
//! can use it.

pub mod entry;
pub mod envelope;
pub mod error;
pub mod event;
pub mod state;
