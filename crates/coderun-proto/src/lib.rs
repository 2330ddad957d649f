//! # coderun-proto
//!
//! Shared types, error definitions, and event records for coderun.
//!
//! This crate provides the vocabulary used between the orchestration core and
//! whatever presents its output:
//! - Session identifiers and the per-session state machine
//! - Output and lifecycle events emitted to the caller
//! - Common error types

mod error;
mod event;
mod session;

pub use error::{Error, ErrorKind, Result};
pub use event::{OutputEvent, RunnerEvent, StreamKind};
pub use session::{SessionId, SessionState};
