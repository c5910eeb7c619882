use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::engine::{EngineError, TransferHandle};

/// Synchronous rejection of a submission. No task exists afterwards.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("transfer subsystem is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

/// The registry and the engine disagree. Continuing would leak or double-free
/// engine resources, so callers treat this as unrecoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("engine reported unknown handle {0} as finished")]
    UnknownHandle(TransferHandle),
    #[error("task {0} completed twice")]
    DoubleCompletion(TransferHandle),
    #[error("engine handed out handle {0} while it is still registered")]
    HandleReused(TransferHandle),
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("readiness poll failed: {0}")]
    Reactor(#[from] io::Error),
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
    #[error("transfer subsystem halted after an invariant violation")]
    Halted,
}

impl PollError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Invariant(_) | Self::Halted)
    }
}

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("transfer engine failed to initialize: {0}")]
    EngineInit(#[from] EngineError),
    #[error("cannot create readiness reactor: {0}")]
    Reactor(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
