//! Boundary with the transfer engine that actually moves bytes.
//!
//! The engine owns DNS, TLS, redirects and the per-connection state machines.
//! The core only tells it which sockets are ready and when time has passed,
//! and collects the sockets it wants watched and the transfers it finished.

use std::fmt;
use std::os::fd::RawFd;
use std::time::Instant;

use thiserror::Error;

use crate::request::{TransferRequest, TransferResponse};

/// Socket descriptor as handed out by the engine.
pub type RawSocket = RawFd;

/// Opaque identifier the engine assigns to an in-flight transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferHandle(u64);

impl TransferHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the engine wants to hear about a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketInterest {
    Read,
    Write,
    ReadWrite,
}

/// A change to the engine's socket set, queued until the reactor applies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketUpdate {
    Watch {
        socket: RawSocket,
        interest: SocketInterest,
    },
    Unwatch {
        socket: RawSocket,
    },
}

/// Readiness observed for one socket during a reactor pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

/// Broad classification of a failed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Resolve,
    Connect,
    Tls,
    Protocol,
    Aborted,
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::Resolve => "resolve",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Protocol => "protocol",
            Self::Aborted => "aborted",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// A transfer the engine gave up on. Delivered to the task's callback, never
/// returned from a poll.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transfer failed ({kind}): {message}")]
pub struct TransferError {
    pub kind: FailureKind,
    pub message: String,
    /// Engine-specific error code, if it has one.
    pub code: Option<i32>,
}

impl TransferError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }
}

pub type TransferOutcome = Result<TransferResponse, TransferError>;

/// A transfer the engine reports as done, with its result.
#[derive(Debug)]
pub struct FinishedTransfer {
    pub handle: TransferHandle,
    pub outcome: TransferOutcome,
}

/// The engine itself misbehaved (as opposed to a single transfer failing).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transfer engine: {0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A multi-transfer engine driven from the outside.
///
/// Every method must return without waiting on the network. Socket interest
/// changes and finished transfers are buffered by the engine and collected by
/// the caller through the `take_*` methods.
pub trait TransferEngine {
    /// Hand a request to the engine. The returned handle must not collide with
    /// any handle that has not been released yet.
    fn start(&mut self, request: &TransferRequest) -> Result<TransferHandle, EngineError>;

    /// Advance whatever is waiting on `socket`.
    fn socket_action(&mut self, socket: RawSocket, readiness: Readiness) -> Result<(), EngineError>;

    /// Advance timers that have expired at `now`. Called once per reactor pass.
    fn timer_action(&mut self, now: Instant) -> Result<(), EngineError>;

    /// Move pending socket interest changes into `out`.
    fn take_socket_updates(&mut self, out: &mut Vec<SocketUpdate>);

    /// Move finished transfers into `out`.
    fn take_finished(&mut self, out: &mut Vec<FinishedTransfer>);

    /// Drop engine-side state for `handle`, finished or not. Unknown handles
    /// are ignored.
    fn release(&mut self, handle: TransferHandle);

    /// Transfers the engine still holds.
    fn active_count(&self) -> usize;
}
