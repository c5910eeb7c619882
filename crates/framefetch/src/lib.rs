//! framefetch: non-blocking HTTP transfers for host-embedded modules.
//!
//! A host with its own frame loop calls [`Controller::poll`] once per tick.
//! Each call advances every in-flight transfer by whatever work is ready and
//! returns straight away; completion callbacks run inside that call.
//!
//! ```text
//! host tick ──> Controller::poll(now)
//!                  └─> TransferManager::poll
//!                        ├─> ReadinessReactor::poll ──> TransferEngine::{socket,timer}_action
//!                        └─> take_finished ──> remove from registry ──> callback
//! ```
//!
//! The engine that moves bytes sits behind [`TransferEngine`]; the
//! `framefetch-curl` crate provides one on top of libcurl.

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod manager;
pub mod reactor;
pub mod request;
pub mod task;

// Re-export key types for convenience.
pub use config::{ConfigError, ControllerConfig};
pub use controller::{Controller, DrainReport, LifecycleState};
pub use engine::{
    EngineError, FailureKind, FinishedTransfer, RawSocket, Readiness, SocketInterest, SocketUpdate,
    TransferEngine, TransferError, TransferHandle, TransferOutcome,
};
pub use error::{AttachError, InvariantViolation, PollError, SubmitError};
pub use manager::{ManagerStats, PollSummary, TransferManager};
pub use reactor::{PassStats, ReadinessReactor};
pub use request::{Method, TransferRequest, TransferResponse};
pub use task::{CompletionHandler, TaskStatus, TransferTask, UserContext};
