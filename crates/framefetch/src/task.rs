//! One submitted transfer: request, callback, user context and lifecycle.

use std::any::Any;
use std::fmt;
use std::time::Instant;

use crate::engine::{TransferError, TransferHandle, TransferOutcome};
use crate::error::InvariantViolation;
use crate::request::{TransferRequest, TransferResponse};

/// Caller-supplied value handed back to the callback untouched.
pub type UserContext = Box<dyn Any>;

/// Receives the result of a transfer. Exactly one of the two methods is
/// called, at most once, and never for a task discarded at shutdown.
///
/// Any `FnOnce(TransferHandle, TransferOutcome, UserContext)` closure is a
/// handler.
pub trait CompletionHandler {
    fn on_success(self: Box<Self>, handle: TransferHandle, response: TransferResponse, context: UserContext);
    fn on_failure(self: Box<Self>, handle: TransferHandle, error: TransferError, context: UserContext);
}

impl<F> CompletionHandler for F
where
    F: FnOnce(TransferHandle, TransferOutcome, UserContext),
{
    fn on_success(self: Box<Self>, handle: TransferHandle, response: TransferResponse, context: UserContext) {
        (*self)(handle, Ok(response), context)
    }

    fn on_failure(self: Box<Self>, handle: TransferHandle, error: TransferError, context: UserContext) {
        (*self)(handle, Err(error), context)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InFlight,
    Completed,
    Cancelled,
}

pub struct TransferTask {
    handle: Option<TransferHandle>,
    request: TransferRequest,
    callback: Option<Box<dyn CompletionHandler>>,
    context: Option<UserContext>,
    status: TaskStatus,
    seq: u64,
    submitted_at: Instant,
}

impl TransferTask {
    pub fn new(
        request: TransferRequest,
        callback: Box<dyn CompletionHandler>,
        context: UserContext,
        seq: u64,
        submitted_at: Instant,
    ) -> Self {
        Self {
            handle: None,
            request,
            callback: Some(callback),
            context: Some(context),
            status: TaskStatus::Pending,
            seq,
            submitted_at,
        }
    }

    pub fn handle(&self) -> Option<TransferHandle> {
        self.handle
    }

    pub fn request(&self) -> &TransferRequest {
        &self.request
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Submission order within the owning manager.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// Pending -> InFlight once the engine has accepted the request.
    pub fn mark_in_flight(&mut self, handle: TransferHandle) -> Result<(), InvariantViolation> {
        if self.status != TaskStatus::Pending {
            return Err(InvariantViolation::HandleReused(handle));
        }
        self.handle = Some(handle);
        self.status = TaskStatus::InFlight;
        Ok(())
    }

    /// InFlight -> Completed, firing the callback.
    pub fn complete(&mut self, outcome: TransferOutcome) -> Result<(), InvariantViolation> {
        let handle = self.finish(TaskStatus::Completed)?;
        let (Some(callback), Some(context)) = (self.callback.take(), self.context.take()) else {
            return Err(InvariantViolation::DoubleCompletion(handle));
        };
        match outcome {
            Ok(response) => callback.on_success(handle, response, context),
            Err(error) => callback.on_failure(handle, error, context),
        }
        Ok(())
    }

    /// InFlight -> Cancelled. The callback is dropped without being called.
    pub fn cancel(&mut self) -> Result<(), InvariantViolation> {
        self.finish(TaskStatus::Cancelled)?;
        self.callback = None;
        self.context = None;
        Ok(())
    }

    fn finish(&mut self, to: TaskStatus) -> Result<TransferHandle, InvariantViolation> {
        let handle = self.handle.unwrap_or(TransferHandle::new(0));
        if self.status != TaskStatus::InFlight {
            return Err(InvariantViolation::DoubleCompletion(handle));
        }
        self.status = to;
        Ok(handle)
    }
}

impl fmt::Debug for TransferTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferTask")
            .field("handle", &self.handle)
            .field("method", &self.request.method)
            .field("url", &self.request.url)
            .field("status", &self.status)
            .field("seq", &self.seq)
            .finish()
    }
}
