//! Task registry and completion dispatch.
//!
//! Every handle the engine knows about has exactly one task here, and the
//! other way round. Completions are applied in two passes: first every
//! finished task is pulled out of the registry and released on the engine,
//! then the callbacks run. A callback therefore never observes a half-updated
//! registry, and the borrow on the manager keeps it from reaching back in.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::engine::{FinishedTransfer, TransferEngine, TransferHandle};
use crate::error::{InvariantViolation, PollError, SubmitError};
use crate::reactor::ReadinessReactor;
use crate::request::TransferRequest;
use crate::task::{CompletionHandler, TaskStatus, TransferTask, UserContext};

/// Running totals since the manager was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// What one poll step did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub ready_sockets: usize,
    pub completed: usize,
}

pub struct TransferManager<E> {
    engine: E,
    tasks: HashMap<TransferHandle, TransferTask>,
    next_seq: u64,
    shutting_down: bool,
    stats: ManagerStats,
    finished: Vec<FinishedTransfer>,
}

impl<E: TransferEngine> TransferManager<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            tasks: HashMap::new(),
            next_seq: 0,
            shutting_down: false,
            stats: ManagerStats::default(),
            finished: Vec::new(),
        }
    }

    /// Validate `request`, start it on the engine and register the task.
    pub fn submit(
        &mut self,
        reactor: &mut ReadinessReactor,
        request: TransferRequest,
        callback: impl CompletionHandler + 'static,
        context: UserContext,
    ) -> Result<TransferHandle, SubmitError> {
        if self.shutting_down {
            return Err(SubmitError::ShuttingDown);
        }
        request.validate().map_err(SubmitError::InvalidRequest)?;

        let seq = self.next_seq;
        let mut task = TransferTask::new(request, Box::new(callback), context, seq, Instant::now());

        let handle = self.engine.start(task.request())?;
        if self.tasks.contains_key(&handle) {
            // The new transfer cannot be released without tearing down the
            // live one behind the same handle. It stays with the engine until
            // the halt that follows tears everything down.
            error!(%handle, "engine reused a live handle");
            return Err(InvariantViolation::HandleReused(handle).into());
        }
        task.mark_in_flight(handle)?;

        debug!(
            %handle,
            method = %task.request().method,
            url = %task.request().url,
            "transfer submitted"
        );

        self.next_seq += 1;
        self.stats.submitted += 1;
        self.tasks.insert(handle, task);
        reactor.sync(&mut self.engine);

        Ok(handle)
    }

    /// Drive the engine through one reactor pass and dispatch completions.
    pub fn poll(&mut self, reactor: &mut ReadinessReactor, now: Instant) -> Result<PollSummary, PollError> {
        let pass = reactor.poll(&mut self.engine, now)?;

        self.engine.take_finished(&mut self.finished);
        if self.finished.is_empty() {
            return Ok(PollSummary {
                ready_sockets: pass.ready_sockets,
                completed: 0,
            });
        }

        // Pass 1: detach every finished task from the registry and the engine.
        let mut finished = std::mem::take(&mut self.finished);
        let mut batch = Vec::with_capacity(finished.len());
        let mut seen = HashSet::with_capacity(finished.len());
        let mut violation = None;
        for FinishedTransfer { handle, outcome } in finished.drain(..) {
            let Some(task) = self.tasks.remove(&handle) else {
                violation = Some(if seen.contains(&handle) {
                    InvariantViolation::DoubleCompletion(handle)
                } else {
                    InvariantViolation::UnknownHandle(handle)
                });
                break;
            };
            seen.insert(handle);
            self.engine.release(handle);
            batch.push((task, outcome));
        }
        self.finished = finished;

        if let Some(violation) = violation {
            error!(%violation, "registry out of sync with engine");
            // Tasks already pulled out would otherwise vanish. Reports after
            // the bad one were dropped; their tasks stay for the sweep.
            for (task, _) in batch {
                self.discard(task);
            }
            reactor.sync(&mut self.engine);
            return Err(violation.into());
        }
        reactor.sync(&mut self.engine);

        // Pass 2: the registry is settled, run callbacks.
        let completed = batch.len();
        for (mut task, outcome) in batch {
            let handle = task.handle();
            match &outcome {
                Ok(response) => {
                    self.stats.succeeded += 1;
                    debug!(
                        handle = ?handle,
                        status = response.status,
                        bytes = response.body.len(),
                        elapsed_ms = response.elapsed.as_millis() as u64,
                        "transfer complete"
                    );
                }
                Err(e) => {
                    self.stats.failed += 1;
                    info!(handle = ?handle, url = %task.request().url, error = %e, "transfer failed");
                }
            }
            task.complete(outcome)?;
        }

        Ok(PollSummary {
            ready_sockets: pass.ready_sockets,
            completed,
        })
    }

    pub fn is_all_transfers_completed(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel every remaining task without calling its callback and release
    /// it on the engine. Returns how many were discarded.
    pub fn remove_all_tasks(&mut self, reactor: &mut ReadinessReactor) -> usize {
        if self.tasks.is_empty() {
            return 0;
        }

        let mut remaining: Vec<TransferTask> = self.tasks.drain().map(|(_, task)| task).collect();
        remaining.sort_by_key(TransferTask::seq);

        let discarded = remaining.len();
        for task in remaining {
            if let Some(handle) = task.handle() {
                self.engine.release(handle);
            }
            self.discard(task);
        }
        reactor.sync(&mut self.engine);

        discarded
    }

    /// Cancel a task that is already out of the registry and released on
    /// the engine. Its callback never runs.
    fn discard(&mut self, mut task: TransferTask) {
        let handle = task.handle();
        warn!(
            handle = ?handle,
            url = %task.request().url,
            age_ms = task.submitted_at().elapsed().as_millis() as u64,
            "discarding unfinished transfer"
        );
        if let Err(e) = task.cancel() {
            warn!(handle = ?handle, error = %e, "task was not in flight at discard");
        }
        self.stats.cancelled += 1;
    }

    /// Refuse further submissions. Already running transfers carry on.
    pub fn begin_shutdown(&mut self) {
        if !self.shutting_down {
            info!(active = self.tasks.len(), "transfer manager shutting down");
        }
        self.shutting_down = true;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn contains(&self, handle: TransferHandle) -> bool {
        self.tasks.contains_key(&handle)
    }

    pub fn status(&self, handle: TransferHandle) -> Option<TaskStatus> {
        self.tasks.get(&handle).map(TransferTask::status)
    }

    /// Handles of live tasks, oldest first.
    pub fn handles(&self) -> Vec<TransferHandle> {
        let mut live: Vec<&TransferTask> = self.tasks.values().collect();
        live.sort_by_key(|task| task.seq());
        live.iter().filter_map(|task| task.handle()).collect()
    }

    pub fn stats(&self) -> ManagerStats {
        self.stats
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }
}
