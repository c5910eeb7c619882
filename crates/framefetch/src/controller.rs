//! The per-module context object: one reactor, one manager, and the
//! attach / tick / detach lifecycle around them.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::config::ControllerConfig;
use crate::engine::{EngineError, TransferEngine, TransferHandle};
use crate::error::{AttachError, PollError, SubmitError};
use crate::manager::{PollSummary, TransferManager};
use crate::reactor::ReadinessReactor;
use crate::request::TransferRequest;
use crate::task::{CompletionHandler, UserContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Attached,
    Draining,
    /// An invariant violation was detected. Nothing runs any more.
    Halted,
}

/// How the shutdown drain went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub polls: u64,
    pub completed: usize,
    pub discarded: usize,
    pub elapsed: Duration,
    pub budget_exhausted: bool,
}

pub struct Controller<E: TransferEngine> {
    reactor: ReadinessReactor,
    manager: TransferManager<E>,
    config: ControllerConfig,
    state: LifecycleState,
}

impl<E: TransferEngine> Controller<E> {
    /// Bring the subsystem up. `init` performs the engine library's global
    /// setup and builds the engine; if it fails nothing is left behind.
    pub fn attach<F>(config: ControllerConfig, init: F) -> Result<Self, AttachError>
    where
        F: FnOnce() -> Result<E, EngineError>,
    {
        let reactor = ReadinessReactor::new(config.event_capacity)?;
        let engine = init().inspect_err(|e| error!(error = %e, "transfer engine init failed"))?;

        info!(
            event_capacity = config.event_capacity,
            drain_timeout_ms = config.drain_timeout.map(|d| d.as_millis() as u64),
            drain_max_polls = config.drain_max_polls,
            "transfer subsystem attached"
        );

        Ok(Self {
            reactor,
            manager: TransferManager::new(engine),
            config,
            state: LifecycleState::Attached,
        })
    }

    /// Per-tick entry point. Never blocks.
    pub fn poll(&mut self, now: Instant) -> Result<PollSummary, PollError> {
        if self.state == LifecycleState::Halted {
            return Err(PollError::Halted);
        }

        match self.manager.poll(&mut self.reactor, now) {
            Ok(summary) => Ok(summary),
            Err(PollError::Invariant(violation)) => {
                error!(%violation, active = self.manager.active_count(), "halting transfer subsystem");
                self.state = LifecycleState::Halted;
                self.manager.begin_shutdown();
                Err(PollError::Invariant(violation))
            }
            Err(e) => Err(e),
        }
    }

    pub fn submit(
        &mut self,
        request: TransferRequest,
        callback: impl CompletionHandler + 'static,
        context: UserContext,
    ) -> Result<TransferHandle, SubmitError> {
        if self.state != LifecycleState::Attached {
            return Err(SubmitError::ShuttingDown);
        }
        let result = self.manager.submit(&mut self.reactor, request, callback, context);
        if let Err(SubmitError::Invariant(violation)) = &result {
            error!(%violation, "halting transfer subsystem");
            self.state = LifecycleState::Halted;
            self.manager.begin_shutdown();
        }
        result
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn manager(&self) -> &TransferManager<E> {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut TransferManager<E> {
        &mut self.manager
    }

    pub fn reactor(&self) -> &ReadinessReactor {
        &self.reactor
    }

    /// Tear down: refuse new work, poll until every transfer has finished or
    /// the drain budget runs out, then discard whatever is left.
    pub fn detach(mut self) -> DrainReport {
        let started = Instant::now();
        let mut report = DrainReport::default();

        if self.state != LifecycleState::Halted {
            self.state = LifecycleState::Draining;
        }
        self.manager.begin_shutdown();

        let pending = self.manager.active_count();
        if pending > 0 {
            info!(pending, "draining transfers before detach");
        }

        while self.state == LifecycleState::Draining && !self.manager.is_all_transfers_completed() {
            if self.budget_spent(&report, started) {
                report.budget_exhausted = true;
                warn!(
                    polls = report.polls,
                    remaining = self.manager.active_count(),
                    "drain budget exhausted"
                );
                break;
            }

            report.polls += 1;
            match self.poll(Instant::now()) {
                Ok(summary) if summary.completed > 0 => report.completed += summary.completed,
                Ok(_) => thread::sleep(self.config.drain_poll_interval),
                Err(e) if e.is_fatal() => break,
                Err(e) => {
                    warn!(error = %e, "poll failed during drain");
                    thread::sleep(self.config.drain_poll_interval);
                }
            }
        }

        report.discarded = self.manager.remove_all_tasks(&mut self.reactor);
        report.elapsed = started.elapsed();

        info!(
            polls = report.polls,
            completed = report.completed,
            discarded = report.discarded,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "transfer subsystem detached"
        );
        report
    }

    fn budget_spent(&self, report: &DrainReport, started: Instant) -> bool {
        if let Some(max) = self.config.drain_max_polls {
            if report.polls >= max {
                return true;
            }
        }
        if let Some(timeout) = self.config.drain_timeout {
            if started.elapsed() >= timeout {
                return true;
            }
        }
        false
    }
}
