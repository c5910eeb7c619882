//! In-memory engine for driving the core without a network.
#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::io::Read;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use bytes::Bytes;

use framefetch::{
    EngineError, FailureKind, FinishedTransfer, RawSocket, Readiness, SocketInterest, SocketUpdate,
    TransferEngine, TransferError, TransferHandle, TransferOutcome, TransferRequest,
    TransferResponse,
};

/// How a started transfer behaves.
#[derive(Debug, Clone)]
pub enum Plan {
    /// Finish with this status after `ticks` timer steps.
    SucceedAfter { ticks: u32, status: u16 },
    /// Fail after `ticks` timer steps.
    FailAfter { ticks: u32, kind: FailureKind },
    /// Finish with 200 once its socket turns readable.
    SucceedOnReadable,
    /// Never finish.
    Stall,
}

struct Running {
    plan: Plan,
    url: String,
    ticks_seen: u32,
    socket: Option<(UnixStream, UnixStream)>,
    done: bool,
}

#[derive(Default)]
pub struct ScriptedEngine {
    plans: VecDeque<Plan>,
    running: BTreeMap<u64, Running>,
    free: Vec<u64>,
    next: u64,
    updates: Vec<SocketUpdate>,
    finished: Vec<FinishedTransfer>,
    pub refuse_next: bool,
    /// Hand this handle to the next start without tracking a transfer.
    pub reuse_next: Option<TransferHandle>,
    pub socket_actions: Vec<(RawSocket, Readiness)>,
    pub timer_calls: u32,
    pub released: Vec<TransferHandle>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            next: 1,
            ..Self::default()
        }
    }

    /// Behaviour for the next started transfer. Unplanned transfers succeed
    /// after one tick.
    pub fn plan(&mut self, plan: Plan) -> &mut Self {
        self.plans.push_back(plan);
        self
    }

    pub fn clear_plans(&mut self) {
        self.plans.clear();
    }

    /// Report a handle as finished whether or not it exists.
    pub fn inject_finished(&mut self, handle: TransferHandle, outcome: TransferOutcome) {
        self.finished.push(FinishedTransfer { handle, outcome });
    }

    /// Make the socket behind `handle` readable.
    pub fn poke(&mut self, handle: TransferHandle) {
        use std::io::Write;
        let running = self.running.get_mut(&handle.raw()).expect("unknown handle");
        let (_, peer) = running.socket.as_mut().expect("transfer has no socket");
        peer.write_all(b"x").unwrap();
    }

    pub fn socket_of(&self, handle: TransferHandle) -> Option<RawSocket> {
        self.running
            .get(&handle.raw())
            .and_then(|r| r.socket.as_ref())
            .map(|(local, _)| local.as_raw_fd())
    }

    fn finish(&mut self, raw: u64, outcome: TransferOutcome) {
        if let Some(running) = self.running.get_mut(&raw) {
            if !running.done {
                running.done = true;
                self.finished.push(FinishedTransfer {
                    handle: TransferHandle::new(raw),
                    outcome,
                });
            }
        }
    }
}

pub fn ok_response(url: &str, status: u16) -> TransferResponse {
    TransferResponse {
        status,
        headers: vec![("Content-Type".into(), "text/plain".into())],
        body: Bytes::from(format!("body of {}", url)),
        effective_url: Some(url.to_string()),
        elapsed: Duration::from_millis(1),
    }
}

impl TransferEngine for ScriptedEngine {
    fn start(&mut self, request: &TransferRequest) -> Result<TransferHandle, EngineError> {
        if self.refuse_next {
            self.refuse_next = false;
            return Err(EngineError::new("refused"));
        }
        if let Some(handle) = self.reuse_next.take() {
            return Ok(handle);
        }

        let raw = self.free.pop().unwrap_or_else(|| {
            let raw = self.next;
            self.next += 1;
            raw
        });
        let plan = self.plans.pop_front().unwrap_or(Plan::SucceedAfter { ticks: 1, status: 200 });

        let socket = if matches!(plan, Plan::SucceedOnReadable) {
            let (local, peer) = UnixStream::pair().map_err(|e| EngineError::new(e.to_string()))?;
            local.set_nonblocking(true).map_err(|e| EngineError::new(e.to_string()))?;
            self.updates.push(SocketUpdate::Watch {
                socket: local.as_raw_fd(),
                interest: SocketInterest::Read,
            });
            Some((local, peer))
        } else {
            None
        };

        self.running.insert(
            raw,
            Running {
                plan,
                url: request.url.clone(),
                ticks_seen: 0,
                socket,
                done: false,
            },
        );
        Ok(TransferHandle::new(raw))
    }

    fn socket_action(&mut self, socket: RawSocket, readiness: Readiness) -> Result<(), EngineError> {
        self.socket_actions.push((socket, readiness));

        let hit = self.running.iter_mut().find(|(_, r)| {
            r.socket.as_ref().map(|(local, _)| local.as_raw_fd()) == Some(socket)
        });
        let Some((&raw, running)) = hit else {
            return Err(EngineError::new("unknown socket"));
        };
        if readiness.readable {
            if let Some((local, _)) = running.socket.as_mut() {
                let mut buf = [0u8; 64];
                let _ = local.read(&mut buf);
            }
            let url = running.url.clone();
            self.finish(raw, Ok(ok_response(&url, 200)));
        }
        Ok(())
    }

    fn timer_action(&mut self, _now: Instant) -> Result<(), EngineError> {
        self.timer_calls += 1;

        let mut due = Vec::new();
        for (&raw, running) in self.running.iter_mut() {
            if running.done {
                continue;
            }
            running.ticks_seen += 1;
            match running.plan {
                Plan::SucceedAfter { ticks, status } if running.ticks_seen >= ticks => {
                    due.push((raw, Ok(ok_response(&running.url, status))));
                }
                Plan::FailAfter { ticks, kind } if running.ticks_seen >= ticks => {
                    due.push((raw, Err(TransferError::new(kind, format!("{} failed", running.url)))));
                }
                _ => {}
            }
        }
        for (raw, outcome) in due {
            self.finish(raw, outcome);
        }
        Ok(())
    }

    fn take_socket_updates(&mut self, out: &mut Vec<SocketUpdate>) {
        out.append(&mut self.updates);
    }

    fn take_finished(&mut self, out: &mut Vec<FinishedTransfer>) {
        out.append(&mut self.finished);
    }

    fn release(&mut self, handle: TransferHandle) {
        if let Some(running) = self.running.remove(&handle.raw()) {
            if let Some((local, _)) = &running.socket {
                self.updates.push(SocketUpdate::Unwatch {
                    socket: local.as_raw_fd(),
                });
            }
            self.free.push(handle.raw());
            self.released.push(handle);
        }
    }

    fn active_count(&self) -> usize {
        self.running.len()
    }
}
