//! Non-blocking readiness multiplexing over the engine's sockets.
//!
//! ```text
//!  engine socket updates ──> [watch table] ──> mio registry
//!                                                  │
//!  tick ──> poll(Duration::ZERO) ──> ready events ─┘──> engine.socket_action()
//!                                                        engine.timer_action()
//! ```
//!
//! The OS poller is edge-triggered. Sockets that fired and are still watched
//! get re-armed after the engine has handled them, so data the engine left
//! unread shows up again on the next tick instead of stalling the transfer.

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, trace, warn};

use crate::engine::{Readiness, SocketInterest, SocketUpdate, TransferEngine};

/// Counters from one reactor pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub ready_sockets: usize,
    pub socket_updates: usize,
}

pub struct ReadinessReactor {
    poll: Poll,
    events: Events,
    watched: HashMap<RawFd, SocketInterest>,
    updates: Vec<SocketUpdate>,
    ready: Vec<(RawFd, Readiness)>,
}

impl ReadinessReactor {
    /// `event_capacity` caps how many ready sockets one pass will service.
    pub fn new(event_capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(event_capacity.max(1)),
            watched: HashMap::new(),
            updates: Vec::new(),
            ready: Vec::with_capacity(event_capacity.max(1)),
        })
    }

    /// Start or change readiness notification for `socket`.
    pub fn watch(&mut self, socket: RawFd, interest: SocketInterest) -> io::Result<()> {
        let registry = self.poll.registry();
        let token = Token(socket as usize);
        let mio_interest = to_mio(interest);

        if self.watched.contains_key(&socket) {
            match registry.reregister(&mut SourceFd(&socket), token, mio_interest) {
                Ok(()) => {}
                // Closed and reopened under the same number; the kernel already
                // forgot the old registration.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    registry.register(&mut SourceFd(&socket), token, mio_interest)?;
                }
                Err(e) => return Err(e),
            }
        } else {
            match registry.register(&mut SourceFd(&socket), token, mio_interest) {
                Ok(()) => {}
                // A descriptor number the engine closed without telling us and
                // then reused. The kernel still has the old registration.
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    registry.reregister(&mut SourceFd(&socket), token, mio_interest)?;
                }
                Err(e) => return Err(e),
            }
        }

        self.watched.insert(socket, interest);
        trace!(socket, ?interest, "watching socket");
        Ok(())
    }

    /// Stop watching `socket`. Unknown sockets are ignored.
    pub fn unwatch(&mut self, socket: RawFd) {
        if self.watched.remove(&socket).is_none() {
            return;
        }
        // The engine may already have closed the descriptor, in which case the
        // kernel dropped the registration on its own.
        if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&socket)) {
            debug!(socket, error = %e, "deregister after close");
        }
        trace!(socket, "unwatched socket");
    }

    pub fn is_watching(&self, socket: RawFd) -> bool {
        self.watched.contains_key(&socket)
    }

    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }

    /// Apply whatever socket interest changes the engine has queued.
    pub fn sync<E: TransferEngine>(&mut self, engine: &mut E) -> usize {
        engine.take_socket_updates(&mut self.updates);
        let count = self.updates.len();

        let mut updates = std::mem::take(&mut self.updates);
        for update in updates.drain(..) {
            match update {
                SocketUpdate::Watch { socket, interest } => {
                    if let Err(e) = self.watch(socket, interest) {
                        // The engine will time the transfer out on its own.
                        warn!(socket, error = %e, "cannot watch engine socket");
                    }
                }
                SocketUpdate::Unwatch { socket } => self.unwatch(socket),
            }
        }
        self.updates = updates;

        count
    }

    /// One non-blocking pass: apply interest changes, collect ready sockets,
    /// hand each to the engine, then give the engine its timer step.
    pub fn poll<E: TransferEngine>(&mut self, engine: &mut E, now: Instant) -> io::Result<PassStats> {
        let mut stats = PassStats {
            socket_updates: self.sync(engine),
            ..PassStats::default()
        };

        if !self.watched.is_empty() {
            self.collect_ready()?;
        }

        stats.ready_sockets = self.ready.len();
        let mut ready = std::mem::take(&mut self.ready);
        for &(socket, readiness) in &ready {
            if let Err(e) = engine.socket_action(socket, readiness) {
                warn!(socket, error = %e, "engine rejected socket action");
            }
        }
        stats.socket_updates += self.sync(engine);

        for &(socket, _) in &ready {
            self.rearm(socket);
        }
        ready.clear();
        self.ready = ready;

        if let Err(e) = engine.timer_action(now) {
            warn!(error = %e, "engine timer step failed");
        }
        stats.socket_updates += self.sync(engine);

        Ok(stats)
    }

    fn collect_ready(&mut self) -> io::Result<()> {
        loop {
            match self.poll.poll(&mut self.events, Some(Duration::ZERO)) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        for event in self.events.iter() {
            let socket = event.token().0 as RawFd;
            if !self.watched.contains_key(&socket) {
                continue;
            }
            self.ready.push((
                socket,
                Readiness {
                    readable: event.is_readable() || event.is_read_closed(),
                    writable: event.is_writable(),
                    error: event.is_error(),
                },
            ));
        }
        Ok(())
    }

    fn rearm(&mut self, socket: RawFd) {
        let Some(&interest) = self.watched.get(&socket) else {
            return;
        };
        let token = Token(socket as usize);
        if let Err(e) = self
            .poll
            .registry()
            .reregister(&mut SourceFd(&socket), token, to_mio(interest))
        {
            debug!(socket, error = %e, "re-arm failed, dropping socket");
            self.watched.remove(&socket);
        }
    }
}

fn to_mio(interest: SocketInterest) -> Interest {
    match interest {
        SocketInterest::Read => Interest::READABLE,
        SocketInterest::Write => Interest::WRITABLE,
        SocketInterest::ReadWrite => Interest::READABLE | Interest::WRITABLE,
    }
}
