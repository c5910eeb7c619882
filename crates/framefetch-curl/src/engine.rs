//! libcurl multi-socket engine.
//!
//! libcurl tells us which sockets it cares about through the socket callback
//! and when it next needs a timeout step through the timer callback. Both are
//! buffered here and handed to the reactor on demand; libcurl never waits on
//! anything itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Once;
use std::time::Instant;

use bytes::Bytes;
use curl::easy::{Easy2, List};
use curl::multi::{Easy2Handle, Events, Multi};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use framefetch::{
    EngineError, FailureKind, FinishedTransfer, Method, RawSocket, Readiness, SocketInterest,
    SocketUpdate, TransferEngine, TransferError, TransferHandle, TransferOutcome, TransferRequest,
    TransferResponse,
};

use crate::collector::Collector;
use crate::config::CurlConfig;

static GLOBAL_INIT: Once = Once::new();

pub struct CurlEngine {
    // Dropped before `multi`: each handle detaches itself from the multi
    // handle on drop.
    running: HashMap<usize, Easy2Handle<Collector>>,
    multi: Multi,
    started: HashMap<usize, Instant>,
    next_token: usize,
    socket_updates: Arc<Mutex<Vec<SocketUpdate>>>,
    deadline: Arc<Mutex<Option<Instant>>>,
    finished: Vec<FinishedTransfer>,
    config: CurlConfig,
}

impl CurlEngine {
    /// Initialise libcurl (once per process) and set up a multi handle.
    pub fn new(config: CurlConfig) -> Result<Self, EngineError> {
        GLOBAL_INIT.call_once(|| {
            curl::init();
            debug!(version = curl::Version::get().version(), "libcurl initialised");
        });

        let mut multi = Multi::new();
        let socket_updates = Arc::new(Mutex::new(Vec::new()));
        let deadline = Arc::new(Mutex::new(None));

        let updates = socket_updates.clone();
        multi
            .socket_function(move |socket, events, _token| {
                let update = if events.remove() {
                    SocketUpdate::Unwatch { socket }
                } else {
                    let interest = if events.input_and_output() {
                        SocketInterest::ReadWrite
                    } else if events.output() {
                        SocketInterest::Write
                    } else {
                        SocketInterest::Read
                    };
                    SocketUpdate::Watch { socket, interest }
                };
                updates.lock().push(update);
            })
            .map_err(multi_error)?;

        let timer = deadline.clone();
        multi
            .timer_function(move |timeout| {
                *timer.lock() = timeout.map(|t| Instant::now() + t);
                true
            })
            .map_err(multi_error)?;

        if config.max_connections > 0 {
            multi
                .set_max_total_connections(config.max_connections)
                .map_err(multi_error)?;
        }
        if config.max_host_connections > 0 {
            multi
                .set_max_host_connections(config.max_host_connections)
                .map_err(multi_error)?;
        }

        Ok(Self {
            running: HashMap::new(),
            multi,
            started: HashMap::new(),
            next_token: 1,
            socket_updates,
            deadline,
            finished: Vec::new(),
            config,
        })
    }

    /// When libcurl next wants a timer step, if ever.
    pub fn next_deadline(&self) -> Option<Instant> {
        *self.deadline.lock()
    }

    pub fn config(&self) -> &CurlConfig {
        &self.config
    }

    fn build_easy(&self, request: &TransferRequest) -> Result<Easy2<Collector>, curl::Error> {
        let mut easy = Easy2::new(Collector::default());
        easy.url(&request.url)?;
        easy.signal(false)?;
        easy.useragent(&self.config.user_agent)?;
        if self.config.accept_encoding {
            easy.accept_encoding("")?;
        }

        match &request.method {
            Method::Get => easy.get(true)?,
            Method::Head => easy.nobody(true)?,
            Method::Post => easy.post(true)?,
            other => easy.custom_request(other.as_str())?,
        }
        if let Some(body) = &request.body {
            easy.post_fields_copy(body)?;
            // Setting a body switches libcurl to POST; put the verb back.
            if request.method == Method::Get {
                easy.custom_request("GET")?;
            }
        } else if request.method == Method::Post {
            easy.post_field_size(0)?;
        }

        if !request.headers.is_empty() {
            let mut list = List::new();
            for (name, value) in &request.headers {
                list.append(&format!("{}: {}", name, value))?;
            }
            easy.http_headers(list)?;
        }

        if let Some(timeout) = request.timeout.or(self.config.default_timeout) {
            easy.timeout(timeout)?;
        }
        easy.connect_timeout(request.connect_timeout.unwrap_or(self.config.default_connect_timeout))?;
        easy.follow_location(request.follow_redirects)?;
        if request.follow_redirects {
            easy.max_redirections(request.max_redirects)?;
        }

        Ok(easy)
    }

    /// Pull completion messages out of libcurl and turn them into outcomes.
    fn collect_done(&mut self) {
        let mut done = Vec::new();
        let running = &self.running;
        self.multi.messages(|message| {
            let Ok(token) = message.token() else {
                return;
            };
            if let Some(handle) = running.get(&token) {
                if let Some(result) = message.result_for2(handle) {
                    done.push((token, result));
                }
            }
        });

        for (token, result) in done {
            let Some(handle) = self.running.remove(&token) else {
                continue;
            };
            let started = self.started.get(&token).copied().unwrap_or_else(Instant::now);
            let outcome = match self.multi.remove2(handle) {
                Ok(easy) => build_outcome(easy, result, started),
                Err(e) => Err(TransferError::new(FailureKind::Other, e.to_string())),
            };
            trace!(token, ok = outcome.is_ok(), "libcurl transfer done");
            self.finished.push(FinishedTransfer {
                handle: TransferHandle::new(token as u64),
                outcome,
            });
        }
    }
}

impl TransferEngine for CurlEngine {
    fn start(&mut self, request: &TransferRequest) -> Result<TransferHandle, EngineError> {
        let easy = self
            .build_easy(request)
            .map_err(|e| EngineError::new(format!("cannot configure transfer: {}", e)))?;
        let mut handle = self.multi.add2(easy).map_err(multi_error)?;

        let token = self.next_token;
        self.next_token += 1;
        if let Err(e) = handle.set_token(token) {
            let _ = self.multi.remove2(handle);
            return Err(EngineError::new(format!("cannot tag transfer: {}", e)));
        }

        self.running.insert(token, handle);
        self.started.insert(token, Instant::now());
        Ok(TransferHandle::new(token as u64))
    }

    fn socket_action(&mut self, socket: RawSocket, readiness: Readiness) -> Result<(), EngineError> {
        let mut events = Events::new();
        events
            .input(readiness.readable)
            .output(readiness.writable)
            .error(readiness.error);
        let result = self.multi.action(socket, &events).map_err(multi_error);
        self.collect_done();
        result.map(|_| ())
    }

    fn timer_action(&mut self, now: Instant) -> Result<(), EngineError> {
        let due = {
            let mut deadline = self.deadline.lock();
            match *deadline {
                Some(at) if at <= now => {
                    *deadline = None;
                    true
                }
                _ => false,
            }
        };
        if !due {
            return Ok(());
        }

        let result = self.multi.timeout().map_err(multi_error);
        self.collect_done();
        result.map(|_| ())
    }

    fn take_socket_updates(&mut self, out: &mut Vec<SocketUpdate>) {
        out.append(&mut self.socket_updates.lock());
    }

    fn take_finished(&mut self, out: &mut Vec<FinishedTransfer>) {
        out.append(&mut self.finished);
    }

    fn release(&mut self, handle: TransferHandle) {
        let token = handle.raw() as usize;
        self.started.remove(&token);
        if let Some(easy) = self.running.remove(&token) {
            if let Err(e) = self.multi.remove2(easy) {
                warn!(%handle, error = %e, "cannot detach transfer from libcurl");
            }
        }
        self.finished.retain(|f| f.handle != handle);
    }

    fn active_count(&self) -> usize {
        self.started.len()
    }
}

fn build_outcome(
    mut easy: Easy2<Collector>,
    result: Result<(), curl::Error>,
    started: Instant,
) -> TransferOutcome {
    result.map_err(|e| classify(&e))?;

    let status = easy
        .response_code()
        .map_err(|e| TransferError::new(FailureKind::Protocol, e.to_string()))?;
    let effective_url = easy.effective_url().ok().flatten().map(str::to_string);
    let elapsed = easy
        .total_time()
        .unwrap_or_else(|_| started.elapsed());

    let collector = easy.get_mut();
    Ok(TransferResponse {
        status: status as u16,
        headers: std::mem::take(&mut collector.headers),
        body: Bytes::from(std::mem::take(&mut collector.body)),
        effective_url,
        elapsed,
    })
}

/// Map a libcurl failure onto the core's failure kinds.
pub fn classify(error: &curl::Error) -> TransferError {
    let kind = if error.is_operation_timedout() {
        FailureKind::Timeout
    } else if error.is_couldnt_resolve_host() || error.is_couldnt_resolve_proxy() {
        FailureKind::Resolve
    } else if error.is_couldnt_connect() {
        FailureKind::Connect
    } else if error.is_ssl_connect_error()
        || error.is_peer_failed_verification()
        || error.is_ssl_certproblem()
        || error.is_ssl_cacert_badfile()
    {
        FailureKind::Tls
    } else if error.is_aborted_by_callback() {
        FailureKind::Aborted
    } else if error.is_got_nothing()
        || error.is_recv_error()
        || error.is_send_error()
        || error.is_partial_file()
        || error.is_too_many_redirects()
        || error.is_unsupported_protocol()
    {
        FailureKind::Protocol
    } else {
        FailureKind::Other
    };

    let message = match error.extra_description() {
        Some(extra) => format!("{}: {}", error.description(), extra),
        None => error.description().to_string(),
    };
    TransferError::new(kind, message).with_code(error.code() as i32)
}

fn multi_error(e: curl::MultiError) -> EngineError {
    EngineError::new(e.to_string())
}
