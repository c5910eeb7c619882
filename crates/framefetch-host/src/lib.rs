/// framefetch host glue: C ABI entry points for a frame-driven host.
///
/// The host calls `ffh_attach` once, `ffh_frame` every tick, `ffh_request` to
/// start transfers and `ffh_detach` when it unloads the module. All of them
/// must be called from the same thread; the module lives in a thread-local
/// slot on that thread.

use std::cell::RefCell;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::time::{Duration, Instant};

use framefetch::{
    AttachError, Controller, ControllerConfig, DrainReport, FailureKind, Method, PollError,
    PollSummary, SubmitError, TransferHandle, TransferOutcome, TransferRequest, UserContext,
};
use framefetch_curl::{CurlConfig, CurlEngine};
use tracing::{error, info, warn, Level};

/// Completion callback handed to `ffh_request`.
///
/// `status` is the HTTP status on success. On failure it is one of the
/// negative `FFH_ERR_*` codes and `body` holds the error message.
/// `body` is only valid for the duration of the call.
pub type CompletionFn =
    extern "C" fn(handle: u64, status: i32, body: *const u8, body_len: usize, user_data: isize);

pub const FFH_ERR_TIMEOUT: i32 = -1;
pub const FFH_ERR_RESOLVE: i32 = -2;
pub const FFH_ERR_CONNECT: i32 = -3;
pub const FFH_ERR_TLS: i32 = -4;
pub const FFH_ERR_PROTOCOL: i32 = -5;
pub const FFH_ERR_ABORTED: i32 = -6;
pub const FFH_ERR_OTHER: i32 = -7;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("module already attached on this thread")]
    AlreadyAttached,
    #[error("module not attached")]
    NotAttached,
    #[error(transparent)]
    Attach(#[from] AttachError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error(transparent)]
    Poll(#[from] PollError),
}

/// A finished transfer waiting to be handed to the host.
struct Delivery {
    handle: TransferHandle,
    outcome: TransferOutcome,
    callback: CompletionFn,
    user_data: isize,
}

thread_local! {
    static MODULE: RefCell<Option<Controller<CurlEngine>>> = const { RefCell::new(None) };
    static OUTBOX: RefCell<Vec<Delivery>> = const { RefCell::new(Vec::new()) };
}

// ── Rust entry points ──

/// Attach with configuration read from the environment (and `.env`).
pub fn attach() -> Result<(), HostError> {
    let _ = dotenvy::dotenv();
    init_logging();

    let config = ControllerConfig::from_env().map_err(AttachError::from)?;
    let curl_config = CurlConfig::from_env().map_err(AttachError::from)?;
    attach_with(config, curl_config)
}

pub fn attach_with(config: ControllerConfig, curl_config: CurlConfig) -> Result<(), HostError> {
    if is_attached() {
        return Err(HostError::AlreadyAttached);
    }
    let controller = Controller::attach(config, || CurlEngine::new(curl_config))?;
    MODULE.with(|m| *m.borrow_mut() = Some(controller));
    info!("framefetch attached");
    Ok(())
}

pub fn is_attached() -> bool {
    MODULE.with(|m| m.borrow().is_some())
}

/// One host tick: advance every transfer, then hand finished ones to the host.
pub fn frame() -> Result<PollSummary, HostError> {
    let result = MODULE.with(|m| match m.borrow_mut().as_mut() {
        Some(controller) => controller.poll(Instant::now()).map_err(HostError::from),
        None => Err(HostError::NotAttached),
    });
    flush_outbox();
    result
}

/// Start a transfer whose result goes to `callback`.
pub fn request(
    request: TransferRequest,
    callback: CompletionFn,
    user_data: isize,
) -> Result<TransferHandle, HostError> {
    MODULE.with(|m| {
        let mut slot = m.borrow_mut();
        let controller = slot.as_mut().ok_or(HostError::NotAttached)?;
        let handle = controller.submit(
            request,
            move |handle: TransferHandle, outcome: TransferOutcome, context: UserContext| {
                let user_data = context.downcast_ref::<isize>().copied().unwrap_or_default();
                OUTBOX.with(|o| {
                    o.borrow_mut().push(Delivery {
                        handle,
                        outcome,
                        callback,
                        user_data,
                    })
                });
            },
            Box::new(user_data),
        )?;
        Ok(handle)
    })
}

pub fn pending() -> usize {
    MODULE.with(|m| {
        m.borrow()
            .as_ref()
            .map_or(0, |controller| controller.manager().active_count())
    })
}

/// Drain and tear down the module. `None` if nothing was attached.
pub fn detach() -> Option<DrainReport> {
    // Take the controller out first so callbacks fired by the drain can call
    // back into this module without tripping the slot borrow.
    let controller = MODULE.with(|m| m.borrow_mut().take())?;
    let report = controller.detach();
    flush_outbox();
    info!(
        completed = report.completed,
        discarded = report.discarded,
        "framefetch detached"
    );
    Some(report)
}

fn flush_outbox() {
    // Callbacks may submit new transfers; those land in the next frame.
    let deliveries = OUTBOX.with(|o| std::mem::take(&mut *o.borrow_mut()));
    for delivery in deliveries {
        let handle = delivery.handle.raw();
        match &delivery.outcome {
            Ok(response) => (delivery.callback)(
                handle,
                i32::from(response.status),
                response.body.as_ptr(),
                response.body.len(),
                delivery.user_data,
            ),
            Err(err) => {
                let message = err.to_string();
                (delivery.callback)(
                    handle,
                    failure_code(err.kind),
                    message.as_ptr(),
                    message.len(),
                    delivery.user_data,
                )
            }
        }
    }
}

pub fn failure_code(kind: FailureKind) -> i32 {
    match kind {
        FailureKind::Timeout => FFH_ERR_TIMEOUT,
        FailureKind::Resolve => FFH_ERR_RESOLVE,
        FailureKind::Connect => FFH_ERR_CONNECT,
        FailureKind::Tls => FFH_ERR_TLS,
        FailureKind::Protocol => FFH_ERR_PROTOCOL,
        FailureKind::Aborted => FFH_ERR_ABORTED,
        FailureKind::Other => FFH_ERR_OTHER,
    }
}

fn init_logging() {
    // The host may already have installed a subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "framefetch=info".into()),
        )
        .try_init();
}

// ── FFI Exports ──

/// Attach the module on the calling thread. Returns false on failure or if
/// already attached.
#[unsafe(no_mangle)]
pub extern "C" fn ffh_attach() -> bool {
    match attach() {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "framefetch attach failed");
            false
        }
    }
}

/// Per-frame tick. A no-op when not attached.
#[unsafe(no_mangle)]
pub extern "C" fn ffh_frame() {
    let Err(e) = frame() else {
        return;
    };
    match frame_failure_level(&e) {
        Some(Level::ERROR) => error!(error = %e, "framefetch halted"),
        Some(_) => warn!(error = %e, "framefetch frame failed"),
        None => {}
    }
}

/// How loudly a failed frame is logged. The halt is reported on the frame
/// that caused it; the frames after it stay quiet.
fn frame_failure_level(err: &HostError) -> Option<Level> {
    match err {
        HostError::NotAttached | HostError::Poll(PollError::Halted) => None,
        HostError::Poll(PollError::Invariant(_)) => Some(Level::ERROR),
        _ => Some(Level::WARN),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn ffh_detach() {
    detach();
}

/// Transfers still in flight.
#[unsafe(no_mangle)]
pub extern "C" fn ffh_pending() -> u32 {
    u32::try_from(pending()).unwrap_or(u32::MAX)
}

/// Start a transfer. Returns its handle (> 0) on success, 0 on failure.
///
/// `method` may be null for GET. `body` may be null when `body_len` is 0.
/// `timeout_ms` of 0 keeps the engine default.
///
/// # Safety
/// `url` and a non-null `method` must be valid NUL-terminated strings. A
/// non-null `body` must point to `body_len` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ffh_request(
    url: *const c_char,
    method: *const c_char,
    body: *const u8,
    body_len: usize,
    timeout_ms: u32,
    callback: Option<CompletionFn>,
    user_data: isize,
) -> u64 {
    let Some(callback) = callback else {
        return 0;
    };
    if url.is_null() {
        return 0;
    }
    let url = match unsafe { CStr::from_ptr(url) }.to_str() {
        Ok(s) => s.to_string(),
        Err(_) => return 0,
    };
    let method = if method.is_null() {
        Method::Get
    } else {
        match unsafe { CStr::from_ptr(method) }.to_str() {
            Ok(s) => Method::parse(s),
            Err(_) => return 0,
        }
    };

    let mut req = TransferRequest::new(method, url);
    if !body.is_null() && body_len > 0 {
        let bytes = unsafe { std::slice::from_raw_parts(body, body_len) };
        req = req.body(bytes.to_vec());
    }
    if timeout_ms > 0 {
        req = req.timeout(Duration::from_millis(u64::from(timeout_ms)));
    }

    match request(req, callback, user_data) {
        Ok(handle) => handle.raw(),
        Err(e) => {
            warn!(error = %e, "framefetch request rejected");
            0
        }
    }
}
