//! Stand-in for a frame-driven host: attaches the module, fires one GET per
//! URL given on the command line, ticks until everything finished, detaches.

use std::time::{Duration, Instant};

use anyhow::Context;
use framefetch::TransferRequest;
use tracing::info;

extern "C" fn on_done(handle: u64, status: i32, body: *const u8, body_len: usize, user_data: isize) {
    // Valid for the duration of this call only.
    let body = unsafe { std::slice::from_raw_parts(body, body_len) };
    if status >= 0 {
        info!(handle, url_index = user_data, status, bytes = body.len(), "transfer finished");
    } else {
        info!(
            handle,
            url_index = user_data,
            code = status,
            error = %String::from_utf8_lossy(body),
            "transfer failed"
        );
    }
}

fn main() -> anyhow::Result<()> {
    let urls: Vec<String> = std::env::args().skip(1).collect();
    if urls.is_empty() {
        anyhow::bail!("usage: framefetch-demo <url>...");
    }

    // Loads .env and installs the log subscriber.
    framefetch_host::attach().context("attaching framefetch")?;

    let tick_ms: u64 = std::env::var("FRAMEFETCH_TICK_MS")
        .unwrap_or_else(|_| "16".into())
        .parse()
        .context("FRAMEFETCH_TICK_MS")?;
    let tick = Duration::from_millis(tick_ms);

    for (index, url) in urls.iter().enumerate() {
        let handle = framefetch_host::request(TransferRequest::get(url.as_str()), on_done, index as isize)
            .with_context(|| format!("submitting {}", url))?;
        info!(%handle, %url, "submitted");
    }

    let started = Instant::now();
    let mut frames = 0u64;
    while framefetch_host::pending() > 0 {
        let frame_start = Instant::now();
        framefetch_host::frame()?;
        frames += 1;
        // Stand-in for the rest of the host's frame.
        if let Some(rest) = tick.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }
    info!(frames, elapsed_ms = started.elapsed().as_millis() as u64, "all transfers done");

    if let Some(report) = framefetch_host::detach() {
        info!(polls = report.polls, discarded = report.discarded, "detached");
    }
    Ok(())
}
