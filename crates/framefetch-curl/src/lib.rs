//! [`TransferEngine`](framefetch::TransferEngine) on top of libcurl's
//! multi-socket interface.
//!
//! libcurl does DNS, TLS, redirects and the HTTP exchange; the framefetch
//! reactor feeds it socket readiness and timer steps, one tick at a time.

pub mod collector;
pub mod config;
pub mod engine;

pub use config::CurlConfig;
pub use engine::{classify, CurlEngine};
