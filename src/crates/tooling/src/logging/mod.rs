//! Tracing subscriber initialization
//!
//! All strand crates log through `tracing`; binaries and tests call
//! [`init`] (or [`try_init`]) once at startup. The filter honors
//! `RUST_LOG`, defaulting to `info`.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Panics if a global subscriber is already set; use [`try_init`] where
/// that may legitimately happen (tests).
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// Initialize the global tracing subscriber, ignoring an already-set one
pub fn try_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}
