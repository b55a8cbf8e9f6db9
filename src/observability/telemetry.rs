//! Telemetry & Observability
//!
//! Structured logging for both halves of a run.
//! Features:
//! - Per-group spans carrying group index and port
//! - Per-iteration outcome events
//! - Drop-reason events on the device dispatch path
//! - Configurable log levels via RUST_LOG
//! - Log-safe rendering of strings that arrive over the wire

use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info_span, Span};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Escape control characters in a string for safe log output.
/// Board and entry names come from the device and may contain anything.
pub fn sanitize_for_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x1b' => out.push_str("\\e"),
            '\x00' => out.push_str("\\0"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            _ => out.push(c),
        }
    }
    out
}

/// Initialize global tracing subscriber.
/// Only enables tracing if RUST_LOG is explicitly set, keeping CLI output clean.
pub fn init_tracing() {
    if let Ok(filter) = std::env::var("RUST_LOG") {
        init_tracing_with_filter(&filter);
    }
}

/// Initialize tracing for `--verbose`
pub fn init_tracing_verbose() {
    init_tracing_with_filter("loopcheck=debug,info")
}

/// Initialize with custom filter string
pub fn init_tracing_with_filter(filter: &str) {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_level(true)
            .compact()
            .with_writer(std::io::stderr);

        let filter_layer = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));

        let _ = tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init();
    });
}

/// Span for one group worker, host or device side.
pub fn group_span(side: &'static str, group: usize, port: u16) -> Span {
    info_span!("group", side, group, port)
}

/// Record one host iteration.
pub fn record_iteration(sub_test: usize, iteration: u32, outcome: &str, elapsed: Duration) {
    debug!(
        sub_test,
        iteration,
        outcome,
        elapsed_us = elapsed.as_micros() as u64,
        "Iteration finished"
    );
}

/// Record a datagram the device dispatcher refused.
pub fn record_drop(peer: SocketAddr, reason: &str) {
    debug!(peer = %peer, reason, "Dropped inbound packet");
}

/// Initialize tracing for tests with a simple subscriber
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
