//! Diagnostic tracing for the orchestrator.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Diagnostics via `RUST_LOG`, output to stderr.
//!   Not part of the run result.
//!
//! - **Iteration ledger (`io/ledger`)**: Per-run records of every agent call,
//!   optionally mirrored to `.atom/iterations.jsonl`. Unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default directive when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "atom=debug" } else { "warn" }
}

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; when unset, defaults to `warn`, or `atom=debug` with
/// `verbose`. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=atom=trace atom run "fix the flaky test"
/// ```
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    // A second init (e.g. from tests) is a no-op.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_enables_crate_debug() {
        assert_eq!(default_directive(false), "warn");
        assert_eq!(default_directive(true), "atom=debug");
    }
}
