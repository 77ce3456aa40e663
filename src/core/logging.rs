//! Tracing setup for the `drivepool` binary and tests.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::SubscriberBuilder;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "drivepool=info";

/// Installs the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn setup_log() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = SubscriberBuilder::default()
        .with_line_number(true)
        .with_file(true)
        .with_span_events(FmtSpan::NONE)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish()
        .try_init();
}

/// Subscriber for tests: captured by the test harness, debug level.
pub fn setup_test_log() {
    let _ = SubscriberBuilder::default()
        .with_env_filter(EnvFilter::new("drivepool=debug"))
        .with_test_writer()
        .finish()
        .try_init();
}
