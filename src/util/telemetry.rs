//! Telemetry helpers for structured logging and tracing.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "shadow_jobs=info";

/// Install a default env-filtered subscriber unless the application already
/// installed one. `RUST_LOG` overrides [`DEFAULT_FILTER`].
pub fn init_tracing() {
    install(false);
}

/// Like [`init_tracing`], but writes through the test harness so output is
/// captured per test.
pub fn init_test_tracing() {
    install(true);
}

fn install(test_writer: bool) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_thread_names(true);
    let _ = if test_writer {
        builder.with_test_writer().try_init()
    } else {
        builder.try_init()
    };
}
