pub use tracing::{debug, error, info, trace, warn};

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    Master,
    Test,
}

/// Installs the global tracing subscriber. Safe to call more than once,
/// later calls are no-ops (tests share one process).
pub fn setup_logging(level: &str, log_type: LogType) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = match log_type {
        LogType::Master => builder.try_init(),
        // Tests want output captured by the harness
        LogType::Test => builder.with_test_writer().try_init(),
    };

    if result.is_ok() {
        // Forward records emitted through the `log` facade by dependencies
        let _ = tracing_log::LogTracer::init();
    }
}
