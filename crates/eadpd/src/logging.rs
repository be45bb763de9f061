//! Tracing subscriber setup.
//!
//! Logs always go to stderr. When `[log] directory` is set, a daily rolling
//! file receives the same events through a non-blocking writer. `RUST_LOG`
//! extends the default directives.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogConfig;

/// Default log file prefix.
pub const DEFAULT_FILE_PREFIX: &str = "eadpd.log";

/// Crates logged at info level unless `RUST_LOG` says otherwise.
const DEFAULT_DIRECTIVES: [&str; 4] = [
    "eadpd=info",
    "eadp_bus=info",
    "eadp_core=info",
    "eadp_protocol=info",
];

/// Builds the filter from `RUST_LOG` plus the default directives.
///
/// # Errors
///
/// Returns an error if a directive fails to parse.
pub fn env_filter() -> anyhow::Result<EnvFilter> {
    let mut filter = EnvFilter::from_default_env();
    for directive in DEFAULT_DIRECTIVES {
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

/// Installs the global subscriber.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the file writer.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or a
/// subscriber is already installed.
pub fn init(config: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

    let (file_layer, guard) = match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)?;
            let prefix = config.file_prefix.as_deref().unwrap_or(DEFAULT_FILE_PREFIX);
            let appender = tracing_appender::rolling::daily(directory, prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter()?)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
