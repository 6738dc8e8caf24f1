use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::AppConfig;

/// Install the stderr JSON subscriber and, when possible, a daily-rolling
/// file sink under the configured logs directory.
///
/// The returned guard flushes the file sink on drop; keep it alive for the
/// lifetime of the process. Calling this twice is harmless: the second
/// install is ignored.
pub fn init(config: &AppConfig) -> Option<WorkerGuard> {
    let _ = tracing_log::LogTracer::init();

    let stderr_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(&config.log_filter));

    let logs_dir = config.logs_dir();
    let (file_layer, guard) = match std::fs::create_dir_all(&logs_dir)
        .with_context(|| format!("create logs directory {}", logs_dir.display()))
    {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(&logs_dir, "dayplanner.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_ansi(false)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_writer(writer)
                .with_filter(EnvFilter::new(&config.log_filter));
            (Some(layer), Some(guard))
        }
        Err(err) => {
            eprintln!("file logging disabled: {err:#}");
            (None, None)
        }
    };

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    guard
}
