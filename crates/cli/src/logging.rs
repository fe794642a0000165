use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use dcmanager_config::{LogFormat, LogLevel};

const LOG_FILE_PREFIX: &str = "dcmanager.log";

/// Sets up the global subscriber.
///
/// `RUST_LOG` takes precedence over `log_level`. When `log_dir` is given,
/// logs are also written to a daily-rotated file there; the returned guard
/// flushes it and must be held until the process exits.
pub fn init(log_level: LogLevel, log_format: LogFormat, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = build_filter(log_level);

    let stderr = match log_format {
        LogFormat::Plaintext => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let (file, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .boxed();

            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> =
        std::iter::once(stderr).chain(file).collect();

    // Errors if a subscriber is already set, e.g. in tests
    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init();

    guard
}

fn build_filter(log_level: LogLevel) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    // Keep the networking stack quiet unless asked for
    let directives = format!("{log_level},libp2p=warn,libp2p_swarm=warn,hyper=warn,reqwest=warn");
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(log_level.as_str()))
}
