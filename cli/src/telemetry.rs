//! Tracing initialisation.
//!
//! Logs go to stderr (compact or JSON) and, when a directory is given, to a
//! daily-rolling JSON file through a non-blocking writer.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

pub struct LogOptions {
    pub verbose: u8,
    pub json: bool,
    pub dir: Option<PathBuf>,
    /// `[logging] level` from the config file
    pub level: Option<String>,
}

/// Filter directive for the given flags.
///
/// `-v` wins over `RUST_LOG`, which wins over the config file.
pub fn filter_directive(verbose: u8, rust_log: Option<&str>, config_level: Option<&str>) -> String {
    match verbose {
        0 => rust_log
            .filter(|s| !s.trim().is_empty())
            .or(config_level)
            .unwrap_or("warn")
            .to_string(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process.
pub fn init(opts: &LogOptions) -> Option<WorkerGuard> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let directive = filter_directive(opts.verbose, rust_log.as_deref(), opts.level.as_deref());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("warn"));

    let stderr_layer = if opts.json {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .json()
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file_layer, guard) = match &opts.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "toolcell.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).json().boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .ok();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_flag_wins() {
        assert_eq!(filter_directive(1, Some("trace"), Some("error")), "info");
        assert_eq!(filter_directive(2, None, None), "debug");
        assert_eq!(filter_directive(7, None, None), "trace");
    }

    #[test]
    fn test_fallback_order() {
        assert_eq!(filter_directive(0, Some("toolcell=debug"), Some("error")), "toolcell=debug");
        assert_eq!(filter_directive(0, Some(""), Some("error")), "error");
        assert_eq!(filter_directive(0, None, None), "warn");
    }
}
