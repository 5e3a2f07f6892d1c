//! Tracing setup
//!
//! Everything goes to the rolling `log_file`. Ledger movements that operators
//! reconcile against (committed transfers, compensations, corrected rows) are
//! also emitted on [`AUDIT_TARGET`] and can be routed to `audit_log_file`.

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

/// Target for events that record a stock movement or correction
pub const AUDIT_TARGET: &str = "ledger_audit";

/// Flushes the non-blocking writers on drop
pub struct LogGuards {
    _main: WorkerGuard,
    _audit: Option<WorkerGuard>,
}

fn appender(rotation: &str, dir: &str, file: &str) -> RollingFileAppender {
    match rotation {
        "hourly" => tracing_appender::rolling::hourly(dir, file),
        "daily" => tracing_appender::rolling::daily(dir, file),
        _ => tracing_appender::rolling::never(dir, file),
    }
}

/// Default directives when `RUST_LOG` is unset
///
/// sqlx logs every statement at info. Audit events stay on at info whatever
/// the base level is.
pub fn filter_directives(config: &AppConfig) -> String {
    format!("{},sqlx=warn,{AUDIT_TARGET}=info", config.log_level)
}

/// Install the global subscriber; keep the guards alive for the process lifetime
pub fn init_logging(config: &AppConfig) -> LogGuards {
    let (main_writer, main_guard) = tracing_appender::non_blocking(appender(
        &config.rotation,
        &config.log_dir,
        &config.log_file,
    ));

    let (audit_layer, audit_guard) = match &config.audit_log_file {
        Some(file) => {
            let (writer, guard) =
                tracing_appender::non_blocking(appender(&config.rotation, &config.log_dir, file));
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(Targets::new().with_target(AUDIT_TARGET, Level::INFO));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));
    let registry = tracing_subscriber::registry().with(filter).with(audit_layer);

    if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(main_writer)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(main_writer)
            .with_ansi(false);
        // stdout carries command results
        let stderr_layer = fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_ansi(true);
        registry.with(file_layer).with(stderr_layer).init();
    }

    LogGuards {
        _main: main_guard,
        _audit: audit_guard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(level: &str) -> AppConfig {
        AppConfig::from_yaml(&format!(
            "log_level: {level}\nlog_dir: ./logs\nlog_file: ledger.log\nuse_json: false\nrotation: never\n"
        ))
        .unwrap()
    }

    #[test]
    fn test_filter_directives_keep_audit_on() {
        let directives = filter_directives(&config("warn"));
        assert_eq!(directives, "warn,sqlx=warn,ledger_audit=info");
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_filter_directives_parse_for_each_level() {
        for level in ["trace", "debug", "info", "error"] {
            assert!(EnvFilter::try_new(filter_directives(&config(level))).is_ok());
        }
    }
}
