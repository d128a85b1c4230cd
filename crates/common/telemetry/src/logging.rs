// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use std::{
    env,
    io::IsTerminal,
    sync::{Arc, Mutex, Once},
};

use bon::Builder;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use tracing::Subscriber;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter, layer::SubscriberExt, registry::LookupSpan,
};

/// The default directory name for log files when file logging is enabled.
pub const DEFAULT_LOGGING_DIR: &str = "logs";

/// Default log level filter when no specific configuration is provided.
///
/// Used when neither `LoggingOptions::level` nor `RUST_LOG` is set.
const DEFAULT_LOG_TARGETS: &str = "info";

/// Configuration options for the logging system.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct LoggingOptions {
    /// Directory for rotated log files.
    ///
    /// Empty means no file logging. The directory is created if missing and
    /// receives a main log plus an error-only log, both rotated daily.
    #[default = ""]
    #[builder(default)]
    pub dir: String,

    /// Log level filter string such as `"info"` or
    /// `"debug,reqwest=warn"`. Falls back to `RUST_LOG`, then `"info"`.
    pub level: Option<String>,

    /// Output format for log messages.
    #[builder(default)]
    pub log_format: LogFormat,

    /// Maximum number of rotated log files to retain per log kind.
    #[default = 14]
    #[builder(default = 14)]
    pub max_log_files: usize,

    /// Whether to write logs to stderr as well as to files.
    ///
    /// Stderr keeps stdout free for the run summary.
    #[default = true]
    #[builder(default = true)]
    pub append_stderr: bool,
}

/// Controls how log messages are formatted when written to outputs.
#[derive(
    Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, Default, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per event, for log shippers.
    Json,

    /// Human-readable text.
    #[default]
    Text,
}

/// Initialize logging for unit and integration tests.
///
/// Safe to call from every test; only the first call installs a
/// subscriber. Honors `UNITTEST_LOG_DIR` and `UNITTEST_LOG_LEVEL`.
pub fn init_default_ut_logging() {
    static START: Once = Once::new();

    START.call_once(|| {
        let Ok(mut g) = GLOBAL_UT_LOG_GUARD.as_ref().lock() else {
            return;
        };

        let dir = env::var("UNITTEST_LOG_DIR").unwrap_or_default();
        let level = env::var("UNITTEST_LOG_LEVEL")
            .unwrap_or_else(|_| "debug,hyper=warn,hyper_util=warn,reqwest=warn,h2=info".to_string());
        let opts = LoggingOptions {
            dir,
            level: Some(level),
            ..Default::default()
        };
        *g = Some(init_global_logging("unittest", &opts));
    });
}

/// Keeps unit test worker guards alive for the whole test binary.
static GLOBAL_UT_LOG_GUARD: Lazy<Arc<Mutex<Option<Vec<WorkerGuard>>>>> =
    Lazy::new(|| Arc::new(Mutex::new(None)));

/// Initialize the global tracing subscriber.
///
/// Returns the `WorkerGuard`s of the non-blocking writers; they must outlive
/// the program's logging, dropping them flushes and stops the writers.
/// Only the first call per process has an effect.
///
/// # Panics
///
/// Panics if the log directory cannot be prepared or the level string does
/// not parse. Both are configuration mistakes that should stop startup.
pub fn init_global_logging(app_name: &str, opts: &LoggingOptions) -> Vec<WorkerGuard> {
    static START: Once = Once::new();
    let mut guards = vec![];

    START.call_once(|| {
        // Another logger may already be installed when embedded in tests.
        let _ = LogTracer::init();

        let stderr_logging_layer = if opts.append_stderr {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
            guards.push(guard);

            if opts.log_format == LogFormat::Json {
                Some(
                    tracing_subscriber::fmt::Layer::new()
                        .json()
                        .with_writer(writer)
                        .with_current_span(true)
                        .with_span_list(true)
                        .boxed(),
                )
            } else {
                Some(
                    tracing_subscriber::fmt::Layer::new()
                        .with_writer(writer)
                        .with_ansi(std::io::stderr().is_terminal())
                        .boxed(),
                )
            }
        } else {
            None
        };

        let file_logging_layer = if opts.dir.is_empty() {
            None
        } else {
            let (writer, guard) =
                tracing_appender::non_blocking(rolling_appender(app_name, opts, ""));
            guards.push(guard);
            Some(file_layer(opts.log_format, writer, None))
        };

        let err_file_logging_layer = if opts.dir.is_empty() {
            None
        } else {
            let (writer, guard) =
                tracing_appender::non_blocking(rolling_appender(app_name, opts, "-err"));
            guards.push(guard);
            Some(file_layer(
                opts.log_format,
                writer,
                Some(filter::LevelFilter::ERROR),
            ))
        };

        let filter = opts
            .level
            .as_deref()
            .or(env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())
            .unwrap_or(DEFAULT_LOG_TARGETS)
            .parse::<filter::Targets>()
            .expect("error parsing log level string");

        let subscriber = Registry::default()
            .with(filter)
            .with(stderr_logging_layer)
            .with(file_logging_layer)
            .with(err_file_logging_layer);

        // A subscriber set by an embedding application wins.
        let _ = tracing::subscriber::set_global_default(subscriber);
    });

    guards
}

fn rolling_appender(app_name: &str, opts: &LoggingOptions, suffix: &str) -> RollingFileAppender {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(format!("{app_name}{suffix}"))
        .max_log_files(opts.max_log_files)
        .build(&opts.dir)
        .unwrap_or_else(|e| {
            panic!(
                "initializing rolling file appender at {} failed: {}",
                &opts.dir, e
            )
        })
}

fn file_layer<S>(
    format: LogFormat,
    writer: tracing_appender::non_blocking::NonBlocking,
    level: Option<filter::LevelFilter>,
) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let level = level.unwrap_or(filter::LevelFilter::TRACE);
    if format == LogFormat::Json {
        tracing_subscriber::fmt::Layer::new()
            .json()
            .with_writer(writer)
            .with_ansi(false)
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(level)
            .boxed()
    } else {
        tracing_subscriber::fmt::Layer::new()
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(level)
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_log_to_stderr_only() {
        let opts = LoggingOptions::default();
        assert!(opts.dir.is_empty());
        assert!(opts.append_stderr);
        assert_eq!(opts.log_format, LogFormat::Text);
        assert_eq!(opts.max_log_files, 14);
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: LoggingOptions =
            serde_json::from_str(r#"{"level": "debug", "log_format": "json"}"#).unwrap();
        assert_eq!(opts.level.as_deref(), Some("debug"));
        assert_eq!(opts.log_format, LogFormat::Json);
        assert!(opts.append_stderr);
    }

    #[test]
    fn builder_matches_default() {
        let built = LoggingOptions::builder().build();
        assert_eq!(built, LoggingOptions::default());
    }
}
