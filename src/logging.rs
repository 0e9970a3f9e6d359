//! Diagnostic logging for the builder and launcher binaries.
//!
//! Two sinks are supported behind the `log` facade: a human-readable
//! `env_logger` format, and a line-JSON format selected with a `json:`
//! prefix on the level string (e.g. `FLAVOR_LOG_LEVEL=json:debug`). JSON
//! output goes to stderr or, when `FLAVOR_LOG_PATH` is set, to that file.

use chrono::{Local, SecondsFormat, Utc};
use log::{Level, Log, Metadata, Record};
use serde_json::json;
use std::env;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::Mutex;

/// Line-JSON logger used when a `json:` level prefix is requested.
#[derive(Debug)]
pub struct JsonLogger {
    level: Level,
    target_file: Mutex<Option<std::fs::File>>,
}

impl JsonLogger {
    fn new(level: Level, log_path: Option<String>) -> Self {
        let target_file = log_path
            .and_then(|path| OpenOptions::new().create(true).append(true).open(path).ok());

        JsonLogger {
            level,
            target_file: Mutex::new(target_file),
        }
    }
}

impl Log for JsonLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let entry = json!({
            "@timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            "@level": record.level().to_string().to_lowercase(),
            "@message": record.args().to_string(),
            "@module": record.target(),
            "@pid": std::process::id(),
        });

        let line = format!("{}\n", serde_json::to_string(&entry).unwrap_or_default());

        if let Ok(mut guard) = self.target_file.lock() {
            if let Some(ref mut file) = *guard {
                let _ = file.write_all(line.as_bytes());
                let _ = file.flush();
                return;
            }
        }
        let _ = io::stderr().write_all(line.as_bytes());
    }

    fn flush(&self) {
        if let Ok(mut guard) = self.target_file.lock() {
            if let Some(ref mut file) = *guard {
                let _ = file.flush();
            }
        }
        let _ = io::stderr().flush();
    }
}

fn parse_level(s: &str) -> log::LevelFilter {
    match s {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

/// Initialize logging from an explicit level string.
///
/// Accepts plain levels (`debug`), the bare `json` selector, or the
/// combined form (`json:trace`).
pub fn init_with_level(level_str: &str) {
    let (use_json, actual_level) = if let Some(stripped) = level_str.strip_prefix("json:") {
        (true, stripped)
    } else if level_str == "json" {
        (true, "info")
    } else {
        (false, level_str)
    };

    if !use_json {
        let filter = parse_level(actual_level);
        let _ = env_logger::Builder::new()
            .filter_level(filter)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{} {} {}] {}",
                    Local::now().format("%Y-%m-%dT%H:%M:%S%z"),
                    record.level(),
                    record.target(),
                    record.args()
                )
            })
            .try_init();
        return;
    }

    let level = match actual_level {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "info" => Level::Info,
        "warn" => Level::Warn,
        "error" => Level::Error,
        _ => Level::Info,
    };

    let logger = Box::new(JsonLogger::new(level, env::var("FLAVOR_LOG_PATH").ok()));
    if log::set_boxed_logger(logger).is_ok() {
        log::set_max_level(level.to_level_filter());
    }
}

/// Initialize logging for a binary, resolving the level from the
/// binary-specific variable first, then the shared one.
pub fn init_for(binary_var: &str) {
    let level = env::var(binary_var)
        .or_else(|_| env::var("FLAVOR_LOG_LEVEL"))
        .unwrap_or_else(|_| "info".to_string());
    init_with_level(&level);
}
