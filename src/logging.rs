use crate::error::RetargetError;
use serde::Serialize;
use std::sync::OnceLock;

/// Destination for log records, installed once per process.
pub type LogSink = Box<dyn Fn(&LogRecord) + Send + Sync>;

// グローバルなログシンクの保存
static LOG_SINK: OnceLock<LogSink> = OnceLock::new();

/// ログレベル定義
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// One structured log entry handed to the sink.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: String,
}

impl LogRecord {
    fn now(level: LogLevel, message: &str) -> Self {
        Self {
            level,
            message: message.to_string(),
            timestamp: jiff::Zoned::now().to_string(),
        }
    }

    /// Render the record as the JSON payload forwarded to hosts.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "level": self.level.as_str(),
            "message": self.message,
            "timestamp": self.timestamp,
        })
    }
}

/// Initialize the logging system with a record sink
pub fn init_logging(sink: LogSink) {
    if LOG_SINK.set(sink).is_err() {
        eprintln!("Warning: Logging system already initialized");
    }
}

/// Dispatch a log message to the installed sink
pub fn send_log(level: LogLevel, message: &str) {
    let record = LogRecord::now(level, message);
    if let Some(sink) = LOG_SINK.get() {
        sink(&record);
    } else {
        // Fallback to console if logging not initialized
        eprintln!("[{}] {}", level.as_str().to_uppercase(), record.message);
    }
}

/// Log RetargetError with automatic error-level logging
pub fn log_retarget_error(error: &RetargetError, context: Option<&str>) {
    let message = match context {
        Some(ctx) => format!("{}: {}", ctx, error),
        None => error.to_string(),
    };

    send_log(LogLevel::Error, &message);
}

/// Convenience macros for logging
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::send_log($crate::logging::LogLevel::Debug, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::send_log($crate::logging::LogLevel::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::send_log($crate::logging::LogLevel::Warn, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::send_log($crate::logging::LogLevel::Error, &format!($($arg)*))
    };
}

/// Result extension for convenient error logging
pub trait ResultExt<T, E> {
    fn log_error(self, context: Option<&str>) -> Self;
}

impl<T> ResultExt<T, RetargetError> for Result<T, RetargetError> {
    fn log_error(self, context: Option<&str>) -> Self {
        if let Err(ref error) = self {
            log_retarget_error(error, context);
        }
        self
    }
}
