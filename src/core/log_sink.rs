use chrono::{DateTime, Local};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

/// Entries a slow subscriber may fall behind by. Beyond that it gets
/// `RecvError::Lagged`; the dropped entries stay available through `entries()`.
const SUBSCRIBER_CAPACITY: usize = 1024;

/// Events reach the operator through subscribers, so the `log` mirror stays below
/// the default `warn` filter and only shows up when debugging.
const EVENT_MIRROR_LEVEL: log::Level = log::Level::Debug;
const EVENT_TARGET: &str = "telestream::events";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

/// One operator-visible event. Entries are never edited once recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    /// `<timestamp> - <LEVEL> - <message>`, as written to the log file.
    pub fn file_line(&self) -> String {
        format!(
            "{} - {} - {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S,%3f"),
            self.level.as_str(),
            self.message
        )
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            LogLevel::Error => write!(f, "[ERROR] {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

struct SinkState {
    entries: Vec<LogEntry>,
    file: Option<File>,
    file_path: Option<PathBuf>,
}

/// Append-only event log shared by the registry, the session controller and the
/// encoder output pump.
///
/// Each entry is kept in memory, appended to the log file when one is configured,
/// mirrored to the `log` facade and broadcast to subscribers. Recording and
/// broadcasting happen under one lock, so every subscriber sees the same order.
#[derive(Clone)]
pub struct LogSink {
    state: Arc<Mutex<SinkState>>,
    sender: broadcast::Sender<LogEntry>,
}

impl LogSink {
    pub fn in_memory() -> Self {
        let (sender, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(SinkState {
                entries: Vec::new(),
                file: None,
                file_path: None,
            })),
            sender,
        }
    }

    /// Opens `path` for appending. If it cannot be opened the sink still works in memory.
    pub fn with_file(path: &Path) -> Self {
        let sink = Self::in_memory();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    log::warn!("Failed to create log directory {}: {}", parent.display(), e);
                }
            }
        }

        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                let mut state = sink.lock();
                state.file = Some(file);
                state.file_path = Some(path.to_path_buf());
            }
            Err(e) => log::warn!("Failed to open log file {}: {}", path.display(), e),
        }
        sink
    }

    pub fn default_log_path() -> PathBuf {
        dirs::data_local_dir()
            .map(|dir| dir.join("telestream"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("telestream.log")
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.record(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(LogLevel::Error, message.into());
    }

    pub fn record(&self, level: LogLevel, message: String) {
        let entry = LogEntry {
            timestamp: Local::now(),
            level,
            message: message.trim().to_string(),
        };
        log::log!(target: EVENT_TARGET, EVENT_MIRROR_LEVEL, "{} {}", level.as_str(), entry.message);

        let mut state = self.lock();
        let mut write_failed = false;
        if let Some(file) = state.file.as_mut() {
            if let Err(e) = writeln!(file, "{}", entry.file_line()) {
                log::warn!("Failed to write log file, continuing in memory only: {}", e);
                write_failed = true;
            }
        }
        if write_failed {
            state.file = None;
        }
        state.entries.push(entry.clone());
        // No subscribers is not an error.
        let _ = self.sender.send(entry);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().entries.clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.lock().entries.iter().map(|e| e.message.clone()).collect()
    }

    pub fn file_path(&self) -> Option<PathBuf> {
        self.lock().file_path.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
