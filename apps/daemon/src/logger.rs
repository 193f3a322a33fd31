//! Daemon event log.
//!
//! Every event is echoed to the console, kept in a bounded history for
//! `GET /logs`, and broadcast to live subscribers of `GET /logs/stream`.
//! Encoder output does not pass through here; it lives in each stream's
//! own ring buffer.

use chrono::Utc;
use serde::Serialize;
use std::{
    collections::VecDeque,
    io::{self, Write},
    sync::{Mutex, OnceLock, PoisonError},
};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub timestamp: String,
    pub level: LogLevel,
    pub source: String,
    pub message: String,
}

const MAX_BUFFERED_LOGS: usize = 2000;
const BROADCAST_CAPACITY: usize = 2048;

struct EventLog {
    tx: broadcast::Sender<LogEvent>,
    history: Mutex<VecDeque<LogEvent>>,
}

static EVENT_LOG: OnceLock<EventLog> = OnceLock::new();

fn event_log() -> &'static EventLog {
    EVENT_LOG.get_or_init(|| {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        EventLog {
            tx,
            history: Mutex::new(VecDeque::with_capacity(MAX_BUFFERED_LOGS)),
        }
    })
}

pub fn init_logging() {
    let _ = event_log();
}

pub fn subscribe() -> broadcast::Receiver<LogEvent> {
    event_log().tx.subscribe()
}

pub fn emit(level: LogLevel, source: &str, message: impl Into<String>) {
    let log = event_log();

    let event = LogEvent {
        timestamp: Utc::now().to_rfc3339(),
        level,
        source: source.to_string(),
        message: message.into(),
    };

    {
        let mut history = log.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push_back(event.clone());
        while history.len() > MAX_BUFFERED_LOGS {
            history.pop_front();
        }
    }

    match level {
        LogLevel::Error | LogLevel::Warning => {
            let _ = writeln!(io::stderr(), "[{}] {}", event.source, event.message);
        }
        LogLevel::Info | LogLevel::Debug => {
            let _ = writeln!(io::stdout(), "[{}] {}", event.source, event.message);
        }
    }

    // no subscribers is fine
    let _ = log.tx.send(event);
}

pub fn info(source: &str, message: impl Into<String>) {
    emit(LogLevel::Info, source, message);
}

pub fn warn(source: &str, message: impl Into<String>) {
    emit(LogLevel::Warning, source, message);
}

pub fn error(source: &str, message: impl Into<String>) {
    emit(LogLevel::Error, source, message);
}

pub fn debug(source: &str, message: impl Into<String>) {
    emit(LogLevel::Debug, source, message);
}

pub fn recent_logs() -> Vec<LogEvent> {
    event_log()
        .history
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .cloned()
        .collect()
}

/// Log source name for a single stream, e.g. `stream-3`.
pub fn stream_source(id: u32) -> String {
    format!("stream-{}", id)
}
