//! Error types for the relay daemon.
//!
//! Per-stream failures (`StartError`, `StopError`) stay attached to the
//! stream they came from. `StoreError::Persist` is always surfaced to the
//! caller of the intent that triggered the write.

use std::{io, path::PathBuf};
use thiserror::Error;

use crate::store::StreamId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize stream records: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Why a single persisted record was skipped during load.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("key {0:?} is not a positive integer stream id")]
    BadKey(String),

    #[error("record {key}: {source}")]
    BadRecord {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("failed to spawn encoder for stream {id}: {source}")]
    Spawn {
        id: StreamId,
        #[source]
        source: io::Error,
    },

    #[error("stream {0} is no longer meant to be running")]
    NotDesired(StreamId),

    #[error("stream {0} was changed while its encoder was starting")]
    Superseded(StreamId),
}

#[derive(Debug, Error)]
pub enum StopError {
    #[error("failed to signal pid {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    #[error("failed to reap pid {pid}: {source}")]
    Wait {
        pid: u32,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("stream {0} not found")]
    NotFound(StreamId),

    #[error(transparent)]
    Persist(#[from] StoreError),

    #[error(transparent)]
    Start(#[from] StartError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}: {reason}")]
    InvalidVar {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Conditions that stop the daemon from coming up at all.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("stream store is unusable: {0}")]
    Store(#[from] StoreError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] io::Error),
}
