//! Durable stream records.
//!
//! The store file is a JSON object keyed by stream id:
//!
//! ```json
//! { "1": { "id": 1, "fields": { ... }, "saved": true, "should_be_running": false } }
//! ```
//!
//! The companion viewer reads the same file, so its shape is fixed.
//! Writes go to a sibling temp file which is then renamed over the store.

use chrono::{DateTime, Local};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use crate::{
    error::{RecordError, StoreError},
    logger,
};

pub type StreamId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Copy,
    H264,
    Hevc,
}

impl Codec {
    /// Encoder name handed to `-c:v`.
    pub fn encoder_name(self) -> &'static str {
        match self {
            Codec::Copy => "copy",
            Codec::H264 => "h264_nvenc",
            Codec::Hevc => "hevc_nvenc",
        }
    }

    pub fn is_copy(self) -> bool {
        matches!(self, Codec::Copy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub input: String,
    pub destination: String,
    pub codec: Codec,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub bitrate: Option<u32>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub fps: Option<u32>,
    #[serde(default)]
    pub stream_name: String,
}

impl StreamConfig {
    pub fn with_defaults(id: StreamId, destination: &str) -> Self {
        Self {
            input: String::new(),
            destination: destination.to_string(),
            codec: Codec::Copy,
            bitrate: None,
            fps: None,
            stream_name: default_stream_name(id),
        }
    }

    /// Stream name with the id-derived fallback applied.
    pub fn resolved_name(&self, id: StreamId) -> String {
        let name = self.stream_name.trim();
        if name.is_empty() {
            default_stream_name(id)
        } else {
            name.to_string()
        }
    }

    pub fn output_url(&self, id: StreamId) -> String {
        format!(
            "{}/{}",
            self.destination.trim().trim_end_matches('/'),
            self.resolved_name(id)
        )
    }
}

pub fn default_stream_name(id: StreamId) -> String {
    format!("stream_{}", id)
}

/// Accepts `4000`, `"4000"` or `""` (unset).
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(0)) => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(None);
            }
            match text.parse::<u32>() {
                Ok(0) => Ok(None),
                Ok(n) => Ok(Some(n)),
                Err(err) => Err(de::Error::custom(format!("{:?} is not a number: {}", text, err))),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DesiredState {
    pub should_be_running: bool,
    pub saved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub config: StreamConfig,
    pub desired: DesiredState,
}

#[derive(Serialize, Deserialize)]
struct PersistedRecord {
    #[serde(default)]
    id: StreamId,
    fields: StreamConfig,
    #[serde(default = "default_saved")]
    saved: bool,
    #[serde(default)]
    should_be_running: bool,
}

fn default_saved() -> bool {
    true
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub records: BTreeMap<StreamId, StreamRecord>,
    pub skipped: Vec<RecordError>,
    /// Where an unparseable store file was moved to, if that happened.
    pub quarantined: Option<PathBuf>,
}

/// Entry of the viewer feed: streams that are meant to be on air.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableStream {
    pub id: StreamId,
    pub name: String,
    pub source: String,
    pub playback_url: String,
}

pub fn available_streams(records: &BTreeMap<StreamId, StreamRecord>) -> Vec<AvailableStream> {
    records
        .iter()
        .filter(|(_, record)| record.desired.should_be_running)
        .map(|(id, record)| AvailableStream {
            id: *id,
            name: record.config.resolved_name(*id),
            source: record.config.destination.clone(),
            playback_url: record.config.output_url(*id),
        })
        .collect()
}

pub struct ConfigStore {
    path: PathBuf,
    /// Held across writes. `true` while an unreadable store file could not be
    /// moved aside yet; it must be before anything overwrites it.
    write_lock: Mutex<bool>,
}

impl ConfigStore {
    /// Opens the store at `path`, failing if its directory cannot be written.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.into(),
            write_lock: Mutex::new(false),
        };
        store.probe_writable()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "streams.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn persist_error(&self, source: io::Error) -> StoreError {
        StoreError::Persist {
            path: self.path.clone(),
            source,
        }
    }

    fn probe_writable(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| self.persist_error(err))?;
            }
        }

        let probe = self.temp_path();
        File::create(&probe).map_err(|err| self.persist_error(err))?;
        fs::remove_file(&probe).map_err(|err| self.persist_error(err))?;
        Ok(())
    }

    pub fn load(&self) -> Result<LoadReport, StoreError> {
        let mut report = LoadReport::default();

        if !self.path.exists() {
            return Ok(report);
        }

        let data = fs::read_to_string(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        if data.trim().is_empty() {
            return Ok(report);
        }

        let reason = match serde_json::from_str::<serde_json::Value>(&data) {
            Ok(serde_json::Value::Object(entries)) => {
                self.parse_entries(entries, &mut report);
                return Ok(report);
            }
            Ok(_) => "top level is not an object".to_string(),
            Err(err) => err.to_string(),
        };

        match self.quarantine(&reason, Local::now()) {
            Ok(target) => report.quarantined = Some(target),
            Err(err) => {
                logger::error(
                    "store",
                    format!("{}; starting empty and leaving the file untouched", err),
                );
                *self.write_lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
            }
        }
        Ok(report)
    }

    fn parse_entries(&self, entries: serde_json::Map<String, serde_json::Value>, report: &mut LoadReport) {
        for (key, value) in entries {
            match parse_record(&key, value) {
                Ok((id, record)) => {
                    report.records.insert(id, record);
                }
                Err(err) => {
                    logger::warn("store", format!("skipping record: {}", err));
                    report.skipped.push(err);
                }
            }
        }
    }

    /// Where an unreadable store file is moved to.
    pub fn quarantine_path(&self, at: DateTime<Local>) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "streams.json".into());
        name.push(format!(".{}", at.format("corrupt-%Y%m%d-%H%M%S")));
        self.path.with_file_name(name)
    }

    fn quarantine(&self, reason: &str, at: DateTime<Local>) -> Result<PathBuf, StoreError> {
        let target = self.quarantine_path(at);

        fs::rename(&self.path, &target).map_err(|err| self.persist_error(err))?;
        logger::error(
            "store",
            format!(
                "{} is unreadable ({}), moved to {}",
                self.path.display(),
                reason,
                target.display()
            ),
        );
        Ok(target)
    }

    /// Atomically replaces the store with `records`.
    pub fn save(&self, records: &BTreeMap<StreamId, StreamRecord>) -> Result<(), StoreError> {
        let mut unreadable_in_place = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if *unreadable_in_place {
            self.quarantine("still unreadable", Local::now())?;
            *unreadable_in_place = false;
        }

        let persisted: BTreeMap<StreamId, PersistedRecord> = records
            .iter()
            .map(|(id, record)| {
                (
                    *id,
                    PersistedRecord {
                        id: *id,
                        fields: record.config.clone(),
                        saved: record.desired.saved,
                        should_be_running: record.desired.should_be_running,
                    },
                )
            })
            .collect();
        let data = serde_json::to_string_pretty(&persisted)?;

        let temp = self.temp_path();
        let write = || -> io::Result<()> {
            let mut file = File::create(&temp)?;
            file.write_all(data.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp, &self.path)
        };

        write().map_err(|err| {
            let _ = fs::remove_file(&temp);
            self.persist_error(err)
        })
    }
}

fn parse_record(key: &str, value: serde_json::Value) -> Result<(StreamId, StreamRecord), RecordError> {
    let id = match key.trim().parse::<StreamId>() {
        Ok(id) if id > 0 => id,
        _ => return Err(RecordError::BadKey(key.to_string())),
    };

    let persisted: PersistedRecord =
        serde_json::from_value(value).map_err(|source| RecordError::BadRecord {
            key: key.to_string(),
            source,
        })?;

    Ok((
        id,
        StreamRecord {
            config: persisted.fields,
            desired: DesiredState {
                should_be_running: persisted.should_be_running,
                saved: persisted.saved,
            },
        },
    ))
}
