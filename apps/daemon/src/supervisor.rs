//! Desired-state process supervision.
//!
//! All stream state (durable record plus runtime handle) lives behind one
//! mutex. The lock is held for point operations only: spawning an encoder
//! and waiting for one to exit always happen with the lock released.
//!
//! Every start, stop and delete bumps the stream's generation. A start
//! remembers the generation it began with and only installs its process if
//! nothing else touched the stream meanwhile, so a stream never ends up with
//! two live encoders and a restart never resurrects a stopped or deleted one.
//! A start writes the desired state in the same critical section that bumps
//! the generation, and while it swaps processes outside the lock the health
//! monitor leaves the stream alone.

use serde::Serialize;
use std::{
    collections::BTreeMap,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::{Duration, Instant},
};

use crate::{
    error::{StartError, StoreError, SupervisorError},
    ffmpeg::{
        builder::{build_ffmpeg_args, EncoderCommand},
        process::{FFmpegProcess, LogSink},
    },
    logger::{self, stream_source},
    monitor::{AlertSink, CrashDecision, HealthState, RestartPolicy, RestartTracker},
    ring_buffer::RingBuffer,
    store::{
        self, AvailableStream, ConfigStore, DesiredState, StreamConfig, StreamId, StreamRecord,
    },
};

pub const DEFAULT_LOG_LINES: usize = 300;

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub encoder: EncoderCommand,
    pub log_capacity: usize,
    pub stop_grace: Duration,
    pub default_destination: String,
    pub restart: RestartPolicy,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            encoder: EncoderCommand::default(),
            log_capacity: DEFAULT_LOG_LINES,
            stop_grace: Duration::from_secs(5),
            default_destination: "rtsp://127.0.0.1:8554".to_string(),
            restart: RestartPolicy::default(),
        }
    }
}

struct RuntimeState {
    process: Option<FFmpegProcess>,
    log: Arc<Mutex<RingBuffer>>,
    output_url: Option<String>,
    last_error: Option<String>,
    generation: Arc<AtomicU64>,
    /// Generation of a start still swapping processes outside the lock.
    launching: Option<u64>,
    health: HealthState,
    restarts: RestartTracker,
}

impl RuntimeState {
    fn new(log_capacity: usize) -> Self {
        Self {
            process: None,
            log: Arc::new(Mutex::new(RingBuffer::new(log_capacity))),
            output_url: None,
            last_error: None,
            generation: Arc::new(AtomicU64::new(0)),
            launching: None,
            health: HealthState::Stopped,
            restarts: RestartTracker::default(),
        }
    }

    fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn push_log(&self, line: impl Into<String>) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }

    fn is_alive(&mut self) -> bool {
        self.process.as_mut().is_some_and(FFmpegProcess::is_running)
    }
}

struct StreamEntry {
    record: StreamRecord,
    runtime: RuntimeState,
}

impl StreamEntry {
    fn status(&mut self, id: StreamId) -> StreamStatus {
        let running = self.runtime.is_alive();
        let state = match self.runtime.health {
            HealthState::Running if !running => HealthState::CrashedPendingRestart,
            other => other,
        };

        StreamStatus {
            id,
            fields: self.record.config.clone(),
            saved: self.record.desired.saved,
            should_be_running: self.record.desired.should_be_running,
            running,
            pid: self
                .runtime
                .process
                .as_ref()
                .filter(|_| running)
                .map(FFmpegProcess::pid),
            state,
            output_url: self.runtime.output_url.clone(),
            last_error: self.runtime.last_error.clone(),
            restart_attempts: self.runtime.restarts.attempts(),
        }
    }
}

#[derive(Default)]
struct SupervisorState {
    streams: BTreeMap<StreamId, StreamEntry>,
    next_id: StreamId,
}

impl SupervisorState {
    fn records(&self) -> BTreeMap<StreamId, StreamRecord> {
        self.streams
            .iter()
            .map(|(id, entry)| (*id, entry.record.clone()))
            .collect()
    }

    fn entry(&mut self, id: StreamId) -> Result<&mut StreamEntry, SupervisorError> {
        self.streams.get_mut(&id).ok_or(SupervisorError::NotFound(id))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub id: StreamId,
    pub fields: StreamConfig,
    pub saved: bool,
    pub should_be_running: bool,
    pub running: bool,
    pub pid: Option<u32>,
    pub state: HealthState,
    pub output_url: Option<String>,
    pub last_error: Option<String>,
    pub restart_attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamLogs {
    pub log: Vec<String>,
    pub running: bool,
}

/// A stream the monitor found down and may restart, tagged with the
/// generation it was observed at.
#[derive(Debug, Clone, Copy)]
pub struct RestartCandidate {
    pub id: StreamId,
    pub generation: u64,
}

enum LaunchGuard {
    Intent,
    Reconcile { generation: u64 },
}

pub struct Supervisor {
    settings: SupervisorSettings,
    store: ConfigStore,
    state: Mutex<SupervisorState>,
    stragglers: Mutex<Vec<(StreamId, FFmpegProcess)>>,
    alerts: Arc<dyn AlertSink>,
}

impl Supervisor {
    /// Loads persisted records. Nothing is started until `resume`.
    pub fn new(
        store: ConfigStore,
        settings: SupervisorSettings,
        alerts: Arc<dyn AlertSink>,
    ) -> Result<Self, StoreError> {
        let report = store.load()?;

        if !report.skipped.is_empty() {
            logger::warn(
                "supervisor",
                format!("{} malformed stream record(s) skipped", report.skipped.len()),
            );
        }
        if let Some(moved) = &report.quarantined {
            logger::warn(
                "supervisor",
                format!("starting with no streams; previous store kept at {}", moved.display()),
            );
        }

        let next_id = report.records.keys().next_back().map_or(1, |max| max + 1);
        let streams = report
            .records
            .into_iter()
            .map(|(id, record)| {
                (
                    id,
                    StreamEntry {
                        record,
                        runtime: RuntimeState::new(settings.log_capacity),
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();

        logger::info(
            "supervisor",
            format!("loaded {} stream(s) from {}", streams.len(), store.path().display()),
        );

        Ok(Self {
            settings,
            store,
            state: Mutex::new(SupervisorState { streams, next_id }),
            stragglers: Mutex::new(Vec::new()),
            alerts,
        })
    }

    pub fn store_path(&self) -> &Path {
        self.store.path()
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    fn lock_state(&self) -> MutexGuard<'_, SupervisorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &SupervisorState) -> Result<(), StoreError> {
        self.store.save(&state.records()).inspect_err(|err| {
            logger::error("store", err.to_string());
        })
    }

    /// Creates a stream with default fields under the next unused id.
    pub fn add(&self) -> Result<StreamStatus, SupervisorError> {
        let mut state = self.lock_state();

        let id = state.next_id.max(1);
        state.next_id = id + 1;

        state.streams.insert(
            id,
            StreamEntry {
                record: StreamRecord {
                    config: StreamConfig::with_defaults(id, &self.settings.default_destination),
                    desired: DesiredState::default(),
                },
                runtime: RuntimeState::new(self.settings.log_capacity),
            },
        );

        if let Err(err) = self.persist(&state) {
            state.streams.remove(&id);
            state.next_id = id;
            return Err(err.into());
        }

        logger::info(&stream_source(id), "added");
        let entry = state.entry(id)?;
        Ok(entry.status(id))
    }

    /// Replaces a stream's fields and marks them saved. A running encoder
    /// keeps its old arguments until the next start.
    pub fn configure(&self, id: StreamId, config: StreamConfig) -> Result<StreamStatus, SupervisorError> {
        let mut state = self.lock_state();

        let entry = state.entry(id)?;
        let previous = entry.record.clone();
        entry.record.config = config;
        entry.record.desired.saved = true;

        if let Err(err) = self.persist(&state) {
            if let Some(entry) = state.streams.get_mut(&id) {
                entry.record = previous;
            }
            return Err(err.into());
        }

        logger::info(&stream_source(id), "configuration saved");
        let entry = state.entry(id)?;
        Ok(entry.status(id))
    }

    /// Marks the stream as desired-running and (re)starts its encoder.
    /// Any process already running for the stream is stopped first.
    pub fn start(&self, id: StreamId) -> Result<StreamStatus, SupervisorError> {
        self.launch(id, LaunchGuard::Intent)?;
        self.status(id)
    }

    /// Restart requested by the health monitor. Refuses if the stream is no
    /// longer desired-running or was touched since `generation`.
    pub fn restart_if_desired(&self, id: StreamId, generation: u64) -> Result<u32, SupervisorError> {
        self.launch(id, LaunchGuard::Reconcile { generation })
    }

    fn launch(&self, id: StreamId, guard: LaunchGuard) -> Result<u32, SupervisorError> {
        let (generation, previous, invocation, sink) = {
            let mut state = self.lock_state();

            match guard {
                LaunchGuard::Intent => {
                    let entry = state.entry(id)?;
                    if !entry.record.desired.should_be_running {
                        entry.record.desired.should_be_running = true;
                        if let Err(err) = self.persist(&state) {
                            if let Some(entry) = state.streams.get_mut(&id) {
                                entry.record.desired.should_be_running = false;
                            }
                            return Err(err.into());
                        }
                    }
                    state.entry(id)?.runtime.restarts.reset();
                }
                LaunchGuard::Reconcile { generation } => {
                    let entry = state.entry(id)?;
                    if !entry.record.desired.should_be_running {
                        return Err(StartError::NotDesired(id).into());
                    }
                    if entry.runtime.generation() != generation {
                        return Err(StartError::Superseded(id).into());
                    }
                }
            }

            let entry = state.entry(id)?;
            let generation = entry.runtime.bump_generation();
            entry.runtime.launching = Some(generation);
            let previous = entry.runtime.process.take();
            let invocation = build_ffmpeg_args(id, &entry.record.config, &self.settings.encoder);
            let sink = LogSink {
                buffer: entry.runtime.log.clone(),
                generation: entry.runtime.generation.clone(),
                expected: generation,
            };
            (generation, previous, invocation, sink)
        };

        if let Some(previous) = previous {
            self.terminate(id, previous);
        }

        logger::debug(&stream_source(id), invocation.command_line());

        let spawned = FFmpegProcess::spawn(&invocation);

        let mut state = self.lock_state();
        let is_current = state
            .streams
            .get(&id)
            .is_some_and(|entry| entry.runtime.generation() == generation);

        match spawned {
            Ok(mut process) if is_current => {
                let pid = process.pid();
                process.start_stderr_reader(sink);

                let runtime = &mut state.entry(id)?.runtime;
                runtime.launching = None;
                runtime.process = Some(process);
                runtime.output_url = Some(invocation.output_url);
                runtime.last_error = None;
                runtime.health = HealthState::Running;

                logger::info(&stream_source(id), format!("encoder started as pid {}", pid));
                Ok(pid)
            }
            Ok(process) => {
                drop(state);
                self.terminate(id, process);
                Err(StartError::Superseded(id).into())
            }
            Err(source) => {
                if is_current {
                    let entry = state.entry(id)?;
                    entry.runtime.launching = None;
                    let message = format!("Error starting: {}", source);
                    entry.runtime.push_log(message.clone());
                    entry.runtime.last_error = Some(message);
                    entry.runtime.health = if entry.record.desired.should_be_running {
                        HealthState::CrashedPendingRestart
                    } else {
                        HealthState::Stopped
                    };
                    logger::error(&stream_source(id), format!("failed to spawn encoder: {}", source));
                }
                Err(StartError::Spawn { id, source }.into())
            }
        }
    }

    /// Marks the stream as stopped and terminates its encoder, if any.
    /// Stopping an already stopped stream is a no-op.
    pub fn stop(&self, id: StreamId) -> Result<StreamStatus, SupervisorError> {
        let mut state = self.lock_state();

        let entry = state.entry(id)?;
        let previous = entry.record.desired;
        entry.record.desired.should_be_running = false;

        if let Err(err) = self.persist(&state) {
            if let Some(entry) = state.streams.get_mut(&id) {
                entry.record.desired = previous;
            }
            return Err(err.into());
        }

        let entry = state.entry(id)?;
        entry.runtime.bump_generation();
        entry.runtime.launching = None;
        entry.runtime.health = HealthState::Stopped;
        entry.runtime.restarts.reset();
        let process = entry.runtime.process.take();
        let status = entry.status(id);
        drop(state);

        if let Some(process) = process {
            self.terminate(id, process);
        }
        Ok(status)
    }

    /// Terminates the stream's encoder and forgets the stream entirely.
    pub fn delete(&self, id: StreamId) -> Result<(), SupervisorError> {
        let mut state = self.lock_state();

        let entry = state.streams.remove(&id).ok_or(SupervisorError::NotFound(id))?;
        if let Err(err) = self.persist(&state) {
            state.streams.insert(id, entry);
            return Err(err.into());
        }
        drop(state);

        let mut runtime = entry.runtime;
        runtime.bump_generation();
        if let Some(process) = runtime.process.take() {
            self.terminate(id, process);
        }

        logger::info(&stream_source(id), "deleted");
        Ok(())
    }

    pub fn is_alive(&self, id: StreamId) -> bool {
        self.lock_state()
            .streams
            .get_mut(&id)
            .is_some_and(|entry| entry.runtime.is_alive())
    }

    pub fn status(&self, id: StreamId) -> Result<StreamStatus, SupervisorError> {
        let mut state = self.lock_state();
        let entry = state.entry(id)?;
        Ok(entry.status(id))
    }

    pub fn list(&self) -> Vec<StreamStatus> {
        self.lock_state()
            .streams
            .iter_mut()
            .map(|(id, entry)| entry.status(*id))
            .collect()
    }

    pub fn logs(&self, id: StreamId) -> Result<StreamLogs, SupervisorError> {
        let mut state = self.lock_state();
        let entry = state.entry(id)?;
        let running = entry.runtime.is_alive();
        let log = entry
            .runtime
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot();
        Ok(StreamLogs { log, running })
    }

    pub fn available_streams(&self) -> Vec<AvailableStream> {
        store::available_streams(&self.lock_state().records())
    }

    /// Starts every stream whose desired state says it should be running.
    pub fn resume(&self) -> usize {
        let ids: Vec<StreamId> = self
            .lock_state()
            .streams
            .iter()
            .filter(|(_, entry)| entry.record.desired.should_be_running)
            .map(|(id, _)| *id)
            .collect();

        let mut started = 0;
        for id in ids {
            match self.launch(id, LaunchGuard::Intent) {
                Ok(_) => started += 1,
                Err(err) => logger::error(&stream_source(id), format!("resume failed: {}", err)),
            }
        }
        started
    }

    /// Inspects every desired-running stream and returns the ones that are
    /// down and due for a restart. Fires the alert hook for streams that
    /// just exhausted their restart budget.
    pub fn reconcile(&self, now: Instant) -> Vec<RestartCandidate> {
        let mut candidates = Vec::new();
        let mut alerts = Vec::new();

        {
            let mut state = self.lock_state();
            for (id, entry) in state.streams.iter_mut() {
                // a start in flight owns the stream until it installs its process
                if !entry.record.desired.should_be_running || entry.runtime.launching.is_some() {
                    continue;
                }

                let runtime = &mut entry.runtime;
                if runtime.is_alive() {
                    runtime.health = HealthState::Running;
                    let stable = runtime
                        .process
                        .as_ref()
                        .is_some_and(|process| process.uptime() >= self.settings.restart.stable_after);
                    if stable && runtime.restarts.attempts() > 0 {
                        runtime.restarts.reset();
                    }
                    continue;
                }

                if let Some(mut exited) = runtime.process.take() {
                    let message = match exited.exit_status() {
                        Some(status) => format!("encoder exited ({})", status),
                        None => "encoder exited".to_string(),
                    };
                    runtime.push_log(message.clone());
                    runtime.last_error = Some(message);
                }

                match runtime.restarts.on_crash(now, &self.settings.restart) {
                    CrashDecision::RestartNow => {
                        runtime.health = HealthState::CrashedPendingRestart;
                        candidates.push(RestartCandidate {
                            id: *id,
                            generation: runtime.generation(),
                        });
                    }
                    CrashDecision::Wait(_) => {
                        runtime.health = HealthState::CrashedPendingRestart;
                    }
                    CrashDecision::GiveUp { first_time } => {
                        runtime.health = HealthState::Failed;
                        if first_time {
                            alerts.push((*id, runtime.restarts.attempts(), runtime.last_error.clone()));
                        }
                    }
                }
            }
        }

        for (id, attempts, last_error) in alerts {
            self.alerts.crash_loop(id, attempts, last_error.as_deref());
        }

        candidates
    }

    /// Re-attempts termination of processes whose earlier stop failed.
    /// Returns how many were reaped.
    pub fn reap_stragglers(&self) -> usize {
        let pending: Vec<(StreamId, FFmpegProcess)> = std::mem::take(
            &mut *self.stragglers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let total = pending.len();
        for (id, process) in pending {
            self.terminate(id, process);
        }
        total.saturating_sub(self.straggler_count())
    }

    pub fn straggler_count(&self) -> usize {
        self.stragglers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Terminates every encoder without touching desired state, so the next
    /// boot resumes the same set of streams.
    pub fn shutdown(&self) {
        let processes: Vec<(StreamId, FFmpegProcess)> = {
            let mut state = self.lock_state();
            state
                .streams
                .iter_mut()
                .filter_map(|(id, entry)| {
                    entry.runtime.bump_generation();
                    entry.runtime.launching = None;
                    entry.runtime.health = HealthState::Stopped;
                    entry.runtime.process.take().map(|process| (*id, process))
                })
                .collect()
        };

        logger::info("supervisor", format!("stopping {} encoder(s)", processes.len()));
        for (id, process) in processes {
            self.terminate(id, process);
        }
        self.reap_stragglers();
    }

    fn terminate(&self, id: StreamId, mut process: FFmpegProcess) {
        let pid = process.pid();
        match process.terminate(self.settings.stop_grace) {
            Ok(()) => logger::info(&stream_source(id), format!("encoder pid {} stopped", pid)),
            Err(err) => {
                logger::warn(
                    &stream_source(id),
                    format!("{}; retrying on next health check", err),
                );
                self.stragglers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((id, process));
            }
        }
    }
}
