#![allow(dead_code)]

use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use relay_daemon::{
    ffmpeg::builder::EncoderCommand,
    monitor::{AlertSink, RestartPolicy},
    store::{Codec, ConfigStore, StreamConfig, StreamId},
    supervisor::{Supervisor, SupervisorSettings},
};
use tempfile::TempDir;

pub const FAKE: &str = "fake_ffmpeg.sh";
pub const CRASHING: &str = "crashing_ffmpeg.sh";
pub const CHATTY: &str = "chatty_ffmpeg.sh";
pub const SLOW_EXIT: &str = "slow_exit_ffmpeg.sh";

pub fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}

pub fn settings(script: &str) -> SupervisorSettings {
    SupervisorSettings {
        encoder: EncoderCommand {
            program: "/bin/sh".to_string(),
            prefix_args: vec![fixture(script)],
        },
        log_capacity: 50,
        stop_grace: Duration::from_secs(2),
        default_destination: "rtsp://host:8554".to_string(),
        restart: RestartPolicy {
            max_attempts: 3,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            stable_after: Duration::from_secs(60),
        },
    }
}

#[derive(Default)]
pub struct RecordingAlerts {
    pub calls: Mutex<Vec<(StreamId, u32)>>,
}

impl RecordingAlerts {
    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl AlertSink for RecordingAlerts {
    fn crash_loop(&self, id: StreamId, attempts: u32, _last_error: Option<&str>) {
        self.calls.lock().unwrap().push((id, attempts));
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub supervisor: Arc<Supervisor>,
    pub alerts: Arc<RecordingAlerts>,
}

impl Harness {
    pub fn new(script: &str) -> Self {
        Self::with_settings(settings(script))
    }

    pub fn with_settings(settings: SupervisorSettings) -> Self {
        let dir = TempDir::new().unwrap();
        let alerts = Arc::new(RecordingAlerts::default());
        let store = ConfigStore::open(dir.path().join("streams.json")).unwrap();
        let supervisor = Arc::new(Supervisor::new(store, settings, alerts.clone()).unwrap());
        Self {
            dir,
            supervisor,
            alerts,
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.dir.path().join("streams.json")
    }

    /// A second supervisor over the same store file, as after a reboot.
    pub fn reopen(&self, script: &str) -> Supervisor {
        let store = ConfigStore::open(self.store_path()).unwrap();
        Supervisor::new(store, settings(script), Arc::new(RecordingAlerts::default())).unwrap()
    }

    /// Adds a stream configured like the camera scenario.
    pub fn add_camera(&self) -> StreamId {
        let id = self.supervisor.add().unwrap().id;
        self.supervisor.configure(id, camera()).unwrap();
        id
    }

    pub fn wait_until_dead(&self, id: StreamId) {
        assert!(
            wait_until(Duration::from_secs(5), || !self.supervisor.is_alive(id)),
            "stream {} never exited",
            id
        );
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.supervisor.shutdown();
    }
}

pub fn camera() -> StreamConfig {
    StreamConfig {
        input: "/dev/video0".to_string(),
        destination: "rtsp://host:8554".to_string(),
        codec: Codec::Copy,
        bitrate: Some(4000),
        fps: Some(30),
        stream_name: "cam1".to_string(),
    }
}

pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    check()
}

pub fn pid_exists(pid: u32) -> bool {
    use nix::{sys::signal::kill, unistd::Pid};
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

pub fn kill_externally(pid: u32) {
    use nix::{
        sys::signal::{kill, Signal},
        unistd::Pid,
    };
    kill(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();
}
