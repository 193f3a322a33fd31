use std::{
    io::{BufRead, BufReader},
    process::{Child, ChildStderr, Command, ExitStatus, Stdio},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use crate::{error::StopError, ffmpeg::builder::Invocation, ring_buffer::RingBuffer};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Where a reader thread appends lines. The reader stops once `generation`
/// moves past the value it was started with, i.e. the process was replaced
/// or stopped.
#[derive(Clone)]
pub struct LogSink {
    pub buffer: Arc<Mutex<RingBuffer>>,
    pub generation: Arc<AtomicU64>,
    pub expected: u64,
}

impl LogSink {
    fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.expected
    }

    fn append(&self, line: &str) {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.push(line);
    }
}

pub struct FFmpegProcess {
    child: Child,
    stderr: Option<ChildStderr>,
    start_time: Instant,
}

impl FFmpegProcess {
    pub fn spawn(invocation: &Invocation) -> std::io::Result<Self> {
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let stderr = child.stderr.take();

        Ok(Self {
            child,
            stderr,
            start_time: Instant::now(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Drains diagnostic output into `sink` on a dedicated thread until the
    /// pipe closes or the sink goes stale.
    pub fn start_stderr_reader(&mut self, sink: LogSink) {
        if let Some(stderr) = self.stderr.take() {
            thread::spawn(move || {
                let reader = BufReader::new(stderr);

                // ffmpeg rewrites its progress line with '\r', so split on both
                for chunk in reader.split(b'\n') {
                    let Ok(chunk) = chunk else { break };
                    if !sink.is_current() {
                        break;
                    }

                    let text = String::from_utf8_lossy(&chunk);
                    for line in text.split('\r') {
                        let line = line.trim();
                        if !line.is_empty() {
                            sink.append(line);
                        }
                    }
                }
            });
        }
    }

    /// Non-blocking liveness poll.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Asks the process to exit, escalating to a forced kill after `grace`.
    pub fn terminate(&mut self, grace: Duration) -> Result<(), StopError> {
        let pid = self.pid();

        if self.has_exited()? {
            return Ok(());
        }

        self.request_exit()?;

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if self.has_exited()? {
                return Ok(());
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }

        if let Err(source) = self.child.kill() {
            // already gone between the last poll and the kill
            if self.has_exited()? {
                return Ok(());
            }
            return Err(StopError::Signal {
                pid,
                reason: source.to_string(),
            });
        }

        self.child
            .wait()
            .map(|_| ())
            .map_err(|source| StopError::Wait { pid, source })
    }

    fn has_exited(&mut self) -> Result<bool, StopError> {
        let pid = self.pid();
        self.child
            .try_wait()
            .map(|status| status.is_some())
            .map_err(|source| StopError::Wait { pid, source })
    }

    #[cfg(unix)]
    fn request_exit(&mut self) -> Result<(), StopError> {
        use nix::{
            errno::Errno,
            sys::signal::{self, Signal},
            unistd::Pid,
        };

        let pid = self.pid();
        let Ok(raw) = i32::try_from(pid) else {
            return Err(StopError::Signal {
                pid,
                reason: "pid out of range".to_string(),
            });
        };

        match signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(StopError::Signal {
                pid,
                reason: errno.to_string(),
            }),
        }
    }

    #[cfg(not(unix))]
    fn request_exit(&mut self) -> Result<(), StopError> {
        let pid = self.pid();
        self.child.kill().map_err(|source| StopError::Signal {
            pid,
            reason: source.to_string(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> Invocation {
        Invocation {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            output_url: "rtsp://test/unused".to_string(),
        }
    }

    fn sink(capacity: usize) -> LogSink {
        LogSink {
            buffer: Arc::new(Mutex::new(RingBuffer::new(capacity))),
            generation: Arc::new(AtomicU64::new(1)),
            expected: 1,
        }
    }

    fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn reader_collects_lines_in_order() {
        let mut proc =
            FFmpegProcess::spawn(&shell("printf 'one\\ntwo\\rthree\\n\\n' >&2")).unwrap();
        let sink = sink(10);
        proc.start_stderr_reader(sink.clone());

        assert!(wait_until(|| sink.buffer.lock().unwrap().len() == 3));
        assert_eq!(sink.buffer.lock().unwrap().snapshot(), vec!["one", "two", "three"]);
    }

    #[test]
    fn stale_reader_stops_appending() {
        let mut proc =
            FFmpegProcess::spawn(&shell("echo first >&2; sleep 0.3; echo second >&2")).unwrap();
        let sink = sink(10);
        proc.start_stderr_reader(sink.clone());

        assert!(wait_until(|| sink.buffer.lock().unwrap().len() == 1));
        sink.generation.fetch_add(1, Ordering::SeqCst);

        assert!(wait_until(|| !proc.is_running()));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(sink.buffer.lock().unwrap().snapshot(), vec!["first"]);
    }

    #[test]
    fn exited_process_is_not_running() {
        let mut proc = FFmpegProcess::spawn(&shell("exit 3")).unwrap();
        assert!(wait_until(|| !proc.is_running()));
        assert_eq!(proc.exit_status().and_then(|status| status.code()), Some(3));
    }

    #[test]
    fn terminate_stops_cooperative_process() {
        let mut proc = FFmpegProcess::spawn(&shell("exec sleep 30")).unwrap();
        assert!(proc.is_running());

        let started = Instant::now();
        proc.terminate(Duration::from_secs(5)).unwrap();

        assert!(!proc.is_running());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn terminate_escalates_to_kill() {
        let mut proc =
            FFmpegProcess::spawn(&shell("trap '' TERM; while :; do sleep 0.1; done")).unwrap();
        // give the shell time to install the trap
        thread::sleep(Duration::from_millis(200));

        proc.terminate(Duration::from_millis(300)).unwrap();
        assert!(!proc.is_running());
    }

    #[test]
    fn terminate_after_exit_is_ok() {
        let mut proc = FFmpegProcess::spawn(&shell("exit 0")).unwrap();
        assert!(wait_until(|| !proc.is_running()));

        proc.terminate(Duration::from_millis(100)).unwrap();
    }

    #[test]
    fn spawn_reports_missing_binary() {
        let invocation = Invocation {
            program: "/nonexistent/relay-encoder".to_string(),
            args: Vec::new(),
            output_url: String::new(),
        };
        assert!(FFmpegProcess::spawn(&invocation).is_err());
    }
}
