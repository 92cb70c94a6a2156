//! Supervision of the external encoder process.
//!
//! The encoder (ffmpeg by default) is launched through an [`EncoderLauncher`],
//! which hands back the live process and its combined stdout/stderr as a lazy
//! [`OutputLines`] iterator. Whoever owns the [`ProcessHandle`] is the only one
//! allowed to terminate it; readers of the output only ever observe it.

use crate::core::{StreamError, StreamResult};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

const VIDEO_CODEC: &str = "libx264";
const VIDEO_BITRATE: &str = "10M";
const AUDIO_CODEC: &str = "aac";
const AUDIO_BITRATE: &str = "128k";
const CONTAINER_FORMAT: &str = "flv";

/// `<endpoint>/<credential>`, exactly as the encoder receives it.
pub fn destination(endpoint_url: &str, credential: &str) -> String {
    format!("{}/{}", endpoint_url, credential)
}

/// Destination safe to show in logs and status output.
pub fn redacted_destination(endpoint_url: &str) -> String {
    format!("{}/***", endpoint_url)
}

/// Program plus argument vector for one encoder run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    endpoint_url: String,
}

impl EncoderInvocation {
    pub fn build(
        program: &Path,
        input: &str,
        endpoint_url: &str,
        credential: &str,
        is_local_loop: bool,
    ) -> Self {
        let mut args = Vec::with_capacity(16);
        if is_local_loop {
            args.extend(["-stream_loop", "-1"].map(String::from));
        }
        args.extend(["-i".to_string(), input.to_string()]);
        args.extend(["-vcodec", VIDEO_CODEC, "-b:v", VIDEO_BITRATE].map(String::from));
        args.extend(["-acodec", AUDIO_CODEC, "-b:a", AUDIO_BITRATE].map(String::from));
        args.extend(["-f", CONTAINER_FORMAT].map(String::from));
        args.push(destination(endpoint_url, credential));

        Self {
            program: program.to_path_buf(),
            args,
            endpoint_url: endpoint_url.to_string(),
        }
    }

    pub fn destination(&self) -> &str {
        self.args.last().map(String::as_str).unwrap_or_default()
    }

    /// The command line with the credential masked.
    pub fn display_redacted(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        if let Some((_, head)) = self.args.split_last() {
            parts.extend(head.iter().cloned());
        }
        parts.push(redacted_destination(&self.endpoint_url));
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    /// `None` when the process was ended by a signal.
    Exited(Option<i32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    GracefulExit,
    ForcedExit,
}

/// A running encoder as seen by the supervisor.
pub trait EncoderProcess: Send {
    fn id(&self) -> u32;
    fn try_wait(&mut self) -> io::Result<ProcessStatus>;
    /// Asks the process to finish on its own (SIGTERM on Unix).
    fn request_stop(&mut self) -> io::Result<()>;
    fn kill(&mut self) -> io::Result<()>;
    fn wait(&mut self) -> io::Result<ProcessStatus>;
}

pub struct SpawnedEncoder {
    pub process: Box<dyn EncoderProcess>,
    pub output: OutputLines,
}

pub trait EncoderLauncher: Send + Sync {
    fn launch(&self, invocation: &EncoderInvocation) -> StreamResult<SpawnedEncoder>;
}

/// Launches real OS processes with stdout and stderr sharing one pipe.
pub struct SystemLauncher;

impl EncoderLauncher for SystemLauncher {
    fn launch(&self, invocation: &EncoderInvocation) -> StreamResult<SpawnedEncoder> {
        let (reader, writer) =
            io::pipe().map_err(|e| StreamError::SpawnFailed(format!("output pipe: {}", e)))?;
        let writer_err = writer
            .try_clone()
            .map_err(|e| StreamError::SpawnFailed(format!("output pipe: {}", e)))?;

        // The Command owns our copies of the write end; it must be dropped right
        // after spawning or the reader would never see end of output.
        let spawned = {
            let mut cmd = Command::new(&invocation.program);
            cmd.args(&invocation.args)
                .stdin(Stdio::null())
                .stdout(writer)
                .stderr(writer_err);
            cmd.spawn()
        };

        let child = spawned.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StreamError::BinaryNotFound(invocation.program.display().to_string())
            } else {
                StreamError::SpawnFailed(e.to_string())
            }
        })?;

        Ok(SpawnedEncoder {
            process: Box::new(ChildProcess { child }),
            output: OutputLines::from_reader(reader),
        })
    }
}

struct ChildProcess {
    child: Child,
}

impl EncoderProcess for ChildProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn try_wait(&mut self) -> io::Result<ProcessStatus> {
        Ok(match self.child.try_wait()? {
            Some(status) => ProcessStatus::Exited(status.code()),
            None => ProcessStatus::Running,
        })
    }

    #[cfg(unix)]
    fn request_stop(&mut self) -> io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        kill(Pid::from_raw(self.child.id() as i32), Signal::SIGTERM).map_err(io::Error::from)
    }

    #[cfg(not(unix))]
    fn request_stop(&mut self) -> io::Result<()> {
        self.child.kill()
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()
    }

    fn wait(&mut self) -> io::Result<ProcessStatus> {
        Ok(ProcessStatus::Exited(self.child.wait()?.code()))
    }
}

/// Lazy, ordered sequence of output lines.
///
/// Lines are split on `\n` and `\r` (ffmpeg redraws its progress line with
/// carriage returns), empty fragments are skipped and invalid UTF-8 is replaced.
/// Iteration ends when the writer side closes; read errors also end the stream.
pub struct OutputLines {
    reader: Box<dyn Read + Send>,
    buf: Vec<u8>,
    ready: VecDeque<String>,
    finished: bool,
}

impl OutputLines {
    const CHUNK: usize = 4096;

    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self {
            reader: Box::new(reader),
            buf: Vec::new(),
            ready: VecDeque::new(),
            finished: false,
        }
    }

    fn split_ready(&mut self) {
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n' || *b == b'\r') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.push_line(&line[..line.len() - 1]);
        }
    }

    fn push_line(&mut self, bytes: &[u8]) {
        let line = String::from_utf8_lossy(bytes);
        let line = line.trim_end();
        if !line.trim().is_empty() {
            self.ready.push_back(line.to_string());
        }
    }
}

impl Iterator for OutputLines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let mut chunk = [0u8; Self::CHUNK];
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Some(line);
            }
            if self.finished {
                return None;
            }

            match self.reader.read(&mut chunk) {
                Ok(0) => {
                    self.finished = true;
                    let rest = std::mem::take(&mut self.buf);
                    self.push_line(&rest);
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    self.split_ready();
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::debug!("Encoder output closed with error: {}", e);
                    self.finished = true;
                    let rest = std::mem::take(&mut self.buf);
                    self.push_line(&rest);
                }
            }
        }
    }
}

/// Ownership of one launched encoder.
pub struct ProcessHandle {
    process: Box<dyn EncoderProcess>,
    output: Option<OutputLines>,
    pid: u32,
    last_status: ProcessStatus,
}

impl ProcessHandle {
    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    pub fn new(spawned: SpawnedEncoder) -> Self {
        let pid = spawned.process.id();
        Self {
            process: spawned.process,
            output: Some(spawned.output),
            pid,
            last_status: ProcessStatus::Running,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Hands out the output stream. Only the first call returns it.
    pub fn take_output(&mut self) -> Option<OutputLines> {
        self.output.take()
    }

    /// Non-blocking liveness check.
    pub fn poll(&mut self) -> ProcessStatus {
        if let ProcessStatus::Exited(_) = self.last_status {
            return self.last_status;
        }
        match self.process.try_wait() {
            Ok(status) => self.last_status = status,
            Err(e) => log::warn!("Failed to poll encoder process {}: {}", self.pid, e),
        }
        self.last_status
    }

    pub fn last_status(&self) -> ProcessStatus {
        self.last_status
    }

    /// Requests a graceful exit, then kills the process if it is still alive after
    /// `grace_period`. Both outcomes leave the process reaped.
    pub fn terminate(&mut self, grace_period: Duration) -> TerminationOutcome {
        if let ProcessStatus::Exited(_) = self.poll() {
            return TerminationOutcome::GracefulExit;
        }

        if let Err(e) = self.process.request_stop() {
            log::warn!("Graceful stop request to encoder {} failed: {}", self.pid, e);
        }

        let deadline = Instant::now() + grace_period;
        loop {
            if let ProcessStatus::Exited(code) = self.poll() {
                log::debug!("Encoder {} exited gracefully with code {:?}", self.pid, code);
                return TerminationOutcome::GracefulExit;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(Self::POLL_INTERVAL.min(deadline - now));
        }

        log::warn!("{}, killing it", StreamError::TerminationTimeout(grace_period));
        if let Err(e) = self.process.kill() {
            log::warn!("Failed to kill encoder {}: {}", self.pid, e);
        }
        match self.process.wait() {
            Ok(status) => self.last_status = status,
            Err(e) => {
                log::warn!("Failed to reap encoder {}: {}", self.pid, e);
                self.last_status = ProcessStatus::Exited(None);
            }
        }
        TerminationOutcome::ForcedExit
    }
}

/// Builds encoder invocations and launches them.
pub struct ProcessSupervisor {
    launcher: Arc<dyn EncoderLauncher>,
    program: PathBuf,
    grace_period: Duration,
}

impl ProcessSupervisor {
    pub fn new(launcher: Arc<dyn EncoderLauncher>, program: Option<PathBuf>) -> Self {
        Self {
            launcher,
            program: program.unwrap_or_else(|| PathBuf::from("ffmpeg")),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn invocation(
        &self,
        effective_input: &str,
        endpoint_url: &str,
        credential: &str,
        is_local_loop: bool,
    ) -> EncoderInvocation {
        EncoderInvocation::build(&self.program, effective_input, endpoint_url, credential, is_local_loop)
    }

    pub fn spawn(
        &self,
        effective_input: &str,
        endpoint_url: &str,
        credential: &str,
        is_local_loop: bool,
    ) -> StreamResult<ProcessHandle> {
        let invocation = self.invocation(effective_input, endpoint_url, credential, is_local_loop);
        log::info!("Launching encoder: {}", invocation.display_redacted());
        let spawned = self.launcher.launch(&invocation)?;
        Ok(ProcessHandle::new(spawned))
    }

    pub fn terminate(&self, handle: &mut ProcessHandle) -> TerminationOutcome {
        handle.terminate(self.grace_period)
    }
}
