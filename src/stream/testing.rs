//! In-process stand-ins for the encoder and the media extractor.

use crate::core::{StreamError, StreamResult};
use crate::stream::{
    EncoderInvocation, EncoderLauncher, EncoderProcess, MediaExtractor, OutputLines,
    ProcessStatus, SpawnedEncoder,
};
use std::io::{self, PipeWriter, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct FakeScript {
    lines: Vec<String>,
    exit_code: Option<i32>,
    honours_stop: bool,
    fail_with: Option<StreamError>,
}

impl FakeScript {
    /// Prints `lines` and keeps running until stopped.
    pub fn running(lines: Vec<&str>) -> Self {
        Self {
            lines: lines.into_iter().map(String::from).collect(),
            exit_code: None,
            honours_stop: true,
            fail_with: None,
        }
    }

    /// Prints `lines` and exits immediately with `code`.
    pub fn exiting(lines: Vec<&str>, code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Self::running(lines)
        }
    }

    pub fn failing(error: StreamError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::running(vec![])
        }
    }

    pub fn ignoring_stop(mut self) -> Self {
        self.honours_stop = false;
        self
    }
}

/// Observable state of one fake encoder run.
pub struct FakeProcessState {
    pub pid: u32,
    pub stop_requested: AtomicBool,
    pub killed: AtomicBool,
    exited: Mutex<Option<ProcessStatus>>,
    writer: Mutex<Option<PipeWriter>>,
}

impl FakeProcessState {
    /// Writes one more output line while the process is alive.
    pub fn emit(&self, line: &str) {
        if let Some(writer) = self.writer.lock().unwrap().as_mut() {
            writeln!(writer, "{}", line).unwrap();
        }
    }

    /// Simulates the encoder dying on its own.
    pub fn crash(&self, code: i32) {
        self.exit(ProcessStatus::Exited(Some(code)));
    }

    pub fn has_exited(&self) -> bool {
        self.exited.lock().unwrap().is_some()
    }

    fn exit(&self, status: ProcessStatus) {
        let mut exited = self.exited.lock().unwrap();
        if exited.is_none() {
            *exited = Some(status);
        }
        drop(exited);
        self.writer.lock().unwrap().take();
    }
}

struct FakeProcess {
    state: Arc<FakeProcessState>,
    honours_stop: bool,
}

impl EncoderProcess for FakeProcess {
    fn id(&self) -> u32 {
        self.state.pid
    }

    fn try_wait(&mut self) -> io::Result<ProcessStatus> {
        Ok(self.state.exited.lock().unwrap().unwrap_or(ProcessStatus::Running))
    }

    fn request_stop(&mut self) -> io::Result<()> {
        self.state.stop_requested.store(true, Ordering::SeqCst);
        if self.honours_stop {
            self.state.exit(ProcessStatus::Exited(Some(255)));
        }
        Ok(())
    }

    fn kill(&mut self) -> io::Result<()> {
        self.state.killed.store(true, Ordering::SeqCst);
        self.state.exit(ProcessStatus::Exited(None));
        Ok(())
    }

    fn wait(&mut self) -> io::Result<ProcessStatus> {
        Ok(self.state.exited.lock().unwrap().unwrap_or(ProcessStatus::Exited(None)))
    }
}

pub struct FakeLauncher {
    script: FakeScript,
    spawns: AtomicUsize,
    next_pid: AtomicU32,
    invocations: Mutex<Vec<EncoderInvocation>>,
    processes: Mutex<Vec<Arc<FakeProcessState>>>,
}

impl FakeLauncher {
    pub fn new(script: FakeScript) -> Self {
        Self {
            script,
            spawns: AtomicUsize::new(0),
            next_pid: AtomicU32::new(4000),
            invocations: Mutex::new(Vec::new()),
            processes: Mutex::new(Vec::new()),
        }
    }

    /// Number of launch attempts, successful or not.
    pub fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn last_invocation(&self) -> Option<EncoderInvocation> {
        self.invocations.lock().unwrap().last().cloned()
    }

    pub fn process(&self, index: usize) -> Arc<FakeProcessState> {
        self.processes.lock().unwrap()[index].clone()
    }

    pub fn live_processes(&self) -> usize {
        self.processes.lock().unwrap().iter().filter(|p| !p.has_exited()).count()
    }
}

impl EncoderLauncher for FakeLauncher {
    fn launch(&self, invocation: &EncoderInvocation) -> StreamResult<SpawnedEncoder> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        self.invocations.lock().unwrap().push(invocation.clone());
        if let Some(error) = &self.script.fail_with {
            return Err(error.clone());
        }

        let (reader, mut writer) = io::pipe().unwrap();
        for line in &self.script.lines {
            writeln!(writer, "{}", line).unwrap();
        }

        let state = Arc::new(FakeProcessState {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            stop_requested: AtomicBool::new(false),
            killed: AtomicBool::new(false),
            exited: Mutex::new(None),
            writer: Mutex::new(Some(writer)),
        });
        if let Some(code) = self.script.exit_code {
            state.exit(ProcessStatus::Exited(Some(code)));
        }
        self.processes.lock().unwrap().push(state.clone());

        Ok(SpawnedEncoder {
            process: Box::new(FakeProcess {
                state,
                honours_stop: self.script.honours_stop,
            }),
            output: OutputLines::from_reader(reader),
        })
    }
}

pub struct FakeExtractor {
    pub calls: AtomicUsize,
    answer: Result<String, String>,
}

impl FakeExtractor {
    pub fn answering(url: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            answer: Ok(url.to_string()),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            answer: Err(reason.to_string()),
        }
    }
}

impl MediaExtractor for FakeExtractor {
    fn extract_direct_media_url(&self, _reference: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.clone().map_err(|e| anyhow::anyhow!(e))
    }
}
