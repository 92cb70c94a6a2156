use crate::core::{LogSink, StreamError, StreamResult};
use crate::stream::{
    redacted_destination, EffectiveInput, OutputLines, ProcessHandle, ProcessStatus,
    ProcessSupervisor, SourceKind, SourceResolver, TerminationOutcome,
};
use chrono::{DateTime, Local};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Resolving,
    Launching,
    Streaming,
    Stopping,
    /// Transient: a start attempt failed. Always followed by `Idle`.
    Failed,
}

impl SessionState {
    pub fn can_start(self) -> bool {
        self == SessionState::Idle
    }

    pub fn can_stop(self) -> bool {
        self == SessionState::Streaming
    }
}

/// Read-only view of the controller for presentation code.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub id: Option<Uuid>,
    pub source: Option<String>,
    pub effective_input: Option<EffectiveInput>,
    pub endpoint: Option<String>,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Local>>,
}

struct Session {
    id: Uuid,
    source: String,
    effective_input: Option<EffectiveInput>,
    endpoint: String,
    handle: Option<ProcessHandle>,
    started_at: DateTime<Local>,
}

struct ControllerState {
    state: SessionState,
    session: Option<Session>,
    pump: Option<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<ControllerState>,
    /// Signalled on every transition.
    changed: Condvar,
    events: broadcast::Sender<SessionState>,
    log: LogSink,
    resolver: SourceResolver,
    supervisor: ProcessSupervisor,
}

/// Owns the single streaming session.
///
/// `start` and `stop` are synchronous commands. While streaming, one pump thread
/// forwards encoder output to the [`LogSink`] and notices when the encoder goes
/// away on its own. Only the controller ever terminates the encoder.
pub struct SessionController {
    shared: Arc<Shared>,
}

impl SessionController {
    pub fn new(resolver: SourceResolver, supervisor: ProcessSupervisor, log: LogSink) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ControllerState {
                    state: SessionState::Idle,
                    session: None,
                    pump: None,
                }),
                changed: Condvar::new(),
                events,
                log,
                resolver,
                supervisor,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.shared.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let st = self.shared.lock();
        let session = st.session.as_ref();
        SessionSnapshot {
            state: st.state,
            id: session.map(|s| s.id),
            source: session.map(|s| s.source.clone()),
            effective_input: session.and_then(|s| s.effective_input.clone()),
            endpoint: session.map(|s| s.endpoint.clone()),
            pid: session.and_then(|s| s.handle.as_ref()).map(ProcessHandle::pid),
            started_at: session.map(|s| s.started_at),
        }
    }

    /// Resolves `source`, launches the encoder and returns once it is streaming.
    pub fn start(&self, source: &str, endpoint_url: &str, credential: &str) -> StreamResult<SessionSnapshot> {
        let id = {
            let mut st = self.shared.lock();
            if !st.state.can_start() {
                drop(st);
                return self.shared.reject(StreamError::SessionAlreadyActive);
            }
            if let Err(e) = validate(source, endpoint_url, credential) {
                drop(st);
                return self.shared.reject(e);
            }

            let id = Uuid::new_v4();
            st.session = Some(Session {
                id,
                source: source.to_string(),
                effective_input: None,
                endpoint: redacted_destination(endpoint_url),
                handle: None,
                started_at: Local::now(),
            });
            self.shared.transition(&mut st, SessionState::Resolving);
            id
        };
        self.shared.log.info("Starting stream...");

        let input = match self.shared.resolver.resolve(source) {
            Ok(input) => input,
            Err(e) => return self.shared.abort_start(id, e),
        };
        if input.kind == SourceKind::Remote {
            self.shared.log.info("Resolved remote source to a direct media URL.");
        }

        {
            let mut st = self.shared.lock();
            if let Some(session) = st.session.as_mut().filter(|s| s.id == id) {
                session.effective_input = Some(input.clone());
            }
            self.shared.transition(&mut st, SessionState::Launching);
        }

        let mut handle = match self.shared.supervisor.spawn(
            &input.input,
            endpoint_url,
            credential,
            input.is_loopable(),
        ) {
            Ok(handle) => handle,
            Err(e) => return self.shared.abort_start(id, e),
        };

        let output = handle.take_output();
        let pid = handle.pid();
        {
            let mut st = self.shared.lock();
            if let Some(session) = st.session.as_mut().filter(|s| s.id == id) {
                session.handle = Some(handle);
                session.started_at = Local::now();
            }
            self.shared.transition(&mut st, SessionState::Streaming);
            self.shared.log.info(format!("Streaming started with PID: {}", pid));

            if let Some(output) = output {
                let shared = Arc::clone(&self.shared);
                st.pump = Some(thread::spawn(move || pump_output(shared, id, output)));
            }
        }

        Ok(self.snapshot())
    }

    /// Stops the active stream. Returns `None` when there was nothing to stop.
    pub fn stop(&self) -> Option<TerminationOutcome> {
        let (session, pump) = {
            let mut st = self.shared.lock();
            let current = st.state;
            if !current.can_stop() {
                drop(st);
                match current {
                    SessionState::Resolving | SessionState::Launching => {
                        self.shared.log.warn("Stream is still starting; stop ignored.")
                    }
                    SessionState::Stopping => self.shared.log.info("Stream is already stopping."),
                    _ => self.shared.log.info("No active stream to stop."),
                }
                return None;
            }
            let session = st.session.take();
            let pump = st.pump.take();
            self.shared.transition(&mut st, SessionState::Stopping);
            (session, pump)
        };

        self.shared.log.info("Stopping stream...");
        let outcome = session
            .and_then(|s| s.handle)
            .map(|mut handle| self.shared.supervisor.terminate(&mut handle))
            .unwrap_or(TerminationOutcome::GracefulExit);

        // The encoder is gone, so the pump drains what is left and exits.
        join_pump(pump);

        match outcome {
            TerminationOutcome::GracefulExit => self.shared.log.info("Stream stopped successfully."),
            TerminationOutcome::ForcedExit => {
                self.shared.log.warn("Encoder did not respond, forcing termination.");
                self.shared.log.info("Stream forced to stop.");
            }
        }

        let mut st = self.shared.lock();
        self.shared.transition(&mut st, SessionState::Idle);
        Some(outcome)
    }

    /// Non-blocking liveness check of the encoder. An encoder found dead ends the
    /// session exactly as if its output had closed.
    pub fn poll(&self) -> SessionState {
        let id = {
            let mut st = self.shared.lock();
            if st.state != SessionState::Streaming {
                return st.state;
            }
            let exited = st
                .session
                .as_mut()
                .and_then(|s| s.handle.as_mut())
                .map(|h| matches!(h.poll(), ProcessStatus::Exited(_)))
                .unwrap_or(true);
            if !exited {
                return st.state;
            }
            st.session.as_ref().map(|s| s.id)
        };

        if let Some(id) = id {
            self.shared.end_unexpectedly(id, true);
        }
        self.state()
    }

    /// Leaves no encoder behind. Called on host exit.
    ///
    /// Blocks until the controller is `Idle`: a start in progress is allowed to
    /// finish and is then stopped, and a stop already running on another thread
    /// (including its forced kill) is waited for.
    pub fn shutdown(&self) {
        while self.shared.wait_settled() == SessionState::Streaming {
            self.stop();
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, st: &mut ControllerState, next: SessionState) {
        log::debug!("Session state {:?} -> {:?}", st.state, next);
        st.state = next;
        if next == SessionState::Idle {
            st.session = None;
        }
        self.changed.notify_all();
        let _ = self.events.send(next);
    }

    /// Waits out the in-between states and returns `Idle` or `Streaming`.
    /// `Failed` is never observed here since it is always followed by `Idle`
    /// under the same lock.
    fn wait_settled(&self) -> SessionState {
        let st = self
            .changed
            .wait_while(self.lock(), |st| {
                !matches!(st.state, SessionState::Idle | SessionState::Streaming)
            })
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        st.state
    }

    fn reject<T>(&self, error: StreamError) -> StreamResult<T> {
        self.log.error(error.to_string());
        Err(error)
    }

    /// `Failed -> Idle` for the attempt `id`. No encoder exists at this point.
    fn abort_start<T>(&self, id: Uuid, error: StreamError) -> StreamResult<T> {
        {
            let mut st = self.lock();
            if st.session.as_ref().is_some_and(|s| s.id == id) {
                self.transition(&mut st, SessionState::Failed);
                self.transition(&mut st, SessionState::Idle);
            }
        }
        self.reject(error)
    }

    /// Ends session `id` after its encoder went away without a stop command.
    /// `join` is false when called from the pump thread itself.
    fn end_unexpectedly(&self, id: Uuid, join: bool) {
        let (session, pump) = {
            let mut st = self.lock();
            let is_current = st.session.as_ref().is_some_and(|s| s.id == id);
            if st.state != SessionState::Streaming || !is_current {
                return;
            }
            let session = st.session.take();
            let pump = st.pump.take();
            self.transition(&mut st, SessionState::Stopping);
            (session, pump)
        };

        let mut status = ProcessStatus::Exited(None);
        if let Some(mut handle) = session.and_then(|s| s.handle) {
            // Output can close a moment before the process is reaped.
            handle.terminate(self.supervisor.grace_period());
            status = handle.last_status();
        }
        if join {
            join_pump(pump);
        }

        match status {
            ProcessStatus::Exited(Some(code)) => {
                self.log.warn(format!("Stream ended: encoder exited with code {}.", code))
            }
            _ => self.log.warn("Stream ended: encoder exited."),
        }

        let mut st = self.lock();
        self.transition(&mut st, SessionState::Idle);
    }
}

fn validate(source: &str, endpoint_url: &str, credential: &str) -> StreamResult<()> {
    if source.is_empty() {
        return Err(StreamError::MissingField("Video path"));
    }
    if endpoint_url.is_empty() {
        return Err(StreamError::MissingField("Server URL"));
    }
    if credential.is_empty() {
        return Err(StreamError::MissingField("Stream key"));
    }
    Ok(())
}

fn pump_output(shared: Arc<Shared>, id: Uuid, output: OutputLines) {
    for line in output {
        shared.log.info(line);
    }
    log::debug!("Encoder output closed for session {}", id);
    shared.end_unexpectedly(id, false);
}

fn join_pump(pump: Option<JoinHandle<()>>) {
    if let Some(pump) = pump {
        if pump.join().is_err() {
            log::error!("Encoder output pump panicked");
        }
    }
}
