//! Session facade (component E): the synchronous, blocking API callers see.
//!
//! Everything here does is hand a command to the engine thread and block on
//! the condvar until it publishes the next outcome. No protocol state lives
//! in this module.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{self, LaunchConfig};
use crate::engine::{Engine, EngineCommand, Outcome, SessionShared};
use crate::error::DapError;
use crate::model::{Capabilities, PausedState, ThreadId, ThreadStatus};
use crate::output::{self, OutputSink};
use crate::transport::{EngineEvent, Transport};

/// How long [`DapSession::new`] waits for the adapter to either report its
/// first stop or terminate before giving up.
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Parameters needed to start a session, gathered up front so construction
/// has one fallible entry point instead of a builder with partially valid
/// intermediate states.
pub struct SessionParams {
    pub host: String,
    pub port: u16,
    pub config_path: Option<std::path::PathBuf>,
    pub config_name: Option<String>,
    pub program: Option<String>,
    pub file: Option<String>,
    pub breakpoints: Vec<u32>,
    pub output_sink: Option<Arc<dyn OutputSink>>,
    pub handshake_timeout: Option<Duration>,
}

impl Default for SessionParams {
    fn default() -> Self {
        SessionParams {
            host: "127.0.0.1".to_string(),
            port: 5678,
            config_path: None,
            config_name: None,
            program: None,
            file: None,
            breakpoints: Vec::new(),
            output_sink: None,
            handshake_timeout: None,
        }
    }
}

/// A live debug session. Every method blocks the calling thread until the
/// engine reaches its next quiescent point; none of them touch protocol
/// state directly.
pub struct DapSession {
    shared: Arc<SessionShared>,
    command_tx: Sender<EngineEvent>,
    terminated: AtomicBool,
    last_error: Mutex<Option<DapError>>,
    initial_snapshot: Option<PausedState>,
}

impl DapSession {
    /// Connects to the adapter, drives the handshake, and blocks until the
    /// first stop (or immediate termination). Mirrors
    /// `DebugSession.__init__(breakpoints, file, config_path, config_name, program)`.
    pub fn new(params: SessionParams) -> Result<Self, DapError> {
        let launch_config = match &params.config_path {
            Some(path) => config::load(
                path,
                params.config_name.as_deref(),
                params.program.clone(),
            )?,
            None => LaunchConfig {
                name: "ad-hoc".to_string(),
                kind: crate::config::LaunchKind::Launch,
                program: params.program.clone(),
                connect: None,
                just_my_code: None,
                path_mappings: None,
            },
        };

        let mut breakpoints = HashMap::new();
        if let (Some(file), false) = (&params.file, params.breakpoints.is_empty()) {
            breakpoints.insert(file.clone(), params.breakpoints.clone());
        }

        let mut transport = Transport::connect(&params.host, params.port)?;
        let (tx, rx) = mpsc::channel();

        transport.spawn_reader(tx.clone());

        let shared = SessionShared::new();
        let output_sink = params.output_sink.unwrap_or_else(output::boxed_default);
        let engine = Engine::new(transport, launch_config, breakpoints, output_sink, shared.clone());

        thread::spawn(move || engine.run(rx));

        let timeout = params.handshake_timeout.unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT);
        let outcome = shared
            .wait_timeout(timeout)
            .ok_or(DapError::HandshakeTimeout(timeout))?;

        let (terminated, initial_snapshot) = match outcome {
            Outcome::Paused(snapshot) => (false, Some(snapshot)),
            Outcome::Terminated => (true, None),
            Outcome::Failed(e) => return Err(e),
            Outcome::Pending => unreachable!("wait_timeout never returns Pending"),
        };

        Ok(DapSession {
            shared,
            command_tx: tx,
            terminated: AtomicBool::new(terminated),
            last_error: Mutex::new(None),
            initial_snapshot,
        })
    }

    /// The snapshot captured before `new` returned: `Some` if the adapter
    /// reported a stop during the handshake, `None` if it ran straight to
    /// termination (e.g. an empty program with no breakpoints).
    pub fn initial_snapshot(&self) -> Option<&PausedState> {
        self.initial_snapshot.as_ref()
    }

    /// The error that ended the session, if it ended abnormally.
    pub fn last_error(&self) -> Option<DapError> {
        self.last_error.lock().clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// The capabilities the adapter reported in response to `initialize`.
    /// Empty until the handshake has gotten that far.
    pub fn capabilities(&self) -> Capabilities {
        self.shared.capabilities()
    }

    /// The most recently observed status of each thread the adapter has
    /// mentioned in a `thread` event.
    pub fn thread_status(&self) -> HashMap<ThreadId, ThreadStatus> {
        self.shared.thread_status()
    }

    /// Resumes the paused thread and blocks until the next stop or
    /// termination. Returns `None` once the session has terminated --
    /// including if it was already terminated when called.
    pub fn resume(&self) -> Option<PausedState> {
        self.run_to_next_stop(EngineCommand::Resume)
    }

    pub fn step_over(&self) -> Option<PausedState> {
        self.run_to_next_stop(EngineCommand::StepOver)
    }

    pub fn step_in(&self) -> Option<PausedState> {
        self.run_to_next_stop(EngineCommand::StepIn)
    }

    pub fn step_out(&self) -> Option<PausedState> {
        self.run_to_next_stop(EngineCommand::StepOut)
    }

    fn run_to_next_stop(&self, command: EngineCommand) -> Option<PausedState> {
        if self.terminated.load(Ordering::SeqCst) {
            return None;
        }
        self.shared.reset_pending();
        if self.command_tx.send(EngineEvent::Command(command)).is_err() {
            self.terminated.store(true, Ordering::SeqCst);
            return None;
        }

        match self.shared.wait() {
            Outcome::Paused(snapshot) => Some(snapshot),
            Outcome::Terminated => {
                self.terminated.store(true, Ordering::SeqCst);
                None
            }
            Outcome::Failed(e) => {
                self.terminated.store(true, Ordering::SeqCst);
                *self.last_error.lock() = Some(e);
                None
            }
            Outcome::Pending => unreachable!("wait never returns Pending"),
        }
    }

    /// Adds a breakpoint file/line set. Fire-and-forget: failures surface
    /// only as the session terminating, matching `setBreakpoints`'s status
    /// as a handshake-class request.
    pub fn set_breakpoints(&self, file: impl Into<String>, lines: Vec<u32>) {
        if self.terminated.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.command_tx.send(EngineEvent::Command(EngineCommand::SetBreakpoints {
            file: file.into(),
            lines,
        }));
    }

    /// Best-effort `disconnect`. Does not block; the engine thread tears
    /// itself down once it has sent the request.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.command_tx.send(EngineEvent::Command(EngineCommand::Shutdown));
    }
}

impl Drop for DapSession {
    fn drop(&mut self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            let _ = self.command_tx.send(EngineEvent::Command(EngineCommand::Shutdown));
        }
    }
}
