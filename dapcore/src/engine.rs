//! Protocol engine (component D): the single-threaded DAP state machine.
//!
//! Runs on its own thread, consuming a single inbound queue fed by both the
//! transport's reader thread (decoded messages, and a sentinel when the
//! reader exits) and the session facade (user commands). All protocol state
//! -- the pending-request table, capabilities, per-stop collections, and the
//! session state machine itself -- lives here and nowhere else.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde_json::{json, Value};

use crate::config::{LaunchConfig, LaunchKind};
use crate::correlator::{Correlator, PendingRequest};
use crate::error::DapError;
use crate::message::{EventMessage, Message, ResponseMessage};
use crate::model::{self, Capabilities, FrameId, PausedState, SessionState, ThreadId, ThreadStatus};
use crate::output::OutputSink;
use crate::transport::{EngineEvent, Transport};

/// Nested structured variables are expanded eagerly up to this many levels
/// below the scope they belong to; deeper references are left collapsed.
/// See SPEC_FULL.md section 9 ("Variable expansion bound").
const MAX_EXPANSION_DEPTH: u32 = 8;

pub(crate) enum EngineCommand {
    Resume,
    StepOver,
    StepIn,
    StepOut,
    SetBreakpoints { file: String, lines: Vec<u32> },
    Shutdown,
}

/// The result of driving the engine to its next quiescent point, published
/// through [`SessionShared`] and consumed by the blocking facade.
#[derive(Clone)]
pub(crate) enum Outcome {
    Pending,
    Paused(PausedState),
    Terminated,
    Failed(DapError),
}

/// Condvar-guarded mailbox the engine publishes into and the facade blocks
/// on. This is the entire caller/engine handoff described in SPEC_FULL.md
/// section 5.
///
/// `capabilities` and `thread_status` ride alongside the outcome mailbox
/// rather than inside it: both are read continuously by the facade (not
/// waited on), so they're plain last-value caches instead of part of the
/// condvar protocol.
pub(crate) struct SessionShared {
    outcome: Mutex<Outcome>,
    condvar: Condvar,
    capabilities: Mutex<Capabilities>,
    thread_status: Mutex<HashMap<ThreadId, ThreadStatus>>,
}

impl SessionShared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(SessionShared {
            outcome: Mutex::new(Outcome::Pending),
            condvar: Condvar::new(),
            capabilities: Mutex::new(Capabilities::default()),
            thread_status: Mutex::new(HashMap::new()),
        })
    }

    fn publish(&self, outcome: Outcome) {
        let mut guard = self.outcome.lock();
        *guard = outcome;
        self.condvar.notify_all();
    }

    pub(crate) fn reset_pending(&self) {
        *self.outcome.lock() = Outcome::Pending;
    }

    /// Blocks until a terminal outcome is published. Used after issuing a
    /// resume/step command, where the spec mandates no timeout.
    pub(crate) fn wait(&self) -> Outcome {
        let mut guard = self.outcome.lock();
        while matches!(*guard, Outcome::Pending) {
            self.condvar.wait(&mut guard);
        }
        guard.clone()
    }

    /// As [`Self::wait`], but bounded -- used for the initial handshake.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        let mut guard = self.outcome.lock();
        let deadline = Instant::now() + timeout;
        while matches!(*guard, Outcome::Pending) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            self.condvar.wait_for(&mut guard, remaining);
        }
        if matches!(*guard, Outcome::Pending) {
            None
        } else {
            Some(guard.clone())
        }
    }

    fn set_capabilities(&self, capabilities: Capabilities) {
        *self.capabilities.lock() = capabilities;
    }

    pub(crate) fn capabilities(&self) -> Capabilities {
        self.capabilities.lock().clone()
    }

    fn set_thread_status(&self, thread_id: ThreadId, status: ThreadStatus) {
        self.thread_status.lock().insert(thread_id, status);
    }

    pub(crate) fn thread_status(&self) -> HashMap<ThreadId, ThreadStatus> {
        self.thread_status.lock().clone()
    }
}

#[derive(Clone, Copy)]
struct FetchMeta {
    epoch: u64,
    depth: u32,
}

pub(crate) struct Engine {
    transport: Transport,
    correlator: Correlator,
    state: SessionState,
    config: LaunchConfig,
    breakpoints: HashMap<String, Vec<u32>>,
    configuring_breakpoints_remaining: usize,

    stack_per_thread: HashMap<ThreadId, Vec<crate::model::StackFrame>>,
    scopes_per_frame: HashMap<FrameId, Vec<crate::model::Scope>>,
    variables_per_ref: HashMap<crate::model::VariablesReference, Vec<crate::model::Variable>>,
    paused_thread_id: Option<ThreadId>,

    current_epoch: u64,
    pending_fetch_count: usize,
    visited_refs: HashSet<crate::model::VariablesReference>,
    fetch_meta: HashMap<u64, FetchMeta>,

    output_sink: Arc<dyn OutputSink>,
    shared: Arc<SessionShared>,
}

impl Engine {
    pub(crate) fn new(
        transport: Transport,
        config: LaunchConfig,
        breakpoints: HashMap<String, Vec<u32>>,
        output_sink: Arc<dyn OutputSink>,
        shared: Arc<SessionShared>,
    ) -> Self {
        Engine {
            transport,
            correlator: Correlator::new(),
            state: SessionState::Connecting,
            config,
            breakpoints,
            configuring_breakpoints_remaining: 0,
            stack_per_thread: HashMap::new(),
            scopes_per_frame: HashMap::new(),
            variables_per_ref: HashMap::new(),
            paused_thread_id: None,
            current_epoch: 0,
            pending_fetch_count: 0,
            visited_refs: HashSet::new(),
            fetch_meta: HashMap::new(),
            output_sink,
            shared,
        }
    }

    /// Runs the state machine to completion. Blocks the calling thread
    /// forever (or until the session terminates); callers run this on a
    /// dedicated thread.
    pub(crate) fn run(mut self, events: Receiver<EngineEvent>) {
        if let Err(e) = self.start_handshake() {
            self.fail(e);
            return;
        }

        for event in events.iter() {
            match event {
                EngineEvent::Inbound(msg) => {
                    if let Err(e) = self.handle_message(msg) {
                        self.fail(e);
                        return;
                    }
                    if matches!(self.state, SessionState::Terminated) {
                        return;
                    }
                }
                EngineEvent::ReaderClosed => {
                    self.terminate_due_to_transport_close();
                    return;
                }
                EngineEvent::Command(EngineCommand::Shutdown) => {
                    let _ = self.send_request(
                        "disconnect",
                        Some(json!({ "terminateDebuggee": true })),
                    );
                    return;
                }
                EngineEvent::Command(cmd) => {
                    if let Err(e) = self.handle_command(cmd) {
                        self.fail(e);
                        return;
                    }
                }
            }
        }

        // Every sender dropped without an explicit ReaderClosed/Shutdown:
        // treat it the same as the transport closing.
        self.terminate_due_to_transport_close();
    }

    fn send_request(&mut self, command: &str, arguments: Option<Value>) -> Result<u64, DapError> {
        let request = self.correlator.issue(command, arguments);
        log::trace!("--> {} seq={}", command, request.seq);
        self.transport.send(&Message::Request(request.clone()))?;
        Ok(request.seq)
    }

    fn start_handshake(&mut self) -> Result<(), DapError> {
        self.state = SessionState::Initializing;
        let args = json!({
            "adapterID": "dap-gui",
            "clientName": "DAP GUI",
            "pathFormat": "path",
            "supportsRunInTerminalRequest": false,
            "supportsStartDebuggingRequest": false,
        });
        self.send_request("initialize", Some(args))?;
        Ok(())
    }

    fn handle_message(&mut self, msg: Message) -> Result<(), DapError> {
        match msg {
            Message::Response(resp) => self.handle_response(resp),
            Message::Event(evt) => self.handle_event(evt),
            Message::Request(req) => Err(DapError::ProtocolError(format!(
                "adapter sent an unexpected request: {}",
                req.command
            ))),
        }
    }

    fn handle_response(&mut self, resp: ResponseMessage) -> Result<(), DapError> {
        let Some(pending) = self.correlator.resolve(&resp) else {
            log::warn!(
                "discarding response for unknown request_seq={}",
                resp.request_seq
            );
            return Ok(());
        };
        let meta = self.fetch_meta.remove(&pending.seq);

        match pending.command.as_str() {
            "initialize" => self.on_initialize_response(resp),
            "attach" => self.on_launch_response("attach", resp),
            "launch" => self.on_launch_response("launch", resp),
            "setBreakpoints" => self.on_set_breakpoints_response(resp),
            "setFunctionBreakpoints" => self.on_set_function_breakpoints_response(resp),
            "configurationDone" => self.on_configuration_done_response(resp),
            "threads" => self.on_threads_response(resp, meta),
            "stackTrace" => self.on_stack_trace_response(pending, resp, meta),
            "scopes" => self.on_scopes_response(pending, resp, meta),
            "variables" => self.on_variables_response(pending, resp, meta),
            "continue" | "next" | "stepIn" | "stepOut" => {
                self.on_step_response(pending.command.as_str(), resp)
            }
            "disconnect" => Ok(()),
            other => {
                log::warn!("unknown response command {other}");
                Ok(())
            }
        }
    }

    fn on_initialize_response(&mut self, resp: ResponseMessage) -> Result<(), DapError> {
        if !resp.success {
            return Err(DapError::HandshakeFailed {
                command: "initialize".to_string(),
                message: resp.message.unwrap_or_default(),
            });
        }
        self.shared
            .set_capabilities(Capabilities(resp.body.unwrap_or(Value::Null)));

        let mut args = json!({});
        if let Some(jmc) = self.config.just_my_code {
            args["justMyCode"] = json!(jmc);
        }
        if let Some(pm) = &self.config.path_mappings {
            args["pathMappings"] = pm.clone();
        }

        match self.config.kind {
            LaunchKind::Attach => {
                if let Some(connect) = &self.config.connect {
                    args["host"] = json!(connect.host);
                    args["port"] = json!(connect.port);
                }
                self.send_request("attach", Some(args))?;
            }
            LaunchKind::Launch => {
                if let Some(program) = &self.config.program {
                    args["program"] = json!(program);
                }
                self.send_request("launch", Some(args))?;
            }
        }

        self.state = SessionState::Configuring;
        Ok(())
    }

    fn on_launch_response(&mut self, command: &str, resp: ResponseMessage) -> Result<(), DapError> {
        if !resp.success {
            return Err(DapError::HandshakeFailed {
                command: command.to_string(),
                message: resp.message.unwrap_or_default(),
            });
        }
        // Real progress happens on the `initialized` event.
        Ok(())
    }

    fn on_initialized_event(&mut self) -> Result<(), DapError> {
        self.configuring_breakpoints_remaining = self.breakpoints.len();
        for (file, lines) in self.breakpoints.clone() {
            self.send_set_breakpoints(&file, &lines)?;
        }
        if self.configuring_breakpoints_remaining == 0 {
            self.send_request("setFunctionBreakpoints", Some(json!({ "breakpoints": [] })))?;
        }
        Ok(())
    }

    fn send_set_breakpoints(&mut self, file: &str, lines: &[u32]) -> Result<u64, DapError> {
        let breakpoints: Vec<Value> = lines.iter().map(|line| json!({ "line": line })).collect();
        let args = json!({
            "source": { "path": file, "name": source_name(file) },
            "breakpoints": breakpoints,
            "sourceModified": false,
        });
        self.send_request("setBreakpoints", Some(args))
    }

    fn on_set_breakpoints_response(&mut self, resp: ResponseMessage) -> Result<(), DapError> {
        if !resp.success {
            return Err(DapError::HandshakeFailed {
                command: "setBreakpoints".to_string(),
                message: resp.message.unwrap_or_default(),
            });
        }
        if matches!(self.state, SessionState::Configuring) {
            self.configuring_breakpoints_remaining = self.configuring_breakpoints_remaining.saturating_sub(1);
            if self.configuring_breakpoints_remaining == 0 {
                self.send_request("setFunctionBreakpoints", Some(json!({ "breakpoints": [] })))?;
            }
        }
        Ok(())
    }

    fn on_set_function_breakpoints_response(&mut self, resp: ResponseMessage) -> Result<(), DapError> {
        if !resp.success {
            return Err(DapError::HandshakeFailed {
                command: "setFunctionBreakpoints".to_string(),
                message: resp.message.unwrap_or_default(),
            });
        }
        if matches!(self.state, SessionState::Configuring) {
            self.send_request("configurationDone", Some(json!({})))?;
        }
        Ok(())
    }

    fn on_configuration_done_response(&mut self, resp: ResponseMessage) -> Result<(), DapError> {
        if !resp.success {
            return Err(DapError::HandshakeFailed {
                command: "configurationDone".to_string(),
                message: resp.message.unwrap_or_default(),
            });
        }
        self.state = SessionState::Running;
        Ok(())
    }

    fn on_threads_response(
        &mut self,
        resp: ResponseMessage,
        meta: Option<FetchMeta>,
    ) -> Result<(), DapError> {
        let Some(meta) = meta else { return Ok(()) };
        if meta.epoch != self.current_epoch {
            return Ok(());
        }
        self.pending_fetch_count = self.pending_fetch_count.saturating_sub(1);

        if !resp.success {
            log::warn!("threads request failed: {:?}", resp.message);
            self.check_stop_complete();
            return Ok(());
        }

        let threads = resp
            .body
            .as_ref()
            .and_then(|b| b.get("threads"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for thread in &threads {
            let Some(thread_id) = thread.get("id").and_then(Value::as_i64) else {
                continue;
            };
            self.stack_per_thread.entry(thread_id).or_default();
            let args = json!({ "threadId": thread_id, "startFrame": 0, "levels": 0 });
            let seq = self.send_request("stackTrace", Some(args))?;
            self.fetch_meta.insert(
                seq,
                FetchMeta {
                    epoch: self.current_epoch,
                    depth: 0,
                },
            );
            self.pending_fetch_count += 1;
        }

        self.check_stop_complete();
        Ok(())
    }

    fn on_stack_trace_response(
        &mut self,
        pending: PendingRequest,
        resp: ResponseMessage,
        meta: Option<FetchMeta>,
    ) -> Result<(), DapError> {
        let Some(meta) = meta else { return Ok(()) };
        if meta.epoch != self.current_epoch {
            return Ok(());
        }
        self.pending_fetch_count = self.pending_fetch_count.saturating_sub(1);

        let thread_id = pending
            .arguments
            .as_ref()
            .and_then(|a| a.get("threadId"))
            .and_then(Value::as_i64)
            .unwrap_or(0);

        if !resp.success {
            log::warn!("stackTrace failed for thread {thread_id}: {:?}", resp.message);
            self.stack_per_thread.insert(thread_id, Vec::new());
            self.check_stop_complete();
            return Ok(());
        }

        let frames_json = resp
            .body
            .as_ref()
            .and_then(|b| b.get("stackFrames"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let frames: Vec<crate::model::StackFrame> =
            frames_json.iter().map(model::frame_from_json).collect();

        for frame in &frames {
            let args = json!({ "frameId": frame.id });
            let seq = self.send_request("scopes", Some(args))?;
            self.fetch_meta.insert(
                seq,
                FetchMeta {
                    epoch: self.current_epoch,
                    depth: 0,
                },
            );
            self.pending_fetch_count += 1;
        }

        self.stack_per_thread.insert(thread_id, frames);
        self.check_stop_complete();
        Ok(())
    }

    fn on_scopes_response(
        &mut self,
        pending: PendingRequest,
        resp: ResponseMessage,
        meta: Option<FetchMeta>,
    ) -> Result<(), DapError> {
        let Some(meta) = meta else { return Ok(()) };
        if meta.epoch != self.current_epoch {
            return Ok(());
        }
        self.pending_fetch_count = self.pending_fetch_count.saturating_sub(1);

        let frame_id = pending
            .arguments
            .as_ref()
            .and_then(|a| a.get("frameId"))
            .and_then(Value::as_i64)
            .unwrap_or(0);

        if !resp.success {
            log::warn!("scopes failed for frame {frame_id}: {:?}", resp.message);
            self.scopes_per_frame.insert(frame_id, Vec::new());
            self.check_stop_complete();
            return Ok(());
        }

        let scopes_json = resp
            .body
            .as_ref()
            .and_then(|b| b.get("scopes"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let scopes: Vec<crate::model::Scope> = scopes_json.iter().map(model::scope_from_json).collect();

        for scope in &scopes {
            if scope.variables_reference > 0
                && !scope.expensive
                && self.visited_refs.insert(scope.variables_reference)
            {
                let args = json!({ "variablesReference": scope.variables_reference });
                let seq = self.send_request("variables", Some(args))?;
                self.fetch_meta.insert(
                    seq,
                    FetchMeta {
                        epoch: self.current_epoch,
                        depth: 0,
                    },
                );
                self.pending_fetch_count += 1;
            }
        }

        self.scopes_per_frame.insert(frame_id, scopes);
        self.check_stop_complete();
        Ok(())
    }

    fn on_variables_response(
        &mut self,
        pending: PendingRequest,
        resp: ResponseMessage,
        meta: Option<FetchMeta>,
    ) -> Result<(), DapError> {
        let Some(meta) = meta else { return Ok(()) };
        if meta.epoch != self.current_epoch {
            return Ok(());
        }
        self.pending_fetch_count = self.pending_fetch_count.saturating_sub(1);

        let reference = pending
            .arguments
            .as_ref()
            .and_then(|a| a.get("variablesReference"))
            .and_then(Value::as_i64)
            .unwrap_or(0);

        if !resp.success {
            log::warn!("variables failed for ref {reference}: {:?}", resp.message);
            self.variables_per_ref.insert(reference, Vec::new());
            self.check_stop_complete();
            return Ok(());
        }

        let vars_json = resp
            .body
            .as_ref()
            .and_then(|b| b.get("variables"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let variables: Vec<crate::model::Variable> =
            vars_json.iter().map(model::variable_from_json).collect();

        if meta.depth < MAX_EXPANSION_DEPTH {
            for var in &variables {
                if var.variables_reference > 0 && self.visited_refs.insert(var.variables_reference) {
                    let args = json!({ "variablesReference": var.variables_reference });
                    let seq = self.send_request("variables", Some(args))?;
                    self.fetch_meta.insert(
                        seq,
                        FetchMeta {
                            epoch: self.current_epoch,
                            depth: meta.depth + 1,
                        },
                    );
                    self.pending_fetch_count += 1;
                }
            }
        }

        self.variables_per_ref.insert(reference, variables);
        self.check_stop_complete();
        Ok(())
    }

    fn on_step_response(&mut self, command: &str, resp: ResponseMessage) -> Result<(), DapError> {
        if !resp.success {
            log::warn!("{command} request failed: {:?}", resp.message);
        }
        Ok(())
    }

    fn check_stop_complete(&mut self) {
        if self.pending_fetch_count == 0 && matches!(self.state, SessionState::Stopping) {
            self.state = SessionState::Stopped;
            let snapshot = PausedState {
                paused_thread_id: self.paused_thread_id,
                stack_per_thread: self.stack_per_thread.clone(),
                scopes_per_frame: self.scopes_per_frame.clone(),
                variables_per_ref: self.variables_per_ref.clone(),
            };
            log::debug!("session stopped, thread={:?}", self.paused_thread_id);
            self.shared.publish(Outcome::Paused(snapshot));
        }
    }

    fn handle_event(&mut self, evt: EventMessage) -> Result<(), DapError> {
        log::trace!("<-- event {} seq={}", evt.event, evt.seq);
        match evt.event.as_str() {
            "initialized" => self.on_initialized_event(),
            "stopped" => self.on_stopped_event(evt.body),
            "continued" => Ok(()),
            "thread" => {
                self.on_thread_event(evt.body);
                Ok(())
            }
            "output" => {
                self.on_output_event(evt.body);
                Ok(())
            }
            "terminated" => {
                self.terminate_normally();
                Ok(())
            }
            "exited" => {
                log::debug!("debuggee exited: {:?}", evt.body);
                Ok(())
            }
            "breakpoint" | "module" | "loadedSource" => Ok(()),
            other => {
                log::debug!("unhandled event {other}");
                Ok(())
            }
        }
    }

    fn on_stopped_event(&mut self, body: Option<Value>) -> Result<(), DapError> {
        let thread_id = body
            .as_ref()
            .and_then(|b| b.get("threadId"))
            .and_then(Value::as_i64);

        self.paused_thread_id = thread_id;
        self.stack_per_thread.clear();
        self.scopes_per_frame.clear();
        self.variables_per_ref.clear();
        self.visited_refs.clear();
        self.current_epoch += 1;
        self.state = SessionState::Stopping;

        let seq = self.send_request("threads", None)?;
        self.fetch_meta.insert(
            seq,
            FetchMeta {
                epoch: self.current_epoch,
                depth: 0,
            },
        );
        self.pending_fetch_count = 1;
        Ok(())
    }

    fn on_thread_event(&mut self, body: Option<Value>) {
        let Some(body) = body else { return };
        let Some(thread_id) = body.get("threadId").and_then(Value::as_i64) else {
            return;
        };
        let reason = body.get("reason").and_then(Value::as_str).unwrap_or("");
        let status = if reason == "exited" {
            ThreadStatus::Exited
        } else {
            ThreadStatus::Started
        };
        self.shared.set_thread_status(thread_id, status);
    }

    fn on_output_event(&mut self, body: Option<Value>) {
        let Some(body) = body else { return };
        let category = body.get("category").and_then(Value::as_str).unwrap_or("stdout");
        let text = body.get("output").and_then(Value::as_str).unwrap_or("");
        self.output_sink.output(category, text);
    }

    fn terminate_normally(&mut self) {
        self.state = SessionState::Terminated;
        self.shared.publish(Outcome::Terminated);
    }

    fn terminate_due_to_transport_close(&mut self) {
        if matches!(self.state, SessionState::Terminated) {
            return;
        }
        log::debug!("transport closed, ending session");
        self.state = SessionState::Terminated;
        self.shared.publish(Outcome::Terminated);
    }

    fn fail(&mut self, e: DapError) {
        log::error!("session failed: {e}");
        self.state = SessionState::Terminated;
        self.shared.publish(Outcome::Failed(e));
    }

    fn handle_command(&mut self, cmd: EngineCommand) -> Result<(), DapError> {
        match cmd {
            EngineCommand::Resume => self.issue_run_command("continue"),
            EngineCommand::StepOver => self.issue_run_command("next"),
            EngineCommand::StepIn => self.issue_run_command("stepIn"),
            EngineCommand::StepOut => self.issue_run_command("stepOut"),
            EngineCommand::SetBreakpoints { file, lines } => self.issue_set_breakpoints(file, lines),
            EngineCommand::Shutdown => unreachable!("handled in run()"),
        }
    }

    fn issue_run_command(&mut self, command: &str) -> Result<(), DapError> {
        if !matches!(self.state, SessionState::Stopped) {
            log::warn!("{command} ignored: session is not stopped");
            return Ok(());
        }
        let Some(thread_id) = self.paused_thread_id else {
            log::warn!("{command} ignored: no paused thread");
            return Ok(());
        };
        self.send_request(command, Some(json!({ "threadId": thread_id })))?;
        self.state = SessionState::Running;
        Ok(())
    }

    fn issue_set_breakpoints(&mut self, file: String, lines: Vec<u32>) -> Result<(), DapError> {
        self.breakpoints.insert(file.clone(), lines.clone());
        self.send_set_breakpoints(&file, &lines)?;
        Ok(())
    }
}

fn source_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}
