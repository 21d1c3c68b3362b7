//! The data model handed back to callers: threads, stack frames, scopes,
//! variables, and the snapshot that bundles them together.

use std::collections::HashMap;

use serde_json::Value;

pub type ThreadId = i64;
pub type FrameId = i64;
pub type VariablesReference = i64;

/// Client-side session lifecycle, driven entirely by the protocol engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Initializing,
    Configuring,
    Running,
    Stopping,
    Stopped,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Started,
    Exited,
}

/// Opaque capabilities reported by `initialize`. Carried as a JSON value
/// since the engine never needs to interpret individual fields.
#[derive(Debug, Clone, Default)]
pub struct Capabilities(pub Value);

#[derive(Debug, Clone, PartialEq)]
pub struct StackFrame {
    pub id: FrameId,
    pub name: String,
    pub line: u32,
    pub column: u32,
    pub source_path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub variables_reference: VariablesReference,
    pub name: String,
    pub expensive: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub type_name: String,
    pub variables_reference: VariablesReference,
}

/// An immutable snapshot of the debuggee's paused state, handed to the
/// caller by `resume`/`step_over`/etc. Each stop produces its own snapshot;
/// mutating a later stop never touches one already returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PausedState {
    pub paused_thread_id: Option<ThreadId>,
    pub stack_per_thread: HashMap<ThreadId, Vec<StackFrame>>,
    pub scopes_per_frame: HashMap<FrameId, Vec<Scope>>,
    pub variables_per_ref: HashMap<VariablesReference, Vec<Variable>>,
}

pub(crate) fn frame_from_json(value: &Value) -> StackFrame {
    StackFrame {
        id: value.get("id").and_then(Value::as_i64).unwrap_or(0),
        name: value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        line: value.get("line").and_then(Value::as_u64).unwrap_or(0) as u32,
        column: value.get("column").and_then(Value::as_u64).unwrap_or(0) as u32,
        source_path: value
            .get("source")
            .and_then(|s| s.get("path"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

pub(crate) fn scope_from_json(value: &Value) -> Scope {
    Scope {
        variables_reference: value
            .get("variablesReference")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        name: value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        expensive: value
            .get("expensive")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }
}

pub(crate) fn variable_from_json(value: &Value) -> Variable {
    Variable {
        name: value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        value: value
            .get("value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        type_name: value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        variables_reference: value
            .get("variablesReference")
            .and_then(Value::as_i64)
            .unwrap_or(0),
    }
}
