//! `dapcore`: a Debug Adapter Protocol session engine.
//!
//! Connects to a running debug adapter over TCP, drives the
//! initialize/launch-or-attach/configure handshake, and hands callers a
//! synchronous, blocking facade ([`DapSession`]) over what is internally an
//! event-driven state machine. See `SPEC_FULL.md` in the repository root for
//! the full protocol and concurrency design.

mod codec;
mod config;
mod correlator;
mod engine;
mod error;
mod message;
mod model;
mod output;
mod session;
mod transport;

pub use config::{ConnectEndpoint, LaunchConfig, LaunchKind};
pub use error::{DapError, Result};
pub use model::{
    Capabilities, FrameId, PausedState, Scope, SessionState, StackFrame, ThreadId, ThreadStatus,
    Variable, VariablesReference,
};
pub use output::{DefaultOutputSink, OutputSink};
pub use session::{DapSession, SessionParams};
