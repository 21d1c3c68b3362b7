//! Minimal scripted DAP adapter used by the integration tests.
//!
//! Deliberately independent of `dapcore`'s internal codec: tests exercise the
//! crate only through its public API, so the peer on the other end of the
//! socket gets its own tiny framing implementation.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use serde_json::{json, Value};

pub enum Step {
    ExpectRequest(&'static str),
    RespondSuccess(Option<Value>),
    RespondFailure(&'static str),
    SendEvent(&'static str, Option<Value>),
}

pub struct StubAdapter {
    pub port: u16,
    handle: JoinHandle<()>,
}

impl StubAdapter {
    pub fn join(self) {
        self.handle.join().expect("stub adapter thread panicked");
    }
}

/// Binds an ephemeral local port and runs `script` against the first
/// connection it receives, on a background thread.
pub fn spawn(script: Vec<Step>) -> StubAdapter {
    // Each test binary calls this independently; ignore the "already
    // initialized" error from a second test in the same binary.
    let _ = env_logger::try_init();

    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind stub adapter");
    let port = listener.local_addr().expect("local addr").port();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept client connection");
        run_script(stream, script);
    });

    StubAdapter { port, handle }
}

fn run_script(stream: TcpStream, script: Vec<Step>) {
    let mut writer = stream.try_clone().expect("clone stream for writing");
    let mut reader = BufReader::new(stream);
    let mut last_request: Option<Value> = None;
    let mut seq: u64 = 10_000;

    for step in script {
        match step {
            Step::ExpectRequest(command) => {
                let msg = read_message(&mut reader);
                assert_eq!(
                    msg.get("command").and_then(Value::as_str),
                    Some(command),
                    "expected request {command:?}, got {msg}"
                );
                last_request = Some(msg);
            }
            Step::RespondSuccess(body) => {
                let req = last_request
                    .as_ref()
                    .expect("RespondSuccess with no pending request");
                seq += 1;
                let resp = json!({
                    "type": "response",
                    "seq": seq,
                    "request_seq": req["seq"],
                    "success": true,
                    "command": req["command"],
                    "body": body,
                });
                write_message(&mut writer, &resp);
            }
            Step::RespondFailure(message) => {
                let req = last_request
                    .as_ref()
                    .expect("RespondFailure with no pending request");
                seq += 1;
                let resp = json!({
                    "type": "response",
                    "seq": seq,
                    "request_seq": req["seq"],
                    "success": false,
                    "command": req["command"],
                    "message": message,
                });
                write_message(&mut writer, &resp);
            }
            Step::SendEvent(event, body) => {
                seq += 1;
                let evt = json!({
                    "type": "event",
                    "seq": seq,
                    "event": event,
                    "body": body,
                });
                write_message(&mut writer, &evt);
            }
        }
    }
}

fn read_message(reader: &mut BufReader<TcpStream>) -> Value {
    let mut content_length = None;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).expect("read header line");
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some(rest) = trimmed.strip_prefix("Content-Length: ") {
            content_length = Some(rest.parse::<usize>().expect("valid Content-Length"));
        }
    }
    let length = content_length.expect("message had no Content-Length header");
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).expect("read message body");
    serde_json::from_slice(&body).expect("message body is valid JSON")
}

fn write_message(writer: &mut TcpStream, value: &Value) {
    let body = serde_json::to_vec(value).expect("serialize message");
    write!(writer, "Content-Length: {}\r\n\r\n", body.len()).expect("write header");
    writer.write_all(&body).expect("write body");
    writer.flush().expect("flush");
}

/// The handshake through to a stop on `thread_id`, with an empty call stack
/// so the fan-out ends after `stackTrace` without needing scopes/variables
/// steps. Handy for tests whose focus is resume/step rather than snapshot
/// shape.
pub fn handshake_then_bare_stop(thread_id: i64) -> Vec<Step> {
    vec![
        Step::ExpectRequest("initialize"),
        Step::RespondSuccess(Some(json!({}))),
        Step::ExpectRequest("launch"),
        Step::RespondSuccess(None),
        Step::SendEvent("initialized", None),
        Step::ExpectRequest("setFunctionBreakpoints"),
        Step::RespondSuccess(None),
        Step::ExpectRequest("configurationDone"),
        Step::RespondSuccess(None),
        Step::SendEvent(
            "stopped",
            Some(json!({ "threadId": thread_id, "reason": "breakpoint" })),
        ),
        Step::ExpectRequest("threads"),
        Step::RespondSuccess(Some(json!({ "threads": [{ "id": thread_id, "name": "main" }] }))),
        Step::ExpectRequest("stackTrace"),
        Step::RespondSuccess(Some(json!({ "stackFrames": [] }))),
    ]
}
