//! Scenario: a single breakpoint is configured, the adapter stops there, and
//! the client fans out threads/stackTrace/scopes/variables before
//! `DapSession::new` returns.

mod common;

use std::time::Duration;

use dapcore::{DapSession, SessionParams};

use common::Step;

#[test]
fn new_returns_a_full_snapshot_of_the_first_stop() {
    let adapter = common::spawn(vec![
        Step::ExpectRequest("initialize"),
        Step::RespondSuccess(Some(serde_json::json!({}))),
        Step::ExpectRequest("launch"),
        Step::RespondSuccess(None),
        Step::SendEvent("initialized", None),
        Step::ExpectRequest("setBreakpoints"),
        Step::RespondSuccess(Some(serde_json::json!({ "breakpoints": [{ "verified": true }] }))),
        Step::ExpectRequest("setFunctionBreakpoints"),
        Step::RespondSuccess(None),
        Step::ExpectRequest("configurationDone"),
        Step::RespondSuccess(None),
        Step::SendEvent(
            "stopped",
            Some(serde_json::json!({ "threadId": 1, "reason": "breakpoint" })),
        ),
        Step::ExpectRequest("threads"),
        Step::RespondSuccess(Some(serde_json::json!({
            "threads": [{ "id": 1, "name": "main" }]
        }))),
        Step::ExpectRequest("stackTrace"),
        Step::RespondSuccess(Some(serde_json::json!({
            "stackFrames": [{
                "id": 1,
                "name": "main",
                "line": 10,
                "column": 1,
                "source": { "path": "prog.py" }
            }]
        }))),
        Step::ExpectRequest("scopes"),
        Step::RespondSuccess(Some(serde_json::json!({
            "scopes": [{ "name": "Locals", "variablesReference": 100, "expensive": false }]
        }))),
        Step::ExpectRequest("variables"),
        Step::RespondSuccess(Some(serde_json::json!({
            "variables": [{ "name": "x", "value": "1", "type": "int", "variablesReference": 0 }]
        }))),
    ]);

    let session = DapSession::new(SessionParams {
        port: adapter.port,
        file: Some("prog.py".to_string()),
        breakpoints: vec![10],
        handshake_timeout: Some(Duration::from_secs(5)),
        ..SessionParams::default()
    })
    .expect("session should construct and reach the first stop");

    let snapshot = session
        .initial_snapshot()
        .expect("adapter reported a stop before configuration completed");

    assert_eq!(snapshot.paused_thread_id, Some(1));

    let frames = snapshot.stack_per_thread.get(&1).expect("frames for thread 1");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].line, 10);
    assert_eq!(frames[0].source_path, "prog.py");

    let scopes = snapshot.scopes_per_frame.get(&1).expect("scopes for frame 1");
    assert_eq!(scopes.len(), 1);
    assert_eq!(scopes[0].variables_reference, 100);

    let variables = snapshot
        .variables_per_ref
        .get(&100)
        .expect("variables for scope 100");
    assert_eq!(variables.len(), 1);
    assert_eq!(variables[0].name, "x");
    assert_eq!(variables[0].value, "1");

    assert!(!session.is_terminated());

    adapter.join();
}
