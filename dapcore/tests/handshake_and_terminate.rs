//! Scenario: the adapter completes the handshake and terminates immediately,
//! with no breakpoints and no stop in between.

mod common;

use std::time::Duration;

use dapcore::{DapSession, SessionParams};

use common::Step;

#[test]
fn session_ends_terminated_when_no_stop_occurs() {
    let adapter = common::spawn(vec![
        Step::ExpectRequest("initialize"),
        Step::RespondSuccess(Some(serde_json::json!({ "supportsConfigurationDoneRequest": true }))),
        Step::ExpectRequest("launch"),
        Step::RespondSuccess(None),
        Step::SendEvent("initialized", None),
        Step::ExpectRequest("setFunctionBreakpoints"),
        Step::RespondSuccess(None),
        Step::ExpectRequest("configurationDone"),
        Step::RespondSuccess(None),
        Step::SendEvent("terminated", None),
    ]);

    let session = DapSession::new(SessionParams {
        port: adapter.port,
        handshake_timeout: Some(Duration::from_secs(5)),
        ..SessionParams::default()
    })
    .expect("session should construct despite no stop");

    assert!(session.initial_snapshot().is_none());
    assert!(session.is_terminated());

    adapter.join();
}
