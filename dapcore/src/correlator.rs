//! Correlator (component C): assigns outbound `seq` numbers and matches
//! inbound responses back to the request that caused them.

use std::collections::HashMap;

use serde_json::Value;

use crate::message::{RequestMessage, ResponseMessage};

#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub seq: u64,
    pub command: String,
    pub arguments: Option<Value>,
}

/// Owns the monotonic outbound `seq` counter and the in-flight request
/// table. Mutated only from the engine thread, so no internal locking.
pub struct Correlator {
    next_seq: u64,
    pending: HashMap<u64, PendingRequest>,
}

impl Correlator {
    pub fn new() -> Self {
        Correlator {
            next_seq: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocates the next `seq`, records the request as pending, and returns
    /// the wire message ready to send.
    pub fn issue(&mut self, command: &str, arguments: Option<Value>) -> RequestMessage {
        let seq = self.next_seq;
        self.next_seq += 1;

        self.pending.insert(
            seq,
            PendingRequest {
                seq,
                command: command.to_string(),
                arguments: arguments.clone(),
            },
        );

        RequestMessage {
            seq,
            command: command.to_string(),
            arguments,
        }
    }

    /// Pops and returns the request a response matches, or `None` if the
    /// `request_seq` is unknown (already resolved, or never issued).
    pub fn resolve(&mut self, response: &ResponseMessage) -> Option<PendingRequest> {
        self.pending.remove(&response.request_seq)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
