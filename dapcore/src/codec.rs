//! Framing codec (component A): `Content-Length: N\r\n\r\n` + UTF-8 JSON body.
//!
//! Decoding is resumable: [`decode_stream`] only ever consumes complete
//! frames from the buffer, leaving a partial trailing frame untouched so the
//! next read can simply append to it.

use bytes::{Buf, BytesMut};

use crate::error::DapError;
use crate::message::Message;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH_KEY: &str = "Content-Length";

/// Serializes `message` into a framed byte buffer ready to write to the
/// transport.
pub fn encode(message: &Message) -> Result<Vec<u8>, DapError> {
    let body = serde_json::to_vec(message)?;
    let mut framed = Vec::with_capacity(body.len() + 32);
    framed.extend_from_slice(format!("{CONTENT_LENGTH_KEY}: {}\r\n\r\n", body.len()).as_bytes());
    framed.extend_from_slice(&body);
    Ok(framed)
}

/// Extracts every complete frame currently available in `buf`, advancing it
/// past each consumed frame. Bytes belonging to an incomplete trailing frame
/// are left in `buf` for the next call.
pub fn decode_stream(buf: &mut BytesMut) -> Result<Vec<Message>, DapError> {
    let mut messages = Vec::new();
    while let Some(message) = try_decode_one(buf)? {
        messages.push(message);
    }
    Ok(messages)
}

fn try_decode_one(buf: &mut BytesMut) -> Result<Option<Message>, DapError> {
    let Some(header_end) = find_header_end(buf) else {
        return Ok(None);
    };

    let header_bytes = &buf[..header_end];
    let header = std::str::from_utf8(header_bytes)
        .map_err(|e| DapError::ProtocolError(format!("header is not valid UTF-8: {e}")))?;
    let content_length = parse_content_length(header)?;

    let body_start = header_end + HEADER_TERMINATOR.len();
    let body_end = body_start + content_length;
    if buf.len() < body_end {
        // Partial frame: wait for more bytes without consuming anything.
        return Ok(None);
    }

    let body = &buf[body_start..body_end];
    let message: Message = serde_json::from_slice(body)
        .map_err(|e| DapError::ProtocolError(format!("malformed message body: {e}")))?;

    buf.advance(body_end);
    Ok(Some(message))
}

fn find_header_end(buf: &BytesMut) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

/// Parses `Content-Length` out of a raw header block. Tolerates additional
/// headers appearing before it; the key match is case-sensitive, matching
/// observed adapter behavior.
fn parse_content_length(header: &str) -> Result<usize, DapError> {
    let line = header
        .split("\r\n")
        .find(|line| line.starts_with(CONTENT_LENGTH_KEY))
        .ok_or_else(|| DapError::ProtocolError("missing Content-Length header".to_string()))?;

    let value = line
        .split_once(':')
        .map(|(_, v)| v.trim())
        .ok_or_else(|| DapError::ProtocolError("malformed Content-Length header".to_string()))?;

    let length: i64 = value
        .parse()
        .map_err(|_| DapError::ProtocolError(format!("Content-Length is not an integer: {value}")))?;

    if length <= 0 {
        return Err(DapError::ProtocolError(format!(
            "Content-Length must be positive, got {length}"
        )));
    }

    Ok(length as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{EventMessage, RequestMessage};

    fn sample_request() -> Message {
        Message::Request(RequestMessage {
            seq: 1,
            command: "initialize".to_string(),
            arguments: Some(serde_json::json!({"adapterID": "dap-gui"})),
        })
    }

    #[test]
    fn encode_decode_round_trips() {
        let msg = sample_request();
        let framed = encode(&msg).unwrap();
        let mut buf = BytesMut::from(&framed[..]);
        let decoded = decode_stream(&mut buf).unwrap();
        assert_eq!(decoded, vec![msg]);
        assert!(buf.is_empty());
    }

    #[test]
    fn decoder_resumes_across_split_reads() {
        let msg = sample_request();
        let framed = encode(&msg).unwrap();

        // Split at an arbitrary index inside the frame.
        let split_at = 7.min(framed.len() - 1);
        let (first, second) = framed.split_at(split_at);

        let mut buf = BytesMut::new();
        buf.extend_from_slice(first);
        let decoded_first = decode_stream(&mut buf).unwrap();
        assert!(decoded_first.is_empty(), "partial frame must not decode");

        buf.extend_from_slice(second);
        let decoded_second = decode_stream(&mut buf).unwrap();
        assert_eq!(decoded_second, vec![msg]);
    }

    #[test]
    fn multiple_frames_decode_in_order() {
        let a = sample_request();
        let b = Message::Event(EventMessage {
            seq: 2,
            event: "initialized".to_string(),
            body: None,
        });

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode(&a).unwrap());
        buf.extend_from_slice(&encode(&b).unwrap());

        let decoded = decode_stream(&mut buf).unwrap();
        assert_eq!(decoded, vec![a, b]);
    }

    #[test]
    fn zero_length_body_is_an_error() {
        let raw = b"Content-Length: 0\r\n\r\n".to_vec();
        let mut buf = BytesMut::from(&raw[..]);
        assert!(decode_stream(&mut buf).is_err());
    }

    #[test]
    fn missing_content_length_is_an_error() {
        let raw = b"X-Other: 1\r\n\r\n{}".to_vec();
        let mut buf = BytesMut::from(&raw[..]);
        assert!(decode_stream(&mut buf).is_err());
    }

    #[test]
    fn tolerates_extra_headers_before_content_length() {
        let msg = sample_request();
        let body = serde_json::to_vec(&msg).unwrap();
        let raw = format!(
            "X-Adapter: stub\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        let mut buf = BytesMut::from(&raw[..]);
        buf.extend_from_slice(&body);
        let decoded = decode_stream(&mut buf).unwrap();
        assert_eq!(decoded, vec![msg]);
    }
}
