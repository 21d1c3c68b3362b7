//! Transport (component B): a TCP connection to the debug adapter, with a
//! dedicated reader thread feeding decoded messages to the engine.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use bytes::BytesMut;

use crate::codec;
use crate::error::DapError;
use crate::message::Message;

const READ_CHUNK: usize = 8 * 1024;

/// The event delivered into the engine's single inbound queue. Both the
/// reader thread and the session facade push onto this queue so the engine
/// never has to poll more than one channel.
pub(crate) enum EngineEvent {
    Inbound(Message),
    ReaderClosed,
    Command(crate::engine::EngineCommand),
}

pub struct Transport {
    write_half: Arc<Mutex<TcpStream>>,
    read_half: Option<TcpStream>,
}

impl Transport {
    pub fn connect(host: &str, port: u16) -> Result<Self, DapError> {
        let stream = TcpStream::connect((host, port))
            .map_err(|e| DapError::ConnectFailed(e.to_string()))?;
        let write_half = stream
            .try_clone()
            .map_err(|e| DapError::ConnectFailed(e.to_string()))?;
        Ok(Transport {
            write_half: Arc::new(Mutex::new(write_half)),
            read_half: Some(stream),
        })
    }

    /// Writes one full frame. Serialized behind a mutex so the engine thread
    /// is the only writer regardless of how many call sites invoke `send`.
    pub fn send(&self, message: &Message) -> Result<(), DapError> {
        let framed = codec::encode(message)?;
        let mut stream = self.write_half.lock().unwrap();
        stream
            .write_all(&framed)
            .map_err(|e| DapError::ProtocolError(format!("write failed: {e}")))?;
        stream
            .flush()
            .map_err(|e| DapError::ProtocolError(format!("flush failed: {e}")))
    }

    /// Spawns the reader thread. It owns the read half exclusively and feeds
    /// every decoded message (and a final `ReaderClosed` sentinel) into
    /// `events`. Returns the join handle so the facade can wait on it at
    /// shutdown.
    pub fn spawn_reader(&mut self, events: Sender<EngineEvent>) -> JoinHandle<()> {
        let mut stream = self
            .read_half
            .take()
            .expect("spawn_reader called more than once");

        thread::spawn(move || {
            let mut buf = BytesMut::with_capacity(READ_CHUNK);
            let mut chunk = [0u8; READ_CHUNK];

            loop {
                match read_some(&mut stream, &mut chunk) {
                    Ok(0) => break, // peer EOF
                    Ok(n) => {
                        buf.extend_from_slice(&chunk[..n]);
                        match codec::decode_stream(&mut buf) {
                            Ok(messages) => {
                                for message in messages {
                                    if events.send(EngineEvent::Inbound(message)).is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                log::error!("transport decode error: {e}");
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        log::debug!("transport read closed: {e}");
                        break;
                    }
                }
            }

            let _ = events.send(EngineEvent::ReaderClosed);
        })
    }
}

fn read_some(stream: &mut TcpStream, buf: &mut [u8]) -> io::Result<usize> {
    stream.read(buf)
}
