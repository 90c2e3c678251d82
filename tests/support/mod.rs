//! Scripted single-connection broker for integration tests.
//!
//! The broker runs on a plain thread with a blocking `std::net` socket so
//! the client under test is the only async code in play.
#![allow(dead_code)]

use bytes::BytesMut;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;
use stomp_link::{Frame, StompCodec, StompItem};
use tokio_util::codec::Decoder;

pub const CONNECTED: &str = "CONNECTED\nversion:1.2\n\n\0";

/// The broker end of one accepted connection.
pub struct BrokerSide {
    stream: TcpStream,
    captured: Vec<u8>,
}

impl BrokerSide {
    /// Read one NUL-terminated frame from the client. `None` on EOF.
    pub fn read_frame(&mut self) -> Option<Frame> {
        let start = self.captured.len();
        let mut byte = [0u8; 1];
        loop {
            match self.stream.read(&mut byte) {
                Ok(0) | Err(_) => return None,
                Ok(_) => {
                    self.captured.push(byte[0]);
                    if byte[0] == 0 {
                        break;
                    }
                }
            }
        }
        decode_frames(&self.captured[start..]).into_iter().next()
    }

    pub fn reply(&mut self, wire: &str) {
        self.stream.write_all(wire.as_bytes()).unwrap();
        self.stream.flush().unwrap();
    }

    /// Accept the login: read CONNECT and answer CONNECTED.
    pub fn accept_login(&mut self) -> Frame {
        let connect = self.read_frame().expect("client sent no CONNECT");
        self.reply(CONNECTED);
        connect
    }

    /// Close the socket from the broker side.
    pub fn hang_up(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn drain(mut self) -> Vec<u8> {
        let _ = self.stream.read_to_end(&mut self.captured);
        self.captured
    }
}

pub struct MockBroker {
    pub port: u16,
    handle: thread::JoinHandle<Vec<u8>>,
}

impl MockBroker {
    /// Wait for the client to close and return every byte it sent.
    pub fn finish(self) -> Vec<u8> {
        self.handle.join().expect("broker thread panicked")
    }
}

/// Accept one connection and run `script` against it. Once the script
/// returns, the broker keeps reading until the client closes.
pub fn spawn_broker<F>(script: F) -> MockBroker
where
    F: FnOnce(&mut BrokerSide) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut side = BrokerSide {
            stream,
            captured: Vec::new(),
        };
        script(&mut side);
        side.drain()
    });
    MockBroker { port, handle }
}

/// A port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Decode every frame in `bytes`, skipping heart-beats.
pub fn decode_frames(bytes: &[u8]) -> Vec<Frame> {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(bytes);
    let mut frames = Vec::new();
    while let Some(item) = codec.decode(&mut buf).expect("client sent a malformed frame") {
        if let StompItem::Frame(f) = item {
            frames.push(f);
        }
    }
    assert!(buf.is_empty(), "trailing partial frame: {:?}", buf);
    frames
}
