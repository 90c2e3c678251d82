use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{Command, Frame};
use crate::parser::{parse_frame_slice, unescape_header_value};

/// Escape a STOMP 1.2 header name or value for wire transmission.
///
/// - backslash (0x5c) → `\\`
/// - carriage return (0x0d) → `\r`
/// - line feed (0x0a) → `\n`
/// - colon (0x3a) → `\c`
fn escape_header_value(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\r' => result.push_str("\\r"),
            '\n' => result.push_str("\\n"),
            ':' => result.push_str("\\c"),
            _ => result.push(ch),
        }
    }
    result
}

/// CONNECT and CONNECTED frames carry their headers unescaped.
fn uses_header_escaping(command: Command) -> bool {
    !matches!(command, Command::Connect | Command::Connected | Command::Stomp)
}

fn invalid_data(what: &str, err: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("{}: {}", what, err))
}

fn header_text(raw: Vec<u8>, escaped: bool, what: &str) -> io::Result<String> {
    let bytes = if escaped {
        unescape_header_value(&raw).map_err(|e| invalid_data(&format!("invalid escape in {}", what), e))?
    } else {
        raw
    };
    String::from_utf8(bytes).map_err(|e| invalid_data(&format!("invalid utf8 in {}", what), e))
}

/// Items produced by the decoder.
///
/// A `StompItem` is either a decoded `Frame` or a `Heartbeat` marker for a
/// bare EOL received between frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    /// A decoded STOMP frame (command + headers + body)
    Frame(Frame),
    /// A single heart-beat pulse (LF or CRLF)
    Heartbeat,
}

/// `StompCodec` implements `tokio_util::codec::{Decoder, Encoder}` for the
/// STOMP wire protocol.
///
/// - Decodes incoming bytes into `StompItem::Frame` or `StompItem::Heartbeat`.
/// - Supports both NUL-terminated bodies and `content-length` bodies that may
///   contain NUL bytes.
/// - Encodes a `Frame` into wire bytes, adding `content-length` when the body
///   could not otherwise be delimited.
#[derive(Debug, Default)]
pub struct StompCodec {
    _priv: (),
}

impl StompCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for StompCodec {
    type Item = StompItem;
    type Error = io::Error;

    /// Decode one item from the front of `src`.
    ///
    /// Returns `Ok(None)` and leaves `src` untouched when the buffered bytes
    /// do not yet hold a complete item. Malformed frames, unknown commands,
    /// bad escapes and invalid UTF-8 in the command or headers are reported
    /// as `InvalidData`.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let eol_len = match src.chunk() {
            [b'\n', ..] => 1,
            [b'\r', b'\n', ..] => 2,
            [b'\r'] => return Ok(None),
            _ => 0,
        };
        if eol_len > 0 {
            src.advance(eol_len);
            return Ok(Some(StompItem::Heartbeat));
        }

        let raw = match parse_frame_slice(src.chunk()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(e) => return Err(invalid_data("parse error", e)),
        };
        src.advance(raw.consumed);

        let command_text = String::from_utf8(raw.command)
            .map_err(|e| invalid_data("invalid utf8 in command", e))?;
        let command: Command = command_text
            .parse()
            .map_err(|e| invalid_data("bad command", e))?;

        let escaped = uses_header_escaping(command);
        let mut frame = Frame::new(command);
        for (k, v) in raw.headers {
            let key = header_text(k, escaped, "header key")?;
            let value = header_text(v, escaped, "header value")?;
            // A repeated header keeps its first value.
            if frame.get_header(&key).is_none() {
                frame.headers.push((key, value));
            }
        }
        frame.body = raw.body;
        Ok(Some(StompItem::Frame(frame)))
    }
}

impl Encoder<Frame> for StompCodec {
    type Error = io::Error;

    /// Append the wire form of `frame` to `dst`.
    ///
    /// A `content-length` header is added when the body contains NUL bytes or
    /// is not valid UTF-8, unless the caller already supplied one.
    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let escaped = uses_header_escaping(frame.command);
        let Frame {
            command,
            mut headers,
            body,
        } = frame;

        let has_cl = headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("content-length"));
        if !has_cl && (body.contains(&0) || std::str::from_utf8(&body).is_err()) {
            headers.push(("content-length".to_string(), body.len().to_string()));
        }

        // Reject before writing anything so `dst` never holds half a frame.
        if !escaped {
            if let Some((k, _)) = headers
                .iter()
                .find(|(k, v)| k.contains(['\r', '\n', ':']) || v.contains(['\r', '\n']))
            {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("header {:?} cannot be sent unescaped in a {} frame", k, command),
                ));
            }
        }

        dst.extend_from_slice(command.as_str().as_bytes());
        dst.put_u8(b'\n');
        for (k, v) in headers {
            if escaped {
                dst.extend_from_slice(escape_header_value(&k).as_bytes());
                dst.put_u8(b':');
                dst.extend_from_slice(escape_header_value(&v).as_bytes());
            } else {
                dst.extend_from_slice(k.as_bytes());
                dst.put_u8(b':');
                dst.extend_from_slice(v.as_bytes());
            }
            dst.put_u8(b'\n');
        }
        dst.put_u8(b'\n');
        dst.extend_from_slice(&body);
        dst.put_u8(0);
        Ok(())
    }
}
