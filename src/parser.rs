//! Slice-based STOMP frame parser.
//!
//! The parser works on whatever bytes are buffered so far. It never consumes
//! input itself; it reports how many bytes a complete frame occupied so the
//! codec can advance its buffer.

/// A frame as it appeared on the wire, before UTF-8 validation and header
/// unescaping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub command: Vec<u8>,
    pub headers: Vec<(Vec<u8>, Vec<u8>)>,
    pub body: Vec<u8>,
    /// Bytes of input occupied by the frame, including the NUL terminator
    /// and an optional trailing LF.
    pub consumed: usize,
}

/// Extract the `content-length` header, if any.
///
/// Only the first occurrence counts. A present but unparsable value is a
/// protocol error.
fn content_length(headers: &[(Vec<u8>, Vec<u8>)]) -> Result<Option<usize>, String> {
    let Some((_, v)) = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(b"content-length"))
    else {
        return Ok(None);
    };
    let s = std::str::from_utf8(v).map_err(|e| format!("content-length not utf8: {}", e))?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err("empty content-length".to_string());
    }
    trimmed
        .parse::<usize>()
        .map(Some)
        .map_err(|e| format!("invalid content-length '{}': {}", trimmed, e))
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((b'\r', rest)) => rest,
        _ => line,
    }
}

/// Skip the optional EOL that may follow a frame's NUL terminator.
fn skip_trailing_eol(input: &[u8], mut pos: usize) -> usize {
    if input.get(pos) == Some(&b'\r') && input.get(pos + 1) == Some(&b'\n') {
        pos += 2;
    } else if input.get(pos) == Some(&b'\n') {
        pos += 1;
    }
    pos
}

/// Parse a single STOMP frame from the start of `input`.
///
/// Returns `Ok(Some(frame))` when a full frame is available, `Ok(None)` when
/// more bytes are required, and `Err` on malformed input. Leading LF bytes
/// (heart-beats) are skipped and counted in `consumed`.
pub fn parse_frame_slice(input: &[u8]) -> Result<Option<RawFrame>, String> {
    let mut pos = input.iter().take_while(|&&b| b == b'\n').count();

    let Some(cmd_len) = input[pos..].iter().position(|&b| b == b'\n') else {
        if input[pos..].contains(&0) {
            return Err("frame terminated before command line".to_string());
        }
        return Ok(None);
    };
    let command = strip_cr(&input[pos..pos + cmd_len]).to_vec();
    if command.is_empty() {
        return Err("empty command line".to_string());
    }
    pos += cmd_len + 1;

    let mut headers: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    loop {
        let Some(line_len) = input[pos..].iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let line = strip_cr(&input[pos..pos + line_len]);
        pos += line_len + 1;
        if line.is_empty() {
            break;
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            return Err(format!(
                "malformed header line: {:?}",
                String::from_utf8_lossy(line)
            ));
        };
        headers.push((line[..colon].to_vec(), line[colon + 1..].to_vec()));
    }

    let body_end = match content_length(&headers)? {
        Some(len) => {
            let Some(end) = pos.checked_add(len) else {
                return Err("content-length too large".to_string());
            };
            if end >= input.len() {
                return Ok(None);
            }
            if input[end] != 0 {
                return Err("missing NUL terminator after content-length body".to_string());
            }
            end
        }
        None => match input[pos..].iter().position(|&b| b == 0) {
            Some(nul) => pos + nul,
            None => return Ok(None),
        },
    };

    let body = input[pos..body_end].to_vec();
    let consumed = skip_trailing_eol(input, body_end + 1);
    Ok(Some(RawFrame {
        command,
        headers,
        body,
        consumed,
    }))
}

/// Undo STOMP 1.2 header escaping (`\\`, `\r`, `\n`, `\c`).
///
/// Any other escape sequence, or a trailing lone backslash, is an error.
pub fn unescape_header_value(input: &[u8]) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(input.len());
    let mut bytes = input.iter();
    while let Some(&b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'\\') => out.push(b'\\'),
            Some(b'r') => out.push(b'\r'),
            Some(b'n') => out.push(b'\n'),
            Some(b'c') => out.push(b':'),
            Some(&other) => return Err(format!("undefined escape sequence '\\{}'", other as char)),
            None => return Err("dangling backslash at end of header".to_string()),
        }
    }
    Ok(out)
}
