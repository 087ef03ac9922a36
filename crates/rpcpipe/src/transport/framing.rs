//! Message framing.
//!
//! Senders write one JSON value followed by a newline. Receivers either read
//! whole lines ([`parse_message`]) or decode exactly one JSON value at a time
//! from a raw byte stream ([`JsonDecoder`]), ignoring surrounding whitespace.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::types::{RpcError, RpcResult};

const READ_CHUNK: usize = 8 * 1024;

/// Parse a single line of text as a message.
pub fn parse_message<T: DeserializeOwned>(line: &str) -> RpcResult<T> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(RpcError::Decode("Empty message".to_string()));
    }

    serde_json::from_str(trimmed).map_err(|e| RpcError::Decode(e.to_string()))
}

/// Serialize a message to a JSON line (with trailing newline).
pub fn frame_message<T: Serialize>(message: &T) -> RpcResult<Vec<u8>> {
    let mut json = serde_json::to_vec(message)?;
    json.push(b'\n');
    Ok(json)
}

/// Write one framed message and flush.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> RpcResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let framed = frame_message(message)?;
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

enum Attempt {
    Value(Value, usize),
    NeedMore,
    Invalid(serde_json::Error),
}

/// Progress through the value at the front of the buffer.
///
/// Containers are only handed to the parser once their outermost bracket
/// closes, or once their first line ends so a broken line still fails fast.
#[derive(Debug, Default)]
struct Scan {
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    line_ended: bool,
}

/// Incremental decoder yielding one JSON value per call.
///
/// Bytes past the decoded value stay buffered for the next call, so values
/// may be packed back to back, split across reads, or spread over lines.
#[derive(Debug)]
pub struct JsonDecoder<R> {
    reader: R,
    buf: Vec<u8>,
    scan: Scan,
    #[cfg(test)]
    attempts: usize,
}

impl<R: AsyncRead + Unpin> JsonDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            scan: Scan::default(),
            #[cfg(test)]
            attempts: 0,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Decode the next value.
    ///
    /// `Ok(None)` means the stream ended cleanly between values. A stream
    /// ending inside a value is [`RpcError::UnexpectedEof`]. After a syntax
    /// error the rest of the offending line is discarded.
    pub async fn next_value(&mut self) -> RpcResult<Option<Value>> {
        loop {
            if self.scan.pos == 0 {
                let leading = self
                    .buf
                    .iter()
                    .position(|b| !b.is_ascii_whitespace())
                    .unwrap_or(self.buf.len());
                self.buf.drain(..leading);
            }

            if !self.buf.is_empty() && self.at_boundary() {
                match self.attempt() {
                    Attempt::Value(value, used) => {
                        self.consume(used);
                        return Ok(Some(value));
                    }
                    Attempt::NeedMore => continue,
                    Attempt::Invalid(e) => {
                        self.discard_line();
                        return Err(RpcError::Decode(e.to_string()));
                    }
                }
            }

            self.buf.reserve(READ_CHUNK);
            let read = self.reader.read_buf(&mut self.buf).await?;
            if read == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return match self.attempt() {
                    Attempt::Value(value, used) => {
                        self.consume(used);
                        Ok(Some(value))
                    }
                    Attempt::NeedMore => {
                        self.consume(self.buf.len());
                        Err(RpcError::UnexpectedEof)
                    }
                    Attempt::Invalid(e) => {
                        self.discard_line();
                        Err(RpcError::Decode(e.to_string()))
                    }
                };
            }
        }
    }

    /// Decode the next value as `T`.
    ///
    /// A well-formed JSON value of the wrong shape is a decode error; its
    /// bytes are consumed either way.
    pub async fn next<T: DeserializeOwned>(&mut self) -> RpcResult<Option<T>> {
        match self.next_value().await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| RpcError::Decode(e.to_string())),
            None => Ok(None),
        }
    }

    /// Advance the scan over newly buffered bytes. True when a parse of the
    /// front value could now succeed or fail for good.
    fn at_boundary(&mut self) -> bool {
        let scan = &mut self.scan;
        if !matches!(self.buf.first(), Some(b'{' | b'[')) {
            let fresh = scan.pos < self.buf.len();
            scan.pos = self.buf.len();
            return fresh;
        }

        while scan.pos < self.buf.len() {
            let byte = self.buf[scan.pos];
            scan.pos += 1;

            if scan.in_string {
                match byte {
                    _ if scan.escaped => scan.escaped = false,
                    b'\\' => scan.escaped = true,
                    b'"' => scan.in_string = false,
                    _ => {}
                }
            } else {
                match byte {
                    b'"' => scan.in_string = true,
                    b'{' | b'[' => scan.depth += 1,
                    b'}' | b']' => {
                        scan.depth = scan.depth.saturating_sub(1);
                        if scan.depth == 0 {
                            return true;
                        }
                    }
                    _ => {}
                }
            }

            if byte == b'\n' && !scan.line_ended {
                scan.line_ended = true;
                return true;
            }
        }
        false
    }

    fn attempt(&mut self) -> Attempt {
        #[cfg(test)]
        {
            self.attempts += 1;
        }
        let mut values = serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();
        match values.next() {
            Some(Ok(value)) => Attempt::Value(value, values.byte_offset()),
            Some(Err(e)) if e.is_eof() => Attempt::NeedMore,
            Some(Err(e)) => Attempt::Invalid(e),
            None => Attempt::NeedMore,
        }
    }

    fn consume(&mut self, used: usize) {
        self.buf.drain(..used);
        self.scan = Scan::default();
    }

    fn discard_line(&mut self) {
        let end = match self.buf.iter().position(|&b| b == b'\n') {
            Some(newline) => newline + 1,
            None => self.buf.len(),
        };
        self.consume(end);
    }
}
