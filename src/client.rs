//! Blocking client for the framed protocol.
//!
//! One request per connection: connect, write a frame, read the reply
//! frame, close. A server that closes without replying is reported as
//! [`ClientError::NoResponse`], which callers must keep apart from an
//! application-level [`Reply::Fail`].

use crate::runtime::frame::{self, FrameError, SENTINEL};
use bytes::BytesMut;
use serde_json::Value;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use thiserror::Error;

const READ_CHUNK: usize = 4096;

/// Client-side failures.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("server closed the connection without a response")]
    NoResponse,

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A decoded server reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `{"answer":"ok"}`
    Ok,
    /// `{"answer":"not_found"}`
    NotFound,
    /// `{"answer":"fail"}`
    Fail,
    /// Any other document.
    Data(Value),
}

impl Reply {
    /// Classify a response body.
    pub fn from_value(value: Value) -> Self {
        if let Value::Object(map) = &value {
            if map.len() == 1 {
                match map.get("answer").and_then(Value::as_str) {
                    Some("ok") => return Reply::Ok,
                    Some("not_found") => return Reply::NotFound,
                    Some("fail") => return Reply::Fail,
                    _ => {}
                }
            }
        }
        Reply::Data(value)
    }
}

/// Send one request and wait for its reply.
pub fn request<A: ToSocketAddrs>(
    addr: A,
    body: &Value,
    timeout: Duration,
) -> Result<Reply, ClientError> {
    let raw = request_raw(addr, &frame::encode_json(body)?, timeout)?;
    let payload = frame::decode(&raw)?;
    let value = serde_json::from_slice(payload)
        .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
    Ok(Reply::from_value(value))
}

/// Write `bytes` as-is and return the raw reply frame, sentinel included.
pub fn request_raw<A: ToSocketAddrs>(
    addr: A,
    bytes: &[u8],
    timeout: Duration,
) -> Result<BytesMut, ClientError> {
    let mut stream = connect(addr, timeout)?;
    stream.set_write_timeout(Some(timeout))?;
    stream.write_all(bytes)?;
    read_reply(&mut stream, timeout)
}

fn connect<A: ToSocketAddrs>(addr: A, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "no addresses to connect to")
    }))
}

fn read_reply(stream: &mut TcpStream, timeout: Duration) -> Result<BytesMut, ClientError> {
    let started = Instant::now();
    let mut reply = BytesMut::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let remaining = timeout
            .checked_sub(started.elapsed())
            .filter(|d| !d.is_zero())
            .ok_or(ClientError::Timeout(timeout))?;
        stream.set_read_timeout(Some(remaining))?;

        let n = match stream.read(&mut chunk) {
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                return Err(ClientError::Timeout(timeout))
            }
            // A reset before any reply byte is the same as a silent close.
            Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset && reply.is_empty() => {
                return Err(ClientError::NoResponse)
            }
            Err(e) => return Err(e.into()),
        };

        if n == 0 {
            return Err(if reply.is_empty() {
                ClientError::NoResponse
            } else {
                ClientError::InvalidResponse(format!(
                    "connection closed after {} bytes without a frame end",
                    reply.len()
                ))
            });
        }

        reply.extend_from_slice(&chunk[..n]);
        if let Some(pos) = frame::find_sentinel(&reply) {
            reply.truncate(pos + 1);
            debug_assert_eq!(reply.last(), Some(&SENTINEL));
            return Ok(reply);
        }
    }
}
