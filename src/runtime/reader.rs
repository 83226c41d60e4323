//! Deadline-bounded frame reader.
//!
//! Reads one sentinel-terminated frame from a connection in chunks of at
//! most `chunk_size` bytes. The deadline bounds every individual read
//! call, not only the gaps between them: before each read the socket
//! timeout is set to whatever remains of `max_read_time`, so a peer that
//! sends nothing and never closes is cut off on time.
//!
//! Reading stops at the first sentinel. Bytes that arrive in the same read
//! as the sentinel are rejected as [`ReadError::TrailingData`]. Bytes that
//! arrive in a later segment are never read. They are discarded when the
//! connection closes. Detecting trailing data is therefore best effort and
//! depends on how the peer's stream was segmented.

use crate::runtime::frame::{find_sentinel, SENTINEL};
use bytes::BytesMut;
use std::io::{self, Read};
use std::net::TcpStream;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::trace;

/// Errors raised while waiting for a full frame.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("no complete frame within {limit:?} ({received} bytes received)")]
    Timeout { limit: Duration, received: usize },

    #[error("peer closed the connection after {received} bytes without ending the frame")]
    Closed { received: usize },

    #[error("frame exceeds {limit} bytes")]
    TooLarge { limit: usize },

    /// Extra bytes arrived in the same read as the sentinel.
    #[error("{extra} bytes received after the end of the frame")]
    TrailingData { extra: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ReadError {
    /// Whether the failure was the read deadline expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ReadError::Timeout { .. })
    }
}

/// A byte source whose individual reads can be bounded in time.
pub trait DeadlineRead: Read {
    /// Bound the next read calls to at most `timeout`.
    fn set_read_deadline(&mut self, timeout: Duration) -> io::Result<()>;
}

impl DeadlineRead for TcpStream {
    fn set_read_deadline(&mut self, timeout: Duration) -> io::Result<()> {
        self.set_read_timeout(Some(timeout))
    }
}

/// Reads whole frames under a time and size budget.
#[derive(Debug, Clone, Copy)]
pub struct FrameReader {
    chunk_size: usize,
    max_read_time: Duration,
    max_frame_size: usize,
}

impl FrameReader {
    pub fn new(chunk_size: usize, max_read_time: Duration, max_frame_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            max_read_time,
            max_frame_size,
        }
    }

    /// Read a single frame, sentinel included.
    pub fn read_frame<S: DeadlineRead + ?Sized>(&self, conn: &mut S) -> Result<BytesMut, ReadError> {
        let started = Instant::now();
        let mut frame = BytesMut::with_capacity(self.chunk_size);

        loop {
            let remaining = self
                .max_read_time
                .checked_sub(started.elapsed())
                .filter(|d| !d.is_zero())
                .ok_or(ReadError::Timeout {
                    limit: self.max_read_time,
                    received: frame.len(),
                })?;
            conn.set_read_deadline(remaining)?;

            let filled = frame.len();
            frame.resize(filled + self.chunk_size, 0);

            let n = match conn.read(&mut frame[filled..]) {
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                    frame.truncate(filled);
                    continue;
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Err(ReadError::Timeout {
                        limit: self.max_read_time,
                        received: filled,
                    });
                }
                Err(e) => return Err(ReadError::Io(e)),
            };
            frame.truncate(filled + n);

            if n == 0 {
                return Err(ReadError::Closed { received: filled });
            }

            trace!(bytes = n, total = frame.len(), "Read chunk");

            if let Some(pos) = find_sentinel(&frame[filled..]) {
                let end = filled + pos + 1;
                if end < frame.len() {
                    return Err(ReadError::TrailingData {
                        extra: frame.len() - end,
                    });
                }
                if end > self.max_frame_size {
                    return Err(ReadError::TooLarge {
                        limit: self.max_frame_size,
                    });
                }
                debug_assert_eq!(frame.last(), Some(&SENTINEL));
                return Ok(frame);
            }

            if frame.len() >= self.max_frame_size {
                return Err(ReadError::TooLarge {
                    limit: self.max_frame_size,
                });
            }
        }
    }
}
