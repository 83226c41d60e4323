//! mio serve loop.
//!
//! Readiness-based model: the listener is registered with a mio `Poll`
//! (epoll on Linux, kqueue on macOS) for readable events. Each wake either
//! re-checks the shutdown flag (poll interval elapsed) or drains the
//! pending connections one at a time:
//!
//! ```text
//! accept -> read frame -> dispatch -> write response -> close
//! ```
//!
//! No two connections are ever in flight together and no state crosses
//! connections. Parallelism comes from running more processes on the same
//! address.
//!
//! The loop is exposed as an iterator of [`ServeEvent`]s. It ends once
//! shutdown is requested; dropping it deregisters and closes the listener.

use crate::runtime::dispatch::{dispatch, Answer, Handler};
use crate::runtime::reader::{FrameReader, ReadError};
use crate::runtime::shutdown::Shutdown;
use crate::runtime::Settings;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use std::fmt;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};

const LISTENER_TOKEN: Token = Token(0);

/// Per-connection failures. None of them stop the loop.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to prepare socket: {0}")]
    Setup(#[source] io::Error),

    #[error("failed to read request: {0}")]
    Read(#[from] ReadError),

    #[error("failed to write response: {0}")]
    Write(#[source] io::Error),
}

/// Something the serve loop did, in the order it happened.
#[derive(Debug)]
pub enum ServeEvent {
    /// A request was answered and the connection closed.
    Responded {
        peer: SocketAddr,
        answer: Answer,
        elapsed: Duration,
    },
    /// The peer did not finish a frame in time; closed without a response.
    ReadTimedOut { peer: SocketAddr, limit: Duration },
    /// Transport failure on one connection; closed without a response.
    ConnectionFailed {
        peer: SocketAddr,
        error: ConnectionError,
    },
    /// `accept` itself failed.
    AcceptFailed { error: io::Error },
    /// Waiting for readiness failed; the loop stops.
    PollFailed { error: io::Error },
    /// Shutdown was requested; the loop stops.
    Stopped,
}

impl ServeEvent {
    /// Whether the event reports a failure.
    pub fn is_failure(&self) -> bool {
        !matches!(
            self,
            ServeEvent::Responded { .. } | ServeEvent::Stopped
        )
    }
}

impl fmt::Display for ServeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServeEvent::Responded {
                peer,
                answer,
                elapsed,
            } => write!(f, "Answered {} with {} in {:?}.", peer, answer, elapsed),
            ServeEvent::ReadTimedOut { peer, limit } => {
                write!(f, "Read timeout ({:?}) for client {}.", limit, peer)
            }
            ServeEvent::ConnectionFailed { peer, error } => {
                write!(f, "Exception when handling client {}: {}.", peer, error)
            }
            ServeEvent::AcceptFailed { error } => write!(f, "Accept error: {}.", error),
            ServeEvent::PollFailed { error } => write!(f, "Poll error: {}.", error),
            ServeEvent::Stopped => write!(f, "Stopped."),
        }
    }
}

/// A bound server, ready to be iterated.
///
/// Created by [`crate::runtime::Server::serve`].
pub struct Serve<'h, H: Handler + ?Sized> {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: &'h mut H,
    reader: FrameReader,
    poll_interval: Duration,
    write_timeout: Duration,
    shutdown: Shutdown,
    /// Set after a listener wake until `accept` would block or fails.
    draining: bool,
    done: bool,
}

impl<'h, H: Handler + ?Sized> Serve<'h, H> {
    pub(crate) fn bind(
        settings: &Settings,
        handler: &'h mut H,
        shutdown: Shutdown,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        let listener = create_listener(settings.addr, settings.backlog)?;
        let mut listener = TcpListener::from_std(listener);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let local_addr = listener.local_addr()?;

        debug!(
            addr = %local_addr,
            backlog = settings.backlog,
            chunk_size = settings.chunk_size,
            "Listener registered"
        );

        Ok(Self {
            poll,
            events: Events::with_capacity(8),
            listener,
            local_addr,
            handler,
            reader: FrameReader::new(
                settings.chunk_size,
                settings.max_read_time,
                settings.max_frame_size,
            ),
            poll_interval: settings.poll_interval,
            write_timeout: settings.max_read_time,
            shutdown,
            draining: false,
            done: false,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept and fully process at most one pending connection.
    ///
    /// Returns `None` once no connection is pending.
    fn accept_one(&mut self) -> Option<ServeEvent> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    return Some(self.handle_connection(TcpStream::from(stream), peer));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Some(ServeEvent::AcceptFailed { error }),
            }
        }
    }

    /// Read, dispatch and answer one connection. The stream is closed on
    /// return whatever the outcome.
    fn handle_connection(&mut self, mut stream: TcpStream, peer: SocketAddr) -> ServeEvent {
        let started = Instant::now();
        debug!(peer = %peer, "Accepted connection");

        if let Err(e) = prepare_stream(&stream, self.write_timeout) {
            return ServeEvent::ConnectionFailed {
                peer,
                error: ConnectionError::Setup(e),
            };
        }

        let request = match self.reader.read_frame(&mut stream) {
            Ok(request) => request,
            Err(ReadError::Timeout { limit, received }) => {
                trace!(peer = %peer, received, "Read deadline expired");
                return ServeEvent::ReadTimedOut { peer, limit };
            }
            Err(e) => {
                return ServeEvent::ConnectionFailed {
                    peer,
                    error: e.into(),
                }
            }
        };

        let response = dispatch(&request, &mut *self.handler);

        if let Err(e) = stream.write_all(&response.frame).and_then(|_| stream.flush()) {
            return ServeEvent::ConnectionFailed {
                peer,
                error: ConnectionError::Write(e),
            };
        }

        debug!(peer = %peer, answer = %response.answer, "Connection closed");
        ServeEvent::Responded {
            peer,
            answer: response.answer,
            elapsed: started.elapsed(),
        }
    }

    fn stop(&mut self) -> ServeEvent {
        self.done = true;
        ServeEvent::Stopped
    }
}

impl<H: Handler + ?Sized> Iterator for Serve<'_, H> {
    type Item = ServeEvent;

    fn next(&mut self) -> Option<ServeEvent> {
        if self.done {
            return None;
        }

        loop {
            if self.shutdown.is_requested() {
                return Some(self.stop());
            }

            if self.draining {
                match self.accept_one() {
                    Some(event) => {
                        // Errors such as EMFILE persist; go back to polling.
                        if matches!(event, ServeEvent::AcceptFailed { .. }) {
                            self.draining = false;
                        }
                        return Some(event);
                    }
                    None => self.draining = false,
                }
                continue;
            }

            match self.poll.poll(&mut self.events, Some(self.poll_interval)) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    self.done = true;
                    return Some(ServeEvent::PollFailed { error });
                }
            }

            self.draining = self
                .events
                .iter()
                .any(|event| event.token() == LISTENER_TOKEN);

            // Readiness is edge-triggered: connections left queued by a
            // failed accept raise no new event, so retry once per interval.
            if !self.draining && !self.shutdown.is_requested() {
                if let Some(event) = self.accept_one() {
                    self.draining = !matches!(event, ServeEvent::AcceptFailed { .. });
                    return Some(event);
                }
            }
        }
    }
}

impl<H: Handler + ?Sized> Drop for Serve<'_, H> {
    fn drop(&mut self) {
        if let Err(e) = self.poll.registry().deregister(&mut self.listener) {
            debug!(error = %e, "Failed to deregister listener");
        }
        debug!(addr = %self.local_addr, "Listener closed");
    }
}

/// Accepted sockets go back to blocking mode: reads are bounded by the
/// per-call timeout the frame reader sets, writes by `write_timeout`.
fn prepare_stream(stream: &TcpStream, write_timeout: Duration) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(write_timeout))?;
    Ok(())
}

/// Create a non-blocking TCP listener with SO_REUSEADDR, and SO_REUSEPORT
/// where available, so several instances can share the port.
fn create_listener(addr: SocketAddr, backlog: u32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_listener_is_reusable() {
        let first = create_listener("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let addr = first.local_addr().unwrap();

        // A second instance can bind the same port.
        let second = create_listener(addr, 16).unwrap();
        assert_eq!(second.local_addr().unwrap(), addr);
    }

    #[test]
    fn test_event_failure_classification() {
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        assert!(!ServeEvent::Stopped.is_failure());
        assert!(!ServeEvent::Responded {
            peer,
            answer: Answer::Fail,
            elapsed: Duration::ZERO,
        }
        .is_failure());
        assert!(ServeEvent::ReadTimedOut {
            peer,
            limit: Duration::from_millis(10),
        }
        .is_failure());
        assert!(ServeEvent::AcceptFailed {
            error: io::Error::from(io::ErrorKind::ConnectionAborted),
        }
        .is_failure());
    }

    #[test]
    fn test_event_display() {
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let event = ServeEvent::ConnectionFailed {
            peer,
            error: ConnectionError::Read(ReadError::Closed { received: 3 }),
        };
        let text = event.to_string();
        assert!(text.starts_with("Exception when handling client 127.0.0.1:4000"));
        assert!(text.contains("3 bytes"));
    }
}
