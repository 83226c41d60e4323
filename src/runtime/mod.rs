//! Transport and dispatch runtime.
//!
//! - `frame`: sentinel-delimited framing
//! - `reader`: deadline-bounded frame reader
//! - `dispatch`: handler contract and response mapping
//! - `event_loop`: mio accept loop
//! - `shutdown`: signal-driven shutdown flag

pub mod dispatch;
pub mod event_loop;
pub mod frame;
pub mod reader;
pub mod shutdown;

pub use dispatch::{dispatch, handler_fn, Answer, Handler, HandlerError, Outcome, Response};
pub use event_loop::{ConnectionError, Serve, ServeEvent};
pub use frame::{FrameError, SENTINEL};
pub use reader::{FrameReader, ReadError};
pub use shutdown::Shutdown;

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Immutable server settings, resolved from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct Settings {
    /// Address to bind.
    pub addr: SocketAddr,
    /// Maximum number of connections waiting in the accept queue.
    pub backlog: u32,
    /// Maximum bytes per read call.
    pub chunk_size: usize,
    /// Time allowed to receive a whole request frame.
    pub max_read_time: Duration,
    /// Longest single wait for readiness between shutdown checks.
    pub poll_interval: Duration,
    /// Largest accepted request frame, sentinel included.
    pub max_frame_size: usize,
}

/// The server: settings plus the handler requests are dispatched to.
pub struct Server<H> {
    settings: Settings,
    handler: H,
}

impl<H: Handler> Server<H> {
    pub fn new(settings: Settings, handler: H) -> Self {
        Server { settings, handler }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Bind the listener and return the serve loop.
    ///
    /// Bind failures are returned here, before any event is produced.
    pub fn serve(&mut self, shutdown: Shutdown) -> io::Result<Serve<'_, H>> {
        Serve::bind(&self.settings, &mut self.handler, shutdown)
    }
}
