//! carserver: a framed TCP front end for pluggable applications.
//!
//! Clients send one JSON document terminated by a NUL byte; the server
//! hands it to the configured handler and answers with one NUL-terminated
//! JSON document, then closes the connection.
//!
//! Features:
//! - Readiness-driven accept loop (mio), one connection at a time
//! - Per-read deadline on request frames
//! - Canonical `ok` / `not_found` / `fail` answers, raw data passthrough
//! - Signal-driven cooperative shutdown
//! - Configuration via CLI arguments, environment or TOML file

pub mod apps;
pub mod client;
pub mod config;
pub mod runtime;

pub use config::{Config, ConfigError};
pub use runtime::{
    handler_fn, Answer, Handler, HandlerError, Outcome, Serve, ServeEvent, Server, Settings,
    Shutdown,
};
