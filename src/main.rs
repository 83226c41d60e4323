//! carserver binary.
//!
//! Loads configuration, picks the handler by name, arms SIGINT/SIGTERM
//! and serves until one of them arrives.

use carserver::runtime::{ServeEvent, Server, Shutdown};
use carserver::{apps, Config};
use std::fmt;
use tracing::{info, warn};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::EnvFilter;

const LOG_DT_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

/// Local wall-clock timestamps in `LOG_DT_FORMAT`.
struct LogTime;

impl FormatTime for LogTime {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", chrono::Local::now().format(LOG_DT_FORMAT))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(LogTime)
        .with_target(false)
        .init();

    let handler = apps::resolve(&config.handler)?;
    let shutdown = Shutdown::on_signals()?;
    let mut server = Server::new(config.settings()?, handler);

    let settings = server.settings();
    info!(
        addr = %settings.addr,
        handler = %config.handler,
        backlog = settings.backlog,
        chunk_size = settings.chunk_size,
        max_read_time_ms = config.max_read_time,
        poll_timeout_ms = config.poll_timeout,
        "Starting carserver"
    );

    let serve = server.serve(shutdown)?;
    info!("Started at {}:{}.", config.host, serve.local_addr().port());

    for event in serve {
        match &event {
            ServeEvent::PollFailed { .. } => {
                warn!("{}", event);
                return Err(format!("serve loop failed: {}", event).into());
            }
            e if e.is_failure() => warn!("{}", e),
            e => info!("{}", e),
        }
    }

    Ok(())
}
