//! Cooperative shutdown.
//!
//! SIGINT and SIGTERM set a process-wide flag; the serve loop polls it on
//! every wake through [`Shutdown::is_requested`]. The flag only ever goes
//! from "running" to "stopping", so plain atomic loads and stores are
//! enough and repeated signals are harmless.

use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set from the signal handler. Never reset.
static SIGNALLED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_signum: libc::c_int) {
    SIGNALLED.store(true, Ordering::SeqCst);
}

/// Install the SIGINT/SIGTERM handlers.
///
/// `SA_RESTART` is left unset so a blocked poll returns `EINTR` and the
/// loop sees the flag without waiting out the poll interval.
fn install_handlers() -> io::Result<()> {
    for signum in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: `action` is fully initialized before use and the handler
        // only performs an atomic store, which is async-signal-safe.
        let rc = unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = on_signal as *const () as libc::sighandler_t;
            action.sa_flags = 0;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(signum, &action, ptr::null_mut())
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Read side of the shutdown flag, plus a manual trigger.
///
/// Clones share the same trigger.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    triggered: Arc<AtomicBool>,
    watch_signals: bool,
}

impl Shutdown {
    /// A flag that only stops on [`Shutdown::trigger`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm SIGINT/SIGTERM and return a flag that also stops on them.
    ///
    /// Call before serving: a signal delivered any time after this returns
    /// is observed by the loop.
    pub fn on_signals() -> io::Result<Self> {
        install_handlers()?;
        Ok(Self {
            triggered: Arc::new(AtomicBool::new(false)),
            watch_signals: true,
        })
    }

    /// Request shutdown.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
            || (self.watch_signals && SIGNALLED.load(Ordering::SeqCst))
    }
}
