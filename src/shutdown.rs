use std::{
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::Result;

const WAIT_SLICE: Duration = Duration::from_millis(100);
const HANDLED_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP];

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static SIGNAL_RECEIVED: AtomicI32 = AtomicI32::new(0);

#[derive(Debug, Clone)]
enum Source {
    Process,
    Manual(Arc<AtomicBool>),
}

/// Shutdown request that interrupts waits in the monitoring loop.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    source: Source,
}

impl ShutdownSignal {
    /// Observes process signals without handling them yet.
    ///
    /// Until [`ShutdownSignal::arm`] runs, SIGINT, SIGTERM and SIGHUP keep
    /// their default action and terminate the process.
    pub fn process() -> Self {
        Self {
            source: Source::Process,
        }
    }

    /// Starts catching SIGINT, SIGTERM and SIGHUP. No-op for manual signals.
    ///
    /// Must be called before any threads are spawned.
    pub fn arm(&self) -> Result<()> {
        let Source::Process = self.source else {
            return Ok(());
        };
        let action = SigAction::new(
            SigHandler::Handler(record_signal),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        for handled in HANDLED_SIGNALS {
            // SAFETY: the handler only stores to atomics.
            unsafe { signal::sigaction(handled, &action) }?;
        }
        tracing::debug!("shutdown signal handlers installed");
        Ok(())
    }

    /// A signal triggered only through [`ShutdownSignal::trigger`].
    pub fn manual() -> Self {
        Self {
            source: Source::Manual(Arc::new(AtomicBool::new(false))),
        }
    }

    /// Requests shutdown.
    pub fn trigger(&self) {
        match &self.source {
            Source::Process => SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst),
            Source::Manual(flag) => flag.store(true, Ordering::SeqCst),
        }
    }

    /// Returns `true` once shutdown was requested.
    pub fn is_triggered(&self) -> bool {
        match &self.source {
            Source::Process => SHUTDOWN_REQUESTED.load(Ordering::SeqCst),
            Source::Manual(flag) => flag.load(Ordering::SeqCst),
        }
    }

    /// Process signal that requested shutdown, if any.
    pub fn received_signal(&self) -> Option<Signal> {
        match self.source {
            Source::Process => Signal::try_from(SIGNAL_RECEIVED.load(Ordering::SeqCst)).ok(),
            Source::Manual(_) => None,
        }
    }

    /// Sleeps up to `timeout`; returns `true` early when shutdown is requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_triggered() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(WAIT_SLICE.min(deadline - now));
        }
    }
}

extern "C" fn record_signal(signal: libc::c_int) {
    SIGNAL_RECEIVED.store(signal, Ordering::SeqCst);
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}
