use std::process;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook::iterator::Signals;
use tracing::{info, warn};

use crate::error::Result;

/// Clean exit.
pub const EXIT_OK: usize = 0;
/// Something went wrong before the run loop got going.
pub const EXIT_FAILURE: usize = 1;
/// Stopped on SIGHUP; a supervisor should restart us with a fresh
/// configuration.
pub const EXIT_RELOAD: usize = 2;

/// Cooperative shutdown state shared between the signal thread and the
/// run loop.
#[derive(Debug, Default)]
pub struct Shutdown {
    stop: AtomicBool,
    exit_code: AtomicUsize,
}

/// What a stop request amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopAction {
    /// First request; the run loop should wind down.
    Graceful,
    /// A repeat request while already stopping.
    Escalate,
}

impl Shutdown {
    pub fn new() -> Arc<Shutdown> {
        Arc::new(Shutdown::default())
    }

    /// Records a stop request along with the exit code it should produce.
    ///
    /// Exit codes only ratchet upward, so a reload noted earlier is not
    /// painted over by a later plain stop.
    pub fn request_stop(&self, exit_code: usize) -> StopAction {
        self.exit_code.fetch_max(exit_code, Ordering::SeqCst);
        if self.stop.swap(true, Ordering::SeqCst) {
            StopAction::Escalate
        } else {
            StopAction::Graceful
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn exit_code(&self) -> usize {
        self.exit_code.load(Ordering::SeqCst)
    }

    pub(crate) fn flag(&self) -> &AtomicBool {
        &self.stop
    }
}

/// Installs the signal handlers and spawns the thread that services them.
///
/// SIGINT and SIGTERM stop the run loop for a clean exit; SIGHUP stops it
/// with [`EXIT_RELOAD`]. A second stop request gives up on graceful and
/// exits on the spot, after `on_escalate` has had a chance to clean up.
pub fn install<F>(shutdown: Arc<Shutdown>, on_escalate: F) -> Result<JoinHandle<()>>
where
    F: Fn() + Send + 'static,
{
    let mut signals = Signals::new([SIGHUP, SIGINT, SIGTERM, SIGQUIT, SIGUSR1, SIGUSR2])?;
    let handle = thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                let (code, name) = match signal {
                    SIGHUP => (EXIT_RELOAD, "SIGHUP"),
                    SIGINT => (EXIT_OK, "SIGINT"),
                    SIGTERM => (EXIT_OK, "SIGTERM"),
                    other => {
                        warn!(signal = other, "ignoring signal");
                        continue;
                    }
                };
                match shutdown.request_stop(code) {
                    StopAction::Graceful => {
                        info!(signal = name, "stopping");
                    }
                    StopAction::Escalate => {
                        warn!(signal = name, "second stop request, exiting now");
                        on_escalate();
                        process::exit(shutdown.exit_code() as i32);
                    }
                }
            }
        })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_stop_is_graceful_second_escalates() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_stopped());
        assert_eq!(shutdown.request_stop(EXIT_OK), StopAction::Graceful);
        assert!(shutdown.is_stopped());
        assert_eq!(shutdown.request_stop(EXIT_OK), StopAction::Escalate);
    }

    #[test]
    fn exit_code_only_ratchets_up() {
        let shutdown = Shutdown::new();
        shutdown.request_stop(EXIT_RELOAD);
        shutdown.request_stop(EXIT_OK);
        assert_eq!(shutdown.exit_code(), EXIT_RELOAD);
        assert_eq!(shutdown.exit_code(), EXIT_RELOAD);
    }

    #[test]
    fn stop_flag_is_shared() {
        let shutdown = Shutdown::new();
        let flag = shutdown.flag();
        assert!(!flag.load(Ordering::SeqCst));
        shutdown.request_stop(EXIT_OK);
        assert!(flag.load(Ordering::SeqCst));
    }
}
