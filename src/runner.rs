use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::client::connect;
use crate::config::Config;
use crate::dispatch::import_unseen;
use crate::error::{Error, Result};
use crate::signals::Shutdown;
use crate::store::Store;

/// How long to sit out after a dropped connection or a protocol error
/// before trying again.
const RETRY_DELAY: Duration = Duration::from_secs(30);

/// Granularity of interruptible sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(250);

/// Drives one watched mailbox until a stop is requested.
///
/// Depending on [`Config::subscribe`] this either polls on a timer or
/// holds an IDLE subscription and imports when the server reports
/// activity. Either way every import runs on a connection of its own, so
/// a hiccup mid-fetch never wedges the watcher.
pub struct Runner<S> {
    config: Config,
    store: Arc<S>,
    shutdown: Arc<Shutdown>,
    spawner: Spawner,
}

impl<S: Store + Send + Sync + 'static> Runner<S> {
    pub fn new(config: Config, store: Arc<S>, shutdown: Arc<Shutdown>) -> Runner<S> {
        let spawner = if config.inline_dispatch {
            Spawner::Inline
        } else {
            Spawner::Threaded
        };
        Runner {
            config,
            store,
            shutdown,
            spawner,
        }
    }

    /// Runs until a stop is requested.
    ///
    /// Transport and protocol failures are logged and retried after
    /// [`RETRY_DELAY`]; only a stop request ends the loop.
    pub fn run(&self) {
        while !self.shutdown.is_stopped() {
            let outcome = if self.config.subscribe {
                self.run_subscribe()
            } else {
                self.run_poll()
            };
            match outcome {
                Ok(()) => {}
                Err(ref e) if e.is_interrupted() => {
                    debug!("interrupted, reconnecting");
                }
                Err(e) => {
                    if e.is_transport() {
                        error!(error = %e, "lost the server");
                    } else {
                        error!(error = %e, "session failed");
                    }
                    debug!(delay = ?RETRY_DELAY, "retrying");
                    if !sleep_interruptible(RETRY_DELAY, &self.shutdown) {
                        break;
                    }
                }
            }
        }
        info!("run loop finished");
    }

    fn run_poll(&self) -> Result<()> {
        debug!(interval = ?self.config.interval, "polling");
        while !self.shutdown.is_stopped() {
            import_cycle(&self.config, &*self.store)?;
            if !sleep_interruptible(self.config.interval, &self.shutdown) {
                break;
            }
        }
        Ok(())
    }

    fn run_subscribe(&self) -> Result<()> {
        let imap = &self.config.imap;
        let client = connect((imap.host.as_str(), imap.port), &imap.host)?;
        let mut session = client
            .login(&imap.username, &imap.password)
            .map_err(|(e, _)| e)?;
        if !session.capabilities()?.has("IDLE") {
            return Err(Error::No(
                "server does not advertise the IDLE capability".to_string(),
            ));
        }
        info!(mailbox = self.config.mailbox.as_str(), "subscribed");
        {
            // The watcher examines the mailbox read-only; imports open
            // their own read-write session so \Seen updates never ride
            // on the idling stream.
            let mut watched = session.mailbox(&self.config.mailbox, true)?;
            let config = self.config.clone();
            let store = Arc::clone(&self.store);
            let spawner = self.spawner;
            watched.watch(self.shutdown.flag(), |changes| {
                info!(changes = changes.len(), "mailbox activity, importing");
                let config = config.clone();
                let store = Arc::clone(&store);
                spawner.spawn(move || {
                    if let Err(e) = import_cycle(&config, &*store) {
                        error!(error = %e, "import failed");
                    }
                });
            })?;
        }
        session.logout()
    }
}

/// Opens a fresh session, imports whatever is unseen, and logs out.
fn import_cycle<S: Store + ?Sized>(config: &Config, store: &S) -> Result<()> {
    let imap = &config.imap;
    let client = connect((imap.host.as_str(), imap.port), &imap.host)?;
    let mut session = client
        .login(&imap.username, &imap.password)
        .map_err(|(e, _)| e)?;
    {
        let mut mailbox = session.mailbox(&config.mailbox, false)?;
        import_unseen(&mut mailbox, store)?;
    }
    session.logout()
}

/// How notification-driven imports get scheduled.
#[derive(Debug, Clone, Copy)]
enum Spawner {
    /// One short-lived thread per import.
    Threaded,
    /// Run right here on the watcher thread.
    Inline,
}

impl Spawner {
    fn spawn<F: FnOnce() + Send + 'static>(self, work: F) {
        match self {
            Spawner::Threaded => {
                let spawned = thread::Builder::new().name("import".to_string()).spawn(work);
                if let Err(e) = spawned {
                    error!(error = %e, "could not spawn import thread");
                }
            }
            Spawner::Inline => work(),
        }
    }
}

/// Sleeps for `duration` in small slices, bailing out as soon as a stop
/// arrives. Returns `false` if the sleep was cut short.
fn sleep_interruptible(duration: Duration, shutdown: &Shutdown) -> bool {
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if shutdown.is_stopped() {
            return false;
        }
        let slice = remaining.min(SLEEP_SLICE);
        thread::sleep(slice);
        remaining -= slice;
    }
    !shutdown.is_stopped()
}
