//! Long-polling for mailbox changes with the IMAP IDLE command specified
//! in [RFC 2177](https://tools.ietf.org/html/rfc2177).

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use native_tls::TlsStream;
use tracing::debug;

use crate::client::Session;
use crate::error::{Error, Result};
use crate::parse::parse_idle;
use crate::reader::SelectedMailbox;
use crate::types::Notification;

/// The server MAY consider a client inactive if it has an IDLE command
/// running, and if such a server has an inactivity timeout it MAY log the
/// client off implicitly at the end of its timeout period. Because of
/// that, clients using IDLE are advised to terminate the IDLE and
/// re-issue it at least every 29 minutes to avoid being logged off.
const KEEPALIVE_CEILING: Duration = Duration::from_secs(29 * 60);

/// `Handle` blocks on one issue of the IDLE command until the server
/// pushes a change or the keepalive interval runs out.
///
/// As long as a `Handle` is active, the mailbox cannot be otherwise
/// accessed.
#[derive(Debug)]
pub struct Handle<'a, T: Read + Write> {
    session: &'a mut Session<T>,
    keepalive: Duration,
    done: bool,
}

/// Must be implemented for a transport in order for a `Session` using that
/// transport to support operations with timeouts.
///
/// See also `std::net::TcpStream::set_read_timeout`.
pub trait SetReadTimeout {
    /// Set the timeout for subsequent reads to the given one.
    ///
    /// If `timeout` is `None`, the read timeout should be removed.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;
}

impl<'a, T: Read + Write> Handle<'a, T> {
    pub(crate) fn make(session: &'a mut Session<T>) -> Result<Self> {
        let mut h = Handle {
            session,
            keepalive: KEEPALIVE_CEILING,
            done: false,
        };
        h.init()?;
        Ok(h)
    }

    fn init(&mut self) -> Result<()> {
        // https://tools.ietf.org/html/rfc2177
        //
        // The IDLE command takes no arguments.
        self.session.run_command("IDLE")?;

        // A tagged response will be sent either
        //
        //   a) if there's an error, or
        //   b) *after* we send DONE
        let mut v = Vec::new();
        self.session.readline(&mut v)?;
        if v.starts_with(b"+") {
            self.done = false;
            return Ok(());
        }

        self.session.read_response_onto(&mut v)?;
        // We should *only* get a continuation on an error (i.e., it gives BAD or NO).
        unreachable!();
    }

    /// Ends the IDLE and consumes its tagged completion, routing any burst
    /// of updates that raced with the DONE into the notification channel.
    fn terminate(&mut self) -> Result<()> {
        if !self.done {
            self.done = true;
            self.session.write_line(b"DONE")?;
            self.read_completion()?;
        }
        Ok(())
    }

    fn read_completion(&mut self) -> Result<()> {
        let mut buffer = Vec::new();
        loop {
            buffer.truncate(0);
            self.session.readline(&mut buffer)?;
            if parse_idle(&buffer, &mut self.session.notifications_tx)? {
                return Ok(());
            }
        }
    }

    fn wait_inner(&mut self) -> Result<bool> {
        let mut buffer = Vec::new();
        match self.session.readline(&mut buffer).map(|_| ()) {
            Err(Error::Io(ref e))
                if e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::WouldBlock =>
            {
                // nothing happened for a full keepalive interval
                self.terminate()?;
                Ok(false)
            }
            Err(err) => Err(err),
            Ok(_) => {
                parse_idle(&buffer, &mut self.session.notifications_tx)?;
                self.terminate()?;
                Ok(true)
            }
        }
    }
}

impl<'a, T: SetReadTimeout + Read + Write> Handle<'a, T> {
    /// Set the keepalive interval to use when `wait_keepalive` is called.
    ///
    /// Defaults to 29 minutes, which is also the ceiling RFC 2177 advises;
    /// longer intervals are clamped down to it.
    pub fn set_keepalive(&mut self, interval: Duration) {
        self.keepalive = interval.min(KEEPALIVE_CEILING);
    }

    /// Block until the selected mailbox changes, or until the keepalive
    /// interval has elapsed.
    ///
    /// Returns whether anything happened. Either way the IDLE has been
    /// terminated when this returns, so the caller can run other commands
    /// and is free to re-issue the wait. Pushed updates are waiting in the
    /// session's notification channel.
    pub fn wait_keepalive(mut self) -> Result<bool> {
        self.session
            .stream
            .get_mut()
            .set_read_timeout(Some(self.keepalive))?;
        let res = self.wait_inner();
        let _ = self.session.stream.get_mut().set_read_timeout(None);
        res
    }
}

impl<'a, T: Read + Write> Drop for Handle<'a, T> {
    fn drop(&mut self) {
        // we don't want to panic here if we can't terminate the Idle
        let _ = self.terminate();
    }
}

impl SetReadTimeout for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        TcpStream::set_read_timeout(self, timeout).map_err(Error::Io)
    }
}

impl<T: SetReadTimeout + Read + Write> SetReadTimeout for TlsStream<T> {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.get_mut().set_read_timeout(timeout)
    }
}

impl<'a, T: SetReadTimeout + Read + Write> SelectedMailbox<'a, T> {
    /// Returns a handle that blocks until the state of this mailbox
    /// changes.
    pub fn idle(&mut self) -> Result<Handle<'_, T>> {
        Handle::make(self.session_mut())
    }

    /// Runs the IDLE loop until `stop` is raised, invoking `on_activity`
    /// with each batch of changes the server pushed.
    ///
    /// Updates that piled up before the watch started are dropped first;
    /// whatever was unseen at that point is the business of the import
    /// cycle that ran before us. Each wake-up hands over everything that
    /// arrived together, so a burst of deliveries triggers one callback,
    /// not one per message.
    ///
    /// `stop` is consulted between waits, which means a raise during a
    /// quiet stretch takes effect at the next keepalive expiry.
    pub fn watch<F>(&mut self, stop: &AtomicBool, mut on_activity: F) -> Result<()>
    where
        F: FnMut(&[Notification]),
    {
        let stale = self.session_mut().drain_notifications();
        if !stale.is_empty() {
            debug!(
                count = stale.len(),
                "dropping notifications from before the watch"
            );
        }

        while !stop.load(Ordering::SeqCst) {
            self.idle()?.wait_keepalive()?;
            let fresh = self.session_mut().drain_notifications();
            if stop.load(Ordering::SeqCst) {
                break;
            }
            if !fresh.is_empty() {
                on_activity(&fresh);
            }
        }
        Ok(())
    }
}
