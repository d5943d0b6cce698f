use std::fmt;
use std::time::Duration;

/// Everything the run loop needs to know about one watched mailbox.
#[derive(Clone, Debug)]
pub struct Config {
    /// Server endpoint and credentials.
    pub imap: ImapConfig,
    /// Mailbox to watch, usually `INBOX`.
    pub mailbox: String,
    /// Delay between poll passes when not subscribed. Reconnects after a
    /// dropped session run on their own fixed delay.
    pub interval: Duration,
    /// Hold an IDLE subscription instead of polling on a timer.
    pub subscribe: bool,
    /// Run imports on the watcher thread instead of spawning one per
    /// notification. Keeps log lines in order when debugging.
    pub inline_dispatch: bool,
}

/// Server endpoint and credentials.
#[derive(Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ImapConfig {
    // keep the password out of logs
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
