use std::io::{Read, Write};

use tracing::debug;

use crate::client::Session;
use crate::error::Result;
use crate::parse::{compress_sequence_set, parse_fetch_batch};
use crate::types::{Mailbox, RawMessage, Seq};

/// A mailbox held open on a session.
///
/// The guard borrows the session exclusively, so no other command can be
/// interleaved while a mailbox is selected. Dropping it issues CLOSE,
/// returning the session to the authenticated state.
#[derive(Debug)]
pub struct SelectedMailbox<'a, T: Read + Write> {
    session: &'a mut Session<T>,
    /// Counts and UID bookkeeping the server reported when selecting.
    pub summary: Mailbox,
    read_only: bool,
}

impl<T: Read + Write> Session<T> {
    /// Opens the named mailbox until the returned guard is dropped.
    ///
    /// A read-only open uses EXAMINE, which leaves `\Seen` flags untouched
    /// even when messages are fetched. The watch loop opens its mailbox
    /// that way; the import cycle needs SELECT so fetched messages get
    /// claimed.
    pub fn mailbox(&mut self, name: &str, read_only: bool) -> Result<SelectedMailbox<'_, T>> {
        let summary = self.select(name, read_only)?;
        debug!(
            mailbox = name,
            read_only,
            exists = summary.exists,
            "mailbox selected"
        );
        Ok(SelectedMailbox {
            session: self,
            summary,
            read_only,
        })
    }
}

impl<'a, T: Read + Write> SelectedMailbox<'a, T> {
    /// Sequence numbers of the messages without the `\Seen` flag, ascending.
    pub fn unseen_ids(&mut self) -> Result<Vec<Seq>> {
        self.session.search("UNSEEN")
    }

    /// Downloads every unseen message in one batched FETCH.
    ///
    /// The whole batch is collected before any message is processed, so a
    /// reply that turns out to be malformed fails the cycle as a unit
    /// instead of leaving it half done.
    pub fn unseen_messages(&mut self) -> Result<Vec<RawMessage>> {
        let ids = self.unseen_ids()?;
        let set = match compress_sequence_set(&ids) {
            Some(set) => set,
            None => return Ok(Vec::new()),
        };
        debug!(count = ids.len(), %set, "fetching unseen messages");
        let lines = self.session.fetch_raw(&set, "(UID RFC822)")?;
        parse_fetch_batch(&lines)
    }

    /// Clears the `\Seen` flag a FETCH implicitly set, putting the message
    /// back into the next unseen sweep.
    pub fn mark_unseen(&mut self, seq: Seq) -> Result<()> {
        self.session.store(&seq.to_string(), "-FLAGS (\\Seen)")
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn session_mut(&mut self) -> &mut Session<T> {
        self.session
    }
}

impl<'a, T: Read + Write> Drop for SelectedMailbox<'a, T> {
    fn drop(&mut self) {
        // the server may already be gone; CLOSE is best effort
        let _ = self.session.close();
    }
}
