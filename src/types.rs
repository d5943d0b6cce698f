use std::collections::HashSet;
use std::fmt;

use imap_proto::{MailboxDatum, Response};

/// Message sequence number within the currently selected mailbox.
///
/// Sequence numbers shift when messages are expunged, so they are only
/// meaningful while the selection that produced them is still open.
pub type Seq = u32;

/// Unique identifier of a message, stable across sessions as long as the
/// mailbox keeps its UIDVALIDITY.
pub type Uid = u32;

/// One message as pulled off the wire, body bytes still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub seq: Seq,
    pub uid: Uid,
    pub body: Vec<u8>,
}

/// Summary of the selected mailbox, built from the untagged responses the
/// server sends while answering SELECT or EXAMINE.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub exists: u32,
    pub recent: u32,
    pub unseen: Option<u32>,
    pub uid_next: Option<Uid>,
    pub uid_validity: Option<u32>,
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "exists: {}, recent: {}, unseen: {:?}, uid_next: {:?}, uid_validity: {:?}",
            self.exists, self.recent, self.unseen, self.uid_next, self.uid_validity
        )
    }
}

/// A status change the server pushed at us without being asked.
///
/// These arrive interleaved with command responses and during IDLE; the
/// session queues them so no update is lost between reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// The mailbox now holds this many messages.
    Exists(u32),
    /// This many messages arrived since the last status update.
    Recent(u32),
    /// The message with this sequence number was permanently removed.
    Expunge(Seq),
}

/// Conversion from the subset of `imap_proto::Response` values a server sends
/// unilaterally. Everything else is handed back to the caller untouched.
impl<'a> TryFrom<Response<'a>> for Notification {
    type Error = Response<'a>;

    fn try_from(response: Response<'a>) -> Result<Self, Self::Error> {
        match response {
            Response::MailboxData(MailboxDatum::Exists(n)) => Ok(Notification::Exists(n)),
            Response::MailboxData(MailboxDatum::Recent(n)) => Ok(Notification::Recent(n)),
            Response::Expunge(n) => Ok(Notification::Expunge(n)),
            response => Err(response),
        }
    }
}

/// The set of capability atoms the server advertises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities(pub(crate) HashSet<String>);

impl Capabilities {
    /// Checks whether the server claims the given capability. Capability
    /// names compare case-insensitively per RFC 3501.
    pub fn has(&self, cap: &str) -> bool {
        self.0.iter().any(|c| c.eq_ignore_ascii_case(cap))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
