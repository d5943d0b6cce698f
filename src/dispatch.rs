use std::io::{Read, Write};

use tracing::{debug, error, info};

use crate::error::Result;
use crate::message::MailMessage;
use crate::reader::SelectedMailbox;
use crate::store::Store;

/// What one import pass over the unseen messages did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportOutcome {
    /// Messages handed to the backend.
    pub imported: usize,
    /// Backend refusals, re-flagged unseen for a later cycle.
    pub requeued: usize,
    /// Messages whose bytes could not be made sense of, left seen.
    pub rejected: usize,
}

/// Fetches every unseen message and hands each one to the backend.
///
/// The FETCH marks the whole batch seen, which is what claims it. What
/// happens on failure depends on whose failure it is: a backend refusal
/// gets the message re-flagged unseen, because the same bytes may well go
/// through next time. Bytes that cannot be parsed or decoded never will,
/// so those stay seen and are only reported.
pub fn import_unseen<T, S>(
    mailbox: &mut SelectedMailbox<'_, T>,
    store: &S,
) -> Result<ImportOutcome>
where
    T: Read + Write,
    S: Store + ?Sized,
{
    let mut outcome = ImportOutcome::default();

    for raw in mailbox.unseen_messages()? {
        let message = match MailMessage::parse(&raw.body) {
            Ok(message) => message,
            Err(e) => {
                error!(seq = raw.seq, uid = raw.uid, error = %e, "skipping message");
                outcome.rejected += 1;
                continue;
            }
        };

        match store.insert(&message) {
            Ok(()) => {
                debug!(seq = raw.seq, uid = raw.uid, subject = %message.subject, "imported");
                outcome.imported += 1;
            }
            Err(e) => {
                error!(seq = raw.seq, uid = raw.uid, error = %e, "backend refused message");
                mailbox.mark_unseen(raw.seq)?;
                outcome.requeued += 1;
            }
        }
    }

    if outcome.imported + outcome.requeued + outcome.rejected > 0 {
        info!(
            imported = outcome.imported,
            requeued = outcome.requeued,
            rejected = outcome.rejected,
            "import cycle finished"
        );
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::client::Session;
    use crate::store::BackendError;

    /// Records inserted subjects, refusing any message whose subject is
    /// listed as unwanted.
    #[derive(Default)]
    struct PickyStore {
        unwanted: Vec<String>,
        inserted: RefCell<Vec<String>>,
    }

    impl PickyStore {
        fn refusing(subject: &str) -> Self {
            PickyStore {
                unwanted: vec![subject.to_string()],
                ..PickyStore::default()
            }
        }
    }

    impl Store for PickyStore {
        fn insert(&self, message: &MailMessage) -> std::result::Result<(), BackendError> {
            if self.unwanted.contains(&message.subject) {
                return Err(BackendError::new("backend refused"));
            }
            self.inserted.borrow_mut().push(message.subject.clone());
            Ok(())
        }
    }

    fn select_and_search(ids: &str) -> Vec<u8> {
        let mut response = b"* 9 EXISTS\r\na1 OK Select completed\r\n".to_vec();
        response.extend_from_slice(format!("* SEARCH{}\r\n", ids).as_bytes());
        response.extend_from_slice(b"a2 OK SEARCH completed\r\n");
        response
    }

    fn fetch_reply(response: &mut Vec<u8>, seq: u32, uid: u32, body: &[u8]) {
        response
            .extend_from_slice(format!("* {} FETCH (UID {} RFC822 {{{}}}\r\n", seq, uid, body.len()).as_bytes());
        response.extend_from_slice(body);
        response.extend_from_slice(b")\r\n");
    }

    #[test]
    fn imports_whole_batch() {
        let mut response = select_and_search(" 1 2");
        fetch_reply(&mut response, 1, 7, b"Subject: first\r\n\r\nhello");
        fetch_reply(&mut response, 2, 8, b"Subject: second\r\n\r\nworld");
        response.extend_from_slice(b"a3 OK FETCH completed\r\n");
        response.extend_from_slice(b"a4 OK CLOSE completed\r\n");

        let mut session = Session::testing(response);
        let store = PickyStore::default();
        {
            let mut mailbox = session.mailbox("INBOX", false).unwrap();
            let outcome = import_unseen(&mut mailbox, &store).unwrap();
            assert_eq!(outcome.imported, 2);
            assert_eq!(outcome.requeued, 0);
            assert_eq!(outcome.rejected, 0);
        }
        assert_eq!(*store.inserted.borrow(), vec!["first", "second"]);
        assert_eq!(
            session.written(),
            &b"a1 SELECT \"INBOX\"\r\n\
               a2 SEARCH UNSEEN\r\n\
               a3 FETCH 1:2 (UID RFC822)\r\n\
               a4 CLOSE\r\n"[..]
        );
    }

    #[test]
    fn nothing_unseen_is_a_quiet_noop() {
        let mut response = select_and_search("");
        response.extend_from_slice(b"a3 OK CLOSE completed\r\n");

        let mut session = Session::testing(response);
        let store = PickyStore::default();
        {
            let mut mailbox = session.mailbox("INBOX", false).unwrap();
            let outcome = import_unseen(&mut mailbox, &store).unwrap();
            assert_eq!(outcome, ImportOutcome::default());
        }
        assert!(store.inserted.borrow().is_empty());
    }

    #[test]
    fn backend_refusal_requeues_the_message() {
        let mut response = select_and_search(" 2");
        fetch_reply(&mut response, 2, 11, b"Subject: bad\r\n\r\nnope");
        response.extend_from_slice(b"a3 OK FETCH completed\r\n");
        response.extend_from_slice(b"* 2 FETCH (FLAGS ())\r\na4 OK STORE completed\r\n");
        response.extend_from_slice(b"a5 OK CLOSE completed\r\n");

        let mut session = Session::testing(response);
        let store = PickyStore::refusing("bad");
        {
            let mut mailbox = session.mailbox("INBOX", false).unwrap();
            let outcome = import_unseen(&mut mailbox, &store).unwrap();
            assert_eq!(outcome.imported, 0);
            assert_eq!(outcome.requeued, 1);
            assert_eq!(outcome.rejected, 0);
        }
        assert_eq!(
            session.written(),
            &b"a1 SELECT \"INBOX\"\r\n\
               a2 SEARCH UNSEEN\r\n\
               a3 FETCH 2 (UID RFC822)\r\n\
               a4 STORE 2 -FLAGS (\\Seen)\r\n\
               a5 CLOSE\r\n"[..]
        );
    }

    #[test]
    fn undecodable_message_stays_seen() {
        let mut body = b"Subject: x\r\nContent-Type: text/plain; charset=\"utf-8\"\r\n\r\n".to_vec();
        // undecodable under the labelled charset and the detected one alike
        body.extend_from_slice(b"\xff\xfe\x00\xd8");

        let mut response = select_and_search(" 3");
        fetch_reply(&mut response, 3, 12, &body);
        response.extend_from_slice(b"a3 OK FETCH completed\r\n");
        response.extend_from_slice(b"a4 OK CLOSE completed\r\n");

        let mut session = Session::testing(response);
        let store = PickyStore::default();
        {
            let mut mailbox = session.mailbox("INBOX", false).unwrap();
            let outcome = import_unseen(&mut mailbox, &store).unwrap();
            assert_eq!(outcome.imported, 0);
            assert_eq!(outcome.requeued, 0);
            assert_eq!(outcome.rejected, 1);
        }
        // no STORE; the message is not re-flagged
        assert_eq!(
            session.written(),
            &b"a1 SELECT \"INBOX\"\r\n\
               a2 SEARCH UNSEEN\r\n\
               a3 FETCH 3 (UID RFC822)\r\n\
               a4 CLOSE\r\n"[..]
        );
        assert!(store.inserted.borrow().is_empty());
    }

    #[test]
    fn mixed_batch_handles_each_message_on_its_own() {
        let mut response = select_and_search(" 1 2");
        fetch_reply(&mut response, 1, 20, b"Subject: good\r\n\r\nfine");
        fetch_reply(&mut response, 2, 21, b"Subject: bad\r\n\r\nrefused");
        response.extend_from_slice(b"a3 OK FETCH completed\r\n");
        response.extend_from_slice(b"* 2 FETCH (FLAGS ())\r\na4 OK STORE completed\r\n");
        response.extend_from_slice(b"a5 OK CLOSE completed\r\n");

        let mut session = Session::testing(response);
        let store = PickyStore::refusing("bad");
        {
            let mut mailbox = session.mailbox("INBOX", false).unwrap();
            let outcome = import_unseen(&mut mailbox, &store).unwrap();
            assert_eq!(outcome.imported, 1);
            assert_eq!(outcome.requeued, 1);
        }
        assert_eq!(*store.inserted.borrow(), vec!["good"]);
    }
}
