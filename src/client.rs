use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::ops::{Deref, DerefMut};
use std::sync::mpsc;

use bufstream::BufStream;
use imap_proto::{Response, Status};
use native_tls::{TlsConnector, TlsStream};
use tracing::trace;

use crate::error::{Error, ParseError, Result, ValidateError};
use crate::parse::{parse_capabilities, parse_ids, parse_mailbox, parse_unsolicited};
use crate::types::{Capabilities, Mailbox, Notification, Seq};

static TAG_PREFIX: &str = "a";
const INITIAL_TAG: u32 = 0;
const CR: u8 = 0x0d;
const LF: u8 = 0x0a;

macro_rules! quote {
    ($x:expr) => {
        format!("\"{}\"", $x.replace(r"\", r"\\").replace('"', "\\\""))
    };
}

macro_rules! ok_or_unauth_client_err {
    ($r:expr, $self:expr) => {
        match $r {
            Ok(o) => o,
            Err(e) => return Err((e, $self)),
        }
    };
}

fn validate_str(value: &str) -> Result<String> {
    let quoted = quote!(value);
    if quoted.contains('\n') {
        return Err(Error::Validate(ValidateError('\n')));
    }
    if quoted.contains('\r') {
        return Err(Error::Validate(ValidateError('\r')));
    }
    Ok(quoted)
}

/// An unauthenticated handle to talk to the server. This is what you get
/// when first connecting. A successful call to [`Client::login`] returns a
/// [`Session`] that provides the mailbox operations.
#[derive(Debug)]
pub struct Client<T: Read + Write> {
    pub(crate) stream: BufStream<T>,
    tag: u32,
}

/// An authenticated IMAP session. Mailbox operations all happen through
/// one of these.
///
/// The session keeps a channel of [`Notification`]s the server volunteered
/// outside of any command we ran. [`Session::drain_notifications`] empties
/// it; the IDLE machinery feeds it while waiting.
#[derive(Debug)]
pub struct Session<T: Read + Write> {
    client: Client<T>,
    pub(crate) notifications_tx: mpsc::Sender<Notification>,
    notifications: mpsc::Receiver<Notification>,
    logged_out: bool,
}

// `Deref` instances so that the methods of the wrapped `Client` are
// reachable on a `Session` without duplicating them.
impl<T: Read + Write> Deref for Session<T> {
    type Target = Client<T>;

    fn deref(&self) -> &Client<T> {
        &self.client
    }
}

impl<T: Read + Write> DerefMut for Session<T> {
    fn deref_mut(&mut self) -> &mut Client<T> {
        &mut self.client
    }
}

/// Connects to the server over TLS and consumes its greeting.
///
/// The `domain` is used both for certificate hostname verification and
/// for SNI, and is usually the host part of `addr`.
pub fn connect<A: ToSocketAddrs>(addr: A, domain: &str) -> Result<Client<TlsStream<TcpStream>>> {
    let ssl_connector = TlsConnector::new()?;
    let stream = TcpStream::connect(addr)?;
    let ssl_stream = ssl_connector.connect(domain, stream)?;

    let mut client = Client::new(ssl_stream);
    client.read_greeting()?;
    Ok(client)
}

impl<T: Read + Write> Client<T> {
    /// Creates a new client over the given stream.
    ///
    /// This is mostly useful for testing and for talking to servers over
    /// pre-established transports; [`connect`] is the normal entry point.
    pub fn new(stream: T) -> Client<T> {
        Client {
            stream: BufStream::new(stream),
            tag: INITIAL_TAG,
        }
    }

    /// Log in to the server.
    ///
    /// In the case of an error, the client is returned along with it so
    /// that the caller can retry with different credentials.
    pub fn login(
        mut self,
        username: &str,
        password: &str,
    ) -> ::std::result::Result<Session<T>, (Error, Client<T>)> {
        let u = ok_or_unauth_client_err!(validate_str(username), self);
        let p = ok_or_unauth_client_err!(validate_str(password), self);
        ok_or_unauth_client_err!(
            self.run_command_and_check_ok(&format!("LOGIN {} {}", u, p)),
            self
        );
        Ok(Session::new(self))
    }

    /// Runs a command and checks if it returns OK.
    pub fn run_command_and_check_ok(&mut self, command: &str) -> Result<()> {
        self.run_command_and_read_response(command).map(|_| ())
    }

    /// Runs any command passed to it.
    pub fn run_command(&mut self, untagged_command: &str) -> Result<()> {
        let command = self.create_command(untagged_command.to_string());
        self.write_line(command.into_bytes().as_slice())
    }

    /// Runs a command and returns the untagged lines the server sent
    /// before the tagged completion.
    pub fn run_command_and_read_response(&mut self, untagged_command: &str) -> Result<Vec<u8>> {
        self.run_command(untagged_command)?;
        self.read_response()
    }

    pub(crate) fn read_response(&mut self) -> Result<Vec<u8>> {
        let mut v = Vec::new();
        self.read_response_onto(&mut v)?;
        Ok(v)
    }

    pub(crate) fn read_response_onto(&mut self, data: &mut Vec<u8>) -> Result<()> {
        let mut continue_from = None;
        let mut try_first = !data.is_empty();
        let match_tag = format!("{}{}", TAG_PREFIX, self.tag);
        loop {
            let line_start = if try_first {
                try_first = false;
                0
            } else {
                let start_new = data.len();
                self.readline(data)?;
                continue_from.take().unwrap_or(start_new)
            };

            let break_with = {
                let line = &data[line_start..];

                match imap_proto::parser::parse_response(line) {
                    Ok((
                        _,
                        Response::Done {
                            tag,
                            status,
                            information,
                            ..
                        },
                    )) => {
                        assert_eq!(tag.as_bytes(), match_tag.as_bytes());
                        Some(match status {
                            Status::Bad | Status::No => {
                                Err((status, information.map(|s| s.to_string())))
                            }
                            Status::Ok => Ok(()),
                            status => Err((status, None)),
                        })
                    }
                    Ok(..) => None,
                    Err(nom::Err::Incomplete(..)) => {
                        // a literal straddles lines; keep reading onto it
                        continue_from = Some(line_start);
                        None
                    }
                    _ => Some(Err((Status::Bye, None))),
                }
            };

            match break_with {
                Some(Ok(_)) => {
                    data.truncate(line_start);
                    break Ok(());
                }
                Some(Err((status, expl))) => match status {
                    Status::Bad => {
                        break Err(Error::Bad(
                            expl.unwrap_or_else(|| "no explanation given".to_string()),
                        ))
                    }
                    Status::No => {
                        break Err(Error::No(
                            expl.unwrap_or_else(|| "no explanation given".to_string()),
                        ))
                    }
                    _ => break Err(Error::Parse(ParseError::Invalid(data.split_off(0)))),
                },
                None => {}
            }
        }
    }

    fn read_greeting(&mut self) -> Result<()> {
        let mut v = Vec::new();
        self.readline(&mut v)?;
        Ok(())
    }

    pub(crate) fn readline(&mut self, into: &mut Vec<u8>) -> Result<usize> {
        use std::io::BufRead;
        let read = self.stream.read_until(LF, into)?;
        if read == 0 {
            return Err(Error::ConnectionLost);
        }

        let len = into.len();
        trace!(
            "S: {}",
            String::from_utf8_lossy(&into[len - read..len]).trim_end()
        );
        Ok(read)
    }

    fn create_command(&mut self, command: String) -> String {
        self.tag += 1;
        format!("{}{} {}", TAG_PREFIX, self.tag, command)
    }

    pub(crate) fn write_line(&mut self, buf: &[u8]) -> Result<()> {
        self.stream.write_all(buf)?;
        self.stream.write_all(&[CR, LF])?;
        self.stream.flush()?;
        trace!("C: {}", String::from_utf8_lossy(buf));
        Ok(())
    }
}

impl<T: Read + Write> Session<T> {
    fn new(client: Client<T>) -> Session<T> {
        let (tx, rx) = mpsc::channel();
        Session {
            client,
            notifications_tx: tx,
            notifications: rx,
            logged_out: false,
        }
    }

    /// Selects a mailbox, as EXAMINE (read-only) or SELECT (read-write).
    pub(crate) fn select(&mut self, mailbox_name: &str, read_only: bool) -> Result<Mailbox> {
        let command = if read_only { "EXAMINE" } else { "SELECT" };
        let lines = self.run_command_and_read_response(&format!(
            "{} {}",
            command,
            validate_str(mailbox_name)?
        ))?;
        parse_mailbox(&lines, &mut self.notifications_tx)
    }

    /// Runs SEARCH with the given query, e.g. `UNSEEN`.
    pub(crate) fn search(&mut self, query: &str) -> Result<Vec<Seq>> {
        let lines = self.run_command_and_read_response(&format!("SEARCH {}", query))?;
        parse_ids(&lines, &mut self.notifications_tx)
    }

    /// Runs FETCH and hands back the raw response lines. Message literals
    /// can hold arbitrary bytes, so splitting the reply apart is left to
    /// the caller.
    pub(crate) fn fetch_raw(&mut self, sequence_set: &str, query: &str) -> Result<Vec<u8>> {
        self.run_command_and_read_response(&format!("FETCH {} {}", sequence_set, query))
    }

    /// Runs STORE, dropping the FETCH echoes servers send for changed flags.
    pub(crate) fn store(&mut self, sequence_set: &str, query: &str) -> Result<()> {
        let lines =
            self.run_command_and_read_response(&format!("STORE {} {}", sequence_set, query))?;
        parse_unsolicited(&lines, &mut self.notifications_tx)
    }

    /// Returns to the authenticated state from the selected state.
    pub(crate) fn close(&mut self) -> Result<()> {
        self.run_command_and_check_ok("CLOSE")
    }

    /// Requests a listing of capabilities that the server supports.
    pub fn capabilities(&mut self) -> Result<Capabilities> {
        let lines = self.run_command_and_read_response("CAPABILITY")?;
        parse_capabilities(&lines, &mut self.notifications_tx)
    }

    /// Empties the channel of updates the server sent without being asked.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        self.notifications.try_iter().collect()
    }

    /// Informs the server that the client is done with the connection.
    ///
    /// Calling this a second time is a no-op, so dropping a session after
    /// an explicit logout does not talk to the server again.
    pub fn logout(&mut self) -> Result<()> {
        if self.logged_out {
            return Ok(());
        }
        self.logged_out = true;
        self.run_command_and_check_ok("LOGOUT")
    }
}

impl<T: Read + Write> Drop for Session<T> {
    fn drop(&mut self) {
        // aborted sessions should still say goodbye
        let _ = self.logout();
    }
}

#[cfg(test)]
impl Session<crate::mock_stream::MockStream> {
    pub(crate) fn testing(read_buf: Vec<u8>) -> Self {
        Session::testing_with(crate::mock_stream::MockStream::new(read_buf))
    }

    pub(crate) fn testing_with(stream: crate::mock_stream::MockStream) -> Self {
        Session::new(Client::new(stream))
    }

    pub(crate) fn written(&self) -> &[u8] {
        &self.client.stream.get_ref().written_buf
    }
}
