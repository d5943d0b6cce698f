use std::error::Error as StdError;
use std::fmt;
use std::io::Error as IoError;
use std::io::ErrorKind;
use std::net::TcpStream;
use std::result;
use std::str::Utf8Error;

use bufstream::IntoInnerError as BufError;
use imap_proto::{Response, Status};
use native_tls::Error as TlsError;
use native_tls::HandshakeError as TlsHandshakeError;

pub type Result<T> = result::Result<T, Error>;

/// A set of errors that can occur while talking to the IMAP server.
#[derive(Debug)]
pub enum Error {
    /// An `io::Error` that occurred while trying to read or write to a network stream.
    Io(IoError),
    /// An error from the `native_tls` library during the TLS handshake.
    TlsHandshake(TlsHandshakeError<TcpStream>),
    /// An error from the `native_tls` library while managing the socket.
    Tls(TlsError),
    /// The server responded BAD to a command.
    Bad(String),
    /// The server responded NO to a command.
    No(String),
    /// The connection was terminated unexpectedly, or the server said BYE.
    ConnectionLost,
    /// Error parsing a server response.
    Parse(ParseError),
    /// Command input contained a character the protocol cannot carry.
    Validate(ValidateError),
}

impl Error {
    /// True for failures of the underlying transport, where only a fresh
    /// connection can help.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Tls(_) | Error::TlsHandshake(_) | Error::ConnectionLost
        )
    }

    /// True when a blocking call was cut short by a signal.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == ErrorKind::Interrupted)
    }
}

impl From<IoError> for Error {
    fn from(err: IoError) -> Error {
        Error::Io(err)
    }
}

impl<T> From<BufError<T>> for Error {
    fn from(err: BufError<T>) -> Error {
        Error::Io(err.into())
    }
}

impl From<TlsHandshakeError<TcpStream>> for Error {
    fn from(err: TlsHandshakeError<TcpStream>) -> Error {
        Error::TlsHandshake(err)
    }
}

impl From<TlsError> for Error {
    fn from(err: TlsError) -> Error {
        Error::Tls(err)
    }
}

impl<'a> From<Response<'a>> for Error {
    fn from(response: Response<'a>) -> Error {
        match response {
            Response::Data {
                status: Status::Bye,
                ..
            } => Error::ConnectionLost,
            Response::Data {
                status: Status::No,
                information,
                ..
            } => Error::No(
                information
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "no explanation given".to_string()),
            ),
            Response::Data {
                status: Status::Bad,
                information,
                ..
            } => Error::Bad(
                information
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "no explanation given".to_string()),
            ),
            response => Error::Parse(ParseError::Unexpected(format!("{:?}", response))),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "io: {}", e),
            Error::Tls(e) => write!(f, "tls: {}", e),
            Error::TlsHandshake(e) => write!(f, "tls handshake: {}", e),
            Error::Bad(data) => write!(f, "BAD response: {}", data),
            Error::No(data) => write!(f, "NO response: {}", data),
            Error::ConnectionLost => f.write_str("connection lost"),
            Error::Parse(e) => write!(f, "parse: {}", e),
            Error::Validate(e) => write!(f, "validate: {}", e),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Tls(e) => Some(e),
            Error::TlsHandshake(e) => Some(e),
            Error::Parse(e) => Some(e),
            Error::Validate(e) => Some(e),
            _ => None,
        }
    }
}

/// An error parsing a server response.
#[derive(Debug)]
pub enum ParseError {
    /// The response could not be parsed at all.
    Invalid(Vec<u8>),
    /// The response parsed, but was not one this command can answer with.
    Unexpected(String),
    /// A FETCH reply header did not carry a leading UID and a literal.
    FetchLine(String),
    /// A response line that should be text was not valid UTF-8.
    DataNotUtf8(Utf8Error),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Invalid(data) => {
                write!(f, "unparseable response: {:?}", String::from_utf8_lossy(data))
            }
            ParseError::Unexpected(what) => write!(f, "unexpected response: {}", what),
            ParseError::FetchLine(line) => {
                write!(f, "fetch reply header did not match: {:?}", line)
            }
            ParseError::DataNotUtf8(_) => f.write_str("response text is not valid UTF-8"),
        }
    }
}

impl StdError for ParseError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ParseError::DataNotUtf8(e) => Some(e),
            _ => None,
        }
    }
}

// Invalid character found. Expand as needed
#[derive(Debug)]
pub struct ValidateError(pub char);

impl fmt::Display for ValidateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // print character in debug form because invalid ones are often whitespaces
        write!(f, "invalid character in input: {:?}", self.0)
    }
}

impl StdError for ValidateError {}
