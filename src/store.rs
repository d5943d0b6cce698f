use std::error::Error as StdError;
use std::fmt;

use tracing::info;

use crate::message::MailMessage;

/// Failure to insert a message into a backend.
///
/// These are treated as retryable: the dispatcher re-flags the message
/// unseen so a later cycle picks it up again.
#[derive(Debug)]
pub struct BackendError {
    message: String,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        BackendError {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        BackendError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for BackendError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| &**e as &(dyn StdError + 'static))
    }
}

/// Where imported messages go.
///
/// `insert` must be all-or-nothing from the caller's point of view: either
/// the message is stored, or an error comes back and nothing is kept.
pub trait Store {
    fn insert(&self, message: &MailMessage) -> Result<(), BackendError>;
}

/// A backend that only records what it would have stored. Stands in when
/// no real ticket backend is wired up.
#[derive(Debug, Default)]
pub struct LogStore;

impl Store for LogStore {
    fn insert(&self, message: &MailMessage) -> Result<(), BackendError> {
        let from = message
            .envelope
            .from
            .first()
            .map(|a| a.email.as_str())
            .unwrap_or("<unknown>");
        info!(
            subject = %message.subject,
            message_id = message.message_id.as_deref().unwrap_or(""),
            from,
            attachments = message.attachments.len(),
            "imported message"
        );
        Ok(())
    }
}
