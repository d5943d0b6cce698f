//! Watches an IMAP mailbox and feeds new mail into a message store.
//!
//! The usual entry point is [`runner::Runner`], which owns the whole
//! watch-and-import loop: it connects over TLS, either polls on a timer
//! or holds an IDLE subscription, fetches whatever the server flags as
//! unseen, parses each message down to text and attachments, and hands
//! the result to a [`store::Store`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use inboxd::config::{Config, ImapConfig};
//! use inboxd::runner::Runner;
//! use inboxd::signals::{self, Shutdown};
//! use inboxd::store::LogStore;
//!
//! let config = Config {
//!     imap: ImapConfig {
//!         host: "imap.example.com".to_string(),
//!         port: 993,
//!         username: "reader@example.com".to_string(),
//!         password: "hunter2".to_string(),
//!     },
//!     mailbox: "INBOX".to_string(),
//!     interval: Duration::from_secs(30),
//!     subscribe: true,
//!     inline_dispatch: false,
//! };
//!
//! let shutdown = Shutdown::new();
//! signals::install(Arc::clone(&shutdown), || {}).unwrap();
//! Runner::new(config, Arc::new(LogStore), shutdown).run();
//! ```
//!
//! The pieces compose on their own as well. A one-shot sweep of a
//! mailbox, without the daemon around it:
//!
//! ```no_run
//! use inboxd::message::MailMessage;
//!
//! # fn main() -> inboxd::Result<()> {
//! let client = inboxd::connect(("imap.example.com", 993), "imap.example.com")?;
//! let mut session = client.login("reader@example.com", "hunter2").map_err(|e| e.0)?;
//! {
//!     let mut inbox = session.mailbox("INBOX", false)?;
//!     for raw in inbox.unseen_messages()? {
//!         if let Ok(message) = MailMessage::parse(&raw.body) {
//!             println!("{}", message.subject);
//!         }
//!     }
//! }
//! session.logout()
//! # }
//! ```

mod parse;
mod types;

pub mod client;
pub mod config;
pub mod decode;
pub mod dispatch;
pub mod error;
pub mod idle;
pub mod message;
pub mod reader;
pub mod runner;
pub mod signals;
pub mod store;

pub use crate::client::{connect, Client, Session};
pub use crate::error::{Error, Result};
pub use crate::types::*;

#[cfg(test)]
mod mock_stream;
