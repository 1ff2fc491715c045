//! Mail transport seam for completion notifications.
//!
//! # Responsibility
//! - Define the injectable transport the notifier dispatches through.
//! - Provide file-outbox and log-only transports for the CLI.
//!
//! # Invariants
//! - One `send` call carries one message to a deduplicated address set.
//! - Transports never log recipient addresses, only counts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod log_transport;
mod outbox;

pub use log_transport::LogMailTransport;
pub use outbox::OutboxMailTransport;

/// One outgoing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMail {
    pub to: BTreeSet<String>,
    pub subject: String,
    pub body: String,
}

/// Transport failure surfaced to the notifier.
#[derive(Debug)]
pub enum MailError {
    Io(std::io::Error),
    Serialize(serde_json::Error),
    /// Transport refused the message.
    Rejected(String),
}

impl Display for MailError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "mail transport io failure: {err}"),
            Self::Serialize(err) => write!(f, "mail serialization failure: {err}"),
            Self::Rejected(reason) => write!(f, "mail rejected: {reason}"),
        }
    }
}

impl Error for MailError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Serialize(err) => Some(err),
            Self::Rejected(_) => None,
        }
    }
}

impl From<std::io::Error> for MailError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for MailError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialize(value)
    }
}

/// Delivers completion notifications.
pub trait MailTransport {
    fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;
}

impl<T: MailTransport + ?Sized> MailTransport for &T {
    fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        (**self).send(mail)
    }
}

impl<T: MailTransport + ?Sized> MailTransport for Box<T> {
    fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        (**self).send(mail)
    }
}
