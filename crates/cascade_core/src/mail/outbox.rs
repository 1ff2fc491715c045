//! File outbox transport: one JSON line per dispatched message.

use super::{MailError, MailTransport, OutgoingMail};
use log::info;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Serialize)]
struct OutboxLine<'a> {
    queued_at_ms: u128,
    to: &'a BTreeSet<String>,
    subject: &'a str,
    body: &'a str,
}

/// Appends messages to a JSONL outbox consumed by an external mailer.
#[derive(Debug, Clone)]
pub struct OutboxMailTransport {
    path: PathBuf,
}

impl OutboxMailTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MailTransport for OutboxMailTransport {
    fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        if mail.to.is_empty() {
            return Err(MailError::Rejected("no recipients".to_string()));
        }

        let queued_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        let mut line = serde_json::to_string(&OutboxLine {
            queued_at_ms,
            to: &mail.to,
            subject: &mail.subject,
            body: &mail.body,
        })?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        info!(
            "event=mail_send module=mail status=ok transport=outbox recipient_count={}",
            mail.to.len()
        );
        Ok(())
    }
}
