//! Log-only transport used when no outbox is configured.

use super::{MailError, MailTransport, OutgoingMail};
use log::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailTransport;

impl MailTransport for LogMailTransport {
    fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        info!(
            "event=mail_send module=mail status=ok transport=log recipient_count={} subject_chars={} body_chars={}",
            mail.to.len(),
            mail.subject.chars().count(),
            mail.body.chars().count()
        );
        Ok(())
    }
}
