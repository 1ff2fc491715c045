//! Completion notifier: resolves recipients and dispatches one message per run.
//!
//! # Responsibility
//! - Filter recipients down to a deduplicated set of deliverable addresses.
//! - Send a single completion message through the injected transport.
//!
//! # Invariants
//! - Inactive, blank, malformed and automation addresses are never dispatched to.
//! - An empty resolved set skips dispatch silently.
//! - Recipient-load and transport failures are logged and returned as
//!   `NotificationOutcome::Failed`; they never escape as errors.

use crate::config::NotifierConfig;
use crate::mail::{MailTransport, OutgoingMail};
use crate::model::recipient::Recipient;
use crate::repo::recipient_repo::RecipientRepository;
use log::{debug, error, info};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static EMAIL_SHAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+$").expect("valid email shape regex"));

/// Run totals rendered into the notification body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionSummary {
    pub chunks_processed: usize,
    pub roots_updated: usize,
    pub children_updated: usize,
    pub chunk_failures: usize,
}

/// What happened to the completion notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    Sent { recipient_count: usize },
    /// Resolved recipient set was empty.
    Skipped,
    Failed { reason: String },
}

/// Builds the dispatch set from raw recipients.
///
/// Keeps active recipients whose trimmed address is non-blank and does not
/// start with `exclusion_prefix`. The prefix is matched literally and
/// case-sensitively; an empty prefix excludes nothing.
///
/// On top of the blank check, an address must also have the `local@domain`
/// shape (one `@`, no whitespace, non-empty halves). Active recipients with a
/// non-blank address that fails this shape check, such as `ops-team`, are
/// dropped and never dispatched to.
pub fn resolve_recipients(recipients: &[Recipient], exclusion_prefix: &str) -> BTreeSet<String> {
    recipients
        .iter()
        .filter(|recipient| recipient.is_active)
        .filter_map(Recipient::trimmed_email)
        .filter(|address| EMAIL_SHAPE_RE.is_match(address))
        .filter(|address| exclusion_prefix.is_empty() || !address.starts_with(exclusion_prefix))
        .map(str::to_string)
        .collect()
}

/// Renders the plain-text completion body.
pub fn compose_body(summary: &CompletionSummary) -> String {
    let mut body = format!(
        "The marker cascade batch has completed.\n\n\
         Chunks processed: {}\n\
         Root records updated: {}\n\
         Child records updated: {}\n",
        summary.chunks_processed, summary.roots_updated, summary.children_updated
    );
    if summary.chunk_failures > 0 {
        body.push_str(&format!(
            "Chunk failures recorded: {}\n",
            summary.chunk_failures
        ));
    }
    body
}

/// Single-shot completion notifier.
#[derive(Debug)]
pub struct CompletionNotifier<R: RecipientRepository, M: MailTransport> {
    recipients: R,
    transport: M,
    config: NotifierConfig,
}

impl<R: RecipientRepository, M: MailTransport> CompletionNotifier<R, M> {
    pub fn new(recipients: R, transport: M, config: NotifierConfig) -> Self {
        Self {
            recipients,
            transport,
            config,
        }
    }

    /// Loads, resolves and dispatches to the configured recipients.
    pub fn notify(&self, summary: &CompletionSummary) -> NotificationOutcome {
        let recipients = match self.recipients.list_active_recipients() {
            Ok(recipients) => recipients,
            Err(err) => {
                error!(
                    "event=notify_dispatch module=service status=error error_code=recipient_load_failed error={err}"
                );
                return NotificationOutcome::Failed {
                    reason: err.to_string(),
                };
            }
        };

        let resolved = resolve_recipients(&recipients, &self.config.exclusion_prefix);
        debug!(
            "event=notify_resolve module=service status=ok candidates={} resolved={}",
            recipients.len(),
            resolved.len()
        );
        self.dispatch(resolved, summary)
    }

    /// Sends one message to an already resolved address set.
    pub fn dispatch(
        &self,
        to: BTreeSet<String>,
        summary: &CompletionSummary,
    ) -> NotificationOutcome {
        if to.is_empty() {
            info!("event=notify_dispatch module=service status=skip reason=no_recipients");
            return NotificationOutcome::Skipped;
        }

        let mail = OutgoingMail {
            to,
            subject: self.config.subject.clone(),
            body: compose_body(summary),
        };
        match self.transport.send(&mail) {
            Ok(()) => {
                info!(
                    "event=notify_dispatch module=service status=ok recipient_count={}",
                    mail.to.len()
                );
                NotificationOutcome::Sent {
                    recipient_count: mail.to.len(),
                }
            }
            Err(err) => {
                error!(
                    "event=notify_dispatch module=service status=error error_code=mail_dispatch_failed error={err}"
                );
                NotificationOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }
}
