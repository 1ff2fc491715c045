//! Batch runner: drives locator, chunk processor and notifier for one run.
//!
//! # Responsibility
//! - Pull fixed-size pages from the root cursor and process them in order.
//! - Retry chunks with recorded failures when the retry policy allows it.
//! - Fire the completion notifier exactly once after every chunk was attempted.
//!
//! # Invariants
//! - Chunks run sequentially; cancellation is observed only between chunks.
//! - A root row whose id does not parse is recorded against its chunk; the
//!   cursor moves past it and the remaining chunks still run.
//! - Only `StoreUnreachable` and invalid configuration surface as errors;
//!   chunk and notification failures are recorded on the `RunReport`.

use crate::config::BatchConfig;
use crate::mail::MailTransport;
use crate::model::entity::{Chunk, RootId};
use crate::repo::batch_store::{BatchStore, RepoError};
use crate::repo::recipient_repo::RecipientRepository;
use crate::service::chunk_processor::{
    ChunkFailure, ChunkFailureKind, ChunkOutcome, ChunkProcessor,
};
use crate::service::locator;
use crate::service::notifier::{CompletionNotifier, CompletionSummary, NotificationOutcome};
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Run-level failure.
#[derive(Debug)]
pub enum BatchError {
    /// Store could not be reached when opening the cursor; no chunk ran.
    StoreUnreachable(RepoError),
    InvalidConfig(String),
}

impl Display for BatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StoreUnreachable(err) => write!(f, "batch store unreachable: {err}"),
            Self::InvalidConfig(message) => write!(f, "invalid batch configuration: {message}"),
        }
    }
}

impl Error for BatchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StoreUnreachable(err) => Some(err),
            Self::InvalidConfig(_) => None,
        }
    }
}

/// Shared flag asking a running batch to stop before its next chunk.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Chunks attempted, including failed ones.
    pub chunks_processed: usize,
    pub roots_updated: usize,
    pub children_updated: usize,
    pub chunk_failures: Vec<ChunkFailure>,
    /// `None` when the run was cancelled before all chunks were attempted.
    pub notification: Option<NotificationOutcome>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn summary(&self) -> CompletionSummary {
        CompletionSummary {
            chunks_processed: self.chunks_processed,
            roots_updated: self.roots_updated,
            children_updated: self.children_updated,
            chunk_failures: self.chunk_failures.len(),
        }
    }

    /// `true` when every chunk succeeded and the run was not cancelled.
    pub fn is_clean(&self) -> bool {
        self.chunk_failures.is_empty() && !self.cancelled
    }

    fn absorb(&mut self, outcome: ChunkOutcome) {
        self.chunks_processed += 1;
        self.roots_updated += outcome.updated_roots;
        self.children_updated += outcome.updated_children;
        self.chunk_failures.extend(outcome.failures);
    }
}

/// Sequential chunked runner for the marker cascade.
#[derive(Debug)]
pub struct BatchRunner<S: BatchStore, R: RecipientRepository, M: MailTransport> {
    store: S,
    notifier: CompletionNotifier<R, M>,
    chunk_size: usize,
    max_chunk_attempts: u32,
    cancel: CancelToken,
}

impl<S: BatchStore, R: RecipientRepository, M: MailTransport> BatchRunner<S, R, M> {
    /// Builds a runner after validating `config`.
    ///
    /// # Errors
    /// - `BatchError::InvalidConfig` when `config.validate()` fails.
    pub fn new(
        store: S,
        notifier: CompletionNotifier<R, M>,
        config: &BatchConfig,
    ) -> Result<Self, BatchError> {
        config
            .validate()
            .map_err(|err| BatchError::InvalidConfig(err.to_string()))?;
        Ok(Self {
            store,
            notifier,
            chunk_size: config.chunk_size,
            max_chunk_attempts: config.max_chunk_attempts,
            cancel: CancelToken::new(),
        })
    }

    /// Replaces the runner's cancel token with a caller-held one.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Executes one full run.
    ///
    /// # Errors
    /// - `BatchError::StoreUnreachable` when the cursor cannot be opened.
    pub fn run(&self) -> Result<RunReport, BatchError> {
        let started_at = Instant::now();
        info!(
            "event=batch_run module=service status=start chunk_size={} max_chunk_attempts={}",
            self.chunk_size, self.max_chunk_attempts
        );

        let mut cursor = locator::open(&self.store, self.chunk_size).map_err(|err| {
            error!(
                "event=batch_run module=service status=error duration_ms={} error={err}",
                started_at.elapsed().as_millis()
            );
            err
        })?;
        let processor = ChunkProcessor::new(&self.store);
        let mut report = RunReport::default();

        loop {
            if self.cancel.is_cancelled() {
                warn!(
                    "event=batch_run module=service status=cancelled chunks_processed={}",
                    report.chunks_processed
                );
                report.cancelled = true;
                break;
            }

            let chunk_index = report.chunks_processed;
            let page = match cursor.next_page() {
                Ok(page) => page,
                Err(err) => {
                    error!(
                        "event=cursor_read module=service status=error chunk_index={chunk_index} error={err}"
                    );
                    report.chunk_failures.push(ChunkFailure::new(
                        chunk_index,
                        ChunkFailureKind::CursorRead,
                        err,
                    ));
                    break;
                }
            };
            if page.is_empty() {
                break;
            }

            let mut outcome = if page.ids.is_empty() {
                ChunkOutcome::new(chunk_index)
            } else {
                self.process_with_retry(&processor, chunk_index, &page.ids)
            };
            if !page.malformed.is_empty() {
                warn!(
                    "event=cursor_read module=service status=error chunk_index={chunk_index} error_code=malformed_id count={}",
                    page.malformed.len()
                );
                outcome.record(
                    ChunkFailureKind::MalformedId,
                    format!(
                        "{} root id(s) skipped: {}",
                        page.malformed.len(),
                        page.malformed.join(",")
                    ),
                );
            }
            report.absorb(outcome);
        }

        if !report.cancelled {
            report.notification = Some(self.notifier.notify(&report.summary()));
        }

        info!(
            "event=batch_run module=service status=ok chunks={} roots={} children={} chunk_failures={} cancelled={} duration_ms={}",
            report.chunks_processed,
            report.roots_updated,
            report.children_updated,
            report.chunk_failures.len(),
            report.cancelled,
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }

    fn process_with_retry(
        &self,
        processor: &ChunkProcessor<&S>,
        chunk_index: usize,
        ids: &[RootId],
    ) -> ChunkOutcome {
        let mut attempt = 1;
        loop {
            let outcome = match self.store.load_roots(ids) {
                Ok(roots) => processor.process(&Chunk::new(chunk_index, roots)),
                Err(err) => ChunkOutcome::failed(chunk_index, ChunkFailureKind::ChunkLoad, err),
            };
            if outcome.is_clean() || attempt >= self.max_chunk_attempts {
                return outcome;
            }

            warn!(
                "event=chunk_retry module=service status=retry chunk_index={chunk_index} attempt={attempt} failures={}",
                outcome.failures.len()
            );
            attempt += 1;
        }
    }
}
