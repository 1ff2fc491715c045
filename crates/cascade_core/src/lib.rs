//! Core of the marker cascade batch.
//! Locates root records, stamps them and their children chunk by chunk,
//! then notifies recipients once the run is complete.

pub mod config;
pub mod db;
pub mod logging;
pub mod mail;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{load_config, BatchConfig, ConfigError, NotifierConfig};
pub use logging::{default_log_level, init_logging, logging_status};
pub use mail::{LogMailTransport, MailError, MailTransport, OutboxMailTransport, OutgoingMail};
pub use model::entity::{ChildEntity, ChildId, Chunk, RootEntity, RootId, BATCH_MARKER};
pub use model::recipient::{Recipient, RecipientId};
pub use repo::batch_store::{
    BatchStore, MarkerStatus, RepoError, RepoResult, RootIdPage, SqliteBatchStore, WriteOutcome,
};
pub use repo::recipient_repo::{RecipientRepository, SqliteRecipientRepository};
pub use service::batch_runner::{BatchError, BatchRunner, CancelToken, RunReport};
pub use service::chunk_processor::{ChunkFailure, ChunkFailureKind, ChunkOutcome, ChunkProcessor};
pub use service::notifier::{
    resolve_recipients, CompletionNotifier, CompletionSummary, NotificationOutcome,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
