//! Chunk processor: stamps one chunk of roots and cascades to their children.
//!
//! # Responsibility
//! - Stamp every root of the chunk with the batch marker.
//! - Fetch the children of all staged roots in one batched read and stamp them.
//! - Persist roots and children as two independent batched writes.
//!
//! # Invariants
//! - Only children whose owner is staged in this chunk are written.
//! - A failure of one write never prevents the attempt of the other.
//! - Failures are recorded on the outcome, never raised.

use crate::model::entity::{ChildEntity, Chunk, RootEntity, RootId};
use crate::repo::batch_store::{BatchStore, WriteOutcome};
use log::{info, warn};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Stage at which a chunk failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkFailureKind {
    /// Page of ids could not be read from the cursor.
    CursorRead,
    /// Page contained root ids that are not valid UUIDs.
    MalformedId,
    /// Roots for a page of ids could not be materialized.
    ChunkLoad,
    ChildLookup,
    RootWrite,
    ChildWrite,
}

impl ChunkFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CursorRead => "cursor_read",
            Self::MalformedId => "malformed_id",
            Self::ChunkLoad => "chunk_load",
            Self::ChildLookup => "child_lookup",
            Self::RootWrite => "root_write",
            Self::ChildWrite => "child_write",
        }
    }
}

/// Per-chunk failure record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFailure {
    pub chunk_index: usize,
    pub kind: ChunkFailureKind,
    pub message: String,
}

impl ChunkFailure {
    pub fn new(chunk_index: usize, kind: ChunkFailureKind, message: impl Display) -> Self {
        Self {
            chunk_index,
            kind,
            message: message.to_string(),
        }
    }
}

impl Display for ChunkFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "chunk {} {}: {}",
            self.chunk_index,
            self.kind.as_str(),
            self.message
        )
    }
}

/// Counts and failures produced by one chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub chunk_index: usize,
    pub updated_roots: usize,
    pub updated_children: usize,
    pub failures: Vec<ChunkFailure>,
}

impl ChunkOutcome {
    pub fn new(chunk_index: usize) -> Self {
        Self {
            chunk_index,
            ..Self::default()
        }
    }

    /// Outcome for a chunk that failed before processing started.
    pub fn failed(chunk_index: usize, kind: ChunkFailureKind, message: impl Display) -> Self {
        let mut outcome = Self::new(chunk_index);
        outcome.record(kind, message);
        outcome
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn record(&mut self, kind: ChunkFailureKind, message: impl Display) {
        self.failures
            .push(ChunkFailure::new(self.chunk_index, kind, message));
    }
}

/// Applies the marker cascade to one chunk at a time.
#[derive(Debug)]
pub struct ChunkProcessor<S: BatchStore> {
    store: S,
}

impl<S: BatchStore> ChunkProcessor<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Stamps and persists the chunk's roots and their children.
    ///
    /// A root without children is written on its own; the child write is
    /// skipped when nothing was staged.
    pub fn process(&self, chunk: &Chunk) -> ChunkOutcome {
        let started_at = Instant::now();
        let mut outcome = ChunkOutcome::new(chunk.index);

        let staged_roots: Vec<RootEntity> = chunk
            .roots
            .iter()
            .cloned()
            .map(|mut root| {
                root.stamp();
                root
            })
            .collect();
        let staged_ids: Vec<RootId> = staged_roots.iter().map(|root| root.id).collect();

        let staged_children = self.stage_children(&staged_ids, &mut outcome);

        if !staged_roots.is_empty() {
            match self.store.write_roots(&staged_roots) {
                Ok(written) => {
                    outcome.updated_roots = written.succeeded;
                    record_partial(&mut outcome, ChunkFailureKind::RootWrite, &written);
                }
                Err(err) => outcome.record(ChunkFailureKind::RootWrite, err),
            }
        }

        if !staged_children.is_empty() {
            match self.store.write_children(&staged_children) {
                Ok(written) => {
                    outcome.updated_children = written.succeeded;
                    record_partial(&mut outcome, ChunkFailureKind::ChildWrite, &written);
                }
                Err(err) => outcome.record(ChunkFailureKind::ChildWrite, err),
            }
        }

        if outcome.is_clean() {
            info!(
                "event=chunk_process module=service status=ok chunk_index={} roots={} children={} duration_ms={}",
                chunk.index,
                outcome.updated_roots,
                outcome.updated_children,
                started_at.elapsed().as_millis()
            );
        } else {
            for failure in &outcome.failures {
                warn!(
                    "event=chunk_process module=service status=error chunk_index={} error_code={} error={}",
                    chunk.index,
                    failure.kind.as_str(),
                    failure.message
                );
            }
        }
        outcome
    }

    fn stage_children(
        &self,
        staged_ids: &[RootId],
        outcome: &mut ChunkOutcome,
    ) -> Vec<ChildEntity> {
        if staged_ids.is_empty() {
            return Vec::new();
        }

        let grouped = match self.store.children_by_root(staged_ids) {
            Ok(grouped) => grouped,
            Err(err) => {
                outcome.record(ChunkFailureKind::ChildLookup, err);
                return Vec::new();
            }
        };

        let owners: BTreeSet<&RootId> = staged_ids.iter().collect();
        grouped
            .into_iter()
            .filter(|(root_id, _)| owners.contains(root_id))
            .flat_map(|(_, children)| children)
            .filter(|child| owners.contains(&child.root_id))
            .map(|mut child| {
                child.stamp();
                child
            })
            .collect()
    }
}

fn record_partial(outcome: &mut ChunkOutcome, kind: ChunkFailureKind, written: &WriteOutcome) {
    if written.is_complete() {
        return;
    }
    let ids = written
        .failed
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    outcome.record(
        kind,
        format!("{} record(s) not written: {ids}", written.failed.len()),
    );
}
