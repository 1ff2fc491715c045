//! Root and child entity models.
//!
//! # Responsibility
//! - Define the records whose marker field is stamped by the batch.
//! - Define the ephemeral chunk handed to the chunk processor.
//!
//! # Invariants
//! - A `ChildEntity` belongs to exactly one `RootEntity` through `root_id`.
//! - The only marker value ever written is [`BATCH_MARKER`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marker value stamped on every root and child entity by a batch run.
pub const BATCH_MARKER: &str = "Batch Processed";

/// Stable identifier of a root entity.
pub type RootId = Uuid;

/// Stable identifier of a child entity.
pub type ChildId = Uuid;

/// Top-level record iterated by the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootEntity {
    pub id: RootId,
    /// Display name, never touched by the batch.
    pub name: String,
    /// `None` until a batch run has stamped the record.
    pub marker: Option<String>,
}

impl RootEntity {
    /// Creates an unmarked root with a generated id.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    /// Creates an unmarked root with a caller-provided id.
    pub fn with_id(id: RootId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            marker: None,
        }
    }

    /// Sets the marker field to [`BATCH_MARKER`].
    pub fn stamp(&mut self) {
        self.marker = Some(BATCH_MARKER.to_string());
    }

    pub fn is_stamped(&self) -> bool {
        self.marker.as_deref() == Some(BATCH_MARKER)
    }
}

/// Dependent record owned by one root entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildEntity {
    pub id: ChildId,
    /// Owning root; the cascade only ever flows from this root downward.
    pub root_id: RootId,
    pub marker: Option<String>,
}

impl ChildEntity {
    /// Creates an unmarked child owned by `root_id`.
    pub fn new(root_id: RootId) -> Self {
        Self {
            id: Uuid::new_v4(),
            root_id,
            marker: None,
        }
    }

    /// Sets the marker field to [`BATCH_MARKER`].
    pub fn stamp(&mut self) {
        self.marker = Some(BATCH_MARKER.to_string());
    }

    pub fn is_stamped(&self) -> bool {
        self.marker.as_deref() == Some(BATCH_MARKER)
    }
}

/// Bounded, ordered batch of roots materialized from the cursor.
///
/// Lives only for one processing step and is never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based position of this chunk in cursor order.
    pub index: usize,
    pub roots: Vec<RootEntity>,
}

impl Chunk {
    pub fn new(index: usize, roots: Vec<RootEntity>) -> Self {
        Self { index, roots }
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}
