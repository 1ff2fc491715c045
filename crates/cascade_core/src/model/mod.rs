//! Domain model for the marker cascade batch.
//!
//! # Responsibility
//! - Define root/child entities touched by the batch and the read-only recipients.
//! - Own the marker constant written by every run.
//!
//! # Invariants
//! - Every entity is identified by a stable UUID.
//! - The batch only mutates marker fields; it never creates or deletes entities.

pub mod entity;
pub mod recipient;
