//! Repository layer contracts and SQLite implementations.
//!
//! # Responsibility
//! - Define the store capabilities consumed by the batch (paged reads,
//!   batched lookups, partial-failure batched writes).
//! - Isolate SQL details from service orchestration.
//!
//! # Invariants
//! - Batched writes report per-record failures instead of aborting on a
//!   missing row.
//! - Read paths reject invalid persisted state instead of masking it.

pub mod batch_store;
pub mod recipient_repo;
