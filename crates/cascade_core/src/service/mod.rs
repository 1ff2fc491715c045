//! Batch pipeline services.
//!
//! # Responsibility
//! - Locate, process and report on one marker cascade run.
//! - Keep CLI callers decoupled from storage and transport details.

pub mod batch_runner;
pub mod chunk_processor;
pub mod locator;
pub mod notifier;
