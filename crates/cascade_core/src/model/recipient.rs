//! Notification recipient model.
//!
//! Recipients are read-only for the batch; they are only consulted by the
//! completion notifier.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type RecipientId = Uuid;

/// Account that may receive the completion notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    /// Absent or blank addresses are never dispatched to.
    pub email: Option<String>,
    pub is_active: bool,
}

impl Recipient {
    pub fn new(email: impl Into<String>, is_active: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: Some(email.into()),
            is_active,
        }
    }

    /// Returns the trimmed address, or `None` when absent or blank.
    pub fn trimmed_email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}
