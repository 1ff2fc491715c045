//! Recipient repository contracts and SQLite implementation.
//!
//! # Invariants
//! - Only `is_active = 1` rows are returned to the notifier.
//! - Address filtering beyond the active flag belongs to the notifier.

use crate::model::recipient::Recipient;
use crate::repo::batch_store::{parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection};

/// Read access to notification recipients.
pub trait RecipientRepository {
    fn list_active_recipients(&self) -> RepoResult<Vec<Recipient>>;
}

impl<T: RecipientRepository + ?Sized> RecipientRepository for &T {
    fn list_active_recipients(&self) -> RepoResult<Vec<Recipient>> {
        (**self).list_active_recipients()
    }
}

/// SQLite-backed recipient repository.
#[derive(Debug)]
pub struct SqliteRecipientRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRecipientRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Inserts one recipient; used by seeding tools and tests.
    pub fn insert_recipient(&self, recipient: &Recipient) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO recipients (id, email, is_active) VALUES (?1, ?2, ?3);",
            params![
                recipient.id.to_string(),
                recipient.email.as_deref(),
                i64::from(recipient.is_active)
            ],
        )?;
        Ok(())
    }
}

impl RecipientRepository for SqliteRecipientRepository<'_> {
    fn list_active_recipients(&self) -> RepoResult<Vec<Recipient>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, email, is_active
             FROM recipients
             WHERE is_active = 1
             ORDER BY id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut recipients = Vec::new();
        while let Some(row) = rows.next()? {
            let id_text: String = row.get("id")?;
            let is_active = match row.get::<_, i64>("is_active")? {
                0 => false,
                1 => true,
                other => {
                    return Err(RepoError::InvalidData(format!(
                        "invalid is_active value `{other}` in recipients.is_active"
                    )));
                }
            };
            recipients.push(Recipient {
                id: parse_uuid(&id_text, "recipients.id")?,
                email: row.get("email")?,
                is_active,
            });
        }
        Ok(recipients)
    }
}
