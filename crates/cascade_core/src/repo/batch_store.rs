//! Batch store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Serve root identifiers in stable, paged order for the locator cursor.
//! - Materialize chunks and look up children keyed by a set of root ids.
//! - Persist stamped roots and children as independent batched writes.
//!
//! # Invariants
//! - Pages are ordered by `id ASC` and resume strictly after the last raw key
//!   read, so a row whose id does not parse never stalls the cursor.
//! - A batched write commits every row it could update; rows that no longer
//!   exist are reported in `WriteOutcome::failed`, not raised as errors.
//! - Writes only touch the `marker` column.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::entity::{ChildEntity, RootEntity, RootId};
use rusqlite::{params, params_from_iter, Connection, Row};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for batch store reads and writes.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound(Uuid),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "record not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::NotFound(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Result of one batched write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Rows updated.
    pub succeeded: usize,
    /// Ids whose row could not be updated.
    pub failed: Vec<Uuid>,
}

impl WriteOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One keyset page of root ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootIdPage {
    pub ids: Vec<RootId>,
    /// Raw `id` values that are not valid UUIDs.
    pub malformed: Vec<String>,
    /// Raw key of the last row read; the next page resumes after it.
    pub last_key: Option<String>,
}

impl RootIdPage {
    /// Rows read, parsed or not.
    pub fn row_count(&self) -> usize {
        self.ids.len() + self.malformed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }
}

/// Marker coverage counters for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkerStatus {
    pub roots_total: u64,
    pub roots_marked: u64,
    pub children_total: u64,
    pub children_marked: u64,
}

/// Store capabilities consumed by the batch pipeline.
pub trait BatchStore {
    /// Fails when the root table cannot be queried.
    fn check_reachable(&self) -> RepoResult<()>;
    /// Reads up to `limit` root rows whose raw key sorts strictly after `after`,
    /// in `id ASC` order. Unparseable ids land in `RootIdPage::malformed`.
    fn root_id_page(&self, after: Option<&str>, limit: u32) -> RepoResult<RootIdPage>;
    /// Loads the roots for `ids`; ids without a row are silently absent.
    fn load_roots(&self, ids: &[RootId]) -> RepoResult<Vec<RootEntity>>;
    /// Loads every child of the given roots in one read, grouped by owner.
    ///
    /// Roots without children have no entry in the returned map.
    fn children_by_root(&self, ids: &[RootId]) -> RepoResult<BTreeMap<RootId, Vec<ChildEntity>>>;
    fn write_roots(&self, roots: &[RootEntity]) -> RepoResult<WriteOutcome>;
    fn write_children(&self, children: &[ChildEntity]) -> RepoResult<WriteOutcome>;
}

impl<T: BatchStore + ?Sized> BatchStore for &T {
    fn check_reachable(&self) -> RepoResult<()> {
        (**self).check_reachable()
    }

    fn root_id_page(&self, after: Option<&str>, limit: u32) -> RepoResult<RootIdPage> {
        (**self).root_id_page(after, limit)
    }

    fn load_roots(&self, ids: &[RootId]) -> RepoResult<Vec<RootEntity>> {
        (**self).load_roots(ids)
    }

    fn children_by_root(&self, ids: &[RootId]) -> RepoResult<BTreeMap<RootId, Vec<ChildEntity>>> {
        (**self).children_by_root(ids)
    }

    fn write_roots(&self, roots: &[RootEntity]) -> RepoResult<WriteOutcome> {
        (**self).write_roots(roots)
    }

    fn write_children(&self, children: &[ChildEntity]) -> RepoResult<WriteOutcome> {
        (**self).write_children(children)
    }
}

/// SQLite-backed batch store.
#[derive(Debug)]
pub struct SqliteBatchStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteBatchStore<'conn> {
    /// Wraps a connection returned by `open_db`/`open_db_in_memory`.
    ///
    /// # Errors
    /// - `RepoError::InvalidData` when the schema has not been migrated.
    /// - `RepoError::Db` when the schema is newer than this binary.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(conn)?;
        Ok(Self { conn })
    }

    /// Inserts one root; used by seeding tools and tests.
    pub fn insert_root(&self, root: &RootEntity) -> RepoResult<RootId> {
        self.conn.execute(
            "INSERT INTO root_entities (id, name, marker) VALUES (?1, ?2, ?3);",
            params![root.id.to_string(), root.name.as_str(), root.marker.as_deref()],
        )?;
        Ok(root.id)
    }

    /// Inserts one child; fails on an unknown owner (foreign key).
    pub fn insert_child(&self, child: &ChildEntity) -> RepoResult<Uuid> {
        self.conn.execute(
            "INSERT INTO child_entities (id, root_id, marker) VALUES (?1, ?2, ?3);",
            params![
                child.id.to_string(),
                child.root_id.to_string(),
                child.marker.as_deref()
            ],
        )?;
        Ok(child.id)
    }

    pub fn get_root(&self, id: RootId) -> RepoResult<Option<RootEntity>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, marker FROM root_entities WHERE id = ?1;")?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_root_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn get_child(&self, id: Uuid) -> RepoResult<Option<ChildEntity>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, root_id, marker FROM child_entities WHERE id = ?1;")?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_child_row(row)?)),
            None => Ok(None),
        }
    }

    /// Deletes one root and, through the foreign key, its children.
    pub fn delete_root(&self, id: RootId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM root_entities WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }

    /// Counts roots/children and how many already carry `marker`.
    pub fn marker_status(&self, marker: &str) -> RepoResult<MarkerStatus> {
        let (roots_total, roots_marked) = count_marked(self.conn, "root_entities", marker)?;
        let (children_total, children_marked) =
            count_marked(self.conn, "child_entities", marker)?;
        Ok(MarkerStatus {
            roots_total,
            roots_marked,
            children_total,
            children_marked,
        })
    }
}

impl BatchStore for SqliteBatchStore<'_> {
    fn check_reachable(&self) -> RepoResult<()> {
        self.conn
            .prepare("SELECT 1 FROM root_entities LIMIT 1;")?
            .exists([])?;
        Ok(())
    }

    fn root_id_page(&self, after: Option<&str>, limit: u32) -> RepoResult<RootIdPage> {
        let mut stmt = self.conn.prepare(
            "SELECT id
             FROM root_entities
             WHERE (?1 IS NULL OR id > ?1)
             ORDER BY id ASC
             LIMIT ?2;",
        )?;
        let mut rows = stmt.query(params![after, i64::from(limit)])?;
        let mut page = RootIdPage::default();
        while let Some(row) = rows.next()? {
            let text: String = row.get("id")?;
            match Uuid::parse_str(&text) {
                Ok(id) => page.ids.push(id),
                Err(_) => page.malformed.push(text.clone()),
            }
            page.last_key = Some(text);
        }
        Ok(page)
    }

    fn load_roots(&self, ids: &[RootId]) -> RepoResult<Vec<RootEntity>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, name, marker
             FROM root_entities
             WHERE id IN ({})
             ORDER BY id ASC;",
            placeholders(ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(ids.iter().map(Uuid::to_string)))?;
        let mut roots = Vec::with_capacity(ids.len());
        while let Some(row) = rows.next()? {
            roots.push(parse_root_row(row)?);
        }
        Ok(roots)
    }

    fn children_by_root(&self, ids: &[RootId]) -> RepoResult<BTreeMap<RootId, Vec<ChildEntity>>> {
        let mut grouped: BTreeMap<RootId, Vec<ChildEntity>> = BTreeMap::new();
        if ids.is_empty() {
            return Ok(grouped);
        }

        let sql = format!(
            "SELECT id, root_id, marker
             FROM child_entities
             WHERE root_id IN ({})
             ORDER BY root_id ASC, id ASC;",
            placeholders(ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(ids.iter().map(Uuid::to_string)))?;
        while let Some(row) = rows.next()? {
            let child = parse_child_row(row)?;
            grouped.entry(child.root_id).or_default().push(child);
        }
        Ok(grouped)
    }

    fn write_roots(&self, roots: &[RootEntity]) -> RepoResult<WriteOutcome> {
        write_markers(
            self.conn,
            "UPDATE root_entities
             SET marker = ?2, updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            roots.iter().map(|root| (root.id, root.marker.as_deref())),
        )
    }

    fn write_children(&self, children: &[ChildEntity]) -> RepoResult<WriteOutcome> {
        write_markers(
            self.conn,
            "UPDATE child_entities
             SET marker = ?2, updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            children
                .iter()
                .map(|child| (child.id, child.marker.as_deref())),
        )
    }
}

fn write_markers<'a>(
    conn: &Connection,
    sql: &str,
    records: impl Iterator<Item = (Uuid, Option<&'a str>)>,
) -> RepoResult<WriteOutcome> {
    let tx = conn.unchecked_transaction()?;
    let mut outcome = WriteOutcome::default();
    {
        let mut stmt = tx.prepare(sql)?;
        for (id, marker) in records {
            match stmt.execute(params![id.to_string(), marker])? {
                0 => outcome.failed.push(id),
                _ => outcome.succeeded += 1,
            }
        }
    }
    tx.commit()?;
    Ok(outcome)
}

fn count_marked(conn: &Connection, table: &str, marker: &str) -> RepoResult<(u64, u64)> {
    let (total, marked) = conn.query_row(
        &format!(
            "SELECT COUNT(1), COALESCE(SUM(CASE WHEN marker = ?1 THEN 1 ELSE 0 END), 0)
             FROM {table};"
        ),
        [marker],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
    )?;
    let to_count = |value: i64| {
        u64::try_from(value)
            .map_err(|_| RepoError::InvalidData(format!("negative count `{value}` in {table}")))
    };
    Ok((to_count(total)?, to_count(marked)?))
}

fn ensure_schema_ready(conn: &Connection) -> RepoResult<()> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    let latest = latest_version();
    if version > latest {
        return Err(RepoError::Db(DbError::UnsupportedSchemaVersion {
            db_version: version,
            latest_supported: latest,
        }));
    }
    if version < latest {
        return Err(RepoError::InvalidData(format!(
            "batch store schema version {version} is not migrated to {latest}"
        )));
    }
    Ok(())
}

fn parse_root_row(row: &Row<'_>) -> RepoResult<RootEntity> {
    let id_text: String = row.get("id")?;
    Ok(RootEntity {
        id: parse_uuid(&id_text, "root_entities.id")?,
        name: row.get("name")?,
        marker: row.get("marker")?,
    })
}

fn parse_child_row(row: &Row<'_>) -> RepoResult<ChildEntity> {
    let id_text: String = row.get("id")?;
    let root_text: String = row.get("root_id")?;
    Ok(ChildEntity {
        id: parse_uuid(&id_text, "child_entities.id")?,
        root_id: parse_uuid(&root_text, "child_entities.root_id")?,
        marker: row.get("marker")?,
    })
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
