//! Root locator: opens the paged cursor over root identifiers.
//!
//! # Invariants
//! - Opening fails fast with `BatchError::StoreUnreachable`; no chunk starts then.
//! - The cursor holds at most one page of ids in memory.
//! - Pages resume strictly after the last raw key read, so each row is seen
//!   once per pass, including rows whose id does not parse.

use crate::model::entity::RootId;
use crate::repo::batch_store::{parse_uuid, BatchStore, RepoResult, RootIdPage};
use crate::service::batch_runner::BatchError;
use log::{error, info};
use std::collections::VecDeque;

/// Opens a cursor over every root id, `page_size` ids per page.
///
/// # Errors
/// - `BatchError::InvalidConfig` when `page_size` is zero or exceeds `u32`.
/// - `BatchError::StoreUnreachable` when the store cannot be queried.
pub fn open<S: BatchStore + ?Sized>(
    store: &S,
    page_size: usize,
) -> Result<RootCursor<'_, S>, BatchError> {
    let page_size = u32::try_from(page_size)
        .ok()
        .filter(|size| *size > 0)
        .ok_or_else(|| BatchError::InvalidConfig(format!("invalid page size {page_size}")))?;

    if let Err(err) = store.check_reachable() {
        error!(
            "event=locator_open module=service status=error error_code=store_unreachable error={err}"
        );
        return Err(BatchError::StoreUnreachable(err));
    }

    info!("event=locator_open module=service status=ok page_size={page_size}");
    Ok(RootCursor {
        store,
        page_size,
        last_key: None,
        exhausted: false,
        buffered: VecDeque::new(),
    })
}

/// Lazy, paged, re-iterable cursor over root ids in `id ASC` order.
///
/// Consume either page-wise through [`RootCursor::next_page`] or id-wise through
/// `Iterator`; mixing both on one pass skips the ids buffered by the iterator.
/// The iterator yields `RepoError::InvalidData` for each malformed id and keeps
/// going.
#[derive(Debug)]
pub struct RootCursor<'s, S: BatchStore + ?Sized> {
    store: &'s S,
    page_size: u32,
    last_key: Option<String>,
    exhausted: bool,
    buffered: VecDeque<RepoResult<RootId>>,
}

impl<S: BatchStore + ?Sized> RootCursor<'_, S> {
    /// Returns the next page; empty once the cursor is exhausted.
    pub fn next_page(&mut self) -> RepoResult<RootIdPage> {
        if self.exhausted {
            return Ok(RootIdPage::default());
        }

        let page = self.store.root_id_page(self.last_key.as_deref(), self.page_size)?;
        if page.row_count() < self.page_size as usize {
            self.exhausted = true;
        }
        if let Some(last) = &page.last_key {
            self.last_key = Some(last.clone());
        }
        Ok(page)
    }

    /// Restarts iteration from the first id.
    pub fn rewind(&mut self) {
        self.last_key = None;
        self.exhausted = false;
        self.buffered.clear();
    }

    pub fn page_size(&self) -> usize {
        self.page_size as usize
    }
}

impl<S: BatchStore + ?Sized> Iterator for RootCursor<'_, S> {
    type Item = RepoResult<RootId>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffered.is_empty() {
            match self.next_page() {
                Ok(page) => {
                    self.buffered.extend(page.ids.into_iter().map(Ok));
                    self.buffered.extend(
                        page.malformed
                            .iter()
                            .map(|raw| parse_uuid(raw, "root_entities.id")),
                    );
                }
                Err(err) => {
                    self.exhausted = true;
                    return Some(Err(err));
                }
            }
        }
        self.buffered.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::open;
    use crate::db::open_db_in_memory;
    use crate::model::entity::RootEntity;
    use crate::repo::batch_store::SqliteBatchStore;
    use crate::service::batch_runner::BatchError;

    #[test]
    fn next_page_walks_all_ids_once_in_order() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteBatchStore::try_new(&conn).unwrap();
        let mut expected: Vec<_> = (0..5)
            .map(|n| store.insert_root(&RootEntity::new(format!("root-{n}"))).unwrap())
            .collect();
        expected.sort();

        let mut cursor = open(&store, 2).unwrap();
        let mut pages = Vec::new();
        loop {
            let page = cursor.next_page().unwrap();
            if page.is_empty() {
                break;
            }
            assert!(page.malformed.is_empty());
            pages.push(page.ids);
        }

        assert_eq!(pages.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 1]);
        assert_eq!(pages.concat(), expected);
    }

    #[test]
    fn cursor_is_reiterable_after_rewind() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteBatchStore::try_new(&conn).unwrap();
        for n in 0..3 {
            store.insert_root(&RootEntity::new(format!("root-{n}"))).unwrap();
        }

        let mut cursor = open(&store, 2).unwrap();
        let first_pass: Vec<_> = cursor.by_ref().map(Result::unwrap).collect();
        assert_eq!(first_pass.len(), 3);
        assert!(cursor.next().is_none());

        cursor.rewind();
        let second_pass: Vec<_> = cursor.map(Result::unwrap).collect();
        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn open_rejects_zero_page_size() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteBatchStore::try_new(&conn).unwrap();
        assert!(matches!(
            open(&store, 0).unwrap_err(),
            BatchError::InvalidConfig(_)
        ));
    }

    #[test]
    fn open_reports_unreachable_store() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteBatchStore::try_new(&conn).unwrap();
        conn.execute_batch("DROP TABLE child_entities; DROP TABLE root_entities;")
            .unwrap();

        assert!(matches!(
            open(&store, 10).unwrap_err(),
            BatchError::StoreUnreachable(_)
        ));
    }

    #[test]
    fn cursor_steps_past_malformed_ids() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteBatchStore::try_new(&conn).unwrap();
        let mut valid: Vec<_> = (0..3)
            .map(|n| store.insert_root(&RootEntity::new(format!("root-{n}"))).unwrap())
            .collect();
        valid.sort();
        conn.execute(
            "INSERT INTO root_entities (id, name) VALUES ('0-bad', 'broken');",
            [],
        )
        .unwrap();

        let mut cursor = open(&store, 2).unwrap();
        let first = cursor.next_page().unwrap();
        assert_eq!(first.malformed, vec!["0-bad".to_string()]);
        assert_eq!(first.ids.len(), 1);

        let mut seen = first.ids;
        loop {
            let page = cursor.next_page().unwrap();
            if page.is_empty() {
                break;
            }
            seen.extend(page.ids);
        }
        assert_eq!(seen, valid);

        cursor.rewind();
        let items: Vec<_> = cursor.collect();
        assert_eq!(items.len(), 4);
        assert_eq!(items.iter().filter(|item| item.is_err()).count(), 1);
    }
}
