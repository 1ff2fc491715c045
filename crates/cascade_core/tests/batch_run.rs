use cascade_core::db::open_db_in_memory;
use cascade_core::{
    BatchConfig, BatchError, BatchRunner, BatchStore, CancelToken, ChildEntity, ChunkFailureKind,
    CompletionNotifier, MailError, MailTransport, NotificationOutcome, NotifierConfig,
    OutgoingMail, Recipient, RepoError, RepoResult, RootEntity, RootId, RootIdPage,
    SqliteBatchStore, SqliteRecipientRepository, WriteOutcome, BATCH_MARKER,
};
use rusqlite::Connection;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Default)]
struct RecordingTransport {
    sent: RefCell<Vec<OutgoingMail>>,
}

impl MailTransport for RecordingTransport {
    fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        self.sent.borrow_mut().push(mail.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct UnreachableTransport {
    attempts: Cell<usize>,
}

impl MailTransport for UnreachableTransport {
    fn send(&self, _mail: &OutgoingMail) -> Result<(), MailError> {
        self.attempts.set(self.attempts.get() + 1);
        Err(MailError::Rejected("transport unreachable".to_string()))
    }
}

/// Wraps the SQLite store and fails root writes touching `poisoned`
/// for the first `failures_left` attempts. Counts child write calls.
struct FlakyStore<'conn> {
    inner: SqliteBatchStore<'conn>,
    poisoned: RootId,
    failures_left: Cell<usize>,
    cancel_after_write: Option<CancelToken>,
    child_writes: Cell<usize>,
}

impl<'conn> FlakyStore<'conn> {
    fn new(inner: SqliteBatchStore<'conn>, poisoned: RootId, failures: usize) -> Self {
        Self {
            inner,
            poisoned,
            failures_left: Cell::new(failures),
            cancel_after_write: None,
            child_writes: Cell::new(0),
        }
    }
}

impl BatchStore for FlakyStore<'_> {
    fn check_reachable(&self) -> RepoResult<()> {
        self.inner.check_reachable()
    }

    fn root_id_page(&self, after: Option<&str>, limit: u32) -> RepoResult<RootIdPage> {
        self.inner.root_id_page(after, limit)
    }

    fn load_roots(&self, ids: &[RootId]) -> RepoResult<Vec<RootEntity>> {
        self.inner.load_roots(ids)
    }

    fn children_by_root(&self, ids: &[RootId]) -> RepoResult<BTreeMap<RootId, Vec<ChildEntity>>> {
        self.inner.children_by_root(ids)
    }

    fn write_roots(&self, roots: &[RootEntity]) -> RepoResult<WriteOutcome> {
        if let Some(token) = &self.cancel_after_write {
            token.cancel();
        }
        let poisoned = roots.iter().any(|root| root.id == self.poisoned);
        if poisoned && self.failures_left.get() > 0 {
            self.failures_left.set(self.failures_left.get() - 1);
            return Err(RepoError::InvalidData("forced write failure".to_string()));
        }
        self.inner.write_roots(roots)
    }

    fn write_children(&self, children: &[ChildEntity]) -> RepoResult<WriteOutcome> {
        self.child_writes.set(self.child_writes.get() + 1);
        self.inner.write_children(children)
    }
}

struct Fixture {
    roots: Vec<RootId>,
    children: Vec<(RootId, Uuid)>,
}

/// Seeds `root_count` roots; root `n` gets `n % 3` children.
fn seed(conn: &Connection, root_count: usize) -> Fixture {
    let store = SqliteBatchStore::try_new(conn).unwrap();
    let mut fixture = Fixture {
        roots: Vec::new(),
        children: Vec::new(),
    };
    for n in 0..root_count {
        let root = RootEntity::new(format!("root-{n}"));
        store.insert_root(&root).unwrap();
        for _ in 0..(n % 3) {
            let child = ChildEntity::new(root.id);
            store.insert_child(&child).unwrap();
            fixture.children.push((root.id, child.id));
        }
        fixture.roots.push(root.id);
    }
    fixture.roots.sort();

    let recipients = SqliteRecipientRepository::new(conn);
    for recipient in [
        Recipient::new("a@x.com", true),
        Recipient::new("autoproc@x.com", true),
        Recipient::new("b@x.com", false),
        Recipient::new("a@x.com", true),
    ] {
        recipients.insert_recipient(&recipient).unwrap();
    }
    fixture
}

fn config(chunk_size: usize) -> BatchConfig {
    BatchConfig {
        chunk_size,
        ..BatchConfig::default()
    }
}

fn notifier<'a, M: MailTransport>(
    conn: &'a Connection,
    transport: M,
) -> CompletionNotifier<SqliteRecipientRepository<'a>, M> {
    CompletionNotifier::new(
        SqliteRecipientRepository::new(conn),
        transport,
        NotifierConfig::default(),
    )
}

#[test]
fn full_run_stamps_every_root_and_child() {
    let conn = open_db_in_memory().unwrap();
    let fixture = seed(&conn, 7);
    let transport = RecordingTransport::default();

    let store = SqliteBatchStore::try_new(&conn).unwrap();
    let runner = BatchRunner::new(&store, notifier(&conn, &transport), &config(3)).unwrap();
    let report = runner.run().unwrap();

    assert!(report.is_clean(), "{:?}", report.chunk_failures);
    assert_eq!(report.chunks_processed, 3);
    assert_eq!(report.roots_updated, 7);
    assert_eq!(report.children_updated, fixture.children.len());
    for root_id in &fixture.roots {
        assert!(store.get_root(*root_id).unwrap().unwrap().is_stamped());
    }
    for (_, child_id) in &fixture.children {
        let child = store.get_child(*child_id).unwrap().unwrap();
        assert_eq!(child.marker.as_deref(), Some(BATCH_MARKER));
    }

    let sent = transport.sent.borrow();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].to.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["a@x.com"]
    );
    assert!(sent[0].body.contains("Root records updated: 7"));
    assert_eq!(
        report.notification,
        Some(NotificationOutcome::Sent { recipient_count: 1 })
    );
}

#[test]
fn running_twice_is_idempotent() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn, 5);
    let store = SqliteBatchStore::try_new(&conn).unwrap();
    let transport = RecordingTransport::default();
    let runner = BatchRunner::new(&store, notifier(&conn, &transport), &config(2)).unwrap();

    let first = runner.run().unwrap();
    let status_after_first = store.marker_status(BATCH_MARKER).unwrap();
    let second = runner.run().unwrap();
    let status_after_second = store.marker_status(BATCH_MARKER).unwrap();

    assert_eq!(first.roots_updated, second.roots_updated);
    assert_eq!(first.children_updated, second.children_updated);
    assert_eq!(status_after_first, status_after_second);
    assert_eq!(status_after_second.roots_marked, status_after_second.roots_total);
    assert_eq!(transport.sent.borrow().len(), 2);
}

#[test]
fn roots_without_children_complete_without_child_writes() {
    let conn = open_db_in_memory().unwrap();
    let lonely = RootEntity::new("lonely");
    SqliteBatchStore::try_new(&conn)
        .unwrap()
        .insert_root(&lonely)
        .unwrap();
    let store = FlakyStore::new(SqliteBatchStore::try_new(&conn).unwrap(), Uuid::nil(), 0);
    let transport = RecordingTransport::default();

    let runner = BatchRunner::new(&store, notifier(&conn, &transport), &config(10)).unwrap();
    let report = runner.run().unwrap();

    assert!(report.is_clean());
    assert_eq!(report.roots_updated, 1);
    assert_eq!(report.children_updated, 0);
    assert_eq!(store.child_writes.get(), 0);
    assert!(store.inner.get_root(lonely.id).unwrap().unwrap().is_stamped());
    assert_eq!(report.notification, Some(NotificationOutcome::Skipped));
}

#[test]
fn empty_store_still_notifies_once() {
    let conn = open_db_in_memory().unwrap();
    SqliteRecipientRepository::new(&conn)
        .insert_recipient(&Recipient::new("ops@x.com", true))
        .unwrap();
    let store = SqliteBatchStore::try_new(&conn).unwrap();
    let transport = RecordingTransport::default();

    let runner = BatchRunner::new(&store, notifier(&conn, &transport), &config(10)).unwrap();
    let report = runner.run().unwrap();

    assert_eq!(report.chunks_processed, 0);
    assert_eq!(transport.sent.borrow().len(), 1);
}

#[test]
fn forced_write_failure_on_one_chunk_does_not_stop_later_chunks() {
    let conn = open_db_in_memory().unwrap();
    let fixture = seed(&conn, 6);
    let poisoned = fixture.roots[0];
    let store = FlakyStore::new(SqliteBatchStore::try_new(&conn).unwrap(), poisoned, usize::MAX);
    let transport = RecordingTransport::default();

    let runner = BatchRunner::new(&store, notifier(&conn, &transport), &config(2)).unwrap();
    let report = runner.run().unwrap();

    assert_eq!(report.chunks_processed, 3);
    assert_eq!(report.roots_updated, 4);
    assert_eq!(report.chunk_failures.len(), 1);
    assert_eq!(report.chunk_failures[0].chunk_index, 0);
    assert_eq!(report.chunk_failures[0].kind, ChunkFailureKind::RootWrite);

    let reader = SqliteBatchStore::try_new(&conn).unwrap();
    assert!(!reader.get_root(poisoned).unwrap().unwrap().is_stamped());
    for root_id in &fixture.roots[2..] {
        assert!(reader.get_root(*root_id).unwrap().unwrap().is_stamped());
    }

    let poisoned_children: Vec<_> = fixture
        .children
        .iter()
        .filter(|(root_id, _)| fixture.roots[..2].contains(root_id))
        .collect();
    for (_, child_id) in poisoned_children {
        assert!(
            reader.get_child(*child_id).unwrap().unwrap().is_stamped(),
            "child write is attempted even when the root write fails"
        );
    }

    assert_eq!(transport.sent.borrow().len(), 1);
    assert!(transport.sent.borrow()[0]
        .body
        .contains("Chunk failures recorded: 1"));
}

#[test]
fn retry_policy_recovers_transient_write_failure() {
    let conn = open_db_in_memory().unwrap();
    let fixture = seed(&conn, 4);
    let store = FlakyStore::new(SqliteBatchStore::try_new(&conn).unwrap(), fixture.roots[3], 1);
    let transport = RecordingTransport::default();
    let config = BatchConfig {
        max_chunk_attempts: 2,
        ..config(2)
    };

    let runner = BatchRunner::new(&store, notifier(&conn, &transport), &config).unwrap();
    let report = runner.run().unwrap();

    assert!(report.is_clean(), "{:?}", report.chunk_failures);
    assert_eq!(report.roots_updated, 4);
    assert_eq!(report.chunks_processed, 2);
}

#[test]
fn mail_failure_is_recorded_and_run_still_succeeds() {
    let conn = open_db_in_memory().unwrap();
    let fixture = seed(&conn, 3);
    let store = SqliteBatchStore::try_new(&conn).unwrap();
    let transport = UnreachableTransport::default();

    let runner = BatchRunner::new(&store, notifier(&conn, &transport), &config(200)).unwrap();
    let report = runner.run().unwrap();

    assert!(report.is_clean());
    assert_eq!(report.roots_updated, 3);
    assert_eq!(report.children_updated, fixture.children.len());
    assert_eq!(transport.attempts.get(), 1);
    assert!(matches!(
        report.notification,
        Some(NotificationOutcome::Failed { ref reason }) if reason.contains("unreachable")
    ));
}

#[test]
fn unreachable_store_aborts_before_any_chunk() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteBatchStore::try_new(&conn).unwrap();
    conn.execute_batch("DROP TABLE child_entities; DROP TABLE root_entities;")
        .unwrap();
    let transport = RecordingTransport::default();

    let runner = BatchRunner::new(&store, notifier(&conn, &transport), &config(10)).unwrap();
    let err = runner.run().unwrap_err();

    assert!(matches!(err, BatchError::StoreUnreachable(_)));
    assert!(transport.sent.borrow().is_empty());
}

#[test]
fn cancellation_stops_between_chunks_and_skips_notification() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn, 6);
    let token = CancelToken::new();
    let mut store = FlakyStore::new(SqliteBatchStore::try_new(&conn).unwrap(), Uuid::nil(), 0);
    store.cancel_after_write = Some(token.clone());
    let transport = RecordingTransport::default();

    let runner = BatchRunner::new(&store, notifier(&conn, &transport), &config(2))
        .unwrap()
        .with_cancel_token(token);
    let report = runner.run().unwrap();

    assert!(report.cancelled);
    assert_eq!(report.chunks_processed, 1);
    assert_eq!(report.roots_updated, 2);
    assert_eq!(report.notification, None);
    assert!(transport.sent.borrow().is_empty());
}

#[test]
fn invalid_config_is_rejected_before_running() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteBatchStore::try_new(&conn).unwrap();
    let transport = RecordingTransport::default();

    let err = BatchRunner::new(&store, notifier(&conn, &transport), &config(0)).unwrap_err();
    assert!(matches!(err, BatchError::InvalidConfig(_)));
}

#[test]
fn malformed_root_id_fails_its_chunk_and_the_run_continues() {
    for (chunk_size, expected_chunks) in [(2, 3), (1, 5)] {
        let conn = open_db_in_memory().unwrap();
        let fixture = seed(&conn, 4);
        conn.execute(
            "INSERT INTO root_entities (id, name) VALUES ('0-bad', 'broken');",
            [],
        )
        .unwrap();
        let store = SqliteBatchStore::try_new(&conn).unwrap();
        let transport = RecordingTransport::default();

        let runner =
            BatchRunner::new(&store, notifier(&conn, &transport), &config(chunk_size)).unwrap();
        let report = runner.run().unwrap();

        assert_eq!(report.chunks_processed, expected_chunks);
        assert_eq!(report.roots_updated, 4);
        assert_eq!(report.children_updated, fixture.children.len());
        assert_eq!(report.chunk_failures.len(), 1);
        assert_eq!(report.chunk_failures[0].chunk_index, 0);
        assert_eq!(report.chunk_failures[0].kind, ChunkFailureKind::MalformedId);
        assert!(report.chunk_failures[0].message.contains("0-bad"));
        for root_id in &fixture.roots {
            assert!(store.get_root(*root_id).unwrap().unwrap().is_stamped());
        }
        for (_, child_id) in &fixture.children {
            assert!(store.get_child(*child_id).unwrap().unwrap().is_stamped());
        }

        let broken_marker: Option<String> = conn
            .query_row(
                "SELECT marker FROM root_entities WHERE id = '0-bad';",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(broken_marker, None);
        assert_eq!(transport.sent.borrow().len(), 1);
    }
}
