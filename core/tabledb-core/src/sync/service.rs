//! Server side of replication: clone, push, approve, reject.
//!
//! # 동기화 흐름
//!
//! 1. A child user pushes its table files; the service diffs them against
//!    the live tables and stages a `proposed` commit. Live tables are not
//!    touched.
//! 2. An admin approves or rejects the user's most recent pending commit.
//!    Approval applies the diff table by table; both outcomes delete the
//!    commit file and notify the pushing user.

use super::commit::Commit;
use super::diff::{apply_diff, diff_tables};
use super::notification::{Notification, NotificationQueue, Outcome};
use super::protocol::{
    CloneRequest, CloneResponse, ErrorBody, PushRequest, PushResponse, STATUS_OK, TableFiles,
    status_code,
};
use super::staging::CommitStore;
use crate::auth::Authority;
use crate::engine::storage_engine::{StorageEngine, TableKey};
use crate::error::{TdbError, TdbResult};
use crate::storage::store::{parse_document, table_name_from_file, validate_name};
use crate::storage::TableDocument;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct SyncService {
    engine: Arc<StorageEngine>,
    authority: Arc<dyn Authority>,
    commits: CommitStore,
    notifications: NotificationQueue,
}

impl SyncService {
    pub fn new(engine: Arc<StorageEngine>, authority: Arc<dyn Authority>) -> Self {
        let root = engine.store().root().to_path_buf();
        Self {
            engine,
            authority,
            commits: CommitStore::new(root.clone()),
            notifications: NotificationQueue::new(root),
        }
    }

    pub fn commits(&self) -> &CommitStore {
        &self.commits
    }

    fn authenticate(&self, username: &str, password: &str, owner: &str) -> TdbResult<()> {
        if !self.authority.verify_credentials(username, password) {
            return Err(TdbError::Unauthorized(format!(
                "invalid credentials for '{}'",
                username
            )));
        }
        if !self.authority.is_child(owner, username) {
            return Err(TdbError::Unauthorized(format!(
                "'{}' is not a child of '{}'",
                username, owner
            )));
        }
        Ok(())
    }

    fn require_admin(&self, admin: &str) -> TdbResult<()> {
        if self.authority.is_admin(admin) {
            Ok(())
        } else {
            Err(TdbError::PermissionDenied(format!(
                "'{}' is not an admin",
                admin
            )))
        }
    }

    /// Raw table files of a database, pending writes included.
    #[instrument(skip(self, request), fields(user = %request.username, db = %request.database))]
    pub fn clone(&self, request: &CloneRequest) -> TdbResult<CloneResponse> {
        self.authenticate(&request.username, &request.password, &request.owner_username)?;
        let store = self.engine.store();
        store.require_database(&request.database)?;
        self.engine.flush_database(&request.database)?;
        let files: TableFiles = store.read_table_files(&request.database)?.into_iter().collect();
        info!("Cloned {} table(s) of {}", files.len(), request.database);
        Ok(CloneResponse {
            success: true,
            files,
        })
    }

    /// Diff the submitted tables against the live ones and stage a commit.
    ///
    /// Tables present only on the server are staged as fully deleted; tables
    /// present only in the request are carried whole for creation.
    #[instrument(skip(self, request), fields(user = %request.username, db = %request.database))]
    pub fn push(&self, request: &PushRequest) -> TdbResult<PushResponse> {
        self.authenticate(&request.username, &request.password, &request.owner_username)?;
        let database = request.database.as_str();
        let store = self.engine.store();
        store.require_database(database)?;
        self.engine.flush_database(database)?;

        let client = parse_files(&request.files)?;
        let mut commit = Commit::new(
            &request.username,
            &request.owner_username,
            database,
            &request.commit_message,
        );

        for (table, doc) in client.iter() {
            if self.engine.table_exists(database, table) {
                let server = self.engine.load_table(database, table)?;
                let diff = diff_tables(Some(&server), Some(doc));
                if !diff.is_empty() {
                    commit.tables.insert(table.clone(), diff);
                }
            } else {
                commit.created_tables.insert(table.clone(), doc.clone());
            }
        }
        for table in store.list_tables(database)? {
            if client.contains_key(&table) {
                continue;
            }
            let server = self.engine.load_table(database, &table)?;
            let diff = diff_tables(Some(&server), None);
            if !diff.is_empty() {
                commit.tables.insert(table, diff);
            }
        }

        self.commits.stage(&commit)?;
        Ok(PushResponse {
            success: true,
            commit_id: commit.id,
        })
    }

    /// Apply `username`'s most recent pending commit.
    pub fn approve(&self, admin: &str, username: &str) -> TdbResult<String> {
        self.require_admin(admin)?;
        let commit = self.latest(username)?;
        let database = commit.database.as_str();
        self.engine.store().require_database(database)?;

        for (table, doc) in &commit.created_tables {
            let key = TableKey::new(database, table);
            self.engine.with_table(&key, || {
                if self.engine.table_exists(database, table) {
                    let mut live = self.engine.load_table(database, table)?;
                    let diff = diff_tables(Some(&live), Some(doc));
                    apply_diff(&mut live, &diff);
                    self.engine.commit_table(database, live)
                } else {
                    let mut doc = doc.clone();
                    doc.metadata.name = table.clone();
                    doc.touch();
                    self.engine.store().create_table(database, &doc)
                }
            })?;
            self.engine.invalidate_indexes(&key);
        }

        for (table, diff) in &commit.tables {
            let key = TableKey::new(database, table);
            let applied = self.engine.with_table(&key, || {
                if !self.engine.table_exists(database, table) {
                    return Ok(false);
                }
                let mut live = self.engine.load_table(database, table)?;
                apply_diff(&mut live, diff);
                self.engine.commit_table(database, live)?;
                Ok::<_, TdbError>(true)
            })?;
            if !applied {
                warn!("Table {} vanished before approval, skipped", key);
            }
            self.engine.invalidate_indexes(&key);
        }

        self.commits.remove(&commit)?;
        let status = format!(
            "Approved commit {} from '{}' on '{}': {}",
            commit.id,
            commit.username,
            database,
            commit.summary()
        );
        self.notify(&commit, Outcome::Approved);
        info!("{}", status);
        Ok(status)
    }

    /// Discard `username`'s most recent pending commit.
    pub fn reject(&self, admin: &str, username: &str) -> TdbResult<String> {
        self.require_admin(admin)?;
        let commit = self.latest(username)?;
        self.commits.remove(&commit)?;
        let status = format!(
            "Rejected commit {} from '{}' on '{}'",
            commit.id, commit.username, commit.database
        );
        self.notify(&commit, Outcome::Rejected);
        info!("{}", status);
        Ok(status)
    }

    /// Every staged commit, oldest first.
    pub fn pending(&self, admin: &str) -> TdbResult<Vec<Commit>> {
        self.require_admin(admin)?;
        self.commits.list_pending()
    }

    /// Return and clear `username`'s notifications.
    pub fn notifications(&self, username: &str) -> TdbResult<Vec<Notification>> {
        self.notifications.drain(username)
    }

    pub fn peek_notifications(&self, username: &str) -> TdbResult<Vec<Notification>> {
        self.notifications.peek(username)
    }

    /// JSON clone endpoint: `(status, body)`.
    pub fn handle_clone(&self, body: &str) -> (u16, String) {
        respond(body, |req: CloneRequest| self.clone(&req))
    }

    /// JSON push endpoint: `(status, body)`.
    pub fn handle_push(&self, body: &str) -> (u16, String) {
        respond(body, |req: PushRequest| self.push(&req))
    }

    fn latest(&self, username: &str) -> TdbResult<Commit> {
        self.commits
            .latest_for_user(username)?
            .ok_or_else(|| TdbError::not_found("pending commit for user", username))
    }

    // Notification delivery does not undo an applied or discarded commit.
    fn notify(&self, commit: &Commit, outcome: Outcome) {
        let verb = match outcome {
            Outcome::Approved => "approved",
            Outcome::Rejected => "rejected",
        };
        let text = format!(
            "Your commit {} \"{}\" on '{}' was {}",
            commit.id, commit.message, commit.database, verb
        );
        let notification = Notification::new(&commit.id, &commit.database, outcome, text);
        if let Err(e) = self.notifications.push(&commit.username, notification) {
            warn!("Could not notify {}: {}", commit.username, e);
        }
    }
}

/// Parse submitted files into table name → normalized document.
fn parse_files(files: &TableFiles) -> TdbResult<BTreeMap<String, TableDocument>> {
    let mut docs = BTreeMap::new();
    for (file_name, text) in files {
        let table = table_name_from_file(file_name)
            .ok_or_else(|| TdbError::invalid_query(format!("not a table file '{}'", file_name)))?;
        validate_name("table", table)?;
        let mut doc = parse_document(Path::new(file_name), text)?;
        doc.metadata.name = table.to_string();
        doc.normalize();
        docs.insert(table.to_string(), doc);
    }
    Ok(docs)
}

fn respond<Req, Resp>(body: &str, handler: impl FnOnce(Req) -> TdbResult<Resp>) -> (u16, String)
where
    Req: DeserializeOwned,
    Resp: Serialize,
{
    let outcome = serde_json::from_str::<Req>(body)
        .map_err(TdbError::from)
        .and_then(handler)
        .and_then(|resp| Ok(serde_json::to_string(&resp)?));
    match outcome {
        Ok(text) => (STATUS_OK, text),
        Err(e) => {
            warn!("Sync request failed: {}", e);
            let body = serde_json::to_string(&ErrorBody::from(&e)).unwrap_or_default();
            (status_code(&e), body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AllowAll, StaticAuthority};
    use crate::config::WriteMode;
    use crate::sql::executor::QueryExecutor;
    use crate::storage::{DocumentStore, ReadLocking};
    use crate::value::Value;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        _dir: TempDir,
        executor: QueryExecutor,
        service: SyncService,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let store = DocumentStore::open(dir.path(), ReadLocking::Optimistic).unwrap();
        let engine = Arc::new(StorageEngine::new(store, WriteMode::WriteThrough));
        let authority = Arc::new(StaticAuthority::new());
        authority.add_admin("alice", "pw");
        authority.add_user("bob", "secret", &[]);
        authority.add_user("eve", "evil", &[]);
        authority.add_child("alice", "bob");

        let executor = QueryExecutor::new(engine.clone(), Arc::new(AllowAll));
        for r in executor.execute_script(
            "alice",
            "",
            "CREATE DATABASE shop; USE shop; \
             CREATE TABLE t (id INT PRIMARY KEY, v TEXT); \
             INSERT INTO t VALUES (1, 'y'), (2, 'z')",
        ) {
            assert!(r.is_success(), "{}", r.message);
        }
        let service = SyncService::new(engine, authority);
        Fixture {
            _dir: dir,
            executor,
            service,
        }
    }

    fn clone_req(user: &str, password: &str) -> CloneRequest {
        CloneRequest {
            username: user.to_string(),
            password: password.to_string(),
            database: "shop".to_string(),
            owner_username: "alice".to_string(),
        }
    }

    fn push_req(message: &str, files: TableFiles) -> PushRequest {
        PushRequest {
            username: "bob".to_string(),
            password: "secret".to_string(),
            database: "shop".to_string(),
            commit_message: message.to_string(),
            owner_username: "alice".to_string(),
            files,
        }
    }

    /// Cloned files with `t` rewritten to the given rows.
    fn edited_files(f: &Fixture, rows: &[(i64, &str)]) -> TableFiles {
        let mut files = f.service.clone(&clone_req("bob", "secret")).unwrap().files;
        let mut doc: TableDocument = serde_json::from_str(&files["t.json"]).unwrap();
        doc.rows = rows
            .iter()
            .map(|(id, v)| {
                [
                    ("id".to_string(), Value::Int(*id)),
                    ("v".to_string(), Value::from(*v)),
                ]
                .into_iter()
                .collect()
            })
            .collect();
        files.insert("t.json".to_string(), serde_json::to_string(&doc).unwrap());
        files
    }

    fn rows(f: &Fixture) -> Vec<(Value, Value)> {
        let result = f.executor.execute("alice", "shop", "SELECT id, v FROM t ORDER BY id");
        (0..result.row_count())
            .map(|i| {
                (
                    result.get(i, "id").cloned().unwrap(),
                    result.get(i, "v").cloned().unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn clone_requires_child_credentials() {
        let f = fixture();
        let resp = f.service.clone(&clone_req("bob", "secret")).unwrap();
        assert!(resp.success);
        assert_eq!(resp.files.keys().collect::<Vec<_>>(), vec!["t.json"]);

        assert!(matches!(
            f.service.clone(&clone_req("bob", "wrong")),
            Err(TdbError::Unauthorized(_))
        ));
        assert!(matches!(
            f.service.clone(&clone_req("eve", "evil")),
            Err(TdbError::Unauthorized(_))
        ));
    }

    #[test]
    fn push_stages_without_touching_live_table() {
        let f = fixture();
        let files = edited_files(&f, &[(1, "x")]);
        let resp = f.service.push(&push_req("edit", files)).unwrap();
        assert!(resp.success);

        let commit = f.service.commits().load("shop", &resp.commit_id).unwrap();
        let diff = &commit.tables["t"];
        assert!(diff.added.is_empty());
        assert_eq!(diff.modified.len(), 1);
        assert_eq!(diff.deleted.len(), 1);
        assert_eq!(rows(&f).len(), 2);
    }

    #[test]
    fn approve_applies_and_notifies() {
        let f = fixture();
        f.service
            .push(&push_req("edit", edited_files(&f, &[(1, "x")])))
            .unwrap();

        assert!(matches!(
            f.service.approve("bob", "bob"),
            Err(TdbError::PermissionDenied(_))
        ));
        let status = f.service.approve("alice", "bob").unwrap();
        assert!(status.starts_with("Approved commit"));
        assert_eq!(rows(&f), vec![(Value::Int(1), Value::from("x"))]);

        let notes = f.service.notifications("bob").unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].outcome, Outcome::Approved);
        assert!(f.service.notifications("bob").unwrap().is_empty());
        assert!(matches!(
            f.service.approve("alice", "bob"),
            Err(TdbError::NotFound { .. })
        ));
    }

    #[test]
    fn reject_discards() {
        let f = fixture();
        f.service
            .push(&push_req("edit", edited_files(&f, &[])))
            .unwrap();
        assert_eq!(f.service.pending("alice").unwrap().len(), 1);
        f.service.reject("alice", "bob").unwrap();
        assert!(f.service.pending("alice").unwrap().is_empty());
        assert_eq!(rows(&f).len(), 2);
        assert_eq!(
            f.service.notifications("bob").unwrap()[0].outcome,
            Outcome::Rejected
        );
    }

    #[test]
    fn new_and_missing_tables() {
        let f = fixture();
        let mut files = edited_files(&f, &[(1, "y"), (2, "z")]);
        let t = files.remove("t.json").unwrap();
        files.insert("t2.json".to_string(), t);
        let resp = f.service.push(&push_req("move", files)).unwrap();

        let commit = f.service.commits().load("shop", &resp.commit_id).unwrap();
        assert_eq!(commit.tables["t"].deleted.len(), 2);
        assert!(commit.created_tables.contains_key("t2"));

        f.service.approve("alice", "bob").unwrap();
        assert_eq!(rows(&f).len(), 0);
        let copied = f.executor.execute("alice", "shop", "SELECT * FROM t2");
        assert_eq!(copied.row_count(), 2);
    }

    #[test]
    fn created_table_merges_into_one_made_meanwhile() {
        let f = fixture();
        let mut files = edited_files(&f, &[(1, "y"), (2, "z")]);
        let t = files.remove("t.json").unwrap();
        files.insert("t2.json".to_string(), t.clone());
        files.insert("t.json".to_string(), t);
        f.service.push(&push_req("add t2", files)).unwrap();

        // Owner creates the same table before approving.
        for sql in [
            "CREATE TABLE t2 (id INT PRIMARY KEY, v TEXT)",
            "INSERT INTO t2 VALUES (2, 'old'), (9, 'gone')",
        ] {
            let r = f.executor.execute("alice", "shop", sql);
            assert!(r.is_success(), "{}", r.message);
        }
        f.service.approve("alice", "bob").unwrap();

        let merged = f
            .executor
            .execute("alice", "shop", "SELECT id, v FROM t2 ORDER BY id");
        assert_eq!(merged.column_values("id"), vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(merged.column_values("v"), vec![Value::from("y"), Value::from("z")]);
    }

    #[test]
    fn json_endpoints_map_status() {
        let f = fixture();
        let body = serde_json::to_string(&clone_req("bob", "secret")).unwrap();
        let (status, text) = f.service.handle_clone(&body);
        assert_eq!(status, 200);
        let resp: CloneResponse = serde_json::from_str(&text).unwrap();
        assert!(resp.success);

        let body = serde_json::to_string(&clone_req("eve", "evil")).unwrap();
        let (status, text) = f.service.handle_clone(&body);
        assert_eq!(status, 401);
        let err: ErrorBody = serde_json::from_str(&text).unwrap();
        assert!(!err.success);

        let (status, _) = f.service.handle_push("not json");
        assert_eq!(status, 400);

        let mut req = push_req("bad", TableFiles::new());
        req.files.insert("t.json".to_string(), "{".to_string());
        let (status, _) = f.service.handle_push(&serde_json::to_string(&req).unwrap());
        assert_eq!(status, 400);
    }
}
