//! Client side of replication.
//!
//! A [`SyncClient`] reads and writes a local store and talks to the owner's
//! host through a [`SyncTransport`]. [`LocalTransport`] connects it to an
//! in-process [`SyncService`] over the same JSON bodies a network transport
//! would carry.

use super::protocol::{
    CloneRequest, CloneResponse, PushRequest, PushResponse, STATUS_OK, TableFiles,
    error_for_status,
};
use super::service::SyncService;
use crate::engine::storage_engine::{StorageEngine, TableKey};
use crate::error::TdbResult;
use crate::storage::store::table_name_from_file;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::info;

pub trait SyncTransport: Send + Sync {
    fn clone_database(&self, request: &CloneRequest) -> TdbResult<CloneResponse>;

    fn push(&self, request: &PushRequest) -> TdbResult<PushResponse>;
}

pub struct LocalTransport {
    service: Arc<SyncService>,
}

impl LocalTransport {
    pub fn new(service: Arc<SyncService>) -> Self {
        Self { service }
    }
}

fn decode<T: DeserializeOwned>((status, body): (u16, String)) -> TdbResult<T> {
    if status == STATUS_OK {
        Ok(serde_json::from_str(&body)?)
    } else {
        Err(error_for_status(status, &body))
    }
}

impl SyncTransport for LocalTransport {
    fn clone_database(&self, request: &CloneRequest) -> TdbResult<CloneResponse> {
        let body = serde_json::to_string(request)?;
        decode(self.service.handle_clone(&body))
    }

    fn push(&self, request: &PushRequest) -> TdbResult<PushResponse> {
        let body = serde_json::to_string(request)?;
        decode(self.service.handle_push(&body))
    }
}

pub struct SyncClient {
    transport: Box<dyn SyncTransport>,
    local: Arc<StorageEngine>,
    username: String,
    password: String,
}

impl SyncClient {
    pub fn new(
        transport: Box<dyn SyncTransport>,
        local: Arc<StorageEngine>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            local,
            username: username.into(),
            password: password.into(),
        }
    }

    /// Fetch `owner`'s database and write its tables into the local store,
    /// creating the database if needed. Returns the number of tables written.
    pub fn clone_database(&self, owner: &str, database: &str) -> TdbResult<usize> {
        let response = self.transport.clone_database(&CloneRequest {
            username: self.username.clone(),
            password: self.password.clone(),
            database: database.to_string(),
            owner_username: owner.to_string(),
        })?;

        let store = self.local.store();
        if !store.database_exists(database) {
            store.create_database(database)?;
        }
        self.local.flush_database(database)?;
        for (file_name, text) in &response.files {
            let Some(table) = table_name_from_file(file_name) else {
                continue;
            };
            let key = TableKey::new(database, table);
            self.local
                .with_table(&key, || store.write_table_file(database, file_name, text))?;
            self.local.invalidate_indexes(&key);
        }
        info!(
            "Cloned {} table(s) of {}/{}",
            response.files.len(),
            owner,
            database
        );
        Ok(response.files.len())
    }

    /// Send every local table of `database` for review. Returns the commit id.
    pub fn push_database(&self, owner: &str, database: &str, message: &str) -> TdbResult<String> {
        self.local.flush_database(database)?;
        let files: TableFiles = self
            .local
            .store()
            .read_table_files(database)?
            .into_iter()
            .collect();
        let response = self.transport.push(&PushRequest {
            username: self.username.clone(),
            password: self.password.clone(),
            database: database.to_string(),
            commit_message: message.to_string(),
            owner_username: owner.to_string(),
            files,
        })?;
        info!("Pushed {} as commit {}", database, response.commit_id);
        Ok(response.commit_id)
    }
}
