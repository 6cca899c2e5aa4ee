//! Commit/Sync Engine: table replication between an owner and child users.
//!
//! Children clone an owner's database, edit it locally and push it back.
//! A push is staged as a [`Commit`] holding per-table row diffs; an admin
//! approves (applies) or rejects (discards) it, and the pushing user is
//! notified either way.

pub mod client;
pub mod commit;
pub mod diff;
pub mod notification;
pub mod protocol;
pub mod service;
pub mod staging;

pub use client::{LocalTransport, SyncClient, SyncTransport};
pub use commit::{Commit, CommitStatus, ModifiedRow, TableDiff};
pub use diff::{apply_diff, diff_tables};
pub use notification::{Notification, NotificationQueue, Outcome};
pub use protocol::{CloneRequest, CloneResponse, ErrorBody, PushRequest, PushResponse, status_code};
pub use service::SyncService;
pub use staging::CommitStore;
