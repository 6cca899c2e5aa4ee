//! Storage module: Table Document Store.
//!
//! One JSON document per table. The SQL layer and the write layer only see
//! [`DocumentStore`]; the on-disk format lives in [`document`].

pub mod document;
pub mod lock;
pub mod store;

pub use document::{ForeignKey, Row, Schema, TableDocument, TableMetadata};
pub use lock::{LockRegistry, ReadLocking};
pub use store::DocumentStore;
