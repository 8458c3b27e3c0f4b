//! # doccron Store
//!
//! Document collection adapters for the doccron job queue.
//!
//! The scheduler never issues raw queries. Everything it needs from a
//! collection fits three shapes, captured by [`DocumentStore`]:
//!
//! - atomically select one document matching a [`Query`] and apply an
//!   [`Update`] to it, returning the document as it was before the update
//! - apply an [`Update`] to one document by identity
//! - delete one document by identity
//!
//! ## Backends
//!
//! - [`MemoryStore`]: in-process collection, handy for tests and embedding
//! - [`SqliteStore`]: JSON documents in a SQLite table, safe across processes

pub mod document;
pub mod error;
pub mod path;
pub mod query;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use document::{Document, DocumentId, ceil_to_millis, read_timestamp, timestamp_value};
pub use error::StoreError;
pub use path::FieldPath;
pub use query::{Condition, Filter, Query, Update, UpdateOp};
pub use sqlite::SqliteStore;
pub use store::{DocumentStore, MemoryStore};
