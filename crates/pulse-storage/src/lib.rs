//! Persistence for metric streams, rankings snapshots and device commands.
//!
//! Everything lives in a single SQLite database (`pulse.db`, WAL mode) under
//! the data directory. [`metrics::MetricStore`] creates one table per
//! `(source_id, stream_kind)` on first write, with columns inferred from that
//! sample and remembered in a [`schema::SchemaCache`].
//! [`commands::CommandStore`] owns the device command lifecycle.

pub mod commands;
pub mod db;
pub mod error;
pub mod metrics;
pub mod schema;


pub use commands::CommandStore;
pub use error::{Result, StorageError};
pub use metrics::{MetricStore, StreamInfo};
pub use schema::{ColumnType, SchemaCache, StreamSchema};
