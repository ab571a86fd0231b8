//! Types shared between the pulse agent, storage layer and server.
//!
//! [`types::MetricSample`] is the unit every collector produces and the store
//! consumes; [`types::SnapshotPayload`] / [`types::BatchPayload`] are its wire
//! forms on the ingestion boundary.

pub mod id;
pub mod types;
