//! Kinesis Relay Connector
//!
//! Forwards already-buffered, serialized log records to an AWS Kinesis data
//! stream. Each host chunk is packed into size-bounded batches, every batch is
//! framed as a JSON array and delivered with one `PutRecord` call under a
//! partition key chosen by a configurable strategy.
//!
//! ## Architecture
//!
//! - **Config**: `ConnectorConfig` is the host envelope; `KinesisSinkConfig` is
//!   the validated, immutable config every component reads.
//! - **Validate**: startup checks and the parallel-mode `order_events` override.
//! - **Keys**: `KeyStrategy` and `KeyResolver` compute partition and explicit
//!   hash keys, backed by a restricted `Expression` registry.
//! - **Batch**: `BatchPacker` groups records under a byte threshold.
//! - **Client**: the `StreamClient` boundary and its AWS SDK implementation.
//! - **Delivery**: `DeliveryEngine` drives batches through keys and the client.
//! - **Sinks**: `KinesisSinkConnector` implements the `SinkConnector` lifecycle.

pub mod batch;
pub mod client;
pub mod config;
pub mod delivery;
pub mod error;
pub mod expression;
pub mod keys;
pub mod sinks;
pub mod traits;
pub mod validate;

// Re-export key types at crate root for convenience.
pub use batch::{Batch, BatchPacker};
pub use client::{
    ClientOptions, KinesisStreamClient, PutRecordAck, PutRecordRequest, StreamClient,
    StreamDescription,
};
pub use config::{
    ConnectorConfig, Credentials, KinesisSinkConfig, PartitionKeySource, PayloadEncoding,
    StreamTarget,
};
pub use delivery::{DeliveryEngine, WriteSummary};
pub use error::{ConnectorError, DeliveryFailure, Result};
pub use expression::Expression;
pub use keys::{KeyResolver, KeyStrategy, ResolvedKeys};
pub use sinks::KinesisSinkConnector;
pub use traits::{SinkConnector, SinkRecord};
