//! Sink connector implementations.
//!
//! This module contains the Kinesis Data Streams sink, the only delivery
//! target of the relay.

pub mod kinesis;

pub use kinesis::KinesisSinkConnector;
