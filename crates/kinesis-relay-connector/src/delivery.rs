//! Delivery of packed batches to the stream.
//!
//! [`DeliveryEngine`] owns the per-worker pieces fixed at startup (the
//! config, the key resolver, the packer and the client) and turns one host
//! chunk into a sequence of `PutRecord` calls.
//!
//! With `order_events` the batches of a write go out one at a time in pack
//! order and the first failure stops the write. Otherwise keys for every
//! batch are resolved up front, the puts run with bounded concurrency, every
//! batch is attempted and the first failure is reported once all complete.
//! Neither mode retries; the host re-sends the whole chunk.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::batch::{Batch, BatchPacker};
use crate::client::{PutRecordAck, PutRecordRequest, StreamClient, StreamDescription};
use crate::config::{KinesisSinkConfig, PartitionKeySource};
use crate::error::{ConnectorError, Result};
use crate::keys::{random_partition_key, KeyResolver, ResolvedKeys};
use crate::traits::SinkRecord;

/// Outcome of a successful `write`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Records in the chunk.
    pub records: usize,
    /// Batches sent, one `PutRecord` each.
    pub batches: usize,
    /// Service acknowledgments. In unordered mode these are in completion
    /// order, not pack order.
    pub acks: Vec<PutRecordAck>,
}

/// Orchestrates packing, key resolution and puts for one worker.
pub struct DeliveryEngine {
    config: Arc<KinesisSinkConfig>,
    resolver: KeyResolver,
    packer: BatchPacker,
    client: Arc<dyn StreamClient>,
}

impl std::fmt::Debug for DeliveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryEngine")
            .field("stream", &self.config.target.stream_name)
            .field("resolver", &self.resolver)
            .field("packer", &self.packer)
            .finish()
    }
}

impl DeliveryEngine {
    pub fn new(config: Arc<KinesisSinkConfig>, client: Arc<dyn StreamClient>) -> Result<Self> {
        let resolver = KeyResolver::new(
            config.partition_key.clone(),
            config.explicit_hash_key.clone(),
        )?;
        let packer = BatchPacker::new(config.chunk_size);
        Ok(Self {
            config,
            resolver,
            packer,
            client,
        })
    }

    pub fn config(&self) -> &KinesisSinkConfig {
        &self.config
    }

    pub fn packer(&self) -> &BatchPacker {
        &self.packer
    }

    /// Verify the target stream exists before any writes are accepted.
    pub async fn check_connectivity(&self) -> Result<StreamDescription> {
        let stream_name = &self.config.target.stream_name;
        let description = self.client.describe_stream(stream_name).await.map_err(|e| match e {
            e @ ConnectorError::ConnectivityError(_) => e,
            other => ConnectorError::ConnectivityError(format!(
                "failed to describe stream '{}': {}",
                stream_name, other
            )),
        })?;

        if description.is_writable() {
            debug!(
                stream = %description.stream_name,
                status = %description.status,
                "stream is reachable"
            );
        } else {
            warn!(
                stream = %description.stream_name,
                status = %description.status,
                "stream exists but is not active, puts may fail until it is"
            );
        }
        Ok(description)
    }

    /// Resolve keys for `batch`, using its first record as the context.
    ///
    /// With a random key source the configured partition strategy is never
    /// evaluated; only the explicit hash key may read the record.
    pub fn resolve_keys(&self, batch: &Batch) -> Result<ResolvedKeys> {
        if self.config.partition_key_source == PartitionKeySource::Random {
            let hash_strategy = self.resolver.explicit_hash_key_strategy();
            let context = if hash_strategy.needs_context() {
                key_context(batch)
            } else {
                Value::Null
            };
            return Ok(ResolvedKeys {
                partition_key: random_partition_key(),
                explicit_hash_key: self.resolver.resolve_explicit_hash_key(&context)?,
            });
        }

        let context = if self.resolver.needs_context() {
            key_context(batch)
        } else {
            Value::Null
        };
        self.resolver.resolve(&context)
    }

    /// Build the `PutRecord` request for `batch`.
    pub fn prepare(&self, batch: &Batch) -> Result<PutRecordRequest> {
        let keys = self.resolve_keys(batch)?;
        let data = self.config.payload_encoding.encode(batch.framed());
        Ok(PutRecordRequest {
            stream_name: self.config.target.stream_name.clone(),
            partition_key: keys.partition_key,
            explicit_hash_key: keys.explicit_hash_key,
            data,
        })
    }

    /// Deliver a single batch. No retries.
    pub async fn deliver(&self, batch: &Batch) -> Result<PutRecordAck> {
        let request = self.prepare(batch)?;
        self.send(request, batch.len()).await
    }

    async fn send(&self, request: PutRecordRequest, records: usize) -> Result<PutRecordAck> {
        let partition_key = request.partition_key.clone();
        let bytes = request.data.len();
        let ack = match self.client.put_record(request).await {
            Ok(ack) => ack,
            Err(e) => {
                error!(
                    stream = %self.config.target.stream_name,
                    records,
                    bytes,
                    partition_key = %partition_key,
                    error = %e,
                    "put failed"
                );
                return Err(e);
            }
        };
        debug!(
            stream = %self.config.target.stream_name,
            records,
            bytes,
            partition_key = %partition_key,
            shard_id = %ack.shard_id,
            sequence_number = %ack.sequence_number,
            "put batch"
        );
        Ok(ack)
    }

    /// Pack and deliver one host chunk.
    pub async fn write<I>(&self, chunk: I) -> Result<WriteSummary>
    where
        I: IntoIterator<Item = SinkRecord>,
    {
        if self.config.order_events {
            self.write_ordered(chunk).await
        } else {
            self.write_unordered(chunk).await
        }
    }

    async fn write_ordered<I>(&self, chunk: I) -> Result<WriteSummary>
    where
        I: IntoIterator<Item = SinkRecord>,
    {
        let mut summary = WriteSummary::default();
        for batch in self.packer.pack(chunk) {
            let ack = self.deliver(&batch).await?;
            summary.records += batch.len();
            summary.batches += 1;
            summary.acks.push(ack);
        }
        Ok(summary)
    }

    async fn write_unordered<I>(&self, chunk: I) -> Result<WriteSummary>
    where
        I: IntoIterator<Item = SinkRecord>,
    {
        let mut records = 0;
        let prepared = self
            .packer
            .pack(chunk)
            .map(|batch| {
                records += batch.len();
                self.prepare(&batch).map(|request| (request, batch.len()))
            })
            .collect::<Result<Vec<_>>>()?;

        let batches = prepared.len();
        let results: Vec<Result<PutRecordAck>> = stream::iter(prepared)
            .map(|(request, len)| self.send(request, len))
            .buffer_unordered(self.config.put_concurrency)
            .collect()
            .await;

        let mut acks = Vec::with_capacity(batches);
        let mut first_error = None;
        let mut failed = 0;
        for result in results {
            match result {
                Ok(ack) => acks.push(ack),
                Err(e) => {
                    failed += 1;
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            warn!(
                stream = %self.config.target.stream_name,
                batches,
                failed,
                "write failed, chunk will be retried by the host"
            );
            return Err(e);
        }

        Ok(WriteSummary {
            records,
            batches,
            acks,
        })
    }
}

/// Context handed to key resolution: the batch's first record parsed as
/// JSON, or its text when it is not JSON.
pub fn key_context(batch: &Batch) -> Value {
    match batch.first() {
        Some(record) => serde_json::from_slice(&record.value).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&record.value).into_owned())
        }),
        None => Value::Null,
    }
}
