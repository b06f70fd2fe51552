//! Configuration types for the Kinesis relay connector.
//!
//! The host hands over a [`ConnectorConfig`]: a name, a worker count and a
//! flat string map. [`SinkSettings`] is that map parsed into typed but still
//! optional fields; [`KinesisSinkConfig`] is the validated, immutable result
//! that every other component reads from.
//!
//! ## Keys
//!
//! | Key                       | Description                                   | Default      |
//! |---------------------------|-----------------------------------------------|--------------|
//! | `region`                  | AWS region                                    | required     |
//! | `stream.name`             | Target stream                                 | required     |
//! | `aws.key_id`              | Static access key id                          | (provider)   |
//! | `aws.sec_key`             | Static secret access key                      | (provider)   |
//! | `endpoint.url`            | Endpoint override                             | (none)       |
//! | `chunk.size`              | Batch threshold in bytes                      | `37000`      |
//! | `partition_key.random`    | Random partition key per batch                | `false`      |
//! | `partition_key.field`     | Record field used as partition key            | (none)       |
//! | `partition_key.expr`      | Partition key expression                      | (none)       |
//! | `partition_key.source`    | `configured` or `random`                      | `configured` |
//! | `explicit_hash_key.field` | Record field used as explicit hash key        | (none)       |
//! | `explicit_hash_key.expr`  | Explicit hash key expression                  | (none)       |
//! | `order_events`            | Deliver batches of a write strictly in order  | `false`      |
//! | `debug`                   | Debug-level transport logging                 | `false`      |
//! | `put.concurrency`         | Max in-flight puts when unordered             | `4`          |
//! | `payload.encoding`        | `base64` or `raw`                             | `base64`     |

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::batch::DEFAULT_CHUNK_SIZE;
use crate::error::{ConnectorError, Result};
use crate::keys::KeyStrategy;
use crate::validate;

/// Default maximum number of worker tasks for a connector.
fn default_tasks_max() -> usize {
    1
}

/// Default number of concurrent puts in unordered mode.
pub const DEFAULT_PUT_CONCURRENCY: usize = 4;

/// Top-level configuration for a connector instance, as supplied by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Unique name identifying this connector instance.
    pub name: String,

    /// Identifier of the connector implementation.
    #[serde(default = "default_connector_class")]
    pub connector_class: String,

    /// Number of workers the host runs for this connector. Defaults to 1.
    #[serde(default = "default_tasks_max")]
    pub tasks_max: usize,

    /// Whether the host runs each worker in a detached process.
    #[serde(default)]
    pub detach_process: bool,

    /// Connector-specific key-value configuration.
    #[serde(default)]
    pub config: HashMap<String, String>,
}

fn default_connector_class() -> String {
    "kinesis".to_string()
}

/// Static AWS credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Where records are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub region: String,
    pub stream_name: String,
    pub credentials: Option<Credentials>,
    pub endpoint_url: Option<String>,
    pub debug: bool,
}

impl StreamTarget {
    pub fn new(region: impl Into<String>, stream_name: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            stream_name: stream_name.into(),
            credentials: None,
            endpoint_url: None,
            debug: false,
        }
    }
}

/// How the framed batch is encoded into the record data blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadEncoding {
    /// Standard base64 of the framed bytes.
    Base64,
    /// The framed bytes as-is.
    Raw,
}

impl PayloadEncoding {
    /// Parse from a string (case-insensitive).
    pub fn from_str_config(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "base64" => Ok(PayloadEncoding::Base64),
            "raw" | "none" => Ok(PayloadEncoding::Raw),
            other => Err(ConnectorError::ConfigError(format!(
                "unknown payload encoding: '{}'",
                other
            ))),
        }
    }

    pub fn encode(&self, framed: Bytes) -> Bytes {
        match self {
            PayloadEncoding::Base64 => Bytes::from(BASE64.encode(&framed)),
            PayloadEncoding::Raw => framed,
        }
    }
}

/// Where the partition key used for delivery comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKeySource {
    /// Resolve the configured strategy for every batch.
    Configured,
    /// Always use a fresh random key, whatever strategy is configured.
    Random,
}

impl PartitionKeySource {
    /// Parse from a string (case-insensitive).
    pub fn from_str_config(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "configured" => Ok(PartitionKeySource::Configured),
            "random" => Ok(PartitionKeySource::Random),
            other => Err(ConnectorError::ConfigError(format!(
                "unknown partition key source: '{}'",
                other
            ))),
        }
    }
}

/// The connector's string map parsed into typed, still unvalidated fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSettings {
    pub region: Option<String>,
    pub stream_name: Option<String>,
    pub aws_key_id: Option<String>,
    pub aws_sec_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub chunk_size: usize,
    pub random_partition_key: bool,
    pub partition_key: Option<String>,
    pub partition_key_expr: Option<String>,
    pub partition_key_source: PartitionKeySource,
    pub explicit_hash_key: Option<String>,
    pub explicit_hash_key_expr: Option<String>,
    pub order_events: bool,
    pub debug: bool,
    pub put_concurrency: usize,
    pub payload_encoding: PayloadEncoding,
    pub workers: usize,
    pub detach_process: bool,
}

impl SinkSettings {
    /// Parse settings from a string key-value map.
    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        Ok(SinkSettings {
            region: non_empty(config, "region"),
            stream_name: non_empty(config, "stream.name"),
            aws_key_id: non_empty(config, "aws.key_id"),
            aws_sec_key: non_empty(config, "aws.sec_key"),
            endpoint_url: non_empty(config, "endpoint.url"),
            chunk_size: parse_usize(config, "chunk.size")?.unwrap_or(DEFAULT_CHUNK_SIZE),
            random_partition_key: parse_bool(config, "partition_key.random")?.unwrap_or(false),
            partition_key: non_empty(config, "partition_key.field"),
            partition_key_expr: non_empty(config, "partition_key.expr"),
            partition_key_source: config
                .get("partition_key.source")
                .map(|s| PartitionKeySource::from_str_config(s))
                .transpose()?
                .unwrap_or(PartitionKeySource::Configured),
            explicit_hash_key: non_empty(config, "explicit_hash_key.field"),
            explicit_hash_key_expr: non_empty(config, "explicit_hash_key.expr"),
            order_events: parse_bool(config, "order_events")?.unwrap_or(false),
            debug: parse_bool(config, "debug")?.unwrap_or(false),
            put_concurrency: parse_usize(config, "put.concurrency")?
                .unwrap_or(DEFAULT_PUT_CONCURRENCY),
            payload_encoding: config
                .get("payload.encoding")
                .map(|s| PayloadEncoding::from_str_config(s))
                .transpose()?
                .unwrap_or(PayloadEncoding::Base64),
            workers: 1,
            detach_process: false,
        })
    }

    /// Parse settings from the host envelope, including worker settings.
    pub fn from_connector_config(config: &ConnectorConfig) -> Result<Self> {
        let mut settings = Self::from_config_map(&config.config)?;
        settings.workers = config.tasks_max;
        settings.detach_process = config.detach_process;
        Ok(settings)
    }
}

fn non_empty(config: &HashMap<String, String>, key: &str) -> Option<String> {
    config
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

fn parse_usize(config: &HashMap<String, String>, key: &str) -> Result<Option<usize>> {
    config
        .get(key)
        .map(|s| {
            s.trim()
                .parse::<usize>()
                .map_err(|e| ConnectorError::ConfigError(format!("invalid {}: {}", key, e)))
        })
        .transpose()
}

fn parse_bool(config: &HashMap<String, String>, key: &str) -> Result<Option<bool>> {
    config
        .get(key)
        .map(|s| match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            other => Err(ConnectorError::ConfigError(format!(
                "invalid {}: '{}' is not a boolean",
                key, other
            ))),
        })
        .transpose()
}

/// Validated, immutable configuration shared by all components of one worker.
#[derive(Debug, Clone)]
pub struct KinesisSinkConfig {
    pub target: StreamTarget,
    pub chunk_size: usize,
    pub partition_key: KeyStrategy,
    pub partition_key_source: PartitionKeySource,
    pub explicit_hash_key: KeyStrategy,
    /// Effective ordering flag, already forced off in parallel mode.
    pub order_events: bool,
    pub put_concurrency: usize,
    pub payload_encoding: PayloadEncoding,
    pub workers: usize,
    pub detach_process: bool,
}

impl KinesisSinkConfig {
    /// Validate settings and select key strategies.
    pub fn from_settings(settings: SinkSettings) -> Result<Self> {
        validate::validate_settings(&settings)?;

        let partition_key = KeyStrategy::select(
            settings.random_partition_key,
            settings.partition_key,
            settings.partition_key_expr.as_deref(),
        )?;
        let explicit_hash_key = KeyStrategy::select(
            false,
            settings.explicit_hash_key,
            settings.explicit_hash_key_expr.as_deref(),
        )?;

        let credentials = match (settings.aws_key_id, settings.aws_sec_key) {
            (Some(id), Some(secret)) => Some(Credentials::new(id, secret)),
            (None, None) => None,
            _ => {
                tracing::warn!(
                    "only one of 'aws.key_id' and 'aws.sec_key' is set, falling back to the default credentials provider"
                );
                None
            }
        };

        let target = StreamTarget {
            // validate_settings guarantees both are present.
            region: settings.region.unwrap_or_default(),
            stream_name: settings.stream_name.unwrap_or_default(),
            credentials,
            endpoint_url: settings.endpoint_url,
            debug: settings.debug,
        };

        KinesisSinkConfigBuilder {
            target,
            chunk_size: settings.chunk_size,
            partition_key,
            partition_key_source: settings.partition_key_source,
            explicit_hash_key,
            order_events: settings.order_events,
            put_concurrency: settings.put_concurrency,
            payload_encoding: settings.payload_encoding,
            workers: settings.workers,
            detach_process: settings.detach_process,
        }
        .build()
    }

    /// Parse and validate a string key-value map for a single worker.
    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        Self::from_settings(SinkSettings::from_config_map(config)?)
    }

    /// Parse and validate the host envelope.
    pub fn from_connector_config(config: &ConnectorConfig) -> Result<Self> {
        Self::from_settings(SinkSettings::from_connector_config(config)?)
    }

    /// Start building a config programmatically.
    pub fn builder(target: StreamTarget) -> KinesisSinkConfigBuilder {
        KinesisSinkConfigBuilder::new(target)
    }

    /// Whether more than one worker may deliver concurrently.
    pub fn parallel_mode(&self) -> bool {
        self.detach_process || self.workers > 1
    }
}

/// Programmatic construction of a [`KinesisSinkConfig`].
#[derive(Debug, Clone)]
pub struct KinesisSinkConfigBuilder {
    target: StreamTarget,
    chunk_size: usize,
    partition_key: KeyStrategy,
    partition_key_source: PartitionKeySource,
    explicit_hash_key: KeyStrategy,
    order_events: bool,
    put_concurrency: usize,
    payload_encoding: PayloadEncoding,
    workers: usize,
    detach_process: bool,
}

impl KinesisSinkConfigBuilder {
    pub fn new(target: StreamTarget) -> Self {
        Self {
            target,
            chunk_size: DEFAULT_CHUNK_SIZE,
            partition_key: KeyStrategy::Absent,
            partition_key_source: PartitionKeySource::Configured,
            explicit_hash_key: KeyStrategy::Absent,
            order_events: false,
            put_concurrency: DEFAULT_PUT_CONCURRENCY,
            payload_encoding: PayloadEncoding::Base64,
            workers: 1,
            detach_process: false,
        }
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn partition_key(mut self, strategy: KeyStrategy) -> Self {
        self.partition_key = strategy;
        self
    }

    pub fn partition_key_source(mut self, source: PartitionKeySource) -> Self {
        self.partition_key_source = source;
        self
    }

    pub fn explicit_hash_key(mut self, strategy: KeyStrategy) -> Self {
        self.explicit_hash_key = strategy;
        self
    }

    pub fn order_events(mut self, order_events: bool) -> Self {
        self.order_events = order_events;
        self
    }

    pub fn put_concurrency(mut self, put_concurrency: usize) -> Self {
        self.put_concurrency = put_concurrency;
        self
    }

    pub fn payload_encoding(mut self, encoding: PayloadEncoding) -> Self {
        self.payload_encoding = encoding;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn detach_process(mut self, detach_process: bool) -> Self {
        self.detach_process = detach_process;
        self
    }

    /// Validate and freeze the config. `order_events` is forced off when
    /// several workers or detached processes are configured.
    pub fn build(self) -> Result<KinesisSinkConfig> {
        let order_events =
            validate::resolve_order_events(self.order_events, self.workers, self.detach_process);
        let config = KinesisSinkConfig {
            target: self.target,
            chunk_size: self.chunk_size,
            partition_key: self.partition_key,
            partition_key_source: self.partition_key_source,
            explicit_hash_key: self.explicit_hash_key,
            order_events,
            put_concurrency: self.put_concurrency,
            payload_encoding: self.payload_encoding,
            workers: self.workers,
            detach_process: self.detach_process,
        };
        validate::validate_config(&config)?;
        Ok(config)
    }
}
