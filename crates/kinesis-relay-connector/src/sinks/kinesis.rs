//! Kinesis Sink Connector
//!
//! Packs each host chunk into size-bounded batches, frames every batch as a
//! JSON array and sends it as one `PutRecord` call. See [`crate::config`] for
//! the configuration keys.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::client::{ClientOptions, KinesisStreamClient, StreamClient};
use crate::config::{ConnectorConfig, KinesisSinkConfig};
use crate::delivery::{DeliveryEngine, WriteSummary};
use crate::error::{ConnectorError, Result};
use crate::traits::{SinkConnector, SinkRecord};

/// Sink connector that writes records to a Kinesis data stream.
pub struct KinesisSinkConnector {
    name: String,
    config: Arc<KinesisSinkConfig>,
    client: Option<Arc<dyn StreamClient>>,
    engine: Option<DeliveryEngine>,
}

impl KinesisSinkConnector {
    /// Create a single-worker connector from a name and string config map.
    pub fn new(name: &str, config_map: &HashMap<String, String>) -> Result<Self> {
        let config = KinesisSinkConfig::from_config_map(config_map)?;
        Ok(Self::with_config(name, config))
    }

    /// Create from the host envelope, honoring its worker settings.
    pub fn from_connector_config(config: &ConnectorConfig) -> Result<Self> {
        let sink_config = KinesisSinkConfig::from_connector_config(config)?;
        Ok(Self::with_config(&config.name, sink_config))
    }

    /// Create with an already-parsed config.
    pub fn with_config(name: &str, config: KinesisSinkConfig) -> Self {
        Self {
            name: name.to_string(),
            config: Arc::new(config),
            client: None,
            engine: None,
        }
    }

    /// Create with an injected stream client (useful for testing).
    pub fn with_client(
        name: &str,
        config: KinesisSinkConfig,
        client: Arc<dyn StreamClient>,
    ) -> Self {
        Self {
            name: name.to_string(),
            config: Arc::new(config),
            client: Some(client),
            engine: None,
        }
    }

    pub fn config(&self) -> &KinesisSinkConfig {
        &self.config
    }

    /// Whether `start` has completed and writes are accepted.
    pub fn is_started(&self) -> bool {
        self.engine.is_some()
    }
}

impl std::fmt::Debug for KinesisSinkConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KinesisSinkConnector")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("started", &self.is_started())
            .finish()
    }
}

#[async_trait]
impl SinkConnector for KinesisSinkConnector {
    async fn start(&mut self) -> Result<()> {
        let client = match self.client.clone() {
            Some(client) => client,
            None => {
                let options = ClientOptions::from_config(&self.config);
                let client: Arc<dyn StreamClient> =
                    Arc::new(KinesisStreamClient::connect(&options).await?);
                self.client = Some(client.clone());
                client
            }
        };

        let engine = DeliveryEngine::new(self.config.clone(), client)?;
        engine.check_connectivity().await?;
        self.engine = Some(engine);

        tracing::info!(
            connector = %self.name,
            stream = %self.config.target.stream_name,
            region = %self.config.target.region,
            partition_key = %self.config.partition_key.describe(),
            explicit_hash_key = %self.config.explicit_hash_key.describe(),
            order_events = self.config.order_events,
            chunk_size = self.config.chunk_size,
            "Kinesis sink connector started"
        );
        Ok(())
    }

    async fn write(&mut self, chunk: Vec<SinkRecord>) -> Result<WriteSummary> {
        let engine = self.engine.as_ref().ok_or_else(|| {
            ConnectorError::ConnectivityError(format!(
                "connector '{}' has not been started",
                self.name
            ))
        })?;
        let summary = engine.write(chunk).await?;
        tracing::debug!(
            connector = %self.name,
            records = summary.records,
            batches = summary.batches,
            "wrote chunk"
        );
        Ok(summary)
    }

    async fn stop(&mut self) -> Result<()> {
        self.engine = None;
        tracing::info!(connector = %self.name, "Kinesis sink connector stopped");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
