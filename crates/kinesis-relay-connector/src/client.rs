//! Stream client boundary.
//!
//! [`StreamClient`] is the only way the connector talks to the stream
//! service. [`KinesisStreamClient`] implements it on top of the AWS SDK; tests
//! and alternative transports supply their own implementations.

use std::fmt::Debug;

use async_trait::async_trait;
use aws_sdk_kinesis::config::{AppName, Credentials as AwsCredentials};
use aws_sdk_kinesis::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_kinesis::primitives::Blob;
use bytes::Bytes;
use tracing::debug;

use crate::config::{Credentials, KinesisSinkConfig};
use crate::error::{ConnectorError, DeliveryFailure, Result};

/// Name reported in the user agent of every request.
pub const USER_AGENT_NAME: &str = "kinesis-relay-connector";

/// Crate version, appended to the user agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log targets that carry AWS transport logs.
pub const TRANSPORT_LOG_TARGETS: &[&str] =
    &["aws_smithy_runtime", "aws_smithy_http", "aws_sdk_kinesis"];

/// A single `PutRecord` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRecordRequest {
    pub stream_name: String,
    pub partition_key: String,
    pub explicit_hash_key: Option<String>,
    pub data: Bytes,
}

/// Service acknowledgment for an accepted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRecordAck {
    pub shard_id: String,
    pub sequence_number: String,
}

/// Result of a describe call against the target stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescription {
    pub stream_name: String,
    pub status: String,
}

impl StreamDescription {
    /// Whether the stream currently accepts writes.
    pub fn is_writable(&self) -> bool {
        matches!(self.status.as_str(), "ACTIVE" | "UPDATING")
    }
}

/// Operations the connector needs from the stream service.
#[async_trait]
pub trait StreamClient: Send + Sync {
    /// Append one record to the stream.
    async fn put_record(&self, request: PutRecordRequest) -> Result<PutRecordAck>;

    /// Look up the stream. A missing or inaccessible stream is an error.
    async fn describe_stream(&self, stream_name: &str) -> Result<StreamDescription>;
}

/// Connection options assembled from the sink configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub region: String,
    pub credentials: Option<Credentials>,
    pub endpoint_url: Option<String>,
    pub user_agent_suffix: String,
    pub debug: bool,
}

impl Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("region", &self.region)
            .field("static_credentials", &self.credentials.is_some())
            .field("endpoint_url", &self.endpoint_url)
            .field("user_agent_suffix", &self.user_agent_suffix)
            .field("debug", &self.debug)
            .finish()
    }
}

impl ClientOptions {
    /// Assemble options from a validated sink config.
    pub fn from_config(config: &KinesisSinkConfig) -> Self {
        Self {
            region: config.target.region.clone(),
            credentials: config.target.credentials.clone(),
            endpoint_url: config.target.endpoint_url.clone(),
            user_agent_suffix: user_agent_suffix(),
            debug: config.target.debug,
        }
    }

    /// The user agent suffix in the form accepted by the SDK's app name.
    fn app_name(&self) -> Result<AppName> {
        AppName::new(self.user_agent_suffix.replace('/', "_")).map_err(|e| {
            ConnectorError::ConfigError(format!(
                "invalid user agent suffix '{}': {}",
                self.user_agent_suffix, e
            ))
        })
    }
}

/// `<name>/<version>` identifying this shipper.
pub fn user_agent_suffix() -> String {
    format!("{}/{}", USER_AGENT_NAME, VERSION)
}

/// [`StreamClient`] backed by the AWS Kinesis SDK.
#[derive(Debug, Clone)]
pub struct KinesisStreamClient {
    client: aws_sdk_kinesis::Client,
    debug: bool,
}

impl KinesisStreamClient {
    /// Build a client from options. Static credentials are used only when
    /// both halves are configured; otherwise the default provider chain
    /// applies.
    pub async fn connect(options: &ClientOptions) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(options.region.clone()))
            .app_name(options.app_name()?);

        if let Some(creds) = &options.credentials {
            loader = loader.credentials_provider(AwsCredentials::new(
                creds.access_key_id.clone(),
                creds.secret_access_key.clone(),
                None,
                None,
                "kinesis-relay-static",
            ));
        }

        if let Some(endpoint) = &options.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        debug!(
            region = %options.region,
            user_agent = %options.user_agent_suffix,
            "built Kinesis client"
        );

        Ok(Self {
            client: aws_sdk_kinesis::Client::new(&sdk_config),
            debug: options.debug,
        })
    }
}

#[async_trait]
impl StreamClient for KinesisStreamClient {
    async fn put_record(&self, request: PutRecordRequest) -> Result<PutRecordAck> {
        if self.debug {
            debug!(
                stream = %request.stream_name,
                partition_key = %request.partition_key,
                explicit_hash_key = ?request.explicit_hash_key,
                bytes = request.data.len(),
                "PutRecord request"
            );
        }

        let output = self
            .client
            .put_record()
            .stream_name(request.stream_name)
            .partition_key(request.partition_key)
            .set_explicit_hash_key(request.explicit_hash_key)
            .data(Blob::new(request.data.to_vec()))
            .send()
            .await
            .map_err(|e| classify_put_error(&e))?;

        let ack = PutRecordAck {
            shard_id: output.shard_id().to_string(),
            sequence_number: output.sequence_number().to_string(),
        };
        if self.debug {
            debug!(shard_id = %ack.shard_id, sequence_number = %ack.sequence_number, "PutRecord response");
        }
        Ok(ack)
    }

    async fn describe_stream(&self, stream_name: &str) -> Result<StreamDescription> {
        let output = self
            .client
            .describe_stream_summary()
            .stream_name(stream_name)
            .send()
            .await
            .map_err(|e| {
                let code = e
                    .as_service_error()
                    .and_then(|se| se.code())
                    .unwrap_or("Unknown")
                    .to_string();
                ConnectorError::ConnectivityError(format!(
                    "cannot describe stream '{}' ({}): {}",
                    stream_name,
                    code,
                    DisplayErrorContext(&e)
                ))
            })?;

        let status = output
            .stream_description_summary()
            .map(|s| s.stream_status().as_str().to_string())
            .unwrap_or_else(|| "UNKNOWN".to_string());

        Ok(StreamDescription {
            stream_name: stream_name.to_string(),
            status,
        })
    }
}

/// Map an SDK failure from `PutRecord` to a classified delivery error.
fn classify_put_error<E, R>(err: &SdkError<E, R>) -> ConnectorError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: Debug,
{
    let message = format!("{}", DisplayErrorContext(err));
    let kind = match err {
        SdkError::ServiceError(service_err) => {
            classify_error_code(service_err.err().code().unwrap_or("Unknown"))
        }
        SdkError::TimeoutError(_) => DeliveryFailure::Timeout,
        SdkError::DispatchFailure(_) => DeliveryFailure::Transport,
        _ => DeliveryFailure::Service,
    };
    ConnectorError::delivery(kind, message)
}

/// Map a service error code to a failure kind.
pub fn classify_error_code(code: &str) -> DeliveryFailure {
    match code {
        "ProvisionedThroughputExceededException"
        | "ThrottlingException"
        | "LimitExceededException"
        | "KMSThrottlingException" => DeliveryFailure::Throttled,
        "AccessDeniedException" | "KMSAccessDeniedException" | "UnrecognizedClientException" => {
            DeliveryFailure::AccessDenied
        }
        "ResourceNotFoundException" => DeliveryFailure::StreamNotFound,
        "ValidationException" | "InvalidArgumentException" => DeliveryFailure::PayloadTooLarge,
        "InternalFailure" | "ServiceUnavailable" => DeliveryFailure::Transport,
        _ => DeliveryFailure::Service,
    }
}
