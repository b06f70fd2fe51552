//! Startup validation of connector settings.
//!
//! Everything here runs before the first write. A failure is always a
//! [`ConnectorError::ConfigError`] and prevents the connector from starting.

use tracing::warn;

use crate::config::{KinesisSinkConfig, SinkSettings};
use crate::error::{ConnectorError, Result};
use crate::keys::KeyStrategy;

/// Settings that must be present for the connector to start.
pub const MANDATORY_PARAMS: &[&str] = &["region", "stream.name"];

/// Check parsed settings before strategies are built. Does not log.
pub fn validate_settings(settings: &SinkSettings) -> Result<()> {
    let missing: Vec<&str> = MANDATORY_PARAMS
        .iter()
        .copied()
        .filter(|param| match *param {
            "region" => settings.region.is_none(),
            "stream.name" => settings.stream_name.is_none(),
            _ => false,
        })
        .collect();
    if !missing.is_empty() {
        return Err(ConnectorError::ConfigError(format!(
            "missing required {}",
            missing
                .iter()
                .map(|p| format!("'{}'", p))
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    if !settings.random_partition_key
        && settings.partition_key.is_none()
        && settings.partition_key_expr.is_none()
    {
        return Err(ConnectorError::ConfigError(
            "one of 'partition_key.random', 'partition_key.field' or 'partition_key.expr' must be set"
                .to_string(),
        ));
    }

    Ok(())
}

/// Check a fully assembled config. Shared by the map and builder paths.
pub fn validate_config(config: &KinesisSinkConfig) -> Result<()> {
    if config.target.region.trim().is_empty() {
        return Err(ConnectorError::ConfigError(
            "missing required 'region'".to_string(),
        ));
    }
    if config.target.stream_name.trim().is_empty() {
        return Err(ConnectorError::ConfigError(
            "missing required 'stream.name'".to_string(),
        ));
    }
    if config.chunk_size == 0 {
        return Err(ConnectorError::ConfigError(
            "'chunk.size' must be greater than zero".to_string(),
        ));
    }
    if config.put_concurrency == 0 {
        return Err(ConnectorError::ConfigError(
            "'put.concurrency' must be greater than zero".to_string(),
        ));
    }
    if config.workers == 0 {
        return Err(ConnectorError::ConfigError(
            "'tasks_max' must be greater than zero".to_string(),
        ));
    }
    if matches!(config.partition_key, KeyStrategy::Absent) {
        return Err(ConnectorError::ConfigError(
            "a partition key strategy is required".to_string(),
        ));
    }
    if matches!(config.explicit_hash_key, KeyStrategy::Random) {
        return Err(ConnectorError::ConfigError(
            "the explicit hash key cannot be random".to_string(),
        ));
    }
    Ok(())
}

/// Effective `order_events` flag.
///
/// Ordering cannot hold across independent workers, so it is forced off when
/// more than one worker or a detached process is configured.
pub fn resolve_order_events(requested: bool, workers: usize, detach_process: bool) -> bool {
    if requested && (workers > 1 || detach_process) {
        warn!(
            workers,
            detach_process, "order_events is ignored in parallel mode, disabling it"
        );
        return false;
    }
    requested
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PayloadEncoding, PartitionKeySource, StreamTarget};

    fn settings() -> SinkSettings {
        SinkSettings {
            region: Some("us-east-1".into()),
            stream_name: Some("app-logs".into()),
            aws_key_id: None,
            aws_sec_key: None,
            endpoint_url: None,
            chunk_size: 37_000,
            random_partition_key: true,
            partition_key: None,
            partition_key_expr: None,
            partition_key_source: PartitionKeySource::Configured,
            explicit_hash_key: None,
            explicit_hash_key_expr: None,
            order_events: false,
            debug: false,
            put_concurrency: 4,
            payload_encoding: PayloadEncoding::Base64,
            workers: 1,
            detach_process: false,
        }
    }

    // ---------------------------------------------------------------
    // Settings
    // ---------------------------------------------------------------

    #[test]
    fn test_valid_settings() {
        assert!(validate_settings(&settings()).is_ok());
    }

    #[test]
    fn test_missing_region() {
        let mut s = settings();
        s.region = None;
        let err = validate_settings(&s).unwrap_err();
        assert!(matches!(err, ConnectorError::ConfigError(_)));
        assert!(format!("{}", err).contains("'region'"));
    }

    #[test]
    fn test_missing_both_mandatory_params_named() {
        let mut s = settings();
        s.region = None;
        s.stream_name = None;
        let msg = format!("{}", validate_settings(&s).unwrap_err());
        assert!(msg.contains("'region'"));
        assert!(msg.contains("'stream.name'"));
    }

    #[test]
    fn test_no_partition_key_strategy() {
        let mut s = settings();
        s.random_partition_key = false;
        assert!(validate_settings(&s).is_err());

        s.partition_key = Some("user".into());
        assert!(validate_settings(&s).is_ok());

        s.partition_key = None;
        s.partition_key_expr = Some("to_s".into());
        assert!(validate_settings(&s).is_ok());
    }

    #[test]
    fn test_half_credentials_are_accepted() {
        let mut s = settings();
        s.aws_key_id = Some("AKIA".into());
        assert!(validate_settings(&s).is_ok());
    }

    // ---------------------------------------------------------------
    // Assembled config
    // ---------------------------------------------------------------

    #[test]
    fn test_zero_chunk_size_rejected() {
        let result = KinesisSinkConfig::builder(StreamTarget::new("r", "s"))
            .partition_key(KeyStrategy::Random)
            .chunk_size(0)
            .build();
        assert!(matches!(result, Err(ConnectorError::ConfigError(_))));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let result = KinesisSinkConfig::builder(StreamTarget::new("r", "s"))
            .partition_key(KeyStrategy::Random)
            .put_concurrency(0)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_blank_stream_rejected() {
        let result = KinesisSinkConfig::builder(StreamTarget::new("r", " "))
            .partition_key(KeyStrategy::Random)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_random_hash_key_rejected() {
        let result = KinesisSinkConfig::builder(StreamTarget::new("r", "s"))
            .partition_key(KeyStrategy::Random)
            .explicit_hash_key(KeyStrategy::Random)
            .build();
        assert!(result.is_err());
    }

    // ---------------------------------------------------------------
    // Ordering
    // ---------------------------------------------------------------

    #[test]
    fn test_resolve_order_events() {
        assert!(resolve_order_events(true, 1, false));
        assert!(!resolve_order_events(true, 2, false));
        assert!(!resolve_order_events(true, 1, true));
        assert!(!resolve_order_events(false, 1, false));
        assert!(!resolve_order_events(false, 8, true));
    }
}
