//! Configuration file loading for kinesis-relay

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use kinesis_relay_connector::ConnectorConfig;
use serde::Deserialize;

/// On-disk layout. Connector keys live under `[config]` and may be written
/// as TOML strings, integers, floats or booleans.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    name: Option<String>,
    connector_class: Option<String>,
    tasks_max: Option<usize>,
    #[serde(default)]
    detach_process: bool,
    #[serde(default)]
    config: toml::Table,
}

/// Load a connector config from a TOML file.
pub fn load(path: &Path) -> Result<ConnectorConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse(&contents).with_context(|| format!("invalid config file {}", path.display()))
}

/// Parse a connector config from TOML text.
pub fn parse(contents: &str) -> Result<ConnectorConfig> {
    let file: ConfigFile = toml::from_str(contents)?;

    let mut config = HashMap::with_capacity(file.config.len());
    for (key, value) in file.config {
        let value = match value {
            toml::Value::String(s) => s,
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            other => bail!(
                "config key '{}' must be a string, number or boolean, got {}",
                key,
                other.type_str()
            ),
        };
        config.insert(key, value);
    }

    Ok(ConnectorConfig {
        name: file.name.unwrap_or_else(|| "kinesis-relay".to_string()),
        connector_class: file
            .connector_class
            .unwrap_or_else(|| "kinesis".to_string()),
        tasks_max: file.tasks_max.unwrap_or(1),
        detach_process: file.detach_process,
        config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let config = parse(
            r#"
            name = "nginx-access"
            tasks_max = 2

            [config]
            region = "eu-west-1"
            "stream.name" = "access-logs"
            "chunk.size" = 1000
            order_events = true
            "#,
        )
        .unwrap();
        assert_eq!(config.name, "nginx-access");
        assert_eq!(config.connector_class, "kinesis");
        assert_eq!(config.tasks_max, 2);
        assert!(!config.detach_process);
        assert_eq!(config.config["stream.name"], "access-logs");
        assert_eq!(config.config["chunk.size"], "1000");
        assert_eq!(config.config["order_events"], "true");
    }

    #[test]
    fn test_parse_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.name, "kinesis-relay");
        assert_eq!(config.tasks_max, 1);
        assert!(config.config.is_empty());
    }

    #[test]
    fn test_parse_dotted_keys_need_quotes() {
        // Unquoted dotted keys are nested tables in TOML.
        let err = parse(
            r#"
            [config]
            stream.name = "x"
            "#,
        )
        .unwrap_err();
        assert!(format!("{}", err).contains("stream"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load(Path::new("/nonexistent/kinesis-relay.toml")).unwrap_err();
        assert!(format!("{:#}", err).contains("failed to read config file"));
    }
}
