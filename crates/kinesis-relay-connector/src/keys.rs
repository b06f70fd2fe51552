//! Partition key and explicit hash key resolution.
//!
//! The strategy for each key is chosen once at startup and never changes for
//! the lifetime of a connector. Resolution is a pure function of the strategy
//! and the context value handed in by the delivery engine.

use serde_json::Value;
use uuid::Uuid;

use crate::error::{ConnectorError, Result};
use crate::expression::{value_to_key_string, Expression};

/// Maximum partition key length accepted by the stream service, in characters.
pub const MAX_PARTITION_KEY_LEN: usize = 256;

/// How a key is computed for a batch.
#[derive(Debug, Clone)]
pub enum KeyStrategy {
    /// A fresh UUID v4 per resolution.
    Random,
    /// The named top-level field of the context, coerced to a string.
    Field(String),
    /// An expression applied to the named field, or to the whole context when
    /// no field is given.
    Expression {
        field: Option<String>,
        expression: Expression,
    },
    /// No key; only valid for the explicit hash key.
    Absent,
}

impl KeyStrategy {
    /// Pick a strategy from the raw options.
    ///
    /// `random` wins over everything else; otherwise a field and/or an
    /// expression select `Field` or `Expression`. Nothing set yields `Absent`.
    pub fn select(random: bool, field: Option<String>, expr: Option<&str>) -> Result<Self> {
        if random {
            return Ok(KeyStrategy::Random);
        }
        match (field, expr) {
            (field, Some(source)) => Ok(KeyStrategy::Expression {
                field,
                expression: Expression::parse(source)?,
            }),
            (Some(field), None) => Ok(KeyStrategy::Field(field)),
            (None, None) => Ok(KeyStrategy::Absent),
        }
    }

    /// Whether resolving this strategy reads the context at all.
    pub fn needs_context(&self) -> bool {
        matches!(self, KeyStrategy::Field(_) | KeyStrategy::Expression { .. })
    }

    /// Short human-readable description for logs.
    pub fn describe(&self) -> String {
        match self {
            KeyStrategy::Random => "random".to_string(),
            KeyStrategy::Field(name) => format!("field '{}'", name),
            KeyStrategy::Expression {
                field: Some(name),
                expression,
            } => format!("expression '{}' on field '{}'", expression.source(), name),
            KeyStrategy::Expression {
                field: None,
                expression,
            } => format!("expression '{}'", expression.source()),
            KeyStrategy::Absent => "none".to_string(),
        }
    }

    /// Compute the key for `context`. `Absent` yields `None`.
    pub fn resolve(&self, context: &Value) -> Result<Option<String>> {
        match self {
            KeyStrategy::Random => Ok(Some(random_partition_key())),
            KeyStrategy::Field(name) => {
                let value = extract_field(context, name)?;
                Ok(Some(value_to_key_string(value)))
            }
            KeyStrategy::Expression { field, expression } => {
                let input = match field {
                    Some(name) => extract_field(context, name)?,
                    None => context,
                };
                expression
                    .evaluate_to_string(input)
                    .map(Some)
                    .map_err(|e| {
                        ConnectorError::KeyResolutionError(format!(
                            "expression '{}' failed: {}",
                            expression.source(),
                            e
                        ))
                    })
            }
            KeyStrategy::Absent => Ok(None),
        }
    }
}

/// A fresh v4 UUID rendered as text.
pub fn random_partition_key() -> String {
    Uuid::new_v4().to_string()
}

fn extract_field<'a>(context: &'a Value, name: &str) -> Result<&'a Value> {
    match context {
        Value::Object(map) => map.get(name).ok_or_else(|| {
            ConnectorError::KeyResolutionError(format!("field '{}' is missing from record", name))
        }),
        _ => Err(ConnectorError::KeyResolutionError(format!(
            "cannot read field '{}' from a record that is not a JSON object",
            name
        ))),
    }
}

/// Keys resolved for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKeys {
    pub partition_key: String,
    pub explicit_hash_key: Option<String>,
}

/// Resolves the partition key and optional explicit hash key for a batch.
#[derive(Debug, Clone)]
pub struct KeyResolver {
    partition_key: KeyStrategy,
    explicit_hash_key: KeyStrategy,
}

impl KeyResolver {
    /// Build a resolver. The partition key strategy must not be `Absent` and
    /// the explicit hash key can never be `Random`.
    pub fn new(partition_key: KeyStrategy, explicit_hash_key: KeyStrategy) -> Result<Self> {
        if matches!(partition_key, KeyStrategy::Absent) {
            return Err(ConnectorError::ConfigError(
                "a partition key strategy is required".to_string(),
            ));
        }
        if matches!(explicit_hash_key, KeyStrategy::Random) {
            return Err(ConnectorError::ConfigError(
                "the explicit hash key cannot be random".to_string(),
            ));
        }
        Ok(Self {
            partition_key,
            explicit_hash_key,
        })
    }

    pub fn partition_key_strategy(&self) -> &KeyStrategy {
        &self.partition_key
    }

    pub fn explicit_hash_key_strategy(&self) -> &KeyStrategy {
        &self.explicit_hash_key
    }

    /// Whether either strategy reads the context.
    pub fn needs_context(&self) -> bool {
        self.partition_key.needs_context() || self.explicit_hash_key.needs_context()
    }

    /// Resolve both keys against `context`.
    pub fn resolve(&self, context: &Value) -> Result<ResolvedKeys> {
        let partition_key = self.partition_key.resolve(context)?.unwrap_or_default();
        if partition_key.is_empty() {
            return Err(ConnectorError::KeyResolutionError(format!(
                "partition key from {} is empty",
                self.partition_key.describe()
            )));
        }

        let explicit_hash_key = self.resolve_explicit_hash_key(context)?;

        Ok(ResolvedKeys {
            partition_key: truncate_chars(partition_key, MAX_PARTITION_KEY_LEN),
            explicit_hash_key,
        })
    }

    /// Resolve only the explicit hash key. An empty value is omitted.
    pub fn resolve_explicit_hash_key(&self, context: &Value) -> Result<Option<String>> {
        Ok(self
            .explicit_hash_key
            .resolve(context)?
            .filter(|k| !k.is_empty()))
    }
}

fn truncate_chars(s: String, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s,
    }
}
