//! Connector traits for the Kinesis relay.
//!
//! Defines the `SinkConnector` lifecycle the host pipeline drives, along with
//! the record type it hands over on every write.

use async_trait::async_trait;
use bytes::Bytes;

use crate::delivery::WriteSummary;
use crate::error::Result;

/// A single pre-serialized record handed over by the host pipeline.
///
/// The connector treats the payload as opaque bytes; its length is the
/// encoded length used for batching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkRecord {
    /// Record value (payload).
    pub value: Bytes,
}

impl SinkRecord {
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Length of the record as it will appear inside the framed payload.
    pub fn encoded_len(&self) -> usize {
        self.value.len()
    }
}

impl From<Bytes> for SinkRecord {
    fn from(value: Bytes) -> Self {
        Self { value }
    }
}

impl From<&'static str> for SinkRecord {
    fn from(value: &'static str) -> Self {
        Self {
            value: Bytes::from_static(value.as_bytes()),
        }
    }
}

impl From<Vec<u8>> for SinkRecord {
    fn from(value: Vec<u8>) -> Self {
        Self {
            value: Bytes::from(value),
        }
    }
}

/// Trait that all sink connectors must implement.
///
/// The host decides when `write` is called and re-sends the same chunk when
/// it fails.
#[async_trait]
pub trait SinkConnector: Send + Sync {
    /// Build clients and verify the target before accepting traffic.
    async fn start(&mut self) -> Result<()>;

    /// Deliver one chunk of records. The whole chunk is consumed; any error
    /// means the host should retry it.
    async fn write(&mut self, chunk: Vec<SinkRecord>) -> Result<WriteSummary>;

    /// Gracefully shut down the connector.
    async fn stop(&mut self) -> Result<()>;

    /// Return the unique name of this connector instance.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // SinkRecord
    // ---------------------------------------------------------------

    #[test]
    fn test_sink_record_construction() {
        let rec = SinkRecord::new(r#"{"action":"click"}"#);
        assert_eq!(rec.value, Bytes::from(r#"{"action":"click"}"#));
        assert_eq!(rec.encoded_len(), 18);
    }

    #[test]
    fn test_sink_record_from_conversions() {
        assert_eq!(SinkRecord::from("ab").encoded_len(), 2);
        assert_eq!(SinkRecord::from(vec![1u8, 2, 3]).encoded_len(), 3);
        assert_eq!(
            SinkRecord::from(Bytes::from_static(b"xyz")).value,
            Bytes::from_static(b"xyz")
        );
    }

    #[test]
    fn test_sink_record_empty() {
        let rec = SinkRecord::new(Bytes::new());
        assert_eq!(rec.encoded_len(), 0);
    }

    #[test]
    fn test_sink_record_clone() {
        let rec = SinkRecord::from("v");
        let cloned = rec.clone();
        assert_eq!(cloned, rec);
    }

    // ---------------------------------------------------------------
    // SinkConnector
    // ---------------------------------------------------------------

    struct CountingSink {
        started: bool,
        written: usize,
    }

    #[async_trait]
    impl SinkConnector for CountingSink {
        async fn start(&mut self) -> Result<()> {
            self.started = true;
            Ok(())
        }

        async fn write(&mut self, chunk: Vec<SinkRecord>) -> Result<WriteSummary> {
            self.written += chunk.len();
            Ok(WriteSummary {
                records: chunk.len(),
                batches: usize::from(!chunk.is_empty()),
                acks: Vec::new(),
            })
        }

        async fn stop(&mut self) -> Result<()> {
            self.started = false;
            Ok(())
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_sink_connector_is_object_safe() {
        let mut sink: Box<dyn SinkConnector> = Box::new(CountingSink {
            started: false,
            written: 0,
        });
        sink.start().await.unwrap();
        let summary = sink
            .write(vec![SinkRecord::from("a"), SinkRecord::from("b")])
            .await
            .unwrap();
        assert_eq!(summary.records, 2);
        assert_eq!(summary.batches, 1);
        sink.stop().await.unwrap();
        assert_eq!(sink.name(), "counting");
    }
}
