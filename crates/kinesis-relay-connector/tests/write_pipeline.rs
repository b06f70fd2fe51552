//! End-to-end tests of the write pipeline through the public connector API,
//! with an in-memory stream client standing in for Kinesis.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::Value;

use kinesis_relay_connector::{
    ConnectorConfig, ConnectorError, KinesisSinkConnector, PutRecordAck, PutRecordRequest, Result,
    SinkConnector, SinkRecord, StreamClient, StreamDescription,
};

/// Keeps every put per partition key, like a tiny single-stream service.
#[derive(Default)]
struct InMemoryStream {
    puts: Mutex<Vec<PutRecordRequest>>,
}

impl InMemoryStream {
    fn puts(&self) -> Vec<PutRecordRequest> {
        self.puts.lock().unwrap().clone()
    }

    fn delivered_records(&self) -> Vec<Value> {
        self.puts()
            .iter()
            .flat_map(|put| {
                let framed = BASE64.decode(&put.data).unwrap();
                serde_json::from_slice::<Vec<Value>>(&framed).unwrap()
            })
            .collect()
    }
}

#[async_trait]
impl StreamClient for InMemoryStream {
    async fn put_record(&self, request: PutRecordRequest) -> Result<PutRecordAck> {
        let mut puts = self.puts.lock().unwrap();
        puts.push(request);
        Ok(PutRecordAck {
            shard_id: "shardId-000000000000".to_string(),
            sequence_number: format!("{:056}", puts.len()),
        })
    }

    async fn describe_stream(&self, stream_name: &str) -> Result<StreamDescription> {
        if stream_name != "app-logs" {
            return Err(ConnectorError::ConnectivityError(format!(
                "Stream {} under account 123456789012 not found.",
                stream_name
            )));
        }
        Ok(StreamDescription {
            stream_name: stream_name.to_string(),
            status: "ACTIVE".to_string(),
        })
    }
}

fn config_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    let mut m: HashMap<String, String> = HashMap::new();
    m.insert("region".into(), "us-east-1".into());
    m.insert("stream.name".into(), "app-logs".into());
    for (k, v) in pairs {
        m.insert(k.to_string(), v.to_string());
    }
    m
}

fn connector(
    pairs: &[(&str, &str)],
    tasks_max: usize,
    stream: Arc<InMemoryStream>,
) -> KinesisSinkConnector {
    let envelope = ConnectorConfig {
        name: "app-logs-shipper".into(),
        connector_class: "kinesis".into(),
        tasks_max,
        detach_process: false,
        config: config_map(pairs),
    };
    let config = KinesisSinkConnector::from_connector_config(&envelope)
        .unwrap()
        .config()
        .clone();
    KinesisSinkConnector::with_client(&envelope.name, config, stream)
}

fn log_lines(n: usize) -> Vec<SinkRecord> {
    (0..n)
        .map(|i| {
            SinkRecord::new(format!(
                r#"{{"host":"web-{}","level":"info","message":"request {} served","seq":{}}}"#,
                i % 4,
                i,
                i
            ))
        })
        .collect()
}

#[tokio::test]
async fn test_every_record_is_delivered_once_in_order() {
    let stream = Arc::new(InMemoryStream::default());
    let mut sink = connector(
        &[
            ("partition_key.random", "true"),
            ("chunk.size", "300"),
            ("order_events", "true"),
        ],
        1,
        stream.clone(),
    );
    sink.start().await.unwrap();

    let input = log_lines(50);
    let summary = sink.write(input.clone()).await.unwrap();
    assert_eq!(summary.records, 50);
    assert!(summary.batches > 1);

    let expected: Vec<Value> = input
        .iter()
        .map(|r| serde_json::from_slice(&r.value).unwrap())
        .collect();
    assert_eq!(stream.delivered_records(), expected);

    for put in stream.puts() {
        let framed = BASE64.decode(&put.data).unwrap();
        let records = serde_json::from_slice::<Vec<Value>>(&framed).unwrap();
        if records.len() > 1 {
            assert!(framed.len() < 300);
        }
    }
}

#[tokio::test]
async fn test_unordered_write_delivers_all_records() {
    let stream = Arc::new(InMemoryStream::default());
    let mut sink = connector(
        &[
            ("partition_key.random", "true"),
            ("chunk.size", "250"),
            ("put.concurrency", "3"),
        ],
        1,
        stream.clone(),
    );
    sink.start().await.unwrap();
    let summary = sink.write(log_lines(40)).await.unwrap();

    let mut seqs: Vec<i64> = stream
        .delivered_records()
        .iter()
        .map(|v| v["seq"].as_i64().unwrap())
        .collect();
    seqs.sort_unstable();
    assert_eq!(seqs, (0..40).collect::<Vec<_>>());
    assert_eq!(summary.acks.len(), summary.batches);
}

#[tokio::test]
async fn test_expression_partition_and_hash_keys() {
    let stream = Arc::new(InMemoryStream::default());
    let mut sink = connector(
        &[
            ("partition_key.field", "host"),
            ("partition_key.expr", r#"upcase | prepend("logs-")"#),
            ("explicit_hash_key.field", "host"),
            ("explicit_hash_key.expr", "hash_key"),
        ],
        1,
        stream.clone(),
    );
    sink.start().await.unwrap();
    sink.write(log_lines(3)).await.unwrap();

    let puts = stream.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].partition_key, "logs-WEB-0");
    let hash_key = puts[0].explicit_hash_key.as_deref().unwrap();
    assert!(hash_key.parse::<u128>().is_ok());
}

#[tokio::test]
async fn test_parallel_workers_disable_ordering_without_error() {
    let stream = Arc::new(InMemoryStream::default());
    let mut sink = connector(
        &[("partition_key.random", "true"), ("order_events", "true")],
        4,
        stream.clone(),
    );
    assert!(!sink.config().order_events);
    sink.start().await.unwrap();
    sink.write(log_lines(5)).await.unwrap();
    assert_eq!(stream.delivered_records().len(), 5);
}

#[tokio::test]
async fn test_unknown_stream_fails_at_start() {
    let stream = Arc::new(InMemoryStream::default());
    let envelope = ConnectorConfig {
        name: "wrong-stream".into(),
        connector_class: "kinesis".into(),
        tasks_max: 1,
        detach_process: false,
        config: {
            let mut m = config_map(&[("partition_key.random", "true")]);
            m.insert("stream.name".into(), "other".into());
            m
        },
    };
    let config = KinesisSinkConnector::from_connector_config(&envelope)
        .unwrap()
        .config()
        .clone();
    let mut sink = KinesisSinkConnector::with_client("wrong-stream", config, stream.clone());

    let err = sink.start().await.unwrap_err();
    assert!(matches!(err, ConnectorError::ConnectivityError(_)));
    assert!(sink.write(log_lines(1)).await.is_err());
    assert!(stream.puts().is_empty());
}

#[tokio::test]
async fn test_missing_key_field_fails_whole_write() {
    let stream = Arc::new(InMemoryStream::default());
    let mut sink = connector(&[("partition_key.field", "tenant")], 1, stream.clone());
    sink.start().await.unwrap();

    let err = sink.write(log_lines(2)).await.unwrap_err();
    assert!(matches!(err, ConnectorError::KeyResolutionError(_)));
    assert!(stream.puts().is_empty());
}
