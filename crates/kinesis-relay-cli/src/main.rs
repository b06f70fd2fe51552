//! Kinesis Relay CLI (kinesis-relay)
//!
//! Minimal host for the Kinesis relay connector: reads newline-delimited
//! records, hands them to the connector in fixed-size chunks and reports what
//! was shipped.
//!
//! ## Quick Start
//!
//! ```bash
//! # Check the config without touching the network
//! kinesis-relay --config relay.toml validate
//!
//! # Verify the stream is reachable
//! kinesis-relay --config relay.toml check
//!
//! # Ship a file (or `-` for stdin)
//! tail -n 1000 access.log.json | kinesis-relay --config relay.toml ship -
//! ```
//!
//! ## Configuration
//!
//! ```toml
//! name = "access-logs"
//! tasks_max = 1
//!
//! [config]
//! region = "us-east-1"
//! "stream.name" = "access-logs"
//! "partition_key.field" = "host"
//! ```
//!
//! Log verbosity follows `RUST_LOG`. Setting `debug = true` under `[config]`
//! also enables debug logs for the AWS transport.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kinesis_relay_connector::client::TRANSPORT_LOG_TARGETS;
use kinesis_relay_connector::{
    ConnectorConfig, KinesisSinkConfig, KinesisSinkConnector, SinkConnector, SinkRecord,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod config;

#[derive(Parser)]
#[command(name = "kinesis-relay")]
#[command(about = "Ship newline-delimited records to an AWS Kinesis data stream", long_about = None)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, env = "KINESIS_RELAY_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the config and print the effective settings
    Validate,
    /// Verify that the target stream exists and is reachable
    Check,
    /// Read records line by line and deliver them
    Ship {
        /// Input file, or `-` for stdin
        #[arg(default_value = "-")]
        input: String,

        /// Records handed to the connector per write
        #[arg(long, default_value_t = 500)]
        chunk_records: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let connector_config = config::load(&cli.config)?;
    let sink_config = KinesisSinkConfig::from_connector_config(&connector_config)
        .context("invalid connector configuration")?;

    init_tracing(sink_config.target.debug);

    match cli.command {
        Commands::Validate => {
            print_settings(&connector_config, &sink_config);
            Ok(())
        }
        Commands::Check => {
            let mut connector = KinesisSinkConnector::with_config(&connector_config.name, sink_config);
            connector
                .start()
                .await
                .context("stream connectivity check failed")?;
            connector.stop().await?;
            println!("stream '{}' is reachable", connector.config().target.stream_name);
            Ok(())
        }
        Commands::Ship {
            input,
            chunk_records,
        } => {
            let mut connector = KinesisSinkConnector::with_config(&connector_config.name, sink_config);
            connector.start().await.context("failed to start connector")?;

            let shipped = if input == "-" {
                ship(&mut connector, BufReader::new(tokio::io::stdin()), chunk_records).await
            } else {
                let file = tokio::fs::File::open(&input)
                    .await
                    .with_context(|| format!("failed to open input {}", input))?;
                ship(&mut connector, BufReader::new(file), chunk_records).await
            };
            connector.stop().await?;

            let (records, batches) = shipped?;
            println!("shipped {} records in {} batches", records, batches);
            Ok(())
        }
    }
}

fn init_tracing(debug: bool) {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if debug {
        for target in TRANSPORT_LOG_TARGETS {
            if let Ok(directive) = format!("{}=debug", target).parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_settings(connector: &ConnectorConfig, config: &KinesisSinkConfig) {
    println!("connector:         {}", connector.name);
    println!("region:            {}", config.target.region);
    println!("stream:            {}", config.target.stream_name);
    if let Some(endpoint) = &config.target.endpoint_url {
        println!("endpoint:          {}", endpoint);
    }
    println!(
        "credentials:       {}",
        if config.target.credentials.is_some() {
            "static"
        } else {
            "default provider chain"
        }
    );
    println!("chunk size:        {}", config.chunk_size);
    println!("partition key:     {}", config.partition_key.describe());
    println!("key source:        {:?}", config.partition_key_source);
    println!("explicit hash key: {}", config.explicit_hash_key.describe());
    println!("order events:      {}", config.order_events);
    println!("put concurrency:   {}", config.put_concurrency);
    println!("payload encoding:  {:?}", config.payload_encoding);
    println!("workers:           {}", config.workers);
}

/// Feed `reader` to the connector, `chunk_records` lines per write.
async fn ship<R>(
    connector: &mut KinesisSinkConnector,
    reader: R,
    chunk_records: usize,
) -> Result<(usize, usize)>
where
    R: AsyncBufRead + Unpin,
{
    let chunk_records = chunk_records.max(1);
    let mut lines = reader.lines();
    let mut chunk = Vec::with_capacity(chunk_records);
    let (mut records, mut batches) = (0, 0);

    while let Some(line) = lines.next_line().await.context("failed to read input")? {
        if line.trim().is_empty() {
            continue;
        }
        chunk.push(SinkRecord::new(line));
        if chunk.len() == chunk_records {
            let summary = connector.write(std::mem::take(&mut chunk)).await?;
            tracing::debug!(
                records = summary.records,
                batches = summary.batches,
                "shipped chunk"
            );
            records += summary.records;
            batches += summary.batches;
        }
    }

    if !chunk.is_empty() {
        let summary = connector.write(chunk).await?;
        records += summary.records;
        batches += summary.batches;
    }

    Ok((records, batches))
}
