//! Pipelined connection demo.
//!
//! Drives a [`Connection`] over the in-memory transport and prints what the
//! caller observed as JSON.
//!
//! ```text
//! pipeline-conn --max-pipelined 2 -n 3 drain
//! pipeline-conn -n 3 graceful
//! pipeline-conn --config pipeline.toml abrupt
//! ```

use clap::{Parser, Subcommand};
use hyper::body::Bytes;
use hyper::header::CONNECTION;
use hyper::{Request, Response};
use serde::Serialize;
use std::path::PathBuf;

use pipeline_conn::config::loader::load_config;
use pipeline_conn::net::ConnectionStats;
use pipeline_conn::observability::{logging, metrics};
use pipeline_conn::transport::memory;
use pipeline_conn::{Connection, PipelineConfig};

#[derive(Parser)]
#[command(name = "pipeline-conn")]
#[command(about = "Exercise pipelined admission and close classification", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of requests to issue back to back.
    #[arg(short = 'n', long, default_value_t = 3)]
    requests: usize,

    /// Override connection.max_pipelined_requests.
    #[arg(long)]
    max_pipelined: Option<usize>,

    #[command(subcommand)]
    scenario: Scenario,
}

#[derive(Subcommand, Clone, Copy)]
enum Scenario {
    /// Answer and drain every admitted request
    Drain,
    /// Answer the first request with `Connection: close`, then close
    Graceful,
    /// Reset the channel while requests are outstanding
    Abrupt,
}

impl Scenario {
    fn name(&self) -> &'static str {
        match self {
            Scenario::Drain => "drain",
            Scenario::Graceful => "graceful",
            Scenario::Abrupt => "abrupt",
        }
    }
}

#[derive(Serialize)]
struct Report {
    scenario: &'static str,
    outcomes: Vec<String>,
    before: ConnectionStats,
    after: ConnectionStats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(max) = cli.max_pipelined {
        config.connection.max_pipelined_requests = max;
    }

    logging::init_logging(&config.observability)?;
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    tracing::info!(
        scenario = cli.scenario.name(),
        requests = cli.requests,
        max_pipelined_requests = config.connection.max_pipelined_requests,
        "Configuration loaded"
    );

    let (transport, mut peer) = memory::pair();
    let connection = Connection::new(transport, config.connection.clone())?;

    let mut responses = Vec::with_capacity(cli.requests);
    for i in 0..cli.requests {
        let request = Request::get(format!("/item/{}", i)).body(Bytes::new())?;
        responses.push(connection.request(request));
    }
    let before = connection.stats();

    let mut answered = 0;
    match cli.scenario {
        Scenario::Drain => {
            while let Some(pending) = peer.try_next_request() {
                let body = format!("payload for {}", pending.request().uri());
                pending.respond_with(Response::new(()), body);
            }
        }
        Scenario::Graceful => {
            if let Some(first) = peer.try_next_request() {
                let head = Response::builder().header(CONNECTION, "close").body(())?;
                first.respond_with(head, "last one");
                answered = 1;
            }
        }
        Scenario::Abrupt => {
            peer.reset(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ));
        }
    }

    let mut outcomes = Vec::with_capacity(responses.len());
    for (i, response) in responses.into_iter().enumerate() {
        if matches!(cli.scenario, Scenario::Graceful) && i == answered {
            // The first answer carried `Connection: close`; now tear down.
            peer.close();
        }
        let outcome = match response.await {
            Ok(response) => match response.into_body().drain().await {
                Ok(body) => format!("ok: {}", String::from_utf8_lossy(&body)),
                Err(e) => format!("payload failed: {}", e),
            },
            Err(e) => format!("{:?} (retryable: {}): {}", e.kind(), e.is_retryable(), e),
        };
        outcomes.push(outcome);
    }

    connection.wait_idle().await;
    let report = Report {
        scenario: cli.scenario.name(),
        outcomes,
        before,
        after: connection.stats(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    tracing::info!("Demo complete");
    Ok(())
}
