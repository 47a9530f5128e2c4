//! mcp-transport command line client.
//!
//! ```text
//! mcp-transport [--config FILE] [--endpoint URL] [--transport KIND] <command>
//!
//!   probe                     connect and print the connection info
//!   call METHOD [--params J]  send one request and print the response
//!   batch FILE                send a JSON array of {method, params}
//!   tail [--url U] [--limit N] follow the live trace feed until Ctrl-C
//! ```
//!
//! Command output goes to stdout as JSON; logs go to stderr.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

use mcp_transport::config::loader::{default_config, load_config, ConfigError};
use mcp_transport::observability::{logging, metrics};
use mcp_transport::realtime::LiveFeedClient;
use mcp_transport::{create_transport, ClientConfig, JsonRpcRequest, TransportKind};

#[derive(Parser)]
#[command(name = "mcp-transport")]
#[command(about = "JSON-RPC client for MCP servers over HTTP, SSE or WebSocket", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base endpoint, overriding the configuration.
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Transport kind: http, sse or websocket.
    #[arg(short, long)]
    transport: Option<TransportKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print the connection info
    Probe,
    /// Send one request
    Call {
        method: String,
        /// JSON params
        #[arg(long)]
        params: Option<String>,
    },
    /// Send a batch read from a JSON file
    Batch { file: PathBuf },
    /// Follow the live trace feed
    Tail {
        /// Feed URL, overriding the configuration
        #[arg(long)]
        url: Option<String>,
        /// Stop after this many events
        #[arg(long)]
        limit: Option<u64>,
    },
}

#[derive(Deserialize)]
struct BatchEntry {
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    logging::init_logging(&config.observability);

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    match cli.command {
        Commands::Probe => {
            let transport = create_transport(config.transport.kind, &config.transport)?;
            transport.connect(&config.transport.endpoint).await?;
            print_json(&transport.connection_info())?;
            transport.disconnect().await?;
        }
        Commands::Call { method, params } => {
            let params = params.map(|p| serde_json::from_str::<Value>(&p)).transpose()?;
            let transport = create_transport(config.transport.kind, &config.transport)?;
            transport.connect(&config.transport.endpoint).await?;
            let response = transport
                .send(JsonRpcRequest::new(method, params).with_id(1))
                .await?;
            print_json(&response)?;
            transport.disconnect().await?;
        }
        Commands::Batch { file } => {
            let requests = batch_requests(&std::fs::read_to_string(&file)?)?;
            let transport = create_transport(config.transport.kind, &config.transport)?;
            transport.connect(&config.transport.endpoint).await?;
            let responses = transport.send_batch(requests).await?;
            print_json(&responses)?;
            transport.disconnect().await?;
        }
        Commands::Tail { url, limit } => {
            let mut realtime = config.realtime.clone();
            if let Some(url) = url {
                realtime.url = url;
            }
            tail(LiveFeedClient::new(realtime)?, limit).await?;
        }
    }

    Ok(())
}

/// File or defaults, then command-line overrides.
fn resolve_config(cli: &Cli) -> Result<ClientConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => default_config()?,
    };
    if let Some(endpoint) = &cli.endpoint {
        config.transport.endpoint = endpoint.clone();
    }
    if let Some(kind) = cli.transport {
        config.transport.kind = kind;
    }
    Ok(config)
}

/// Requests from a JSON array of `{method, params}`, numbered from 1.
fn batch_requests(text: &str) -> Result<Vec<JsonRpcRequest>, serde_json::Error> {
    let entries: Vec<BatchEntry> = serde_json::from_str(text)?;
    Ok(entries
        .into_iter()
        .zip(1i64..)
        .map(|(entry, id)| JsonRpcRequest::new(entry.method, entry.params).with_id(id))
        .collect())
}

async fn tail(client: LiveFeedClient, limit: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
    let mut updates = client.subscribe();
    client.connect().await;

    let mut seen = 0u64;
    loop {
        let total = client.snapshot().total_events;
        if total > seen {
            let fresh = (total - seen) as usize;
            let mut events = client.events();
            events.truncate(fresh);
            for event in events.iter().rev() {
                println!("{}", serde_json::to_string(event)?);
            }
            seen = total;
        }
        if limit.is_some_and(|limit| seen >= limit) {
            break;
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    client.disconnect();
    print_json(&client.snapshot())?;
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_transport::RequestId;

    #[test]
    fn flags_override_the_configuration() {
        let cli = Cli::try_parse_from([
            "mcp-transport",
            "--endpoint",
            "http://10.1.2.3:9600/mcp",
            "--transport",
            "sse",
            "probe",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Probe));

        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.transport.endpoint, "http://10.1.2.3:9600/mcp");
        assert_eq!(config.transport.kind, TransportKind::Sse);
    }

    #[test]
    fn unknown_transport_kind_is_rejected() {
        assert!(Cli::try_parse_from(["mcp-transport", "--transport", "carrier-pigeon", "probe"]).is_err());
    }

    #[test]
    fn call_and_tail_arguments() {
        let cli = Cli::try_parse_from(["mcp-transport", "call", "tools/list", "--params", "{}"]).unwrap();
        match cli.command {
            Commands::Call { method, params } => {
                assert_eq!(method, "tools/list");
                assert_eq!(params.as_deref(), Some("{}"));
            }
            _ => panic!("expected call"),
        }

        let cli = Cli::try_parse_from(["mcp-transport", "tail", "--limit", "10"]).unwrap();
        assert!(matches!(cli.command, Commands::Tail { url: None, limit: Some(10) }));
    }

    #[test]
    fn batch_file_entries_are_numbered_in_order() {
        let requests = batch_requests(
            r#"[{"method": "tools/list"}, {"method": "tools/call", "params": {"name": "search"}}]"#,
        )
        .unwrap();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].id, Some(RequestId::Number(1)));
        assert_eq!(requests[0].params, None);
        assert_eq!(requests[1].id, Some(RequestId::Number(2)));
        assert_eq!(requests[1].params.as_ref().unwrap()["name"], "search");
        assert!(batch_requests(r#"{"method": "not an array"}"#).is_err());
    }
}
