//! CloudMesh CLI
//!
//! Command-line interface for CloudMesh nodes.
//!
//! # Usage
//!
//! ## Run a node
//! ```bash
//! cloudmesh node --bind 0.0.0.0:7400 --name alpha
//! cloudmesh node -b 0.0.0.0:7401 -n beta -p 127.0.0.1:7400 --value config/threads=8
//! ```
//!
//! ## Ping a node
//! ```bash
//! cloudmesh ping 127.0.0.1:7400
//! ```
//!
//! ## Read a published value
//! ```bash
//! cloudmesh get 127.0.0.1:7400 config/threads
//! ```
//!
//! ## Invoke a layer
//! ```bash
//! cloudmesh invoke 127.0.0.1:7400 cloudmesh.Echo echo --args '[1, "two"]'
//! ```

use anyhow::{bail, Context, Result};
use argh::FromArgs;
use cloudmesh_common::protocol::{Message, MessageBody};
use cloudmesh_node::{echo_service, Cloud, KeepAliveConfig, NodeConfig};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Layer every node started from the command line offers.
const ECHO_LAYER: &str = "cloudmesh.Echo";

/// CloudMesh - distributed cluster framework
#[derive(FromArgs)]
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Node(NodeArgs),
    Ping(PingArgs),
    Get(GetArgs),
    Invoke(InvokeArgs),
}

/// Run a cluster node
#[derive(FromArgs)]
#[argh(subcommand, name = "node")]
struct NodeArgs {
    /// address to listen on
    #[argh(option, short = 'b', default = "\"0.0.0.0:7400\".into()")]
    bind: String,

    /// name announced to peers
    #[argh(option, short = 'n', default = "\"cloudmesh\".into()")]
    name: String,

    /// fixed node id (random when omitted)
    #[argh(option)]
    id: Option<String>,

    /// peer address to join (can be repeated)
    #[argh(option, short = 'p')]
    peer: Vec<String>,

    /// value to publish as PATH=JSON (can be repeated)
    #[argh(option)]
    value: Vec<String>,

    /// seconds between keep-alive rounds, 0 disables them
    #[argh(option, default = "5")]
    keep_alive: u64,
}

/// Measure the round trip to a node
#[derive(FromArgs)]
#[argh(subcommand, name = "ping")]
struct PingArgs {
    /// node address
    #[argh(positional)]
    addr: String,

    /// number of pings to send
    #[argh(option, short = 'c', default = "1")]
    count: u32,
}

/// Read a value from a node's namespace
#[derive(FromArgs)]
#[argh(subcommand, name = "get")]
struct GetArgs {
    /// node address
    #[argh(positional)]
    addr: String,

    /// path, segments separated by '/' or '.'
    #[argh(positional)]
    path: String,
}

/// Invoke a method on a layer offered by a node
#[derive(FromArgs)]
#[argh(subcommand, name = "invoke")]
struct InvokeArgs {
    /// node address
    #[argh(positional)]
    addr: String,

    /// layer path
    #[argh(positional)]
    layer: String,

    /// method name
    #[argh(positional)]
    method: String,

    /// JSON array of arguments
    #[argh(option, default = "\"[]\".into()")]
    args: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // get and invoke print JSON on stdout, keep it clean
    if !matches!(cli.command, Commands::Get(_) | Commands::Invoke(_)) {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }

    match cli.command {
        Commands::Node(args) => run_node(args).await,
        Commands::Ping(args) => run_ping(args).await,
        Commands::Get(args) => run_get(args).await,
        Commands::Invoke(args) => run_invoke(args).await,
    }
}

async fn run_node(args: NodeArgs) -> Result<()> {
    let values = args
        .value
        .iter()
        .map(|flag| parse_value_flag(flag))
        .collect::<Result<Vec<_>>>()?;

    let mut config = NodeConfig::new(args.name, args.bind);
    config.node_id = args.id;
    config.peers = args.peer;
    config.keep_alive.interval = Duration::from_secs(args.keep_alive);

    let cloud = Cloud::start(config).await.context("Failed to start node")?;
    cloud.register_layer(ECHO_LAYER, echo_service(cloud.node_id().to_string()));
    for (path, value) in values {
        cloud.publish(path, value, Vec::new())?;
    }

    info!(
        node = %cloud.node_id(),
        addr = %cloud.local_addr(),
        peers = cloud.peers().len(),
        "Node running, press Ctrl+C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    cloud.shutdown();
    Ok(())
}

async fn run_ping(args: PingArgs) -> Result<()> {
    let cloud = client().await?;
    let peer = cloud
        .connect(&args.addr)
        .await
        .with_context(|| format!("Failed to join {}", args.addr))?;

    for seq in 0..args.count {
        let started = Instant::now();
        let reply = cloud
            .dispatcher()
            .request(&peer, Message::new(MessageBody::KeepAlive), None)
            .await?;
        if !matches!(reply.body, MessageBody::Ack) {
            bail!("Expected Ack, got {}", reply.body.type_name());
        }
        println!(
            "{} seq={} time={:.3} ms",
            peer,
            seq,
            started.elapsed().as_secs_f64() * 1000.0
        );
    }

    cloud.shutdown();
    Ok(())
}

async fn run_get(args: GetArgs) -> Result<()> {
    let path = parse_path(&args.path)?;
    let cloud = client().await?;
    let peer = cloud
        .connect(&args.addr)
        .await
        .with_context(|| format!("Failed to join {}", args.addr))?;

    let value = cloud.get_from(&peer, &path).await?;
    cloud.shutdown();

    match value {
        Some(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        None => bail!("No value at {}", args.path),
    }
}

async fn run_invoke(args: InvokeArgs) -> Result<()> {
    let arguments = parse_arguments(&args.args)?;
    let cloud = client().await?;
    cloud
        .connect(&args.addr)
        .await
        .with_context(|| format!("Failed to join {}", args.addr))?;

    let result = cloud
        .invoke_layer(&args.layer, &args.method, Vec::new(), arguments)
        .await;
    cloud.shutdown();

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

/// A short-lived node that only dials out.
async fn client() -> Result<std::sync::Arc<Cloud>> {
    let mut config = NodeConfig::new("cloudmesh-cli", "127.0.0.1:0");
    config.keep_alive = KeepAliveConfig::disabled();
    Ok(Cloud::start(config).await?)
}

fn parse_path(raw: &str) -> Result<Vec<String>> {
    let path: Vec<String> = raw
        .split(['/', '.'])
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();
    if path.is_empty() {
        bail!("Empty path: {:?}", raw);
    }
    Ok(path)
}

/// Split `PATH=JSON`. A value that is not valid JSON is taken as a string.
fn parse_value_flag(flag: &str) -> Result<(Vec<String>, Value)> {
    let (path, raw) = flag
        .split_once('=')
        .with_context(|| format!("Expected PATH=JSON, got {:?}", flag))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((parse_path(path)?, value))
}

fn parse_arguments(raw: &str) -> Result<Vec<Value>> {
    match serde_json::from_str(raw).context("Arguments must be JSON")? {
        Value::Array(arguments) => Ok(arguments),
        other => Ok(vec![other]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_command_defaults() {
        let cli = Cli::from_args(&["cloudmesh"], &["node"]).unwrap();

        if let Commands::Node(args) = cli.command {
            assert_eq!(args.bind, "0.0.0.0:7400");
            assert_eq!(args.name, "cloudmesh");
            assert!(args.id.is_none());
            assert!(args.peer.is_empty());
            assert_eq!(args.keep_alive, 5);
        } else {
            panic!("Expected Node command");
        }
    }

    #[test]
    fn test_node_command_with_peers() {
        let cli = Cli::from_args(
            &["cloudmesh"],
            &[
                "node", "-b", "127.0.0.1:7401", "-n", "beta", "-p", "127.0.0.1:7400", "-p",
                "127.0.0.1:7402", "--value", "config/threads=8",
            ],
        )
        .unwrap();

        if let Commands::Node(args) = cli.command {
            assert_eq!(args.bind, "127.0.0.1:7401");
            assert_eq!(args.name, "beta");
            assert_eq!(args.peer, vec!["127.0.0.1:7400", "127.0.0.1:7402"]);
            assert_eq!(args.value, vec!["config/threads=8"]);
        } else {
            panic!("Expected Node command");
        }
    }

    #[test]
    fn test_ping_command() {
        let cli = Cli::from_args(&["cloudmesh"], &["ping", "127.0.0.1:7400", "-c", "3"]).unwrap();

        if let Commands::Ping(args) = cli.command {
            assert_eq!(args.addr, "127.0.0.1:7400");
            assert_eq!(args.count, 3);
        } else {
            panic!("Expected Ping command");
        }
    }

    #[test]
    fn test_get_command() {
        let cli = Cli::from_args(&["cloudmesh"], &["get", "127.0.0.1:7400", "config.threads"]).unwrap();

        if let Commands::Get(args) = cli.command {
            assert_eq!(args.addr, "127.0.0.1:7400");
            assert_eq!(parse_path(&args.path).unwrap(), vec!["config", "threads"]);
        } else {
            panic!("Expected Get command");
        }
    }

    #[test]
    fn test_invoke_command() {
        let cli = Cli::from_args(
            &["cloudmesh"],
            &["invoke", "127.0.0.1:7400", "cloudmesh.Echo", "echo", "--args", "[1, 2]"],
        )
        .unwrap();

        if let Commands::Invoke(args) = cli.command {
            assert_eq!(args.layer, "cloudmesh.Echo");
            assert_eq!(args.method, "echo");
            assert_eq!(parse_arguments(&args.args).unwrap(), vec![json!(1), json!(2)]);
        } else {
            panic!("Expected Invoke command");
        }
    }

    #[test]
    fn test_missing_subcommand_is_rejected() {
        assert!(Cli::from_args(&["cloudmesh"], &[]).is_err());
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(parse_path("a/b/c").unwrap(), vec!["a", "b", "c"]);
        assert_eq!(parse_path("/a//b/").unwrap(), vec!["a", "b"]);
        assert!(parse_path("//").is_err());
    }

    #[test]
    fn test_parse_value_flag() {
        let (path, value) = parse_value_flag("config/threads=8").unwrap();
        assert_eq!(path, vec!["config", "threads"]);
        assert_eq!(value, json!(8));

        let (_, value) = parse_value_flag("greeting=hello").unwrap();
        assert_eq!(value, json!("hello"));

        let (_, value) = parse_value_flag("obj={\"a\":1}").unwrap();
        assert_eq!(value, json!({"a": 1}));

        assert!(parse_value_flag("no-equals").is_err());
        assert!(parse_value_flag("=1").is_err());
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments("[]").unwrap(), Vec::<Value>::new());
        assert_eq!(parse_arguments("\"x\"").unwrap(), vec![json!("x")]);
        assert!(parse_arguments("not json").is_err());
    }
}
