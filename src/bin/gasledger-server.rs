#![forbid(unsafe_code)]
//! Gas ledger API server

use clap::Parser;
use gasledger::api::run_api_server;
use gasledger::config::load_config;
use gasledger::node::Node;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "gasledger-server", about = "Serve the gas ledger REST API")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Override `server.api_port`
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut config = load_config(&args.config)?;
    if let Some(port) = args.port {
        config.server.api_port = port;
    }

    // Opening verifies the stored chain; a tampered chain stops startup here.
    let node = Arc::new(Node::init(config)?);
    run_api_server(node).await
}
