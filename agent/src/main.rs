use std::path::PathBuf;

use clap::Parser;
use tonic::transport::Server;
use tracing::info;

use warp_core::config::{AgentConfig, LogFormat};
use warp_core::proto::command_server::CommandServer;
use warp_core::rpc::Agent;

/// Remote-execution agent: exposes the `Command` service (RunExecutable,
/// FileUpload, FileDownload) over bidirectional-streaming gRPC.
#[derive(Parser, Debug)]
#[command(name = "warp-agent", version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, value_name = "FILE", conflicts_with = "addr")]
    config: Option<PathBuf>,

    /// Socket address to listen on, e.g. 0.0.0.0:8090.
    #[arg(short, long, value_name = "ADDR", conflicts_with = "config")]
    addr: Option<String>,

    /// Emit structured JSON logs instead of plain text.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if let Some(path) = &cli.config {
        AgentConfig::load(path).await?
    } else if let Some(addr) = &cli.addr {
        AgentConfig {
            address: addr.parse()?,
            ..AgentConfig::default()
        }
    } else {
        AgentConfig::default()
    };

    init_logging(cli.json_logs || config.log_format == LogFormat::Json);

    info!(address = %config.address, "starting agent");

    Server::builder()
        .add_service(CommandServer::new(Agent))
        .serve(config.address)
        .await?;

    Ok(())
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
