use std::path::PathBuf;

use agent_bridge_error::BridgeError;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::bridge::Bridge;
use crate::config;

#[derive(Parser, Debug)]
#[command(name = "agent-bridge", bin_name = "agent-bridge")]
#[command(about = "Bridge local AI coding CLIs to a remote relay", version)]
pub struct BridgeCli {
    #[command(subcommand)]
    command: Command,

    /// Override the config directory (default: ~/.open-agents).
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge daemon.
    Start(StartArgs),
    /// Print the stored device identity and relay endpoint.
    Status,
}

#[derive(Args, Debug)]
struct StartArgs {
    /// Relay WebSocket URL, overriding the stored config.
    #[arg(long)]
    server_url: Option<String>,
}

pub fn run() -> Result<(), BridgeError> {
    let cli = BridgeCli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_dir = cli.config_dir.unwrap_or_else(config::config_dir);

    match cli.command {
        Command::Start(args) => {
            let mut stored = config::load(&config_dir)?;
            if let Some(server_url) = args.server_url {
                stored.server_url = server_url;
            }

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| BridgeError::Config {
                    message: format!("failed to start runtime: {err}"),
                })?;

            runtime.block_on(async move {
                let (bridge, outbound_rx) = Bridge::new(stored, config_dir);
                let runner = tokio::spawn(bridge.clone().run(outbound_rx));

                tokio::select! {
                    _ = runner => {}
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("shutting down");
                        bridge.shutdown().await;
                    }
                }
            });
            Ok(())
        }
        Command::Status => {
            let stored = config::load(&config_dir)?;
            if stored.device_id.is_empty() {
                println!("not paired (no device identity in {})", config_dir.display());
            } else {
                println!("device:  {}", stored.device_id);
                println!("user:    {}", stored.user_id);
                println!("relay:   {}", stored.server_url);
            }
            Ok(())
        }
    }
}
