use std::sync::Arc;

use anyhow::Result;
use clap::{Arg, Command};
use studio_explorer::{
    config::{Config, EXPLORER_NETWORKS},
    gateway::Gateway,
    server::ExplorerMcpServer,
    source::{AnalyticsSource, EtherscanSource, GraphDbSource},
    utils,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging to stderr (important for MCP stdio servers)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let matches = Command::new("studio-explorer")
        .version("0.1.0")
        .about("MCP server for on-chain address analytics and graph exploration")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to configuration file"),
        )
        .arg(
            Arg::new("network")
                .short('n')
                .long("network")
                .value_name("NETWORK")
                .help("Explorer network to use (ethereum|mainnet, sepolia, polygon, arbitrum, optimism)"),
        )
        .arg(
            Arg::new("secondary-only")
                .long("secondary-only")
                .help("Skip the graph database and answer from the block explorer")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .help("Generate a sample configuration file and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config-path")
                .long("config-path")
                .help("Print the default configuration file path and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    // Handle special commands first
    if matches.get_flag("generate-config") {
        let sample_config = Config::generate_sample();
        println!("{}", sample_config);
        return Ok(());
    }

    if matches.get_flag("config-path") {
        match Config::default_config_path() {
            Ok(path) => {
                println!("{}", path.display());
                return Ok(());
            }
            Err(e) => {
                error!("Could not determine default config path: {}", e);
                return Err(e);
            }
        }
    }

    // Load configuration
    let config_path = matches.get_one::<String>("config").map(|s| s.as_str());
    let mut config = Config::load_or_default(config_path).await;

    // Override with command line arguments
    if let Some(network) = matches.get_one::<String>("network") {
        utils::validate_network(network, &EXPLORER_NETWORKS)?;
        config.explorer.network = network.clone();
    }

    if matches.get_flag("secondary-only") {
        config.gateway.use_secondary_only = true;
    }

    info!("Starting Studio Explorer");
    info!("Explorer network: {}", config.explorer.network);
    info!("Secondary only: {}", config.gateway.use_secondary_only);

    let secondary: Arc<dyn AnalyticsSource> = Arc::new(EtherscanSource::new(&config.explorer)?);

    let primary: Option<Arc<dyn AnalyticsSource>> =
        if config.graph_db.enabled && !config.gateway.use_secondary_only {
            match GraphDbSource::connect(&config.graph_db).await {
                Ok(source) => Some(Arc::new(source)),
                Err(e) => {
                    warn!("Graph database unavailable, answering from the explorer only: {}", e);
                    None
                }
            }
        } else {
            None
        };

    let gateway = Arc::new(Gateway::new(primary, secondary, config.gateway.clone()));
    let server = ExplorerMcpServer::new(gateway);

    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        return Err(e);
    }

    Ok(())
}
