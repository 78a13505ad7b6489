//! hopchain
//!
//! Serves every `-L` endpoint and relays its traffic through the `-F` hop,
//! or straight to the target when no hop is given.

use anyhow::{Context, Result};
use clap::Parser;
use hopchain::{
    config::{generate_example_config, Config, LogFormat},
    gen_routers, Router,
};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// hopchain - TCP and TUN relay through proxy hops
#[derive(Parser, Debug)]
#[command(name = "hopchain")]
#[command(about = "Relay TCP streams and TUN packets through a proxy hop")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Serve node, e.g. tcp://:8080?target=10.0.0.5:80 (repeatable, overrides config)
    #[arg(short = 'L', long = "listen")]
    serve_nodes: Vec<String>,

    /// Forwarding hop, e.g. tcp+tls://10.233.0.1:10800 (overrides config)
    #[arg(short = 'F', long = "forward")]
    chain_node: Option<String>,

    /// Extra dial attempts per connection (overrides config)
    #[arg(long)]
    retries: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'v', long)]
    log_level: Option<String>,

    /// Write an example configuration to --config and exit
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.generate_config {
        generate_example_config()
            .save(&args.config)
            .context("Failed to write example config")?;
        println!("Example configuration written to {}", args.config);
        return Ok(());
    }

    let mut config = if Path::new(&args.config).exists() {
        Config::load(&args.config).context("Failed to load configuration")?
    } else {
        Config::default()
    };

    // Initialize logging
    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    let subscriber = tracing_subscriber::fmt().with_env_filter(level);
    match config.logging.log_format() {
        LogFormat::Pretty => subscriber.pretty().init(),
        LogFormat::Compact => subscriber.compact().init(),
        LogFormat::Full => subscriber.init(),
    }

    if !args.serve_nodes.is_empty() {
        config.router.serve_nodes = args.serve_nodes;
    }
    if args.chain_node.is_some() {
        config.router.chain_node = args.chain_node;
    }
    if let Some(retries) = args.retries {
        config.router.retries = retries;
    }

    if config.router.serve_nodes.is_empty() {
        anyhow::bail!("No serve nodes configured (use -L or [router].serve_nodes)");
    }

    let tls = config
        .tls
        .load_server_config()
        .context("Failed to load TLS configuration")?;

    info!("hopchain v{}", hopchain::VERSION);
    match config.router.chain_node.as_deref() {
        Some(hop) if !hop.is_empty() => info!("Forwarding through {}", hop),
        _ => info!("No forwarding hop, dialing targets directly"),
    }

    let entries = gen_routers(&config.router, tls)
        .await
        .context("Failed to start servers")?;
    let router = std::sync::Arc::new(Router::new(entries));

    let cancel = CancellationToken::new();
    let mut serving = {
        let router = router.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { router.serve_all(cancel).await })
    };

    let joined = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            cancel.cancel();
            router.close_all();
            serving.await
        }
        joined = &mut serving => joined,
    };

    match joined.context("Server task panicked")? {
        Ok(()) => {
            info!("All servers stopped");
            Ok(())
        }
        Err(e) => {
            error!("Stopped with errors: {}", e);
            Err(e.into())
        }
    }
}
