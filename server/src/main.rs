use clap::Parser;
use log::{error, info};
use server::config::{executable_dir, resolve_data_dir, resolve_status_file, ServerConfig};
use server::lifecycle::{DataDirLoader, Lifecycle, StatusReporter};
use server::network::Server;
use server::router::Router;
use shared::DEFAULT_PORT;
use std::path::PathBuf;
use std::sync::Arc;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about = "Navigation and movement service")]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Directory containing `maps/`; probed next to the binary and the
    /// working directory when omitted
    #[clap(short, long)]
    data_dir: Option<PathBuf>,
    /// Readiness status file; defaults to nav_status.json next to the binary
    #[clap(short, long)]
    status_file: Option<PathBuf>,
    /// Node expansion budget of the fallback grid search
    #[clap(short, long)]
    node_budget: Option<usize>,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let exe_dir = executable_dir();
        let cwd = std::env::current_dir().ok();

        let mut config = ServerConfig {
            host: self.host,
            port: self.port,
            data_dir: resolve_data_dir(self.data_dir, exe_dir.as_deref(), cwd.as_deref()),
            status_file: resolve_status_file(self.status_file, exe_dir.as_deref()),
            ..ServerConfig::default()
        };
        if let Some(budget) = self.node_budget {
            config.grid.node_budget = budget;
        }
        config
    }
}

/// Binds the listener, removing the status artifact if that fails so no
/// stale "loading" file is left behind.
async fn bind_or_clear(
    addr: &str,
    router: Router,
    status: &StatusReporter,
) -> Result<Server, Box<dyn std::error::Error>> {
    match Server::bind(addr, Arc::new(router)).await {
        Ok(server) => Ok(server),
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            status.clear();
            Err(e)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Args::parse().into_config();
    info!(
        "Starting navigation server on {} with data from {}",
        config.bind_address(),
        config.data_dir.display()
    );

    let status = StatusReporter::new(config.status_file.clone());
    let loader = Arc::new(DataDirLoader::new(config.data_dir.clone(), config.grid));
    let lifecycle = Lifecycle::new(loader, status.clone());

    // kick off the preload before the first connection arrives
    lifecycle.ensure_initialized();

    let server = bind_or_clear(&config.bind_address(), Router::new(lifecycle), &status).await?;
    let server_handle = tokio::spawn(server.run());

    tokio::select! {
        result = server_handle => {
            if let Err(e) = result {
                error!("Server task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    status.clear();
    info!("Navigation server stopped");
    Ok(())
}
