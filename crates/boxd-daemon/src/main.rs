//! The boxd daemon: a single-host Linux container control plane.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use boxd_api::{ApiServer, Daemon, DaemonConfig, ServerConfig};
use boxd_container::IdMap;

#[derive(Debug, Parser)]
#[command(name = "boxd")]
#[command(author, version, about = "Linux container daemon", long_about = None)]
struct DaemonArgs {
    /// State directory.
    #[arg(long, default_value = "/var/lib/boxd")]
    var_dir: PathBuf,

    /// Unix socket path for the API (default: <var-dir>/unix.socket).
    #[arg(long)]
    socket: Option<PathBuf>,

    /// TLS certificate for migration dialing (default: <var-dir>/server.crt).
    #[arg(long)]
    cert: Option<PathBuf>,

    /// TLS key for migration dialing (default: <var-dir>/server.key).
    #[arg(long)]
    key: Option<PathBuf>,

    /// First subordinate uid/gid of the daemon's allocation.
    #[arg(long, default_value_t = 100_000)]
    subid_min: u32,

    /// Size of the subordinate uid/gid range.
    #[arg(long, default_value_t = 65_536)]
    subid_range: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boxd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    run(DaemonArgs::parse()).await
}

async fn run(args: DaemonArgs) -> Result<()> {
    info!("starting boxd...");

    std::fs::create_dir_all(&args.var_dir).context("failed to create state directory")?;
    let pid_file = args.var_dir.join("daemon.pid");
    std::fs::write(&pid_file, format!("{}\n", std::process::id()))
        .context("failed to write pid file")?;

    let socket_path = args
        .socket
        .unwrap_or_else(|| args.var_dir.join("unix.socket"));

    let mut config = DaemonConfig::for_var_dir(&args.var_dir);
    if let Some(cert) = args.cert {
        config.cert_path = cert;
    }
    if let Some(key) = args.key {
        config.key_path = key;
    }
    config.id_map = Some(IdMap {
        uid_min: args.subid_min,
        uid_range: args.subid_range,
        gid_min: args.subid_min,
        gid_range: args.subid_range,
    });

    let daemon = Daemon::new(config)
        .map_err(|err| anyhow::anyhow!("{err}"))
        .context("failed to initialize daemon")?;

    let server = ApiServer::new(
        ServerConfig {
            socket_path: socket_path.clone(),
        },
        daemon,
    );
    let server_handle = tokio::spawn(async move {
        if let Err(err) = server.run().await {
            tracing::error!("API server error: {err}");
        }
    });

    info!(socket = %socket_path.display(), "boxd started");

    shutdown_signal().await;
    info!("shutting down...");
    server_handle.abort();

    for path in [&socket_path, &pid_file] {
        if let Err(err) = std::fs::remove_file(path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove {}: {err}", path.display());
            }
        }
    }

    info!("boxd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
