//! API server over a unix socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::net::UnixListener;
use tower::Service;
use tower_http::trace::TraceLayer;

use crate::api::create_router;
use crate::daemon::Daemon;
use crate::error::{ApiError, Result};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Unix socket path.
    pub socket_path: PathBuf,
}

/// The daemon's HTTP server.
pub struct ApiServer {
    config: ServerConfig,
    daemon: Arc<Daemon>,
}

impl ApiServer {
    /// Creates a server for the daemon.
    #[must_use]
    pub fn new(config: ServerConfig, daemon: Arc<Daemon>) -> Self {
        Self { config, daemon }
    }

    /// The socket path.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Runs the accept loop. Connections are served with HTTP/1 upgrades
    /// enabled so websocket side channels work.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub async fn run(&self) -> Result<()> {
        let _ = std::fs::remove_file(&self.config.socket_path);
        if let Some(parent) = self.config.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.config.socket_path)
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        tracing::info!(socket = %self.config.socket_path.display(), "API server listening");

        let app = create_router(Arc::clone(&self.daemon)).layer(TraceLayer::new_for_http());

        loop {
            let (stream, _) = listener
                .accept()
                .await
                .map_err(|err| ApiError::Internal(err.to_string()))?;

            let tower_service = app.clone();
            tokio::spawn(async move {
                let hyper_service =
                    hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
                        tower_service.clone().call(request)
                    });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), hyper_service)
                    .with_upgrades()
                    .await
                {
                    let message = err.to_string().to_lowercase();
                    if !message.contains("shutting down")
                        && !message.contains("connection reset")
                        && !message.contains("broken pipe")
                    {
                        tracing::error!("error serving connection: {err}");
                    }
                }
            });
        }
    }
}
