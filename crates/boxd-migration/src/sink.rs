//! Migration sink.
//!
//! The receiving side dials the source operation's websocket channels with
//! the per-channel secrets, using a TLS client configured from the daemon's
//! certificate, and unpacks the incoming checkpoint and rootfs streams into
//! the freshly created container directory.

use std::collections::HashMap;
use std::path::Path;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};

use crate::error::{MigrationError, Result};
use crate::proto::{CHANNELS, MigrationControl, MigrationHeader};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Builds a TLS connector from the daemon's certificate and key.
///
/// Peer certificates are not verified against a CA: daemons trust each other
/// through the exchanged operation secrets.
///
/// # Errors
///
/// Returns `MigrationError::Tls` if the identity cannot be loaded.
pub fn tls_connector(cert: &Path, key: &Path) -> Result<Connector> {
    let cert = std::fs::read(cert)?;
    let key = std::fs::read(key)?;

    let identity = native_tls::Identity::from_pkcs8(&cert, &key)
        .map_err(|err| MigrationError::Tls(err.to_string()))?;
    let connector = native_tls::TlsConnector::builder()
        .identity(identity)
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(|err| MigrationError::Tls(err.to_string()))?;

    Ok(Connector::NativeTls(connector))
}

/// The receiving end of a pull migration.
pub struct MigrationSink {
    operation: String,
    secrets: HashMap<String, String>,
    connector: Connector,
}

impl std::fmt::Debug for MigrationSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationSink")
            .field("operation", &self.operation)
            .field("secrets", &self.secrets)
            .finish_non_exhaustive()
    }
}

impl MigrationSink {
    /// Creates a sink bound to the remote operation URL.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::BadSecrets` unless a secret is present for
    /// every channel.
    pub fn new(
        operation: impl Into<String>,
        secrets: HashMap<String, String>,
        connector: Connector,
    ) -> Result<Self> {
        for channel in CHANNELS {
            if !secrets.contains_key(channel) {
                return Err(MigrationError::BadSecrets(format!(
                    "missing secret for channel {channel}"
                )));
            }
        }
        Ok(Self {
            operation: operation.into(),
            secrets,
            connector,
        })
    }

    fn channel_url(&self, channel: &str) -> String {
        let base = self
            .operation
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{base}/websocket?secret={}", self.secrets[channel])
    }

    async fn dial(&self, channel: &str) -> Result<WsStream> {
        let url = self.channel_url(channel);
        let (stream, _) =
            connect_async_tls_with_config(url.as_str(), None, false, Some(self.connector.clone()))
                .await
                .map_err(|err| MigrationError::Websocket(format!("{channel}: {err}")))?;
        Ok(stream)
    }

    /// Runs the transfer into the container directory, blocking until the
    /// source reports completion.
    ///
    /// # Errors
    ///
    /// Returns the first transport, unpack or protocol failure, including a
    /// source-reported unsuccessful transfer.
    pub async fn run(&self, container_dir: &Path) -> Result<()> {
        let mut control = self.dial("control").await?;

        let header: MigrationHeader = match control.next().await {
            Some(Ok(Message::Text(text))) => serde_json::from_str(&text)
                .map_err(|err| MigrationError::Protocol(format!("bad header: {err}")))?,
            other => {
                return Err(MigrationError::Protocol(format!(
                    "expected migration header, got {other:?}"
                )));
            }
        };
        if header.fs != "tar" {
            return Err(MigrationError::Protocol(format!(
                "unsupported fs encoding {}",
                header.fs
            )));
        }

        let mut criu = self.dial("criu").await?;
        receive_tar(&mut criu, &container_dir.join("state")).await?;

        let mut fs = self.dial("fs").await?;
        receive_tar(&mut fs, &container_dir.join("rootfs")).await?;

        match control.next().await {
            Some(Ok(Message::Text(text))) => {
                let outcome: MigrationControl = serde_json::from_str(&text)
                    .map_err(|err| MigrationError::Protocol(format!("bad control: {err}")))?;
                if outcome.success {
                    Ok(())
                } else {
                    Err(MigrationError::Protocol(
                        outcome.message.unwrap_or_else(|| "source failed".to_string()),
                    ))
                }
            }
            other => Err(MigrationError::Protocol(format!(
                "expected transfer outcome, got {other:?}"
            ))),
        }
    }
}

/// Unpacks an incoming tar stream into `dir`.
async fn receive_tar(stream: &mut WsStream, dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;

    let mut child = Command::new("tar")
        .arg("-xf")
        .arg("-")
        .arg("-C")
        .arg(dir)
        .stdin(std::process::Stdio::piped())
        .spawn()?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| MigrationError::Protocol("tar stdin unavailable".to_string()))?;

    while let Some(msg) = stream.next().await {
        match msg.map_err(|err| MigrationError::Websocket(err.to_string()))? {
            Message::Binary(chunk) => stdin.write_all(&chunk).await?,
            Message::Close(_) => break,
            _ => {}
        }
    }

    drop(stdin);
    let status = child.wait().await?;
    if !status.success() {
        return Err(MigrationError::Protocol(format!(
            "untar into {} exited with {status}",
            dir.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets(channels: &[&str]) -> HashMap<String, String> {
        channels
            .iter()
            .map(|c| (c.to_string(), format!("secret-{c}")))
            .collect()
    }

    #[test]
    fn sink_requires_all_channel_secrets() {
        let err = MigrationSink::new(
            "https://peer:8443/1.0/operations/xyz",
            secrets(&["control", "fs"]),
            Connector::Plain,
        )
        .unwrap_err();
        assert!(matches!(err, MigrationError::BadSecrets(_)));
    }

    #[test]
    fn channel_urls_swap_scheme_and_carry_secret() {
        let sink = MigrationSink::new(
            "https://peer:8443/1.0/operations/xyz",
            secrets(&["control", "criu", "fs"]),
            Connector::Plain,
        )
        .unwrap();
        assert_eq!(
            sink.channel_url("fs"),
            "wss://peer:8443/1.0/operations/xyz/websocket?secret=secret-fs"
        );
    }
}
