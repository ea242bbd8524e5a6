//! Diagnostics endpoint
//!
//! Intentionally minimal:
//! - TCP on the configured debug address
//! - One JSON request per connection
//! - Single command: status

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::warn;

use super::Shutdown;
use crate::constants::DEBUG_REQUEST_MAX;
use crate::error::{CarrierError, Result};
use crate::registry::Registry;

#[derive(Debug, Deserialize)]
struct Request {
    cmd: String,
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub ok: bool,
    pub destinations: usize,
    pub uptime_secs: u64,
    pub message: Option<String>,
}

pub struct DebugServer {
    listener: TcpListener,
    registry: Arc<Registry>,
    started: Instant,
}

impl DebugServer {
    pub async fn bind(addr: &str, registry: Arc<Registry>, started: Instant) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CarrierError::DebugBind {
                addr: addr.to_string(),
                source: e,
            })?;
        Ok(Self {
            listener,
            registry,
            started,
        })
    }

    pub async fn run(self, shutdown: Shutdown) {
        let mut cancel = shutdown.subscribe();
        loop {
            tokio::select! {
                res = self.listener.accept() => {
                    let Ok((stream, _)) = res else { continue };
                    let registry = self.registry.clone();
                    let started = self.started;
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, registry, started).await {
                            warn!("debug request failed: {}", e);
                        }
                    });
                }
                _ = Shutdown::cancelled(&mut cancel) => return,
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    registry: Arc<Registry>,
    started: Instant,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; DEBUG_REQUEST_MAX];
    let n = stream.read(&mut buf).await?;
    buf.truncate(n);

    let text = String::from_utf8_lossy(&buf);
    let parsed: Option<Request> = serde_json::from_str(text.trim()).ok();

    let (ok, message) = match parsed {
        Some(req) if req.cmd.eq_ignore_ascii_case("status") => (true, None),
        Some(req) => (false, Some(format!("unknown cmd: {}", req.cmd))),
        None => (false, Some("invalid json".to_string())),
    };

    let resp = Response {
        ok,
        destinations: registry.len(),
        uptime_secs: started.elapsed().as_secs(),
        message,
    };
    let out = serde_json::to_vec(&resp).unwrap_or_default();
    stream.write_all(&out).await?;
    stream.write_all(b"\n").await?;
    stream.shutdown().await?;
    Ok(())
}
