//! Router pool: header parsing and job dispatch
//!
//! Each worker pulls a fresh connection off the header channel, reads one
//! command line under the 60-second deadline and forwards the connection to
//! the dump or rotate channel. Any scan failure, timeout or unparseable
//! header closes the connection without emitting a job.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::{DumpJob, HeaderJob, RotateJob};
use crate::constants::{CONN_READ_TIMEOUT, HEADER_MAX_LEN};
use crate::error::{CarrierError, Result};
use crate::protocol::{parse_header, Command};

type SharedRx = Arc<AsyncMutex<mpsc::Receiver<HeaderJob>>>;

pub struct RouterPool {
    handles: Vec<JoinHandle<()>>,
}

impl RouterPool {
    /// Spawns `workers` router tasks sharing the header channel
    ///
    /// The workers own the only senders of the dump and rotate channels, so
    /// draining the routers closes the downstream channels in turn.
    pub fn spawn(
        workers: usize,
        header_rx: mpsc::Receiver<HeaderJob>,
        dump_tx: mpsc::Sender<DumpJob>,
        rotate_tx: mpsc::Sender<RotateJob>,
    ) -> Self {
        let rx: SharedRx = Arc::new(AsyncMutex::new(header_rx));
        let handles = (0..workers)
            .map(|_| {
                let rx = rx.clone();
                let dump_tx = dump_tx.clone();
                let rotate_tx = rotate_tx.clone();
                tokio::spawn(worker(rx, dump_tx, rotate_tx))
            })
            .collect();
        Self { handles }
    }

    /// Waits until the header channel is drained and every worker exited
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("routing jobs stopped");
    }
}

async fn worker(rx: SharedRx, dump_tx: mpsc::Sender<DumpJob>, rotate_tx: mpsc::Sender<RotateJob>) {
    loop {
        let job = { rx.lock().await.recv().await };
        let Some(HeaderJob { mut stream, peer }) = job else {
            return;
        };

        match read_header(&mut stream, peer).await {
            Ok(Command::Data { key, size }) => {
                let job = DumpJob {
                    key,
                    size,
                    stream,
                    peer,
                };
                if dump_tx.send(job).await.is_err() {
                    // Dump pool is gone; shutdown is underway.
                    return;
                }
            }
            Ok(Command::Rotate { key }) => {
                let job = RotateJob { key, stream, peer };
                if rotate_tx.send(job).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                // Close silently: dropping the stream closes the socket.
                error!("router: {}", e);
            }
        }
    }
}

/// Reads and parses the command line off a fresh connection
async fn read_header(stream: &mut BufReader<TcpStream>, peer: SocketAddr) -> Result<Command> {
    let mut line = Vec::with_capacity(128);
    let read = tokio::time::timeout(
        CONN_READ_TIMEOUT,
        stream.read_until(b'\n', &mut line),
    )
    .await
    .map_err(|_| CarrierError::HeaderTimeout {
        peer: peer.to_string(),
    })?
    .map_err(|e| CarrierError::HeaderRead {
        peer: peer.to_string(),
        source: e,
    })?;

    if read == 0 {
        return Err(CarrierError::HeaderRead {
            peer: peer.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before header",
            ),
        });
    }
    if line.len() > HEADER_MAX_LEN {
        return Err(CarrierError::HeaderMalformed {
            line: String::from_utf8_lossy(&line[..line.len().min(64)]).into_owned(),
            reason: "header line too long",
        });
    }
    let text = std::str::from_utf8(&line).map_err(|_| CarrierError::HeaderMalformed {
        line: String::from_utf8_lossy(&line).into_owned(),
        reason: "header is not valid utf-8",
    })?;
    parse_header(text)
}
