//! Dump pool: payload streaming into destinations
//!
//! Each worker owns one connection end-to-end for the whole dump, which is
//! what keeps bytes from a single connection in order and message-level
//! interleaving across connections at whole-message granularity.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::{respond, DumpJob};
use crate::constants::{RESP_ERROR, RESP_OK};
use crate::registry::Registry;

type SharedRx = Arc<AsyncMutex<mpsc::Receiver<DumpJob>>>;

pub struct DumpPool {
    handles: Vec<JoinHandle<()>>,
}

impl DumpPool {
    pub fn spawn(
        workers: usize,
        dump_rx: mpsc::Receiver<DumpJob>,
        registry: Arc<Registry>,
    ) -> Self {
        let rx: SharedRx = Arc::new(AsyncMutex::new(dump_rx));
        let handles = (0..workers)
            .map(|_| {
                let rx = rx.clone();
                let registry = registry.clone();
                tokio::spawn(worker(rx, registry))
            })
            .collect();
        Self { handles }
    }

    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("dump jobs stopped");
    }
}

async fn worker(rx: SharedRx, registry: Arc<Registry>) {
    loop {
        let job = { rx.lock().await.recv().await };
        let Some(DumpJob {
            key,
            size,
            mut stream,
            peer,
        }) = job
        else {
            return;
        };

        match registry.dump(&key, size, &mut stream).await {
            Ok(()) => respond(&mut stream, peer, RESP_OK).await,
            Err(e) => {
                error!("dumper: {}", e);
                respond(&mut stream, peer, RESP_ERROR).await;
            }
        }
    }
}
