//! Rotate pool: client-initiated rotation requests
//!
//! In `Plumb` mode requests are acknowledged but perform nothing; it is set
//! when rotation is driven solely by the schedule.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::{respond, RotateJob};
use crate::constants::{RESP_DONE, RESP_ERROR};
use crate::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateMode {
    /// Rotate the destination for every request
    Real,
    /// Acknowledge and do nothing
    Plumb,
}

type SharedRx = Arc<AsyncMutex<mpsc::Receiver<RotateJob>>>;

pub struct RotatePool {
    handles: Vec<JoinHandle<()>>,
}

impl RotatePool {
    pub fn spawn(
        workers: usize,
        rotate_rx: mpsc::Receiver<RotateJob>,
        registry: Arc<Registry>,
        mode: RotateMode,
    ) -> Self {
        let rx: SharedRx = Arc::new(AsyncMutex::new(rotate_rx));
        let handles = (0..workers)
            .map(|_| {
                let rx = rx.clone();
                let registry = registry.clone();
                tokio::spawn(worker(rx, registry, mode))
            })
            .collect();
        Self { handles }
    }

    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("log rotating jobs stopped");
    }
}

async fn worker(rx: SharedRx, registry: Arc<Registry>, mode: RotateMode) {
    loop {
        let job = { rx.lock().await.recv().await };
        let Some(RotateJob {
            key,
            mut stream,
            peer,
        }) = job
        else {
            return;
        };

        let result = match mode {
            RotateMode::Real => registry.logrotate(&key).await,
            RotateMode::Plumb => Ok(()),
        };

        match result {
            Ok(()) => {
                info!(%key, "rotating");
                respond(&mut stream, peer, RESP_DONE).await;
            }
            Err(e) => {
                error!("rotator: {}", e);
                respond(&mut stream, peer, RESP_ERROR).await;
            }
        }
    }
}
