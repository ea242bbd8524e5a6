//! Connection intake and worker pools
//!
//! The accept loop feeds raw connections into the header channel; router
//! workers parse the one-line command and forward to the dump or rotate
//! channel; dump and rotate workers drive the destination registry. All
//! communication is via bounded channels, all pools are plain tokio tasks.
//!
//! Shutdown is a broadcast: the accept loop observes the cancellation watch
//! and stops taking connections, after which closing each channel in turn
//! drains the pools. A worker finishes its in-flight job, sees the closed
//! channel and exits.

pub mod debug;
pub mod dumper;
pub mod rotator;
pub mod router;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bufferer::make_factory;
use crate::config::{Config, LogrotateMethod};
use crate::error::{CarrierError, Result};
use crate::registry::{DestKey, Registry};
use crate::schedule::Schedule;
use crate::state;

pub use dumper::DumpPool;
pub use rotator::{RotateMode, RotatePool};
pub use router::RouterPool;

// =============================================================================
// Shutdown broadcast
// =============================================================================

/// Cancellation handle shared by the accept loop and background tasks
///
/// Cloneable; any holder may request shutdown (used by io-fatal paths) and
/// any task may subscribe and wait for it.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn request(&self) {
        let _ = self.tx.send(true);
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Resolves once shutdown is requested
    pub async fn requested(&self) {
        let mut rx = self.subscribe();
        Self::cancelled(&mut rx).await;
    }

    /// Resolves once `rx` observes a `true` value, without holding a
    /// `watch::Ref` across an await point (so the future stays `Send`).
    pub async fn cancelled(rx: &mut watch::Receiver<bool>) {
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Job records
// =============================================================================

/// Raw connection on its way to a router worker
pub struct HeaderJob {
    pub stream: BufReader<TcpStream>,
    pub peer: SocketAddr,
}

/// Parsed DATA request: `size` payload bytes follow on the stream
pub struct DumpJob {
    pub key: DestKey,
    pub size: u64,
    pub stream: BufReader<TcpStream>,
    pub peer: SocketAddr,
}

/// Parsed ROTATE request
pub struct RotateJob {
    pub key: DestKey,
    pub stream: BufReader<TcpStream>,
    pub peer: SocketAddr,
}

/// Writes the response line and closes the connection
pub(crate) async fn respond(stream: &mut BufReader<TcpStream>, peer: SocketAddr, msg: &[u8]) {
    if let Err(e) = stream.get_mut().write_all(msg).await {
        warn!(%peer, "cannot write response: {}", e);
    }
    if let Err(e) = stream.get_mut().shutdown().await {
        warn!(%peer, "cannot close connection: {}", e);
    }
}

// =============================================================================
// Accept loop
// =============================================================================

/// Accepts connections until shutdown and feeds them to the routers
///
/// Acceptance is gated before `accept` resolves: once shutdown is requested
/// no further connection is admitted. An accept failure is fatal and takes
/// the whole process down the shutdown path.
async fn serve(listener: TcpListener, header_tx: mpsc::Sender<HeaderJob>, shutdown: Shutdown) {
    let mut cancel = shutdown.subscribe();
    loop {
        tokio::select! {
            res = listener.accept() => match res {
                Ok((stream, peer)) => {
                    let job = HeaderJob {
                        stream: BufReader::new(stream),
                        peer,
                    };
                    if header_tx.send(job).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    error!("accept failed: {}", e);
                    shutdown.request();
                    return;
                }
            },
            _ = Shutdown::cancelled(&mut cancel) => return,
        }
    }
}

// =============================================================================
// Carrier assembly
// =============================================================================

/// A fully wired, running carrier
///
/// `start` binds the listener and spawns every pool and background loop;
/// `stop` runs the ordered shutdown. `main` and the end-to-end tests share
/// this assembly.
pub struct Carrier {
    pub local_addr: SocketAddr,
    shutdown: Shutdown,
    registry: Arc<Registry>,
    state_file: Option<std::path::PathBuf>,
    accept: JoinHandle<()>,
    background: Vec<JoinHandle<()>>,
    routers: RouterPool,
    dumpers: DumpPool,
    rotators: RotatePool,
}

impl Carrier {
    pub async fn start(config: Config) -> Result<Self> {
        let shutdown = Shutdown::new();

        let factory = make_factory(
            &config,
            config.file_paths(),
            config.link_paths(),
            config.notifiers()?,
        );
        let registry = Arc::new(Registry::new(factory, config.wait_timeout));

        if let Some(ref state_file) = config.state_file {
            if state_file.exists() {
                let entries = state::read_state_file(state_file)?;
                info!(destinations = entries.len(), "restoring persisted state");
                registry.restore_all_state(&entries).await?;
            }
        }

        let listener = TcpListener::bind(&config.listen)
            .await
            .map_err(|e| CarrierError::ListenBind {
                addr: config.listen.clone(),
                source: e,
            })?;
        let local_addr = listener.local_addr().map_err(|e| CarrierError::ListenBind {
            addr: config.listen.clone(),
            source: e,
        })?;

        let (header_tx, header_rx) = mpsc::channel(config.buffers.connections);
        let (dump_tx, dump_rx) = mpsc::channel(config.buffers.dumps);
        let (rotate_tx, rotate_rx) = mpsc::channel(config.buffers.logrotates);

        let mut background = Vec::new();
        background.push(tokio::spawn(registry.clone().flush_periodic(
            config.workers.flusher_sleep,
            shutdown.clone(),
        )));

        let rotate_mode = match config.logrotate.method {
            LogrotateMethod::OnDemand => RotateMode::Real,
            LogrotateMethod::Both => RotateMode::Real,
            LogrotateMethod::Periodic => RotateMode::Plumb,
        };
        if config.logrotate.method != LogrotateMethod::OnDemand {
            let schedule = match Schedule::parse(&config.logrotate.schedule) {
                Ok(schedule) => schedule,
                Err(e) => {
                    // Stop the already-spawned background loops before bailing.
                    shutdown.request();
                    return Err(e);
                }
            };
            background.push(tokio::spawn(
                registry.clone().logrotate_periodic(schedule, shutdown.clone()),
            ));
        }

        if let Some(ref addr) = config.listen_debug {
            if !addr.is_empty() {
                let server =
                    match debug::DebugServer::bind(addr, registry.clone(), Instant::now()).await {
                        Ok(server) => server,
                        Err(e) => {
                            shutdown.request();
                            return Err(e);
                        }
                    };
                info!("debug listening on {}", addr);
                background.push(tokio::spawn(server.run(shutdown.clone())));
            }
        }

        let routers = RouterPool::spawn(config.workers.router, header_rx, dump_tx, rotate_tx);
        let dumpers = DumpPool::spawn(config.workers.dumper, dump_rx, registry.clone());
        let rotators =
            RotatePool::spawn(config.workers.logrotater, rotate_rx, registry.clone(), rotate_mode);

        info!("listening on {}", local_addr);
        let accept = tokio::spawn(serve(listener, header_tx, shutdown.clone()));

        Ok(Self {
            local_addr,
            shutdown,
            registry,
            state_file: config.state_file.clone(),
            accept,
            background,
            routers,
            dumpers,
            rotators,
        })
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Ordered shutdown
    ///
    /// Stops intake and background loops, drains the pools front to back
    /// (nobody abandons an in-flight job), captures persisted state while
    /// the stacks are still warm, then flushes and closes every
    /// destination.
    pub async fn stop(self) {
        self.shutdown.request();

        let _ = self.accept.await;
        for handle in self.background {
            let _ = handle.await;
        }

        self.routers.join().await;
        self.dumpers.join().await;
        self.rotators.join().await;

        if let Some(ref path) = self.state_file {
            let entries = self.registry.dump_all_state().await;
            match state::write_state_file(path, &entries) {
                Ok(()) => info!(destinations = entries.len(), "persisted state written"),
                Err(e) => error!("cannot write state file: {}", e),
            }
        }

        self.registry.join().await;
        info!("carrier stopped");
    }
}

// =============================================================================
// End-to-end tests
// =============================================================================
