//! Destination registry
//!
//! Maps destination keys to their write stacks and guarantees at most one
//! writer per destination. The outer map lock is only ever held to look up
//! or insert a slot; each slot carries its own async lock whose guard scopes
//! the mutual exclusion for a whole dump, flush or rotation. A slow dump
//! therefore never blocks flushes of other destinations.
//!
//! Entries are created on first use of a key and never removed while the
//! process runs; rotation replaces the on-disk file under the same key.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use crate::bufferer::{Bufferer, BuffererFactory};
use crate::constants::{CONN_READ_TIMEOUT, DUMP_CHUNK_SIZE};
use crate::error::{CarrierError, Result};
use crate::server::Shutdown;
use crate::state::{StateEntry, StateReader, StateWriter};

// =============================================================================
// Destination key
// =============================================================================

/// Logical log stream identity supplied by clients
///
/// Equality is byte-exact; derived file paths may change across rotations
/// but the key never does.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DestKey {
    pub dir: String,
    pub name: String,
    pub group: String,
}

impl DestKey {
    pub fn new(dir: impl Into<String>, name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for DestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.dir, self.name, self.group)
    }
}

// =============================================================================
// Registry
// =============================================================================

struct Slot {
    bufferer: Option<Box<dyn Bufferer>>,
}

type SharedSlot = Arc<AsyncMutex<Slot>>;

/// Process-wide mapping from destination key to write stack
pub struct Registry {
    slots: Mutex<HashMap<DestKey, SharedSlot>>,
    factory: BuffererFactory,
    wait_timeout: Duration,
}

/// Exclusive access to one destination's write stack
///
/// Holding the guard IS the mutual exclusion; it is handed out by
/// [`Registry::acquire`] and released on drop.
pub struct DestGuard {
    guard: OwnedMutexGuard<Slot>,
}

impl std::fmt::Debug for DestGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestGuard").finish_non_exhaustive()
    }
}

impl DestGuard {
    fn bufferer(&mut self) -> &mut dyn Bufferer {
        // acquire() builds the bufferer before handing out the guard.
        self.guard
            .bufferer
            .as_mut()
            .expect("acquired slot always holds a bufferer")
            .as_mut()
    }
}

impl Registry {
    pub fn new(factory: BuffererFactory, wait_timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            factory,
            wait_timeout,
        }
    }

    /// Looks up or inserts the slot for a key; the map lock is held briefly
    fn slot(&self, key: &DestKey) -> SharedSlot {
        let mut slots = self.slots.lock();
        slots
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(AsyncMutex::new(Slot { bufferer: None }))
            })
            .clone()
    }

    fn existing_slot(&self, key: &DestKey) -> Option<SharedSlot> {
        self.slots.lock().get(key).cloned()
    }

    fn snapshot(&self) -> Vec<(DestKey, SharedSlot)> {
        self.slots
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Obtains exclusive access to a destination, building its write stack
    /// on first use
    ///
    /// Waits at most the configured `WaitTimeout` for the destination lock.
    pub async fn acquire(&self, key: &DestKey) -> Result<DestGuard> {
        let slot = self.slot(key);
        let mut guard = tokio::time::timeout(self.wait_timeout, slot.lock_owned())
            .await
            .map_err(|_| CarrierError::AcquireTimeout { key: key.clone() })?;
        if guard.bufferer.is_none() {
            guard.bufferer = Some((self.factory)(key)?);
        }
        Ok(DestGuard { guard })
    }

    /// Streams exactly `size` payload bytes from `conn` into the destination
    pub async fn dump<R>(&self, key: &DestKey, size: u64, conn: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut dest = self.acquire(key).await?;
        let mut chunk = vec![0u8; DUMP_CHUNK_SIZE.min(size as usize).max(1)];
        let mut remaining = size;
        while remaining > 0 {
            let want = chunk.len().min(remaining as usize);
            // Same idle deadline as the header read: a stalled client must
            // not hold the destination lock indefinitely.
            let n = tokio::time::timeout(CONN_READ_TIMEOUT, conn.read(&mut chunk[..want]))
                .await
                .map_err(|_| CarrierError::DumpIo {
                    key: key.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "payload read timed out",
                    ),
                })?
                .map_err(|e| CarrierError::DumpIo {
                    key: key.clone(),
                    source: e,
                })?;
            if n == 0 {
                // Push what arrived toward disk before reporting the abort.
                let _ = dest.bufferer().flush();
                return Err(CarrierError::DumpShortRead {
                    key: key.clone(),
                    expected: size,
                    got: size - remaining,
                });
            }
            dest.bufferer()
                .write(&chunk[..n])
                .map_err(|e| CarrierError::DumpIo {
                    key: key.clone(),
                    source: e,
                })?;
            remaining -= n as u64;
        }
        dest.bufferer()
            .post_write()
            .map_err(|e| CarrierError::DumpIo {
                key: key.clone(),
                source: e,
            })
    }

    /// Closes and rotates one destination
    ///
    /// A key that was never written to is a silent success: no file is
    /// created just to rotate nothing. On error the stack stays closed and
    /// the next write reopens it.
    pub async fn logrotate(&self, key: &DestKey) -> Result<()> {
        let Some(slot) = self.existing_slot(key) else {
            info!(%key, "nothing collected for destination, omitting log rotation");
            return Ok(());
        };
        let mut guard = tokio::time::timeout(self.wait_timeout, slot.lock_owned())
            .await
            .map_err(|_| CarrierError::AcquireTimeout { key: key.clone() })?;
        let Some(bufferer) = guard.bufferer.as_mut() else {
            return Ok(());
        };
        bufferer.close()?;
        bufferer.rotate()
    }

    /// Flushes every destination's stack once
    pub async fn flush_all(&self) -> Result<()> {
        for (key, slot) in self.snapshot() {
            let mut guard = slot.lock().await;
            if let Some(bufferer) = guard.bufferer.as_mut() {
                bufferer.flush().map_err(|e| CarrierError::Flush {
                    key: key.clone(),
                    source: e,
                })?;
            }
        }
        Ok(())
    }

    /// Rotates every destination; per-destination failures are logged and do
    /// not stop the sweep
    pub async fn rotate_all(&self) {
        for (key, slot) in self.snapshot() {
            let mut guard = slot.lock().await;
            let Some(bufferer) = guard.bufferer.as_mut() else {
                continue;
            };
            let res = bufferer.close().and_then(|()| bufferer.rotate());
            if let Err(e) = res {
                error!(%key, "scheduled rotation failed: {}", e);
            }
        }
    }

    /// Drives `flush_all` on every ticker tick until shutdown
    ///
    /// An unrecoverable flush failure is fatal for the whole process.
    pub async fn flush_periodic(self: Arc<Self>, period: Duration, shutdown: Shutdown) {
        let mut cancel = shutdown.subscribe();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.flush_all().await {
                        error!("periodic flush failed: {}", e);
                        shutdown.request();
                        return;
                    }
                }
                _ = Shutdown::cancelled(&mut cancel) => return,
            }
        }
    }

    /// Rotates every destination whenever the schedule fires, until shutdown
    pub async fn logrotate_periodic(
        self: Arc<Self>,
        schedule: crate::schedule::Schedule,
        shutdown: Shutdown,
    ) {
        let mut cancel = shutdown.subscribe();
        loop {
            let Some(delay) = schedule.until_next() else {
                warn!("rotation schedule has no upcoming fire time, stopping");
                return;
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    info!("scheduled rotation sweep");
                    self.rotate_all().await;
                }
                _ = Shutdown::cancelled(&mut cancel) => return,
            }
        }
    }

    /// Flushes and closes every destination's stack
    ///
    /// Runs after the pools have drained; errors are logged, the sweep
    /// continues.
    pub async fn join(&self) {
        for (key, slot) in self.snapshot() {
            let mut guard = slot.lock().await;
            if let Some(bufferer) = guard.bufferer.as_mut() {
                if let Err(e) = bufferer.close() {
                    error!(%key, "closing destination failed: {}", e);
                }
            }
        }
    }

    /// Captures every built destination's layer state
    pub async fn dump_all_state(&self) -> Vec<StateEntry> {
        let mut entries = Vec::new();
        for (key, slot) in self.snapshot() {
            let mut guard = slot.lock().await;
            let Some(bufferer) = guard.bufferer.as_mut() else {
                continue;
            };
            let mut w = StateWriter::new();
            match bufferer.dump_state(&mut w) {
                Ok(()) => entries.push(StateEntry {
                    key: key.clone(),
                    variant: bufferer.variant(),
                    blob: w.into_bytes(),
                }),
                Err(e) => error!(%key, "state dump failed: {}", e),
            }
        }
        entries
    }

    /// Rebuilds destinations from persisted state, truncating files to their
    /// recorded offsets
    pub async fn restore_all_state(&self, entries: &[StateEntry]) -> Result<()> {
        for entry in entries {
            let mut dest = self.acquire(&entry.key).await?;
            let bufferer = dest.bufferer();
            if bufferer.variant() != entry.variant {
                return Err(CarrierError::StateVariantMismatch {
                    key: entry.key.clone(),
                });
            }
            let mut r = StateReader::new(&entry.blob);
            bufferer.restore_state(&mut r)?;
            if r.remaining() > 0 {
                return Err(CarrierError::StateParse {
                    reason: format!("{} trailing bytes in entry for {}", r.remaining(), entry.key),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bufferer::make_factory;
    use crate::config::Config;
    use crate::notify::NotifySet;
    use crate::paths::PathGen;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn registry(root: &Path, wait: Duration) -> Arc<Registry> {
        let cfg = Config::default();
        let factory = make_factory(
            &cfg,
            Arc::new(PathGen::templates(root, "{dir}/{name}", "{dir}/{name}.rot")),
            Arc::new(PathGen::void()),
            Arc::new(NotifySet::disabled()),
        );
        Arc::new(Registry::new(factory, wait))
    }

    #[tokio::test]
    async fn test_dump_writes_through_after_close() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(tmp.path(), Duration::from_secs(1));
        let key = DestKey::new("a", "b", "c");

        let mut payload: &[u8] = b"hello";
        reg.dump(&key, 5, &mut payload).await.unwrap();
        reg.join().await;

        assert_eq!(std::fs::read(tmp.path().join("a/b")).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_dump_short_read_is_reported() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(tmp.path(), Duration::from_secs(1));
        let key = DestKey::new("a", "b", "c");

        let mut payload: &[u8] = b"hel";
        let err = reg.dump(&key, 5, &mut payload).await.unwrap_err();
        assert!(matches!(err, CarrierError::DumpShortRead { got: 3, .. }));
    }

    #[tokio::test]
    async fn test_logrotate_unknown_key_is_silent_noop() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(tmp.path(), Duration::from_secs(1));
        reg.logrotate(&DestKey::new("never", "seen", "here"))
            .await
            .unwrap();
        // No files sprang into existence.
        assert!(!tmp.path().join("never").exists());
    }

    #[tokio::test]
    async fn test_logrotate_moves_data() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(tmp.path(), Duration::from_secs(1));
        let key = DestKey::new("a", "b", "c");

        let mut payload: &[u8] = b"rotate me";
        reg.dump(&key, 9, &mut payload).await.unwrap();
        reg.logrotate(&key).await.unwrap();

        assert!(!tmp.path().join("a/b").exists());
        assert_eq!(
            std::fs::read(tmp.path().join("a/b.rot")).unwrap(),
            b"rotate me"
        );
    }

    #[tokio::test]
    async fn test_acquire_times_out_while_held() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(tmp.path(), Duration::from_millis(50));
        let key = DestKey::new("a", "b", "c");

        let held = reg.acquire(&key).await.unwrap();
        let err = reg.acquire(&key).await.unwrap_err();
        assert!(matches!(err, CarrierError::AcquireTimeout { .. }));
        drop(held);
        assert!(reg.acquire(&key).await.is_ok());
    }

    #[tokio::test]
    async fn test_operations_on_distinct_destinations_do_not_block() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(tmp.path(), Duration::from_millis(100));

        let _held = reg.acquire(&DestKey::new("a", "b", "c")).await.unwrap();
        // A different key acquires instantly even while the first is held.
        assert!(reg.acquire(&DestKey::new("x", "y", "z")).await.is_ok());
    }

    #[tokio::test]
    async fn test_state_roundtrip_through_registry() {
        let tmp = TempDir::new().unwrap();
        let key = DestKey::new("a", "b", "c");

        let reg = registry(tmp.path(), Duration::from_secs(1));
        let mut payload: &[u8] = b"persisted";
        reg.dump(&key, 9, &mut payload).await.unwrap();
        let entries = reg.dump_all_state().await;
        assert_eq!(entries.len(), 1);
        reg.join().await;

        // Fresh registry, same root: restore truncates to the recorded state.
        let reg2 = registry(tmp.path(), Duration::from_secs(1));
        reg2.restore_all_state(&entries).await.unwrap();
        assert_eq!(
            std::fs::read(tmp.path().join("a/b")).unwrap(),
            b"persisted"
        );
    }
}
