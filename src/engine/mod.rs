mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod occupancy;
mod queries;
mod store;

pub use conflict::{check_commitment, check_confirmed_exclusivity, check_conflict, Conflict};
pub(crate) use conflict::now_ms;
pub use error::EngineError;
pub use lifecycle::{check_commitment_deletable, check_future_start, check_window_mutable};
pub use occupancy::{compute_occupancy, percent, reactor_occupancy};
pub use queries::ReactorFilter;
pub use store::Store;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedReactorState = Arc<RwLock<ReactorState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// block for the first append, drain whatever else is already queued, then
/// flush and fsync once for the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so half-written bytes don't leak
    // into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Scheduling engine: the record store, its WAL and the change feed.
///
/// Every check-then-act mutation holds the target reactor's write lock from
/// the conflict scan until the event is applied.
pub struct Engine {
    pub store: Store,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Serializes reactor creation and deletion.
    pub(super) catalog: Mutex<()>,
    /// Held shared by every mutation from its first lock to its WAL append,
    /// and exclusively by compaction from snapshot to file swap. Taken before
    /// `catalog` and any reactor lock.
    pub(super) wal_gate: RwLock<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: Store::new(),
            wal_tx,
            notify,
            catalog: Mutex::new(()),
            wal_gate: RwLock::new(()),
        };

        // We're the sole owner of these locks during replay, so try_write
        // always succeeds. Never block here: this may run inside a runtime.
        for event in &events {
            match event {
                Event::ReactorCreated { serial_no, spec } => {
                    engine.store.insert_reactor(serial_no.clone(), spec.clone());
                }
                Event::ReactorDeleted { serial_no } => {
                    engine.store.remove_reactor(serial_no);
                }
                other => {
                    if let Some(rs) = engine.store.get_reactor(other.reactor()) {
                        let mut guard = rs.try_write().expect("replay: uncontended write");
                        engine.store.apply_event(&mut guard, other);
                    }
                }
            }
        }
        if !events.is_empty() {
            info!(
                "replayed {} events into {} reactors",
                events.len(),
                engine.store.reactor_count()
            );
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_reactor(&self, serial: &str) -> Option<SharedReactorState> {
        self.store.get_reactor(serial)
    }

    /// Subscribe to every applied event for a reactor.
    pub fn subscribe(&self, serial: &str) -> broadcast::Receiver<Event> {
        self.notify.subscribe(serial)
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ReactorState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(rs, event);
        self.notify.send(&rs.serial_no, event);
        Ok(())
    }

    /// `persist_and_apply` for an event that introduces record `id`. The id is
    /// claimed first, so concurrent inserts on any reactor cannot share it.
    pub(super) async fn persist_new_record(
        &self,
        rs: &mut ReactorState,
        id: Ulid,
        event: &Event,
    ) -> Result<(), EngineError> {
        if !self.store.reserve_record(id, &rs.serial_no) {
            return Err(EngineError::AlreadyExists(id.to_string()));
        }
        let result = self.persist_and_apply(rs, event).await;
        if result.is_err() {
            self.store.release_record(&id);
        }
        result
    }

    pub(super) async fn reactor_write(
        &self,
        serial: &str,
    ) -> Result<OwnedRwLockWriteGuard<ReactorState>, EngineError> {
        let rs = self
            .get_reactor(serial)
            .ok_or_else(|| EngineError::NotFound(serial.to_string()))?;
        let guard = rs.clone().write_owned().await;
        // The reactor may have been deleted while we waited for the lock.
        match self.get_reactor(serial) {
            Some(current) if Arc::ptr_eq(&current, &rs) => Ok(guard),
            _ => Err(EngineError::NotFound(serial.to_string())),
        }
    }

    /// Lookup record → reactor, then acquire that reactor's write lock.
    pub(super) async fn resolve_record_write(
        &self,
        id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ReactorState>, EngineError> {
        let serial = self
            .store
            .reactor_for_record(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        self.reactor_write(&serial).await
    }
}
