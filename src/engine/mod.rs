mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod reservations;
mod store;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use reservations::ReservationFilter;
pub use store::BookingStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::model::*;
use crate::wal::Wal;

pub type SharedAccommodation = Arc<RwLock<AccommodationState>>;

/// Exclusive hold on one accommodation, carried into its commit.
pub type AccommodationGuard = OwnedRwLockWriteGuard<AccommodationState>;

/// Default bound on how long an operation waits for an accommodation lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Flush what we have before compaction sees the file.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even after an append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_result = wal.flush_sync();
    match append_err {
        Some(e) => Err(e),
        None => flush_result,
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Tunables for an [`Engine`].
#[derive(Clone)]
pub struct EngineOptions {
    pub clock: Arc<dyn Clock>,
    pub lock_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

/// The booking consistency engine.
///
/// Every mutating operation follows the same shape: lock the accommodation,
/// decide against its current state, journal exactly one [`Event`], apply it,
/// release. Operations on different accommodations never contend.
pub struct Engine {
    pub(super) store: Arc<BookingStore>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) lock_timeout: Duration,
    /// Held shared while an accommodation may be created, exclusively while
    /// compaction snapshots the store. Writes to existing accommodations are
    /// fenced by their own locks instead.
    pub(super) compaction_gate: Arc<RwLock<()>>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        Self::with_options(wal_path, EngineOptions::default())
    }

    /// Replay the journal at `wal_path` and start the group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn with_options(wal_path: PathBuf, options: EngineOptions) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: Arc::new(BookingStore::new()),
            wal_tx,
            clock: options.clock,
            lock_timeout: options.lock_timeout,
            compaction_gate: Arc::new(RwLock::new(())),
        };

        // We're the sole owner of these Arcs during replay, so try_write always
        // succeeds. Never block here: this may run inside an async context.
        for event in &events {
            let shared = engine.store.get_or_create(event.accommodation_id());
            let mut guard = shared
                .try_write()
                .map_err(|_| io::Error::other("replay: accommodation lock contended"))?;
            engine.store.apply_event(&mut guard, event);
        }

        info!(
            events = events.len(),
            accommodations = engine.store.accommodation_count(),
            "journal replayed"
        );
        Ok(engine)
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Journal, then apply, holding `guard` throughout. If the journal write
    /// fails nothing is applied, so the caller sees `Internal` and memory still
    /// matches disk.
    ///
    /// The commit runs on its own task. A caller that stops waiting (a dropped
    /// future, an expired deadline) detaches from it but cannot split the
    /// journal record from its application. `fence` is released with the guard.
    pub(super) async fn persist_and_apply(
        &self,
        guard: AccommodationGuard,
        event: Event,
        fence: Option<OwnedRwLockReadGuard<()>>,
    ) -> Result<(), EngineError> {
        let wal_tx = self.wal_tx.clone();
        let store = self.store.clone();
        let commit = tokio::spawn(async move {
            let mut guard = guard;
            let _fence = fence;
            wal_append(&wal_tx, &event).await?;
            store.apply_event(&mut guard, &event);
            debug!(accommodation = %guard.id, ?event, "committed");
            Ok::<(), EngineError>(())
        });
        commit
            .await
            .map_err(|e| EngineError::Internal(format!("commit task failed: {e}")))?
    }

    /// Acquire an accommodation's write lock, giving up after `lock_timeout`.
    pub(super) async fn lock(
        &self,
        shared: SharedAccommodation,
    ) -> Result<AccommodationGuard, EngineError> {
        tokio::time::timeout(self.lock_timeout, shared.write_owned())
            .await
            .map_err(|_| EngineError::Timeout)
    }

    /// Lookup reservation → accommodation, acquire its write lock.
    pub(super) async fn lock_for_reservation(
        &self,
        reservation_id: Ulid,
    ) -> Result<AccommodationGuard, EngineError> {
        let acc_id = self
            .store
            .accommodation_for_reservation(&reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        let shared = self
            .store
            .get(&acc_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        self.lock(shared).await
    }

    /// Lookup window → accommodation, acquire its write lock.
    pub(super) async fn lock_for_window(
        &self,
        window_id: Ulid,
    ) -> Result<AccommodationGuard, EngineError> {
        let acc_id = self
            .store
            .accommodation_for_window(&window_id)
            .ok_or(EngineError::NotFound(window_id))?;
        let shared = self
            .store
            .get(&acc_id)
            .ok_or(EngineError::NotFound(window_id))?;
        self.lock(shared).await
    }
}

/// Write event to WAL via the background group-commit writer.
async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::Internal("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::Internal("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::Internal(format!("WAL error: {e}")))
}
