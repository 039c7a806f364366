use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use super::{Activation, ReservationStore, StoreError, WaitlistQuery};

pub type SharedReservation = Arc<RwLock<Reservation>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
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

/// Background task that owns the WAL and batches appends for group commit:
/// take the first append, drain whatever else is already queued, then a single
/// fsync answers the whole batch.
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
                    // Compaction must see every append that was queued before it.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after an append error so half-buffered bytes don't leak into
    // the next batch; every caller in this batch is told it failed.
    let flushed = wal.flush_sync();
    let result = result.and(flushed);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
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
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// WAL-backed reservation store. Each reservation sits behind its own lock;
/// a mutation is appended to the WAL first and applied only once the append
/// is durable, so a failed write leaves the document untouched.
pub struct LedgerStore {
    reservations: DashMap<Ulid, SharedReservation>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Writers hold it shared from append to apply; compaction holds it
    /// exclusively so its snapshot covers every durable event.
    write_gate: RwLock<()>,
    /// Ids with an insert in flight, claimed before the WAL append.
    inserting: DashSet<Ulid>,
}

impl LedgerStore {
    /// Replay `wal_path` and start the writer task. Must run inside a Tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut docs: HashMap<Ulid, Reservation> = HashMap::new();
        for event in &events {
            match event {
                Event::ReservationCreated { reservation } => {
                    docs.insert(reservation.id, reservation.clone());
                }
                Event::ReservationDeleted { id } => {
                    docs.remove(id);
                }
                other => {
                    if let Some(doc) = docs.get_mut(&other.reservation_id()) {
                        apply_event(doc, other);
                    }
                }
            }
        }
        tracing::debug!(
            events = events.len(),
            reservations = docs.len(),
            "replayed reservation ledger"
        );

        let reservations = DashMap::new();
        for (id, doc) in docs {
            reservations.insert(id, Arc::new(RwLock::new(doc)));
        }
        Ok(Self {
            reservations,
            wal_tx,
            write_gate: RwLock::new(()),
            inserting: DashSet::new(),
        })
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn shared(&self, id: &Ulid) -> Option<SharedReservation> {
        self.reservations.get(id).map(|e| e.value().clone())
    }

    /// Lock a reservation for writing. Fails if it was deleted while we waited.
    async fn lock(&self, id: Ulid) -> Result<(SharedReservation, OwnedRwLockWriteGuard<Reservation>), StoreError> {
        let shared = self.shared(&id).ok_or(StoreError::NotFound(id))?;
        let guard = shared.clone().write_owned().await;
        let still_there = self
            .shared(&id)
            .is_some_and(|current| Arc::ptr_eq(&current, &shared));
        if !still_there {
            return Err(StoreError::NotFound(id));
        }
        Ok((shared, guard))
    }

    /// Lock, validate, persist, apply. The one path every non-delete mutation takes.
    async fn mutate(
        &self,
        id: Ulid,
        check: impl FnOnce(&Reservation) -> Result<(), StoreError>,
        event: Event,
    ) -> Result<Reservation, StoreError> {
        let _gate = self.write_gate.read().await;
        let (_shared, mut guard) = self.lock(id).await?;
        check(&guard)?;
        self.wal_append(&event).await?;
        apply_event(&mut guard, &event);
        Ok(guard.clone())
    }

    /// Consistent-per-document snapshot, oldest first.
    async fn snapshot(&self) -> Vec<Reservation> {
        let shared: Vec<SharedReservation> =
            self.reservations.iter().map(|e| e.value().clone()).collect();
        let mut docs: Vec<Reservation> =
            join_all(shared.iter().map(|s| async move { s.read().await.clone() })).await;
        docs.sort_by_key(|r| (r.created_at, r.id));
        docs
    }

    async fn insert_claimed(&self, reservation: Reservation) -> Result<(), StoreError> {
        let id = reservation.id;
        if self.reservations.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        let _gate = self.write_gate.read().await;
        self.wal_append(&event).await?;
        self.reservations
            .insert(id, Arc::new(RwLock::new(reservation)));
        Ok(())
    }

    /// Remove a reservation if `check` still passes under its lock.
    async fn remove(
        &self,
        id: Ulid,
        check: impl FnOnce(&Reservation) -> Result<(), StoreError>,
    ) -> Result<Reservation, StoreError> {
        let _gate = self.write_gate.read().await;
        let (shared, guard) = self.lock(id).await?;
        check(&guard)?;
        self.wal_append(&Event::ReservationDeleted { id }).await?;
        self.reservations
            .remove_if(&id, |_, current| Arc::ptr_eq(current, &shared));
        Ok(guard.clone())
    }

    /// Rewrite the WAL with just the live reservations.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _gate = self.write_gate.write().await;
        let events = self
            .snapshot()
            .await
            .into_iter()
            .map(|reservation| Event::ReservationCreated { reservation })
            .collect();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl ReservationStore for LedgerStore {
    async fn insert(&self, reservation: Reservation) -> Result<(), StoreError> {
        let id = reservation.id;
        // Claim first, then look: a finished insert is visible in the map
        // before its claim is released.
        if !self.inserting.insert(id) {
            return Err(StoreError::AlreadyExists(id));
        }
        let result = self.insert_claimed(reservation).await;
        self.inserting.remove(&id);
        result
    }

    async fn get(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        match self.shared(&id) {
            Some(s) => Ok(Some(s.read().await.clone())),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.snapshot().await)
    }

    async fn active(&self, kind: ResourceKind, now: Ms) -> Result<Vec<Reservation>, StoreError> {
        let mut docs = self.snapshot().await;
        docs.retain(|r| r.kind == kind && r.is_live(now));
        Ok(docs)
    }

    async fn waitlisted(&self, query: WaitlistQuery) -> Result<Vec<Reservation>, StoreError> {
        let mut docs = self.snapshot().await;
        docs.retain(|r| query.matches(r));
        if let Some(limit) = query.limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    async fn activate(&self, id: Ulid, activation: Activation) -> Result<Reservation, StoreError> {
        let event = Event::ReservationActivated {
            id,
            seats: activation.seats,
            activated_at: activation.activated_at,
            expires_at: activation.expires_at,
            note: activation.note,
        };
        self.mutate(
            id,
            |r| match r.status {
                Status::Waitlisted => Ok(()),
                _ => Err(StoreError::NotWaitlisted(id)),
            },
            event,
        )
        .await
    }

    async fn waive_togetherness(&self, id: Ulid, note: String) -> Result<Reservation, StoreError> {
        self.mutate(
            id,
            |r| {
                if r.status == Status::Waitlisted && r.together {
                    Ok(())
                } else {
                    Err(StoreError::NotWaitlisted(id))
                }
            },
            Event::TogethernessWaived { id, note },
        )
        .await
    }

    async fn complete(&self, id: Ulid) -> Result<Reservation, StoreError> {
        self.mutate(
            id,
            |r| match r.status {
                Status::Active => Ok(()),
                _ => Err(StoreError::NotActive(id)),
            },
            Event::ReservationCompleted { id },
        )
        .await
    }

    async fn delete(&self, id: Ulid) -> Result<Reservation, StoreError> {
        self.remove(id, |_| Ok(())).await
    }

    async fn delete_expired(&self, now: Ms) -> Result<Vec<Reservation>, StoreError> {
        let expired: Vec<Ulid> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|r| r.is_expired(now))
            .map(|r| r.id)
            .collect();
        let mut removed = Vec::with_capacity(expired.len());
        for id in expired {
            let still_expired = |r: &Reservation| {
                if r.is_expired(now) {
                    Ok(())
                } else {
                    Err(StoreError::NotActive(id))
                }
            };
            match self.remove(id, still_expired).await {
                Ok(r) => removed.push(r),
                // Deleted by someone else in the meantime
                Err(StoreError::NotFound(_) | StoreError::NotActive(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    async fn open_count(&self) -> Result<usize, StoreError> {
        let docs = self.snapshot().await;
        Ok(docs
            .iter()
            .filter(|r| matches!(r.status, Status::Waitlisted | Status::Active))
            .count())
    }
}
