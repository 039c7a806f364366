use std::path::PathBuf;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use seatflow::config::EngineConfig;
use seatflow::engine::{now_ms, Engine, EngineError};
use seatflow::model::*;
use seatflow::notify::{spawn_dispatcher, ActivationNotice, Assignment, Notifier, NotifyError, NotifyHub};
use seatflow::store::{Activation, LedgerStore, ReservationStore, StoreError, WaitlistQuery};
use seatflow::topology::{Seat, Topology};
use Seat::*;

// ── Test infrastructure ──────────────────────────────────────

fn wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("seatflow_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

fn new_engine(store: Arc<dyn ReservationStore>) -> Arc<Engine> {
    Arc::new(Engine::new(EngineConfig::default(), store, Arc::new(NotifyHub::new())))
}

/// Ledger store whose writes can be switched to fail.
struct FlakyStore {
    inner: LedgerStore,
    down: AtomicBool,
}

impl FlakyStore {
    fn open(name: &str) -> Self {
        Self {
            inner: LedgerStore::open(wal_path(name)).unwrap(),
            down: AtomicBool::new(false),
        }
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ReservationStore for FlakyStore {
    async fn insert(&self, reservation: Reservation) -> Result<(), StoreError> {
        self.inner.insert(reservation).await
    }

    async fn get(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        self.inner.get(id).await
    }

    async fn list(&self) -> Result<Vec<Reservation>, StoreError> {
        self.inner.list().await
    }

    async fn active(&self, kind: ResourceKind, now: Ms) -> Result<Vec<Reservation>, StoreError> {
        self.inner.active(kind, now).await
    }

    async fn waitlisted(&self, query: WaitlistQuery) -> Result<Vec<Reservation>, StoreError> {
        self.inner.waitlisted(query).await
    }

    async fn activate(&self, id: Ulid, activation: Activation) -> Result<Reservation, StoreError> {
        self.check()?;
        self.inner.activate(id, activation).await
    }

    async fn waive_togetherness(&self, id: Ulid, note: String) -> Result<Reservation, StoreError> {
        self.check()?;
        self.inner.waive_togetherness(id, note).await
    }

    async fn complete(&self, id: Ulid) -> Result<Reservation, StoreError> {
        self.check()?;
        self.inner.complete(id).await
    }

    async fn delete(&self, id: Ulid) -> Result<Reservation, StoreError> {
        self.check()?;
        self.inner.delete(id).await
    }

    async fn delete_expired(&self, now: Ms) -> Result<Vec<Reservation>, StoreError> {
        self.check()?;
        self.inner.delete_expired(now).await
    }

    async fn open_count(&self) -> Result<usize, StoreError> {
        self.inner.open_count().await
    }
}

fn doc(party_size: u8, together: bool, created_at: Ms) -> Reservation {
    Reservation {
        id: Ulid::new(),
        name: "party".into(),
        contact: "p@example.com".into(),
        kind: ResourceKind::Seat,
        party_size,
        together,
        activity: None,
        slot_subtype: None,
        status: Status::Waitlisted,
        created_at,
        seats: Vec::new(),
        activated_at: None,
        expires_at: None,
        notes: Vec::new(),
        members: Vec::new(),
    }
}

/// Ledger store where chosen reservations are cancelled by "someone else"
/// right before the engine writes to them.
struct VanishingStore {
    inner: LedgerStore,
    doomed: Mutex<HashSet<Ulid>>,
}

impl VanishingStore {
    fn open(name: &str) -> Self {
        Self {
            inner: LedgerStore::open(wal_path(name)).unwrap(),
            doomed: Mutex::new(HashSet::new()),
        }
    }

    fn doom(&self, id: Ulid) {
        self.doomed.lock().unwrap().insert(id);
    }

    async fn vanish_if_doomed(&self, id: Ulid) {
        let doomed = self.doomed.lock().unwrap().remove(&id);
        if doomed {
            self.inner.delete(id).await.unwrap();
        }
    }
}

#[async_trait]
impl ReservationStore for VanishingStore {
    async fn insert(&self, reservation: Reservation) -> Result<(), StoreError> {
        self.inner.insert(reservation).await
    }

    async fn get(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        self.inner.get(id).await
    }

    async fn list(&self) -> Result<Vec<Reservation>, StoreError> {
        self.inner.list().await
    }

    async fn active(&self, kind: ResourceKind, now: Ms) -> Result<Vec<Reservation>, StoreError> {
        self.inner.active(kind, now).await
    }

    async fn waitlisted(&self, query: WaitlistQuery) -> Result<Vec<Reservation>, StoreError> {
        self.inner.waitlisted(query).await
    }

    async fn activate(&self, id: Ulid, activation: Activation) -> Result<Reservation, StoreError> {
        self.vanish_if_doomed(id).await;
        self.inner.activate(id, activation).await
    }

    async fn waive_togetherness(&self, id: Ulid, note: String) -> Result<Reservation, StoreError> {
        self.vanish_if_doomed(id).await;
        self.inner.waive_togetherness(id, note).await
    }

    async fn complete(&self, id: Ulid) -> Result<Reservation, StoreError> {
        self.inner.complete(id).await
    }

    async fn delete(&self, id: Ulid) -> Result<Reservation, StoreError> {
        self.inner.delete(id).await
    }

    async fn delete_expired(&self, now: Ms) -> Result<Vec<Reservation>, StoreError> {
        self.inner.delete_expired(now).await
    }

    async fn open_count(&self) -> Result<usize, StoreError> {
        self.inner.open_count().await
    }
}

/// Active reservation holding every seat except `free` for an hour from `now`.
fn holding_all_but(free: &[Seat], now: Ms) -> Reservation {
    let seats: Vec<Seat> = Seat::ALL.into_iter().filter(|s| !free.contains(s)).collect();
    Reservation {
        status: Status::Active,
        seats: seats.iter().map(|s| s.to_string()).collect(),
        activated_at: Some(now),
        expires_at: Some(now + 60 * MINUTE_MS),
        ..doc(seats.len() as u8, false, now)
    }
}

fn assert_no_double_booking(active: &[Reservation]) {
    let topology = Topology::cafe_floor();
    let mut claimed: Vec<Seat> = Vec::new();
    for r in active {
        let seats: Vec<Seat> = r.assigned_seats().collect();
        assert_eq!(seats.len(), r.party_size as usize);
        if r.together {
            assert!(topology.is_connected(&seats), "together party split: {seats:?}");
        }
        for s in seats {
            assert!(!claimed.contains(&s), "seat {s} assigned twice");
            claimed.push(s);
        }
    }
}

// ── Concurrency ──────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_share_a_seat() {
    let store = Arc::new(LedgerStore::open(wal_path("concurrent_requests.wal")).unwrap());
    let engine = new_engine(store.clone());

    let handles: Vec<_> = (0..24u8)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let req = NewReservation::seats("p", "p@example.com", i % 4 + 1, i % 2 == 0);
                engine.request(req).await
            })
        })
        .collect();
    for result in futures::future::join_all(handles).await {
        assert_ok!(result.unwrap());
    }

    let now = now_ms();
    let active = store.active(ResourceKind::Seat, now).await.unwrap();
    assert!(!active.is_empty());
    assert_no_double_booking(&active);

    let occupied = engine
        .seat_map(now)
        .await
        .unwrap()
        .iter()
        .filter(|s| s.occupant.is_some())
        .count();
    let seated: usize = active.iter().map(|r| r.party_size as usize).sum();
    assert_eq!(occupied, seated);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cycles_activate_each_party_once() {
    let store = Arc::new(LedgerStore::open(wal_path("concurrent_cycles.wal")).unwrap());
    let engine = new_engine(store.clone());
    let now = now_ms();
    for i in 0..10u8 {
        let mut r = doc(i % 3 + 1, i % 2 == 1, now - 10 + i as Ms);
        if i == 9 {
            r.kind = ResourceKind::Slot;
            r.party_size = 1;
            r.together = false;
        }
        store.insert(r).await.unwrap();
    }

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_cycle_at(now).await })
        })
        .collect();
    let mut activations = 0;
    for result in futures::future::join_all(handles).await {
        activations += assert_ok!(result.unwrap()).activations();
    }

    let active: Vec<Reservation> = store
        .list()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.status == Status::Active)
        .collect();
    assert_eq!(activations as usize, active.len());
    for r in &active {
        assert_eq!(r.notes.len(), 1, "activated more than once: {:?}", r.notes);
    }
    let seats: Vec<Reservation> = active.into_iter().filter(|r| r.kind == ResourceKind::Seat).collect();
    assert_no_double_booking(&seats);
}

// ── Storage failure ──────────────────────────────────────────

#[tokio::test]
async fn store_failure_aborts_cycle_and_leaves_waitlist() {
    let store = Arc::new(FlakyStore::open("flaky.wal"));
    let engine = new_engine(store.clone());

    store.set_down(true);
    // The request is persisted, but the caller hears about the failed cycle.
    let err = assert_err!(engine.request_at(NewReservation::seats("f", "f@example.com", 2, true), 0).await);
    assert!(matches!(err, EngineError::Store(StoreError::Unavailable(_))));
    let waiting = store.list().await.unwrap();
    assert_eq!(waiting.len(), 1);
    let r = waiting[0].clone();
    assert_eq!(r.status, Status::Waitlisted);

    let err = assert_err!(engine.run_cycle_at(1).await);
    assert!(matches!(err, EngineError::Store(StoreError::Unavailable(_))));
    let stored = store.get(r.id).await.unwrap().unwrap();
    assert_eq!(stored.status, Status::Waitlisted);
    assert!(stored.seats.is_empty());
    assert!(stored.notes.is_empty());

    // Aging writes fail the same way without flipping anything.
    let err = assert_err!(engine.run_cycle_at(11 * MINUTE_MS).await);
    assert!(matches!(err, EngineError::Store(_)));
    assert!(store.get(r.id).await.unwrap().unwrap().together);

    store.set_down(false);
    let report = assert_ok!(engine.run_cycle_at(2).await);
    assert_eq!(report.adjacent, 1);
    let seated = store.get(r.id).await.unwrap().unwrap();
    assert_eq!(seated.assigned_seats().collect::<Vec<_>>(), vec![Seat::M, Seat::J]);
}

#[tokio::test]
async fn lifecycle_write_failure_is_returned() {
    let store = Arc::new(FlakyStore::open("flaky_lifecycle.wal"));
    let engine = new_engine(store.clone());
    let r = assert_ok!(engine.request_at(NewReservation::console("c", "c@example.com", None), 0).await);
    assert_eq!(r.status, Status::Active);

    store.set_down(true);
    assert_err!(engine.complete_at(r.id, 1).await);
    assert_err!(engine.cancel_at(r.id, 1).await);
    assert_eq!(store.get(r.id).await.unwrap().unwrap().status, Status::Active);
}

// ── Reservations that move on mid-cycle ──────────────────────

#[tokio::test]
async fn vanished_flexible_party_returns_its_seats() {
    let store = Arc::new(VanishingStore::open("vanish_flexible.wal"));
    let engine = new_engine(store.clone());
    store.inner.insert(holding_all_but(&[C, B, A], 0)).await.unwrap();
    let gone = doc(2, false, 1);
    let next = doc(3, false, 2);
    store.inner.insert(gone.clone()).await.unwrap();
    store.inner.insert(next.clone()).await.unwrap();
    store.doom(gone.id);

    // `gone` is offered C, B first; once it vanishes those seats go to `next`.
    let report = assert_ok!(engine.run_cycle_at(3).await);
    assert_eq!(report.flexible, 1);
    assert!(store.get(gone.id).await.unwrap().is_none());
    let seated = store.get(next.id).await.unwrap().unwrap();
    assert_eq!(seated.status, Status::Active);
    assert_eq!(seated.assigned_seats().collect::<Vec<_>>(), vec![C, B, A]);
}

#[tokio::test]
async fn vanished_adjacent_party_is_skipped() {
    let store = Arc::new(VanishingStore::open("vanish_adjacent.wal"));
    let engine = new_engine(store.clone());
    store.inner.insert(holding_all_but(&[D, C], 0)).await.unwrap();
    let gone = doc(2, true, 1);
    let next = doc(2, true, 2);
    store.inner.insert(gone.clone()).await.unwrap();
    store.inner.insert(next.clone()).await.unwrap();
    store.doom(gone.id);

    let report = assert_ok!(engine.run_cycle_at(3).await);
    assert_eq!(report.adjacent, 1);
    let seated = store.get(next.id).await.unwrap().unwrap();
    assert_eq!(seated.assigned_seats().collect::<Vec<_>>(), vec![D, C]);
}

#[tokio::test]
async fn vanished_party_is_skipped_by_aging() {
    let store = Arc::new(VanishingStore::open("vanish_aging.wal"));
    let engine = new_engine(store.clone());
    store.inner.insert(holding_all_but(&[], 0)).await.unwrap();
    let gone = doc(2, true, 1);
    let next = doc(2, true, 2);
    store.inner.insert(gone.clone()).await.unwrap();
    store.inner.insert(next.clone()).await.unwrap();
    store.doom(gone.id);

    let report = assert_ok!(engine.run_cycle_at(20 * MINUTE_MS).await);
    assert_eq!(report.aged, 1);
    assert!(store.get(gone.id).await.unwrap().is_none());
    let aged = store.get(next.id).await.unwrap().unwrap();
    assert!(!aged.together);
    assert_eq!(aged.status, Status::Waitlisted);
}

// ── Notifications ────────────────────────────────────────────

struct Recording(mpsc::UnboundedSender<ActivationNotice>);

#[async_trait]
impl Notifier for Recording {
    async fn notify(&self, notice: &ActivationNotice) -> Result<(), NotifyError> {
        self.0.send(notice.clone())?;
        Ok(())
    }
}

#[tokio::test]
async fn dispatcher_delivers_activation_notices() {
    let store = Arc::new(LedgerStore::open(wal_path("dispatch.wal")).unwrap());
    let hub = Arc::new(NotifyHub::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let dispatcher = spawn_dispatcher(&hub, Arc::new(Recording(tx)));
    let engine = Engine::new(EngineConfig::default(), store, hub);

    let seat = engine
        .request_at(NewReservation::seats("s", "s@example.com", 3, true), 0)
        .await
        .unwrap();
    let slot = engine
        .request_at(NewReservation::console("c", "c@example.com", Some("ps5")), 1)
        .await
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.reservation_id, seat.id);
    assert_eq!(first.assignment, Assignment::Seats(vec![Seat::M, Seat::J, Seat::I]));

    let second = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(second.reservation_id, slot.id);
    assert_eq!(second.kind, ResourceKind::Slot);
    assert_eq!(second.assignment, Assignment::Slot(Some("ps5".into())));

    dispatcher.abort();
}
