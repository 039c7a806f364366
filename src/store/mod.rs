//! The document store the engine reads and mutates.
//!
//! [`ReservationStore`] is the seam: the engine only ever talks to the trait.
//! [`LedgerStore`] is the in-process implementation backed by the WAL.

mod ledger;

pub use ledger::LedgerStore;

use std::fmt;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The reservation exists but is no longer waiting (or no longer wants togetherness).
    NotWaitlisted(Ulid),
    NotActive(Ulid),
    /// Durable write or read failed; nothing was applied.
    Unavailable(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "reservation not found: {id}"),
            StoreError::AlreadyExists(id) => write!(f, "reservation already exists: {id}"),
            StoreError::NotWaitlisted(id) => write!(f, "reservation {id} is not waitlisted"),
            StoreError::NotActive(id) => write!(f, "reservation {id} is not active"),
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Filter for waitlist queries. Results are always oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitlistQuery {
    pub kind: ResourceKind,
    /// `None` matches both.
    pub together: Option<bool>,
    pub limit: Option<usize>,
}

impl WaitlistQuery {
    pub fn seats(together: bool) -> Self {
        Self {
            kind: ResourceKind::Seat,
            together: Some(together),
            limit: None,
        }
    }

    pub fn slots() -> Self {
        Self {
            kind: ResourceKind::Slot,
            together: None,
            limit: None,
        }
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn matches(&self, r: &Reservation) -> bool {
        r.status == Status::Waitlisted
            && r.kind == self.kind
            && self.together.is_none_or(|t| r.together == t)
    }
}

/// Fields written by a waitlisted → active transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    /// Empty for slots.
    pub seats: Vec<String>,
    pub activated_at: Ms,
    pub expires_at: Ms,
    pub note: String,
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn insert(&self, reservation: Reservation) -> Result<(), StoreError>;

    async fn get(&self, id: Ulid) -> Result<Option<Reservation>, StoreError>;

    /// Every stored reservation, oldest first.
    async fn list(&self) -> Result<Vec<Reservation>, StoreError>;

    /// Active reservations of `kind` whose expiration is after `now`.
    async fn active(&self, kind: ResourceKind, now: Ms) -> Result<Vec<Reservation>, StoreError>;

    async fn count_active(&self, kind: ResourceKind, now: Ms) -> Result<usize, StoreError> {
        Ok(self.active(kind, now).await?.len())
    }

    async fn waitlisted(&self, query: WaitlistQuery) -> Result<Vec<Reservation>, StoreError>;

    /// Waitlisted → active. Fails with `NotWaitlisted`/`NotFound` instead of
    /// overwriting a reservation that moved on or was deleted.
    async fn activate(&self, id: Ulid, activation: Activation) -> Result<Reservation, StoreError>;

    /// Flip togetherness off on a waitlisted reservation and record why.
    async fn waive_togetherness(&self, id: Ulid, note: String) -> Result<Reservation, StoreError>;

    /// Active → completed.
    async fn complete(&self, id: Ulid) -> Result<Reservation, StoreError>;

    async fn delete(&self, id: Ulid) -> Result<Reservation, StoreError>;

    /// Remove active and completed reservations whose expiration is at or
    /// before `now`.
    async fn delete_expired(&self, now: Ms) -> Result<Vec<Reservation>, StoreError>;

    /// Waitlisted + active reservations.
    async fn open_count(&self) -> Result<usize, StoreError>;
}
