use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::MAX_NOTES_PER_RESERVATION;
use crate::topology::Seat;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// What a reservation asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// One or more numbered PC seats.
    Seat,
    /// One unit of console capacity, not tied to a position.
    Slot,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Seat => f.write_str("seat"),
            ResourceKind::Slot => f.write_str("slot"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Waitlisted,
    Active,
    Completed,
}

/// Which allocator activated a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationPath {
    Adjacent,
    Flexible,
    Console,
}

impl AllocationPath {
    pub fn label(&self) -> &'static str {
        match self {
            AllocationPath::Adjacent => "adjacent",
            AllocationPath::Flexible => "flexible",
            AllocationPath::Console => "console",
        }
    }
}

/// The unit of demand and allocation, stored as a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub name: String,
    pub contact: String,
    pub kind: ResourceKind,
    /// 1–4 for seats, always 1 for slots.
    pub party_size: u8,
    /// Seat parties only: wants one connected block.
    pub together: bool,
    pub activity: Option<String>,
    /// Slot parties only; carried through to notifications.
    pub slot_subtype: Option<String>,
    pub status: Status,
    pub created_at: Ms,
    /// Seat labels as persisted. Entries that are not a known seat are ignored
    /// by [`Reservation::assigned_seats`].
    pub seats: Vec<String>,
    pub activated_at: Option<Ms>,
    pub expires_at: Option<Ms>,
    /// Audit trail of allocation decisions.
    pub notes: Vec<String>,
    pub members: Vec<String>,
}

impl Reservation {
    /// Assigned seats that parse as known seat ids.
    pub fn assigned_seats(&self) -> impl Iterator<Item = Seat> + '_ {
        self.seats.iter().filter_map(|s| s.parse().ok())
    }

    /// Active and not yet past its expiration.
    pub fn is_live(&self, now: Ms) -> bool {
        self.status == Status::Active && self.expires_at.is_some_and(|exp| exp > now)
    }

    /// Active or completed with its session over. Waitlisted rows never expire.
    pub fn is_expired(&self, now: Ms) -> bool {
        self.status != Status::Waitlisted && self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// True if the party's preferred activity is `game` (case-insensitive).
    pub fn prefers(&self, game: &str) -> bool {
        self.activity
            .as_deref()
            .is_some_and(|a| a.trim().eq_ignore_ascii_case(game))
    }

    pub fn push_note(&mut self, note: String) {
        if self.notes.len() >= MAX_NOTES_PER_RESERVATION {
            self.notes.remove(0);
        }
        self.notes.push(note);
    }
}

/// An intake request. Validated and turned into a waitlisted [`Reservation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReservation {
    pub name: String,
    pub contact: String,
    pub kind: ResourceKind,
    pub party_size: u8,
    pub together: bool,
    pub activity: Option<String>,
    pub slot_subtype: Option<String>,
    pub members: Vec<String>,
}

impl NewReservation {
    pub fn seats(name: &str, contact: &str, party_size: u8, together: bool) -> Self {
        Self {
            name: name.to_string(),
            contact: contact.to_string(),
            kind: ResourceKind::Seat,
            party_size,
            together,
            activity: None,
            slot_subtype: None,
            members: Vec::new(),
        }
    }

    pub fn console(name: &str, contact: &str, subtype: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            contact: contact.to_string(),
            kind: ResourceKind::Slot,
            party_size: 1,
            together: false,
            activity: None,
            slot_subtype: subtype.map(str::to_string),
            members: Vec::new(),
        }
    }

    pub fn with_activity(mut self, activity: &str) -> Self {
        self.activity = Some(activity.to_string());
        self
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationActivated {
        id: Ulid,
        seats: Vec<String>,
        activated_at: Ms,
        expires_at: Ms,
        note: String,
    },
    TogethernessWaived {
        id: Ulid,
        note: String,
    },
    ReservationCompleted {
        id: Ulid,
    },
    ReservationDeleted {
        id: Ulid,
    },
}

impl Event {
    pub fn reservation_id(&self) -> Ulid {
        match self {
            Event::ReservationCreated { reservation } => reservation.id,
            Event::ReservationActivated { id, .. }
            | Event::TogethernessWaived { id, .. }
            | Event::ReservationCompleted { id }
            | Event::ReservationDeleted { id } => *id,
        }
    }
}

/// Apply a non-delete event to a reservation (no locking; caller holds the lock).
pub fn apply_event(r: &mut Reservation, event: &Event) {
    match event {
        Event::ReservationActivated {
            seats,
            activated_at,
            expires_at,
            note,
            ..
        } => {
            r.status = Status::Active;
            r.seats = seats.clone();
            r.activated_at = Some(*activated_at);
            r.expires_at = Some(*expires_at);
            r.push_note(note.clone());
        }
        Event::TogethernessWaived { note, .. } => {
            r.together = false;
            r.push_note(note.clone());
        }
        Event::ReservationCompleted { .. } => {
            r.status = Status::Completed;
        }
        // Created/Deleted are handled at the map level, not here
        Event::ReservationCreated { .. } | Event::ReservationDeleted { .. } => {}
    }
}

// ── Query result types ───────────────────────────────────────────

/// One row of the seat map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeatStatus {
    pub seat: Seat,
    pub occupant: Option<Ulid>,
    pub restricted: bool,
}
