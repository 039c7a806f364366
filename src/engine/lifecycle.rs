use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::occupancy::Occupancy;
use super::{now_ms, Engine, EngineError};

impl Engine {
    /// Accept a request onto the waitlist, then run a cycle so it can be seated
    /// straight away. Returns the reservation as it stands after the cycle.
    ///
    /// If the cycle fails the request stays waitlisted and the cycle's error is
    /// returned; the next trigger retries it.
    pub async fn request(&self, req: NewReservation) -> Result<Reservation, EngineError> {
        self.request_at(req, now_ms()).await
    }

    pub async fn request_at(&self, req: NewReservation, now: Ms) -> Result<Reservation, EngineError> {
        let reservation = self.validate(req, now)?;
        if self.store.open_count().await? >= MAX_OPEN_RESERVATIONS {
            return Err(EngineError::LimitExceeded("too many open reservations"));
        }
        let id = reservation.id;
        let kind = reservation.kind;
        self.store.insert(reservation.clone()).await?;
        info!(reservation = %id, %kind, party = reservation.party_size, "waitlisted");
        metrics::counter!(crate::observability::REQUESTS_TOTAL, "kind" => kind_label(kind)).increment(1);

        self.settle(now).await?;
        Ok(self.store.get(id).await?.unwrap_or(reservation))
    }

    /// Active → completed, freeing its seats or slot.
    pub async fn complete(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.complete_at(id, now_ms()).await
    }

    pub async fn complete_at(&self, id: Ulid, now: Ms) -> Result<Reservation, EngineError> {
        let done = self.store.complete(id).await?;
        info!(reservation = %id, "completed");
        self.settle(now).await?;
        Ok(done)
    }

    /// Remove a reservation at any status.
    pub async fn cancel(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.cancel_at(id, now_ms()).await
    }

    pub async fn cancel_at(&self, id: Ulid, now: Ms) -> Result<Reservation, EngineError> {
        let removed = self.store.delete(id).await?;
        info!(reservation = %id, status = ?removed.status, "cancelled");
        self.settle(now).await?;
        Ok(removed)
    }

    /// Reclamation sweep: delete active and completed reservations that expired
    /// at or before `now`, then re-run allocation if a seat or slot was freed.
    pub async fn sweep_expired(&self, now: Ms) -> Result<usize, EngineError> {
        let reclaimed = self.store.delete_expired(now).await?;
        if reclaimed.is_empty() {
            return Ok(0);
        }
        for r in &reclaimed {
            info!(reservation = %r.id, kind = %r.kind, status = ?r.status, "reclaimed expired reservation");
        }
        metrics::counter!(crate::observability::RECLAIMED_TOTAL).increment(reclaimed.len() as u64);
        if reclaimed.iter().any(|r| r.status == Status::Active) {
            self.settle(now).await?;
        }
        Ok(reclaimed.len())
    }

    pub async fn get(&self, id: Ulid) -> Result<Option<Reservation>, EngineError> {
        Ok(self.store.get(id).await?)
    }

    /// Everyone still waiting, oldest first.
    pub async fn waitlist(&self) -> Result<Vec<Reservation>, EngineError> {
        let mut docs = self.store.list().await?;
        docs.retain(|r| r.status == Status::Waitlisted);
        Ok(docs)
    }

    /// Every seat in canonical order with its current occupant.
    pub async fn seat_map(&self, now: Ms) -> Result<Vec<SeatStatus>, EngineError> {
        let active = self.store.active(ResourceKind::Seat, now).await?;
        let occupancy = Occupancy::resolve(&active);
        Ok(self
            .config
            .topology
            .canonical_order()
            .iter()
            .map(|&seat| SeatStatus {
                seat,
                occupant: occupancy.occupant(seat),
                restricted: self.config.topology.is_restricted(seat),
            })
            .collect())
    }

    /// Follow-up cycle after a persisted lifecycle change. Its failure goes
    /// back to the caller; the change itself stays.
    async fn settle(&self, now: Ms) -> Result<(), EngineError> {
        self.run_cycle_at(now).await.map(|_| ())
    }

    fn validate(&self, req: NewReservation, now: Ms) -> Result<Reservation, EngineError> {
        let name = req.name.trim().to_string();
        if name.is_empty() {
            return Err(EngineError::InvalidRequest("name is required"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("name too long"));
        }
        let contact = req.contact.trim().to_string();
        if contact.is_empty() {
            return Err(EngineError::InvalidRequest("contact is required"));
        }
        if contact.len() > MAX_CONTACT_LEN {
            return Err(EngineError::LimitExceeded("contact too long"));
        }
        let activity = non_blank(req.activity);
        if activity.as_ref().is_some_and(|a| a.len() > MAX_ACTIVITY_LEN) {
            return Err(EngineError::LimitExceeded("activity too long"));
        }
        let slot_subtype = non_blank(req.slot_subtype);
        if slot_subtype.as_ref().is_some_and(|s| s.len() > MAX_SUBTYPE_LEN) {
            return Err(EngineError::LimitExceeded("slot subtype too long"));
        }

        // Slots are single, position-free units; seat-only fields don't apply.
        let (party_size, together, activity, slot_subtype) = match req.kind {
            ResourceKind::Seat => {
                if !(MIN_PARTY_SIZE..=MAX_PARTY_SIZE).contains(&req.party_size) {
                    return Err(EngineError::InvalidRequest("party size must be 1 to 4"));
                }
                (req.party_size, req.together, activity, None)
            }
            ResourceKind::Slot => (1, false, None, slot_subtype),
        };

        let restricted = activity
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case(&self.config.restricted_game));
        if restricted && party_size as usize > self.config.topology.restricted().len() {
            return Err(EngineError::InvalidRequest(
                "party is larger than the seats available for that game",
            ));
        }

        if req.members.len() > party_size as usize {
            return Err(EngineError::InvalidRequest("more members than party size"));
        }
        if req.members.iter().any(|m| m.len() > MAX_MEMBER_ID_LEN) {
            return Err(EngineError::LimitExceeded("member id too long"));
        }

        Ok(Reservation {
            id: Ulid::new(),
            name,
            contact,
            kind: req.kind,
            party_size,
            together,
            activity,
            slot_subtype,
            status: Status::Waitlisted,
            created_at: now,
            seats: Vec::new(),
            activated_at: None,
            expires_at: None,
            notes: Vec::new(),
            members: req.members,
        })
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn kind_label(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Seat => "seat",
        ResourceKind::Slot => "slot",
    }
}

