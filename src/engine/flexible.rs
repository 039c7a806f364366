use crate::model::*;
use crate::store::WaitlistQuery;
use crate::topology::Seat;

use super::adjacent::seat_list;
use super::occupancy::Occupancy;
use super::{Engine, EngineError};

/// Take the first `party` usable seats (in pool order) out of `pool`.
/// Leaves the pool untouched if there aren't enough.
pub fn take_seats(pool: &mut Vec<Seat>, party: usize, usable: impl Fn(Seat) -> bool) -> Option<Vec<Seat>> {
    if party == 0 {
        return None;
    }
    let picked: Vec<Seat> = pool.iter().copied().filter(|s| usable(*s)).take(party).collect();
    if picked.len() < party {
        return None;
    }
    pool.retain(|s| !picked.contains(s));
    Some(picked)
}

impl Engine {
    /// Seat as many flexible parties as the free seats allow, oldest first.
    /// Adjacency is ignored; one pool of free seats is drained across the
    /// whole candidate list in a single pass. Returns how many were seated.
    pub(super) async fn try_flexible(&self, now: Ms) -> Result<u32, EngineError> {
        let candidates = self.store.waitlisted(WaitlistQuery::seats(false)).await?;
        if candidates.is_empty() {
            return Ok(0);
        }

        let active = self.store.active(ResourceKind::Seat, now).await?;
        let mut pool = Occupancy::resolve(&active).free_seats();
        let mut seated = 0;

        for candidate in &candidates {
            if pool.is_empty() {
                break;
            }
            let restricted = self.is_restricted_party(candidate);
            let usable = |seat| !restricted || self.config.topology.is_restricted(seat);
            let Some(seats) = take_seats(&mut pool, candidate.party_size as usize, usable) else {
                continue;
            };
            let note = format!("seated at {} (flexible)", seat_list(&seats));
            match self
                .activate(candidate, &seats, AllocationPath::Flexible, note, now)
                .await?
            {
                Some(_) => seated += 1,
                None => {
                    // Candidate went away; its seats are still free.
                    pool.extend(seats);
                    pool.sort();
                }
            }
        }
        Ok(seated)
    }
}
