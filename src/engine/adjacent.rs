use std::cmp::Reverse;

use crate::model::*;
use crate::store::WaitlistQuery;
use crate::topology::Seat;

use super::occupancy::{free_blocks, Occupancy};
use super::{Engine, EngineError};

/// Best-fit block for a party of `party` seats.
///
/// A block qualifies if it holds at least `party` seats and its leading
/// `party` seats are all `usable`. The smallest qualifying block wins; ties go
/// to the earlier block. Returns the leading slice of the winner.
pub fn best_fit<'a>(
    blocks: &'a [Vec<Seat>],
    party: usize,
    usable: impl Fn(Seat) -> bool,
) -> Option<&'a [Seat]> {
    if party == 0 {
        return None;
    }
    blocks
        .iter()
        .filter(|b| b.len() >= party && b[..party].iter().all(|s| usable(*s)))
        .min_by_key(|b| b.len())
        .map(|b| &b[..party])
}

impl Engine {
    /// Seat at most one togetherness party in a connected block.
    ///
    /// Only the oldest `adjacent_window` waiting parties are considered, tried
    /// largest first then oldest first. Stops at the first success since the
    /// blocks are stale afterwards.
    pub(super) async fn try_adjacent(&self, now: Ms) -> Result<bool, EngineError> {
        let mut candidates = self
            .store
            .waitlisted(WaitlistQuery::seats(true).limit(self.config.adjacent_window))
            .await?;
        if candidates.is_empty() {
            return Ok(false);
        }
        candidates.sort_by_key(|r| (Reverse(r.party_size), r.created_at, r.id));

        let active = self.store.active(ResourceKind::Seat, now).await?;
        let occupancy = Occupancy::resolve(&active);
        let blocks = free_blocks(&self.config.topology, &occupancy);
        if blocks.is_empty() {
            return Ok(false);
        }

        for candidate in &candidates {
            let restricted = self.is_restricted_party(candidate);
            let usable = |seat| !restricted || self.config.topology.is_restricted(seat);
            let Some(seats) = best_fit(&blocks, candidate.party_size as usize, usable) else {
                tracing::debug!(
                    reservation = %candidate.id,
                    party = candidate.party_size,
                    "no block fits"
                );
                continue;
            };
            let note = format!("seated together at {} (adjacent)", seat_list(seats));
            let activated = self
                .activate(candidate, seats, AllocationPath::Adjacent, note, now)
                .await?;
            if activated.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

pub(super) fn seat_list(seats: &[Seat]) -> String {
    seats
        .iter()
        .map(Seat::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
