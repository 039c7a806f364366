use std::collections::{BTreeMap, BTreeSet, VecDeque};

use ulid::Ulid;

use crate::model::Reservation;
use crate::topology::{Seat, Topology};

/// Which reservation holds each seat, derived from the active seat reservations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Occupancy {
    occupant: BTreeMap<Seat, Ulid>,
}

impl Occupancy {
    /// Build from live seat reservations. Unknown seat labels are skipped; a
    /// seat claimed twice keeps its first claimant.
    pub fn resolve(active: &[Reservation]) -> Self {
        let mut occupant = BTreeMap::new();
        for r in active {
            for label in &r.seats {
                let seat = match label.parse::<Seat>() {
                    Ok(seat) => seat,
                    Err(e) => {
                        tracing::debug!(reservation = %r.id, "{e}; ignoring");
                        continue;
                    }
                };
                if let Some(holder) = occupant.get(&seat) {
                    tracing::warn!(
                        seat = %seat,
                        holder = %holder,
                        reservation = %r.id,
                        "seat claimed by two active reservations"
                    );
                    continue;
                }
                occupant.insert(seat, r.id);
            }
        }
        Self { occupant }
    }

    pub fn occupant(&self, seat: Seat) -> Option<Ulid> {
        self.occupant.get(&seat).copied()
    }

    pub fn is_free(&self, seat: Seat) -> bool {
        !self.occupant.contains_key(&seat)
    }

    /// Unoccupied seats in canonical order.
    pub fn free_seats(&self) -> Vec<Seat> {
        Seat::ALL.into_iter().filter(|s| self.is_free(*s)).collect()
    }
}

/// Partition the free seats into maximal connected blocks.
///
/// Breadth-first over the subgraph induced by free seats. Each block comes back
/// in canonical order (not discovery order); blocks are listed by their first
/// canonical seat, which carries no size or position meaning.
pub fn free_blocks(topology: &Topology, occupancy: &Occupancy) -> Vec<Vec<Seat>> {
    let mut seen = BTreeSet::new();
    let mut blocks = Vec::new();
    for &seed in topology.canonical_order() {
        if !occupancy.is_free(seed) || !seen.insert(seed) {
            continue;
        }
        let mut block = vec![seed];
        let mut queue = VecDeque::from([seed]);
        while let Some(seat) = queue.pop_front() {
            for next in topology.neighbors(seat) {
                if occupancy.is_free(next) && seen.insert(next) {
                    block.push(next);
                    queue.push_back(next);
                }
            }
        }
        block.sort();
        blocks.push(block);
    }
    blocks
}
