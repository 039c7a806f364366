use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A physical PC position. Variant order is the canonical seat order; `Ord`
/// follows it, so any `BTreeSet<Seat>` iterates canonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Seat {
    M,
    L,
    K,
    J,
    I,
    H,
    G,
    F,
    E,
    D,
    C,
    B,
    A,
    /// Overflow seat, not part of any row.
    Side,
}

impl Seat {
    pub const COUNT: usize = 14;

    /// Every seat, in canonical order.
    pub const ALL: [Seat; Seat::COUNT] = [
        Seat::M,
        Seat::L,
        Seat::K,
        Seat::J,
        Seat::I,
        Seat::H,
        Seat::G,
        Seat::F,
        Seat::E,
        Seat::D,
        Seat::C,
        Seat::B,
        Seat::A,
        Seat::Side,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Seat::M => "M",
            Seat::L => "L",
            Seat::K => "K",
            Seat::J => "J",
            Seat::I => "I",
            Seat::H => "H",
            Seat::G => "G",
            Seat::F => "F",
            Seat::E => "E",
            Seat::D => "D",
            Seat::C => "C",
            Seat::B => "B",
            Seat::A => "A",
            Seat::Side => "Side",
        }
    }
}

impl fmt::Display for Seat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSeat(pub String);

impl fmt::Display for UnknownSeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown seat: {:?}", self.0)
    }
}

impl std::error::Error for UnknownSeat {}

impl FromStr for Seat {
    type Err = UnknownSeat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Seat::ALL
            .iter()
            .copied()
            .find(|seat| seat.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownSeat(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    SelfLoop(Seat),
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyError::SelfLoop(seat) => write!(f, "seat {seat} cannot be adjacent to itself"),
        }
    }
}

impl std::error::Error for TopologyError {}

/// Static adjacency graph over the seats plus the restricted-game subset.
/// Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    adjacency: BTreeMap<Seat, BTreeSet<Seat>>,
    restricted: BTreeSet<Seat>,
}

impl Topology {
    /// Build from undirected edges. Duplicate edges collapse; self-loops are rejected.
    pub fn new(
        edges: &[(Seat, Seat)],
        restricted: impl IntoIterator<Item = Seat>,
    ) -> Result<Self, TopologyError> {
        let mut adjacency: BTreeMap<Seat, BTreeSet<Seat>> =
            Seat::ALL.iter().map(|s| (*s, BTreeSet::new())).collect();
        for &(a, b) in edges {
            if a == b {
                return Err(TopologyError::SelfLoop(a));
            }
            adjacency.entry(a).or_default().insert(b);
            adjacency.entry(b).or_default().insert(a);
        }
        Ok(Self {
            adjacency,
            restricted: restricted.into_iter().collect(),
        })
    }

    /// The default floor: three rows laid out along canonical order plus the
    /// isolated overflow seat. The stage pod is reserved for the restricted game.
    ///
    /// ```text
    /// stage:  M - J - I - H
    /// window: L - K - G - F - E
    /// back:   D - C - B - A
    /// Side
    /// ```
    pub fn cafe_floor() -> Self {
        use Seat::*;
        let edges = [
            (M, J),
            (J, I),
            (I, H),
            (L, K),
            (K, G),
            (G, F),
            (F, E),
            (D, C),
            (C, B),
            (B, A),
        ];
        Self::new(&edges, [M, J, I, H]).expect("static floor layout has no self-loops")
    }

    /// Seats sharing an edge with `seat`, in canonical order.
    pub fn neighbors(&self, seat: Seat) -> impl Iterator<Item = Seat> + '_ {
        self.adjacency.get(&seat).into_iter().flatten().copied()
    }

    pub fn is_adjacent(&self, a: Seat, b: Seat) -> bool {
        self.adjacency.get(&a).is_some_and(|n| n.contains(&b))
    }

    /// Canonical total order over all seats.
    pub fn canonical_order(&self) -> &'static [Seat] {
        &Seat::ALL
    }

    pub fn restricted(&self) -> &BTreeSet<Seat> {
        &self.restricted
    }

    pub fn is_restricted(&self, seat: Seat) -> bool {
        self.restricted.contains(&seat)
    }

    /// True if `seats` form a single connected subgraph.
    pub fn is_connected(&self, seats: &[Seat]) -> bool {
        let Some(&first) = seats.first() else {
            return true;
        };
        let wanted: BTreeSet<Seat> = seats.iter().copied().collect();
        let mut seen = BTreeSet::from([first]);
        let mut stack = vec![first];
        while let Some(seat) = stack.pop() {
            for n in self.neighbors(seat) {
                if wanted.contains(&n) && seen.insert(n) {
                    stack.push(n);
                }
            }
        }
        seen.len() == wanted.len()
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::cafe_floor()
    }
}
