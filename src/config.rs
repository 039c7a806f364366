use crate::model::{MINUTE_MS, Ms};
use crate::topology::Topology;

pub const DEFAULT_CONSOLE_CAPACITY: u32 = 2;
pub const DEFAULT_ADJACENT_WINDOW: usize = 5;
pub const DEFAULT_AGING_THRESHOLD_MS: Ms = 10 * MINUTE_MS;
pub const DEFAULT_SESSION_MS: Ms = 60 * MINUTE_MS;
pub const DEFAULT_MAX_PASSES: u32 = 10;
pub const DEFAULT_RESTRICTED_GAME: &str = "valorant";

/// Longest configurable session or aging threshold: one year.
pub const MAX_DURATION_MS: Ms = 365 * 24 * 60 * MINUTE_MS;

/// Immutable engine configuration, injected at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub topology: Topology,
    /// Parties preferring this game may only sit in the topology's restricted subset.
    pub restricted_game: String,
    /// Total console slots.
    pub console_capacity: u32,
    /// Oldest togetherness requests evaluated per adjacent pass.
    pub adjacent_window: usize,
    /// Waiting time after which togetherness is waived.
    pub aging_threshold_ms: Ms,
    /// Activation → expiration.
    pub session_ms: Ms,
    /// Pass cap per cycle.
    pub max_passes: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            topology: Topology::cafe_floor(),
            restricted_game: DEFAULT_RESTRICTED_GAME.to_string(),
            console_capacity: DEFAULT_CONSOLE_CAPACITY,
            adjacent_window: DEFAULT_ADJACENT_WINDOW,
            aging_threshold_ms: DEFAULT_AGING_THRESHOLD_MS,
            session_ms: DEFAULT_SESSION_MS,
            max_passes: DEFAULT_MAX_PASSES,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `SEATFLOW_*` environment variables. Absent or
    /// unparseable values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());
        let minutes = |key: &str| {
            parsed(key)
                .and_then(|m| Ms::try_from(m).ok())
                .and_then(|m| m.checked_mul(MINUTE_MS))
                .filter(|ms| *ms <= MAX_DURATION_MS)
        };
        let d = Self::default();
        Self {
            topology: d.topology,
            restricted_game: lookup("SEATFLOW_RESTRICTED_GAME")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(d.restricted_game),
            console_capacity: parsed("SEATFLOW_CONSOLE_CAPACITY")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(d.console_capacity),
            adjacent_window: parsed("SEATFLOW_ADJACENT_WINDOW")
                .map(|v| v as usize)
                .filter(|v| *v > 0)
                .unwrap_or(d.adjacent_window),
            aging_threshold_ms: minutes("SEATFLOW_AGING_MINUTES").unwrap_or(d.aging_threshold_ms),
            session_ms: minutes("SEATFLOW_SESSION_MINUTES")
                .filter(|ms| *ms > 0)
                .unwrap_or(d.session_ms),
            max_passes: parsed("SEATFLOW_MAX_PASSES")
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(d.max_passes),
        }
    }
}
