use tracing::info;

use crate::model::*;
use crate::store::{StoreError, WaitlistQuery};

use super::{Engine, EngineError};

impl Engine {
    /// Waive togetherness for parties that have waited past the aging threshold,
    /// making them eligible for flexible seating in the same pass. Never flips
    /// a reservation back. Returns how many were waived.
    pub(super) async fn age_waitlist(&self, now: Ms) -> Result<u32, EngineError> {
        let threshold = self.config.aging_threshold_ms;
        let waiting = self.store.waitlisted(WaitlistQuery::seats(true)).await?;
        let mut aged = 0;

        for r in waiting.iter().filter(|r| now.saturating_sub(r.created_at) > threshold) {
            let waited = now.saturating_sub(r.created_at) / MINUTE_MS;
            let note = format!("waited {waited} min for adjacent seats; any free seats accepted");
            match self.store.waive_togetherness(r.id, note).await {
                Ok(_) => {
                    info!(reservation = %r.id, waited_min = waited, "togetherness waived");
                    metrics::counter!(crate::observability::AGED_TOTAL).increment(1);
                    aged += 1;
                }
                Err(e @ (StoreError::NotFound(_) | StoreError::NotWaitlisted(_))) => {
                    tracing::warn!(reservation = %r.id, "skip aging: {e}");
                    metrics::counter!(crate::observability::STALE_SKIPS_TOTAL).increment(1);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(aged)
    }
}
