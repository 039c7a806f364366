use crate::model::*;
use crate::store::WaitlistQuery;

use super::{Engine, EngineError};

impl Engine {
    /// Activate the oldest waiting console party if a slot is free.
    /// One per call; the cycle loop fills any remaining slots.
    pub(super) async fn try_console(&self, now: Ms) -> Result<bool, EngineError> {
        let capacity = self.config.console_capacity as usize;
        let in_use = self.store.count_active(ResourceKind::Slot, now).await?;
        if in_use >= capacity {
            return Ok(false);
        }
        let Some(next) = self
            .store
            .waitlisted(WaitlistQuery::slots().limit(1))
            .await?
            .into_iter()
            .next()
        else {
            return Ok(false);
        };

        let slot = next.slot_subtype.as_deref().unwrap_or("any");
        let note = format!("console slot {} of {capacity} ({slot})", in_use + 1);
        let activated = self
            .activate(&next, &[], AllocationPath::Console, note, now)
            .await?;
        Ok(activated.is_some())
    }
}
