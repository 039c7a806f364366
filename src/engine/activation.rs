use tracing::info;

use crate::model::*;
use crate::notify::ActivationNotice;
use crate::store::{Activation, StoreError};
use crate::topology::Seat;

use super::{Engine, EngineError};

impl Engine {
    /// The single waitlisted → active transition shared by every allocator.
    ///
    /// `Ok(None)` means the reservation was deleted or already activated by the
    /// time we got to it; that is logged and skipped, not an error. Storage
    /// failures propagate and abort the cycle with the reservation untouched.
    pub(super) async fn activate(
        &self,
        reservation: &Reservation,
        seats: &[Seat],
        path: AllocationPath,
        note: String,
        now: Ms,
    ) -> Result<Option<Reservation>, EngineError> {
        let activation = Activation {
            seats: seats.iter().map(|s| s.to_string()).collect(),
            activated_at: now,
            expires_at: now.saturating_add(self.config.session_ms),
            note,
        };
        match self.store.activate(reservation.id, activation).await {
            Ok(active) => {
                info!(
                    reservation = %active.id,
                    kind = %active.kind,
                    path = path.label(),
                    seats = ?active.seats,
                    "activated"
                );
                metrics::counter!(crate::observability::ACTIVATIONS_TOTAL, "path" => path.label())
                    .increment(1);
                self.notify.send(ActivationNotice::for_reservation(&active));
                Ok(Some(active))
            }
            Err(e @ (StoreError::NotFound(_) | StoreError::NotWaitlisted(_))) => {
                tracing::warn!(reservation = %reservation.id, "skip activation: {e}");
                metrics::counter!(crate::observability::STALE_SKIPS_TOTAL).increment(1);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
