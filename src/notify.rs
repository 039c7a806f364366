use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use ulid::Ulid;

use crate::model::{Reservation, ResourceKind};
use crate::topology::Seat;

const CHANNEL_CAPACITY: usize = 256;

/// What the party was given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Assignment {
    Seats(Vec<Seat>),
    /// Console slot, with the requested subtype if any.
    Slot(Option<String>),
}

/// Outbound message for one activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationNotice {
    pub reservation_id: Ulid,
    pub contact: String,
    pub kind: ResourceKind,
    pub party_name: String,
    pub assignment: Assignment,
}

impl ActivationNotice {
    pub fn for_reservation(r: &Reservation) -> Self {
        let assignment = match r.kind {
            ResourceKind::Seat => Assignment::Seats(r.assigned_seats().collect()),
            ResourceKind::Slot => Assignment::Slot(r.slot_subtype.clone()),
        };
        Self {
            reservation_id: r.id,
            contact: r.contact.clone(),
            kind: r.kind,
            party_name: r.name.clone(),
            assignment,
        }
    }
}

/// Outbound queue between the allocation cycle and whoever delivers notices.
/// Publishing never waits on a receiver.
pub struct NotifyHub {
    sender: broadcast::Sender<ActivationNotice>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActivationNotice> {
        self.sender.subscribe()
    }

    /// Publish a notice. No-op if nobody is listening.
    pub fn send(&self, notice: ActivationNotice) {
        let _ = self.sender.send(notice);
    }
}

pub type NotifyError = Box<dyn std::error::Error + Send + Sync>;

/// Delivers activation notices (email, SMS, webhook...).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &ActivationNotice) -> Result<(), NotifyError>;
}

/// Writes each notice to the log as JSON.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &ActivationNotice) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(notice)?;
        tracing::info!(contact = %notice.contact, "notify {payload}");
        Ok(())
    }
}

/// Consume the hub and hand each notice to `notifier`. Failures are logged and
/// counted; they never reach the allocation cycle.
pub fn spawn_dispatcher(hub: &NotifyHub, notifier: Arc<dyn Notifier>) -> JoinHandle<()> {
    let mut rx = hub.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(notice) => {
                    if let Err(e) = notifier.notify(&notice).await {
                        tracing::warn!(
                            reservation = %notice.reservation_id,
                            "notification failed: {e}"
                        );
                        metrics::counter!(crate::observability::NOTIFY_FAILURES_TOTAL)
                            .increment(1);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("notification dispatcher lagged, {missed} notices dropped");
                    metrics::counter!(crate::observability::NOTIFY_FAILURES_TOTAL)
                        .increment(missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn notice(name: &str) -> ActivationNotice {
        ActivationNotice {
            reservation_id: Ulid::new(),
            contact: format!("{name}@example.com"),
            kind: ResourceKind::Seat,
            party_name: name.into(),
            assignment: Assignment::Seats(vec![Seat::M, Seat::J]),
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe();
        let n = notice("ada");
        hub.send(n.clone());
        assert_eq!(rx.recv().await.unwrap(), n);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(notice("nobody"));
    }

    struct Flaky {
        calls: AtomicUsize,
        delivered: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl Notifier for Flaky {
        async fn notify(&self, notice: &ActivationNotice) -> Result<(), NotifyError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err("smtp down".into());
            }
            let _ = self.delivered.send(notice.party_name.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatcher_survives_notifier_failure() {
        let hub = NotifyHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            delivered: tx,
        });
        let handle = spawn_dispatcher(&hub, notifier.clone());

        hub.send(notice("first"));
        hub.send(notice("second"));

        assert_eq!(rx.recv().await.unwrap(), "second");
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 2);
        handle.abort();
    }

    #[test]
    fn slot_notice_carries_subtype() {
        let r = Reservation {
            id: Ulid::new(),
            name: "Lin".into(),
            contact: "lin@example.com".into(),
            kind: ResourceKind::Slot,
            party_size: 1,
            together: false,
            activity: None,
            slot_subtype: Some("ps5".into()),
            status: crate::model::Status::Active,
            created_at: 0,
            seats: Vec::new(),
            activated_at: Some(1),
            expires_at: Some(2),
            notes: Vec::new(),
            members: Vec::new(),
        };
        let n = ActivationNotice::for_reservation(&r);
        assert_eq!(n.assignment, Assignment::Slot(Some("ps5".into())));
        assert_eq!(n.party_name, "Lin");
    }

    #[test]
    fn notice_renders_as_json() {
        let json = serde_json::to_value(notice("ada")).unwrap();
        assert_eq!(json["party_name"], "ada");
        assert_eq!(json["assignment"]["Seats"], serde_json::json!(["M", "J"]));
    }
}
