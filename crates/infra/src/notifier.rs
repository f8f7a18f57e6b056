//! Change Notifier: best-effort fan-out of post-merge snapshots.

use tracing::{debug, warn};

use fleetstats_core::FleetAggregateView;
use fleetstats_events::{AggregateChanged, EventBus, Subscription};

#[derive(Debug, Clone)]
pub struct ChangeNotifier<B> {
    bus: B,
}

impl<B> ChangeNotifier<B>
where
    B: EventBus<AggregateChanged>,
{
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Publish a snapshot. Failures are logged and otherwise ignored; a
    /// committed merge is never undone because nobody heard about it.
    ///
    /// Returns whether the bus accepted the message.
    pub fn announce(&self, view: FleetAggregateView) -> bool {
        let event = AggregateChanged::new(view);
        let event_id = event.event_id;
        let total = event.view.total_vehicles;

        match self.bus.publish(event) {
            Ok(()) => {
                debug!(%event_id, total_vehicles = total, "fleet statistics announced");
                true
            }
            Err(err) => {
                warn!(%event_id, error = ?err, "failed to announce fleet statistics change");
                false
            }
        }
    }

    /// Future announcements only; nothing is replayed.
    pub fn subscribe(&self) -> Subscription<AggregateChanged> {
        self.bus.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetstats_events::InMemoryEventBus;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::Duration;

    /// Bus whose publish always fails.
    struct BrokenBus;

    impl EventBus<AggregateChanged> for BrokenBus {
        type Error = &'static str;

        fn publish(&self, _message: AggregateChanged) -> Result<(), Self::Error> {
            Err("broker down")
        }

        fn subscribe(&self) -> Subscription<AggregateChanged> {
            let (_tx, rx) = mpsc::channel();
            Subscription::new(rx)
        }
    }

    #[test]
    fn subscribers_receive_announced_views() {
        let notifier = ChangeNotifier::new(Arc::new(InMemoryEventBus::new()));
        let sub = notifier.subscribe();

        assert!(notifier.announce(FleetAggregateView::zero()));

        let event = sub.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(event.view, FleetAggregateView::zero());
    }

    #[test]
    fn publish_failures_are_swallowed() {
        let notifier = ChangeNotifier::new(BrokenBus);
        assert!(!notifier.announce(FleetAggregateView::zero()));
    }
}
