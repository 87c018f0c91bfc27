use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use gravvy_types::events::DomainEvent;

/// A consumer of domain events. Handlers run synchronously on the publishing
/// thread, which is always a blocking-pool thread.
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn handle(&self, event: &DomainEvent, at: DateTime<Utc>) -> anyhow::Result<()>;
}

/// Fans committed domain events out to the registered handlers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    handlers: Vec<Arc<dyn EventHandler>>,

    /// Observers that only watch the stream (tests, diagnostics)
    broadcast_tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        let (broadcast_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(BusInner {
                handlers,
                broadcast_tx,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Hand an event to every handler in registration order. A failing
    /// handler is logged and skipped; the mutation has already committed.
    pub fn publish(&self, event: DomainEvent, at: DateTime<Utc>) {
        debug!("Publishing {} for video {}", event.name(), event.video_id());
        for handler in &self.inner.handlers {
            if let Err(e) = handler.handle(&event, at) {
                warn!("{} failed on {}: {:#}", handler.name(), event.name(), e);
            }
        }
        let _ = self.inner.broadcast_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Collect(Mutex<Vec<&'static str>>);

    impl EventHandler for Collect {
        fn name(&self) -> &'static str {
            "collect"
        }

        fn handle(&self, event: &DomainEvent, _at: DateTime<Utc>) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(event.name());
            Ok(())
        }
    }

    struct Fail;

    impl EventHandler for Fail {
        fn name(&self) -> &'static str {
            "fail"
        }

        fn handle(&self, _event: &DomainEvent, _at: DateTime<Utc>) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    #[test]
    fn failing_handler_does_not_stop_the_rest() {
        let collect = Arc::new(Collect(Mutex::new(Vec::new())));
        let handlers: Vec<Arc<dyn EventHandler>> = vec![Arc::new(Fail), collect.clone()];
        let bus = EventBus::new(handlers);
        let mut rx = bus.subscribe();

        bus.publish(
            DomainEvent::VideoLiked {
                video_id: 1,
                actor_id: 2,
            },
            Utc::now(),
        );

        assert_eq!(*collect.0.lock().unwrap(), vec!["video_liked"]);
        assert_eq!(rx.try_recv().unwrap().video_id(), 1);
    }
}
