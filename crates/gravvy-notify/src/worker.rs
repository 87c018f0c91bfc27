use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use gravvy_db::Database;
use gravvy_types::events::DomainEvent;

use crate::bus::EventHandler;
use crate::planner::{NotifySettings, plan_deliveries};
use crate::transport::Transport;

type Queued = (DomainEvent, DateTime<Utc>);

/// Bus handler that hands events to the background notification worker so
/// publishing never waits on the network.
pub struct Notifier {
    tx: mpsc::UnboundedSender<Queued>,
}

impl Notifier {
    /// Create the handler and start its worker on the current runtime.
    pub fn start(
        db: Arc<Database>,
        settings: NotifySettings,
        transport: Transport,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(db, settings, transport, rx));
        (Self { tx }, handle)
    }
}

impl EventHandler for Notifier {
    fn name(&self) -> &'static str {
        "notifier"
    }

    fn handle(&self, event: &DomainEvent, at: DateTime<Utc>) -> anyhow::Result<()> {
        self.tx
            .send((event.clone(), at))
            .map_err(|_| anyhow::anyhow!("Notification worker has stopped"))
    }
}

/// Plan and deliver queued events until every sender is gone.
async fn run_worker(
    db: Arc<Database>,
    settings: NotifySettings,
    transport: Transport,
    mut rx: mpsc::UnboundedReceiver<Queued>,
) {
    info!("Notification worker started");
    let settings = Arc::new(settings);

    while let Some((event, at)) = rx.recv().await {
        let name = event.name();
        let planned = {
            let db = db.clone();
            let settings = settings.clone();
            tokio::task::spawn_blocking(move || plan_deliveries(&db, &event, &settings)).await
        };

        let deliveries = match planned {
            Ok(Ok(deliveries)) => deliveries,
            Ok(Err(e)) => {
                warn!("Failed to plan notifications for {}: {:#}", name, e);
                continue;
            }
            Err(e) => {
                warn!("Notification planning task failed: {}", e);
                continue;
            }
        };

        debug!(
            "{} at {} -> {} deliveries",
            name,
            at.to_rfc3339(),
            deliveries.len()
        );
        for delivery in &deliveries {
            if let Err(e) = transport.deliver(delivery).await {
                warn!("Delivery failed: {:#}", e);
            }
        }
    }

    info!("Notification worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn worker_drains_and_stops_when_handler_drops() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let (notifier, handle) = Notifier::start(db, NotifySettings::default(), Transport::Log);

        notifier
            .handle(
                &DomainEvent::VideoUnliked {
                    video_id: 1,
                    actor_id: 1,
                },
                Utc::now(),
            )
            .unwrap();
        drop(notifier);

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn worker_finishes_once_the_last_bus_clone_drops() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let (notifier, handle) = Notifier::start(db, NotifySettings::default(), Transport::Log);
        let bus = crate::bus::EventBus::new(vec![Arc::new(notifier)]);
        let clone = bus.clone();

        bus.publish(
            DomainEvent::VideoUnliked {
                video_id: 1,
                actor_id: 1,
            },
            Utc::now(),
        );
        drop(bus);
        assert!(!handle.is_finished());

        drop(clone);
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("worker kept running")
            .unwrap();
    }
}
