pub mod auth;
pub mod booking;
pub mod bus;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use booking::receipt::ReceiptTrigger;
use booking::PaymentIntake;
use bus::{EventBus, EventKind};
use config::Config;
use db::gateway::PersistenceGateway;
use db::store::BookingStore;
use db::StoreError;
use gateway::fanout::{FanoutHandler, TopicRouter};
use gateway::messaging::MessagingChannel;
use gateway::presence::PresenceTracker;
use gateway::registry::ConnectionRegistry;

/// File name of the write-ahead journal inside the data directory.
pub const JOURNAL_FILE: &str = "journal.log";

const TYPING_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);
const PRESENCE_PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<BookingStore>,
    pub intake: Arc<PaymentIntake>,
    pub bus: Arc<EventBus>,
    pub router: Arc<TopicRouter>,
    pub connections: Arc<ConnectionRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub messaging: Arc<MessagingChannel>,
}

impl AppState {
    /// Open the store (replaying any unfinished journal transactions) and wire
    /// the event bus to the router and the receipt pipeline.
    pub async fn init(
        config: Config,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Result<Self, StoreError> {
        let store = Arc::new(
            BookingStore::open(
                gateway,
                config.data_dir.join(JOURNAL_FILE),
                config.persist_timeout,
            )
            .await?,
        );

        let connections = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(TopicRouter::new(connections.clone()));

        let mut bus = EventBus::new();
        bus.register(&EventKind::ALL, Arc::new(FanoutHandler::new(router.clone())));
        bus.register(
            &[EventKind::BookingConfirmed],
            Arc::new(ReceiptTrigger::new(config.receipt_webhook_url.clone())),
        );
        let bus = Arc::new(bus);

        let intake = Arc::new(PaymentIntake::new(store.clone(), bus.clone()));
        let messaging = Arc::new(MessagingChannel::new(router.clone(), config.typing_timeout));

        Ok(Self {
            config: Arc::new(config),
            store,
            intake,
            bus,
            router,
            connections,
            presence: Arc::new(PresenceTracker::new()),
            messaging,
        })
    }

    /// Start the periodic maintenance tasks. They stop once [`shutdown`]
    /// has been called.
    ///
    /// [`shutdown`]: AppState::shutdown
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let typing = {
            let messaging = self.messaging.clone();
            self.periodic(TYPING_SWEEP_INTERVAL, move || {
                messaging.sweep_typing();
                async {}
            })
        };

        let reconcile = {
            let store = self.store.clone();
            self.periodic(RECONCILE_INTERVAL, move || {
                let store = store.clone();
                async move {
                    if store.unreconciled().await == 0 {
                        return;
                    }
                    if let Err(err) = store.reconcile().await {
                        tracing::warn!(?err, "periodic reconciliation failed");
                    }
                }
            })
        };

        let prune = {
            let presence = self.presence.clone();
            self.periodic(PRESENCE_PRUNE_INTERVAL, move || {
                let pruned = presence.prune_offline(chrono::Duration::hours(24), chrono::Utc::now());
                if pruned > 0 {
                    tracing::debug!(pruned, "pruned stale presence records");
                }
                async {}
            })
        };

        vec![typing, reconcile, prune]
    }

    /// Close every gateway session and settle pending journal transactions.
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        tracing::info!(connections = self.connections.len(), "shutting down");
        self.router.close();
        self.store.flush().await
    }

    fn periodic<F, Fut>(&self, every: Duration, mut tick: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.router.shutdown_signal();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => tick().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
