//! The three leader-only workers and the launcher that wires them to real
//! infrastructure.

pub mod acknowledger;
pub mod distributor;
pub mod republisher;

pub use acknowledger::{AckOutcome, Acknowledger};
pub use distributor::{Delivery, Distributor};
pub use republisher::{Republisher, SweepReport};

use crate::error::WorkerError;
use crate::pending::PendingMessageStore;
use crate::pool::{ConsumerPool, Transport, WebSocketTransport};
use crate::supervisor::{WorkerKind, WorkerLauncher};
use asynchroza_config::Config;
use asynchroza_redis::CoordinationStore;
use std::sync::Arc;

/// Builds each worker from the process configuration and a shared store
pub struct DispatcherWorkers {
    store: Arc<dyn CoordinationStore>,
    transport: Arc<dyn Transport>,
    config: Arc<Config>,
}

impl DispatcherWorkers {
    /// Workers reaching consumers over WebSocket
    pub fn new(store: Arc<dyn CoordinationStore>, config: Arc<Config>) -> Self {
        let transport = Arc::new(WebSocketTransport::new(
            config.consumers.connect_attempts,
            config.consumers.connect_backoff(),
        ));
        Self::with_transport(store, transport, config)
    }

    pub fn with_transport(
        store: Arc<dyn CoordinationStore>,
        transport: Arc<dyn Transport>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    fn pending(&self) -> PendingMessageStore {
        PendingMessageStore::new(self.store.clone(), &self.config.redis_keys.pending_set)
    }

    async fn run_distributor(&self) -> Result<(), WorkerError> {
        let keys = &self.config.redis_keys;

        let pool = ConsumerPool::with_bookkeeping(
            self.transport.clone(),
            self.store.clone(),
            &keys.consumer_urls,
        );
        pool.set_consumers(&self.config.consumers.urls);

        let messages = self.store.subscribe(&keys.publish_channel).await?;

        Distributor::new(self.pending(), pool)
            .run(
                &keys.publish_channel,
                messages,
                self.config.consumers.reconnect_interval(),
            )
            .await
    }

    async fn run_acknowledger(&self) -> Result<(), WorkerError> {
        Acknowledger::bind(self.pending(), self.config.acknowledger_port)
            .await?
            .run()
            .await
    }

    async fn run_republisher(&self) -> Result<(), WorkerError> {
        Republisher::new(
            self.pending(),
            self.store.clone(),
            &self.config.redis_keys.publish_channel,
            self.config.redelivery.clone(),
        )
        .run()
        .await
    }
}

#[async_trait::async_trait]
impl WorkerLauncher for DispatcherWorkers {
    async fn run(&self, kind: WorkerKind) -> Result<(), WorkerError> {
        match kind {
            WorkerKind::Distributor => self.run_distributor().await,
            WorkerKind::Acknowledger => self.run_acknowledger().await,
            WorkerKind::Republisher => self.run_republisher().await,
        }
    }
}
