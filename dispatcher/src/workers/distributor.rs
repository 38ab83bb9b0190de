use crate::error::WorkerError;
use crate::pending::{PendingMessageStore, now_millis};
use crate::pool::ConsumerPool;
use asynchroza_metrics::{
    MESSAGES_RECEIVED_FROM_PUBLISHER, MESSAGES_RELAYED_TO_CONSUMER, MESSAGES_WITHOUT_CONSUMER,
};
use asynchroza_redis::MessageStream;
use asynchroza_wire::{Command, encode};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// What happened to one published message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Frame handed to the consumer at this url
    Relayed(String),
    /// No consumer was live; the message waits for redelivery
    NoConsumer,
    /// The frame could not be built or queued; the message waits for redelivery
    Failed,
}

/// Relays published messages to consumers, recording each as pending first
pub struct Distributor {
    pending: PendingMessageStore,
    pool: ConsumerPool,
}

impl Distributor {
    pub fn new(pending: PendingMessageStore, pool: ConsumerPool) -> Self {
        Self { pending, pool }
    }

    pub fn pool(&self) -> &ConsumerPool {
        &self.pool
    }

    /// Record `message` as pending, then send it to the next live consumer.
    ///
    /// The pending write completes before the frame leaves, so an ACK can never
    /// arrive for an entry that does not exist yet.
    pub async fn handle_message(&self, message: &str) -> Delivery {
        MESSAGES_RECEIVED_FROM_PUBLISHER.inc();

        if let Err(e) = self.pending.add(message, now_millis()).await {
            // Deliver anyway; without the entry it is at-most-once for this message
            error!(error = %e, "Failed to record pending message");
        }

        let Some(consumer) = self.pool.get_next_available_consumer() else {
            info!("No consumers available to process message");
            MESSAGES_WITHOUT_CONSUMER.inc();
            return Delivery::NoConsumer;
        };

        let frame = match encode(Command::Process, message) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Failed to encode message");
                return Delivery::Failed;
            }
        };

        match consumer.send(frame) {
            Ok(()) => {
                debug!(url = %consumer.url(), "Relayed message to consumer");
                MESSAGES_RELAYED_TO_CONSUMER.inc();
                Delivery::Relayed(consumer.url().to_string())
            }
            Err(e) => {
                warn!(url = %consumer.url(), error = %e, "Failed to send message to consumer");
                Delivery::Failed
            }
        }
    }

    /// Relay every message from `messages` and sweep dead consumers on `reconnect_interval`.
    ///
    /// Only returns when the subscription ends.
    pub async fn run(
        self,
        channel: &str,
        mut messages: MessageStream,
        reconnect_interval: Duration,
    ) -> Result<(), WorkerError> {
        info!(channel = %channel, "Starting distributor");

        let mut reconnect = time::interval(reconnect_interval);
        reconnect.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick is immediate and the pool was just populated
        reconnect.tick().await;

        loop {
            tokio::select! {
                message = messages.next() => match message {
                    Some(message) => {
                        self.handle_message(&message).await;
                    }
                    None => return Err(WorkerError::SubscriptionEnded(channel.to_string())),
                },
                _ = reconnect.tick() => self.pool.reconnect_dead_consumers(),
            }
        }
    }
}
