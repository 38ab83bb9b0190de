use crate::error::WorkerError;
use crate::pending::{PendingMessageStore, now_millis};
use asynchroza_config::RedeliveryConfig;
use asynchroza_metrics::{MESSAGES_PENDING, MESSAGES_REDISTRIBUTED};
use asynchroza_redis::{CoordinationStore, StoreError};
use std::sync::Arc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries past the threshold
    pub stale: usize,
    /// Entries a subscriber received
    pub republished: usize,
    /// Entries dropped from the pending set after republishing
    pub removed: usize,
}

/// Redrives pending messages nobody acknowledged in time
pub struct Republisher {
    pending: PendingMessageStore,
    store: Arc<dyn CoordinationStore>,
    channel: String,
    config: RedeliveryConfig,
}

impl Republisher {
    pub fn new(
        pending: PendingMessageStore,
        store: Arc<dyn CoordinationStore>,
        channel: impl Into<String>,
        config: RedeliveryConfig,
    ) -> Self {
        Self {
            pending,
            store,
            channel: channel.into(),
            config,
        }
    }

    /// Republish every entry older than the threshold as of `now_ms`.
    ///
    /// An entry leaves the pending set only when the publish reached a subscriber,
    /// and only if no fresh delivery re-added it in the meantime.
    pub async fn sweep_at(&self, now_ms: i64) -> Result<SweepReport, StoreError> {
        let cutoff = now_ms.saturating_sub(self.config.threshold_millis());
        let stale = self.pending.older_than(cutoff).await?;

        let mut report = SweepReport {
            stale: stale.len(),
            ..SweepReport::default()
        };
        if stale.is_empty() {
            return Ok(report);
        }

        info!(count = stale.len(), "Republishing unacknowledged messages");

        for message in &stale {
            let receivers = self.store.publish(&self.channel, message).await?;
            if receivers == 0 {
                debug!(channel = %self.channel, "No subscriber received republished message");
                continue;
            }

            report.republished += 1;
            MESSAGES_REDISTRIBUTED.inc();

            if self.pending.remove_if_older(message, cutoff).await? {
                report.removed += 1;
            }
        }

        Ok(report)
    }

    /// Sweep on the configured interval.
    ///
    /// Fails once `max_consecutive_failures` sweeps in a row could not reach the store.
    pub async fn run(self) -> Result<(), WorkerError> {
        info!(
            threshold_secs = self.config.threshold_secs,
            interval_secs = self.config.sweep_interval_secs,
            "Starting republisher"
        );

        let mut interval = time::interval(self.config.sweep_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures = 0u32;

        loop {
            interval.tick().await;

            match self.sweep_at(now_millis()).await {
                Ok(report) => {
                    consecutive_failures = 0;
                    if report.stale > report.republished {
                        warn!(
                            stale = report.stale,
                            republished = report.republished,
                            "Some messages had no subscriber, retrying next sweep"
                        );
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    error!(
                        error = %e,
                        consecutive_failures = consecutive_failures,
                        "Redelivery sweep failed"
                    );
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        return Err(WorkerError::RedeliveryStalled(consecutive_failures));
                    }
                }
            }

            match self.pending.count().await {
                Ok(count) => MESSAGES_PENDING.set(count as i64),
                Err(e) => debug!(error = %e, "Failed to count pending messages"),
            }
        }
    }
}
