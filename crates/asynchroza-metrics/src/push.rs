use std::collections::HashMap;
use std::time::Duration;
use tokio::time;

/// Pushgateway job name for a dispatcher node
pub fn push_job_name(node_id: &str) -> String {
    format!("dispatcher_{}_metrics", node_id)
}

/// Background task that periodically pushes every registered metric to a Pushgateway
///
/// Pushes use the blocking prometheus client, so each one runs on the blocking pool.
/// A failed push is logged and retried on the next tick.
pub struct MetricsPusher {
    gateway_url: String,
    job: String,
    push_interval: Duration,
}

impl MetricsPusher {
    pub fn new(gateway_url: impl Into<String>, node_id: &str, push_interval: Duration) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            job: push_job_name(node_id),
            push_interval,
        }
    }

    /// Push forever at the configured interval
    pub async fn run(self) {
        tracing::info!(
            gateway = %self.gateway_url,
            job = %self.job,
            interval_secs = self.push_interval.as_secs(),
            "Starting metrics push task"
        );

        let mut interval = time::interval(self.push_interval);

        loop {
            interval.tick().await;

            let job = self.job.clone();
            let url = self.gateway_url.clone();
            let pushed = tokio::task::spawn_blocking(move || {
                prometheus::push_add_metrics(
                    &job,
                    HashMap::new(),
                    &url,
                    prometheus::gather(),
                    None,
                )
            })
            .await;

            match pushed {
                Ok(Ok(())) => tracing::trace!("Metrics pushed"),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, gateway = %self.gateway_url, "Failed to push metrics");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Metrics push task panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_name_includes_node() {
        assert_eq!(push_job_name("node-1"), "dispatcher_node-1_metrics");
    }

    #[tokio::test]
    async fn test_unreachable_gateway_does_not_stop_loop() {
        let pusher = MetricsPusher::new("127.0.0.1:1", "test", Duration::from_millis(50));
        let handle = tokio::spawn(pusher.run());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }
}
