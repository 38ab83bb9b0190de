//! Prometheus metrics for the Asynchroza dispatcher
//!
//! Provides centralized metrics collection for monitoring:
//! - Message flow (received, relayed, acknowledged, redistributed)
//! - Leadership state
//! - Consumer pool liveness
//! - Worker faults

mod push;

pub use push::{MetricsPusher, push_job_name};

use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, IntCounter, IntGauge, TextEncoder, opts, register_int_counter, register_int_gauge,
};

// ============================================================================
// Message Flow Metrics
// ============================================================================

/// Messages taken off the publish channel by the distributor
pub static MESSAGES_RECEIVED_FROM_PUBLISHER: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "asynchroza_messages_received_from_publisher_total",
        "Messages received from the publish channel"
    ))
    .expect("Failed to register MESSAGES_RECEIVED_FROM_PUBLISHER metric")
});

/// PROCESS frames handed to a consumer connection
pub static MESSAGES_RELAYED_TO_CONSUMER: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "asynchroza_messages_relayed_to_consumer_total",
        "Messages relayed to a consumer"
    ))
    .expect("Failed to register MESSAGES_RELAYED_TO_CONSUMER metric")
});

/// Deliveries attempted while no consumer was live
pub static MESSAGES_WITHOUT_CONSUMER: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "asynchroza_messages_without_consumer_total",
        "Messages left pending because no consumer was available"
    ))
    .expect("Failed to register MESSAGES_WITHOUT_CONSUMER metric")
});

pub static MESSAGES_ACKNOWLEDGED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "asynchroza_messages_acknowledged_total",
        "Messages acknowledged by consumers"
    ))
    .expect("Failed to register MESSAGES_ACKNOWLEDGED metric")
});

/// Stale pending messages republished by the republisher
pub static MESSAGES_REDISTRIBUTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "asynchroza_messages_redistributed_total",
        "Pending messages republished after the redelivery threshold"
    ))
    .expect("Failed to register MESSAGES_REDISTRIBUTED metric")
});

/// Current size of the pending set, sampled by the republisher
pub static MESSAGES_PENDING: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!(
        "asynchroza_messages_pending",
        "Messages awaiting acknowledgement"
    ))
    .expect("Failed to register MESSAGES_PENDING metric")
});

// ============================================================================
// Leadership & Worker Metrics
// ============================================================================

/// Leadership state (0=Follower, 1=Acquiring, 2=Leader)
pub static LEADERSHIP_STATE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!(
        "asynchroza_leadership_state",
        "Leadership state (0=Follower, 1=Acquiring, 2=Leader)"
    ))
    .expect("Failed to register LEADERSHIP_STATE metric")
});

pub static LIVE_CONSUMERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!(
        "asynchroza_live_consumers",
        "Consumer connections currently open"
    ))
    .expect("Failed to register LIVE_CONSUMERS metric")
});

/// Worker exits that ended a leadership term
pub static WORKER_FAULTS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "asynchroza_worker_faults_total",
        "Worker faults that forced the node to give up leadership"
    ))
    .expect("Failed to register WORKER_FAULTS metric")
});

// ============================================================================
// Metrics Collection
// ============================================================================

/// Gather all registered metrics and encode as Prometheus text format
pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_metrics() {
        // Touch metrics so they are registered
        MESSAGES_ACKNOWLEDGED.inc();
        LEADERSHIP_STATE.set(2);

        let metrics_text = gather_metrics().unwrap();
        assert!(metrics_text.contains("asynchroza_messages_acknowledged_total"));
        assert!(metrics_text.contains("asynchroza_leadership_state 2"));
    }
}
