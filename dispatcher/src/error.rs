use asynchroza_redis::StoreError;
use thiserror::Error;

/// Failure on a single consumer connection.
///
/// Never fatal: the endpoint is marked dead and picked up by the next reconnect sweep.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Failed to connect to {url} after {attempts} attempts: {reason}")]
    ConnectFailed {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("Connection to {0} is closed")]
    Closed(String),

    #[error("Transport error on {url}: {reason}")]
    Transport { url: String, reason: String },
}

/// Failure that ends a worker.
///
/// The supervisor tears down the whole worker set and the node gives up leadership.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Subscription to {0} ended")]
    SubscriptionEnded(String),

    #[error("Failed to bind acknowledger on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Acknowledger listener failed: {0}")]
    Listener(#[source] std::io::Error),

    #[error("Redelivery stalled after {0} consecutive failed sweeps")]
    RedeliveryStalled(u32),

    #[error("Worker exited unexpectedly")]
    Exited,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
