use crate::error::ConnectionError;
use bytes::Bytes;
use std::sync::Arc;

/// Lifecycle notifications for one connection.
///
/// Bound to a single connection attempt when it is opened; events from a replaced
/// attempt are ignored by the receiver.
pub trait ConnectionEvents: Send + Sync {
    fn on_open(&self);

    fn on_close(&self);

    fn on_error(&self, error: ConnectionError);
}

/// Outbound handle to a consumer
pub trait Connection: Send + Sync {
    /// Queue a frame for delivery
    fn send(&self, frame: Bytes) -> Result<(), ConnectionError>;

    /// Tear the connection down without notifying its events
    fn close(&self);
}

/// Opens consumer connections.
///
/// `open` returns immediately; the connection reports readiness and failure
/// through `events` afterwards, never from inside `open` itself.
pub trait Transport: Send + Sync {
    fn open(&self, url: &str, events: Arc<dyn ConnectionEvents>) -> Arc<dyn Connection>;
}
