//! Consumer connection pool
//!
//! Keeps one outbound connection per configured consumer endpoint and hands them
//! out round-robin. Endpoints move between three states:
//!
//! ```text
//! Connecting --on_open--> Live --on_close/on_error--> Dead --reconnect--> Connecting
//!      \______________________on_error______________________/
//! ```
//!
//! Only live endpoints sit in the rotation. Every live endpoint is mirrored into a
//! store list so operators can see which consumers the active dispatcher reaches.

mod transport;
mod websocket;

pub use transport::{Connection, ConnectionEvents, Transport};
pub use websocket::{WebSocketTransport, websocket_url};

use crate::error::ConnectionError;
use asynchroza_metrics::LIVE_CONSUMERS;
use asynchroza_redis::CoordinationStore;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStatus {
    Connecting,
    Live,
    Dead,
}

/// Copy of one endpoint's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSnapshot {
    pub url: String,
    pub status: EndpointStatus,
}

/// A consumer picked for delivery
#[derive(Clone)]
pub struct ConsumerHandle {
    url: String,
    connection: Arc<dyn Connection>,
}

impl ConsumerHandle {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn send(&self, frame: Bytes) -> Result<(), ConnectionError> {
        self.connection.send(frame)
    }
}

struct Endpoint {
    status: EndpointStatus,
    connection: Arc<dyn Connection>,
    generation: u64,
}

#[derive(Default)]
struct PoolState {
    endpoints: HashMap<String, Endpoint>,
    rotation: Vec<String>,
    cursor: usize,
    next_generation: u64,
}

impl PoolState {
    fn leave_rotation(&mut self, url: &str) -> bool {
        let Some(index) = self.rotation.iter().position(|u| u == url) else {
            return false;
        };
        self.rotation.remove(index);
        if index < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.rotation.len() {
            self.cursor = 0;
        }
        true
    }
}

/// Writes mirroring the live endpoints into the store
#[derive(Debug)]
enum Bookkeeping {
    Reset,
    Added(String),
    Removed(String),
}

struct PoolInner {
    transport: Arc<dyn Transport>,
    state: Mutex<PoolState>,
    bookkeeping: Option<mpsc::UnboundedSender<Bookkeeping>>,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, entry: Bookkeeping) {
        if let Some(tx) = &self.bookkeeping {
            if tx.send(entry).is_err() {
                tracing::warn!("Consumer bookkeeping task is gone");
            }
        }
    }

    fn opened(&self, url: &str, generation: u64) {
        let mut state = self.lock();
        let Some(endpoint) = state.endpoints.get_mut(url) else {
            return;
        };
        if endpoint.generation != generation || endpoint.status != EndpointStatus::Connecting {
            return;
        }

        endpoint.status = EndpointStatus::Live;
        state.rotation.push(url.to_string());
        LIVE_CONSUMERS.set(state.rotation.len() as i64);
        // Recorded under the lock to keep store writes in event order
        self.record(Bookkeeping::Added(url.to_string()));
    }

    fn died(&self, url: &str, generation: u64) {
        let mut state = self.lock();
        let Some(endpoint) = state.endpoints.get_mut(url) else {
            return;
        };
        if endpoint.generation != generation || endpoint.status == EndpointStatus::Dead {
            return;
        }

        endpoint.status = EndpointStatus::Dead;
        if state.leave_rotation(url) {
            LIVE_CONSUMERS.set(state.rotation.len() as i64);
            self.record(Bookkeeping::Removed(url.to_string()));
        }
    }
}

/// Events of one connection attempt, routed back to the pool
struct EndpointEvents {
    pool: Weak<PoolInner>,
    url: String,
    generation: u64,
}

impl ConnectionEvents for EndpointEvents {
    fn on_open(&self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.opened(&self.url, self.generation);
        }
    }

    fn on_close(&self) {
        tracing::info!(url = %self.url, "Disconnected from consumer");
        if let Some(pool) = self.pool.upgrade() {
            pool.died(&self.url, self.generation);
        }
    }

    fn on_error(&self, error: ConnectionError) {
        tracing::warn!(url = %self.url, error = %error, "Consumer connection failed");
        if let Some(pool) = self.pool.upgrade() {
            pool.died(&self.url, self.generation);
        }
    }
}

/// Round-robin pool of consumer connections
#[derive(Clone)]
pub struct ConsumerPool {
    inner: Arc<PoolInner>,
}

impl ConsumerPool {
    /// Pool without store bookkeeping
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::build(transport, None)
    }

    /// Pool mirroring its live endpoints into the list at `key`.
    ///
    /// Spawns the task applying the writes, so it must be called inside a runtime.
    pub fn with_bookkeeping(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CoordinationStore>,
        key: impl Into<String>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_bookkeeping(store, key.into(), rx));
        Self::build(transport, Some(tx))
    }

    fn build(
        transport: Arc<dyn Transport>,
        bookkeeping: Option<mpsc::UnboundedSender<Bookkeeping>>,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                transport,
                state: Mutex::new(PoolState::default()),
                bookkeeping,
            }),
        }
    }

    /// Reconcile the pool with the desired endpoint list.
    ///
    /// Endpoints no longer wanted are closed and forgotten, new ones are connected,
    /// everything else is left alone.
    pub fn set_consumers(&self, urls: &[String]) {
        let desired: HashSet<&str> = urls.iter().map(String::as_str).collect();

        {
            let mut state = self.inner.lock();
            self.inner.record(Bookkeeping::Reset);

            let stale: Vec<String> = state
                .endpoints
                .keys()
                .filter(|url| !desired.contains(url.as_str()))
                .cloned()
                .collect();
            for url in stale {
                if let Some(endpoint) = state.endpoints.remove(&url) {
                    endpoint.connection.close();
                }
                state.leave_rotation(&url);
                tracing::info!(url = %url, "Dropped consumer");
            }

            let live = state.rotation.clone();
            for url in live {
                self.inner.record(Bookkeeping::Added(url));
            }
            LIVE_CONSUMERS.set(state.rotation.len() as i64);
        }

        for url in urls {
            self.establish_connection(url);
        }
    }

    /// Open a connection to `url` unless one is already live or in progress
    pub fn establish_connection(&self, url: &str) {
        let mut state = self.inner.lock();
        if let Some(endpoint) = state.endpoints.get(url) {
            if endpoint.status != EndpointStatus::Dead {
                return;
            }
        }

        state.next_generation += 1;
        let generation = state.next_generation;

        tracing::info!(url = %url, generation = generation, "Connecting to consumer");

        let events = Arc::new(EndpointEvents {
            pool: Arc::downgrade(&self.inner),
            url: url.to_string(),
            generation,
        });
        let connection = self.inner.transport.open(url, events);

        let replaced = state.endpoints.insert(
            url.to_string(),
            Endpoint {
                status: EndpointStatus::Connecting,
                connection,
                generation,
            },
        );
        if let Some(old) = replaced {
            old.connection.close();
        }
    }

    /// Next live consumer in round-robin order, `None` when none is live.
    ///
    /// Looks at each rotation slot at most once.
    pub fn get_next_available_consumer(&self) -> Option<ConsumerHandle> {
        let mut state = self.inner.lock();
        let total = state.rotation.len();

        for _ in 0..total {
            let index = state.cursor % total;
            state.cursor = (index + 1) % total;

            let url = &state.rotation[index];
            if let Some(endpoint) = state.endpoints.get(url) {
                if endpoint.status == EndpointStatus::Live {
                    return Some(ConsumerHandle {
                        url: url.clone(),
                        connection: endpoint.connection.clone(),
                    });
                }
            }
        }

        None
    }

    /// Reconnect every dead endpoint. Endpoints already connecting are left alone.
    pub fn reconnect_dead_consumers(&self) {
        let dead: Vec<String> = {
            let state = self.inner.lock();
            state
                .endpoints
                .iter()
                .filter(|(_, endpoint)| endpoint.status == EndpointStatus::Dead)
                .map(|(url, _)| url.clone())
                .collect()
        };

        for url in dead {
            tracing::info!(url = %url, "Attempting to reconnect to consumer");
            self.establish_connection(&url);
        }
    }

    /// Copy of every endpoint's state, sorted by url
    pub fn snapshot(&self) -> Vec<EndpointSnapshot> {
        let state = self.inner.lock();
        let mut endpoints: Vec<EndpointSnapshot> = state
            .endpoints
            .iter()
            .map(|(url, endpoint)| EndpointSnapshot {
                url: url.clone(),
                status: endpoint.status,
            })
            .collect();
        endpoints.sort_by(|a, b| a.url.cmp(&b.url));
        endpoints
    }

    /// Live endpoints in rotation order
    pub fn live_consumers(&self) -> Vec<String> {
        self.inner.lock().rotation.clone()
    }
}

async fn run_bookkeeping(
    store: Arc<dyn CoordinationStore>,
    key: String,
    mut rx: mpsc::UnboundedReceiver<Bookkeeping>,
) {
    while let Some(entry) = rx.recv().await {
        let result = match &entry {
            Bookkeeping::Reset => store.del(&key).await,
            Bookkeeping::Added(url) => store.lpush(&key, url).await,
            Bookkeeping::Removed(url) => store.lrem(&key, url).await,
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, key = %key, entry = ?entry, "Failed to update consumer list");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Connection that records frames instead of sending them
    #[derive(Default)]
    pub struct MockConnection {
        pub sent: Mutex<Vec<Bytes>>,
        pub closed: AtomicBool,
    }

    impl MockConnection {
        pub fn frames(&self) -> Vec<Bytes> {
            self.sent.lock().unwrap().clone()
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl Connection for MockConnection {
        fn send(&self, frame: Bytes) -> Result<(), ConnectionError> {
            if self.is_closed() {
                return Err(ConnectionError::Closed("mock".to_string()));
            }
            self.sent.lock().unwrap().push(frame);
            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    pub struct Opened {
        pub url: String,
        pub events: Arc<dyn ConnectionEvents>,
        pub connection: Arc<MockConnection>,
    }

    /// Transport whose connections only open when a test says so
    #[derive(Default)]
    pub struct MockTransport {
        pub opened: Mutex<Vec<Opened>>,
    }

    impl MockTransport {
        /// Latest attempt for `url`
        pub fn attempt(&self, url: &str) -> (Arc<dyn ConnectionEvents>, Arc<MockConnection>) {
            let opened = self.opened.lock().unwrap();
            let attempt = opened.iter().rev().find(|o| o.url == url).unwrap();
            (attempt.events.clone(), attempt.connection.clone())
        }

        pub fn attempts(&self, url: &str) -> usize {
            self.opened.lock().unwrap().iter().filter(|o| o.url == url).count()
        }

        pub fn open_all(&self) {
            let events: Vec<_> = self
                .opened
                .lock()
                .unwrap()
                .iter()
                .map(|o| o.events.clone())
                .collect();
            for events in events {
                events.on_open();
            }
        }
    }

    impl Transport for MockTransport {
        fn open(&self, url: &str, events: Arc<dyn ConnectionEvents>) -> Arc<dyn Connection> {
            let connection = Arc::new(MockConnection::default());
            self.opened.lock().unwrap().push(Opened {
                url: url.to_string(),
                events,
                connection: connection.clone(),
            });
            connection
        }
    }
}
