//! Shared fixtures for dispatcher integration tests

#![allow(dead_code)]

use asynchroza_config::Config;
use asynchroza_dispatcher::ConnectionError;
use asynchroza_dispatcher::pool::{Connection, ConnectionEvents, Transport};
use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Consumer connection that keeps every frame it is asked to send
#[derive(Default)]
pub struct RecordingConnection {
    sent: Mutex<Vec<Bytes>>,
    closed: AtomicBool,
}

impl RecordingConnection {
    pub fn frames(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }
}

impl Connection for RecordingConnection {
    fn send(&self, frame: Bytes) -> Result<(), ConnectionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed("recording".to_string()));
        }
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct Attempt {
    url: String,
    events: Arc<dyn ConnectionEvents>,
    connection: Arc<RecordingConnection>,
}

/// Transport whose connections open only when the test says so
#[derive(Default)]
pub struct ScriptedTransport {
    attempts: Mutex<Vec<Attempt>>,
}

impl ScriptedTransport {
    pub fn attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    /// Fire `on_open` for every attempt made so far
    pub fn open_all(&self) {
        let events: Vec<_> = self
            .attempts
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.events.clone())
            .collect();
        for events in events {
            events.on_open();
        }
    }

    /// Frames sent so far, by consumer url
    pub fn frames(&self) -> HashMap<String, Vec<Bytes>> {
        let mut frames: HashMap<String, Vec<Bytes>> = HashMap::new();
        for attempt in self.attempts.lock().unwrap().iter() {
            frames
                .entry(attempt.url.clone())
                .or_default()
                .extend(attempt.connection.frames());
        }
        frames
    }

    pub fn all_frames(&self) -> Vec<Bytes> {
        self.frames().into_values().flatten().collect()
    }
}

impl Transport for ScriptedTransport {
    fn open(&self, url: &str, events: Arc<dyn ConnectionEvents>) -> Arc<dyn Connection> {
        let connection = Arc::new(RecordingConnection::default());
        self.attempts.lock().unwrap().push(Attempt {
            url: url.to_string(),
            events,
            connection: connection.clone(),
        });
        connection
    }
}

/// Configuration as the binary would load it from `vars`
pub fn config(vars: &[(&str, &str)]) -> Config {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::from_lookup(&|name| vars.get(name).cloned()).unwrap()
}

/// A port nobody is listening on right now
pub async fn free_port() -> u16 {
    tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Poll `condition` every 10ms until it holds or five seconds pass
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
