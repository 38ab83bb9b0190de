//! In-process coordination store for tests and single-node runs

use crate::store::{CoordinationStore, MessageStream};
use crate::{Result, StoreError};
use futures_util::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
struct State {
    strings: HashMap<String, (String, Option<Instant>)>,
    zsets: HashMap<String, HashMap<String, i64>>,
    lists: HashMap<String, VecDeque<String>>,
    channels: HashMap<String, broadcast::Sender<String>>,
}

impl State {
    /// Drop `key` if its expiry has passed
    fn expire(&mut self, key: &str) {
        let expired = matches!(
            self.strings.get(key),
            Some((_, Some(deadline))) if *deadline <= Instant::now()
        );
        if expired {
            self.strings.remove(key);
        }
    }

    fn holder(&mut self, key: &str) -> Option<&str> {
        self.expire(key);
        self.strings.get(key).map(|(value, _)| value.as_str())
    }
}

/// [`CoordinationStore`] kept in process memory.
///
/// Expiry follows `tokio::time`, so paused-clock tests can advance past lock TTLs.
/// Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`] until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Remaining time to live of `key`, `None` when missing or without expiry
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut state = self.lock();
        state.expire(key);
        state
            .strings
            .get(key)
            .and_then(|(_, deadline)| *deadline)
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Score of `member` in the sorted set at `key`
    pub fn score(&self, key: &str, member: &str) -> Option<i64> {
        self.lock()
            .zsets
            .get(key)
            .and_then(|set| set.get(member).copied())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding the guard leaves plain data behind; keep using it
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.lock().holder(key).map(str::to_string))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check()?;
        let mut state = self.lock();
        if state.holder(key).is_some() {
            return Ok(false);
        }
        state.strings.insert(
            key.to_string(),
            (value.to_string(), Some(Instant::now() + ttl)),
        );
        Ok(true)
    }

    async fn set_if_holder(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check()?;
        let mut state = self.lock();
        if state.holder(key) != Some(value) {
            return Ok(false);
        }
        state.strings.insert(
            key.to_string(),
            (value.to_string(), Some(Instant::now() + ttl)),
        );
        Ok(true)
    }

    async fn delete_if_holder(&self, key: &str, value: &str) -> Result<bool> {
        self.check()?;
        let mut state = self.lock();
        if state.holder(key) != Some(value) {
            return Ok(false);
        }
        state.strings.remove(key);
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.check()?;
        let mut state = self.lock();
        state.strings.remove(key);
        state.zsets.remove(key);
        state.lists.remove(key);
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()> {
        self.check()?;
        self.lock()
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrange_by_score(&self, key: &str, max_score: i64) -> Result<Vec<String>> {
        self.check()?;
        let state = self.lock();
        let Some(set) = state.zsets.get(key) else {
            return Ok(Vec::new());
        };

        let mut members: Vec<(&String, i64)> = set
            .iter()
            .filter(|(_, score)| **score <= max_score)
            .map(|(member, score)| (member, *score))
            .collect();
        // Redis orders equal scores lexicographically
        members.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));

        Ok(members.into_iter().map(|(m, _)| m.clone()).collect())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        self.check()?;
        let mut state = self.lock();
        Ok(state
            .zsets
            .get_mut(key)
            .map(|set| set.remove(member).is_some())
            .unwrap_or(false))
    }

    async fn zrem_if_score_at_most(
        &self,
        key: &str,
        member: &str,
        max_score: i64,
    ) -> Result<bool> {
        self.check()?;
        let mut state = self.lock();
        let Some(set) = state.zsets.get_mut(key) else {
            return Ok(false);
        };
        match set.get(member) {
            Some(score) if *score <= max_score => {
                set.remove(member);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        self.check()?;
        Ok(self.lock().zsets.get(key).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.lock()
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn lrem(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        let mut state = self.lock();
        if let Some(list) = state.lists.get_mut(key) {
            if let Some(pos) = list.iter().position(|v| v == value) {
                list.remove(pos);
            }
        }
        Ok(())
    }

    async fn lrange(&self, key: &str) -> Result<Vec<String>> {
        self.check()?;
        Ok(self
            .lock()
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<u64> {
        self.check()?;
        let state = self.lock();
        let receivers = state
            .channels
            .get(channel)
            .and_then(|tx| tx.send(payload.to_string()).ok())
            .unwrap_or(0);
        Ok(receivers as u64)
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        self.check()?;
        let rx = self
            .lock()
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped = skipped, "Subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream.boxed())
    }
}
