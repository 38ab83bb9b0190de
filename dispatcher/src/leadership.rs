// ============================================================================
// Leadership Coordinator
// ============================================================================
//
// Exactly one dispatcher is active at a time. Activity is tied to a single
// lock key holding the node identifier with a TTL:
//
//   Follower  --lock free, SET NX succeeds-->  Leader
//   Leader    --renewal fails / give-up-->     Follower
//
// Both phases run off one interval timer. A transition re-arms it, so there
// is never more than one poll or renewal pending.
//
// ============================================================================

use asynchroza_config::LeadershipConfig;
use asynchroza_metrics::LEADERSHIP_STATE;
use asynchroza_redis::{CoordinationStore, StoreError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipState {
    Follower,
    Acquiring,
    Leader,
}

impl LeadershipState {
    fn gauge_value(self) -> i64 {
        match self {
            Self::Follower => 0,
            Self::Acquiring => 1,
            Self::Leader => 2,
        }
    }
}

/// Handed to the listener when a term starts. Raising it makes the node step down
/// on its next renewal tick.
#[derive(Clone, Debug)]
pub struct GiveUpSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl GiveUpSignal {
    /// A lowered signal and the receiver observing it
    pub fn channel() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn raise(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Lifecycle callbacks driven by the coordinator
#[async_trait::async_trait]
pub trait LeadershipListener: Send {
    /// This node just became leader
    async fn on_leadership_acquire(&mut self, give_up: GiveUpSignal);

    /// This node is no longer leader
    async fn on_leadership_loss(&mut self);
}

pub struct LeadershipCoordinator<L> {
    store: Arc<dyn CoordinationStore>,
    node_id: String,
    config: LeadershipConfig,
    listener: L,
    state: LeadershipState,
    give_up: Option<watch::Receiver<bool>>,
}

impl<L: LeadershipListener> LeadershipCoordinator<L> {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        node_id: impl Into<String>,
        config: LeadershipConfig,
        listener: L,
    ) -> Self {
        Self {
            store,
            node_id: node_id.into(),
            config,
            listener,
            state: LeadershipState::Follower,
            give_up: None,
        }
    }

    pub fn state(&self) -> LeadershipState {
        self.state
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    /// Take the lock if nobody holds it.
    ///
    /// `Ok(false)` when another holder (or this node, from an earlier term) owns it.
    pub async fn acquire_leadership(&self, ttl: Duration) -> Result<bool, StoreError> {
        self.store
            .set_if_absent(&self.config.lock_key, &self.node_id, ttl)
            .await
    }

    /// Extend the lock expiry while this node still holds it
    pub async fn renew_leadership(&self, ttl: Duration) -> Result<bool, StoreError> {
        match self.store.get(&self.config.lock_key).await? {
            Some(holder) if holder == self.node_id => {
                self.store
                    .set_if_holder(&self.config.lock_key, &self.node_id, ttl)
                    .await
            }
            _ => Ok(false),
        }
    }

    /// Delete the lock if this node holds it
    pub async fn relinquish_leadership(&self) -> Result<bool, StoreError> {
        self.store
            .delete_if_holder(&self.config.lock_key, &self.node_id)
            .await
    }

    /// Run one poll (as follower) or renewal (as leader) step.
    ///
    /// Returns whether the state changed.
    pub async fn tick(&mut self) -> bool {
        match self.state {
            LeadershipState::Leader => self.renew().await,
            LeadershipState::Follower | LeadershipState::Acquiring => self.poll().await,
        }
    }

    /// Drive the state machine until `shutdown` resolves, then step down
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        info!(
            node_id = %self.node_id,
            lock_key = %self.config.lock_key,
            ttl_secs = self.config.ttl_secs,
            interval_ms = self.config.interval_ms,
            "Starting leadership coordinator"
        );

        let mut ticker = time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if self.tick().await {
                        ticker.reset();
                    }
                }
            }
        }

        if self.state == LeadershipState::Leader {
            info!(node_id = %self.node_id, "Shutting down, giving up leadership");
            self.step_down(true).await;
        }
    }

    async fn poll(&mut self) -> bool {
        match self.store.get(&self.config.lock_key).await {
            Ok(Some(holder)) => {
                debug!(holder = %holder, "Leadership lock held");
                return false;
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "Failed to read leadership lock");
                return false;
            }
        }

        self.set_state(LeadershipState::Acquiring);

        match self.acquire_leadership(self.config.ttl()).await {
            Ok(true) => {
                info!(node_id = %self.node_id, "Acquired leadership");
                self.set_state(LeadershipState::Leader);

                let (signal, rx) = GiveUpSignal::channel();
                self.give_up = Some(rx);
                self.listener.on_leadership_acquire(signal).await;
                true
            }
            Ok(false) => {
                debug!("Lost leadership race");
                self.set_state(LeadershipState::Follower);
                false
            }
            Err(e) => {
                error!(error = %e, "Failed to acquire leadership");
                self.set_state(LeadershipState::Follower);
                false
            }
        }
    }

    async fn renew(&mut self) -> bool {
        let raised = self
            .give_up
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false);
        if raised {
            warn!(node_id = %self.node_id, "Workers gave up, relinquishing leadership");
            self.step_down(true).await;
            return true;
        }

        match self.renew_leadership(self.config.ttl()).await {
            Ok(true) => {
                debug!(node_id = %self.node_id, "Renewed leadership");
                false
            }
            Ok(false) => {
                warn!(node_id = %self.node_id, "Leadership lost to another node");
                self.step_down(false).await;
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to renew leadership");
                false
            }
        }
    }

    async fn step_down(&mut self, relinquish: bool) {
        self.give_up = None;
        self.set_state(LeadershipState::Follower);
        self.listener.on_leadership_loss().await;

        if relinquish {
            match self.relinquish_leadership().await {
                Ok(true) => info!(node_id = %self.node_id, "Released leadership lock"),
                Ok(false) => debug!("Leadership lock already gone"),
                Err(e) => error!(error = %e, "Failed to release leadership lock"),
            }
        }
    }

    fn set_state(&mut self, state: LeadershipState) {
        self.state = state;
        LEADERSHIP_STATE.set(state.gauge_value());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asynchroza_redis::MemoryStore;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Acquired,
        Lost,
    }

    #[derive(Clone, Default)]
    struct RecordingListener {
        events: Arc<Mutex<Vec<Event>>>,
        signal: Arc<Mutex<Option<GiveUpSignal>>>,
    }

    impl RecordingListener {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn give_up(&self) {
            self.signal.lock().unwrap().as_ref().unwrap().raise();
        }
    }

    #[async_trait::async_trait]
    impl LeadershipListener for RecordingListener {
        async fn on_leadership_acquire(&mut self, give_up: GiveUpSignal) {
            *self.signal.lock().unwrap() = Some(give_up);
            self.events.lock().unwrap().push(Event::Acquired);
        }

        async fn on_leadership_loss(&mut self) {
            self.events.lock().unwrap().push(Event::Lost);
        }
    }

    fn config() -> LeadershipConfig {
        LeadershipConfig {
            lock_key: "leadership_lock".to_string(),
            ttl_secs: 10,
            interval_ms: 2_000,
        }
    }

    fn coordinator(
        store: &MemoryStore,
        node_id: &str,
    ) -> LeadershipCoordinator<RecordingListener> {
        LeadershipCoordinator::new(
            Arc::new(store.clone()),
            node_id,
            config(),
            RecordingListener::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_takes_free_lock() {
        let store = MemoryStore::new();
        let mut node = coordinator(&store, "node-1");
        assert_eq!(node.state(), LeadershipState::Follower);

        assert!(node.tick().await);

        assert_eq!(node.state(), LeadershipState::Leader);
        assert_eq!(node.listener().events(), vec![Event::Acquired]);
        assert_eq!(
            store.get("leadership_lock").await.unwrap().as_deref(),
            Some("node-1")
        );
        assert_eq!(store.ttl("leadership_lock"), Some(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_waits_for_expiry() {
        let store = MemoryStore::new();
        let mut leader = coordinator(&store, "node-1");
        let mut follower = coordinator(&store, "node-2");

        assert!(leader.tick().await);
        assert!(!follower.tick().await);
        assert_eq!(follower.state(), LeadershipState::Follower);
        assert!(follower.listener().events().is_empty());

        // Leader stops renewing
        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(follower.tick().await);
        assert_eq!(follower.state(), LeadershipState::Leader);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_extends_ttl() {
        let store = MemoryStore::new();
        let mut node = coordinator(&store, "node-1");
        node.tick().await;

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!node.tick().await);

        assert_eq!(node.state(), LeadershipState::Leader);
        assert_eq!(store.ttl("leadership_lock"), Some(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_by_non_holder_fails_and_leaves_lock() {
        let store = MemoryStore::new();
        let holder = coordinator(&store, "node-1");
        let other = coordinator(&store, "node-2");

        assert!(holder.acquire_leadership(Duration::from_secs(10)).await.unwrap());
        assert!(!other.acquire_leadership(Duration::from_secs(10)).await.unwrap());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!other.renew_leadership(Duration::from_secs(60)).await.unwrap());
        assert!(!other.relinquish_leadership().await.unwrap());

        assert_eq!(
            store.get("leadership_lock").await.unwrap().as_deref(),
            Some("node-1")
        );
        assert_eq!(store.ttl("leadership_lock"), Some(Duration::from_secs(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_failure_fires_loss_once_and_polling_resumes() {
        let store = MemoryStore::new();
        let mut node = coordinator(&store, "node-1");
        node.tick().await;

        // Lock expired and was taken by someone else
        store.del("leadership_lock").await.unwrap();
        store
            .set_if_absent("leadership_lock", "node-2", Duration::from_secs(10))
            .await
            .unwrap();

        assert!(node.tick().await);
        assert_eq!(node.state(), LeadershipState::Follower);

        // Further ticks poll without firing loss again
        assert!(!node.tick().await);
        assert!(!node.tick().await);
        assert_eq!(node.listener().events(), vec![Event::Acquired, Event::Lost]);
        assert_eq!(
            store.get("leadership_lock").await.unwrap().as_deref(),
            Some("node-2")
        );

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(node.tick().await);
        assert_eq!(
            node.listener().events(),
            vec![Event::Acquired, Event::Lost, Event::Acquired]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_give_up_releases_lock() {
        let store = MemoryStore::new();
        let mut node = coordinator(&store, "node-1");
        node.tick().await;

        node.listener().give_up();
        assert!(node.tick().await);

        assert_eq!(node.state(), LeadershipState::Follower);
        assert_eq!(node.listener().events(), vec![Event::Acquired, Event::Lost]);
        assert_eq!(store.get("leadership_lock").await.unwrap(), None);

        // Free lock is taken again on the next poll
        assert!(node.tick().await);
        assert_eq!(node.state(), LeadershipState::Leader);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_errors_do_not_transition() {
        let store = MemoryStore::new();
        let mut node = coordinator(&store, "node-1");
        node.tick().await;

        store.set_unavailable(true);
        assert!(!node.tick().await);
        assert_eq!(node.state(), LeadershipState::Leader);

        let mut follower = coordinator(&store, "node-2");
        assert!(!follower.tick().await);
        assert_eq!(follower.state(), LeadershipState::Follower);

        store.set_unavailable(false);
        assert!(!node.tick().await);
        assert_eq!(node.listener().events(), vec![Event::Acquired]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_releases_lock_on_shutdown() {
        let store = MemoryStore::new();
        let mut node = coordinator(&store, "node-1");

        node.run(tokio::time::sleep(Duration::from_secs(5))).await;

        assert_eq!(node.state(), LeadershipState::Follower);
        assert_eq!(node.listener().events(), vec![Event::Acquired, Event::Lost]);
        assert_eq!(store.get("leadership_lock").await.unwrap(), None);
    }
}
