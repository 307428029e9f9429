//! Topic multiplexer
//!
//! The `Multiplexer` creates and owns any number of upstream subscriptions,
//! keyed by topic display key (`name` or `name-instance`), so the same topic
//! name can be followed several times under distinct instance ids.
//!
//! Each subscription gets a pump task that feeds its events, in order, to
//! the shared `UpstreamHandler`. The pump also applies the reconnect policy:
//! after a close it did not ask for, it opens a fresh subscription for the
//! same topic. The multiplexer itself is owned by one task; callers that need
//! to share it wrap it in a lock.
//!
//! Tearing down (`unsubscribe`, `shutdown`, or dropping the multiplexer)
//! closes the upstream connection and cancels any pending reconnect.

pub mod reconnect;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::upstream::{
    CloseReason, ConnectionState, Subscription, Topic, UpstreamEvent, UpstreamHandler,
};
use crate::utils::{RelayError, Result};

pub use reconnect::ReconnectPolicy;

/// Observer for one multiplexed subscription. Tracks the key's state across
/// reconnects: `Open`, `Connecting` while waiting to reconnect, then
/// `Closed` for good.
#[derive(Debug, Clone)]
pub struct SubscriptionStatus {
    topic: Topic,
    state: watch::Receiver<ConnectionState>,
}

impl SubscriptionStatus {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn key(&self) -> String {
        self.topic.display_key()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the subscription reaches `target`. Returns `false` if it
    /// went away first.
    pub async fn wait_for(&mut self, target: ConnectionState) -> bool {
        self.state.wait_for(|state| *state == target).await.is_ok()
    }
}

#[derive(Debug)]
struct ActiveSubscription {
    status: SubscriptionStatus,
    shutdown: oneshot::Sender<()>,
    pump: JoinHandle<()>,
}

impl ActiveSubscription {
    async fn close(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.pump.await {
            warn!("Pump for {} ended abnormally: {e}", self.status.topic);
        }
    }
}

pub struct Multiplexer {
    base_url: Url,
    handler: Arc<dyn UpstreamHandler>,
    policy: ReconnectPolicy,
    active: HashMap<String, ActiveSubscription>,
}

impl Multiplexer {
    /// Create a multiplexer subscribing under `base_url`
    /// (e.g. `ws://localhost:8888/subscribe/`).
    pub fn new(base_url: Url, handler: impl UpstreamHandler) -> Self {
        Self {
            base_url,
            handler: Arc::new(handler),
            policy: ReconnectPolicy::disabled(),
            active: HashMap::new(),
        }
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Subscribe to `topic_name`, optionally under `instance_id`.
    ///
    /// An empty name fails with `InvalidArgument`. A key that already has a
    /// live subscription fails with `AlreadySubscribed`; a closed one is
    /// replaced. An unreachable upstream fails with `Connection` unless
    /// reconnect is enabled, in which case the key starts out `Connecting`.
    pub async fn subscribe(
        &mut self,
        topic_name: &str,
        instance_id: Option<&str>,
    ) -> Result<SubscriptionStatus> {
        let topic = Topic::new(topic_name, instance_id)?;
        self.subscribe_topic(topic).await
    }

    pub async fn subscribe_topic(&mut self, topic: Topic) -> Result<SubscriptionStatus> {
        let key = topic.display_key();

        if let Some(existing) = self.active.get(&key) {
            if existing.status.state() != ConnectionState::Closed {
                return Err(RelayError::AlreadySubscribed(key));
            }
        }
        if let Some(stale) = self.active.remove(&key) {
            stale.close().await;
        }

        let (first, initial_state) =
            match Subscription::open(topic.clone(), &self.base_url).await {
                Ok(subscription) => {
                    debug!("{key} streaming from {}", subscription.url());
                    (Some(subscription), ConnectionState::Open)
                }
                // With reconnect on, an upstream that is down now is retried
                // like one that dropped later.
                Err(e @ RelayError::Connection { .. }) if self.policy.enabled => {
                    warn!("Upstream for {key} unavailable, retrying: {e}");
                    (None, ConnectionState::Connecting)
                }
                Err(e) => return Err(e),
            };

        let (state_tx, state_rx) = watch::channel(initial_state);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let pump = tokio::spawn(pump(
            first,
            topic.clone(),
            self.base_url.clone(),
            self.handler.clone(),
            self.policy,
            state_tx,
            shutdown_rx,
        ));

        let status = SubscriptionStatus {
            topic,
            state: state_rx,
        };
        self.active.insert(
            key,
            ActiveSubscription {
                status: status.clone(),
                shutdown: shutdown_tx,
                pump,
            },
        );
        Ok(status)
    }

    /// Tear down the subscription under `key`. Returns `false` if there was
    /// none.
    pub async fn unsubscribe(&mut self, key: &str) -> bool {
        match self.active.remove(key) {
            Some(active) => {
                active.close().await;
                info!("Unsubscribed from {key}");
                true
            }
            None => false,
        }
    }

    pub fn state(&self, key: &str) -> Option<ConnectionState> {
        self.active.get(key).map(|a| a.status.state())
    }

    pub fn status(&self, key: &str) -> Option<SubscriptionStatus> {
        self.active.get(key).map(|a| a.status.clone())
    }

    /// Display keys of every subscription, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.active.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Resolves once every subscription has reached `Closed`.
    pub async fn wait_closed(&self) {
        let statuses: Vec<SubscriptionStatus> =
            self.active.values().map(|a| a.status.clone()).collect();
        for mut status in statuses {
            status.wait_for(ConnectionState::Closed).await;
        }
    }

    /// Tear down every subscription.
    pub async fn shutdown(&mut self) {
        for (key, active) in self.active.drain() {
            debug!("Closing subscription {key}");
            active.close().await;
        }
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("base_url", &self.base_url.as_str())
            .field("policy", &self.policy)
            .field("keys", &self.keys())
            .finish()
    }
}

async fn pump(
    first: Option<Subscription>,
    topic: Topic,
    base_url: Url,
    handler: Arc<dyn UpstreamHandler>,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut next = first;

    loop {
        let mut subscription = match next.take() {
            Some(subscription) => subscription,
            None => match reconnect(&topic, &base_url, policy, &state, &mut shutdown).await {
                Some(subscription) => subscription,
                None => break,
            },
        };
        let reason = drive(&mut subscription, &topic, handler.as_ref(), &mut shutdown).await;
        if reason == CloseReason::Local {
            break;
        }
    }

    state.send_replace(ConnectionState::Closed);
}

/// Feed one subscription's events to the handler until it closes. Returns
/// `Local` when the close was requested through `shutdown`.
async fn drive(
    subscription: &mut Subscription,
    topic: &Topic,
    handler: &dyn UpstreamHandler,
    shutdown: &mut oneshot::Receiver<()>,
) -> CloseReason {
    let mut closing = false;

    loop {
        let event = if closing {
            subscription.next_event().await
        } else {
            tokio::select! {
                _ = &mut *shutdown => {
                    subscription.close();
                    closing = true;
                    continue;
                }
                event = subscription.next_event() => event,
            }
        };

        match event {
            Some(UpstreamEvent::Opened) => handler.on_open(topic),
            Some(UpstreamEvent::Message(message)) => handler.on_message(topic, message),
            Some(UpstreamEvent::Closed(reason)) => {
                handler.on_close(topic, &reason);
                return if closing { CloseReason::Local } else { reason };
            }
            None => return CloseReason::Local,
        }
    }
}

async fn reconnect(
    topic: &Topic,
    base_url: &Url,
    policy: ReconnectPolicy,
    state: &watch::Sender<ConnectionState>,
    shutdown: &mut oneshot::Receiver<()>,
) -> Option<Subscription> {
    let mut attempt = 0;

    while policy.allows(attempt) {
        let delay = policy.delay_for(attempt);
        attempt += 1;
        state.send_replace(ConnectionState::Connecting);
        info!("Reconnecting to {topic} in {delay:?} (attempt {attempt})");

        tokio::select! {
            _ = &mut *shutdown => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        let result = tokio::select! {
            _ = &mut *shutdown => return None,
            result = Subscription::open(topic.clone(), base_url) => result,
        };
        match result {
            Ok(subscription) => {
                state.send_replace(ConnectionState::Open);
                return Some(subscription);
            }
            Err(e) => warn!("Reconnect to {topic} failed: {e}"),
        }
    }

    if policy.enabled {
        error!("Giving up on {topic} after {attempt} reconnect attempts");
    }
    None
}

#[cfg(test)]
mod tests;
