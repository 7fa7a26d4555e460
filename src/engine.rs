//! Request correlation engine
//!
//! The watch has no request ids: a response is matched to its request by
//! the correlation key derived from the response bytes. The engine keeps
//! one list of waiters per key so at most one round trip per key is in
//! flight, and caches every value a request received until the key is
//! written or the connection is reset.

use crate::config::EngineConfig;
use crate::messages::{CorrelationKey, WatchMessage};
use crate::router::{Delivery, Topic, TopicRouter};
use crate::types::{GShockError, Result};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::oneshot;

type Waiter = oneshot::Sender<Result<WatchMessage>>;

/// One outstanding read of a key
struct RoundTrip {
    id: u64,
    /// Waiters in arrival order
    waiters: Vec<Waiter>,
    /// The key was written while this read was in flight
    stale: bool,
}

#[derive(Default)]
struct EngineState {
    cache: HashMap<CorrelationKey, WatchMessage>,
    pending: HashMap<CorrelationKey, RoundTrip>,
    next_id: u64,
}

/// Cache plus in-flight request table for one connection session
pub struct CorrelationEngine {
    config: EngineConfig,
    state: Mutex<EngineState>,
}

/// Owns a caller's receiver and cleans up when its `request` future ends
///
/// If the caller goes away while it is still sending the read request,
/// the other waiters are released so one of them can send it again.
struct PendingGuard<'a> {
    engine: &'a CorrelationEngine,
    key: &'a CorrelationKey,
    round_trip: u64,
    rx: oneshot::Receiver<Result<WatchMessage>>,
    sending: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.rx.close();
        if self.sending {
            self.engine.abandon(self.key, self.round_trip);
        } else {
            self.engine.prune(self.key);
        }
    }
}

impl CorrelationEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: Mutex::new(EngineState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe the engine to every data topic of `router`
    pub fn attach(self: &Arc<Self>, router: &TopicRouter, subscriber_id: &str) {
        for topic in Topic::DATA {
            let engine: Weak<Self> = Arc::downgrade(self);
            router.subscribe(
                topic,
                subscriber_id,
                Arc::new(move |delivery: &Delivery| {
                    if let Some(engine) = engine.upgrade() {
                        engine.deliver(delivery);
                    }
                }),
            );
        }
    }

    /// Get the value for `key`, from the cache or from the watch
    ///
    /// On a cache miss the first caller for a key runs `producer`, which
    /// must ask the watch to send the value. Callers arriving while that
    /// round trip is in flight wait for the same response. If the first
    /// caller is dropped before its request went out, the next waiter runs
    /// its own `producer` instead.
    pub async fn request<F, Fut>(&self, key: &CorrelationKey, producer: F) -> Result<WatchMessage>
    where
        F: FnOnce(CorrelationKey) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut producer = Some(producer);
        loop {
            match self.request_once(key, &mut producer).await {
                Err(GShockError::RequestCancelled(_)) if producer.is_some() => {
                    debug!("Previous request for {} was abandoned, sending again", key);
                }
                result => return result,
            }
        }
    }

    async fn request_once<F, Fut>(
        &self,
        key: &CorrelationKey,
        producer: &mut Option<F>,
    ) -> Result<WatchMessage>
    where
        F: FnOnce(CorrelationKey) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let (rx, round_trip, leader) = {
            let mut state = self.lock();
            if let Some(hit) = state.cache.get(key) {
                debug!("Cache hit for {}", key);
                return Ok(hit.clone());
            }
            let (tx, rx) = oneshot::channel();
            let next_id = state.next_id;
            let entry = state.pending.entry(key.clone()).or_insert_with(|| RoundTrip {
                id: next_id,
                waiters: Vec::new(),
                stale: false,
            });
            let round_trip = entry.id;
            let leader = entry.waiters.is_empty();
            entry.waiters.push(tx);
            if round_trip == next_id {
                state.next_id += 1;
            }
            (rx, round_trip, leader)
        };
        let mut guard = PendingGuard {
            engine: self,
            key,
            round_trip,
            rx,
            sending: false,
        };

        if leader {
            let producer = producer
                .take()
                .ok_or_else(|| GShockError::RequestCancelled(key.to_string()))?;
            debug!("Requesting {} from watch", key);
            guard.sending = true;
            let sent = producer(key.clone()).await;
            guard.sending = false;
            if let Err(e) = sent {
                warn!("Request for {} failed to send: {}", key, e);
                self.fail(key, e.clone());
                return Err(e);
            }
        } else {
            debug!("Joining in-flight request for {}", key);
        }

        let received = match self.config.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut guard.rx).await {
                Ok(received) => received,
                Err(_) => {
                    warn!("Timed out after {:?} waiting for {}", limit, key);
                    return Err(GShockError::Timeout(key.to_string()));
                }
            },
            None => (&mut guard.rx).await,
        };

        received.unwrap_or_else(|_| Err(GShockError::RequestCancelled(key.to_string())))
    }

    /// Push a new value for `key` to the watch
    ///
    /// The cache entry is removed before the write starts, so a `request`
    /// issued after `set` always goes back to the watch. A read already in
    /// flight still resolves its waiters but is not cached.
    pub async fn set<Fut>(&self, key: &CorrelationKey, write: Fut) -> Result<()>
    where
        Fut: Future<Output = Result<()>>,
    {
        self.invalidate(key);
        write.await
    }

    /// Resolve the waiters of the delivered key
    ///
    /// Successful values are cached only when someone asked for them.
    pub fn deliver(&self, delivery: &Delivery) {
        let mut state = self.lock();
        let Some(RoundTrip { waiters, stale, .. }) = state.pending.remove(&delivery.key) else {
            debug!("No request waiting for {}", delivery.key);
            return;
        };

        match &delivery.value {
            Ok(value) => {
                let message = WatchMessage {
                    key: delivery.key.clone(),
                    raw: delivery.raw.clone(),
                    value: value.clone(),
                };
                if stale {
                    debug!("Not caching {}, it was written since the read", delivery.key);
                } else {
                    state.cache.insert(delivery.key.clone(), message.clone());
                }
                drop(state);
                for waiter in waiters {
                    let _ = waiter.send(Ok(message.clone()));
                }
            }
            Err(e) => {
                drop(state);
                for waiter in waiters {
                    let _ = waiter.send(Err(e.clone()));
                }
            }
        }
    }

    /// Fail every waiter of one key
    pub fn fail(&self, key: &CorrelationKey, error: GShockError) {
        let waiters = self
            .lock()
            .pending
            .remove(key)
            .map_or_else(Vec::new, |trip| trip.waiters);
        for waiter in waiters {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    /// Drop waiters whose caller went away, and the key once none are left
    fn prune(&self, key: &CorrelationKey) {
        let mut state = self.lock();
        if let Some(trip) = state.pending.get_mut(key) {
            trip.waiters.retain(|w| !w.is_closed());
            if trip.waiters.is_empty() {
                state.pending.remove(key);
            }
        }
    }

    /// Release the waiters of a round trip whose request was never sent
    fn abandon(&self, key: &CorrelationKey, round_trip: u64) {
        let waiters = {
            let mut state = self.lock();
            if state.pending.get(key).map(|trip| trip.id) != Some(round_trip) {
                return;
            }
            state.pending.remove(key).map_or_else(Vec::new, |trip| trip.waiters)
        };
        debug!("Request for {} abandoned while sending", key);
        for waiter in waiters {
            let _ = waiter.send(Err(GShockError::RequestCancelled(key.to_string())));
        }
    }

    pub fn invalidate(&self, key: &CorrelationKey) {
        let mut state = self.lock();
        if let Some(trip) = state.pending.get_mut(key) {
            trip.stale = true;
        }
        if state.cache.remove(key).is_some() {
            debug!("Invalidated {}", key);
        }
    }

    pub fn cached(&self, key: &CorrelationKey) -> Option<WatchMessage> {
        self.lock().cache.get(key).cloned()
    }

    pub fn clear_cache(&self) {
        self.lock().cache.clear();
    }

    /// Drop all cached values and fail every pending request with `error`
    pub fn reset(&self, error: GShockError) {
        let pending = {
            let mut state = self.lock();
            state.cache.clear();
            std::mem::take(&mut state.pending)
        };
        if !pending.is_empty() {
            info!("Failing {} pending requests: {}", pending.len(), error);
        }
        for (_key, trip) in pending {
            for waiter in trip.waiters {
                let _ = waiter.send(Err(error.clone()));
            }
        }
    }

    /// Start a fresh session
    pub fn init(&self) {
        self.reset(GShockError::ConnectionLost);
    }

    pub fn is_pending(&self, key: &CorrelationKey) -> bool {
        self.lock().pending.contains_key(key)
    }

    pub fn waiter_count(&self, key: &CorrelationKey) -> usize {
        self.lock()
            .pending
            .get(key)
            .map_or(0, |trip| trip.waiters.len())
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
