//! Resource event callbacks and the process-wide accessor they resolve through.
//!
//! Code under test subscribes and publishes through [`registry`], never through
//! a stored manager reference, so a test can swap in a private manager with
//! [`CallbackRegistryIsolation`].

use super::Result;
use crate::context::TestContext;
use eyre::eyre;
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, warn};

/// Fields carried with an event
pub type Payload = BTreeMap<String, String>;

/// A subscriber; receives the resource, the event and its payload
pub type Callback = Arc<dyn Fn(&str, &str, &Payload) -> Result<()> + Send + Sync>;

type EventKey = (String, String);

/// Dispatches resource events to subscribed callbacks
#[derive(Default)]
pub struct CallbacksManager {
    subscriptions: Mutex<HashMap<EventKey, Vec<(String, Callback)>>>,
}

impl CallbacksManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `callback` under `callback_id`. Re-subscribing an id replaces it.
    pub fn subscribe(&self, callback_id: &str, resource: &str, event: &str, callback: Callback) {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
        let subscribers = subscriptions
            .entry((resource.to_string(), event.to_string()))
            .or_default();
        subscribers.retain(|(id, _)| id != callback_id);
        subscribers.push((callback_id.to_string(), callback));
        debug!("subscribed {} to {}.{}", callback_id, resource, event);
    }

    pub fn unsubscribe(&self, callback_id: &str, resource: &str, event: &str) {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (resource.to_string(), event.to_string());
        if let Some(subscribers) = subscriptions.get_mut(&key) {
            subscribers.retain(|(id, _)| id != callback_id);
        }
    }

    /// Removes `callback_id` from every event
    pub fn unsubscribe_all(&self, callback_id: &str) {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
        for subscribers in subscriptions.values_mut() {
            subscribers.retain(|(id, _)| id != callback_id);
        }
    }

    /// Invokes every subscriber of the event in subscription order.
    ///
    /// All subscribers run even if some fail; failures are returned as one
    /// error naming each failed callback.
    pub fn notify(&self, resource: &str, event: &str, payload: &Payload) -> Result<()> {
        let subscribers = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(resource.to_string(), event.to_string()))
            .cloned()
            .unwrap_or_default();

        let mut errors = Vec::new();
        for (id, callback) in subscribers {
            if let Err(e) = callback(resource, event, payload) {
                warn!("callback {} failed for {}.{}: {:#}", id, resource, event, e);
                errors.push(format!("{id}: {e:#}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(eyre!("callback failures for {}.{}: {}", resource, event, errors.join("; ")))
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn clear(&self) {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

static DEFAULT_MANAGER: Lazy<Arc<CallbacksManager>> =
    Lazy::new(|| Arc::new(CallbacksManager::new()));
static SUBSTITUTE: Lazy<RwLock<Option<Arc<CallbacksManager>>>> = Lazy::new(|| RwLock::new(None));

/// The manager every registration and lookup currently resolves to
pub fn registry() -> Arc<CallbacksManager> {
    SUBSTITUTE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .unwrap_or_else(|| DEFAULT_MANAGER.clone())
}

/// Whether a private manager is substituted behind [`registry`]
pub fn is_substituted() -> bool {
    SUBSTITUTE.read().unwrap_or_else(PoisonError::into_inner).is_some()
}

/// Drops any substituted manager so [`registry`] resolves to the default again
pub fn clear_substitute() -> Option<Arc<CallbacksManager>> {
    SUBSTITUTE.write().unwrap_or_else(PoisonError::into_inner).take()
}

pub fn subscribe(callback_id: &str, resource: &str, event: &str, callback: Callback) {
    registry().subscribe(callback_id, resource, event, callback)
}

pub fn unsubscribe(callback_id: &str, resource: &str, event: &str) {
    registry().unsubscribe(callback_id, resource, event)
}

pub fn notify(resource: &str, event: &str, payload: &Payload) -> Result<()> {
    registry().notify(resource, event, payload)
}

/// Gives one test a private callbacks manager
pub struct CallbackRegistryIsolation;

impl CallbackRegistryIsolation {
    /// Substitutes a fresh manager behind the accessor for the rest of the test.
    ///
    /// The cleanup discards it with all of its subscriptions; nothing is
    /// merged back into the default manager.
    pub fn install(ctx: &mut TestContext) -> Arc<CallbacksManager> {
        let private = Arc::new(CallbacksManager::new());
        let previous = SUBSTITUTE
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(private.clone());
        if previous.is_some() {
            warn!("replacing a callbacks manager left behind by another test");
        }

        ctx.add_cleanup("discard private callbacks manager", || {
            clear_substitute();
            Ok(())
        });

        private
    }
}
