//! Process-wide RPC transport state.
//!
//! Servers register their consumers here once the transport is up, and the
//! remote error modules allowed on the wire are kept next to it. Both outlive
//! any single test unless reset.

use crate::messaging::{MessagingError, TransportSettings};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::{debug, info};

/// Error modules every process accepts from remote peers
pub const BASE_EXMODS: [&str; 1] = ["testbed::error"];

static TRANSPORT: Lazy<RwLock<Option<TransportSettings>>> = Lazy::new(|| RwLock::new(None));
static EXTRA_EXMODS: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(Vec::new()));
static CONSUMERS: Lazy<Mutex<BTreeMap<String, Vec<String>>>> =
    Lazy::new(|| Mutex::new(BTreeMap::new()));

/// Brings the transport up with `settings`, replacing any previous transport
pub fn init(settings: TransportSettings) {
    info!("rpc transport initialized with driver {}", settings.driver);
    *TRANSPORT.write().unwrap_or_else(PoisonError::into_inner) = Some(settings);
}

/// Tears the transport down. Returns false if it was not up.
pub fn cleanup() -> bool {
    let previous = TRANSPORT.write().unwrap_or_else(PoisonError::into_inner).take();
    if previous.is_none() {
        debug!("rpc cleanup without an initialized transport");
    }
    previous.is_some()
}

pub fn is_initialized() -> bool {
    TRANSPORT.read().unwrap_or_else(PoisonError::into_inner).is_some()
}

/// Settings of the running transport
pub fn transport() -> Option<TransportSettings> {
    TRANSPORT.read().unwrap_or_else(PoisonError::into_inner).clone()
}

pub fn add_extra_exmods(exmods: &[&str]) {
    let mut extra = EXTRA_EXMODS.lock().unwrap_or_else(PoisonError::into_inner);
    extra.extend(exmods.iter().map(|m| m.to_string()));
}

pub fn clear_extra_exmods() {
    EXTRA_EXMODS.lock().unwrap_or_else(PoisonError::into_inner).clear();
}

/// Base error modules followed by the extra ones, in the order added
pub fn allowed_exmods() -> Vec<String> {
    let extra = EXTRA_EXMODS.lock().unwrap_or_else(PoisonError::into_inner);
    BASE_EXMODS.iter().map(|m| m.to_string()).chain(extra.iter().cloned()).collect()
}

/// Records `server` as consuming `topic`. The transport must be up.
pub fn register_consumer(topic: &str, server: &str) -> Result<(), MessagingError> {
    if !is_initialized() {
        return Err(MessagingError::NotInitialized);
    }
    CONSUMERS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(topic.to_string())
        .or_default()
        .push(server.to_string());
    debug!("{} consuming {}", server, topic);
    Ok(())
}

/// Servers consuming `topic`
pub fn consumers(topic: &str) -> Vec<String> {
    CONSUMERS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(topic)
        .cloned()
        .unwrap_or_default()
}

pub fn consumer_count() -> usize {
    CONSUMERS.lock().unwrap_or_else(PoisonError::into_inner).values().map(Vec::len).sum()
}

pub fn clear_consumers() {
    CONSUMERS.lock().unwrap_or_else(PoisonError::into_inner).clear();
}
