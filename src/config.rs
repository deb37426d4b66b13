use super::Result;
use eyre::eyre;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Group used when an option is set without one
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// Configuration service consumed by fixtures and the code under test.
///
/// Overrides shadow defaults until `reset` (or `clear_override`) removes them.
pub trait ConfigService: Send + Sync {
    fn set_default(&self, key: &str, value: &str, group: Option<&str>);
    fn set_override(&self, key: &str, value: &str, group: Option<&str>);
    fn clear_override(&self, key: &str, group: Option<&str>);
    fn get(&self, key: &str, group: Option<&str>) -> Option<String>;
    /// Drops every override, leaving defaults in place
    fn reset(&self);
}

type OptionKey = (String, String);

fn option_key(key: &str, group: Option<&str>) -> OptionKey {
    (group.unwrap_or(DEFAULT_GROUP).to_string(), key.to_string())
}

/// In-memory configuration with a layer of per-test overrides
#[derive(Debug, Default)]
pub struct ConfigOverlay {
    defaults: RwLock<HashMap<OptionKey, String>>,
    overrides: RwLock<HashMap<OptionKey, String>>,
}

impl ConfigOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an option into the requested type
    pub fn get_parsed<T>(&self, key: &str, group: Option<&str>) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self
            .get(key, group)
            .ok_or_else(|| eyre!("Option {}.{} is not set", group.unwrap_or(DEFAULT_GROUP), key))?;
        raw.parse()
            .map_err(|e| eyre!("Invalid value '{}' for option {}: {}", raw, key, e))
    }

    /// Number of active overrides
    pub fn override_count(&self) -> usize {
        self.overrides.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl ConfigService for ConfigOverlay {
    fn set_default(&self, key: &str, value: &str, group: Option<&str>) {
        self.defaults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(option_key(key, group), value.to_string());
    }

    fn set_override(&self, key: &str, value: &str, group: Option<&str>) {
        debug!("config override {}.{} = {}", group.unwrap_or(DEFAULT_GROUP), key, value);
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(option_key(key, group), value.to_string());
    }

    fn clear_override(&self, key: &str, group: Option<&str>) {
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&option_key(key, group));
    }

    fn get(&self, key: &str, group: Option<&str>) -> Option<String> {
        let option = option_key(key, group);
        if let Some(value) = self
            .overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&option)
        {
            return Some(value.clone());
        }
        self.defaults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&option)
            .cloned()
    }

    fn reset(&self) {
        self.overrides.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
