use super::Result;
use crate::context::TestContext;
use eyre::eyre;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Roles allowed to perform an action
type Rules = HashMap<String, Vec<String>>;

static ENFORCER: Lazy<RwLock<Option<Rules>>> = Lazy::new(|| RwLock::new(None));

fn default_rules() -> Rules {
    [
        ("create_network", vec!["admin", "member"]),
        ("create_network:shared", vec!["admin"]),
        ("get_network", vec!["admin", "member", "reader"]),
        ("delete_network", vec!["admin", "member"]),
        ("create_port:binding:host_id", vec!["admin"]),
    ]
    .into_iter()
    .map(|(action, roles)| (action.to_string(), roles.into_iter().map(String::from).collect()))
    .collect()
}

/// Loads the default rules into the process-wide enforcer
pub fn init() {
    *ENFORCER.write().unwrap_or_else(PoisonError::into_inner) = Some(default_rules());
    debug!("policy enforcer initialized");
}

/// Discards the enforcer and every rule loaded into it
pub fn reset() {
    *ENFORCER.write().unwrap_or_else(PoisonError::into_inner) = None;
}

pub fn is_initialized() -> bool {
    ENFORCER.read().unwrap_or_else(PoisonError::into_inner).is_some()
}

/// Adds or replaces the rule for `action`
pub fn set_rule(action: &str, roles: &[&str]) -> Result<()> {
    let mut enforcer = ENFORCER.write().unwrap_or_else(PoisonError::into_inner);
    let rules = enforcer.as_mut().ok_or_else(|| eyre!("policy enforcer is not initialized"))?;
    rules.insert(action.to_string(), roles.iter().map(|r| r.to_string()).collect());
    Ok(())
}

/// Whether any of `roles` may perform `action`. Unknown actions are denied.
pub fn enforce(action: &str, roles: &[&str]) -> Result<bool> {
    let enforcer = ENFORCER.read().unwrap_or_else(PoisonError::into_inner);
    let rules = enforcer.as_ref().ok_or_else(|| eyre!("policy enforcer is not initialized"))?;
    Ok(rules
        .get(action)
        .is_some_and(|allowed| roles.iter().any(|role| allowed.iter().any(|a| a == role))))
}

/// Initializes the enforcer for one test and resets it at teardown
pub fn install(ctx: &mut TestContext) {
    init();
    ctx.add_cleanup("reset policy enforcer", || {
        reset();
        Ok(())
    });
}
