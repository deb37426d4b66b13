use super::Result;
use eyre::eyre;
use std::collections::HashMap;
use std::time::Duration;

/// Name of an interactive debugger to attach when a test fails
pub const POST_MORTEM_DEBUGGER_VAR: &str = "OS_POST_MORTEM_DEBUGGER";
/// Boolean toggle for the deep plugin deallocation check
pub const CHECK_PLUGIN_DEALLOCATION_VAR: &str = "OS_CHECK_PLUGIN_DEALLOCATION";
/// Per-test execution limit in seconds, 0 disables it
pub const TEST_TIMEOUT_VAR: &str = "OS_TEST_TIMEOUT";

const TRUE_STRINGS: [&str; 6] = ["1", "t", "true", "on", "y", "yes"];
const FALSE_STRINGS: [&str; 6] = ["0", "f", "false", "off", "n", "no"];

/// A snapshot of environment variables the harness reads its toggles from.
///
/// Tests build one explicitly instead of mutating the process environment,
/// which is shared with every other test thread.
#[derive(Debug, Clone, Default)]
pub struct Environment(HashMap<String, String>);

impl Environment {
    /// Creates a new empty environment variable set.
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Captures the variables of the current process.
    pub fn from_process() -> Self {
        Self(std::env::vars().collect())
    }

    /// Sets an environment variable in this environment set.
    ///
    /// # Arguments
    /// * `key` - The environment variable name
    /// * `value` - The environment variable value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Gets the value of an environment variable.
    pub fn get(&self, key: &str) -> Option<&String> {
        self.0.get(key)
    }

    /// Interprets a variable as a boolean.
    ///
    /// Accepts `1/t/true/on/y/yes` and `0/f/false/off/n/no`, ignoring case and
    /// surrounding whitespace. A missing variable yields `default`. Any other
    /// value yields `default`, or an error when `strict` is set.
    ///
    /// # Arguments
    /// * `key` - The environment variable name
    /// * `strict` - Reject unrecognized values instead of falling back
    /// * `default` - Value used when the variable is unset or unrecognized
    pub fn bool_flag(&self, key: &str, strict: bool, default: bool) -> Result<bool> {
        let Some(raw) = self.get(key) else {
            return Ok(default);
        };

        let value = raw.trim().to_lowercase();
        if TRUE_STRINGS.contains(&value.as_str()) {
            Ok(true)
        } else if FALSE_STRINGS.contains(&value.as_str()) {
            Ok(false)
        } else if strict {
            let acceptable: Vec<_> =
                TRUE_STRINGS.iter().chain(FALSE_STRINGS.iter()).copied().collect();
            Err(eyre!(
                "Unrecognized value '{}' for {}, acceptable values are: {}",
                raw,
                key,
                acceptable.join(", ")
            ))
        } else {
            Ok(default)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<HashMap<String, String>> for Environment {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

/// Harness-wide settings shared by every test of a run
#[derive(Debug, Clone, Default)]
pub struct HarnessConfig {
    /// Debugger attached to the process when a test fails
    pub post_mortem_debugger: Option<String>,
    /// Whether fixture teardown verifies the core plugin was released
    pub check_plugin_deallocation: bool,
    /// Upper bound on a single test body
    pub test_timeout: Option<Duration>,
}

impl HarnessConfig {
    /// Reads the harness settings from an environment snapshot
    pub fn from_environment(env: &Environment) -> Result<Self> {
        let post_mortem_debugger = env
            .get(POST_MORTEM_DEBUGGER_VAR)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let check_plugin_deallocation = env.bool_flag(CHECK_PLUGIN_DEALLOCATION_VAR, false, false)?;

        let test_timeout = match env.get(TEST_TIMEOUT_VAR) {
            Some(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .map_err(|e| eyre!("Invalid {} '{}': {}", TEST_TIMEOUT_VAR, raw, e))?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Self {
            post_mortem_debugger,
            check_plugin_deallocation,
            test_timeout,
        })
    }

    /// Reads the harness settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_environment(&Environment::from_process())
    }
}
