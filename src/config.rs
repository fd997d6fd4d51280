//! Registry configuration.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set with the builder-style setters
//! 2. **Environment variables**: values from `LOCKTRACK_*` env vars
//! 3. **Config file**: a TOML `[locktrack]` table, loaded by
//!    [`LockTrackConfig::from_toml_file_and_env`] (requires `config-file`)
//! 4. **Defaults**: [`LockTrackConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `LOCKTRACK_DEVELOPER_BUILD` | `bool` | `developer_build` |
//! | `LOCKTRACK_DEBUG_BUILD` | `bool` | `debug_build` |
//! | `LOCKTRACK_COLLECT_LOCK_TREE` | `bool` | `collect_lock_tree` |
//! | `LOCKTRACK_FATAL_ACTION` | `panic` \| `abort` | `fatal_action` |

use crate::error::ConfigError;
use crate::report::{Reporter, TracingReporter};
use crate::signature::wall_clock_seconds;
use crate::tree::{LockTreeCollector, MemoryLockTree};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Environment variable name for the developer-build flag.
pub const ENV_DEVELOPER_BUILD: &str = "LOCKTRACK_DEVELOPER_BUILD";
/// Environment variable name for the debug-build flag.
pub const ENV_DEBUG_BUILD: &str = "LOCKTRACK_DEBUG_BUILD";
/// Environment variable name for the initial lock-tree toggle.
pub const ENV_COLLECT_LOCK_TREE: &str = "LOCKTRACK_COLLECT_LOCK_TREE";
/// Environment variable name for the fatal action.
pub const ENV_FATAL_ACTION: &str = "LOCKTRACK_FATAL_ACTION";

/// What happens after a violation has been reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FatalAction {
    /// Unwind with the [`LockViolation`](crate::LockViolation) as payload.
    ///
    /// The violation can be caught, so this is meant for tests. The
    /// violation text is sent to the reporter before unwinding; the default
    /// panic hook only prints `Box<dyn Any>` for the typed payload, so
    /// downcast it to read the violation.
    Panic,
    /// Abort the process immediately.
    #[default]
    Abort,
}

impl FromStr for FatalAction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "panic" => Ok(Self::Panic),
            "abort" => Ok(Self::Abort),
            _ => Err(ConfigError::InvalidValue {
                key: ENV_FATAL_ACTION.to_owned(),
                expected: "panic or abort",
                value: s.to_owned(),
            }),
        }
    }
}

/// Configuration of a [`LockRegistry`](crate::LockRegistry).
#[derive(Clone)]
pub struct LockTrackConfig {
    /// External developer-build flag; lock-tree collection needs it.
    pub developer_build: bool,
    /// External debug-build flag; lock-tree collection needs it.
    pub debug_build: bool,
    /// Initial lock-tree toggle, still gated by both build flags.
    pub collect_lock_tree: bool,
    /// What a violation does after it is reported.
    pub fatal_action: FatalAction,
    /// Sink for warnings and fatal messages.
    pub reporter: Arc<dyn Reporter>,
    /// Receiver of lock-ancestry data when collection is enabled.
    pub lock_tree: Arc<dyn LockTreeCollector>,
    /// Coarse time source that seeds the instance syndrome.
    pub syndrome_clock: fn() -> u32,
}

impl Default for LockTrackConfig {
    fn default() -> Self {
        Self {
            developer_build: false,
            debug_build: cfg!(debug_assertions),
            collect_lock_tree: false,
            fatal_action: FatalAction::default(),
            reporter: Arc::new(TracingReporter),
            lock_tree: Arc::new(MemoryLockTree::new()),
            syndrome_clock: wall_clock_seconds,
        }
    }
}

impl fmt::Debug for LockTrackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockTrackConfig")
            .field("developer_build", &self.developer_build)
            .field("debug_build", &self.debug_build)
            .field("collect_lock_tree", &self.collect_lock_tree)
            .field("fatal_action", &self.fatal_action)
            .field("reporter", &self.reporter)
            .field("lock_tree", &self.lock_tree)
            .finish_non_exhaustive()
    }
}

impl LockTrackConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Defaults, then the TOML file at `path`, then environment overrides.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file_and_env(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        apply_toml_config(&mut config, &parse_toml_file(path)?)?;
        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Sets the developer-build flag.
    #[must_use]
    pub fn developer_build(mut self, enabled: bool) -> Self {
        self.developer_build = enabled;
        self
    }

    /// Sets the debug-build flag.
    #[must_use]
    pub fn debug_build(mut self, enabled: bool) -> Self {
        self.debug_build = enabled;
        self
    }

    /// Sets the initial lock-tree toggle.
    #[must_use]
    pub fn collect_lock_tree(mut self, enabled: bool) -> Self {
        self.collect_lock_tree = enabled;
        self
    }

    /// Sets the fatal action.
    #[must_use]
    pub fn fatal_action(mut self, action: FatalAction) -> Self {
        self.fatal_action = action;
        self
    }

    /// Sets the reporter.
    #[must_use]
    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Sets the lock-tree collector.
    #[must_use]
    pub fn lock_tree(mut self, collector: Arc<dyn LockTreeCollector>) -> Self {
        self.lock_tree = collector;
        self
    }

    /// Sets the syndrome time source.
    #[must_use]
    pub fn syndrome_clock(mut self, clock: fn() -> u32) -> Self {
        self.syndrome_clock = clock;
        self
    }
}

/// Apply environment variable overrides to a [`LockTrackConfig`].
///
/// Only variables that are set are applied. A set variable with an
/// unparseable value is an error.
pub fn apply_env_overrides(config: &mut LockTrackConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_DEVELOPER_BUILD) {
        config.developer_build = parse_bool(ENV_DEVELOPER_BUILD, &val)?;
    }
    if let Some(val) = read_env(ENV_DEBUG_BUILD) {
        config.debug_build = parse_bool(ENV_DEBUG_BUILD, &val)?;
    }
    if let Some(val) = read_env(ENV_COLLECT_LOCK_TREE) {
        config.collect_lock_tree = parse_bool(ENV_COLLECT_LOCK_TREE, &val)?;
    }
    if let Some(val) = read_env(ENV_FATAL_ACTION) {
        config.fatal_action = val.parse()?;
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_bool(var_name: &str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: var_name.to_owned(),
            expected: "bool (true/false/1/0/yes/no/on/off)",
            value: val.to_owned(),
        }),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable settings.
///
/// ```toml
/// [locktrack]
/// developer_build = true
/// debug_build = true
/// collect_lock_tree = false
/// fatal_action = "abort"
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct LockTrackToml {
    /// The `[locktrack]` table.
    #[serde(default)]
    pub locktrack: LockTrackTable,
}

/// Contents of the `[locktrack]` table.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct LockTrackTable {
    /// Developer-build flag.
    pub developer_build: Option<bool>,
    /// Debug-build flag.
    pub debug_build: Option<bool>,
    /// Initial lock-tree toggle.
    pub collect_lock_tree: Option<bool>,
    /// `"panic"` or `"abort"`.
    pub fatal_action: Option<String>,
}

/// Apply a parsed TOML config. Only present keys override.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(
    config: &mut LockTrackConfig,
    toml: &LockTrackToml,
) -> Result<(), ConfigError> {
    let table = &toml.locktrack;
    if let Some(v) = table.developer_build {
        config.developer_build = v;
    }
    if let Some(v) = table.debug_build {
        config.debug_build = v;
    }
    if let Some(v) = table.collect_lock_tree {
        config.collect_lock_tree = v;
    }
    if let Some(ref v) = table.fatal_action {
        config.fatal_action = v.parse()?;
    }
    Ok(())
}

/// Parse a TOML string.
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<LockTrackToml, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Read and parse a TOML file.
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<LockTrackToml, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_toml_str(&content)
}
