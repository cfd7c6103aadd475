//! Configuration sources and typed sections.
//!
//! A [`ConfigProvider`] consults its [`ConfigSource`]s in the order they
//! were added; the first source that has a key wins. Keys are dotted paths
//! (`runtime.worker.max_restarts`).
//!
//! | Source                      | Key `runtime.shutdown_timeout_ms` is read from |
//! |-----------------------------|------------------------------------------------|
//! | [`EnvironmentConfigSource`] | `APP_RUNTIME__SHUTDOWN_TIMEOUT_MS` (prefix `APP`) |
//! | [`JsonConfigSource`]        | `{"runtime": {"shutdown_timeout_ms": 1000}}`   |
//! | [`MemoryConfigSource`]      | the literal key                                |
//!
//! Sections are deserialized with serde, so configuration can be handed to
//! providers as plain structs (see [`Container::add_config_section`]).

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::AppOptions;
use crate::container::Container;
use crate::error::DiResult;
use crate::worker::{BackoffConfig, WorkerOptions};

/// Configuration errors.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No source has the key.
    #[error("config: key not found: {0}")]
    NotFound(String),
    /// The value exists but has another type.
    #[error("config: {key} is not {expected}")]
    TypeMismatch {
        /// Requested key.
        key: String,
        /// Expected type.
        expected: &'static str,
    },
    /// A configuration file could not be read.
    #[error("config: read {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A JSON document could not be parsed.
    #[error("config: invalid json: {0}")]
    Parse(#[source] serde_json::Error),
    /// A section did not match the requested type.
    #[error("config: section {section}: {source}")]
    Section {
        /// Section path.
        section: String,
        /// Deserialization error.
        #[source]
        source: serde_json::Error,
    },
}

/// A configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(Vec<ConfigValue>),
    Object(BTreeMap<String, ConfigValue>),
}

impl ConfigValue {
    /// String contents, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer contents, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Boolean contents, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Non-negative integer read as milliseconds.
    pub fn as_duration_ms(&self) -> Option<Duration> {
        self.as_i64()
            .and_then(|ms| u64::try_from(ms).ok())
            .map(Duration::from_millis)
    }

    /// Parses an environment string: integer, float, boolean, else string.
    fn parse_scalar(raw: String) -> Self {
        if let Ok(int) = raw.parse::<i64>() {
            ConfigValue::Integer(int)
        } else if let Ok(float) = raw.parse::<f64>() {
            ConfigValue::Float(float)
        } else if let Ok(boolean) = raw.parse::<bool>() {
            ConfigValue::Boolean(boolean)
        } else {
            ConfigValue::String(raw)
        }
    }

    fn into_json(self) -> serde_json::Value {
        match self {
            ConfigValue::Boolean(b) => serde_json::Value::Bool(b),
            ConfigValue::Integer(i) => serde_json::Value::from(i),
            ConfigValue::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ConfigValue::String(s) => serde_json::Value::String(s),
            ConfigValue::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(ConfigValue::into_json).collect())
            }
            ConfigValue::Object(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into_json())).collect(),
            ),
        }
    }

    fn from_json(value: serde_json::Value) -> Option<Self> {
        Some(match value {
            serde_json::Value::Null => return None,
            serde_json::Value::Bool(b) => ConfigValue::Boolean(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => ConfigValue::Integer(i),
                None => ConfigValue::Float(n.as_f64()?),
            },
            serde_json::Value::String(s) => ConfigValue::String(s),
            serde_json::Value::Array(items) => {
                ConfigValue::Array(items.into_iter().filter_map(ConfigValue::from_json).collect())
            }
            serde_json::Value::Object(map) => ConfigValue::Object(
                map.into_iter()
                    .filter_map(|(k, v)| Some((k, ConfigValue::from_json(v)?)))
                    .collect(),
            ),
        })
    }
}

/// A source of configuration values.
pub trait ConfigSource: Send + Sync + std::fmt::Debug {
    /// Value for a dotted key.
    fn get(&self, key: &str) -> Option<ConfigValue>;

    /// Every leaf key this source can answer.
    fn keys(&self) -> Vec<String>;
}

/// Environment variables.
///
/// Dots in keys map to `__`, and a prefix is joined with `_`, so
/// `worker.max_restarts` with prefix `app` reads `APP_WORKER__MAX_RESTARTS`.
#[derive(Debug, Default)]
pub struct EnvironmentConfigSource {
    prefix: Option<String>,
}

impl EnvironmentConfigSource {
    pub fn new() -> Self {
        Self { prefix: None }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into().to_uppercase()),
        }
    }

    fn var_name(&self, key: &str) -> String {
        let name = key.replace('.', "__").to_uppercase();
        match &self.prefix {
            Some(prefix) => format!("{prefix}_{name}"),
            None => name,
        }
    }
}

impl ConfigSource for EnvironmentConfigSource {
    fn get(&self, key: &str) -> Option<ConfigValue> {
        env::var(self.var_name(key)).ok().map(ConfigValue::parse_scalar)
    }

    fn keys(&self) -> Vec<String> {
        env::vars()
            .filter_map(|(name, _)| {
                let rest = match &self.prefix {
                    Some(prefix) => name.strip_prefix(prefix.as_str())?.strip_prefix('_')?,
                    None => name.as_str(),
                };
                Some(rest.to_lowercase().replace("__", "."))
            })
            .collect()
    }
}

/// A JSON document, from a string or a file.
#[derive(Debug)]
pub struct JsonConfigSource {
    path: Option<PathBuf>,
    root: RwLock<serde_json::Value>,
}

impl JsonConfigSource {
    /// Parses `json`.
    pub fn from_str(json: &str) -> Result<Self, ConfigError> {
        let root = serde_json::from_str(json).map_err(ConfigError::Parse)?;
        Ok(Self {
            path: None,
            root: RwLock::new(root),
        })
    }

    /// Reads and parses the file at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = Self {
            path: Some(path.as_ref().to_path_buf()),
            root: RwLock::new(serde_json::Value::Null),
        };
        source.reload()?;
        Ok(source)
    }

    /// Re-reads the backing file. A no-op for string sources.
    ///
    /// On error the previous document is kept.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let parsed = serde_json::from_str(&content).map_err(ConfigError::Parse)?;
        *self.root.write() = parsed;
        tracing::debug!(path = %path.display(), "configuration reloaded");
        Ok(())
    }
}

fn collect_leaves(prefix: &str, value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (name, child) in map {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}.{name}")
                };
                collect_leaves(&path, child, out);
            }
        }
        serde_json::Value::Null => {}
        _ => out.push(prefix.to_string()),
    }
}

impl ConfigSource for JsonConfigSource {
    fn get(&self, key: &str) -> Option<ConfigValue> {
        let root = self.root.read();
        let mut node = &*root;
        for part in key.split('.') {
            node = node.get(part)?;
        }
        ConfigValue::from_json(node.clone())
    }

    fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        collect_leaves("", &self.root.read(), &mut keys);
        keys
    }
}

/// In-memory key/value pairs, mostly for tests and defaults.
#[derive(Debug, Default)]
pub struct MemoryConfigSource {
    values: HashMap<String, ConfigValue>,
}

impl MemoryConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value.
    pub fn with(mut self, key: impl Into<String>, value: ConfigValue) -> Self {
        self.values.insert(key.into(), value);
        self
    }
}

impl ConfigSource for MemoryConfigSource {
    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.values.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }
}

/// Ordered configuration sources with a lookup cache.
///
/// # Examples
///
/// ```
/// use ferrous_runtime::config::{ConfigProvider, ConfigValue, JsonConfigSource, MemoryConfigSource};
///
/// let config = ConfigProvider::new()
///     .with_source(MemoryConfigSource::new().with("db.pool", ConfigValue::Integer(4)))
///     .with_source(JsonConfigSource::from_str(r#"{"db": {"pool": 16, "url": "pg://"}}"#).unwrap());
///
/// assert_eq!(config.get_i64("db.pool").unwrap(), 4);
/// assert_eq!(config.get_string("db.url").unwrap(), "pg://");
/// ```
pub struct ConfigProvider {
    sources: Vec<Box<dyn ConfigSource>>,
    cache: RwLock<HashMap<String, ConfigValue>>,
}

impl std::fmt::Debug for ConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigProvider")
            .field("sources", &self.sources)
            .field("cached", &self.cache.read().len())
            .finish()
    }
}

impl Default for ConfigProvider {
    /// Environment variables only.
    fn default() -> Self {
        Self::new().with_source(EnvironmentConfigSource::new())
    }
}

impl ConfigProvider {
    /// A provider with no sources.
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Adds a source after the existing ones (lower priority).
    pub fn add_source(&mut self, source: Box<dyn ConfigSource>) {
        self.sources.push(source);
        self.cache.write().clear();
    }

    /// Builder form of [`add_source`](Self::add_source).
    pub fn with_source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.add_source(Box::new(source));
        self
    }

    /// Value for `key` from the first source that has it.
    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        if let Some(value) = self.cache.read().get(key) {
            return Some(value.clone());
        }
        let value = self.sources.iter().find_map(|source| source.get(key))?;
        self.cache.write().insert(key.to_string(), value.clone());
        Some(value)
    }

    fn require(&self, key: &str) -> Result<ConfigValue, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::NotFound(key.to_string()))
    }

    fn mismatch(key: &str, expected: &'static str) -> ConfigError {
        ConfigError::TypeMismatch {
            key: key.to_string(),
            expected,
        }
    }

    pub fn get_string(&self, key: &str) -> Result<String, ConfigError> {
        match self.require(key)? {
            ConfigValue::String(s) => Ok(s),
            _ => Err(Self::mismatch(key, "a string")),
        }
    }

    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|_| default.to_string())
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, ConfigError> {
        self.require(key)?
            .as_i64()
            .ok_or_else(|| Self::mismatch(key, "an integer"))
    }

    pub fn get_i64_or(&self, key: &str, default: i64) -> i64 {
        self.get_i64(key).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, ConfigError> {
        self.require(key)?
            .as_bool()
            .ok_or_else(|| Self::mismatch(key, "a boolean"))
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    /// Integer milliseconds as a [`Duration`].
    pub fn get_duration_ms(&self, key: &str) -> Result<Duration, ConfigError> {
        self.require(key)?
            .as_duration_ms()
            .ok_or_else(|| Self::mismatch(key, "a non-negative millisecond count"))
    }

    pub fn get_duration_ms_or(&self, key: &str, default: Duration) -> Duration {
        self.get_duration_ms(key).unwrap_or(default)
    }

    /// Drops cached lookups so the next read consults the sources again.
    pub fn invalidate_cache(&self) {
        self.cache.write().clear();
    }

    /// Every key any source can answer, sorted and deduplicated.
    pub fn all_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.sources.iter().flat_map(|s| s.keys()).collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Deserializes every key under `section` into `T`.
    ///
    /// Each leaf is looked up individually, so sources can override single
    /// fields of a section. Missing fields are left to `T`'s serde defaults.
    pub fn get_section<T: DeserializeOwned>(&self, section: &str) -> Result<T, ConfigError> {
        let mut root = serde_json::Map::new();
        let prefix = format!("{section}.");
        for key in self.all_keys() {
            let Some(relative) = key.strip_prefix(&prefix) else {
                continue;
            };
            let Some(value) = self.get(&key) else {
                continue;
            };
            insert_path(&mut root, relative, value.into_json());
        }
        serde_json::from_value(serde_json::Value::Object(root)).map_err(|source| ConfigError::Section {
            section: section.to_string(),
            source,
        })
    }
}

fn insert_path(root: &mut serde_json::Map<String, serde_json::Value>, path: &str, value: serde_json::Value) {
    match path.split_once('.') {
        None => {
            root.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = root
                .entry(head.to_string())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            if !child.is_object() {
                *child = serde_json::Value::Object(serde_json::Map::new());
            }
            if let serde_json::Value::Object(map) = child {
                insert_path(map, rest, value);
            }
        }
    }
}

/// Runtime settings, usually read from the `runtime` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Lifecycle start bound; absent means unbounded.
    pub start_timeout_ms: Option<u64>,
    /// Shutdown bound.
    pub shutdown_timeout_ms: u64,
    /// Defaults for container-declared workers.
    pub worker: WorkerConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let options = AppOptions::default();
        Self {
            start_timeout_ms: options.start_timeout.map(duration_ms),
            shutdown_timeout_ms: duration_ms(options.shutdown_timeout),
            worker: WorkerConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Reads the `runtime` section.
    pub fn load(config: &ConfigProvider) -> Result<Self, ConfigError> {
        config.get_section("runtime")
    }

    /// Application timeouts.
    pub fn app_options(&self) -> AppOptions {
        AppOptions {
            start_timeout: self.start_timeout_ms.map(Duration::from_millis),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
        }
    }
}

/// Worker restart settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub critical: bool,
    /// Absent means unlimited restarts.
    pub max_restarts: Option<u32>,
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    pub max_interval_ms: u64,
    pub randomization_factor: f64,
    pub stable_after_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let options = WorkerOptions::default();
        Self {
            critical: options.critical,
            max_restarts: options.max_restarts,
            initial_interval_ms: duration_ms(options.backoff.initial_interval),
            multiplier: options.backoff.multiplier,
            max_interval_ms: duration_ms(options.backoff.max_interval),
            randomization_factor: options.backoff.randomization_factor,
            stable_after_ms: duration_ms(options.stable_after),
        }
    }
}

impl WorkerConfig {
    /// Supervisor options.
    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            critical: self.critical,
            max_restarts: self.max_restarts,
            backoff: BackoffConfig {
                initial_interval: Duration::from_millis(self.initial_interval_ms),
                multiplier: self.multiplier,
                max_interval: Duration::from_millis(self.max_interval_ms),
                randomization_factor: self.randomization_factor,
            },
            stable_after: Duration::from_millis(self.stable_after_ms),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Container {
    /// Registers `T` as a singleton read from `section` of `config` on first
    /// resolution.
    ///
    /// # Examples
    ///
    /// ```
    /// use ferrous_runtime::config::{ConfigProvider, JsonConfigSource};
    /// use ferrous_runtime::{Container, Resolver};
    /// use serde::Deserialize;
    /// use std::sync::Arc;
    ///
    /// #[derive(Deserialize)]
    /// struct Database { url: String }
    ///
    /// let config = Arc::new(ConfigProvider::new().with_source(
    ///     JsonConfigSource::from_str(r#"{"database": {"url": "pg://db"}}"#).unwrap(),
    /// ));
    ///
    /// let container = Container::new();
    /// container.add_config_section::<Database>(&config, "database").unwrap();
    /// container.build().unwrap();
    /// assert_eq!(container.get_required::<Database>().url, "pg://db");
    /// ```
    pub fn add_config_section<T>(&self, config: &Arc<ConfigProvider>, section: &'static str) -> DiResult<()>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let config = Arc::clone(config);
        self.register::<T>()
            .provider(move |_| Ok(config.get_section::<T>(section)?))
    }
}
