//! # PlaylistSync Configuration Module
//!
//! This module provides configuration management for PlaylistSync, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters and setters for configuration values
//! - Transparent decryption of remote source passwords
//!
//! ## Usage
//!
//! ```no_run
//! use plsconfig::Config;
//!
//! let config = Config::load_config("")?;
//!
//! let timeout = config.get_connection_timeout();
//! for source in config.get_remote_sources()? {
//!     println!("{} -> {}", source.id, source.name);
//! }
//!
//! config.set_remote_source_enabled("104.7", false)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};
use tracing::{info, warn};

pub mod encryption;

// Default configuration embedded in the binary
const DEFAULT_CONFIG: &str = include_str!("playlistsync.yaml");

const ENV_CONFIG_DIR: &str = "PLAYLISTSYNC_CONFIG";
const ENV_PREFIX: &str = "PLAYLISTSYNC_CONFIG__";
const CONFIG_DIR_NAME: &str = ".playlistsync";

// Default values for configuration
const DEFAULT_CONNECTION_TIMEOUT_SECS: f64 = 5.0;
const DEFAULT_READ_TIMEOUT_SECS: f64 = 10.0;
const DEFAULT_AUTO_RELOAD_ENABLED: bool = true;
const DEFAULT_AUTO_RELOAD_INTERVAL_SECS: u64 = 30;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";

/// Macro to generate getter/setter for u64 values with default
macro_rules! impl_u64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> u64 {
            match self.get_value($path) {
                Ok(Value::Number(n)) if n.is_u64() => n.as_u64().unwrap_or($default),
                Ok(Value::String(s)) => s.trim().parse().unwrap_or($default),
                _ => $default,
            }
        }

        pub fn $setter(&self, value: u64) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> bool {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => b,
                _ => $default,
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// One entry of `network.remote_sources`, resolved to a base url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSourceConfig {
    /// Key of the entry, used as the source id everywhere else.
    pub id: String,
    /// Display name (defaults to the id).
    pub name: String,
    /// Base url of the automation server, `http://host:port/?pass=token`.
    pub url: String,
    pub enabled: bool,
}

/// Configuration manager for PlaylistSync
///
/// This structure manages the application configuration, including:
/// - Loading configuration from YAML files
/// - Merging with default configuration
/// - Handling environment variable overrides
/// - Providing typed getters/setters for configuration values
///
/// A config built with [`Config::from_yaml_str`] has no backing file and
/// never touches the disk.
#[derive(Debug)]
pub struct Config {
    config_dir: Option<PathBuf>,
    path: Option<PathBuf>,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.lock_data().clone();
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    fn lock_data(&self) -> std::sync::MutexGuard<'_, Value> {
        // The YAML tree is always left consistent, a poisoned lock is still usable.
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> PathBuf {
        // 1. Try provided directory
        if !directory.is_empty() {
            return PathBuf::from(directory);
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return PathBuf::from(env_path);
        }

        // 3. Try current directory
        if Path::new(CONFIG_DIR_NAME).exists() {
            return PathBuf::from(CONFIG_DIR_NAME);
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config;
            }
        }

        PathBuf::from(CONFIG_DIR_NAME)
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        // Test write permission
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        fs::read_dir(path)?;

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `PLAYLISTSYNC_CONFIG` environment variable
    /// 3. `.playlistsync` in the current directory
    /// 4. `.playlistsync` in the user's home directory
    ///
    /// The directory is created if it doesn't exist, and validated for read/write permissions.
    pub fn config_dir(directory: &str) -> Result<PathBuf> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(&dir_path)?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// This method:
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Applies environment variable overrides
    /// 5. Saves the merged configuration
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir = %config_dir.display(), "Using config directory");

        let path = config_dir.join("config.yaml");

        let yaml_data = match fs::read_to_string(&path) {
            Ok(data) => {
                info!(config_file = %path.display(), "Loaded config file");
                data
            }
            Err(_) => {
                info!(config_file = %path.display(), "Config file not found, using default embedded config");
                DEFAULT_CONFIG.to_string()
            }
        };

        let config_value = Self::build_value(&yaml_data)?;

        let config = Config {
            config_dir: Some(config_dir),
            path: Some(path),
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Builds an in-memory configuration from a YAML document.
    ///
    /// The document is merged over the embedded defaults and environment
    /// overrides are applied, exactly as for [`Config::load_config`].
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(Config {
            config_dir: None,
            path: None,
            data: Mutex::new(Self::build_value(yaml)?),
        })
    }

    fn build_value(yaml: &str) -> Result<Value> {
        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        let external_value: Value = if yaml.trim().is_empty() {
            Value::Mapping(Mapping::new())
        } else {
            serde_yaml::from_str(yaml)?
        };
        merge_yaml(&mut default_value, &external_value);
        let mut config_value = Self::lower_keys_value(default_value);
        Self::apply_env_overrides(&mut config_value);
        Ok(config_value)
    }

    /// Directory holding `config.yaml`, if the config is file-backed.
    pub fn directory(&self) -> Option<&Path> {
        self.config_dir.as_deref()
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let yaml = serde_yaml::to_string(&*self.lock_data())?;
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["network", "read_timeout"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.lock_data();
            Self::set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key_value = Self::path_key(map, path[0]);
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.lock_data();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                if let Some(next) = map.get(&Self::path_key(map, key)) {
                    current = next;
                } else {
                    return Err(anyhow!("Path {} does not exist", path[..=i].join(".")));
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    /// Key as stored when present verbatim, lower-cased otherwise.
    fn path_key(map: &Mapping, key: &str) -> Value {
        let exact = Value::String(key.to_string());
        if map.contains_key(&exact) {
            exact
        } else {
            Value::String(key.to_lowercase())
        }
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let key_path = stripped.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                if let Err(err) = Self::set_value_internal(config, &key_path, yaml_value) {
                    warn!(env_var = %key, error = %err, "Ignoring config override");
                }
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    let (new_key, new_value) = match k {
                        Value::String(s) => {
                            let key = s.to_lowercase();
                            let value = if key == "remote_sources" {
                                Self::lower_entry_keys(v)
                            } else {
                                Self::lower_keys_value(v)
                            };
                            (Value::String(key), value)
                        }
                        other => (other, Self::lower_keys_value(v)),
                    };
                    new_map.insert(new_key, new_value);
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Keeps the keys of `value` (source ids) as written, lowering below them.
    fn lower_entry_keys(value: Value) -> Value {
        match value {
            Value::Mapping(map) => Value::Mapping(
                map.into_iter()
                    .map(|(k, v)| (k, Self::lower_keys_value(v)))
                    .collect(),
            ),
            other => Self::lower_keys_value(other),
        }
    }

    fn get_seconds(&self, path: &[&str], default: f64) -> Duration {
        let secs = match self.get_value(path) {
            Ok(Value::Number(n)) => n.as_f64().unwrap_or(default),
            Ok(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        };
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            warn!(path = %path.join("."), value = secs, "Invalid duration, using default");
            Duration::from_secs_f64(default)
        }
    }

    /// Connect-phase timeout applied to every request against a remote source.
    pub fn get_connection_timeout(&self) -> Duration {
        self.get_seconds(
            &["network", "connection_timeout"],
            DEFAULT_CONNECTION_TIMEOUT_SECS,
        )
    }

    /// Read-phase timeout applied to every request against a remote source.
    pub fn get_read_timeout(&self) -> Duration {
        self.get_seconds(&["network", "read_timeout"], DEFAULT_READ_TIMEOUT_SECS)
    }

    impl_bool_config!(
        get_auto_reload_enabled,
        set_auto_reload_enabled,
        &["network", "auto_reload", "enabled"],
        DEFAULT_AUTO_RELOAD_ENABLED
    );

    impl_u64_config!(
        get_auto_reload_interval_secs,
        set_auto_reload_interval_secs,
        &["network", "auto_reload", "interval_seconds"],
        DEFAULT_AUTO_RELOAD_INTERVAL_SECS
    );

    pub fn get_auto_reload_interval(&self) -> Duration {
        Duration::from_secs(self.get_auto_reload_interval_secs().max(1))
    }

    /// Directory scanned for artist intros, `None` when not configured.
    pub fn get_intros_dir(&self) -> Option<PathBuf> {
        match self.get_value(&["paths", "intros_dir"]) {
            Ok(Value::String(s)) if !s.trim().is_empty() => Some(PathBuf::from(s)),
            _ => None,
        }
    }

    pub fn set_intros_dir(&self, directory: &str) -> Result<()> {
        self.set_value(&["paths", "intros_dir"], Value::String(directory.to_string()))
    }

    pub fn get_log_min_level(&self) -> String {
        match self.get_value(&["log", "min_level"]) {
            Ok(Value::String(s)) => s,
            _ => DEFAULT_LOG_MIN_LEVEL.to_string(),
        }
    }

    pub fn set_log_min_level(&self, level: String) -> Result<()> {
        self.set_value(&["log", "min_level"], Value::String(level))
    }

    /// Returns every configured remote source, enabled or not, in file order.
    ///
    /// Entries without a usable url (no `url` and no `host`) or whose
    /// password cannot be decrypted are skipped with a warning.
    pub fn get_remote_sources(&self) -> Result<Vec<RemoteSourceConfig>> {
        let sources = match self.get_value(&["network", "remote_sources"]) {
            Ok(Value::Mapping(map)) => map,
            Ok(Value::Null) | Err(_) => return Ok(Vec::new()),
            Ok(_) => return Err(anyhow!("network.remote_sources is not a mapping")),
        };

        let mut result = Vec::with_capacity(sources.len());
        for (key, entry) in &sources {
            let Some(id) = scalar_to_string(key) else {
                warn!(key = ?key, "Ignoring remote source with a non scalar id");
                continue;
            };
            match parse_remote_source(&id, entry) {
                Ok(source) => result.push(source),
                Err(err) => warn!(source = %id, error = %err, "Ignoring remote source"),
            }
        }
        Ok(result)
    }

    /// Marks a remote source as enabled or disabled and saves the file.
    pub fn set_remote_source_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let path = ["network", "remote_sources", id];
        match self.get_value(&path) {
            Ok(Value::Mapping(_)) => {
                self.set_value(&["network", "remote_sources", id, "enabled"], Value::Bool(enabled))
            }
            _ => Err(anyhow!("Unknown remote source {}", id)),
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn entry_string(entry: &Mapping, key: &str) -> Option<String> {
    entry
        .get(&Value::String(key.to_string()))
        .and_then(scalar_to_string)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Characters escaped in the `pass` query parameter.
const PASS_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn parse_remote_source(id: &str, entry: &Value) -> Result<RemoteSourceConfig> {
    let Value::Mapping(entry) = entry else {
        return Err(anyhow!("entry is not a mapping"));
    };

    let enabled = match entry.get(&Value::String("enabled".to_string())) {
        Some(Value::Bool(b)) => *b,
        _ => true,
    };
    let name = entry_string(entry, "name").unwrap_or_else(|| id.to_string());

    let url = match entry_string(entry, "url") {
        Some(url) => url,
        None => {
            let host = entry_string(entry, "host")
                .ok_or_else(|| anyhow!("neither url nor host is configured"))?;
            let password = match entry_string(entry, "password") {
                Some(value) => encryption::get_password(&value)?,
                None => String::new(),
            };
            let password = utf8_percent_encode(&password, PASS_ENCODE_SET);
            match entry_string(entry, "port") {
                Some(port) => format!("http://{}:{}/?pass={}", host, port, password),
                None => format!("http://{}/?pass={}", host, password),
            }
        }
    };

    Ok(RemoteSourceConfig {
        id: id.to_string(),
        name,
        url,
        enabled,
    })
}

/// Merges external YAML configuration into default configuration
///
/// - For mappings (objects), it merges keys from external into default
/// - For scalars and sequences, external values replace default values
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}
