//! Bridges `plsconfig::Config` to the engine.

use std::time::Duration;

use crate::errors::{Result, SyncError};
use crate::model::SourceId;
use crate::remote::transport::Timeouts;

/// A configured remote source, enabled or not.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceEntry {
    pub id: SourceId,
    pub name: String,
    pub url: String,
    pub enabled: bool,
}

impl SourceEntry {
    pub fn new(id: impl Into<SourceId>, name: impl Into<String>, url: impl Into<String>) -> Self {
        SourceEntry {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Where a [`SourceRegistry`](crate::SourceRegistry) reads its sources from.
///
/// Re-read on every registry reload, so changes made to the underlying
/// configuration in the meantime are picked up.
pub trait SourceCatalog {
    /// Every configured source in configuration order.
    fn remote_sources(&self) -> Result<Vec<SourceEntry>>;

    fn request_timeouts(&self) -> Timeouts {
        Timeouts::default()
    }
}

impl SourceCatalog for plsconfig::Config {
    fn remote_sources(&self) -> Result<Vec<SourceEntry>> {
        let sources = self
            .get_remote_sources()
            .map_err(|e| SyncError::Config(e.to_string()))?;
        Ok(sources
            .into_iter()
            .map(|s| SourceEntry {
                id: SourceId(s.id),
                name: s.name,
                url: s.url,
                enabled: s.enabled,
            })
            .collect())
    }

    fn request_timeouts(&self) -> Timeouts {
        Timeouts {
            connect: self.get_connection_timeout(),
            read: self.get_read_timeout(),
        }
    }
}

impl SourceCatalog for Vec<SourceEntry> {
    fn remote_sources(&self) -> Result<Vec<SourceEntry>> {
        Ok(self.clone())
    }
}

/// Engine settings read from `plsconfig::Config`.
pub trait SyncConfigExt {
    /// Poll interval, `None` when auto-reload is disabled.
    fn auto_reload_interval(&self) -> Option<Duration>;
}

impl SyncConfigExt for plsconfig::Config {
    fn auto_reload_interval(&self) -> Option<Duration> {
        self.get_auto_reload_enabled()
            .then(|| self.get_auto_reload_interval())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plsconfig::Config;

    #[test]
    fn test_catalog_from_config() {
        let config = Config::from_yaml_str(
            r#"
network:
  connection_timeout: 3
  read_timeout: 4
  remote_sources:
    "104.7":
      name: "Main"
      url: "http://10.0.0.5:9000/?pass=a"
    "88.7":
      host: "10.0.0.6"
      port: 9000
      password: "b"
      enabled: false
"#,
        )
        .unwrap();

        let sources = config.remote_sources().unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0], SourceEntry::new("104.7", "Main", "http://10.0.0.5:9000/?pass=a"));
        assert_eq!(sources[1].url, "http://10.0.0.6:9000/?pass=b");
        assert!(!sources[1].enabled);

        let timeouts = config.request_timeouts();
        assert_eq!(timeouts.connect, Duration::from_secs(3));
        assert_eq!(timeouts.read, Duration::from_secs(4));
    }

    #[test]
    fn test_auto_reload_interval() {
        let config = Config::from_yaml_str(
            "network:\n  auto_reload:\n    enabled: true\n    interval_seconds: 15\n",
        )
        .unwrap();
        assert_eq!(config.auto_reload_interval(), Some(Duration::from_secs(15)));

        config.set_auto_reload_enabled(false).unwrap();
        assert_eq!(config.auto_reload_interval(), None);
    }
}
