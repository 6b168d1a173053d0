//! Lane registry: the table of named lane configurations.

use std::{collections::HashMap, sync::RwLock};

use {switchyard_config::SwitchyardConfig, tracing::info};

use crate::{
    error::{Error, Result},
    types::LaneConfig,
};

/// Owns lane configurations. Reads take a shared lock and only contend with
/// definitions, never with dispatch.
#[derive(Debug, Default)]
pub struct LaneRegistry {
    lanes: RwLock<HashMap<String, LaneConfig>>,
}

impl LaneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from every `[lanes.*]` table of a loaded config.
    pub fn from_config(config: &SwitchyardConfig) -> Result<Self> {
        let registry = Self::new();
        for (name, settings) in &config.lanes {
            registry.define(name, LaneConfig::from(settings))?;
        }
        Ok(registry)
    }

    /// Register or overwrite a lane. Returns the previous configuration.
    pub fn define(&self, name: &str, config: LaneConfig) -> Result<Option<LaneConfig>> {
        config.validate(name)?;
        info!(
            lane = name,
            mode = %config.admission_mode,
            concurrency = config.concurrency_limit,
            "lane defined"
        );
        let mut lanes = self.lanes.write().unwrap_or_else(|e| e.into_inner());
        Ok(lanes.insert(name.to_string(), config))
    }

    pub fn get(&self, name: &str) -> Result<LaneConfig> {
        let lanes = self.lanes.read().unwrap_or_else(|e| e.into_inner());
        lanes.get(name).cloned().ok_or_else(|| Error::unknown_lane(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        let lanes = self.lanes.read().unwrap_or_else(|e| e.into_inner());
        lanes.contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<LaneConfig> {
        let mut lanes = self.lanes.write().unwrap_or_else(|e| e.into_inner());
        lanes.remove(name)
    }

    /// Lane names, sorted.
    pub fn names(&self) -> Vec<String> {
        let lanes = self.lanes.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = lanes.keys().cloned().collect();
        names.sort();
        names
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        std::time::Duration,
        switchyard_config::{AdmissionMode, LaneSettings},
    };

    #[test]
    fn define_and_overwrite() {
        let registry = LaneRegistry::new();
        assert!(registry.define("chat", LaneConfig::fifo(1)).unwrap().is_none());

        let previous = registry
            .define("chat", LaneConfig::steer(Duration::from_millis(300), 5))
            .unwrap();
        assert_eq!(previous, Some(LaneConfig::fifo(1)));
        assert_eq!(
            registry.get("chat").unwrap().admission_mode,
            AdmissionMode::Steer
        );
    }

    #[test]
    fn unknown_lane_is_configuration_error() {
        let registry = LaneRegistry::new();
        let err = registry.get("missing").unwrap_err();
        assert_eq!(err, Error::unknown_lane("missing"));
        assert!(err.is_configuration());
    }

    #[test]
    fn invalid_definition_leaves_registry_untouched() {
        let registry = LaneRegistry::new();
        registry.define("chat", LaneConfig::fifo(2)).unwrap();
        assert!(registry.define("chat", LaneConfig::fifo(0)).is_err());
        assert_eq!(registry.get("chat").unwrap().concurrency_limit, 2);
    }

    #[test]
    fn from_config_defines_every_lane() {
        let mut config = SwitchyardConfig::default();
        config.lanes.insert("tools".into(), LaneSettings {
            concurrency: 3,
            ..Default::default()
        });
        config.lanes.insert("chat".into(), LaneSettings {
            mode: AdmissionMode::Collect,
            collect_window_ms: 500,
            max_batch_size: 4,
            ..Default::default()
        });

        let registry = LaneRegistry::from_config(&config).unwrap();
        assert_eq!(registry.names(), vec!["chat", "tools"]);
        assert_eq!(registry.get("tools").unwrap().concurrency_limit, 3);
        assert_eq!(
            registry.get("chat").unwrap().collect_window,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn from_config_rejects_invalid_lane() {
        let mut config = SwitchyardConfig::default();
        config.lanes.insert("bad".into(), LaneSettings {
            concurrency: 0,
            ..Default::default()
        });
        assert!(LaneRegistry::from_config(&config).is_err());
    }

    #[test]
    fn remove_lane() {
        let registry = LaneRegistry::new();
        registry.define("chat", LaneConfig::fifo(1)).unwrap();
        assert!(registry.remove("chat").is_some());
        assert!(!registry.contains("chat"));
        assert!(registry.remove("chat").is_none());
    }
}
