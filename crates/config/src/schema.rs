/// Config schema types (dispatcher defaults and named lanes).
use std::{collections::BTreeMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchyardConfig {
    pub dispatcher: DispatcherConfig,
    /// Lanes keyed by name, e.g. `[lanes.chat]`.
    pub lanes: BTreeMap<String, LaneSettings>,
}

/// Dispatcher-wide defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Maximum wall-clock seconds a processor may run for one item (0 = no timeout). Default 600.
    #[serde(default = "default_item_timeout_secs")]
    pub item_timeout_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            item_timeout_secs: default_item_timeout_secs(),
        }
    }
}

impl DispatcherConfig {
    /// The per-item deadline, or `None` when disabled.
    #[must_use]
    pub fn item_timeout(&self) -> Option<Duration> {
        (self.item_timeout_secs > 0).then(|| Duration::from_secs(self.item_timeout_secs))
    }
}

fn default_item_timeout_secs() -> u64 {
    600
}

/// How a lane turns raw enqueued items into dispatchable work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionMode {
    /// Each item is queued on its own, ordered by priority then arrival.
    #[default]
    Fifo,
    /// Buffer items per session for the collection window; release them as one batch.
    Collect,
    /// Like `Collect`, but the latest item is primary and earlier ones are context.
    Steer,
    /// Jump to the front of the queue with the highest urgency.
    Interrupt,
}

impl AdmissionMode {
    /// Whether this mode accumulates items in a collection buffer.
    #[must_use]
    pub fn is_windowed(self) -> bool {
        matches!(self, Self::Collect | Self::Steer)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fifo" | "followup" => Some(Self::Fifo),
            "collect" => Some(Self::Collect),
            "steer" => Some(Self::Steer),
            "interrupt" => Some(Self::Interrupt),
            _ => None,
        }
    }
}

impl fmt::Display for AdmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fifo => write!(f, "fifo"),
            Self::Collect => write!(f, "collect"),
            Self::Steer => write!(f, "steer"),
            Self::Interrupt => write!(f, "interrupt"),
        }
    }
}

/// Settings for one named lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneSettings {
    /// Maximum items processing at once. Must be at least 1.
    pub concurrency: usize,
    pub mode: AdmissionMode,
    /// Collection window in milliseconds (Collect/Steer only).
    pub collect_window_ms: u64,
    /// Upper bound on items merged into one batch (Collect/Steer only).
    pub max_batch_size: usize,
}

impl Default for LaneSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            mode: AdmissionMode::Fifo,
            collect_window_ms: 2_000,
            max_batch_size: 10,
        }
    }
}

impl LaneSettings {
    #[must_use]
    pub fn collect_window(&self) -> Duration {
        Duration::from_millis(self.collect_window_ms)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_settings_defaults_fill_missing_fields() {
        let cfg: SwitchyardConfig = toml::from_str(
            r#"
            [lanes.chat]
            mode = "steer"
            collect_window_ms = 1500

            [lanes.tools]
            concurrency = 4
            "#,
        )
        .unwrap();

        let chat = &cfg.lanes["chat"];
        assert_eq!(chat.mode, AdmissionMode::Steer);
        assert_eq!(chat.concurrency, 1);
        assert_eq!(chat.collect_window(), Duration::from_millis(1500));
        assert_eq!(chat.max_batch_size, 10);

        let tools = &cfg.lanes["tools"];
        assert_eq!(tools.mode, AdmissionMode::Fifo);
        assert_eq!(tools.concurrency, 4);
        assert_eq!(cfg.dispatcher.item_timeout_secs, 600);
    }

    #[test]
    fn zero_item_timeout_disables_deadline() {
        let cfg = DispatcherConfig {
            item_timeout_secs: 0,
        };
        assert_eq!(cfg.item_timeout(), None);
        assert_eq!(
            DispatcherConfig::default().item_timeout(),
            Some(Duration::from_secs(600))
        );
    }

    #[test]
    fn admission_mode_parse_aliases() {
        assert_eq!(AdmissionMode::parse("FIFO"), Some(AdmissionMode::Fifo));
        assert_eq!(AdmissionMode::parse("followup"), Some(AdmissionMode::Fifo));
        assert_eq!(AdmissionMode::parse("steer"), Some(AdmissionMode::Steer));
        assert_eq!(AdmissionMode::parse("nope"), None);
        assert!(AdmissionMode::Collect.is_windowed());
        assert!(!AdmissionMode::Interrupt.is_windowed());
    }
}
