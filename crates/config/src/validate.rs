//! Configuration validation.
//!
//! Checks lane settings for values the dispatcher would reject at startup and
//! flags settings that are legal but probably unintended.

use std::path::PathBuf;

use crate::schema::SwitchyardConfig;

/// Windows longer than this delay every windowed reply noticeably.
const LONG_WINDOW_MS: u64 = 60_000;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "lane", "dispatcher", "empty"
    pub category: &'static str,
    /// Dotted path, e.g. "lanes.chat.concurrency"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(
        &mut self,
        severity: Severity,
        category: &'static str,
        path: String,
        message: impl Into<String>,
    ) {
        self.diagnostics.push(Diagnostic {
            severity,
            category,
            path,
            message: message.into(),
        });
    }
}

/// Validate a parsed configuration.
#[must_use]
pub fn validate(config: &SwitchyardConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    if config.lanes.is_empty() {
        result.push(
            Severity::Info,
            "empty",
            "lanes".into(),
            "no lanes configured; every enqueue will fail with an unknown lane",
        );
    }

    if config.dispatcher.item_timeout_secs == 0 {
        result.push(
            Severity::Warning,
            "dispatcher",
            "dispatcher.item_timeout_secs".into(),
            "item timeout disabled; a stuck processor holds its slot forever",
        );
    }

    for (name, lane) in &config.lanes {
        if name.trim().is_empty() {
            result.push(
                Severity::Error,
                "lane",
                "lanes".into(),
                "lane name must not be empty",
            );
        }
        if lane.concurrency == 0 {
            result.push(
                Severity::Error,
                "lane",
                format!("lanes.{name}.concurrency"),
                "concurrency must be at least 1",
            );
        }
        if lane.max_batch_size == 0 {
            result.push(
                Severity::Error,
                "lane",
                format!("lanes.{name}.max_batch_size"),
                "max_batch_size must be at least 1",
            );
        }
        if lane.mode.is_windowed() {
            if lane.collect_window_ms == 0 {
                result.push(
                    Severity::Error,
                    "lane",
                    format!("lanes.{name}.collect_window_ms"),
                    format!("{} lanes need a non-zero collection window", lane.mode),
                );
            } else if lane.collect_window_ms > LONG_WINDOW_MS {
                result.push(
                    Severity::Warning,
                    "lane",
                    format!("lanes.{name}.collect_window_ms"),
                    format!(
                        "collection window of {}ms delays every reply on this lane",
                        lane.collect_window_ms
                    ),
                );
            }
        }
    }

    result
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::schema::{AdmissionMode, LaneSettings},
        rstest::rstest,
    };

    fn with_lane(lane: LaneSettings) -> SwitchyardConfig {
        let mut cfg = SwitchyardConfig::default();
        cfg.lanes.insert("chat".into(), lane);
        cfg
    }

    #[test]
    fn default_lane_is_clean() {
        let result = validate(&with_lane(LaneSettings::default()));
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn empty_config_is_informational() {
        let result = validate(&SwitchyardConfig::default());
        assert!(!result.has_errors());
        assert_eq!(result.count(Severity::Info), 1);
    }

    #[rstest]
    #[case::zero_concurrency(LaneSettings { concurrency: 0, ..Default::default() }, "lanes.chat.concurrency")]
    #[case::zero_batch(LaneSettings { max_batch_size: 0, ..Default::default() }, "lanes.chat.max_batch_size")]
    #[case::collect_without_window(
        LaneSettings { mode: AdmissionMode::Collect, collect_window_ms: 0, ..Default::default() },
        "lanes.chat.collect_window_ms"
    )]
    #[case::steer_without_window(
        LaneSettings { mode: AdmissionMode::Steer, collect_window_ms: 0, ..Default::default() },
        "lanes.chat.collect_window_ms"
    )]
    fn invalid_lane_is_error(#[case] lane: LaneSettings, #[case] path: &str) {
        let result = validate(&with_lane(lane));
        assert!(result.has_errors());
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.severity == Severity::Error && d.path == path)
        );
    }

    #[test]
    fn zero_window_is_fine_for_fifo() {
        let result = validate(&with_lane(LaneSettings {
            collect_window_ms: 0,
            ..Default::default()
        }));
        assert!(!result.has_errors());
    }

    #[test]
    fn long_window_warns() {
        let result = validate(&with_lane(LaneSettings {
            mode: AdmissionMode::Collect,
            collect_window_ms: 120_000,
            ..Default::default()
        }));
        assert!(!result.has_errors());
        assert_eq!(result.count(Severity::Warning), 1);
    }
}
