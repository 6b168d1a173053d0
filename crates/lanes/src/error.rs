use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the dispatcher.
///
/// `UnknownLane` and `InvalidLaneConfig` are returned synchronously from
/// configuration and enqueue calls. The rest only ever reach a caller through
/// the [`Outcome`](crate::types::Outcome) of the item that failed, which is
/// why the type is `Clone`: one composed batch fans its result out to every
/// member.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("unknown lane: {lane}")]
    UnknownLane { lane: String },

    #[error("invalid config for lane {lane}: {reason}")]
    InvalidLaneConfig { lane: String, reason: String },

    #[error("processor failed: {message}")]
    Processor { message: String },

    #[error("processor timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("dropped: {reason}")]
    Dropped { reason: String },
}

impl Error {
    #[must_use]
    pub fn unknown_lane(lane: impl Into<String>) -> Self {
        Self::UnknownLane { lane: lane.into() }
    }

    #[must_use]
    pub fn invalid_config(lane: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidLaneConfig {
            lane: lane.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn processor(message: impl std::fmt::Display) -> Self {
        Self::Processor {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn dropped(reason: impl Into<String>) -> Self {
        Self::Dropped {
            reason: reason.into(),
        }
    }

    /// Configuration errors are programming mistakes, never runtime conditions.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::UnknownLane { .. } | Self::InvalidLaneConfig { .. })
    }

    /// Short label used for logs and metric labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownLane { .. } | Self::InvalidLaneConfig { .. } => "configuration",
            Self::Processor { .. } => "processor",
            Self::Timeout { .. } => "timeout",
            Self::Dropped { .. } => "dropped",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
