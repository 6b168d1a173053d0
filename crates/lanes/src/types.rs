//! Core data types for lanes and the work flowing through them.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    switchyard_config::{AdmissionMode, LaneSettings},
    tokio::sync::oneshot,
};

use crate::{
    error::{Error, Result},
    processor::Processor,
};

/// Lower values are served first.
pub type Priority = i64;

/// Priority forced onto items admitted in [`AdmissionMode::Interrupt`].
pub const INTERRUPT_PRIORITY: Priority = Priority::MIN;

/// Session key used when the caller does not supply one.
pub const DEFAULT_SESSION: &str = "default";

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Static configuration of one named lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneConfig {
    /// Maximum items processing at once. Always at least 1.
    pub concurrency_limit: usize,
    pub admission_mode: AdmissionMode,
    /// How long a windowed lane buffers after the first item of a session.
    pub collect_window: Duration,
    /// Upper bound on items merged into one batch.
    pub max_batch_size: usize,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self::fifo(1)
    }
}

impl LaneConfig {
    #[must_use]
    pub fn fifo(concurrency_limit: usize) -> Self {
        Self {
            concurrency_limit,
            admission_mode: AdmissionMode::Fifo,
            collect_window: Duration::from_secs(2),
            max_batch_size: 10,
        }
    }

    #[must_use]
    pub fn interrupt(concurrency_limit: usize) -> Self {
        Self {
            admission_mode: AdmissionMode::Interrupt,
            ..Self::fifo(concurrency_limit)
        }
    }

    #[must_use]
    pub fn collect(collect_window: Duration, max_batch_size: usize) -> Self {
        Self {
            concurrency_limit: 1,
            admission_mode: AdmissionMode::Collect,
            collect_window,
            max_batch_size,
        }
    }

    #[must_use]
    pub fn steer(collect_window: Duration, max_batch_size: usize) -> Self {
        Self {
            admission_mode: AdmissionMode::Steer,
            ..Self::collect(collect_window, max_batch_size)
        }
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency_limit: usize) -> Self {
        self.concurrency_limit = concurrency_limit;
        self
    }

    /// Check the invariants the dispatcher relies on.
    pub fn validate(&self, lane: &str) -> Result<()> {
        if lane.trim().is_empty() {
            return Err(Error::invalid_config(lane, "lane name must not be empty"));
        }
        if self.concurrency_limit == 0 {
            return Err(Error::invalid_config(lane, "concurrency limit must be at least 1"));
        }
        if self.max_batch_size == 0 {
            return Err(Error::invalid_config(lane, "max batch size must be at least 1"));
        }
        if self.admission_mode.is_windowed() {
            self.validate_window(lane)?;
        }
        Ok(())
    }

    /// Windowed admission needs a non-zero window, whether it is the lane's
    /// own mode or a per-item override.
    pub(crate) fn validate_window(&self, lane: &str) -> Result<()> {
        if self.collect_window.is_zero() {
            return Err(Error::invalid_config(
                lane,
                "collect and steer modes need a non-zero collection window",
            ));
        }
        Ok(())
    }
}

impl From<&LaneSettings> for LaneConfig {
    fn from(settings: &LaneSettings) -> Self {
        Self {
            concurrency_limit: settings.concurrency,
            admission_mode: settings.mode,
            collect_window: settings.collect_window(),
            max_batch_size: settings.max_batch_size,
        }
    }
}

/// Lifecycle of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    /// Cleared out of a buffer or queue before it was dispatched.
    Dropped,
}

/// The unit flowing through a lane.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: String,
    pub payload: Value,
    pub session_key: String,
    pub priority: Priority,
    pub lane: String,
    #[serde(skip)]
    pub enqueued_at: Instant,
    pub enqueued_at_ms: u64,
    pub status: ItemStatus,
    /// Ids of the raw items merged into this one, when it is a composed batch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<String>>,
}

impl WorkItem {
    pub fn new(
        payload: Value,
        lane: impl Into<String>,
        session_key: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            session_key: session_key.into(),
            priority,
            lane: lane.into(),
            enqueued_at: Instant::now(),
            enqueued_at_ms: now_ms(),
            status: ItemStatus::Queued,
            members: None,
        }
    }

    /// Number of raw items this item stands for.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.members.as_ref().map_or(1, Vec::len)
    }
}

/// Per-call options for [`Dispatcher::enqueue`](crate::Dispatcher::enqueue).
#[derive(Clone)]
pub struct EnqueueOptions {
    pub lane: String,
    pub session_key: String,
    pub priority: Priority,
    /// Inline processor; falls back to the dispatcher default, then to the consumer hand-off.
    pub processor: Option<Arc<dyn Processor>>,
    /// Per-item deadline; falls back to the dispatcher default.
    pub timeout: Option<Duration>,
    /// Admit this item with a different mode than the lane default.
    pub mode: Option<AdmissionMode>,
}

impl EnqueueOptions {
    pub fn new(lane: impl Into<String>) -> Self {
        Self {
            lane: lane.into(),
            session_key: DEFAULT_SESSION.to_string(),
            priority: 0,
            processor: None,
            timeout: None,
            mode: None,
        }
    }

    #[must_use]
    pub fn session(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = session_key.into();
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processor = Some(processor);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: AdmissionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Shorthand for `mode(AdmissionMode::Interrupt)`.
    #[must_use]
    pub fn interrupt(self) -> Self {
        self.mode(AdmissionMode::Interrupt)
    }
}

impl fmt::Debug for EnqueueOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnqueueOptions")
            .field("lane", &self.lane)
            .field("session_key", &self.session_key)
            .field("priority", &self.priority)
            .field("processor", &self.processor.is_some())
            .field("timeout", &self.timeout)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Terminal result delivered to every caller that contributed to a dispatched item.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Id of the raw item this caller enqueued.
    pub item_id: String,
    /// Id of the item actually handed to the processor (a batch id when composed).
    pub dispatched_id: String,
    pub status: ItemStatus,
    pub result: std::result::Result<Value, Error>,
    pub was_batched: bool,
    pub batch_size: usize,
}

impl Outcome {
    pub(crate) fn dropped(item_id: String, reason: impl Into<String>) -> Self {
        Self {
            dispatched_id: item_id.clone(),
            item_id,
            status: ItemStatus::Dropped,
            result: Err(Error::dropped(reason)),
            was_batched: false,
            batch_size: 1,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ItemStatus::Completed
    }

    pub fn into_result(self) -> Result<Value> {
        self.result
    }
}

/// Resolves once the enqueued item (or the batch it joined) reaches a terminal status.
#[derive(Debug)]
pub struct EnqueueHandle {
    item_id: String,
    rx: oneshot::Receiver<Outcome>,
}

impl EnqueueHandle {
    pub(crate) fn new(item_id: String, rx: oneshot::Receiver<Outcome>) -> Self {
        Self { item_id, rx }
    }

    #[must_use]
    pub fn item_id(&self) -> &str {
        &self.item_id
    }
}

impl Future for EnqueueHandle {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Outcome> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Sender gone without an outcome: the dispatcher was torn down.
            Poll::Ready(Err(_)) => Poll::Ready(Outcome::dropped(
                self.item_id.clone(),
                "dispatcher shut down",
            )),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case::zero_concurrency(LaneConfig::fifo(0))]
    #[case::zero_batch(LaneConfig::collect(Duration::from_millis(100), 0))]
    #[case::zero_window(LaneConfig::steer(Duration::ZERO, 5))]
    fn invalid_configs_are_rejected(#[case] config: LaneConfig) {
        let err = config.validate("chat").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn fifo_ignores_zero_window() {
        let config = LaneConfig {
            collect_window: Duration::ZERO,
            ..LaneConfig::fifo(2)
        };
        assert!(config.validate("tools").is_ok());
        assert!(config.validate_window("tools").is_err());
    }

    #[test]
    fn empty_lane_name_is_rejected() {
        assert!(LaneConfig::fifo(1).validate("  ").is_err());
    }

    #[test]
    fn from_settings() {
        let settings = LaneSettings {
            concurrency: 3,
            mode: AdmissionMode::Steer,
            collect_window_ms: 250,
            max_batch_size: 4,
        };
        let config = LaneConfig::from(&settings);
        assert_eq!(config, LaneConfig::steer(Duration::from_millis(250), 4).with_concurrency(3));
    }

    #[test]
    fn work_item_serializes_camel_case() {
        let item = WorkItem::new(serde_json::json!({"text": "hi"}), "chat", "s1", 2);
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["sessionKey"], "s1");
        assert_eq!(value["status"], "queued");
        assert!(value.get("members").is_none());
        assert!(value.get("enqueuedAt").is_none());
        assert_eq!(item.batch_size(), 1);
    }

    #[tokio::test]
    async fn handle_resolves_dropped_when_sender_goes_away() {
        let (tx, rx) = oneshot::channel();
        let handle = EnqueueHandle::new("abc".into(), rx);
        drop(tx);
        let outcome = handle.await;
        assert_eq!(outcome.status, ItemStatus::Dropped);
        assert!(matches!(outcome.result, Err(Error::Dropped { .. })));
    }
}
