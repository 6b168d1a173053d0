//! The dispatcher: admission, per-lane queues, slot accounting and settlement.

use std::{
    any::Any,
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use {
    serde_json::Value,
    switchyard_config::{AdmissionMode, DispatcherConfig},
    tokio::{
        sync::{mpsc, oneshot},
        task::JoinError,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use switchyard_metrics::{counter, gauge, histogram, labels, lanes as lane_metrics};

use crate::{
    buffer::{Appended, CollectionBuffers, Flushed},
    compose::compose,
    error::{Error, Result},
    processor::{HandoffProcessor, ProcessRequest, Processor},
    queue::PriorityQueue,
    registry::LaneRegistry,
    stats::{GlobalSnapshot, LaneCounters, LaneSnapshot},
    types::{
        EnqueueHandle, EnqueueOptions, INTERRUPT_PRIORITY, ItemStatus, LaneConfig, Outcome,
        WorkItem,
    },
};

/// Default per-item deadline when neither the enqueue call nor the
/// dispatcher options supply one.
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(600);

/// Dispatcher-wide settings.
#[derive(Clone)]
pub struct DispatcherOptions {
    /// Used for items enqueued without an inline processor. When `None`, such
    /// items go to the consumer hand-off channel.
    pub processor: Option<Arc<dyn Processor>>,
    /// Deadline for items enqueued without their own. `None` disables it.
    pub item_timeout: Option<Duration>,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            processor: None,
            item_timeout: Some(DEFAULT_ITEM_TIMEOUT),
        }
    }
}

impl DispatcherOptions {
    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self {
            processor: None,
            item_timeout: config.item_timeout(),
        }
    }

    #[must_use]
    pub fn with_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processor = Some(processor);
        self
    }
}

impl std::fmt::Debug for DispatcherOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherOptions")
            .field("processor", &self.processor.is_some())
            .field("item_timeout", &self.item_timeout)
            .finish()
    }
}

/// Caller waiting on a raw item's outcome.
struct Waiter {
    item_id: String,
    tx: oneshot::Sender<Outcome>,
}

impl Waiter {
    fn drop_with(self, reason: &str) {
        let _ = self.tx.send(Outcome::dropped(self.item_id, reason));
    }
}

/// A raw item held in a collection buffer.
struct Pending {
    item: WorkItem,
    processor: Option<Arc<dyn Processor>>,
    timeout: Option<Duration>,
    tx: oneshot::Sender<Outcome>,
}

/// A ready item in a lane queue, with everyone waiting on it.
struct Job {
    item: WorkItem,
    processor: Option<Arc<dyn Processor>>,
    timeout: Option<Duration>,
    waiters: Vec<Waiter>,
}

#[derive(Default)]
struct LaneState {
    queue: PriorityQueue<Job>,
    active: usize,
    counters: LaneCounters,
}

/// Routes work items through named lanes.
///
/// Immediate lanes (FIFO, Interrupt) queue items directly. Windowed lanes
/// (Collect, Steer) buffer items per session and queue one composed item
/// when the window closes or the batch fills. Each lane then releases queued
/// items in priority order while it has free concurrency slots.
///
/// Lock order is always `buffers` before `lanes`. Processors never run under
/// either lock.
pub struct Dispatcher {
    registry: LaneRegistry,
    lanes: Mutex<HashMap<String, LaneState>>,
    buffers: Mutex<CollectionBuffers<Pending>>,
    default_processor: Option<Arc<dyn Processor>>,
    handoff: Arc<dyn Processor>,
    requests: Mutex<Option<mpsc::UnboundedReceiver<ProcessRequest>>>,
    default_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(registry: LaneRegistry) -> Arc<Self> {
        Self::with_options(registry, DispatcherOptions::default())
    }

    /// Dispatcher whose items default to `processor` instead of the hand-off channel.
    pub fn with_processor(registry: LaneRegistry, processor: Arc<dyn Processor>) -> Arc<Self> {
        Self::with_options(registry, DispatcherOptions::default().with_processor(processor))
    }

    pub fn with_options(registry: LaneRegistry, options: DispatcherOptions) -> Arc<Self> {
        let (handoff, requests) = HandoffProcessor::channel();
        Arc::new(Self {
            registry,
            lanes: Mutex::new(HashMap::new()),
            buffers: Mutex::new(CollectionBuffers::new()),
            default_processor: options.processor,
            handoff: Arc::new(handoff),
            requests: Mutex::new(Some(requests)),
            default_timeout: options.item_timeout,
        })
    }

    /// Take the receiving end of the consumer hand-off channel.
    ///
    /// Items with no inline or default processor arrive here as
    /// [`ProcessRequest`]s. Returns `None` after the first call.
    pub fn take_requests(&self) -> Option<mpsc::UnboundedReceiver<ProcessRequest>> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    // ── Lanes ───────────────────────────────────────────────────────────────

    /// Register or reconfigure a lane. A raised concurrency limit admits
    /// queued items right away; a lowered one never touches in-flight work.
    pub fn define_lane(self: &Arc<Self>, name: &str, config: LaneConfig) -> Result<()> {
        self.registry.define(name, config)?;
        self.pump(name);
        Ok(())
    }

    /// Remove a lane, dropping its buffered and queued items. Returns how
    /// many raw items were dropped. In-flight items still settle normally.
    pub fn remove_lane(&self, name: &str) -> Result<usize> {
        if self.registry.remove(name).is_none() {
            return Err(Error::unknown_lane(name));
        }
        let dropped = self.drain_lane(name, "lane removed");
        let mut lanes = self.lock_lanes();
        if lanes.get(name).is_some_and(|state| state.active == 0) {
            lanes.remove(name);
        }
        info!(lane = name, dropped, "lane removed");
        Ok(dropped)
    }

    pub fn lane_config(&self, name: &str) -> Result<LaneConfig> {
        self.registry.get(name)
    }

    pub fn lane_names(&self) -> Vec<String> {
        self.registry.names()
    }

    // ── Admission ───────────────────────────────────────────────────────────

    /// Admit one item. Fails synchronously only for configuration errors;
    /// everything else is reported through the returned handle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(self: &Arc<Self>, payload: Value, options: EnqueueOptions) -> Result<EnqueueHandle> {
        let config = self.registry.get(&options.lane)?;
        let mode = options.mode.unwrap_or(config.admission_mode);
        if mode.is_windowed() {
            config.validate_window(&options.lane)?;
        }

        let EnqueueOptions {
            lane,
            session_key,
            priority,
            processor,
            timeout,
            ..
        } = options;
        let mut item = WorkItem::new(payload, lane.clone(), session_key, priority);
        let (tx, rx) = oneshot::channel();
        let handle = EnqueueHandle::new(item.id.clone(), rx);

        debug!(
            lane = %lane,
            item_id = %item.id,
            session = %item.session_key,
            priority,
            %mode,
            "item enqueued"
        );

        #[cfg(feature = "metrics")]
        counter!(
            lane_metrics::ITEMS_RECEIVED_TOTAL,
            labels::LANE => lane.clone(),
            labels::MODE => mode.to_string()
        )
        .increment(1);

        match mode {
            AdmissionMode::Fifo | AdmissionMode::Interrupt => {
                let interrupt = mode == AdmissionMode::Interrupt;
                let arrival = item.enqueued_at;
                if interrupt {
                    item.priority = INTERRUPT_PRIORITY;
                }
                let job = Job {
                    waiters: vec![Waiter {
                        item_id: item.id.clone(),
                        tx,
                    }],
                    item,
                    processor,
                    timeout,
                };
                {
                    let mut lanes = self.lock_lanes();
                    let state = lanes.entry(lane.clone()).or_default();
                    state.counters.received += 1;
                    if interrupt {
                        state.queue.push_front(job);
                    } else {
                        state.queue.push(priority, arrival, job);
                    }
                }
                self.pump(&lane);
            },
            AdmissionMode::Collect | AdmissionMode::Steer => {
                let pending = Pending {
                    item,
                    processor,
                    timeout,
                    tx,
                };
                if self.admit_windowed(&config, mode, pending) {
                    self.pump(&lane);
                }
            },
        }

        Ok(handle)
    }

    /// Buffer a windowed item. Returns `true` when the append filled the
    /// buffer and a composed item was queued.
    fn admit_windowed(self: &Arc<Self>, config: &LaneConfig, mode: AdmissionMode, pending: Pending) -> bool {
        let lane = pending.item.lane.clone();
        let session = pending.item.session_key.clone();
        let window = config.collect_window;
        let weak = Arc::downgrade(self);

        let mut buffers = self.lock_buffers();
        let appended = buffers.append(&lane, &session, mode, config.max_batch_size, pending, |generation| {
            let (lane, session) = (lane.clone(), session.clone());
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                if let Some(dispatcher) = weak.upgrade() {
                    dispatcher.flush_expired(&lane, &session, generation);
                }
            })
        });

        let mut lanes = self.lock_lanes();
        let state = lanes.entry(lane.clone()).or_default();
        state.counters.received += 1;
        match appended {
            Appended::Buffered { len } => {
                debug!(lane = %lane, session = %session, buffered = len, "item buffered");
                false
            },
            Appended::Flushed(flushed) => {
                Self::queue_batch(state, flushed, config.max_batch_size);
                true
            },
        }
    }

    /// Timer callback: flush the window if it is still the one the timer
    /// was started for.
    fn flush_expired(self: &Arc<Self>, lane: &str, session: &str, generation: u64) {
        let max_batch_size = self
            .registry
            .get(lane)
            .map_or(usize::MAX, |config| config.max_batch_size);
        {
            let mut buffers = self.lock_buffers();
            let Some(flushed) = buffers.take_expired(lane, session, generation) else {
                return;
            };
            let mut lanes = self.lock_lanes();
            let state = lanes.entry(lane.to_string()).or_default();
            Self::queue_batch(state, flushed, max_batch_size);
        }
        self.pump(lane);
    }

    /// Compose flushed members into jobs of at most `max_batch_size` raw
    /// items and queue them. Called with both locks held so a later flush of
    /// the same session cannot overtake them.
    fn queue_batch(state: &mut LaneState, flushed: Flushed<Pending>, max_batch_size: usize) {
        let Flushed {
            lane,
            session,
            mode,
            members,
            trigger,
            opened_at,
        } = flushed;
        let cap = max_batch_size.max(1);

        let mut rest = members;
        while !rest.is_empty() {
            // The cap may have been lowered while the window was open.
            let tail = rest.split_off(cap.min(rest.len()));
            let chunk = std::mem::replace(&mut rest, tail);

            let size = chunk.len();
            let mut items = Vec::with_capacity(size);
            let mut waiters = Vec::with_capacity(size);
            let mut processor = None;
            let mut timeout = None;
            for pending in chunk {
                // The most recent member that carries a processor or deadline wins.
                if pending.processor.is_some() {
                    processor = pending.processor;
                }
                if pending.timeout.is_some() {
                    timeout = pending.timeout;
                }
                waiters.push(Waiter {
                    item_id: pending.item.id.clone(),
                    tx: pending.tx,
                });
                items.push(pending.item);
            }

            let Some(item) = compose(mode, items) else {
                continue;
            };
            if size > 1 {
                state.counters.batched += size as u64;
            }

            debug!(
                lane = %lane,
                session = %session,
                batch_id = %item.id,
                size,
                %trigger,
                open_ms = opened_at.elapsed().as_millis() as u64,
                "collection buffer flushed"
            );

            #[cfg(feature = "metrics")]
            {
                counter!(
                    lane_metrics::BATCHES_FLUSHED_TOTAL,
                    labels::LANE => lane.clone(),
                    labels::TRIGGER => trigger.to_string()
                )
                .increment(1);
                histogram!(lane_metrics::BATCH_SIZE, labels::LANE => lane.clone()).record(size as f64);
                if size > 1 {
                    counter!(lane_metrics::ITEMS_BATCHED_TOTAL, labels::LANE => lane.clone())
                        .increment(size as u64);
                }
            }

            state.queue.push(item.priority, item.enqueued_at, Job {
                item,
                processor,
                timeout,
                waiters,
            });
        }
    }

    // ── Dispatch ────────────────────────────────────────────────────────────

    /// Start queued items while the lane has free slots.
    fn pump(self: &Arc<Self>, lane: &str) {
        let Ok(config) = self.registry.get(lane) else {
            return;
        };
        let mut lanes = self.lock_lanes();
        let Some(state) = lanes.get_mut(lane) else {
            return;
        };

        while state.active < config.concurrency_limit {
            let Some(mut job) = state.queue.pop() else {
                break;
            };
            state.active += 1;
            job.item.status = ItemStatus::Processing;

            debug!(
                lane,
                item_id = %job.item.id,
                priority = job.item.priority,
                batch_size = job.item.batch_size(),
                active = state.active,
                "item dispatched"
            );

            #[cfg(feature = "metrics")]
            histogram!(lane_metrics::WAIT_DURATION_SECONDS, labels::LANE => lane.to_string())
                .record(job.item.enqueued_at.elapsed().as_secs_f64());

            let dispatcher = Arc::clone(self);
            tokio::spawn(async move { dispatcher.run_job(job).await });
        }

        #[cfg(feature = "metrics")]
        {
            gauge!(lane_metrics::QUEUE_LENGTH, labels::LANE => lane.to_string()).set(state.queue.len() as f64);
            gauge!(lane_metrics::ACTIVE_ITEMS, labels::LANE => lane.to_string()).set(state.active as f64);
        }
    }

    async fn run_job(self: Arc<Self>, job: Job) {
        let Job {
            item,
            processor,
            timeout,
            waiters,
        } = job;
        let processor = processor
            .or_else(|| self.default_processor.clone())
            .unwrap_or_else(|| Arc::clone(&self.handoff));
        let timeout = timeout.or(self.default_timeout);
        let lane = item.lane.clone();
        let dispatched_id = item.id.clone();

        let cancel = CancellationToken::new();
        let started = Instant::now();
        let mut task = tokio::spawn({
            let cancel = cancel.clone();
            async move { processor.process(item, cancel).await }
        });

        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => flatten(joined),
                Err(_) => {
                    // The task is detached, not aborted; the token tells it to stop.
                    cancel.cancel();
                    Err(Error::Timeout { timeout: limit })
                },
            },
            None => flatten(task.await),
        };

        self.settle(&lane, dispatched_id, waiters, result, started.elapsed());
    }

    /// Release the slot, record the result, refill, then notify every waiter.
    fn settle(
        self: &Arc<Self>,
        lane: &str,
        dispatched_id: String,
        waiters: Vec<Waiter>,
        result: Result<Value>,
        elapsed: Duration,
    ) {
        {
            let mut lanes = self.lock_lanes();
            if let Some(state) = lanes.get_mut(lane) {
                state.active = state.active.saturating_sub(1);
                match &result {
                    Ok(_) => state.counters.processed += 1,
                    Err(Error::Timeout { .. }) => {
                        state.counters.failed += 1;
                        state.counters.timed_out += 1;
                    },
                    Err(_) => state.counters.failed += 1,
                }
            }
        }

        let elapsed_ms = elapsed.as_millis() as u64;
        match &result {
            Ok(_) => debug!(lane, item_id = %dispatched_id, elapsed_ms, "item completed"),
            Err(e @ Error::Timeout { .. }) => {
                warn!(lane, item_id = %dispatched_id, elapsed_ms, error = %e, "item timed out")
            },
            Err(e) => error!(lane, item_id = %dispatched_id, elapsed_ms, error = %e, "item failed"),
        }

        #[cfg(feature = "metrics")]
        {
            histogram!(lane_metrics::PROCESSING_DURATION_SECONDS, labels::LANE => lane.to_string())
                .record(elapsed.as_secs_f64());
            match &result {
                Ok(_) => {
                    counter!(lane_metrics::ITEMS_PROCESSED_TOTAL, labels::LANE => lane.to_string()).increment(1)
                },
                Err(e) => {
                    if matches!(e, Error::Timeout { .. }) {
                        counter!(lane_metrics::ITEMS_TIMED_OUT_TOTAL, labels::LANE => lane.to_string()).increment(1);
                    }
                    counter!(
                        lane_metrics::ITEMS_FAILED_TOTAL,
                        labels::LANE => lane.to_string(),
                        labels::ERROR_TYPE => e.kind()
                    )
                    .increment(1)
                },
            }
        }

        // The next item is started before any waiter wakes.
        self.pump(lane);

        let status = if result.is_ok() {
            ItemStatus::Completed
        } else {
            ItemStatus::Failed
        };
        let batch_size = waiters.len();
        for waiter in waiters {
            let _ = waiter.tx.send(Outcome {
                item_id: waiter.item_id,
                dispatched_id: dispatched_id.clone(),
                status,
                result: result.clone(),
                was_batched: batch_size > 1,
                batch_size,
            });
        }
    }

    // ── Clearing ────────────────────────────────────────────────────────────

    /// Drop every buffered and queued item of `name`. Each waiter receives
    /// [`Error::Dropped`]. Returns the number of raw items dropped.
    pub fn clear_lane(&self, name: &str) -> Result<usize> {
        if !self.registry.contains(name) {
            return Err(Error::unknown_lane(name));
        }
        let dropped = self.drain_lane(name, "lane cleared");
        info!(lane = name, dropped, "lane cleared");
        Ok(dropped)
    }

    /// [`clear_lane`](Self::clear_lane) for every lane.
    pub fn clear_all(&self) -> usize {
        let dropped: usize = self
            .registry
            .names()
            .iter()
            .map(|name| self.drain_lane(name, "all lanes cleared"))
            .sum();
        info!(dropped, "all lanes cleared");
        dropped
    }

    fn drain_lane(&self, name: &str, reason: &str) -> usize {
        let (buffered, queued) = {
            let mut buffers = self.lock_buffers();
            let buffered = buffers.clear_lane(name);
            let mut lanes = self.lock_lanes();
            let queued = match lanes.get_mut(name) {
                Some(state) => {
                    let queued = state.queue.drain();
                    let raw = buffered.len() + queued.iter().map(|job| job.waiters.len()).sum::<usize>();
                    state.counters.dropped += raw as u64;
                    queued
                },
                None => Vec::new(),
            };
            (buffered, queued)
        };

        let mut dropped = 0;
        for pending in buffered {
            Waiter {
                item_id: pending.item.id,
                tx: pending.tx,
            }
            .drop_with(reason);
            dropped += 1;
        }
        for job in queued {
            for waiter in job.waiters {
                waiter.drop_with(reason);
                dropped += 1;
            }
        }

        #[cfg(feature = "metrics")]
        if dropped > 0 {
            counter!(lane_metrics::ITEMS_DROPPED_TOTAL, labels::LANE => name.to_string()).increment(dropped as u64);
            gauge!(lane_metrics::QUEUE_LENGTH, labels::LANE => name.to_string()).set(0.0);
        }

        dropped
    }

    // ── Stats ───────────────────────────────────────────────────────────────

    pub fn lane_snapshot(&self, name: &str) -> Result<LaneSnapshot> {
        let config = self.registry.get(name)?;
        let (buffered, open_windows) = {
            let buffers = self.lock_buffers();
            (buffers.buffered(name), buffers.open_windows(name))
        };
        let lanes = self.lock_lanes();
        let (queue_length, active_count, counters) = lanes
            .get(name)
            .map(|state| (state.queue.len(), state.active, state.counters))
            .unwrap_or_default();

        Ok(LaneSnapshot {
            name: name.to_string(),
            mode: config.admission_mode,
            concurrency_limit: config.concurrency_limit,
            queue_length,
            buffered,
            open_windows,
            active_count,
            available_slots: config.concurrency_limit.saturating_sub(active_count),
            counters,
        })
    }

    pub fn global_snapshot(&self) -> GlobalSnapshot {
        let lanes = self
            .registry
            .names()
            .iter()
            .filter_map(|name| self.lane_snapshot(name).ok())
            .collect();
        GlobalSnapshot::from_lanes(lanes)
    }

    fn lock_lanes(&self) -> MutexGuard<'_, HashMap<String, LaneState>> {
        self.lanes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_buffers(&self) -> MutexGuard<'_, CollectionBuffers<Pending>> {
        self.buffers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Collapse the processor task's join result into the item result.
fn flatten(joined: std::result::Result<anyhow::Result<Value>, JoinError>) -> Result<Value> {
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Error::processor(format!("{e:#}"))),
        Err(e) if e.is_panic() => Err(Error::processor(format!(
            "processor panicked: {}",
            panic_message(e.into_panic().as_ref())
        ))),
        Err(e) => Err(Error::processor(e)),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
