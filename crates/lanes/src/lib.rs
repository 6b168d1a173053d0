//! Lane-based admission control and batching.
//!
//! Producers [`enqueue`](Dispatcher::enqueue) opaque payloads onto named
//! lanes. Each lane has a concurrency ceiling and an admission mode:
//!
//! - `fifo`: queue immediately, serve by `(priority, arrival)`
//! - `interrupt`: jump to the front of the queue (no preemption)
//! - `collect`: buffer per session for a window, then dispatch all payloads as one array
//! - `steer`: like `collect`, but the latest payload is `current` and the rest `previous`
//!
//! Every caller gets a terminal [`Outcome`] by awaiting its [`EnqueueHandle`].

pub mod buffer;
pub mod compose;
pub mod dispatcher;
pub mod error;
pub mod processor;
pub mod queue;
pub mod registry;
pub mod stats;
pub mod types;

pub use {
    dispatcher::{DEFAULT_ITEM_TIMEOUT, Dispatcher, DispatcherOptions},
    error::{Error, Result},
    processor::{Completion, ProcessRequest, Processor, processor_fn},
    registry::LaneRegistry,
    stats::{GlobalSnapshot, LaneCounters, LaneSnapshot},
    switchyard_config::AdmissionMode,
    types::{
        DEFAULT_SESSION, EnqueueHandle, EnqueueOptions, INTERRUPT_PRIORITY, ItemStatus, LaneConfig,
        Outcome, Priority, WorkItem,
    },
};
