//! Metric name and label definitions.
//!
//! Centralizing these definitions keeps names consistent between the
//! dispatcher and whatever scrapes the exporter.

/// Lane dispatcher metrics
pub mod lanes {
    /// Raw items accepted by `enqueue`
    pub const ITEMS_RECEIVED_TOTAL: &str = "switchyard_lane_items_received_total";
    /// Items whose processor settled successfully
    pub const ITEMS_PROCESSED_TOTAL: &str = "switchyard_lane_items_processed_total";
    /// Items whose processor failed or timed out
    pub const ITEMS_FAILED_TOTAL: &str = "switchyard_lane_items_failed_total";
    /// Items that hit the per-item deadline
    pub const ITEMS_TIMED_OUT_TOTAL: &str = "switchyard_lane_items_timed_out_total";
    /// Raw items absorbed into a multi-item batch
    pub const ITEMS_BATCHED_TOTAL: &str = "switchyard_lane_items_batched_total";
    /// Raw items discarded by a lane clear
    pub const ITEMS_DROPPED_TOTAL: &str = "switchyard_lane_items_dropped_total";
    /// Composed batches released from collection buffers
    pub const BATCHES_FLUSHED_TOTAL: &str = "switchyard_lane_batches_flushed_total";
    /// Items waiting for a slot
    pub const QUEUE_LENGTH: &str = "switchyard_lane_queue_length";
    /// Items currently processing
    pub const ACTIVE_ITEMS: &str = "switchyard_lane_active_items";
    /// Time from enqueue to dispatch in seconds
    pub const WAIT_DURATION_SECONDS: &str = "switchyard_lane_wait_duration_seconds";
    /// Processor run time in seconds
    pub const PROCESSING_DURATION_SECONDS: &str = "switchyard_lane_processing_duration_seconds";
    /// Items per flushed batch
    pub const BATCH_SIZE: &str = "switchyard_lane_batch_size";
}

/// Common label keys used across metrics
pub mod labels {
    pub const LANE: &str = "lane";
    pub const MODE: &str = "mode";
    pub const TRIGGER: &str = "trigger";
    pub const ERROR_TYPE: &str = "error_type";
}

/// Standard histogram buckets for different metric types
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Queue wait buckets (in seconds)
    /// Covers 1ms to 2 minutes
    pub static WAIT_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
        ]
    });

    /// Processor duration buckets (in seconds)
    /// Covers 10ms to 10 minutes, matching the default item deadline
    pub static PROCESSING_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
        ]
    });

    /// Batch size buckets
    pub static BATCH_SIZE: Lazy<Vec<f64>> =
        Lazy::new(|| vec![1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 21.0, 50.0, 100.0]);
}
