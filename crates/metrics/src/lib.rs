//! Metrics collection and export for switchyard.
//!
//! This crate provides metric names and a recorder bootstrap on top of the
//! `metrics` crate facade. When the `prometheus` feature is enabled, metrics
//! are exported in Prometheus text format.
//!
//! # Usage
//!
//! ```rust,ignore
//! use switchyard_metrics::{counter, labels, lanes};
//!
//! counter!(lanes::ITEMS_RECEIVED_TOTAL, labels::LANE => "chat").increment(1);
//! ```

mod definitions;
pub mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
