//! Counters and read-only lane snapshots.

use {
    serde::{Deserialize, Serialize},
    switchyard_config::AdmissionMode,
};

/// Per-lane transition counters. Only the dispatcher mutates these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneCounters {
    /// Raw items accepted by `enqueue`.
    pub received: u64,
    /// Dispatched items whose processor succeeded.
    pub processed: u64,
    /// Dispatched items whose processor failed or timed out.
    pub failed: u64,
    /// Subset of `failed` that hit the item deadline.
    pub timed_out: u64,
    /// Raw items absorbed into composed batches of more than one item.
    pub batched: u64,
    /// Raw items discarded by a clear before dispatch.
    pub dropped: u64,
}

impl LaneCounters {
    pub fn add(&mut self, other: &Self) {
        self.received += other.received;
        self.processed += other.processed;
        self.failed += other.failed;
        self.timed_out += other.timed_out;
        self.batched += other.batched;
        self.dropped += other.dropped;
    }
}

/// Point-in-time view of one lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneSnapshot {
    pub name: String,
    pub mode: AdmissionMode,
    pub concurrency_limit: usize,
    /// Items ready for dispatch, waiting for a slot.
    pub queue_length: usize,
    /// Raw items still held in collection buffers.
    pub buffered: usize,
    /// Sessions with a collection window currently open.
    pub open_windows: usize,
    pub active_count: usize,
    pub available_slots: usize,
    pub counters: LaneCounters,
}

/// Aggregate view across every lane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSnapshot {
    pub lanes: Vec<LaneSnapshot>,
    pub queue_length: usize,
    pub buffered: usize,
    pub active_count: usize,
    pub totals: LaneCounters,
}

impl GlobalSnapshot {
    /// Aggregate lane snapshots; lanes are reported sorted by name.
    #[must_use]
    pub fn from_lanes(mut lanes: Vec<LaneSnapshot>) -> Self {
        lanes.sort_by(|a, b| a.name.cmp(&b.name));
        let mut global = Self::default();
        for lane in &lanes {
            global.queue_length += lane.queue_length;
            global.buffered += lane.buffered;
            global.active_count += lane.active_count;
            global.totals.add(&lane.counters);
        }
        global.lanes = lanes;
        global
    }

    #[must_use]
    pub fn lane(&self, name: &str) -> Option<&LaneSnapshot> {
        self.lanes.iter().find(|l| l.name == name)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(name: &str, queue_length: usize, received: u64) -> LaneSnapshot {
        LaneSnapshot {
            name: name.into(),
            mode: AdmissionMode::Fifo,
            concurrency_limit: 2,
            queue_length,
            buffered: 1,
            open_windows: 1,
            active_count: 1,
            available_slots: 1,
            counters: LaneCounters {
                received,
                dropped: 1,
                ..Default::default()
            },
        }
    }

    #[test]
    fn global_sums_lanes() {
        let global = GlobalSnapshot::from_lanes(vec![snapshot("tools", 3, 10), snapshot("chat", 2, 5)]);
        assert_eq!(global.lanes[0].name, "chat");
        assert_eq!(global.queue_length, 5);
        assert_eq!(global.buffered, 2);
        assert_eq!(global.active_count, 2);
        assert_eq!(global.totals.received, 15);
        assert_eq!(global.totals.dropped, 2);
        assert!(global.lane("tools").is_some());
        assert!(global.lane("missing").is_none());
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let value = serde_json::to_value(snapshot("chat", 0, 1)).unwrap();
        assert_eq!(value["availableSlots"], 1);
        assert_eq!(value["openWindows"], 1);
        assert_eq!(value["counters"]["timedOut"], 0);
        assert_eq!(value["mode"], "fifo");
    }
}
