//! Batch composition for windowed lanes.
//!
//! Pure transformation: buffered raw items in, one logical item out.

use {
    serde_json::{Value, json},
    switchyard_config::AdmissionMode,
};

use crate::types::WorkItem;

/// Merge `members` (in arrival order) into one work item.
///
/// - `Steer`: `{"current": <latest>, "previous": [<earlier>...]}`
/// - `Collect` (and anything else): an array of the member payloads
///
/// The result carries the lowest member priority, the first member's arrival
/// time, and the ids of every member. Returns `None` for an empty set.
pub fn compose(mode: AdmissionMode, members: Vec<WorkItem>) -> Option<WorkItem> {
    let first = members.first()?;
    let mut composed = WorkItem::new(
        Value::Null,
        first.lane.clone(),
        first.session_key.clone(),
        first.priority,
    );
    composed.enqueued_at = first.enqueued_at;
    composed.enqueued_at_ms = first.enqueued_at_ms;

    let mut ids = Vec::with_capacity(members.len());
    let mut payloads = Vec::with_capacity(members.len());
    for member in members {
        composed.priority = composed.priority.min(member.priority);
        ids.push(member.id);
        payloads.push(member.payload);
    }

    composed.payload = match mode {
        AdmissionMode::Steer => {
            let current = payloads.pop().unwrap_or(Value::Null);
            json!({ "current": current, "previous": payloads })
        },
        AdmissionMode::Collect | AdmissionMode::Fifo | AdmissionMode::Interrupt => {
            Value::Array(payloads)
        },
    };
    composed.members = Some(ids);
    Some(composed)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn items(payloads: &[(&str, i64)]) -> Vec<WorkItem> {
        payloads
            .iter()
            .map(|(text, priority)| WorkItem::new(json!(text), "chat", "s1", *priority))
            .collect()
    }

    #[test]
    fn steer_splits_latest_from_context() {
        let members = items(&[("A", 0), ("B", 0), ("C", 0)]);
        let composed = compose(AdmissionMode::Steer, members).unwrap();
        assert_eq!(composed.payload["current"], json!("C"));
        assert_eq!(composed.payload["previous"], json!(["A", "B"]));
        assert_eq!(composed.batch_size(), 3);
    }

    #[test]
    fn collect_keeps_arrival_order_and_min_priority() {
        let members = items(&[("x", 4), ("y", -2), ("z", 9)]);
        let ids: Vec<String> = members.iter().map(|m| m.id.clone()).collect();
        let first_at = members[0].enqueued_at;

        let composed = compose(AdmissionMode::Collect, members).unwrap();
        assert_eq!(composed.payload, json!(["x", "y", "z"]));
        assert_eq!(composed.priority, -2);
        assert_eq!(composed.members.as_deref(), Some(ids.as_slice()));
        assert_eq!(composed.enqueued_at, first_at);
        assert_eq!(composed.lane, "chat");
        assert_eq!(composed.session_key, "s1");
        assert!(!ids.contains(&composed.id));
    }

    #[test]
    fn steer_singleton_has_empty_previous() {
        let composed = compose(AdmissionMode::Steer, items(&[("only", 1)])).unwrap();
        assert_eq!(composed.payload, json!({"current": "only", "previous": []}));
        assert_eq!(composed.batch_size(), 1);
    }

    #[test]
    fn empty_input_composes_nothing() {
        assert!(compose(AdmissionMode::Collect, Vec::new()).is_none());
    }
}
