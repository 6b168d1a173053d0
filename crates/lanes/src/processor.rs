//! Processor seam between the dispatcher and business logic.
//!
//! A processor is either supplied inline (per enqueue or per dispatcher) or,
//! when none is configured, the dispatcher hands each item to an external
//! consumer loop as a [`ProcessRequest`] carrying a one-shot [`Completion`].

use std::{future::Future, sync::Arc};

use {
    anyhow::anyhow,
    async_trait::async_trait,
    serde_json::Value,
    tokio::sync::{mpsc, oneshot},
    tokio_util::sync::CancellationToken,
    tracing::warn,
};

use crate::types::WorkItem;

/// Performs the actual work for one dispatched item.
///
/// The token is cancelled when the item's deadline passes. Honoring it is
/// optional: the slot is released either way.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, item: WorkItem, cancel: CancellationToken) -> anyhow::Result<Value>;
}

struct FnProcessor<F>(F);

#[async_trait]
impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(WorkItem, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn process(&self, item: WorkItem, cancel: CancellationToken) -> anyhow::Result<Value> {
        (self.0)(item, cancel).await
    }
}

/// Wrap an async closure as a [`Processor`].
pub fn processor_fn<F, Fut>(f: F) -> Arc<dyn Processor>
where
    F: Fn(WorkItem, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnProcessor(f))
}

/// One-shot resolver for a handed-off item. Consuming `self` makes a second
/// resolution impossible; dropping it unresolved fails the item.
#[derive(Debug)]
pub struct Completion {
    tx: oneshot::Sender<Result<Value, String>>,
}

impl Completion {
    /// Resolve the item. Returns `false` if the dispatcher stopped waiting
    /// (for example because the item already timed out).
    pub fn complete(self, result: anyhow::Result<Value>) -> bool {
        self.tx.send(result.map_err(|e| format!("{e:#}"))).is_ok()
    }
}

/// An item handed to an external consumer loop.
#[derive(Debug)]
pub struct ProcessRequest {
    pub item: WorkItem,
    pub cancel: CancellationToken,
    pub completion: Completion,
}

impl ProcessRequest {
    /// Resolve this request with the processing result.
    pub fn complete(self, result: anyhow::Result<Value>) -> bool {
        self.completion.complete(result)
    }
}

/// Processor that forwards items over a channel to whoever holds the receiver.
pub(crate) struct HandoffProcessor {
    tx: mpsc::UnboundedSender<ProcessRequest>,
}

impl HandoffProcessor {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<ProcessRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Processor for HandoffProcessor {
    async fn process(&self, item: WorkItem, cancel: CancellationToken) -> anyhow::Result<Value> {
        let (tx, rx) = oneshot::channel();
        let item_id = item.id.clone();
        let request = ProcessRequest {
            item,
            cancel,
            completion: Completion { tx },
        };
        if self.tx.send(request).is_err() {
            warn!(item_id = %item_id, "no process consumer attached");
            return Err(anyhow!("no process consumer attached"));
        }
        match rx.await {
            Ok(result) => result.map_err(|message| anyhow!(message)),
            Err(_) => Err(anyhow!("consumer dropped the completion without resolving it")),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[tokio::test]
    async fn closure_processor_runs() {
        let processor = processor_fn(|item, _cancel| async move { Ok(json!({"seen": item.payload})) });
        let item = WorkItem::new(json!("hi"), "chat", "s", 0);
        let out = processor
            .process(item, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, json!({"seen": "hi"}));
    }

    #[tokio::test]
    async fn handoff_round_trip() {
        let (processor, mut rx) = HandoffProcessor::channel();
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                let payload = req.item.payload.clone();
                assert!(req.complete(Ok(payload)));
            }
        });

        let item = WorkItem::new(json!(7), "tools", "s", 0);
        let out = processor
            .process(item, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, json!(7));
    }

    #[tokio::test]
    async fn handoff_error_is_propagated() {
        let (processor, mut rx) = HandoffProcessor::channel();
        tokio::spawn(async move {
            if let Some(req) = rx.recv().await {
                req.complete(Err(anyhow!("booking API returned 503")));
            }
        });

        let item = WorkItem::new(json!(null), "tools", "s", 0);
        let err = processor
            .process(item, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn dropped_completion_fails() {
        let (processor, mut rx) = HandoffProcessor::channel();
        tokio::spawn(async move {
            // Receive and discard without resolving.
            let _ = rx.recv().await;
        });

        let item = WorkItem::new(json!(null), "tools", "s", 0);
        let err = processor
            .process(item, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("without resolving"));
    }

    #[tokio::test]
    async fn no_consumer_fails_fast() {
        let (processor, rx) = HandoffProcessor::channel();
        drop(rx);
        let item = WorkItem::new(json!(null), "tools", "s", 0);
        assert!(
            processor
                .process(item, CancellationToken::new())
                .await
                .is_err()
        );
    }
}
