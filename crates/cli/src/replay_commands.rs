//! `switchyard replay`: drive a dispatcher from a JSON-lines file.
//!
//! Each line is one work item:
//!
//! ```json
//! {"lane": "chat", "session": "u1", "priority": 0, "payload": "hi", "interrupt": false, "delay_ms": 0}
//! ```
//!
//! Items are handed to a simulated consumer that echoes the payload after
//! `--work-ms`, failing any item whose payload contains `--fail-on`.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result, anyhow},
    clap::Args,
    futures::future::join_all,
    serde::Deserialize,
    serde_json::{Value, json},
    switchyard_config::SwitchyardConfig,
    switchyard_lanes::{
        DEFAULT_SESSION, Dispatcher, DispatcherOptions, EnqueueOptions, GlobalSnapshot, LaneRegistry,
        Outcome, ProcessRequest,
    },
    tokio::sync::mpsc,
    tracing::{info, warn},
};

#[derive(Args)]
pub struct ReplayArgs {
    /// JSON-lines file of work items.
    #[arg(long)]
    input: PathBuf,

    /// Simulated processing time per dispatched item, in milliseconds.
    #[arg(long, default_value_t = 50)]
    work_ms: u64,

    /// Fail every item whose payload contains this text.
    #[arg(long)]
    fail_on: Option<String>,

    /// Print Prometheus metrics after the run.
    #[cfg(feature = "prometheus")]
    #[arg(long, default_value_t = false)]
    metrics: bool,
}

#[derive(Debug, Deserialize)]
struct ReplayRecord {
    lane: String,
    #[serde(default)]
    session: Option<String>,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    interrupt: bool,
    /// Pause before enqueueing this record.
    #[serde(default)]
    delay_ms: u64,
}

impl ReplayRecord {
    fn options(&self) -> EnqueueOptions {
        let options = EnqueueOptions::new(&self.lane)
            .session(self.session.as_deref().unwrap_or(DEFAULT_SESSION))
            .priority(self.priority);
        if self.interrupt {
            options.interrupt()
        } else {
            options
        }
    }
}

fn parse_records(raw: &str) -> Result<Vec<(usize, ReplayRecord)>> {
    raw.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line_no, line)| {
            serde_json::from_str(line)
                .map(|record| (line_no, record))
                .with_context(|| format!("line {line_no}: invalid replay record"))
        })
        .collect()
}

/// Everything a replay run produced, in print order.
struct ReplayReport {
    /// One entry per record: a rejection, or the record's outcome.
    lines: Vec<Value>,
    snapshot: GlobalSnapshot,
}

pub async fn replay(config: &SwitchyardConfig, args: ReplayArgs) -> Result<()> {
    #[cfg(feature = "prometheus")]
    let metrics = switchyard_metrics::init_metrics(switchyard_metrics::MetricsRecorderConfig {
        enabled: args.metrics,
        ..Default::default()
    })?;

    let raw = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let records = parse_records(&raw)?;

    let report = run(
        config,
        records,
        Duration::from_millis(args.work_ms),
        args.fail_on.map(Arc::<str>::from),
    )
    .await?;

    for line in &report.lines {
        println!("{line}");
    }
    println!("{}", serde_json::to_string_pretty(&report.snapshot)?);

    #[cfg(feature = "prometheus")]
    if args.metrics {
        eprintln!("{}", metrics.render());
    }

    Ok(())
}

async fn run(
    config: &SwitchyardConfig,
    records: Vec<(usize, ReplayRecord)>,
    work: Duration,
    fail_on: Option<Arc<str>>,
) -> Result<ReplayReport> {
    let registry = LaneRegistry::from_config(config)?;
    let dispatcher =
        Dispatcher::with_options(registry, DispatcherOptions::from_config(&config.dispatcher));
    let requests = dispatcher
        .take_requests()
        .ok_or_else(|| anyhow!("process requests already taken"))?;
    let consumer = tokio::spawn(consume(requests, work, fail_on));

    info!(records = records.len(), lanes = ?dispatcher.lane_names(), "replay started");

    let mut rejected = Vec::new();
    let mut pending = Vec::with_capacity(records.len());
    for (line_no, record) in records {
        if record.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(record.delay_ms)).await;
        }
        match dispatcher.enqueue(record.payload.clone(), record.options()) {
            Ok(handle) => pending.push(async move { (line_no, handle.await) }),
            Err(e) => {
                warn!(line = line_no, error = %e, "record rejected");
                rejected.push((line_no, json!({"line": line_no, "rejected": e.to_string()})));
            },
        }
    }

    let mut lines: Vec<(usize, Value)> = join_all(pending)
        .await
        .into_iter()
        .map(|(line_no, outcome)| (line_no, outcome_json(line_no, &outcome)))
        .chain(rejected)
        .collect();
    lines.sort_by_key(|(line_no, _)| *line_no);

    let snapshot = dispatcher.global_snapshot();
    consumer.abort();

    Ok(ReplayReport {
        lines: lines.into_iter().map(|(_, line)| line).collect(),
        snapshot,
    })
}

fn outcome_json(line_no: usize, outcome: &Outcome) -> Value {
    let mut value = json!({
        "line": line_no,
        "itemId": outcome.item_id,
        "dispatchedId": outcome.dispatched_id,
        "status": outcome.status,
        "wasBatched": outcome.was_batched,
        "batchSize": outcome.batch_size,
    });
    match &outcome.result {
        Ok(result) => value["result"] = result.clone(),
        Err(e) => {
            value["error"] = json!({"kind": e.kind(), "message": e.to_string()});
        },
    }
    value
}

/// Simulated consumer: each request is worked on in its own task.
async fn consume(
    mut requests: mpsc::UnboundedReceiver<ProcessRequest>,
    work: Duration,
    fail_on: Option<Arc<str>>,
) {
    while let Some(request) = requests.recv().await {
        let fail_on = fail_on.clone();
        tokio::spawn(async move {
            let ProcessRequest {
                item,
                cancel,
                completion,
            } = request;
            tokio::select! {
                () = cancel.cancelled() => {
                    completion.complete(Err(anyhow!("cancelled")));
                    return;
                },
                () = tokio::time::sleep(work) => {},
            }

            let result = match fail_on.as_deref() {
                Some(needle) if item.payload.to_string().contains(needle) => {
                    Err(anyhow!("payload matched --fail-on {needle:?}"))
                },
                _ => Ok(json!({
                    "echo": item.payload,
                    "lane": item.lane,
                    "session": item.session_key,
                    "batchSize": item.batch_size(),
                })),
            };
            completion.complete(result);
        });
    }
}
