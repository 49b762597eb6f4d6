// Map - Bounded fan-out of a sub-graph over a context collection
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::error::{codes, NodeError};
use super::executor::{ExecutionEngine, ExecutionOutcome, TerminalStatus};
use super::graph::MapNode;
use super::state::MapScope;

/// Terminal outcome of one item-execution
#[derive(Debug, Clone, PartialEq)]
pub struct ItemOutcome {
    pub index: usize,
    pub status: TerminalStatus,
    /// The branch's declared output, `null` when none is declared or the branch failed
    pub output: Value,
    pub visited: Vec<String>,
}

impl ItemOutcome {
    fn failed(index: usize, error: &str, cause: String) -> Self {
        Self {
            index,
            status: TerminalStatus::Failed {
                error: error.to_string(),
                cause,
            },
            output: Value::Null,
            visited: Vec::new(),
        }
    }

    fn to_json(&self) -> Value {
        match &self.status {
            TerminalStatus::Succeeded => json!({
                "index": self.index,
                "status": "SUCCEEDED",
                "output": self.output,
            }),
            TerminalStatus::Failed { error, cause } => json!({
                "index": self.index,
                "status": "FAILED",
                "error": error,
                "cause": cause,
            }),
        }
    }
}

/// Per-item outcomes of one Map node execution, ordered by item index
#[derive(Debug, Clone, PartialEq)]
pub struct MapReport {
    pub node: String,
    pub items: Vec<ItemOutcome>,
}

impl MapReport {
    pub fn failed(&self) -> usize {
        self.items.iter().filter(|item| !item.status.is_success()).count()
    }

    pub fn succeeded(&self) -> usize {
        self.items.len() - self.failed()
    }

    pub fn item(&self, index: usize) -> Option<&ItemOutcome> {
        self.items.iter().find(|item| item.index == index)
    }

    /// Join output written at the Map node's result path
    pub fn to_json(&self) -> Value {
        Value::Array(self.items.iter().map(ItemOutcome::to_json).collect())
    }
}

/// Seed a branch context: the parent context plus `{item, itemIndex}` plus selector fields
fn seed_branch(node: &MapNode, parent: &Value, item: &Value, index: usize) -> Result<Value, NodeError> {
    let mut seeded = match parent {
        Value::Object(fields) => fields.clone(),
        _ => Map::new(),
    };
    seeded.insert("item".to_string(), item.clone());
    seeded.insert("itemIndex".to_string(), Value::from(index));

    if let Some(selector) = &node.item_selector {
        if let Value::Object(selected) = selector.resolve_scoped(parent, Some(MapScope { item, index }))? {
            seeded.extend(selected);
        }
    }
    Ok(Value::Object(seeded))
}

fn item_outcome(node: &MapNode, index: usize, outcome: ExecutionOutcome) -> ItemOutcome {
    let output = match (&outcome.status, &node.branch_output) {
        (TerminalStatus::Succeeded, Some(path)) => path.get(&outcome.context).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    };
    ItemOutcome {
        index,
        status: outcome.status,
        output,
        visited: outcome.visited,
    }
}

/// Run the node's sub-graph once per item.
///
/// At most `max_concurrency` item-executions run at once; the rest queue in
/// item order. Returns the per-item report (absent when the collection could
/// not be read) and the node result: the join output, or `Map.BranchFailed`
/// when the node is fail-fast and a branch failed.
pub(crate) async fn run_map(
    engine: &ExecutionEngine,
    node_id: &str,
    node: &MapNode,
    ctx: &Value,
) -> (Option<MapReport>, Result<Value, NodeError>) {
    let items = match node.items_path.get(ctx) {
        Some(Value::Array(items)) => items.clone(),
        Some(other) => {
            let err = NodeError::Runtime(format!(
                "map '{}' expected an array at {}, found {}",
                node_id, node.items_path, other
            ));
            return (None, Err(err));
        }
        None => {
            let err = NodeError::Runtime(format!("map '{}' found nothing at {}", node_id, node.items_path));
            return (None, Err(err));
        }
    };

    let total = items.len();
    let limit = if node.max_concurrency == 0 {
        total.max(1)
    } else {
        node.max_concurrency
    };
    info!(node = node_id, "🔀 Fanning out {} items (max {} concurrent)", total, limit);

    let semaphore = Arc::new(Semaphore::new(limit));
    let mut queue = items.iter().enumerate().peekable();
    let mut running: JoinSet<(usize, Result<ExecutionOutcome, String>)> = JoinSet::new();
    let mut spawned = HashSet::new();
    let mut outcomes: Vec<ItemOutcome> = Vec::with_capacity(total);
    let mut tripped = false;

    while outcomes.len() < total && !tripped {
        let has_queued = queue.peek().is_some();
        tokio::select! {
            biased;

            Some(joined) = running.join_next(), if !running.is_empty() => {
                let outcome = match joined {
                    Ok((index, Ok(outcome))) => item_outcome(node, index, outcome),
                    Ok((index, Err(panic))) => ItemOutcome::failed(index, codes::RUNTIME, panic),
                    // Only aborted tasks end without a value, and abort happens after the loop
                    Err(e) => {
                        warn!(node = node_id, "Branch task ended abnormally: {}", e);
                        continue;
                    }
                };
                if let TerminalStatus::Failed { error, cause } = &outcome.status {
                    warn!(node = node_id, item_index = outcome.index, "⚠️ Branch failed with {}: {}", error, cause);
                    tripped = node.fail_fast;
                }
                outcomes.push(outcome);
            }

            permit = semaphore.clone().acquire_owned(), if has_queued => {
                let Some((index, item)) = queue.next() else { continue };
                let permit = match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        outcomes.push(ItemOutcome::failed(index, codes::RUNTIME, e.to_string()));
                        continue;
                    }
                };

                let seeded = match seed_branch(node, ctx, item, index) {
                    Ok(seeded) => seeded,
                    Err(e) => {
                        warn!(node = node_id, item_index = index, "⚠️ Branch not started: {}", e);
                        outcomes.push(ItemOutcome::failed(index, e.code(), e.cause()));
                        tripped = node.fail_fast;
                        continue;
                    }
                };

                let branch = engine
                    .clone()
                    .run_branch(node.branch.clone(), seeded, format!("{}[{}]", node_id, index));
                spawned.insert(index);
                running.spawn(async move {
                    let _permit = permit;
                    let outcome = AssertUnwindSafe(branch)
                        .catch_unwind()
                        .await
                        .map_err(|panic| {
                            panic
                                .downcast_ref::<&str>()
                                .map(|s| s.to_string())
                                .or_else(|| panic.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "branch panicked".to_string())
                        });
                    (index, outcome)
                });
            }

            else => break,
        }
    }

    if tripped {
        running.abort_all();
        while let Some(joined) = running.join_next().await {
            if let Ok((index, Ok(outcome))) = joined {
                outcomes.push(item_outcome(node, index, outcome));
            }
        }
        let finished: HashSet<usize> = outcomes.iter().map(|o| o.index).collect();
        for index in (0..total).filter(|i| !finished.contains(i)) {
            let cause = if spawned.contains(&index) {
                "aborted after a sibling branch failed"
            } else {
                "not started after a sibling branch failed"
            };
            outcomes.push(ItemOutcome::failed(index, codes::BRANCH_FAILED, cause.to_string()));
        }
    }

    outcomes.sort_by_key(|o| o.index);
    let report = MapReport {
        node: node_id.to_string(),
        items: outcomes,
    };
    info!(
        node = node_id,
        "🔗 Map joined: {} succeeded, {} failed",
        report.succeeded(),
        report.failed()
    );

    let result = if tripped {
        Err(NodeError::BranchFailed {
            node: node_id.to_string(),
            failed: report.failed(),
            total,
        })
    } else {
        Ok(report.to_json())
    };
    (Some(report), result)
}
