//! Running a built graph.
//!
//! A run is driven by one spawned task that owns a `JoinSet` of node
//! invocations. Whenever a node finishes, its output is routed: copied to
//! every direct or fan-out consumer, or folded into the state of the fan-in
//! join it feeds. A join fires its target once every producer contributed.
//! The run completes when nothing is left in flight.

use super::aggregator::Reducer;
use super::builder::GraphDescription;
use super::executor::{CancelState, Executor, NodeContext};
use crate::error::{Error, Result};
use futures::{FutureExt, Stream};
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy)]
pub(crate) enum Route {
    Deliver(usize),
    Join(usize),
}

pub(crate) struct JoinSpec<M> {
    pub(crate) target: usize,
    pub(crate) producers: Vec<usize>,
    pub(crate) reducer: Reducer<M>,
}

pub(crate) struct WorkflowInner<M, O> {
    pub(crate) start: usize,
    pub(crate) nodes: Vec<Arc<dyn Executor<M, O>>>,
    pub(crate) routes: Vec<Vec<Route>>,
    pub(crate) joins: Vec<JoinSpec<M>>,
    pub(crate) description: GraphDescription,
}

/// An immutable, validated graph. Cheap to clone and reusable across runs.
pub struct Workflow<M, O> {
    inner: Arc<WorkflowInner<M, O>>,
}

impl<M, O> Clone for Workflow<M, O> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M, O> fmt::Debug for Workflow<M, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("description", &self.inner.description)
            .finish()
    }
}

/// Something observable that happened during a run.
#[derive(Debug, Clone)]
pub enum RunEvent<O> {
    /// A node streamed a side output.
    Output { node: String, value: O },
    /// A node returned an error or panicked. Its downstream will not run.
    NodeFailed(NodeFailure),
}

#[derive(Debug, Clone)]
pub struct NodeFailure {
    pub node: String,
    pub error: Arc<Error>,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.node, self.error)
    }
}

/// What a finished run did.
#[derive(Debug)]
pub struct RunSummary<M> {
    /// Number of node invocations started.
    pub invocations: usize,
    /// Final outputs of nodes without outgoing edges, in completion order.
    pub outputs: Vec<(String, M)>,
    pub failures: Vec<NodeFailure>,
    /// Fan-in targets that never fired because a producer did not finish.
    pub incomplete_joins: Vec<String>,
    pub cancelled: bool,
}

impl<M> Default for RunSummary<M> {
    fn default() -> Self {
        Self {
            invocations: 0,
            outputs: Vec::new(),
            failures: Vec::new(),
            incomplete_joins: Vec::new(),
            cancelled: false,
        }
    }
}

impl<M> RunSummary<M> {
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failures.is_empty() && self.incomplete_joins.is_empty()
    }

    pub fn output_of(&self, node: &str) -> Option<&M> {
        self.outputs
            .iter()
            .find(|(id, _)| id == node)
            .map(|(_, value)| value)
    }
}

/// A graph run in progress.
///
/// Poll it as a [`Stream`] to watch outputs, then call [`Run::finish`] for
/// the summary. Dropping it cancels the run.
pub struct Run<M, O> {
    events: mpsc::UnboundedReceiver<RunEvent<O>>,
    cancel: Arc<CancelState>,
    driver: JoinHandle<RunSummary<M>>,
}

impl<M, O> Workflow<M, O>
where
    M: Clone + Send + 'static,
    O: Send + 'static,
{
    pub(crate) fn from_inner(inner: WorkflowInner<M, O>) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn describe(&self) -> &GraphDescription {
        &self.inner.description
    }

    /// Start a run with `input` delivered to the start node.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn run(&self, input: M) -> Run<M, O> {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(CancelState::default());
        let driver = tokio::spawn(drive(self.inner.clone(), input, tx, cancel.clone()));
        Run {
            events: rx,
            cancel,
            driver,
        }
    }
}

impl<M, O> Run<M, O> {
    /// Stop the run. Nodes in flight are aborted and nothing more is
    /// delivered through the stream.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the run to complete, discarding events not yet consumed.
    pub async fn finish(mut self) -> Result<RunSummary<M>> {
        while self.events.recv().await.is_some() {}
        match (&mut self.driver).await {
            Ok(summary) => Ok(summary),
            Err(e) => Err(Error::Graph(format!("run driver stopped: {e}"))),
        }
    }
}

impl<M, O> Stream for Run<M, O> {
    type Item = RunEvent<O>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        this.events.poll_recv(cx)
    }
}

struct JoinState<M> {
    pending: HashSet<usize>,
    acc: Option<M>,
    fired: bool,
}

fn panic_reason(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

fn spawn_node<M, O>(
    tasks: &mut JoinSet<(usize, Result<M>)>,
    inner: &WorkflowInner<M, O>,
    index: usize,
    input: M,
    events: &mpsc::UnboundedSender<RunEvent<O>>,
    cancel: &Arc<CancelState>,
) where
    M: Send + 'static,
    O: Send + 'static,
{
    let node = inner.nodes[index].clone();
    let ctx = NodeContext::new(node.id().to_string(), events.clone(), cancel.clone());
    debug!("Starting node {}", node.id());
    tasks.spawn(async move {
        let result = match AssertUnwindSafe(node.handle(input, &ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(Error::Node {
                node: node.id().to_string(),
                reason: panic_reason(panic),
            }),
        };
        (index, result)
    });
}

async fn drive<M, O>(
    inner: Arc<WorkflowInner<M, O>>,
    input: M,
    events: mpsc::UnboundedSender<RunEvent<O>>,
    cancel: Arc<CancelState>,
) -> RunSummary<M>
where
    M: Clone + Send + 'static,
    O: Send + 'static,
{
    let mut tasks = JoinSet::new();
    let mut joins: Vec<JoinState<M>> = inner
        .joins
        .iter()
        .map(|spec| JoinState {
            pending: spec.producers.iter().copied().collect(),
            acc: None,
            fired: false,
        })
        .collect();
    let mut summary = RunSummary::default();

    spawn_node(&mut tasks, &inner, inner.start, input, &events, &cancel);
    summary.invocations += 1;

    loop {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            break;
        }

        let joined = tokio::select! {
            biased;
            _ = cancel.notify.notified() => {
                summary.cancelled = true;
                break;
            }
            _ = events.closed() => {
                debug!("Run handle dropped, cancelling");
                cancel.cancel();
                summary.cancelled = true;
                break;
            }
            joined = tasks.join_next() => joined,
        };

        let Some(joined) = joined else {
            break;
        };
        let (index, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                // Panics are caught inside the task, so only aborts land here.
                warn!("Node task ended abnormally: {}", e);
                continue;
            }
        };
        let node_id = inner.nodes[index].id();

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                error!("Node {} failed: {}", node_id, e);
                let failure = NodeFailure {
                    node: node_id.to_string(),
                    error: Arc::new(e),
                };
                if !cancel.is_cancelled() {
                    let _ = events.send(RunEvent::NodeFailed(failure.clone()));
                }
                summary.failures.push(failure);
                continue;
            }
        };

        debug!("Node {} finished", node_id);
        let routes = &inner.routes[index];
        if routes.is_empty() {
            summary.outputs.push((node_id.to_string(), output));
            continue;
        }

        for route in routes {
            match *route {
                Route::Deliver(target) => {
                    spawn_node(&mut tasks, &inner, target, output.clone(), &events, &cancel);
                    summary.invocations += 1;
                }
                Route::Join(join) => {
                    let spec = &inner.joins[join];
                    let state = &mut joins[join];
                    if state.fired {
                        warn!(
                            "Late contribution from {} to {} ignored",
                            node_id,
                            inner.nodes[spec.target].id()
                        );
                        continue;
                    }
                    state.acc = Some((spec.reducer)(state.acc.take(), output.clone()));
                    state.pending.remove(&index);
                    if state.pending.is_empty() {
                        state.fired = true;
                        if let Some(merged) = state.acc.take() {
                            spawn_node(&mut tasks, &inner, spec.target, merged, &events, &cancel);
                            summary.invocations += 1;
                        }
                    }
                }
            }
        }
    }

    if summary.cancelled {
        tasks.abort_all();
    }

    summary.incomplete_joins = inner
        .joins
        .iter()
        .zip(&joins)
        .filter(|(_, state)| !state.fired)
        .map(|(spec, _)| inner.nodes[spec.target].id().to_string())
        .collect();

    info!(
        "Run finished: {} invocations, {} failures, {} incomplete joins{}",
        summary.invocations,
        summary.failures.len(),
        summary.incomplete_joins.len(),
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    summary
}
