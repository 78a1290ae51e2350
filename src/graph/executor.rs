//! The unit of work in a task graph.

use super::run::RunEvent;
use crate::error::Result;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::trace;

/// A node in the graph.
///
/// Accepts one input message and asynchronously produces one output message,
/// which travels along the node's outgoing edges. Before returning it may
/// stream any number of side outputs through [`NodeContext::yield_output`].
/// Executors never call each other; all wiring lives in the graph.
#[async_trait]
pub trait Executor<M, O>: Send + Sync
where
    M: Send + 'static,
    O: Send + 'static,
{
    /// Stable id, unique within one graph.
    fn id(&self) -> &str;

    async fn handle(&self, input: M, ctx: &NodeContext<O>) -> Result<M>;
}

#[derive(Default)]
pub(crate) struct CancelState {
    flag: AtomicBool,
    pub(crate) notify: Notify,
}

impl CancelState {
    pub(crate) fn cancel(&self) {
        if !self.flag.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Handed to an executor for the duration of one invocation.
pub struct NodeContext<O> {
    node: String,
    events: mpsc::UnboundedSender<RunEvent<O>>,
    cancel: Arc<CancelState>,
}

impl<O: Send + 'static> NodeContext<O> {
    pub(crate) fn new(
        node: String,
        events: mpsc::UnboundedSender<RunEvent<O>>,
        cancel: Arc<CancelState>,
    ) -> Self {
        Self {
            node,
            events,
            cancel,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node
    }

    /// Whether the run has been cancelled. Long-running executors may check
    /// this between steps and bail out early.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.events.is_closed()
    }

    /// Stream a side output to whoever is watching the run.
    ///
    /// Returns `false` when the output was dropped because the run is
    /// cancelled.
    pub fn yield_output(&self, value: O) -> bool {
        if self.is_cancelled() {
            trace!("Dropping output of {} after cancellation", self.node);
            return false;
        }
        self.events
            .send(RunEvent::Output {
                node: self.node.clone(),
                value,
            })
            .is_ok()
    }
}

/// Executor backed by an async closure. The closure does not see the
/// context, so it cannot stream outputs.
pub struct FnExecutor<F, O> {
    id: String,
    f: F,
    _output: PhantomData<fn() -> O>,
}

impl<F, O> FnExecutor<F, O> {
    pub fn new(id: impl Into<String>, f: F) -> Self {
        Self {
            id: id.into(),
            f,
            _output: PhantomData,
        }
    }
}

#[async_trait]
impl<M, O, F, Fut> Executor<M, O> for FnExecutor<F, O>
where
    M: Send + 'static,
    O: Send + 'static,
    F: Fn(M) -> Fut + Send + Sync,
    Fut: Future<Output = Result<M>> + Send,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn handle(&self, input: M, _ctx: &NodeContext<O>) -> Result<M> {
        (self.f)(input).await
    }
}

/// Forwards its input unchanged. Typical start node.
pub fn passthrough<M, O>(id: impl Into<String>) -> impl Executor<M, O>
where
    M: Send + 'static,
    O: Send + 'static,
{
    FnExecutor::new(id, |input: M| async move { Ok(input) })
}
