//! Fan-in aggregation.
//!
//! An [`Aggregator`] is the consumer end of a fan-in edge. The engine folds
//! every producer result into the aggregator's reducer as it arrives, starting
//! from `None`, and invokes the aggregator once with the combined value after
//! the last producer finished. The aggregator itself just forwards that value.
//!
//! Producers finish in whatever order the scheduler happens to pick, so a
//! reducer must give the same answer for any permutation of its inputs.

use super::executor::{Executor, NodeContext};
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// `merge(accumulator | None, next) -> accumulator`
pub type Reducer<M> = Arc<dyn Fn(Option<M>, M) -> M + Send + Sync>;

/// Identity node paired with a reducer.
pub struct Aggregator<M> {
    id: String,
    reducer: Reducer<M>,
}

impl<M> Aggregator<M> {
    pub fn new<F>(id: impl Into<String>, reducer: F) -> Self
    where
        F: Fn(Option<M>, M) -> M + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            reducer: Arc::new(reducer),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn reducer(&self) -> Reducer<M> {
        self.reducer.clone()
    }

    /// Fold `items` the way the engine would if they arrived in this order.
    pub fn aggregate(&self, items: impl IntoIterator<Item = M>) -> Option<M> {
        items
            .into_iter()
            .fold(None, |acc, next| Some((self.reducer)(acc, next)))
    }
}

impl<M> Clone for Aggregator<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            reducer: self.reducer.clone(),
        }
    }
}

impl<M> fmt::Debug for Aggregator<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator").field("id", &self.id).finish()
    }
}

#[async_trait]
impl<M, O> Executor<M, O> for Aggregator<M>
where
    M: Send + 'static,
    O: Send + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn handle(&self, input: M, _ctx: &NodeContext<O>) -> Result<M> {
        Ok(input)
    }
}
