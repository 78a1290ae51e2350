//! Directed task graph with fan-out, fan-in, streamed outputs and
//! cancellation.
//!
//! ```text
//! GraphBuilder ──build()──▶ Workflow ──run(input)──▶ Run (Stream of RunEvent)
//!                                                     └─finish()──▶ RunSummary
//! ```
//!
//! `M` is the message type travelling along edges, `O` the type of side
//! outputs nodes stream while they work.

mod aggregator;
mod builder;
mod executor;
mod run;

pub use aggregator::{Aggregator, Reducer};
pub use builder::{
    EdgeDescription, EdgeKind, GraphBuilder, GraphDescription, NodeDescription, NodeKind,
};
pub use executor::{passthrough, Executor, FnExecutor, NodeContext};
pub use run::{NodeFailure, Run, RunEvent, RunSummary, Workflow};
