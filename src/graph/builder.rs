//! Graph construction and validation.
//!
//! The builder only records what it is told. Ids are resolved and the graph
//! is checked (unknown or duplicate ids, empty edges, cycles) when
//! [`GraphBuilder::build`] turns it into an immutable [`Workflow`].

use super::aggregator::{Aggregator, Reducer};
use super::executor::Executor;
use super::run::{JoinSpec, Route, Workflow, WorkflowInner};
use crate::error::{Error, Result};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

/// How two nodes are connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Direct,
    FanOut,
    FanIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Executor,
    Aggregator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeDescription {
    pub id: String,
    pub kind: NodeKind,
}

/// One producer/consumer pair. Fan-out and fan-in edges are listed once per
/// pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeDescription {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

/// Plain description of a built graph, independent of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphDescription {
    pub start: String,
    pub nodes: Vec<NodeDescription>,
    pub edges: Vec<EdgeDescription>,
}

impl GraphDescription {
    /// Render as a Mermaid flowchart.
    ///
    /// Direct edges are solid, fan-out edges thick and fan-in edges dotted;
    /// aggregators are drawn as hexagons.
    pub fn to_mermaid(&self) -> String {
        let keys: HashMap<&str, String> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), format!("n{i}")))
            .collect();

        let mut out = String::from("flowchart TD\n");
        for node in &self.nodes {
            let key = &keys[node.id.as_str()];
            let label = node.id.replace('"', "#quot;");
            let _ = match node.kind {
                NodeKind::Executor => writeln!(out, "  {key}[\"{label}\"];"),
                NodeKind::Aggregator => writeln!(out, "  {key}{{{{\"{label}\"}}}};"),
            };
        }
        for edge in &self.edges {
            let arrow = match edge.kind {
                EdgeKind::Direct => "-->",
                EdgeKind::FanOut => "==>",
                EdgeKind::FanIn => "-.->",
            };
            let _ = writeln!(
                out,
                "  {} {} {};",
                keys[edge.from.as_str()],
                arrow,
                keys[edge.to.as_str()]
            );
        }
        out
    }
}

fn resolve(index: &HashMap<&str, usize>, id: &str, errors: &mut Vec<String>) -> Option<usize> {
    let found = index.get(id).copied();
    if found.is_none() {
        errors.push(format!("unknown node '{id}'"));
    }
    found
}

enum EdgeSpec<M> {
    Direct {
        from: String,
        to: String,
    },
    FanOut {
        from: String,
        to: Vec<String>,
    },
    FanIn {
        from: Vec<String>,
        to: String,
        reducer: Reducer<M>,
    },
}

/// Accumulates executors and edges for a [`Workflow`].
pub struct GraphBuilder<M, O> {
    start: String,
    nodes: Vec<(Arc<dyn Executor<M, O>>, NodeKind)>,
    edges: Vec<EdgeSpec<M>>,
    errors: Vec<String>,
}

impl<M, O> GraphBuilder<M, O>
where
    M: Clone + Send + 'static,
    O: Send + 'static,
{
    /// Start a graph whose entry point is `start`.
    pub fn new(start: impl Executor<M, O> + 'static) -> Self {
        let mut builder = Self {
            start: start.id().to_string(),
            nodes: Vec::new(),
            edges: Vec::new(),
            errors: Vec::new(),
        };
        builder.insert(Arc::new(start), NodeKind::Executor);
        builder
    }

    fn insert(&mut self, node: Arc<dyn Executor<M, O>>, kind: NodeKind) {
        if self.nodes.iter().any(|(n, _)| n.id() == node.id()) {
            self.errors.push(format!("duplicate node id '{}'", node.id()));
            return;
        }
        self.nodes.push((node, kind));
    }

    pub fn add_executor(&mut self, executor: impl Executor<M, O> + 'static) -> &mut Self {
        self.insert(Arc::new(executor), NodeKind::Executor);
        self
    }

    pub fn add_edge(&mut self, from: &str, to: &str) -> &mut Self {
        self.edges.push(EdgeSpec::Direct {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    /// Every consumer receives its own copy of `from`'s output.
    pub fn add_fan_out_edge(&mut self, from: &str, to: &[&str]) -> &mut Self {
        if to.is_empty() {
            self.errors
                .push(format!("fan-out edge from '{from}' has no consumers"));
            return self;
        }
        self.edges.push(EdgeSpec::FanOut {
            from: from.to_string(),
            to: to.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    /// `to` runs once, after every producer in `from` has finished, with all
    /// their outputs folded through `reducer`.
    pub fn add_fan_in_edge(&mut self, from: &[&str], to: &str, reducer: Reducer<M>) -> &mut Self {
        if from.is_empty() {
            self.errors
                .push(format!("fan-in edge into '{to}' has no producers"));
            return self;
        }
        self.edges.push(EdgeSpec::FanIn {
            from: from.iter().map(|s| s.to_string()).collect(),
            to: to.to_string(),
            reducer,
        });
        self
    }

    /// Register `aggregator` and a fan-in edge from `sources` into it.
    pub fn add_aggregator(&mut self, aggregator: Aggregator<M>, sources: &[&str]) -> &mut Self {
        let id = aggregator.id().to_string();
        let reducer = aggregator.reducer();
        self.insert(Arc::new(aggregator), NodeKind::Aggregator);
        self.add_fan_in_edge(sources, &id, reducer)
    }

    /// Validate and freeze the graph.
    pub fn build(self) -> Result<Workflow<M, O>> {
        let mut errors = self.errors;

        let index: HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, (n, _))| (n.id(), i))
            .collect();

        let mut pairs: Vec<(usize, usize, EdgeKind, Route)> = Vec::new();
        let mut joins: Vec<JoinSpec<M>> = Vec::new();
        let mut fan_in_targets = HashSet::new();

        for edge in &self.edges {
            match edge {
                EdgeSpec::Direct { from, to } => {
                    let f = resolve(&index, from, &mut errors);
                    let t = resolve(&index, to, &mut errors);
                    if let (Some(f), Some(t)) = (f, t) {
                        pairs.push((f, t, EdgeKind::Direct, Route::Deliver(t)));
                    }
                }
                EdgeSpec::FanOut { from, to } => {
                    let Some(f) = resolve(&index, from, &mut errors) else {
                        continue;
                    };
                    for target in to {
                        if let Some(t) = resolve(&index, target, &mut errors) {
                            pairs.push((f, t, EdgeKind::FanOut, Route::Deliver(t)));
                        }
                    }
                }
                EdgeSpec::FanIn { from, to, reducer } => {
                    let Some(t) = resolve(&index, to, &mut errors) else {
                        continue;
                    };
                    if !fan_in_targets.insert(t) {
                        errors.push(format!("'{to}' is the target of more than one fan-in edge"));
                        continue;
                    }
                    let producers: Vec<usize> = from
                        .iter()
                        .filter_map(|p| resolve(&index, p, &mut errors))
                        .collect();
                    if producers.len() != from.len() {
                        continue;
                    }
                    let unique: HashSet<usize> = producers.iter().copied().collect();
                    if unique.len() != producers.len() {
                        errors.push(format!("fan-in edge into '{to}' lists a producer twice"));
                        continue;
                    }
                    let join = joins.len();
                    for &p in &producers {
                        pairs.push((p, t, EdgeKind::FanIn, Route::Join(join)));
                    }
                    joins.push(JoinSpec {
                        target: t,
                        producers,
                        reducer: reducer.clone(),
                    });
                }
            }
        }

        if !errors.is_empty() {
            return Err(Error::Graph(errors.join("; ")));
        }

        let mut graph: DiGraph<usize, EdgeKind> = DiGraph::new();
        let handles: Vec<NodeIndex> = (0..self.nodes.len()).map(|i| graph.add_node(i)).collect();
        let mut routes: Vec<Vec<Route>> = vec![Vec::new(); self.nodes.len()];
        let mut described = Vec::with_capacity(pairs.len());
        for (from, to, kind, route) in pairs {
            routes[from].push(route);
            graph.add_edge(handles[from], handles[to], kind);
            described.push(EdgeDescription {
                from: self.nodes[from].0.id().to_string(),
                to: self.nodes[to].0.id().to_string(),
                kind,
            });
        }

        if let Err(cycle) = toposort(&graph, None) {
            let node = graph[cycle.node_id()];
            return Err(Error::Graph(format!(
                "cycle through node '{}'",
                self.nodes[node].0.id()
            )));
        }

        let start = index[self.start.as_str()];
        let mut reachable = HashSet::new();
        let mut dfs = Dfs::new(&graph, handles[start]);
        while let Some(nx) = dfs.next(&graph) {
            reachable.insert(graph[nx]);
        }
        for (i, (node, _)) in self.nodes.iter().enumerate() {
            if !reachable.contains(&i) {
                warn!("Node '{}' is not reachable from '{}'", node.id(), self.start);
            }
        }

        let description = GraphDescription {
            start: self.start.clone(),
            nodes: self
                .nodes
                .iter()
                .map(|(n, kind)| NodeDescription {
                    id: n.id().to_string(),
                    kind: *kind,
                })
                .collect(),
            edges: described,
        };

        debug!(
            "Built graph with {} nodes, {} edges, {} joins",
            description.nodes.len(),
            description.edges.len(),
            joins.len()
        );

        Ok(Workflow::from_inner(WorkflowInner {
            start,
            nodes: self.nodes.into_iter().map(|(n, _)| n).collect(),
            routes,
            joins,
            description,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::passthrough;

    type Builder = GraphBuilder<u32, ()>;

    fn sum() -> Aggregator<u32> {
        Aggregator::new("sum", |acc: Option<u32>, next| acc.unwrap_or(0) + next)
    }

    #[test]
    fn test_build_and_describe() {
        let mut builder = Builder::new(passthrough("start"));
        builder
            .add_executor(passthrough("a"))
            .add_executor(passthrough("b"))
            .add_fan_out_edge("start", &["a", "b"])
            .add_aggregator(sum(), &["a", "b"]);
        let workflow = builder.build().unwrap();

        let description = workflow.describe();
        assert_eq!(description.start, "start");
        assert_eq!(description.nodes.len(), 4);
        assert_eq!(description.nodes[3].kind, NodeKind::Aggregator);
        assert_eq!(
            description
                .edges
                .iter()
                .filter(|e| e.kind == EdgeKind::FanIn)
                .count(),
            2
        );

        let mermaid = description.to_mermaid();
        assert!(mermaid.starts_with("flowchart TD"));
        assert!(mermaid.contains("n0 ==> n1;"));
        assert!(mermaid.contains("n1 -.-> n3;"));
        assert!(mermaid.contains("n3{{\"sum\"}};"));
    }

    #[test]
    fn test_rejects_unknown_node() {
        let mut builder = Builder::new(passthrough("start"));
        builder.add_edge("start", "missing");
        let err = builder.build().unwrap_err();
        assert!(err.to_string().contains("unknown node 'missing'"));
    }

    #[test]
    fn test_rejects_duplicate_id() {
        let mut builder = Builder::new(passthrough("start"));
        builder.add_executor(passthrough("start"));
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_rejects_cycle() {
        let mut builder = Builder::new(passthrough("start"));
        builder
            .add_executor(passthrough("a"))
            .add_executor(passthrough("b"))
            .add_edge("start", "a")
            .add_edge("a", "b")
            .add_edge("b", "a");
        let err = builder.build().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_rejects_empty_edges() {
        let mut builder = Builder::new(passthrough("start"));
        builder.add_fan_out_edge("start", &[]);
        assert!(builder.build().is_err());

        let mut builder = Builder::new(passthrough("start"));
        builder.add_aggregator(sum(), &[]);
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_rejects_second_fan_in_into_same_target() {
        let mut builder = Builder::new(passthrough("start"));
        builder
            .add_executor(passthrough("a"))
            .add_fan_out_edge("start", &["a"])
            .add_aggregator(sum(), &["a"])
            .add_fan_in_edge(&["start"], "sum", sum().reducer());
        assert!(builder.build().is_err());
    }
}
