//! Graph engine
//!
//! Nodes are single-step transforms `state → patch`; edges are either direct
//! or conditional on a routing function whose label is looked up in a data
//! map. The engine applies a node's patch only after the node has completed.

pub mod assembly;

pub use assembly::{build_router_graph, Backends};

use crate::error::OrchestrationError;
use crate::state::{SessionState, StatePatch, UnknownFieldPolicy};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What a node does when its backend call fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Continue with a visible error value in place of the result
    Degrade,
    /// Route to terminal instead of guessing a destination
    AbortRoute,
}

/// A single state-transform step
#[async_trait]
pub trait Node: Send + Sync {
    fn name(&self) -> &'static str;

    fn policy(&self) -> FailurePolicy;

    async fn run(&self, state: &SessionState) -> Result<StatePatch>;

    /// Patch used in place of `run`'s result when it fails or times out
    fn recover(&self, state: &SessionState, error: &OrchestrationError) -> StatePatch;
}

/// Routing function: reads the state, returns an edge label
pub type RouterFn = Arc<dyn Fn(&SessionState) -> &'static str + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Node(&'static str),
    End,
}

#[derive(Clone)]
enum Edge {
    Direct(Target),
    Conditional {
        router: RouterFn,
        map: HashMap<&'static str, Target>,
    },
}

impl Edge {
    fn targets(&self) -> Vec<&Target> {
        match self {
            Edge::Direct(t) => vec![t],
            Edge::Conditional { map, .. } => map.values().collect(),
        }
    }

    fn next(&self, from: &str, state: &SessionState) -> Target {
        match self {
            Edge::Direct(t) => t.clone(),
            Edge::Conditional { router, map } => {
                let label = router(state);
                match map.get(label) {
                    Some(t) => t.clone(),
                    None => {
                        warn!(from, label, "No edge for route label, terminating");
                        Target::End
                    }
                }
            }
        }
    }
}

#[derive(Default)]
pub struct GraphBuilder {
    nodes: HashMap<&'static str, Arc<dyn Node>>,
    edges: HashMap<&'static str, Edge>,
    entry: Option<Edge>,
    defects: Vec<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(mut self, node: Arc<dyn Node>) -> Self {
        let name = node.name();
        if self.nodes.insert(name, node).is_some() {
            self.defects.push(format!("duplicate node '{}'", name));
        }
        self
    }

    pub fn set_entry(mut self, target: Target) -> Self {
        self.entry = Some(Edge::Direct(target));
        self
    }

    pub fn set_conditional_entry(
        mut self,
        router: RouterFn,
        map: HashMap<&'static str, Target>,
    ) -> Self {
        self.entry = Some(Edge::Conditional { router, map });
        self
    }

    pub fn add_edge(self, from: &'static str, to: Target) -> Self {
        self.insert_edge(from, Edge::Direct(to))
    }

    pub fn add_conditional_edges(
        self,
        from: &'static str,
        router: RouterFn,
        map: HashMap<&'static str, Target>,
    ) -> Self {
        self.insert_edge(from, Edge::Conditional { router, map })
    }

    fn insert_edge(mut self, from: &'static str, edge: Edge) -> Self {
        if self.edges.insert(from, edge).is_some() {
            self.defects.push(format!("node '{}' has more than one outgoing edge", from));
        }
        self
    }

    /// Validate the wiring
    pub fn compile(self) -> Result<CompiledGraph> {
        let mut defects = self.defects;

        let entry = match self.entry {
            Some(entry) => entry,
            None => {
                defects.push("no entry point".to_string());
                Edge::Direct(Target::End)
            }
        };

        let check_target = |source: &str, target: &Target, defects: &mut Vec<String>| {
            if let Target::Node(name) = target {
                if !self.nodes.contains_key(name) {
                    defects.push(format!("edge from '{}' targets unknown node '{}'", source, name));
                }
            }
        };

        for target in entry.targets() {
            check_target("entry", target, &mut defects);
        }

        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) {
                defects.push(format!("edge from unknown node '{}'", from));
            }
            for target in edge.targets() {
                check_target(from, target, &mut defects);
            }
        }

        for name in self.nodes.keys() {
            if !self.edges.contains_key(name) {
                defects.push(format!("node '{}' has no outgoing edge", name));
            }
        }

        if !defects.is_empty() {
            defects.sort();
            return Err(OrchestrationError::InvalidGraph(defects.join("; ")));
        }

        Ok(CompiledGraph {
            nodes: self.nodes,
            edges: self.edges,
            entry,
        })
    }
}

/// Execution knobs for one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub unknown_fields: UnknownFieldPolicy,
    pub node_timeout: Duration,
    pub max_steps: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            unknown_fields: UnknownFieldPolicy::Ignore,
            node_timeout: Duration::from_secs(30),
            max_steps: 16,
        }
    }
}

/// Final state plus the nodes visited, in order
#[derive(Debug, Clone)]
pub struct GraphRun {
    pub state: SessionState,
    pub trace: Vec<&'static str>,
}

pub struct CompiledGraph {
    nodes: HashMap<&'static str, Arc<dyn Node>>,
    edges: HashMap<&'static str, Edge>,
    entry: Edge,
}

impl CompiledGraph {
    pub fn node_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.nodes.keys().copied().collect();
        names.sort();
        names
    }

    /// Run from the entry point until a terminal target is reached
    pub async fn run(&self, mut state: SessionState, options: &RunOptions) -> Result<GraphRun> {
        let mut trace = Vec::new();
        let mut next = self.entry.next("entry", &state);

        while let Target::Node(name) = next {
            if trace.len() >= options.max_steps {
                return Err(OrchestrationError::InvalidGraph(format!(
                    "exceeded {} steps (trace: {})",
                    options.max_steps,
                    trace.join(" → ")
                )));
            }

            let node = self.nodes.get(name).ok_or_else(|| {
                OrchestrationError::InvalidGraph(format!("unknown node '{}'", name))
            })?;

            debug!(thread_id = %state.thread_id, node = name, "Running node");

            let patch = match tokio::time::timeout(options.node_timeout, node.run(&state)).await {
                Ok(Ok(patch)) => patch,
                Ok(Err(error)) => {
                    warn!(node = name, policy = ?node.policy(), %error, "Node failed, recovering");
                    node.recover(&state, &error)
                }
                Err(_) => {
                    let error = OrchestrationError::Timeout(format!(
                        "node '{}' exceeded {:?}",
                        name, options.node_timeout
                    ));
                    warn!(node = name, policy = ?node.policy(), %error, "Node timed out, recovering");
                    node.recover(&state, &error)
                }
            };

            state.apply(patch, options.unknown_fields)?;
            trace.push(name);

            let edge = self.edges.get(name).ok_or_else(|| {
                OrchestrationError::InvalidGraph(format!("node '{}' has no outgoing edge", name))
            })?;
            next = edge.next(name, &state);
        }

        debug!(thread_id = %state.thread_id, trace = ?trace, "Graph reached terminal state");
        Ok(GraphRun { state, trace })
    }
}
