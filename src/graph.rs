//! Conditional state graph for asynchronous execution flows
//!
//! Nodes are async functions over a state value; edges carry optional
//! predicates deciding the transition. The delegation pipeline is built on
//! this graph.

use std::collections::{HashMap, HashSet};

use futures::future::BoxFuture;
use tracing::info;

use crate::error::{Error, Result};

type NodeFn<S> = Box<dyn Fn(S) -> BoxFuture<'static, Result<S>> + Send + Sync>;
type EdgeCondition<S> = Box<dyn Fn(&S) -> bool + Send + Sync>;

/// A directed graph of async nodes with conditional transitions
pub struct StateGraph<S> {
    nodes: HashMap<String, NodeFn<S>>,
    /// Source -> ordered (target, condition) pairs; first matching wins
    edges: HashMap<String, Vec<(String, Option<EdgeCondition<S>>)>>,
    entrypoint: Option<String>,
    exit_nodes: HashSet<String>,
}

impl<S: Send + 'static> Default for StateGraph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Send + 'static> StateGraph<S> {
    pub fn new() -> Self {
        StateGraph {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            entrypoint: None,
            exit_nodes: HashSet::new(),
        }
    }

    /// Add a node processing the state
    pub fn add_node<F, Fut>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(S) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<S>> + Send + 'static,
    {
        self.nodes
            .insert(name.into(), Box::new(move |s| Box::pin(func(s))));
    }

    /// Add an unconditional edge
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.edges
            .entry(from.into())
            .or_default()
            .push((to.into(), None));
    }

    /// Add an edge taken only when the condition holds
    pub fn add_conditional_edge<C>(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        condition: C,
    ) where
        C: Fn(&S) -> bool + Send + Sync + 'static,
    {
        self.edges
            .entry(from.into())
            .or_default()
            .push((to.into(), Some(Box::new(condition))));
    }

    /// Set the starting node
    pub fn set_entrypoint(&mut self, name: impl Into<String>) {
        self.entrypoint = Some(name.into());
    }

    /// Mark a node name as terminal
    pub fn set_exit(&mut self, name: impl Into<String>) {
        self.exit_nodes.insert(name.into());
    }

    /// Run the graph from the entrypoint until an exit node is reached
    pub async fn run(&self, initial_state: S) -> Result<S> {
        let mut current = self
            .entrypoint
            .clone()
            .ok_or_else(|| Error::Execution("Entrypoint not set".to_string()))?;
        let mut state = initial_state;

        while !self.exit_nodes.contains(&current) {
            let node = self.nodes.get(&current).ok_or_else(|| {
                Error::Execution(format!("Unknown node in state graph: {current}"))
            })?;

            info!("Executing node: {}", current);
            state = node(state).await?;

            let outgoing = self.edges.get(&current).ok_or_else(|| {
                Error::Execution(format!("No outgoing edges from node {current}"))
            })?;

            let next = outgoing
                .iter()
                .find(|(_, condition)| condition.as_ref().is_none_or(|c| c(&state)))
                .map(|(target, _)| target.clone())
                .ok_or_else(|| {
                    Error::Execution(format!("No valid transition from {current}"))
                })?;
            current = next;
        }

        info!("Exiting at node: {}", current);
        // An exit name may itself carry a node; run it as the final step
        if let Some(node) = self.nodes.get(&current) {
            state = node(state).await?;
        }

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone)]
    struct Counter {
        value: i32,
    }

    #[tokio::test]
    async fn test_linear_run() {
        let mut graph: StateGraph<Counter> = StateGraph::new();
        graph.add_node("increment", |mut s: Counter| async move {
            s.value += 1;
            Ok(s)
        });
        graph.set_entrypoint("increment");
        graph.set_exit("end");
        graph.add_edge("increment", "end");

        let state = graph.run(Counter::default()).await.unwrap();
        assert_eq!(state.value, 1);
    }

    #[tokio::test]
    async fn test_conditional_loop() {
        let mut graph: StateGraph<Counter> = StateGraph::new();
        graph.add_node("increment", |mut s: Counter| async move {
            s.value += 1;
            Ok(s)
        });
        graph.add_node("check", |s: Counter| async move { Ok(s) });
        graph.set_entrypoint("increment");
        graph.set_exit("end");
        graph.add_edge("increment", "check");
        graph.add_conditional_edge("check", "increment", |s: &Counter| s.value < 3);
        graph.add_conditional_edge("check", "end", |s: &Counter| s.value >= 3);

        let state = graph.run(Counter::default()).await.unwrap();
        assert_eq!(state.value, 3);
    }

    #[tokio::test]
    async fn test_missing_entrypoint() {
        let graph: StateGraph<Counter> = StateGraph::new();
        let err = graph.run(Counter::default()).await.unwrap_err();
        assert!(err.to_string().contains("Entrypoint not set"));
    }

    #[tokio::test]
    async fn test_no_valid_transition() {
        let mut graph: StateGraph<Counter> = StateGraph::new();
        graph.add_node("start", |s: Counter| async move { Ok(s) });
        graph.set_entrypoint("start");
        graph.set_exit("end");
        graph.add_conditional_edge("start", "end", |_s: &Counter| false);

        let err = graph.run(Counter::default()).await.unwrap_err();
        assert!(err.to_string().contains("No valid transition from start"));
    }

    #[tokio::test]
    async fn test_node_error_propagates() {
        let mut graph: StateGraph<Counter> = StateGraph::new();
        graph.add_node("boom", |_s: Counter| async move {
            Err(Error::Execution("node exploded".to_string()))
        });
        graph.set_entrypoint("boom");
        graph.set_exit("end");
        graph.add_edge("boom", "end");

        let err = graph.run(Counter::default()).await.unwrap_err();
        assert!(err.to_string().contains("node exploded"));
    }
}
