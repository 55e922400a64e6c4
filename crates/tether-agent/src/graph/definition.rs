use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tether_core::error::{Result, TetherError};
use tether_core::state::END_NODE;

use super::decision::COMPLETE;
use super::edge::{Edge, EdgeCondition};
use super::node::Node;

struct NodeEntry {
    node: Arc<dyn Node>,
    retry_bound: Option<u32>,
}

/// Wiring of a verify-before-complete loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriticLoop {
    pub reasoning: String,
    pub critic: String,
    pub output: String,
}

/// A validated, immutable execution graph.
pub struct Graph {
    nodes: HashMap<String, NodeEntry>,
    edges: Vec<Edge>,
    entry: String,
    overflow: Option<String>,
    critic: Option<CriticLoop>,
}

impl Graph {
    pub fn builder(entry: impl Into<String>) -> GraphBuilder {
        GraphBuilder {
            entry: entry.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            retry_bounds: Vec::new(),
            overflow: None,
            critic: None,
        }
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// The node runs are forced into when a loop guard trips.
    pub fn overflow(&self) -> Option<&str> {
        self.overflow.as_deref()
    }

    pub fn critic_loop(&self) -> Option<&CriticLoop> {
        self.critic.as_ref()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn node(&self, node_id: &str) -> Option<&Arc<dyn Node>> {
        self.nodes.get(node_id).map(|e| &e.node)
    }

    /// Per-node retry bound override, if one was configured.
    pub fn retry_bound(&self, node_id: &str) -> Option<u32> {
        self.nodes.get(node_id).and_then(|e| e.retry_bound)
    }

    pub fn node_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Static successor of a node. `None` means `Next` ends the run.
    pub fn successor(&self, node_id: &str) -> Option<&str> {
        self.find_edge(node_id, |c| matches!(c, EdgeCondition::Next))
    }

    pub fn fallback(&self, node_id: &str) -> Option<&str> {
        self.find_edge(node_id, |c| matches!(c, EdgeCondition::Fallback))
    }

    pub fn transition(&self, node_id: &str, name: &str) -> Option<&str> {
        self.find_edge(node_id, |c| matches!(c, EdgeCondition::On { name: n } if n == name))
    }

    fn find_edge(&self, node_id: &str, pred: impl Fn(&EdgeCondition) -> bool) -> Option<&str> {
        self.edges
            .iter()
            .find(|e| e.from == node_id && pred(&e.condition))
            .map(|e| e.to.as_str())
    }
}

/// Collects nodes and edges; [`GraphBuilder::build`] validates the wiring.
pub struct GraphBuilder {
    entry: String,
    nodes: Vec<(String, Arc<dyn Node>)>,
    edges: Vec<Edge>,
    retry_bounds: Vec<(String, u32)>,
    overflow: Option<String>,
    critic: Option<CriticLoop>,
}

impl GraphBuilder {
    /// Register a node under its id.
    pub fn node(mut self, id: impl Into<String>, node: impl Node) -> Self {
        self.nodes.push((id.into(), Arc::new(node)));
        self
    }

    /// Register a shared node under its id.
    pub fn shared_node(mut self, id: impl Into<String>, node: Arc<dyn Node>) -> Self {
        self.nodes.push((id.into(), node));
        self
    }

    pub fn edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Override the retry bound for one node.
    pub fn retry_bound(mut self, id: impl Into<String>, bound: u32) -> Self {
        self.retry_bounds.push((id.into(), bound));
        self
    }

    /// Designate the overflow/output node that loop guards escalate to.
    pub fn overflow(mut self, id: impl Into<String>) -> Self {
        self.overflow = Some(id.into());
        self
    }

    /// Route `reasoning`'s completion claims through `critic`. The critic's
    /// `Continue` goes back to `reasoning`; its `complete` goes to `output`.
    pub fn critic_loop(
        mut self,
        reasoning: impl Into<String>,
        critic: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        let critic_loop = CriticLoop {
            reasoning: reasoning.into(),
            critic: critic.into(),
            output: output.into(),
        };
        self.edges.push(Edge::on(
            critic_loop.reasoning.clone(),
            COMPLETE,
            critic_loop.critic.clone(),
        ));
        self.edges.push(Edge::on(
            critic_loop.critic.clone(),
            COMPLETE,
            critic_loop.output.clone(),
        ));
        self.critic = Some(critic_loop);
        self
    }

    pub fn build(self) -> Result<Graph> {
        let mut nodes: HashMap<String, NodeEntry> = HashMap::new();
        for (id, node) in self.nodes {
            if id == END_NODE {
                return Err(TetherError::Config(format!(
                    "'{}' is reserved for the terminal marker",
                    END_NODE
                )));
            }
            if nodes
                .insert(
                    id.clone(),
                    NodeEntry {
                        node,
                        retry_bound: None,
                    },
                )
                .is_some()
            {
                return Err(TetherError::Config(format!("Duplicate node id '{}'", id)));
            }
        }

        for (id, bound) in self.retry_bounds {
            match nodes.get_mut(&id) {
                Some(entry) => entry.retry_bound = Some(bound),
                None => return Err(TetherError::NodeNotFound(id)),
            }
        }

        if !nodes.contains_key(&self.entry) {
            return Err(TetherError::NodeNotFound(self.entry));
        }
        if let Some(ref overflow) = self.overflow {
            if !nodes.contains_key(overflow) {
                return Err(TetherError::NodeNotFound(overflow.clone()));
            }
        }
        if let Some(ref critic) = self.critic {
            for id in [&critic.reasoning, &critic.critic, &critic.output] {
                if !nodes.contains_key(id) {
                    return Err(TetherError::NodeNotFound(id.clone()));
                }
            }
        }

        let mut seen: HashSet<(String, EdgeKey)> = HashSet::new();
        for edge in &self.edges {
            if !nodes.contains_key(&edge.from) {
                return Err(TetherError::NodeNotFound(edge.from.clone()));
            }
            if edge.to != END_NODE && !nodes.contains_key(&edge.to) {
                return Err(TetherError::NodeNotFound(edge.to.clone()));
            }
            if !seen.insert((edge.from.clone(), EdgeKey::from(&edge.condition))) {
                return Err(TetherError::Config(format!(
                    "Node '{}' has more than one {:?} edge",
                    edge.from, edge.condition
                )));
            }
        }

        Ok(Graph {
            nodes,
            edges: self.edges,
            entry: self.entry,
            overflow: self.overflow,
            critic: self.critic,
        })
    }
}

#[derive(Hash, PartialEq, Eq)]
enum EdgeKey {
    Next,
    Fallback,
    On(String),
}

impl From<&EdgeCondition> for EdgeKey {
    fn from(c: &EdgeCondition) -> Self {
        match c {
            EdgeCondition::Next => EdgeKey::Next,
            EdgeCondition::Fallback => EdgeKey::Fallback,
            EdgeCondition::On { name } => EdgeKey::On(name.clone()),
        }
    }
}
