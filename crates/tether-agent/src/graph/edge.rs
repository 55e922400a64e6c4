use serde::{Deserialize, Serialize};

/// An edge connecting two nodes in the execution graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node id.
    pub from: String,
    /// Target node id.
    pub to: String,
    /// Which decision of the source node follows this edge.
    #[serde(default)]
    pub condition: EdgeCondition,
}

/// When an edge is followed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeCondition {
    /// The static successor, taken on `Decision::Next`.
    #[default]
    Next,
    /// Taken once the source node's kind exhausts its retry bound.
    Fallback,
    /// Taken on `Decision::Transition(name)`.
    On { name: String },
}

impl Edge {
    /// Create a default-successor edge.
    pub fn next(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: EdgeCondition::Next,
        }
    }

    /// Create the edge taken when retries are exhausted.
    pub fn fallback(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: EdgeCondition::Fallback,
        }
    }

    /// Create a named-transition edge.
    pub fn on(from: impl Into<String>, name: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: EdgeCondition::On { name: name.into() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_builders() {
        let e = Edge::next("a", "b");
        assert_eq!(e.from, "a");
        assert_eq!(e.to, "b");
        assert_eq!(e.condition, EdgeCondition::Next);

        let e = Edge::fallback("a", "c");
        assert_eq!(e.condition, EdgeCondition::Fallback);

        let e = Edge::on("a", "trigger_subgraph", "d");
        assert_eq!(
            e.condition,
            EdgeCondition::On {
                name: "trigger_subgraph".into()
            }
        );
    }

    #[test]
    fn test_condition_defaults_to_next() {
        let edge: Edge = serde_json::from_str(r#"{"from": "a", "to": "b"}"#).unwrap();
        assert_eq!(edge.condition, EdgeCondition::Next);
    }

    #[test]
    fn test_tagged_serialization() {
        let edge = Edge::on("reason", "complete", "critic");
        let json = serde_json::to_value(&edge).unwrap();
        assert_eq!(json["condition"]["type"], "on");
        assert_eq!(json["condition"]["name"], "complete");
    }
}
