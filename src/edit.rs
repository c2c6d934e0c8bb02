//! Authoring-layer graph edits.
//!
//! The compiler only ever reads a `GraphDSL` snapshot; these edits model the
//! mutations an editor performs between ticks.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dsl::{self, Connection, Endpoint, FIELD_OUTPUT_KEY, GraphDSL, Node};
use crate::graph;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum GraphEdit {
    AddNode {
        node: Node,
    },
    /// Removes the node and every connection touching it.
    RemoveNode {
        #[serde(rename = "nodeId")]
        node_id: String,
    },
    /// Connects `from` into `to`, replacing whatever fed `to` before.
    Connect {
        from: Endpoint,
        to: Endpoint,
    },
    Disconnect {
        to: Endpoint,
    },
    SetParam {
        #[serde(rename = "nodeId")]
        node_id: String,
        key: String,
        value: Value,
    },
    SetOutput {
        #[serde(rename = "nodeId")]
        node_id: String,
    },
}

pub fn apply_graph_edit(graph: &mut GraphDSL, edit: GraphEdit) -> Result<()> {
    match edit {
        GraphEdit::AddNode { node } => {
            if graph.nodes.iter().any(|n| n.id == node.id) {
                bail!("node already exists: {}", node.id);
            }
            graph.nodes.push(node);
        }
        GraphEdit::RemoveNode { node_id } => {
            let before = graph.nodes.len();
            graph.nodes.retain(|n| n.id != node_id);
            if graph.nodes.len() == before {
                bail!("node not found: {node_id}");
            }
            graph
                .connections
                .retain(|c| c.from.node_id != node_id && c.to.node_id != node_id);
        }
        GraphEdit::Connect { from, to } => {
            dsl::find_node(graph, &from.node_id)?;
            dsl::find_node(graph, &to.node_id)?;
            // The edge being replaced enters `to`, so no path out of `to` uses it.
            if graph::would_create_cycle(graph, &from.node_id, &to.node_id) {
                bail!(
                    "connecting {} -> {} would create a cycle",
                    from.node_id,
                    to.node_id
                );
            }
            graph.connections.retain(|c| c.to != to);
            graph.connections.push(Connection::between(from, to));
        }
        GraphEdit::Disconnect { to } => {
            graph.connections.retain(|c| c.to != to);
        }
        GraphEdit::SetParam {
            node_id,
            key,
            value,
        } => {
            let node = dsl::find_node_mut(graph, &node_id)?;
            node.params.insert(key, value);
        }
        GraphEdit::SetOutput { node_id } => {
            dsl::find_node(graph, &node_id)?;
            graph
                .outputs
                .get_or_insert_with(Default::default)
                .insert(FIELD_OUTPUT_KEY.to_string(), node_id);
        }
    }
    Ok(())
}

/// Applies edits in order, stopping at the first failure.
///
/// Edits before the failing one stay applied.
pub fn apply_graph_edits(
    graph: &mut GraphDSL,
    edits: impl IntoIterator<Item = GraphEdit>,
) -> Result<()> {
    for (i, edit) in edits.into_iter().enumerate() {
        apply_graph_edit(graph, edit).map_err(|e| e.context(format!("edit #{i} failed")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph() -> GraphDSL {
        let mut g = GraphDSL::with_root("edit", "t");
        g.nodes.push(Node::new("s", "Sphere"));
        g.nodes.push(Node::new("t", "Translate"));
        g.connections.push(Connection::between(
            Endpoint::new("s", "field"),
            Endpoint::new("t", "field"),
        ));
        g
    }

    #[test]
    fn connect_replaces_existing_input() {
        let mut g = graph();
        apply_graph_edits(
            &mut g,
            [
                GraphEdit::AddNode {
                    node: Node::new("b", "Box"),
                },
                GraphEdit::Connect {
                    from: Endpoint::new("b", "field"),
                    to: Endpoint::new("t", "field"),
                },
            ],
        )
        .unwrap();
        assert_eq!(g.connections.len(), 1);
        assert_eq!(g.connections[0].from.node_id, "b");
    }

    #[test]
    fn connect_rejects_cycles() {
        let mut g = graph();
        let err = apply_graph_edit(
            &mut g,
            GraphEdit::Connect {
                from: Endpoint::new("t", "field"),
                to: Endpoint::new("s", "radius"),
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("cycle"));
        assert_eq!(g.connections.len(), 1);
    }

    #[test]
    fn rewiring_a_port_is_checked_against_the_edges_that_remain() {
        let mut g = graph();
        apply_graph_edits(
            &mut g,
            [
                GraphEdit::AddNode {
                    node: Node::new("r", "Twist"),
                },
                GraphEdit::Connect {
                    from: Endpoint::new("t", "field"),
                    to: Endpoint::new("r", "field"),
                },
            ],
        )
        .unwrap();

        // Replacing s -> t.field still leaves t -> r, so r -> t closes a cycle.
        let err = apply_graph_edit(
            &mut g,
            GraphEdit::Connect {
                from: Endpoint::new("r", "field"),
                to: Endpoint::new("t", "field"),
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("cycle"));
        assert_eq!(g.connections.len(), 2);

        // Bypassing t is fine.
        apply_graph_edit(
            &mut g,
            GraphEdit::Connect {
                from: Endpoint::new("s", "field"),
                to: Endpoint::new("r", "field"),
            },
        )
        .unwrap();
        assert!(g.connections.iter().all(|c| c.from.node_id == "s"));
    }

    #[test]
    fn remove_node_drops_its_connections() {
        let mut g = graph();
        apply_graph_edit(
            &mut g,
            GraphEdit::RemoveNode {
                node_id: "s".to_string(),
            },
        )
        .unwrap();
        assert_eq!(g.nodes.len(), 1);
        assert!(g.connections.is_empty());
    }

    #[test]
    fn edits_deserialize_from_tagged_json() {
        let edit: GraphEdit = serde_json::from_value(json!({
            "op": "setParam",
            "nodeId": "s",
            "key": "radius",
            "value": 2.0
        }))
        .unwrap();
        let mut g = graph();
        apply_graph_edit(&mut g, edit).unwrap();
        assert_eq!(
            dsl::find_node(&g, "s").unwrap().params.get("radius"),
            Some(&json!(2.0))
        );

        let err = apply_graph_edits(
            &mut g,
            [GraphEdit::SetOutput {
                node_id: "missing".to_string(),
            }],
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("node not found: missing"));
    }
}
