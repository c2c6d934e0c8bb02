use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::schema::{self, NodeScheme};

/// Key in `GraphDSL::outputs` naming the node whose field is compiled.
pub const FIELD_OUTPUT_KEY: &str = "field";

/// Graph description owned by the authoring layer.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GraphDSL {
    pub version: String,
    pub metadata: Metadata,
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
    pub outputs: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Metadata {
    pub name: String,
    pub created: Option<String>,
    pub modified: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,

    // Optional editor metadata used for ordering / UI.
    #[serde(default)]
    pub inputs: Vec<NodePort>,
    #[serde(default)]
    pub outputs: Vec<NodePort>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NodePort {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub port_type: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Connection {
    pub id: String,
    pub from: Endpoint,
    pub to: Endpoint,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    #[serde(rename = "nodeId")]
    pub node_id: String,
    #[serde(rename = "portId")]
    pub port_id: String,
}

impl Endpoint {
    pub fn new(node_id: impl Into<String>, port_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            port_id: port_id.into(),
        }
    }
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            params: HashMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: serde_json::Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }
}

impl Connection {
    /// Connection with an id derived from its endpoints.
    pub fn between(from: Endpoint, to: Endpoint) -> Self {
        Self {
            id: format!(
                "{}.{}->{}.{}",
                from.node_id, from.port_id, to.node_id, to.port_id
            ),
            from,
            to,
        }
    }
}

impl GraphDSL {
    /// Empty graph whose field output is `root`.
    pub fn with_root(name: &str, root: &str) -> Self {
        Self {
            version: "1.0".to_string(),
            metadata: Metadata {
                name: name.to_string(),
                created: None,
                modified: None,
            },
            nodes: Vec::new(),
            connections: Vec::new(),
            outputs: Some(HashMap::from([(
                FIELD_OUTPUT_KEY.to_string(),
                root.to_string(),
            )])),
        }
    }

    /// Id of the node whose field output is compiled.
    pub fn field_output(&self) -> Option<&str> {
        self.outputs
            .as_ref()
            .and_then(|o| o.get(FIELD_OUTPUT_KEY))
            .map(String::as_str)
    }
}

/// Read-only lookup tables over a graph snapshot, built once per pass.
pub struct GraphIndex<'a> {
    nodes_by_id: HashMap<&'a str, &'a Node>,
    incoming: HashMap<(&'a str, &'a str), &'a Connection>,
}

impl<'a> GraphIndex<'a> {
    pub fn new(graph: &'a GraphDSL) -> Self {
        let nodes_by_id = graph.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let mut incoming: HashMap<(&str, &str), &Connection> = HashMap::new();
        for c in &graph.connections {
            // First connection into a port wins.
            incoming
                .entry((c.to.node_id.as_str(), c.to.port_id.as_str()))
                .or_insert(c);
        }
        Self {
            nodes_by_id,
            incoming,
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&'a Node> {
        self.nodes_by_id.get(node_id).copied()
    }

    pub fn incoming(&self, to_node_id: &str, to_port_id: &str) -> Option<&'a Connection> {
        self.incoming.get(&(to_node_id, to_port_id)).copied()
    }
}

pub fn load_graph_from_path(path: impl AsRef<std::path::Path>) -> Result<GraphDSL> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read graph json at {}", path.display()))?;
    let mut graph: GraphDSL = serde_json::from_str(&text).context("failed to parse graph json")?;

    // Normalize params with defaults from the bundled node scheme.
    // This keeps older/hand-written graphs compatible when nodes omit parameters.
    normalize_graph_defaults(&mut graph)?;

    Ok(graph)
}

pub fn normalize_graph_defaults(graph: &mut GraphDSL) -> Result<()> {
    let scheme = schema::load_default_scheme()?;
    apply_node_default_params(graph, &scheme);
    Ok(())
}

pub fn apply_node_default_params(graph: &mut GraphDSL, scheme: &NodeScheme) {
    for node in &mut graph.nodes {
        let Some(node_scheme) = scheme.nodes.get(&node.node_type) else {
            continue;
        };
        if node_scheme.default_params.is_empty() {
            continue;
        }

        let mut merged = node_scheme.default_params.clone();
        for (k, v) in std::mem::take(&mut node.params) {
            merged.insert(k, v);
        }
        node.params = merged;
    }
}

pub fn find_node<'a>(graph: &'a GraphDSL, node_id: &str) -> Result<&'a Node> {
    graph
        .nodes
        .iter()
        .find(|n| n.id == node_id)
        .ok_or_else(|| anyhow!("node not found: {node_id}"))
}

pub fn find_node_mut<'a>(graph: &'a mut GraphDSL, node_id: &str) -> Result<&'a mut Node> {
    graph
        .nodes
        .iter_mut()
        .find(|n| n.id == node_id)
        .ok_or_else(|| anyhow!("node not found: {node_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_graph_json_with_defaults() {
        let text = r#"{
            "version": "1.0",
            "metadata": { "name": "g" },
            "nodes": [
                { "id": "s", "type": "Sphere" },
                { "id": "t", "type": "Translate", "params": { "offset": [1, 0, 0] } }
            ],
            "connections": [
                { "id": "c1", "from": { "nodeId": "s", "portId": "field" },
                  "to": { "nodeId": "t", "portId": "field" } }
            ],
            "outputs": { "field": "t" }
        }"#;
        let mut graph: GraphDSL = serde_json::from_str(text).unwrap();
        normalize_graph_defaults(&mut graph).unwrap();

        assert_eq!(graph.field_output(), Some("t"));
        let sphere = find_node(&graph, "s").unwrap();
        assert_eq!(sphere.params.get("radius"), Some(&json!(0.5)));
        let translate = find_node(&graph, "t").unwrap();
        assert_eq!(translate.params.get("offset"), Some(&json!([1, 0, 0])));
    }

    #[test]
    fn index_keeps_first_incoming_connection() {
        let mut graph = GraphDSL::with_root("g", "t");
        graph.connections.push(Connection::between(
            Endpoint::new("a", "field"),
            Endpoint::new("t", "field"),
        ));
        graph.connections.push(Connection::between(
            Endpoint::new("b", "field"),
            Endpoint::new("t", "field"),
        ));
        let index = GraphIndex::new(&graph);
        assert_eq!(index.incoming("t", "field").unwrap().from.node_id, "a");
        assert!(index.incoming("t", "offset").is_none());
    }
}
