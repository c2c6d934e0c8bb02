use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;

use crate::compiler::types::ValueType;
use crate::dsl::Node;

const DEFAULT_NODE_SCHEME_JSON: &str = include_str!("../assets/node-scheme.json");

/// Per-type description of the operators the compiler understands.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeScheme {
    #[allow(dead_code)]
    pub version: String,
    pub nodes: HashMap<String, NodeTypeScheme>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTypeScheme {
    #[serde(default)]
    pub category: Option<String>,
    pub output: PortKind,
    /// Ordered input slots. Slot indices passed to node compilers index this list.
    #[serde(default)]
    pub inputs: Vec<PortScheme>,
    /// Params whose value is baked into emitted code (changing them is a code change).
    #[serde(default)]
    pub code_params: Vec<String>,
    #[serde(default)]
    pub default_params: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortScheme {
    pub id: String,
    pub kind: PortKind,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Field,
    F32,
    I32,
    Vec2,
    Vec3,
    Vec4,
}

impl PortKind {
    /// Value type carried by a value port; `None` for field ports.
    pub fn value_type(self) -> Option<ValueType> {
        match self {
            PortKind::Field => None,
            PortKind::F32 => Some(ValueType::F32),
            PortKind::I32 => Some(ValueType::I32),
            PortKind::Vec2 => Some(ValueType::Vec2),
            PortKind::Vec3 => Some(ValueType::Vec3),
            PortKind::Vec4 => Some(ValueType::Vec4),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PortKind::Field => "field",
            PortKind::F32 => "f32",
            PortKind::I32 => "i32",
            PortKind::Vec2 => "vec2",
            PortKind::Vec3 => "vec3",
            PortKind::Vec4 => "vec4",
        }
    }
}

impl NodeScheme {
    pub fn node_type(&self, node_type: &str) -> Option<&NodeTypeScheme> {
        self.nodes.get(node_type)
    }
}

impl NodeTypeScheme {
    pub fn port(&self, port_id: &str) -> Option<(usize, &PortScheme)> {
        self.inputs.iter().enumerate().find(|(_, p)| p.id == port_id)
    }

    /// Effective param value: the node's own value, else the scheme default.
    pub fn param<'a>(&'a self, node: &'a Node, key: &str) -> Option<&'a Value> {
        node.params.get(key).or_else(|| self.default_params.get(key))
    }
}

pub fn load_default_scheme() -> Result<NodeScheme> {
    parse_node_scheme(DEFAULT_NODE_SCHEME_JSON).context("failed to parse bundled node scheme")
}

pub fn parse_node_scheme(text: &str) -> Result<NodeScheme> {
    let scheme: NodeScheme = serde_json::from_str(text).context("invalid node scheme json")?;

    for (node_type, def) in &scheme.nodes {
        let mut seen: HashSet<&str> = HashSet::new();
        for port in &def.inputs {
            if !seen.insert(port.id.as_str()) {
                bail!("node scheme {node_type}: duplicate input port '{}'", port.id);
            }
            if port.required && port.kind != PortKind::Field {
                bail!(
                    "node scheme {node_type}: only field ports can be required, '{}' is {}",
                    port.id,
                    port.kind.label()
                );
            }
        }
        for key in &def.code_params {
            if seen.contains(key.as_str()) {
                bail!("node scheme {node_type}: code param '{key}' shadows an input port");
            }
        }
        if def.output != PortKind::Field && def.port("value").is_none() {
            bail!("node scheme {node_type}: value nodes must declare a 'value' input");
        }
    }

    Ok(scheme)
}
