//! Error taxonomy of a compile pass.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// A message surfaced to the host, optionally located in the generated
/// source and attributed to the node whose fragment produced that line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub node_id: Option<String>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
            node_id: None,
        }
    }

    pub fn for_node(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            ..Self::new(message)
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(line) = self.line {
            write!(f, "{line}")?;
            if let Some(col) = self.column {
                write!(f, ":{col}")?;
            }
            write!(f, ": ")?;
        }
        if let Some(node_id) = &self.node_id {
            write!(f, "[{node_id}] ")?;
        }
        write!(f, "{}", self.message)
    }
}

/// Graph-shape problems found while updating wrappers or traversing.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("graph has no field output (expected outputs.field)")]
    MissingRoot,
    #[error("field output references missing node: {0}")]
    RootNotFound(String),
    #[error("unconnected required input '{node_id}.{port_id}'")]
    UnconnectedInput { node_id: String, port_id: String },
    #[error("cycle detected: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },
    #[error("connection references missing node: {from} -> {to}")]
    MissingNode { from: String, to: String },
    #[error("'{node_id}.{port_id}' expects {expected}, got {actual} from node '{from}'")]
    PortKindMismatch {
        node_id: String,
        port_id: String,
        expected: &'static str,
        actual: &'static str,
        from: String,
    },
    #[error("graph is deeper than {limit} nodes")]
    TooDeep { limit: usize },
}

impl TopologyError {
    /// Node the error is best attributed to, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            TopologyError::MissingRoot | TopologyError::TooDeep { .. } => None,
            TopologyError::RootNotFound(id) => Some(id),
            TopologyError::UnconnectedInput { node_id, .. } => Some(node_id),
            TopologyError::Cycle { path } => path.first().map(String::as_str),
            TopologyError::MissingNode { to, .. } => Some(to),
            TopologyError::PortKindMismatch { node_id, .. } => Some(node_id),
        }
    }
}

#[derive(Clone, Debug, Error)]
pub enum CompileError {
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),
    #[error("generation error in node '{node_id}': {message}")]
    Generation { node_id: String, message: String },
    #[error("shader backend rejected generated source ({} diagnostics)", .0.len())]
    Backend(Vec<Diagnostic>),
}

impl CompileError {
    pub fn generation(node_id: impl Into<String>, err: impl fmt::Display) -> Self {
        CompileError::Generation {
            node_id: node_id.into(),
            message: err.to_string(),
        }
    }

    pub fn is_topology(&self) -> bool {
        matches!(self, CompileError::Topology(_))
    }

    /// Flatten into host-facing diagnostics.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            CompileError::Topology(e) => vec![Diagnostic {
                node_id: e.node_id().map(str::to_string),
                ..Diagnostic::new(self.to_string())
            }],
            CompileError::Generation { node_id, .. } => {
                vec![Diagnostic::for_node(node_id.clone(), self.to_string())]
            }
            CompileError::Backend(diags) => diags.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_diagnostic_names_the_node() {
        let err = CompileError::from(TopologyError::UnconnectedInput {
            node_id: "scale".to_string(),
            port_id: "field".to_string(),
        });
        assert!(err.is_topology());
        let diags = err.diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].node_id.as_deref(), Some("scale"));
        assert!(diags[0].message.contains("unconnected required input 'scale.field'"));
    }

    #[test]
    fn cycle_message_lists_the_path() {
        let err = TopologyError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cycle detected: a -> b -> a");
    }

    #[test]
    fn diagnostic_display_includes_location() {
        let d = Diagnostic {
            message: "bad".to_string(),
            line: Some(12),
            column: Some(4),
            node_id: Some("n".to_string()),
        };
        assert_eq!(d.to_string(), "12:4: [n] bad");
    }
}
