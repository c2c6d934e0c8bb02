//! Value input nodes.
//!
//! These produce a value, not a field: their `value` param becomes a shader
//! parameter and the expression reading it replaces the bound constant of
//! whatever value port they feed.

use anyhow::{Result, bail};

use crate::compiler::context::CodeAssemblyContext;

use super::{EmitNode, FieldOperation};

fn not_a_field(node: &EmitNode) -> Result<bool> {
    bail!(
        "{} produces a value and cannot be used as a field",
        node.node_type()
    )
}

#[derive(Debug)]
pub struct FloatInput;

impl FieldOperation for FloatInput {
    fn try_build_custom_code(&self, node: &EmitNode, _ctx: &mut CodeAssemblyContext) -> Result<bool> {
        not_a_field(node)
    }
}

#[derive(Debug)]
pub struct Vector3Input;

impl FieldOperation for Vector3Input {
    fn try_build_custom_code(&self, node: &EmitNode, _ctx: &mut CodeAssemblyContext) -> Result<bool> {
        not_a_field(node)
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::node_compiler::test_utils::assemble_graph;
    use crate::dsl::{Connection, Endpoint, GraphDSL, Node};
    use serde_json::json;

    #[test]
    fn one_value_node_can_feed_several_ports() {
        let mut g = GraphDSL::with_root("g", "t");
        g.nodes.push(Node::new("v", "Vector3Input").with_param("value", json!([0, 1, 0])));
        g.nodes.push(Node::new("s", "Sphere"));
        g.nodes.push(Node::new("t", "Translate"));
        g.nodes.push(Node::new("r", "Repeat"));
        g.outputs = GraphDSL::with_root("g", "r").outputs;
        for (from, port, to, to_port) in [
            ("v", "value", "t", "offset"),
            ("v", "value", "r", "period"),
            ("s", "field", "t", "field"),
            ("t", "field", "r", "field"),
        ] {
            g.connections.push(Connection::between(
                Endpoint::new(from, port),
                Endpoint::new(to, to_port),
            ));
        }

        let code = assemble_graph(&g).unwrap();
        let owners: Vec<&str> = code.params.iter().map(|p| p.node_id.as_str()).collect();
        assert_eq!(owners, vec!["v", "s"]);
        let v = format!("field_params.{}", code.params[0].name);
        assert_eq!(code.calls.matches(v.as_str()).count(), 3);
    }
}
