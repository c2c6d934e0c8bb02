//! Leaf field nodes: analytic SDF primitives and user-authored expressions.
//!
//! Leaves have no field inputs; they write their accumulator directly from
//! `try_build_custom_code`.

use anyhow::{Result, bail};

use crate::compiler::context::CodeAssemblyContext;

use super::{EmitNode, FieldOperation};

/// Albedo used by every primitive.
const LEAF_ALBEDO: &str = "1.0, 1.0, 1.0";

fn emit_distance(ctx: &mut CodeAssemblyContext, distance: &str) {
    let line = format!("{} = vec4f({LEAF_ALBEDO}, {distance});", ctx.field());
    ctx.append_call(&line);
}

#[derive(Debug)]
pub struct Sphere;

impl FieldOperation for Sphere {
    fn try_build_custom_code(&self, node: &EmitNode, ctx: &mut CodeAssemblyContext) -> Result<bool> {
        let radius = node.value("radius")?;
        let distance = format!("length({}) - {radius}", ctx.position());
        emit_distance(ctx, &distance);
        Ok(true)
    }
}

#[derive(Debug)]
pub struct BoxField;

const SDF_BOX: &str = r#"fn sdf_box(p: vec3f, half_size: vec3f) -> f32 {
    let q = abs(p) - half_size;
    return length(max(q, vec3f(0.0))) + min(max(q.x, max(q.y, q.z)), 0.0);
}"#;

impl FieldOperation for BoxField {
    fn add_definitions(&self, node: &EmitNode, ctx: &mut CodeAssemblyContext) -> Result<()> {
        ctx.add_global("sdf_box", SDF_BOX);
        node.declare_values(ctx)
    }

    fn try_build_custom_code(&self, node: &EmitNode, ctx: &mut CodeAssemblyContext) -> Result<bool> {
        let size = node.value("size")?;
        let distance = format!("sdf_box({}, {size} * 0.5)", ctx.position());
        emit_distance(ctx, &distance);
        Ok(true)
    }
}

#[derive(Debug)]
pub struct Torus;

const SDF_TORUS: &str = r#"fn sdf_torus(p: vec3f, major: f32, minor: f32) -> f32 {
    let q = vec2f(length(p.xz) - major, p.y);
    return length(q) - minor;
}"#;

impl FieldOperation for Torus {
    fn add_definitions(&self, node: &EmitNode, ctx: &mut CodeAssemblyContext) -> Result<()> {
        ctx.add_global("sdf_torus", SDF_TORUS);
        node.declare_values(ctx)
    }

    fn try_build_custom_code(&self, node: &EmitNode, ctx: &mut CodeAssemblyContext) -> Result<bool> {
        let major = node.value("majorRadius")?;
        let minor = node.value("minorRadius")?;
        let distance = format!("sdf_torus({}, {major}, {minor})", ctx.position());
        emit_distance(ctx, &distance);
        Ok(true)
    }
}

#[derive(Debug)]
pub struct Plane;

impl FieldOperation for Plane {
    fn try_build_custom_code(&self, node: &EmitNode, ctx: &mut CodeAssemblyContext) -> Result<bool> {
        let normal = node.value("normal")?;
        let offset = node.value("offset")?;
        // A zero normal degenerates to the plane's offset.
        let distance = format!(
            "dot({}, normalize({normal} + vec3f(0.0, 1e-6, 0.0))) + {offset}",
            ctx.position()
        );
        emit_distance(ctx, &distance);
        Ok(true)
    }
}

/// A distance expression in `p` supplied as the node's `code` param.
///
/// The expression becomes a per-node function, so editing it is a code
/// change while the graph shape stays the same.
#[derive(Debug)]
pub struct CustomField;

impl CustomField {
    fn function_name(node: &EmitNode) -> String {
        format!("{}_eval", node.prefix())
    }
}

impl FieldOperation for CustomField {
    fn add_definitions(&self, node: &EmitNode, ctx: &mut CodeAssemblyContext) -> Result<()> {
        let code = node.param_str("code").unwrap_or("").trim();
        if code.is_empty() {
            bail!("CustomField code is empty");
        }
        if code.contains(&[';', '{', '}'][..]) {
            bail!("CustomField code must be a single expression");
        }
        let def = format!(
            "fn {}(p: vec3f) -> f32 {{\n    return {code};\n}}",
            Self::function_name(node)
        );
        ctx.append_definition(&def);
        node.declare_values(ctx)
    }

    fn try_build_custom_code(&self, node: &EmitNode, ctx: &mut CodeAssemblyContext) -> Result<bool> {
        let distance = format!("{}({})", Self::function_name(node), ctx.position());
        emit_distance(ctx, &distance);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::error::CompileError;
    use crate::compiler::node_compiler::test_utils::assemble_graph;
    use crate::compiler::utils::node_prefix;
    use crate::dsl::{GraphDSL, Node};
    use serde_json::json;

    fn single(node: Node) -> GraphDSL {
        let mut g = GraphDSL::with_root("g", &node.id);
        g.nodes.push(node);
        g
    }

    #[test]
    fn sphere_writes_root_accumulator() {
        let code = assemble_graph(&single(Node::new("s", "Sphere"))).unwrap();
        let prefix = node_prefix("s");
        assert_eq!(
            code.calls.trim(),
            format!("f0 = vec4f(1.0, 1.0, 1.0, length(p0) - field_params.{prefix}_radius);")
        );
        assert!(code.globals.is_empty());
    }

    #[test]
    fn box_registers_shared_helper() {
        let code = assemble_graph(&single(Node::new("b", "Box"))).unwrap();
        assert!(code.globals.contains("fn sdf_box("));
        assert!(code.calls.contains("sdf_box(p0, field_params."));
        assert!(code.calls.contains("_size * 0.5)"));
    }

    #[test]
    fn torus_declares_both_radii() {
        let code = assemble_graph(&single(Node::new("t", "Torus"))).unwrap();
        let params: Vec<&str> = code.params.iter().map(|p| p.param.as_str()).collect();
        assert_eq!(params, vec!["majorRadius", "minorRadius"]);
    }

    #[test]
    fn custom_field_emits_per_node_definition() {
        let node = Node::new("c", "CustomField").with_param("code", json!("length(p.xy) - 0.5"));
        let code = assemble_graph(&single(node)).unwrap();
        let prefix = node_prefix("c");
        assert!(code
            .definitions
            .contains(&format!("fn {prefix}_eval(p: vec3f) -> f32 {{")));
        assert!(code.definitions.contains("return length(p.xy) - 0.5;"));
        assert!(code.definition_owners.iter().all(|o| o.as_deref() == Some("c")));
        assert!(code.calls.contains(&format!("{prefix}_eval(p0)")));
    }

    #[test]
    fn custom_field_rejects_statements() {
        let node = Node::new("c", "CustomField").with_param("code", json!("1.0; discard"));
        let err = assemble_graph(&single(node)).unwrap_err();
        match err {
            CompileError::Generation { node_id, message } => {
                assert_eq!(node_id, "c");
                assert!(message.contains("single expression"));
            }
            other => panic!("expected generation error, got {other:?}"),
        }
    }
}
