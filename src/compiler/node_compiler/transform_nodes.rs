//! Domain transforms: rewrite the branch position before the child samples
//! it, and fix up the returned distance where the transform is not rigid.

use anyhow::Result;

use crate::compiler::context::CodeAssemblyContext;

use super::{EmitNode, FieldOperation};

/// Lower bound for divisors taken from parameters.
const MIN_DIVISOR: &str = "0.0001";

#[derive(Debug)]
pub struct Translate;

impl FieldOperation for Translate {
    fn get_pre_code(&self, node: &EmitNode, ctx: &mut CodeAssemblyContext, _slot: usize) -> Result<()> {
        let offset = node.value("offset")?;
        let p = ctx.position();
        ctx.append_call(&format!("{p} = {p} - {offset};"));
        Ok(())
    }
}

/// Uniform scale. The child is sampled at `p / factor` and its distance is
/// scaled back by `factor`.
#[derive(Debug)]
pub struct Scale;

impl FieldOperation for Scale {
    fn get_pre_code(&self, node: &EmitNode, ctx: &mut CodeAssemblyContext, _slot: usize) -> Result<()> {
        let factor = node.value("factor")?;
        let p = ctx.position();
        ctx.append_call(&format!("{p} = {p} / max({factor}, {MIN_DIVISOR});"));
        Ok(())
    }

    fn get_post_code(&self, node: &EmitNode, ctx: &mut CodeAssemblyContext, _slot: usize) -> Result<()> {
        let factor = node.value("factor")?;
        let f = ctx.field();
        let line = format!(
            "{} = vec4f({f}.xyz, {f}.w * max({factor}, {MIN_DIVISOR}));",
            ctx.parent_field()
        );
        ctx.append_call(&line);
        Ok(())
    }
}

/// Infinite domain repetition with the given cell period.
#[derive(Debug)]
pub struct Repeat;

impl FieldOperation for Repeat {
    fn get_pre_code(&self, node: &EmitNode, ctx: &mut CodeAssemblyContext, _slot: usize) -> Result<()> {
        let period = node.value("period")?;
        let p = ctx.position();
        let cell = format!("max({period}, vec3f({MIN_DIVISOR}))");
        ctx.append_call(&format!("{p} = {p} - {cell} * round({p} / {cell});"));
        Ok(())
    }
}

const FIELD_TWIST: &str = r#"fn field_twist(p: vec3f, rate: f32) -> vec3f {
    let c = cos(rate * p.y);
    let s = sin(rate * p.y);
    return vec3f(c * p.x - s * p.z, p.y, s * p.x + c * p.z);
}"#;

/// Rotates the xz plane proportionally to height.
#[derive(Debug)]
pub struct Twist;

impl FieldOperation for Twist {
    fn add_definitions(&self, node: &EmitNode, ctx: &mut CodeAssemblyContext) -> Result<()> {
        ctx.add_global("field_twist", FIELD_TWIST);
        node.declare_values(ctx)
    }

    fn get_pre_code(&self, node: &EmitNode, ctx: &mut CodeAssemblyContext, _slot: usize) -> Result<()> {
        let rate = node.value("rate")?;
        let p = ctx.position();
        ctx.append_call(&format!("{p} = field_twist({p}, {rate});"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::node_compiler::test_utils::{assemble_graph, connect};
    use crate::dsl::{GraphDSL, Node};

    fn wrap(transform: &str) -> GraphDSL {
        let mut g = GraphDSL::with_root("g", "t");
        g.nodes.push(Node::new("s", "Sphere"));
        g.nodes.push(Node::new("t", transform));
        connect(&mut g, "s", "t", "field");
        g
    }

    fn call_lines(graph: &GraphDSL) -> Vec<String> {
        let code = assemble_graph(graph).unwrap();
        code.calls.lines().map(|l| l.trim().to_string()).collect()
    }

    #[test]
    fn scale_rescales_distance_on_the_way_up() {
        let lines = call_lines(&wrap("Scale"));
        assert!(lines[2].starts_with("p1a = p1a / max(field_params."));
        assert!(lines[4].starts_with("f0 = vec4f(f1a.xyz, f1a.w * max(field_params."));
    }

    #[test]
    fn repeat_folds_position_into_a_cell() {
        let lines = call_lines(&wrap("Repeat"));
        assert!(lines[2].contains("round(p1a / max(field_params."));
        assert_eq!(lines[4], "f0 = f1a;");
    }

    #[test]
    fn twist_shares_one_helper() {
        let mut g = wrap("Twist");
        g.nodes.push(Node::new("t2", "Twist"));
        g.outputs = GraphDSL::with_root("g", "t2").outputs;
        connect(&mut g, "t", "t2", "field");

        let code = assemble_graph(&g).unwrap();
        assert_eq!(code.globals.matches("fn field_twist(").count(), 1);
        assert!(code.calls.contains("p1a = field_twist(p1a, field_params."));
        assert!(code.calls.contains("p1a2a = field_twist(p1a2a, field_params."));
    }
}
