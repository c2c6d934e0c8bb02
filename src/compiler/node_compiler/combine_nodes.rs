//! Field combinators.
//!
//! `Combine` folds up to four branches with one boolean or smooth operator.
//! Each branch lands in its own accumulator (`f1a`, `f1b`, ...); the fold is
//! emitted once, in the post code of the last branch entered.

use anyhow::{Result, anyhow, bail};

use crate::compiler::context::CodeAssemblyContext;

use super::{EmitNode, FieldOperation, UnconnectedInput};

/// Field that is outside everywhere (identity for union).
pub const FIELD_EMPTY: &str = "FIELD_EMPTY";
/// Field that is inside everywhere (identity for intersection).
pub const FIELD_FULL: &str = "FIELD_FULL";

const FIELD_EMPTY_DECL: &str = "const FIELD_EMPTY = vec4f(1.0, 1.0, 1.0, 1.0e9);";
const FIELD_FULL_DECL: &str = "const FIELD_FULL = vec4f(1.0, 1.0, 1.0, -1.0e9);";

const FIELD_UNION: &str = r#"fn field_union(a: vec4f, b: vec4f) -> vec4f {
    return select(b, a, a.w < b.w);
}"#;

const FIELD_INTERSECTION: &str = r#"fn field_intersection(a: vec4f, b: vec4f) -> vec4f {
    return select(b, a, a.w > b.w);
}"#;

const FIELD_SUBTRACTION: &str = r#"fn field_subtraction(a: vec4f, b: vec4f) -> vec4f {
    return select(vec4f(a.xyz, -b.w), a, a.w > -b.w);
}"#;

const FIELD_SMOOTH_UNION: &str = r#"fn field_smooth_union(a: vec4f, b: vec4f, k: f32) -> vec4f {
    let h = clamp(0.5 + 0.5 * (b.w - a.w) / max(k, 0.0001), 0.0, 1.0);
    let d = mix(b.w, a.w, h) - k * h * (1.0 - h);
    return vec4f(mix(b.xyz, a.xyz, h), d);
}"#;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CombineOp {
    Union,
    Intersection,
    Subtraction,
    SmoothUnion,
}

impl CombineOp {
    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "union" => CombineOp::Union,
            "intersection" => CombineOp::Intersection,
            "subtraction" => CombineOp::Subtraction,
            "smooth_union" | "smoothUnion" => CombineOp::SmoothUnion,
            other => bail!("unknown combine op: {other}"),
        })
    }

    fn function(self) -> (&'static str, &'static str) {
        match self {
            CombineOp::Union => ("field_union", FIELD_UNION),
            CombineOp::Intersection => ("field_intersection", FIELD_INTERSECTION),
            CombineOp::Subtraction => ("field_subtraction", FIELD_SUBTRACTION),
            CombineOp::SmoothUnion => ("field_smooth_union", FIELD_SMOOTH_UNION),
        }
    }

    /// Field that leaves the other operand unchanged.
    fn identity(self) -> &'static str {
        match self {
            CombineOp::Intersection => FIELD_FULL,
            CombineOp::Union | CombineOp::Subtraction | CombineOp::SmoothUnion => FIELD_EMPTY,
        }
    }
}

fn op_of(node: &EmitNode) -> Result<CombineOp> {
    let op = node
        .param_str("op")
        .ok_or_else(|| anyhow!("Combine is missing its op"))?;
    CombineOp::parse(op)
}

#[derive(Debug)]
pub struct Combine;

impl FieldOperation for Combine {
    fn add_definitions(&self, node: &EmitNode, ctx: &mut CodeAssemblyContext) -> Result<()> {
        let op = op_of(node)?;
        let (name, text) = op.function();
        ctx.add_global(name, text);
        match op.identity() {
            FIELD_FULL => ctx.add_global(FIELD_FULL, FIELD_FULL_DECL),
            _ => ctx.add_global(FIELD_EMPTY, FIELD_EMPTY_DECL),
        };
        if op == CombineOp::SmoothUnion {
            node.declare_value(ctx, "smoothness")?;
        }
        Ok(())
    }

    fn get_post_code(&self, node: &EmitNode, ctx: &mut CodeAssemblyContext, slot: usize) -> Result<()> {
        if !node.is_last_active(slot) {
            return Ok(());
        }
        let op = op_of(node)?;
        let (name, _) = op.function();
        let smoothness = match op {
            CombineOp::SmoothUnion => Some(node.value("smoothness")?),
            _ => None,
        };

        let mut slots = node.active_field_slots().iter();
        let Some(first) = slots.next() else {
            return Ok(());
        };
        let mut acc = ctx.branch_field(*first);
        for s in slots {
            let rhs = ctx.branch_field(*s);
            acc = match smoothness {
                Some(k) => format!("{name}({acc}, {rhs}, {k})"),
                None => format!("{name}({acc}, {rhs})"),
            };
        }
        let line = format!("{} = {acc};", ctx.parent_field());
        ctx.append_call(&line);
        Ok(())
    }

    fn unconnected_input(&self, node: &EmitNode, slot: usize) -> UnconnectedInput {
        match slot {
            0 => UnconnectedInput::Required,
            // An unknown op fails in add_definitions; any identity works until then.
            1 => {
                let identity = op_of(node).map_or(FIELD_EMPTY, |op| op.identity());
                UnconnectedInput::Fragment(identity.to_string())
            }
            _ => UnconnectedInput::Skip,
        }
    }
}
