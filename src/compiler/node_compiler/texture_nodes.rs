//! Nodes that sample bound GPU resources.

use anyhow::Result;

use crate::compiler::context::CodeAssemblyContext;
use crate::compiler::types::ResourceKind;

use super::{EmitNode, FieldOperation};

const TEXTURE: &str = "tex";
const SAMPLER: &str = "samp";

/// Displaces a field by a height texture sampled in the xz plane.
#[derive(Debug)]
pub struct TextureDisplace;

impl FieldOperation for TextureDisplace {
    fn declare_resources(&self, node: &EmitNode, ctx: &mut CodeAssemblyContext) -> Result<()> {
        ctx.declare_resource(node.prefix(), node.id(), TEXTURE, ResourceKind::Texture2D);
        ctx.declare_resource(node.prefix(), node.id(), SAMPLER, ResourceKind::Sampler);
        Ok(())
    }

    fn get_post_code(&self, node: &EmitNode, ctx: &mut CodeAssemblyContext, _slot: usize) -> Result<()> {
        let amount = node.value("amount")?;
        let scale = node.value("scale")?;
        let tex = ctx.declare_resource(node.prefix(), node.id(), TEXTURE, ResourceKind::Texture2D);
        let samp = ctx.declare_resource(node.prefix(), node.id(), SAMPLER, ResourceKind::Sampler);
        let p = ctx.position();
        let f = ctx.field();
        let line = format!(
            "{} = vec4f({f}.xyz, {f}.w + (textureSampleLevel({tex}, {samp}, {p}.xz * {scale}, 0.0).r - 0.5) * {amount});",
            ctx.parent_field()
        );
        ctx.append_call(&line);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::node_compiler::test_utils::{assemble_graph, connect};
    use crate::compiler::types::ResourceKind;
    use crate::compiler::utils::node_prefix;
    use crate::dsl::{GraphDSL, Node};

    #[test]
    fn declares_texture_and_sampler_once() {
        let mut g = GraphDSL::with_root("g", "d");
        g.nodes.push(Node::new("s", "Sphere"));
        g.nodes.push(Node::new("d", "TextureDisplace"));
        connect(&mut g, "s", "d", "field");

        let code = assemble_graph(&g).unwrap();
        let prefix = node_prefix("d");
        let kinds: Vec<(String, ResourceKind, u32)> = code
            .resources
            .iter()
            .map(|r| (r.name.clone(), r.kind, r.binding))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (format!("{prefix}_tex"), ResourceKind::Texture2D, 2),
                (format!("{prefix}_samp"), ResourceKind::Sampler, 3),
            ]
        );
        assert!(code.calls.contains(&format!(
            "textureSampleLevel({prefix}_tex, {prefix}_samp, p1a.xz * field_params."
        )));
    }
}
