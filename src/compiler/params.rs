//! Parameter buffer layout and the per-tick parameter collector.
//!
//! Layout follows WGSL uniform address-space rules: every field is placed at
//! the next offset that satisfies its alignment, and the struct size is
//! rounded up to 16 bytes.

use serde::Serialize;

use crate::dsl::{GraphDSL, GraphIndex};
use crate::schema::NodeScheme;

use super::types::{ParamValue, ValueType};

/// A parameter field requested by a node during assembly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamDecl {
    pub name: String,
    pub node_id: String,
    pub param: String,
    pub ty: ValueType,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamField {
    pub name: String,
    pub node_id: String,
    pub param: String,
    pub ty: ValueType,
    pub offset: u32,
    pub size: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParameterLayout {
    fields: Vec<ParamField>,
    size: u32,
}

fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

impl ParameterLayout {
    /// Lays out `decls` in declaration order.
    pub fn build(decls: &[ParamDecl]) -> Self {
        let mut offset = 0_u32;
        let mut fields = Vec::with_capacity(decls.len());
        for d in decls {
            let start = align_to(offset, d.ty.align_bytes());
            let size = d.ty.size_bytes();
            fields.push(ParamField {
                name: d.name.clone(),
                node_id: d.node_id.clone(),
                param: d.param.clone(),
                ty: d.ty,
                offset: start,
                size,
            });
            offset = start + size;
        }
        // WGSL rejects empty structs, so an empty layout still reserves one vec4f.
        let size = align_to(offset.max(16), 16);
        Self { fields, size }
    }

    pub fn fields(&self) -> &[ParamField] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn size_bytes(&self) -> u32 {
        self.size
    }

    pub fn field(&self, name: &str) -> Option<(usize, &ParamField)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name)
    }

    /// Member list for the `FieldParams` struct.
    pub fn wgsl_struct_members(&self) -> String {
        if self.fields.is_empty() {
            return "    _unused: vec4f,".to_string();
        }
        self.fields
            .iter()
            .map(|f| format!("    {}: {},", f.name, f.ty.wgsl()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One row of the host-facing parameter description.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamEntry {
    pub name: String,
    pub node_id: String,
    pub param: String,
    #[serde(rename = "type")]
    pub ty: ValueType,
    pub offset: u32,
    pub size: u32,
    pub value: ParamValue,
}

/// Current values for a layout plus their packed bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterBuffer {
    layout: ParameterLayout,
    values: Vec<ParamValue>,
    bytes: Vec<u8>,
}

impl ParameterBuffer {
    pub fn new(layout: ParameterLayout) -> Self {
        let values = layout.fields.iter().map(|f| ParamValue::zero(f.ty)).collect();
        let bytes = vec![0_u8; layout.size as usize];
        Self {
            layout,
            values,
            bytes,
        }
    }

    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn value(&self, name: &str) -> Option<ParamValue> {
        let (i, _) = self.layout.field(name)?;
        self.values.get(i).copied()
    }

    pub fn entries(&self) -> Vec<ParamEntry> {
        self.layout
            .fields
            .iter()
            .zip(&self.values)
            .map(|(f, v)| ParamEntry {
                name: f.name.clone(),
                node_id: f.node_id.clone(),
                param: f.param.clone(),
                ty: f.ty,
                offset: f.offset,
                size: f.size,
                value: *v,
            })
            .collect()
    }

    /// Stores `value` for field `index`. Returns whether anything changed.
    fn set(&mut self, index: usize, value: ParamValue) -> bool {
        let Some(field) = self.layout.fields.get(index) else {
            return false;
        };
        if self.values[index] == value {
            return false;
        }
        let start = field.offset as usize;
        let end = start + field.size as usize;
        value.write_bytes(&mut self.bytes[start..end]);
        self.values[index] = value;
        true
    }
}

/// Refreshes every value in `buffer` from the graph. Returns the number of
/// fields whose value changed.
///
/// Fields whose node vanished keep their previous value; values that do not
/// parse as the field type are written as zero.
pub fn collect_parameters(
    graph: &GraphDSL,
    scheme: &NodeScheme,
    buffer: &mut ParameterBuffer,
) -> usize {
    let index = GraphIndex::new(graph);
    let mut changed = 0;
    for i in 0..buffer.layout.fields.len() {
        let field = &buffer.layout.fields[i];
        let Some(node) = index.node(&field.node_id) else {
            continue;
        };
        let raw = match scheme.node_type(&node.node_type) {
            Some(node_scheme) => node_scheme.param(node, &field.param),
            None => node.params.get(&field.param),
        };
        let ty = field.ty;
        let value = raw
            .and_then(|v| ParamValue::from_json(ty, v))
            .unwrap_or_else(|| ParamValue::zero(ty));
        if buffer.set(i, value) {
            changed += 1;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::Node;
    use crate::schema::load_default_scheme;
    use serde_json::json;

    fn decl(name: &str, node_id: &str, param: &str, ty: ValueType) -> ParamDecl {
        ParamDecl {
            name: name.to_string(),
            node_id: node_id.to_string(),
            param: param.to_string(),
            ty,
        }
    }

    #[test]
    fn layout_follows_uniform_alignment() {
        let layout = ParameterLayout::build(&[
            decl("a", "n", "a", ValueType::F32),
            decl("b", "n", "b", ValueType::Vec3),
            decl("c", "n", "c", ValueType::F32),
            decl("d", "n", "d", ValueType::Vec2),
            decl("e", "n", "e", ValueType::Vec4),
        ]);
        let offsets: Vec<(u32, u32)> = layout.fields().iter().map(|f| (f.offset, f.size)).collect();
        assert_eq!(offsets, vec![(0, 4), (16, 12), (28, 4), (32, 8), (48, 16)]);
        assert_eq!(layout.size_bytes(), 64);
    }

    #[test]
    fn empty_layout_reserves_a_vec4() {
        let layout = ParameterLayout::build(&[]);
        assert_eq!(layout.size_bytes(), 16);
        assert_eq!(layout.wgsl_struct_members(), "    _unused: vec4f,");
    }

    #[test]
    fn collector_reads_params_and_defaults() {
        let scheme = load_default_scheme().unwrap();
        let layout = ParameterLayout::build(&[
            decl("s_radius", "s", "radius", ValueType::F32),
            decl("b_size", "b", "size", ValueType::Vec3),
        ]);
        let mut buffer = ParameterBuffer::new(layout);

        let mut graph = GraphDSL::with_root("g", "s");
        graph
            .nodes
            .push(Node::new("s", "Sphere").with_param("radius", json!(2.0)));
        graph.nodes.push(Node::new("b", "Box"));

        assert_eq!(collect_parameters(&graph, &scheme, &mut buffer), 2);
        assert_eq!(buffer.value("s_radius"), Some(ParamValue::F32(2.0)));
        assert_eq!(buffer.value("b_size"), Some(ParamValue::Vec3([1.0; 3])));
        let floats: Vec<f32> = buffer
            .bytes()
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect();
        assert_eq!(&floats[..8], &[2.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0]);

        assert_eq!(collect_parameters(&graph, &scheme, &mut buffer), 0);

        graph.nodes.retain(|n| n.id != "s");
        assert_eq!(collect_parameters(&graph, &scheme, &mut buffer), 0);
        assert_eq!(buffer.value("s_radius"), Some(ParamValue::F32(2.0)));
    }

    #[test]
    fn unparsable_values_become_zero() {
        let scheme = load_default_scheme().unwrap();
        let mut buffer =
            ParameterBuffer::new(ParameterLayout::build(&[decl("r", "s", "radius", ValueType::F32)]));
        let mut graph = GraphDSL::with_root("g", "s");
        graph
            .nodes
            .push(Node::new("s", "Sphere").with_param("radius", json!(3.0)));
        collect_parameters(&graph, &scheme, &mut buffer);
        graph.nodes[0].params.insert("radius".to_string(), json!("wide"));
        assert_eq!(collect_parameters(&graph, &scheme, &mut buffer), 1);
        assert_eq!(buffer.value("r"), Some(ParamValue::F32(0.0)));
    }
}
