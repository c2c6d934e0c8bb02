//! Core type definitions for the field compiler.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use serde::Serialize;
use serde_json::Value;

use super::utils::fmt_f32;

/// WGSL value type of a shader-exposed parameter or value port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    F32,
    I32,
    Vec2,
    Vec3,
    Vec4,
}

impl ValueType {
    /// Returns the WGSL type name for this value type.
    pub fn wgsl(self) -> &'static str {
        match self {
            ValueType::F32 => "f32",
            ValueType::I32 => "i32",
            ValueType::Vec2 => "vec2f",
            ValueType::Vec3 => "vec3f",
            ValueType::Vec4 => "vec4f",
        }
    }

    /// Size in bytes inside a uniform buffer.
    pub fn size_bytes(self) -> u32 {
        match self {
            ValueType::F32 | ValueType::I32 => 4,
            ValueType::Vec2 => 8,
            ValueType::Vec3 => 12,
            ValueType::Vec4 => 16,
        }
    }

    /// Required alignment in the uniform address space.
    pub fn align_bytes(self) -> u32 {
        match self {
            ValueType::F32 | ValueType::I32 => 4,
            ValueType::Vec2 => 8,
            ValueType::Vec3 | ValueType::Vec4 => 16,
        }
    }
}

/// A concrete parameter value as it is packed into the parameter buffer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    F32(f32),
    I32(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

impl ParamValue {
    pub fn zero(ty: ValueType) -> Self {
        match ty {
            ValueType::F32 => ParamValue::F32(0.0),
            ValueType::I32 => ParamValue::I32(0),
            ValueType::Vec2 => ParamValue::Vec2([0.0; 2]),
            ValueType::Vec3 => ParamValue::Vec3([0.0; 3]),
            ValueType::Vec4 => ParamValue::Vec4([0.0; 4]),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            ParamValue::F32(_) => ValueType::F32,
            ParamValue::I32(_) => ValueType::I32,
            ParamValue::Vec2(_) => ValueType::Vec2,
            ParamValue::Vec3(_) => ValueType::Vec3,
            ParamValue::Vec4(_) => ValueType::Vec4,
        }
    }

    /// Parse a JSON param as `ty`.
    ///
    /// Vectors accept either `[x, y, ...]` or `{ "x": .., "y": .. }`; missing
    /// components default to 0. A bare number is splatted across a vector.
    pub fn from_json(ty: ValueType, v: &Value) -> Option<Self> {
        match ty {
            ValueType::F32 => parse_json_number_f32(v).map(ParamValue::F32),
            ValueType::I32 => parse_json_number_f32(v).map(|x| ParamValue::I32(x as i32)),
            ValueType::Vec2 => {
                let c = parse_components::<2>(v)?;
                Some(ParamValue::Vec2(c))
            }
            ValueType::Vec3 => {
                let c = parse_components::<3>(v)?;
                Some(ParamValue::Vec3(c))
            }
            ValueType::Vec4 => {
                let c = parse_components::<4>(v)?;
                Some(ParamValue::Vec4(c))
            }
        }
    }

    /// Write the value at the start of `dst` using native byte order.
    pub fn write_bytes(&self, dst: &mut [u8]) {
        let src: &[u8] = match self {
            ParamValue::F32(v) => bytemuck::bytes_of(v),
            ParamValue::I32(v) => bytemuck::bytes_of(v),
            ParamValue::Vec2(v) => bytemuck::cast_slice(&v[..]),
            ParamValue::Vec3(v) => bytemuck::cast_slice(&v[..]),
            ParamValue::Vec4(v) => bytemuck::cast_slice(&v[..]),
        };
        dst[..src.len()].copy_from_slice(src);
    }

    /// WGSL literal for the value, e.g. `vec3f(1, 0.5, 0)`.
    pub fn wgsl_literal(&self) -> String {
        let join = |xs: &[f32]| xs.iter().map(|x| fmt_f32(*x)).collect::<Vec<_>>().join(", ");
        match self {
            ParamValue::F32(v) => fmt_f32(*v),
            ParamValue::I32(v) => format!("{v}i"),
            ParamValue::Vec2(v) => format!("vec2f({})", join(v)),
            ParamValue::Vec3(v) => format!("vec3f({})", join(v)),
            ParamValue::Vec4(v) => format!("vec4f({})", join(v)),
        }
    }
}

pub(crate) fn parse_json_number_f32(v: &Value) -> Option<f32> {
    v.as_f64()
        .map(|x| x as f32)
        .or_else(|| v.as_i64().map(|x| x as f32))
        .or_else(|| v.as_u64().map(|x| x as f32))
}

fn parse_components<const N: usize>(v: &Value) -> Option<[f32; N]> {
    let mut out = [0.0_f32; N];
    if let Some(arr) = v.as_array() {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = arr.get(i).and_then(parse_json_number_f32).unwrap_or(0.0);
        }
        return Some(out);
    }
    if let Some(obj) = v.as_object() {
        for (key, slot) in ["x", "y", "z", "w"].iter().zip(out.iter_mut()) {
            *slot = obj.get(*key).and_then(parse_json_number_f32).unwrap_or(0.0);
        }
        return Some(out);
    }
    let x = parse_json_number_f32(v)?;
    Some([x; N])
}

bitflags! {
    /// Change kinds discovered by a wrapper update. Empty means unchanged.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ChangeKind: u8 {
        /// A shader-exposed value changed; only the parameter buffer is stale.
        const PARAMETERS = 0b001;
        /// Emitted fragment text changed while the graph shape stayed the same.
        const CODE = 0b010;
        /// Node added/removed/retyped or an input slot was rewired.
        const STRUCTURE = 0b100;
    }
}

impl ChangeKind {
    pub fn needs_rebuild(self) -> bool {
        self.intersects(ChangeKind::CODE | ChangeKind::STRUCTURE)
    }

    /// Most significant change kind, for logs.
    pub fn label(self) -> &'static str {
        if self.contains(ChangeKind::STRUCTURE) {
            "structure"
        } else if self.contains(ChangeKind::CODE) {
            "code"
        } else if self.contains(ChangeKind::PARAMETERS) {
            "parameters"
        } else {
            "unchanged"
        }
    }
}

/// Kind of GPU resource a node binds at draw time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Texture2D,
    Sampler,
}

/// A resource declared by a node, with its bind slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceBinding {
    pub name: String,
    pub node_id: String,
    pub kind: ResourceKind,
    pub group: u32,
    pub binding: u32,
}

impl ResourceBinding {
    /// Module-scope WGSL declaration for this binding.
    pub fn wgsl_decl(&self) -> String {
        let ty = match self.kind {
            ResourceKind::Texture2D => "texture_2d<f32>",
            ResourceKind::Sampler => "sampler",
        };
        format!(
            "@group({}) @binding({}) var {}: {};",
            self.group, self.binding, self.name, ty
        )
    }
}

/// Per-frame uniform owned by the host (binding 0 of the raymarch template).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FrameParams {
    pub target_size: [f32; 2],
    pub time: f32,
    pub _pad0: f32,
    pub camera_origin: [f32; 4],
    pub camera_target: [f32; 4],
}
