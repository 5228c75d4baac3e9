// src/shader/uniform.rs
//! Reflected uniform members and typed, validated access to their backing bytes.
//!
//! Every member of a uniform buffer or push-constant block is flattened into a
//! [`ShaderUniform`] during reflection. [`UniformStorage`] owns CPU copies of the bytes
//! and reads/writes them through [`UniformValue`], checked against the reflected type tag.

use crate::context::OptionContext;
use crate::error::{Error, Result};
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::reflect::ShaderReflection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderDataType {
    None,
    Bool,
    Int,
    Int2,
    Int3,
    Int4,
    Float,
    Float2,
    Float3,
    Float4,
    Mat3,
    Mat4,
    Struct,
}

impl ShaderDataType {
    pub fn name(self) -> &'static str {
        match self {
            ShaderDataType::None => "none",
            ShaderDataType::Bool => "bool",
            ShaderDataType::Int => "int",
            ShaderDataType::Int2 => "ivec2",
            ShaderDataType::Int3 => "ivec3",
            ShaderDataType::Int4 => "ivec4",
            ShaderDataType::Float => "float",
            ShaderDataType::Float2 => "vec2",
            ShaderDataType::Float3 => "vec3",
            ShaderDataType::Float4 => "vec4",
            ShaderDataType::Mat3 => "mat3",
            ShaderDataType::Mat4 => "mat4",
            ShaderDataType::Struct => "struct",
        }
    }
}

/// Where a uniform's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UniformOwner {
    /// Member of the push-constant block at this index of the reflected range list.
    PushConstant { range: usize },
    /// Member of the uniform buffer at (set, binding).
    Buffer { set: u32, binding: u32 },
}

/// One flattened member: `Block.member` for buffers, `var.member` or bare `member` for push constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaderUniform {
    pub name: String,
    /// Binding for buffer members, range index for push-constant members.
    pub location: u32,
    pub data_type: ShaderDataType,
    pub size: u32,
    /// Byte offset relative to the start of the owning block.
    pub offset: u32,
    pub owner: UniformOwner,
}

impl ShaderUniform {
    #[inline]
    pub fn is_push_constant(&self) -> bool {
        matches!(self.owner, UniformOwner::PushConstant { .. })
    }
}

/// Tagged value written to or read from a reflected uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat3(Mat3),
    Mat4(Mat4),
}

impl UniformValue {
    pub fn data_type(&self) -> ShaderDataType {
        match self {
            UniformValue::Bool(_) => ShaderDataType::Bool,
            UniformValue::Int(_) => ShaderDataType::Int,
            UniformValue::Float(_) => ShaderDataType::Float,
            UniformValue::Vec2(_) => ShaderDataType::Float2,
            UniformValue::Vec3(_) => ShaderDataType::Float3,
            UniformValue::Vec4(_) => ShaderDataType::Float4,
            UniformValue::Mat3(_) => ShaderDataType::Mat3,
            UniformValue::Mat4(_) => ShaderDataType::Mat4,
        }
    }

    /// Encode into `slot`. `mat3` uses padded vec4 columns when the slot is 48 bytes.
    fn encode(&self, slot: &mut [u8]) {
        let padded_mat3 = slot.len() >= 48;
        let mut put = |index: usize, bytes: [u8; 4]| {
            slot[index * 4..index * 4 + 4].copy_from_slice(&bytes);
        };
        match *self {
            UniformValue::Bool(v) => put(0, (v as u32).to_le_bytes()),
            UniformValue::Int(v) => put(0, v.to_le_bytes()),
            UniformValue::Float(v) => put(0, v.to_le_bytes()),
            UniformValue::Vec2(v) => v.to_array().iter().enumerate().for_each(|(i, f)| put(i, f.to_le_bytes())),
            UniformValue::Vec3(v) => v.to_array().iter().enumerate().for_each(|(i, f)| put(i, f.to_le_bytes())),
            UniformValue::Vec4(v) => v.to_array().iter().enumerate().for_each(|(i, f)| put(i, f.to_le_bytes())),
            UniformValue::Mat4(m) => m
                .to_cols_array()
                .iter()
                .enumerate()
                .for_each(|(i, f)| put(i, f.to_le_bytes())),
            UniformValue::Mat3(m) => {
                let stride = if padded_mat3 { 4 } else { 3 };
                for (c, col) in [m.x_axis, m.y_axis, m.z_axis].iter().enumerate() {
                    for (r, f) in col.to_array().iter().enumerate() {
                        put(c * stride + r, f.to_le_bytes());
                    }
                }
            }
        }
    }

    fn decode(ty: ShaderDataType, slot: &[u8]) -> Option<UniformValue> {
        let needed = match ty {
            ShaderDataType::Bool | ShaderDataType::Int | ShaderDataType::Float => 4,
            ShaderDataType::Float2 => 8,
            ShaderDataType::Float3 => 12,
            ShaderDataType::Float4 => 16,
            ShaderDataType::Mat3 => 36,
            ShaderDataType::Mat4 => 64,
            _ => return None,
        };
        if slot.len() < needed {
            return None;
        }
        let word = |index: usize| -> [u8; 4] {
            let mut out = [0u8; 4];
            out.copy_from_slice(&slot[index * 4..index * 4 + 4]);
            out
        };
        let float = |index: usize| f32::from_le_bytes(word(index));
        let value = match ty {
            ShaderDataType::Bool => UniformValue::Bool(u32::from_le_bytes(word(0)) != 0),
            ShaderDataType::Int => UniformValue::Int(i32::from_le_bytes(word(0))),
            ShaderDataType::Float => UniformValue::Float(float(0)),
            ShaderDataType::Float2 => UniformValue::Vec2(Vec2::new(float(0), float(1))),
            ShaderDataType::Float3 => UniformValue::Vec3(Vec3::new(float(0), float(1), float(2))),
            ShaderDataType::Float4 => {
                UniformValue::Vec4(Vec4::new(float(0), float(1), float(2), float(3)))
            }
            ShaderDataType::Mat4 => {
                let mut cols = [0.0f32; 16];
                for (i, f) in cols.iter_mut().enumerate() {
                    *f = float(i);
                }
                UniformValue::Mat4(Mat4::from_cols_array(&cols))
            }
            ShaderDataType::Mat3 => {
                let stride = if slot.len() >= 48 { 4 } else { 3 };
                let col = |c: usize| Vec3::new(float(c * stride), float(c * stride + 1), float(c * stride + 2));
                UniformValue::Mat3(Mat3::from_cols(col(0), col(1), col(2)))
            }
            _ => return None,
        };
        Some(value)
    }

    /// Bytes the encoding needs inside a slot of `slot_size` bytes.
    fn required_size(&self, slot_size: usize) -> usize {
        match self {
            UniformValue::Bool(_) | UniformValue::Int(_) | UniformValue::Float(_) => 4,
            UniformValue::Vec2(_) => 8,
            UniformValue::Vec3(_) => 12,
            UniformValue::Vec4(_) => 16,
            UniformValue::Mat3(_) => {
                if slot_size >= 48 {
                    48
                } else {
                    36
                }
            }
            UniformValue::Mat4(_) => 64,
        }
    }
}

macro_rules! impl_uniform_value_conversions {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for UniformValue {
                #[inline]
                fn from(value: $ty) -> Self {
                    UniformValue::$variant(value)
                }
            }

            impl TryFrom<UniformValue> for $ty {
                type Error = Error;

                fn try_from(value: UniformValue) -> Result<Self> {
                    match value {
                        UniformValue::$variant(v) => Ok(v),
                        other => Err(Error::UniformType {
                            name: String::new(),
                            expected: stringify!($variant).to_lowercase(),
                            found: other.data_type().name().to_owned(),
                        }),
                    }
                }
            }
        )*
    };
}

impl_uniform_value_conversions! {
    bool => Bool,
    i32 => Int,
    f32 => Float,
    Vec2 => Vec2,
    Vec3 => Vec3,
    Vec4 => Vec4,
    Mat3 => Mat3,
    Mat4 => Mat4,
}

/// CPU-side bytes for every reflected uniform block of one shader.
#[derive(Debug, Clone, Default)]
pub struct UniformStorage {
    uniforms: Vec<ShaderUniform>,
    push_constants: Vec<Vec<u8>>,
    buffers: BTreeMap<(u32, u32), Vec<u8>>,
    dirty: bool,
}

impl UniformStorage {
    pub fn new(reflection: &ShaderReflection) -> Self {
        let push_constants = reflection
            .push_constant_ranges
            .iter()
            .map(|range| vec![0u8; range.size as usize])
            .collect();
        let buffers = reflection
            .sets
            .values()
            .flat_map(|set| set.uniform_buffers.values())
            .map(|ub| ((ub.set, ub.binding), vec![0u8; ub.size as usize]))
            .collect();
        Self {
            uniforms: reflection.uniforms.clone(),
            push_constants,
            buffers,
            dirty: true,
        }
    }

    pub fn uniforms(&self) -> &[ShaderUniform] {
        &self.uniforms
    }

    pub fn find(&self, name: &str) -> Option<&ShaderUniform> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    fn slot(&self, uniform: &ShaderUniform) -> Result<&[u8]> {
        let block = match uniform.owner {
            UniformOwner::PushConstant { range } => self.push_constants.get(range),
            UniformOwner::Buffer { set, binding } => self.buffers.get(&(set, binding)),
        }
        .or_unknown(&uniform.name)?;
        let start = uniform.offset as usize;
        let end = start + uniform.size as usize;
        block.get(start..end).ok_or_else(|| {
            Error::Reflection(format!("uniform '{}' lies outside its block", uniform.name))
        })
    }

    /// Write a value, validated against the reflected type of `name`.
    pub fn set(&mut self, name: &str, value: impl Into<UniformValue>) -> Result<()> {
        let value = value.into();
        let uniform = self.find(name).or_unknown(name)?.clone();
        if uniform.data_type != value.data_type() {
            return Err(Error::UniformType {
                name: name.to_owned(),
                expected: uniform.data_type.name().to_owned(),
                found: value.data_type().name().to_owned(),
            });
        }
        let block = match uniform.owner {
            UniformOwner::PushConstant { range } => self.push_constants.get_mut(range),
            UniformOwner::Buffer { set, binding } => self.buffers.get_mut(&(set, binding)),
        }
        .or_unknown(name)?;
        let start = uniform.offset as usize;
        let size = uniform.size as usize;
        let slot = block
            .get_mut(start..start + size)
            .filter(|slot| slot.len() >= value.required_size(size))
            .ok_or_else(|| Error::Reflection(format!("uniform '{name}' slot is too small")))?;
        value.encode(slot);
        self.dirty = true;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<UniformValue> {
        let uniform = self.find(name).or_unknown(name)?;
        let slot = self.slot(uniform)?;
        UniformValue::decode(uniform.data_type, slot).ok_or_else(|| Error::UniformType {
            name: name.to_owned(),
            expected: uniform.data_type.name().to_owned(),
            found: "a scalar, vector or matrix".to_owned(),
        })
    }

    /// Typed read: `storage.get_as::<Vec4>("u_Material.AlbedoColor")`.
    pub fn get_as<T>(&self, name: &str) -> Result<T>
    where
        T: TryFrom<UniformValue, Error = Error>,
    {
        T::try_from(self.get(name)?).map_err(|err| match err {
            Error::UniformType { expected, found, .. } => Error::UniformType {
                name: name.to_owned(),
                expected,
                found,
            },
            other => other,
        })
    }

    pub fn push_constant_bytes(&self, range: usize) -> Option<&[u8]> {
        self.push_constants.get(range).map(Vec::as_slice)
    }

    pub fn buffer_bytes(&self, set: u32, binding: u32) -> Option<&[u8]> {
        self.buffers.get(&(set, binding)).map(Vec::as_slice)
    }

    pub fn buffers(&self) -> impl Iterator<Item = ((u32, u32), &[u8])> {
        self.buffers.iter().map(|(key, bytes)| (*key, bytes.as_slice()))
    }

    /// Returns whether anything changed since the last call and clears the flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }
}
