// src/shader/spirv.rs
//! Minimal SPIR-V decoder for reflection.
//!
//! Only the instructions reflection needs are decoded: debug names, decorations, type
//! declarations, integer constants, global variables and entry points, plus the loads and
//! image instructions that tell how each texture and sampler is used. Everything else is
//! skipped by word count. Byte-swapped modules are accepted.

use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};

pub const MAGIC: u32 = 0x0723_0203;
const HEADER_WORDS: usize = 5;

pub mod op {
    pub const NAME: u16 = 5;
    pub const MEMBER_NAME: u16 = 6;
    pub const ENTRY_POINT: u16 = 15;
    pub const TYPE_VOID: u16 = 19;
    pub const TYPE_BOOL: u16 = 20;
    pub const TYPE_INT: u16 = 21;
    pub const TYPE_FLOAT: u16 = 22;
    pub const TYPE_VECTOR: u16 = 23;
    pub const TYPE_MATRIX: u16 = 24;
    pub const TYPE_IMAGE: u16 = 25;
    pub const TYPE_SAMPLER: u16 = 26;
    pub const TYPE_SAMPLED_IMAGE: u16 = 27;
    pub const TYPE_ARRAY: u16 = 28;
    pub const TYPE_RUNTIME_ARRAY: u16 = 29;
    pub const TYPE_STRUCT: u16 = 30;
    pub const TYPE_POINTER: u16 = 32;
    pub const CONSTANT: u16 = 43;
    pub const VARIABLE: u16 = 59;
    pub const LOAD: u16 = 61;
    pub const ACCESS_CHAIN: u16 = 65;
    pub const IN_BOUNDS_ACCESS_CHAIN: u16 = 66;
    pub const DECORATE: u16 = 71;
    pub const MEMBER_DECORATE: u16 = 72;
    pub const SAMPLED_IMAGE: u16 = 86;
    pub const IMAGE_SAMPLE_IMPLICIT_LOD: u16 = 87;
    pub const IMAGE_SAMPLE_EXPLICIT_LOD: u16 = 88;
    pub const IMAGE_SAMPLE_DREF_IMPLICIT_LOD: u16 = 89;
    pub const IMAGE_SAMPLE_DREF_EXPLICIT_LOD: u16 = 90;
    pub const IMAGE_SAMPLE_PROJ_IMPLICIT_LOD: u16 = 91;
    pub const IMAGE_SAMPLE_PROJ_EXPLICIT_LOD: u16 = 92;
    pub const IMAGE_SAMPLE_PROJ_DREF_IMPLICIT_LOD: u16 = 93;
    pub const IMAGE_SAMPLE_PROJ_DREF_EXPLICIT_LOD: u16 = 94;
    pub const IMAGE_GATHER: u16 = 96;
    pub const IMAGE_DREF_GATHER: u16 = 97;
    pub const IMAGE_QUERY_LOD: u16 = 105;
}

pub mod decoration {
    pub const BLOCK: u32 = 2;
    pub const BUFFER_BLOCK: u32 = 3;
    pub const ROW_MAJOR: u32 = 4;
    pub const ARRAY_STRIDE: u32 = 6;
    pub const MATRIX_STRIDE: u32 = 7;
    pub const NON_WRITABLE: u32 = 24;
    pub const NON_READABLE: u32 = 25;
    pub const BINDING: u32 = 33;
    pub const DESCRIPTOR_SET: u32 = 34;
    pub const OFFSET: u32 = 35;
}

pub mod storage_class {
    pub const UNIFORM_CONSTANT: u32 = 0;
    pub const UNIFORM: u32 = 2;
    pub const PUSH_CONSTANT: u32 = 9;
    pub const STORAGE_BUFFER: u32 = 12;
}

pub mod execution_model {
    pub const VERTEX: u32 = 0;
    pub const GEOMETRY: u32 = 3;
    pub const FRAGMENT: u32 = 4;
    pub const GL_COMPUTE: u32 = 5;
}

/// Image dimensionality operand of `OpTypeImage`.
pub mod dim {
    pub const D1: u32 = 0;
    pub const D2: u32 = 1;
    pub const D3: u32 = 2;
    pub const CUBE: u32 = 3;
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpirvType {
    Void,
    Bool,
    Int { width: u32, signed: bool },
    Float { width: u32 },
    Vector { component: u32, count: u32 },
    Matrix { column: u32, columns: u32 },
    Image {
        sampled_type: u32,
        dim: u32,
        depth: u32,
        arrayed: bool,
        multisampled: bool,
        /// 1 = sampled, 2 = storage.
        sampled: u32,
        format: u32,
    },
    Sampler,
    SampledImage { image: u32 },
    Array { element: u32, length: u32 },
    RuntimeArray { element: u32 },
    Struct { members: Vec<u32> },
    Pointer { storage_class: u32, pointee: u32 },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decorations {
    pub binding: Option<u32>,
    pub set: Option<u32>,
    pub offset: Option<u32>,
    pub array_stride: Option<u32>,
    pub matrix_stride: Option<u32>,
    pub block: bool,
    pub buffer_block: bool,
    pub row_major: bool,
    pub non_writable: bool,
    pub non_readable: bool,
}

impl Decorations {
    fn apply(&mut self, kind: u32, operands: &[u32]) {
        let first = operands.first().copied();
        match kind {
            decoration::BLOCK => self.block = true,
            decoration::BUFFER_BLOCK => self.buffer_block = true,
            decoration::ROW_MAJOR => self.row_major = true,
            decoration::NON_WRITABLE => self.non_writable = true,
            decoration::NON_READABLE => self.non_readable = true,
            decoration::ARRAY_STRIDE => self.array_stride = first,
            decoration::MATRIX_STRIDE => self.matrix_stride = first,
            decoration::BINDING => self.binding = first,
            decoration::DESCRIPTOR_SET => self.set = first,
            decoration::OFFSET => self.offset = first,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variable {
    pub id: u32,
    pub pointer_type: u32,
    pub storage_class: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub execution_model: u32,
    pub name: String,
}

static NO_DECORATIONS: Decorations = Decorations {
    binding: None,
    set: None,
    offset: None,
    array_stride: None,
    matrix_stride: None,
    block: false,
    buffer_block: false,
    row_major: false,
    non_writable: false,
    non_readable: false,
};

/// How the functions of a module use their textures and samplers.
///
/// Everything is keyed by the id of the `UniformConstant` variable the handle was loaded from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    /// Images (or combined image-samplers) read through a filtering sample instruction.
    pub filtered: HashSet<u32>,
    /// Images and samplers feeding a depth-compare instruction.
    pub compared: HashSet<u32>,
    /// Samplers combined with an image at least once.
    pub samplers: HashSet<u32>,
}

#[derive(Debug, Default)]
pub struct SpirvModule {
    names: HashMap<u32, String>,
    member_names: HashMap<(u32, u32), String>,
    decorations: HashMap<u32, Decorations>,
    member_decorations: HashMap<(u32, u32), Decorations>,
    types: HashMap<u32, SpirvType>,
    constants: HashMap<u32, u32>,
    variables: Vec<Variable>,
    entry_points: Vec<EntryPoint>,
    /// Result id -> pointer id for `OpLoad` and the base of access chains.
    sources: HashMap<u32, u32>,
    /// `OpSampledImage` result -> (image, sampler).
    combinations: HashMap<u32, (u32, u32)>,
    /// Sampled-image operand of every sample instruction, with whether it compares depth.
    samples: Vec<(u32, bool)>,
}

impl SpirvModule {
    /// Decode a module from little-endian bytes as written by the compiler.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        crate::ensure!(
            bytes.len() % 4 == 0,
            Error::Spirv(format!("{} bytes is not word aligned", bytes.len()))
        );
        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::parse(&words)
    }

    pub fn parse(words: &[u32]) -> Result<Self> {
        crate::ensure!(
            words.len() >= HEADER_WORDS,
            Error::Spirv(format!("module has only {} words", words.len()))
        );
        let swapped;
        let words = match words[0] {
            MAGIC => words,
            w if w.swap_bytes() == MAGIC => {
                swapped = words.iter().map(|w| w.swap_bytes()).collect::<Vec<_>>();
                &swapped[..]
            }
            other => return Err(Error::Spirv(format!("bad magic number {other:#010x}"))),
        };

        let mut module = SpirvModule::default();
        let mut cursor = HEADER_WORDS;
        while cursor < words.len() {
            let head = words[cursor];
            let count = (head >> 16) as usize;
            let opcode = (head & 0xFFFF) as u16;
            crate::ensure!(
                count != 0 && cursor + count <= words.len(),
                Error::Spirv(format!("truncated instruction (opcode {opcode}, {count} words) at word {cursor}"))
            );
            module.decode(opcode, &words[cursor + 1..cursor + count])?;
            cursor += count;
        }
        Ok(module)
    }

    fn decode(&mut self, opcode: u16, ops: &[u32]) -> Result<()> {
        let need = |n: usize| -> Result<()> {
            if ops.len() < n {
                Err(Error::Spirv(format!("opcode {opcode} needs {n} operands, has {}", ops.len())))
            } else {
                Ok(())
            }
        };
        match opcode {
            op::NAME => {
                need(1)?;
                self.names.insert(ops[0], decode_string(&ops[1..]));
            }
            op::MEMBER_NAME => {
                need(2)?;
                self.member_names.insert((ops[0], ops[1]), decode_string(&ops[2..]));
            }
            op::ENTRY_POINT => {
                need(2)?;
                self.entry_points.push(EntryPoint {
                    execution_model: ops[0],
                    name: decode_string(&ops[2..]),
                });
            }
            op::DECORATE => {
                need(2)?;
                self.decorations.entry(ops[0]).or_default().apply(ops[1], &ops[2..]);
            }
            op::MEMBER_DECORATE => {
                need(3)?;
                self.member_decorations
                    .entry((ops[0], ops[1]))
                    .or_default()
                    .apply(ops[2], &ops[3..]);
            }
            op::TYPE_VOID => {
                need(1)?;
                self.types.insert(ops[0], SpirvType::Void);
            }
            op::TYPE_BOOL => {
                need(1)?;
                self.types.insert(ops[0], SpirvType::Bool);
            }
            op::TYPE_INT => {
                need(3)?;
                self.types.insert(ops[0], SpirvType::Int { width: ops[1], signed: ops[2] != 0 });
            }
            op::TYPE_FLOAT => {
                need(2)?;
                self.types.insert(ops[0], SpirvType::Float { width: ops[1] });
            }
            op::TYPE_VECTOR => {
                need(3)?;
                self.types.insert(ops[0], SpirvType::Vector { component: ops[1], count: ops[2] });
            }
            op::TYPE_MATRIX => {
                need(3)?;
                self.types.insert(ops[0], SpirvType::Matrix { column: ops[1], columns: ops[2] });
            }
            op::TYPE_IMAGE => {
                need(8)?;
                self.types.insert(
                    ops[0],
                    SpirvType::Image {
                        sampled_type: ops[1],
                        dim: ops[2],
                        depth: ops[3],
                        arrayed: ops[4] != 0,
                        multisampled: ops[5] != 0,
                        sampled: ops[6],
                        format: ops[7],
                    },
                );
            }
            op::TYPE_SAMPLER => {
                need(1)?;
                self.types.insert(ops[0], SpirvType::Sampler);
            }
            op::TYPE_SAMPLED_IMAGE => {
                need(2)?;
                self.types.insert(ops[0], SpirvType::SampledImage { image: ops[1] });
            }
            op::TYPE_ARRAY => {
                need(3)?;
                self.types.insert(ops[0], SpirvType::Array { element: ops[1], length: ops[2] });
            }
            op::TYPE_RUNTIME_ARRAY => {
                need(2)?;
                self.types.insert(ops[0], SpirvType::RuntimeArray { element: ops[1] });
            }
            op::TYPE_STRUCT => {
                need(1)?;
                self.types.insert(ops[0], SpirvType::Struct { members: ops[1..].to_vec() });
            }
            op::TYPE_POINTER => {
                need(3)?;
                self.types.insert(
                    ops[0],
                    SpirvType::Pointer { storage_class: ops[1], pointee: ops[2] },
                );
            }
            op::CONSTANT => {
                // Only the low word matters for array lengths.
                need(3)?;
                self.constants.insert(ops[1], ops[2]);
            }
            op::VARIABLE => {
                need(3)?;
                self.variables.push(Variable {
                    id: ops[1],
                    pointer_type: ops[0],
                    storage_class: ops[2],
                });
            }
            op::LOAD | op::ACCESS_CHAIN | op::IN_BOUNDS_ACCESS_CHAIN => {
                need(3)?;
                self.sources.insert(ops[1], ops[2]);
            }
            op::SAMPLED_IMAGE => {
                need(4)?;
                self.combinations.insert(ops[1], (ops[2], ops[3]));
            }
            op::IMAGE_SAMPLE_IMPLICIT_LOD
            | op::IMAGE_SAMPLE_EXPLICIT_LOD
            | op::IMAGE_SAMPLE_PROJ_IMPLICIT_LOD
            | op::IMAGE_SAMPLE_PROJ_EXPLICIT_LOD
            | op::IMAGE_GATHER
            | op::IMAGE_QUERY_LOD => {
                need(3)?;
                self.samples.push((ops[2], false));
            }
            op::IMAGE_SAMPLE_DREF_IMPLICIT_LOD
            | op::IMAGE_SAMPLE_DREF_EXPLICIT_LOD
            | op::IMAGE_SAMPLE_PROJ_DREF_IMPLICIT_LOD
            | op::IMAGE_SAMPLE_PROJ_DREF_EXPLICIT_LOD
            | op::IMAGE_DREF_GATHER => {
                need(3)?;
                self.samples.push((ops[2], true));
            }
            _ => {}
        }
        Ok(())
    }

    // ====================== QUERIES ======================

    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(&id).map(String::as_str).filter(|n| !n.is_empty())
    }

    pub fn member_name(&self, struct_id: u32, index: u32) -> Option<&str> {
        self.member_names
            .get(&(struct_id, index))
            .map(String::as_str)
            .filter(|n| !n.is_empty())
    }

    pub fn decorations(&self, id: u32) -> &Decorations {
        self.decorations.get(&id).unwrap_or(&NO_DECORATIONS)
    }

    pub fn member_decorations(&self, struct_id: u32, index: u32) -> &Decorations {
        self.member_decorations
            .get(&(struct_id, index))
            .unwrap_or(&NO_DECORATIONS)
    }

    pub fn ty(&self, id: u32) -> Result<&SpirvType> {
        self.types
            .get(&id)
            .ok_or_else(|| Error::Spirv(format!("reference to undeclared type %{id}")))
    }

    pub fn constant(&self, id: u32) -> Result<u32> {
        self.constants
            .get(&id)
            .copied()
            .ok_or_else(|| Error::Spirv(format!("array length %{id} is not a constant")))
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn entry_points(&self) -> &[EntryPoint] {
        &self.entry_points
    }

    /// Follow loads and access chains back to the variable a handle came from.
    fn origin(&self, mut id: u32) -> u32 {
        // Chains are short; the bound only guards against malformed cycles.
        for _ in 0..16 {
            match self.sources.get(&id) {
                Some(&source) => id = source,
                None => break,
            }
        }
        id
    }

    pub fn resource_usage(&self) -> ResourceUsage {
        let mut usage = ResourceUsage::default();
        for &(_, sampler) in self.combinations.values() {
            usage.samplers.insert(self.origin(sampler));
        }
        for &(operand, compare) in &self.samples {
            let (image, sampler) = match self.combinations.get(&operand) {
                Some(&(image, sampler)) => (self.origin(image), Some(self.origin(sampler))),
                // Combined image-sampler loaded straight from its variable.
                None => (self.origin(operand), None),
            };
            if compare {
                usage.compared.insert(image);
                usage.compared.extend(sampler);
            } else {
                usage.filtered.insert(image);
            }
        }
        usage
    }

    /// The type a variable points to.
    pub fn pointee(&self, var: &Variable) -> Result<u32> {
        match self.ty(var.pointer_type)? {
            SpirvType::Pointer { pointee, .. } => Ok(*pointee),
            other => Err(Error::Spirv(format!(
                "variable %{} has non-pointer type {other:?}",
                var.id
            ))),
        }
    }

    /// Peel one array level: `(element type, element count)`. Non-arrays count as 1,
    /// runtime arrays as 1 as well.
    pub fn strip_array(&self, type_id: u32) -> Result<(u32, u32)> {
        match self.ty(type_id)? {
            SpirvType::Array { element, length } => Ok((*element, self.constant(*length)?.max(1))),
            SpirvType::RuntimeArray { element } => Ok((*element, 1)),
            _ => Ok((type_id, 1)),
        }
    }

    pub fn struct_members(&self, struct_id: u32) -> Result<&[u32]> {
        match self.ty(struct_id)? {
            SpirvType::Struct { members } => Ok(members),
            other => Err(Error::Spirv(format!("%{struct_id} is {other:?}, not a struct"))),
        }
    }

    /// Byte offset of a struct member. Falls back to tight packing when undecorated.
    pub fn member_offset(&self, struct_id: u32, index: u32) -> Result<u32> {
        if let Some(offset) = self.member_decorations(struct_id, index).offset {
            return Ok(offset);
        }
        if index == 0 {
            return Ok(0);
        }
        let prev = index - 1;
        Ok(self.member_offset(struct_id, prev)? + self.member_size(struct_id, prev)?)
    }

    pub fn member_size(&self, struct_id: u32, index: u32) -> Result<u32> {
        let members = self.struct_members(struct_id)?;
        let ty = *members.get(index as usize).ok_or_else(|| {
            Error::Spirv(format!("struct %{struct_id} has no member {index}"))
        })?;
        self.type_size(ty, Some(self.member_decorations(struct_id, index)))
    }

    /// Declared size of a struct: end of its last member. A trailing runtime array adds nothing.
    pub fn struct_size(&self, struct_id: u32) -> Result<u32> {
        let count = self.struct_members(struct_id)?.len() as u32;
        if count == 0 {
            return Ok(0);
        }
        let last = count - 1;
        Ok(self.member_offset(struct_id, last)? + self.member_size(struct_id, last)?)
    }

    pub fn type_size(&self, type_id: u32, member: Option<&Decorations>) -> Result<u32> {
        match self.ty(type_id)? {
            SpirvType::Bool => Ok(4),
            SpirvType::Int { width, .. } | SpirvType::Float { width } => Ok(width / 8),
            SpirvType::Vector { component, count } => Ok(self.type_size(*component, None)? * count),
            SpirvType::Matrix { column, columns } => {
                let rows = match self.ty(*column)? {
                    SpirvType::Vector { count, .. } => *count,
                    other => return Err(Error::Spirv(format!("matrix column is {other:?}"))),
                };
                let member = member.unwrap_or(&NO_DECORATIONS);
                match member.matrix_stride {
                    Some(stride) if member.row_major => Ok(stride * rows),
                    Some(stride) => Ok(stride * columns),
                    None => Ok(self.type_size(*column, None)? * columns),
                }
            }
            SpirvType::Array { element, length } => {
                let stride = match self.decorations(type_id).array_stride {
                    Some(stride) => stride,
                    None => self.type_size(*element, member)?,
                };
                Ok(stride * self.constant(*length)?)
            }
            SpirvType::RuntimeArray { .. } => Ok(0),
            SpirvType::Struct { .. } => self.struct_size(type_id),
            other => Err(Error::Spirv(format!("type %{type_id} ({other:?}) has no size"))),
        }
    }
}

/// Literal strings are UTF-8, NUL terminated, packed little-endian into words.
fn decode_string(words: &[u32]) -> String {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    'outer: for word in words {
        for byte in word.to_le_bytes() {
            if byte == 0 {
                break 'outer;
            }
            bytes.push(byte);
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}


#[cfg(test)]
mod tests {
    use super::builder::SpirvBuilder;
    use super::*;

    #[test]
    fn rejects_bad_magic() {
        let err = SpirvModule::parse(&[0xDEAD_BEEF, 0, 0, 1, 0]).unwrap_err();
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn rejects_truncated_instruction() {
        let mut words = SpirvBuilder::new().build();
        words.push((4 << 16) | op::TYPE_FLOAT as u32);
        words.push(1);
        assert!(SpirvModule::parse(&words).is_err());
    }

    #[test]
    fn decodes_names_and_struct_sizes() {
        let mut b = SpirvBuilder::new();
        let f32_ = b.float();
        let vec4 = b.vector(f32_, 4);
        let mat4 = b.matrix(vec4, 4);
        let v = b.buffer_block(
            storage_class::UNIFORM,
            "Camera",
            "u_Camera",
            &[("ViewProjection", mat4, 0), ("Position", vec4, 64)],
            0,
            0,
        );
        let module = SpirvModule::parse(&b.build()).unwrap();
        assert_eq!(module.name(v), Some("u_Camera"));
        let var = module.variables()[0];
        let st = module.pointee(&var).unwrap();
        assert_eq!(module.name(st), Some("Camera"));
        assert_eq!(module.member_name(st, 1), Some("Position"));
        assert_eq!(module.member_size(st, 0).unwrap(), 64);
        assert_eq!(module.struct_size(st).unwrap(), 80);
        assert_eq!(module.decorations(v).binding, Some(0));
    }

    #[test]
    fn accepts_byte_swapped_modules() {
        let mut b = SpirvBuilder::new();
        let f = b.float();
        b.name(f, "f");
        let words: Vec<u32> = b.build().iter().map(|w| w.swap_bytes()).collect();
        let module = SpirvModule::parse(&words).unwrap();
        assert_eq!(module.name(f), Some("f"));
    }

    #[test]
    fn array_size_from_constant() {
        let mut b = SpirvBuilder::new();
        let f = b.float();
        let u = b.int(false);
        let img = b.image(f, dim::D2, 1);
        let sampled = b.sampled_image(img);
        let four = b.constant(u, 4);
        let arr = b.array(sampled, four);
        let module = SpirvModule::parse(&b.build()).unwrap();
        assert_eq!(module.strip_array(arr).unwrap(), (sampled, 4));
        assert_eq!(module.strip_array(sampled).unwrap(), (sampled, 1));
    }

    #[test]
    fn usage_follows_loads_into_sample_instructions() {
        let mut b = SpirvBuilder::new();
        let f = b.float();
        let vec4 = b.vector(f, 4);
        let img = b.image(f, dim::D2, 1);
        let sampled = b.sampled_image(img);
        let sampler = b.sampler();
        let color = b.resource(img, "u_Color", 0, 0);
        let shadow = b.resource(img, "u_Shadow", 0, 1);
        let linear = b.resource(sampler, "u_Linear", 0, 2);
        let compare = b.resource(sampler, "u_Compare", 0, 3);
        let fetched = b.resource(img, "u_Fetched", 0, 4);
        let idle = b.resource(sampler, "u_Idle", 0, 5);

        let color_handle = b.load(img, color);
        let linear_handle = b.load(sampler, linear);
        let pair = b.combine(sampled, color_handle, linear_handle);
        b.sample(op::IMAGE_SAMPLE_IMPLICIT_LOD, vec4, pair);

        let shadow_handle = b.load(img, shadow);
        let compare_handle = b.load(sampler, compare);
        let pair = b.combine(sampled, shadow_handle, compare_handle);
        b.sample(op::IMAGE_SAMPLE_DREF_IMPLICIT_LOD, f, pair);

        b.load(img, fetched);

        let usage = SpirvModule::parse(&b.build()).unwrap().resource_usage();
        assert!(usage.filtered.contains(&color));
        assert!(!usage.filtered.contains(&fetched));
        assert!(usage.compared.contains(&shadow) && usage.compared.contains(&compare));
        assert!(!usage.compared.contains(&linear));
        assert!(usage.samplers.contains(&linear) && usage.samplers.contains(&compare));
        assert!(!usage.samplers.contains(&idle));
    }
}
