// src/shader/compiler.rs
//! GLSL -> SPIR-V compilation through naga.
//!
//! Debug names are always emitted, reflection relies on them for block and member names.

use super::ShaderStage;
use crate::error::{Error, Result};
use naga::back::spv;
use naga::front::glsl;
use naga::valid::{Capabilities, ValidationFlags, Validator};

/// Every stage is compiled with this entry point; pipelines reference it by name.
pub const ENTRY_POINT: &str = "main";

fn naga_stage(stage: ShaderStage) -> Result<naga::ShaderStage> {
    match stage {
        ShaderStage::Vertex => Ok(naga::ShaderStage::Vertex),
        ShaderStage::Fragment => Ok(naga::ShaderStage::Fragment),
        ShaderStage::Compute => Ok(naga::ShaderStage::Compute),
        ShaderStage::Geometry | ShaderStage::All => Err(Error::ShaderCompile {
            stage: stage.to_string(),
            message: "stage is not supported by the wgpu backend".into(),
        }),
    }
}

/// Compile one `#type` section. `label` only shows up in log lines.
pub fn compile_glsl(stage: ShaderStage, source: &str, label: &str) -> Result<Vec<u32>> {
    let naga_stage = naga_stage(stage)?;
    let compile_error = |message: String| Error::ShaderCompile {
        stage: stage.to_string(),
        message,
    };

    let mut frontend = glsl::Frontend::default();
    let module = frontend
        .parse(&glsl::Options::from(naga_stage), source)
        .map_err(|err| compile_error(err.emit_to_string(source)))?;

    let info = Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|err| compile_error(err.emit_to_string(source)))?;

    let mut options = spv::Options::default();
    options.flags |= spv::WriterFlags::DEBUG;
    // wgpu consumes SPIR-V in its own coordinate convention.
    options.flags.remove(spv::WriterFlags::ADJUST_COORDINATE_SPACE);
    let pipeline = spv::PipelineOptions {
        shader_stage: naga_stage,
        entry_point: ENTRY_POINT.to_owned(),
    };
    let words = spv::write_vec(&module, &info, &options, Some(&pipeline))
        .map_err(|err| compile_error(err.to_string()))?;

    log::debug!("Compiled {stage} stage of '{label}' ({} words)", words.len());
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::reflect::reflect_stages;
    use crate::shader::spirv::{SpirvModule, MAGIC};

    const VERTEX: &str = r#"#version 450
layout(set = 0, binding = 0) uniform Camera {
    mat4 viewProj;
};
layout(location = 0) in vec3 a_Position;

void main() {
    gl_Position = viewProj * vec4(a_Position, 1.0);
}
"#;

    #[test]
    fn compiles_and_reflects_a_vertex_stage() {
        let words = compile_glsl(ShaderStage::Vertex, VERTEX, "test").unwrap();
        assert_eq!(words[0], MAGIC);
        let reflection = reflect_stages([(ShaderStage::Vertex, &words[..])]).unwrap();
        let ub = &reflection.sets[&0].uniform_buffers[&0];
        assert_eq!(ub.size, 64);
        assert_eq!(ub.stage, ShaderStage::Vertex);
    }

    #[test]
    fn entry_point_name_matches_pipeline_references() {
        let words = compile_glsl(ShaderStage::Vertex, VERTEX, "test").unwrap();
        let module = SpirvModule::parse(&words).unwrap();
        let names: Vec<&str> = module.entry_points().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![ENTRY_POINT]);
    }

    #[test]
    fn syntax_errors_are_compile_failures() {
        let err = compile_glsl(ShaderStage::Fragment, "#version 450\nvoid main( {", "broken").unwrap_err();
        assert_eq!(err.code(), "E_SHADER_COMPILE");
    }

    #[test]
    fn geometry_stage_is_rejected() {
        assert!(compile_glsl(ShaderStage::Geometry, VERTEX, "geo").is_err());
    }
}
