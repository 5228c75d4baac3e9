// src/renderer/frame_graph.rs
//! Pass scheduling for one frame.
//!
//! Passes always run in [`PassKind`] order. A pass is skipped when the config turns it off,
//! when one of its shaders is not available (failed to compile) or when a pass it reads from
//! was skipped. Skipped passes leave their attachments as the previous frame left them.

use crate::config::RendererConfig;
use crate::gpu::image::{mip_count, mip_size};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PassKind {
    DirShadowMap,
    PreDepth,
    LightCulling,
    Geometry,
    Bloom,
    SceneComposite,
    LateComposite,
    TexturePass,
}

impl PassKind {
    pub const ALL: [PassKind; 8] = [
        PassKind::DirShadowMap,
        PassKind::PreDepth,
        PassKind::LightCulling,
        PassKind::Geometry,
        PassKind::Bloom,
        PassKind::SceneComposite,
        PassKind::LateComposite,
        PassKind::TexturePass,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PassKind::DirShadowMap => "DirShadowMap",
            PassKind::PreDepth => "PreDepth",
            PassKind::LightCulling => "LightCulling",
            PassKind::Geometry => "Geometry",
            PassKind::Bloom => "Bloom",
            PassKind::SceneComposite => "SceneComposite",
            PassKind::LateComposite => "LateComposite",
            PassKind::TexturePass => "TexturePass",
        }
    }

    /// Shaders the pass cannot run without.
    pub fn required_shaders(self) -> &'static [&'static str] {
        match self {
            PassKind::DirShadowMap => &["DirShadowMap"],
            PassKind::PreDepth => &["PreDepth"],
            PassKind::LightCulling => &["LightCulling"],
            PassKind::Geometry => &["StaticMesh"],
            PassKind::Bloom => &["Bloom"],
            PassKind::SceneComposite => &["SceneComposite"],
            PassKind::LateComposite => &["PhysicsOutline"],
            PassKind::TexturePass => &["TexturePass"],
        }
    }

    /// Pass whose output this pass consumes.
    pub fn input(self) -> Option<PassKind> {
        match self {
            PassKind::LightCulling => Some(PassKind::PreDepth),
            _ => None,
        }
    }
}

impl std::fmt::Display for PassKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    ShaderUnavailable(&'static str),
    InputSkipped(PassKind),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FramePlan {
    pub passes: Vec<PassKind>,
    pub skipped: Vec<(PassKind, SkipReason)>,
}

impl FramePlan {
    pub fn runs(&self, pass: PassKind) -> bool {
        self.passes.contains(&pass)
    }
}

fn enabled(pass: PassKind, config: &RendererConfig, present_target: bool) -> bool {
    match pass {
        PassKind::DirShadowMap => config.shadows.enabled,
        PassKind::Bloom => config.bloom.enabled,
        PassKind::LateComposite => config.physics_outline,
        PassKind::TexturePass => config.swapchain_target && present_target,
        _ => true,
    }
}

/// Decide which passes run this frame. `available` reports whether a shader compiled.
pub fn plan_frame(config: &RendererConfig, present_target: bool, available: impl Fn(&str) -> bool) -> FramePlan {
    let mut plan = FramePlan::default();
    for pass in PassKind::ALL {
        let reason = if !enabled(pass, config, present_target) {
            Some(SkipReason::Disabled)
        } else if let Some(shader) = pass.required_shaders().iter().find(|s| !available(s)) {
            Some(SkipReason::ShaderUnavailable(*shader))
        } else {
            pass.input()
                .filter(|input| !plan.runs(*input))
                .map(SkipReason::InputSkipped)
        };
        match reason {
            Some(reason) => plan.skipped.push((pass, reason)),
            None => plan.passes.push(pass),
        }
    }
    plan
}

/// Work groups for light culling: one per screen tile.
pub fn light_culling_groups(width: u32, height: u32, tile_size: u32) -> (u32, u32) {
    (width.div_ceil(tile_size), height.div_ceil(tile_size))
}

// ====================== BLOOM ======================

/// Matches `Mode` in the bloom compute shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum BloomStage {
    Prefilter = 0,
    Downsample = 1,
    FirstUpsample = 2,
    Upsample = 3,
}

/// Which image a bloom dispatch reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BloomSource {
    SceneColor,
    /// One of the three ping-pong chain images.
    Chain(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomDispatch {
    pub stage: BloomStage,
    pub output: usize,
    pub output_mip: u32,
    pub input: BloomSource,
    pub input_mip: u32,
    /// Second input; the upsample stages blend it with `input`.
    pub bloom: BloomSource,
    pub bloom_mip: u32,
    pub groups: (u32, u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomPlan {
    /// Size of mip 0 of the chain images (half the viewport).
    pub size: (u32, u32),
    pub mip_levels: u32,
    pub dispatches: Vec<BloomDispatch>,
}

/// Prefilter, ping-pong downsample, then upsample back to mip 0 of chain image 2.
pub fn plan_bloom(width: u32, height: u32, work_group_size: u32) -> BloomPlan {
    let size = ((width / 2).max(1), (height / 2).max(1));
    let mip_levels = mip_count(size.0, size.1).saturating_sub(2).max(1);
    let groups = |mip: u32| {
        let (w, h) = mip_size(size.0, size.1, mip);
        (w.div_ceil(work_group_size), h.div_ceil(work_group_size))
    };

    let mut dispatches = vec![BloomDispatch {
        stage: BloomStage::Prefilter,
        output: 0,
        output_mip: 0,
        input: BloomSource::SceneColor,
        input_mip: 0,
        bloom: BloomSource::SceneColor,
        bloom_mip: 0,
        groups: groups(0),
    }];

    for mip in 1..mip_levels {
        dispatches.push(BloomDispatch {
            stage: BloomStage::Downsample,
            output: 1,
            output_mip: mip,
            input: BloomSource::Chain(0),
            input_mip: mip - 1,
            bloom: BloomSource::Chain(0),
            bloom_mip: mip - 1,
            groups: groups(mip),
        });
        dispatches.push(BloomDispatch {
            stage: BloomStage::Downsample,
            output: 0,
            output_mip: mip,
            input: BloomSource::Chain(1),
            input_mip: mip,
            bloom: BloomSource::Chain(1),
            bloom_mip: mip,
            groups: groups(mip),
        });
    }

    let last = mip_levels - 1;
    dispatches.push(BloomDispatch {
        stage: BloomStage::FirstUpsample,
        output: 2,
        output_mip: last,
        input: BloomSource::Chain(0),
        input_mip: last,
        bloom: BloomSource::Chain(0),
        bloom_mip: last,
        groups: groups(last),
    });

    for mip in (0..last).rev() {
        dispatches.push(BloomDispatch {
            stage: BloomStage::Upsample,
            output: 2,
            output_mip: mip,
            input: BloomSource::Chain(0),
            input_mip: mip,
            bloom: BloomSource::Chain(2),
            bloom_mip: mip + 1,
            groups: groups(mip),
        });
    }

    BloomPlan {
        size,
        mip_levels,
        dispatches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_runs_everything_but_the_texture_pass() {
        let plan = plan_frame(&RendererConfig::default(), false, |_| true);
        assert_eq!(
            plan.passes,
            vec![
                PassKind::DirShadowMap,
                PassKind::PreDepth,
                PassKind::LightCulling,
                PassKind::Geometry,
                PassKind::Bloom,
                PassKind::SceneComposite,
                PassKind::LateComposite,
            ]
        );
        assert_eq!(plan.skipped, vec![(PassKind::TexturePass, SkipReason::Disabled)]);
    }

    #[test]
    fn texture_pass_needs_config_and_target() {
        let mut config = RendererConfig::default();
        config.swapchain_target = true;
        assert!(!plan_frame(&config, false, |_| true).runs(PassKind::TexturePass));
        assert!(plan_frame(&config, true, |_| true).runs(PassKind::TexturePass));
    }

    #[test]
    fn missing_shader_skips_its_pass_and_dependents() {
        let plan = plan_frame(&RendererConfig::default(), false, |name| name != "PreDepth");
        assert!(!plan.runs(PassKind::PreDepth));
        assert!(!plan.runs(PassKind::LightCulling));
        assert!(plan.runs(PassKind::Geometry));
        assert!(plan
            .skipped
            .contains(&(PassKind::PreDepth, SkipReason::ShaderUnavailable("PreDepth"))));
        assert!(plan
            .skipped
            .contains(&(PassKind::LightCulling, SkipReason::InputSkipped(PassKind::PreDepth))));
    }

    #[test]
    fn passes_keep_their_order() {
        let mut config = RendererConfig::default();
        config.shadows.enabled = false;
        config.bloom.enabled = false;
        let plan = plan_frame(&config, false, |_| true);
        assert!(plan.passes.windows(2).all(|w| w[0] < w[1]));
        assert!(!plan.runs(PassKind::DirShadowMap));
    }

    #[test]
    fn culling_groups_round_up() {
        assert_eq!(light_culling_groups(1920, 1080, 16), (120, 68));
        assert_eq!(light_culling_groups(1, 1, 16), (1, 1));
    }

    #[test]
    fn bloom_chain_shape() {
        let plan = plan_bloom(1920, 1080, 4);
        assert_eq!(plan.size, (960, 540));
        assert_eq!(plan.mip_levels, 8);
        // prefilter + 2 per downsampled mip + first upsample + one per remaining mip
        assert_eq!(plan.dispatches.len(), 1 + 2 * 7 + 1 + 7);
        assert_eq!(plan.dispatches[0].stage, BloomStage::Prefilter);
        assert_eq!(plan.dispatches[0].groups, (240, 135));

        let first_up = plan.dispatches.iter().position(|d| d.stage == BloomStage::FirstUpsample).unwrap();
        assert!(plan.dispatches[..first_up].iter().skip(1).all(|d| d.stage == BloomStage::Downsample));
        assert_eq!(plan.dispatches[first_up].output_mip, 7);

        let last = plan.dispatches.last().unwrap();
        assert_eq!((last.stage, last.output, last.output_mip), (BloomStage::Upsample, 2, 0));
        assert_eq!(last.bloom, BloomSource::Chain(2));
        assert_eq!(last.bloom_mip, 1);
    }

    #[test]
    fn no_dispatch_samples_the_mip_it_writes() {
        for (w, h) in [(1920, 1080), (64, 64), (3, 2), (1, 1)] {
            for d in plan_bloom(w, h, 4).dispatches {
                for (source, mip) in [(d.input, d.input_mip), (d.bloom, d.bloom_mip)] {
                    assert_ne!((source, mip), (BloomSource::Chain(d.output), d.output_mip), "{d:?}");
                }
            }
        }
    }

    #[test]
    fn tiny_viewports_still_plan() {
        let plan = plan_bloom(1, 1, 4);
        assert_eq!(plan.mip_levels, 1);
        assert_eq!(plan.dispatches.len(), 2);
        assert_eq!(plan.dispatches[1].stage, BloomStage::FirstUpsample);
    }
}
