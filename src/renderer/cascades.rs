// src/renderer/cascades.rs
//! Directional-light shadow cascades.
//! - Practical split scheme: `split_lambda` blends logarithmic and uniform splits
//! - Each cascade is a bounding sphere around its frustum slice, so the ortho size is rotation stable
//! - Light matrices are snapped to the shadow map texel grid to stop shimmering

use super::camera::RendererCamera;
use crate::config::ShadowConfig;
use glam::{Mat4, Vec3, Vec4};

/// One slice of the camera frustum rendered into one layer of the shadow map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowCascade {
    /// View-space distance where this cascade starts.
    pub near_depth: f32,
    /// View-space distance where this cascade ends. Shaders pick the cascade by comparing against it.
    pub split_depth: f32,
    pub view_projection: Mat4,
}

impl ShadowCascade {
    pub fn identity() -> Self {
        Self {
            near_depth: 0.0,
            split_depth: 0.0,
            view_projection: Mat4::IDENTITY,
        }
    }
}

const MIN_NEAR: f32 = 1.0e-3;
const MIN_RANGE: f32 = 1.0e-2;

/// Split positions as fractions of `far - near`, one per cascade, ending at 1.
///
/// The log term needs `0 < near < far`; other inputs are clamped into that range first.
pub fn cascade_splits(near: f32, far: f32, count: usize, lambda: f32) -> Vec<f32> {
    let near = near.max(MIN_NEAR);
    let far = far.max(near + MIN_RANGE);
    let range = far - near;
    let ratio = far / near;
    (0..count)
        .map(|i| {
            let p = (i + 1) as f32 / count as f32;
            let log = near * ratio.powf(p);
            let uniform = near + range * p;
            let d = lambda * (log - uniform) + uniform;
            (d - near) / range
        })
        .collect()
}

/// World-space corners of the camera frustum (near quad then far quad).
fn frustum_corners(camera: &RendererCamera) -> [Vec3; 8] {
    let inverse = camera.view_projection().inverse();
    let ndc = [
        Vec3::new(-1.0, 1.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(1.0, -1.0, 0.0),
        Vec3::new(-1.0, -1.0, 0.0),
        Vec3::new(-1.0, 1.0, 1.0),
        Vec3::new(1.0, 1.0, 1.0),
        Vec3::new(1.0, -1.0, 1.0),
        Vec3::new(-1.0, -1.0, 1.0),
    ];
    ndc.map(|p| {
        let world = inverse * p.extend(1.0);
        world.truncate() / world.w
    })
}

/// Recompute every cascade for `light_direction` (the direction the light travels).
pub fn update_cascades(camera: &RendererCamera, light_direction: Vec3, config: &ShadowConfig) -> Vec<ShadowCascade> {
    let count = config.cascade_count.max(1) as usize;
    let direction = light_direction.normalize_or_zero();
    if direction == Vec3::ZERO {
        return vec![ShadowCascade::identity(); count];
    }

    let near = camera.near;
    let far = camera.far;
    let range = far - near;
    let splits = cascade_splits(near, far, count, config.split_lambda);
    let full = frustum_corners(camera);
    let up = if direction.abs().dot(Vec3::Y) > 0.99 { Vec3::Z } else { Vec3::Y };

    let mut cascades = Vec::with_capacity(count);
    let mut last_split = 0.0f32;
    for split in splits {
        let mut corners = full;
        for i in 0..4 {
            let edge = full[i + 4] - full[i];
            corners[i + 4] = full[i] + edge * split;
            corners[i] = full[i] + edge * last_split;
        }

        let center = corners.iter().copied().sum::<Vec3>() / 8.0;
        let radius = corners
            .iter()
            .map(|c| (*c - center).length())
            .fold(0.0f32, f32::max);
        let radius = (radius * 16.0).ceil() / 16.0;

        let light_view = Mat4::look_at_rh(center - direction * radius, center, up);
        let mut light_projection = Mat4::orthographic_rh(
            -radius,
            radius,
            -radius,
            radius,
            config.near_plane_offset,
            2.0 * radius + config.far_plane_offset,
        );

        // Snap the projected origin to a whole texel.
        let half_map = config.map_size as f32 * 0.5;
        let origin = (light_projection * light_view * Vec4::W) * half_map;
        let rounded = origin.round();
        let offset = (rounded - origin) / half_map;
        light_projection.w_axis.x += offset.x;
        light_projection.w_axis.y += offset.y;

        cascades.push(ShadowCascade {
            near_depth: near + last_split * range,
            split_depth: near + split * range,
            view_projection: light_projection * light_view,
        });
        last_split = split;
    }
    cascades
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::camera::Camera;

    fn config(lambda: f32) -> ShadowConfig {
        ShadowConfig {
            split_lambda: lambda,
            ..ShadowConfig::default()
        }
    }

    #[test]
    fn splits_increase_and_end_at_far() {
        for lambda in [0.0, 0.5, 0.92, 1.0] {
            let splits = cascade_splits(0.1, 1000.0, 4, lambda);
            assert_eq!(splits.len(), 4);
            assert!(splits.windows(2).all(|w| w[0] < w[1]), "{lambda}: {splits:?}");
            assert!((splits[3] - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn degenerate_planes_still_give_finite_splits() {
        for (near, far) in [(0.0, 100.0), (-1.0, 50.0), (10.0, 10.0), (10.0, 5.0), (f32::NAN, 20.0)] {
            let splits = cascade_splits(near, far, 4, 0.92);
            assert!(splits.iter().all(|s| s.is_finite()), "{near}..{far}: {splits:?}");
            assert!(splits.windows(2).all(|w| w[0] < w[1]), "{near}..{far}: {splits:?}");
            assert!((splits[3] - 1.0).abs() < 1e-3, "{near}..{far}: {splits:?}");
        }
    }

    #[test]
    fn uniform_lambda_splits_evenly() {
        let splits = cascade_splits(1.0, 101.0, 4, 0.0);
        for (split, expected) in splits.iter().zip([0.25, 0.5, 0.75, 1.0]) {
            assert!((split - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn cascades_cover_the_view_range() {
        let camera = RendererCamera::from(&Camera::default());
        let cascades = update_cascades(&camera, Vec3::new(-0.3, -1.0, 0.2), &config(0.92));
        assert_eq!(cascades.len(), 4);
        assert!((cascades[0].near_depth - camera.near).abs() < 1e-6);
        assert!(cascades.windows(2).all(|w| w[0].split_depth < w[1].split_depth));
        assert!(cascades.windows(2).all(|w| (w[0].split_depth - w[1].near_depth).abs() < 1e-3));
        assert!((cascades[3].split_depth - camera.far).abs() < 1e-2);
    }

    #[test]
    fn straight_down_light_still_builds_matrices() {
        let camera = RendererCamera::default();
        let cascades = update_cascades(&camera, Vec3::NEG_Y, &config(0.5));
        assert!(cascades.iter().all(|c| c.view_projection.is_finite()));
    }

    #[test]
    fn zero_direction_gives_identity_cascades() {
        let cascades = update_cascades(&RendererCamera::default(), Vec3::ZERO, &config(0.5));
        assert_eq!(cascades, vec![ShadowCascade::identity(); 4]);
    }
}
