// src/renderer/camera.rs
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Perspective camera with position and Euler rotation (yaw, pitch).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    /// yaw: rotation around Y axis (radians). pitch: rotation around X axis (radians).
    pub yaw: f32,
    pub pitch: f32,

    pub fovy: f32,
    pub aspect: f32,
    pub znear: f32,
    pub zfar: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 2.0, -8.0), 0.0, -0.2, 45f32.to_radians(), 16.0 / 9.0, 0.1, 1000.0)
    }
}

impl Camera {
    pub fn new(position: Vec3, yaw: f32, pitch: f32, fovy_radians: f32, aspect: f32, znear: f32, zfar: f32) -> Self {
        Self {
            position,
            yaw,
            pitch,
            fovy: fovy_radians,
            aspect,
            znear,
            zfar,
        }
    }

    pub fn forward(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        Vec3::new(cos_pitch * sin_yaw, sin_pitch, cos_pitch * cos_yaw).normalize_or_zero()
    }

    /// Build view matrix from position + yaw/pitch (right-handed, Y up).
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.forward(), Vec3::Y)
    }

    /// Perspective projection with wgpu's 0..1 depth range.
    pub fn proj_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fovy, self.aspect, self.znear, self.zfar)
    }

    /// Update aspect ratio (call on resize).
    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }
}

/// What the renderer keeps of a camera for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RendererCamera {
    pub projection: Mat4,
    pub view: Mat4,
    pub position: Vec3,
    pub near: f32,
    pub far: f32,
    pub fov: f32,
}

impl From<&Camera> for RendererCamera {
    fn from(camera: &Camera) -> Self {
        Self {
            projection: camera.proj_matrix(),
            view: camera.view_matrix(),
            position: camera.position,
            near: camera.znear,
            far: camera.zfar,
            fov: camera.fovy,
        }
    }
}

impl Default for RendererCamera {
    fn default() -> Self {
        Self::from(&Camera::default())
    }
}

impl RendererCamera {
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    /// Same camera with the projection rebuilt for a new aspect ratio.
    pub fn with_aspect(mut self, aspect: f32) -> Self {
        self.projection = Mat4::perspective_rh(self.fov, aspect, self.near, self.far);
        self
    }
}

/// `Camera` uniform block shared by every scene shader (std140, column-major).
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct CameraData {
    pub view_projection: [[f32; 4]; 4],
    pub inverse_view_projection: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub inverse_projection: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub position: [f32; 4],
    /// width, height, near, far
    pub viewport: [f32; 4],
}

impl CameraData {
    pub fn new(camera: &RendererCamera, width: u32, height: u32) -> Self {
        let view_projection = camera.view_projection();
        Self {
            view_projection: view_projection.to_cols_array_2d(),
            inverse_view_projection: view_projection.inverse().to_cols_array_2d(),
            projection: camera.projection.to_cols_array_2d(),
            inverse_projection: camera.projection.inverse().to_cols_array_2d(),
            view: camera.view.to_cols_array_2d(),
            position: camera.position.extend(1.0).to_array(),
            viewport: [width as f32, height as f32, camera.near, camera.far],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_camera_looks_down_positive_z() {
        let camera = Camera::new(Vec3::ZERO, 0.0, 0.0, 1.0, 1.0, 0.1, 100.0);
        assert!((camera.forward() - Vec3::Z).length() < 1e-6);
        let p = camera.view_matrix().transform_point3(Vec3::new(0.0, 0.0, 5.0));
        assert!((p.z + 5.0).abs() < 1e-5);
    }

    #[test]
    fn camera_block_matches_shader_size() {
        assert_eq!(std::mem::size_of::<CameraData>(), 5 * 64 + 2 * 16);
        let data = CameraData::new(&RendererCamera::default(), 1280, 720);
        assert_eq!(data.viewport[0], 1280.0);
        assert_eq!(data.viewport[2], 0.1);
    }
}
