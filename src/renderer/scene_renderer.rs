// src/renderer/scene_renderer.rs
//! The per-viewport renderer.
//!
//! Each [`SceneRenderer::render_scene`]:
//! 1. waits for the previous frame on the render thread (the frame boundary)
//! 2. runs scheduled functions and picks up shader reloads
//! 3. walks the current scene into draw lists, computes cascades and plans the passes
//! 4. hands a [`FrameData`] to the render thread, which records and submits it
//!
//! Without a [`GpuContext`] everything up to step 4 still runs, which is how the tests
//! and tools drive it.

use super::camera::{CameraData, RendererCamera};
use super::cascades::{update_cascades, ShadowCascade};
use super::draw_list::{resolve_registry, DrawList};
use super::frame_graph::{light_culling_groups, plan_frame, FramePlan, PassKind};
use super::material::MaterialRegistry;
use super::mesh::StaticMesh;
use super::passes::{DynamicSky, FrameData, FrameResources, PipelineId, PreparedDraw, PresentTarget, SceneData, ShadowData};
use super::scene::{EntityId, RenderScene, SceneLights};
use crate::attention::{LogNotifier, UserNotifier};
use crate::config::RendererConfig;
use crate::error::{tolerate, Result};
use crate::gpu::{GpuContext, Image2D};
use crate::render_thread::RenderThread;
use crate::shader::hot_reload::{ShaderWatcher, DEFAULT_DEBOUNCE};
use crate::shader::{ShaderLibrary, SharedShader};
use glam::Mat4;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub type ScheduledFn = Box<dyn FnOnce(&mut SceneRenderer) + Send>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RendererStats {
    pub frames: u64,
    pub draw_commands: usize,
    pub instances: u32,
    pub collider_instances: u32,
    pub skipped_passes: usize,
    pub shader_reloads: u64,
    pub reload_failures: u64,
    /// How long the last frame boundary waited for the render thread.
    pub last_wait: Duration,
}

pub struct SceneRenderer {
    config: RendererConfig,
    gpu: Option<GpuContext>,
    library: ShaderLibrary,
    render_thread: RenderThread,
    scene: Option<Arc<dyn RenderScene>>,
    viewport: (u32, u32),
    camera: RendererCamera,
    lights: SceneLights,
    sky: DynamicSky,
    present: Option<PresentTarget>,
    draw_list: DrawList,
    collider_list: DrawList,
    cascades: Vec<ShadowCascade>,
    scheduled: Vec<ScheduledFn>,
    /// Shaders reloaded since the last frame; their pipelines rebuild on the render thread.
    reloaded: Vec<String>,
    resources: Option<Arc<Mutex<FrameResources>>>,
    watcher: Option<ShaderWatcher>,
    notifier: Arc<dyn UserNotifier>,
    stats: RendererStats,
    last_plan: FramePlan,
}

impl SceneRenderer {
    /// Validate `config`, load every shader in its shader directory and start the render thread.
    pub fn new(config: RendererConfig, gpu: Option<GpuContext>, notifier: Arc<dyn UserNotifier>) -> Result<Self> {
        config.validate()?;
        let mut library = ShaderLibrary::new(gpu.clone(), config.shader_cache_directory.clone());
        let mut watcher = None;
        if config.shader_directory.is_dir() {
            let report = library.load_directory(&config.shader_directory)?;
            if !report.is_ok() {
                notifier.report("Some shaders failed to load", &report.summary());
            }
            if config.hot_reload {
                watcher = ShaderWatcher::new(&config.shader_directory, DEFAULT_DEBOUNCE)
                    .map_err(|err| log::warn!("Shader hot reload disabled: {err}"))
                    .ok();
            }
        } else {
            log::warn!("Shader directory {} does not exist", config.shader_directory.display());
        }

        let cascade_count = config.shadows.cascade_count as usize;
        Ok(Self {
            render_thread: RenderThread::new(config.render_thread_enabled),
            cascades: vec![ShadowCascade::identity(); cascade_count],
            config,
            gpu,
            library,
            scene: None,
            viewport: (0, 0),
            camera: RendererCamera::default(),
            lights: SceneLights::default(),
            sky: DynamicSky::default(),
            present: None,
            draw_list: DrawList::new(),
            collider_list: DrawList::new(),
            scheduled: Vec::new(),
            reloaded: Vec::new(),
            resources: None,
            watcher,
            notifier,
            stats: RendererStats::default(),
            last_plan: FramePlan::default(),
        })
    }

    /// No device, no window: plans and draw lists only.
    pub fn headless(config: RendererConfig) -> Result<Self> {
        Self::new(config, None, Arc::new(LogNotifier))
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn shader_library(&self) -> &ShaderLibrary {
        &self.library
    }

    pub fn shader_library_mut(&mut self) -> &mut ShaderLibrary {
        &mut self.library
    }

    pub fn render_thread(&self) -> &RenderThread {
        &self.render_thread
    }

    pub fn stats(&self) -> &RendererStats {
        &self.stats
    }

    pub fn last_plan(&self) -> &FramePlan {
        &self.last_plan
    }

    pub fn cascades(&self) -> &[ShadowCascade] {
        &self.cascades
    }

    /// Draws submitted so far this frame.
    pub fn draw_list(&self) -> &DrawList {
        &self.draw_list
    }

    pub fn collider_list(&self) -> &DrawList {
        &self.collider_list
    }

    // ====================== INPUTS ======================

    pub fn set_current_scene(&mut self, scene: Arc<dyn RenderScene>) {
        log::debug!("Scene renderer now drawing '{}'", scene.name());
        self.scene = Some(scene);
    }

    pub fn clear_scene(&mut self) {
        self.scene = None;
    }

    pub fn current_scene(&self) -> Option<&Arc<dyn RenderScene>> {
        self.scene.as_ref()
    }

    /// Run `f` with `scene` as the current scene, then put the previous one back.
    pub fn with_scene<R>(&mut self, scene: Arc<dyn RenderScene>, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = self.scene.replace(scene);
        let result = f(self);
        self.scene = previous;
        result
    }

    pub fn set_viewport_size(&mut self, width: u32, height: u32) {
        if (width, height) == self.viewport {
            return;
        }
        self.viewport = (width, height);
        if width > 0 && height > 0 {
            self.camera = self.camera.with_aspect(width as f32 / height as f32);
        }
    }

    pub fn viewport_size(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn set_camera(&mut self, camera: RendererCamera) {
        self.camera = camera;
    }

    pub fn camera(&self) -> &RendererCamera {
        &self.camera
    }

    /// Lights used when no scene is set (a scene supplies its own).
    pub fn set_lights(&mut self, lights: SceneLights) {
        self.lights = lights;
    }

    pub fn set_dynamic_sky(&mut self, turbidity: f32, azimuth: f32, inclination: f32) {
        self.sky = DynamicSky {
            turbidity,
            azimuth,
            inclination,
        };
    }

    pub fn dynamic_sky(&self) -> DynamicSky {
        self.sky
    }

    /// Blit the composite to `view` every frame (with `config.swapchain_target`).
    pub fn set_swapchain_target(&mut self, view: Arc<wgpu::TextureView>, format: wgpu::TextureFormat) {
        self.present = Some(PresentTarget { view, format });
    }

    pub fn clear_swapchain_target(&mut self) {
        self.present = None;
    }

    /// Queue every submesh of `mesh`. `overrides` replace the mesh's materials when any of
    /// their slots is active.
    pub fn submit_static_mesh(
        &mut self,
        entity: EntityId,
        mesh: &Arc<StaticMesh>,
        overrides: Option<&Arc<MaterialRegistry>>,
        transform: Mat4,
    ) {
        let registry = resolve_registry(mesh.materials(), overrides);
        self.draw_list.submit_mesh(entity, mesh, &registry, transform);
    }

    pub fn submit_physics_collider(&mut self, entity: EntityId, mesh: &Arc<StaticMesh>, transform: Mat4) {
        self.collider_list.submit_mesh(entity, mesh, mesh.materials(), transform);
    }

    /// Run `f` at the start of the next [`render_scene`](Self::render_scene).
    pub fn schedule(&mut self, f: impl FnOnce(&mut SceneRenderer) + Send + 'static) {
        self.scheduled.push(Box::new(f));
    }

    // ====================== SHADER RELOAD ======================

    /// Recompile every shader file the watcher saw change. Returns the names that reloaded.
    pub fn poll_shader_reloads(&mut self) -> Vec<String> {
        let changed = match self.watcher.as_mut() {
            Some(watcher) => watcher.poll(),
            None => return Vec::new(),
        };
        changed
            .iter()
            .filter_map(|path| self.reload_shader_file(path))
            .collect()
    }

    fn shader_for_path(&self, path: &Path) -> Option<SharedShader> {
        self.library.find_by_path(path).or_else(|| {
            let stem = path.file_stem()?.to_str()?;
            self.library.find(stem).ok()
        })
    }

    /// Recompile (or first-load) the shader at `path`. On failure the previous shader stays
    /// active and the user is told. Returns the shader name on success.
    pub fn reload_shader_file(&mut self, path: &Path) -> Option<String> {
        let reloaded = match self.shader_for_path(path) {
            Some(shader) => {
                let mut shader = shader.write();
                let name = shader.name().to_owned();
                shader.try_recompile().map(|()| name.clone()).map_err(|err| (name, err))
            }
            None => self
                .library
                .load(path)
                .map(|shader| shader.read().name().to_owned())
                .map_err(|err| (path.display().to_string(), err)),
        };

        match reloaded {
            Ok(name) => {
                log::info!("Reloaded shader '{name}'");
                let scheduled = name.clone();
                self.schedule(move |renderer| renderer.on_shader_reloaded(scheduled));
                Some(name)
            }
            Err((name, err)) => {
                self.stats.reload_failures += 1;
                log::error!("Shader '{name}' failed to reload: {err}");
                self.notifier.request_attention();
                self.notifier
                    .report(&format!("Shader '{name}' failed to compile [{}]", err.code()), &err.to_string());
                None
            }
        }
    }

    fn on_shader_reloaded(&mut self, name: String) {
        self.stats.shader_reloads += 1;
        if !self.reloaded.contains(&name) {
            self.reloaded.push(name);
        }
    }

    // ====================== FRAME ======================

    /// Wait for the render thread to finish everything queued so far.
    pub fn flush(&mut self) {
        self.render_thread.wait_all();
        self.stats.last_wait = self.render_thread.last_wait();
    }

    /// Final color attachment of the last rendered frame. Call [`flush`](Self::flush) first to
    /// read it on the CPU side of the frame boundary.
    pub fn composite_image(&self) -> Option<Arc<Image2D>> {
        let resources = self.resources.as_ref()?;
        let resources = resources.lock();
        resources.targets().composite.color(0).cloned()
    }

    /// Render one frame of the current scene (plus anything submitted directly).
    #[tracing::instrument(skip_all, fields(frame = self.stats.frames))]
    pub fn render_scene(&mut self) {
        self.flush();

        for scheduled in std::mem::take(&mut self.scheduled) {
            scheduled(self);
        }
        self.poll_shader_reloads();

        let lights = match self.scene.clone() {
            Some(scene) => {
                for instance in scene.static_meshes() {
                    self.submit_static_mesh(
                        instance.entity,
                        &instance.mesh,
                        instance.material_overrides.as_ref(),
                        instance.transform,
                    );
                }
                if self.config.physics_outline {
                    for collider in scene.physics_colliders() {
                        self.submit_physics_collider(collider.entity, &collider.mesh, collider.transform);
                    }
                }
                scene.lights()
            }
            None => self.lights.clone(),
        };

        let frame = self.prepare_frame(&lights);
        self.stats.frames += 1;
        self.stats.skipped_passes = frame.plan.skipped.len();
        self.last_plan = frame.plan.clone();
        self.draw_list.clear();
        self.collider_list.clear();

        if frame.viewport.0 == 0 || frame.viewport.1 == 0 {
            return;
        }
        let Some(resources) = self.frame_resources() else {
            return;
        };
        let reloaded = std::mem::take(&mut self.reloaded);
        self.render_thread.queue(move || {
            let mut resources = resources.lock();
            for shader in &reloaded {
                resources.reload_shader(shader);
            }
            tolerate(resources.render_frame(&frame), "rendering frame");
        });
        self.render_thread.execute_one();
    }

    fn frame_resources(&mut self) -> Option<Arc<Mutex<FrameResources>>> {
        if self.resources.is_none() {
            let gpu = self.gpu.clone()?;
            let (width, height) = self.viewport;
            self.resources = Some(Arc::new(Mutex::new(FrameResources::new(
                gpu,
                self.config.clone(),
                width,
                height,
            ))));
        }
        self.resources.clone()
    }

    fn prepare_frame(&mut self, lights: &SceneLights) -> FrameData {
        let (width, height) = self.viewport;
        let library = &self.library;
        let plan = plan_frame(&self.config, self.present.is_some(), |name| library.contains(name));

        let shadows = &self.config.shadows;
        self.cascades = match &lights.directional {
            Some(light) if shadows.enabled => update_cascades(&self.camera, light.direction(), shadows),
            _ => vec![ShadowCascade::identity(); shadows.cascade_count as usize],
        };

        let (draws, transforms) = PreparedDraw::from_list(&mut self.draw_list);
        let (outlines, outline_transforms) = PreparedDraw::from_list(&mut self.collider_list);
        self.stats.draw_commands = draws.len();
        self.stats.instances = transforms.len() as u32;
        self.stats.collider_instances = outline_transforms.len() as u32;

        let mut point_lights = lights.points.clone();
        let max_lights = self.config.light_culling.max_point_lights as usize;
        if point_lights.len() > max_lights {
            log::warn!("{} point lights, culling only the first {max_lights}", point_lights.len());
            point_lights.truncate(max_lights);
        }

        let tile_size = self.config.light_culling.tile_size;
        let (tiles_x, _) = light_culling_groups(width.max(1), height.max(1), tile_size);
        let shaders: HashMap<&'static str, SharedShader> = PipelineId::ALL
            .iter()
            .filter_map(|id| {
                let name = id.shader_name();
                library.find(name).ok().map(|shader| (name, shader))
            })
            .collect();

        let mut scene = SceneData::new(
            lights.directional.as_ref(),
            tile_size,
            tiles_x,
            point_lights.len() as u32,
            self.cascades.len() as u32,
        );
        if !plan.runs(PassKind::DirShadowMap) {
            // Nothing is rendered into the shadow map this frame.
            scene.light_radiance[3] = 0.0;
        }

        FrameData {
            viewport: (width, height),
            camera: CameraData::new(&self.camera, width, height),
            scene,
            shadows: ShadowData::new(&self.cascades),
            cascades: self.cascades.clone(),
            draws,
            transforms,
            outlines,
            outline_transforms,
            point_lights,
            sky: self.sky,
            shaders,
            present: self.present.clone(),
            plan,
        }
    }
}

impl Drop for SceneRenderer {
    fn drop(&mut self) {
        // Let the last frame finish before the render thread shuts down and drops the queue.
        self.render_thread.wait_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attention::testing::RecordingNotifier;
    use crate::renderer::frame_graph::SkipReason;
    use crate::renderer::material::Material;
    use crate::renderer::scene::{DirectionalLight, SceneSnapshot};
    use crate::shader::Shader;
    use glam::Vec3;
    use parking_lot::RwLock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FLAT: &str = "#type vertex\n#version 450\nlayout(location = 0) in vec3 a_Position;\nvoid main() {\n    gl_Position = vec4(a_Position, 1.0);\n}\n#type fragment\n#version 450\nlayout(location = 0) out vec4 o_Color;\nvoid main() {\n    o_Color = vec4(1.0);\n}\n";

    fn config(dir: &Path) -> RendererConfig {
        RendererConfig {
            render_thread_enabled: false,
            shader_directory: dir.to_path_buf(),
            shader_cache_directory: None,
            hot_reload: false,
            ..RendererConfig::default()
        }
    }

    fn renderer() -> (tempfile::TempDir, SceneRenderer) {
        let dir = tempfile::tempdir().unwrap();
        let renderer = SceneRenderer::headless(config(dir.path())).unwrap();
        (dir, renderer)
    }

    fn cube() -> Arc<StaticMesh> {
        Arc::new(StaticMesh::cube(None, Arc::new(MaterialRegistry::new(1))).unwrap())
    }

    #[test]
    fn same_key_submissions_become_one_instanced_draw() {
        let (_dir, mut renderer) = renderer();
        let mesh = cube();
        renderer.submit_static_mesh(EntityId(1), &mesh, None, Mat4::IDENTITY);
        renderer.submit_static_mesh(EntityId(2), &mesh, None, Mat4::from_translation(Vec3::X));

        assert_eq!(renderer.draw_list().len(), 1);
        assert_eq!(renderer.draw_list().commands()[0].instance_count, 2);

        renderer.render_scene();
        assert_eq!(renderer.stats().draw_commands, 1);
        assert_eq!(renderer.stats().instances, 2);
        assert!(renderer.draw_list().is_empty());
    }

    #[test]
    fn active_overrides_split_the_batch() {
        let (_dir, mut renderer) = renderer();
        let mesh = cube();
        let shader = Arc::new(RwLock::new(Shader::from_source("Flat", FLAT, None).unwrap()));
        let overrides = Arc::new(MaterialRegistry::new(1));

        renderer.submit_static_mesh(EntityId(1), &mesh, Some(&overrides), Mat4::IDENTITY);
        assert_eq!(renderer.draw_list().len(), 1, "inactive overrides fall back to the mesh registry");

        overrides.set_override(0, Material::new("Red", shader).into_shared());
        renderer.submit_static_mesh(EntityId(2), &mesh, Some(&overrides), Mat4::IDENTITY);
        assert_eq!(renderer.draw_list().len(), 2);
        assert!(Arc::ptr_eq(&renderer.draw_list().commands()[1].registry, &overrides));
    }

    #[test]
    fn scene_instances_are_walked_each_frame() {
        let (_dir, mut renderer) = renderer();
        let mesh = cube();
        let mut scene = SceneSnapshot::new("Test");
        scene.add_static_mesh(EntityId(1), Arc::clone(&mesh), Mat4::IDENTITY);
        scene.add_static_mesh(EntityId(2), Arc::clone(&mesh), Mat4::from_translation(Vec3::Y));
        scene.add_physics_collider(EntityId(1), Arc::clone(&mesh), Mat4::IDENTITY);
        renderer.set_current_scene(Arc::new(scene));

        renderer.render_scene();
        assert_eq!(renderer.stats().instances, 2);
        assert_eq!(renderer.stats().collider_instances, 1);

        renderer.render_scene();
        assert_eq!(renderer.stats().instances, 2, "lists are rebuilt, not accumulated");
        assert_eq!(renderer.stats().frames, 2);
    }

    #[test]
    fn scheduled_functions_run_at_the_next_frame_in_order() {
        let (_dir, mut renderer) = renderer();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            renderer.schedule(move |_| order.lock().push(i));
        }
        assert!(order.lock().is_empty());

        renderer.render_scene();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        renderer.render_scene();
        assert_eq!(order.lock().len(), 3);
    }

    #[test]
    fn scheduled_functions_may_schedule_more() {
        let (_dir, mut renderer) = renderer();
        let runs = Arc::new(AtomicUsize::new(0));
        let outer = Arc::clone(&runs);
        renderer.schedule(move |r| {
            outer.fetch_add(1, Ordering::SeqCst);
            let inner = Arc::clone(&outer);
            r.schedule(move |_| {
                inner.fetch_add(10, Ordering::SeqCst);
            });
        });
        renderer.render_scene();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        renderer.render_scene();
        assert_eq!(runs.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn with_scene_restores_the_previous_scene() {
        let (_dir, mut renderer) = renderer();
        renderer.set_current_scene(Arc::new(SceneSnapshot::new("Main")));
        let name = renderer.with_scene(Arc::new(SceneSnapshot::new("Prefab")), |r| {
            r.current_scene().map(|s| s.name().to_owned())
        });
        assert_eq!(name.as_deref(), Some("Prefab"));
        assert_eq!(renderer.current_scene().map(|s| s.name()), Some("Main"));
    }

    #[test]
    fn missing_shaders_skip_their_passes() {
        let (_dir, mut renderer) = renderer();
        renderer.set_viewport_size(64, 64);
        renderer.render_scene();
        let plan = renderer.last_plan();
        assert!(plan.passes.is_empty());
        assert!(plan
            .skipped
            .contains(&(PassKind::Geometry, SkipReason::ShaderUnavailable("StaticMesh"))));
        assert!(plan
            .skipped
            .contains(&(PassKind::TexturePass, SkipReason::Disabled)));
    }

    #[test]
    fn directional_light_drives_the_cascades() {
        let (_dir, mut renderer) = renderer();
        renderer.set_viewport_size(1280, 720);
        renderer.render_scene();
        assert!(renderer.cascades().iter().all(|c| c.view_projection == Mat4::IDENTITY));

        renderer.set_lights(SceneLights {
            directional: Some(DirectionalLight::new(Vec3::new(-0.3, -1.0, -0.2), Vec3::ONE, 2.0)),
            points: Vec::new(),
        });
        renderer.render_scene();
        let cascades = renderer.cascades();
        assert_eq!(cascades.len(), 4);
        assert!(cascades.windows(2).all(|w| w[0].split_depth < w[1].split_depth));
        assert!((cascades[0].near_depth - renderer.camera().near).abs() < 1e-5);
    }

    #[test]
    fn broken_reload_keeps_the_old_shader_and_tells_the_user() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Flat.glsl");
        std::fs::write(&path, FLAT).unwrap();

        let notifier = Arc::new(RecordingNotifier::default());
        let mut renderer = SceneRenderer::new(config(dir.path()), None, notifier.clone()).unwrap();
        assert!(renderer.shader_library().contains("Flat"));
        let before = renderer.shader_library().find("Flat").unwrap().read().generation();

        std::fs::write(&path, "#type vertex\n#version 450\nvoid main() { this is not glsl }\n").unwrap();
        assert_eq!(renderer.reload_shader_file(&path), None);
        assert_eq!(renderer.stats().reload_failures, 1);
        assert_eq!(*notifier.attention.lock(), 1);
        assert!(notifier.reports.lock()[0].0.contains("E_SHADER_COMPILE"));
        let shader = renderer.shader_library().find("Flat").unwrap();
        assert_eq!(shader.read().generation(), before);

        std::fs::write(&path, FLAT.replace("vec4(1.0)", "vec4(0.5)")).unwrap();
        assert_eq!(renderer.reload_shader_file(&path).as_deref(), Some("Flat"));
        assert_eq!(renderer.stats().shader_reloads, 0, "pipeline rebuild waits for the next frame");
        renderer.render_scene();
        assert_eq!(renderer.stats().shader_reloads, 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.light_culling.tile_size = 0;
        assert_eq!(SceneRenderer::headless(config).err().map(|e| e.code()), Some("E_CONFIG"));
    }
}
