#![cfg(not(target_arch = "wasm32"))]

use std::backtrace::Backtrace;
use std::fs::File;
use std::io::Write;
use std::panic;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use glam::{Mat4, Quat, Vec3, Vec4};
use log::{error, info};
use slop_render::attention::UserNotifier;
use slop_render::gpu::GpuContext;
use slop_render::renderer::{
    Camera, DirectionalLight, EntityId, Material, MaterialRegistry, PointLight, RendererCamera, SceneRenderer,
    SceneSnapshot, StaticMesh,
};
use slop_render::RendererConfig;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const CONFIG_PATH: &str = "slop_render.json";

fn main() {
    setup_os_optimizations();
    setup_diagnostics();

    info!("Starting slop_viewer...");
    if let Err(err) = run() {
        error!("Viewer terminated: {err:#}");
        std::process::exit(1);
    }
}

fn setup_os_optimizations() {
    #[cfg(feature = "high_priority")]
    {
        if thread_priority::set_current_thread_priority(thread_priority::ThreadPriority::Max).is_ok() {
            info!("Elevated main thread priority to Max.");
        }
    }
}

/// Logger plus a panic hook that writes a crash report next to the binary.
fn setup_diagnostics() {
    slop_render::init_logging();

    panic::set_hook(Box::new(|panic_info| {
        let backtrace = Backtrace::force_capture();
        let msg = match panic_info.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match panic_info.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<dyn Any>",
            },
        };
        let location = panic_info
            .location()
            .map_or("Unknown location".to_string(), |loc| format!("{}:{}", loc.file(), loc.line()));
        let thread = std::thread::current().name().unwrap_or("<unnamed>").to_owned();

        let crash_msg = format!(
            "=== VIEWER CRASH ===\nReason: {msg}\nThread: {thread}\nLocation: {location}\n\nStack Trace:\n{backtrace}"
        );
        eprintln!("\x1b[31;1m{crash_msg}\x1b[0m");
        if let Ok(mut file) = File::create("slop_viewer_crash.log") {
            let _ = file.write_all(crash_msg.as_bytes());
            eprintln!("Crash report saved to slop_viewer_crash.log");
        }
    }));
}

fn load_config() -> anyhow::Result<RendererConfig> {
    let mut config = if Path::new(CONFIG_PATH).exists() {
        RendererConfig::load(CONFIG_PATH)?
    } else {
        RendererConfig::default()
    };
    // No editor viewport to show the composite in: blit it to the window.
    config.swapchain_target = true;
    Ok(config)
}

fn run() -> anyhow::Result<()> {
    let config = load_config()?;
    let event_loop = EventLoop::new().context("creating event loop")?;

    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .context("no suitable GPU adapter")?;
    let gpu = pollster::block_on(GpuContext::request(&adapter))?;

    let mut app = ViewerApp {
        instance,
        adapter,
        gpu,
        config,
        window: None,
        surface: None,
        surface_config: None,
        renderer: None,
        camera: Camera::default(),
        started: Instant::now(),
    };
    event_loop.run_app(&mut app).context("event loop failed")?;
    Ok(())
}

struct ViewerApp {
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    gpu: GpuContext,
    config: RendererConfig,

    // Created inside `resumed`
    window: Option<Arc<Window>>,
    surface: Option<wgpu::Surface<'static>>,
    surface_config: Option<wgpu::SurfaceConfiguration>,
    renderer: Option<SceneRenderer>,

    camera: Camera,
    started: Instant,
}

impl ViewerApp {
    fn init(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let attrs = Window::default_attributes().with_title("slop_viewer");
        let window = Arc::new(event_loop.create_window(attrs)?);

        let surface = self.instance.create_surface(Arc::clone(&window))?;
        let size = window.inner_size();
        let caps = surface.get_capabilities(&self.adapter);
        // The texture pass writes already gamma-corrected colour.
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .context("surface reports no formats")?;
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&self.gpu.device, &surface_config);

        let notifier: Arc<dyn UserNotifier> = window.clone();
        let mut renderer = SceneRenderer::new(self.config.clone(), Some(self.gpu.clone()), notifier)?;
        renderer.set_current_scene(Arc::new(demo_scene(&self.gpu, &renderer)?));
        renderer.set_viewport_size(surface_config.width, surface_config.height);
        renderer.set_dynamic_sky(2.0, 0.3, 0.75);
        self.camera.set_aspect(surface_config.width as f32 / surface_config.height as f32);

        window.request_redraw();
        self.window = Some(window);
        self.surface = Some(surface);
        self.surface_config = Some(surface_config);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn redraw(&mut self) {
        let (Some(surface), Some(surface_config), Some(renderer)) =
            (self.surface.as_ref(), self.surface_config.as_ref(), self.renderer.as_mut())
        else {
            return;
        };

        let frame = match surface.get_current_texture() {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("Failed to acquire next swap chain texture: {err:?}. Reconfiguring surface.");
                surface.configure(&self.gpu.device, surface_config);
                match surface.get_current_texture() {
                    Ok(frame) => frame,
                    Err(err) => {
                        log::error!("Failed to acquire frame after reconfigure: {err:?}");
                        return;
                    }
                }
            }
        };
        let view = Arc::new(frame.texture.create_view(&wgpu::TextureViewDescriptor::default()));

        // Slow orbit around the cubes.
        let t = self.started.elapsed().as_secs_f32() * 0.2;
        self.camera.position = Vec3::new(t.sin() * 12.0, 4.0, t.cos() * 12.0);
        self.camera.yaw = t + std::f32::consts::PI;
        self.camera.pitch = -0.3;

        renderer.set_viewport_size(surface_config.width, surface_config.height);
        renderer.set_camera(RendererCamera::from(&self.camera));
        renderer.set_swapchain_target(view, surface_config.format);
        renderer.render_scene();
        // The swapchain image must be written before it is presented.
        renderer.flush();
        renderer.clear_swapchain_target();
        frame.present();

        let stats = renderer.stats();
        if stats.frames % 600 == 0 {
            log::debug!(
                "frame {}: {} draws, {} instances, waited {:?}",
                stats.frames,
                stats.draw_commands,
                stats.instances,
                stats.last_wait
            );
        }
    }
}

/// A floor and a ring of cubes lit by the sun and a few coloured point lights.
fn demo_scene(gpu: &GpuContext, renderer: &SceneRenderer) -> anyhow::Result<SceneSnapshot> {
    let registry = Arc::new(MaterialRegistry::new(1));
    match renderer.shader_library().find("StaticMesh") {
        Ok(shader) => {
            let mut material = Material::new("Demo", shader);
            material.set("u_Material.AlbedoColor", Vec4::new(0.8, 0.75, 0.7, 1.0))?;
            material.set("u_Material.Roughness", 0.6f32)?;
            registry.set_material(0, material.into_shared());
        }
        Err(err) => log::warn!("Demo scene uses the default material: {err}"),
    }
    let cube = Arc::new(StaticMesh::cube(Some(gpu), registry)?);

    let mut scene = SceneSnapshot::new("Demo");
    scene.add_static_mesh(
        EntityId(0),
        Arc::clone(&cube),
        Mat4::from_scale_rotation_translation(Vec3::new(20.0, 0.2, 20.0), Quat::IDENTITY, Vec3::new(0.0, -0.6, 0.0)),
    );
    for i in 0..8u64 {
        let angle = i as f32 / 8.0 * std::f32::consts::TAU;
        let position = Vec3::new(angle.cos() * 4.0, 0.0, angle.sin() * 4.0);
        let transform = Mat4::from_rotation_translation(Quat::from_rotation_y(angle), position);
        scene.add_static_mesh(EntityId(i + 1), Arc::clone(&cube), transform);
        scene.add_physics_collider(EntityId(i + 1), Arc::clone(&cube), transform);
    }

    scene.set_directional_light(DirectionalLight::new(Vec3::new(-0.4, -1.0, -0.3), Vec3::ONE, 2.5));
    for (i, colour) in [Vec3::X, Vec3::Y, Vec3::Z].into_iter().enumerate() {
        let angle = i as f32 / 3.0 * std::f32::consts::TAU;
        scene.add_point_light(PointLight::new(
            Vec3::new(angle.cos() * 2.0, 1.0, angle.sin() * 2.0),
            6.0,
            colour,
            4.0,
        ));
    }
    Ok(scene)
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        event_loop.set_control_flow(ControlFlow::Poll);
        if self.window.is_some() {
            return;
        }
        if let Err(err) = self.init(event_loop) {
            error!("Failed to start the viewer: {err:#}");
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(window) = self.window.as_ref() else { return };
        if window.id() != window_id {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                if new_size.width > 0 && new_size.height > 0 {
                    if let (Some(surface), Some(surface_config)) = (self.surface.as_ref(), self.surface_config.as_mut()) {
                        surface_config.width = new_size.width;
                        surface_config.height = new_size.height;
                        surface.configure(&self.gpu.device, surface_config);
                        self.camera.set_aspect(new_size.width as f32 / new_size.height as f32);
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                self.redraw();
                if let Some(window) = self.window.as_ref() {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Drain the render thread before the surface goes away.
        if let Some(mut renderer) = self.renderer.take() {
            renderer.flush();
        }
        info!("slop_viewer exiting");
    }
}
