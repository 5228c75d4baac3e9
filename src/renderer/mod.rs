// src/renderer/mod.rs
//! Scene rendering: draw lists, shadow cascades, the pass sequence and the per-viewport
//! [`SceneRenderer`] that drives them.

pub mod camera;
pub mod cascades;
pub mod draw_list;
pub mod frame_graph;
pub mod material;
pub mod mesh;
pub mod passes;
pub mod pipeline;
pub mod scene;
pub mod scene_renderer;
pub mod targets;

pub use camera::{Camera, CameraData, RendererCamera};
pub use cascades::ShadowCascade;
pub use draw_list::{DrawCommand, DrawList, StaticMeshKey, TransformBufferData};
pub use frame_graph::{FramePlan, PassKind, SkipReason};
pub use material::{Material, MaterialRegistry, SharedMaterial};
pub use mesh::{StaticMesh, StaticVertex, Submesh};
pub use passes::{DynamicSky, FrameData, PresentTarget};
pub use scene::{DirectionalLight, EntityId, PointLight, RenderScene, SceneLights, SceneSnapshot, StaticMeshInstance};
pub use scene_renderer::{RendererStats, ScheduledFn, SceneRenderer};
