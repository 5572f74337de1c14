// The scene core drives the GPU exclusively through this trait. Everything
// here is synchronous and object safe so the frame loop can hold a
// `&mut dyn Engine` without caring which device sits behind it.

pub mod null;

pub use null::{GpuCall, NullEngine};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("render target allocation failed: {0}")]
    AllocationFailed(String),
    #[error("render target size {width}x{height} exceeds device limit {max}")]
    SizeExceedsLimit { width: u32, height: u32, max: u32 },
    #[error("multi render target wants {requested} attachments, device supports {max}")]
    TooManyAttachments { requested: u32, max: u32 },
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Opaque id of a GPU render target owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetId(pub(crate) u32);

/// Opaque id of a compiled effect (shader program plus state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectId(pub(crate) u32);

/// Identifies a rendering pass so material variants can be cached per pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPassId(pub(crate) u32);

impl RenderPassId {
    /// The implicit pass every frame starts in.
    pub const MAIN: RenderPassId = RenderPassId(0);

    pub fn index(&self) -> u32 {
        self.0
    }
}

/// One attachment of a render target, used when feeding a previously
/// rendered texture back into an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureView {
    pub target: RenderTargetId,
    pub attachment: u32,
}

/// Which draw buffers of the currently bound target receive writes.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentLayout {
    slots: Vec<bool>,
}

impl AttachmentLayout {
    pub fn from_slots(slots: &[bool]) -> Self {
        Self {
            slots: slots.to_vec(),
        }
    }

    pub fn slots(&self) -> &[bool] {
        &self.slots
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color4 {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color4 {
    pub const TRANSPARENT_BLACK: Color4 = Color4::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

impl Default for Color4 {
    fn default() -> Self {
        Color4::new(0.2, 0.2, 0.3, 1.0)
    }
}

/// Viewport in normalized coordinates, scaled by the engine to the bound
/// target's pixel size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub const FULL: Viewport = Viewport {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport::FULL
    }
}

/// Blend setup applied before transparent draws and compose passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaMode {
    Disable,
    Combine,
    Add,
    /// src * 1 + dst * 1 on both color and alpha, used by depth peel passes.
    OneOne,
    /// Under-blending of peeled back layers into the accumulation target.
    LayerAccumulate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaEquation {
    Add,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTargetKind {
    Simple,
    Cube,
    Array2D,
    Volume3D,
}

impl RenderTargetKind {
    /// Number of per-face/per-layer passes a full render of the target takes.
    pub fn pass_count(&self, layers: u32) -> u32 {
        match self {
            RenderTargetKind::Simple => 1,
            RenderTargetKind::Cube => 6,
            RenderTargetKind::Array2D | RenderTargetKind::Volume3D => layers.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTargetSize {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

impl RenderTargetSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            layers: 1,
        }
    }

    pub fn with_layers(width: u32, height: u32, layers: u32) -> Self {
        Self {
            width,
            height,
            layers,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderTargetDescriptor {
    pub kind: RenderTargetKind,
    pub size: RenderTargetSize,
    /// Color attachment count; more than one makes this a multi render target.
    pub attachment_count: u32,
    pub generate_mip_maps: bool,
}

#[derive(Debug, Clone)]
pub struct EngineCapabilities {
    pub max_draw_buffers: u32,
    pub max_render_target_size: u32,
}

impl Default for EngineCapabilities {
    fn default() -> Self {
        Self {
            max_draw_buffers: 8,
            max_render_target_size: 16384,
        }
    }
}

/// Device abstraction the frame loop renders through.
///
/// Resource creation reports failure through [`EngineResult`]; state changes
/// and draws are fire-and-forget, matching how command recording behaves on
/// real devices.
pub trait Engine {
    fn caps(&self) -> &EngineCapabilities;
    fn render_width(&self) -> u32;
    fn render_height(&self) -> u32;

    /// Engines replaying a recorded snapshot skip per-frame mesh
    /// preparation; render targets then only bind and clear.
    fn snapshot_rendering(&self) -> bool {
        false
    }

    fn create_render_target(
        &mut self,
        name: &str,
        descriptor: &RenderTargetDescriptor,
    ) -> EngineResult<RenderTargetId>;
    fn release_render_target(&mut self, id: RenderTargetId);

    fn bind_framebuffer(&mut self, id: RenderTargetId, face: u32, layer: u32);
    fn unbind_framebuffer(&mut self, id: RenderTargetId);
    fn restore_default_framebuffer(&mut self);
    fn generate_mip_maps(&mut self, id: RenderTargetId);
    fn bind_attachments(&mut self, layout: &AttachmentLayout);

    fn clear(&mut self, color: Option<Color4>, back_buffer: bool, depth: bool, stencil: bool);
    fn set_viewport(&mut self, viewport: Viewport);

    fn create_render_pass_id(&mut self, name: &str) -> RenderPassId;
    fn release_render_pass_id(&mut self, id: RenderPassId);
    fn current_render_pass_id(&self) -> RenderPassId;
    fn set_current_render_pass_id(&mut self, id: RenderPassId);

    /// Returns the effect registered under `name`, compiling it on first use.
    fn create_effect(&mut self, name: &str) -> EffectId;
    fn is_effect_ready(&self, id: EffectId) -> bool;
    fn enable_effect(&mut self, id: EffectId);
    fn set_effect_texture(&mut self, effect: EffectId, sampler: &str, texture: TextureView);

    fn set_depth_test(&mut self, enabled: bool);
    fn set_depth_write(&mut self, enabled: bool);
    fn set_alpha_mode(&mut self, mode: AlphaMode);
    fn set_alpha_equation(&mut self, equation: AlphaEquation);
    fn apply_states(&mut self);

    fn draw_indexed(&mut self, index_start: u32, index_count: u32, instance_count: u32);
    fn draw_fullscreen(&mut self, effect: EffectId);
}
