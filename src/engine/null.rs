// engine/null.rs
//
// Headless engine that records every call instead of touching a device.
// Drives the test suite and doubles as a reference for what a real backend
// has to implement.

use log::warn;

use super::{
    AlphaEquation, AlphaMode, AttachmentLayout, Color4, EffectId, Engine, EngineCapabilities,
    EngineError, EngineResult, RenderPassId, RenderTargetDescriptor, RenderTargetId,
    RenderTargetKind, TextureView, Viewport,
};

/// One recorded engine call, in submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCall {
    CreateRenderTarget {
        id: RenderTargetId,
        kind: RenderTargetKind,
        width: u32,
        height: u32,
        layers: u32,
        attachments: u32,
    },
    ReleaseRenderTarget {
        id: RenderTargetId,
    },
    BindFramebuffer {
        id: RenderTargetId,
        face: u32,
        layer: u32,
    },
    UnbindFramebuffer {
        id: RenderTargetId,
    },
    RestoreDefaultFramebuffer,
    GenerateMipMaps {
        id: RenderTargetId,
    },
    BindAttachments {
        slots: Vec<bool>,
    },
    Clear {
        color: Option<Color4>,
        back_buffer: bool,
        depth: bool,
        stencil: bool,
    },
    SetViewport {
        viewport: Viewport,
    },
    CreateRenderPassId {
        id: RenderPassId,
    },
    ReleaseRenderPassId {
        id: RenderPassId,
    },
    SetRenderPassId {
        id: RenderPassId,
    },
    CreateEffect {
        id: EffectId,
        name: String,
    },
    EnableEffect {
        id: EffectId,
    },
    SetEffectTexture {
        effect: EffectId,
        sampler: String,
        texture: TextureView,
    },
    SetDepthTest {
        enabled: bool,
    },
    SetDepthWrite {
        enabled: bool,
    },
    SetAlphaMode {
        mode: AlphaMode,
    },
    SetAlphaEquation {
        equation: AlphaEquation,
    },
    ApplyStates,
    DrawIndexed {
        index_start: u32,
        index_count: u32,
        instance_count: u32,
    },
    DrawFullscreen {
        effect: EffectId,
    },
}

struct EffectSlot {
    name: String,
    ready: bool,
}

pub struct NullEngine {
    caps: EngineCapabilities,
    width: u32,
    height: u32,
    calls: Vec<GpuCall>,
    next_target: u32,
    live_targets: Vec<RenderTargetId>,
    next_pass_id: u32,
    created_pass_ids: u32,
    released_pass_ids: u32,
    current_pass: RenderPassId,
    effects: Vec<EffectSlot>,
    effects_ready_by_default: bool,
    bound: Option<RenderTargetId>,
    snapshot_rendering: bool,
}

impl NullEngine {
    pub fn new() -> Self {
        Self::with_caps(EngineCapabilities::default())
    }

    pub fn with_caps(caps: EngineCapabilities) -> Self {
        Self {
            caps,
            width: 256,
            height: 256,
            calls: Vec::new(),
            next_target: 1,
            live_targets: Vec::new(),
            next_pass_id: 1,
            created_pass_ids: 0,
            released_pass_ids: 0,
            current_pass: RenderPassId::MAIN,
            effects: Vec::new(),
            effects_ready_by_default: true,
            bound: None,
            snapshot_rendering: false,
        }
    }

    pub fn set_snapshot_rendering(&mut self, enabled: bool) {
        self.snapshot_rendering = enabled;
    }

    pub fn set_render_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn calls(&self) -> &[GpuCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<GpuCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Render pass ids handed out and not yet released. Zero after a clean
    /// shutdown.
    pub fn outstanding_render_pass_ids(&self) -> u32 {
        self.created_pass_ids - self.released_pass_ids
    }

    pub fn created_render_pass_ids(&self) -> u32 {
        self.created_pass_ids
    }

    pub fn live_render_targets(&self) -> usize {
        self.live_targets.len()
    }

    /// Marks every newly created effect as ready (default) or pending.
    pub fn set_effects_ready_by_default(&mut self, ready: bool) {
        self.effects_ready_by_default = ready;
    }

    pub fn set_effect_ready(&mut self, id: EffectId, ready: bool) {
        if let Some(slot) = self.effects.get_mut(id.0 as usize) {
            slot.ready = ready;
        }
    }

    pub fn find_effect(&self, name: &str) -> Option<EffectId> {
        self.effects
            .iter()
            .position(|slot| slot.name == name)
            .map(|index| EffectId(index as u32))
    }

    pub fn bound_framebuffer(&self) -> Option<RenderTargetId> {
        self.bound
    }
}

impl Default for NullEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for NullEngine {
    fn caps(&self) -> &EngineCapabilities {
        &self.caps
    }

    fn render_width(&self) -> u32 {
        self.width
    }

    fn render_height(&self) -> u32 {
        self.height
    }

    fn snapshot_rendering(&self) -> bool {
        self.snapshot_rendering
    }

    fn create_render_target(
        &mut self,
        _name: &str,
        descriptor: &RenderTargetDescriptor,
    ) -> EngineResult<RenderTargetId> {
        let size = descriptor.size;
        let max = self.caps.max_render_target_size;
        if size.width > max || size.height > max {
            return Err(EngineError::SizeExceedsLimit {
                width: size.width,
                height: size.height,
                max,
            });
        }
        if descriptor.attachment_count > self.caps.max_draw_buffers {
            return Err(EngineError::TooManyAttachments {
                requested: descriptor.attachment_count,
                max: self.caps.max_draw_buffers,
            });
        }
        let id = RenderTargetId(self.next_target);
        self.next_target += 1;
        self.live_targets.push(id);
        self.calls.push(GpuCall::CreateRenderTarget {
            id,
            kind: descriptor.kind,
            width: size.width,
            height: size.height,
            layers: size.layers,
            attachments: descriptor.attachment_count,
        });
        Ok(id)
    }

    fn release_render_target(&mut self, id: RenderTargetId) {
        let Some(position) = self.live_targets.iter().position(|t| *t == id) else {
            warn!("release of unknown render target {:?}", id);
            return;
        };
        self.live_targets.remove(position);
        self.calls.push(GpuCall::ReleaseRenderTarget { id });
    }

    fn bind_framebuffer(&mut self, id: RenderTargetId, face: u32, layer: u32) {
        self.bound = Some(id);
        self.calls.push(GpuCall::BindFramebuffer { id, face, layer });
    }

    fn unbind_framebuffer(&mut self, id: RenderTargetId) {
        if self.bound == Some(id) {
            self.bound = None;
        }
        self.calls.push(GpuCall::UnbindFramebuffer { id });
    }

    fn restore_default_framebuffer(&mut self) {
        self.bound = None;
        self.calls.push(GpuCall::RestoreDefaultFramebuffer);
    }

    fn generate_mip_maps(&mut self, id: RenderTargetId) {
        self.calls.push(GpuCall::GenerateMipMaps { id });
    }

    fn bind_attachments(&mut self, layout: &AttachmentLayout) {
        self.calls.push(GpuCall::BindAttachments {
            slots: layout.slots().to_vec(),
        });
    }

    fn clear(&mut self, color: Option<Color4>, back_buffer: bool, depth: bool, stencil: bool) {
        self.calls.push(GpuCall::Clear {
            color,
            back_buffer,
            depth,
            stencil,
        });
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.calls.push(GpuCall::SetViewport { viewport });
    }

    fn create_render_pass_id(&mut self, _name: &str) -> RenderPassId {
        let id = RenderPassId(self.next_pass_id);
        self.next_pass_id += 1;
        self.created_pass_ids += 1;
        self.calls.push(GpuCall::CreateRenderPassId { id });
        id
    }

    fn release_render_pass_id(&mut self, id: RenderPassId) {
        self.released_pass_ids += 1;
        self.calls.push(GpuCall::ReleaseRenderPassId { id });
    }

    fn current_render_pass_id(&self) -> RenderPassId {
        self.current_pass
    }

    fn set_current_render_pass_id(&mut self, id: RenderPassId) {
        self.current_pass = id;
        self.calls.push(GpuCall::SetRenderPassId { id });
    }

    fn create_effect(&mut self, name: &str) -> EffectId {
        if let Some(existing) = self.find_effect(name) {
            return existing;
        }
        let id = EffectId(self.effects.len() as u32);
        self.effects.push(EffectSlot {
            name: name.to_owned(),
            ready: self.effects_ready_by_default,
        });
        self.calls.push(GpuCall::CreateEffect {
            id,
            name: name.to_owned(),
        });
        id
    }

    fn is_effect_ready(&self, id: EffectId) -> bool {
        self.effects
            .get(id.0 as usize)
            .map(|slot| slot.ready)
            .unwrap_or(false)
    }

    fn enable_effect(&mut self, id: EffectId) {
        self.calls.push(GpuCall::EnableEffect { id });
    }

    fn set_effect_texture(&mut self, effect: EffectId, sampler: &str, texture: TextureView) {
        self.calls.push(GpuCall::SetEffectTexture {
            effect,
            sampler: sampler.to_owned(),
            texture,
        });
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.calls.push(GpuCall::SetDepthTest { enabled });
    }

    fn set_depth_write(&mut self, enabled: bool) {
        self.calls.push(GpuCall::SetDepthWrite { enabled });
    }

    fn set_alpha_mode(&mut self, mode: AlphaMode) {
        self.calls.push(GpuCall::SetAlphaMode { mode });
    }

    fn set_alpha_equation(&mut self, equation: AlphaEquation) {
        self.calls.push(GpuCall::SetAlphaEquation { equation });
    }

    fn apply_states(&mut self) {
        self.calls.push(GpuCall::ApplyStates);
    }

    fn draw_indexed(&mut self, index_start: u32, index_count: u32, instance_count: u32) {
        self.calls.push(GpuCall::DrawIndexed {
            index_start,
            index_count,
            instance_count,
        });
    }

    fn draw_fullscreen(&mut self, effect: EffectId) {
        self.calls.push(GpuCall::DrawFullscreen { effect });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RenderTargetSize;

    fn simple_descriptor() -> RenderTargetDescriptor {
        RenderTargetDescriptor {
            kind: RenderTargetKind::Simple,
            size: RenderTargetSize::new(64, 64),
            attachment_count: 1,
            generate_mip_maps: false,
        }
    }

    #[test]
    fn render_pass_ids_are_counted() {
        let mut engine = NullEngine::new();
        let a = engine.create_render_pass_id("a");
        let b = engine.create_render_pass_id("b");
        assert_ne!(a, b);
        assert_eq!(engine.outstanding_render_pass_ids(), 2);
        engine.release_render_pass_id(a);
        assert_eq!(engine.outstanding_render_pass_ids(), 1);
    }

    #[test]
    fn target_creation_respects_size_limit() {
        let mut engine = NullEngine::with_caps(EngineCapabilities {
            max_render_target_size: 32,
            ..EngineCapabilities::default()
        });
        let result = engine.create_render_target("too big", &simple_descriptor());
        assert!(result.is_err());
        assert_eq!(engine.live_render_targets(), 0);
    }

    #[test]
    fn attachment_count_is_capped() {
        let mut engine = NullEngine::with_caps(EngineCapabilities {
            max_draw_buffers: 2,
            ..EngineCapabilities::default()
        });
        let mut descriptor = simple_descriptor();
        descriptor.attachment_count = 3;
        assert!(engine.create_render_target("mrt", &descriptor).is_err());
    }

    #[test]
    fn effects_deduplicate_by_name() {
        let mut engine = NullEngine::new();
        let a = engine.create_effect("standard");
        let b = engine.create_effect("standard");
        assert_eq!(a, b);
        assert_eq!(engine.find_effect("standard"), Some(a));
    }

    #[test]
    fn effect_readiness_can_be_toggled() {
        let mut engine = NullEngine::new();
        let effect = engine.create_effect("standard");
        assert!(engine.is_effect_ready(effect));
        engine.set_effect_ready(effect, false);
        assert!(!engine.is_effect_ready(effect));
    }

    #[test]
    fn calls_record_in_submission_order() {
        let mut engine = NullEngine::new();
        let target = engine
            .create_render_target("rt", &simple_descriptor())
            .unwrap();
        engine.bind_framebuffer(target, 0, 0);
        engine.clear(Some(Color4::TRANSPARENT_BLACK), true, true, true);
        engine.unbind_framebuffer(target);
        let kinds: Vec<_> = engine
            .calls()
            .iter()
            .map(|call| std::mem::discriminant(call))
            .collect();
        assert_eq!(kinds.len(), 4);
        assert_eq!(engine.bound_framebuffer(), None);
    }
}
