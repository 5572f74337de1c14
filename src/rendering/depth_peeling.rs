// rendering/depth_peeling.rs

use crate::engine::{
    AlphaEquation, AlphaMode, AttachmentLayout, Color4, EffectId, Engine, EngineResult,
    RenderPassId, RenderTargetDescriptor, RenderTargetId, RenderTargetKind, RenderTargetSize,
    TextureView,
};
use crate::scene::mesh::MeshHandle;

use super::group::{DrawContext, DrawItem, RenderingGroup};
use super::prepass::PrePassRenderer;

struct PeelingEffects {
    blend_back: EffectId,
    blend_back_ping_pong: EffectId,
    compose: EffectId,
}

/// Dual depth peeling for order independent transparency.
///
/// Two ping-ponged render targets carry a min-max depth attachment plus
/// front and back color attachments; a third target accumulates back-layer
/// colors across peels before the final full-screen composition.
pub struct DepthPeelingRenderer {
    pass_count: u32,
    use_render_passes: bool,
    depth_mrts: [Option<RenderTargetId>; 2],
    blend_back: Option<RenderTargetId>,
    depth_layout: AttachmentLayout,
    color_layout: AttachmentLayout,
    all_layout: AttachmentLayout,
    back_layout: AttachmentLayout,
    pass_ids: Vec<RenderPassId>,
    width: u32,
    height: u32,
    /// Meshes the host wants rendered with ordinary sorted blending instead.
    pub excluded_meshes: Vec<MeshHandle>,
    effects: Option<PeelingEffects>,
}

impl DepthPeelingRenderer {
    pub const DEPTH_CLEAR_VALUE: f32 = -99999.0;
    const MIN_DEPTH: f32 = 0.0;
    const MAX_DEPTH: f32 = 1.0;

    /// Written into the depth attachment before the first peel so every
    /// fragment wins the initial max blend.
    const DEPTH_CLEAR: Color4 =
        Color4::new(Self::DEPTH_CLEAR_VALUE, Self::DEPTH_CLEAR_VALUE, 0.0, 0.0);
    /// Seeds the read side of the first peel with the full depth range.
    const DEPTH_SEED: Color4 = Color4::new(-Self::MIN_DEPTH, Self::MAX_DEPTH, 0.0, 0.0);

    /// Attachment slot order inside a depth MRT.
    const FRONT_COLOR_ATTACHMENT: u32 = 1;
    const BACK_COLOR_ATTACHMENT: u32 = 2;

    /// Builds the renderer and enables the prepass stage if the scene does
    /// not carry one yet. When the device cannot host the prepass the
    /// renderer stays permanently disabled instead of failing scene setup.
    pub fn new(
        engine: &mut dyn Engine,
        prepass: &mut Option<PrePassRenderer>,
        pass_count: u32,
        use_render_passes: bool,
    ) -> EngineResult<Self> {
        let mut renderer = Self {
            pass_count,
            use_render_passes,
            depth_mrts: [None, None],
            blend_back: None,
            depth_layout: AttachmentLayout::from_slots(&[true, false, false]),
            color_layout: AttachmentLayout::from_slots(&[false, true, true]),
            all_layout: AttachmentLayout::from_slots(&[true, true, true]),
            back_layout: AttachmentLayout::from_slots(&[true]),
            pass_ids: Vec::new(),
            width: 0,
            height: 0,
            excluded_meshes: Vec::new(),
            effects: None,
        };

        if prepass.is_none() {
            match PrePassRenderer::try_new(engine) {
                Some(stage) => *prepass = Some(stage),
                None => {
                    log::warn!(
                        "depth peeling could not enable the prepass stage, transparency falls back to sorted blending"
                    );
                    return Ok(renderer);
                }
            }
        }

        renderer.create_textures(engine)?;
        renderer.effects = Some(PeelingEffects {
            blend_back: engine.create_effect("oitBackBlend"),
            blend_back_ping_pong: engine.create_effect("oitBackBlendPingPong"),
            compose: engine.create_effect("oitFinal"),
        });
        renderer.create_render_pass_ids(engine);
        Ok(renderer)
    }

    pub fn enabled(&self) -> bool {
        self.effects.is_some()
    }

    pub fn pass_count(&self) -> u32 {
        self.pass_count
    }

    pub fn set_pass_count(&mut self, engine: &mut dyn Engine, count: u32) {
        if self.pass_count == count {
            return;
        }
        self.release_render_pass_ids(engine);
        self.pass_count = count;
        self.create_render_pass_ids(engine);
    }

    pub fn use_render_passes(&self) -> bool {
        self.use_render_passes
    }

    pub fn set_use_render_passes(&mut self, engine: &mut dyn Engine, enabled: bool) {
        if self.use_render_passes == enabled {
            return;
        }
        self.release_render_pass_ids(engine);
        self.use_render_passes = enabled;
        self.create_render_pass_ids(engine);
    }

    pub fn is_ready(&self, engine: &dyn Engine) -> bool {
        let Some(effects) = &self.effects else {
            return false;
        };
        engine.is_effect_ready(effects.blend_back)
            && engine.is_effect_ready(effects.blend_back_ping_pong)
            && engine.is_effect_ready(effects.compose)
    }

    fn create_textures(&mut self, engine: &mut dyn Engine) -> EngineResult<()> {
        let width = engine.render_width();
        let height = engine.render_height();
        let descriptor = RenderTargetDescriptor {
            kind: RenderTargetKind::Simple,
            size: RenderTargetSize::new(width, height),
            attachment_count: 3,
            generate_mip_maps: false,
        };
        self.depth_mrts[0] = Some(engine.create_render_target("oit depth 0", &descriptor)?);
        self.depth_mrts[1] = Some(engine.create_render_target("oit depth 1", &descriptor)?);
        let back_descriptor = RenderTargetDescriptor {
            attachment_count: 1,
            ..descriptor
        };
        self.blend_back = Some(engine.create_render_target("oit blend back", &back_descriptor)?);
        self.width = width;
        self.height = height;
        Ok(())
    }

    fn release_textures(&mut self, engine: &mut dyn Engine) {
        for slot in &mut self.depth_mrts {
            if let Some(target) = slot.take() {
                engine.release_render_target(target);
            }
        }
        if let Some(target) = self.blend_back.take() {
            engine.release_render_target(target);
        }
    }

    /// Recreates the targets when the backbuffer size changed since last use.
    fn update_textures(&mut self, engine: &mut dyn Engine) -> EngineResult<()> {
        if self.width != engine.render_width() || self.height != engine.render_height() {
            self.release_textures(engine);
            self.create_textures(engine)?;
        }
        Ok(())
    }

    fn create_render_pass_ids(&mut self, engine: &mut dyn Engine) {
        if !self.use_render_passes {
            return;
        }
        for index in 0..=self.pass_count {
            self.pass_ids
                .push(engine.create_render_pass_id(&format!("oit pass #{index}")));
        }
    }

    fn release_render_pass_ids(&mut self, engine: &mut dyn Engine) {
        for id in self.pass_ids.drain(..) {
            engine.release_render_pass_id(id);
        }
    }

    /// Peels `items` into depth layers and composites them onto the output.
    /// Items that cannot be peeled (non-triangle fill modes or explicitly
    /// excluded meshes) are handed back for ordinary sorted rendering.
    pub fn render(
        &mut self,
        engine: &mut dyn Engine,
        ctx: &mut DrawContext<'_>,
        items: &[DrawItem],
        prepass: Option<&PrePassRenderer>,
    ) -> EngineResult<Vec<DrawItem>> {
        if !self.enabled() {
            return Ok(items.to_vec());
        }
        self.update_textures(engine)?;
        if !self.is_ready(engine) {
            // Until the peeling shaders compile every item renders the
            // ordinary way rather than disappearing for a few frames.
            return Ok(items.to_vec());
        }
        let (Some(depth_0), Some(depth_1), Some(blend_back)) =
            (self.depth_mrts[0], self.depth_mrts[1], self.blend_back)
        else {
            return Ok(items.to_vec());
        };

        engine.set_viewport(ctx.viewport);

        let mut candidates = Vec::new();
        let mut excluded = Vec::new();
        for item in items {
            let triangle_fill = ctx
                .materials
                .get(item.material)
                .is_some_and(|material| material.fill_mode().is_triangle_fill());
            if triangle_fill && !self.excluded_meshes.contains(&item.mesh) {
                candidates.push(*item);
            } else {
                excluded.push(*item);
            }
        }

        if candidates.is_empty() {
            // Nothing to peel, but the output still has to end up in a
            // defined state: transparent black composed over the scene.
            engine.bind_framebuffer(depth_1, 0, 0);
            engine.bind_attachments(&self.color_layout);
            engine.clear(Some(Color4::TRANSPARENT_BLACK), true, false, false);
            engine.unbind_framebuffer(depth_1);
            engine.bind_framebuffer(blend_back, 0, 0);
            engine.bind_attachments(&self.back_layout);
            engine.clear(Some(Color4::TRANSPARENT_BLACK), true, false, false);
            engine.unbind_framebuffer(blend_back);
            self.final_compose(engine, 1, prepass);
            return Ok(excluded);
        }

        let saved_pass = engine.current_render_pass_id();
        if let Some(&first_pass) = self.pass_ids.first() {
            engine.set_current_render_pass_id(first_pass);
        }

        // Seed both ping-pong sides and the accumulator.
        engine.bind_framebuffer(depth_0, 0, 0);
        engine.bind_attachments(&self.depth_layout);
        engine.clear(Some(Self::DEPTH_CLEAR), true, false, false);
        engine.unbind_framebuffer(depth_0);

        engine.bind_framebuffer(depth_1, 0, 0);
        engine.bind_attachments(&self.depth_layout);
        engine.clear(Some(Self::DEPTH_SEED), true, false, false);
        engine.unbind_framebuffer(depth_1);

        engine.bind_framebuffer(depth_0, 0, 0);
        engine.bind_attachments(&self.color_layout);
        engine.clear(Some(Color4::TRANSPARENT_BLACK), true, false, false);
        engine.unbind_framebuffer(depth_0);

        engine.bind_framebuffer(depth_1, 0, 0);
        engine.bind_attachments(&self.color_layout);
        engine.clear(Some(Color4::TRANSPARENT_BLACK), true, false, false);
        engine.unbind_framebuffer(depth_1);

        engine.bind_framebuffer(blend_back, 0, 0);
        engine.bind_attachments(&self.back_layout);
        engine.clear(Some(Color4::TRANSPARENT_BLACK), true, false, false);
        engine.unbind_framebuffer(blend_back);

        // First pass lays down the outermost depth interval.
        engine.bind_framebuffer(depth_0, 0, 0);
        engine.bind_attachments(&self.depth_layout);
        engine.set_alpha_mode(AlphaMode::OneOne);
        engine.set_alpha_equation(AlphaEquation::Max);
        engine.set_depth_write(false);
        engine.set_depth_test(true);
        engine.apply_states();
        for item in &candidates {
            RenderingGroup::draw_item(engine, ctx, item, false)?;
        }
        engine.unbind_framebuffer(depth_0);

        let mut write = 0usize;
        for pass in 0..self.pass_count {
            let read = (pass % 2) as usize;
            write = 1 - read;
            let write_target = if write == 0 { depth_0 } else { depth_1 };
            if self.use_render_passes {
                if let Some(&pass_id) = self.pass_ids.get(pass as usize + 1) {
                    engine.set_current_render_pass_id(pass_id);
                }
            }
            engine.set_viewport(ctx.viewport);

            engine.bind_framebuffer(write_target, 0, 0);
            engine.bind_attachments(&self.depth_layout);
            engine.clear(Some(Self::DEPTH_CLEAR), true, false, false);
            engine.unbind_framebuffer(write_target);

            engine.bind_framebuffer(write_target, 0, 0);
            engine.bind_attachments(&self.color_layout);
            engine.clear(Some(Color4::TRANSPARENT_BLACK), true, false, false);
            engine.unbind_framebuffer(write_target);

            engine.bind_framebuffer(write_target, 0, 0);
            engine.bind_attachments(&self.all_layout);
            engine.set_alpha_mode(AlphaMode::OneOne);
            engine.set_alpha_equation(AlphaEquation::Max);
            engine.set_depth_test(false);
            engine.apply_states();
            for item in &candidates {
                RenderingGroup::draw_item(engine, ctx, item, false)?;
            }
            engine.unbind_framebuffer(write_target);

            // Accumulate this peel's back layer under the previous ones.
            engine.bind_framebuffer(blend_back, 0, 0);
            engine.bind_attachments(&self.back_layout);
            engine.set_alpha_equation(AlphaEquation::Add);
            engine.set_alpha_mode(AlphaMode::LayerAccumulate);
            engine.apply_states();
            if let Some(effects) = &self.effects {
                let effect = if write == 0 || !self.use_render_passes {
                    effects.blend_back
                } else {
                    effects.blend_back_ping_pong
                };
                engine.set_effect_texture(
                    effect,
                    "uBackColor",
                    TextureView {
                        target: write_target,
                        attachment: Self::BACK_COLOR_ATTACHMENT,
                    },
                );
                engine.draw_fullscreen(effect);
            }
            engine.unbind_framebuffer(blend_back);
        }

        engine.set_current_render_pass_id(saved_pass);
        self.final_compose(engine, write, prepass);
        engine.set_depth_write(true);
        engine.set_depth_test(true);
        Ok(excluded)
    }

    fn final_compose(
        &self,
        engine: &mut dyn Engine,
        write: usize,
        prepass: Option<&PrePassRenderer>,
    ) {
        let (Some(effects), Some(front_target), Some(blend_back)) =
            (&self.effects, self.depth_mrts[write], self.blend_back)
        else {
            return;
        };
        match prepass.and_then(|stage| stage.custom_output()) {
            Some(output) => engine.bind_framebuffer(output, 0, 0),
            None => engine.restore_default_framebuffer(),
        }
        engine.set_alpha_mode(AlphaMode::Disable);
        engine.apply_states();
        engine.set_effect_texture(
            effects.compose,
            "uFrontColor",
            TextureView {
                target: front_target,
                attachment: Self::FRONT_COLOR_ATTACHMENT,
            },
        );
        engine.set_effect_texture(
            effects.compose,
            "uBackColor",
            TextureView {
                target: blend_back,
                attachment: 0,
            },
        );
        engine.draw_fullscreen(effects.compose);
    }

    pub fn dispose(&mut self, engine: &mut dyn Engine) {
        self.release_textures(engine);
        self.release_render_pass_ids(engine);
        self.effects = None;
    }
}
