use crate::engine::{AlphaMode, EffectId, Engine};

/// Batch of screen-aligned quads rendered in one draw.
pub struct SpriteManager {
    pub name: String,
    pub layer_mask: u32,
    pub rendering_group_id: u32,
    pub sprite_count: u32,
    pub effect: Option<EffectId>,
}

impl SpriteManager {
    pub fn new(name: impl Into<String>, sprite_count: u32) -> Self {
        Self {
            name: name.into(),
            layer_mask: 0x0FFF_FFFF,
            rendering_group_id: 0,
            sprite_count,
            effect: None,
        }
    }

    pub fn render(&mut self, engine: &mut dyn Engine) {
        let Some(effect) = self.effect else {
            return;
        };
        if self.sprite_count == 0 || !engine.is_effect_ready(effect) {
            return;
        }
        engine.enable_effect(effect);
        engine.set_alpha_mode(AlphaMode::Combine);
        engine.draw_indexed(0, self.sprite_count * 6, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::null::{GpuCall, NullEngine};

    #[test]
    fn render_draws_one_quad_batch() {
        let mut engine = NullEngine::new();
        let effect = engine.create_effect("sprites");
        let mut manager = SpriteManager::new("hud", 3);
        manager.effect = Some(effect);
        engine.clear_calls();

        manager.render(&mut engine);
        assert!(engine.calls().contains(&GpuCall::DrawIndexed {
            index_start: 0,
            index_count: 18,
            instance_count: 1,
        }));
    }
}
