use glam::Vec3;

use crate::engine::{AlphaMode, EffectId, Engine};
use crate::scene::mesh::{Mesh, MeshHandle};
use crate::store::Pool;

/// Where new particles spawn from. Mesh emitters tie the system's liveness
/// to the mesh being enabled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParticleEmitter {
    Point(Vec3),
    Mesh(MeshHandle),
}

pub struct ParticleSystem {
    pub name: String,
    pub emitter: Option<ParticleEmitter>,
    pub rendering_group_id: u32,
    pub blend_mode: AlphaMode,
    pub effect: Option<EffectId>,
    /// Live particle count, advanced by the host simulation.
    pub active_count: u32,
    started: bool,
    animate_calls: u64,
}

impl ParticleSystem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            emitter: None,
            rendering_group_id: 0,
            blend_mode: AlphaMode::Combine,
            effect: None,
            active_count: 0,
            started: false,
            animate_calls: 0,
        }
    }

    pub fn start(&mut self) {
        self.started = true;
    }

    pub fn stop(&mut self) {
        self.started = false;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Started systems with no emitter, or a disabled mesh emitter, sit out
    /// the frame.
    pub(crate) fn is_emitting(&self, meshes: &Pool<Mesh>) -> bool {
        if !self.started {
            return false;
        }
        match self.emitter {
            None => false,
            Some(ParticleEmitter::Point(_)) => true,
            Some(ParticleEmitter::Mesh(handle)) => {
                meshes.get(handle).is_some_and(|mesh| mesh.enabled)
            }
        }
    }

    pub fn animate(&mut self) {
        self.animate_calls += 1;
    }

    pub fn animate_calls(&self) -> u64 {
        self.animate_calls
    }

    /// Draws the live quads. Returns how many particles were rendered.
    pub fn render(&mut self, engine: &mut dyn Engine) -> u32 {
        let Some(effect) = self.effect else {
            return 0;
        };
        if self.active_count == 0 || !engine.is_effect_ready(effect) {
            return 0;
        }
        engine.enable_effect(effect);
        engine.set_alpha_mode(self.blend_mode);
        engine.draw_indexed(0, self.active_count * 6, 1);
        self.active_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::null::NullEngine;

    #[test]
    fn emitting_requires_start_and_live_emitter() {
        let mut meshes: Pool<Mesh> = Pool::new();
        let emitter = meshes.add(Mesh::new("emitter"));

        let mut system = ParticleSystem::new("smoke");
        system.emitter = Some(ParticleEmitter::Mesh(emitter));
        assert!(!system.is_emitting(&meshes));

        system.start();
        assert!(system.is_emitting(&meshes));

        meshes.get_mut(emitter).unwrap().enabled = false;
        assert!(!system.is_emitting(&meshes));

        system.emitter = Some(ParticleEmitter::Point(Vec3::ZERO));
        assert!(system.is_emitting(&meshes));
    }

    #[test]
    fn render_skips_without_ready_effect() {
        let mut engine = NullEngine::new();
        let mut system = ParticleSystem::new("smoke");
        system.active_count = 8;
        assert_eq!(system.render(&mut engine), 0);

        let effect = engine.create_effect("particles");
        engine.set_effect_ready(effect, false);
        system.effect = Some(effect);
        assert_eq!(system.render(&mut engine), 0);

        engine.set_effect_ready(effect, true);
        assert_eq!(system.render(&mut engine), 8);
    }
}
