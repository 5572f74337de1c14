/// Counters accumulated over one `Scene::render` call.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameStats {
    pub total_vertices: u32,
    pub active_indices: u32,
    pub active_bones: u32,
    pub active_particles: u32,
    pub active_meshes: u32,
    pub draw_calls: u32,
    pub render_target_renders: u32,
    pub evaluation_ms: f32,
    pub render_targets_ms: f32,
}

impl FrameStats {
    pub fn reset(&mut self) {
        *self = FrameStats::default();
    }
}
