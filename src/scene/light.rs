use glam::Vec3;

/// Light source kept on the scene for hosts and materials to read.
///
/// The frame loop never consumes lights directly; material binding does,
/// through the dirty-flag path when one changes.
pub struct Light {
    pub name: String,
    pub enabled: bool,
    pub position: Vec3,
    pub intensity: f32,
    pub range: f32,
}

impl Light {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            position: Vec3::ZERO,
            intensity: 1.0,
            range: f32::MAX,
        }
    }
}
