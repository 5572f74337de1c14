use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::rendering::DispatchMode;

/// Scene tuning loaded from `settings.json` next to the host binary. Every
/// field has a serde default, so partial files stay valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneConfig {
    #[serde(default = "SceneConfig::default_depth_peeling_pass_count")]
    pub depth_peeling_pass_count: u32,
    #[serde(default)]
    pub use_render_passes: bool,
    #[serde(default)]
    pub maintain_state_between_frames: bool,
    #[serde(default = "SceneConfig::default_auto_clear")]
    pub auto_clear: bool,
    #[serde(default = "SceneConfig::default_auto_clear")]
    pub auto_clear_depth_and_stencil: bool,
    #[serde(default = "SceneConfig::default_clear_color")]
    pub clear_color: [f32; 4],
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            depth_peeling_pass_count: Self::default_depth_peeling_pass_count(),
            use_render_passes: false,
            maintain_state_between_frames: false,
            auto_clear: Self::default_auto_clear(),
            auto_clear_depth_and_stencil: Self::default_auto_clear(),
            clear_color: Self::default_clear_color(),
        }
    }
}

impl SceneConfig {
    pub fn load() -> Self {
        #[cfg(target_arch = "wasm32")]
        {
            info!("Using default scene settings for WebAssembly build");
            return Self::default();
        }

        #[cfg(not(target_arch = "wasm32"))]
        {
            Self::load_from_path("settings.json")
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<SceneConfig>(&contents) {
                Ok(config) => {
                    info!("Loaded scene settings from {:?}", path);
                    config.validate()
                }
                Err(err) => {
                    warn!(
                        "Failed to parse {:?} ({}). Falling back to default scene settings.",
                        path, err
                    );
                    SceneConfig::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Scene settings file {:?} not found. Using default settings.",
                    path
                );
                SceneConfig::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default scene settings.",
                    path, err
                );
                SceneConfig::default()
            }
        }
    }

    fn validate(mut self) -> Self {
        if self.depth_peeling_pass_count == 0 {
            warn!("Depth peeling pass count must be greater than zero. Using default value.");
            self.depth_peeling_pass_count = Self::default_depth_peeling_pass_count();
        }

        let clamped = self.clear_color.map(|channel| channel.clamp(0.0, 1.0));
        if clamped != self.clear_color {
            warn!("Clear color channels must be within [0, 1]. Clamping.");
            self.clear_color = clamped;
        }

        self
    }

    /// How the rendering manager treats dispatch buckets between frames.
    pub fn dispatch_mode(&self) -> DispatchMode {
        if self.maintain_state_between_frames {
            DispatchMode::Persistent
        } else {
            DispatchMode::PerFrameReset
        }
    }

    const fn default_depth_peeling_pass_count() -> u32 {
        5
    }

    const fn default_auto_clear() -> bool {
        true
    }

    const fn default_clear_color() -> [f32; 4] {
        [0.2, 0.2, 0.3, 1.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_replaces_invalid_values_with_defaults() {
        let invalid = SceneConfig {
            depth_peeling_pass_count: 0,
            clear_color: [2.0, -1.0, 0.5, 1.0],
            ..SceneConfig::default()
        };

        let validated = invalid.validate();

        assert_eq!(
            validated.depth_peeling_pass_count,
            SceneConfig::default().depth_peeling_pass_count
        );
        assert_eq!(validated.clear_color, [1.0, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn validate_preserves_valid_values() {
        let valid = SceneConfig {
            depth_peeling_pass_count: 3,
            use_render_passes: true,
            maintain_state_between_frames: true,
            auto_clear: false,
            auto_clear_depth_and_stencil: false,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        };

        let validated = valid.clone().validate();

        assert_eq!(validated.depth_peeling_pass_count, 3);
        assert!(validated.use_render_passes);
        assert_eq!(validated.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: SceneConfig =
            serde_json::from_str(r#"{ "depth_peeling_pass_count": 7 }"#).unwrap();

        assert_eq!(config.depth_peeling_pass_count, 7);
        assert!(config.auto_clear);
        assert!(!config.maintain_state_between_frames);
        assert_eq!(config.clear_color, SceneConfig::default().clear_color);
    }

    #[test]
    fn dispatch_mode_follows_the_state_flag() {
        assert_eq!(
            SceneConfig::default().dispatch_mode(),
            DispatchMode::PerFrameReset
        );

        let persistent = SceneConfig {
            maintain_state_between_frames: true,
            ..SceneConfig::default()
        };
        assert_eq!(persistent.dispatch_mode(), DispatchMode::Persistent);
    }
}
