pub mod culling;
pub mod engine;
pub mod events;
pub mod material;
pub mod particles;
pub mod rendering;
pub mod scene;
pub mod settings;
pub mod sprites;
pub mod stats;
pub mod store;
pub mod time;

pub use engine::{Engine, EngineError, EngineResult, NullEngine};
pub use material::{Material, MaterialDirtyFlags, StandardMaterial};
pub use rendering::{DepthPeelingRenderer, RenderTargetTexture, RenderingManager};
pub use scene::{Camera, Mesh, Scene, SceneError};
pub use settings::SceneConfig;
pub use stats::FrameStats;

#[cfg(target_arch = "wasm32")]
pub fn init_logging() {
    // Set panic hook to get better error messages
    std::panic::set_hook(Box::new(console_error_panic_hook::hook));
    console_log::init_with_level(log::Level::Info).expect("Failed to initialize logger");
}

#[cfg(not(target_arch = "wasm32"))]
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}
