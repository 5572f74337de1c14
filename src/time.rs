// Frame timing needs a monotonic clock on both native and web targets.
// std::time::Instant panics under wasm, so the web build goes through the
// `instant` shim (which reads performance.now()).

#[cfg(not(target_arch = "wasm32"))]
pub use std::time::Instant;

#[cfg(target_arch = "wasm32")]
pub use instant::Instant;
