pub mod camera;
pub mod frame;
pub mod light;
pub mod mesh;
pub mod scene;
pub mod skeleton;
pub mod transform;

pub use camera::{Camera, CameraHandle, CameraMode, OrthoBounds};
pub use frame::FrameRenderContext;
pub use light::Light;
pub use mesh::{LodLevel, LodSelection, Mesh, MeshHandle, SubMesh};
pub use scene::{
    AbortSignal, LodSelector, MeshCandidateProvider, MeshIntersectionEvent, Scene, SceneError,
};
pub use skeleton::{Skeleton, SkeletonHandle};
pub use transform::{BillboardMode, CameraVectors, Transform};
