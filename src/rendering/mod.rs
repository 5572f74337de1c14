// Draw-side half of the crate: dispatch buckets, group ordering, offscreen
// targets and order independent transparency. Everything here works off
// handles and the engine trait; scene evaluation decides what gets in.

pub mod depth_peeling;
pub mod group;
pub mod manager;
pub mod prepass;
pub mod render_target;

pub use depth_peeling::DepthPeelingRenderer;
pub use group::{
    back_to_front_sort_compare, default_transparent_sort_compare, front_to_back_sort_compare,
    painter_sort_compare, CustomRenderFn, DrawContext, DrawItem, RenderingGroup, SortCompare,
};
pub use manager::{
    AutoClearSetup, DispatchMode, GroupHooks, PassOptions, RenderingGroupInfo, RenderingManager,
};
pub use prepass::PrePassRenderer;
pub use render_target::{RenderListProvider, RenderTargetHandle, RenderTargetTexture};
