use crate::store::Handle;

pub type SkeletonHandle = Handle<Skeleton>;

/// Bone hierarchy shared by one or more meshes.
///
/// Bone matrices themselves live with the animation system; the frame loop
/// only needs the bone count for stats and a once-per-render-pass `prepare`.
pub struct Skeleton {
    pub name: String,
    pub bone_count: u32,
    prepared_render_id: Option<u64>,
    prepare_count: u64,
}

impl Skeleton {
    pub fn new(name: impl Into<String>, bone_count: u32) -> Self {
        Self {
            name: name.into(),
            bone_count,
            prepared_render_id: None,
            prepare_count: 0,
        }
    }

    /// Uploads bone matrices for this render pass. Deduplicated: meshes
    /// sharing a skeleton trigger the real work only once per render id.
    pub fn prepare(&mut self, render_id: u64) -> bool {
        if self.prepared_render_id == Some(render_id) {
            return false;
        }
        self.prepared_render_id = Some(render_id);
        self.prepare_count += 1;
        true
    }

    pub fn prepare_count(&self) -> u64 {
        self.prepare_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_deduplicates_within_render_pass() {
        let mut skeleton = Skeleton::new("rig", 12);
        assert!(skeleton.prepare(7));
        assert!(!skeleton.prepare(7));
        assert_eq!(skeleton.prepare_count(), 1);
    }

    #[test]
    fn prepare_runs_again_next_pass() {
        let mut skeleton = Skeleton::new("rig", 12);
        skeleton.prepare(1);
        assert!(skeleton.prepare(2));
        assert_eq!(skeleton.prepare_count(), 2);
    }
}
