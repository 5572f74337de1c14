use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Typed index into a [`Pool`](super::Pool).
///
/// Handles are plain indices and stay valid for the lifetime of the pool,
/// even across removals. The type parameter keeps handles from different
/// pools from mixing.
pub struct Handle<T: ?Sized> {
    index: u32,
    _marker: PhantomData<*const T>,
}

impl<T: ?Sized> Handle<T> {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index: index as u32,
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }
}

// Manual impls: derives would put bounds on T, which rules out trait objects.
impl<T: ?Sized> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Handle<T> {}

impl<T: ?Sized> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T: ?Sized> Eq for Handle<T> {}

impl<T: ?Sized> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T: ?Sized> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.index)
    }
}

// The raw pointer in PhantomData opts out of the auto traits, but a handle
// carries no data besides the index.
unsafe impl<T: ?Sized> Send for Handle<T> {}
unsafe impl<T: ?Sized> Sync for Handle<T> {}
