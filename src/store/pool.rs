use super::Handle;

/// Slot-based storage for scene objects.
///
/// Entries keep their index for the lifetime of the pool, so handles never
/// dangle into a different object. Removal leaves a tombstone behind; scene
/// collections are small enough that reclaiming slots is not worth the churn.
pub struct Pool<T: ?Sized> {
    slots: Vec<Option<Box<T>>>,
}

impl<T: ?Sized> Pool<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn insert(&mut self, value: Box<T>) -> Handle<T> {
        let index = self.slots.len();
        self.slots.push(Some(value));
        Handle::new(index)
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.slots.get(handle.index()).and_then(|slot| slot.as_deref())
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index())
            .and_then(|slot| slot.as_deref_mut())
    }

    /// Temporarily removes an entry so it can be mutated while the rest of
    /// the pool stays borrowable. Pair with [`Pool::put_back`].
    pub fn take(&mut self, handle: Handle<T>) -> Option<Box<T>> {
        self.slots.get_mut(handle.index()).and_then(|slot| slot.take())
    }

    pub fn put_back(&mut self, handle: Handle<T>, value: Box<T>) {
        if let Some(slot) = self.slots.get_mut(handle.index()) {
            *slot = Some(value);
        }
    }

    pub fn remove(&mut self, handle: Handle<T>) -> Option<Box<T>> {
        self.take(handle)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|slot| slot.is_none())
    }

    /// Handles of all live entries, in insertion order.
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| Handle::new(i)))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_deref().map(|v| (Handle::new(i), v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_deref_mut().map(|v| (Handle::new(i), v)))
    }
}

impl<T> Pool<T> {
    /// Convenience insert for sized values.
    pub fn add(&mut self, value: T) -> Handle<T> {
        self.insert(Box::new(value))
    }
}

impl<T: ?Sized> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut pool: Pool<u32> = Pool::new();
        let a = pool.add(10);
        let b = pool.add(20);
        assert_eq!(pool.get(a), Some(&10));
        assert_eq!(pool.get(b), Some(&20));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn take_and_put_back_keeps_handle_valid() {
        let mut pool: Pool<u32> = Pool::new();
        let a = pool.add(7);
        let boxed = pool.take(a).unwrap();
        assert!(pool.get(a).is_none());
        pool.put_back(a, boxed);
        assert_eq!(pool.get(a), Some(&7));
    }

    #[test]
    fn removal_leaves_other_handles_intact() {
        let mut pool: Pool<u32> = Pool::new();
        let a = pool.add(1);
        let b = pool.add(2);
        pool.remove(a);
        assert!(pool.get(a).is_none());
        assert_eq!(pool.get(b), Some(&2));
        assert_eq!(pool.handles(), vec![b]);
    }

    #[test]
    fn iter_skips_tombstones() {
        let mut pool: Pool<u32> = Pool::new();
        let a = pool.add(1);
        pool.add(2);
        pool.remove(a);
        let values: Vec<u32> = pool.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![2]);
    }
}
