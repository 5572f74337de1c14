// Observer lists used by the scene and render targets to expose frame
// lifecycle hooks. Callbacks run synchronously, in registration order.

use crate::engine::Engine;

/// Mutable state threaded through a notification pass.
pub struct EventState {
    /// When set by a callback, the remaining observers are not notified.
    pub skip_next_observers: bool,
    /// The mask the notification was raised with.
    pub mask: i64,
}

/// Token returned by [`Observable::add`], used to unregister the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observer {
    id: u64,
}

struct Entry<T> {
    id: u64,
    mask: i64,
    once: bool,
    callback: Box<dyn FnMut(&mut T, &mut EventState)>,
}

/// An ordered list of callbacks notified with a mutable payload.
pub struct Observable<T> {
    entries: Vec<Entry<T>>,
    next_id: u64,
}

impl<T> Observable<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    pub fn add<F>(&mut self, callback: F) -> Observer
    where
        F: FnMut(&mut T, &mut EventState) + 'static,
    {
        self.add_with_mask(callback, -1)
    }

    /// Registers a callback that only fires when the notification mask
    /// intersects `mask`.
    pub fn add_with_mask<F>(&mut self, callback: F, mask: i64) -> Observer
    where
        F: FnMut(&mut T, &mut EventState) + 'static,
    {
        self.push_entry(Box::new(callback), mask, false)
    }

    /// Registers a callback removed after its first invocation.
    pub fn add_once<F>(&mut self, callback: F) -> Observer
    where
        F: FnMut(&mut T, &mut EventState) + 'static,
    {
        self.push_entry(Box::new(callback), -1, true)
    }

    fn push_entry(
        &mut self,
        callback: Box<dyn FnMut(&mut T, &mut EventState)>,
        mask: i64,
        once: bool,
    ) -> Observer {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            mask,
            once,
            callback,
        });
        Observer { id }
    }

    pub fn remove(&mut self, observer: Observer) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != observer.id);
        self.entries.len() != before
    }

    pub fn has_observers(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn notify_observers(&mut self, data: &mut T) -> bool {
        self.notify_observers_with_mask(data, -1)
    }

    /// Notifies observers whose registration mask intersects `mask`.
    /// Returns false when a callback short-circuited the pass.
    pub fn notify_observers_with_mask(&mut self, data: &mut T, mask: i64) -> bool {
        let mut state = EventState {
            skip_next_observers: false,
            mask,
        };
        let mut index = 0;
        while index < self.entries.len() {
            if self.entries[index].mask & mask == 0 {
                index += 1;
                continue;
            }
            (self.entries[index].callback)(data, &mut state);
            if self.entries[index].once {
                self.entries.remove(index);
            } else {
                index += 1;
            }
            if state.skip_next_observers {
                return false;
            }
        }
        true
    }
}

impl<T> Default for Observable<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct EngineEntry {
    id: u64,
    once: bool,
    callback: Box<dyn for<'a> FnMut(&mut (dyn Engine + 'a), &mut EventState)>,
}

/// Hook list for callbacks handed the engine itself, e.g. a custom clear.
/// [`Observable`] cannot carry the engine as its payload: the payload type
/// would pin one lifetime, while the engine is reborrowed per notification.
pub struct EngineObservable {
    entries: Vec<EngineEntry>,
    next_id: u64,
}

impl EngineObservable {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    pub fn add<F>(&mut self, callback: F) -> Observer
    where
        F: for<'a> FnMut(&mut (dyn Engine + 'a), &mut EventState) + 'static,
    {
        self.push_entry(Box::new(callback), false)
    }

    /// Registers a callback removed after its first invocation.
    pub fn add_once<F>(&mut self, callback: F) -> Observer
    where
        F: for<'a> FnMut(&mut (dyn Engine + 'a), &mut EventState) + 'static,
    {
        self.push_entry(Box::new(callback), true)
    }

    fn push_entry(
        &mut self,
        callback: Box<dyn for<'a> FnMut(&mut (dyn Engine + 'a), &mut EventState)>,
        once: bool,
    ) -> Observer {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(EngineEntry { id, once, callback });
        Observer { id }
    }

    pub fn remove(&mut self, observer: Observer) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != observer.id);
        self.entries.len() != before
    }

    pub fn has_observers(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns false when a callback short-circuited the pass.
    pub fn notify_observers(&mut self, engine: &mut dyn Engine) -> bool {
        let mut state = EventState {
            skip_next_observers: false,
            mask: -1,
        };
        let mut index = 0;
        while index < self.entries.len() {
            (self.entries[index].callback)(engine, &mut state);
            if self.entries[index].once {
                self.entries.remove(index);
            } else {
                index += 1;
            }
            if state.skip_next_observers {
                return false;
            }
        }
        true
    }
}

impl Default for EngineObservable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn observers_run_in_registration_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut observable: Observable<u32> = Observable::new();
        for tag in 0..3 {
            let order = order.clone();
            observable.add(move |_, _| order.borrow_mut().push(tag));
        }
        observable.notify_observers(&mut 0);
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn once_observers_fire_a_single_time() {
        let count = Rc::new(RefCell::new(0));
        let mut observable: Observable<u32> = Observable::new();
        let counter = count.clone();
        observable.add_once(move |_, _| *counter.borrow_mut() += 1);
        observable.notify_observers(&mut 0);
        observable.notify_observers(&mut 0);
        assert_eq!(*count.borrow(), 1);
        assert!(!observable.has_observers());
    }

    #[test]
    fn skip_next_observers_stops_the_pass() {
        let hits = Rc::new(RefCell::new(0));
        let mut observable: Observable<u32> = Observable::new();
        observable.add(|_, state| state.skip_next_observers = true);
        let counter = hits.clone();
        observable.add(move |_, _| *counter.borrow_mut() += 1);
        let completed = observable.notify_observers(&mut 0);
        assert!(!completed);
        assert_eq!(*hits.borrow(), 0);
    }

    #[test]
    fn mask_filters_observers() {
        let hits = Rc::new(RefCell::new(Vec::new()));
        let mut observable: Observable<u32> = Observable::new();
        for group in 0..3 {
            let hits = hits.clone();
            observable.add_with_mask(move |_, _| hits.borrow_mut().push(group), 1 << group);
        }
        observable.notify_observers_with_mask(&mut 0, 1 << 1);
        assert_eq!(*hits.borrow(), vec![1]);
    }

    #[test]
    fn removed_observers_do_not_fire() {
        let count = Rc::new(RefCell::new(0));
        let mut observable: Observable<u32> = Observable::new();
        let counter = count.clone();
        let token = observable.add(move |_, _| *counter.borrow_mut() += 1);
        assert!(observable.remove(token));
        assert!(!observable.remove(token));
        observable.notify_observers(&mut 0);
        assert_eq!(*count.borrow(), 0);
    }

    #[test]
    fn payload_is_mutable() {
        let mut observable: Observable<u32> = Observable::new();
        observable.add(|value, _| *value += 5);
        let mut payload = 1;
        observable.notify_observers(&mut payload);
        assert_eq!(payload, 6);
    }

    #[test]
    fn engine_hooks_borrow_the_engine_per_pass() {
        use crate::engine::null::{GpuCall, NullEngine};

        let mut engine = NullEngine::new();
        let mut hooks = EngineObservable::new();
        hooks.add(|engine, _| engine.apply_states());
        let token = hooks.add_once(|engine, _| engine.set_depth_test(false));

        hooks.notify_observers(&mut engine);
        hooks.notify_observers(&mut engine);
        let depth_toggles = engine
            .calls()
            .iter()
            .filter(|call| matches!(call, GpuCall::SetDepthTest { .. }))
            .count();
        assert_eq!(depth_toggles, 1);
        assert!(!hooks.remove(token));
        assert!(hooks.has_observers());
    }
}
