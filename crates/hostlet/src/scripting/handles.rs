//! Per-component table of objects reachable from script.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::object::GuestObject;
use crate::lock::lock;

/// Small integer naming one object reachable from script.
///
/// Handle 0 always denotes the component itself and never enters a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(u64);

impl ObjectHandle {
    pub const COMPONENT: ObjectHandle = ObjectHandle(0);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_component(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
struct TableInner {
    next: u64,
    by_handle: HashMap<ObjectHandle, GuestObject>,
    by_identity: HashMap<usize, ObjectHandle>,
}

/// Handle-to-object mapping owned by one component.
///
/// Handing out the same object twice yields the same handle for as long as
/// the entry lives. Fresh handles come from a counter, so two live handles
/// never collide. The lock is held only for a single lookup or mutation.
#[derive(Default)]
pub struct ObjectHandleTable {
    inner: Mutex<TableInner>,
}

fn identity(object: &GuestObject) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

impl ObjectHandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object, reusing its handle if it is already present.
    pub fn insert(&self, object: GuestObject) -> ObjectHandle {
        let mut inner = lock(&self.inner);
        let key = identity(&object);
        if let Some(handle) = inner.by_identity.get(&key) {
            return *handle;
        }
        inner.next += 1;
        let handle = ObjectHandle(inner.next);
        inner.by_identity.insert(key, handle);
        inner.by_handle.insert(handle, object);
        handle
    }

    pub fn get(&self, handle: ObjectHandle) -> Option<GuestObject> {
        lock(&self.inner).by_handle.get(&handle).cloned()
    }

    /// Drop one entry. Handle 0 is never removable.
    pub fn remove(&self, handle: ObjectHandle) -> bool {
        if handle.is_component() {
            return false;
        }
        let mut inner = lock(&self.inner);
        match inner.by_handle.remove(&handle) {
            Some(object) => {
                inner.by_identity.remove(&identity(&object));
                true
            }
            None => false,
        }
    }

    /// Release every entry at once (component destruction).
    pub fn clear(&self) -> usize {
        let mut inner = lock(&self.inner);
        inner.by_identity.clear();
        let released = inner.by_handle.len();
        inner.by_handle.clear();
        released
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::testing::Bag;
    use std::collections::HashSet;

    #[test]
    fn same_object_reuses_its_handle() {
        let table = ObjectHandleTable::new();
        let obj: GuestObject = Arc::new(Bag::new("Point"));
        let first = table.insert(obj.clone());
        let second = table.insert(obj);
        assert_eq!(first, second);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn live_handles_are_unique_and_never_zero() {
        let table = ObjectHandleTable::new();
        let mut seen = HashSet::new();
        let mut keep = Vec::new();
        for _ in 0..100 {
            let obj: GuestObject = Arc::new(Bag::new("Item"));
            let handle = table.insert(obj.clone());
            keep.push(obj);
            assert!(!handle.is_component());
            assert!(seen.insert(handle), "duplicate handle {handle}");
        }
    }

    #[test]
    fn removed_handle_is_no_longer_resolvable() {
        let table = ObjectHandleTable::new();
        let handle = table.insert(Arc::new(Bag::new("Item")));
        assert!(table.get(handle).is_some());
        assert!(table.remove(handle));
        assert!(table.get(handle).is_none());
        assert!(!table.remove(handle));
    }

    #[test]
    fn removed_handle_is_not_reissued() {
        let table = ObjectHandleTable::new();
        let first = table.insert(Arc::new(Bag::new("A")));
        table.remove(first);
        let second = table.insert(Arc::new(Bag::new("B")));
        assert_ne!(first, second);
    }

    #[test]
    fn component_handle_cannot_be_removed() {
        let table = ObjectHandleTable::new();
        assert!(!table.remove(ObjectHandle::COMPONENT));
    }

    #[test]
    fn clear_releases_everything() {
        let table = ObjectHandleTable::new();
        table.insert(Arc::new(Bag::new("A")));
        table.insert(Arc::new(Bag::new("B")));
        assert_eq!(table.clear(), 2);
        assert!(table.is_empty());
    }
}
