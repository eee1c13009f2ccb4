use std::{
    hash::Hash,
    mem,
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
};

use lru::LruCache;

pub const DEFAULT_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(512) {
    Some(n) => n,
    None => unreachable!(),
};

/// Bounded memo of tree structure for one root generation
///
/// Entries are only meaningful while the tree keeps the same root: installing a different root
/// drops everything.
pub struct NodeCache<N: Hash + Eq> {
    capacity: NonZeroUsize,
    children: LruCache<(N, usize), N>,
    indices: LruCache<N, usize>,
    parents: LruCache<N, N>,
    root: Option<N>,
}

impl<N: Hash + Eq + Clone> NodeCache<N> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        NodeCache {
            capacity,
            children: LruCache::new(capacity),
            indices: LruCache::new(capacity),
            parents: LruCache::new(capacity),
            root: None,
        }
    }

    pub fn root(&self) -> Option<&N> {
        self.root.as_ref()
    }

    pub fn is_root(&self, node: &N) -> bool {
        self.root.as_ref() == Some(node)
    }

    /// Install `root`, starting a new generation when it differs from the current one
    ///
    /// Returns `true` when the backing maps had to be reallocated.
    pub fn set_root(&mut self, root: N) -> bool {
        let mut reallocated = false;
        if self.root.as_ref().map_or(false, |r| r != &root) {
            reallocated = self.clear();
        }
        self.root = Some(root);
        reallocated
    }

    pub fn parent(&mut self, node: &N) -> Option<N> {
        self.parents.get(node).cloned()
    }

    pub fn child(&mut self, node: &N, index: usize) -> Option<N> {
        // the key owns its node, so a lookup needs a clone
        self.children.get(&(node.clone(), index)).cloned()
    }

    pub fn index(&mut self, node: &N) -> Option<usize> {
        self.indices.get(node).copied()
    }

    /// Record `child` at `index` under `parent`, which also fixes the child's parent and index
    pub fn insert_child(&mut self, parent: N, index: usize, child: N) {
        self.parents.put(child.clone(), parent.clone());
        self.indices.put(child.clone(), index);
        self.children.put((parent, index), child);
    }

    pub fn insert_parent(&mut self, node: N, parent: N) {
        self.parents.put(node, parent);
    }

    pub fn insert_index(&mut self, node: N, index: usize) {
        self.indices.put(node, index);
    }

    pub fn len(&self) -> usize {
        self.children.len() + self.indices.len() + self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything, including the root
    ///
    /// Dropping host nodes runs host code, which may panic on a tree that changed underneath
    /// us. In that case the maps are replaced with fresh ones and `true` is returned.
    pub fn clear(&mut self) -> bool {
        let cleared = panic::catch_unwind(AssertUnwindSafe(|| {
            drop(self.root.take());
            self.children.clear();
            self.indices.clear();
            self.parents.clear();
        }));
        if cleared.is_ok() {
            return false;
        }
        // half torn down maps are leaked, dropping them again could panic again
        mem::forget(mem::replace(
            &mut self.children,
            LruCache::new(self.capacity),
        ));
        mem::forget(mem::replace(&mut self.indices, LruCache::new(self.capacity)));
        mem::forget(mem::replace(&mut self.parents, LruCache::new(self.capacity)));
        true
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn cache() -> NodeCache<u32> {
        NodeCache::new(NonZeroUsize::new(4).unwrap())
    }

    #[test]
    fn test_insert_child_fixes_parent_and_index() {
        let mut c = cache();
        c.insert_child(1, 2, 7);
        assert_eq!(c.child(&1, 2), Some(7));
        assert_eq!(c.parent(&7), Some(1));
        assert_eq!(c.index(&7), Some(2));
        assert_eq!(c.child(&1, 0), None);
    }

    #[test]
    fn test_bounded() {
        let mut c = cache();
        for i in 0..10 {
            c.insert_index(i, i as usize);
        }
        assert_eq!(c.index(&0), None);
        assert_eq!(c.index(&9), Some(9));
        assert_eq!(c.len(), 4);
    }

    #[test]
    fn test_new_root_starts_new_generation() {
        let mut c = cache();
        c.set_root(0);
        c.insert_parent(5, 0);
        c.set_root(0);
        assert_eq!(c.parent(&5), Some(0));

        c.set_root(100);
        assert!(c.is_root(&100));
        assert_eq!(c.parent(&5), None);
        assert!(c.is_empty());
    }

    thread_local! {
        static ARMED: Cell<bool> = Cell::new(false);
    }

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Fragile(u32);

    impl Drop for Fragile {
        fn drop(&mut self) {
            if ARMED.with(|a| a.replace(false)) {
                panic!("node handle dropped after the tree went away");
            }
        }
    }

    #[test]
    fn test_clear_survives_panicking_nodes() {
        let mut c = NodeCache::new(NonZeroUsize::new(4).unwrap());
        c.insert_child(Fragile(1), 0, Fragile(2));
        c.set_root(Fragile(1));

        ARMED.with(|a| a.set(true));
        assert!(c.clear());
        ARMED.with(|a| a.set(false));

        assert!(c.is_empty());
        assert!(c.root().is_none());
        c.insert_parent(Fragile(3), Fragile(4));
        assert_eq!(c.parent(&Fragile(3)), Some(Fragile(4)));
    }
}
