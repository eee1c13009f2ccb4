use std::{cell::RefCell, num::NonZeroUsize};

use slog::{warn, Logger};

use super::{
    absorb, AttrValue, FastQuery, NodeAttr, NodeCache, Transform, TreeAdapter,
    DEFAULT_CACHE_CAPACITY, MAX_CHILD_SIZE, MAX_DESCENDANTS_SIZE,
};

/// [`Transform`] that memoizes tree structure for the duration of one evaluation pass
///
/// Create one per pass and drop it afterwards; the host tree may have changed by the next one.
pub struct CachedTransform<'a, A: TreeAdapter> {
    adapter: &'a A,
    cache: RefCell<NodeCache<A::Node>>,
    logger: Logger,
}

impl<'a, A: TreeAdapter> CachedTransform<'a, A> {
    pub fn new(adapter: &'a A, logger: Logger) -> Self {
        Self::with_capacity(adapter, DEFAULT_CACHE_CAPACITY, logger)
    }

    pub fn with_capacity(adapter: &'a A, capacity: NonZeroUsize, logger: Logger) -> Self {
        CachedTransform {
            adapter,
            cache: RefCell::new(NodeCache::new(capacity)),
            logger,
        }
    }

    fn install_root(&self, root: A::Node) {
        if self.cache.borrow_mut().set_root(root) {
            warn!(self.logger, "node cache reinitialized after a failed clear");
        }
    }

    /// Drop every memoized entry
    pub fn clear(&self) {
        if self.cache.borrow_mut().clear() {
            warn!(self.logger, "node cache reinitialized after a failed clear");
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.borrow().len()
    }
}

impl<A: TreeAdapter> Transform for CachedTransform<'_, A> {
    type Node = A::Node;

    fn root(&self) -> Option<A::Node> {
        if let Some(root) = self.cache.borrow().root() {
            return Some(root.clone());
        }
        let root = absorb(&self.logger, "root", &"-", self.adapter.root()).flatten()?;
        self.install_root(root.clone());
        Some(root)
    }

    fn parent(&self, node: &A::Node) -> Option<A::Node> {
        {
            let mut cache = self.cache.borrow_mut();
            if let Some(parent) = cache.parent(node) {
                return Some(parent);
            }
            if cache.is_root(node) {
                return None;
            }
        }
        match absorb(&self.logger, "parent", node, self.adapter.parent(node))? {
            Some(parent) => {
                self.cache
                    .borrow_mut()
                    .insert_parent(node.clone(), parent.clone());
                Some(parent)
            }
            None => {
                // whatever has no parent is the root of the tree we are looking at now
                self.install_root(node.clone());
                None
            }
        }
    }

    fn child(&self, node: &A::Node, index: usize) -> Option<A::Node> {
        if let Some(child) = self.cache.borrow_mut().child(node, index) {
            return Some(child);
        }
        let child = absorb(&self.logger, "child", node, self.adapter.child(node, index)).flatten()?;
        self.cache
            .borrow_mut()
            .insert_child(node.clone(), index, child.clone());
        Some(child)
    }

    fn child_count(&self, node: &A::Node) -> usize {
        absorb(&self.logger, "child_count", node, self.adapter.child_count(node)).unwrap_or(0)
    }

    fn index(&self, node: &A::Node) -> Option<usize> {
        if let Some(index) = self.cache.borrow_mut().index(node) {
            return Some(index);
        }
        let Some(parent) = self.parent(node) else {
            return Some(0);
        };
        // listing the parent once memoizes every sibling's index on the way
        let count = self.child_count(&parent).min(MAX_CHILD_SIZE);
        (0..count).find(|&i| self.child(&parent, i).as_ref() == Some(node))
    }

    fn depth(&self, node: &A::Node) -> usize {
        let mut depth = 0;
        let mut current = node.clone();
        while let Some(parent) = self.parent(&current) {
            depth += 1;
            if depth >= MAX_DESCENDANTS_SIZE {
                break;
            }
            current = parent;
        }
        depth
    }

    fn attr(&self, node: &A::Node, attr: NodeAttr) -> AttrValue {
        absorb(&self.logger, "attr", node, self.adapter.attr(node, attr)).unwrap_or(AttrValue::Null)
    }

    fn host_fast_query(&self, node: &A::Node, keys: &[FastQuery]) -> Option<Vec<A::Node>> {
        absorb(&self.logger, "fast_query", node, self.adapter.fast_query(node, keys)).flatten()
    }
}
