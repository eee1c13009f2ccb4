use slog::Logger;

use super::{
    absorb, AttrValue, FastQuery, NodeAttr, Transform, TreeAdapter, MAX_CHILD_SIZE,
    MAX_DESCENDANTS_SIZE,
};

/// [`Transform`] that asks the host every time
///
/// Cheaper than [`super::CachedTransform`] for selectors that never revisit a node.
pub struct DirectTransform<'a, A: TreeAdapter> {
    adapter: &'a A,
    logger: Logger,
}

impl<'a, A: TreeAdapter> DirectTransform<'a, A> {
    pub fn new(adapter: &'a A, logger: Logger) -> Self {
        DirectTransform { adapter, logger }
    }
}

impl<A: TreeAdapter> Transform for DirectTransform<'_, A> {
    type Node = A::Node;

    fn root(&self) -> Option<A::Node> {
        absorb(&self.logger, "root", &"-", self.adapter.root()).flatten()
    }

    fn parent(&self, node: &A::Node) -> Option<A::Node> {
        absorb(&self.logger, "parent", node, self.adapter.parent(node)).flatten()
    }

    fn child(&self, node: &A::Node, index: usize) -> Option<A::Node> {
        absorb(&self.logger, "child", node, self.adapter.child(node, index)).flatten()
    }

    fn child_count(&self, node: &A::Node) -> usize {
        absorb(&self.logger, "child_count", node, self.adapter.child_count(node)).unwrap_or(0)
    }

    fn index(&self, node: &A::Node) -> Option<usize> {
        let Some(parent) = self.parent(node) else {
            return Some(0);
        };
        let count = self.child_count(&parent).min(MAX_CHILD_SIZE);
        (0..count).find(|&i| self.child(&parent, i).as_ref() == Some(node))
    }

    fn depth(&self, node: &A::Node) -> usize {
        std::iter::successors(self.parent(node), |n| self.parent(n))
            .take(MAX_DESCENDANTS_SIZE)
            .count()
    }

    fn attr(&self, node: &A::Node, attr: NodeAttr) -> AttrValue {
        absorb(&self.logger, "attr", node, self.adapter.attr(node, attr)).unwrap_or(AttrValue::Null)
    }

    fn host_fast_query(&self, node: &A::Node, keys: &[FastQuery]) -> Option<Vec<A::Node>> {
        absorb(&self.logger, "fast_query", node, self.adapter.fast_query(node, keys)).flatten()
    }
}
