//! Access to the host's node tree
//!
//! Two layers: [`TreeAdapter`] is what a host implements over its concrete (live, mutable,
//! possibly slow) tree, and [`Transform`] is what the match engine walks. The engine-facing
//! layer never fails: a host error makes the affected node or attribute absent, so a single
//! detached node fails one candidate rather than the whole match.

mod cache;
mod cached;
mod direct;

use std::{fmt::Debug, hash::Hash};

use slog::{debug, Logger};
use thiserror::Error;

pub use cache::{NodeCache, DEFAULT_CACHE_CAPACITY};
pub use cached::CachedTransform;
pub use direct::DirectTransform;

use crate::{
    eval::value::{invoke_primitive, primitive_attr, Value},
    parser::{ConnectExpression, ConnectOperator},
    schema::Symbol,
};

/// Children visited per node by any traversal
pub const MAX_CHILD_SIZE: usize = 512;
/// Nodes visited by one descendant traversal
pub const MAX_DESCENDANTS_SIZE: usize = 4096;

/// Failure reported by a host tree adapter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// The node no longer belongs to the live tree
    #[error("node is no longer attached to the tree")]
    Stale,
    #[error("host tree access failed: {0}")]
    Failed(String),
}

pub type HostResult<T> = Result<T, HostError>;

/// Attributes a host reads straight off a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeAttr {
    Id,
    Vid,
    Name,
    Text,
    Desc,
    Clickable,
    Focusable,
    Checkable,
    Checked,
    Editable,
    LongClickable,
    VisibleToUser,
    Left,
    Top,
    Right,
    Bottom,
    Width,
    Height,
}

impl NodeAttr {
    pub fn from_symbol(symbol: Symbol) -> Option<Self> {
        Some(match symbol {
            Symbol::Id => NodeAttr::Id,
            Symbol::Vid => NodeAttr::Vid,
            Symbol::ClassName => NodeAttr::Name,
            Symbol::Text => NodeAttr::Text,
            Symbol::Desc => NodeAttr::Desc,
            Symbol::Clickable => NodeAttr::Clickable,
            Symbol::Focusable => NodeAttr::Focusable,
            Symbol::Checkable => NodeAttr::Checkable,
            Symbol::Checked => NodeAttr::Checked,
            Symbol::Editable => NodeAttr::Editable,
            Symbol::LongClickable => NodeAttr::LongClickable,
            Symbol::VisibleToUser => NodeAttr::VisibleToUser,
            Symbol::Left => NodeAttr::Left,
            Symbol::Top => NodeAttr::Top,
            Symbol::Right => NodeAttr::Right,
            Symbol::Bottom => NodeAttr::Bottom,
            Symbol::Width => NodeAttr::Width,
            Symbol::Height => NodeAttr::Height,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i32),
    Str(String),
}

/// An indexed lookup key a host may answer without walking the tree
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FastQuery {
    /// `id` equal to the value
    Id(String),
    /// `vid` equal to the value
    Vid(String),
    /// `text` containing the value
    Text(String),
}

impl FastQuery {
    pub fn attr(&self) -> NodeAttr {
        match self {
            FastQuery::Id(_) => NodeAttr::Id,
            FastQuery::Vid(_) => NodeAttr::Vid,
            FastQuery::Text(_) => NodeAttr::Text,
        }
    }

    pub fn accepts(&self, value: &AttrValue) -> bool {
        let AttrValue::Str(actual) = value else {
            return false;
        };
        match self {
            FastQuery::Id(v) | FastQuery::Vid(v) => actual == v,
            FastQuery::Text(v) => actual.contains(v.as_str()),
        }
    }
}

/// A host's node tree
pub trait TreeAdapter {
    type Node: Clone + Eq + Hash + Debug;

    fn root(&self) -> HostResult<Option<Self::Node>>;
    fn parent(&self, node: &Self::Node) -> HostResult<Option<Self::Node>>;
    fn child_count(&self, node: &Self::Node) -> HostResult<usize>;
    fn child(&self, node: &Self::Node, index: usize) -> HostResult<Option<Self::Node>>;
    fn attr(&self, node: &Self::Node, attr: NodeAttr) -> HostResult<AttrValue>;

    /// Application owning the node's window
    fn app_id(&self, node: &Self::Node) -> HostResult<Option<String>>;

    /// Re-read a node that was captured earlier; `false` when it has left the tree
    fn refresh(&self, _node: &Self::Node) -> HostResult<bool> {
        Ok(true)
    }

    /// Indexed lookup: nodes of the subtree rooted at `node` (itself included), in pre-order,
    /// accepted by any of `keys`. `None` when the host has no index.
    ///
    /// Answers must stay within what a descendant walk reaches under [`MAX_CHILD_SIZE`] and
    /// [`MAX_DESCENDANTS_SIZE`], so indexed and walked queries agree on large trees.
    fn fast_query(
        &self,
        _node: &Self::Node,
        _keys: &[FastQuery],
    ) -> HostResult<Option<Vec<Self::Node>>> {
        Ok(None)
    }
}

/// Tree access as seen by the match engine
///
/// Implementors provide the primitives; traversals and value dispatch are shared so cached
/// and direct access differ only in how often they reach the host.
pub trait Transform {
    type Node: Clone + Eq + Hash + Debug;

    fn root(&self) -> Option<Self::Node>;
    fn parent(&self, node: &Self::Node) -> Option<Self::Node>;
    fn child(&self, node: &Self::Node, index: usize) -> Option<Self::Node>;
    fn child_count(&self, node: &Self::Node) -> usize;
    /// Position among the parent's children; the root is at 0
    fn index(&self, node: &Self::Node) -> Option<usize>;
    fn depth(&self, node: &Self::Node) -> usize;
    fn attr(&self, node: &Self::Node, attr: NodeAttr) -> AttrValue;
    fn host_fast_query(&self, node: &Self::Node, keys: &[FastQuery]) -> Option<Vec<Self::Node>>;

    fn children(&self, node: &Self::Node) -> Traversal<'_, Self> {
        self.traverse(ConnectOperator::Child, node, ConnectExpression::default())
    }

    /// Pre-order descendants, not including `node`
    fn descendants(&self, node: &Self::Node) -> Traversal<'_, Self> {
        self.traverse(ConnectOperator::Descendant, node, ConnectExpression::default())
    }

    /// Candidates reachable from `node` over one connector, within its offset bounds
    fn traverse(
        &self,
        operator: ConnectOperator,
        node: &Self::Node,
        expression: ConnectExpression,
    ) -> Traversal<'_, Self> {
        Traversal::new(self, operator, node, expression)
    }

    /// `node` and its descendants accepted by any key, in pre-order
    fn fast_query_descendants(&self, node: &Self::Node, keys: &[FastQuery]) -> Vec<Self::Node> {
        if let Some(found) = self.host_fast_query(node, keys) {
            return found;
        }
        std::iter::once(node.clone())
            .chain(self.descendants(node))
            .filter(|n| keys.iter().any(|k| k.accepts(&self.attr(n, k.attr()))))
            .collect()
    }

    fn get_attr(&self, target: &Value<Self::Node>, symbol: Symbol) -> Value<Self::Node> {
        match target {
            Value::Context(context) => match symbol {
                Symbol::Prev => context
                    .prev()
                    .map_or(Value::Null, |prev| Value::Context(prev.clone())),
                Symbol::Current => Value::Node(context.current().clone()),
                _ => self.node_attr(context.current(), symbol),
            },
            Value::Node(node) => self.node_attr(node, symbol),
            other => primitive_attr(other, symbol),
        }
    }

    fn node_attr(&self, node: &Self::Node, symbol: Symbol) -> Value<Self::Node> {
        match symbol {
            Symbol::Index => self
                .index(node)
                .map_or(Value::Null, |i| Value::Int(i as i32)),
            Symbol::Depth => Value::Int(self.depth(node) as i32),
            Symbol::Parent => self.parent(node).into(),
            Symbol::ChildCount => Value::Int(self.child_count(node) as i32),
            _ => NodeAttr::from_symbol(symbol)
                .map_or(Value::Null, |attr| self.attr(node, attr).into()),
        }
    }

    fn invoke(
        &self,
        target: &Value<Self::Node>,
        symbol: Symbol,
        args: &[Value<Self::Node>],
    ) -> Value<Self::Node> {
        match (target, symbol, args) {
            (Value::Node(node), Symbol::GetChild, [Value::Int(i)]) => {
                self.get_child(node, *i)
            }
            (Value::Context(context), Symbol::GetChild, [Value::Int(i)]) => {
                self.get_child(context.current(), *i)
            }
            (Value::Context(context), Symbol::GetPrev, [Value::Int(i)]) => usize::try_from(*i)
                .ok()
                .and_then(|i| context.get_prev(i))
                .map_or(Value::Null, |prev| Value::Context(prev.clone())),
            (Value::Node(_) | Value::Context(_), _, _) => Value::Null,
            (other, _, _) => invoke_primitive(other, symbol, args),
        }
    }

    fn get_child(&self, node: &Self::Node, index: i32) -> Value<Self::Node> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.child(node, i))
            .into()
    }
}

/// Lazy, bounded walk over the candidates of one connector
pub struct Traversal<'a, T: Transform + ?Sized> {
    t: &'a T,
    expression: ConnectExpression,
    /// Offset of the next candidate
    offset: usize,
    state: Walk<T::Node>,
}

enum Walk<N> {
    /// Siblings of a node, by position in `parent`
    Siblings {
        parent: N,
        origin: usize,
        forward: bool,
        count: usize,
    },
    Ancestors {
        current: N,
    },
    Children {
        parent: N,
        count: usize,
    },
    Descendants {
        stack: Vec<Frame<N>>,
    },
    Done,
}

struct Frame<N> {
    node: N,
    next: usize,
    count: Option<usize>,
}

impl<N> Frame<N> {
    fn new(node: N) -> Self {
        Frame {
            node,
            next: 0,
            count: None,
        }
    }
}

impl<'a, T: Transform + ?Sized> Traversal<'a, T> {
    fn new(
        t: &'a T,
        operator: ConnectOperator,
        node: &T::Node,
        expression: ConnectExpression,
    ) -> Self {
        let state = match operator {
            ConnectOperator::BeforeBrother | ConnectOperator::AfterBrother => {
                match (t.parent(node), t.index(node)) {
                    (Some(parent), Some(origin)) => Walk::Siblings {
                        count: t.child_count(&parent).min(MAX_CHILD_SIZE),
                        parent,
                        origin,
                        forward: operator == ConnectOperator::AfterBrother,
                    },
                    _ => Walk::Done,
                }
            }
            ConnectOperator::Ancestor => Walk::Ancestors {
                current: node.clone(),
            },
            ConnectOperator::Child => Walk::Children {
                count: t.child_count(node).min(MAX_CHILD_SIZE),
                parent: node.clone(),
            },
            ConnectOperator::Descendant => Walk::Descendants {
                stack: vec![Frame::new(node.clone())],
            },
        };

        // positional walks jump straight to the first admissible offset
        let offset = match state {
            Walk::Siblings { .. } | Walk::Children { .. } => expression.min as usize,
            _ => 0,
        };

        Traversal {
            t,
            expression,
            offset,
            state,
        }
    }

    fn next_descendant(t: &T, stack: &mut Vec<Frame<T::Node>>) -> Option<T::Node> {
        loop {
            let frame = stack.last_mut()?;
            let count = *frame
                .count
                .get_or_insert_with(|| t.child_count(&frame.node).min(MAX_CHILD_SIZE));
            if frame.next >= count {
                stack.pop();
                continue;
            }
            let index = frame.next;
            frame.next += 1;
            if let Some(child) = t.child(&frame.node, index) {
                stack.push(Frame::new(child.clone()));
                return Some(child);
            }
        }
    }
}

impl<T: Transform + ?Sized> Iterator for Traversal<'_, T> {
    type Item = T::Node;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.expression.is_exhausted(self.offset) {
                self.state = Walk::Done;
            }
            let offset = self.offset;

            let candidate = match &mut self.state {
                Walk::Done => return None,
                Walk::Siblings {
                    parent,
                    origin,
                    forward,
                    count,
                } => {
                    let position = if *forward {
                        Some(*origin + 1 + offset).filter(|p| p < count)
                    } else {
                        origin.checked_sub(1 + offset)
                    };
                    match position {
                        Some(p) => self.t.child(parent, p),
                        None => {
                            self.state = Walk::Done;
                            return None;
                        }
                    }
                }
                Walk::Ancestors { current } => match self.t.parent(current) {
                    Some(parent) => {
                        *current = parent.clone();
                        Some(parent)
                    }
                    None => {
                        self.state = Walk::Done;
                        return None;
                    }
                },
                Walk::Children { parent, count } => {
                    if offset >= *count {
                        self.state = Walk::Done;
                        return None;
                    }
                    self.t.child(parent, offset)
                }
                Walk::Descendants { stack } => {
                    if offset >= MAX_DESCENDANTS_SIZE {
                        self.state = Walk::Done;
                        return None;
                    }
                    match Self::next_descendant(self.t, stack) {
                        Some(node) => Some(node),
                        None => {
                            self.state = Walk::Done;
                            return None;
                        }
                    }
                }
            };

            self.offset += 1;
            // a candidate the host failed to produce is skipped, its offset still counts
            if let Some(node) = candidate {
                if self.expression.check_offset(offset) {
                    return Some(node);
                }
            }
        }
    }
}

/// Unwrap a host result, logging and discarding the error
pub(crate) fn absorb<T>(
    logger: &Logger,
    call: &'static str,
    node: &dyn Debug,
    result: HostResult<T>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(logger, "host call failed"; "call" => call, "node" => ?node, "error" => %e);
            None
        }
    }
}
