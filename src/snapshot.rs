//! A node tree captured as JSON, served through [`TreeAdapter`]
//!
//! Used by the command line tool to run selectors against saved trees, and by tests as a host
//! whose nodes can be detached to simulate a tree changing underneath a query.

use std::{
    collections::HashSet,
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    config::ConfigError,
    transform::{
        AttrValue, FastQuery, HostError, HostResult, NodeAttr, TreeAdapter, MAX_CHILD_SIZE,
        MAX_DESCENDANTS_SIZE,
    },
};

/// One node of a captured tree, children nested
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Derived from `id` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vid: Option<String>,
    /// Class name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default)]
    pub clickable: bool,
    #[serde(default)]
    pub focusable: bool,
    #[serde(default)]
    pub checkable: bool,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub editable: bool,
    #[serde(default)]
    pub long_clickable: bool,
    #[serde(default = "visible")]
    pub visible_to_user: bool,
    #[serde(default)]
    pub left: i32,
    #[serde(default)]
    pub top: i32,
    #[serde(default)]
    pub right: i32,
    #[serde(default)]
    pub bottom: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SnapshotNode>,
}

fn visible() -> bool {
    true
}

impl SnapshotNode {
    pub fn with_id(id: &str) -> Self {
        SnapshotNode {
            id: Some(id.to_string()),
            visible_to_user: true,
            ..Default::default()
        }
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn clickable(mut self) -> Self {
        self.clickable = true;
        self
    }

    pub fn child(mut self, child: SnapshotNode) -> Self {
        self.children.push(child);
        self
    }
}

/// Handle to a node of a [`SnapshotTree`], its position in pre-order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

struct Entry {
    node: SnapshotNode,
    app_id: Option<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// One past the last node of this subtree
    subtree_end: usize,
}

pub struct SnapshotTree {
    entries: Vec<Entry>,
    detached: RwLock<HashSet<NodeId>>,
    calls: AtomicUsize,
}

impl SnapshotTree {
    pub fn new(root: SnapshotNode) -> Self {
        let mut entries = Vec::new();
        flatten(root, None, None, &mut entries);
        SnapshotTree {
            entries,
            detached: RwLock::new(HashSet::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(serde_json::from_str(s)?))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&s)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&SnapshotNode> {
        self.entries.get(id.0).map(|e| &e.node)
    }

    /// Nodes whose `id` is exactly `id`, in pre-order
    pub fn find_by_id(&self, id: &str) -> Vec<NodeId> {
        (0..self.entries.len())
            .filter(|&i| self.entries[i].node.id.as_deref() == Some(id))
            .map(NodeId)
            .collect()
    }

    /// Remove a subtree from the live tree: every later access to its nodes fails as stale
    pub fn detach(&self, id: NodeId) {
        if let Some(entry) = self.entries.get(id.0) {
            self.detached
                .write()
                .extend((id.0..entry.subtree_end).map(NodeId));
        }
    }

    /// Host calls served so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// `node` and what a bounded descendant walk from it reaches, in pre-order. Detached nodes
    /// take their place in the walk but are not descended into.
    fn reachable(&self, node: NodeId, detached: &HashSet<NodeId>) -> Vec<NodeId> {
        let mut found = vec![node];
        let mut stack = vec![(node, 0usize)];
        while let Some((id, next)) = stack.last_mut() {
            let children = &self.entries[id.0].children;
            if *next >= children.len().min(MAX_CHILD_SIZE) {
                stack.pop();
                continue;
            }
            if found.len() > MAX_DESCENDANTS_SIZE {
                break;
            }
            let child = children[*next];
            *next += 1;
            found.push(child);
            if !detached.contains(&child) {
                stack.push((child, 0));
            }
        }
        found
    }

    fn entry(&self, id: &NodeId) -> HostResult<&Entry> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.detached.read().contains(id) {
            return Err(HostError::Stale);
        }
        self.entries
            .get(id.0)
            .ok_or_else(|| HostError::Failed(format!("no node {}", id.0)))
    }
}

fn flatten(
    mut node: SnapshotNode,
    parent: Option<NodeId>,
    inherited_app: Option<&str>,
    entries: &mut Vec<Entry>,
) -> NodeId {
    let id = NodeId(entries.len());
    let app_id = node.app_id.clone().or_else(|| inherited_app.map(str::to_string));
    if node.vid.is_none() {
        node.vid = derive_vid(node.id.as_deref(), app_id.as_deref());
    }
    let children = std::mem::take(&mut node.children);

    entries.push(Entry {
        node,
        app_id: app_id.clone(),
        parent,
        children: Vec::with_capacity(children.len()),
        subtree_end: id.0 + 1,
    });
    for child in children {
        let child_id = flatten(child, Some(id), app_id.as_deref(), entries);
        entries[id.0].children.push(child_id);
    }
    entries[id.0].subtree_end = entries.len();
    id
}

/// `com.example:id/title` in app `com.example` has the view id `title`
fn derive_vid(id: Option<&str>, app_id: Option<&str>) -> Option<String> {
    let (id, app_id) = (id?, app_id?);
    id.strip_prefix(app_id)?
        .strip_prefix(":id/")
        .map(str::to_string)
}

fn text_attr(value: &Option<String>) -> AttrValue {
    value.clone().map_or(AttrValue::Null, AttrValue::Str)
}

impl TreeAdapter for SnapshotTree {
    type Node = NodeId;

    fn root(&self) -> HostResult<Option<NodeId>> {
        if self.entries.is_empty() {
            return Ok(None);
        }
        let root = NodeId(0);
        self.entry(&root)?;
        Ok(Some(root))
    }

    fn parent(&self, node: &NodeId) -> HostResult<Option<NodeId>> {
        Ok(self.entry(node)?.parent)
    }

    fn child_count(&self, node: &NodeId) -> HostResult<usize> {
        Ok(self.entry(node)?.children.len())
    }

    fn child(&self, node: &NodeId, index: usize) -> HostResult<Option<NodeId>> {
        Ok(self.entry(node)?.children.get(index).copied())
    }

    fn attr(&self, node: &NodeId, attr: NodeAttr) -> HostResult<AttrValue> {
        let n = &self.entry(node)?.node;
        Ok(match attr {
            NodeAttr::Id => text_attr(&n.id),
            NodeAttr::Vid => text_attr(&n.vid),
            NodeAttr::Name => text_attr(&n.name),
            NodeAttr::Text => text_attr(&n.text),
            NodeAttr::Desc => text_attr(&n.desc),
            NodeAttr::Clickable => AttrValue::Bool(n.clickable),
            NodeAttr::Focusable => AttrValue::Bool(n.focusable),
            NodeAttr::Checkable => AttrValue::Bool(n.checkable),
            NodeAttr::Checked => AttrValue::Bool(n.checked),
            NodeAttr::Editable => AttrValue::Bool(n.editable),
            NodeAttr::LongClickable => AttrValue::Bool(n.long_clickable),
            NodeAttr::VisibleToUser => AttrValue::Bool(n.visible_to_user),
            NodeAttr::Left => AttrValue::Int(n.left),
            NodeAttr::Top => AttrValue::Int(n.top),
            NodeAttr::Right => AttrValue::Int(n.right),
            NodeAttr::Bottom => AttrValue::Int(n.bottom),
            NodeAttr::Width => AttrValue::Int(n.right.saturating_sub(n.left)),
            NodeAttr::Height => AttrValue::Int(n.bottom.saturating_sub(n.top)),
        })
    }

    fn app_id(&self, node: &NodeId) -> HostResult<Option<String>> {
        Ok(self.entry(node)?.app_id.clone())
    }

    fn refresh(&self, node: &NodeId) -> HostResult<bool> {
        Ok(self.entry(node).is_ok())
    }

    fn fast_query(&self, node: &NodeId, keys: &[FastQuery]) -> HostResult<Option<Vec<NodeId>>> {
        self.entry(node)?;
        let detached = self.detached.read();
        let found = self
            .reachable(*node, &detached)
            .into_iter()
            .filter(|id| !detached.contains(id))
            .filter(|id| {
                let n = &self.entries[id.0].node;
                keys.iter().any(|key| {
                    let value = match key.attr() {
                        NodeAttr::Id => text_attr(&n.id),
                        NodeAttr::Vid => text_attr(&n.vid),
                        _ => text_attr(&n.text),
                    };
                    key.accepts(&value)
                })
            })
            .collect();
        Ok(Some(found))
    }
}
