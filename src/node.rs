//! Node identities and the hash-consing arena that backs a [`crate::graph::MergeGraph`].
//!
//! Grounded in the teacher crate's `expression::ExprContext`: nodes live in
//! one arena, indexed by a small `Copy` handle (`ID` there, [`NodeId`] here),
//! and structurally-equal nodes are deduplicated through a lookup table
//! (`IndexSet<Node>` there, [`NodeArena::dedup`] here) keyed by
//! [`NodeData`]'s derived `Hash`/`Eq`. Unlike the teacher, a [`NodeArena`]
//! also tracks non-owning parent back-references (§3 invariant 3), since the
//! predicate lifecycle needs upward BFS from a node to the roots that depend
//! on it for diagnostics (§4.4).

use smallvec::SmallVec;
use std::fmt;

use crate::{symbol::CallName, utils::HashSet, value::Value};

/// A stable, small handle into a [`NodeArena`]. Never reused once assigned.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline(always)]
    pub(crate) fn val(self) -> usize {
        self.0 as usize
    }

    #[inline(always)]
    pub(crate) fn new(val: usize) -> Self {
        debug_assert!(val <= u32::MAX as usize);
        NodeId(val as u32)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The small argument list of a call node. Most predicate calls take 1-3
/// arguments, so arguments live inline up to 4 before spilling to the heap.
pub type Args = SmallVec<[NodeId; 4]>;

/// The structural payload of a node (§3): either a literal value or a named
/// call over an ordered argument list. This is the type hashed/compared for
/// CSE purposes (invariant 1) — two nodes with equal `NodeData` are the same
/// node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeData {
    Literal(Value),
    Call { name: CallName, args: Args },
}

impl NodeData {
    pub fn is_literal(&self) -> bool {
        matches!(self, NodeData::Literal(_))
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            NodeData::Literal(v) => Some(v),
            NodeData::Call { .. } => None,
        }
    }

    pub fn call_name(&self) -> Option<CallName> {
        match self {
            NodeData::Call { name, .. } => Some(*name),
            NodeData::Literal(_) => None,
        }
    }

    /// The ordered argument list; empty for literals.
    pub fn args(&self) -> &[NodeId] {
        match self {
            NodeData::Literal(_) => &[],
            NodeData::Call { args, .. } => args,
        }
    }

    /// Panics on a literal: only call nodes have a rewritable argument list,
    /// and callers (`graph::MergeGraph::replace`) only ever invoke this on
    /// `Call` nodes they've already matched on.
    pub(crate) fn args_mut(&mut self) -> &mut Args {
        match self {
            NodeData::Literal(_) => unreachable!("literal nodes have no args"),
            NodeData::Call { args, .. } => args,
        }
    }

    /// Text form used for `to_s`, diagnostics, and debug reports (§3 says
    /// each node "carries ... cached textual form").
    pub fn to_s(&self, child_text: impl Fn(NodeId) -> String) -> String {
        match self {
            NodeData::Literal(v) => v.to_string(),
            NodeData::Call { name, args } => {
                if args.is_empty() {
                    format!("({})", name.as_str())
                } else {
                    let mut s = format!("({}", name.as_str());
                    for a in args {
                        s.push(' ');
                        s.push_str(&child_text(*a));
                    }
                    s.push(')');
                    s
                }
            }
        }
    }
}

/// A single node's record inside a [`NodeArena`].
pub struct NodeRecord {
    pub data: NodeData,
    /// Non-owning back-references: who has this node as an argument.
    pub parents: HashSet<NodeId>,
    /// Multiset of `file:line`-shaped origin tags accumulated across merges
    /// (§3 invariant 6). Duplicates are significant: origin preservation
    /// (property 4) is a multiset union, not a set union.
    pub origins: Vec<String>,
    /// Assigned by `graph::lifecycle::index_nodes`; `None` before indexing
    /// and after any mutation that invalidates the previous indexing.
    pub index: Option<usize>,
}

impl NodeRecord {
    fn new(data: NodeData) -> Self {
        NodeRecord {
            data,
            parents: HashSet::default(),
            origins: Vec::new(),
            index: None,
        }
    }
}

/// The arena all nodes of one [`crate::graph::MergeGraph`] live in.
///
/// Nodes are never individually freed (§3: "immutable in identity"); a
/// [`crate::graph::MergeGraph::replace`] leaves the old node allocated but
/// unreferenced by any live parent. The whole arena is dropped at once when
/// its owning context closes or is copied (§3 Ownership).
#[derive(Default)]
pub struct NodeArena {
    nodes: Vec<NodeRecord>,
    dedup: crate::utils::HashMap<NodeData, NodeId>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> &NodeRecord {
        &self.nodes[id.val()]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut NodeRecord {
        &mut self.nodes[id.val()]
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId::new)
    }

    /// Looks up `data` in the dedup table; if present returns the existing
    /// id (invariant 1), otherwise allocates a fresh node and registers it.
    /// Does **not** wire up parent back-references; callers (typically
    /// `MergeGraph::merge`) are responsible for calling [`Self::link`] for
    /// each argument once the id is known.
    pub(crate) fn insert(&mut self, data: NodeData) -> (NodeId, bool) {
        if let Some(&id) = self.dedup.get(&data) {
            return (id, false);
        }
        let id = NodeId::new(self.nodes.len());
        self.dedup.insert(data.clone(), id);
        self.nodes.push(NodeRecord::new(data));
        (id, true)
    }

    /// Records that `parent` has `child` as an argument.
    pub(crate) fn link(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.val()].parents.insert(parent);
    }

    /// Removes the parent backlink `parent -> child`. Used when a parent's
    /// argument list is rewritten to no longer mention `child`.
    pub(crate) fn unlink(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.val()].parents.remove(&parent);
    }

    /// Re-registers `id` in the dedup table under its (possibly just
    /// rewritten) `NodeData`. Used by `MergeGraph::replace`'s "sink into an
    /// existing representative" path; callers must ensure no other node
    /// already owns that key before calling, or handle the returned
    /// conflicting id themselves.
    pub(crate) fn rekey(&mut self, id: NodeId, data: NodeData) {
        let old_key = self.nodes[id.val()].data.clone();
        self.dedup.remove(&old_key);
        self.dedup.insert(data.clone(), id);
        self.nodes[id.val()].data = data;
    }

    pub(crate) fn lookup(&self, data: &NodeData) -> Option<NodeId> {
        self.dedup.get(data).copied()
    }

    /// Deep-clones the whole arena, preserving `NodeId` numbering exactly
    /// (so a root index or oracle captured before the clone still resolves
    /// correctly after). Grounds §3's "MergeGraph is ... copied on every
    /// configuration-context open".
    pub fn deep_clone(&self) -> Self {
        NodeArena {
            nodes: self
                .nodes
                .iter()
                .map(|r| NodeRecord {
                    data: r.data.clone(),
                    parents: r.parents.clone(),
                    origins: r.origins.clone(),
                    index: r.index,
                })
                .collect(),
            dedup: self.dedup.clone(),
        }
    }

    pub fn text_of(&self, id: NodeId) -> String {
        let data = &self.get(id).data;
        data.to_s(|child| self.text_of(child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::intern;

    #[test]
    fn insert_dedupes_identical_literals() {
        let mut arena = NodeArena::new();
        let (a, a_new) = arena.insert(NodeData::Literal(Value::from("x")));
        let (b, b_new) = arena.insert(NodeData::Literal(Value::from("x")));
        assert!(a_new);
        assert!(!b_new);
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_calls_get_distinct_ids() {
        let mut arena = NodeArena::new();
        let (lit, _) = arena.insert(NodeData::Literal(Value::from("x")));
        let (c1, _) = arena.insert(NodeData::Call {
            name: intern("streq"),
            args: Args::from_slice(&[lit]),
        });
        let (c2, _) = arena.insert(NodeData::Call {
            name: intern("strlen"),
            args: Args::from_slice(&[lit]),
        });
        assert_ne!(c1, c2);
    }
}
