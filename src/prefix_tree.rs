// Flowscope: Real-Time Analysis of the Data Planes Induced by BGP Routing Updates
// Copyright (C) 2024-2025 The flowscope developers
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Longest-prefix-match tree, generic over its per-node payload.
//!
//! Nodes live in an arena and are addressed by dense [`FlowId`]s; the tree
//! is append-only, so ids stay valid for the lifetime of the tree. The root
//! always covers `0.0.0.0/0`.

use std::{
    collections::{BTreeMap, VecDeque},
    ops::{Index, IndexMut},
};

use crate::{
    prefix::{IpPrefix, IpRange},
    FlowId,
};

/// Id of the root node.
pub const ROOT: FlowId = 0;

/// One node of a [`PrefixTree`].
#[derive(Debug, Clone)]
pub struct Node<T> {
    prefix: IpPrefix,
    /// Per-node payload.
    pub data: T,
    /// Children, keyed in prefix order. Siblings are pairwise disjoint
    /// strict subsets of this node's prefix.
    children: BTreeMap<IpPrefix, FlowId>,
    /// Residual address mass: own mask minus the masks of all children.
    cardinality: u32,
}

impl<T> Node<T> {
    fn new(prefix: IpPrefix, data: T) -> Self {
        Self {
            prefix,
            data,
            children: BTreeMap::new(),
            cardinality: prefix.mask(),
        }
    }

    pub fn prefix(&self) -> IpPrefix {
        self.prefix
    }

    pub fn children(&self) -> impl Iterator<Item = (IpPrefix, FlowId)> + '_ {
        self.children.iter().map(|(p, id)| (*p, *id))
    }

    /// True iff the children exactly tile this node's prefix, leaving no
    /// address that is carried by this node alone.
    pub fn is_covered(&self) -> bool {
        !self.children.is_empty() && self.cardinality as usize == self.children.len() - 1
    }
}

/// Result of [`PrefixTree::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insertion {
    /// The node holding the requested prefix.
    pub node: FlowId,
    /// Its structural parent; `None` only for the root.
    pub parent: Option<FlowId>,
    /// Whether the node was freshly allocated by this call.
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct PrefixTree<T> {
    nodes: Vec<Node<T>>,
}

impl<T: Default> Default for PrefixTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Default> PrefixTree<T> {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(IpPrefix::DEFAULT, T::default())],
        }
    }

    fn alloc(&mut self, prefix: IpPrefix) -> FlowId {
        self.nodes.push(Node::new(prefix, T::default()));
        self.nodes.len() - 1
    }

    /// Ensure a node for `prefix` exists and return it together with its
    /// structural parent.
    ///
    /// Three cases arise below the target parent: the node already exists;
    /// a contiguous run of existing children are strict subsets of `prefix`
    /// and get re-parented under the new node; or the new node becomes a
    /// fresh leaf.
    pub fn insert(&mut self, prefix: IpPrefix) -> Insertion {
        if self.nodes[ROOT].prefix == prefix {
            return Insertion {
                node: ROOT,
                parent: None,
                created: false,
            };
        }
        let mut cur = ROOT;
        while !self.nodes[cur].children.is_empty() {
            debug_assert!(prefix.is_subset_of(&self.nodes[cur].prefix));
            let successor = self.nodes[cur]
                .children
                .range(prefix..)
                .next()
                .map(|(p, id)| (*p, *id));
            if let Some((child_prefix, child)) = successor {
                if child_prefix == prefix {
                    return Insertion {
                        node: child,
                        parent: Some(cur),
                        created: false,
                    };
                }
                if child_prefix.is_subset_of(&prefix) {
                    // re-parent the contiguous run of children covered by
                    // the new prefix
                    let node = self.alloc(prefix);
                    let run: Vec<(IpPrefix, FlowId)> = self.nodes[cur]
                        .children
                        .range(prefix..)
                        .take_while(|(p, _)| p.is_subset_of(&prefix))
                        .map(|(p, id)| (*p, *id))
                        .collect();
                    let mut moved_mask = 0u32;
                    for &(p, id) in &run {
                        self.nodes[cur].children.remove(&p);
                        self.nodes[node].children.insert(p, id);
                        moved_mask += p.mask();
                    }
                    self.nodes[node].cardinality = prefix.mask() - moved_mask;
                    let parent = &mut self.nodes[cur];
                    parent.cardinality = parent.cardinality + moved_mask - prefix.mask();
                    parent.children.insert(prefix, node);
                    return Insertion {
                        node,
                        parent: Some(cur),
                        created: true,
                    };
                }
                debug_assert!(!child_prefix.overlaps(&prefix));
            }
            let predecessor = self.nodes[cur]
                .children
                .range(..prefix)
                .next_back()
                .map(|(p, id)| (*p, *id));
            match predecessor {
                Some((p, id)) if prefix.is_subset_of(&p) => cur = id,
                _ => break,
            }
        }
        let node = self.alloc(prefix);
        let parent = &mut self.nodes[cur];
        debug_assert!(parent.cardinality >= prefix.mask());
        parent.cardinality -= prefix.mask();
        parent.children.insert(prefix, node);
        Insertion {
            node,
            parent: Some(cur),
            created: true,
        }
    }
}

impl<T> PrefixTree<T> {
    /// Number of nodes, including the root. Node ids are dense below this.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Longest-prefix-match lookup of the node whose prefix equals `prefix`.
    pub fn find(&self, prefix: IpPrefix) -> Option<FlowId> {
        self.find_from(prefix, None)
    }

    /// Like [`find`](Self::find), additionally recording the ancestor chain
    /// from the root down to (excluding) the found node.
    pub fn find_with_parents(
        &self,
        prefix: IpPrefix,
        parents: &mut Vec<FlowId>,
    ) -> Option<FlowId> {
        self.find_from(prefix, Some(parents))
    }

    fn find_from(&self, prefix: IpPrefix, mut parents: Option<&mut Vec<FlowId>>) -> Option<FlowId> {
        if self.nodes[ROOT].prefix == prefix {
            return Some(ROOT);
        }
        let mut cur = ROOT;
        loop {
            debug_assert!(prefix.is_subset_of(&self.nodes[cur].prefix));
            if let Some(parents) = parents.as_deref_mut() {
                parents.push(cur);
            }
            let children = &self.nodes[cur].children;
            // the successor is either equal to `prefix` or disjoint from it;
            // only the predecessor can contain it
            if let Some((p, id)) = children.range(prefix..).next() {
                if *p == prefix {
                    return Some(*id);
                }
                debug_assert!(!prefix.is_subset_of(p));
            }
            match children.range(..prefix).next_back() {
                Some((p, id)) if prefix.is_subset_of(p) => cur = *id,
                _ => return None,
            }
        }
    }

    /// Breadth-first traversal of the subtree rooted at `start`, including
    /// `start` itself. Visit order is stable across equivalent trees.
    pub fn descendants(&self, start: FlowId) -> Descendants<'_, T> {
        Descendants {
            tree: self,
            queue: VecDeque::from([start]),
        }
    }

    /// The node's inclusive range minus the union of its children's ranges:
    /// the residual addresses carried by this node alone.
    pub fn disjoint_ranges(&self, node: FlowId) -> Vec<IpRange> {
        let n = &self.nodes[node];
        if n.is_covered() {
            return Vec::new();
        }
        let range = n.prefix.range();
        if n.children.is_empty() {
            return vec![range];
        }
        let mut out = Vec::new();
        let mut next_low = u64::from(range.low);
        for child_prefix in n.children.keys() {
            let child = child_prefix.range();
            if u64::from(child.low) > next_low {
                out.push(IpRange::new(next_low as u32, child.low - 1));
            }
            next_low = u64::from(child.high) + 1;
        }
        if next_low <= u64::from(range.high) {
            out.push(IpRange::new(next_low as u32, range.high));
        }
        out
    }
}

impl<T> Index<FlowId> for PrefixTree<T> {
    type Output = Node<T>;

    fn index(&self, id: FlowId) -> &Node<T> {
        &self.nodes[id]
    }
}

impl<T> IndexMut<FlowId> for PrefixTree<T> {
    fn index_mut(&mut self, id: FlowId) -> &mut Node<T> {
        &mut self.nodes[id]
    }
}

pub struct Descendants<'a, T> {
    tree: &'a PrefixTree<T>,
    queue: VecDeque<FlowId>,
}

impl<T> Iterator for Descendants<'_, T> {
    type Item = FlowId;

    fn next(&mut self) -> Option<FlowId> {
        let id = self.queue.pop_front()?;
        self.queue.extend(self.tree.nodes[id].children.values());
        Some(id)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use itertools::Itertools;

    fn p(s: &str) -> IpPrefix {
        s.parse().unwrap()
    }

    #[test]
    fn insert_is_idempotent() {
        let mut tree: PrefixTree<()> = PrefixTree::new();
        let first = tree.insert(p("10.0.0.0/8"));
        assert!(first.created);
        assert_eq!(first.parent, Some(ROOT));
        let second = tree.insert(p("10.0.0.0/8"));
        assert_eq!(second.node, first.node);
        assert_eq!(second.parent, Some(ROOT));
        assert!(!second.created);
        assert_eq!(tree.insert(p("0.0.0.0/0")).node, ROOT);
    }

    #[test]
    fn insert_reparents_covered_children() {
        let mut tree: PrefixTree<()> = PrefixTree::new();
        let a = tree.insert(p("0.0.0.0/29")).node;
        let b = tree.insert(p("0.0.0.8/29")).node;
        let c = tree.insert(p("0.0.1.0/24")).node;
        // /28 encloses both /29 children but not the /24
        let mid = tree.insert(p("0.0.0.0/28"));
        assert!(mid.created);
        assert_eq!(mid.parent, Some(ROOT));
        let children = tree[mid.node].children().map(|(_, id)| id).collect_vec();
        assert_eq!(children, vec![a, b]);
        let top = tree[ROOT].children().map(|(_, id)| id).collect_vec();
        assert_eq!(top, vec![mid.node, c]);
        // the subtrees were moved, not rebuilt
        assert_eq!(tree.find(p("0.0.0.8/29")), Some(b));
    }

    #[test]
    fn structure_is_insert_order_independent() {
        let prefixes = [
            p("0.0.0.0/24"),
            p("0.0.0.64/26"),
            p("0.0.0.64/28"),
            p("0.0.0.96/27"),
            p("0.0.0.96/28"),
            p("0.0.0.128/28"),
        ];
        let mut reference: Option<Vec<IpPrefix>> = None;
        for permutation in prefixes.iter().permutations(prefixes.len()) {
            let mut tree: PrefixTree<()> = PrefixTree::new();
            for prefix in permutation {
                tree.insert(*prefix);
            }
            let bfs = tree
                .descendants(ROOT)
                .map(|id| tree[id].prefix())
                .collect_vec();
            match &reference {
                None => reference = Some(bfs),
                Some(expected) => assert_eq!(&bfs, expected),
            }
        }
    }

    #[test]
    fn children_are_disjoint_subsets() {
        let mut tree: PrefixTree<()> = PrefixTree::new();
        for s in [
            "2.16.0.0/13",
            "2.16.0.0/23",
            "2.17.0.0/20",
            "2.17.16.0/22",
            "2.16.8.0/25",
        ] {
            tree.insert(p(s));
        }
        for id in tree.descendants(ROOT).collect_vec() {
            let node = &tree[id];
            let children = node.children().collect_vec();
            for (cp, _) in &children {
                assert!(cp.is_subset_of(&node.prefix()));
            }
            for pair in children.iter().combinations(2) {
                assert!(!pair[0].0.overlaps(&pair[1].0));
            }
        }
    }

    #[test]
    fn find_records_parents() {
        let mut tree: PrefixTree<()> = PrefixTree::new();
        let outer = tree.insert(p("0.0.0.0/24")).node;
        let mid = tree.insert(p("0.0.0.64/26")).node;
        let inner = tree.insert(p("0.0.0.64/28")).node;
        let mut parents = Vec::new();
        assert_eq!(tree.find_with_parents(p("0.0.0.64/28"), &mut parents), Some(inner));
        assert_eq!(parents, vec![ROOT, outer, mid]);
        parents.clear();
        assert_eq!(tree.find_with_parents(p("0.0.0.80/28"), &mut parents), None);
        assert_eq!(tree.find(p("0.0.0.64/26")), Some(mid));
        assert_eq!(tree.find(p("0.0.0.0/0")), Some(ROOT));
    }

    #[test]
    fn residual_ranges() {
        let mut tree: PrefixTree<()> = PrefixTree::new();
        let outer = tree.insert(p("0.0.0.0/24")).node;
        tree.insert(p("0.0.0.64/26"));
        tree.insert(p("0.0.0.192/26"));
        assert_eq!(
            tree.disjoint_ranges(outer),
            vec![IpRange::new(0, 63), IpRange::new(128, 191)]
        );
        let leaf = tree.insert(p("0.0.0.64/26")).node;
        assert_eq!(tree.disjoint_ranges(leaf), vec![IpRange::new(64, 127)]);
    }

    #[test]
    fn covered_node_has_no_residual() {
        let mut tree: PrefixTree<()> = PrefixTree::new();
        let outer = tree.insert(p("0.0.0.0/24")).node;
        tree.insert(p("0.0.0.0/25"));
        assert!(!tree[outer].is_covered());
        tree.insert(p("0.0.0.128/25"));
        assert!(tree[outer].is_covered());
        assert!(tree.disjoint_ranges(outer).is_empty());
    }
}
