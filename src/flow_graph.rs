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
//! Joint index over installed forwarding rules and the flows they own.
//!
//! A rule is identified by `(source, prefix)`; a flow is a node of the
//! prefix tree. Each flow maps every source router to the rule that owns it
//! there (the installed rule with the smallest enclosing prefix), and each
//! rule keeps the inverse back-set of flows. The two relations are mutated
//! strictly in pairs so they stay exact inverses.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    prefix::IpPrefix,
    prefix_tree::{Node, PrefixTree},
    FlowId, NodeId,
};

/// Identity of a rule: the installing router and the installed prefix.
///
/// The derived order is source-major, so one router's rules are contiguous
/// in the rule set, and prefix-ordered within a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleKey {
    pub source: NodeId,
    pub prefix: IpPrefix,
}

/// An installed route: an ordered next-hop list plus the back-set of flows
/// this rule currently owns at its source.
#[derive(Debug, Clone, Default)]
pub struct Rule {
    pub target: Vec<NodeId>,
    flows: BTreeSet<FlowId>,
}

impl Rule {
    pub fn flows(&self) -> impl Iterator<Item = FlowId> + '_ {
        self.flows.iter().copied()
    }

    pub fn num_flows(&self) -> usize {
        self.flows.len()
    }
}

/// Per-flow payload: for every source router present, the rule owning the
/// flow there.
pub type FlowData = BTreeMap<NodeId, RuleKey>;

/// Flows whose per-source ownership changed during the current event.
pub type AffectedFlows = Vec<FlowId>;

#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    rules: BTreeMap<RuleKey, Rule>,
    tree: PrefixTree<FlowData>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flow_tree(&self) -> &PrefixTree<FlowData> {
        &self.tree
    }

    pub fn flow(&self, id: FlowId) -> &Node<FlowData> {
        &self.tree[id]
    }

    pub fn find(&self, prefix: IpPrefix, source: NodeId) -> Option<&Rule> {
        self.rules.get(&RuleKey { source, prefix })
    }

    pub fn rule(&self, key: &RuleKey) -> Option<&Rule> {
        self.rules.get(key)
    }

    pub fn rules(&self) -> impl Iterator<Item = (&RuleKey, &Rule)> {
        self.rules.iter()
    }

    /// The next hops installed for `node` within `flow`, if any.
    pub fn next_hops(&self, flow: FlowId, node: NodeId) -> Option<&[NodeId]> {
        let owner = self.tree[flow].data.get(&node)?;
        Some(&self.rules[owner].target)
    }

    /// Install or replace the rule `(prefix, source)`.
    ///
    /// Mirrors a router receiving `UPDATE(prefix, nexthop)`. Re-installing
    /// identical targets is a no-op; replacing targets in place marks the
    /// rule's flows affected; a genuinely new rule claims ownership of every
    /// flow in its subtree that it now matches most specifically.
    ///
    /// Returns true iff a new rule was created.
    pub fn insert_or_assign(
        &mut self,
        prefix: IpPrefix,
        source: NodeId,
        new_target: &[NodeId],
        affected_flows: &mut AffectedFlows,
    ) -> bool {
        let key = RuleKey { source, prefix };
        if let Some(rule) = self.rules.get_mut(&key) {
            if rule.target != new_target {
                rule.target = new_target.to_vec();
                affected_flows.extend(rule.flows.iter().copied());
            }
            return false;
        }
        self.rules.insert(
            key,
            Rule {
                target: new_target.to_vec(),
                flows: BTreeSet::new(),
            },
        );

        let insertion = self.tree.insert(prefix);
        let flow = insertion.node;
        if insertion.created {
            // a fresh flow node inherits longest-prefix ownership from its
            // enclosing flow, and registers in the inherited back-sets
            let parent = insertion.parent.expect("created nodes have a parent");
            let inherited = self.tree[parent].data.clone();
            for owner in inherited.values() {
                let registered = self.rules.get_mut(owner).expect("owner rule exists");
                registered.flows.insert(flow);
            }
            self.tree[flow].data = inherited;
        }

        let subtree: Vec<FlowId> = self.tree.descendants(flow).collect();
        for g in subtree {
            match self.tree[g].data.get(&source).copied() {
                None => {
                    self.install_flow(key, g);
                    affected_flows.push(g);
                }
                Some(owner) if prefix.is_subset_of(&owner.prefix) => {
                    // the new rule matches more specifically at this source
                    self.reassign_flow(owner, key, g);
                    affected_flows.push(g);
                }
                Some(_) => {}
            }
        }
        debug_assert!(!affected_flows.is_empty());
        true
    }

    /// Remove the rule `(prefix, source)`, handing its flows back to the
    /// enclosing rule of the same source, if one exists.
    ///
    /// Returns true iff the rule existed.
    pub fn erase(
        &mut self,
        prefix: IpPrefix,
        source: NodeId,
        affected_flows: &mut AffectedFlows,
    ) -> bool {
        let key = RuleKey { source, prefix };
        if !self.rules.contains_key(&key) {
            return false;
        }
        let mut ancestors = Vec::with_capacity(IpPrefix::MAX_LEN as usize);
        let flow = self
            .tree
            .find_with_parents(prefix, &mut ancestors)
            .expect("an installed rule implies a flow node for its prefix");
        debug_assert_eq!(self.tree[flow].prefix(), prefix);
        debug_assert_eq!(self.tree[flow].data.get(&source), Some(&key));

        // nearest ancestor flow owned by the same source takes over
        let parent_rule = ancestors
            .iter()
            .rev()
            .find_map(|&g| self.tree[g].data.get(&source).copied());

        let rule = self.rules.remove(&key).expect("presence checked above");
        match parent_rule {
            Some(owner) => {
                debug_assert!(prefix.is_subset_of(&owner.prefix));
                for &g in &rule.flows {
                    self.tree[g].data.insert(source, owner);
                    affected_flows.push(g);
                }
                let owner_rule = self.rules.get_mut(&owner).expect("owner rule exists");
                owner_rule.flows.extend(rule.flows.iter().copied());
            }
            None => {
                for &g in &rule.flows {
                    self.tree[g].data.remove(&source);
                    affected_flows.push(g);
                }
            }
        }
        true
    }

    fn install_flow(&mut self, key: RuleKey, flow: FlowId) {
        let previous = self.tree[flow].data.insert(key.source, key);
        debug_assert!(previous.is_none());
        self.rules
            .get_mut(&key)
            .expect("rule exists")
            .flows
            .insert(flow);
    }

    fn reassign_flow(&mut self, current: RuleKey, key: RuleKey, flow: FlowId) {
        debug_assert_ne!(current.prefix, self.tree[flow].prefix());
        debug_assert!(key.prefix.is_subset_of(&current.prefix));
        let removed = self
            .rules
            .get_mut(&current)
            .expect("current owner exists")
            .flows
            .remove(&flow);
        debug_assert!(removed);
        self.tree[flow].data.insert(key.source, key);
        self.rules
            .get_mut(&key)
            .expect("rule exists")
            .flows
            .insert(flow);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::prefix_tree::ROOT;
    use itertools::Itertools;

    fn p(s: &str) -> IpPrefix {
        s.parse().unwrap()
    }

    /// Every rule's back-set and every flow's ownership map must be exact
    /// inverses, and every owner must be the longest matching prefix.
    fn check_duality(graph: &FlowGraph) {
        for (key, rule) in graph.rules() {
            for flow in rule.flows() {
                assert_eq!(graph.flow(flow).data.get(&key.source), Some(key));
            }
        }
        let tree = graph.flow_tree();
        for flow in tree.descendants(ROOT) {
            for (source, owner) in &tree[flow].data {
                assert_eq!(owner.source, *source);
                assert!(tree[flow].prefix().is_subset_of(&owner.prefix));
                assert!(graph.rule(owner).unwrap().flows().contains(&flow));
                // no installed rule of this source matches more specifically
                for (other, _) in graph.rules().filter(|(k, _)| k.source == *source) {
                    if tree[flow].prefix().is_subset_of(&other.prefix) {
                        assert!(owner.prefix.is_subset_of(&other.prefix));
                    }
                }
            }
        }
    }

    #[test]
    fn install_replace_and_noop() {
        let mut graph = FlowGraph::new();
        let mut affected = Vec::new();
        assert!(graph.insert_or_assign(p("0.0.0.0/28"), 0, &[1], &mut affected));
        assert_eq!(affected.len(), 1);
        let flow = graph.flow_tree().find(p("0.0.0.0/28")).unwrap();
        assert_eq!(affected, vec![flow]);
        assert_eq!(graph.find(p("0.0.0.0/28"), 0).unwrap().num_flows(), 1);

        // identical re-install: no-op
        affected.clear();
        assert!(!graph.insert_or_assign(p("0.0.0.0/28"), 0, &[1], &mut affected));
        assert!(affected.is_empty());

        // replacing the targets touches the owned flows but creates nothing
        affected.clear();
        assert!(!graph.insert_or_assign(p("0.0.0.0/28"), 0, &[2], &mut affected));
        assert_eq!(affected, vec![flow]);
        assert_eq!(graph.find(p("0.0.0.0/28"), 0).unwrap().target, vec![2]);
        check_duality(&graph);
    }

    #[test]
    fn subflow_inherits_ownership() {
        let mut graph = FlowGraph::new();
        let mut affected = Vec::new();
        graph.insert_or_assign(p("0.0.0.0/28"), 0, &[1], &mut affected);
        affected.clear();
        graph.insert_or_assign(p("0.0.0.0/29"), 1, &[2], &mut affected);
        check_duality(&graph);

        let outer = graph.flow_tree().find(p("0.0.0.0/28")).unwrap();
        let inner = graph.flow_tree().find(p("0.0.0.0/29")).unwrap();
        assert_eq!(affected, vec![inner]);
        // the /29 flow is owned by router 0's /28 rule and router 1's /29 rule
        let rule_a = graph.find(p("0.0.0.0/28"), 0).unwrap();
        assert_eq!(rule_a.flows().collect_vec(), vec![outer, inner]);
        assert_eq!(graph.next_hops(inner, 0), Some(&[1][..]));
        assert_eq!(graph.next_hops(inner, 1), Some(&[2][..]));
        assert_eq!(graph.next_hops(outer, 1), None);
    }

    #[test]
    fn more_specific_rule_steals_flows() {
        let mut graph = FlowGraph::new();
        let mut affected = Vec::new();
        graph.insert_or_assign(p("0.0.0.0/28"), 0, &[1], &mut affected);
        graph.insert_or_assign(p("0.0.0.8/29"), 2, &[3], &mut affected);
        affected.clear();
        // same source installs a more specific route
        graph.insert_or_assign(p("0.0.0.8/29"), 0, &[7], &mut affected);
        check_duality(&graph);

        let sub = graph.flow_tree().find(p("0.0.0.8/29")).unwrap();
        assert_eq!(affected, vec![sub]);
        assert_eq!(graph.next_hops(sub, 0), Some(&[7][..]));
        let rule_a = graph.find(p("0.0.0.0/28"), 0).unwrap();
        assert!(!rule_a.flows().contains(&sub));
    }

    #[test]
    fn erase_restores_enclosing_owner() {
        let mut graph = FlowGraph::new();
        let mut affected = Vec::new();
        graph.insert_or_assign(p("0.0.0.0/28"), 0, &[1], &mut affected);
        graph.insert_or_assign(p("0.0.0.8/29"), 0, &[7], &mut affected);
        let sub = graph.flow_tree().find(p("0.0.0.8/29")).unwrap();

        affected.clear();
        assert!(graph.erase(p("0.0.0.8/29"), 0, &mut affected));
        assert_eq!(affected, vec![sub]);
        // ownership falls back to the enclosing /28 rule
        assert_eq!(graph.next_hops(sub, 0), Some(&[1][..]));
        check_duality(&graph);

        affected.clear();
        assert!(graph.erase(p("0.0.0.0/28"), 0, &mut affected));
        assert_eq!(affected.len(), 2);
        assert!(graph.flow(sub).data.is_empty());
        check_duality(&graph);

        // erasing an absent rule is a no-op
        affected.clear();
        assert!(!graph.erase(p("0.0.0.0/28"), 0, &mut affected));
        assert!(affected.is_empty());
    }

    /// Exercise all interleavings of installing and withdrawing a small
    /// prefix corpus, checking the duality invariant after each run.
    #[test]
    fn duality_over_insert_erase_permutations() {
        let corpus = [
            p("0.0.0.0/24"),
            p("0.0.0.64/26"),
            p("0.0.0.64/28"),
            p("0.0.0.96/27"),
        ];
        let mut commands = Vec::new();
        for insert in [false, true] {
            for prefix in corpus {
                commands.push((insert, prefix));
            }
        }
        for sequence in commands.iter().permutations(commands.len()) {
            let mut graph = FlowGraph::new();
            let mut affected = Vec::new();
            for &(insert, prefix) in sequence {
                affected.clear();
                let changed = if insert {
                    graph.insert_or_assign(prefix, 42, &[], &mut affected)
                } else {
                    graph.erase(prefix, 42, &mut affected)
                };
                // a successful create always affects at least one flow
                assert!(!(changed && insert && affected.is_empty()));
            }
            check_duality(&graph);
        }
    }
}
