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
//! Forwarding-loop detection over per-flow next-hop maps.

use std::collections::{HashMap, HashSet};

use itertools::Itertools;

use crate::{flow_graph::FlowGraph, FlowId, NodeId};

/// A simple forwarding cycle, rotated so its minimum node comes first.
pub type Loop = Vec<NodeId>;

/// All currently known loops, per flow.
pub type LoopsPerFlow = HashMap<FlowId, Vec<Loop>>;

/// Search each affected flow for a forwarding loop reachable from `start`.
///
/// Runs a depth-first traversal over the flow's per-source next-hop map,
/// expanding every visit to the owning rule's target list. The first node
/// seen twice closes the current path into a loop; the loop is recorded in
/// canonical rotation and the search moves on to the next flow. Flows
/// without a cycle contribute nothing to `loops_per_flow`.
pub fn find_loops(
    graph: &FlowGraph,
    start: NodeId,
    affected_flows: &[FlowId],
    loops_per_flow: &mut LoopsPerFlow,
) {
    let mut stack: Vec<NodeId> = Vec::new();
    let mut path: Vec<NodeId> = Vec::new();
    let mut seen: HashSet<NodeId> = HashSet::new();
    for &flow in affected_flows {
        debug_assert!(stack.is_empty() && path.is_empty() && seen.is_empty());
        stack.push(start);
        while let Some(n) = stack.pop() {
            let Some(next_hops) = graph.next_hops(flow, n) else {
                // dead end: unwind one hop of the current path
                if path.is_empty() {
                    debug_assert!(stack.is_empty());
                    break;
                }
                path.pop();
                continue;
            };
            if !seen.insert(n) {
                let min_position = path.iter().position_min().expect("revisit implies a path");
                path.rotate_left(min_position);
                loops_per_flow.entry(flow).or_default().push(std::mem::take(&mut path));
                stack.clear();
                break;
            }
            path.push(n);
            stack.extend_from_slice(next_hops);
        }
        path.clear();
        seen.clear();
    }
}

/// True iff every consecutive pair of `candidate` (wrapping at the end) is
/// still an edge of the flow's next-hop map.
pub fn check_loop(graph: &FlowGraph, flow: FlowId, candidate: &[NodeId]) -> bool {
    debug_assert!(!candidate.is_empty());
    candidate
        .iter()
        .copied()
        .circular_tuple_windows()
        .all(|(from, to)| is_connected(graph, flow, from, to))
}

fn is_connected(graph: &FlowGraph, flow: FlowId, from: NodeId, to: NodeId) -> bool {
    graph
        .next_hops(flow, from)
        .is_some_and(|hops| hops.contains(&to))
}
