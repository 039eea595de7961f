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
//! Reachability summary: for every flow and ordered pair of routers, a
//! sliding-window history of whether the flow was actually delivered.

use crate::{
    flow_graph::FlowGraph,
    history::{History, Slice, SliceTooSmall},
    FlowId, NodeId, Span, Timestamp, MAX_NODES,
};

/// A 3-D history tensor `[flow][source][target]`, dense in `(source,
/// target)` and grown on demand in the flow dimension, plus the global
/// timestamp bounds of the observation.
#[derive(Debug, Clone)]
pub struct ReachSummary {
    spans: Vec<Span>,
    num_nodes: usize,
    /// Rows indexed by flow id; an empty row has not been observed yet.
    tensor: Vec<Vec<History>>,
    start_time: Timestamp,
    stop_time: Timestamp,
}

impl ReachSummary {
    /// `spans` must be sorted in increasing order.
    pub fn new(spans: Vec<Span>, num_nodes: usize) -> Self {
        assert!(num_nodes <= MAX_NODES);
        debug_assert!(spans.windows(2).all(|w| w[0] <= w[1]));
        Self {
            spans,
            num_nodes,
            tensor: Vec::new(),
            start_time: 0,
            stop_time: 0,
        }
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Earliest observed timestamp, or 0 before any timed event.
    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    /// Latest observed timestamp, or 0 before any timed event.
    pub fn stop_time(&self) -> Timestamp {
        self.stop_time
    }

    /// Advance the global bounds with an observed event time.
    pub fn observe(&mut self, t: Timestamp) {
        debug_assert_ne!(t, 0);
        if self.start_time == 0 || t < self.start_time {
            self.start_time = t;
        }
        self.stop_time = self.stop_time.max(t);
    }

    fn offset(&self, source: NodeId, target: NodeId) -> usize {
        debug_assert!((source as usize) < self.num_nodes);
        debug_assert!((target as usize) < self.num_nodes);
        self.num_nodes * source as usize + target as usize
    }

    /// The history row of a flow, allocated on first access.
    pub fn row_mut(&mut self, flow: FlowId) -> &mut [History] {
        if flow >= self.tensor.len() {
            self.tensor.resize((flow + 1) << 1, Vec::new());
        }
        if self.tensor[flow].is_empty() {
            let template = History::new(&self.spans);
            self.tensor[flow] = vec![template; self.num_nodes * self.num_nodes];
        }
        &mut self.tensor[flow]
    }

    pub fn history_mut(&mut self, flow: FlowId, source: NodeId, target: NodeId) -> &mut History {
        let offset = self.offset(source, target);
        &mut self.row_mut(flow)[offset]
    }

    /// The history of `(flow, source, target)`, if that row was observed.
    pub fn history(&self, flow: FlowId, source: NodeId, target: NodeId) -> Option<&History> {
        let row = self.tensor.get(flow)?;
        row.get(self.offset(source, target))
    }

    /// The slices of `(flow, source, target)`; empty if never observed.
    pub fn slices(&self, flow: FlowId, source: NodeId, target: NodeId) -> &[Slice] {
        self.history(flow, source, target)
            .map(|h| h.slices())
            .unwrap_or_default()
    }

    /// One rank per slice of `history`, over the global bounds.
    pub fn ranks(&self, history: &History) -> Vec<f64> {
        history.ranks(self.start_time, self.stop_time)
    }

    /// Zero every stored history and forget the observation bounds.
    pub fn reset(&mut self) {
        for row in &mut self.tensor {
            for history in row {
                history.reset();
            }
        }
        self.start_time = 0;
        self.stop_time = 0;
    }

    /// Collapse every history to an interval anchored at `t` and restart
    /// the observation window there.
    pub fn refresh(&mut self, t: Timestamp) {
        for row in &mut self.tensor {
            for history in row {
                history.refresh(t);
            }
        }
        self.start_time = t;
        self.stop_time = self.stop_time.max(t);
    }

    /// Advance the summary for every affected flow at time `t`.
    ///
    /// For each source present in the flow, a BFS over the installed
    /// next-hop chains starts the history of every reached `(source,
    /// target)` pair; afterwards every history of the row that was not
    /// (re-)started by this pass is stopped. The per-history `request_stop`
    /// flag exempts freshly started histories — including no-op double
    /// starts — from the stop sweep.
    pub fn update(
        &mut self,
        graph: &FlowGraph,
        affected_flows: &[FlowId],
        t: Timestamp,
    ) -> Result<(), SliceTooSmall> {
        let num_nodes = self.num_nodes;
        let mut stack: Vec<NodeId> = Vec::with_capacity(num_nodes);
        let mut reached = vec![false; num_nodes];
        for &flow in affected_flows {
            let row = self.row_mut(flow);
            for (&source, _) in &graph.flow(flow).data {
                let base = num_nodes * source as usize;
                stack.push(source);
                while let Some(n) = stack.pop() {
                    let Some(next_hops) = graph.next_hops(flow, n) else {
                        continue;
                    };
                    for &target in next_hops {
                        if reached[target as usize] {
                            continue;
                        }
                        let history = &mut row[base + target as usize];
                        history.start(t)?;
                        history.request_stop = false;
                        reached[target as usize] = true;
                        stack.push(target);
                    }
                }
                reached.fill(false);
            }
            for history in row.iter_mut() {
                if history.request_stop {
                    history.stop(t)?;
                } else {
                    history.request_stop = true;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn check_duration(slices: &[Slice], expected: Span) {
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].duration(), expected);
    }

    #[test]
    fn tensor_grows_on_demand() {
        let mut summary = ReachSummary::new(vec![10_000], 8);
        let history = summary.history_mut(1, 3, 5);
        assert_eq!(history.slices().len(), 1);
        history.start(1).unwrap();
        history.stop(13).unwrap();
        check_duration(summary.slices(1, 3, 5), 12);
        // pairs of the same row exist with zero duration; vacant rows are empty
        check_duration(summary.slices(1, 2, 5), 0);
        check_duration(summary.slices(1, 3, 4), 0);
        assert!(summary.slices(0, 3, 5).is_empty());
        assert!(summary.slices(7, 3, 5).is_empty());

        let history = summary.history_mut(1, 4, 5);
        history.start(2).unwrap();
        history.stop(17).unwrap();
        check_duration(summary.slices(1, 3, 5), 12);
        check_duration(summary.slices(1, 4, 5), 15);

        let history = summary.history_mut(1, 4, 7);
        history.start(5).unwrap();
        history.stop(22).unwrap();
        check_duration(summary.slices(1, 3, 5), 12);
        check_duration(summary.slices(1, 4, 5), 15);
        check_duration(summary.slices(1, 4, 7), 17);
    }

    #[test]
    fn bounds_track_observations() {
        let mut summary = ReachSummary::new(vec![100], 4);
        assert_eq!(summary.start_time(), 0);
        summary.observe(7);
        summary.observe(3);
        summary.observe(9);
        assert_eq!(summary.start_time(), 3);
        assert_eq!(summary.stop_time(), 9);
        summary.reset();
        assert_eq!(summary.start_time(), 0);
        assert_eq!(summary.stop_time(), 0);
    }
}
