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
//! The single-writer analysis facade.
//!
//! Every event runs to completion in order: mutate the flow graph,
//! re-validate previously recorded loops on the affected flows, search the
//! affected flows for new loops, and — for timed events — advance the
//! global bounds and the temporal summaries.

use thiserror::Error;

use crate::{
    flow_graph::{AffectedFlows, FlowGraph},
    history::SliceTooSmall,
    loops::{check_loop, find_loops, LoopsPerFlow},
    path_preference::{PathPreference, PathPreferenceSummary, PathTimestamps, RouteTimestamps},
    prefix::IpPrefix,
    reach::ReachSummary,
    NodeId, Span, Timestamp,
};

/// Fatal violations of the engine's input contract. There is no rollback:
/// once one of these surfaces, the process is expected to exit with the
/// error's [`exit_code`](AnalysisError::exit_code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AnalysisError {
    /// Path preference compares single forwarding paths; a rule with more
    /// than one next hop has no unique path.
    #[error("path-preference analysis does not support multicast (fan-out > 1)")]
    MulticastPathPreference,
    #[error(transparent)]
    SliceTooSmall(#[from] SliceTooSmall),
}

impl AnalysisError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MulticastPathPreference => 1,
            Self::SliceTooSmall(_) => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Analysis {
    flow_graph: FlowGraph,
    affected_flows: AffectedFlows,
    loops_per_flow: LoopsPerFlow,
    reach: ReachSummary,
    path_preference: PathPreferenceSummary,
}

impl Analysis {
    /// An analysis without temporal summaries (no spans configured).
    pub fn new(num_nodes: usize) -> Self {
        Self::with_spans(Vec::new(), num_nodes)
    }

    /// An analysis summarizing over the given sliding-window spans, sorted
    /// in increasing order.
    pub fn with_spans(spans: Vec<Span>, num_nodes: usize) -> Self {
        let path_preference = PathPreferenceSummary::new(&spans);
        Self {
            flow_graph: FlowGraph::new(),
            affected_flows: AffectedFlows::new(),
            loops_per_flow: LoopsPerFlow::new(),
            reach: ReachSummary::new(spans, num_nodes),
            path_preference,
        }
    }

    /// Install or replace the rule `(prefix, source)` at `timestamp`.
    ///
    /// Returns true iff a new rule was created. `timestamp == 0` skips the
    /// temporal summaries.
    pub fn insert_or_assign(
        &mut self,
        prefix: IpPrefix,
        source: NodeId,
        target: &[NodeId],
        timestamp: Timestamp,
    ) -> Result<bool, AnalysisError> {
        self.affected_flows.clear();
        let created =
            self.flow_graph
                .insert_or_assign(prefix, source, target, &mut self.affected_flows);
        self.finish_event(source, timestamp)?;
        Ok(created)
    }

    /// Withdraw the rule `(prefix, source)` at `timestamp`.
    ///
    /// Returns true iff the rule existed.
    pub fn erase(
        &mut self,
        prefix: IpPrefix,
        source: NodeId,
        timestamp: Timestamp,
    ) -> Result<bool, AnalysisError> {
        self.affected_flows.clear();
        let existed = self
            .flow_graph
            .erase(prefix, source, &mut self.affected_flows);
        self.finish_event(source, timestamp)?;
        Ok(existed)
    }

    fn finish_event(&mut self, source: NodeId, timestamp: Timestamp) -> Result<(), AnalysisError> {
        self.clean_up();
        find_loops(
            &self.flow_graph,
            source,
            &self.affected_flows,
            &mut self.loops_per_flow,
        );
        if timestamp != 0 {
            self.reach.observe(timestamp);
            self.reach
                .update(&self.flow_graph, &self.affected_flows, timestamp)?;
            self.path_preference
                .update(&self.flow_graph, &self.affected_flows, timestamp)?;
        }
        Ok(())
    }

    /// Re-validate every previously recorded loop on an affected flow,
    /// dropping the ones the event broke.
    fn clean_up(&mut self) {
        for &flow in &self.affected_flows {
            let Some(loops) = self.loops_per_flow.get_mut(&flow) else {
                continue;
            };
            loops.retain(|candidate| check_loop(&self.flow_graph, flow, candidate));
            if loops.is_empty() {
                self.loops_per_flow.remove(&flow);
            }
        }
    }

    /// Record that the directed link `from -> to` came up at `timestamp`.
    pub fn link_up(
        &mut self,
        from: NodeId,
        to: NodeId,
        timestamp: Timestamp,
    ) -> Result<(), AnalysisError> {
        if timestamp == 0 {
            return Ok(());
        }
        self.reach.observe(timestamp);
        self.path_preference.link_up(from, to, timestamp)?;
        Ok(())
    }

    /// Record that the directed link `from -> to` went down at `timestamp`.
    pub fn link_down(
        &mut self,
        from: NodeId,
        to: NodeId,
        timestamp: Timestamp,
    ) -> Result<(), AnalysisError> {
        if timestamp == 0 {
            return Ok(());
        }
        self.reach.observe(timestamp);
        self.path_preference.link_down(from, to, timestamp)?;
        Ok(())
    }

    /// True iff no forwarding loop is currently known.
    pub fn ok(&self) -> bool {
        self.loops_per_flow.is_empty()
    }

    pub fn flow_graph(&self) -> &FlowGraph {
        &self.flow_graph
    }

    pub fn affected_flows(&self) -> &AffectedFlows {
        &self.affected_flows
    }

    pub fn loops_per_flow(&self) -> &LoopsPerFlow {
        &self.loops_per_flow
    }

    pub fn reach_summary(&self) -> &ReachSummary {
        &self.reach
    }

    pub fn reach_summary_mut(&mut self) -> &mut ReachSummary {
        &mut self.reach
    }

    pub fn path_preference_summary(&self) -> &PathPreferenceSummary {
        &self.path_preference
    }

    /// Zero every reachability history and forget the observation bounds.
    pub fn reset_reach_summary(&mut self) {
        self.reach.reset();
    }

    /// Collapse every reachability history to an interval anchored at
    /// `timestamp` without forgetting what is installed.
    pub fn refresh_reach_summary(&mut self, timestamp: Timestamp) {
        self.reach.refresh(timestamp);
    }

    /// Liveness intervals of every observed path, up to the latest
    /// observed timestamp.
    pub fn path_timestamps(&self) -> PathTimestamps {
        self.path_preference.path_timestamps(self.reach.stop_time())
    }

    /// Installed-and-live intervals per flow and path.
    pub fn route_timestamps(&self) -> RouteTimestamps {
        self.path_preference.route_timestamps(self.reach.stop_time())
    }

    /// All pairwise path preferences, ordered by flow and path.
    pub fn path_preferences(&self) -> Vec<PathPreference> {
        self.path_preference.path_preferences(self.reach.stop_time())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn p(s: &str) -> IpPrefix {
        s.parse().unwrap()
    }

    #[test]
    fn untimed_events_do_not_touch_the_summaries() {
        let mut analysis = Analysis::with_spans(vec![10], 4);
        analysis.insert_or_assign(p("0.0.0.0/28"), 0, &[1], 0).unwrap();
        assert_eq!(analysis.reach_summary().start_time(), 0);
        assert!(analysis.path_timestamps().is_empty());
    }

    #[test]
    fn broken_loops_are_cleaned_up() {
        let mut analysis = Analysis::new(3);
        analysis.insert_or_assign(p("0.0.0.0/28"), 0, &[1], 0).unwrap();
        analysis.insert_or_assign(p("0.0.0.0/28"), 1, &[2], 0).unwrap();
        analysis.insert_or_assign(p("0.0.0.0/28"), 2, &[0], 0).unwrap();
        assert!(!analysis.ok());
        analysis.erase(p("0.0.0.0/28"), 1, 0).unwrap();
        assert!(analysis.ok());
    }

    #[test]
    fn multicast_is_rejected_by_path_preference() {
        let mut analysis = Analysis::with_spans(vec![10], 4);
        let result = analysis.insert_or_assign(p("0.0.0.0/28"), 0, &[1, 2], 5);
        assert_eq!(result, Err(AnalysisError::MulticastPathPreference));
        assert_eq!(result.unwrap_err().exit_code(), 1);
    }
}
