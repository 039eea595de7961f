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
//! Path-preference summary: which of two competing end-to-end paths a flow
//! actually takes, scored over the time both were installable.
//!
//! Two temporal sources feed the comparison: directed-link liveness
//! (`link_up`/`link_down`) and per-flow route installation (the concrete
//! forwarding path walked from every source on each event). Unicast only.

use std::collections::{BTreeMap, HashMap};

use itertools::Itertools;

use crate::{
    analysis::AnalysisError,
    flow_graph::FlowGraph,
    history::{intersect, total_duration, History, SliceTooSmall},
    FlowId, NodeId, Span, Timestamp,
};

const ZERO_DIV_GUARD: f64 = 1e-5;

/// A concrete forwarding path: the visited routers in order, length >= 2.
pub type Path = Vec<NodeId>;

/// Interval sets per path, and per flow and path.
pub type PathTimestamps = BTreeMap<Path, Vec<Timestamp>>;
pub type RouteTimestamps = BTreeMap<FlowId, PathTimestamps>;

/// One pairwise comparison: the fraction of the time both paths were
/// installable during which the flow ran over `x_path`.
#[derive(Debug, Clone, PartialEq)]
pub struct PathPreference {
    pub flow_id: FlowId,
    pub x_path: Path,
    pub y_path: Path,
    pub rank: f64,
}

#[derive(Debug, Clone)]
pub struct PathPreferenceSummary {
    /// Zero or one slice: the longest configured span.
    span: Vec<Span>,
    /// Liveness of each directed link, keyed `(from, to)`.
    link_history: HashMap<(NodeId, NodeId), History>,
    /// Installation history of each concrete path, per flow.
    route_history: BTreeMap<FlowId, BTreeMap<Path, History>>,
}

impl PathPreferenceSummary {
    pub fn new(spans: &[Span]) -> Self {
        Self {
            span: spans.last().map(|&s| vec![s]).unwrap_or_default(),
            link_history: HashMap::new(),
            route_history: BTreeMap::new(),
        }
    }

    fn link(&mut self, from: NodeId, to: NodeId) -> &mut History {
        self.link_history
            .entry((from, to))
            .or_insert_with(|| History::new(&self.span))
    }

    /// Mark the directed link `from -> to` as existing at `t`.
    pub fn link_up(&mut self, from: NodeId, to: NodeId, t: Timestamp) -> Result<(), SliceTooSmall> {
        self.link(from, to).start(t)
    }

    /// Mark the directed link `from -> to` as gone at `t`.
    pub fn link_down(
        &mut self,
        from: NodeId,
        to: NodeId,
        t: Timestamp,
    ) -> Result<(), SliceTooSmall> {
        self.link(from, to).stop(t)
    }

    /// Advance the route histories of every affected flow at time `t`.
    ///
    /// Walks the forwarding path from each source present in the flow and
    /// starts that path's history; paths no longer walked are stopped. A
    /// path that was installed and superseded at the same instant never
    /// carried traffic and is dropped entirely. Fan-out above one is not
    /// supported by this analysis and aborts the event.
    pub fn update(
        &mut self,
        graph: &FlowGraph,
        affected_flows: &[FlowId],
        t: Timestamp,
    ) -> Result<(), AnalysisError> {
        for &flow in affected_flows {
            let histories = self.route_history.entry(flow).or_default();
            for (&source, _) in &graph.flow(flow).data {
                let mut path = vec![source];
                let mut node = source;
                while let Some(next_hops) = graph.next_hops(flow, node) {
                    if next_hops.len() > 1 {
                        return Err(AnalysisError::MulticastPathPreference);
                    }
                    let Some(&next) = next_hops.first() else {
                        break;
                    };
                    if path.contains(&next) {
                        // forwarding loop; the path ends where it closes
                        break;
                    }
                    path.push(next);
                    node = next;
                }
                if path.len() < 2 {
                    continue;
                }
                let history = histories
                    .entry(path)
                    .or_insert_with(|| History::new(&self.span));
                history.start(t)?;
                history.request_stop = false;
            }
            let mut dead = Vec::new();
            for (path, history) in histories.iter_mut() {
                if history.request_stop {
                    history.stop(t)?;
                    if history.is_on() {
                        // installed and superseded at the same instant
                        dead.push(path.clone());
                    }
                } else {
                    history.request_stop = true;
                }
            }
            for path in dead {
                histories.remove(&path);
            }
        }
        Ok(())
    }

    /// Liveness of a path: the intersection of the timestamp intervals of
    /// each consecutive link along it.
    fn liveness(&self, path: &[NodeId], g_end: Timestamp) -> Vec<Timestamp> {
        let mut acc: Option<Vec<Timestamp>> = None;
        for (from, to) in path.iter().copied().tuple_windows() {
            let link = self
                .link_history
                .get(&(from, to))
                .map(|h| h.timestamps(g_end))
                .unwrap_or_default();
            acc = Some(match acc {
                None => link,
                Some(previous) => intersect(&previous, &link),
            });
        }
        acc.unwrap_or_default()
    }

    /// Liveness intervals of every path observed in any flow.
    pub fn path_timestamps(&self, g_end: Timestamp) -> PathTimestamps {
        let mut out = PathTimestamps::new();
        for histories in self.route_history.values() {
            for path in histories.keys() {
                if !out.contains_key(path) {
                    out.insert(path.clone(), self.liveness(path, g_end));
                }
            }
        }
        out
    }

    /// Per flow and path, the intervals during which the route was both
    /// installed and physically live.
    pub fn route_timestamps(&self, g_end: Timestamp) -> RouteTimestamps {
        self.route_history
            .iter()
            .map(|(&flow, histories)| {
                let per_path = histories
                    .iter()
                    .map(|(path, history)| {
                        let installed = history.timestamps(g_end);
                        (path.clone(), intersect(&installed, &self.liveness(path, g_end)))
                    })
                    .collect();
                (flow, per_path)
            })
            .collect()
    }

    /// Compare, for every flow, each routed path `x` against every observed
    /// path `y` with the same endpoints. The rank divides the time `x` was
    /// routed while `y` was live by the time both paths were live; pairs
    /// that never coincide are omitted.
    pub fn path_preferences(&self, g_end: Timestamp) -> Vec<PathPreference> {
        let path_timestamps = self.path_timestamps(g_end);
        let route_timestamps = self.route_timestamps(g_end);
        let mut out = Vec::new();
        for (&flow_id, routes) in &route_timestamps {
            for (x_path, x_route) in routes {
                for (y_path, y_liveness) in &path_timestamps {
                    if y_path == x_path
                        || y_path.first() != x_path.first()
                        || y_path.last() != x_path.last()
                    {
                        continue;
                    }
                    let chosen = intersect(x_route, y_liveness);
                    if chosen.is_empty() {
                        continue;
                    }
                    let co_installable = intersect(&path_timestamps[x_path], y_liveness);
                    let rank = total_duration(&chosen) as f64
                        / (total_duration(&co_installable) as f64 + ZERO_DIV_GUARD);
                    out.push(PathPreference {
                        flow_id,
                        x_path: x_path.clone(),
                        y_path: y_path.clone(),
                        rank,
                    });
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn link_liveness_intersects_along_the_path() {
        let mut summary = PathPreferenceSummary::new(&[20]);
        summary.link_up(0, 1, 1).unwrap();
        summary.link_down(0, 1, 5).unwrap();
        summary.link_up(0, 1, 7).unwrap();
        summary.link_down(0, 1, 9).unwrap();
        summary.link_up(1, 2, 2).unwrap();
        summary.link_down(1, 2, 8).unwrap();
        assert_eq!(summary.liveness(&[0, 1], 10), vec![1, 5, 7, 9]);
        assert_eq!(summary.liveness(&[0, 1, 2], 10), vec![2, 5, 7, 8]);
        // a link never reported up contributes nothing
        assert!(summary.liveness(&[0, 1, 3], 10).is_empty());
    }

    #[test]
    fn open_links_close_at_the_global_end() {
        let mut summary = PathPreferenceSummary::new(&[100]);
        summary.link_up(0, 1, 3).unwrap();
        assert_eq!(summary.liveness(&[0, 1], 11), vec![3, 11]);
    }
}
