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
//! JSON result emission.
//!
//! After each event (and on demand), the analysis snapshot is rendered as
//! one JSON object per line with up to four sections — `nodes`,
//! `network-summary`, `flows` and `errors` — gated by the configured
//! verbosity. Empty reports are suppressed.

use std::{collections::BTreeMap, io, net::Ipv4Addr};

use itertools::Itertools;
use serde::Serialize;

use crate::{
    analysis::Analysis,
    prefix_tree::ROOT,
    rdns::NodeTable,
    FlowId, NodeId, Span,
};

/// Which sections appear in the emitted log.
///
/// Levels: 0 silent, 1 forwarding loops, 4 adds affected-flow details, 5
/// adds the summary for affected flows, 6 reports all flows, 7 adds the
/// summary for all flows. Summary-bearing levels require configured spans.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub verbosity: u8,
    pub node_ids: bool,
    pub rank_threshold: f64,
    pub spans: Vec<Span>,
}

/// Either a router name or its numeric id, depending on `--node-ids`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum NodeRef<'a> {
    Name(&'a str),
    Id(NodeId),
}

#[derive(Debug, Serialize)]
struct NodeEntry<'a> {
    id: NodeId,
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct RangeEntry {
    low: Ipv4Addr,
    high: Ipv4Addr,
}

#[derive(Debug, Serialize)]
struct LinkEntry<'a> {
    source: NodeRef<'a>,
    target: Vec<NodeRef<'a>>,
}

#[derive(Debug, Serialize)]
struct FlowEntry<'a> {
    flow: String,
    ranges: Vec<RangeEntry>,
    links: Vec<LinkEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct EdgeEntry<'a> {
    source: NodeRef<'a>,
    target: NodeRef<'a>,
    #[serde(flatten)]
    ranks: BTreeMap<String, f64>,
}

#[derive(Debug, Serialize)]
struct FlowSummary<'a> {
    flow: String,
    edges: Vec<EdgeEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct FlowErrors<'a> {
    flow: String,
    #[serde(rename = "forwarding-loops")]
    forwarding_loops: Vec<Vec<NodeRef<'a>>>,
}

#[derive(Debug, Default, Serialize)]
struct Report<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    nodes: Option<Vec<NodeEntry<'a>>>,
    #[serde(rename = "network-summary", skip_serializing_if = "Option::is_none")]
    network_summary: Option<Vec<FlowSummary<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flows: Option<Vec<FlowEntry<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<FlowErrors<'a>>>,
}

impl Report<'_> {
    fn is_empty(&self) -> bool {
        self.nodes.is_none()
            && self.network_summary.is_none()
            && self.flows.is_none()
            && self.errors.is_none()
    }
}

pub struct Reporter<'a, W> {
    out: W,
    nodes: &'a NodeTable,
    options: ReportOptions,
}

impl<'a, W: io::Write> Reporter<'a, W> {
    pub fn new(out: W, nodes: &'a NodeTable, options: ReportOptions) -> Self {
        Self { out, nodes, options }
    }

    /// Emit one JSON object describing the analysis snapshot, if anything
    /// is visible at the configured verbosity.
    pub fn emit(&mut self, analysis: &Analysis, ignore_verbosity: bool) -> io::Result<()> {
        let builder = ReportBuilder {
            nodes: self.nodes,
            options: &self.options,
            analysis,
        };
        let report = builder.build(ignore_verbosity);
        if report.is_empty() {
            return Ok(());
        }
        serde_json::to_writer(&mut self.out, &report)?;
        writeln!(self.out)
    }
}

struct ReportBuilder<'n> {
    nodes: &'n NodeTable,
    options: &'n ReportOptions,
    analysis: &'n Analysis,
}

impl<'n> ReportBuilder<'n> {
    fn build(&self, ignore_verbosity: bool) -> Report<'n> {
        let verbosity = self.options.verbosity;
        let mut report = Report::default();
        if self.options.node_ids {
            report.nodes = Some(
                self.nodes
                    .names()
                    .enumerate()
                    .map(|(id, name)| NodeEntry {
                        id: id as NodeId,
                        name,
                    })
                    .collect(),
            );
        }
        if !self.options.spans.is_empty() {
            if ignore_verbosity || verbosity >= 7 {
                report.network_summary = Some(self.summaries(self.all_flows()));
            } else if verbosity >= 5 {
                report.network_summary =
                    Some(self.summaries(self.analysis.affected_flows().iter().copied()));
            }
        }
        if ignore_verbosity || verbosity >= 6 {
            report.flows = Some(self.flows(self.all_flows()));
        } else if verbosity >= 4 {
            report.flows = Some(self.flows(self.analysis.affected_flows().iter().copied()));
        }
        if ignore_verbosity || verbosity >= 1 {
            let errors = self.errors();
            if !errors.is_empty() {
                report.errors = Some(errors);
            }
        }
        report
    }

    fn all_flows(&self) -> impl Iterator<Item = FlowId> + 'n {
        self.analysis.flow_graph().flow_tree().descendants(ROOT)
    }

    fn node_ref(&self, node: NodeId) -> NodeRef<'n> {
        if self.options.node_ids {
            NodeRef::Id(node)
        } else {
            NodeRef::Name(self.nodes.name(node))
        }
    }

    fn flows(&self, flows: impl Iterator<Item = FlowId>) -> Vec<FlowEntry<'n>> {
        let graph = self.analysis.flow_graph();
        let tree = graph.flow_tree();
        flows
            .filter_map(|id| {
                let flow = &tree[id];
                if flow.is_covered() || flow.data.is_empty() {
                    return None;
                }
                let links = flow
                    .data
                    .iter()
                    .map(|(&source, owner)| LinkEntry {
                        source: self.node_ref(source),
                        target: graph
                            .rule(owner)
                            .expect("flow data refers to installed rules")
                            .target
                            .iter()
                            .map(|&t| self.node_ref(t))
                            .collect(),
                    })
                    .collect();
                Some(FlowEntry {
                    flow: flow.prefix().to_string(),
                    ranges: tree
                        .disjoint_ranges(id)
                        .into_iter()
                        .map(|range| RangeEntry {
                            low: Ipv4Addr::from(range.low),
                            high: Ipv4Addr::from(range.high),
                        })
                        .collect(),
                    links,
                })
            })
            .collect()
    }

    fn summaries(&self, flows: impl Iterator<Item = FlowId>) -> Vec<FlowSummary<'n>> {
        flows.filter_map(|id| self.flow_summary(id)).collect()
    }

    fn flow_summary(&self, id: FlowId) -> Option<FlowSummary<'n>> {
        let flow = &self.analysis.flow_graph().flow_tree()[id];
        if flow.is_covered() {
            return None;
        }
        let reach = self.analysis.reach_summary();
        let num_nodes = self.nodes.len() as NodeId;
        let mut edges = Vec::new();
        for source in 0..num_nodes {
            for target in 0..num_nodes {
                if source == target {
                    continue;
                }
                let Some(history) = reach.history(id, source, target) else {
                    continue;
                };
                if history.slices().is_empty() {
                    continue;
                }
                let ranks = reach.ranks(history);
                if ranks.len() == 2 {
                    let distance = (ranks[0] - ranks[1]).abs();
                    if distance < self.options.rank_threshold {
                        continue;
                    }
                }
                if ranks.iter().all(|&rank| rank == 0.0) {
                    continue;
                }
                edges.push(EdgeEntry {
                    source: self.node_ref(source),
                    target: self.node_ref(target),
                    ranks: ranks
                        .into_iter()
                        .enumerate()
                        .map(|(i, rank)| (format!("rank-{i}"), rank))
                        .collect(),
                });
            }
        }
        if edges.is_empty() {
            return None;
        }
        Some(FlowSummary {
            flow: flow.prefix().to_string(),
            edges,
        })
    }

    fn errors(&self) -> Vec<FlowErrors<'n>> {
        let tree = self.analysis.flow_graph().flow_tree();
        self.analysis
            .loops_per_flow()
            .iter()
            .filter(|(_, loops)| !loops.is_empty())
            .sorted_by_key(|(&flow, _)| flow)
            .map(|(&flow, loops)| FlowErrors {
                flow: tree[flow].prefix().to_string(),
                forwarding_loops: loops
                    .iter()
                    .map(|l| l.iter().map(|&n| self.node_ref(n)).collect())
                    .collect(),
            })
            .collect()
    }
}
