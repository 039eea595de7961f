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
//! Library for reconstructing and analyzing the data planes induced by a
//! stream of BGP routing updates, as observed by a BMP collector.
//!
//! The stream is translated into rule installs and withdrawals on a
//! [`flow_graph::FlowGraph`]. On every event, the [`analysis::Analysis`]
//! facade recomputes the forwarding loops among the affected flows and
//! advances the temporal summaries: a per-`(flow, source, target)`
//! [`reach::ReachSummary`] of delivery uptime, and a
//! [`path_preference::PathPreferenceSummary`] comparing competing paths by
//! the fraction of time they were simultaneously installable.

/// Dense identifier of a router.
pub type NodeId = u32;

/// Identifier of a flow, i.e. of a node in the prefix tree.
pub type FlowId = usize;

/// Event time. The value `0` is the "no time" sentinel: events carrying it
/// do not advance the temporal summaries.
pub type Timestamp = u64;

/// Length of a time interval, in the same unit as [`Timestamp`].
pub type Span = u64;

/// Upper bound on the number of routers an analysis can observe.
pub const MAX_NODES: usize = 4096;

pub mod analysis;
pub mod bmp;
pub mod flow_graph;
pub mod history;
pub mod loops;
pub mod path_preference;
pub mod prefix;
pub mod prefix_tree;
pub mod rdns;
pub mod reach;
pub mod report;

#[cfg(test)]
mod test;

pub mod prelude {
    pub use super::{
        analysis::{Analysis, AnalysisError},
        flow_graph::FlowGraph,
        prefix::{IpPrefix, IpRange},
        FlowId, NodeId, Span, Timestamp,
    };
}
