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
//! The JSON event stream produced by the BMP collector: a sequence of
//! whitespace-separated documents, each either a command for the analyzer
//! or a BMP message. Only route-monitoring messages (header type 0) carry
//! routing information.

use std::net::Ipv4Addr;

use serde::Deserialize;
use thiserror::Error;

use crate::{prefix::IpPrefix, rdns::NodeTable, NodeId, Timestamp};

/// The BGP path-attribute type carrying the next hop.
const NEXT_HOP_ATTRIBUTE: u8 = 3;

/// A next hop of `0.0.0.0` announces nothing installable.
const NULL_NEXT_HOP: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

/// One document of the input stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StreamItem {
    Command {
        #[serde(rename = "Command")]
        command: u8,
    },
    Message(BmpMessage),
}

/// Commands interleaved with the BMP messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Zero all reachability histories.
    ResetReachSummary,
    /// Emit the full log, ignoring the configured verbosity.
    EmitLog,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(raw: u8) -> Result<Self, u8> {
        match raw {
            0 => Ok(Self::ResetReachSummary),
            1 => Ok(Self::EmitLog),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BmpMessage {
    #[serde(rename = "Header")]
    pub header: Header,
    #[serde(rename = "PeerHeader")]
    pub peer_header: Option<PeerHeader>,
    #[serde(rename = "Body")]
    pub body: Option<Body>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    #[serde(rename = "Type")]
    pub kind: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerHeader {
    #[serde(rename = "PeerBGPID")]
    pub peer_bgp_id: Ipv4Addr,
    #[serde(rename = "Timestamp")]
    pub timestamp: TimestampValue,
}

/// Collector timestamps arrive as integer or fractional seconds.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum TimestampValue {
    Integer(u64),
    Float(f64),
}

impl TimestampValue {
    pub fn as_timestamp(self) -> Timestamp {
        match self {
            Self::Integer(seconds) => seconds,
            Self::Float(seconds) => seconds as Timestamp,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Body {
    #[serde(rename = "BGPUpdate")]
    pub bgp_update: Option<BgpUpdate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BgpUpdate {
    #[serde(rename = "Body")]
    pub body: BgpUpdateBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BgpUpdateBody {
    #[serde(rename = "PathAttributes", default)]
    pub path_attributes: Vec<PathAttribute>,
    #[serde(rename = "NLRI", default)]
    pub nlri: Vec<Route>,
    #[serde(rename = "WithdrawnRoutes", default)]
    pub withdrawn_routes: Vec<Route>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathAttribute {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(rename = "nexthop")]
    pub next_hop: Option<Ipv4Addr>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Route {
    pub prefix: IpPrefix,
}

/// A route-monitoring message translated to engine terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteUpdate {
    pub source: NodeId,
    pub timestamp: Timestamp,
    /// Prefixes to install, with their resolved next-hop node.
    pub announced: Vec<(IpPrefix, NodeId)>,
    /// Prefixes to withdraw.
    pub withdrawn: Vec<IpPrefix>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BmpError {
    #[error("route-monitoring message without a {0} section")]
    Missing(&'static str),
    #[error("peer {0} is not in the rDNS map")]
    UnknownPeer(Ipv4Addr),
    #[error("next hop {0} is not in the rDNS map")]
    UnknownNextHop(Ipv4Addr),
}

impl BmpMessage {
    /// Translate a route-monitoring message; other message types yield
    /// `None` and are skipped.
    pub fn route_update(&self, nodes: &NodeTable) -> Result<Option<RouteUpdate>, BmpError> {
        if self.header.kind != 0 {
            return Ok(None);
        }
        let peer = self
            .peer_header
            .as_ref()
            .ok_or(BmpError::Missing("PeerHeader"))?;
        let update = self
            .body
            .as_ref()
            .and_then(|body| body.bgp_update.as_ref())
            .ok_or(BmpError::Missing("BGPUpdate"))?;
        let source = nodes
            .node(peer.peer_bgp_id)
            .ok_or(BmpError::UnknownPeer(peer.peer_bgp_id))?;

        let next_hop = update
            .body
            .path_attributes
            .iter()
            .filter(|attribute| attribute.kind == NEXT_HOP_ATTRIBUTE)
            .find_map(|attribute| attribute.next_hop);

        let mut announced = Vec::new();
        if let Some(next_hop) = next_hop {
            if next_hop != NULL_NEXT_HOP {
                let target = nodes
                    .node(next_hop)
                    .ok_or(BmpError::UnknownNextHop(next_hop))?;
                announced.extend(update.body.nlri.iter().map(|route| (route.prefix, target)));
            }
        }
        let withdrawn = update
            .body
            .withdrawn_routes
            .iter()
            .map(|route| route.prefix)
            .collect();

        Ok(Some(RouteUpdate {
            source,
            timestamp: peer.timestamp.as_timestamp(),
            announced,
            withdrawn,
        }))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rdns::RdnsFile;

    fn nodes() -> NodeTable {
        let file: RdnsFile = serde_json::from_str(
            r#"{"routers": [
                {"name": "r0", "ifaces": ["10.0.0.1"]},
                {"name": "r1", "ifaces": ["10.0.0.2"]}
            ]}"#,
        )
        .unwrap();
        NodeTable::from_rdns(&file)
    }

    const ANNOUNCE: &str = r#"{
        "Header": {"Type": 0},
        "PeerHeader": {"PeerBGPID": "10.0.0.1", "Timestamp": 1541.25},
        "Body": {"BGPUpdate": {"Body": {
            "PathAttributes": [
                {"type": 1, "value": 0},
                {"type": 3, "nexthop": "10.0.0.2"}
            ],
            "NLRI": [{"prefix": "192.168.0.0/16"}],
            "WithdrawnRoutes": []
        }}}
    }"#;

    #[test]
    fn announce_is_translated() {
        let item: StreamItem = serde_json::from_str(ANNOUNCE).unwrap();
        let StreamItem::Message(message) = item else {
            panic!("expected a BMP message");
        };
        let update = message.route_update(&nodes()).unwrap().unwrap();
        assert_eq!(update.source, 0);
        assert_eq!(update.timestamp, 1541);
        assert_eq!(
            update.announced,
            vec![("192.168.0.0/16".parse().unwrap(), 1)]
        );
        assert!(update.withdrawn.is_empty());
    }

    #[test]
    fn withdraw_and_null_next_hop() {
        let raw = r#"{
            "Header": {"Type": 0},
            "PeerHeader": {"PeerBGPID": "10.0.0.2", "Timestamp": 7},
            "Body": {"BGPUpdate": {"Body": {
                "PathAttributes": [{"type": 3, "nexthop": "0.0.0.0"}],
                "NLRI": [{"prefix": "10.1.0.0/16"}],
                "WithdrawnRoutes": [{"prefix": "192.168.0.0/16"}]
            }}}
        }"#;
        let message: BmpMessage = serde_json::from_str(raw).unwrap();
        let update = message.route_update(&nodes()).unwrap().unwrap();
        assert_eq!(update.source, 1);
        // a null next hop disables installs, withdrawals still apply
        assert!(update.announced.is_empty());
        assert_eq!(update.withdrawn, vec!["192.168.0.0/16".parse().unwrap()]);
    }

    #[test]
    fn non_route_monitoring_is_skipped() {
        let raw = r#"{"Header": {"Type": 4}, "Peer": "whatever"}"#;
        let message: BmpMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(message.route_update(&nodes()).unwrap(), None);
    }

    #[test]
    fn commands_parse() {
        let item: StreamItem = serde_json::from_str(r#"{"Command": 0}"#).unwrap();
        let StreamItem::Command { command } = item else {
            panic!("expected a command");
        };
        assert_eq!(Command::try_from(command), Ok(Command::ResetReachSummary));
        assert_eq!(Command::try_from(9), Err(9));
    }

    #[test]
    fn unknown_peer_is_an_adapter_error() {
        let raw = r#"{
            "Header": {"Type": 0},
            "PeerHeader": {"PeerBGPID": "10.9.9.9", "Timestamp": 7},
            "Body": {"BGPUpdate": {"Body": {
                "PathAttributes": [], "NLRI": [], "WithdrawnRoutes": []
            }}}
        }"#;
        let message: BmpMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            message.route_update(&nodes()),
            Err(BmpError::UnknownPeer(_))
        ));
    }
}
