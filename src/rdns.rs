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
//! Reverse-DNS input: maps router names and their interface addresses to
//! dense node ids, assigned in first-seen order.

use std::{collections::HashMap, io, net::Ipv4Addr};

use serde::Deserialize;
use thiserror::Error;

use crate::NodeId;

#[derive(Debug, Clone, Deserialize)]
pub struct RdnsFile {
    pub routers: Vec<RdnsRouter>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RdnsRouter {
    pub name: String,
    pub ifaces: Vec<Ipv4Addr>,
}

#[derive(Debug, Error)]
pub enum RdnsError {
    #[error("malformed rDNS JSON object: {0}")]
    Json(#[from] serde_json::Error),
    #[error("rDNS map is empty")]
    Empty,
}

/// The router table built from an rDNS file.
#[derive(Debug, Clone, Default)]
pub struct NodeTable {
    names: Vec<String>,
    ip_to_node: HashMap<Ipv4Addr, NodeId>,
}

impl NodeTable {
    pub fn from_reader(reader: impl io::Read) -> Result<Self, RdnsError> {
        let file: RdnsFile = serde_json::from_reader(reader)?;
        let table = Self::from_rdns(&file);
        if table.ip_to_node.is_empty() {
            return Err(RdnsError::Empty);
        }
        Ok(table)
    }

    pub fn from_rdns(file: &RdnsFile) -> Self {
        let mut table = Self::default();
        let mut name_to_node: HashMap<&str, NodeId> = HashMap::new();
        for router in &file.routers {
            for &iface in &router.ifaces {
                let node = *name_to_node.entry(router.name.as_str()).or_insert_with(|| {
                    table.names.push(router.name.clone());
                    (table.names.len() - 1) as NodeId
                });
                table.ip_to_node.insert(iface, node);
            }
        }
        table
    }

    /// Number of known routers; every node id is strictly below this.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, node: NodeId) -> &str {
        &self.names[node as usize]
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn node(&self, ip: Ipv4Addr) -> Option<NodeId> {
        self.ip_to_node.get(&ip).copied()
    }
}
