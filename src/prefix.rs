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
//! IPv4 prefix algebra: value types, overlap and subset predicates, and the
//! prefix order used to key the prefix tree.

use std::{cmp::Ordering, fmt, net::Ipv4Addr, str::FromStr};

use ipnet::Ipv4Net;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// An IPv4 prefix, stored as the network address together with the
/// *complement* of the network mask (all bits outside the prefix set).
///
/// This representation makes overlap and containment single bit operations:
/// two prefixes overlap iff their addresses differ only in host bits of one
/// of them.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpPrefix {
    addr: u32,
    mask: u32,
}

impl IpPrefix {
    /// The length of an IPv4 address in bits.
    pub const MAX_LEN: u8 = 32;

    /// The default route `0.0.0.0/0`, containing every address.
    pub const DEFAULT: Self = Self {
        addr: 0,
        mask: u32::MAX,
    };

    /// Build a prefix from a network address and a prefix length.
    ///
    /// Host bits of `addr` must be zero.
    pub fn new(addr: Ipv4Addr, len: u8) -> Self {
        assert!(len <= Self::MAX_LEN);
        let mask = u32::MAX.checked_shr(u32::from(len)).unwrap_or(0);
        let addr = u32::from(addr);
        debug_assert_eq!(addr & mask, 0, "host bits must be zero");
        Self { addr, mask }
    }

    /// The network address.
    pub fn addr(&self) -> u32 {
        self.addr
    }

    /// The complement of the network mask (host bits set).
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// The prefix length.
    pub fn len(&self) -> u8 {
        (Self::MAX_LEN as u32 - self.mask.count_ones()) as u8
    }

    /// True iff the two prefixes share at least one address.
    pub fn overlaps(&self, other: &Self) -> bool {
        (self.addr ^ other.addr) <= (self.mask | other.mask)
    }

    /// True iff every address of `self` is contained in `other`.
    pub fn is_subset_of(&self, other: &Self) -> bool {
        (self.addr ^ other.addr) <= other.mask && self.mask <= other.mask
    }

    /// The inclusive address range covered by this prefix.
    pub fn range(&self) -> IpRange {
        IpRange {
            low: self.addr,
            high: self.addr + self.mask,
        }
    }
}

impl Default for IpPrefix {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Prefixes are ordered by address ascending and, at equal addresses, by
/// mask descending, so that a prefix directly precedes all its strict
/// subsets starting at the same address. `lower_bound`-style queries under
/// this order drive the prefix-tree navigation.
impl Ord for IpPrefix {
    fn cmp(&self, other: &Self) -> Ordering {
        self.addr
            .cmp(&other.addr)
            .then_with(|| other.mask.cmp(&self.mask))
    }
}

impl PartialOrd for IpPrefix {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<Ipv4Net> for IpPrefix {
    fn from(net: Ipv4Net) -> Self {
        Self::new(net.network(), net.prefix_len())
    }
}

impl From<IpPrefix> for Ipv4Net {
    fn from(prefix: IpPrefix) -> Self {
        Ipv4Net::new(Ipv4Addr::from(prefix.addr), prefix.len())
            .expect("prefix length is at most 32")
    }
}

impl FromStr for IpPrefix {
    type Err = ipnet::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let net: Ipv4Net = s.parse()?;
        Ok(net.trunc().into())
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", Ipv4Addr::from(self.addr), self.len())
    }
}

impl fmt::Debug for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for IpPrefix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IpPrefix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// An inclusive range of IPv4 addresses.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpRange {
    pub low: u32,
    pub high: u32,
}

impl IpRange {
    pub fn new(low: u32, high: u32) -> Self {
        debug_assert!(low <= high);
        Self { low, high }
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        !(self.high < other.low || other.high < self.low)
    }

    pub fn is_subset_of(&self, other: &Self) -> bool {
        other.low <= self.low && self.high <= other.high
    }
}

impl From<IpPrefix> for IpRange {
    fn from(prefix: IpPrefix) -> Self {
        prefix.range()
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}]",
            Ipv4Addr::from(self.low),
            Ipv4Addr::from(self.high)
        )
    }
}

impl fmt::Debug for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
