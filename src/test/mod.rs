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
//! End-to-end scenarios driving the full analysis facade.

use crate::prefix::IpPrefix;


/// Covers addresses 0..=15.
pub fn prefix_0_15() -> IpPrefix {
    p("0.0.0.0/28")
}

/// Covers addresses 0..=7.
pub fn prefix_0_7() -> IpPrefix {
    p("0.0.0.0/29")
}

/// Covers addresses 8..=15.
pub fn prefix_8_15() -> IpPrefix {
    p("0.0.0.8/29")
}

/// Covers addresses 64..=127.
pub fn prefix_64_127() -> IpPrefix {
    p("0.0.0.64/26")
}

pub fn p(s: &str) -> IpPrefix {
    s.parse().unwrap()
}
