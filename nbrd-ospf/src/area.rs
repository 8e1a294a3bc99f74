//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use crate::collections::{Interfaces, Lsdb};
use crate::packet::lsa::LsaKey;

// ID of the only area this speaker attaches to.
pub const BACKBONE_AREA_ID: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

// The backbone area: the set of attached interfaces plus the area-scope
// link-state database.
#[derive(Debug, Default)]
pub struct Area {
    // Interfaces attached to the area.
    pub interfaces: Interfaces,
    // Area state data.
    pub state: AreaState,
}

#[derive(Debug, Default)]
pub struct AreaState {
    // Area-scope LSDB (LSA types 1-4).
    pub lsdb: Lsdb,
    // Key of the self-originated Router-LSA, if one was originated.
    pub router_lsa_self: Option<LsaKey>,
}
