//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::instance::InstanceUpView;
use crate::southbound;

// OSPF route path types, in decreasing order of preference.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum PathType {
    IntraArea,
    InterArea,
    External1,
    External2,
}

// Route nexthop. The address is unset for directly attached networks.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Nexthop {
    pub ifindex: u32,
    pub addr: Option<Ipv4Addr>,
}

pub type Nexthops = BTreeSet<Nexthop>;

// Network routing table entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouteNet {
    pub path_type: PathType,
    pub metric: u32,
    // External type-2 routes carry the advertised metric separately.
    pub type2_metric: Option<u32>,
    pub nexthops: Nexthops,
}

// ===== impl RouteNet =====

impl RouteNet {
    // Returns whether this route is preferred over `other`, per RFC 2328
    // section 11.1.
    pub(crate) fn is_preferred(&self, other: &RouteNet) -> bool {
        if self.path_type != other.path_type {
            return self.path_type < other.path_type;
        }
        if self.path_type == PathType::External2
            && self.type2_metric != other.type2_metric
        {
            return self.type2_metric < other.type2_metric;
        }

        self.metric < other.metric
    }
}

// ===== global functions =====

// Replaces the instance routing table with the newly computed one,
// propagating the differences to the kernel RIB.
pub(crate) fn update_rib(
    instance: &mut InstanceUpView<'_>,
    new_rib: BTreeMap<Ipv4Network, RouteNet>,
) {
    let old_rib = std::mem::take(&mut instance.state.rib);

    // Withdraw routes that no longer exist.
    for prefix in old_rib.keys() {
        if !new_rib.contains_key(prefix) {
            southbound::route_uninstall(&instance.tx.ibus, *prefix);
        }
    }

    // Install new and updated routes.
    for (prefix, route) in &new_rib {
        if old_rib.get(prefix) != Some(route) {
            southbound::route_install(&instance.tx.ibus, *prefix, route);
        }
    }

    instance.state.rib = new_rib;
}
