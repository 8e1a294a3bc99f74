//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use ipnetwork::{IpNetwork, Ipv4Network};
use nbrd_utils::ibus::IbusChannelsTx;
use nbrd_utils::protocol::Protocol;
use nbrd_utils::southbound::{
    DISTANCE_OSPF, Nexthop, RouteKeyMsg, RouteMsg,
};

use crate::route::RouteNet;

// Default interface cost.
pub const DFLT_COST: u16 = 10;

// ===== global functions =====

// Requests the installation of the given route in the kernel RIB.
pub(crate) fn route_install(
    ibus_tx: &IbusChannelsTx,
    prefix: Ipv4Network,
    route: &RouteNet,
) {
    let msg = RouteMsg {
        protocol: Protocol::OSPFV2,
        prefix: IpNetwork::V4(prefix),
        distance: DISTANCE_OSPF,
        metric: route.metric,
        nexthops: route
            .nexthops
            .iter()
            .map(|nexthop| match nexthop.addr {
                Some(addr) => Nexthop::Address {
                    ifindex: nexthop.ifindex,
                    addr: addr.into(),
                },
                None => Nexthop::Interface {
                    ifindex: nexthop.ifindex,
                },
            })
            .collect(),
    };
    ibus_tx.route_add(msg);
}

// Requests the withdrawal of the given route from the kernel RIB.
pub(crate) fn route_uninstall(ibus_tx: &IbusChannelsTx, prefix: Ipv4Network) {
    let msg = RouteKeyMsg {
        protocol: Protocol::OSPFV2,
        prefix: IpNetwork::V4(prefix),
    };
    ibus_tx.route_del(msg);
}
