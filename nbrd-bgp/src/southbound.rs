//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use ipnetwork::IpNetwork;
use nbrd_utils::ibus::IbusChannelsTx;
use nbrd_utils::protocol::Protocol;
use nbrd_utils::southbound::{Nexthop, RouteKeyMsg, RouteMsg};

use crate::rib::LocalRoute;

// ===== global functions =====

// Requests the installation of the given route in the kernel RIB.
pub(crate) fn route_install(
    ibus_tx: &IbusChannelsTx,
    prefix: IpNetwork,
    route: &LocalRoute,
    distance: u8,
) {
    let msg = RouteMsg {
        protocol: Protocol::BGP,
        prefix,
        distance,
        metric: route.attrs.base.med.unwrap_or(0),
        nexthops: [Nexthop::Address {
            // The outgoing interface is resolved by the kernel RIB through
            // a recursive lookup on the nexthop address.
            ifindex: 0,
            addr: route.nexthop,
        }]
        .into(),
    };
    ibus_tx.route_add(msg);
}

// Requests the withdrawal of the given route from the kernel RIB.
pub(crate) fn route_uninstall(ibus_tx: &IbusChannelsTx, prefix: IpNetwork) {
    let msg = RouteKeyMsg {
        protocol: Protocol::BGP,
        prefix,
    };
    ibus_tx.route_del(msg);
}
