//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use nbrd_utils::protocol::Protocol;
use nbrd_utils::southbound::Nexthop;
use rtnetlink::{Handle, new_connection};
use tracing::error;

use crate::rib::Route;

// Route protocol types as defined in the rtnetlink.h kernel header.
const NETLINK_PROTO_UNSPEC: u8 = 0;
const NETLINK_PROTO_BGP: u8 = 186;
const NETLINK_PROTO_OSPF: u8 = 188;

fn netlink_protocol(protocol: Protocol) -> u8 {
    match protocol {
        Protocol::BGP => NETLINK_PROTO_BGP,
        Protocol::OSPFV2 => NETLINK_PROTO_OSPF,
        _ => NETLINK_PROTO_UNSPEC,
    }
}

// Installs or replaces the given route in the kernel. Returns whether the
// request succeeded.
pub(crate) async fn ip_route_install(
    handle: &Handle,
    prefix: &IpNetwork,
    route: &Route,
) -> bool {
    // Create netlink request.
    let mut request = handle.route().add();

    // Set route protocol.
    let protocol = netlink_protocol(route.protocol);
    request = request.protocol(netlink_packet_route::route::RouteProtocol::Other(protocol));

    match prefix {
        IpNetwork::V4(prefix) => {
            // Set destination prefix. Replace is atomic from the kernel's
            // perspective.
            let mut request = request
                .v4()
                .replace()
                .destination_prefix(prefix.ip(), prefix.prefix());

            // Add nexthops.
            for nexthop in route.nexthops.iter() {
                request = match nexthop {
                    Nexthop::Address { addr, ifindex } => {
                        if let IpAddr::V4(addr) = addr {
                            let request = request.gateway(*addr);
                            if *ifindex != 0 {
                                request.output_interface(*ifindex)
                            } else {
                                request
                            }
                        } else {
                            request
                        }
                    }
                    Nexthop::Interface { ifindex } => {
                        request.output_interface(*ifindex)
                    }
                };
            }

            // Execute request.
            if let Err(err) = request.execute().await {
                error!(%prefix, error = %err, "failed to install route");
                return false;
            }
        }
        IpNetwork::V6(prefix) => {
            // Set destination prefix.
            let mut request = request
                .v6()
                .replace()
                .destination_prefix(prefix.ip(), prefix.prefix());

            // Add nexthops.
            for nexthop in route.nexthops.iter() {
                request = match nexthop {
                    Nexthop::Address { addr, ifindex } => {
                        if let IpAddr::V6(addr) = addr {
                            let request = request.gateway(*addr);
                            if *ifindex != 0 {
                                request.output_interface(*ifindex)
                            } else {
                                request
                            }
                        } else {
                            request
                        }
                    }
                    Nexthop::Interface { ifindex } => {
                        request.output_interface(*ifindex)
                    }
                };
            }

            // Execute request.
            if let Err(err) = request.execute().await {
                error!(%prefix, error = %err, "failed to install route");
                return false;
            }
        }
    }

    true
}

// Removes the given route from the kernel.
pub(crate) async fn ip_route_uninstall(handle: &Handle, prefix: &IpNetwork) {
    // Fetch all routes of the matching address family and delete the ones
    // covering the prefix.
    use netlink_packet_route::route::RouteMessage;

    let ip_version = match prefix {
        IpNetwork::V4(_) => rtnetlink::IpVersion::V4,
        IpNetwork::V6(_) => rtnetlink::IpVersion::V6,
    };

    use futures_util::TryStreamExt;
    let mut routes = handle.route().get(ip_version).execute();
    loop {
        let route: Option<RouteMessage> = match routes.try_next().await {
            Ok(route) => route,
            Err(err) => {
                error!(%prefix, error = %err, "failed to fetch routes");
                return;
            }
        };
        let Some(route) = route else {
            break;
        };

        if route_msg_matches(&route, prefix)
            && let Err(err) = handle.route().del(route).execute().await
        {
            error!(%prefix, error = %err, "failed to uninstall route");
        }
    }
}

// Initializes the netlink connection and returns its handle.
pub(crate) fn init() -> Handle {
    let (conn, handle, _) =
        new_connection().expect("failed to create netlink socket");

    tokio::task::spawn(conn);

    handle
}

// ===== helper functions =====

fn route_msg_matches(
    route: &netlink_packet_route::route::RouteMessage,
    prefix: &IpNetwork,
) -> bool {
    use netlink_packet_route::route::RouteAttribute;

    if route.header.destination_prefix_length != prefix.prefix() {
        return false;
    }

    route.attributes.iter().any(|attr| {
        if let RouteAttribute::Destination(dst) = attr {
            use netlink_packet_route::route::RouteAddress;
            match (dst, prefix) {
                (RouteAddress::Inet(addr), IpNetwork::V4(prefix)) => {
                    *addr == prefix.ip()
                }
                (RouteAddress::Inet6(addr), IpNetwork::V6(prefix)) => {
                    *addr == prefix.ip()
                }
                _ => false,
            }
        } else {
            false
        }
    })
}
