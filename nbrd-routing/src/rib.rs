//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use nbrd_utils::ibus::{IbusChannelsTx, IbusMsg};
use nbrd_utils::protocol::Protocol;
use nbrd_utils::southbound::{Nexthop, RouteKeyMsg, RouteMsg};
use prefix_trie::PrefixMap;
use tracing::warn;

use crate::netlink;

// Maximum number of netlink install retries.
const INSTALL_MAX_RETRIES: u8 = 5;

// Global routing table.
#[derive(Debug, Default)]
pub struct Rib {
    // Per-AF prefix tables.
    pub ipv4: PrefixMap<ipnetwork::Ipv4Network, Destination>,
    pub ipv6: PrefixMap<ipnetwork::Ipv6Network, Destination>,
    // Tracked nexthop addresses and their subscribers.
    pub nht: HashSet<IpAddr>,
}

// Candidate routes for one destination prefix, keyed by protocol.
#[derive(Debug, Default)]
pub struct Destination {
    pub candidates: BTreeMap<Protocol, Route>,
    // Protocol whose route is currently installed in the kernel.
    pub installed: Option<Protocol>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Route {
    pub protocol: Protocol,
    pub distance: u8,
    pub metric: u32,
    pub nexthops: std::collections::BTreeSet<Nexthop>,
}

// ===== impl Rib =====

impl Rib {
    // Processes a route install request from one of the speakers.
    pub(crate) async fn route_add(
        &mut self,
        msg: RouteMsg,
        netlink_handle: &rtnetlink::Handle,
        ibus_tx: &IbusChannelsTx,
    ) {
        let prefix = msg.prefix;
        let route = Route {
            protocol: msg.protocol,
            distance: msg.distance,
            metric: msg.metric,
            nexthops: msg.nexthops,
        };

        // Update the candidate list of the destination.
        let dest = self.destination_mut(&prefix);
        dest.candidates.insert(msg.protocol, route);

        // Arbitrate and synchronize the kernel.
        self.sync_destination(prefix, netlink_handle).await;

        // Notify nexthop tracking subscribers.
        self.nht_notify(prefix, ibus_tx);
    }

    // Processes a route withdraw request from one of the speakers.
    pub(crate) async fn route_del(
        &mut self,
        msg: RouteKeyMsg,
        netlink_handle: &rtnetlink::Handle,
        ibus_tx: &IbusChannelsTx,
    ) {
        let prefix = msg.prefix;

        let dest = self.destination_mut(&prefix);
        dest.candidates.remove(&msg.protocol);

        // Arbitrate and synchronize the kernel.
        self.sync_destination(prefix, netlink_handle).await;

        // Notify nexthop tracking subscribers.
        self.nht_notify(prefix, ibus_tx);
    }

    // Starts tracking the given nexthop address, answering immediately
    // with its current reachability.
    pub(crate) fn nexthop_track(
        &mut self,
        addr: IpAddr,
        ibus_tx: &IbusChannelsTx,
    ) {
        self.nht.insert(addr);

        let metric = self.resolve_metric(addr);
        let _ = ibus_tx.bgp.send(IbusMsg::NexthopUpd { addr, metric });
    }

    // Stops tracking the given nexthop address.
    pub(crate) fn nexthop_untrack(&mut self, addr: IpAddr) {
        self.nht.remove(&addr);
    }

    // Selects the best candidate (lowest administrative distance, then
    // lowest metric) and pushes the result to the kernel.
    async fn sync_destination(
        &mut self,
        prefix: IpNetwork,
        netlink_handle: &rtnetlink::Handle,
    ) {
        let dest = self.destination_mut(&prefix);
        let best = dest
            .candidates
            .values()
            .min_by_key(|route| (route.distance, route.metric))
            .cloned();

        match best {
            Some(route) => {
                // Directly connected routes are managed by the kernel.
                if route.protocol == Protocol::DIRECT {
                    dest.installed = Some(Protocol::DIRECT);
                    return;
                }

                dest.installed = Some(route.protocol);
                install_with_retry(netlink_handle, &prefix, &route).await;
            }
            None => {
                let uninstall = dest
                    .installed
                    .take()
                    .is_some_and(|protocol| protocol != Protocol::DIRECT);
                if uninstall {
                    netlink::ip_route_uninstall(netlink_handle, &prefix)
                        .await;
                }
                self.destination_remove(&prefix);
            }
        }
    }

    // Sends reachability updates for tracked nexthops covered by the
    // given prefix.
    fn nht_notify(&self, prefix: IpNetwork, ibus_tx: &IbusChannelsTx) {
        for addr in self
            .nht
            .iter()
            .copied()
            .filter(|addr| prefix.contains(*addr))
        {
            let metric = self.resolve_metric(addr);
            let _ = ibus_tx.bgp.send(IbusMsg::NexthopUpd { addr, metric });
        }
    }

    // Resolves the metric of the longest-prefix-match route covering the
    // given address.
    fn resolve_metric(&self, addr: IpAddr) -> Option<u32> {
        match addr {
            IpAddr::V4(addr) => {
                let key =
                    ipnetwork::Ipv4Network::new(addr, 32).unwrap();
                self.ipv4.get_lpm(&key).and_then(|(_, dest)| {
                    dest.candidates.values().next().map(|route| route.metric)
                })
            }
            IpAddr::V6(addr) => {
                let key =
                    ipnetwork::Ipv6Network::new(addr, 128).unwrap();
                self.ipv6.get_lpm(&key).and_then(|(_, dest)| {
                    dest.candidates.values().next().map(|route| route.metric)
                })
            }
        }
    }

    fn destination_mut(&mut self, prefix: &IpNetwork) -> &mut Destination {
        match prefix {
            IpNetwork::V4(prefix) => self.ipv4.entry(*prefix).or_default(),
            IpNetwork::V6(prefix) => self.ipv6.entry(*prefix).or_default(),
        }
    }

    fn destination_remove(&mut self, prefix: &IpNetwork) {
        match prefix {
            IpNetwork::V4(prefix) => {
                self.ipv4.remove(prefix);
            }
            IpNetwork::V6(prefix) => {
                self.ipv6.remove(prefix);
            }
        }
    }
}

// ===== helper functions =====

// Installs the route, retrying with exponential backoff. A failed install
// is logged and does not invalidate the owning RIB entry.
async fn install_with_retry(
    netlink_handle: &rtnetlink::Handle,
    prefix: &IpNetwork,
    route: &Route,
) {
    let mut backoff = std::time::Duration::from_millis(100);

    for attempt in 0..INSTALL_MAX_RETRIES {
        if netlink::ip_route_install(netlink_handle, prefix, route).await {
            return;
        }

        warn!(%prefix, attempt, "route install failed, retrying");
        tokio::time::sleep(backoff).await;
        backoff *= 2;
    }

    warn!(%prefix, "route install failed, giving up");
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use nbrd_utils::southbound::{
        DISTANCE_EBGP, DISTANCE_IBGP, DISTANCE_OSPF,
    };

    use super::*;

    fn route(protocol: Protocol, distance: u8, metric: u32) -> Route {
        Route {
            protocol,
            distance,
            metric,
            nexthops: BTreeSet::new(),
        }
    }

    #[test]
    fn admin_distance_arbitration() {
        let mut dest = Destination::default();
        dest.candidates.insert(
            Protocol::OSPFV2,
            route(Protocol::OSPFV2, DISTANCE_OSPF, 20),
        );
        dest.candidates
            .insert(Protocol::BGP, route(Protocol::BGP, DISTANCE_EBGP, 0));

        // An eBGP route (distance 20) beats an OSPF route (distance 110).
        let best = dest
            .candidates
            .values()
            .min_by_key(|route| (route.distance, route.metric))
            .unwrap();
        assert_eq!(best.protocol, Protocol::BGP);

        // An iBGP route (distance 200) loses to the OSPF route.
        dest.candidates
            .insert(Protocol::BGP, route(Protocol::BGP, DISTANCE_IBGP, 0));
        let best = dest
            .candidates
            .values()
            .min_by_key(|route| (route.distance, route.metric))
            .unwrap();
        assert_eq!(best.protocol, Protocol::OSPFV2);
    }
}
