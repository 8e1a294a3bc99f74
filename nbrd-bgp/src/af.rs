//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::hash::Hash;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use itertools::Itertools;
use nbrd_utils::ip::{Ipv4NetworkExt, Ipv6NetworkExt};

use crate::neighbor::{Neighbor, NeighborUpdateQueue, NeighborUpdateQueues, PeerType};
use crate::packet::attribute::{self, ATTR_MIN_LEN_EXT, BaseAttrs};
use crate::packet::consts::{Afi, Safi};
use crate::packet::message::{
    Message, MpReachNlri, MpUnreachNlri, ReachNlri, UnreachNlri, UpdateMsg,
};
use crate::rib::{RoutingTable, RoutingTables};

// BGP address-family specific code.
pub trait AddressFamily: Sized + Send + Sync + 'static {
    // Address Family Identifier.
    const AFI: Afi;
    // Subsequent Address Family Identifier.
    const SAFI: Safi;

    // The types of IP address and network used by this address family.
    type IpAddr: Copy
        + Eq
        + Ord
        + Into<IpAddr>
        + std::fmt::Debug
        + Send
        + Sync;
    type IpNetwork: Copy
        + Eq
        + Ord
        + Hash
        + Into<IpNetwork>
        + std::fmt::Debug
        + std::fmt::Display
        + Send
        + Sync;

    // Get the routing table for this address family.
    fn table(tables: &mut RoutingTables) -> &mut RoutingTable<Self>;

    // Get the neighbor update queue for this address family.
    fn update_queue(
        queues: &mut NeighborUpdateQueues,
    ) -> &mut NeighborUpdateQueue<Self>;

    // Extract the nexthop IP address from the received BGP attributes.
    fn nexthop_rx_extract(attrs: &BaseAttrs) -> IpAddr;

    // Modify the nexthop(s) for transmission.
    fn nexthop_tx_change(nbr: &Neighbor, local: bool, attrs: &mut BaseAttrs);

    // Build BGP UPDATE messages from the provided update queue.
    fn build_updates(queue: &mut NeighborUpdateQueue<Self>) -> Vec<Message>;
}

#[derive(Debug)]
pub struct Ipv4Unicast;

#[derive(Debug)]
pub struct Ipv6Unicast;

// ===== impl Ipv4Unicast =====

impl AddressFamily for Ipv4Unicast {
    const AFI: Afi = Afi::Ipv4;
    const SAFI: Safi = Safi::Unicast;

    type IpAddr = Ipv4Addr;
    type IpNetwork = Ipv4Network;

    fn table(tables: &mut RoutingTables) -> &mut RoutingTable<Self> {
        &mut tables.ipv4_unicast
    }

    fn update_queue(
        queues: &mut NeighborUpdateQueues,
    ) -> &mut NeighborUpdateQueue<Self> {
        &mut queues.ipv4_unicast
    }

    fn nexthop_rx_extract(attrs: &BaseAttrs) -> IpAddr {
        attrs.nexthop.unwrap()
    }

    fn nexthop_tx_change(nbr: &Neighbor, local: bool, attrs: &mut BaseAttrs) {
        // Get source address of the BGP session.
        let session_src = match nbr.conn_info.as_ref().unwrap().local_addr {
            IpAddr::V4(addr) => addr,
            IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        };

        // Locally originated routes always carry the session source.
        if local {
            attrs.nexthop = Some(session_src.into());
            return;
        }

        match nbr.peer_type {
            PeerType::Internal => {
                // The nexthop isn't modified.
            }
            PeerType::External => {
                // Update the nexthop using the source address of the eBGP
                // session.
                attrs.nexthop = Some(session_src.into());
            }
        }
    }

    fn build_updates(queue: &mut NeighborUpdateQueue<Self>) -> Vec<Message> {
        let mut msgs = vec![];
        let reach = std::mem::take(&mut queue.reach);
        let unreach = std::mem::take(&mut queue.unreach);

        // Reachable prefixes.
        for (attrs, prefixes) in reach.into_iter() {
            let IpAddr::V4(nexthop) = attrs.base.nexthop.unwrap() else {
                continue;
            };
            let max = (Message::MAX_LEN
                - UpdateMsg::MIN_LEN
                - attrs.length()
                - attribute::nexthop::length())
                / (1 + Ipv4Network::MAX_PREFIXLEN as u16 / 8);

            msgs.extend(
                prefixes.into_iter().chunks(max as usize).into_iter().map(
                    |chunk| {
                        let reach = ReachNlri {
                            prefixes: chunk.collect(),
                            nexthop,
                        };
                        Message::Update(UpdateMsg {
                            reach: Some(reach),
                            unreach: None,
                            mp_reach: None,
                            mp_unreach: None,
                            attrs: Some(attrs.clone()),
                        })
                    },
                ),
            );
        }

        // Unreachable prefixes.
        if !unreach.is_empty() {
            let max = (Message::MAX_LEN - UpdateMsg::MIN_LEN)
                / (1 + Ipv4Network::MAX_PREFIXLEN as u16 / 8);

            msgs.extend(
                unreach.into_iter().chunks(max as usize).into_iter().map(
                    |chunk| {
                        let unreach = UnreachNlri {
                            prefixes: chunk.collect(),
                        };
                        Message::Update(UpdateMsg {
                            reach: None,
                            unreach: Some(unreach),
                            mp_reach: None,
                            mp_unreach: None,
                            attrs: None,
                        })
                    },
                ),
            );
        }

        msgs
    }
}

// ===== impl Ipv6Unicast =====

impl AddressFamily for Ipv6Unicast {
    const AFI: Afi = Afi::Ipv6;
    const SAFI: Safi = Safi::Unicast;

    type IpAddr = Ipv6Addr;
    type IpNetwork = Ipv6Network;

    fn table(tables: &mut RoutingTables) -> &mut RoutingTable<Self> {
        &mut tables.ipv6_unicast
    }

    fn update_queue(
        queues: &mut NeighborUpdateQueues,
    ) -> &mut NeighborUpdateQueue<Self> {
        &mut queues.ipv6_unicast
    }

    fn nexthop_rx_extract(attrs: &BaseAttrs) -> IpAddr {
        attrs
            .ll_nexthop
            .map(IpAddr::from)
            .unwrap_or(attrs.nexthop.unwrap())
    }

    fn nexthop_tx_change(nbr: &Neighbor, local: bool, attrs: &mut BaseAttrs) {
        // Get source address of the BGP session. The nexthop advertised to
        // an IPv6 peer must never be an IPv4-mapped address, so sessions
        // established over IPv4 advertise no usable IPv6 nexthop.
        let session_src = match nbr.conn_info.as_ref().unwrap().local_addr {
            IpAddr::V4(_) => Ipv6Addr::UNSPECIFIED,
            IpAddr::V6(addr) => addr,
        };

        // Locally originated routes always carry the session source.
        if local {
            attrs.nexthop = Some(session_src.into());
            return;
        }

        match nbr.peer_type {
            PeerType::Internal => {
                // The global nexthop isn't modified.
            }
            PeerType::External => {
                // Update the global nexthop using the source address of the
                // eBGP session and unset the link-local nexthop.
                attrs.nexthop = Some(session_src.into());
                attrs.ll_nexthop = None;
            }
        }
    }

    fn build_updates(queue: &mut NeighborUpdateQueue<Self>) -> Vec<Message> {
        let mut msgs = vec![];
        let reach = std::mem::take(&mut queue.reach);
        let unreach = std::mem::take(&mut queue.unreach);

        // Reachable prefixes.
        for (attrs, prefixes) in reach.into_iter() {
            let IpAddr::V6(nexthop) = attrs.base.nexthop.unwrap() else {
                continue;
            };
            let ll_nexthop = attrs.base.ll_nexthop;
            let nexthop_len = if ll_nexthop.is_some() { 32 } else { 16 };
            let max = (Message::MAX_LEN
                - UpdateMsg::MIN_LEN
                - attrs.length()
                - ATTR_MIN_LEN_EXT
                - MpReachNlri::MIN_LEN
                - nexthop_len)
                / (1 + Ipv6Network::MAX_PREFIXLEN as u16 / 8);

            msgs.extend(
                prefixes.into_iter().chunks(max as usize).into_iter().map(
                    |chunk| {
                        let mp_reach = MpReachNlri::Ipv6Unicast {
                            prefixes: chunk.collect(),
                            nexthop,
                            ll_nexthop,
                        };
                        Message::Update(UpdateMsg {
                            reach: None,
                            unreach: None,
                            mp_reach: Some(mp_reach),
                            mp_unreach: None,
                            attrs: Some(attrs.clone()),
                        })
                    },
                ),
            );
        }

        // Unreachable prefixes.
        if !unreach.is_empty() {
            let max = (Message::MAX_LEN
                - UpdateMsg::MIN_LEN
                - ATTR_MIN_LEN_EXT
                - MpUnreachNlri::MIN_LEN)
                / (1 + Ipv6Network::MAX_PREFIXLEN as u16 / 8);

            msgs.extend(
                unreach.into_iter().chunks(max as usize).into_iter().map(
                    |chunk| {
                        let mp_unreach = MpUnreachNlri::Ipv6Unicast {
                            prefixes: chunk.collect(),
                        };
                        Message::Update(UpdateMsg {
                            reach: None,
                            unreach: None,
                            mp_reach: None,
                            mp_unreach: Some(mp_unreach),
                            attrs: None,
                        })
                    },
                ),
            );
        }

        msgs
    }
}
