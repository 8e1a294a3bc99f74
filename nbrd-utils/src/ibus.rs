//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::southbound::{
    AddressMsg, InterfaceUpdateMsg, RouteKeyMsg, RouteMsg,
};
use crate::{UnboundedReceiver, UnboundedSender};

// Type aliases.
pub type IbusReceiver = UnboundedReceiver<IbusMsg>;
pub type IbusSender = UnboundedSender<IbusMsg>;

/// Transmit handles for the internal message bus connecting the daemon
/// components (routing and the two speakers).
#[derive(Clone, Debug)]
pub struct IbusChannelsTx {
    pub routing: IbusSender,
    pub ospf: IbusSender,
    pub bgp: IbusSender,
}

/// Receive ends handed to each component at startup.
#[derive(Debug)]
pub struct IbusChannelsRx {
    pub routing: IbusReceiver,
    pub ospf: IbusReceiver,
    pub bgp: IbusReceiver,
}

/// Message exchanged between the daemon components.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum IbusMsg {
    /// Interface update notification.
    InterfaceUpd(InterfaceUpdateMsg),
    /// Interface delete notification.
    InterfaceDel(String),
    /// Interface address addition notification.
    InterfaceAddressAdd(AddressMsg),
    /// Interface address delete notification.
    InterfaceAddressDel(AddressMsg),
    /// System Router ID update notification.
    RouterIdUpdate(Option<Ipv4Addr>),
    /// Route install request (speaker -> routing).
    RouteAdd(RouteMsg),
    /// Route withdraw request (speaker -> routing).
    RouteDel(RouteKeyMsg),
    /// Start tracking reachability of a nexthop address (bgp -> routing).
    NexthopTrack(IpAddr),
    /// Stop tracking reachability of a nexthop address (bgp -> routing).
    NexthopUntrack(IpAddr),
    /// Nexthop reachability update (routing -> bgp). A metric of `None`
    /// means the nexthop is unreachable.
    NexthopUpd { addr: IpAddr, metric: Option<u32> },
}

// ===== global functions =====

// Creates the full set of ibus channels.
pub fn ibus_channels() -> (IbusChannelsTx, IbusChannelsRx) {
    let (routing_tx, routing_rx) = mpsc::unbounded_channel();
    let (ospf_tx, ospf_rx) = mpsc::unbounded_channel();
    let (bgp_tx, bgp_rx) = mpsc::unbounded_channel();

    let tx = IbusChannelsTx {
        routing: routing_tx,
        ospf: ospf_tx,
        bgp: bgp_tx,
    };
    let rx = IbusChannelsRx {
        routing: routing_rx,
        ospf: ospf_rx,
        bgp: bgp_rx,
    };

    (tx, rx)
}

// ===== impl IbusChannelsTx =====

impl IbusChannelsTx {
    /// Broadcasts an interface-related message to both speakers.
    pub fn notify_speakers(&self, msg: IbusMsg) {
        let _ = self.ospf.send(msg.clone());
        let _ = self.bgp.send(msg);
    }

    /// Sends a route install request to the routing component.
    pub fn route_add(&self, msg: RouteMsg) {
        let _ = self.routing.send(IbusMsg::RouteAdd(msg));
    }

    /// Sends a route withdraw request to the routing component.
    pub fn route_del(&self, msg: RouteKeyMsg) {
        let _ = self.routing.send(IbusMsg::RouteDel(msg));
    }

    /// Requests nexthop reachability tracking.
    pub fn nexthop_track(&self, addr: IpAddr) {
        let _ = self.routing.send(IbusMsg::NexthopTrack(addr));
    }

    /// Cancels nexthop reachability tracking.
    pub fn nexthop_untrack(&self, addr: IpAddr) {
        let _ = self.routing.send(IbusMsg::NexthopUntrack(addr));
    }
}
