//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr};

use futures_util::TryStreamExt;
use ipnetwork::IpNetwork;
use nbrd_utils::ibus::{IbusChannelsTx, IbusMsg};
use nbrd_utils::southbound::{
    AddressMsg, InterfaceFlags, InterfaceUpdateMsg,
};
use rtnetlink::Handle;
use tracing::error;

// ===== global functions =====

// Enumerates the system interfaces and their addresses, publishing the
// results to both speakers and deriving the system Router ID.
pub(crate) async fn startup_dump(handle: &Handle, ibus_tx: &IbusChannelsTx) {
    use netlink_packet_route::address::AddressAttribute;
    use netlink_packet_route::link::{LinkAttribute, LinkFlag};

    let mut ifnames = std::collections::HashMap::new();

    // Fetch all links.
    let mut links = handle.link().get().execute();
    loop {
        let link = match links.try_next().await {
            Ok(Some(link)) => link,
            Ok(None) => break,
            Err(err) => {
                error!(error = %err, "failed to fetch interfaces");
                return;
            }
        };

        let ifindex = link.header.index;
        let mut ifname = None;
        let mut mtu = 1500;
        for attr in &link.attributes {
            match attr {
                LinkAttribute::IfName(name) => ifname = Some(name.clone()),
                LinkAttribute::Mtu(value) => mtu = *value,
                _ => (),
            }
        }
        let Some(ifname) = ifname else {
            continue;
        };

        let mut flags = InterfaceFlags::empty();
        if link.header.flags.contains(&LinkFlag::Loopback) {
            flags.insert(InterfaceFlags::LOOPBACK);
        }
        if link.header.flags.contains(&LinkFlag::Running) {
            flags.insert(InterfaceFlags::OPERATIVE);
        }
        if link.header.flags.contains(&LinkFlag::Broadcast) {
            flags.insert(InterfaceFlags::BROADCAST);
        }

        ifnames.insert(ifindex, (ifname.clone(), flags));

        let msg = InterfaceUpdateMsg {
            ifname,
            ifindex,
            mtu,
            flags,
        };
        ibus_tx.notify_speakers(IbusMsg::InterfaceUpd(msg));
    }

    // Fetch all addresses.
    let mut router_id: Option<Ipv4Addr> = None;
    let mut loopback_router_id: Option<Ipv4Addr> = None;
    let mut addrs = handle.address().get().execute();
    loop {
        let addr = match addrs.try_next().await {
            Ok(Some(addr)) => addr,
            Ok(None) => break,
            Err(err) => {
                error!(error = %err, "failed to fetch addresses");
                return;
            }
        };

        let Some((ifname, flags)) =
            ifnames.get(&addr.header.index).cloned()
        else {
            continue;
        };

        let prefix_len = addr.header.prefix_len;
        for attr in &addr.attributes {
            if let AddressAttribute::Address(ip) = attr {
                let Ok(prefix) = IpNetwork::new(*ip, prefix_len) else {
                    continue;
                };

                // Track Router ID candidates: the highest loopback IPv4
                // address wins, falling back to the highest interface
                // address.
                if let IpAddr::V4(ip) = ip
                    && !ip.is_loopback()
                {
                    if flags.contains(InterfaceFlags::LOOPBACK) {
                        loopback_router_id =
                            loopback_router_id.max(Some(*ip));
                    } else {
                        router_id = router_id.max(Some(*ip));
                    }
                }

                let msg = AddressMsg {
                    ifname: ifname.clone(),
                    addr: prefix,
                };
                ibus_tx.notify_speakers(IbusMsg::InterfaceAddressAdd(msg));
            }
        }
    }

    // Publish the derived Router ID.
    let router_id = loopback_router_id.or(router_id);
    ibus_tx.notify_speakers(IbusMsg::RouterIdUpdate(router_id));
}
