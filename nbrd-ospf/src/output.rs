//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use smallvec::{SmallVec, smallvec};

use crate::area::BACKBONE_AREA_ID;
use crate::collections::{Arena, NeighborIndex};
use crate::instance::InstanceUpView;
use crate::interface::{Interface, InterfaceType, ism};
use crate::lsdb;
use crate::neighbor::Neighbor;
use crate::network::{self, MulticastAddr};
use crate::packet::lsa::LsaHdr;
use crate::packet::{
    DbDesc, DbDescFlags, LsAck, LsRequest, LsUpdate, Packet, PacketHdr,
    PacketType,
};
use crate::tasks::messages::output::NetTxPacketMsg;

// ===== Database Description packets =====

pub(crate) fn send_dbdesc(
    nbr: &mut Neighbor,
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) {
    // Initialize destination address.
    let dst = dest_nbr(nbr, iface);

    // Calculate maximum packet size.
    let max_size =
        iface.max_packet_size() - PacketHdr::LENGTH - DbDesc::BASE_LENGTH;

    // Append as many LSA headers as possible while in the Exchange state.
    let mut total = 0;
    let mut lsa_hdrs = vec![];
    while total + LsaHdr::LENGTH <= max_size {
        match nbr.lists.db_summary.pop_first() {
            Some((_, lsa)) => {
                total += LsaHdr::LENGTH;

                // Update LSA age.
                let mut lsa_hdr = lsa.hdr;
                lsa_hdr.age = lsa.age();
                lsa_hdrs.push(lsa_hdr);
            }
            None => break,
        }
    }

    // Clear the M-bit if there's no more data to send.
    if !nbr.dd_flags.contains(DbDescFlags::I)
        && nbr.lists.db_summary.is_empty()
    {
        nbr.dd_flags.remove(DbDescFlags::M);
    }

    // Generate Database Description packet.
    let hdr = PacketHdr::new(
        PacketType::DbDesc,
        instance.state.router_id,
        BACKBONE_AREA_ID,
    );
    let packet = Packet::DbDesc(DbDesc {
        hdr,
        mtu: iface.system.mtu.unwrap_or(0),
        options: crate::packet::Options::E,
        dd_flags: nbr.dd_flags,
        dd_seq_no: nbr.dd_seq_no,
        lsa_hdrs,
    });

    // Enqueue packet for network transmission.
    let msg = NetTxPacketMsg { packet, dst };
    nbr.last_sent_dbdesc = Some(msg.clone());
    iface.send_packet(msg);

    // Start the retransmission interval when acting as master or when
    // sending the initial Database Description packet.
    if nbr.dd_flags.intersects(DbDescFlags::MS | DbDescFlags::I) {
        nbr.rxmt_dbdesc_start(iface, instance);
    }
}

pub(crate) fn rxmt_dbdesc(nbr: &Neighbor, iface: &Interface) {
    if let Some(msg) = &nbr.last_sent_dbdesc {
        iface.send_packet(msg.clone());
    }
}

// ===== Link State Request packets =====

pub(crate) fn send_lsreq(
    nbr: &mut Neighbor,
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) {
    // Initialize destination address.
    let dst = dest_nbr(nbr, iface);

    // Calculate maximum packet size.
    let max_size = iface.max_packet_size() - PacketHdr::LENGTH;

    // Append as many request entries as possible in a single packet.
    let mut total = 0;
    while total + LsRequest::ENTRY_LENGTH < max_size {
        match nbr.lists.ls_request.pop_first() {
            Some((lsa_key, lsa_hdr)) => {
                nbr.lists.ls_request_pending.insert(lsa_key, lsa_hdr);
                total += LsRequest::ENTRY_LENGTH;
            }
            None => break,
        }
    }

    // Generate Link State Request packet.
    let hdr = PacketHdr::new(
        PacketType::LsRequest,
        instance.state.router_id,
        BACKBONE_AREA_ID,
    );
    let entries = nbr.lists.ls_request_pending.keys().copied().collect();
    let packet = Packet::LsRequest(LsRequest { hdr, entries });

    // Enqueue packet for network transmission.
    let msg = NetTxPacketMsg { packet, dst };
    iface.send_packet(msg);

    // Start retransmission interval.
    nbr.rxmt_lsreq_start(iface, instance);
}

pub(crate) fn rxmt_lsreq(
    nbr: &Neighbor,
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) {
    let dst = dest_nbr(nbr, iface);

    let hdr = PacketHdr::new(
        PacketType::LsRequest,
        instance.state.router_id,
        BACKBONE_AREA_ID,
    );
    let entries = nbr.lists.ls_request_pending.keys().copied().collect();
    let packet = Packet::LsRequest(LsRequest { hdr, entries });

    let msg = NetTxPacketMsg { packet, dst };
    iface.send_packet(msg);
}

// ===== Link State Update packets =====

pub(crate) fn send_lsupd(
    nbr_idx: Option<NeighborIndex>,
    iface: &mut Interface,
    instance: &InstanceUpView<'_>,
    neighbors: &mut Arena<Neighbor>,
) {
    // Initialize destination address(es).
    let dst = dest_iface(iface);

    // Calculate maximum packet size.
    let max_size =
        iface.max_packet_size() - PacketHdr::LENGTH - LsUpdate::BASE_LENGTH;

    // Get list of LSAs enqueued for transmission.
    let ls_update_list = match nbr_idx {
        Some(nbr_idx) => {
            let nbr = &mut neighbors[nbr_idx];
            &mut nbr.lists.ls_update
        }
        None => &mut iface.state.ls_update_list,
    };
    let mut ls_update_list = std::mem::take(ls_update_list);

    // Send as many LS Updates as necessary.
    while !ls_update_list.is_empty() {
        // Append as many LSAs as possible in a single packet.
        let mut total = 0;
        let mut lsas = vec![];
        while let Some(o) = ls_update_list.first_entry() {
            let lsa = o.get();
            // A single LSA bigger than the maximum packet size has to rely
            // on IP-level fragmentation.
            if lsa.hdr.length <= max_size && total + lsa.hdr.length > max_size
            {
                break;
            }
            total += lsa.hdr.length;

            // Update LSA age before transmission.
            let lsa = o.remove();
            let mut lsa = (*lsa).clone();
            let age = std::cmp::min(
                lsa.age() + iface.config.transmit_delay,
                lsdb::LSA_MAX_AGE,
            );
            lsa.set_age(age);
            lsas.push(lsa);
        }

        // Generate Link State Update packet.
        let hdr = PacketHdr::new(
            PacketType::LsUpdate,
            instance.state.router_id,
            BACKBONE_AREA_ID,
        );
        let packet = Packet::LsUpdate(LsUpdate { hdr, lsas });

        // Enqueue packet for network transmission.
        let msg = NetTxPacketMsg {
            packet,
            dst: dst.clone(),
        };
        iface.send_packet(msg);
    }
}

pub(crate) fn rxmt_lsupd(
    nbr: &Neighbor,
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) {
    let dst = dest_nbr(nbr, iface);

    // Calculate maximum packet size.
    let max_size =
        iface.max_packet_size() - PacketHdr::LENGTH - LsUpdate::BASE_LENGTH;

    // Append as many LSAs as possible in a single packet.
    let mut total = 0;
    let mut lsas = vec![];
    for lsa in nbr.lists.ls_rxmt.values() {
        if lsa.hdr.length <= max_size && total + lsa.hdr.length > max_size {
            break;
        }
        total += lsa.hdr.length;

        // Update LSA age before transmission.
        let mut lsa = (**lsa).clone();
        let age = std::cmp::min(
            lsa.age() + iface.config.transmit_delay,
            lsdb::LSA_MAX_AGE,
        );
        lsa.set_age(age);
        lsas.push(lsa);
    }

    let hdr = PacketHdr::new(
        PacketType::LsUpdate,
        instance.state.router_id,
        BACKBONE_AREA_ID,
    );
    let packet = Packet::LsUpdate(LsUpdate { hdr, lsas });

    let msg = NetTxPacketMsg { packet, dst };
    iface.send_packet(msg);
}

// ===== Link State Acknowledgment packets =====

pub(crate) fn send_lsack_direct(
    nbr: &Neighbor,
    iface: &Interface,
    instance: &InstanceUpView<'_>,
    lsa_hdr: &LsaHdr,
) {
    let dst = dest_nbr(nbr, iface);

    let hdr = PacketHdr::new(
        PacketType::LsAck,
        instance.state.router_id,
        BACKBONE_AREA_ID,
    );
    let packet = Packet::LsAck(LsAck {
        hdr,
        lsa_hdrs: vec![*lsa_hdr],
    });

    let msg = NetTxPacketMsg { packet, dst };
    iface.send_packet(msg);
}

pub(crate) fn send_lsack_delayed(
    iface: &mut Interface,
    instance: &InstanceUpView<'_>,
) {
    let dst = dest_iface(iface);

    // Calculate maximum packet size.
    let max_size = iface.max_packet_size() - PacketHdr::LENGTH;

    // Send as many LS Acks as necessary.
    while !iface.state.ls_ack_list.is_empty() {
        // Append as many LSA headers as possible in a single packet.
        let mut total = 0;
        let mut lsa_hdrs = vec![];
        while total + LsaHdr::LENGTH <= max_size {
            match iface.state.ls_ack_list.pop_first() {
                Some((_, lsa_hdr)) => {
                    total += LsaHdr::LENGTH;
                    lsa_hdrs.push(lsa_hdr);
                }
                None => break,
            }
        }

        let hdr = PacketHdr::new(
            PacketType::LsAck,
            instance.state.router_id,
            BACKBONE_AREA_ID,
        );
        let packet = Packet::LsAck(LsAck { hdr, lsa_hdrs });

        let msg = NetTxPacketMsg {
            packet,
            dst: dst.clone(),
        };
        iface.send_packet(msg);
    }
}

// ===== helper functions =====

// Returns the destination used to send a packet directly to the given
// neighbor.
fn dest_nbr(
    nbr: &Neighbor,
    iface: &Interface,
) -> SmallVec<[std::net::Ipv4Addr; 4]> {
    let addr = if iface.config.if_type == InterfaceType::PointToPoint {
        *network::multicast_addr(MulticastAddr::AllSpfRtrs)
    } else {
        nbr.src
    };
    smallvec![addr]
}

// Returns the destination used to send a packet to all adjacent neighbors
// on the given interface.
fn dest_iface(iface: &Interface) -> SmallVec<[std::net::Ipv4Addr; 4]> {
    let addr = match iface.config.if_type {
        InterfaceType::Broadcast => {
            if matches!(
                iface.state.ism_state,
                ism::State::Dr | ism::State::Backup
            ) {
                MulticastAddr::AllSpfRtrs
            } else {
                MulticastAddr::AllDrRtrs
            }
        }
        InterfaceType::PointToPoint | InterfaceType::Loopback => {
            MulticastAddr::AllSpfRtrs
        }
    };
    smallvec![*network::multicast_addr(addr)]
}
