//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::btree_map;
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::collections::{
    InterfaceIndex, InterfaceKey, LsaEntryId, LsdbId, NeighborIndex,
    NeighborKey,
};
use crate::debug::{Debug, LsaFlushReason, SeqNoMismatchReason};
use crate::error::{Error, InterfaceCfgError};
use crate::flood::flood;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::interface::{InterfaceType, ism};
use crate::lsdb::{self, LsaEntryFlags, LsaOriginateEvent, lsa_compare};
use crate::neighbor::{LastDbDesc, RxmtPacketType, nsm};
use crate::packet::error::DecodeResult;
use crate::packet::lsa::{Lsa, LsaKey, LsaScope};
use crate::packet::{DbDesc, DbDescFlags, Hello, LsAck, LsRequest, LsUpdate, Packet, PacketType};
use crate::{output, spf, tasks};

// ===== Interface FSM event =====

pub(crate) fn process_ism_event(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_key: InterfaceKey,
    event: ism::Event,
) -> Result<(), Error> {
    // Lookup interface.
    let (_, iface) = arenas
        .area
        .interfaces
        .get_mut_by_key(&mut arenas.interfaces, &iface_key)?;

    // Invoke FSM event.
    iface.fsm(
        &arenas.area,
        instance,
        &mut arenas.neighbors,
        &arenas.lsa_entries,
        event,
    );

    Ok(())
}

// ===== Neighbor FSM event =====

pub(crate) fn process_nsm_event(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_key: InterfaceKey,
    nbr_key: NeighborKey,
    event: nsm::Event,
) -> Result<(), Error> {
    // Lookup interface and neighbor.
    let (_, iface) = arenas
        .area
        .interfaces
        .get_mut_by_key(&mut arenas.interfaces, &iface_key)?;
    let (nbr_idx, nbr) = iface
        .state
        .neighbors
        .get_mut_by_key(&mut arenas.neighbors, &nbr_key)?;

    // Invoke FSM event.
    nbr.fsm(iface, &arenas.area, instance, &arenas.lsa_entries, event);
    if nbr.state == nsm::State::Down {
        // Effectively delete the neighbor.
        iface.state.neighbors.delete(&mut arenas.neighbors, nbr_idx);

        // Synchronize interface's Hello Tx task (updated neighbor list).
        iface.sync_hello_tx(instance);
    }

    Ok(())
}

// ===== Network packet receipt =====

pub(crate) fn process_packet(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_key: InterfaceKey,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    packet: DecodeResult<Packet>,
) -> Result<(), Error> {
    // Lookup interface.
    let (iface_idx, iface) = arenas
        .area
        .interfaces
        .get_mut_by_key(&mut arenas.interfaces, &iface_key)?;

    // Check if the packet was decoded successfully. A malformed packet
    // is dropped, but when it arrives in the middle of a database exchange
    // the adjacency is restarted.
    let packet = match packet {
        Ok(packet) => packet,
        Err(error) => {
            if let Some((_, nbr)) = iface
                .state
                .neighbors
                .get_mut_by_addr(&mut arenas.neighbors, src)
                && nbr.state >= nsm::State::ExStart
            {
                let reason = SeqNoMismatchReason::MalformedPacket;
                nbr.fsm(
                    iface,
                    &arenas.area,
                    instance,
                    &arenas.lsa_entries,
                    nsm::Event::SeqNoMismatch(reason),
                );
            }
            return Err(Error::PacketDecodeError(error));
        }
    };

    // Ignore packets received on inoperational or passive interfaces.
    if iface.is_down() || iface.is_passive() {
        return Ok(());
    }

    // Validate IP destination and source addresses.
    iface.validate_packet_dst(dst)?;
    iface.validate_packet_src(src)?;

    // Check for Area ID mismatch.
    let pkt_type = packet.hdr().pkt_type;
    if packet.hdr().area_id != crate::area::BACKBONE_AREA_ID {
        return Err(Error::InterfaceCfgError(
            iface.name.clone(),
            src,
            pkt_type,
            InterfaceCfgError::AreaIdMismatch(
                packet.hdr().area_id,
                crate::area::BACKBONE_AREA_ID,
            ),
        ));
    }

    // Log received packet.
    Debug::PacketRx(&iface.name, &src, &dst, &packet).log();

    let router_id = packet.hdr().router_id;
    if let Packet::Hello(pkt) = packet {
        process_packet_hello(instance, arenas, iface_idx, src, pkt)
    } else {
        // Non-Hello packets not matching any active neighbor are discarded.
        let iface = &mut arenas.interfaces[iface_idx];
        let (nbr_idx, _) = iface
            .get_neighbor(&mut arenas.neighbors, src, router_id)
            .ok_or(Error::UnknownNeighbor(src, router_id))?;

        match packet {
            Packet::Hello(_) => unreachable!(),
            Packet::DbDesc(pkt) => {
                process_packet_dbdesc(instance, arenas, iface_idx, nbr_idx, src, pkt)
            }
            Packet::LsRequest(pkt) => {
                process_packet_lsreq(instance, arenas, iface_idx, nbr_idx, pkt)
            }
            Packet::LsUpdate(pkt) => {
                process_packet_lsupd(instance, arenas, iface_idx, nbr_idx, pkt)
            }
            Packet::LsAck(pkt) => {
                process_packet_lsack(arenas, nbr_idx, pkt)
            }
        }
    }
}

fn process_packet_hello(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_idx: InterfaceIndex,
    src: Ipv4Addr,
    hello: Hello,
) -> Result<(), Error> {
    let iface = &mut arenas.interfaces[iface_idx];
    let protocol_input = &instance.tx.protocol_input;

    // Perform all the required sanity checks.
    iface.validate_hello(&hello).map_err(|error| {
        Error::InterfaceCfgError(
            iface.name.clone(),
            src,
            PacketType::Hello,
            error,
        )
    })?;

    // Check for duplicate Router ID.
    if hello.hdr.router_id == instance.state.router_id {
        return Err(Error::InterfaceCfgError(
            iface.name.clone(),
            src,
            PacketType::Hello,
            InterfaceCfgError::DuplicateRouterId(hello.hdr.router_id),
        ));
    }

    // Find or create new neighbor.
    let router_id = hello.hdr.router_id;
    let (nbr_idx, nbr) =
        match iface.get_neighbor(&mut arenas.neighbors, src, router_id) {
            Some(value) => value,
            None => {
                // Create new neighbor.
                let (nbr_idx, nbr) = iface.state.neighbors.insert(
                    &mut arenas.neighbors,
                    router_id,
                    src,
                );

                // Initialize neighbor values.
                nbr.priority = hello.priority;
                if iface.is_broadcast() {
                    nbr.dr = hello.dr;
                    nbr.bdr = hello.bdr;
                }

                // Synchronize interface's Hello Tx task (updated neighbor
                // list).
                iface.sync_hello_tx(instance);

                (nbr_idx, &mut arenas.neighbors[nbr_idx])
            }
        };

    // Update the neighbor's source address. For point-to-point interfaces
    // an address change is possible without creating a new neighbor.
    if nbr.src != src {
        iface
            .state
            .neighbors
            .update_src(&mut arenas.neighbors[nbr_idx], nbr_idx, src);
    }

    let nbr = &mut arenas.neighbors[nbr_idx];

    // Trigger the HelloReceived event.
    nbr.fsm(
        iface,
        &arenas.area,
        instance,
        &arenas.lsa_entries,
        nsm::Event::HelloRcvd,
    );

    // Trigger the 1-WayReceived or the 2-WayReceived event.
    if hello.neighbors.contains(&instance.state.router_id) {
        nbr.fsm(
            iface,
            &arenas.area,
            instance,
            &arenas.lsa_entries,
            nsm::Event::TwoWayRcvd,
        );
    } else {
        nbr.fsm(
            iface,
            &arenas.area,
            instance,
            &arenas.lsa_entries,
            nsm::Event::OneWayRcvd,
        );

        // Update neighbor values.
        if iface.is_broadcast() {
            nbr.priority = hello.priority;
            nbr.dr = hello.dr;
            nbr.bdr = hello.bdr;
        }

        return Ok(());
    }

    // Examine the rest of the Hello packet (broadcast networks only).
    if iface.is_broadcast() {
        // Check for Router Priority change.
        if hello.priority != nbr.priority {
            nbr.priority = hello.priority;
            protocol_input.ism_event(iface.id, ism::Event::NbrChange);
        }

        // Check for DR/BDR changes.
        let nbr_addr = nbr.src;
        if iface.state.ism_state == ism::State::Waiting
            && ((hello.dr == Some(nbr_addr) && hello.bdr.is_none())
                || hello.bdr == Some(nbr_addr))
        {
            protocol_input.ism_event(iface.id, ism::Event::BackupSeen);
        }
        if (hello.dr == Some(nbr_addr) && nbr.dr != Some(nbr_addr))
            || (hello.dr != Some(nbr_addr) && nbr.dr == Some(nbr_addr))
            || (hello.bdr == Some(nbr_addr) && nbr.bdr != Some(nbr_addr))
            || (hello.bdr != Some(nbr_addr) && nbr.bdr == Some(nbr_addr))
        {
            protocol_input.ism_event(iface.id, ism::Event::NbrChange);
        }

        // Update neighbor's DR/BDR.
        nbr.dr = hello.dr;
        nbr.bdr = hello.bdr;
    }

    Ok(())
}

fn process_packet_dbdesc(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_idx: InterfaceIndex,
    nbr_idx: NeighborIndex,
    src: Ipv4Addr,
    dbdesc: DbDesc,
) -> Result<(), Error> {
    let iface = &mut arenas.interfaces[iface_idx];
    let nbr = &mut arenas.neighbors[nbr_idx];

    // MTU mismatch check.
    if !iface.config.mtu_ignore
        && dbdesc.mtu > iface.system.mtu.unwrap_or(u16::MAX)
    {
        return Err(Error::InterfaceCfgError(
            iface.name.clone(),
            src,
            PacketType::DbDesc,
            InterfaceCfgError::MtuMismatch(dbdesc.mtu),
        ));
    }

    // Further processing depends on the neighbor's state.
    match nbr.state {
        nsm::State::Down | nsm::State::Attempt | nsm::State::TwoWay => {
            return Err(Error::DbDescReject(nbr.router_id, nbr.state));
        }
        nsm::State::Init | nsm::State::ExStart => {
            if nbr.state == nsm::State::Init {
                let event = nsm::Event::TwoWayRcvd;
                nbr.fsm(
                    iface,
                    &arenas.area,
                    instance,
                    &arenas.lsa_entries,
                    event,
                );
                if nbr.state != nsm::State::ExStart {
                    return Ok(());
                }
                // Fall through to the ExStart case.
            }

            if dbdesc
                .dd_flags
                .contains(DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS)
                && dbdesc.lsa_hdrs.is_empty()
                && dbdesc.hdr.router_id > instance.state.router_id
            {
                // The neighbor is master: adopt its DD sequence number.
                nbr.dd_flags.remove(DbDescFlags::MS);
                nbr.dd_seq_no = dbdesc.dd_seq_no;
            } else if !dbdesc
                .dd_flags
                .intersects(DbDescFlags::I | DbDescFlags::MS)
                && dbdesc.dd_seq_no == nbr.dd_seq_no
                && dbdesc.hdr.router_id < instance.state.router_id
            {
                // This router is master.
            } else {
                // Ignore the packet.
                return Ok(());
            }

            nbr.options = Some(dbdesc.options);
            let event = nsm::Event::NegotiationDone;
            nbr.fsm(iface, &arenas.area, instance, &arenas.lsa_entries, event);
        }
        nsm::State::Exchange => {
            // Check for duplicate packet.
            if nbr.dbdesc_is_dup(&dbdesc) {
                // The slave retransmits the last Database Description packet
                // it had sent.
                if !nbr.dd_flags.contains(DbDescFlags::MS) {
                    output::rxmt_dbdesc(nbr, iface);
                }

                return Ok(());
            }

            // Sanity checks.
            let last_rcvd_dbdesc = nbr.last_rcvd_dbdesc.as_ref().unwrap();
            if dbdesc.dd_flags.contains(DbDescFlags::I)
                || dbdesc.dd_flags.contains(DbDescFlags::MS)
                    != last_rcvd_dbdesc.dd_flags.contains(DbDescFlags::MS)
            {
                let reason = SeqNoMismatchReason::InconsistentFlags;
                let event = nsm::Event::SeqNoMismatch(reason);
                nbr.fsm(
                    iface,
                    &arenas.area,
                    instance,
                    &arenas.lsa_entries,
                    event,
                );
                return Ok(());
            }
            if dbdesc.options != last_rcvd_dbdesc.options {
                let reason = SeqNoMismatchReason::InconsistentOptions;
                let event = nsm::Event::SeqNoMismatch(reason);
                nbr.fsm(
                    iface,
                    &arenas.area,
                    instance,
                    &arenas.lsa_entries,
                    event,
                );
                return Ok(());
            }
            if (nbr.dd_flags.contains(DbDescFlags::MS)
                && dbdesc.dd_seq_no != nbr.dd_seq_no)
                || (!nbr.dd_flags.contains(DbDescFlags::MS)
                    && dbdesc.dd_seq_no != nbr.dd_seq_no + 1)
            {
                let reason = SeqNoMismatchReason::InconsistentSeqNo;
                let event = nsm::Event::SeqNoMismatch(reason);
                nbr.fsm(
                    iface,
                    &arenas.area,
                    instance,
                    &arenas.lsa_entries,
                    event,
                );
                return Ok(());
            }
        }
        nsm::State::Loading | nsm::State::Full => {
            // Check for duplicate packet.
            if nbr.dbdesc_is_dup(&dbdesc) {
                // The slave must respond to duplicates by repeating the last
                // Database Description packet it had sent.
                if !nbr.dd_flags.contains(DbDescFlags::MS) {
                    output::rxmt_dbdesc(nbr, iface);
                }

                return Ok(());
            }

            let reason = SeqNoMismatchReason::UnexpectedDbDesc;
            let event = nsm::Event::SeqNoMismatch(reason);
            nbr.fsm(iface, &arenas.area, instance, &arenas.lsa_entries, event);
            return Ok(());
        }
    }

    // The packet was accepted: stop the retransmission interval.
    nbr.rxmt_dbdesc_stop();

    // Now iterate over all LSA headers.
    for lsa_hdr in &dbdesc.lsa_hdrs {
        // Reject unknown LSA types.
        if lsa_hdr.lsa_type.scope() == LsaScope::Unknown {
            let reason = SeqNoMismatchReason::InvalidLsaType;
            let event = nsm::Event::SeqNoMismatch(reason);
            nbr.fsm(iface, &arenas.area, instance, &arenas.lsa_entries, event);
            return Ok(());
        }

        // RFC 5243: remove Database summary list entries that are the same
        // as or less recent than the listed LSA.
        let lsa_key = lsa_hdr.key();
        if let btree_map::Entry::Occupied(o) =
            nbr.lists.db_summary.entry(lsa_key)
        {
            let db_summ_lsa = o.get();
            if lsa_compare(&db_summ_lsa.hdr, lsa_hdr) != Ordering::Greater {
                o.remove();
            }
        }

        // Put the LSA on the link state request list when it's not in the
        // LSDB, or when the local copy is less recent.
        let lsdb = match lsa_hdr.lsa_type.scope() {
            LsaScope::As => &instance.state.lsdb,
            _ => &arenas.area.state.lsdb,
        };
        if let Some((_, lse)) = lsdb.get(&arenas.lsa_entries, &lsa_key)
            && lsa_compare(&lse.data.hdr, lsa_hdr) != Ordering::Less
        {
            continue;
        }
        nbr.lists.ls_request.insert(lsa_key, *lsa_hdr);
    }

    // Start sending Link State Request packets.
    if !nbr.lists.ls_request.is_empty()
        && nbr.lists.ls_request_pending.is_empty()
    {
        output::send_lsreq(nbr, iface, instance);
    }

    // Further processing depends on whether the router is master or slave.
    let mut exchange_done = false;
    if nbr.dd_flags.contains(DbDescFlags::MS) {
        nbr.dd_seq_no += 1;

        if !nbr.dd_flags.contains(DbDescFlags::M)
            && !dbdesc.dd_flags.contains(DbDescFlags::M)
        {
            exchange_done = true;
        } else {
            output::send_dbdesc(nbr, iface, instance);
        }
    } else {
        nbr.dd_seq_no = dbdesc.dd_seq_no;

        output::send_dbdesc(nbr, iface, instance);

        if !nbr.dd_flags.contains(DbDescFlags::M)
            && !dbdesc.dd_flags.contains(DbDescFlags::M)
        {
            exchange_done = true;
        }
    }
    if exchange_done {
        nbr.fsm(
            iface,
            &arenas.area,
            instance,
            &arenas.lsa_entries,
            nsm::Event::ExchangeDone,
        );

        // The slave must wait RouterDeadInterval seconds before freeing the
        // last Database Description packet.
        if !nbr.dd_flags.contains(DbDescFlags::MS) {
            let dbdesc_free_timer =
                tasks::dbdesc_free_timer(nbr, iface, instance);
            nbr.tasks.dbdesc_free_timer = Some(dbdesc_free_timer);
        }
    }

    // Save last received Database Description packet.
    nbr.last_rcvd_dbdesc = Some(LastDbDesc {
        options: dbdesc.options,
        dd_flags: dbdesc.dd_flags,
        dd_seq_no: dbdesc.dd_seq_no,
    });

    Ok(())
}

fn process_packet_lsreq(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_idx: InterfaceIndex,
    nbr_idx: NeighborIndex,
    ls_req: LsRequest,
) -> Result<(), Error> {
    let iface = &mut arenas.interfaces[iface_idx];
    let nbr = &mut arenas.neighbors[nbr_idx];

    if nbr.state < nsm::State::Exchange {
        Debug::PacketRxIgnore(nbr.router_id, &nbr.state).log();
        return Ok(());
    }

    // Iterate over all request entries.
    for lsa_key in &ls_req.entries {
        // Locate LSA in the LSDB.
        let lsdb = match lsa_key.lsa_type.scope() {
            LsaScope::As => &instance.state.lsdb,
            LsaScope::Area => &arenas.area.state.lsdb,
            LsaScope::Unknown => {
                // Something has gone wrong with the Database Exchange
                // process.
                nbr.fsm(
                    iface,
                    &arenas.area,
                    instance,
                    &arenas.lsa_entries,
                    nsm::Event::BadLsReq,
                );
                return Ok(());
            }
        };

        if let Some((_, lse)) = lsdb.get(&arenas.lsa_entries, lsa_key) {
            // Copy LSA for transmission to the neighbor.
            let lsa = lse.data.clone();
            nbr.lists.ls_update.insert(*lsa_key, lsa);
        } else {
            // Something has gone wrong with the Database Exchange process.
            nbr.fsm(
                iface,
                &arenas.area,
                instance,
                &arenas.lsa_entries,
                nsm::Event::BadLsReq,
            );
            return Ok(());
        }
    }

    // Schedule transmission of new LS Update.
    if !nbr.lists.ls_update.is_empty() {
        instance
            .tx
            .protocol_input
            .send_lsupd(iface.id, Some(nbr.id));
    }

    Ok(())
}

fn process_packet_lsupd(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_idx: InterfaceIndex,
    nbr_idx: NeighborIndex,
    ls_upd: LsUpdate,
) -> Result<(), Error> {
    let nbr = &arenas.neighbors[nbr_idx];
    if nbr.state < nsm::State::Exchange {
        Debug::PacketRxIgnore(nbr.router_id, &nbr.state).log();
        return Ok(());
    }

    // Process all LSAs contained in the packet.
    for lsa in ls_upd.lsas {
        let stop =
            process_packet_lsupd_lsa(instance, arenas, iface_idx, nbr_idx, lsa);
        if stop {
            break;
        }
    }

    Ok(())
}

fn process_packet_lsupd_lsa(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_idx: InterfaceIndex,
    nbr_idx: NeighborIndex,
    lsa: Lsa,
) -> bool {
    let nbr = &arenas.neighbors[nbr_idx];
    let nbr_router_id = nbr.router_id;

    // (1) Validate the LSA (not only the checksum as specified by the RFC).
    if lsa.validate().is_err() {
        Debug::LsaDiscard(nbr_router_id, &lsa.hdr).log();

        // Examine the next LSA.
        return false;
    }

    // (2-3) Determine the LSDB of the LSA. Unknown types are stored in the
    // area LSDB.
    let lsdb_id = match lsa.hdr.lsa_type.scope() {
        LsaScope::As => LsdbId::As,
        _ => LsdbId::Area,
    };
    let lsdb = match lsdb_id {
        LsdbId::As => &instance.state.lsdb,
        LsdbId::Area => &arenas.area.state.lsdb,
    };
    let lsa_key = lsa.hdr.key();
    let lse = lsdb.get(&arenas.lsa_entries, &lsa_key).map(|(_, lse)| lse);

    // (4) If the LSA's age is MaxAge, there is no database copy and no
    // neighbor is in Exchange or Loading, acknowledge and discard.
    if lsa.hdr.is_maxage()
        && lse.is_none()
        && !arenas.neighbors.iter().any(|(_, nbr)| {
            matches!(nbr.state, nsm::State::Exchange | nsm::State::Loading)
        })
    {
        let nbr = &arenas.neighbors[nbr_idx];
        let iface = &arenas.interfaces[iface_idx];
        output::send_lsack_direct(nbr, iface, instance, &lsa.hdr);

        // Examine the next LSA.
        return false;
    }

    // (5) There is no database copy, or the received LSA is more recent.
    let lsa_cmp = lse.map(|lse| lsa_compare(&lse.data.hdr, &lsa.hdr));
    if matches!(lsa_cmp, None | Some(Ordering::Less)) {
        // (5.a) MinLSArrival check.
        if let Some(lse) = lse
            && lsdb::lsa_min_arrival_check(lse)
        {
            Debug::LsaMinArrivalDiscard(nbr_router_id, &lsa.hdr).log();

            // Examine the next LSA.
            return false;
        }

        // Move LSA into a reference-counting pointer.
        let lsa = Arc::new(lsa);

        // (5.b) Immediately flood the new LSA out some subset of the
        // router's interfaces.
        let src_idx = Some((iface_idx, nbr_idx));
        let flooded_back = flood(
            instance,
            &arenas.area,
            &mut arenas.interfaces,
            &mut arenas.neighbors,
            &lsa,
            src_idx,
        );

        // (5.c) The installation process below removes the old copy from
        // all link state retransmission lists.

        // (5.d) Install the new LSA in the link state database.
        let lse_idx = lsdb::install(instance, arenas, lsdb_id, lsa);
        let lse = &mut arenas.lsa_entries[lse_idx];
        lse.flags.insert(LsaEntryFlags::RECEIVED);
        let lsa_hdr = lse.data.hdr;
        let self_originated =
            lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED);
        let lse_id = lse.id;

        // (5.e) Possibly acknowledge the receipt of the LSA.
        let nbr = &arenas.neighbors[nbr_idx];
        let iface = &mut arenas.interfaces[iface_idx];
        let nbr_addr = nbr.src;
        if !flooded_back
            && (iface.state.ism_state != ism::State::Backup
                || iface.state.dr == Some(nbr_addr))
        {
            match iface.config.if_type {
                // Direct ack on point-to-point links.
                InterfaceType::PointToPoint | InterfaceType::Loopback => {
                    output::send_lsack_direct(nbr, iface, instance, &lsa_hdr);
                }
                // Delayed ack on broadcast networks.
                InterfaceType::Broadcast => {
                    iface.enqueue_delayed_ack(instance, &lsa_hdr);
                }
            }
        }

        // (5.f) Check if this is a self-originated LSA.
        if self_originated {
            Debug::LsaSelfOriginated(nbr_router_id, &lsa_hdr).log();

            // (Re)originate or flush the self-originated LSA.
            instance.tx.protocol_input.lsa_orig_event(
                LsaOriginateEvent::SelfOriginatedLsaRcvd { lsdb_id, lse_id },
            );
        }

        // Examine the next LSA.
        return false;
    }

    // (6) Check if the received LSA is the same instance as the database
    // copy (i.e., neither one is more recent).
    let nbr = &mut arenas.neighbors[nbr_idx];
    let iface = &mut arenas.interfaces[iface_idx];
    let lse = lse.unwrap();
    let lse_hdr = lse.data.hdr;
    if lsa_cmp == Some(Ordering::Equal) {
        // Check if this LSA can be handled as an implied acknowledgment.
        if let btree_map::Entry::Occupied(o) = nbr.lists.ls_rxmt.entry(lsa_key)
        {
            o.remove();
            nbr.rxmt_lsupd_stop_check();

            let nbr_addr = nbr.src;
            if iface.state.ism_state == ism::State::Backup
                && iface.state.dr == Some(nbr_addr)
            {
                // Enqueue delayed ack.
                iface.enqueue_delayed_ack(instance, &lsa.hdr);
            }
        } else {
            // Send direct ack.
            output::send_lsack_direct(nbr, iface, instance, &lsa.hdr);
        }

        // Examine the next LSA.
        return false;
    }

    // (7) If there is an instance of the LSA on the sending neighbor's
    // link state request list, an error has occurred in the Database
    // Exchange process.
    if nbr.lists.ls_request.contains_key(&lsa_key)
        || nbr.lists.ls_request_pending.contains_key(&lsa_key)
    {
        // Restart the Database Exchange process.
        nbr.fsm(
            iface,
            &arenas.area,
            instance,
            &arenas.lsa_entries,
            nsm::Event::BadLsReq,
        );

        // Stop processing the Link State Update packet.
        return true;
    }

    // (8) The database copy is more recent.
    //
    // If the database copy has LS age equal to MaxAge and LS sequence
    // number equal to MaxSequenceNumber, simply discard the received LSA
    // without acknowledging it.
    if lse_hdr.is_maxage() && lse_hdr.seq_no == lsdb::LSA_MAX_SEQ_NO {
        // Examine the next LSA.
        return false;
    }
    let lse = arenas.area.state.lsdb.get(&arenas.lsa_entries, &lsa_key)
        .or_else(|| instance.state.lsdb.get(&arenas.lsa_entries, &lsa_key))
        .map(|(_, lse)| lse)
        .unwrap();
    if !lsdb::lsa_min_arrival_check(lse) {
        // Send the database copy back to the sending neighbor,
        // encapsulated within a Link State Update packet.
        nbr.lists.ls_update.insert(lsa_key, lse.data.clone());
        instance
            .tx
            .protocol_input
            .send_lsupd(iface.id, Some(nbr.id));
    } else {
        Debug::LsaMinArrivalDiscard(nbr_router_id, &lsa.hdr).log();
    }

    // Examine the next LSA.
    false
}

fn process_packet_lsack(
    arenas: &mut InstanceArenas,
    nbr_idx: NeighborIndex,
    ls_ack: LsAck,
) -> Result<(), Error> {
    let nbr = &mut arenas.neighbors[nbr_idx];

    if nbr.state < nsm::State::Exchange {
        Debug::PacketRxIgnore(nbr.router_id, &nbr.state).log();
        return Ok(());
    }

    // Iterate over all LSA headers.
    for lsa_hdr in &ls_ack.lsa_hdrs {
        let lsa_key = lsa_hdr.key();
        if let btree_map::Entry::Occupied(o) = nbr.lists.ls_rxmt.entry(lsa_key)
        {
            let lsa = o.get();
            if lsa_compare(&lsa.hdr, lsa_hdr) == Ordering::Equal {
                o.remove();
                nbr.rxmt_lsupd_stop_check();
            } else {
                Debug::QuestionableAck(nbr.router_id, lsa_hdr).log();
            }
        }
    }

    Ok(())
}

// ===== Free last sent/received Database Description packets =====

pub(crate) fn process_dbdesc_free(
    _instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_key: InterfaceKey,
    nbr_key: NeighborKey,
) -> Result<(), Error> {
    // Lookup interface and neighbor.
    let (_, iface) = arenas
        .area
        .interfaces
        .get_mut_by_key(&mut arenas.interfaces, &iface_key)?;
    let (_, nbr) = iface
        .state
        .neighbors
        .get_mut_by_key(&mut arenas.neighbors, &nbr_key)?;

    // Free last sent/received Database Description packets.
    nbr.tasks.dbdesc_free_timer = None;
    nbr.last_rcvd_dbdesc = None;
    nbr.last_sent_dbdesc = None;

    Ok(())
}

// ===== Request to send LS Update =====

pub(crate) fn process_send_lsupd(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_key: InterfaceKey,
    nbr_key: Option<NeighborKey>,
) -> Result<(), Error> {
    // Lookup interface and optional neighbor.
    let (_, iface) = arenas
        .area
        .interfaces
        .get_mut_by_key(&mut arenas.interfaces, &iface_key)?;
    let nbr_idx = match &nbr_key {
        Some(nbr_key) => {
            let (nbr_idx, _) = iface
                .state
                .neighbors
                .get_mut_by_key(&mut arenas.neighbors, nbr_key)?;
            Some(nbr_idx)
        }
        None => None,
    };

    // Send LS Update.
    iface.state.tasks.ls_update_timer = None;
    output::send_lsupd(nbr_idx, iface, instance, &mut arenas.neighbors);

    Ok(())
}

// ===== Packet retransmission =====

pub(crate) fn process_packet_rxmt(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_key: InterfaceKey,
    nbr_key: NeighborKey,
    packet_type: RxmtPacketType,
) -> Result<(), Error> {
    // Lookup interface and neighbor.
    let (_, iface) = arenas
        .area
        .interfaces
        .get_mut_by_key(&mut arenas.interfaces, &iface_key)?;
    let (_, nbr) = iface
        .state
        .neighbors
        .get_mut_by_key(&mut arenas.neighbors, &nbr_key)?;

    // Retransmit packet.
    match packet_type {
        RxmtPacketType::DbDesc => {
            output::rxmt_dbdesc(nbr, iface);
        }
        RxmtPacketType::LsRequest => {
            output::rxmt_lsreq(nbr, iface, instance);
        }
        RxmtPacketType::LsUpdate => {
            output::rxmt_lsupd(nbr, iface, instance);
        }
    }

    Ok(())
}

// ===== Delayed Ack timeout =====

pub(crate) fn process_delayed_ack_timeout(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_key: InterfaceKey,
) -> Result<(), Error> {
    // Lookup interface.
    let (_, iface) = arenas
        .area
        .interfaces
        .get_mut_by_key(&mut arenas.interfaces, &iface_key)?;

    // Send delayed LS Ack.
    iface.state.tasks.ls_delayed_ack = None;
    output::send_lsack_delayed(iface, instance);

    Ok(())
}

// ===== LSA origination event =====

pub(crate) fn process_lsa_orig_event(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    event: LsaOriginateEvent,
) -> Result<(), Error> {
    lsdb::lsa_orig_event(instance, arenas, event);

    Ok(())
}

// ===== LSA delayed origination timer =====

pub(crate) fn process_lsa_orig_delayed_timer(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_id: LsdbId,
    lsa_key: LsaKey,
) -> Result<(), Error> {
    // Remove the postponed origination and carry it out.
    let lsdb = match lsdb_id {
        LsdbId::Area => &mut arenas.area.state.lsdb,
        LsdbId::As => &mut instance.state.lsdb,
    };
    if let Some(delayed_orig) = lsdb.delayed_orig.remove(&lsa_key) {
        lsdb::originate(instance, arenas, lsdb_id, delayed_orig.data);
    }

    Ok(())
}

// ===== LSA expiry =====

pub(crate) fn process_lsa_expiry(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
) -> Result<(), Error> {
    // Lookup LSA entry.
    let lsdb = match lsdb_id {
        LsdbId::Area => &arenas.area.state.lsdb,
        LsdbId::As => &instance.state.lsdb,
    };
    let Some((lse_idx, _)) =
        lsdb.get_mut_by_id(&mut arenas.lsa_entries, lse_id)
    else {
        return Ok(());
    };

    // Flood the expired LSA at MaxAge, acting as an explicit flush.
    lsdb::flush(instance, arenas, lsdb_id, lse_idx, LsaFlushReason::Expiry);

    Ok(())
}

// ===== LSA refresh =====

pub(crate) fn process_lsa_refresh(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
) -> Result<(), Error> {
    // Lookup LSA entry.
    let lsdb = match lsdb_id {
        LsdbId::Area => &arenas.area.state.lsdb,
        LsdbId::As => &instance.state.lsdb,
    };
    let Some((_, lse)) = lsdb.get_mut_by_id(&mut arenas.lsa_entries, lse_id)
    else {
        return Ok(());
    };

    // Reoriginate the LSA with an incremented sequence number.
    Debug::LsaRefresh(&lse.data.hdr).log();
    let lsa = Lsa::new(
        0,
        lse.data.hdr.options,
        lse.data.hdr.lsa_id,
        lse.data.hdr.adv_rtr,
        lse.data.hdr.seq_no + 1,
        lse.data.body.clone(),
    );
    lsdb::originate(instance, arenas, lsdb_id, lsa);

    Ok(())
}

// ===== SPF hold timer =====

pub(crate) fn process_spf_timer(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) -> Result<(), Error> {
    spf::process_spf_timer(instance, arenas);

    Ok(())
}

// ===== MaxAge sweep =====

pub(crate) fn process_maxage_sweep(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) -> Result<(), Error> {
    lsdb::maxage_sweep(instance, arenas);

    Ok(())
}
