//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::{BTreeSet, btree_map, hash_map};
use std::net::Ipv4Addr;
use std::sync::Arc;

use bitflags::bitflags;
use nbrd_utils::task::TimeoutTask;
use serde::{Deserialize, Serialize};

use crate::area::Area;
use crate::collections::{
    Arena, InterfaceId, InterfaceIndex, LsaEntryId, LsaEntryIndex, LsdbId,
};
use crate::debug::{Debug, LsaFlushReason};
use crate::flood::flood;
use crate::instance::{
    InstanceArenas, InstanceUpView, ProtocolInputChannelsTx,
};
use crate::interface::{Interface, InterfaceType, ism};
use crate::neighbor::nsm;
use crate::packet::Options;
use crate::packet::lsa::{
    Lsa, LsaBody, LsaKey, LsaNetwork, LsaRouter, LsaRouterFlags,
    LsaRouterLink, LsaRouterLinkType, LsaTypeCode,
};
use crate::{spf, tasks};

// Architectural constants.
pub const LSA_REFRESH_TIME: u16 = 1800;
pub const LSA_MAX_AGE: u16 = 3600;
pub const LSA_MAX_AGE_DIFF: u16 = 900;
pub const LSA_INFINITY: u32 = 0x00ffffff;
pub const LSA_INIT_SEQ_NO: u32 = 0x80000001;
pub const LSA_MAX_SEQ_NO: u32 = 0x7fffffff;
pub const LSA_RESERVED_SEQ_NO: u32 = 0x80000000;
pub const LSA_MIN_INTERVAL: u64 = 5;
pub const LSA_MIN_ARRIVAL: u64 = 1;

#[derive(Debug)]
pub struct LsaEntry {
    // LSA ID.
    pub id: LsaEntryId,
    // LSA data.
    pub data: Arc<Lsa>,
    // Expiry timer that triggers when the LSA age reaches MaxAge.
    pub expiry_timer: Option<TimeoutTask>,
    // Refresh timer that triggers every LSRefreshTime seconds.
    pub refresh_timer: Option<TimeoutTask>,
    // LSA entry flags.
    pub flags: LsaEntryFlags,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct LsaEntryFlags: u8 {
        const RECEIVED = 0x01;
        const SELF_ORIGINATED = 0x02;
    }
}

// Events that may require LSAs to be (re)originated or flushed.
#[derive(Debug, Deserialize, Serialize)]
pub enum LsaOriginateEvent {
    InstanceStart,
    InterfaceStateChange { iface_id: InterfaceId },
    InterfaceDrChange { iface_id: InterfaceId },
    InterfaceAddrAddDel { iface_id: InterfaceId },
    InterfaceCostChange,
    NeighborToFromFull { iface_id: InterfaceId },
    SelfOriginatedLsaRcvd { lsdb_id: LsdbId, lse_id: LsaEntryId },
}

// LSA whose origination was postponed by the MinLSInterval check.
#[derive(Debug)]
pub struct LsaDelayedOrig {
    pub data: Lsa,
    pub timeout: TimeoutTask,
}

// ===== impl LsaEntry =====

impl LsaEntry {
    pub(crate) fn new(
        lsdb_id: LsdbId,
        id: LsaEntryId,
        data: Arc<Lsa>,
        protocol_input: &ProtocolInputChannelsTx,
    ) -> LsaEntry {
        let expiry_timer = (!data.hdr.is_maxage()).then_some(
            tasks::lsa_expiry_timer(lsdb_id, id, &data, protocol_input),
        );

        LsaEntry {
            id,
            data,
            expiry_timer,
            refresh_timer: None,
            flags: Default::default(),
        }
    }
}

// ===== global functions =====

// Compares which LSA is more recent according to the rules specified in
// section 13.1 of RFC 2328.
//
// Returns:
// - Ordering::Greater when `a` is more recent
// - Ordering::Less when `b` is more recent
// - Ordering::Equal when the two LSAs are considered to be identical
pub(crate) fn lsa_compare(a: &crate::packet::lsa::LsaHdr, b: &crate::packet::lsa::LsaHdr) -> Ordering {
    let a_seq_no = a.seq_no as i32;
    let b_seq_no = b.seq_no as i32;
    let cmp = a_seq_no.cmp(&b_seq_no);
    if cmp != Ordering::Equal {
        return cmp;
    }

    let cmp = a.cksum.cmp(&b.cksum);
    if cmp != Ordering::Equal {
        return cmp;
    }

    if a.is_maxage() && !b.is_maxage() {
        return Ordering::Greater;
    } else if !a.is_maxage() && b.is_maxage() {
        return Ordering::Less;
    }

    if a.age.abs_diff(b.age) > LSA_MAX_AGE_DIFF {
        return b.age.cmp(&a.age);
    }

    Ordering::Equal
}

// Compares two LSAs according to the rules specified in section 13.2 of
// RFC 2328, to determine whether their contents are identical.
fn lsa_same_contents(a: &Lsa, b: &Lsa) -> bool {
    if a.hdr.options != b.hdr.options {
        return false;
    }

    if a.hdr.is_maxage() ^ b.hdr.is_maxage() {
        return false;
    }

    if a.hdr.length != b.hdr.length {
        return false;
    }

    let hdr_length = crate::packet::lsa::LsaHdr::LENGTH as usize;
    a.raw[hdr_length..] == b.raw[hdr_length..]
}

// Checks if the given LSA was received via flooding less than MinLSArrival
// seconds ago.
pub(crate) fn lsa_min_arrival_check(lse: &LsaEntry) -> bool {
    if !lse.flags.contains(LsaEntryFlags::RECEIVED) {
        return false;
    }

    match lse.data.base_time {
        Some(lsa_base_time) => {
            lsa_base_time.elapsed().as_secs() < LSA_MIN_ARRIVAL
        }
        None => false,
    }
}

// Checks if the given LSA was originated less than MinLSInterval seconds
// ago.
fn lsa_min_orig_interval_check(lse: &LsaEntry) -> bool {
    if lse.flags.contains(LsaEntryFlags::RECEIVED) {
        return false;
    }

    match lse.data.base_time {
        Some(lsa_base_time) => {
            lsa_base_time.elapsed().as_secs() < LSA_MIN_INTERVAL
        }
        None => false,
    }
}

// Checks whether the LSA was originated by this router.
pub(crate) fn lsa_is_self_originated(
    lsa: &Lsa,
    router_id: Ipv4Addr,
    interfaces: &Arena<Interface>,
) -> bool {
    // The LSA's Advertising Router is equal to the router's own Router ID.
    if lsa.hdr.adv_rtr == router_id {
        return true;
    }

    // The LSA is a Network-LSA whose Link State ID is equal to one of the
    // router's own interface addresses.
    if lsa.hdr.lsa_type.type_code() == Some(LsaTypeCode::Network) {
        return interfaces
            .iter()
            .any(|(_, iface)| iface.state.src_addr == Some(lsa.hdr.lsa_id));
    }

    false
}

// Installs the provided LSA to the specified LSDB.
pub(crate) fn install(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_id: LsdbId,
    lsa: Arc<Lsa>,
) -> LsaEntryIndex {
    Debug::LsaInstall(&lsa.hdr).log();

    // Remove old instance (if any) from all neighbors' link state
    // retransmission lists.
    rxmt_lists_remove(arenas, &lsa);

    // Lookup LSDB.
    let lsdb = match lsdb_id {
        LsdbId::Area => &mut arenas.area.state.lsdb,
        LsdbId::As => &mut instance.state.lsdb,
    };

    // Remove old instance of the LSA.
    let old_lsa = match lsdb.get(&arenas.lsa_entries, &lsa.hdr.key()) {
        Some((old_lse_idx, old_lse)) => {
            let old_lsa = old_lse.data.clone();
            lsdb.delete(&mut arenas.lsa_entries, old_lse_idx);
            Some(old_lsa)
        }
        None => None,
    };

    // Add LSA entry to LSDB.
    let (lse_idx, lse) = lsdb.insert(
        &mut arenas.lsa_entries,
        lsdb_id,
        lsa.clone(),
        &instance.tx.protocol_input,
    );

    // Check if the LSA is self-originated and mark it as such.
    if lsa_is_self_originated(
        &lse.data,
        instance.state.router_id,
        &arenas.interfaces,
    ) {
        lse.flags.insert(LsaEntryFlags::SELF_ORIGINATED);
    }

    // RFC 2328 section 13.2: if the new LSA has the same contents as the
    // old instance, there is no need to recalculate the routing table.
    let mut content_change = true;
    if let Some(old_lsa) = &old_lsa
        && lsa_same_contents(old_lsa, &lsa)
    {
        content_change = false;
    }
    let route_recalc = content_change && !lsa.body.is_unknown();

    // Schedule SPF run if necessary.
    if route_recalc {
        spf::schedule(instance);
    }

    lse_idx
}

// Originates the provided LSA.
pub(crate) fn originate(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_id: LsdbId,
    lsa: Lsa,
) {
    let lsdb = match lsdb_id {
        LsdbId::Area => &mut arenas.area.state.lsdb,
        LsdbId::As => &mut instance.state.lsdb,
    };

    // When an attempt is made to increment the sequence number past
    // MaxSequenceNumber, the current instance must first be flushed from
    // the routing domain. A new instance with InitialSequenceNumber is
    // originated once the flush is acknowledged by all adjacent neighbors.
    let lsa_key = lsa.hdr.key();
    if let Some((old_lse_idx, _)) = lsdb.get(&arenas.lsa_entries, &lsa_key)
        && lsa.hdr.seq_no == LSA_MAX_SEQ_NO + 1
    {
        match lsdb.seqno_wrapping.entry(lsa_key) {
            hash_map::Entry::Occupied(mut o) => {
                *o.get_mut() = lsa;
            }
            hash_map::Entry::Vacant(v) => {
                v.insert(lsa);
            }
        }
        let reason = LsaFlushReason::PrematureAging;
        flush(instance, arenas, lsdb_id, old_lse_idx, reason);
        return;
    }

    Debug::LsaOriginate(&lsa.hdr).log();

    let lse_idx = install(instance, arenas, lsdb_id, Arc::new(lsa));

    let lse = &mut arenas.lsa_entries[lse_idx];
    flood(
        instance,
        &arenas.area,
        &mut arenas.interfaces,
        &mut arenas.neighbors,
        &lse.data,
        None,
    );

    // Schedule LSA refreshing.
    let refresh_timer = tasks::lsa_refresh_timer(
        lsdb_id,
        lse.id,
        &instance.tx.protocol_input,
    );
    lse.refresh_timer = Some(refresh_timer);
}

// Attempts to originate the provided LSA, subject to the MinLSInterval and
// same-contents checks.
pub(crate) fn originate_check(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_id: LsdbId,
    lsa_id: Ipv4Addr,
    lsa_body: LsaBody,
) {
    let lsdb = match lsdb_id {
        LsdbId::Area => &mut arenas.area.state.lsdb,
        LsdbId::As => &mut instance.state.lsdb,
    };
    let adv_rtr = instance.state.router_id;
    let lsa_key = LsaKey::new(lsa_body.lsa_type(), adv_rtr, lsa_id);

    // Get next sequence number.
    let seq_no = lsdb
        .get(&arenas.lsa_entries, &lsa_key)
        .map(|(_, old_lse)| old_lse.data.hdr.seq_no + 1)
        .unwrap_or(LSA_INIT_SEQ_NO);

    // Make new LSA.
    let lsa = Lsa::new(0, Options::E, lsa_id, adv_rtr, seq_no, lsa_body);

    // Check if an instance of this LSA already exists in the LSDB.
    if let Some((_, old_lse)) = lsdb.get(&arenas.lsa_entries, &lsa_key) {
        // If an LSA with identical contents already exists, skip originating
        // a new one (section 12.4 of RFC 2328), unless the database copy was
        // received through flooding.
        if lsa_same_contents(&old_lse.data, &lsa)
            && !old_lse.flags.contains(LsaEntryFlags::RECEIVED)
        {
            return;
        }

        // Perform the MinLSInterval check.
        if lsdb.delayed_orig.contains_key(&lsa_key)
            || lsa_min_orig_interval_check(old_lse)
        {
            Debug::LsaOriginateMinInterval(&lsa.hdr).log();

            match lsdb.delayed_orig.entry(lsa_key) {
                hash_map::Entry::Occupied(mut o) => {
                    // Update the LSA that will be originated, but keep the
                    // current timeout.
                    let ldo = o.get_mut();
                    ldo.data = lsa;
                }
                hash_map::Entry::Vacant(v) => {
                    // Start timer to postpone originating the LSA.
                    let timeout = tasks::lsa_orig_delayed_timer(
                        lsdb_id,
                        lsa_key,
                        &instance.tx.protocol_input,
                    );
                    v.insert(LsaDelayedOrig { data: lsa, timeout });
                }
            }
            return;
        }
    }

    // Effectively originate the LSA.
    originate(instance, arenas, lsdb_id, lsa);
}

// Flushes the LSA from the LSDB by prematurely aging it to MaxAge and
// reflooding it.
pub(crate) fn flush(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_id: LsdbId,
    lse_idx: LsaEntryIndex,
    reason: LsaFlushReason,
) {
    // Do not flush the same LSA more than once.
    let lse = &mut arenas.lsa_entries[lse_idx];
    if lse.data.hdr.is_maxage() {
        return;
    }

    Debug::LsaFlush(&lse.data.hdr, reason).log();

    // Disarm timers.
    lse.expiry_timer = None;
    lse.refresh_timer = None;

    // Set the LSA age to MaxAge.
    let mut lsa = (*lse.data).clone();
    lsa.set_maxage();
    let lsa = Arc::new(lsa);

    // Install updated LSA to clear rxmt lists and rerun route calculations.
    let lse_idx = install(instance, arenas, lsdb_id, lsa);

    // Reflood updated LSA.
    let lse = &arenas.lsa_entries[lse_idx];
    flood(
        instance,
        &arenas.area,
        &mut arenas.interfaces,
        &mut arenas.neighbors,
        &lse.data,
        None,
    );

    // Remove pending LSA origination, if any.
    let lsa_key = arenas.lsa_entries[lse_idx].data.hdr.key();
    let lsdb = match lsdb_id {
        LsdbId::Area => &mut arenas.area.state.lsdb,
        LsdbId::As => &mut instance.state.lsdb,
    };
    lsdb.delayed_orig.remove(&lsa_key);
}

// Flushes all self-originated LSAs. Used when the instance is shutting
// down.
pub(crate) fn flush_all_self_originated(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) {
    let reason = LsaFlushReason::PrematureAging;
    let mut idxs = vec![];

    for (lsdb_id, lsdb) in [
        (LsdbId::Area, &arenas.area.state.lsdb),
        (LsdbId::As, &instance.state.lsdb),
    ] {
        idxs.extend(
            lsdb.iter(&arenas.lsa_entries)
                .filter(|(_, lse)| {
                    lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED)
                })
                .map(|(lse_idx, _)| (lsdb_id, lse_idx)),
        );
    }

    for (lsdb_id, lse_idx) in idxs {
        flush(instance, arenas, lsdb_id, lse_idx, reason);
    }
}

// Deletes MaxAge LSAs that are no longer on any neighbor's retransmission
// list and that no neighbor is waiting to receive.
pub(crate) fn maxage_sweep(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) {
    // MaxAge LSAs must be kept while a database exchange is in progress.
    if arenas.neighbors.iter().any(|(_, nbr)| {
        matches!(nbr.state, nsm::State::Exchange | nsm::State::Loading)
    }) {
        return;
    }

    for lsdb_id in [LsdbId::Area, LsdbId::As] {
        // Collect the MaxAge LSAs that were acknowledged by all neighbors.
        let removable = {
            let lsdb = match lsdb_id {
                LsdbId::Area => &arenas.area.state.lsdb,
                LsdbId::As => &instance.state.lsdb,
            };
            lsdb.maxage_lsas
                .iter()
                .copied()
                .map(|lse_idx| {
                    (lse_idx, arenas.lsa_entries[lse_idx].data.hdr.key())
                })
                .filter(|(_, lsa_key)| {
                    !arenas.neighbors.iter().any(|(_, nbr)| {
                        nbr.lists.ls_rxmt.contains_key(lsa_key)
                    })
                })
                .collect::<Vec<_>>()
        };

        // Remove them from the LSDB, keeping note of LSAs waiting for
        // their sequence number to wrap.
        let mut wrapped = vec![];
        {
            let lsdb = match lsdb_id {
                LsdbId::Area => &mut arenas.area.state.lsdb,
                LsdbId::As => &mut instance.state.lsdb,
            };
            for (lse_idx, lsa_key) in removable {
                lsdb.delete(&mut arenas.lsa_entries, lse_idx);
                if let Some(lsa) = lsdb.seqno_wrapping.remove(&lsa_key) {
                    wrapped.push(lsa);
                }
            }
        }

        // Reoriginate LSAs whose sequence number wrapped, restarting from
        // the initial sequence number.
        for mut lsa in wrapped {
            lsa.hdr.seq_no = LSA_INIT_SEQ_NO;
            lsa.encode();
            originate(instance, arenas, lsdb_id, lsa);
        }
    }
}

// Removes old instances of the given LSA from all neighbors' link state
// retransmission lists.
fn rxmt_lists_remove(arenas: &mut InstanceArenas, lsa: &Lsa) {
    for iface_idx in arenas.area.interfaces.indexes() {
        let iface = &arenas.interfaces[iface_idx];

        for nbr_idx in iface.state.neighbors.indexes() {
            let nbr = &mut arenas.neighbors[nbr_idx];

            // Remove the LSA from the rxmt list as long as it's an older
            // version.
            if let btree_map::Entry::Occupied(o) =
                nbr.lists.ls_rxmt.entry(lsa.hdr.key())
            {
                let old_lsa = o.get();
                if lsa_compare(&old_lsa.hdr, &lsa.hdr) == Ordering::Less {
                    o.remove();
                    nbr.rxmt_lsupd_stop_check();
                }
            }
        }
    }
}

// ===== LSA origination =====

// Handles an LSA origination event by (re)originating or flushing the LSAs
// that might have been affected.
pub(crate) fn lsa_orig_event(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    event: LsaOriginateEvent,
) {
    match event {
        LsaOriginateEvent::InstanceStart
        | LsaOriginateEvent::InterfaceCostChange => {
            lsa_orig_router(instance, arenas);
        }
        LsaOriginateEvent::InterfaceStateChange { .. }
        | LsaOriginateEvent::InterfaceAddrAddDel { .. } => {
            lsa_orig_router(instance, arenas);
        }
        LsaOriginateEvent::NeighborToFromFull { iface_id } => {
            lsa_orig_router(instance, arenas);
            network_lsa_check(instance, arenas, iface_id);
        }
        LsaOriginateEvent::InterfaceDrChange { iface_id } => {
            network_lsa_check(instance, arenas, iface_id);
        }
        LsaOriginateEvent::SelfOriginatedLsaRcvd { lsdb_id, lse_id } => {
            lsa_orig_self_originated_rcvd(instance, arenas, lsdb_id, lse_id);
        }
    }
}

// (Re)originates the Router-LSA for the backbone area, per RFC 2328
// section 12.4.1.
fn lsa_orig_router(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) {
    let router_id = instance.state.router_id;
    let mut links = vec![];

    for iface in arenas
        .area
        .interfaces
        .iter(&arenas.interfaces)
        .filter(|iface| !iface.is_down())
    {
        // Loopback and passive interfaces contribute stub links only.
        if iface.state.ism_state == ism::State::Loopback || iface.is_passive()
        {
            for addr in &iface.system.addr_list {
                links.push(LsaRouterLink::new(
                    LsaRouterLinkType::StubNetwork,
                    addr.ip(),
                    Ipv4Addr::BROADCAST,
                    0,
                ));
            }
            continue;
        }

        match iface.config.if_type {
            InterfaceType::PointToPoint => {
                // Add a Type-1 link for each fully adjacent neighbor.
                for nbr in iface
                    .state
                    .neighbors
                    .iter(&arenas.neighbors)
                    .filter(|nbr| nbr.state == nsm::State::Full)
                {
                    links.push(LsaRouterLink::new(
                        LsaRouterLinkType::PointToPoint,
                        nbr.router_id,
                        iface.state.src_addr.unwrap(),
                        iface.config.cost,
                    ));
                }

                // Add a stub link for the interface subnet.
                if let Some(addr) = &iface.system.primary_addr {
                    links.push(LsaRouterLink::new(
                        LsaRouterLinkType::StubNetwork,
                        addr.network(),
                        addr.mask(),
                        iface.config.cost,
                    ));
                }
            }
            InterfaceType::Broadcast => {
                // The network is transit if the router is fully adjacent to
                // the DR, or is itself the DR with at least one full
                // adjacency.
                let full_nbr_to_dr = |dr: Ipv4Addr| {
                    iface
                        .state
                        .neighbors
                        .iter(&arenas.neighbors)
                        .any(|nbr| {
                            nbr.src == dr && nbr.state == nsm::State::Full
                        })
                };
                let transit = match iface.state.dr {
                    Some(dr) if Some(dr) == iface.state.src_addr => iface
                        .state
                        .neighbors
                        .iter(&arenas.neighbors)
                        .any(|nbr| nbr.state == nsm::State::Full),
                    Some(dr) => full_nbr_to_dr(dr),
                    None => false,
                };

                if let Some(dr) = iface.state.dr
                    && transit
                {
                    links.push(LsaRouterLink::new(
                        LsaRouterLinkType::TransitNetwork,
                        dr,
                        iface.state.src_addr.unwrap(),
                        iface.config.cost,
                    ));
                } else if let Some(addr) = &iface.system.primary_addr {
                    links.push(LsaRouterLink::new(
                        LsaRouterLinkType::StubNetwork,
                        addr.network(),
                        addr.mask(),
                        iface.config.cost,
                    ));
                }
            }
            InterfaceType::Loopback => (),
        }
    }

    let lsa_body = LsaBody::Router(LsaRouter {
        flags: LsaRouterFlags::empty(),
        links,
    });
    arenas.area.state.router_lsa_self = Some(LsaKey::new(
        LsaTypeCode::Router.into(),
        router_id,
        router_id,
    ));
    originate_check(instance, arenas, LsdbId::Area, router_id, lsa_body);
}

// Originates or flushes the Network-LSA of the given interface, per RFC
// 2328 section 12.4.2.
fn network_lsa_check(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_id: InterfaceId,
) {
    let Ok((iface_idx, _)) = arenas.area.interfaces.get_mut_by_key(
        &mut arenas.interfaces,
        &iface_id.into(),
    ) else {
        return;
    };
    network_lsa_check_idx(instance, arenas, iface_idx);
}

fn network_lsa_check_idx(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_idx: InterfaceIndex,
) {
    let router_id = instance.state.router_id;
    let iface = &arenas.interfaces[iface_idx];

    let Some(iface_addr) = iface.state.src_addr else {
        return;
    };
    let Some(primary_addr) = iface.system.primary_addr else {
        return;
    };

    // A Network-LSA exists only while the router is the DR and is fully
    // adjacent to at least one other router.
    let full_nbrs = iface
        .state
        .neighbors
        .iter(&arenas.neighbors)
        .filter(|nbr| nbr.state == nsm::State::Full)
        .map(|nbr| nbr.router_id)
        .collect::<BTreeSet<_>>();

    if iface.state.ism_state == ism::State::Dr && !full_nbrs.is_empty() {
        let mut attached_rtrs = full_nbrs;
        attached_rtrs.insert(router_id);
        let lsa_body = LsaBody::Network(LsaNetwork {
            mask: primary_addr.mask(),
            attached_rtrs,
        });
        let iface = &mut arenas.interfaces[iface_idx];
        iface.state.network_lsa_self = Some(LsaKey::new(
            LsaTypeCode::Network.into(),
            router_id,
            iface_addr,
        ));
        originate_check(instance, arenas, LsdbId::Area, iface_addr, lsa_body);
    } else if let Some(lsa_key) =
        arenas.interfaces[iface_idx].state.network_lsa_self.take()
        && let Some((lse_idx, _)) =
            arenas.area.state.lsdb.get(&arenas.lsa_entries, &lsa_key)
    {
        // Flush the previously originated Network-LSA.
        flush(
            instance,
            arenas,
            LsdbId::Area,
            lse_idx,
            LsaFlushReason::PrematureAging,
        );
    }
}

// Handles the receipt of a self-originated LSA: either reoriginate a newer
// instance or flush it from the routing domain.
fn lsa_orig_self_originated_rcvd(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
) {
    let lsdb = match lsdb_id {
        LsdbId::Area => &arenas.area.state.lsdb,
        LsdbId::As => &instance.state.lsdb,
    };
    let Some((lse_idx, lse)) =
        lsdb.get_mut_by_id(&mut arenas.lsa_entries, lse_id)
    else {
        return;
    };
    let lsa = lse.data.clone();

    // Check whether the received LSA corresponds to something this router
    // is still originating.
    let still_originated = match &lsa.body {
        LsaBody::Router(_) => {
            lsa.hdr.adv_rtr == instance.state.router_id
        }
        LsaBody::Network(_) => arenas
            .interfaces
            .iter()
            .any(|(_, iface)| {
                iface.state.network_lsa_self.map(|key| key.lsa_id)
                    == Some(lsa.hdr.lsa_id)
                    && iface.state.ism_state == ism::State::Dr
            }),
        _ => false,
    };

    if still_originated {
        // Advance the sequence number past the received instance and
        // reoriginate.
        match &lsa.body {
            LsaBody::Router(_) => lsa_orig_router(instance, arenas),
            LsaBody::Network(_) => {
                let iface_idx =
                    arenas.interfaces.iter().find_map(|(iface_idx, iface)| {
                        (iface.state.src_addr == Some(lsa.hdr.lsa_id))
                            .then_some(iface_idx)
                    });
                if let Some(iface_idx) = iface_idx {
                    network_lsa_check_idx(instance, arenas, iface_idx);
                }
            }
            _ => (),
        }
    } else {
        // Flush the unwanted LSA from the routing domain.
        flush(
            instance,
            arenas,
            lsdb_id,
            lse_idx,
            LsaFlushReason::PrematureAging,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::lsa::LsaHdr;

    fn hdr(age: u16, seq_no: u32, cksum: u16) -> LsaHdr {
        LsaHdr {
            age,
            options: Options::E,
            lsa_type: LsaTypeCode::Router.into(),
            lsa_id: Ipv4Addr::new(1, 1, 1, 1),
            adv_rtr: Ipv4Addr::new(1, 1, 1, 1),
            seq_no,
            cksum,
            length: 24,
        }
    }

    #[test]
    fn freshness_higher_seq_no_wins() {
        let a = hdr(100, LSA_INIT_SEQ_NO + 1, 0x1111);
        let b = hdr(1, LSA_INIT_SEQ_NO, 0xffff);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
        assert_eq!(lsa_compare(&b, &a), Ordering::Less);
    }

    #[test]
    fn freshness_higher_cksum_breaks_seq_no_tie() {
        let a = hdr(100, LSA_INIT_SEQ_NO, 0x2222);
        let b = hdr(100, LSA_INIT_SEQ_NO, 0x1111);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn freshness_maxage_wins() {
        let a = hdr(LSA_MAX_AGE, LSA_INIT_SEQ_NO, 0x1111);
        let b = hdr(100, LSA_INIT_SEQ_NO, 0x1111);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn freshness_age_difference() {
        // Ages within MaxAgeDiff are considered identical.
        let a = hdr(100, LSA_INIT_SEQ_NO, 0x1111);
        let b = hdr(500, LSA_INIT_SEQ_NO, 0x1111);
        assert_eq!(lsa_compare(&a, &b), Ordering::Equal);

        // A difference above MaxAgeDiff makes the younger LSA more recent.
        let b = hdr(1200, LSA_INIT_SEQ_NO, 0x1111);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
        assert_eq!(lsa_compare(&b, &a), Ordering::Less);
    }

    #[test]
    fn sequence_wrap_boundary() {
        assert_eq!(LSA_MAX_SEQ_NO + 1, LSA_RESERVED_SEQ_NO);
    }
}
