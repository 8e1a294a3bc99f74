//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::btree_map;
use std::sync::Arc;

use crate::area::Area;
use crate::collections::{Arena, InterfaceIndex, NeighborIndex};
use crate::instance::InstanceUpView;
use crate::interface::{Interface, ism};
use crate::lsdb;
use crate::neighbor::{Neighbor, nsm};
use crate::packet::lsa::Lsa;

// ===== global functions =====

// Floods the given LSA out all eligible interfaces, per RFC 2328 section
// 13.3. Returns whether the LSA was flooded back out the receiving
// interface.
pub(crate) fn flood(
    instance: &InstanceUpView<'_>,
    area: &Area,
    interfaces: &mut Arena<Interface>,
    neighbors: &mut Arena<Neighbor>,
    lsa: &Arc<Lsa>,
    src: Option<(InterfaceIndex, NeighborIndex)>,
) -> bool {
    let mut flooded_back = false;
    for iface_idx in area.interfaces.indexes() {
        flooded_back |=
            flood_interface(iface_idx, instance, interfaces, neighbors, lsa, src);
    }

    flooded_back
}

// ===== helper functions =====

fn flood_interface(
    iface_idx: InterfaceIndex,
    instance: &InstanceUpView<'_>,
    interfaces: &mut Arena<Interface>,
    neighbors: &mut Arena<Neighbor>,
    lsa: &Arc<Lsa>,
    src: Option<(InterfaceIndex, NeighborIndex)>,
) -> bool {
    let iface = &mut interfaces[iface_idx];
    let lsa_key = lsa.hdr.key();

    // Keep track of whether this LSA was flooded back out the receiving
    // interface. This information is relevant when deciding whether to send
    // a delayed ack later.
    let mut flooded_back = false;

    // 1) Examine each of the neighbors attached to this interface.
    let mut rxmt_added = false;
    for nbr_idx in iface.state.neighbors.indexes() {
        let nbr = &mut neighbors[nbr_idx];

        // 1.a) Skip neighbors in a lesser state than Exchange.
        if nbr.state < nsm::State::Exchange {
            continue;
        }

        // 1.b) Handle adjacencies that are not full.
        if nbr.state != nsm::State::Full {
            use btree_map::Entry::Occupied;

            // Examine the link state request list associated with this
            // adjacency.
            match (
                nbr.lists.ls_request.entry(lsa_key),
                nbr.lists.ls_request_pending.entry(lsa_key),
            ) {
                (Occupied(o), _) | (_, Occupied(o)) => {
                    let req = o.get();
                    let cmp = lsdb::lsa_compare(&lsa.hdr, req);
                    match cmp {
                        Ordering::Less => continue,
                        Ordering::Equal | Ordering::Greater => {
                            // Delete the LSA from the link state request
                            // list.
                            o.remove();

                            // Check if the neighbor can transition to Full.
                            nbr.loading_done_check(iface, instance);

                            // Examine the next neighbor if the two copies
                            // are the same instance.
                            if cmp == Ordering::Equal {
                                continue;
                            }
                        }
                    }
                }
                _ => (),
            }
        }

        // 1.c) If the new LSA was received from this neighbor, examine the
        // next neighbor.
        if let Some((_, nbr_src_idx)) = src
            && nbr_src_idx == nbr_idx
        {
            continue;
        }

        // 1.d) Add the LSA to the neighbor's rxmt list (or update the old
        // version).
        nbr.lists.ls_rxmt.insert(lsa_key, lsa.clone());
        nbr.rxmt_lsupd_start_check(iface, instance);
        rxmt_added = true;
    }

    // 2) If the LSA was not added to any retransmission list, there is no
    // need to flood it out this interface.
    if !rxmt_added {
        return flooded_back;
    }

    if let Some((iface_src_idx, nbr_src_idx)) = src
        && iface_src_idx == iface_idx
    {
        let nbr_src = &neighbors[nbr_src_idx];

        // 3) If the new LSA was received on this interface from the DR or
        // the BDR, chances are all the neighbors have received it already.
        if iface.state.dr == Some(nbr_src.src)
            || iface.state.bdr == Some(nbr_src.src)
        {
            return flooded_back;
        }

        // 4) If the new LSA was received on this interface and the
        // interface state is Backup, examine the next interface.
        if iface.state.ism_state == ism::State::Backup {
            return flooded_back;
        }

        flooded_back = true;
    }

    // Flood the LSA out the interface. The transmission is scheduled so
    // more LSAs can be grouped into the same packet.
    iface.enqueue_ls_update(instance, lsa_key, lsa.clone());

    flooded_back
}
