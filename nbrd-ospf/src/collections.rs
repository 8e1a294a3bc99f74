//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;

use generational_arena::Index;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::instance::ProtocolInputChannelsTx;
use crate::interface::Interface;
use crate::lsdb::{LsaDelayedOrig, LsaEntry};
use crate::neighbor::Neighbor;
use crate::packet::lsa::{Lsa, LsaKey};

pub type ObjectId = u32;

// Identifier that remains valid when sent across task boundaries: either
// the stable object ID or the object's natural key.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum ObjectKey<T> {
    Id(ObjectId),
    Value(T),
}

pub type InterfaceId = ObjectId;
pub type InterfaceIndex = Index;
pub type InterfaceKey = ObjectKey<String>;
pub type NeighborId = ObjectId;
pub type NeighborIndex = Index;
pub type NeighborKey = ObjectKey<Ipv4Addr>;
pub type LsaEntryId = ObjectId;
pub type LsaEntryIndex = Index;
pub type LsaEntryKey = ObjectKey<LsaKey>;

#[derive(Debug)]
pub struct Arena<T>(generational_arena::Arena<T>);

// Interfaces attached to the area, indexed by ID, name and ifindex.
#[derive(Debug, Default)]
pub struct Interfaces {
    id_tree: HashMap<InterfaceId, InterfaceIndex>,
    name_tree: BTreeMap<String, InterfaceIndex>,
    ifindex_tree: HashMap<u32, InterfaceIndex>,
    next_id: InterfaceId,
}

// Neighbors attached to an interface, indexed by ID, Router ID and source
// address.
#[derive(Debug, Default)]
pub struct Neighbors {
    id_tree: HashMap<NeighborId, NeighborIndex>,
    router_id_tree: BTreeMap<Ipv4Addr, NeighborIndex>,
    addr_tree: BTreeMap<Ipv4Addr, NeighborIndex>,
    next_id: NeighborId,
}

// Link-state database of a single flooding scope.
#[derive(Debug, Default)]
pub struct Lsdb {
    id_tree: HashMap<LsaEntryId, LsaEntryIndex>,
    tree: BTreeMap<LsaKey, LsaEntryIndex>,
    // MaxAge LSAs awaiting acknowledgment from all neighbors.
    pub maxage_lsas: HashSet<LsaEntryIndex>,
    // LSAs whose origination was postponed by the MinLSInterval check.
    pub delayed_orig: HashMap<LsaKey, LsaDelayedOrig>,
    // LSAs whose sequence number is wrapping.
    pub seqno_wrapping: HashMap<LsaKey, Lsa>,
    next_id: LsaEntryId,
}

// LSDB identifier, one per flooding scope.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsdbId {
    Area,
    As,
}

// ===== impl ObjectKey =====

impl<T> From<ObjectId> for ObjectKey<T> {
    fn from(id: ObjectId) -> ObjectKey<T> {
        ObjectKey::Id(id)
    }
}

// ===== impl Arena =====

impl<T> Arena<T> {
    pub(crate) fn iter(&self) -> impl Iterator<Item = (Index, &T)> {
        self.0.iter()
    }

    pub(crate) fn get_mut2(
        &mut self,
        idx1: Index,
        idx2: Index,
    ) -> (Option<&mut T>, Option<&mut T>) {
        self.0.get2_mut(idx1, idx2)
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Arena<T> {
        Arena(Default::default())
    }
}

impl<T> std::ops::Index<Index> for Arena<T> {
    type Output = T;

    fn index(&self, index: Index) -> &Self::Output {
        &self.0[index]
    }
}

impl<T> std::ops::IndexMut<Index> for Arena<T> {
    fn index_mut(&mut self, index: Index) -> &mut Self::Output {
        &mut self.0[index]
    }
}

// ===== impl Interfaces =====

impl Interfaces {
    pub(crate) fn insert<'a>(
        &mut self,
        arena: &'a mut Arena<Interface>,
        ifname: &str,
    ) -> (InterfaceIndex, &'a mut Interface) {
        // Create and insert interface into the arena.
        self.next_id += 1;
        let iface = Interface::new(self.next_id, ifname.to_owned());
        let iface_idx = arena.0.insert(iface);

        // Link interface to the collection indexes.
        let iface = &mut arena[iface_idx];
        self.id_tree.insert(iface.id, iface_idx);
        if self
            .name_tree
            .insert(iface.name.clone(), iface_idx)
            .is_some()
        {
            panic!("interface name={} already exists", iface.name);
        }

        (iface_idx, iface)
    }

    pub(crate) fn update_ifindex(
        &mut self,
        iface_idx: InterfaceIndex,
        iface: &mut Interface,
        ifindex: Option<u32>,
    ) {
        if let Some(old_ifindex) = iface.system.ifindex.take() {
            self.ifindex_tree.remove(&old_ifindex);
        }
        iface.system.ifindex = ifindex;
        if let Some(ifindex) = ifindex {
            self.ifindex_tree.insert(ifindex, iface_idx);
        }
    }

    pub(crate) fn get_by_name<'a>(
        &self,
        arena: &'a Arena<Interface>,
        ifname: &str,
    ) -> Option<(InterfaceIndex, &'a Interface)> {
        self.name_tree
            .get(ifname)
            .copied()
            .map(|iface_idx| (iface_idx, &arena[iface_idx]))
    }

    pub(crate) fn get_mut_by_name<'a>(
        &mut self,
        arena: &'a mut Arena<Interface>,
        ifname: &str,
    ) -> Option<(InterfaceIndex, &'a mut Interface)> {
        self.name_tree
            .get(ifname)
            .copied()
            .map(move |iface_idx| (iface_idx, &mut arena[iface_idx]))
    }

    fn get_mut_by_id<'a>(
        &mut self,
        arena: &'a mut Arena<Interface>,
        id: InterfaceId,
    ) -> Option<(InterfaceIndex, &'a mut Interface)> {
        self.id_tree
            .get(&id)
            .copied()
            .map(move |iface_idx| (iface_idx, &mut arena[iface_idx]))
    }

    pub(crate) fn get_mut_by_key<'a>(
        &mut self,
        arena: &'a mut Arena<Interface>,
        key: &InterfaceKey,
    ) -> Result<(InterfaceIndex, &'a mut Interface), Error> {
        match key {
            InterfaceKey::Id(id) => self
                .get_mut_by_id(arena, *id)
                .ok_or_else(|| Error::InterfaceIdNotFound(key.clone())),
            InterfaceKey::Value(ifname) => self
                .get_mut_by_name(arena, ifname)
                .ok_or_else(|| Error::InterfaceIdNotFound(key.clone())),
        }
    }

    pub(crate) fn iter<'a>(
        &'a self,
        arena: &'a Arena<Interface>,
    ) -> impl Iterator<Item = &'a Interface> + 'a {
        self.id_tree.values().map(|iface_idx| &arena[*iface_idx])
    }

    pub(crate) fn indexes(&self) -> std::vec::IntoIter<InterfaceIndex> {
        self.id_tree.values().copied().collect::<Vec<_>>().into_iter()
    }
}

// ===== impl Neighbors =====

impl Neighbors {
    pub(crate) fn insert<'a>(
        &mut self,
        arena: &'a mut Arena<Neighbor>,
        router_id: Ipv4Addr,
        src: Ipv4Addr,
    ) -> (NeighborIndex, &'a mut Neighbor) {
        // Create and insert neighbor into the arena.
        self.next_id += 1;
        let nbr = Neighbor::new(self.next_id, router_id, src);
        let nbr_idx = arena.0.insert(nbr);

        // Link neighbor to the collection indexes.
        let nbr = &mut arena[nbr_idx];
        self.id_tree.insert(nbr.id, nbr_idx);
        self.router_id_tree.insert(nbr.router_id, nbr_idx);
        self.addr_tree.insert(nbr.src, nbr_idx);

        (nbr_idx, nbr)
    }

    pub(crate) fn delete(
        &mut self,
        arena: &mut Arena<Neighbor>,
        nbr_idx: NeighborIndex,
    ) {
        let nbr = &mut arena[nbr_idx];

        // Unlink neighbor from the collection indexes.
        self.id_tree.remove(&nbr.id);
        self.router_id_tree.remove(&nbr.router_id);
        self.addr_tree.remove(&nbr.src);

        // Remove neighbor from the arena.
        arena.0.remove(nbr_idx);
    }

    // Updates the neighbor's source address (point-to-point links only).
    pub(crate) fn update_src(
        &mut self,
        nbr: &mut Neighbor,
        nbr_idx: NeighborIndex,
        src: Ipv4Addr,
    ) {
        self.addr_tree.remove(&nbr.src);
        nbr.src = src;
        self.addr_tree.insert(nbr.src, nbr_idx);
    }

    pub(crate) fn get_mut_by_router_id<'a>(
        &mut self,
        arena: &'a mut Arena<Neighbor>,
        router_id: Ipv4Addr,
    ) -> Option<(NeighborIndex, &'a mut Neighbor)> {
        self.router_id_tree
            .get(&router_id)
            .copied()
            .map(move |nbr_idx| (nbr_idx, &mut arena[nbr_idx]))
    }

    pub(crate) fn get_mut_by_addr<'a>(
        &mut self,
        arena: &'a mut Arena<Neighbor>,
        addr: Ipv4Addr,
    ) -> Option<(NeighborIndex, &'a mut Neighbor)> {
        self.addr_tree
            .get(&addr)
            .copied()
            .map(move |nbr_idx| (nbr_idx, &mut arena[nbr_idx]))
    }

    fn get_mut_by_id<'a>(
        &mut self,
        arena: &'a mut Arena<Neighbor>,
        id: NeighborId,
    ) -> Option<(NeighborIndex, &'a mut Neighbor)> {
        self.id_tree
            .get(&id)
            .copied()
            .map(move |nbr_idx| (nbr_idx, &mut arena[nbr_idx]))
    }

    pub(crate) fn get_mut_by_key<'a>(
        &mut self,
        arena: &'a mut Arena<Neighbor>,
        key: &NeighborKey,
    ) -> Result<(NeighborIndex, &'a mut Neighbor), Error> {
        match key {
            NeighborKey::Id(id) => self
                .get_mut_by_id(arena, *id)
                .ok_or_else(|| Error::NeighborIdNotFound(key.clone())),
            NeighborKey::Value(router_id) => self
                .get_mut_by_router_id(arena, *router_id)
                .ok_or_else(|| Error::NeighborIdNotFound(key.clone())),
        }
    }

    pub(crate) fn iter<'a>(
        &'a self,
        arena: &'a Arena<Neighbor>,
    ) -> impl Iterator<Item = &'a Neighbor> + 'a {
        self.id_tree.values().map(|nbr_idx| &arena[*nbr_idx])
    }

    pub(crate) fn indexes(&self) -> std::vec::IntoIter<NeighborIndex> {
        self.id_tree.values().copied().collect::<Vec<_>>().into_iter()
    }

    // Iterates over the Router IDs of all neighbors, in ascending order.
    pub(crate) fn router_ids(
        &self,
    ) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.router_id_tree.keys().copied()
    }
}

// ===== impl Lsdb =====

impl Lsdb {
    pub(crate) fn insert<'a>(
        &mut self,
        arena: &'a mut Arena<LsaEntry>,
        lsdb_id: LsdbId,
        lsa: Arc<Lsa>,
        protocol_input: &ProtocolInputChannelsTx,
    ) -> (LsaEntryIndex, &'a mut LsaEntry) {
        // Create and insert LSA entry into the arena.
        self.next_id += 1;
        let lse = LsaEntry::new(lsdb_id, self.next_id, lsa, protocol_input);
        let lse_idx = arena.0.insert(lse);

        // Link LSA entry to the collection indexes.
        let lse = &mut arena[lse_idx];
        self.id_tree.insert(lse.id, lse_idx);
        self.tree.insert(lse.data.hdr.key(), lse_idx);
        if lse.data.hdr.is_maxage() {
            self.maxage_lsas.insert(lse_idx);
        }

        (lse_idx, lse)
    }

    pub(crate) fn delete(
        &mut self,
        arena: &mut Arena<LsaEntry>,
        lse_idx: LsaEntryIndex,
    ) {
        let lse = &mut arena[lse_idx];

        // Unlink LSA entry from the collection indexes.
        self.id_tree.remove(&lse.id);
        self.tree.remove(&lse.data.hdr.key());
        self.maxage_lsas.remove(&lse_idx);

        // Remove LSA entry from the arena.
        arena.0.remove(lse_idx);
    }

    pub(crate) fn get<'a>(
        &self,
        arena: &'a Arena<LsaEntry>,
        lsa_key: &LsaKey,
    ) -> Option<(LsaEntryIndex, &'a LsaEntry)> {
        self.tree
            .get(lsa_key)
            .copied()
            .map(|lse_idx| (lse_idx, &arena[lse_idx]))
    }

    pub(crate) fn get_mut_by_id<'a>(
        &self,
        arena: &'a mut Arena<LsaEntry>,
        id: LsaEntryId,
    ) -> Option<(LsaEntryIndex, &'a mut LsaEntry)> {
        self.id_tree
            .get(&id)
            .copied()
            .map(move |lse_idx| (lse_idx, &mut arena[lse_idx]))
    }

    pub(crate) fn iter<'a>(
        &'a self,
        arena: &'a Arena<LsaEntry>,
    ) -> impl Iterator<Item = (LsaEntryIndex, &'a LsaEntry)> + 'a {
        self.tree
            .values()
            .map(|lse_idx| (*lse_idx, &arena[*lse_idx]))
    }

    pub(crate) fn iter_by_type<'a>(
        &'a self,
        arena: &'a Arena<LsaEntry>,
        lsa_type: crate::packet::lsa::LsaType,
    ) -> impl Iterator<Item = (LsaEntryIndex, &'a LsaEntry)> + 'a {
        self.tree
            .range(
                LsaKey {
                    lsa_type,
                    adv_rtr: Ipv4Addr::UNSPECIFIED,
                    lsa_id: Ipv4Addr::UNSPECIFIED,
                }..=LsaKey {
                    lsa_type,
                    adv_rtr: Ipv4Addr::BROADCAST,
                    lsa_id: Ipv4Addr::BROADCAST,
                },
            )
            .map(|(_, lse_idx)| (*lse_idx, &arena[*lse_idx]))
    }
}
