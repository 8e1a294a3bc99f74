//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Instant;

use nbrd_utils::ibus::IbusChannelsTx;
use nbrd_utils::protocol::Protocol;
use serde::{Deserialize, Serialize};

use crate::af::{AddressFamily, Ipv4Unicast, Ipv6Unicast};
use crate::debug::Debug;
use crate::instance::RouteSelectionCfg;
use crate::packet::attribute::Attrs;
use crate::southbound;

// Default values.
pub const DFLT_LOCAL_PREF: u32 = 100;
pub const DFLT_MIN_ROUTE_ADV_INTERVAL_EBGP: u16 = 30;
pub const DFLT_MIN_ROUTE_ADV_INTERVAL_IBGP: u16 = 0;

#[derive(Debug, Default)]
pub struct Rib {
    pub tables: RoutingTables,
}

#[derive(Debug, Default)]
pub struct RoutingTables {
    pub ipv4_unicast: RoutingTable<Ipv4Unicast>,
    pub ipv6_unicast: RoutingTable<Ipv6Unicast>,
}

#[derive(Debug)]
pub struct RoutingTable<A: AddressFamily> {
    pub prefixes: BTreeMap<A::IpNetwork, Destination>,
    // Prefixes with pending best-path selection.
    pub queued_prefixes: BTreeSet<A::IpNetwork>,
    // Nexthop reachability tracking.
    pub nht: HashMap<IpAddr, NhtEntry>,
}

#[derive(Debug, Default)]
pub struct Destination {
    pub local: Option<Box<LocalRoute>>,
    pub adj_rib: BTreeMap<IpAddr, AdjRib>,
}

// Per-peer routing tables of a single destination.
#[derive(Debug, Default)]
pub struct AdjRib {
    // Routes received from the peer, unfiltered.
    pub in_pre: Option<Box<Route>>,
    // Routes accepted by the import policy.
    pub in_post: Option<Box<Route>>,
    // Routes accepted by the export policy and advertised to the peer.
    pub out_post: Option<Box<Route>>,
}

// Route installed in the Loc-RIB.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalRoute {
    pub origin: RouteOrigin,
    pub attrs: Attrs,
    pub route_type: RouteType,
    pub last_modified: Instant,
    pub nexthop: IpAddr,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Route {
    pub origin: RouteOrigin,
    pub attrs: Attrs,
    pub route_type: RouteType,
    pub igp_cost: Option<u32>,
    pub last_modified: Instant,
    pub ineligible_reason: Option<RouteIneligibleReason>,
    pub reject_reason: Option<RouteRejectReason>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RouteOrigin {
    // Route learned from a neighbor.
    Neighbor {
        identifier: Ipv4Addr,
        remote_addr: IpAddr,
    },
    // Route injected or redistributed from another protocol.
    Protocol(Protocol),
}

// BGP route type. The ordering is relevant: eBGP routes are preferred
// over iBGP ones.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum RouteType {
    Internal,
    External,
}

// Nexthop tracking entry.
#[derive(Debug, Default)]
pub struct NhtEntry {
    // IGP metric towards the nexthop, unset when unreachable.
    pub metric: Option<u32>,
    // Number of routes referencing this nexthop.
    pub refcount: usize,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RouteIneligibleReason {
    AsLoop,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RouteRejectReason {
    LocalPrefLower,
    AsPathLonger,
    OriginTypeHigher,
    MedHigher,
    PreferExternal,
    NexthopCostHigher,
    HigherRouterId,
    HigherPeerAddress,
    RejectedImportPolicy,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum RouteCompare {
    Preferred(RouteRejectReason),
    LessPreferred(RouteRejectReason),
}

// ===== impl RoutingTable =====

impl<A> Default for RoutingTable<A>
where
    A: AddressFamily,
{
    fn default() -> RoutingTable<A> {
        RoutingTable {
            prefixes: Default::default(),
            queued_prefixes: Default::default(),
            nht: Default::default(),
        }
    }
}

// ===== impl AdjRib =====

impl AdjRib {
    pub(crate) fn is_empty(&self) -> bool {
        self.in_pre.is_none()
            && self.in_post.is_none()
            && self.out_post.is_none()
    }
}

// ===== impl RouteOrigin =====

impl RouteOrigin {
    pub(crate) fn is_local(&self) -> bool {
        matches!(self, RouteOrigin::Protocol(_))
    }
}

// ===== impl Route =====

impl Route {
    pub(crate) fn new(
        origin: RouteOrigin,
        attrs: Attrs,
        route_type: RouteType,
    ) -> Route {
        Route {
            origin,
            attrs,
            route_type,
            igp_cost: None,
            last_modified: Instant::now(),
            ineligible_reason: None,
            reject_reason: None,
        }
    }

    // Compares two routes according to the decision process tie-breakers
    // of RFC 4271 section 9.1.2.2.
    fn compare(
        &self,
        other: &Route,
        selection_cfg: &RouteSelectionCfg,
    ) -> RouteCompare {
        // a) Compare LOCAL_PREF attributes.
        let a = self.attrs.base.local_pref.unwrap_or(DFLT_LOCAL_PREF);
        let b = other.attrs.base.local_pref.unwrap_or(DFLT_LOCAL_PREF);
        let reason = RouteRejectReason::LocalPrefLower;
        match a.cmp(&b) {
            Ordering::Less => return RouteCompare::LessPreferred(reason),
            Ordering::Greater => return RouteCompare::Preferred(reason),
            Ordering::Equal => (),
        }

        // b) Compare AS_PATH lengths.
        let a = self.attrs.base.as_path.path_length();
        let b = other.attrs.base.as_path.path_length();
        let reason = RouteRejectReason::AsPathLonger;
        match a.cmp(&b) {
            Ordering::Less => return RouteCompare::Preferred(reason),
            Ordering::Greater => return RouteCompare::LessPreferred(reason),
            Ordering::Equal => (),
        }

        // c) Compare ORIGIN attributes.
        let a = self.attrs.base.origin;
        let b = other.attrs.base.origin;
        let reason = RouteRejectReason::OriginTypeHigher;
        match a.cmp(&b) {
            Ordering::Less => return RouteCompare::Preferred(reason),
            Ordering::Greater => return RouteCompare::LessPreferred(reason),
            Ordering::Equal => (),
        }

        // d) Compare MULTI_EXIT_DISC attributes, by default only among
        // routes received from the same neighboring AS.
        let a_nbr_as = self.attrs.base.as_path.first();
        let b_nbr_as = other.attrs.base.as_path.first();
        if selection_cfg.always_compare_med || a_nbr_as == b_nbr_as {
            let a = self.attrs.base.med.unwrap_or(0);
            let b = other.attrs.base.med.unwrap_or(0);
            let reason = RouteRejectReason::MedHigher;
            match a.cmp(&b) {
                Ordering::Less => return RouteCompare::Preferred(reason),
                Ordering::Greater => {
                    return RouteCompare::LessPreferred(reason);
                }
                Ordering::Equal => (),
            }
        }

        // e) Prefer eBGP routes over iBGP routes.
        let a = self.route_type;
        let b = other.route_type;
        let reason = RouteRejectReason::PreferExternal;
        match a.cmp(&b) {
            Ordering::Less => return RouteCompare::LessPreferred(reason),
            Ordering::Greater => return RouteCompare::Preferred(reason),
            Ordering::Equal => (),
        }

        // f) Compare the IGP costs towards the nexthops.
        let a = self.igp_cost.unwrap_or(u32::MAX);
        let b = other.igp_cost.unwrap_or(u32::MAX);
        let reason = RouteRejectReason::NexthopCostHigher;
        match a.cmp(&b) {
            Ordering::Less => return RouteCompare::Preferred(reason),
            Ordering::Greater => return RouteCompare::LessPreferred(reason),
            Ordering::Equal => (),
        }

        // Compare peer BGP identifiers.
        if let (
            RouteOrigin::Neighbor { identifier: a, .. },
            RouteOrigin::Neighbor { identifier: b, .. },
        ) = (&self.origin, &other.origin)
        {
            let reason = RouteRejectReason::HigherRouterId;
            match a.cmp(b) {
                Ordering::Less => return RouteCompare::Preferred(reason),
                Ordering::Greater => {
                    return RouteCompare::LessPreferred(reason);
                }
                Ordering::Equal => (),
            }
        }

        // Compare peer IP addresses.
        if let (
            RouteOrigin::Neighbor { remote_addr: a, .. },
            RouteOrigin::Neighbor { remote_addr: b, .. },
        ) = (&self.origin, &other.origin)
        {
            let reason = RouteRejectReason::HigherPeerAddress;
            match a.cmp(b) {
                Ordering::Less => return RouteCompare::Preferred(reason),
                Ordering::Greater => {
                    return RouteCompare::LessPreferred(reason);
                }
                Ordering::Equal => (),
            }
        }

        // Locally originated routes win over everything that remains.
        let reason = RouteRejectReason::HigherPeerAddress;
        if self.origin.is_local() {
            RouteCompare::Preferred(reason)
        } else {
            RouteCompare::LessPreferred(reason)
        }
    }
}

// ===== nexthop tracking =====

// Starts tracking the reachability of the route's nexthop.
pub(crate) fn nexthop_track(
    nht: &mut HashMap<IpAddr, NhtEntry>,
    route: &Route,
    af_extract: fn(&crate::packet::attribute::BaseAttrs) -> IpAddr,
    ibus_tx: &IbusChannelsTx,
) {
    let addr = af_extract(&route.attrs.base);
    let entry = nht.entry(addr).or_default();
    entry.refcount += 1;
    if entry.refcount == 1 {
        ibus_tx.nexthop_track(addr);
    }
}

// Stops tracking the reachability of the route's nexthop.
pub(crate) fn nexthop_untrack(
    nht: &mut HashMap<IpAddr, NhtEntry>,
    route: &Route,
    af_extract: fn(&crate::packet::attribute::BaseAttrs) -> IpAddr,
    ibus_tx: &IbusChannelsTx,
) {
    let addr = af_extract(&route.attrs.base);
    if let Some(entry) = nht.get_mut(&addr) {
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount == 0 {
            nht.remove(&addr);
            ibus_tx.nexthop_untrack(addr);
        }
    }
}

// ===== global functions =====

// Phase 2 of the decision process: selects the best route towards the
// destination among the post-policy Adj-RIB-In entries.
pub(crate) fn best_path(
    dest: &mut Destination,
    local_asn: u32,
    nht: &HashMap<IpAddr, NhtEntry>,
    selection_cfg: &RouteSelectionCfg,
) -> Option<Box<Route>> {
    let mut best_route: Option<&mut Box<Route>> = None;

    for adj_in_route in dest
        .adj_rib
        .values_mut()
        .filter_map(|adj_rib| adj_rib.in_post.as_mut())
    {
        adj_in_route.reject_reason = None;
        adj_in_route.ineligible_reason = None;

        // First, check if the route is eligible.
        if adj_in_route.attrs.base.as_path.contains(local_asn) {
            adj_in_route.ineligible_reason =
                Some(RouteIneligibleReason::AsLoop);
            continue;
        }

        // Refresh the IGP cost towards the nexthop.
        if let Some(nexthop) = adj_in_route.attrs.base.nexthop {
            adj_in_route.igp_cost =
                nht.get(&nexthop).and_then(|entry| entry.metric);
        }

        // Compare the current route with the best route found so far.
        match &mut best_route {
            None => {
                best_route = Some(adj_in_route);
            }
            Some(best) => {
                match adj_in_route.compare(best, selection_cfg) {
                    RouteCompare::Preferred(reason) => {
                        best.reject_reason = Some(reason);
                        *best = adj_in_route;
                    }
                    RouteCompare::LessPreferred(reason) => {
                        adj_in_route.reject_reason = Some(reason);
                    }
                }
            }
        }
    }

    best_route.map(|route| route.clone())
}

// Updates the Loc-RIB with the new best route and propagates the change
// to the kernel RIB.
pub(crate) fn loc_rib_update<A>(
    prefix: A::IpNetwork,
    dest: &mut Destination,
    best_route: Option<Box<Route>>,
    distance_external: u8,
    distance_internal: u8,
    ibus_tx: &IbusChannelsTx,
) where
    A: AddressFamily,
{
    if let Some(best_route) = best_route {
        Debug::BestPathFound(prefix.into(), &best_route.origin).log();

        let nexthop = A::nexthop_rx_extract(&best_route.attrs.base);

        // Return early if no change in the Loc-RIB is needed.
        if let Some(local_route) = &dest.local
            && local_route.origin == best_route.origin
            && local_route.attrs == best_route.attrs
            && local_route.route_type == best_route.route_type
            && local_route.nexthop == nexthop
        {
            return;
        }

        // Create new local route.
        let local_route = LocalRoute {
            origin: best_route.origin,
            attrs: best_route.attrs,
            route_type: best_route.route_type,
            last_modified: best_route.last_modified,
            nexthop,
        };

        // Install the local route in the kernel RIB.
        southbound::route_install(
            ibus_tx,
            prefix.into(),
            &local_route,
            match best_route.route_type {
                RouteType::Internal => distance_internal,
                RouteType::External => distance_external,
            },
        );

        // Insert local route into the Loc-RIB.
        dest.local = Some(Box::new(local_route));
    } else {
        Debug::BestPathNotFound(prefix.into()).log();

        // Return early if no change in the Loc-RIB is needed.
        if dest.local.is_none() {
            return;
        }

        // Uninstall the route from the kernel RIB.
        southbound::route_uninstall(ibus_tx, prefix.into());

        // Remove route from the Loc-RIB.
        dest.local = None;
    }
}

// Prepares a route's attributes for transmission to the given neighbor.
pub(crate) fn attrs_tx_update<A>(
    attrs: &mut Attrs,
    nbr: &crate::neighbor::Neighbor,
    local_asn: u32,
    local: bool,
) where
    A: AddressFamily,
{
    match nbr.peer_type {
        crate::neighbor::PeerType::Internal => {
            // Ensure the LOCAL_PREF attribute is always present for iBGP
            // peers.
            if attrs.base.local_pref.is_none() {
                attrs.base.local_pref = Some(DFLT_LOCAL_PREF);
            }
        }
        crate::neighbor::PeerType::External => {
            // Prepend the local AS number.
            attrs.base.as_path.prepend(local_asn);

            // Do not propagate the MULTI_EXIT_DISC attribute.
            attrs.base.med = None;

            // Remove the LOCAL_PREF attribute.
            attrs.base.local_pref = None;
        }
    }

    // Update the nexthop for transmission.
    A::nexthop_tx_change(nbr, local, &mut attrs.base);
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use super::*;
    use crate::packet::attribute::{
        AsPath, AsPathSegment, Attrs, BaseAttrs,
    };
    use crate::packet::consts::{AsPathSegmentType, Origin};

    fn attrs(as_path: &[u32], origin: Origin, local_pref: Option<u32>) -> Attrs {
        let mut path = AsPath::default();
        if !as_path.is_empty() {
            path.segments.push_back(AsPathSegment {
                seg_type: AsPathSegmentType::Sequence,
                members: as_path.iter().copied().collect(),
            });
        }
        Attrs {
            base: BaseAttrs {
                origin,
                as_path: path,
                as4_path: None,
                nexthop: Some(IpAddr::from([192, 0, 2, 1])),
                ll_nexthop: None,
                med: None,
                local_pref,
                aggregator: None,
                as4_aggregator: None,
                atomic_aggregate: false,
            },
            comm: None,
            unknown: vec![],
        }
    }

    fn nbr_route(
        identifier: [u8; 4],
        remote_addr: [u8; 4],
        attrs: Attrs,
        route_type: RouteType,
    ) -> Route {
        Route::new(
            RouteOrigin::Neighbor {
                identifier: identifier.into(),
                remote_addr: IpAddr::from(remote_addr),
            },
            attrs,
            route_type,
        )
    }

    fn run_best_path(dest: &mut Destination) -> Box<Route> {
        let nht = HashMap::new();
        let selection_cfg = RouteSelectionCfg::default();
        best_path(dest, 65000, &nht, &selection_cfg).unwrap()
    }

    #[test]
    fn shorter_as_path_wins() {
        let mut dest = Destination::default();
        dest.adj_rib.entry(IpAddr::from([10, 0, 0, 2])).or_default().in_post =
            Some(Box::new(nbr_route(
                [2, 2, 2, 2],
                [10, 0, 0, 2],
                attrs(&[65002, 65010], Origin::Igp, None),
                RouteType::External,
            )));
        dest.adj_rib.entry(IpAddr::from([10, 0, 1, 2])).or_default().in_post =
            Some(Box::new(nbr_route(
                [3, 3, 3, 3],
                [10, 0, 1, 2],
                attrs(&[65003, 65020, 65010], Origin::Igp, None),
                RouteType::External,
            )));

        let best = run_best_path(&mut dest);
        assert_eq!(best.attrs.base.as_path.path_length(), 2);

        // After the shorter path is withdrawn, the longer one is selected.
        dest.adj_rib
            .get_mut(&IpAddr::from([10, 0, 0, 2]))
            .unwrap()
            .in_post = None;
        let best = run_best_path(&mut dest);
        assert_eq!(best.attrs.base.as_path.path_length(), 3);
    }

    #[test]
    fn higher_local_pref_wins() {
        let mut dest = Destination::default();
        dest.adj_rib.entry(IpAddr::from([10, 0, 0, 2])).or_default().in_post =
            Some(Box::new(nbr_route(
                [2, 2, 2, 2],
                [10, 0, 0, 2],
                attrs(&[65002, 65010], Origin::Igp, Some(200)),
                RouteType::Internal,
            )));
        dest.adj_rib.entry(IpAddr::from([10, 0, 1, 2])).or_default().in_post =
            Some(Box::new(nbr_route(
                [3, 3, 3, 3],
                [10, 0, 1, 2],
                attrs(&[65003], Origin::Igp, Some(100)),
                RouteType::Internal,
            )));

        let best = run_best_path(&mut dest);
        assert_eq!(best.attrs.base.local_pref, Some(200));
    }

    #[test]
    fn lower_origin_wins() {
        let mut dest = Destination::default();
        dest.adj_rib.entry(IpAddr::from([10, 0, 0, 2])).or_default().in_post =
            Some(Box::new(nbr_route(
                [2, 2, 2, 2],
                [10, 0, 0, 2],
                attrs(&[65002], Origin::Incomplete, None),
                RouteType::External,
            )));
        dest.adj_rib.entry(IpAddr::from([10, 0, 1, 2])).or_default().in_post =
            Some(Box::new(nbr_route(
                [3, 3, 3, 3],
                [10, 0, 1, 2],
                attrs(&[65003], Origin::Igp, None),
                RouteType::External,
            )));

        let best = run_best_path(&mut dest);
        assert_eq!(best.attrs.base.origin, Origin::Igp);
    }

    #[test]
    fn ebgp_preferred_over_ibgp() {
        let mut dest = Destination::default();
        dest.adj_rib.entry(IpAddr::from([10, 0, 0, 2])).or_default().in_post =
            Some(Box::new(nbr_route(
                [2, 2, 2, 2],
                [10, 0, 0, 2],
                attrs(&[65002], Origin::Igp, None),
                RouteType::Internal,
            )));
        dest.adj_rib.entry(IpAddr::from([10, 0, 1, 2])).or_default().in_post =
            Some(Box::new(nbr_route(
                [3, 3, 3, 3],
                [10, 0, 1, 2],
                attrs(&[65003], Origin::Igp, None),
                RouteType::External,
            )));

        let best = run_best_path(&mut dest);
        assert_eq!(best.route_type, RouteType::External);
    }

    #[test]
    fn as_loop_is_ineligible() {
        let mut dest = Destination::default();
        dest.adj_rib.entry(IpAddr::from([10, 0, 0, 2])).or_default().in_post =
            Some(Box::new(nbr_route(
                [2, 2, 2, 2],
                [10, 0, 0, 2],
                attrs(&[65002, 65000], Origin::Igp, None),
                RouteType::External,
            )));

        let nht = HashMap::new();
        let selection_cfg = RouteSelectionCfg::default();
        assert!(best_path(&mut dest, 65000, &nht, &selection_cfg).is_none());
    }

    #[test]
    fn lower_router_id_breaks_ties() {
        let mut dest = Destination::default();
        dest.adj_rib.entry(IpAddr::from([10, 0, 0, 2])).or_default().in_post =
            Some(Box::new(nbr_route(
                [9, 9, 9, 9],
                [10, 0, 0, 2],
                attrs(&[65002], Origin::Igp, None),
                RouteType::External,
            )));
        dest.adj_rib.entry(IpAddr::from([10, 0, 1, 2])).or_default().in_post =
            Some(Box::new(nbr_route(
                [3, 3, 3, 3],
                [10, 0, 1, 2],
                attrs(&[65003], Origin::Igp, None),
                RouteType::External,
            )));

        let best = run_best_path(&mut dest);
        let RouteOrigin::Neighbor { identifier, .. } = best.origin else {
            unreachable!();
        };
        assert_eq!(identifier, std::net::Ipv4Addr::new(3, 3, 3, 3));
    }
}
