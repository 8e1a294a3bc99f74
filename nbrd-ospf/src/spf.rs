//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, btree_map};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;

use ipnetwork::Ipv4Network;

use crate::area::Area;
use crate::collections::Arena;
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::interface::Interface;
use crate::lsdb::{LSA_INFINITY, LsaEntry};
use crate::neighbor::Neighbor;
use crate::packet::lsa::{
    Lsa, LsaBody, LsaKey, LsaRouterLink, LsaRouterLinkType, LsaTypeCode,
};
use crate::route::{Nexthop, Nexthops, PathType, RouteNet};
use crate::{route, tasks};

// SPF vertex identifier. Network vertices order before router vertices so
// the candidate-list iteration finds all equal-cost paths.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum VertexId {
    Network { dr_addr: Ipv4Addr },
    Router { router_id: Ipv4Addr },
}

#[derive(Clone, Debug)]
pub enum VertexLsa {
    Network(Arc<Lsa>),
    Router(Arc<Lsa>),
}

#[derive(Clone, Debug)]
pub struct Vertex {
    pub id: VertexId,
    pub lsa: VertexLsa,
    pub distance: u32,
    pub nexthops: Nexthops,
}

// Link radiating from an SPF vertex.
struct SpfLink {
    parent_link: Option<LsaRouterLink>,
    id: VertexId,
    lsa: VertexLsa,
    cost: u32,
}

// ===== global functions =====

// Schedules an SPF run. Runs are coalesced: at most one run occurs per
// spf-hold window, counted from the first LSDB change after the last run.
pub(crate) fn schedule(instance: &mut InstanceUpView<'_>) {
    instance.state.spf_pending = true;

    if instance.state.spf_hold_timer.is_none() {
        let task = tasks::spf_hold_timer(instance);
        instance.state.spf_hold_timer = Some(task);
    }
}

// Invoked when the spf-hold timer fires.
pub(crate) fn process_spf_timer(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) {
    instance.state.spf_hold_timer = None;
    if std::mem::take(&mut instance.state.spf_pending) {
        compute_spf(instance, arenas);
    }
}

// This is the SPF main function.
fn compute_spf(instance: &mut InstanceUpView<'_>, arenas: &mut InstanceArenas) {
    Debug::SpfStart.log();
    let start_time = Instant::now();

    // Run Dijkstra over the area LSDB.
    let spt = dijkstra(
        instance.state.router_id,
        &arenas.area,
        &arenas.interfaces,
        &arenas.neighbors,
        &arenas.lsa_entries,
    );

    // Compute the new routing table from the shortest-path tree.
    let mut new_rib = BTreeMap::new();
    intra_area_routes(&spt, &arenas.area, &arenas.lsa_entries, &mut new_rib);
    inter_area_routes(
        instance.state.router_id,
        &spt,
        &arenas.area,
        &arenas.lsa_entries,
        &mut new_rib,
    );
    external_routes(
        instance.state.router_id,
        &spt,
        instance.state.lsdb.iter(&arenas.lsa_entries),
        &mut new_rib,
    );

    // Update the routing table and notify the kernel RIB.
    route::update_rib(instance, new_rib);

    Debug::SpfFinish(start_time.elapsed().as_micros()).log();
}

// ===== helper functions =====

// Dijkstra's algorithm over the area topology (RFC 2328 section 16.1).
fn dijkstra(
    router_id: Ipv4Addr,
    area: &Area,
    interfaces: &Arena<Interface>,
    neighbors: &Arena<Neighbor>,
    lsa_entries: &Arena<LsaEntry>,
) -> BTreeMap<VertexId, Vertex> {
    let mut spt = BTreeMap::new();
    let mut cand_list = BTreeMap::new();

    // Initialize the algorithm's data structures with the root vertex.
    let root_key =
        LsaKey::new(LsaTypeCode::Router.into(), router_id, router_id);
    let Some((_, root_lse)) = area.state.lsdb.get(lsa_entries, &root_key)
    else {
        return spt;
    };
    if root_lse.data.hdr.is_maxage() {
        return spt;
    }
    let root = Vertex {
        id: VertexId::Router { router_id },
        lsa: VertexLsa::Router(root_lse.data.clone()),
        distance: 0,
        nexthops: Default::default(),
    };
    cand_list.insert((root.distance, root.id), root);

    // Main SPF loop.
    while let Some(((_, vertex_id), vertex)) = cand_list.pop_first() {
        spt.insert(vertex_id, vertex.clone());

        for link in vertex_links(&vertex, area, lsa_entries) {
            // Skip vertices already in the shortest-path tree.
            if spt.contains_key(&link.id) {
                continue;
            }

            let distance = vertex.distance + link.cost;

            // Calculate nexthops for the new vertex.
            let nexthops = match calc_nexthops(
                &vertex,
                link.parent_link.as_ref(),
                link.id,
                &link.lsa,
                interfaces,
                neighbors,
            ) {
                Ok(nexthops) => nexthops,
                Err(error) => {
                    error.log();
                    continue;
                }
            };

            // Check for an existing candidate entry for the same vertex.
            if let Some(cand_dist) = cand_list
                .keys()
                .find(|(_, id)| *id == link.id)
                .map(|(dist, _)| *dist)
            {
                if cand_dist < distance {
                    // A shorter path to the vertex is already known.
                    continue;
                }
                if cand_dist == distance {
                    // Equal-cost path: merge nexthops.
                    let cand =
                        cand_list.get_mut(&(cand_dist, link.id)).unwrap();
                    cand.nexthops.extend(nexthops);
                    continue;
                }
                // The new path is shorter: replace the candidate.
                cand_list.remove(&(cand_dist, link.id));
            }

            cand_list.insert(
                (distance, link.id),
                Vertex {
                    id: link.id,
                    lsa: link.lsa,
                    distance,
                    nexthops,
                },
            );
        }
    }

    spt
}

// Returns the links radiating from the given vertex, with the back-link
// check applied.
fn vertex_links(
    vertex: &Vertex,
    area: &Area,
    lsa_entries: &Arena<LsaEntry>,
) -> Vec<SpfLink> {
    let mut links = vec![];

    match &vertex.lsa {
        VertexLsa::Router(lsa) => {
            let lsa_body = lsa.body.as_router().unwrap();
            for link in &lsa_body.links {
                match link.link_type {
                    LsaRouterLinkType::PointToPoint => {
                        let link_id = VertexId::Router {
                            router_id: link.link_id,
                        };
                        let key = LsaKey::new(
                            LsaTypeCode::Router.into(),
                            link.link_id,
                            link.link_id,
                        );
                        if let Some((_, lse)) =
                            area.state.lsdb.get(lsa_entries, &key)
                            && !lse.data.hdr.is_maxage()
                            && router_has_p2p_backlink(
                                &lse.data,
                                vertex_router_id(vertex),
                            )
                        {
                            links.push(SpfLink {
                                parent_link: Some(link.clone()),
                                id: link_id,
                                lsa: VertexLsa::Router(lse.data.clone()),
                                cost: link.metric as u32,
                            });
                        }
                    }
                    LsaRouterLinkType::TransitNetwork => {
                        let link_id = VertexId::Network {
                            dr_addr: link.link_id,
                        };
                        if let Some(lse) =
                            network_lsa_by_id(area, lsa_entries, link.link_id)
                        {
                            let lsa_body = lse.data.body.as_network().unwrap();
                            if lsa_body
                                .attached_rtrs
                                .contains(&vertex_router_id(vertex))
                            {
                                links.push(SpfLink {
                                    parent_link: Some(link.clone()),
                                    id: link_id,
                                    lsa: VertexLsa::Network(lse.data.clone()),
                                    cost: link.metric as u32,
                                });
                            }
                        }
                    }
                    LsaRouterLinkType::StubNetwork => {
                        // Stub links are processed in the second stage.
                    }
                }
            }
        }
        VertexLsa::Network(lsa) => {
            let lsa_body = lsa.body.as_network().unwrap();
            for attached_rtr in &lsa_body.attached_rtrs {
                let link_id = VertexId::Router {
                    router_id: *attached_rtr,
                };
                let key = LsaKey::new(
                    LsaTypeCode::Router.into(),
                    *attached_rtr,
                    *attached_rtr,
                );
                if let Some((_, lse)) = area.state.lsdb.get(lsa_entries, &key)
                    && !lse.data.hdr.is_maxage()
                    && router_has_transit_backlink(&lse.data, lsa.hdr.lsa_id)
                {
                    links.push(SpfLink {
                        parent_link: None,
                        id: link_id,
                        lsa: VertexLsa::Router(lse.data.clone()),
                        cost: 0,
                    });
                }
            }
        }
    }

    links
}

fn vertex_router_id(vertex: &Vertex) -> Ipv4Addr {
    match vertex.id {
        VertexId::Router { router_id } => router_id,
        VertexId::Network { dr_addr } => dr_addr,
    }
}

fn router_has_p2p_backlink(lsa: &Lsa, router_id: Ipv4Addr) -> bool {
    let lsa_body = lsa.body.as_router().unwrap();
    lsa_body.links.iter().any(|link| {
        link.link_type == LsaRouterLinkType::PointToPoint
            && link.link_id == router_id
    })
}

fn router_has_transit_backlink(lsa: &Lsa, network_id: Ipv4Addr) -> bool {
    let lsa_body = lsa.body.as_router().unwrap();
    lsa_body.links.iter().any(|link| {
        link.link_type == LsaRouterLinkType::TransitNetwork
            && link.link_id == network_id
    })
}

// Finds the Network-LSA whose Link State ID matches the DR address.
fn network_lsa_by_id<'a>(
    area: &'a Area,
    lsa_entries: &'a Arena<LsaEntry>,
    lsa_id: Ipv4Addr,
) -> Option<&'a LsaEntry> {
    area.state
        .lsdb
        .iter_by_type(lsa_entries, LsaTypeCode::Network.into())
        .map(|(_, lse)| lse)
        .find(|lse| lse.data.hdr.lsa_id == lsa_id && !lse.data.hdr.is_maxage())
}

// Computes the nexthops used to reach a newly discovered vertex (RFC 2328
// section 16.1.1).
fn calc_nexthops(
    parent: &Vertex,
    parent_link: Option<&LsaRouterLink>,
    dest_id: VertexId,
    dest_lsa: &VertexLsa,
    interfaces: &Arena<Interface>,
    neighbors: &Arena<Neighbor>,
) -> Result<Nexthops, Error> {
    let mut nexthops = Nexthops::new();

    if parent.distance == 0 && parent.nexthops.is_empty() {
        // The parent vertex is the root.
        let parent_link = parent_link.unwrap();
        let (_, iface) = interfaces
            .iter()
            .find(|(_, iface)| {
                iface.state.src_addr == Some(parent_link.link_data)
            })
            .ok_or(Error::SpfNexthopCalcError(parent_link.link_data))?;
        let ifindex = iface
            .system
            .ifindex
            .ok_or(Error::SpfNexthopCalcError(parent_link.link_data))?;

        match dest_id {
            VertexId::Network { .. } => {
                // The destination is a network directly attached to the
                // root.
                nexthops.insert(Nexthop {
                    ifindex,
                    addr: None,
                });
            }
            VertexId::Router { router_id } => {
                // The destination is a router on the other end of a
                // point-to-point link.
                let nbr = iface
                    .state
                    .neighbors
                    .iter(neighbors)
                    .find(|nbr| nbr.router_id == router_id)
                    .ok_or(Error::SpfNexthopCalcError(router_id))?;
                nexthops.insert(Nexthop {
                    ifindex,
                    addr: Some(nbr.src),
                });
            }
        }
    } else if let (VertexId::Network { dr_addr }, VertexLsa::Router(lsa)) =
        (parent.id, dest_lsa)
        && parent
            .nexthops
            .iter()
            .all(|nexthop| nexthop.addr.is_none())
    {
        // The parent vertex is a network directly connected to the root.
        // The nexthop address is the destination router's interface address
        // on that network.
        let lsa_body = lsa.body.as_router().unwrap();
        let addr = lsa_body
            .links
            .iter()
            .find(|link| {
                link.link_type == LsaRouterLinkType::TransitNetwork
                    && link.link_id == dr_addr
            })
            .map(|link| link.link_data)
            .ok_or(Error::SpfNexthopCalcError(dr_addr))?;
        for parent_nexthop in &parent.nexthops {
            nexthops.insert(Nexthop {
                ifindex: parent_nexthop.ifindex,
                addr: Some(addr),
            });
        }
    } else {
        // The destination inherits its parent's set of nexthops.
        nexthops.clone_from(&parent.nexthops);
    }

    Ok(nexthops)
}

// Adds intra-area routes: one per transit network vertex plus one per stub
// link of each router vertex.
fn intra_area_routes(
    spt: &BTreeMap<VertexId, Vertex>,
    _area: &Area,
    _lsa_entries: &Arena<LsaEntry>,
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
) {
    for vertex in spt.values() {
        match &vertex.lsa {
            VertexLsa::Network(lsa) => {
                let lsa_body = lsa.body.as_network().unwrap();
                let Ok(prefix) =
                    Ipv4Network::with_netmask(lsa.hdr.lsa_id, lsa_body.mask)
                else {
                    continue;
                };
                let prefix = prefix_apply_mask(prefix);
                let route = RouteNet {
                    path_type: PathType::IntraArea,
                    metric: vertex.distance,
                    type2_metric: None,
                    nexthops: vertex.nexthops.clone(),
                };
                rib_add(rib, prefix, route);
            }
            VertexLsa::Router(lsa) => {
                // Routes to the root's own subnets are installed as
                // directly connected by the kernel.
                if vertex.distance == 0 {
                    continue;
                }

                let lsa_body = lsa.body.as_router().unwrap();
                for link in lsa_body
                    .links
                    .iter()
                    .filter(|link| {
                        link.link_type == LsaRouterLinkType::StubNetwork
                    })
                {
                    let Ok(prefix) = Ipv4Network::with_netmask(
                        link.link_id,
                        link.link_data,
                    ) else {
                        continue;
                    };
                    let prefix = prefix_apply_mask(prefix);
                    let route = RouteNet {
                        path_type: PathType::IntraArea,
                        metric: vertex.distance + link.metric as u32,
                        type2_metric: None,
                        nexthops: vertex.nexthops.clone(),
                    };
                    rib_add(rib, prefix, route);
                }
            }
        }
    }
}

// Adds inter-area routes derived from Type-3 Summary-LSAs originated by
// reachable area border routers (RFC 2328 section 16.2).
fn inter_area_routes(
    router_id: Ipv4Addr,
    spt: &BTreeMap<VertexId, Vertex>,
    area: &Area,
    lsa_entries: &Arena<LsaEntry>,
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
) {
    for (_, lse) in area
        .state
        .lsdb
        .iter_by_type(lsa_entries, LsaTypeCode::SummaryNetwork.into())
    {
        let lsa = &lse.data;
        if lsa.hdr.is_maxage() || lsa.hdr.adv_rtr == router_id {
            continue;
        }
        let lsa_body = match &lsa.body {
            LsaBody::SummaryNetwork(lsa_body) => lsa_body,
            _ => continue,
        };
        if lsa_body.metric >= LSA_INFINITY {
            continue;
        }

        // The advertising ABR must be reachable via the shortest-path tree.
        let Some(abr) = spt.get(&VertexId::Router {
            router_id: lsa.hdr.adv_rtr,
        }) else {
            continue;
        };

        let Ok(prefix) =
            Ipv4Network::with_netmask(lsa.hdr.lsa_id, lsa_body.mask)
        else {
            continue;
        };
        let prefix = prefix_apply_mask(prefix);
        let route = RouteNet {
            path_type: PathType::InterArea,
            metric: abr.distance + lsa_body.metric,
            type2_metric: None,
            nexthops: abr.nexthops.clone(),
        };
        rib_add(rib, prefix, route);
    }
}

// Adds external routes derived from Type-5 AS-External-LSAs (RFC 2328
// section 16.4). The ASBR distance is resolved from the shortest-path
// tree, falling back to Type-4 Summary-LSAs.
fn external_routes<'a>(
    router_id: Ipv4Addr,
    spt: &BTreeMap<VertexId, Vertex>,
    as_lsdb: impl Iterator<Item = (crate::collections::LsaEntryIndex, &'a LsaEntry)>,
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
) {
    for (_, lse) in as_lsdb {
        let lsa = &lse.data;
        if lsa.hdr.is_maxage() || lsa.hdr.adv_rtr == router_id {
            continue;
        }
        let lsa_body = match &lsa.body {
            LsaBody::AsExternal(lsa_body) => lsa_body,
            _ => continue,
        };
        if lsa_body.metric >= LSA_INFINITY {
            continue;
        }

        // Resolve the distance to the advertising ASBR.
        let asbr = spt.get(&VertexId::Router {
            router_id: lsa.hdr.adv_rtr,
        });
        let Some(asbr) = asbr else {
            continue;
        };

        let Ok(prefix) =
            Ipv4Network::with_netmask(lsa.hdr.lsa_id, lsa_body.mask)
        else {
            continue;
        };
        let prefix = prefix_apply_mask(prefix);
        let route = if lsa_body
            .flags
            .contains(crate::packet::lsa::LsaAsExternalFlags::E)
        {
            RouteNet {
                path_type: PathType::External2,
                metric: asbr.distance,
                type2_metric: Some(lsa_body.metric),
                nexthops: asbr.nexthops.clone(),
            }
        } else {
            RouteNet {
                path_type: PathType::External1,
                metric: asbr.distance + lsa_body.metric,
                type2_metric: None,
                nexthops: asbr.nexthops.clone(),
            }
        };
        rib_add(rib, prefix, route);
    }
}

// Inserts a route into the routing table, keeping the preferred path when
// the prefix already has one.
fn rib_add(
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
    prefix: Ipv4Network,
    route: RouteNet,
) {
    match rib.entry(prefix) {
        btree_map::Entry::Vacant(v) => {
            v.insert(route);
        }
        btree_map::Entry::Occupied(mut o) => {
            let current = o.get_mut();
            if route.is_preferred(current) {
                *current = route;
            } else if !current.is_preferred(&route) {
                // Equal-cost paths: merge nexthops.
                current.nexthops.extend(route.nexthops);
            }
        }
    }
}

fn prefix_apply_mask(prefix: Ipv4Network) -> Ipv4Network {
    use nbrd_utils::ip::Ipv4NetworkExt;
    prefix.apply_mask()
}
