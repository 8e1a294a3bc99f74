//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use chrono::Utc;
use nbrd_utils::ibus::IbusChannelsTx;
use nbrd_utils::policy::PolicyResult;
use nbrd_utils::socket::{TcpConnInfo, TcpStream};
use num_traits::FromPrimitive;

use crate::af::{AddressFamily, Ipv4Unicast, Ipv6Unicast};
use crate::debug::Debug;
use crate::error::{Error, IoError, NbrRxError};
use crate::instance::InstanceUpView;
use crate::neighbor::{Neighbor, Neighbors, PeerType, fsm};
use crate::packet::attribute::Attrs;
use crate::packet::consts::{Afi, CeaseSubcode, ErrorCode, Safi};
use crate::packet::message::{
    Capability, Message, MpReachNlri, MpUnreachNlri, NotificationMsg,
    RouteRefreshMsg, UpdateMsg,
};
use crate::rib::{Rib, Route, RouteOrigin, RouteType, RoutingTable};
use crate::{network, policy, rib, tasks};

// ===== TCP connection request =====

pub(crate) fn process_tcp_accept(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    stream: TcpStream,
    conn_info: TcpConnInfo,
) -> Result<(), Error> {
    // Lookup neighbor.
    let Some(nbr) = neighbors.get_mut(&conn_info.remote_addr) else {
        return Ok(());
    };

    // Initialize the accepted stream.
    network::accepted_stream_init(&stream, nbr)
        .map_err(IoError::TcpSocketError)?;

    // Handle connection collision (RFC 4271 section 6.8): the connection
    // initiated by the side with the larger BGP Identifier wins.
    if nbr.conn_info.is_some() {
        if nbr.state == fsm::State::Established {
            // New connections for established sessions are rejected.
            tasks::reject_collision_stream(stream);
            return Ok(());
        }

        if nbr.collision_resolve(instance.state.router_id) {
            // The incoming connection wins: drop the existing one with a
            // Cease NOTIFICATION and restart on top of the new stream.
            Debug::NbrCollisionNewWins(&nbr.remote_addr).log();
            let msg = NotificationMsg::new(
                ErrorCode::Cease,
                CeaseSubcode::ConnectionCollisionResolution,
            );
            nbr.fsm_event(instance, fsm::Event::Stop(Some(msg)));

            let nbr = neighbors.get_mut(&conn_info.remote_addr).unwrap();
            nbr.fsm_event(instance, fsm::Event::Connected(stream, conn_info));
        } else {
            // The existing connection wins: the new stream is closed with a
            // Cease NOTIFICATION.
            Debug::NbrCollisionOldWins(&nbr.remote_addr).log();
            tasks::reject_collision_stream(stream);
        }
        return Ok(());
    }

    // Invoke FSM event.
    nbr.fsm_event(instance, fsm::Event::Connected(stream, conn_info));

    Ok(())
}

// ===== TCP connection established =====

pub(crate) fn process_tcp_connect(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    stream: TcpStream,
    conn_info: TcpConnInfo,
) -> Result<(), Error> {
    // Lookup neighbor.
    let Some(nbr) = neighbors.get_mut(&conn_info.remote_addr) else {
        return Ok(());
    };
    nbr.tasks.connect = None;

    // An existing connection is preserved until the collision resolution
    // procedure decides otherwise.
    if nbr.conn_info.is_some() {
        return Ok(());
    }

    // Invoke FSM event.
    nbr.fsm_event(instance, fsm::Event::Connected(stream, conn_info));

    Ok(())
}

// ===== neighbor message receipt =====

pub(crate) fn process_nbr_msg(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    nbr_addr: IpAddr,
    msg: Result<Message, NbrRxError>,
) -> Result<(), Error> {
    // Lookup neighbor.
    let Some(nbr) = neighbors.get_mut(&nbr_addr) else {
        return Ok(());
    };

    // Process received message.
    match msg {
        Ok(msg) => {
            Debug::NbrMsgRx(&nbr.remote_addr, &msg).log();

            // Update statistics.
            nbr.statistics.msgs_rcvd += 1;

            match msg {
                Message::Open(msg) => {
                    nbr.fsm_event(instance, fsm::Event::RcvdOpen(msg));
                }
                Message::Update(msg) => {
                    nbr.statistics.updates_rcvd += 1;
                    nbr.fsm_event(instance, fsm::Event::RcvdUpdate);
                    process_nbr_update(instance, nbr, msg)?;
                }
                Message::Notification(msg) => {
                    nbr.fsm_event(instance, fsm::Event::RcvdNotif(msg.clone()));
                    // Keep track of the last received notification.
                    nbr.notification_rcvd = Some((Utc::now(), msg));
                }
                Message::Keepalive(_) => {
                    nbr.fsm_event(instance, fsm::Event::RcvdKalive);
                }
                Message::RouteRefresh(msg) => {
                    process_nbr_route_refresh(instance, nbr, msg)?;
                }
            }
        }
        Err(error) => match error {
            NbrRxError::TcpConnClosed => {
                nbr.fsm_event(instance, fsm::Event::ConnFail);
            }
            NbrRxError::MsgDecodeError(error) => {
                nbr.fsm_event(instance, fsm::Event::RcvdError(error));
            }
        },
    }

    Ok(())
}

fn process_nbr_update(
    instance: &mut InstanceUpView<'_>,
    nbr: &mut Neighbor,
    msg: UpdateMsg,
) -> Result<(), Error> {
    let rib = &mut instance.state.rib;
    let ibus_tx = &instance.tx.ibus;

    // Process IPv4 reachable NLRIs using the nexthop from the NEXT_HOP
    // attribute.
    if let Some(reach) = msg.reach {
        if let Some(attrs) = &msg.attrs {
            let mut attrs = attrs.clone();
            attrs.base.nexthop = Some(reach.nexthop.into());
            process_nbr_reach_prefixes::<Ipv4Unicast>(
                nbr,
                rib,
                reach.prefixes,
                attrs,
                ibus_tx,
            );
        } else {
            // Treat as withdraw.
            process_nbr_unreach_prefixes::<Ipv4Unicast>(
                nbr,
                rib,
                reach.prefixes,
                ibus_tx,
            );
        }
    }

    // Process multiprotocol reachable NLRIs using the nexthop(s) from the
    // MP_REACH_NLRI attribute.
    if let Some(mp_reach) = msg.mp_reach {
        if let Some(mut attrs) = msg.attrs.clone() {
            match mp_reach {
                MpReachNlri::Ipv6Unicast {
                    prefixes,
                    nexthop,
                    ll_nexthop,
                } => {
                    attrs.base.nexthop = Some(nexthop.into());
                    attrs.base.ll_nexthop = ll_nexthop;
                    process_nbr_reach_prefixes::<Ipv6Unicast>(
                        nbr,
                        rib,
                        prefixes,
                        attrs,
                        ibus_tx,
                    );
                }
            }
        } else {
            // Treat as withdraw.
            match mp_reach {
                MpReachNlri::Ipv6Unicast { prefixes, .. } => {
                    process_nbr_unreach_prefixes::<Ipv6Unicast>(
                        nbr, rib, prefixes, ibus_tx,
                    );
                }
            }
        }
    }

    // Process IPv4 unreachable NLRIs.
    if let Some(unreach) = msg.unreach {
        process_nbr_unreach_prefixes::<Ipv4Unicast>(
            nbr,
            rib,
            unreach.prefixes,
            ibus_tx,
        );
    }

    // Process multiprotocol unreachable NLRIs.
    if let Some(mp_unreach) = msg.mp_unreach {
        match mp_unreach {
            MpUnreachNlri::Ipv6Unicast { prefixes } => {
                process_nbr_unreach_prefixes::<Ipv6Unicast>(
                    nbr, rib, prefixes, ibus_tx,
                );
            }
        }
    }

    // Schedule the BGP Decision Process.
    instance.state.schedule_decision_process(instance.tx);

    Ok(())
}

fn process_nbr_reach_prefixes<A>(
    nbr: &mut Neighbor,
    rib: &mut Rib,
    nlri_prefixes: Vec<A::IpNetwork>,
    attrs: Attrs,
    ibus_tx: &IbusChannelsTx,
) where
    A: AddressFamily,
{
    // Check if the address family is enabled for this session.
    if !nbr.is_af_enabled(A::AFI, A::SAFI) {
        return;
    }

    // Initialize route origin and type.
    let origin = RouteOrigin::Neighbor {
        identifier: nbr.identifier.unwrap(),
        remote_addr: nbr.remote_addr,
    };
    let route_type = match nbr.peer_type {
        PeerType::Internal => RouteType::Internal,
        PeerType::External => RouteType::External,
    };

    let table = A::table(&mut rib.tables);
    for prefix in nlri_prefixes {
        // Update the pre-policy Adj-RIB-In.
        let dest = table.prefixes.entry(prefix).or_default();
        let adj_rib = dest.adj_rib.entry(nbr.remote_addr).or_default();
        let route = Route::new(origin, attrs.clone(), route_type);
        adj_rib.in_pre = Some(Box::new(route.clone()));

        // Apply the import policy and update the post-policy Adj-RIB-In.
        match policy::apply_import(nbr, prefix.into(), route) {
            PolicyResult::Accept(route) => {
                // Update nexthop tracking.
                if let Some(old_route) = &adj_rib.in_post {
                    rib::nexthop_untrack(
                        &mut table.nht,
                        old_route,
                        A::nexthop_rx_extract,
                        ibus_tx,
                    );
                }
                rib::nexthop_track(
                    &mut table.nht,
                    &route,
                    A::nexthop_rx_extract,
                    ibus_tx,
                );

                adj_rib.in_post = Some(Box::new(route));
            }
            PolicyResult::Reject => {
                nbr.statistics.routes_rejected_by_policy += 1;
                if let Some(old_route) = adj_rib.in_post.take() {
                    rib::nexthop_untrack(
                        &mut table.nht,
                        &old_route,
                        A::nexthop_rx_extract,
                        ibus_tx,
                    );
                }
            }
        }

        // Enqueue prefix for the BGP Decision Process.
        table.queued_prefixes.insert(prefix);
    }
}

fn process_nbr_unreach_prefixes<A>(
    nbr: &Neighbor,
    rib: &mut Rib,
    nlri_prefixes: Vec<A::IpNetwork>,
    ibus_tx: &IbusChannelsTx,
) where
    A: AddressFamily,
{
    // Check if the address family is enabled for this session.
    if !nbr.is_af_enabled(A::AFI, A::SAFI) {
        return;
    }

    // Remove routes from the Adj-RIB-In.
    let table = A::table(&mut rib.tables);
    for prefix in nlri_prefixes {
        let Some(dest) = table.prefixes.get_mut(&prefix) else {
            continue;
        };
        let Some(adj_rib) = dest.adj_rib.get_mut(&nbr.remote_addr) else {
            continue;
        };

        adj_rib.in_pre = None;
        if let Some(route) = adj_rib.in_post.take() {
            rib::nexthop_untrack(
                &mut table.nht,
                &route,
                A::nexthop_rx_extract,
                ibus_tx,
            );
        }

        // Enqueue prefix for the BGP Decision Process.
        table.queued_prefixes.insert(prefix);
    }
}

fn process_nbr_route_refresh(
    instance: &mut InstanceUpView<'_>,
    nbr: &mut Neighbor,
    msg: RouteRefreshMsg,
) -> Result<(), Error> {
    let Some(afi) = Afi::from_u16(msg.afi) else {
        // Ignore unknown AFI.
        return Ok(());
    };
    let Some(safi) = Safi::from_u8(msg.safi) else {
        // Ignore unknown SAFI.
        return Ok(());
    };

    // RFC 2918 section 4: ignore ROUTE-REFRESH messages for <AFI, SAFI>
    // combinations that were not advertised at session establishment.
    let cap = Capability::MultiProtocol { afi, safi };
    if !nbr.capabilities_adv.contains(&cap) {
        return Ok(());
    }

    match (afi, safi) {
        (Afi::Ipv4, Safi::Unicast) => {
            nbr.resend_adj_rib_out::<Ipv4Unicast>(instance);
        }
        (Afi::Ipv6, Safi::Unicast) => {
            nbr.resend_adj_rib_out::<Ipv6Unicast>(instance);
        }
    }

    // Send UPDATE message(s) to the neighbor.
    let msg_list = nbr.update_queues.build_updates();
    if !msg_list.is_empty() {
        nbr.message_list_send(msg_list);
    }

    Ok(())
}

// ===== neighbor expired timeout =====

pub(crate) fn process_nbr_timer(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    nbr_addr: IpAddr,
    timer: fsm::Timer,
) -> Result<(), Error> {
    // Lookup neighbor.
    let Some(nbr) = neighbors.get_mut(&nbr_addr) else {
        return Ok(());
    };

    // Invoke FSM event.
    nbr.fsm_event(instance, fsm::Event::Timer(timer));

    Ok(())
}

// ===== nexthop reachability update =====

pub(crate) fn process_nht_update(
    instance: &mut InstanceUpView<'_>,
    addr: IpAddr,
    metric: Option<u32>,
) -> Result<(), Error> {
    let mut changed = false;

    let tables = &mut instance.state.rib.tables;
    if let Some(entry) = tables.ipv4_unicast.nht.get_mut(&addr)
        && entry.metric != metric
    {
        entry.metric = metric;
        changed = true;
    }
    if let Some(entry) = tables.ipv6_unicast.nht.get_mut(&addr)
        && entry.metric != metric
    {
        entry.metric = metric;
        changed = true;
    }

    if changed {
        // Re-run the decision process for every destination whose
        // candidate routes reference the updated nexthop.
        requeue_nht_prefixes::<Ipv4Unicast>(instance, addr);
        requeue_nht_prefixes::<Ipv6Unicast>(instance, addr);
        instance.state.schedule_decision_process(instance.tx);
    }

    Ok(())
}

fn requeue_nht_prefixes<A>(instance: &mut InstanceUpView<'_>, addr: IpAddr)
where
    A: AddressFamily,
{
    let table = A::table(&mut instance.state.rib.tables);
    let prefixes = table
        .prefixes
        .iter()
        .filter(|(_, dest)| {
            dest.adj_rib.values().any(|adj_rib| {
                adj_rib.in_post.as_ref().is_some_and(|route| {
                    A::nexthop_rx_extract(&route.attrs.base) == addr
                })
            })
        })
        .map(|(prefix, _)| *prefix)
        .collect::<Vec<_>>();
    table.queued_prefixes.extend(prefixes);
}

// ===== BGP decision process =====

pub(crate) fn decision_process<A>(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
) -> Result<(), Error>
where
    A: AddressFamily,
{
    let selection_cfg = instance.config.route_selection.clone();

    // Phase 2: Route Selection.
    //
    // Process each queued destination in the RIB.
    let table = A::table(&mut instance.state.rib.tables);
    let queued_prefixes = std::mem::take(&mut table.queued_prefixes);
    let mut reach = vec![];
    let mut unreach = vec![];
    for prefix in queued_prefixes.iter().copied() {
        let Some(dest) = table.prefixes.get_mut(&prefix) else {
            continue;
        };

        // Perform best-path selection for the destination.
        let best_route = rib::best_path(
            dest,
            instance.config.asn,
            &table.nht,
            &selection_cfg,
        );

        // Update the Loc-RIB with the best path.
        rib::loc_rib_update::<A>(
            prefix,
            dest,
            best_route.clone(),
            instance.config.distance_external,
            instance.config.distance_internal,
            &instance.tx.ibus,
        );

        // Group best routes and unfeasible routes separately.
        match best_route {
            Some(best_route) => reach.push((prefix, best_route)),
            None => unreach.push(prefix),
        }
    }

    // Phase 3: Route Dissemination.
    for nbr in neighbors
        .values_mut()
        .filter(|nbr| nbr.state == fsm::State::Established)
    {
        // Skip neighbors that don't have this address family enabled.
        if !nbr.is_af_enabled(A::AFI, A::SAFI) {
            continue;
        }

        // Evaluate which routes are eligible for distribution to this
        // neighbor. Routes failing the distribution criteria are withdrawn
        // so previous advertisements don't linger.
        let mut nbr_unreach = unreach.clone();
        let mut nbr_reach = vec![];
        for (prefix, route) in &reach {
            if nbr.distribute_filter(route) {
                nbr_reach.push((*prefix, route.clone()));
            } else {
                nbr_unreach.push(*prefix);
            }
        }

        // Withdraw unfeasible routes immediately.
        if !nbr_unreach.is_empty() {
            withdraw_routes::<A>(nbr, table, &nbr_unreach);
        }

        // Advertise best routes.
        if !nbr_reach.is_empty() {
            advertise_routes::<A>(nbr, table, nbr_reach, instance.config.asn);
        }
    }

    // Remove routing table entries that no longer hold any data.
    for prefix in queued_prefixes {
        if let Some(dest) = table.prefixes.get(&prefix)
            && dest.local.is_none()
            && dest.adj_rib.values().all(|adj_rib| adj_rib.is_empty())
        {
            table.prefixes.remove(&prefix);
        }
    }

    Ok(())
}

fn withdraw_routes<A>(
    nbr: &mut Neighbor,
    table: &mut RoutingTable<A>,
    routes: &[A::IpNetwork],
) where
    A: AddressFamily,
{
    // Update the Adj-RIB-Out.
    for prefix in routes {
        let Some(dest) = table.prefixes.get_mut(prefix) else {
            continue;
        };
        let Some(adj_rib) = dest.adj_rib.get_mut(&nbr.remote_addr) else {
            continue;
        };

        if adj_rib.out_post.take().is_some() {
            nbr.enqueue_withdrawal::<A>(*prefix);
        }
    }

    // Send UPDATE message(s) to the neighbor.
    let msg_list = nbr.update_queues.build_updates();
    if !msg_list.is_empty() {
        nbr.message_list_send(msg_list);
    }
}

pub(crate) fn advertise_routes<A>(
    nbr: &mut Neighbor,
    table: &mut RoutingTable<A>,
    routes: Vec<(A::IpNetwork, Box<Route>)>,
    local_asn: u32,
) where
    A: AddressFamily,
{
    for (prefix, route) in routes {
        // Apply the export policy.
        let route = match policy::apply_export(nbr, prefix.into(), *route) {
            PolicyResult::Accept(route) => route,
            PolicyResult::Reject => {
                // Withdraw a previously advertised route.
                let dest = table.prefixes.entry(prefix).or_default();
                let adj_rib =
                    dest.adj_rib.entry(nbr.remote_addr).or_default();
                if adj_rib.out_post.take().is_some() {
                    nbr.enqueue_withdrawal::<A>(prefix);
                }
                continue;
            }
        };

        // Update the post-policy Adj-RIB-Out, skipping unchanged routes.
        let dest = table.prefixes.entry(prefix).or_default();
        let adj_rib = dest.adj_rib.entry(nbr.remote_addr).or_default();
        let update = match &adj_rib.out_post {
            Some(adj_rib_route) => adj_rib_route.attrs != route.attrs,
            None => true,
        };
        if !update {
            continue;
        }

        let is_local = route.origin.is_local();
        let mut attrs = route.attrs.clone();
        adj_rib.out_post = Some(Box::new(route));

        // Update the route's attributes before transmission.
        rib::attrs_tx_update::<A>(&mut attrs, nbr, local_asn, is_local);

        // Update the neighbor's Tx queue.
        nbr.enqueue_advertisement::<A>(prefix, attrs);
    }

    // Send UPDATE message(s) to the neighbor.
    let msg_list = nbr.update_queues.build_updates();
    if !msg_list.is_empty() {
        nbr.message_list_send(msg_list);
    }
}
