//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use ipnetwork::{IpNetwork, Ipv4Network};
use nbrd_protocol::{
    InstanceChannelsTx, MessageReceiver, ProtocolInstance,
};
use nbrd_utils::ibus::IbusMsg;
use nbrd_utils::ip::Ipv4NetworkExt;
use nbrd_utils::protocol::Protocol;
use nbrd_utils::southbound::{AddressMsg, InterfaceUpdateMsg};
use nbrd_utils::task::{IntervalTask, TimeoutTask};
use nbrd_utils::{Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc;

use crate::area::Area;
use crate::collections::{
    Arena, InterfaceId, Lsdb, NeighborId,
};
use crate::error::Error;
use crate::interface::{Interface, InterfaceCfg};
use crate::lsdb::{LsaEntry, LsaOriginateEvent};
use crate::neighbor::{Neighbor, nsm};
use crate::route::RouteNet;
use crate::tasks::messages::ProtocolInputMsg;
use crate::tasks::messages::input::{
    DbDescFreeMsg, DelayedAckMsg, IsmEventMsg, LsaFlushMsg,
    LsaOrigDelayedMsg, LsaRefreshMsg, NetRxPacketMsg, NsmEventMsg,
    RxmtIntervalMsg, SendLsUpdateMsg,
};
use crate::{events, interface, lsdb, tasks};

#[derive(Debug)]
pub struct Instance {
    // Instance name.
    pub name: String,
    // Instance configuration data.
    pub config: InstanceCfg,
    // Instance state data.
    pub state: Option<InstanceState>,
    // Objects holding the protocol state.
    pub arenas: InstanceArenas,
    // Instance Tx channels.
    pub tx: InstanceChannelsTx<Instance>,
}

// Instance configuration, handed over by the supervisor at spawn time.
#[derive(Clone, Debug)]
pub struct InstanceCfg {
    // Explicitly configured Router ID.
    pub router_id: Option<Ipv4Addr>,
    // SPF coalescing window, in milliseconds.
    pub spf_hold: u64,
    // Per-interface configuration, keyed by interface name.
    pub interfaces: BTreeMap<String, InterfaceCfg>,
}

#[derive(Debug)]
pub struct InstanceState {
    // Instance Router ID.
    pub router_id: Ipv4Addr,
    // AS-scope LSDB (type-5 LSAs).
    pub lsdb: Lsdb,
    // SPF coalescing state.
    pub spf_pending: bool,
    pub spf_hold_timer: Option<TimeoutTask>,
    // Routing table computed by the last SPF run.
    pub rib: BTreeMap<Ipv4Network, RouteNet>,
    // MaxAge sweeper task.
    _maxage_sweeper: IntervalTask,
}

// Arena-allocated protocol objects plus the backbone area.
#[derive(Debug, Default)]
pub struct InstanceArenas {
    pub area: Area,
    pub interfaces: Arena<Interface>,
    pub neighbors: Arena<Neighbor>,
    pub lsa_entries: Arena<LsaEntry>,
}

#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    // Interface FSM events.
    pub ism_eventp: UnboundedSender<IsmEventMsg>,
    // Neighbor FSM events.
    pub nsm_eventp: UnboundedSender<NsmEventMsg>,
    // Received network packets.
    pub net_packet_rx: Sender<NetRxPacketMsg>,
    // Request to free the last sent/received DbDesc packets.
    pub dbdesc_freep: Sender<DbDescFreeMsg>,
    // Request to send an LS Update.
    pub send_lsupdp: UnboundedSender<SendLsUpdateMsg>,
    // Packet retransmission ticks.
    pub rxmt_intervalp: Sender<RxmtIntervalMsg>,
    // Delayed Ack ticks.
    pub delayed_ackp: Sender<DelayedAckMsg>,
    // LSA origination events.
    pub lsa_orig_eventp: UnboundedSender<LsaOriginateEvent>,
    // Delayed LSA originations.
    pub lsa_orig_delayedp: UnboundedSender<LsaOrigDelayedMsg>,
    // LSA expiry events.
    pub lsa_flushp: UnboundedSender<LsaFlushMsg>,
    // LSA refresh events.
    pub lsa_refreshp: UnboundedSender<LsaRefreshMsg>,
    // SPF hold timer ticks.
    pub spf_timerp: UnboundedSender<()>,
    // MaxAge sweep ticks.
    pub maxage_sweepp: UnboundedSender<()>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    pub ism_eventc: UnboundedReceiver<IsmEventMsg>,
    pub nsm_eventc: UnboundedReceiver<NsmEventMsg>,
    pub net_packet_rx: Receiver<NetRxPacketMsg>,
    pub dbdesc_freec: Receiver<DbDescFreeMsg>,
    pub send_lsupdc: UnboundedReceiver<SendLsUpdateMsg>,
    pub rxmt_intervalc: Receiver<RxmtIntervalMsg>,
    pub delayed_ackc: Receiver<DelayedAckMsg>,
    pub lsa_orig_eventc: UnboundedReceiver<LsaOriginateEvent>,
    pub lsa_orig_delayedc: UnboundedReceiver<LsaOrigDelayedMsg>,
    pub lsa_flushc: UnboundedReceiver<LsaFlushMsg>,
    pub lsa_refreshc: UnboundedReceiver<LsaRefreshMsg>,
    pub spf_timerc: UnboundedReceiver<()>,
    pub maxage_sweepc: UnboundedReceiver<()>,
}

// View of an active instance.
pub struct InstanceUpView<'a> {
    pub name: &'a str,
    pub config: &'a InstanceCfg,
    pub state: &'a mut InstanceState,
    pub tx: &'a InstanceChannelsTx<Instance>,
}

// ===== impl Instance =====

impl Instance {
    // Checks if the instance needs to be started or stopped in response to
    // a configuration or kernel event.
    fn update(&mut self) {
        match self.get_router_id() {
            Some(router_id) if self.state.is_none() => {
                self.start(router_id);
            }
            None if self.state.is_some() => {
                self.stop();
            }
            _ => (),
        }
    }

    fn start(&mut self, router_id: Ipv4Addr) {
        tracing::info!(%router_id, "starting instance");

        let state = InstanceState {
            router_id,
            lsdb: Default::default(),
            spf_pending: false,
            spf_hold_timer: None,
            rib: Default::default(),
            _maxage_sweeper: tasks::maxage_sweep_interval(
                &self.tx.protocol_input,
            ),
        };
        self.state = Some(state);

        // Originate the initial Router-LSA.
        self.tx
            .protocol_input
            .lsa_orig_event(LsaOriginateEvent::InstanceStart);

        // Try to activate all configured interfaces.
        let (instance, arenas) = self.as_up().unwrap();
        for iface_idx in arenas.area.interfaces.indexes() {
            let iface = &mut arenas.interfaces[iface_idx];
            iface.update(
                &arenas.area,
                &instance,
                &mut arenas.neighbors,
                &arenas.lsa_entries,
            );
        }
    }

    fn stop(&mut self) {
        let Some((mut instance, arenas)) = self.as_up() else {
            return;
        };

        tracing::info!("stopping instance");

        // Flush all self-originated LSAs before going down.
        lsdb::flush_all_self_originated(&mut instance, arenas);

        // Drain the enqueued LS Updates right away: the pacing timers won't
        // fire anymore, but the network Tx tasks are detached and will
        // deliver whatever is handed to them now.
        for iface_idx in arenas.area.interfaces.indexes() {
            let iface = &mut arenas.interfaces[iface_idx];
            if !iface.is_down() && !iface.is_passive() {
                crate::output::send_lsupd(
                    None,
                    iface,
                    &instance,
                    &mut arenas.neighbors,
                );
            }
        }

        // Stop all interfaces.
        for iface_idx in arenas.area.interfaces.indexes() {
            let iface = &mut arenas.interfaces[iface_idx];
            iface.fsm(
                &arenas.area,
                &instance,
                &mut arenas.neighbors,
                &arenas.lsa_entries,
                interface::ism::Event::InterfaceDown(
                    crate::debug::InterfaceInactiveReason::InstanceDown,
                ),
            );
        }

        self.state = None;
    }

    // Retrieves the Router ID from the configuration.
    fn get_router_id(&self) -> Option<Ipv4Addr> {
        self.config.router_id
    }

    // Returns a view struct for the instance if it is operational.
    pub(crate) fn as_up(
        &mut self,
    ) -> Option<(InstanceUpView<'_>, &mut InstanceArenas)> {
        if let Some(state) = &mut self.state {
            let instance = InstanceUpView {
                name: &self.name,
                config: &self.config,
                state,
                tx: &self.tx,
            };
            Some((instance, &mut self.arenas))
        } else {
            None
        }
    }
}

impl ProtocolInstance for Instance {
    const PROTOCOL: Protocol = Protocol::OSPFV2;

    type Config = InstanceCfg;
    type ProtocolInputMsg = ProtocolInputMsg;
    type ProtocolInputChannelsTx = ProtocolInputChannelsTx;
    type ProtocolInputChannelsRx = ProtocolInputChannelsRx;

    fn new(
        name: String,
        config: InstanceCfg,
        tx: InstanceChannelsTx<Instance>,
    ) -> Instance {
        let mut instance = Instance {
            name,
            config,
            state: None,
            arenas: Default::default(),
            tx,
        };

        // Create the configured interfaces.
        let iface_cfgs = instance.config.interfaces.clone();
        for (ifname, iface_cfg) in iface_cfgs {
            let arenas = &mut instance.arenas;
            let (_, iface) =
                arenas.area.interfaces.insert(&mut arenas.interfaces, &ifname);
            iface.config = iface_cfg;
        }

        instance
    }

    fn init(&mut self) {
        self.update();
    }

    fn shutdown(mut self) {
        // Flush all self-originated LSAs at MaxAge and flood them before
        // the sockets close.
        self.stop();
    }

    fn process_ibus_msg(&mut self, msg: IbusMsg) {
        if let Err(error) = process_ibus_msg(self, msg) {
            error.log();
        }
    }

    fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        // Ignore event if the instance isn't active.
        if let Some((mut instance, arenas)) = self.as_up()
            && let Err(error) =
                process_protocol_msg(&mut instance, arenas, msg)
        {
            error.log();
        }
    }

    fn protocol_input_channels()
    -> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
        let (ism_eventp, ism_eventc) = mpsc::unbounded_channel();
        let (nsm_eventp, nsm_eventc) = mpsc::unbounded_channel();
        let (net_packet_rxp, net_packet_rxc) = mpsc::channel(4);
        let (dbdesc_freep, dbdesc_freec) = mpsc::channel(4);
        let (send_lsupdp, send_lsupdc) = mpsc::unbounded_channel();
        let (rxmt_intervalp, rxmt_intervalc) = mpsc::channel(4);
        let (delayed_ackp, delayed_ackc) = mpsc::channel(4);
        let (lsa_orig_eventp, lsa_orig_eventc) = mpsc::unbounded_channel();
        let (lsa_orig_delayedp, lsa_orig_delayedc) =
            mpsc::unbounded_channel();
        let (lsa_flushp, lsa_flushc) = mpsc::unbounded_channel();
        let (lsa_refreshp, lsa_refreshc) = mpsc::unbounded_channel();
        let (spf_timerp, spf_timerc) = mpsc::unbounded_channel();
        let (maxage_sweepp, maxage_sweepc) = mpsc::unbounded_channel();

        let tx = ProtocolInputChannelsTx {
            ism_eventp,
            nsm_eventp,
            net_packet_rx: net_packet_rxp,
            dbdesc_freep,
            send_lsupdp,
            rxmt_intervalp,
            delayed_ackp,
            lsa_orig_eventp,
            lsa_orig_delayedp,
            lsa_flushp,
            lsa_refreshp,
            spf_timerp,
            maxage_sweepp,
        };
        let rx = ProtocolInputChannelsRx {
            ism_eventc,
            nsm_eventc,
            net_packet_rx: net_packet_rxc,
            dbdesc_freec,
            send_lsupdc,
            rxmt_intervalc,
            delayed_ackc,
            lsa_orig_eventc,
            lsa_orig_delayedc,
            lsa_flushc,
            lsa_refreshc,
            spf_timerc,
            maxage_sweepc,
        };

        (tx, rx)
    }
}

#[cfg(test)]
impl InstanceState {
    // Constructor for unit tests that need an active instance view.
    pub(crate) fn new_test(
        router_id: Ipv4Addr,
        protocol_input: &ProtocolInputChannelsTx,
    ) -> InstanceState {
        InstanceState {
            router_id,
            lsdb: Default::default(),
            spf_pending: false,
            spf_hold_timer: None,
            rib: Default::default(),
            _maxage_sweeper: tasks::maxage_sweep_interval(protocol_input),
        }
    }
}

// ===== impl InstanceCfg =====

impl Default for InstanceCfg {
    fn default() -> InstanceCfg {
        InstanceCfg {
            router_id: None,
            spf_hold: 1000,
            interfaces: Default::default(),
        }
    }
}

// ===== impl ProtocolInputChannelsTx =====

impl ProtocolInputChannelsTx {
    pub(crate) fn ism_event(
        &self,
        iface_id: InterfaceId,
        event: crate::interface::ism::Event,
    ) {
        let msg = IsmEventMsg {
            iface_key: iface_id.into(),
            event,
        };
        let _ = self.ism_eventp.send(msg);
    }

    pub(crate) fn nsm_event(
        &self,
        iface_id: InterfaceId,
        nbr_id: NeighborId,
        event: nsm::Event,
    ) {
        let msg = NsmEventMsg {
            iface_key: iface_id.into(),
            nbr_key: nbr_id.into(),
            event,
        };
        let _ = self.nsm_eventp.send(msg);
    }

    pub(crate) fn lsa_orig_event(&self, event: LsaOriginateEvent) {
        let _ = self.lsa_orig_eventp.send(event);
    }

    pub(crate) fn send_lsupd(
        &self,
        iface_id: InterfaceId,
        nbr_id: Option<NeighborId>,
    ) {
        let msg = SendLsUpdateMsg {
            iface_key: iface_id.into(),
            nbr_key: nbr_id.map(|nbr_id| nbr_id.into()),
        };
        let _ = self.send_lsupdp.send(msg);
    }
}

// ===== impl ProtocolInputChannelsRx =====

impl MessageReceiver<ProtocolInputMsg> for ProtocolInputChannelsRx {
    async fn recv(&mut self) -> Option<ProtocolInputMsg> {
        tokio::select! {
            biased;
            msg = self.ism_eventc.recv() => {
                msg.map(ProtocolInputMsg::IsmEvent)
            }
            msg = self.nsm_eventc.recv() => {
                msg.map(ProtocolInputMsg::NsmEvent)
            }
            msg = self.lsa_orig_eventc.recv() => {
                msg.map(ProtocolInputMsg::LsaOrigEvent)
            }
            msg = self.lsa_orig_delayedc.recv() => {
                msg.map(ProtocolInputMsg::LsaOrigDelayed)
            }
            msg = self.lsa_flushc.recv() => {
                msg.map(ProtocolInputMsg::LsaFlush)
            }
            msg = self.lsa_refreshc.recv() => {
                msg.map(ProtocolInputMsg::LsaRefresh)
            }
            msg = self.send_lsupdc.recv() => {
                msg.map(ProtocolInputMsg::SendLsUpdate)
            }
            msg = self.net_packet_rx.recv() => {
                msg.map(ProtocolInputMsg::NetRxPacket)
            }
            msg = self.dbdesc_freec.recv() => {
                msg.map(ProtocolInputMsg::DbDescFree)
            }
            msg = self.rxmt_intervalc.recv() => {
                msg.map(ProtocolInputMsg::RxmtInterval)
            }
            msg = self.delayed_ackc.recv() => {
                msg.map(ProtocolInputMsg::DelayedAck)
            }
            msg = self.spf_timerc.recv() => {
                msg.map(|_| ProtocolInputMsg::SpfTimer)
            }
            msg = self.maxage_sweepc.recv() => {
                msg.map(|_| ProtocolInputMsg::MaxAgeSweep)
            }
        }
    }
}

// ===== helper functions =====

fn process_ibus_msg(
    instance: &mut Instance,
    msg: IbusMsg,
) -> Result<(), Error> {
    match msg {
        IbusMsg::InterfaceUpd(msg) => {
            process_iface_update(instance, msg);
        }
        IbusMsg::InterfaceDel(ifname) => {
            process_iface_delete(instance, &ifname);
        }
        IbusMsg::InterfaceAddressAdd(msg) => {
            process_addr_add(instance, msg);
        }
        IbusMsg::InterfaceAddressDel(msg) => {
            process_addr_del(instance, msg);
        }
        IbusMsg::RouterIdUpdate(router_id) => {
            // The configured Router ID takes precedence.
            if instance.config.router_id.is_none() {
                instance.config.router_id = router_id;
                instance.update();
            }
        }
        // Ignore other events.
        _ => {}
    }

    Ok(())
}

fn process_iface_update(instance: &mut Instance, msg: InterfaceUpdateMsg) {
    let arenas = &mut instance.arenas;
    let Some((iface_idx, iface)) = arenas
        .area
        .interfaces
        .get_mut_by_name(&mut arenas.interfaces, &msg.ifname)
    else {
        return;
    };

    // Update interface system data.
    iface.system_update(msg.flags, msg.mtu as u16);
    arenas.area.interfaces.update_ifindex(
        iface_idx,
        &mut arenas.interfaces[iface_idx],
        Some(msg.ifindex),
    );

    // Check if the interface needs to be started or stopped.
    if let Some((instance, arenas)) = instance.as_up() {
        let iface = &mut arenas.interfaces[iface_idx];
        iface.update(
            &arenas.area,
            &instance,
            &mut arenas.neighbors,
            &arenas.lsa_entries,
        );
    }
}

fn process_iface_delete(instance: &mut Instance, ifname: &str) {
    let arenas = &mut instance.arenas;
    let Some((iface_idx, _)) = arenas
        .area
        .interfaces
        .get_mut_by_name(&mut arenas.interfaces, ifname)
    else {
        return;
    };

    if let Some((instance, arenas)) = instance.as_up() {
        let iface = &mut arenas.interfaces[iface_idx];
        iface.fsm(
            &arenas.area,
            &instance,
            &mut arenas.neighbors,
            &arenas.lsa_entries,
            interface::ism::Event::InterfaceDown(
                crate::debug::InterfaceInactiveReason::OperationalDown,
            ),
        );
    }
}

fn process_addr_add(instance: &mut Instance, msg: AddressMsg) {
    let IpNetwork::V4(addr) = msg.addr else {
        return;
    };

    let arenas = &mut instance.arenas;
    let Some((iface_idx, iface)) = arenas
        .area
        .interfaces
        .get_mut_by_name(&mut arenas.interfaces, &msg.ifname)
    else {
        return;
    };

    if !iface.system.addr_list.insert(addr) {
        return;
    }
    if iface.system.primary_addr.is_none() {
        iface.system.primary_addr = Some(addr);
    }

    if let Some((instance, arenas)) = instance.as_up() {
        let iface = &mut arenas.interfaces[iface_idx];
        iface.update(
            &arenas.area,
            &instance,
            &mut arenas.neighbors,
            &arenas.lsa_entries,
        );

        // (Re)originate LSAs that might have been affected.
        instance.tx.protocol_input.lsa_orig_event(
            LsaOriginateEvent::InterfaceAddrAddDel { iface_id: iface.id },
        );
    }
}

fn process_addr_del(instance: &mut Instance, msg: AddressMsg) {
    let IpNetwork::V4(addr) = msg.addr else {
        return;
    };
    let addr = addr.apply_mask();

    let arenas = &mut instance.arenas;
    let Some((iface_idx, iface)) = arenas
        .area
        .interfaces
        .get_mut_by_name(&mut arenas.interfaces, &msg.ifname)
    else {
        return;
    };

    let removed = iface
        .system
        .addr_list
        .iter()
        .find(|local| local.apply_mask() == addr)
        .copied();
    let Some(removed) = removed else {
        return;
    };
    iface.system.addr_list.remove(&removed);
    if iface.system.primary_addr == Some(removed) {
        iface.system.primary_addr =
            iface.system.addr_list.first().copied();
    }

    if let Some((instance, arenas)) = instance.as_up() {
        let iface = &mut arenas.interfaces[iface_idx];
        iface.update(
            &arenas.area,
            &instance,
            &mut arenas.neighbors,
            &arenas.lsa_entries,
        );

        // (Re)originate LSAs that might have been affected.
        instance.tx.protocol_input.lsa_orig_event(
            LsaOriginateEvent::InterfaceAddrAddDel { iface_id: iface.id },
        );
    }
}

fn process_protocol_msg(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    msg: ProtocolInputMsg,
) -> Result<(), Error> {
    match msg {
        // Interface FSM event.
        ProtocolInputMsg::IsmEvent(msg) => {
            events::process_ism_event(
                instance,
                arenas,
                msg.iface_key,
                msg.event,
            )?;
        }
        // Neighbor FSM event.
        ProtocolInputMsg::NsmEvent(msg) => {
            events::process_nsm_event(
                instance,
                arenas,
                msg.iface_key,
                msg.nbr_key,
                msg.event,
            )?;
        }
        // Received network packet.
        ProtocolInputMsg::NetRxPacket(msg) => {
            events::process_packet(
                instance,
                arenas,
                msg.iface_key,
                msg.src,
                msg.dst,
                msg.packet,
            )?;
        }
        // Free last sent/received Database Description packets.
        ProtocolInputMsg::DbDescFree(msg) => {
            events::process_dbdesc_free(
                instance,
                arenas,
                msg.iface_key,
                msg.nbr_key,
            )?;
        }
        // Request to send LS Update.
        ProtocolInputMsg::SendLsUpdate(msg) => {
            events::process_send_lsupd(
                instance,
                arenas,
                msg.iface_key,
                msg.nbr_key,
            )?;
        }
        // Packet retransmission.
        ProtocolInputMsg::RxmtInterval(msg) => {
            events::process_packet_rxmt(
                instance,
                arenas,
                msg.iface_key,
                msg.nbr_key,
                msg.packet_type,
            )?;
        }
        // Delayed Ack timeout.
        ProtocolInputMsg::DelayedAck(msg) => {
            events::process_delayed_ack_timeout(
                instance,
                arenas,
                msg.iface_key,
            )?;
        }
        // LSA origination event.
        ProtocolInputMsg::LsaOrigEvent(event) => {
            events::process_lsa_orig_event(instance, arenas, event)?;
        }
        // LSA delayed origination timer.
        ProtocolInputMsg::LsaOrigDelayed(msg) => {
            events::process_lsa_orig_delayed_timer(
                instance,
                arenas,
                msg.lsdb_id,
                msg.lsa_key,
            )?;
        }
        // LSA expiry.
        ProtocolInputMsg::LsaFlush(msg) => {
            events::process_lsa_expiry(
                instance,
                arenas,
                msg.lsdb_id,
                msg.lse_id,
            )?;
        }
        // LSA refresh.
        ProtocolInputMsg::LsaRefresh(msg) => {
            events::process_lsa_refresh(
                instance,
                arenas,
                msg.lsdb_id,
                msg.lse_id,
            )?;
        }
        // SPF hold timer.
        ProtocolInputMsg::SpfTimer => {
            events::process_spf_timer(instance, arenas)?;
        }
        // MaxAge sweep.
        ProtocolInputMsg::MaxAgeSweep => {
            events::process_maxage_sweep(instance, arenas)?;
        }
    }

    Ok(())
}
