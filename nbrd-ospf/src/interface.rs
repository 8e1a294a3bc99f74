//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnetwork::Ipv4Network;
use ism::{Event, State};
use nbrd_utils::socket::{AsyncFd, Socket};
use nbrd_utils::southbound::InterfaceFlags;
use nbrd_utils::task::{IntervalTask, TimeoutTask};
use nbrd_utils::UnboundedSender;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::area::{Area, BACKBONE_AREA_ID};
use crate::lsdb::LsaEntry;
use crate::collections::{Arena, InterfaceId, NeighborIndex};
use crate::debug::{Debug, InterfaceInactiveReason};
use crate::error::{Error, InterfaceCfgError, IoError};
use crate::instance::InstanceUpView;
use crate::lsdb::LsaOriginateEvent;
use crate::neighbor::{Neighbor, nsm};
use crate::network::MulticastAddr;
use crate::packet::lsa::{Lsa, LsaHdr, LsaKey};
use crate::packet::{AuthCtx, Hello, Options, Packet, PacketHdr, PacketType};
use crate::tasks;
use crate::tasks::messages::output::NetTxPacketMsg;
use crate::{network, southbound};

#[derive(Debug)]
pub struct Interface {
    pub id: InterfaceId,
    pub name: String,
    pub system: InterfaceSys,
    pub config: InterfaceCfg,
    pub state: InterfaceState,
}

// Interface data learned from the kernel.
#[derive(Debug, Default)]
pub struct InterfaceSys {
    pub flags: InterfaceFlags,
    pub ifindex: Option<u32>,
    pub mtu: Option<u16>,
    // List of addresses associated with this interface.
    pub addr_list: BTreeSet<Ipv4Network>,
    // Primary address, used as the packet source.
    pub primary_addr: Option<Ipv4Network>,
}

// Interface configuration.
#[derive(Clone, Debug)]
pub struct InterfaceCfg {
    pub enabled: bool,
    pub if_type: InterfaceType,
    pub cost: u16,
    pub hello_interval: u16,
    pub dead_interval: u16,
    pub retransmit_interval: u16,
    pub transmit_delay: u16,
    pub priority: u8,
    pub passive: bool,
    pub mtu_ignore: bool,
    pub auth: Option<AuthCtx>,
}

#[derive(Debug, Default)]
pub struct InterfaceState {
    // ISM state.
    pub ism_state: State,
    // Raw socket and Tx/Rx tasks.
    pub net: Option<InterfaceNet>,
    // Source address used when sending packets.
    pub src_addr: Option<Ipv4Addr>,
    // Joined multicast groups.
    pub mcast_groups: HashSet<MulticastAddr>,
    // The segment DR/BDR, identified by their interface addresses.
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    // List of neighbors attached to this interface.
    pub neighbors: crate::collections::Neighbors,
    // List of LSAs enqueued for transmission.
    pub ls_update_list: BTreeMap<LsaKey, Arc<Lsa>>,
    // List of pending delayed Acks.
    pub ls_ack_list: BTreeMap<LsaKey, LsaHdr>,
    // Key of the self-originated Network-LSA for this interface, if any.
    pub network_lsa_self: Option<LsaKey>,
    // Tasks.
    pub tasks: InterfaceTasks,
}

#[derive(Debug)]
pub struct InterfaceNet {
    // Raw socket.
    pub socket: Arc<AsyncFd<Socket>>,
    // Network Tx/Rx tasks.
    _net_tx_task: nbrd_utils::task::Task<()>,
    _net_rx_task: nbrd_utils::task::Task<()>,
    // Network Tx output channel.
    pub net_tx_packetp: UnboundedSender<NetTxPacketMsg>,
}

#[derive(Debug, Default)]
pub struct InterfaceTasks {
    // ISM Hello Tx interval task.
    pub hello_interval: Option<IntervalTask>,
    // ISM WaitTimer task.
    pub wait_timer: Option<TimeoutTask>,
    // LS Update pacing task.
    pub ls_update_timer: Option<TimeoutTask>,
    // Delayed Ack task.
    pub ls_delayed_ack: Option<TimeoutTask>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum InterfaceType {
    PointToPoint,
    Broadcast,
    Loopback,
}

#[derive(Clone, Copy, Debug)]
struct DrCandidate {
    router_id: Ipv4Addr,
    addr: Ipv4Addr,
    dr: Option<Ipv4Addr>,
    bdr: Option<Ipv4Addr>,
    priority: u8,
}

// Interface state machine.
pub mod ism {
    use serde::{Deserialize, Serialize};

    use crate::debug::InterfaceInactiveReason;

    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Down,
        Loopback,
        Waiting,
        PointToPoint,
        DrOther,
        Backup,
        Dr,
    }

    #[derive(Clone, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Event {
        InterfaceUp,
        WaitTimer,
        BackupSeen,
        NbrChange,
        LoopInd,
        UnloopInd,
        InterfaceDown(InterfaceInactiveReason),
    }
}

// ===== impl Interface =====

impl Interface {
    pub(crate) fn new(id: InterfaceId, name: String) -> Interface {
        Debug::InterfaceCreate(&name).log();

        Interface {
            id,
            name,
            system: Default::default(),
            config: Default::default(),
            state: Default::default(),
        }
    }

    // Checks if the interface needs to be started or stopped in response to
    // a configuration or kernel event.
    pub(crate) fn update(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &mut Arena<Neighbor>,
        lsa_entries: &Arena<LsaEntry>,
    ) {
        let event = match self.is_ready() {
            Ok(()) => {
                let ism_state = self.state.ism_state;
                if self.is_loopback_mode() {
                    if ism_state == State::Loopback {
                        return;
                    }
                    Event::LoopInd
                } else if ism_state == State::Loopback {
                    Event::UnloopInd
                } else if ism_state == State::Down {
                    Event::InterfaceUp
                } else {
                    return;
                }
            }
            Err(reason) if !self.is_down() => Event::InterfaceDown(reason),
            _ => return,
        };

        self.fsm(area, instance, neighbors, lsa_entries, event);
    }

    fn is_ready(&self) -> Result<(), InterfaceInactiveReason> {
        if !self.config.enabled {
            return Err(InterfaceInactiveReason::AdminDown);
        }
        if !self.system.flags.contains(InterfaceFlags::OPERATIVE) {
            return Err(InterfaceInactiveReason::OperationalDown);
        }
        if self.system.ifindex.is_none() {
            return Err(InterfaceInactiveReason::MissingIfindex);
        }
        if self.system.mtu.is_none() {
            return Err(InterfaceInactiveReason::MissingMtu);
        }
        if self.system.primary_addr.is_none() {
            return Err(InterfaceInactiveReason::MissingIpv4Address);
        }

        Ok(())
    }

    fn is_loopback_mode(&self) -> bool {
        self.config.if_type == InterfaceType::Loopback
            || self.system.flags.contains(InterfaceFlags::LOOPBACK)
    }

    fn start(&mut self, instance: &InstanceUpView<'_>) -> State {
        Debug::InterfaceStart(&self.name).log();

        // Initialize source address.
        self.state.src_addr =
            self.system.primary_addr.map(|addr| addr.ip());

        if !self.is_passive() {
            // Start network Tx/Rx tasks.
            match InterfaceNet::new(self, instance) {
                Ok(net) => self.state.net = Some(net),
                Err(error) => {
                    let ifname = self.name.clone();
                    Error::InterfaceStartError(ifname, error).log();
                    return State::Down;
                }
            }

            // Start Hello Tx task.
            self.hello_interval_start(instance);
        }

        // Get new ISM state.
        let new_ism_state = match self.config.if_type {
            InterfaceType::PointToPoint => State::PointToPoint,
            InterfaceType::Loopback => State::Loopback,
            InterfaceType::Broadcast => {
                if self.config.priority == 0 {
                    State::DrOther
                } else {
                    State::Waiting
                }
            }
        };

        if new_ism_state == State::Waiting {
            // Start wait timer.
            let task = tasks::ism_wait_timer(self, instance);
            self.state.tasks.wait_timer = Some(task);
        }

        new_ism_state
    }

    fn stop(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &mut Arena<Neighbor>,
        lsa_entries: &Arena<LsaEntry>,
        reason: InterfaceInactiveReason,
    ) {
        if self.is_down() {
            return;
        }

        Debug::InterfaceStop(&self.name, reason).log();

        // Kill all neighbors.
        let event = match reason {
            InterfaceInactiveReason::OperationalDown
            | InterfaceInactiveReason::MissingIfindex
            | InterfaceInactiveReason::MissingMtu
            | InterfaceInactiveReason::MissingIpv4Address => {
                nsm::Event::LinkDown
            }
            _ => nsm::Event::Kill,
        };
        for nbr_idx in self.state.neighbors.indexes() {
            let nbr = &mut neighbors[nbr_idx];
            nbr.fsm(self, area, instance, lsa_entries, event);
            self.state.neighbors.delete(neighbors, nbr_idx);
        }

        // Reset interface state.
        self.state.net = None;
        self.state.src_addr = None;
        self.state.mcast_groups = Default::default();
        self.state.dr = None;
        self.state.bdr = None;
        self.state.neighbors = Default::default();
        self.state.ls_update_list = Default::default();
        self.state.ls_ack_list = Default::default();
        self.state.tasks = Default::default();
    }

    // Restarts the Hello Tx task. Needed whenever the contents of the
    // generated Hello packet change (neighbor list, DR/BDR).
    pub(crate) fn sync_hello_tx(&mut self, instance: &InstanceUpView<'_>) {
        if !self.is_passive()
            && self.state.net.is_some()
            && self.state.ism_state >= ism::State::Waiting
        {
            self.hello_interval_start(instance);
        }
    }

    pub(crate) fn is_down(&self) -> bool {
        self.state.ism_state == State::Down
    }

    pub(crate) fn is_passive(&self) -> bool {
        self.system.flags.contains(InterfaceFlags::LOOPBACK)
            || self.config.if_type == InterfaceType::Loopback
            || self.config.passive
    }

    pub(crate) fn is_dr_or_backup(&self) -> bool {
        matches!(self.state.ism_state, State::Dr | State::Backup)
    }

    pub(crate) fn is_broadcast(&self) -> bool {
        self.config.if_type == InterfaceType::Broadcast
    }

    pub(crate) fn fsm(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &mut Arena<Neighbor>,
        lsa_entries: &Arena<LsaEntry>,
        event: Event,
    ) {
        Debug::IsmEvent(&self.name, &self.state.ism_state, &event).log();

        let new_ism_state = match (self.state.ism_state, &event) {
            (State::Down, Event::InterfaceUp) => {
                // Start interface.
                self.start(instance)
            }
            (State::Waiting, Event::NbrChange) => {
                // Unspecified but harmless during normal operation.
                return;
            }
            (State::Waiting, Event::BackupSeen | Event::WaitTimer) => {
                self.state.tasks.wait_timer = None;

                // Run DR election.
                self.dr_election(instance, neighbors)
            }
            (State::DrOther | State::Backup | State::Dr, Event::NbrChange) => {
                // Run DR election.
                self.dr_election(instance, neighbors)
            }
            (_, Event::InterfaceDown(reason)) => {
                // Stop interface.
                self.stop(area, instance, neighbors, lsa_entries, *reason);
                State::Down
            }
            (_, Event::LoopInd) => {
                self.stop(
                    area,
                    instance,
                    neighbors,
                    lsa_entries,
                    InterfaceInactiveReason::LoopedBack,
                );
                State::Loopback
            }
            (State::Loopback, Event::UnloopInd) => {
                // No actions are necessary.
                State::Down
            }
            _ => {
                Error::IsmUnexpectedEvent(self.state.ism_state, event).log();
                return;
            }
        };

        // Check for FSM state change.
        if new_ism_state != self.state.ism_state {
            self.fsm_state_change(instance, new_ism_state);
        }
    }

    fn fsm_state_change(
        &mut self,
        instance: &InstanceUpView<'_>,
        new_ism_state: State,
    ) {
        // (Re)originate LSAs that might have been affected.
        instance.tx.protocol_input.lsa_orig_event(
            LsaOriginateEvent::InterfaceStateChange { iface_id: self.id },
        );
        if self.state.ism_state == ism::State::Dr {
            instance.tx.protocol_input.lsa_orig_event(
                LsaOriginateEvent::InterfaceDrChange { iface_id: self.id },
            );
        }

        // Effectively transition to the new FSM state.
        Debug::IsmTransition(&self.name, &self.state.ism_state, &new_ism_state)
            .log();
        self.state.ism_state = new_ism_state;

        // Join or leave OSPF multicast groups as necessary.
        self.update_mcast_groups();
    }

    pub(crate) fn hello_interval_start(
        &mut self,
        instance: &InstanceUpView<'_>,
    ) {
        let packet = self.generate_hello(instance);
        let interval = self.config.hello_interval;
        let task = tasks::hello_interval(self, packet, interval);
        self.state.tasks.hello_interval = Some(task);
    }

    // Generates an Hello packet reflecting the current interface state.
    pub(crate) fn generate_hello(
        &self,
        instance: &InstanceUpView<'_>,
    ) -> Packet {
        let hdr = PacketHdr::new(
            PacketType::Hello,
            instance.state.router_id,
            BACKBONE_AREA_ID,
        );
        let network_mask = match self.config.if_type {
            // RFC 2328 erratum: the mask is set to 0.0.0.0 on unnumbered
            // point-to-point links; numbered links advertise the real mask.
            InterfaceType::PointToPoint => Ipv4Addr::UNSPECIFIED,
            _ => self
                .system
                .primary_addr
                .map(|addr| addr.mask())
                .unwrap_or(Ipv4Addr::UNSPECIFIED),
        };

        Packet::Hello(Hello {
            hdr,
            network_mask,
            hello_interval: self.config.hello_interval,
            options: Options::E,
            priority: self.config.priority,
            dead_interval: self.config.dead_interval as u32,
            dr: self.state.dr,
            bdr: self.state.bdr,
            neighbors: self
                .state
                .neighbors
                .router_ids()
                .collect(),
        })
    }

    fn update_mcast_groups(&mut self) {
        let Some(net) = &self.state.net else {
            return;
        };
        let socket = net.socket.get_ref();
        let ifindex = self.system.ifindex.unwrap_or(0);

        // AllSPFRouters.
        if self.state.ism_state >= State::Waiting
            && !self.state.mcast_groups.contains(&MulticastAddr::AllSpfRtrs)
        {
            network::join_multicast(socket, MulticastAddr::AllSpfRtrs, ifindex);
            self.state.mcast_groups.insert(MulticastAddr::AllSpfRtrs);
        } else if self.state.ism_state < State::Waiting
            && self.state.mcast_groups.contains(&MulticastAddr::AllSpfRtrs)
        {
            network::leave_multicast(
                socket,
                MulticastAddr::AllSpfRtrs,
                ifindex,
            );
            self.state.mcast_groups.remove(&MulticastAddr::AllSpfRtrs);
        }

        // AllDRouters.
        if self.is_dr_or_backup()
            && !self.state.mcast_groups.contains(&MulticastAddr::AllDrRtrs)
        {
            network::join_multicast(socket, MulticastAddr::AllDrRtrs, ifindex);
            self.state.mcast_groups.insert(MulticastAddr::AllDrRtrs);
        } else if !self.is_dr_or_backup()
            && self.state.mcast_groups.contains(&MulticastAddr::AllDrRtrs)
        {
            network::leave_multicast(socket, MulticastAddr::AllDrRtrs, ifindex);
            self.state.mcast_groups.remove(&MulticastAddr::AllDrRtrs);
        }
    }

    // DR election, as specified in RFC 2328 section 9.4.
    fn dr_election(
        &mut self,
        instance: &InstanceUpView<'_>,
        neighbors: &Arena<Neighbor>,
    ) -> State {
        let router_id = instance.state.router_id;
        let my_addr = self.state.src_addr.unwrap();

        // Step 1: note the current values for the network's DR and BDR.
        let old_dr = self.state.dr;
        let old_bdr = self.state.bdr;

        // Step 2: calculate the new Backup Designated Router.
        let calc_bdr = |iface: &Interface| {
            iface
                .dr_eligible_routers(router_id, my_addr, neighbors)
                .filter(|rtr| rtr.dr != Some(rtr.addr))
                .filter(|rtr| rtr.bdr == Some(rtr.addr))
                .max_by_key(|rtr| (rtr.priority, rtr.router_id))
                .or_else(|| {
                    iface
                        .dr_eligible_routers(router_id, my_addr, neighbors)
                        .filter(|rtr| rtr.dr != Some(rtr.addr))
                        .max_by_key(|rtr| (rtr.priority, rtr.router_id))
                })
                .map(|rtr| rtr.addr)
        };
        let mut new_bdr = calc_bdr(self);

        // Step 3: calculate the new Designated Router.
        let calc_dr = |iface: &Interface, new_bdr: Option<Ipv4Addr>| {
            iface
                .dr_eligible_routers(router_id, my_addr, neighbors)
                .filter(|rtr| rtr.dr == Some(rtr.addr))
                .max_by_key(|rtr| (rtr.priority, rtr.router_id))
                .map(|rtr| rtr.addr)
                .or(new_bdr)
        };
        let mut new_dr = calc_dr(self, new_bdr);
        self.state.dr = new_dr;
        self.state.bdr = new_bdr;

        // Step 4: if the router is newly the DR/BDR, or newly no longer the
        // DR/BDR, repeat steps 2 and 3.
        if (new_dr == Some(my_addr) || old_dr == Some(my_addr))
            && new_dr != old_dr
            || (new_bdr == Some(my_addr) || old_bdr == Some(my_addr))
                && new_bdr != old_bdr
        {
            new_bdr = calc_bdr(self);
            new_dr = calc_dr(self, new_bdr);
            self.state.dr = new_dr;
            self.state.bdr = new_bdr;
        }

        // Step 5: set the interface state accordingly.
        Debug::IsmDrElection(&self.name, old_dr, new_dr, old_bdr, new_bdr)
            .log();
        let next_state = if new_dr == Some(my_addr) {
            ism::State::Dr
        } else if new_bdr == Some(my_addr) {
            ism::State::Backup
        } else {
            ism::State::DrOther
        };

        // Step 7: if the DR or BDR changed, invoke the AdjOK? event on all
        // neighbors whose state is at least 2-Way.
        if new_dr != old_dr || new_bdr != old_bdr {
            for nbr in self
                .state
                .neighbors
                .iter(neighbors)
                .filter(|nbr| nbr.state >= nsm::State::TwoWay)
            {
                instance.tx.protocol_input.nsm_event(
                    self.id,
                    nbr.id,
                    nsm::Event::AdjOk,
                );
            }

            // Synchronize interface's Hello Tx task (updated DR/BDR).
            self.sync_hello_tx(instance);
        }

        // If the DR changed, reoriginate LSAs that might have been affected.
        if new_dr != old_dr {
            instance.tx.protocol_input.lsa_orig_event(
                LsaOriginateEvent::InterfaceDrChange { iface_id: self.id },
            );
        }

        next_state
    }

    fn dr_eligible_routers<'a>(
        &'a self,
        router_id: Ipv4Addr,
        my_addr: Ipv4Addr,
        neighbors: &'a Arena<Neighbor>,
    ) -> impl Iterator<Item = DrCandidate> + 'a {
        let myself = (self.config.priority != 0).then_some(DrCandidate {
            router_id,
            addr: my_addr,
            dr: self.state.dr,
            bdr: self.state.bdr,
            priority: self.config.priority,
        });

        let nbrs = self
            .state
            .neighbors
            .iter(neighbors)
            .filter(|nbr| nbr.state >= nsm::State::TwoWay)
            .filter(|nbr| nbr.priority != 0)
            .map(|nbr| DrCandidate {
                router_id: nbr.router_id,
                addr: nbr.src,
                dr: nbr.dr,
                bdr: nbr.bdr,
                priority: nbr.priority,
            });

        myself.into_iter().chain(nbrs)
    }

    // Returns whether an adjacency should be established with the neighbor.
    pub(crate) fn need_adjacency(&self, nbr: &Neighbor) -> bool {
        match self.config.if_type {
            InterfaceType::PointToPoint | InterfaceType::Loopback => true,
            InterfaceType::Broadcast => {
                self.state.ism_state == State::Dr
                    || self.state.ism_state == State::Backup
                    || self.state.dr == Some(nbr.src)
                    || self.state.bdr == Some(nbr.src)
            }
        }
    }

    // Finds the neighbor matching the given packet source. On
    // point-to-point links neighbors are identified by their Router ID, on
    // broadcast networks by their interface address.
    pub(crate) fn get_neighbor<'a>(
        &mut self,
        neighbors: &'a mut Arena<Neighbor>,
        src: Ipv4Addr,
        router_id: Ipv4Addr,
    ) -> Option<(NeighborIndex, &'a mut Neighbor)> {
        match self.config.if_type {
            InterfaceType::PointToPoint | InterfaceType::Loopback => self
                .state
                .neighbors
                .get_mut_by_router_id(neighbors, router_id),
            InterfaceType::Broadcast => {
                self.state.neighbors.get_mut_by_addr(neighbors, src)
            }
        }
    }

    // Returns the maximum OSPF packet size that can be sent on this
    // interface.
    pub(crate) fn max_packet_size(&self) -> u16 {
        const IPV4_HDR_LENGTH: u16 = 20;

        self.system.mtu.unwrap_or(1500) - IPV4_HDR_LENGTH
    }

    pub(crate) fn enqueue_ls_update(
        &mut self,
        instance: &InstanceUpView<'_>,
        lsa_key: LsaKey,
        lsa: Arc<Lsa>,
    ) {
        self.state.ls_update_list.insert(lsa_key, lsa);

        // Start LS Update timeout if necessary.
        if self.state.tasks.ls_update_timer.is_none() {
            let task = tasks::ls_update_timer(self, instance);
            self.state.tasks.ls_update_timer = Some(task);
        }
    }

    pub(crate) fn enqueue_delayed_ack(
        &mut self,
        instance: &InstanceUpView<'_>,
        lsa_hdr: &LsaHdr,
    ) {
        self.state.ls_ack_list.insert(lsa_hdr.key(), *lsa_hdr);

        // Start delayed LS Ack timeout if necessary.
        if self.state.tasks.ls_delayed_ack.is_none() {
            let task = tasks::delayed_ack_timer(self, instance);
            self.state.tasks.ls_delayed_ack = Some(task);
        }
    }

    pub(crate) fn send_packet(&self, msg: NetTxPacketMsg) {
        let _ = self.state.net.as_ref().unwrap().net_tx_packetp.send(msg);
    }

    // Validates the IP destination address of a received packet.
    pub(crate) fn validate_packet_dst(
        &self,
        dst: Ipv4Addr,
    ) -> Result<(), Error> {
        // Accept AllSPFRouters unconditionally.
        if dst == *network::multicast_addr(MulticastAddr::AllSpfRtrs) {
            return Ok(());
        }

        // Packets addressed to AllDRouters are accepted only when acting as
        // DR or Backup.
        if dst == *network::multicast_addr(MulticastAddr::AllDrRtrs)
            && self.is_dr_or_backup()
        {
            return Ok(());
        }

        // Accept unicasts addressed to the interface.
        if Some(dst) == self.state.src_addr {
            return Ok(());
        }

        Err(Error::InvalidDstAddr(dst))
    }

    // Validates the IP source address of a received packet.
    pub(crate) fn validate_packet_src(
        &self,
        src: Ipv4Addr,
    ) -> Result<(), Error> {
        use nbrd_utils::ip::Ipv4AddrExt;

        if !src.is_usable() {
            return Err(Error::InvalidSrcAddr(src));
        }

        // On broadcast networks the sender must share a subnet with the
        // receiving interface.
        if self.is_broadcast()
            && !self
                .system
                .addr_list
                .iter()
                .any(|local| local.contains(src))
        {
            return Err(Error::InvalidSrcAddr(src));
        }

        Ok(())
    }

    // Validates a received Hello packet against the interface configuration.
    pub(crate) fn validate_hello(
        &self,
        hello: &Hello,
    ) -> Result<(), InterfaceCfgError> {
        // Check for network mask mismatch (skipped on point-to-point links).
        if self.is_broadcast()
            && let Some(primary_addr) = &self.system.primary_addr
            && hello.network_mask != primary_addr.mask()
        {
            return Err(InterfaceCfgError::HelloMaskMismatch(
                hello.network_mask,
                primary_addr.mask(),
            ));
        }

        // Check for HelloInterval mismatch.
        if hello.hello_interval != self.config.hello_interval {
            return Err(InterfaceCfgError::HelloIntervalMismatch(
                hello.hello_interval,
                self.config.hello_interval,
            ));
        }

        // Check for RouterDeadInterval mismatch.
        if hello.dead_interval != self.config.dead_interval as u32 {
            return Err(InterfaceCfgError::DeadIntervalMismatch(
                hello.dead_interval,
                self.config.dead_interval as u32,
            ));
        }

        Ok(())
    }

    // Applies a kernel interface update.
    pub(crate) fn system_update(
        &mut self,
        flags: InterfaceFlags,
        mtu: u16,
    ) {
        self.system.flags = flags;
        self.system.mtu = Some(mtu);
    }
}

impl Drop for Interface {
    fn drop(&mut self) {
        Debug::InterfaceDelete(&self.name).log();
    }
}

impl Default for InterfaceCfg {
    fn default() -> InterfaceCfg {
        InterfaceCfg {
            enabled: true,
            if_type: InterfaceType::Broadcast,
            cost: southbound::DFLT_COST,
            hello_interval: 10,
            dead_interval: 40,
            retransmit_interval: 5,
            transmit_delay: 1,
            priority: 1,
            passive: false,
            mtu_ignore: false,
            auth: None,
        }
    }
}

// ===== impl InterfaceNet =====

impl InterfaceNet {
    fn new(
        iface: &Interface,
        instance: &InstanceUpView<'_>,
    ) -> Result<Self, IoError> {
        // Create raw socket.
        let socket = nbrd_utils::socket::ospf_socket(&iface.name)
            .map_err(IoError::SocketError)
            .and_then(|socket| {
                AsyncFd::new(socket).map_err(IoError::SocketError)
            })
            .map(Arc::new)?;

        // Start network Tx/Rx tasks.
        let (net_tx_packetp, net_tx_packetc) = mpsc::unbounded_channel();
        let mut net_tx_task = tasks::net_tx(
            socket.clone(),
            iface,
            net_tx_packetc,
        );
        let net_rx_task = tasks::net_rx(
            socket.clone(),
            iface,
            &instance.tx.protocol_input.net_packet_rx,
        );

        // The network Tx task is detached so flushed self-originated LSAs
        // are still delivered while the instance terminates.
        net_tx_task.detach();

        Ok(InterfaceNet {
            socket,
            _net_tx_task: net_tx_task,
            _net_rx_task: net_rx_task,
            net_tx_packetp,
        })
    }
}

#[cfg(test)]
mod tests {
    use nbrd_protocol::{InstanceChannelsTx, ProtocolInstance};
    use nbrd_utils::ibus::ibus_channels;

    use super::*;
    use crate::instance::{Instance, InstanceCfg, InstanceState};

    // Three routers on a broadcast segment: ourselves with priority 10,
    // a neighbor with priority 20 that already claims to be the DR, and a
    // priority-0 neighbor that is not eligible at all. The election must
    // confirm the neighbor as DR and elect ourselves as Backup.
    #[tokio::test]
    async fn dr_election_on_broadcast_segment() {
        let my_addr = Ipv4Addr::new(10, 0, 1, 1);
        let dr_addr = Ipv4Addr::new(10, 0, 1, 2);

        // Set up an active instance view.
        let (ibus_tx, _ibus_rx) = ibus_channels();
        let (protocol_input_tx, _protocol_input_rx) =
            Instance::protocol_input_channels();
        let tx = InstanceChannelsTx::<Instance> {
            ibus: ibus_tx,
            protocol_input: protocol_input_tx,
        };
        let config = InstanceCfg::default();
        let mut state =
            InstanceState::new_test(Ipv4Addr::new(1, 1, 1, 1), &tx.protocol_input);
        let instance = crate::instance::InstanceUpView {
            name: "test",
            config: &config,
            state: &mut state,
            tx: &tx,
        };

        // Set up the receiving interface.
        let mut arenas = crate::instance::InstanceArenas::default();
        let (_, iface) =
            arenas.area.interfaces.insert(&mut arenas.interfaces, "eth0");
        iface.config.if_type = InterfaceType::Broadcast;
        iface.config.priority = 10;
        iface.system.flags =
            InterfaceFlags::OPERATIVE | InterfaceFlags::BROADCAST;
        iface.system.ifindex = Some(1);
        iface.system.mtu = Some(1500);
        iface.state.src_addr = Some(my_addr);
        iface.state.ism_state = ism::State::Waiting;

        // The DR-claiming neighbor.
        let (_, nbr) = iface.state.neighbors.insert(
            &mut arenas.neighbors,
            Ipv4Addr::new(2, 2, 2, 2),
            dr_addr,
        );
        nbr.state = nsm::State::TwoWay;
        nbr.priority = 20;
        nbr.dr = Some(dr_addr);

        // The ineligible neighbor.
        let (_, nbr) = iface.state.neighbors.insert(
            &mut arenas.neighbors,
            Ipv4Addr::new(3, 3, 3, 3),
            Ipv4Addr::new(10, 0, 1, 3),
        );
        nbr.state = nsm::State::TwoWay;
        nbr.priority = 0;

        // Run the election by expiring the wait timer.
        let (_, iface) = arenas
            .area
            .interfaces
            .get_mut_by_name(&mut arenas.interfaces, "eth0")
            .unwrap();
        iface.fsm(
            &arenas.area,
            &instance,
            &mut arenas.neighbors,
            &arenas.lsa_entries,
            ism::Event::WaitTimer,
        );

        assert_eq!(iface.state.dr, Some(dr_addr));
        assert_eq!(iface.state.bdr, Some(my_addr));
        assert_eq!(iface.state.ism_state, ism::State::Backup);
    }
}
