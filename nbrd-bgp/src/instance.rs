//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use nbrd_protocol::{
    InstanceChannelsTx, MessageReceiver, ProtocolInstance,
};
use nbrd_utils::ibus::IbusMsg;
use nbrd_utils::ip::AddressFamily;
use nbrd_utils::protocol::Protocol;
use nbrd_utils::socket::TcpListener;
use nbrd_utils::southbound::{DISTANCE_EBGP, DISTANCE_IBGP};
use nbrd_utils::task::{Task, TimeoutTask};
use nbrd_utils::{Receiver, Sender};
use tokio::sync::mpsc;

use crate::af::{Ipv4Unicast, Ipv6Unicast};
use crate::debug::Debug;
use crate::error::{Error, IoError};
use crate::neighbor::{Neighbor, NeighborCfg, Neighbors, PeerType, fsm};
use crate::packet::consts::{CeaseSubcode, ErrorCode};
use crate::packet::message::NotificationMsg;
use crate::rib::Rib;
use crate::tasks::messages::ProtocolInputMsg;
use crate::tasks::messages::input::{
    NbrRxMsg, NbrTimerMsg, TcpAcceptMsg, TcpConnectMsg,
};
use crate::{events, network, tasks};

#[derive(Debug)]
pub struct Instance {
    // Instance name.
    pub name: String,
    // Instance configuration data.
    pub config: InstanceCfg,
    // Instance state data.
    pub state: Option<InstanceState>,
    // Instance neighbors.
    pub neighbors: Neighbors,
    // Instance Tx channels.
    pub tx: InstanceChannelsTx<Instance>,
}

// Instance configuration, handed over by the supervisor at spawn time.
#[derive(Clone, Debug)]
pub struct InstanceCfg {
    // Local autonomous system number.
    pub asn: u32,
    // Explicitly configured BGP identifier.
    pub identifier: Option<Ipv4Addr>,
    // Administrative distances used when installing routes.
    pub distance_external: u8,
    pub distance_internal: u8,
    // Route selection knobs.
    pub route_selection: RouteSelectionCfg,
    // Per-neighbor configuration, keyed by remote address.
    pub neighbors: BTreeMap<IpAddr, NeighborCfg>,
}

// Route selection configuration.
#[derive(Clone, Debug, Default)]
pub struct RouteSelectionCfg {
    pub always_compare_med: bool,
}

#[derive(Debug)]
pub struct InstanceState {
    // BGP identifier.
    pub router_id: Ipv4Addr,
    // TCP listening sockets.
    pub listening_sockets: Vec<TcpListenerTask>,
    // Timeout to trigger the decision process.
    pub decision_process_task: Option<TimeoutTask>,
    // BGP RIB.
    pub rib: Rib,
}

#[derive(Debug)]
pub struct TcpListenerTask {
    pub af: AddressFamily,
    pub socket: Arc<TcpListener>,
    _task: Task<()>,
}

#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    // TCP accept event.
    pub tcp_accept: Sender<TcpAcceptMsg>,
    // TCP connect event.
    pub tcp_connect: Sender<TcpConnectMsg>,
    // TCP neighbor message.
    pub nbr_msg_rx: Sender<NbrRxMsg>,
    // Neighbor timeout event.
    pub nbr_timer: Sender<NbrTimerMsg>,
    // Decision Process triggering message.
    pub decision_process: Sender<()>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    pub tcp_accept: Receiver<TcpAcceptMsg>,
    pub tcp_connect: Receiver<TcpConnectMsg>,
    pub nbr_msg_rx: Receiver<NbrRxMsg>,
    pub nbr_timer: Receiver<NbrTimerMsg>,
    pub decision_process: Receiver<()>,
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

    // Starts the BGP instance.
    fn start(&mut self, router_id: Ipv4Addr) {
        Debug::InstanceStart.log();

        match InstanceState::new(router_id, &self.tx) {
            Ok(state) => {
                self.state = Some(state);

                // Start all configured neighbors.
                let (mut instance, neighbors) = self.as_up().unwrap();
                for nbr in neighbors
                    .values_mut()
                    .filter(|nbr| nbr.config.enabled)
                {
                    nbr.fsm_event(&mut instance, fsm::Event::Start);
                }
            }
            Err(error) => {
                Error::InstanceStartError(Box::new(error)).log();
            }
        }
    }

    // Stops the BGP instance, draining all established sessions.
    fn stop(&mut self) {
        let Some((mut instance, neighbors)) = self.as_up() else {
            return;
        };

        Debug::InstanceStop.log();

        // Stop neighbors, sending an Administrative Shutdown Cease
        // NOTIFICATION to each one.
        for nbr in neighbors.values_mut() {
            let msg = NotificationMsg::new(
                ErrorCode::Cease,
                CeaseSubcode::AdministrativeShutdown,
            );
            nbr.fsm_event(&mut instance, fsm::Event::Stop(Some(msg)));
        }

        // Clear instance state.
        self.state = None;
    }

    // Retrieves the BGP identifier from the configuration.
    fn get_router_id(&self) -> Option<Ipv4Addr> {
        self.config.identifier
    }

    // Returns a view struct for the instance if it is operational.
    pub(crate) fn as_up(
        &mut self,
    ) -> Option<(InstanceUpView<'_>, &mut Neighbors)> {
        if let Some(state) = &mut self.state {
            let instance = InstanceUpView {
                name: &self.name,
                config: &self.config,
                state,
                tx: &self.tx,
            };
            Some((instance, &mut self.neighbors))
        } else {
            None
        }
    }
}

impl ProtocolInstance for Instance {
    const PROTOCOL: Protocol = Protocol::BGP;

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
            neighbors: Default::default(),
            tx,
        };

        // Create the configured neighbors.
        let local_asn = instance.config.asn;
        for (remote_addr, nbr_cfg) in instance.config.neighbors.clone() {
            let peer_type = if nbr_cfg.peer_as == local_asn {
                PeerType::Internal
            } else {
                PeerType::External
            };
            let nbr = Neighbor::new(
                remote_addr,
                peer_type,
                nbr_cfg,
                instance.tx.protocol_input.nbr_timer.clone(),
            );
            instance.neighbors.insert(remote_addr, nbr);
        }

        instance
    }

    fn init(&mut self) {
        self.update();
    }

    fn shutdown(mut self) {
        // Drain all sessions before exiting.
        self.stop();
    }

    fn process_ibus_msg(&mut self, msg: IbusMsg) {
        match msg {
            IbusMsg::RouterIdUpdate(router_id) => {
                // The configured BGP identifier takes precedence.
                if self.config.identifier.is_none() {
                    self.config.identifier = router_id;
                    self.update();
                }
            }
            IbusMsg::NexthopUpd { addr, metric } => {
                if let Some((mut instance, _)) = self.as_up()
                    && let Err(error) =
                        events::process_nht_update(&mut instance, addr, metric)
                {
                    error.log();
                }
            }
            // Ignore other events.
            _ => {}
        }
    }

    fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        // Ignore event if the instance isn't active.
        if let Some((mut instance, neighbors)) = self.as_up()
            && let Err(error) =
                process_protocol_msg(&mut instance, neighbors, msg)
        {
            error.log();
        }
    }

    fn protocol_input_channels()
    -> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
        let (tcp_acceptp, tcp_acceptc) = mpsc::channel(4);
        let (tcp_connectp, tcp_connectc) = mpsc::channel(4);
        let (nbr_msg_rxp, nbr_msg_rxc) = mpsc::channel(4);
        let (nbr_timerp, nbr_timerc) = mpsc::channel(4);
        let (decision_processp, decision_processc) = mpsc::channel(1);

        let tx = ProtocolInputChannelsTx {
            tcp_accept: tcp_acceptp,
            tcp_connect: tcp_connectp,
            nbr_msg_rx: nbr_msg_rxp,
            nbr_timer: nbr_timerp,
            decision_process: decision_processp,
        };
        let rx = ProtocolInputChannelsRx {
            tcp_accept: tcp_acceptc,
            tcp_connect: tcp_connectc,
            nbr_msg_rx: nbr_msg_rxc,
            nbr_timer: nbr_timerc,
            decision_process: decision_processc,
        };

        (tx, rx)
    }
}

// ===== impl InstanceCfg =====

impl Default for InstanceCfg {
    fn default() -> InstanceCfg {
        InstanceCfg {
            asn: 0,
            identifier: None,
            distance_external: DISTANCE_EBGP,
            distance_internal: DISTANCE_IBGP,
            route_selection: Default::default(),
            neighbors: Default::default(),
        }
    }
}

// ===== impl InstanceState =====

impl InstanceState {
    fn new(
        router_id: Ipv4Addr,
        instance_tx: &InstanceChannelsTx<Instance>,
    ) -> Result<InstanceState, Error> {
        let mut listening_sockets = Vec::new();

        // Create TCP listeners.
        for af in [AddressFamily::Ipv4, AddressFamily::Ipv6] {
            let socket = network::listen_socket(af)
                .map(Arc::new)
                .map_err(IoError::TcpSocketError)?;
            let task = tasks::tcp_listener(
                &socket,
                &instance_tx.protocol_input.tcp_accept,
            );
            listening_sockets.push(TcpListenerTask {
                af,
                socket,
                _task: task,
            });
        }

        Ok(InstanceState {
            router_id,
            listening_sockets,
            decision_process_task: None,
            rib: Default::default(),
        })
    }

    // Schedules the BGP Decision Process to run shortly, renewing the
    // timeout when called before expiry.
    pub(crate) fn schedule_decision_process(
        &mut self,
        instance_tx: &InstanceChannelsTx<Instance>,
    ) {
        let task = tasks::schedule_decision_process(
            &instance_tx.protocol_input.decision_process,
        );
        self.decision_process_task = Some(task);
    }
}

// ===== impl ProtocolInputChannelsTx =====

impl ProtocolInputChannelsTx {
    // Triggers the BGP Decision Process.
    pub(crate) fn trigger_decision_process(&self) {
        let _ = self.decision_process.try_send(());
    }
}

// ===== impl ProtocolInputChannelsRx =====

impl MessageReceiver<ProtocolInputMsg> for ProtocolInputChannelsRx {
    async fn recv(&mut self) -> Option<ProtocolInputMsg> {
        tokio::select! {
            biased;
            msg = self.tcp_accept.recv() => {
                msg.map(ProtocolInputMsg::TcpAccept)
            }
            msg = self.tcp_connect.recv() => {
                msg.map(ProtocolInputMsg::TcpConnect)
            }
            msg = self.nbr_msg_rx.recv() => {
                msg.map(ProtocolInputMsg::NbrRx)
            }
            msg = self.nbr_timer.recv() => {
                msg.map(ProtocolInputMsg::NbrTimer)
            }
            msg = self.decision_process.recv() => {
                msg.map(|_| ProtocolInputMsg::TriggerDecisionProcess)
            }
        }
    }
}

// ===== helper functions =====

fn process_protocol_msg(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    msg: ProtocolInputMsg,
) -> Result<(), Error> {
    match msg {
        // Accepted TCP connection request.
        ProtocolInputMsg::TcpAccept(mut msg) => {
            events::process_tcp_accept(
                instance,
                neighbors,
                msg.stream(),
                msg.conn_info,
            )?;
        }
        // Established TCP connection.
        ProtocolInputMsg::TcpConnect(mut msg) => {
            events::process_tcp_connect(
                instance,
                neighbors,
                msg.stream(),
                msg.conn_info,
            )?;
        }
        // Received message from neighbor.
        ProtocolInputMsg::NbrRx(msg) => {
            events::process_nbr_msg(
                instance,
                neighbors,
                msg.nbr_addr,
                msg.msg,
            )?;
        }
        // Neighbor's timeout has expired.
        ProtocolInputMsg::NbrTimer(msg) => {
            events::process_nbr_timer(
                instance,
                neighbors,
                msg.nbr_addr,
                msg.timer,
            )?;
        }
        // Decision process.
        ProtocolInputMsg::TriggerDecisionProcess => {
            events::decision_process::<Ipv4Unicast>(instance, neighbors)?;
            events::decision_process::<Ipv6Unicast>(instance, neighbors)?;
        }
    }

    Ok(())
}
