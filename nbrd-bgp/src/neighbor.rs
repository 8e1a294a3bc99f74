//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use nbrd_protocol::InstanceChannelsTx;
use nbrd_utils::Sender;
use nbrd_utils::ibus::IbusChannelsTx;
use nbrd_utils::policy::{DefaultPolicy, Policy};
use nbrd_utils::socket::{TcpConnInfo, TcpStream};
use nbrd_utils::task::{IntervalTask, Task, TimeoutTask};
use nbrd_utils::UnboundedSender;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::af::{AddressFamily, Ipv4Unicast, Ipv6Unicast};
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::{Instance, InstanceUpView};
use crate::packet::attribute::Attrs;
use crate::packet::consts::{
    AS_TRANS, Afi, BGP_VERSION, CeaseSubcode, ErrorCode, FsmErrorSubcode,
    Safi,
};
use crate::packet::message::{
    Capability, DecodeCxt, EncodeCxt, KeepaliveMsg, Message,
    NegotiatedCapability, NotificationMsg, OpenMsg,
};
use crate::rib::{
    DFLT_MIN_ROUTE_ADV_INTERVAL_EBGP, DFLT_MIN_ROUTE_ADV_INTERVAL_IBGP, Rib,
    Route, RouteOrigin, RouteType,
};
use crate::tasks::messages::input::{NbrRxMsg, NbrTimerMsg, TcpConnectMsg};
use crate::tasks::messages::output::NbrTxMsg;
use crate::{events, rib, tasks};

// Large hold-time used during session initialization.
const LARGE_HOLDTIME: u16 = 240;

// Ceiling for the exponentially increasing idle hold time.
const IDLE_HOLDTIME_MAX: u16 = 120;

// BGP neighbor.
#[derive(Debug)]
pub struct Neighbor {
    pub remote_addr: IpAddr,
    pub config: NeighborCfg,
    pub state: fsm::State,
    pub peer_type: PeerType,
    pub conn_info: Option<TcpConnInfo>,
    pub identifier: Option<Ipv4Addr>,
    pub holdtime_nego: Option<u16>,
    pub capabilities_adv: BTreeSet<Capability>,
    pub capabilities_rcvd: BTreeSet<Capability>,
    pub capabilities_nego: BTreeSet<NegotiatedCapability>,
    pub notification_sent: Option<(DateTime<Utc>, NotificationMsg)>,
    pub notification_rcvd: Option<(DateTime<Utc>, NotificationMsg)>,
    pub last_established: Option<DateTime<Utc>>,
    // Idle hold time, doubling on each consecutive session collapse.
    pub idle_holdtime: u16,
    pub statistics: NeighborStatistics,
    pub tasks: NeighborTasks,
    pub update_queues: NeighborUpdateQueues,
    pub msg_txp: Option<UnboundedSender<NbrTxMsg>>,
    // Timer input channel, kept at hand for restarting the MRAI timer.
    pub nbr_timerp: Sender<NbrTimerMsg>,
}

// BGP neighbor configuration.
#[derive(Clone, Debug)]
pub struct NeighborCfg {
    pub enabled: bool,
    pub peer_as: u32,
    pub local_addr: Option<IpAddr>,
    pub holdtime: u16,
    pub keepalive: Option<u16>,
    pub connect_retry_interval: u16,
    pub min_route_adv_interval: Option<u16>,
    pub afi_safi_ipv4: bool,
    pub afi_safi_ipv6: bool,
    pub route_refresh: bool,
    pub asn4: bool,
    pub import_policy: Option<Policy>,
    pub export_policy: Option<Policy>,
    pub default_import_policy: DefaultPolicy,
    pub default_export_policy: DefaultPolicy,
}

// BGP peer type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PeerType {
    Internal,
    External,
}

// Neighbor statistics.
#[derive(Debug, Default)]
pub struct NeighborStatistics {
    pub established_transitions: u32,
    pub msgs_rcvd: u64,
    pub msgs_sent: u64,
    pub updates_rcvd: u64,
    pub updates_sent: u64,
    pub routes_rejected_by_policy: u64,
}

// Neighbor tasks.
#[derive(Debug, Default)]
pub struct NeighborTasks {
    pub autostart: Option<TimeoutTask>,
    pub connect: Option<Task<()>>,
    pub connect_retry: Option<TimeoutTask>,
    pub tcp_rx: Option<Task<()>>,
    pub keepalive: Option<IntervalTask>,
    pub holdtime: Option<TimeoutTask>,
    pub mrai: Option<TimeoutTask>,
}

// Neighbor Tx update queues.
#[derive(Debug, Default)]
pub struct NeighborUpdateQueues {
    pub ipv4_unicast: NeighborUpdateQueue<Ipv4Unicast>,
    pub ipv6_unicast: NeighborUpdateQueue<Ipv6Unicast>,
}

// Neighbor Tx update queue for one address family.
//
// Advertisements of a prefix are rate limited by the
// MinRouteAdvertisementInterval; withdrawals are not. A queued
// advertisement cancels a queued withdrawal of the same prefix and vice
// versa, so the two are never in flight in the wrong order.
#[derive(Debug)]
pub struct NeighborUpdateQueue<A: AddressFamily> {
    // Prefixes ready for advertisement, grouped by attributes.
    pub reach: BTreeMap<Attrs, BTreeSet<A::IpNetwork>>,
    // Prefixes ready for withdrawal.
    pub unreach: BTreeSet<A::IpNetwork>,
    // Advertisements held back by the MRAI.
    pub pending: BTreeMap<A::IpNetwork, Attrs>,
    // Time each prefix was last advertised.
    pub advertised_at: HashMap<A::IpNetwork, Instant>,
}

// Type aliases.
pub type Neighbors = BTreeMap<IpAddr, Neighbor>;

// Finite State Machine.
pub mod fsm {
    use nbrd_utils::socket::{TcpConnInfo, TcpStream};
    use serde::{Deserialize, Serialize};

    use crate::packet::error::DecodeError;
    use crate::packet::message::{NotificationMsg, OpenMsg};

    // FSM states.
    #[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        Idle,
        Connect,
        Active,
        OpenSent,
        OpenConfirm,
        Established,
    }

    // FSM events.
    //
    // The corresponding RFC 4271 FSM events are listed above each variant.
    #[derive(Debug)]
    pub enum Event {
        // ManualStart, AutomaticStart
        Start,
        // ManualStop
        Stop(Option<NotificationMsg>),
        // Tcp_CR_Acked, TcpConnectionConfirmed
        Connected(TcpStream, TcpConnInfo),
        // TcpConnectionFails
        ConnFail,
        // BGPHeaderErr, BGPOpenMsgErr, UpdateMsgErr
        RcvdError(DecodeError),
        // BGPOpen
        RcvdOpen(OpenMsg),
        // NotifMsg
        RcvdNotif(NotificationMsg),
        // KeepAliveMsg
        RcvdKalive,
        // UpdateMsg
        RcvdUpdate,
        // ConnectRetryTimer_Expires, HoldTimer_Expires, AutomaticStart,
        // MRAI expiry
        Timer(Timer),
    }

    // BGP timers.
    //
    // KEEPALIVE messages are sent independently, outside of the FSM.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Timer {
        ConnectRetry,
        Hold,
        AutoStart,
        Mrai,
    }
}

// ===== impl Neighbor =====

impl Neighbor {
    // Creates a new neighbor in the Idle state.
    pub(crate) fn new(
        remote_addr: IpAddr,
        peer_type: PeerType,
        config: NeighborCfg,
        nbr_timerp: Sender<NbrTimerMsg>,
    ) -> Neighbor {
        Neighbor {
            remote_addr,
            config,
            state: fsm::State::Idle,
            peer_type,
            conn_info: None,
            identifier: None,
            holdtime_nego: None,
            capabilities_adv: Default::default(),
            capabilities_rcvd: Default::default(),
            capabilities_nego: Default::default(),
            notification_sent: None,
            notification_rcvd: None,
            last_established: None,
            idle_holdtime: 1,
            statistics: Default::default(),
            tasks: Default::default(),
            update_queues: Default::default(),
            msg_txp: None,
            nbr_timerp,
        }
    }

    // Injects an event into the neighbor's FSM.
    pub(crate) fn fsm_event(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        event: fsm::Event,
    ) {
        Debug::NbrFsmEvent(&self.remote_addr, &event).log();

        // Process FSM event.
        let rib = &mut instance.state.rib;
        let next_state = match self.state {
            // Idle state
            fsm::State::Idle => match event {
                fsm::Event::Start
                | fsm::Event::Timer(fsm::Timer::AutoStart) => {
                    self.connect_retry_start(
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    self.connect(&instance.tx.protocol_input.tcp_connect);
                    Some(fsm::State::Connect)
                }
                _ => None,
            },
            // Connect state
            fsm::State::Connect => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(rib, instance.tx, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::Connected(stream, conn_info) => {
                    self.connect_retry_stop();
                    self.connection_setup(
                        stream,
                        conn_info,
                        &instance.tx.protocol_input.nbr_msg_rx,
                    );
                    self.open_send(
                        instance.config.asn,
                        instance.state.router_id,
                    );
                    self.holdtime_start(
                        LARGE_HOLDTIME,
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    Some(fsm::State::OpenSent)
                }
                fsm::Event::ConnFail => {
                    self.session_close(rib, instance.tx, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(rib, instance.tx, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::ConnectRetry) => {
                    self.connect(&instance.tx.protocol_input.tcp_connect);
                    self.connect_retry_start(
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    None
                }
                _ => {
                    // FSM error.
                    self.session_close(rib, instance.tx, None);
                    Some(fsm::State::Idle)
                }
            },
            // Active state
            fsm::State::Active => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(rib, instance.tx, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::Connected(stream, conn_info) => {
                    self.connect_retry_stop();
                    self.connection_setup(
                        stream,
                        conn_info,
                        &instance.tx.protocol_input.nbr_msg_rx,
                    );
                    self.open_send(
                        instance.config.asn,
                        instance.state.router_id,
                    );
                    self.holdtime_start(
                        LARGE_HOLDTIME,
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    Some(fsm::State::OpenSent)
                }
                fsm::Event::ConnFail => {
                    self.session_close(rib, instance.tx, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(rib, instance.tx, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::ConnectRetry) => {
                    self.connect(&instance.tx.protocol_input.tcp_connect);
                    self.connect_retry_start(
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    Some(fsm::State::Connect)
                }
                _ => {
                    // FSM error.
                    self.session_close(rib, instance.tx, None);
                    Some(fsm::State::Idle)
                }
            },
            // OpenSent state
            fsm::State::OpenSent => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(rib, instance.tx, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::ConnFail => {
                    self.session_close(rib, instance.tx, None);
                    self.connect_retry_start(
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    Some(fsm::State::Active)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(rib, instance.tx, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdOpen(msg) => {
                    let next_state = self.open_process(instance, msg);
                    Some(next_state)
                }
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    let msg =
                        NotificationMsg::new(ErrorCode::HoldTimerExpired, 0);
                    self.session_close(rib, instance.tx, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::Mrai) => None,
                _ => {
                    // FSM error.
                    let msg = NotificationMsg::new(
                        ErrorCode::FiniteStateMachineError,
                        FsmErrorSubcode::UnexpectedMessageInOpenSent,
                    );
                    self.session_close(rib, instance.tx, Some(msg));
                    Some(fsm::State::Idle)
                }
            },
            // OpenConfirm state
            fsm::State::OpenConfirm => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(rib, instance.tx, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::ConnFail => {
                    self.session_close(rib, instance.tx, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(rib, instance.tx, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdOpen(_) => {
                    // An OPEN on the original connection at this point means
                    // the collision resolution procedure closed it.
                    let msg = NotificationMsg::new(
                        ErrorCode::Cease,
                        CeaseSubcode::ConnectionCollisionResolution,
                    );
                    self.session_close(rib, instance.tx, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdNotif(_) => {
                    self.session_close(rib, instance.tx, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdKalive => {
                    self.holdtime_restart();
                    Some(fsm::State::Established)
                }
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    let msg =
                        NotificationMsg::new(ErrorCode::HoldTimerExpired, 0);
                    self.session_close(rib, instance.tx, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::Mrai) => None,
                _ => {
                    // FSM error.
                    let msg = NotificationMsg::new(
                        ErrorCode::FiniteStateMachineError,
                        FsmErrorSubcode::UnexpectedMessageInOpenConfirm,
                    );
                    self.session_close(rib, instance.tx, Some(msg));
                    Some(fsm::State::Idle)
                }
            },
            // Established state
            fsm::State::Established => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(rib, instance.tx, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::ConnFail => {
                    self.session_close(rib, instance.tx, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(rib, instance.tx, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdNotif(_) => {
                    self.session_close(rib, instance.tx, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdKalive | fsm::Event::RcvdUpdate => {
                    self.holdtime_restart();
                    None
                }
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    let msg =
                        NotificationMsg::new(ErrorCode::HoldTimerExpired, 0);
                    self.session_close(rib, instance.tx, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::Mrai) => {
                    self.mrai_expiry();
                    None
                }
                _ => {
                    // FSM error.
                    let msg = NotificationMsg::new(
                        ErrorCode::FiniteStateMachineError,
                        FsmErrorSubcode::UnexpectedMessageInEstablished,
                    );
                    self.session_close(rib, instance.tx, Some(msg));
                    Some(fsm::State::Idle)
                }
            },
        };

        // Change to next FSM state when applicable.
        if let Some(next_state) = next_state
            && self.state != next_state
        {
            // Schedule auto-start unless the peer was manually disabled,
            // doubling the idle hold time on each consecutive collapse.
            if next_state == fsm::State::Idle && self.config.enabled {
                self.autostart_start(&instance.tx.protocol_input.nbr_timer);
                self.idle_holdtime =
                    std::cmp::min(self.idle_holdtime * 2, IDLE_HOLDTIME_MAX);
            } else {
                self.autostart_stop();
            }

            self.fsm_state_change(instance, next_state);
        }
    }

    // Updates the neighbor's FSM state.
    fn fsm_state_change(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        next_state: fsm::State,
    ) {
        Debug::NbrFsmTransition(&self.remote_addr, &self.state, &next_state)
            .log();

        // Keep track of the time the session last transitioned in or out
        // of the Established state.
        if self.state == fsm::State::Established
            || next_state == fsm::State::Established
        {
            self.last_established = Some(Utc::now());
        }

        if next_state == fsm::State::Established {
            // Update statistics and reset the idle hold backoff.
            self.statistics.established_transitions += 1;
            self.idle_holdtime = 1;

            // Initialize session.
            self.session_init(instance);
        }

        self.state = next_state;
    }

    // Sets up the TCP connection of the neighbor, spawning the Rx/Tx
    // tasks.
    pub(crate) fn connection_setup(
        &mut self,
        stream: TcpStream,
        conn_info: TcpConnInfo,
        nbr_msg_rxp: &Sender<NbrRxMsg>,
    ) {
        // Store TCP connection information.
        self.conn_info = Some(conn_info);

        // Split the TCP stream into two halves.
        let (read_half, write_half) = stream.into_split();

        // Spawn neighbor TCP Tx task.
        let (msg_txp, msg_txc) = mpsc::unbounded_channel();
        let cxt = EncodeCxt {
            capabilities: Default::default(),
        };
        let mut tx_task = tasks::nbr_tx(self, cxt, write_half, msg_txc);
        self.msg_txp = Some(msg_txp);

        // Spawn neighbor TCP Rx task.
        let cxt = DecodeCxt {
            peer_type: self.peer_type,
            peer_as: self.config.peer_as,
            capabilities: Default::default(),
        };
        let tcp_rx_task = tasks::nbr_rx(self, cxt, read_half, nbr_msg_rxp);
        self.tasks.tcp_rx = Some(tcp_rx_task);

        // The Tx task exits gracefully as soon as the sending end of its
        // channel is dropped, ensuring messages sent during neighbor
        // shutdown are delivered.
        tx_task.detach();
    }

    // Initializes the BGP session after it reaches Established.
    fn session_init(&mut self, instance: &mut InstanceUpView<'_>) {
        // Compute the negotiated capabilities.
        self.capabilities_nego = self
            .capabilities_adv
            .iter()
            .map(|cap| cap.as_negotiated())
            .collect::<BTreeSet<_>>()
            .intersection(
                &self
                    .capabilities_rcvd
                    .iter()
                    .map(|cap| cap.as_negotiated())
                    .collect::<BTreeSet<_>>(),
            )
            .cloned()
            .collect();

        // Update the Tx task with the negotiated capabilities.
        let msg = NbrTxMsg::UpdateCapabilities(self.capabilities_nego.clone());
        let _ = self.msg_txp.as_ref().unwrap().send(msg);

        // Send initial routing updates.
        self.initial_routing_update::<Ipv4Unicast>(instance);
        self.initial_routing_update::<Ipv6Unicast>(instance);
    }

    // Closes the BGP session, releasing all associated resources.
    fn session_close(
        &mut self,
        rib: &mut Rib,
        instance_tx: &InstanceChannelsTx<Instance>,
        send_notif: Option<NotificationMsg>,
    ) {
        // Send a notification message.
        if self.state >= fsm::State::OpenSent
            && let Some(msg) = send_notif
        {
            self.message_send(Message::Notification(msg));
        }

        // Set the ConnectRetryTimer to zero.
        self.connect_retry_stop();

        // Release all resources.
        self.conn_info = None;
        self.identifier = None;
        self.holdtime_nego = None;
        self.capabilities_adv.clear();
        self.capabilities_rcvd.clear();
        self.capabilities_nego.clear();
        self.clear_routes::<Ipv4Unicast>(rib, &instance_tx.ibus);
        self.clear_routes::<Ipv6Unicast>(rib, &instance_tx.ibus);
        self.tasks = Default::default();
        self.update_queues = Default::default();
        self.msg_txp = None;

        // Trigger the BGP Decision Process.
        instance_tx.protocol_input.trigger_decision_process();
    }

    // Enqueues a single BGP message for transmission.
    pub(crate) fn message_send(&mut self, msg: Message) {
        Debug::NbrMsgTx(&self.remote_addr, &msg).log();

        // Update statistics.
        self.statistics.msgs_sent += 1;
        if let Message::Update(_) = &msg {
            self.statistics.updates_sent += 1;
        }

        // Keep track of the last sent notification.
        if let Message::Notification(msg) = &msg {
            self.notification_sent = Some((Utc::now(), msg.clone()));
        }

        // Errors are ignored as the connection might have gone down
        // already.
        let nbr_addr = self.remote_addr;
        let msg = NbrTxMsg::SendMessage { nbr_addr, msg };
        if let Some(msg_txp) = &self.msg_txp {
            let _ = msg_txp.send(msg);
        }
    }

    // Enqueues a list of BGP messages for transmission.
    pub(crate) fn message_list_send(&mut self, msg_list: Vec<Message>) {
        for msg in msg_list {
            self.message_send(msg);
        }
    }

    // Sends a BGP OPEN message based on the local configuration.
    fn open_send(&mut self, local_asn: u32, identifier: Ipv4Addr) {
        let mut capabilities = BTreeSet::new();

        // Multiprotocol capabilities.
        if self.config.afi_safi_ipv4 {
            capabilities.insert(Capability::MultiProtocol {
                afi: Afi::Ipv4,
                safi: Safi::Unicast,
            });
        }
        if self.config.afi_safi_ipv6 {
            capabilities.insert(Capability::MultiProtocol {
                afi: Afi::Ipv6,
                safi: Safi::Unicast,
            });
        }

        // Route-Refresh capability.
        if self.config.route_refresh {
            capabilities.insert(Capability::RouteRefresh);
        }

        // 4-octet AS number capability.
        if self.config.asn4 {
            capabilities
                .insert(Capability::FourOctetAsNumber { asn: local_asn });
        }

        // Keep track of the advertised capabilities.
        self.capabilities_adv.clone_from(&capabilities);

        // Fill-in and send message.
        let msg = Message::Open(OpenMsg {
            version: BGP_VERSION,
            my_as: local_asn.try_into().unwrap_or(AS_TRANS),
            holdtime: self.config.holdtime,
            identifier,
            capabilities,
        });
        self.message_send(msg);
    }

    // Processes the received OPEN message while in the OpenSent state.
    fn open_process(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        msg: OpenMsg,
    ) -> fsm::State {
        use crate::packet::consts::OpenMessageErrorSubcode as ErrorSubcode;

        // Validate the received message.
        if let Err(error) = self.open_validate(instance, &msg) {
            error.log();

            // Close the session.
            let msg = match error {
                Error::NbrBadAs(..) => Some(NotificationMsg::new(
                    ErrorCode::OpenMessageError,
                    ErrorSubcode::BadPeerAs,
                )),
                Error::NbrBadIdentifier(..) => Some(NotificationMsg::new(
                    ErrorCode::OpenMessageError,
                    ErrorSubcode::BadBgpIdentifier,
                )),
                _ => None,
            };
            self.session_close(&mut instance.state.rib, instance.tx, msg);

            // Transition to the Idle state.
            return fsm::State::Idle;
        }

        // Calculate negotiated hold-time.
        let holdtime_nego = std::cmp::min(msg.holdtime, self.config.holdtime);

        // Set the ConnectRetryTimer to zero.
        self.connect_retry_stop();

        // Send Keepalive message.
        self.message_send(Message::Keepalive(KeepaliveMsg {}));

        // Start Keepalive interval and session hold timer.
        if holdtime_nego != 0 {
            self.keepalive_interval_start(holdtime_nego);
            self.holdtime_start(
                holdtime_nego,
                &instance.tx.protocol_input.nbr_timer,
            );
        } else {
            self.holdtime_stop();
        }

        // Keep track of the received data.
        self.identifier = Some(msg.identifier);
        self.holdtime_nego = (holdtime_nego != 0).then_some(holdtime_nego);
        self.capabilities_rcvd = msg.capabilities;

        // Transition to the OpenConfirm state.
        fsm::State::OpenConfirm
    }

    // Performs semantic validation of the received BGP OPEN message.
    fn open_validate(
        &self,
        instance: &InstanceUpView<'_>,
        msg: &OpenMsg,
    ) -> Result<(), Error> {
        // Validate ASN.
        if self.config.peer_as != msg.real_as() {
            return Err(Error::NbrBadAs(
                self.remote_addr,
                msg.real_as(),
                self.config.peer_as,
            ));
        }

        // Validate BGP identifier for internal peers.
        if self.peer_type == PeerType::Internal
            && msg.identifier == instance.state.router_id
        {
            return Err(Error::NbrBadIdentifier(
                self.remote_addr,
                msg.identifier,
            ));
        }

        Ok(())
    }

    // Resolves a connection collision, deciding whether the new incoming
    // connection should replace the existing one (RFC 4271 section 6.8).
    //
    // The connection initiated by the speaker with the numerically larger
    // BGP Identifier is preserved. When the remote identifier isn't known
    // yet (OPEN not received), the existing connection is kept and the
    // remote end is expected to resolve the collision on its side.
    pub(crate) fn collision_resolve(&self, local_id: Ipv4Addr) -> bool {
        match self.identifier {
            Some(remote_id) => remote_id > local_id,
            None => false,
        }
    }

    // Starts the auto-start timer.
    fn autostart_start(&mut self, nbr_timerp: &Sender<NbrTimerMsg>) {
        let task = tasks::nbr_timer(
            self,
            fsm::Timer::AutoStart,
            self.idle_holdtime,
            nbr_timerp,
        );
        self.tasks.autostart = Some(task);
    }

    // Stops the auto-start timer.
    fn autostart_stop(&mut self) {
        self.tasks.autostart = None;
    }

    // Starts a TCP connection task towards the neighbor.
    fn connect(&mut self, tcp_connectp: &Sender<TcpConnectMsg>) {
        let task = tasks::tcp_connect(self, tcp_connectp);
        self.tasks.connect = Some(task);
    }

    // Starts the Keepalive Tx interval (negotiated hold time / 3).
    fn keepalive_interval_start(&mut self, holdtime_nego: u16) {
        let interval = self
            .config
            .keepalive
            .unwrap_or_else(|| std::cmp::max(holdtime_nego / 3, 1));
        let task = tasks::nbr_kalive_interval(self, interval);
        self.tasks.keepalive = Some(task);
    }

    // Starts the session hold timer.
    fn holdtime_start(
        &mut self,
        seconds: u16,
        nbr_timerp: &Sender<NbrTimerMsg>,
    ) {
        let task =
            tasks::nbr_timer(self, fsm::Timer::Hold, seconds, nbr_timerp);
        self.tasks.holdtime = Some(task);
    }

    // Restarts the session hold timer (noop when the negotiated hold time
    // is zero).
    fn holdtime_restart(&mut self) {
        if let Some(holdtime) = self.tasks.holdtime.as_mut() {
            holdtime.reset(None);
        }
    }

    // Stops the session hold timer.
    fn holdtime_stop(&mut self) {
        self.tasks.holdtime = None;
    }

    // Starts the connect retry timer.
    fn connect_retry_start(&mut self, nbr_timerp: &Sender<NbrTimerMsg>) {
        let task = tasks::nbr_timer(
            self,
            fsm::Timer::ConnectRetry,
            self.config.connect_retry_interval,
            nbr_timerp,
        );
        self.tasks.connect_retry = Some(task);
    }

    // Stops the connect retry timer.
    fn connect_retry_stop(&mut self) {
        self.tasks.connect_retry = None;
    }

    // Returns the MRAI applied to this neighbor, in seconds.
    pub(crate) fn mrai(&self) -> u16 {
        self.config.min_route_adv_interval.unwrap_or(match self.peer_type {
            PeerType::Internal => DFLT_MIN_ROUTE_ADV_INTERVAL_IBGP,
            PeerType::External => DFLT_MIN_ROUTE_ADV_INTERVAL_EBGP,
        })
    }

    // Schedules the advertisement of a route, subject to the MRAI.
    pub(crate) fn enqueue_advertisement<A>(
        &mut self,
        prefix: A::IpNetwork,
        attrs: Attrs,
    ) where
        A: AddressFamily,
    {
        let mrai = self.mrai();
        let queue = A::update_queue(&mut self.update_queues);

        // A pending advertisement cancels a pending withdrawal.
        queue.unreach.remove(&prefix);

        if mrai != 0
            && let Some(advertised_at) = queue.advertised_at.get(&prefix)
        {
            let due = *advertised_at + Duration::from_secs(mrai.into());
            if due > Instant::now() {
                // Hold the advertisement back until the MRAI expires.
                queue.pending.insert(prefix, attrs);
                self.mrai_start(due);
                return;
            }
        }

        queue.reach.entry(attrs).or_default().insert(prefix);
        queue.advertised_at.insert(prefix, Instant::now());
    }

    // Schedules the withdrawal of a route. Withdrawals are not rate
    // limited and cancel any pending advertisement of the prefix.
    pub(crate) fn enqueue_withdrawal<A>(&mut self, prefix: A::IpNetwork)
    where
        A: AddressFamily,
    {
        let queue = A::update_queue(&mut self.update_queues);

        queue.pending.remove(&prefix);
        for prefixes in queue.reach.values_mut() {
            prefixes.remove(&prefix);
        }
        queue.reach.retain(|_, prefixes| !prefixes.is_empty());
        queue.unreach.insert(prefix);
    }

    // Starts (or leaves running) the MRAI timer so it fires at `due`.
    fn mrai_start(&mut self, due: Instant) {
        if self.tasks.mrai.is_some() {
            return;
        }
        let timeout = due.saturating_duration_since(Instant::now());
        let task = tasks::nbr_mrai_timer(self, timeout);
        self.tasks.mrai = Some(task);
    }

    // Releases pending advertisements whose MRAI has expired.
    fn mrai_expiry(&mut self) {
        self.tasks.mrai = None;

        let mut earliest = None;
        mrai_release::<Ipv4Unicast>(self, &mut earliest);
        mrai_release::<Ipv6Unicast>(self, &mut earliest);

        // Send the released updates.
        let msg_list = self.update_queues.build_updates();
        if !msg_list.is_empty() {
            self.message_list_send(msg_list);
        }

        // Reschedule for advertisements still being held back.
        if let Some(due) = earliest {
            self.mrai_start(due);
        }
    }

    // Sends an initial routing update for the given address family.
    fn initial_routing_update<A>(&mut self, instance: &mut InstanceUpView<'_>)
    where
        A: AddressFamily,
    {
        // Check if the address family was negotiated for this session.
        if !self.is_af_enabled(A::AFI, A::SAFI) {
            return;
        }

        // Advertise the current set of best routes.
        let table = A::table(&mut instance.state.rib.tables);
        let routes = table
            .prefixes
            .iter()
            .filter_map(|(prefix, dest)| {
                dest.local.as_ref().map(|local| {
                    let route = Route::new(
                        local.origin,
                        local.attrs.clone(),
                        local.route_type,
                    );
                    (*prefix, Box::new(route))
                })
            })
            .filter(|(_, route)| self.distribute_filter(route))
            .collect::<Vec<_>>();

        events::advertise_routes::<A>(
            self,
            table,
            routes,
            instance.config.asn,
        );
    }

    // Re-sends the current Adj-RIB-Out, used to honor ROUTE-REFRESH
    // requests.
    pub(crate) fn resend_adj_rib_out<A>(
        &mut self,
        instance: &mut InstanceUpView<'_>,
    ) where
        A: AddressFamily,
    {
        let table = A::table(&mut instance.state.rib.tables);
        let mut to_advertise = vec![];
        for (prefix, dest) in table.prefixes.iter() {
            let Some(adj_rib) = dest.adj_rib.get(&self.remote_addr) else {
                continue;
            };
            let Some(route) = &adj_rib.out_post else {
                continue;
            };

            // Update the route's attributes before transmission.
            let mut attrs = route.attrs.clone();
            rib::attrs_tx_update::<A>(
                &mut attrs,
                self,
                instance.config.asn,
                route.origin.is_local(),
            );
            to_advertise.push((*prefix, attrs));
        }

        for (prefix, attrs) in to_advertise {
            self.enqueue_advertisement::<A>(prefix, attrs);
        }
    }

    // Clears the Adj-RIB-In and Adj-RIB-Out of the given address family.
    fn clear_routes<A>(&mut self, rib: &mut Rib, ibus_tx: &IbusChannelsTx)
    where
        A: AddressFamily,
    {
        let table = A::table(&mut rib.tables);
        for (prefix, dest) in table.prefixes.iter_mut() {
            // Clear the Adj-RIB-In and Adj-RIB-Out.
            if let Some(adj_rib) = dest.adj_rib.remove(&self.remote_addr) {
                // Update nexthop tracking.
                if let Some(adj_in_route) = &adj_rib.in_post {
                    rib::nexthop_untrack(
                        &mut table.nht,
                        adj_in_route,
                        A::nexthop_rx_extract,
                        ibus_tx,
                    );
                }
            } else {
                continue;
            }

            // Enqueue prefix for the BGP Decision Process.
            table.queued_prefixes.insert(*prefix);
        }
    }

    // Determines whether the given route is eligible for distribution to
    // this neighbor.
    pub(crate) fn distribute_filter(&self, route: &Route) -> bool {
        use crate::packet::attribute::{
            COMM_NO_ADVERTISE, COMM_NO_EXPORT, COMM_NO_EXPORT_SUBCONFED,
        };

        // Suppress advertisements to peers whose AS number is present in
        // the route's AS path.
        if route.attrs.base.as_path.contains(self.config.peer_as) {
            return false;
        }

        // RFC 4271 section 9.2: routes received from an internal peer
        // SHALL NOT be redistributed to other internal peers.
        if route.route_type == RouteType::Internal
            && self.peer_type == PeerType::Internal
            && matches!(route.origin, RouteOrigin::Neighbor { .. })
        {
            return false;
        }

        // Handle well-known communities.
        if let Some(comm) = &route.attrs.comm {
            for comm in comm.iter() {
                if comm.0 == COMM_NO_ADVERTISE {
                    return false;
                }
                if self.peer_type == PeerType::External
                    && (comm.0 == COMM_NO_EXPORT
                        || comm.0 == COMM_NO_EXPORT_SUBCONFED)
                {
                    return false;
                }
            }
        }

        true
    }

    // Checks if the given address family is usable on this session.
    pub(crate) fn is_af_enabled(&self, afi: Afi, safi: Safi) -> bool {
        // Check if the corresponding multiprotocol capability has been
        // negotiated.
        let cap = NegotiatedCapability::MultiProtocol { afi, safi };
        if self.capabilities_nego.contains(&cap) {
            return true;
        }

        // If the peer doesn't support BGP capabilities, the IPv4 unicast
        // address family is implicitly enabled.
        if self.capabilities_nego.is_empty()
            && afi == Afi::Ipv4
            && safi == Safi::Unicast
        {
            return true;
        }

        false
    }
}

// ===== impl NeighborCfg =====

impl Default for NeighborCfg {
    fn default() -> NeighborCfg {
        NeighborCfg {
            enabled: true,
            peer_as: 0,
            local_addr: None,
            holdtime: 90,
            keepalive: None,
            connect_retry_interval: 120,
            min_route_adv_interval: None,
            afi_safi_ipv4: true,
            afi_safi_ipv6: false,
            route_refresh: true,
            asn4: true,
            import_policy: None,
            export_policy: None,
            default_import_policy: DefaultPolicy::AcceptRoute,
            default_export_policy: DefaultPolicy::AcceptRoute,
        }
    }
}

// ===== impl NeighborUpdateQueues =====

impl NeighborUpdateQueues {
    pub(crate) fn build_updates(&mut self) -> Vec<Message> {
        [
            Ipv4Unicast::build_updates(&mut self.ipv4_unicast),
            Ipv6Unicast::build_updates(&mut self.ipv6_unicast),
        ]
        .concat()
    }
}

// ===== impl NeighborUpdateQueue =====

impl<A> Default for NeighborUpdateQueue<A>
where
    A: AddressFamily,
{
    fn default() -> NeighborUpdateQueue<A> {
        NeighborUpdateQueue {
            reach: Default::default(),
            unreach: Default::default(),
            pending: Default::default(),
            advertised_at: Default::default(),
        }
    }
}

// ===== helper functions =====

// Moves MRAI-expired pending advertisements to the Tx queue and computes
// the next expiry, if any.
fn mrai_release<A>(nbr: &mut Neighbor, earliest: &mut Option<Instant>)
where
    A: AddressFamily,
{
    let mrai = Duration::from_secs(nbr.mrai().into());
    let now = Instant::now();
    let queue = A::update_queue(&mut nbr.update_queues);

    let pending = std::mem::take(&mut queue.pending);
    for (prefix, attrs) in pending {
        let due = queue
            .advertised_at
            .get(&prefix)
            .map(|advertised_at| *advertised_at + mrai)
            .unwrap_or(now);
        if due <= now {
            queue.reach.entry(attrs).or_default().insert(prefix);
            queue.advertised_at.insert(prefix, now);
        } else {
            queue.pending.insert(prefix, attrs);
            *earliest =
                Some(earliest.map_or(due, |earliest| earliest.min(due)));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use super::*;
    use crate::packet::consts::Origin;

    fn test_neighbor(peer_type: PeerType) -> Neighbor {
        let (nbr_timerp, _nbr_timerc) = mpsc::channel(4);
        let config = NeighborCfg {
            peer_as: match peer_type {
                PeerType::Internal => 65000,
                PeerType::External => 65002,
            },
            ..Default::default()
        };
        Neighbor::new(
            IpAddr::from([10, 0, 0, 2]),
            peer_type,
            config,
            nbr_timerp,
        )
    }

    fn test_attrs() -> Attrs {
        Attrs {
            base: crate::packet::attribute::BaseAttrs {
                origin: Origin::Igp,
                as_path: Default::default(),
                as4_path: None,
                nexthop: Some(IpAddr::from([10, 0, 0, 1])),
                ll_nexthop: None,
                med: None,
                local_pref: None,
                aggregator: None,
                as4_aggregator: None,
                atomic_aggregate: false,
            },
            comm: None,
            unknown: vec![],
        }
    }

    #[test]
    fn first_advertisement_is_not_rate_limited() {
        let mut nbr = test_neighbor(PeerType::External);
        let prefix: ipnetwork::Ipv4Network = "10.1.0.0/16".parse().unwrap();

        nbr.enqueue_advertisement::<Ipv4Unicast>(prefix, test_attrs());

        let queue = &nbr.update_queues.ipv4_unicast;
        assert!(queue.reach.values().any(|set| set.contains(&prefix)));
        assert!(queue.pending.is_empty());
        assert!(queue.advertised_at.contains_key(&prefix));
    }

    #[tokio::test]
    async fn mrai_holds_back_readvertisement() {
        let mut nbr = test_neighbor(PeerType::External);
        let prefix: ipnetwork::Ipv4Network = "10.1.0.0/16".parse().unwrap();

        // First advertisement goes out immediately.
        nbr.enqueue_advertisement::<Ipv4Unicast>(prefix, test_attrs());
        nbr.update_queues.ipv4_unicast.reach.clear();

        // An immediate re-advertisement is held back by the MRAI.
        nbr.enqueue_advertisement::<Ipv4Unicast>(prefix, test_attrs());
        let queue = &nbr.update_queues.ipv4_unicast;
        assert!(queue.reach.is_empty());
        assert!(queue.pending.contains_key(&prefix));
        assert!(nbr.tasks.mrai.is_some());
    }

    #[tokio::test]
    async fn withdrawal_cancels_pending_advertisement() {
        let mut nbr = test_neighbor(PeerType::External);
        let prefix: ipnetwork::Ipv4Network = "10.1.0.0/16".parse().unwrap();

        nbr.enqueue_advertisement::<Ipv4Unicast>(prefix, test_attrs());
        nbr.update_queues.ipv4_unicast.reach.clear();
        nbr.enqueue_advertisement::<Ipv4Unicast>(prefix, test_attrs());

        // The withdrawal cancels the held-back advertisement, so the two
        // are never in flight in the wrong order.
        nbr.enqueue_withdrawal::<Ipv4Unicast>(prefix);
        let queue = &nbr.update_queues.ipv4_unicast;
        assert!(queue.pending.is_empty());
        assert!(queue.reach.is_empty());
        assert!(queue.unreach.contains(&prefix));
    }

    #[test]
    fn advertisement_cancels_queued_withdrawal_ibgp() {
        // iBGP peers have no MRAI by default.
        let mut nbr = test_neighbor(PeerType::Internal);
        let prefix: ipnetwork::Ipv4Network = "10.1.0.0/16".parse().unwrap();

        nbr.enqueue_withdrawal::<Ipv4Unicast>(prefix);
        nbr.enqueue_advertisement::<Ipv4Unicast>(prefix, test_attrs());

        let queue = &nbr.update_queues.ipv4_unicast;
        assert!(queue.unreach.is_empty());
        assert!(queue.reach.values().any(|set| set.contains(&prefix)));
    }

    #[test]
    fn collision_resolution_higher_id_wins() {
        let mut nbr = test_neighbor(PeerType::External);
        let local_id = Ipv4Addr::new(2, 2, 2, 2);

        // Identifier unknown: the existing connection is kept.
        assert!(!nbr.collision_resolve(local_id));

        // The incoming connection wins when the remote identifier is
        // numerically larger.
        nbr.identifier = Some(Ipv4Addr::new(3, 3, 3, 3));
        assert!(nbr.collision_resolve(local_id));

        nbr.identifier = Some(Ipv4Addr::new(1, 1, 1, 1));
        assert!(!nbr.collision_resolve(local_id));
    }
}
