//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::time::Duration;

use nbrd_utils::Sender;
use nbrd_utils::socket::{
    OwnedReadHalf, OwnedWriteHalf, TcpListener, TcpStream,
};
use nbrd_utils::task::{IntervalTask, Task, TimeoutTask};
use tracing::{Instrument, debug_span};

use crate::debug::Debug;
use crate::neighbor::{Neighbor, fsm};
use crate::network;
use crate::packet::consts::{CeaseSubcode, ErrorCode};
use crate::packet::message::{
    DecodeCxt, EncodeCxt, KeepaliveMsg, Message, NotificationMsg,
};

//
// BGP tasks diagram:
//                                     +--------------+
//                                     |  supervisor  |
//                                     +--------------+
//                                           | ^
//                                           V |
//                                     +--------------+
//                tcp_listener (1x) -> |              |
//                 tcp_connect (Nx) -> |              | -> (Nx) nbr_tx
//                      nbr_rx (Nx) -> |   instance   | -> (Nx) nbr_kalive_interval
//                   nbr_timer (Nx) -> |              |
//                                     +--------------+
//                                           | ^
//                                           V |
//                                     +--------------+
//                                     |     ibus     |
//                                     +--------------+
//

// BGP inter-task message types.
pub mod messages {
    use serde::{Deserialize, Serialize};

    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;

    // Input messages (child task -> main task).
    pub mod input {
        use std::net::IpAddr;

        use nbrd_utils::socket::{TcpConnInfo, TcpStream};

        use super::*;
        use crate::error::NbrRxError;
        use crate::neighbor::fsm;
        use crate::packet::message::Message;

        #[derive(Debug)]
        pub enum ProtocolMsg {
            TcpAccept(TcpAcceptMsg),
            TcpConnect(TcpConnectMsg),
            NbrRx(NbrRxMsg),
            NbrTimer(NbrTimerMsg),
            TriggerDecisionProcess,
        }

        #[derive(Debug)]
        pub struct TcpAcceptMsg {
            pub stream: Option<TcpStream>,
            pub conn_info: TcpConnInfo,
        }

        #[derive(Debug)]
        pub struct TcpConnectMsg {
            pub stream: Option<TcpStream>,
            pub conn_info: TcpConnInfo,
        }

        #[derive(Debug)]
        pub struct NbrRxMsg {
            pub nbr_addr: IpAddr,
            pub msg: Result<Message, NbrRxError>,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct NbrTimerMsg {
            pub nbr_addr: IpAddr,
            pub timer: fsm::Timer,
        }

        impl TcpAcceptMsg {
            pub(crate) fn stream(&mut self) -> TcpStream {
                self.stream.take().unwrap()
            }
        }

        impl TcpConnectMsg {
            pub(crate) fn stream(&mut self) -> TcpStream {
                self.stream.take().unwrap()
            }
        }
    }

    // Output messages (main task -> child task).
    pub mod output {
        use std::collections::BTreeSet;
        use std::net::IpAddr;

        use crate::packet::message::{Message, NegotiatedCapability};

        #[derive(Debug)]
        pub enum NbrTxMsg {
            SendMessage {
                nbr_addr: IpAddr,
                msg: Message,
            },
            UpdateCapabilities(BTreeSet<NegotiatedCapability>),
        }
    }
}

// ===== BGP tasks =====

// TCP listening task.
pub(crate) fn tcp_listener(
    session_socket: &Arc<TcpListener>,
    tcp_acceptp: &Sender<messages::input::TcpAcceptMsg>,
) -> Task<()> {
    let span1 = debug_span!("session");
    let _span1_guard = span1.enter();
    let span2 = debug_span!("input");
    let _span2_guard = span2.enter();

    let session_socket = session_socket.clone();
    let tcp_acceptp = tcp_acceptp.clone();
    Task::spawn(
        async move {
            let _ = network::listen_loop(session_socket, tcp_acceptp).await;
        }
        .in_current_span(),
    )
}

// TCP connect task.
pub(crate) fn tcp_connect(
    nbr: &Neighbor,
    tcp_connectp: &Sender<messages::input::TcpConnectMsg>,
) -> Task<()> {
    let span = debug_span!("neighbor", addr = %nbr.remote_addr);
    let _span_guard = span.enter();

    let remote_addr = nbr.remote_addr;
    let local_addr = nbr.config.local_addr;
    let ttl = network::nbr_ttl(nbr);
    let tcp_connectp = tcp_connectp.clone();
    Task::spawn(
        async move {
            loop {
                let result =
                    network::connect(remote_addr, local_addr, ttl).await;

                match result {
                    Ok((stream, conn_info)) => {
                        // Send message to the parent BGP task.
                        let msg = messages::input::TcpConnectMsg {
                            stream: Some(stream),
                            conn_info,
                        };
                        let _ = tcp_connectp.send(msg).await;
                        return;
                    }
                    Err(error) => {
                        error.log();
                        // Wait one second before trying again.
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
        .in_current_span(),
    )
}

// Neighbor TCP Rx task.
pub(crate) fn nbr_rx(
    nbr: &Neighbor,
    cxt: DecodeCxt,
    read_half: OwnedReadHalf,
    nbr_msg_rxp: &Sender<messages::input::NbrRxMsg>,
) -> Task<()> {
    let span1 = debug_span!("neighbor", addr = %nbr.remote_addr);
    let _span1_guard = span1.enter();
    let span2 = debug_span!("input");
    let _span2_guard = span2.enter();

    let nbr_addr = nbr.remote_addr;
    let nbr_msg_rxp = nbr_msg_rxp.clone();
    Task::spawn(
        async move {
            let _ =
                network::nbr_read_loop(read_half, nbr_addr, cxt, nbr_msg_rxp)
                    .await;
        }
        .in_current_span(),
    )
}

// Neighbor TCP Tx task.
pub(crate) fn nbr_tx(
    nbr: &Neighbor,
    cxt: EncodeCxt,
    write_half: OwnedWriteHalf,
    msg_txc: nbrd_utils::UnboundedReceiver<messages::output::NbrTxMsg>,
) -> Task<()> {
    let span1 = debug_span!("neighbor", addr = %nbr.remote_addr);
    let _span1_guard = span1.enter();
    let span2 = debug_span!("output");
    let _span2_guard = span2.enter();

    Task::spawn(
        async move {
            network::nbr_write_loop(write_half, cxt, msg_txc).await;
        }
        .in_current_span(),
    )
}

// Neighbor timer task.
pub(crate) fn nbr_timer(
    nbr: &Neighbor,
    timer: fsm::Timer,
    seconds: u16,
    nbr_timerp: &Sender<messages::input::NbrTimerMsg>,
) -> TimeoutTask {
    let nbr_timerp = nbr_timerp.clone();
    let nbr_addr = nbr.remote_addr;

    TimeoutTask::new(
        Duration::from_secs(seconds.into()),
        move || async move {
            let msg = messages::input::NbrTimerMsg { nbr_addr, timer };
            let _ = nbr_timerp.send(msg).await;
        },
    )
}

// Neighbor MRAI timer task.
pub(crate) fn nbr_mrai_timer(
    nbr: &Neighbor,
    timeout: Duration,
) -> TimeoutTask {
    let nbr_timerp = nbr.nbr_timerp.clone();
    let nbr_addr = nbr.remote_addr;

    TimeoutTask::new(timeout, move || async move {
        let msg = messages::input::NbrTimerMsg {
            nbr_addr,
            timer: fsm::Timer::Mrai,
        };
        let _ = nbr_timerp.send(msg).await;
    })
}

// Periodic keepalive transmission.
pub(crate) fn nbr_kalive_interval(
    nbr: &Neighbor,
    interval: u16,
) -> IntervalTask {
    let msg_txp = nbr.msg_txp.as_ref().unwrap().clone();
    let nbr_addr = nbr.remote_addr;

    IntervalTask::new(
        Duration::from_secs(interval.into()),
        false,
        move || {
            let msg_txp = msg_txp.clone();

            async move {
                let msg = Message::Keepalive(KeepaliveMsg {});
                Debug::NbrMsgTx(&nbr_addr, &msg).log();

                let msg = messages::output::NbrTxMsg::SendMessage {
                    nbr_addr,
                    msg,
                };
                let _ = msg_txp.send(msg);
            }
        },
    )
}

// Closes a stream that lost the connection collision resolution, sending
// a Cease NOTIFICATION first.
pub(crate) fn reject_collision_stream(stream: TcpStream) {
    let mut task = Task::spawn(async move {
        use tokio::io::AsyncWriteExt;

        let msg = Message::Notification(NotificationMsg::new(
            ErrorCode::Cease,
            CeaseSubcode::ConnectionCollisionResolution,
        ));
        let cxt = EncodeCxt {
            capabilities: Default::default(),
        };
        let buf = msg.encode(&cxt);
        let mut stream = stream;
        let _ = stream.write_all(&buf).await;
        let _ = stream.shutdown().await;
    });
    task.detach();
}

// Timeout to trigger the decision process.
pub(crate) fn schedule_decision_process(
    decision_processp: &Sender<()>,
) -> TimeoutTask {
    let decision_processp = decision_processp.clone();
    let timeout = Duration::from_millis(100);
    TimeoutTask::new(timeout, move || async move {
        let _ = decision_processp.send(()).await;
    })
}
