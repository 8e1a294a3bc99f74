//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::time::Duration;

use nbrd_utils::socket::{AsyncFd, Socket};
use nbrd_utils::task::{IntervalTask, Task, TimeoutTask};
use tracing::{Instrument, debug_span};

use crate::collections::{LsaEntryId, LsdbId};
use crate::instance::{InstanceUpView, ProtocolInputChannelsTx};
use crate::interface::{Interface, ism};
use crate::lsdb;
use crate::neighbor::{Neighbor, nsm};
use crate::network;
use crate::packet::Packet;
use crate::packet::lsa::{Lsa, LsaKey};

//
// OSPF tasks diagram:
//                                  +--------------+
//                                  |  supervisor  |
//                                  +--------------+
//                                        | ^
//                                        V |
//                                  +--------------+
//             net_rx (Nx) ------>  |              |
//             net_tx (Nx) <------  |              |
//     hello_interval (Nx) ------>  |              |
//     timers / rxmt (Nx)  ------>  |   instance   |
//                                  |              |
//                                  +--------------+
//                                        | ^
//                                        V |
//                                  +--------------+
//                                  |     ibus     |
//                                  +--------------+
//

// OSPF inter-task message types.
pub mod messages {
    use serde::{Deserialize, Serialize};

    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;

    // Input messages (child task -> main task).
    pub mod input {
        use std::net::Ipv4Addr;

        use super::*;
        use crate::collections::{
            InterfaceKey, LsaEntryId, LsdbId, NeighborKey,
        };
        use crate::interface::ism;
        use crate::lsdb::LsaOriginateEvent;
        use crate::neighbor::{RxmtPacketType, nsm};
        use crate::packet::Packet;
        use crate::packet::error::DecodeResult;
        use crate::packet::lsa::LsaKey;

        #[derive(Debug, Deserialize, Serialize)]
        pub enum ProtocolMsg {
            IsmEvent(IsmEventMsg),
            NsmEvent(NsmEventMsg),
            NetRxPacket(NetRxPacketMsg),
            DbDescFree(DbDescFreeMsg),
            SendLsUpdate(SendLsUpdateMsg),
            RxmtInterval(RxmtIntervalMsg),
            DelayedAck(DelayedAckMsg),
            LsaOrigEvent(LsaOriginateEvent),
            LsaOrigDelayed(LsaOrigDelayedMsg),
            LsaFlush(LsaFlushMsg),
            LsaRefresh(LsaRefreshMsg),
            SpfTimer,
            MaxAgeSweep,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct IsmEventMsg {
            pub iface_key: InterfaceKey,
            pub event: ism::Event,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct NsmEventMsg {
            pub iface_key: InterfaceKey,
            pub nbr_key: NeighborKey,
            pub event: nsm::Event,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct NetRxPacketMsg {
            pub iface_key: InterfaceKey,
            pub src: Ipv4Addr,
            pub dst: Ipv4Addr,
            pub packet: DecodeResult<Packet>,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct DbDescFreeMsg {
            pub iface_key: InterfaceKey,
            pub nbr_key: NeighborKey,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct SendLsUpdateMsg {
            pub iface_key: InterfaceKey,
            pub nbr_key: Option<NeighborKey>,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct RxmtIntervalMsg {
            pub iface_key: InterfaceKey,
            pub nbr_key: NeighborKey,
            pub packet_type: RxmtPacketType,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct DelayedAckMsg {
            pub iface_key: InterfaceKey,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct LsaOrigDelayedMsg {
            pub lsdb_id: LsdbId,
            pub lsa_key: LsaKey,
        }

        #[derive(Clone, Copy, Debug, Deserialize, Serialize)]
        pub struct LsaFlushMsg {
            pub lsdb_id: LsdbId,
            pub lse_id: LsaEntryId,
        }

        #[derive(Clone, Copy, Debug, Deserialize, Serialize)]
        pub struct LsaRefreshMsg {
            pub lsdb_id: LsdbId,
            pub lse_id: LsaEntryId,
        }
    }

    // Output messages (main task -> child task).
    pub mod output {
        use std::net::Ipv4Addr;

        use smallvec::SmallVec;

        use super::*;
        use crate::packet::Packet;

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct NetTxPacketMsg {
            pub packet: Packet,
            pub dst: SmallVec<[Ipv4Addr; 4]>,
        }
    }
}

// ===== OSPF tasks =====

// Network Rx task.
pub(crate) fn net_rx(
    socket: Arc<AsyncFd<Socket>>,
    iface: &Interface,
    net_packet_rxp: &nbrd_utils::Sender<messages::input::NetRxPacketMsg>,
) -> Task<()> {
    let span1 = debug_span!("interface", name = %iface.name);
    let _span1_guard = span1.enter();
    let span2 = debug_span!("input");
    let _span2_guard = span2.enter();

    let iface_id = iface.id;
    let auth = iface.config.auth.clone();
    let net_packet_rxp = net_packet_rxp.clone();
    Task::spawn(
        async move {
            let _ =
                network::read_loop(socket, iface_id, auth, net_packet_rxp)
                    .await;
        }
        .in_current_span(),
    )
}

// Network Tx task.
pub(crate) fn net_tx(
    socket: Arc<AsyncFd<Socket>>,
    iface: &Interface,
    net_tx_packetc: nbrd_utils::UnboundedReceiver<
        messages::output::NetTxPacketMsg,
    >,
) -> Task<()> {
    let span1 = debug_span!("interface", name = %iface.name);
    let _span1_guard = span1.enter();
    let span2 = debug_span!("output");
    let _span2_guard = span2.enter();

    let ifname = iface.name.clone();
    let ifindex = iface.system.ifindex.unwrap_or(0);
    let src = iface.state.src_addr.unwrap();
    let auth = iface.config.auth.clone();
    Task::spawn(
        async move {
            network::write_loop(
                socket,
                ifname,
                ifindex,
                src,
                auth,
                net_tx_packetc,
            )
            .await;
        }
        .in_current_span(),
    )
}

// Hello interval task. The packet is prebuilt and resent on every tick;
// the task is restarted whenever the packet contents change.
pub(crate) fn hello_interval(
    iface: &Interface,
    packet: Packet,
    interval: u16,
) -> IntervalTask {
    let net_tx_packetp =
        iface.state.net.as_ref().unwrap().net_tx_packetp.clone();
    let dst = smallvec::smallvec![*network::multicast_addr(
        network::MulticastAddr::AllSpfRtrs
    )];

    IntervalTask::new(
        Duration::from_secs(interval.into()),
        true,
        move || {
            let net_tx_packetp = net_tx_packetp.clone();
            let msg = messages::output::NetTxPacketMsg {
                packet: packet.clone(),
                dst: dst.clone(),
            };
            async move {
                let _ = net_tx_packetp.send(msg);
            }
        },
    )
}

// ISM wait timer.
pub(crate) fn ism_wait_timer(
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    let ism_eventp = instance.tx.protocol_input.ism_eventp.clone();
    let msg = messages::input::IsmEventMsg {
        iface_key: iface.id.into(),
        event: ism::Event::WaitTimer,
    };

    TimeoutTask::new(
        Duration::from_secs(iface.config.dead_interval.into()),
        move || async move {
            let _ = ism_eventp.send(msg);
        },
    )
}

// Neighbor inactivity timer, firing after RouterDeadInterval seconds of
// Hello silence.
pub(crate) fn nsm_inactivity_timer(
    nbr: &Neighbor,
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    let nsm_eventp = instance.tx.protocol_input.nsm_eventp.clone();
    let msg = messages::input::NsmEventMsg {
        iface_key: iface.id.into(),
        nbr_key: nbr.id.into(),
        event: nsm::Event::InactivityTimer,
    };

    TimeoutTask::new(
        Duration::from_secs(iface.config.dead_interval.into()),
        move || async move {
            let _ = nsm_eventp.send(msg);
        },
    )
}

// Packet retransmission interval.
pub(crate) fn packet_rxmt_interval(
    iface: &Interface,
    msg: messages::input::RxmtIntervalMsg,
    instance: &InstanceUpView<'_>,
) -> IntervalTask {
    let rxmt_intervalp = instance.tx.protocol_input.rxmt_intervalp.clone();

    IntervalTask::new(
        Duration::from_secs(iface.config.retransmit_interval.into()),
        true,
        move || {
            let rxmt_intervalp = rxmt_intervalp.clone();
            let msg = msg.clone();
            async move {
                let _ = rxmt_intervalp.send(msg).await;
            }
        },
    )
}

// Timer to free the last sent/received Database Description packets. The
// slave must wait RouterDeadInterval seconds before freeing them.
pub(crate) fn dbdesc_free_timer(
    nbr: &Neighbor,
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    let dbdesc_freep = instance.tx.protocol_input.dbdesc_freep.clone();
    let msg = messages::input::DbDescFreeMsg {
        iface_key: iface.id.into(),
        nbr_key: nbr.id.into(),
    };

    TimeoutTask::new(
        Duration::from_secs(iface.config.dead_interval.into()),
        move || async move {
            let _ = dbdesc_freep.send(msg).await;
        },
    )
}

// Short pacing timer used to group multiple LSAs into a single LS Update.
pub(crate) fn ls_update_timer(
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    const LS_UPDATE_PACING: Duration = Duration::from_millis(100);

    let send_lsupdp = instance.tx.protocol_input.send_lsupdp.clone();
    let msg = messages::input::SendLsUpdateMsg {
        iface_key: iface.id.into(),
        nbr_key: None,
    };

    TimeoutTask::new(LS_UPDATE_PACING, move || async move {
        let _ = send_lsupdp.send(msg);
    })
}

// Delayed Ack timer.
pub(crate) fn delayed_ack_timer(
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    const DELAYED_ACK_INTERVAL: Duration = Duration::from_secs(1);

    let delayed_ackp = instance.tx.protocol_input.delayed_ackp.clone();
    let msg = messages::input::DelayedAckMsg {
        iface_key: iface.id.into(),
    };

    TimeoutTask::new(DELAYED_ACK_INTERVAL, move || async move {
        let _ = delayed_ackp.send(msg).await;
    })
}

// LSA expiry timer, firing when the LSA age reaches MaxAge.
pub(crate) fn lsa_expiry_timer(
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
    lsa: &Lsa,
    protocol_input: &ProtocolInputChannelsTx,
) -> TimeoutTask {
    let lsa_flushp = protocol_input.lsa_flushp.clone();
    let msg = messages::input::LsaFlushMsg { lsdb_id, lse_id };
    let remaining = lsdb::LSA_MAX_AGE.saturating_sub(lsa.hdr.age);

    TimeoutTask::new(
        Duration::from_secs(remaining.into()),
        move || async move {
            let _ = lsa_flushp.send(msg);
        },
    )
}

// LSA refresh timer for self-originated LSAs.
pub(crate) fn lsa_refresh_timer(
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
    protocol_input: &ProtocolInputChannelsTx,
) -> TimeoutTask {
    let lsa_refreshp = protocol_input.lsa_refreshp.clone();
    let msg = messages::input::LsaRefreshMsg { lsdb_id, lse_id };

    TimeoutTask::new(
        Duration::from_secs(lsdb::LSA_REFRESH_TIME.into()),
        move || async move {
            let _ = lsa_refreshp.send(msg);
        },
    )
}

// Timer postponing an LSA origination due to the MinLSInterval check.
pub(crate) fn lsa_orig_delayed_timer(
    lsdb_id: LsdbId,
    lsa_key: LsaKey,
    protocol_input: &ProtocolInputChannelsTx,
) -> TimeoutTask {
    let lsa_orig_delayedp = protocol_input.lsa_orig_delayedp.clone();
    let msg = messages::input::LsaOrigDelayedMsg { lsdb_id, lsa_key };

    TimeoutTask::new(
        Duration::from_secs(lsdb::LSA_MIN_INTERVAL),
        move || async move {
            let _ = lsa_orig_delayedp.send(msg);
        },
    )
}

// SPF coalescing hold timer.
pub(crate) fn spf_hold_timer(instance: &InstanceUpView<'_>) -> TimeoutTask {
    let spf_timerp = instance.tx.protocol_input.spf_timerp.clone();
    let spf_hold = instance.config.spf_hold;

    TimeoutTask::new(Duration::from_millis(spf_hold), move || async move {
        let _ = spf_timerp.send(());
    })
}

// Periodic sweep of acknowledged MaxAge LSAs.
pub(crate) fn maxage_sweep_interval(
    protocol_input: &ProtocolInputChannelsTx,
) -> IntervalTask {
    const MAXAGE_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

    let maxage_sweepp = protocol_input.maxage_sweepp.clone();
    IntervalTask::new(MAXAGE_SWEEP_INTERVAL, false, move || {
        let maxage_sweepp = maxage_sweepp.clone();
        async move {
            let _ = maxage_sweepp.send(());
        }
    })
}
