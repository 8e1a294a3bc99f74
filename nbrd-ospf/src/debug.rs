//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span};

use crate::interface::ism;
use crate::neighbor::nsm;
use crate::packet::Packet;
use crate::packet::lsa::LsaHdr;

// OSPF debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Interfaces
    InterfaceCreate(&'a str),
    InterfaceDelete(&'a str),
    InterfaceStart(&'a str),
    InterfaceStop(&'a str, InterfaceInactiveReason),
    IsmEvent(&'a str, &'a ism::State, &'a ism::Event),
    IsmTransition(&'a str, &'a ism::State, &'a ism::State),
    IsmDrElection(
        &'a str,
        Option<Ipv4Addr>,
        Option<Ipv4Addr>,
        Option<Ipv4Addr>,
        Option<Ipv4Addr>,
    ),
    // Neighbors
    NeighborCreate(Ipv4Addr),
    NeighborDelete(Ipv4Addr),
    NsmEvent(Ipv4Addr, &'a nsm::State, &'a nsm::Event),
    NsmTransition(Ipv4Addr, &'a nsm::State, &'a nsm::State),
    // Network
    PacketRx(&'a str, &'a Ipv4Addr, &'a Ipv4Addr, &'a Packet),
    PacketTx(&'a str, &'a Ipv4Addr, &'a Packet),
    PacketRxIgnore(Ipv4Addr, &'a nsm::State),
    QuestionableAck(Ipv4Addr, &'a LsaHdr),
    // LSDB
    LsaInstall(&'a LsaHdr),
    LsaOriginate(&'a LsaHdr),
    LsaOriginateMinInterval(&'a LsaHdr),
    LsaDiscard(Ipv4Addr, &'a LsaHdr),
    LsaMinArrivalDiscard(Ipv4Addr, &'a LsaHdr),
    LsaSelfOriginated(Ipv4Addr, &'a LsaHdr),
    LsaFlush(&'a LsaHdr, LsaFlushReason),
    LsaRefresh(&'a LsaHdr),
    // SPF
    SpfStart,
    SpfFinish(u128),
}

// Reason why an interface is inactive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum InterfaceInactiveReason {
    AdminDown,
    OperationalDown,
    MissingIfindex,
    MissingMtu,
    MissingIpv4Address,
    LoopedBack,
    Resetting,
    InstanceDown,
}

// Reason why an LSA is being flushed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaFlushReason {
    Expiry,
    PrematureAging,
}

// Reason for a SeqNumberMismatch neighbor event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum SeqNoMismatchReason {
    InconsistentFlags,
    InconsistentOptions,
    InconsistentSeqNo,
    InvalidLsaType,
    UnexpectedDbDesc,
    MalformedPacket,
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InterfaceCreate(name)
            | Debug::InterfaceDelete(name)
            | Debug::InterfaceStart(name) => {
                debug_span!("interface", %name).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::InterfaceStop(name, reason) => {
                debug_span!("interface", %name).in_scope(|| {
                    debug!(?reason, "{}", self);
                });
            }
            Debug::IsmEvent(name, state, event) => {
                debug_span!("interface", %name).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?state, ?event, "{}", self);
                    });
                });
            }
            Debug::IsmTransition(name, old_state, new_state) => {
                debug_span!("interface", %name).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?old_state, ?new_state, "{}", self);
                    });
                });
            }
            Debug::IsmDrElection(name, old_dr, new_dr, old_bdr, new_bdr) => {
                debug_span!("interface", %name).in_scope(|| {
                    debug!(
                        old_dr = ?old_dr, new_dr = ?new_dr,
                        old_bdr = ?old_bdr, new_bdr = ?new_bdr,
                        "{}", self
                    );
                });
            }
            Debug::NeighborCreate(router_id)
            | Debug::NeighborDelete(router_id) => {
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::NsmEvent(router_id, state, event) => {
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?state, ?event, "{}", self);
                    });
                });
            }
            Debug::NsmTransition(router_id, old_state, new_state) => {
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?old_state, ?new_state, "{}", self);
                    });
                });
            }
            Debug::PacketRx(ifname, src, dst, packet) => {
                debug_span!("interface", name = %ifname).in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        debug!(%src, %dst, ?packet, "{}", self);
                    });
                });
            }
            Debug::PacketTx(ifname, dst, packet) => {
                debug_span!("interface", name = %ifname).in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        debug!(%dst, ?packet, "{}", self);
                    });
                });
            }
            Debug::PacketRxIgnore(router_id, state) => {
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug!(?state, "{}", self);
                });
            }
            Debug::QuestionableAck(router_id, lsa_hdr) => {
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug!(?lsa_hdr, "{}", self);
                });
            }
            Debug::LsaInstall(lsa_hdr)
            | Debug::LsaOriginate(lsa_hdr)
            | Debug::LsaOriginateMinInterval(lsa_hdr)
            | Debug::LsaRefresh(lsa_hdr) => {
                debug!(
                    lsa_type = %lsa_hdr.lsa_type, lsa_id = %lsa_hdr.lsa_id,
                    adv_rtr = %lsa_hdr.adv_rtr, seq_no = lsa_hdr.seq_no,
                    "{}", self
                );
            }
            Debug::LsaDiscard(router_id, lsa_hdr)
            | Debug::LsaMinArrivalDiscard(router_id, lsa_hdr)
            | Debug::LsaSelfOriginated(router_id, lsa_hdr) => {
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug!(
                        lsa_type = %lsa_hdr.lsa_type,
                        lsa_id = %lsa_hdr.lsa_id,
                        adv_rtr = %lsa_hdr.adv_rtr,
                        "{}", self
                    );
                });
            }
            Debug::LsaFlush(lsa_hdr, reason) => {
                debug!(
                    lsa_type = %lsa_hdr.lsa_type, lsa_id = %lsa_hdr.lsa_id,
                    adv_rtr = %lsa_hdr.adv_rtr, ?reason,
                    "{}", self
                );
            }
            Debug::SpfStart => {
                debug!("{}", self);
            }
            Debug::SpfFinish(elapsed_us) => {
                debug!(%elapsed_us, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InterfaceCreate(..) => {
                write!(f, "interface created")
            }
            Debug::InterfaceDelete(..) => {
                write!(f, "interface deleted")
            }
            Debug::InterfaceStart(..) => {
                write!(f, "starting interface")
            }
            Debug::InterfaceStop(..) => {
                write!(f, "stopping interface")
            }
            Debug::IsmEvent(..) => {
                write!(f, "event")
            }
            Debug::IsmTransition(..) => {
                write!(f, "state transition")
            }
            Debug::IsmDrElection(..) => {
                write!(f, "DR election")
            }
            Debug::NeighborCreate(..) => {
                write!(f, "neighbor created")
            }
            Debug::NeighborDelete(..) => {
                write!(f, "neighbor deleted")
            }
            Debug::NsmEvent(..) => {
                write!(f, "event")
            }
            Debug::NsmTransition(..) => {
                write!(f, "state transition")
            }
            Debug::PacketRx(..) => {
                write!(f, "packet received")
            }
            Debug::PacketTx(..) => {
                write!(f, "packet sent")
            }
            Debug::PacketRxIgnore(..) => {
                write!(f, "ignoring packet")
            }
            Debug::QuestionableAck(..) => {
                write!(f, "questionable acknowledgment")
            }
            Debug::LsaInstall(..) => {
                write!(f, "installing LSA")
            }
            Debug::LsaOriginate(..) => {
                write!(f, "originating LSA")
            }
            Debug::LsaOriginateMinInterval(..) => {
                write!(f, "postponing LSA origination (MinLSInterval)")
            }
            Debug::LsaDiscard(..) => {
                write!(f, "discarding LSA")
            }
            Debug::LsaMinArrivalDiscard(..) => {
                write!(f, "discarding LSA (MinLSArrival)")
            }
            Debug::LsaSelfOriginated(..) => {
                write!(f, "received self-originated LSA")
            }
            Debug::LsaFlush(..) => {
                write!(f, "flushing LSA")
            }
            Debug::LsaRefresh(..) => {
                write!(f, "refreshing LSA")
            }
            Debug::SpfStart => {
                write!(f, "starting SPF calculation")
            }
            Debug::SpfFinish(..) => {
                write!(f, "finished SPF calculation")
            }
        }
    }
}
