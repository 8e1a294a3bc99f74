//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use tracing::{debug, debug_span};

use crate::neighbor::fsm;
use crate::packet::consts::AttrType;
use crate::packet::error::AttrError;
use crate::packet::message::Message;
use crate::rib::RouteOrigin;

// BGP debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Instance
    InstanceStart,
    InstanceStop,
    // Neighbors
    NbrFsmEvent(&'a IpAddr, &'a fsm::Event),
    NbrFsmTransition(&'a IpAddr, &'a fsm::State, &'a fsm::State),
    NbrMsgRx(&'a IpAddr, &'a Message),
    NbrMsgTx(&'a IpAddr, &'a Message),
    NbrAttrError(AttrType, AttrError),
    NbrCollisionNewWins(&'a IpAddr),
    NbrCollisionOldWins(&'a IpAddr),
    // RIB
    BestPathFound(IpNetwork, &'a RouteOrigin),
    BestPathNotFound(IpNetwork),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceStart | Debug::InstanceStop => {
                debug!("{}", self);
            }
            Debug::NbrFsmEvent(addr, event) => {
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?event, "{}", self);
                    });
                });
            }
            Debug::NbrFsmTransition(addr, old_state, new_state) => {
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?old_state, ?new_state, "{}", self);
                    });
                });
            }
            Debug::NbrMsgRx(addr, msg) => {
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        debug!(?msg, "{}", self);
                    });
                });
            }
            Debug::NbrMsgTx(addr, msg) => {
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        debug!(?msg, "{}", self);
                    });
                });
            }
            Debug::NbrAttrError(attr_type, error) => {
                debug!(?attr_type, ?error, "{}", self);
            }
            Debug::NbrCollisionNewWins(addr)
            | Debug::NbrCollisionOldWins(addr) => {
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::BestPathFound(prefix, origin) => {
                debug!(%prefix, ?origin, "{}", self);
            }
            Debug::BestPathNotFound(prefix) => {
                debug!(%prefix, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceStart => {
                write!(f, "starting instance")
            }
            Debug::InstanceStop => {
                write!(f, "stopping instance")
            }
            Debug::NbrFsmEvent(..) => {
                write!(f, "event")
            }
            Debug::NbrFsmTransition(..) => {
                write!(f, "state transition")
            }
            Debug::NbrMsgRx(..) => {
                write!(f, "message received")
            }
            Debug::NbrMsgTx(..) => {
                write!(f, "message sent")
            }
            Debug::NbrAttrError(..) => {
                write!(f, "malformed attribute")
            }
            Debug::NbrCollisionNewWins(..) => {
                write!(f, "connection collision: incoming connection wins")
            }
            Debug::NbrCollisionOldWins(..) => {
                write!(f, "connection collision: existing connection wins")
            }
            Debug::BestPathFound(..) => {
                write!(f, "best path found")
            }
            Debug::BestPathNotFound(..) => {
                write!(f, "best path not found")
            }
        }
    }
}
