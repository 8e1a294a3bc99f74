//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use tracing::{warn, warn_span};

use crate::collections::{InterfaceKey, LsaEntryKey, NeighborKey};
use crate::interface::ism;
use crate::neighbor::nsm;
use crate::packet::PacketType;
use crate::packet::error::DecodeError;

// OSPF errors.
#[derive(Debug)]
pub enum Error {
    // I/O errors
    IoError(IoError),
    // Inter-task communication
    InterfaceIdNotFound(InterfaceKey),
    NeighborIdNotFound(NeighborKey),
    LsaEntryIdNotFound(LsaEntryKey),
    // Packet input
    PacketDecodeError(DecodeError),
    InterfaceCfgError(String, Ipv4Addr, PacketType, InterfaceCfgError),
    InvalidDstAddr(Ipv4Addr),
    InvalidSrcAddr(Ipv4Addr),
    UnknownNeighbor(Ipv4Addr, Ipv4Addr),
    DbDescReject(Ipv4Addr, nsm::State),
    // Other
    IsmUnexpectedEvent(ism::State, ism::Event),
    NsmUnexpectedEvent(Ipv4Addr, nsm::State, nsm::Event),
    InterfaceStartError(String, IoError),
    SpfNexthopCalcError(Ipv4Addr),
}

// OSPF I/O errors.
#[derive(Debug)]
pub enum IoError {
    SocketError(std::io::Error),
    MulticastJoinError(Ipv4Addr, std::io::Error),
    RecvError(std::io::Error),
    RecvMissingSourceAddr,
    RecvMissingAncillaryData,
    SendError(std::io::Error),
}

// Interface configuration mismatches detected on received packets.
#[derive(Debug)]
pub enum InterfaceCfgError {
    AreaIdMismatch(Ipv4Addr, Ipv4Addr),
    HelloMaskMismatch(Ipv4Addr, Ipv4Addr),
    HelloIntervalMismatch(u16, u16),
    DeadIntervalMismatch(u32, u32),
    DuplicateRouterId(Ipv4Addr),
    MtuMismatch(u16),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::IoError(error) => {
                error.log();
            }
            Error::InterfaceIdNotFound(key) => {
                warn!(?key, "{}", self);
            }
            Error::NeighborIdNotFound(key) => {
                warn!(?key, "{}", self);
            }
            Error::LsaEntryIdNotFound(key) => {
                warn!(?key, "{}", self);
            }
            Error::PacketDecodeError(error) => {
                warn!(error = %error, "{}", self);
            }
            Error::InterfaceCfgError(ifname, src, pkt_type, error) => {
                warn_span!("interface", name = %ifname).in_scope(|| {
                    warn!(%src, ?pkt_type, error = %error, "{}", self);
                });
            }
            Error::InvalidDstAddr(addr) => {
                warn!(%addr, "{}", self);
            }
            Error::InvalidSrcAddr(addr) => {
                warn!(%addr, "{}", self);
            }
            Error::UnknownNeighbor(src, router_id) => {
                warn!(%src, %router_id, "{}", self);
            }
            Error::DbDescReject(router_id, state) => {
                warn!(%router_id, ?state, "{}", self);
            }
            Error::IsmUnexpectedEvent(state, event) => {
                warn!(?state, ?event, "{}", self);
            }
            Error::NsmUnexpectedEvent(router_id, state, event) => {
                warn!(%router_id, ?state, ?event, "{}", self);
            }
            Error::InterfaceStartError(ifname, error) => {
                warn!(%ifname, error = %error, "{}", self);
            }
            Error::SpfNexthopCalcError(vertex_id) => {
                warn!(%vertex_id, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::InterfaceIdNotFound(..) => {
                write!(f, "interface ID not found")
            }
            Error::NeighborIdNotFound(..) => {
                write!(f, "neighbor ID not found")
            }
            Error::LsaEntryIdNotFound(..) => {
                write!(f, "LSA entry ID not found")
            }
            Error::PacketDecodeError(..) => {
                write!(f, "failed to decode packet")
            }
            Error::InterfaceCfgError(..) => {
                write!(f, "interface configuration error")
            }
            Error::InvalidDstAddr(..) => {
                write!(f, "invalid destination address")
            }
            Error::InvalidSrcAddr(..) => {
                write!(f, "invalid source address")
            }
            Error::UnknownNeighbor(..) => {
                write!(f, "unknown neighbor")
            }
            Error::DbDescReject(..) => {
                write!(f, "rejected Database Description packet")
            }
            Error::IsmUnexpectedEvent(..) => {
                write!(f, "unexpected interface FSM event")
            }
            Error::NsmUnexpectedEvent(..) => {
                write!(f, "unexpected neighbor FSM event")
            }
            Error::InterfaceStartError(..) => {
                write!(f, "failed to start interface")
            }
            Error::SpfNexthopCalcError(..) => {
                write!(f, "failed to calculate nexthop address")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(error) => Some(error),
            Error::PacketDecodeError(error) => Some(error),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

// ===== impl IoError =====

impl IoError {
    pub(crate) fn log(&self) {
        match self {
            IoError::SocketError(error) => {
                warn!(error = %error, "{}", self);
            }
            IoError::MulticastJoinError(addr, error) => {
                warn!(%addr, error = %error, "{}", self);
            }
            IoError::RecvError(error) | IoError::SendError(error) => {
                warn!(error = %error, "{}", self);
            }
            IoError::RecvMissingSourceAddr
            | IoError::RecvMissingAncillaryData => {
                warn!("{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::SocketError(..) => {
                write!(f, "failed to create raw IP socket")
            }
            IoError::MulticastJoinError(..) => {
                write!(f, "failed to join multicast group")
            }
            IoError::RecvError(..) => {
                write!(f, "failed to receive IP packet")
            }
            IoError::RecvMissingSourceAddr => {
                write!(f, "failed to retrieve packet source address")
            }
            IoError::RecvMissingAncillaryData => {
                write!(f, "failed to retrieve packet ancillary data")
            }
            IoError::SendError(..) => {
                write!(f, "failed to send IP packet")
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::SocketError(error)
            | IoError::MulticastJoinError(_, error)
            | IoError::RecvError(error)
            | IoError::SendError(error) => Some(error),
            _ => None,
        }
    }
}

// ===== impl InterfaceCfgError =====

impl std::fmt::Display for InterfaceCfgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterfaceCfgError::AreaIdMismatch(received, expected) => {
                write!(
                    f,
                    "area ID mismatch (received {}, expected {})",
                    received, expected
                )
            }
            InterfaceCfgError::HelloMaskMismatch(received, expected) => {
                write!(
                    f,
                    "network mask mismatch (received {}, expected {})",
                    received, expected
                )
            }
            InterfaceCfgError::HelloIntervalMismatch(received, expected) => {
                write!(
                    f,
                    "hello interval mismatch (received {}, expected {})",
                    received, expected
                )
            }
            InterfaceCfgError::DeadIntervalMismatch(received, expected) => {
                write!(
                    f,
                    "dead interval mismatch (received {}, expected {})",
                    received, expected
                )
            }
            InterfaceCfgError::DuplicateRouterId(router_id) => {
                write!(f, "duplicate Router ID: {}", router_id)
            }
            InterfaceCfgError::MtuMismatch(mtu) => {
                write!(f, "MTU mismatch: {}", mtu)
            }
        }
    }
}

impl std::error::Error for InterfaceCfgError {}
