//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::io::{IoSlice, IoSliceMut};
use std::net::Ipv4Addr;
use std::ops::Deref;
use std::os::fd::AsRawFd;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::LazyLock as Lazy;

use bytes::{Buf, Bytes};
use nbrd_utils::Sender;
use nbrd_utils::socket::{AsyncFd, Socket};
use nix::sys::socket::{self, SockaddrIn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::SendError;

use crate::collections::InterfaceId;
use crate::debug::Debug;
use crate::error::IoError;
use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::{AuthCtx, Packet};
use crate::tasks::messages::input::NetRxPacketMsg;
use crate::tasks::messages::output::NetTxPacketMsg;

// OSPFv2 multicast addresses.
static ALL_SPF_RTRS: Lazy<Ipv4Addr> =
    Lazy::new(|| Ipv4Addr::from_str("224.0.0.5").unwrap());
static ALL_DR_RTRS: Lazy<Ipv4Addr> =
    Lazy::new(|| Ipv4Addr::from_str("224.0.0.6").unwrap());

// OSPFv3 multicast groups, listed beside the v2 ones for reference. The
// IPv6 control plane of this system is carried by BGP instead.
pub const ALL_SPF_RTRS_V3: &str = "ff02::5";
pub const ALL_DR_RTRS_V3: &str = "ff02::6";

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum MulticastAddr {
    AllSpfRtrs,
    AllDrRtrs,
}

// ===== global functions =====

// Returns the IP address of the given OSPF multicast group.
pub(crate) fn multicast_addr(addr: MulticastAddr) -> &'static Ipv4Addr {
    match addr {
        MulticastAddr::AllSpfRtrs => &ALL_SPF_RTRS,
        MulticastAddr::AllDrRtrs => &ALL_DR_RTRS,
    }
}

// Joins the given OSPF multicast group.
pub(crate) fn join_multicast(
    socket: &Socket,
    addr: MulticastAddr,
    ifindex: u32,
) {
    let addr = multicast_addr(addr);
    if let Err(error) =
        nbrd_utils::socket::join_multicast_ifindex(socket, addr, ifindex)
    {
        IoError::MulticastJoinError(*addr, error).log();
    }
}

// Leaves the given OSPF multicast group.
pub(crate) fn leave_multicast(
    socket: &Socket,
    addr: MulticastAddr,
    ifindex: u32,
) {
    let addr = multicast_addr(addr);
    if let Err(error) =
        nbrd_utils::socket::leave_multicast_ifindex(socket, addr, ifindex)
    {
        IoError::MulticastJoinError(*addr, error).log();
    }
}

// Sends a single OSPF packet.
async fn send_packet(
    socket: &AsyncFd<Socket>,
    ifname: &str,
    ifindex: u32,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    packet: &Packet,
    auth: Option<&AuthCtx>,
) -> Result<usize, IoError> {
    Debug::PacketTx(ifname, &dst, packet).log();

    // Encode packet.
    let buf = packet.encode(auth);

    // Send packet.
    let iov = [IoSlice::new(&buf)];
    let sockaddr: SockaddrIn = std::net::SocketAddrV4::new(dst, 0).into();
    let pktinfo = libc::in_pktinfo {
        ipi_ifindex: ifindex as i32,
        ipi_spec_dst: libc::in_addr { s_addr: 0 },
        ipi_addr: libc::in_addr {
            s_addr: u32::from(src).to_be(),
        },
    };
    let cmsg = [socket::ControlMessage::Ipv4PacketInfo(&pktinfo)];
    socket
        .async_io(tokio::io::Interest::WRITABLE, |socket| {
            socket::sendmsg(
                socket.as_raw_fd(),
                &iov,
                &cmsg,
                socket::MsgFlags::empty(),
                Some(&sockaddr),
            )
            .map_err(|errno| errno.into())
        })
        .await
        .map_err(IoError::SendError)
}

// Network Tx loop: drains the packet queue of an interface.
pub(crate) async fn write_loop(
    socket: Arc<AsyncFd<Socket>>,
    ifname: String,
    ifindex: u32,
    src: Ipv4Addr,
    auth: Option<AuthCtx>,
    mut net_tx_packetc: nbrd_utils::UnboundedReceiver<NetTxPacketMsg>,
) {
    while let Some(NetTxPacketMsg { packet, dst }) =
        net_tx_packetc.recv().await
    {
        // Send packet to all requested destinations.
        for dst in dst {
            if let Err(error) = send_packet(
                &socket,
                &ifname,
                ifindex,
                src,
                dst,
                &packet,
                auth.as_ref(),
            )
            .await
            {
                error.log();
            }
        }
    }
}

// Network Rx loop: decodes received packets and relays them to the
// instance task.
pub(crate) async fn read_loop(
    socket: Arc<AsyncFd<Socket>>,
    iface_id: InterfaceId,
    auth: Option<AuthCtx>,
    net_packet_rxp: Sender<NetRxPacketMsg>,
) -> Result<(), SendError<NetRxPacketMsg>> {
    let mut buf = [0; 16384];
    let mut iov = [IoSliceMut::new(&mut buf)];
    let mut cmsgspace = nix::cmsg_space!(libc::in_pktinfo);

    loop {
        // Receive data packet.
        match socket
            .async_io(tokio::io::Interest::READABLE, |socket| {
                match socket::recvmsg::<SockaddrIn>(
                    socket.as_raw_fd(),
                    &mut iov,
                    Some(&mut cmsgspace),
                    socket::MsgFlags::empty(),
                ) {
                    Ok(msg) => {
                        // Retrieve source and destination addresses.
                        let src = msg
                            .address
                            .as_ref()
                            .map(|addr| Ipv4Addr::from(addr.ip()));
                        let dst = msg.cmsgs().ok().and_then(|cmsgs| {
                            cmsgs.into_iter().find_map(|cmsg| {
                                if let socket::ControlMessageOwned::Ipv4PacketInfo(pktinfo) = cmsg {
                                    Some(Ipv4Addr::from(
                                        pktinfo.ipi_spec_dst.s_addr.to_be(),
                                    ))
                                } else {
                                    None
                                }
                            })
                        });
                        Ok((src, dst, msg.bytes))
                    }
                    Err(errno) => Err(errno.into()),
                }
            })
            .await
        {
            Ok((src, dst, bytes)) => {
                let Some(src) = src else {
                    IoError::RecvMissingSourceAddr.log();
                    continue;
                };
                let Some(dst) = dst else {
                    IoError::RecvMissingAncillaryData.log();
                    continue;
                };

                // Decode packet.
                let mut buf = Bytes::copy_from_slice(&iov[0].deref()[0..bytes]);
                let packet = validate_ip_hdr(&mut buf)
                    .and_then(|_| Packet::decode(&mut buf, auth.as_ref()));
                let msg = NetRxPacketMsg {
                    iface_key: iface_id.into(),
                    src,
                    dst,
                    packet,
                };
                net_packet_rxp.send(msg).await?;
            }
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {
                // Retry if the syscall was interrupted (EINTR).
                continue;
            }
            Err(error) => {
                IoError::RecvError(error).log();
            }
        }
    }
}

// ===== helper functions =====

// Validates and strips the IPv4 header of a received raw-socket packet.
fn validate_ip_hdr(buf: &mut Bytes) -> DecodeResult<()> {
    let buf_len = buf.len() as u16;

    // Parse IHL (header length).
    let hdr_len = buf.get_u8() & 0x0F;

    // Ignore TOS.
    let _ = buf.get_u8();

    // Parse and validate the IP header total length.
    let total_len = buf.get_u16();
    if buf_len != total_len {
        return Err(DecodeError::InvalidIpHdrLength(total_len));
    }

    // Move past the IP header.
    buf.advance(((hdr_len << 2) - 4) as usize);

    Ok(())
}
