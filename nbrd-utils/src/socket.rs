//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::os::fd::AsRawFd;

use serde::{Deserialize, Serialize};
use socket2::InterfaceIndexOrAddress;

// Re-exported so all components use the same socket vocabulary.
pub use socket2::Socket;
pub use tokio::io::unix::AsyncFd;
pub use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
pub use tokio::net::{TcpListener, TcpSocket, TcpStream};

// Maximum IP TTL / IPv6 hop limit.
pub const TTL_MAX: u8 = 255;

// OSPF IP protocol number.
pub const OSPF_IP_PROTO: i32 = 89;

// Address and port information of an established TCP connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct TcpConnInfo {
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
}

// Extension methods for TCP streams.
pub trait TcpStreamExt {
    // Retrieve the addresses and ports of both connection endpoints.
    fn conn_info(&self) -> Result<TcpConnInfo, std::io::Error>;
}

impl TcpStreamExt for TcpStream {
    fn conn_info(&self) -> Result<TcpConnInfo, std::io::Error> {
        let local = self.local_addr()?;
        let remote = self.peer_addr()?;
        Ok(TcpConnInfo {
            local_addr: local.ip(),
            local_port: local.port(),
            remote_addr: remote.ip(),
            remote_port: remote.port(),
        })
    }
}

// ===== global functions =====

// Creates a raw socket for OSPFv2 operation on the given interface.
pub fn ospf_socket(ifname: &str) -> Result<Socket, std::io::Error> {
    use socket2::{Domain, Protocol, Type};

    let socket = Socket::new(
        Domain::IPV4,
        Type::RAW,
        Some(Protocol::from(OSPF_IP_PROTO)),
    )?;

    socket.set_nonblocking(true)?;
    socket.bind_device(Some(ifname.as_bytes()))?;
    socket.set_multicast_loop_v4(false)?;
    socket.set_multicast_ttl_v4(1)?;
    socket.set_tos(libc::IPTOS_PREC_INTERNETCONTROL as u32)?;
    set_ipv4_pktinfo(&socket, true)?;

    Ok(socket)
}

// Joins the given multicast group on the interface identified by `ifindex`.
pub fn join_multicast_ifindex(
    socket: &Socket,
    addr: &Ipv4Addr,
    ifindex: u32,
) -> Result<(), std::io::Error> {
    socket.join_multicast_v4_n(addr, &InterfaceIndexOrAddress::Index(ifindex))
}

// Leaves the given multicast group on the interface identified by `ifindex`.
pub fn leave_multicast_ifindex(
    socket: &Socket,
    addr: &Ipv4Addr,
    ifindex: u32,
) -> Result<(), std::io::Error> {
    socket.leave_multicast_v4_n(addr, &InterfaceIndexOrAddress::Index(ifindex))
}

// Enables reception of IP_PKTINFO ancillary data.
fn set_ipv4_pktinfo(
    socket: &Socket,
    value: bool,
) -> Result<(), std::io::Error> {
    let optval = value as libc::c_int;

    setsockopt(
        socket,
        libc::IPPROTO_IP,
        libc::IP_PKTINFO,
        &optval as *const _ as *const libc::c_void,
        std::mem::size_of::<libc::c_int>() as libc::socklen_t,
    )
}

// Sets the TTL (IPv4) or unicast hop limit (IPv6) of a TCP socket.
pub fn set_tcp_ttl(
    socket: &TcpSocket,
    addr: IpAddr,
    ttl: u8,
) -> Result<(), std::io::Error> {
    let sockref = socket2::SockRef::from(socket);
    match addr {
        IpAddr::V4(_) => sockref.set_ttl(ttl as u32),
        IpAddr::V6(_) => sockref.set_unicast_hops_v6(ttl as u32),
    }
}

// Sets the TTL (IPv4) or unicast hop limit (IPv6) of an established TCP
// stream.
pub fn set_stream_ttl(
    stream: &TcpStream,
    addr: IpAddr,
    ttl: u8,
) -> Result<(), std::io::Error> {
    let sockref = socket2::SockRef::from(stream);
    match addr {
        IpAddr::V4(_) => sockref.set_ttl(ttl as u32),
        IpAddr::V6(_) => sockref.set_unicast_hops_v6(ttl as u32),
    }
}

// Creates a TCP socket of the given address family with the options shared
// by the BGP listener and the BGP connect path.
pub fn bgp_socket(addr: IpAddr) -> Result<TcpSocket, std::io::Error> {
    let socket = match addr {
        IpAddr::V4(_) => TcpSocket::new_v4()?,
        IpAddr::V6(_) => {
            let socket = TcpSocket::new_v6()?;
            socket2::SockRef::from(&socket).set_only_v6(true)?;
            socket
        }
    };

    let sockref = socket2::SockRef::from(&socket);
    match addr {
        IpAddr::V4(_) => {
            sockref.set_tos(libc::IPTOS_PREC_INTERNETCONTROL as u32)?;
        }
        IpAddr::V6(_) => {
            sockref
                .set_tclass_v6(libc::IPTOS_PREC_INTERNETCONTROL as u32)?;
        }
    }

    Ok(socket)
}

fn setsockopt(
    socket: &impl AsRawFd,
    level: libc::c_int,
    optname: libc::c_int,
    optval: *const libc::c_void,
    optlen: libc::socklen_t,
) -> Result<(), std::io::Error> {
    let ret = unsafe {
        libc::setsockopt(socket.as_raw_fd(), level, optname, optval, optlen)
    };
    if ret == -1 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(())
}

// Binds a socket to the given address, used for both listen and connect.
pub fn bind(
    socket: &TcpSocket,
    addr: IpAddr,
    port: u16,
) -> Result<(), std::io::Error> {
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::from((addr, port)))
}
