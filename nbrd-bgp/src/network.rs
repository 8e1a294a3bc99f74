//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use nbrd_utils::Sender;
use nbrd_utils::ip::{AddressFamily, IpAddrExt};
use nbrd_utils::socket::{
    OwnedReadHalf, OwnedWriteHalf, TTL_MAX, TcpConnInfo, TcpListener,
    TcpSocket, TcpStream, TcpStreamExt, bgp_socket, bind, set_tcp_ttl,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc::error::SendError;

use crate::error::{Error, IoError};
use crate::neighbor::{Neighbor, PeerType};
use crate::packet::message::{DecodeCxt, EncodeCxt, Message};
use crate::tasks::messages::input::{NbrRxMsg, TcpAcceptMsg};
use crate::tasks::messages::output::NbrTxMsg;

const BGP_PORT: u16 = 179;

// ===== global functions =====

// Creates a TCP listening socket bound to the BGP port.
pub(crate) fn listen_socket(
    af: AddressFamily,
) -> Result<TcpListener, std::io::Error> {
    // Create TCP socket.
    let addr = IpAddr::unspecified(af);
    let socket = bgp_socket(addr)?;

    // Bind socket.
    bind(&socket, addr, BGP_PORT)?;

    // Set TTL to max for outgoing packets.
    set_tcp_ttl(&socket, addr, TTL_MAX)?;

    // Convert the socket into a TcpListener.
    socket.listen(4096)
}

// Accept loop of a BGP listening socket.
pub(crate) async fn listen_loop(
    listener: Arc<TcpListener>,
    tcp_acceptp: Sender<TcpAcceptMsg>,
) -> Result<(), SendError<TcpAcceptMsg>> {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => match stream.conn_info() {
                Ok(conn_info) => {
                    let msg = TcpAcceptMsg {
                        stream: Some(stream),
                        conn_info,
                    };
                    tcp_acceptp.send(msg).await?;
                }
                Err(error) => {
                    IoError::TcpInfoError(error).log();
                }
            },
            Err(error) => {
                IoError::TcpAcceptError(error).log();
            }
        }
    }
}

// Initializes an accepted stream according to the neighbor configuration.
pub(crate) fn accepted_stream_init(
    stream: &TcpStream,
    nbr: &Neighbor,
) -> Result<(), std::io::Error> {
    // Set TTL.
    nbrd_utils::socket::set_stream_ttl(
        stream,
        nbr.remote_addr,
        nbr_ttl(nbr),
    )
}

// Establishes a TCP connection to the given neighbor address.
pub(crate) async fn connect(
    remote_addr: IpAddr,
    local_addr: Option<IpAddr>,
    ttl: u8,
) -> Result<(TcpStream, TcpConnInfo), Error> {
    // Create TCP socket.
    let socket: TcpSocket =
        bgp_socket(remote_addr).map_err(IoError::TcpSocketError)?;

    // Bind socket.
    if let Some(local_addr) = local_addr {
        bind(&socket, local_addr, 0).map_err(IoError::TcpSocketError)?;
    }

    // Set TTL.
    set_tcp_ttl(&socket, remote_addr, ttl)
        .map_err(IoError::TcpSocketError)?;

    // Connect to the remote address on the BGP port.
    let sockaddr = SocketAddr::from((remote_addr, BGP_PORT));
    let stream = socket
        .connect(sockaddr)
        .await
        .map_err(IoError::TcpConnectError)?;

    // Obtain TCP connection address/port information.
    let conn_info = stream.conn_info().map_err(IoError::TcpInfoError)?;

    Ok((stream, conn_info))
}

// Write loop of a neighbor connection.
pub(crate) async fn nbr_write_loop(
    mut stream: OwnedWriteHalf,
    mut cxt: EncodeCxt,
    mut nbr_msg_txc: nbrd_utils::UnboundedReceiver<NbrTxMsg>,
) {
    while let Some(msg) = nbr_msg_txc.recv().await {
        match msg {
            // Send message to the peer.
            NbrTxMsg::SendMessage { msg, .. } => {
                let buf = msg.encode(&cxt);
                if let Err(error) = stream.write_all(&buf).await {
                    IoError::TcpSendError(error).log();
                }
            }
            // Update negotiated capabilities.
            NbrTxMsg::UpdateCapabilities(caps) => cxt.capabilities = caps,
        }
    }
}

// Read loop of a neighbor connection.
pub(crate) async fn nbr_read_loop(
    mut stream: OwnedReadHalf,
    nbr_addr: IpAddr,
    mut cxt: DecodeCxt,
    nbr_msg_rxp: Sender<NbrRxMsg>,
) -> Result<(), SendError<NbrRxMsg>> {
    const BUF_SIZE: usize = 65535;
    let mut buf = [0; BUF_SIZE];
    let mut data = Vec::with_capacity(BUF_SIZE);

    loop {
        // Read data from the network.
        match stream.read(&mut buf).await {
            Ok(0) => {
                // Notify that the connection was closed by the remote end.
                let msg = NbrRxMsg {
                    nbr_addr,
                    msg: Err(crate::error::NbrRxError::TcpConnClosed),
                };
                nbr_msg_rxp.send(msg).await?;
                return Ok(());
            }
            Ok(num_bytes) => data.extend_from_slice(&buf[..num_bytes]),
            Err(error) => {
                IoError::TcpRecvError(error).log();
                continue;
            }
        };

        // Decode message(s).
        while let Some(msg_size) = Message::get_message_len(&data) {
            let msg = Message::decode(&data[0..msg_size], &cxt)
                .map_err(crate::error::NbrRxError::MsgDecodeError);
            data.drain(..msg_size);

            // Keep track of received capabilities as they influence how
            // subsequent messages are decoded.
            if let Ok(Message::Open(msg)) = &msg {
                let capabilities = msg
                    .capabilities
                    .iter()
                    .map(|cap| cap.as_negotiated())
                    .collect::<BTreeSet<_>>();
                cxt.capabilities = capabilities;
            }

            // Notify that a BGP message was received.
            let msg = NbrRxMsg { nbr_addr, msg };
            nbr_msg_rxp.send(msg).await?;
        }
    }
}

// ===== helper functions =====

// Returns the TTL used for the neighbor's TCP connection.
pub(crate) fn nbr_ttl(nbr: &Neighbor) -> u8 {
    match nbr.peer_type {
        PeerType::Internal => TTL_MAX,
        PeerType::External => 1,
    }
}
