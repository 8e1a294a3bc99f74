//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

mod keepalive;
mod notification;
mod open;
mod route_refresh;
mod update;

use nbrd_bgp::neighbor::PeerType;
use nbrd_bgp::packet::consts::{Afi, Safi};
use nbrd_bgp::packet::message::{
    DecodeCxt, EncodeCxt, Message, NegotiatedCapability,
};

//
// Helper functions.
//

fn test_encode_msg(bytes_expected: &[u8], msg: &Message) {
    let cxt = EncodeCxt {
        capabilities: [NegotiatedCapability::FourOctetAsNumber].into(),
    };

    let bytes_actual = msg.encode(&cxt);
    assert_eq!(bytes_expected, bytes_actual.as_ref());
}

fn test_decode_msg(bytes: &[u8], msg_expected: &Message) {
    let cxt = DecodeCxt {
        peer_type: PeerType::Internal,
        peer_as: 65001,
        capabilities: [
            NegotiatedCapability::FourOctetAsNumber,
            NegotiatedCapability::MultiProtocol {
                afi: Afi::Ipv6,
                safi: Safi::Unicast,
            },
        ]
        .into(),
    };

    let msg_size = Message::get_message_len(bytes)
        .expect("buffer doesn't contain a full BGP message");
    let msg_actual = Message::decode(&bytes[0..msg_size], &cxt).unwrap();
    assert_eq!(*msg_expected, msg_actual);
}
