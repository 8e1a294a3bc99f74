//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::LazyLock as Lazy;

use nbrd_bgp::packet::consts::{Afi, BGP_VERSION, Safi};
use nbrd_bgp::packet::message::{Capability, Message, OpenMsg};

use super::{test_decode_msg, test_encode_msg};

static OPEN1: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x39, 0x01, 0x04, 0xfd, 0xe9,
            0x00, 0x5a, 0x01, 0x01, 0x01, 0x01, 0x1c, 0x02, 0x06, 0x01, 0x04,
            0x00, 0x01, 0x00, 0x01, 0x02, 0x06, 0x01, 0x04, 0x00, 0x02, 0x00,
            0x01, 0x02, 0x02, 0x02, 0x00, 0x02, 0x06, 0x41, 0x04, 0x00, 0x00,
            0xfd, 0xe9,
        ],
        Message::Open(OpenMsg {
            version: BGP_VERSION,
            my_as: 65001,
            holdtime: 90,
            identifier: Ipv4Addr::from_str("1.1.1.1").unwrap(),
            capabilities: [
                Capability::MultiProtocol {
                    afi: Afi::Ipv4,
                    safi: Safi::Unicast,
                },
                Capability::MultiProtocol {
                    afi: Afi::Ipv6,
                    safi: Safi::Unicast,
                },
                Capability::RouteRefresh,
                Capability::FourOctetAsNumber { asn: 65001 },
            ]
            .into(),
        }),
    )
});

#[test]
fn test_encode_open1() {
    let (ref bytes, ref msg) = *OPEN1;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_open1() {
    let (ref bytes, ref msg) = *OPEN1;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_open_real_as() {
    let Message::Open(ref msg) = OPEN1.1 else {
        unreachable!();
    };
    assert_eq!(msg.real_as(), 65001);
}

#[test]
fn test_decode_bad_marker() {
    use nbrd_bgp::neighbor::PeerType;
    use nbrd_bgp::packet::message::DecodeCxt;

    let (ref bytes, _) = *OPEN1;
    let mut bytes = bytes.clone();
    bytes[0] = 0;

    let cxt = DecodeCxt {
        peer_type: PeerType::Internal,
        peer_as: 65001,
        capabilities: Default::default(),
    };
    assert!(Message::decode(&bytes, &cxt).is_err());
}
