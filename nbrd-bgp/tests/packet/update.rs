//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::collections::VecDeque;
use std::sync::LazyLock as Lazy;

use nbrd_bgp::packet::attribute::{
    AsPath, AsPathSegment, Attrs, BaseAttrs,
};
use nbrd_bgp::packet::consts::{AsPathSegmentType, Origin};
use nbrd_bgp::packet::message::{
    Message, MpReachNlri, MpUnreachNlri, ReachNlri, UnreachNlri, UpdateMsg,
};

use super::{test_decode_msg, test_encode_msg};

fn base_attrs(as_path: AsPath, local_pref: Option<u32>) -> Attrs {
    Attrs {
        base: BaseAttrs {
            origin: Origin::Igp,
            as_path,
            as4_path: None,
            nexthop: None,
            ll_nexthop: None,
            med: None,
            local_pref,
            aggregator: None,
            as4_aggregator: None,
            atomic_aggregate: false,
        },
        comm: None,
        unknown: vec![],
    }
}

static UPDATE1: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x36, 0x02, 0x00, 0x00, 0x00,
            0x1c, 0x40, 0x01, 0x01, 0x00, 0x50, 0x02, 0x00, 0x06, 0x02, 0x01,
            0x00, 0x00, 0xfd, 0xe9, 0x40, 0x03, 0x04, 0x0a, 0x00, 0x00, 0x02,
            0x40, 0x05, 0x04, 0x00, 0x00, 0x00, 0x64, 0x10, 0x0a, 0x01,
        ],
        Message::Update(UpdateMsg {
            reach: Some(ReachNlri {
                prefixes: vec!["10.1.0.0/16".parse().unwrap()],
                nexthop: "10.0.0.2".parse().unwrap(),
            }),
            unreach: None,
            mp_reach: None,
            mp_unreach: None,
            attrs: Some(base_attrs(
                AsPath {
                    segments: VecDeque::from([AsPathSegment {
                        seg_type: AsPathSegmentType::Sequence,
                        members: VecDeque::from([65001]),
                    }]),
                },
                Some(100),
            )),
        }),
    )
});

static UPDATE2: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x1a, 0x02, 0x00, 0x03, 0x10,
            0x0a, 0x01, 0x00, 0x00,
        ],
        Message::Update(UpdateMsg {
            reach: None,
            unreach: Some(UnreachNlri {
                prefixes: vec!["10.1.0.0/16".parse().unwrap()],
            }),
            mp_reach: None,
            mp_unreach: None,
            attrs: None,
        }),
    )
});

static UPDATE3: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x46, 0x02, 0x00, 0x00, 0x00,
            0x2f, 0x90, 0x0e, 0x00, 0x1c, 0x00, 0x02, 0x01, 0x10, 0x20, 0x01,
            0x0d, 0xb8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x02, 0x00, 0x30, 0x20, 0x01, 0x0d, 0xb8, 0x00, 0x01,
            0x40, 0x01, 0x01, 0x00, 0x50, 0x02, 0x00, 0x00, 0x40, 0x05, 0x04,
            0x00, 0x00, 0x00, 0x64,
        ],
        Message::Update(UpdateMsg {
            reach: None,
            unreach: None,
            mp_reach: Some(MpReachNlri::Ipv6Unicast {
                prefixes: vec!["2001:db8:1::/48".parse().unwrap()],
                nexthop: "2001:db8::2".parse().unwrap(),
                ll_nexthop: None,
            }),
            mp_unreach: None,
            attrs: Some(base_attrs(AsPath::default(), Some(100))),
        }),
    )
});

static UPDATE4: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x25, 0x02, 0x00, 0x00, 0x00,
            0x0e, 0x90, 0x0f, 0x00, 0x0a, 0x00, 0x02, 0x01, 0x30, 0x20, 0x01,
            0x0d, 0xb8, 0x00, 0x01,
        ],
        Message::Update(UpdateMsg {
            reach: None,
            unreach: None,
            mp_reach: None,
            mp_unreach: Some(MpUnreachNlri::Ipv6Unicast {
                prefixes: vec!["2001:db8:1::/48".parse().unwrap()],
            }),
            attrs: None,
        }),
    )
});

#[test]
fn test_encode_update1() {
    let (ref bytes, ref msg) = *UPDATE1;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update1() {
    let (ref bytes, ref msg) = *UPDATE1;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_update2() {
    let (ref bytes, ref msg) = *UPDATE2;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update2() {
    let (ref bytes, ref msg) = *UPDATE2;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_update3() {
    let (ref bytes, ref msg) = *UPDATE3;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update3() {
    let (ref bytes, ref msg) = *UPDATE3;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_update4() {
    let (ref bytes, ref msg) = *UPDATE4;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update4() {
    let (ref bytes, ref msg) = *UPDATE4;
    test_decode_msg(bytes, msg);
}

// An IPv6 nexthop must never be an IPv4-mapped address. The UPDATE is
// treated as a withdrawal of the carried prefixes.
#[test]
fn test_decode_ipv4_mapped_nexthop() {
    use nbrd_bgp::neighbor::PeerType;
    use nbrd_bgp::packet::message::DecodeCxt;

    let (ref bytes, _) = *UPDATE3;
    let mut bytes = bytes.clone();
    // Rewrite the nexthop to ::ffff:10.0.0.2.
    let mapped: std::net::Ipv6Addr = "::ffff:10.0.0.2".parse().unwrap();
    bytes[31..47].copy_from_slice(&mapped.octets());

    let cxt = DecodeCxt {
        peer_type: PeerType::Internal,
        peer_as: 65001,
        capabilities: Default::default(),
    };
    let msg = Message::decode(&bytes, &cxt).unwrap();
    let Message::Update(msg) = msg else {
        panic!("expected an UPDATE message");
    };
    assert!(msg.mp_reach.is_none());
    assert!(msg.attrs.is_none());
}
