//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::LazyLock as Lazy;

use maplit::btreeset;
use nbrd_ospf::packet::lsa::{
    Lsa, LsaAsExternal, LsaAsExternalFlags, LsaBody, LsaKey, LsaNetwork,
    LsaRouter, LsaRouterFlags, LsaRouterLink, LsaRouterLinkType, LsaTypeCode,
};
use nbrd_ospf::packet::{
    AuthCtx, DbDesc, DbDescFlags, Hello, LsAck, LsRequest, LsUpdate, Options,
    Packet, PacketHdr, PacketType,
};

use super::{
    test_decode_lsa, test_decode_packet, test_encode_lsa, test_encode_packet,
};

//
// Test packets.
//

static HELLO1: Lazy<(Vec<u8>, Option<AuthCtx>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x01, 0x00, 0x30, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00,
            0x00, 0xf5, 0x98, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0xff, 0xff, 0xff, 0xfc, 0x00, 0x0a, 0x02, 0x01, 0x00,
            0x00, 0x00, 0x28, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x02, 0x02, 0x02, 0x02,
        ],
        None,
        Packet::Hello(Hello {
            hdr: PacketHdr {
                pkt_type: PacketType::Hello,
                router_id: Ipv4Addr::from_str("1.1.1.1").unwrap(),
                area_id: Ipv4Addr::UNSPECIFIED,
            },
            network_mask: Ipv4Addr::from_str("255.255.255.252").unwrap(),
            hello_interval: 10,
            options: Options::E,
            priority: 1,
            dead_interval: 40,
            dr: None,
            bdr: None,
            neighbors: btreeset![Ipv4Addr::from_str("2.2.2.2").unwrap()],
        }),
    )
});

static HELLO1_PWD: Lazy<(Vec<u8>, Option<AuthCtx>, Packet)> =
    Lazy::new(|| {
        (
            vec![
                0x02, 0x01, 0x00, 0x30, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00,
                0x00, 0x00, 0xf5, 0x97, 0x00, 0x01, 0x6e, 0x62, 0x72, 0x64,
                0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xfc, 0x00, 0x0a,
                0x02, 0x01, 0x00, 0x00, 0x00, 0x28, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x02, 0x02, 0x02, 0x02,
            ],
            Some(AuthCtx {
                password: *b"nbrd\0\0\0\0",
            }),
            Packet::Hello(Hello {
                hdr: PacketHdr {
                    pkt_type: PacketType::Hello,
                    router_id: Ipv4Addr::from_str("1.1.1.1").unwrap(),
                    area_id: Ipv4Addr::UNSPECIFIED,
                },
                network_mask: Ipv4Addr::from_str("255.255.255.252").unwrap(),
                hello_interval: 10,
                options: Options::E,
                priority: 1,
                dead_interval: 40,
                dr: None,
                bdr: None,
                neighbors: btreeset![Ipv4Addr::from_str("2.2.2.2").unwrap()],
            }),
        )
    });

static HELLO2: Lazy<(Vec<u8>, Option<AuthCtx>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x01, 0x00, 0x34, 0x02, 0x02, 0x02, 0x02, 0x00, 0x00, 0x00,
            0x00, 0xda, 0x74, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0xff, 0xff, 0xff, 0x00, 0x00, 0x0a, 0x02, 0x14, 0x00,
            0x00, 0x00, 0x28, 0x0a, 0x00, 0x01, 0x02, 0x0a, 0x00, 0x01, 0x01,
            0x01, 0x01, 0x01, 0x01, 0x03, 0x03, 0x03, 0x03,
        ],
        None,
        Packet::Hello(Hello {
            hdr: PacketHdr {
                pkt_type: PacketType::Hello,
                router_id: Ipv4Addr::from_str("2.2.2.2").unwrap(),
                area_id: Ipv4Addr::UNSPECIFIED,
            },
            network_mask: Ipv4Addr::from_str("255.255.255.0").unwrap(),
            hello_interval: 10,
            options: Options::E,
            priority: 20,
            dead_interval: 40,
            dr: Some(Ipv4Addr::from_str("10.0.1.2").unwrap()),
            bdr: Some(Ipv4Addr::from_str("10.0.1.1").unwrap()),
            neighbors: btreeset![
                Ipv4Addr::from_str("1.1.1.1").unwrap(),
                Ipv4Addr::from_str("3.3.3.3").unwrap()
            ],
        }),
    )
});

static DBDESC1: Lazy<(Vec<u8>, Option<AuthCtx>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x02, 0x00, 0x20, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00,
            0x00, 0x8b, 0x4c, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x05, 0xdc, 0x02, 0x07, 0x12, 0x34, 0x56, 0x78,
        ],
        None,
        Packet::DbDesc(DbDesc {
            hdr: PacketHdr {
                pkt_type: PacketType::DbDesc,
                router_id: Ipv4Addr::from_str("1.1.1.1").unwrap(),
                area_id: Ipv4Addr::UNSPECIFIED,
            },
            mtu: 1500,
            options: Options::E,
            dd_flags: DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS,
            dd_seq_no: 0x12345678,
            lsa_hdrs: vec![],
        }),
    )
});

static ROUTER_LSA1: Lazy<(Vec<u8>, Lsa)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x01, 0x02, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
            0x01, 0x80, 0x00, 0x00, 0x01, 0xe2, 0x2c, 0x00, 0x30, 0x00, 0x00,
            0x00, 0x02, 0x02, 0x02, 0x02, 0x02, 0x0a, 0x00, 0x00, 0x01, 0x01,
            0x00, 0x00, 0x0a, 0x0a, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xfc,
            0x03, 0x00, 0x00, 0x0a,
        ],
        Lsa::new(
            1,
            Options::E,
            Ipv4Addr::from_str("1.1.1.1").unwrap(),
            Ipv4Addr::from_str("1.1.1.1").unwrap(),
            0x80000001,
            LsaBody::Router(LsaRouter {
                flags: LsaRouterFlags::empty(),
                links: vec![
                    LsaRouterLink::new(
                        LsaRouterLinkType::PointToPoint,
                        Ipv4Addr::from_str("2.2.2.2").unwrap(),
                        Ipv4Addr::from_str("10.0.0.1").unwrap(),
                        10,
                    ),
                    LsaRouterLink::new(
                        LsaRouterLinkType::StubNetwork,
                        Ipv4Addr::from_str("10.0.0.0").unwrap(),
                        Ipv4Addr::from_str("255.255.255.252").unwrap(),
                        10,
                    ),
                ],
            }),
        ),
    )
});

static NETWORK_LSA1: Lazy<(Vec<u8>, Lsa)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x01, 0x02, 0x02, 0x0a, 0x00, 0x01, 0x02, 0x02, 0x02, 0x02,
            0x02, 0x80, 0x00, 0x00, 0x01, 0x2a, 0x0f, 0x00, 0x20, 0xff, 0xff,
            0xff, 0x00, 0x01, 0x01, 0x01, 0x01, 0x02, 0x02, 0x02, 0x02,
        ],
        Lsa::new(
            1,
            Options::E,
            Ipv4Addr::from_str("10.0.1.2").unwrap(),
            Ipv4Addr::from_str("2.2.2.2").unwrap(),
            0x80000001,
            LsaBody::Network(LsaNetwork {
                mask: Ipv4Addr::from_str("255.255.255.0").unwrap(),
                attached_rtrs: btreeset![
                    Ipv4Addr::from_str("1.1.1.1").unwrap(),
                    Ipv4Addr::from_str("2.2.2.2").unwrap()
                ],
            }),
        ),
    )
});

static EXTERNAL_LSA1: Lazy<(Vec<u8>, Lsa)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x01, 0x02, 0x05, 0xcb, 0x00, 0x71, 0x00, 0x01, 0x01, 0x01,
            0x01, 0x80, 0x00, 0x00, 0x01, 0x54, 0x29, 0x00, 0x24, 0xff, 0xff,
            0xff, 0x00, 0x80, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00,
        ],
        Lsa::new(
            1,
            Options::E,
            Ipv4Addr::from_str("203.0.113.0").unwrap(),
            Ipv4Addr::from_str("1.1.1.1").unwrap(),
            0x80000001,
            LsaBody::AsExternal(LsaAsExternal {
                mask: Ipv4Addr::from_str("255.255.255.0").unwrap(),
                flags: LsaAsExternalFlags::E,
                metric: 20,
                fwd_addr: None,
                tag: 0,
            }),
        ),
    )
});

static LSUPD1: Lazy<(Vec<u8>, Option<AuthCtx>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x04, 0x00, 0x4c, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00,
            0x00, 0x77, 0x30, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x02, 0x01, 0x01,
            0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x80, 0x00, 0x00, 0x01,
            0xe2, 0x2c, 0x00, 0x30, 0x00, 0x00, 0x00, 0x02, 0x02, 0x02, 0x02,
            0x02, 0x0a, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00, 0x0a, 0x0a, 0x00,
            0x00, 0x00, 0xff, 0xff, 0xff, 0xfc, 0x03, 0x00, 0x00, 0x0a,
        ],
        None,
        Packet::LsUpdate(LsUpdate {
            hdr: PacketHdr {
                pkt_type: PacketType::LsUpdate,
                router_id: Ipv4Addr::from_str("1.1.1.1").unwrap(),
                area_id: Ipv4Addr::UNSPECIFIED,
            },
            lsas: vec![ROUTER_LSA1.1.clone()],
        }),
    )
});

static LSREQ1: Lazy<(Vec<u8>, Option<AuthCtx>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x03, 0x00, 0x24, 0x02, 0x02, 0x02, 0x02, 0x00, 0x00, 0x00,
            0x00, 0xf5, 0xcf, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
            0x01, 0x01, 0x01,
        ],
        None,
        Packet::LsRequest(LsRequest {
            hdr: PacketHdr {
                pkt_type: PacketType::LsRequest,
                router_id: Ipv4Addr::from_str("2.2.2.2").unwrap(),
                area_id: Ipv4Addr::UNSPECIFIED,
            },
            entries: vec![LsaKey {
                lsa_type: LsaTypeCode::Router.into(),
                adv_rtr: Ipv4Addr::from_str("1.1.1.1").unwrap(),
                lsa_id: Ipv4Addr::from_str("1.1.1.1").unwrap(),
            }],
        }),
    )
});

static LSACK1: Lazy<(Vec<u8>, Option<AuthCtx>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x05, 0x00, 0x2c, 0x02, 0x02, 0x02, 0x02, 0x00, 0x00, 0x00,
            0x00, 0x91, 0x66, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x01, 0x02, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
            0x01, 0x01, 0x01, 0x80, 0x00, 0x00, 0x01, 0xe2, 0x2c, 0x00, 0x30,
        ],
        None,
        Packet::LsAck(LsAck {
            hdr: PacketHdr {
                pkt_type: PacketType::LsAck,
                router_id: Ipv4Addr::from_str("2.2.2.2").unwrap(),
                area_id: Ipv4Addr::UNSPECIFIED,
            },
            lsa_hdrs: vec![ROUTER_LSA1.1.hdr],
        }),
    )
});

//
// Tests.
//

#[test]
fn test_encode_hello1() {
    let (ref bytes, ref auth, ref hello) = *HELLO1;
    test_encode_packet(bytes, auth, hello);
}

#[test]
fn test_decode_hello1() {
    let (ref bytes, ref auth, ref hello) = *HELLO1;
    test_decode_packet(bytes, auth, hello);
}

#[test]
fn test_encode_hello1_pwd() {
    let (ref bytes, ref auth, ref hello) = *HELLO1_PWD;
    test_encode_packet(bytes, auth, hello);
}

#[test]
fn test_decode_hello1_pwd() {
    let (ref bytes, ref auth, ref hello) = *HELLO1_PWD;
    test_decode_packet(bytes, auth, hello);
}

#[test]
fn test_decode_hello1_pwd_mismatch() {
    use bytes::Bytes;

    let (ref bytes, _, _) = *HELLO1_PWD;
    let auth = AuthCtx {
        password: *b"other\0\0\0",
    };
    let mut buf = Bytes::copy_from_slice(bytes);
    assert!(Packet::decode(&mut buf, Some(&auth)).is_err());
}

#[test]
fn test_encode_hello2() {
    let (ref bytes, ref auth, ref hello) = *HELLO2;
    test_encode_packet(bytes, auth, hello);
}

#[test]
fn test_decode_hello2() {
    let (ref bytes, ref auth, ref hello) = *HELLO2;
    test_decode_packet(bytes, auth, hello);
}

#[test]
fn test_decode_corrupted_checksum() {
    use bytes::Bytes;

    let (ref bytes, _, _) = *HELLO1;
    let mut bytes = bytes.clone();
    bytes[30] ^= 0xff;
    let mut buf = Bytes::copy_from_slice(&bytes);
    assert!(Packet::decode(&mut buf, None).is_err());
}

#[test]
fn test_encode_dbdesc1() {
    let (ref bytes, ref auth, ref dbdesc) = *DBDESC1;
    test_encode_packet(bytes, auth, dbdesc);
}

#[test]
fn test_decode_dbdesc1() {
    let (ref bytes, ref auth, ref dbdesc) = *DBDESC1;
    test_decode_packet(bytes, auth, dbdesc);
}

#[test]
fn test_encode_lsupd1() {
    let (ref bytes, ref auth, ref lsupd) = *LSUPD1;
    test_encode_packet(bytes, auth, lsupd);
}

#[test]
fn test_decode_lsupd1() {
    let (ref bytes, ref auth, ref lsupd) = *LSUPD1;
    test_decode_packet(bytes, auth, lsupd);
}

#[test]
fn test_encode_lsreq1() {
    let (ref bytes, ref auth, ref lsreq) = *LSREQ1;
    test_encode_packet(bytes, auth, lsreq);
}

#[test]
fn test_decode_lsreq1() {
    let (ref bytes, ref auth, ref lsreq) = *LSREQ1;
    test_decode_packet(bytes, auth, lsreq);
}

#[test]
fn test_encode_lsack1() {
    let (ref bytes, ref auth, ref lsack) = *LSACK1;
    test_encode_packet(bytes, auth, lsack);
}

#[test]
fn test_decode_lsack1() {
    let (ref bytes, ref auth, ref lsack) = *LSACK1;
    test_decode_packet(bytes, auth, lsack);
}

#[test]
fn test_encode_router_lsa1() {
    let (ref bytes, ref lsa) = *ROUTER_LSA1;
    test_encode_lsa(bytes, lsa);
}

#[test]
fn test_decode_router_lsa1() {
    let (ref bytes, ref lsa) = *ROUTER_LSA1;
    test_decode_lsa(bytes, lsa);
}

#[test]
fn test_encode_network_lsa1() {
    let (ref bytes, ref lsa) = *NETWORK_LSA1;
    test_encode_lsa(bytes, lsa);
}

#[test]
fn test_decode_network_lsa1() {
    let (ref bytes, ref lsa) = *NETWORK_LSA1;
    test_decode_lsa(bytes, lsa);
}

#[test]
fn test_encode_external_lsa1() {
    let (ref bytes, ref lsa) = *EXTERNAL_LSA1;
    test_encode_lsa(bytes, lsa);
}

#[test]
fn test_decode_external_lsa1() {
    let (ref bytes, ref lsa) = *EXTERNAL_LSA1;
    test_decode_lsa(bytes, lsa);
}

#[test]
fn test_decode_lsa_corrupted_checksum() {
    use bytes::Bytes;

    let (ref bytes, _) = *ROUTER_LSA1;
    let mut bytes = bytes.clone();
    bytes[20] ^= 0xff;
    let mut buf = Bytes::copy_from_slice(&bytes);
    let lsa = Lsa::decode(&mut buf).unwrap();
    assert!(lsa.validate().is_err());
}
