//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

mod ospfv2;

use bytes::Bytes;
use nbrd_ospf::packet::lsa::Lsa;
use nbrd_ospf::packet::{AuthCtx, Packet};

//
// Helper functions.
//

fn test_encode_packet(
    bytes_expected: &[u8],
    auth: &Option<AuthCtx>,
    packet: &Packet,
) {
    let bytes_actual = packet.encode(auth.as_ref());
    assert_eq!(bytes_expected, bytes_actual.as_ref());
}

fn test_decode_packet(
    bytes: &[u8],
    auth: &Option<AuthCtx>,
    packet_expected: &Packet,
) {
    let mut buf = Bytes::copy_from_slice(bytes);
    let packet_actual = Packet::decode(&mut buf, auth.as_ref()).unwrap();
    assert_eq!(*packet_expected, packet_actual);
}

fn test_encode_lsa(bytes_expected: &[u8], lsa: &Lsa) {
    assert_eq!(bytes_expected, lsa.raw.as_ref());
}

fn test_decode_lsa(bytes: &[u8], lsa_expected: &Lsa) {
    let mut bytes = Bytes::copy_from_slice(bytes);
    let lsa_actual = Lsa::decode(&mut bytes).unwrap();
    assert_eq!(*lsa_expected, lsa_actual);
}
