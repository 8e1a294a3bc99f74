//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use nbrd_bgp::packet::message::{Message, NotificationMsg};

use super::{test_decode_msg, test_encode_msg};

static NOTIF1: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x15, 0x03, 0x04, 0x00,
        ],
        // Hold Timer Expired.
        Message::Notification(NotificationMsg {
            error_code: 4,
            error_subcode: 0,
            data: vec![],
        }),
    )
});

#[test]
fn test_encode_notif1() {
    let (ref bytes, ref msg) = *NOTIF1;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_notif1() {
    let (ref bytes, ref msg) = *NOTIF1;
    test_decode_msg(bytes, msg);
}
