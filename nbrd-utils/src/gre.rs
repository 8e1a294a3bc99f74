//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

// GRE IP protocol number.
pub const GRE_IP_PROTO: u8 = 47;

// Overhead of the outer IPv4 header plus the base GRE header.
pub const GRE_BASE_OVERHEAD: u16 = 24;

bitflags! {
    // Flag bits of the first GRE header octet.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct GreFlags: u8 {
        const CSUM = 0x80;
        const KEY = 0x20;
        const SEQ = 0x10;
    }
}

//
// GRE header (RFC 2784 base format plus the RFC 2890 key and sequence
// number extensions).
//
// Encoding format:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |C| |K|S| Reserved0       | Ver |         Protocol Type         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |      Checksum (optional)      |       Reserved1 (Optional)    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         Key (optional)                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                 Sequence Number (Optional)                    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct GreHdr {
    pub protocol_type: u16,
    pub key: Option<u32>,
    pub seqno: Option<u32>,
}

// GRE decode errors.
#[derive(Debug, Eq, PartialEq)]
pub enum GreDecodeError {
    IncompleteHeader,
    InvalidVersion(u8),
    UnsupportedFlags(u8),
}

// ===== impl GreHdr =====

impl GreHdr {
    const VERSION: u8 = 0;

    // Encodes the GRE header into the provided buffer.
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut flags = GreFlags::empty();
        if self.key.is_some() {
            flags.insert(GreFlags::KEY);
        }
        if self.seqno.is_some() {
            flags.insert(GreFlags::SEQ);
        }

        buf.put_u8(flags.bits());
        buf.put_u8(Self::VERSION);
        buf.put_u16(self.protocol_type);
        if let Some(key) = self.key {
            buf.put_u32(key);
        }
        if let Some(seqno) = self.seqno {
            buf.put_u32(seqno);
        }
    }

    // Decodes a GRE header from the provided buffer, leaving the buffer
    // positioned at the start of the payload.
    pub fn decode(buf: &mut Bytes) -> Result<Self, GreDecodeError> {
        if buf.remaining() < 4 {
            return Err(GreDecodeError::IncompleteHeader);
        }

        let flags_raw = buf.get_u8();
        let flags = GreFlags::from_bits_truncate(flags_raw);
        // Checksum and the reserved routing bits are never produced by the
        // tunnels this system configures.
        if flags_raw & !(GreFlags::KEY | GreFlags::SEQ).bits() != 0 {
            return Err(GreDecodeError::UnsupportedFlags(flags_raw));
        }

        let version = buf.get_u8() & 0x07;
        if version != Self::VERSION {
            return Err(GreDecodeError::InvalidVersion(version));
        }

        let protocol_type = buf.get_u16();

        let mut key = None;
        if flags.contains(GreFlags::KEY) {
            if buf.remaining() < 4 {
                return Err(GreDecodeError::IncompleteHeader);
            }
            key = Some(buf.get_u32());
        }

        let mut seqno = None;
        if flags.contains(GreFlags::SEQ) {
            if buf.remaining() < 4 {
                return Err(GreDecodeError::IncompleteHeader);
            }
            seqno = Some(buf.get_u32());
        }

        Ok(GreHdr {
            protocol_type,
            key,
            seqno,
        })
    }

    // Returns the per-packet overhead in octets of a tunnel using this
    // header, outer IPv4 header included. Used to derive the tunnel MTU.
    pub fn overhead(&self) -> u16 {
        let mut overhead = GRE_BASE_OVERHEAD;
        if self.key.is_some() {
            overhead += 4;
        }
        if self.seqno.is_some() {
            overhead += 4;
        }
        overhead
    }
}

impl std::fmt::Display for GreDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GreDecodeError::IncompleteHeader => {
                write!(f, "incomplete GRE header")
            }
            GreDecodeError::InvalidVersion(version) => {
                write!(f, "invalid GRE version: {}", version)
            }
            GreDecodeError::UnsupportedFlags(flags) => {
                write!(f, "unsupported GRE flags: {:#x}", flags)
            }
        }
    }
}

impl std::error::Error for GreDecodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_header() {
        let hdr = GreHdr {
            protocol_type: 0x0800,
            key: None,
            seqno: None,
        };
        let mut buf = BytesMut::new();
        hdr.encode(&mut buf);
        assert_eq!(buf.as_ref(), [0x00, 0x00, 0x08, 0x00]);
        assert_eq!(hdr.overhead(), 24);

        let mut bytes = buf.freeze();
        assert_eq!(GreHdr::decode(&mut bytes).unwrap(), hdr);
    }

    #[test]
    fn key_and_seqno() {
        let hdr = GreHdr {
            protocol_type: 0x0800,
            key: Some(0xcafe),
            seqno: Some(7),
        };
        let mut buf = BytesMut::new();
        hdr.encode(&mut buf);
        assert_eq!(
            buf.as_ref(),
            [
                0x30, 0x00, 0x08, 0x00, 0x00, 0x00, 0xca, 0xfe, 0x00, 0x00,
                0x00, 0x07,
            ]
        );
        assert_eq!(hdr.overhead(), 32);

        let mut bytes = buf.freeze();
        assert_eq!(GreHdr::decode(&mut bytes).unwrap(), hdr);
    }

    #[test]
    fn reject_checksum_flag() {
        let mut bytes =
            Bytes::from_static(&[0x80, 0x00, 0x08, 0x00, 0x00, 0x00]);
        assert_eq!(
            GreHdr::decode(&mut bytes),
            Err(GreDecodeError::UnsupportedFlags(0x80))
        );
    }
}
