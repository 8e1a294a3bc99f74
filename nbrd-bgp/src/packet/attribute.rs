//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use nbrd_utils::bytes::{BytesExt, BytesMutExt};
use nbrd_utils::ip::{Ipv4AddrExt, Ipv6AddrExt};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::debug::Debug;
use crate::neighbor::PeerType;
use crate::packet::consts::{
    AS_TRANS, Afi, AsPathSegmentType, AttrFlags, AttrType, Origin, Safi,
};
use crate::packet::error::{AttrError, UpdateMessageError};
use crate::packet::message::{
    DecodeCxt, EncodeCxt, MpReachNlri, MpUnreachNlri, ReachNlri,
    decode_ipv6_prefix, encode_ipv6_prefix,
};

pub const ATTR_MIN_LEN: u16 = 3;
pub const ATTR_MIN_LEN_EXT: u16 = 4;

// Set of path attributes attached to a route.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Attrs {
    pub base: BaseAttrs,
    pub comm: Option<Comms>,
    pub unknown: Vec<UnknownAttr>,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct BaseAttrs {
    pub origin: Origin,
    pub as_path: AsPath,
    pub as4_path: Option<AsPath>,
    pub nexthop: Option<IpAddr>,
    pub ll_nexthop: Option<Ipv6Addr>,
    pub med: Option<u32>,
    pub local_pref: Option<u32>,
    pub aggregator: Option<Aggregator>,
    pub as4_aggregator: Option<Aggregator>,
    pub atomic_aggregate: bool,
}

#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AsPath {
    pub segments: VecDeque<AsPathSegment>,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AsPathSegment {
    pub seg_type: AsPathSegmentType,
    pub members: VecDeque<u32>,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Aggregator {
    pub asn: u32,
    pub identifier: Ipv4Addr,
}

// Standard community (RFC 1997).
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Comm(pub u32);

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Comms(pub BTreeSet<Comm>);

// Unrecognized optional transitive attribute, preserved for propagation
// with the Partial bit set.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, new)]
#[derive(Deserialize, Serialize)]
pub struct UnknownAttr {
    pub attr_type: u8,
    pub flags: AttrFlags,
    pub length: u16,
    pub value: Bytes,
}

// Well-known communities (RFC 1997).
pub const COMM_NO_EXPORT: u32 = 0xffffff01;
pub const COMM_NO_ADVERTISE: u32 = 0xffffff02;
pub const COMM_NO_EXPORT_SUBCONFED: u32 = 0xffffff03;

// ===== impl Attrs =====

impl Attrs {
    pub(crate) fn encode(
        &self,
        buf: &mut BytesMut,
        reach: &Option<ReachNlri>,
        mp_reach: &Option<MpReachNlri>,
        mp_unreach: &Option<MpUnreachNlri>,
        cxt: &EncodeCxt,
    ) {
        // Check whether the 4-octet AS number capability has been
        // negotiated.
        let four_byte_asn_cap = cxt
            .capabilities
            .iter()
            .any(|cap| cap.is_four_octet_as_number());

        // RFC 7606 section 5.1: the MP_REACH_NLRI attribute (if present)
        // SHALL be encoded as the very first path attribute.
        if let Some(mp_reach) = mp_reach {
            mp_reach.encode(buf);
        }
        if let Some(mp_unreach) = mp_unreach {
            mp_unreach.encode(buf);
        }

        // ORIGIN attribute.
        origin::encode(self.base.origin, buf);

        // AS_PATH attribute.
        self.base.as_path.encode(
            buf,
            AttrFlags::TRANSITIVE,
            AttrType::AsPath,
            four_byte_asn_cap,
        );

        // NEXT_HOP attribute.
        if let Some(reach) = reach {
            nexthop::encode(reach.nexthop, buf);
        }

        // MULTI_EXIT_DISC attribute.
        if let Some(metric) = self.base.med {
            med::encode(metric, buf);
        }

        // LOCAL_PREF attribute.
        if let Some(local_pref) = self.base.local_pref {
            local_pref::encode(local_pref, buf);
        }

        // ATOMIC_AGGREGATE attribute.
        if self.base.atomic_aggregate {
            atomic_aggregate::encode(buf);
        }

        // AGGREGATOR attribute.
        if let Some(aggregator) = &self.base.aggregator {
            aggregator.encode(
                buf,
                AttrFlags::TRANSITIVE | AttrFlags::OPTIONAL,
                AttrType::Aggregator,
                four_byte_asn_cap,
            );
        }

        // COMMUNITIES attribute.
        if let Some(comm) = &self.comm {
            comm.encode(buf);
        }

        // AS4_PATH attribute.
        if let Some(as4_path) = &self.base.as4_path {
            as4_path.encode(
                buf,
                AttrFlags::TRANSITIVE | AttrFlags::OPTIONAL,
                AttrType::As4Path,
                true,
            );
        }

        // AS4_AGGREGATOR attribute.
        if let Some(as4_aggregator) = &self.base.as4_aggregator {
            as4_aggregator.encode(
                buf,
                AttrFlags::TRANSITIVE | AttrFlags::OPTIONAL,
                AttrType::As4Aggregator,
                true,
            );
        }

        // Unknown transitive attributes are reflected verbatim.
        for unknown in &self.unknown {
            unknown.encode(buf);
        }
    }

    pub(crate) fn decode(
        buf: &mut Bytes,
        cxt: &DecodeCxt,
        nexthop: &mut Option<Ipv4Addr>,
        nlri_present: bool,
        mp_unreach: &mut Option<MpUnreachNlri>,
        mp_reach: &mut Option<MpReachNlri>,
    ) -> Result<Option<Self>, UpdateMessageError> {
        let mut origin = None;
        let mut as_path = None;
        let mut as4_path = None;
        let mut med = None;
        let mut local_pref = None;
        let mut aggregator = None;
        let mut as4_aggregator = None;
        let mut atomic_aggregate = false;
        let mut comm = None;
        let mut unknown = vec![];
        let mut withdraw = false;

        // Check whether the 4-octet AS number capability has been
        // negotiated.
        let four_byte_asn_cap = cxt
            .capabilities
            .iter()
            .any(|cap| cap.is_four_octet_as_number());

        // List of parsed attributes.
        let mut attr_list = HashSet::new();

        // Parse attributes.
        while buf.remaining() > 0 {
            if buf.remaining() < 2 {
                withdraw = true;
                break;
            }

            // Parse attribute flags.
            let attr_flags = buf.get_u8();
            let mut attr_flags = AttrFlags::from_bits_truncate(attr_flags);

            // Parse attribute type.
            let attr_type_raw = buf.get_u8();
            let attr_type = AttrType::from_u8(attr_type_raw);

            // Parse attribute length.
            let attr_len = if attr_flags.contains(AttrFlags::EXTENDED) {
                if buf.remaining() < 2 {
                    withdraw = true;
                    break;
                }
                buf.get_u16() as usize
            } else {
                if buf.remaining() < 1 {
                    withdraw = true;
                    break;
                }
                buf.get_u8() as usize
            };
            if attr_len > buf.remaining() {
                withdraw = true;
                break;
            }
            let mut buf = buf.copy_to_bytes(attr_len);

            // RFC 7606 section 3.c: a conflict between the Optional and
            // Transitive flags and their specified values means the
            // attribute is treated as withdrawn.
            if let Some(attr_type) = attr_type
                && (attr_flags & (AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE))
                    != attribute_flags(attr_type)
            {
                withdraw = true;
                continue;
            }

            // RFC 7606 section 3.g: repeated MP_REACH_NLRI/MP_UNREACH_NLRI
            // cause a session reset; other repeated attributes are
            // discarded except for the first occurrence.
            if !attr_list.insert(attr_type_raw) {
                if matches!(
                    attr_type,
                    Some(AttrType::MpReachNlri | AttrType::MpUnreachNlri)
                ) {
                    return Err(UpdateMessageError::MalformedAttributeList);
                } else {
                    continue;
                }
            }

            // Parse attribute value.
            match attr_type {
                // Known attribute.
                Some(attr_type) => {
                    if let Err(error) = match attr_type {
                        AttrType::Origin => {
                            origin::decode(&mut buf, &mut origin)
                        }
                        AttrType::AsPath => AsPath::decode(
                            &mut buf,
                            cxt,
                            attr_type,
                            four_byte_asn_cap,
                            &mut as_path,
                        ),
                        AttrType::Nexthop => {
                            nexthop::decode(&mut buf, nexthop)
                        }
                        AttrType::Med => med::decode(&mut buf, &mut med),
                        AttrType::LocalPref => {
                            local_pref::decode(&mut buf, cxt, &mut local_pref)
                        }
                        AttrType::AtomicAggregate => atomic_aggregate::decode(
                            &mut buf,
                            &mut atomic_aggregate,
                        ),
                        AttrType::Aggregator => Aggregator::decode(
                            &mut buf,
                            attr_type,
                            four_byte_asn_cap,
                            &mut aggregator,
                        ),
                        AttrType::Communities => {
                            Comms::decode(&mut buf, &mut comm)
                        }
                        AttrType::MpReachNlri => {
                            MpReachNlri::decode(&mut buf, mp_reach)
                        }
                        AttrType::MpUnreachNlri => {
                            MpUnreachNlri::decode(&mut buf, mp_unreach)
                        }
                        AttrType::As4Path => AsPath::decode(
                            &mut buf,
                            cxt,
                            attr_type,
                            four_byte_asn_cap,
                            &mut as4_path,
                        ),
                        AttrType::As4Aggregator => Aggregator::decode(
                            &mut buf,
                            attr_type,
                            four_byte_asn_cap,
                            &mut as4_aggregator,
                        ),
                    } {
                        // Log and process the malformed attribute.
                        Debug::NbrAttrError(attr_type, error).log();

                        match error {
                            AttrError::Discard => continue,
                            AttrError::Withdraw => withdraw = true,
                            AttrError::Reset => {
                                return Err(
                                    UpdateMessageError::OptionalAttributeError,
                                );
                            }
                        }
                    }
                }
                // Unknown attribute.
                None => {
                    // RFC 4271 section 6.3: unrecognized well-known
                    // attributes cause a session reset.
                    if !attr_flags.contains(AttrFlags::OPTIONAL) {
                        return Err(
                            UpdateMessageError::UnrecognizedWellKnownAttribute,
                        );
                    }

                    // RFC 4271 section 9: unrecognized optional
                    // non-transitive attributes are quietly ignored.
                    if !attr_flags.contains(AttrFlags::TRANSITIVE) {
                        continue;
                    }

                    // RFC 4271 section 9: unrecognized optional transitive
                    // attributes are retained for propagation with the
                    // Partial bit set.
                    attr_flags.insert(AttrFlags::PARTIAL);
                    let attr_value = buf.copy_to_bytes(attr_len);
                    unknown.push(UnknownAttr::new(
                        attr_type_raw,
                        attr_flags,
                        attr_len as u16,
                        attr_value,
                    ));
                }
            }
        }

        // Check for missing well-known mandatory attributes.
        //
        // RFC 7606 section 3.d: "treat-as-withdraw" MUST be used.
        let mut attrs = None;
        if !withdraw
            && let Some(origin) = origin
            && let Some(as_path) = as_path
            && (local_pref.is_some() || cxt.peer_type == PeerType::External)
            && (nexthop.is_some() || !nlri_present)
        {
            let mut attrs_value = Attrs {
                base: BaseAttrs {
                    origin,
                    as_path,
                    as4_path,
                    nexthop: None,
                    ll_nexthop: None,
                    med,
                    local_pref,
                    aggregator,
                    as4_aggregator,
                    atomic_aggregate,
                },
                comm,
                unknown,
            };

            // Merge AS4_PATH/AS4_AGGREGATOR on 2-octet sessions (RFC 6793).
            if !four_byte_asn_cap {
                attrs_value.merge_as4();
            }

            attrs = Some(attrs_value);
        }
        Ok(attrs)
    }

    // Reconstructs the real AS path from the AS4_PATH attribute received
    // over a 2-octet AS number session (RFC 6793 section 4.2.3).
    fn merge_as4(&mut self) {
        if let Some(as4_path) = self.base.as4_path.take() {
            let path_len = self.base.as_path.path_length();
            let as4_len = as4_path.path_length();

            // Ignore an AS4_PATH that is longer than the AS_PATH.
            if as4_len <= path_len {
                // Take the leading (path_len - as4_len) ASes from AS_PATH,
                // followed by the entire AS4_PATH.
                let mut merged = AsPath::default();
                let mut remaining = path_len - as4_len;
                'outer: for segment in &self.base.as_path.segments {
                    if remaining == 0 {
                        break;
                    }
                    let mut members = VecDeque::new();
                    for member in &segment.members {
                        if remaining == 0 {
                            if !members.is_empty() {
                                merged.segments.push_back(AsPathSegment {
                                    seg_type: segment.seg_type,
                                    members,
                                });
                            }
                            break 'outer;
                        }
                        members.push_back(*member);
                        remaining -= 1;
                    }
                    merged.segments.push_back(AsPathSegment {
                        seg_type: segment.seg_type,
                        members,
                    });
                }
                merged.segments.extend(as4_path.segments);
                self.base.as_path = merged;
            }
        }

        // The AS4_AGGREGATOR supersedes an AGGREGATOR carrying AS_TRANS.
        if let Some(as4_aggregator) = self.base.as4_aggregator.take()
            && let Some(aggregator) = &mut self.base.aggregator
            && aggregator.asn == AS_TRANS as u32
        {
            *aggregator = as4_aggregator;
        }
    }

    // Returns the encoded length of the attributes.
    pub(crate) fn length(&self) -> u16 {
        let mut length = 0;

        length += origin::length();
        length += self.base.as_path.length();
        if self.base.med.is_some() {
            length += med::length();
        }
        if self.base.local_pref.is_some() {
            length += local_pref::length();
        }
        if self.base.atomic_aggregate {
            length += atomic_aggregate::length();
        }
        if let Some(aggregator) = &self.base.aggregator {
            length += aggregator.length();
        }
        if let Some(comm) = &self.comm {
            length += comm.length();
        }
        if let Some(as4_path) = &self.base.as4_path {
            length += as4_path.length();
        }
        if let Some(as4_aggregator) = &self.base.as4_aggregator {
            length += as4_aggregator.length();
        }
        for unknown in &self.unknown {
            length += ATTR_MIN_LEN_EXT + unknown.length;
        }

        length
    }
}

// ===== ORIGIN attribute =====

mod origin {
    use super::*;
    const LEN: u8 = 1;

    pub(super) fn encode(origin: Origin, buf: &mut BytesMut) {
        buf.put_u8(AttrFlags::TRANSITIVE.bits());
        buf.put_u8(AttrType::Origin as u8);
        buf.put_u8(LEN);
        buf.put_u8(origin as u8);
    }

    pub(super) fn decode(
        buf: &mut Bytes,
        origin: &mut Option<Origin>,
    ) -> Result<(), AttrError> {
        if buf.remaining() != LEN as usize {
            return Err(AttrError::Withdraw);
        }

        let value = buf.get_u8();
        match Origin::from_u8(value) {
            Some(value) => {
                *origin = Some(value);
                Ok(())
            }
            None => Err(AttrError::Withdraw),
        }
    }

    pub(super) fn length() -> u16 {
        ATTR_MIN_LEN + LEN as u16
    }
}

// ===== impl AsPath =====

impl AsPath {
    fn encode(
        &self,
        buf: &mut BytesMut,
        mut attr_flags: AttrFlags,
        attr_type: AttrType,
        four_byte_asns: bool,
    ) {
        attr_flags.insert(AttrFlags::EXTENDED);
        buf.put_u8(attr_flags.bits());
        buf.put_u8(attr_type as u8);

        // The length field will be initialized later.
        let start_pos = buf.len();
        buf.put_u16(0);

        // Encode attribute data.
        for segment in &self.segments {
            segment.encode(buf, four_byte_asns);
        }

        // Rewrite attribute length.
        let attr_len = (buf.len() - start_pos - 2) as u16;
        buf[start_pos..start_pos + 2].copy_from_slice(&attr_len.to_be_bytes());
    }

    fn decode(
        buf: &mut Bytes,
        cxt: &DecodeCxt,
        attr_type: AttrType,
        four_byte_asn_cap: bool,
        as_path: &mut Option<AsPath>,
    ) -> Result<(), AttrError> {
        if attr_type == AttrType::As4Path && four_byte_asn_cap {
            return Err(AttrError::Discard);
        }

        let four_byte_asns =
            four_byte_asn_cap || attr_type == AttrType::As4Path;

        // Decode AS path segments.
        let mut segments = VecDeque::new();
        while buf.remaining() > 0 {
            let segment =
                AsPathSegment::decode(buf, attr_type, four_byte_asns)?;
            segments.push_back(segment);
        }
        let value = AsPath { segments };

        // First-AS check for eBGP peers.
        if attr_type == AttrType::AsPath
            && cxt.peer_type == PeerType::External
            && value.first() != Some(cxt.peer_as)
        {
            return Err(AttrError::Withdraw);
        }

        *as_path = Some(value);
        Ok(())
    }

    pub(super) fn length(&self) -> u16 {
        ATTR_MIN_LEN_EXT
            + self
                .segments
                .iter()
                .map(|segment| segment.length())
                .sum::<u16>()
    }

    // Returns the AS path length used by the decision process: an AS_SET
    // counts as one hop regardless of its size.
    pub(crate) fn path_length(&self) -> u32 {
        self.segments
            .iter()
            .map(|segment| match segment.seg_type {
                AsPathSegmentType::Set => 1,
                AsPathSegmentType::Sequence => segment.members.len(),
            })
            .sum::<usize>() as u32
    }

    // Returns the neighboring AS from which the route was received.
    pub(crate) fn first(&self) -> Option<u32> {
        self.segments
            .front()
            .filter(|segment| segment.seg_type == AsPathSegmentType::Sequence)
            .and_then(|segment| segment.members.front().copied())
    }

    pub(crate) fn prepend(&mut self, asn: u32) {
        if let Some(segment) = self.segments.front_mut()
            && segment.seg_type == AsPathSegmentType::Sequence
            && segment.members.len() < 255
        {
            segment.members.push_front(asn);
        } else {
            self.segments.push_front(AsPathSegment {
                seg_type: AsPathSegmentType::Sequence,
                members: [asn].into(),
            });
        }
    }

    pub(crate) fn contains(&self, asn: u32) -> bool {
        self.segments.iter().any(|segment| segment.contains(asn))
    }
}

impl AsPathSegment {
    const MIN_LEN: u16 = 2;

    fn encode(&self, buf: &mut BytesMut, four_byte_asns: bool) {
        buf.put_u8(self.seg_type as u8);
        buf.put_u8(self.members.len() as u8);
        for member in &self.members {
            encode_asn(buf, *member, four_byte_asns);
        }
    }

    fn decode(
        buf: &mut Bytes,
        attr_type: AttrType,
        four_byte_asns: bool,
    ) -> Result<Self, AttrError> {
        let malformed = || {
            if attr_type == AttrType::AsPath {
                AttrError::Withdraw
            } else {
                AttrError::Discard
            }
        };

        // Decode segment type.
        let seg_type = buf.get_u8();
        let Some(seg_type) = AsPathSegmentType::from_u8(seg_type) else {
            return Err(malformed());
        };

        // Decode segment length.
        let seg_len = buf.get_u8();
        if seg_len == 0 {
            return Err(malformed());
        }
        let asn_size = if four_byte_asns { 4 } else { 2 };
        if buf.remaining() < seg_len as usize * asn_size {
            return Err(malformed());
        }

        // Decode segment members.
        let members = (0..seg_len as usize)
            .map(|_| decode_asn(buf, four_byte_asns))
            .collect();
        let segment = AsPathSegment { seg_type, members };

        // RFC 7607's AS 0 processing.
        if segment.contains(0) {
            return Err(malformed());
        }

        Ok(segment)
    }

    pub(super) fn length(&self) -> u16 {
        // Assume four-byte ASNs for practical purposes.
        Self::MIN_LEN + self.members.len() as u16 * 4
    }

    fn contains(&self, asn: u32) -> bool {
        self.members.iter().any(|member| asn == *member)
    }
}

// ===== NEXT_HOP attribute =====

pub(crate) mod nexthop {
    use super::*;
    const LEN: u8 = 4;

    pub(super) fn encode(addr: Ipv4Addr, buf: &mut BytesMut) {
        buf.put_u8(AttrFlags::TRANSITIVE.bits());
        buf.put_u8(AttrType::Nexthop as u8);
        buf.put_u8(LEN);
        buf.put_ipv4(&addr);
    }

    pub(super) fn decode(
        buf: &mut Bytes,
        nexthop: &mut Option<Ipv4Addr>,
    ) -> Result<(), AttrError> {
        if buf.remaining() != LEN as usize {
            return Err(AttrError::Withdraw);
        }

        let value = buf.get_ipv4();
        if !value.is_usable() {
            return Err(AttrError::Withdraw);
        }
        *nexthop = Some(value);
        Ok(())
    }

    pub(crate) fn length() -> u16 {
        ATTR_MIN_LEN + LEN as u16
    }
}

// ===== MULTI_EXIT_DISC attribute =====

mod med {
    use super::*;
    const LEN: u8 = 4;

    pub(super) fn encode(metric: u32, buf: &mut BytesMut) {
        buf.put_u8(AttrFlags::OPTIONAL.bits());
        buf.put_u8(AttrType::Med as u8);
        buf.put_u8(LEN);
        buf.put_u32(metric);
    }

    pub(super) fn decode(
        buf: &mut Bytes,
        med: &mut Option<u32>,
    ) -> Result<(), AttrError> {
        if buf.remaining() != LEN as usize {
            return Err(AttrError::Withdraw);
        }

        *med = Some(buf.get_u32());
        Ok(())
    }

    pub(super) fn length() -> u16 {
        ATTR_MIN_LEN + LEN as u16
    }
}

// ===== LOCAL_PREF attribute =====

mod local_pref {
    use super::*;
    const LEN: u8 = 4;

    pub(super) fn encode(local_pref: u32, buf: &mut BytesMut) {
        buf.put_u8(AttrFlags::TRANSITIVE.bits());
        buf.put_u8(AttrType::LocalPref as u8);
        buf.put_u8(LEN);
        buf.put_u32(local_pref);
    }

    pub(super) fn decode(
        buf: &mut Bytes,
        cxt: &DecodeCxt,
        local_pref: &mut Option<u32>,
    ) -> Result<(), AttrError> {
        // LOCAL_PREF is an iBGP-only attribute.
        if cxt.peer_type == PeerType::External {
            return Err(AttrError::Discard);
        }

        if buf.remaining() != LEN as usize {
            return Err(AttrError::Withdraw);
        }

        *local_pref = Some(buf.get_u32());
        Ok(())
    }

    pub(super) fn length() -> u16 {
        ATTR_MIN_LEN + LEN as u16
    }
}

// ===== ATOMIC_AGGREGATE attribute =====

mod atomic_aggregate {
    use super::*;
    const LEN: u8 = 0;

    pub(super) fn encode(buf: &mut BytesMut) {
        buf.put_u8(AttrFlags::TRANSITIVE.bits());
        buf.put_u8(AttrType::AtomicAggregate as u8);
        buf.put_u8(LEN);
    }

    pub(super) fn decode(
        buf: &mut Bytes,
        atomic_aggregate: &mut bool,
    ) -> Result<(), AttrError> {
        if buf.remaining() != LEN as usize {
            return Err(AttrError::Discard);
        }

        *atomic_aggregate = true;
        Ok(())
    }

    pub(super) fn length() -> u16 {
        ATTR_MIN_LEN + LEN as u16
    }
}

// ===== impl Aggregator =====

impl Aggregator {
    fn encode(
        &self,
        buf: &mut BytesMut,
        attr_flags: AttrFlags,
        attr_type: AttrType,
        four_byte_asns: bool,
    ) {
        buf.put_u8(attr_flags.bits());
        buf.put_u8(attr_type as u8);

        // The length field will be initialized later.
        let start_pos = buf.len();
        buf.put_u8(0);

        // Encode attribute data.
        encode_asn(buf, self.asn, four_byte_asns);
        buf.put_ipv4(&self.identifier);

        // Rewrite attribute length.
        let attr_len = buf.len() - start_pos - 1;
        buf[start_pos] = attr_len as u8;
    }

    fn decode(
        buf: &mut Bytes,
        attr_type: AttrType,
        four_byte_asn_cap: bool,
        aggregator: &mut Option<Self>,
    ) -> Result<(), AttrError> {
        if attr_type == AttrType::As4Aggregator && four_byte_asn_cap {
            return Err(AttrError::Discard);
        }

        let four_byte_asns =
            four_byte_asn_cap || attr_type == AttrType::As4Aggregator;
        let len = if four_byte_asns { 8 } else { 6 };
        if buf.remaining() != len {
            return Err(AttrError::Discard);
        }

        let asn = decode_asn(buf, four_byte_asns);
        let identifier = buf.get_ipv4();

        // RFC 7607's AS 0 processing.
        if asn == 0 {
            return Err(AttrError::Discard);
        }

        *aggregator = Some(Aggregator { asn, identifier });
        Ok(())
    }

    pub(super) fn length(&self) -> u16 {
        // Assume a four-byte ASN for practical purposes.
        ATTR_MIN_LEN + 4 + Ipv4Addr::LENGTH as u16
    }
}

// ===== impl Comms =====

impl Comms {
    const ENTRY_LEN: usize = 4;

    fn encode(&self, buf: &mut BytesMut) {
        let attr_flags =
            AttrFlags::TRANSITIVE | AttrFlags::OPTIONAL | AttrFlags::EXTENDED;
        buf.put_u8(attr_flags.bits());
        buf.put_u8(AttrType::Communities as u8);

        // The length field will be initialized later.
        let start_pos = buf.len();
        buf.put_u16(0);

        // Encode attribute data.
        for comm in &self.0 {
            buf.put_u32(comm.0);
        }

        // Rewrite attribute length.
        let attr_len = (buf.len() - start_pos - 2) as u16;
        buf[start_pos..start_pos + 2].copy_from_slice(&attr_len.to_be_bytes());
    }

    fn decode(
        buf: &mut Bytes,
        comm: &mut Option<Self>,
    ) -> Result<(), AttrError> {
        if buf.remaining() == 0 || buf.remaining() % Self::ENTRY_LEN != 0 {
            return Err(AttrError::Withdraw);
        }

        let mut list = BTreeSet::new();
        while buf.remaining() >= Self::ENTRY_LEN {
            list.insert(Comm(buf.get_u32()));
        }

        *comm = Some(Comms(list));
        Ok(())
    }

    fn length(&self) -> u16 {
        ATTR_MIN_LEN_EXT + (self.0.len() * Self::ENTRY_LEN) as u16
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Comm> {
        self.0.iter()
    }
}

// ===== impl UnknownAttr =====

impl UnknownAttr {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8((self.flags | AttrFlags::EXTENDED).bits());
        buf.put_u8(self.attr_type);
        buf.put_u16(self.length);
        buf.put_slice(&self.value);
    }
}

// ===== impl MpReachNlri =====

impl MpReachNlri {
    pub const MIN_LEN: u16 = 5;

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8((AttrFlags::OPTIONAL | AttrFlags::EXTENDED).bits());
        buf.put_u8(AttrType::MpReachNlri as u8);

        // The length field will be initialized later.
        let start_pos = buf.len();
        buf.put_u16(0);

        // Encode attribute data.
        match self {
            MpReachNlri::Ipv6Unicast {
                prefixes,
                nexthop,
                ll_nexthop,
            } => {
                buf.put_u16(Afi::Ipv6 as u16);
                buf.put_u8(Safi::Unicast as u8);
                if let Some(ll_nexthop) = ll_nexthop {
                    buf.put_u8((Ipv6Addr::LENGTH * 2) as u8);
                    buf.put_ipv6(nexthop);
                    buf.put_ipv6(ll_nexthop);
                } else {
                    buf.put_u8(Ipv6Addr::LENGTH as u8);
                    buf.put_ipv6(nexthop);
                }
                buf.put_u8(0);
                for prefix in prefixes {
                    encode_ipv6_prefix(buf, prefix);
                }
            }
        }

        // Rewrite attribute length.
        let attr_len = (buf.len() - start_pos - 2) as u16;
        buf[start_pos..start_pos + 2].copy_from_slice(&attr_len.to_be_bytes());
    }

    fn decode(
        buf: &mut Bytes,
        mp_reach: &mut Option<Self>,
    ) -> Result<(), AttrError> {
        if buf.remaining() < Self::MIN_LEN as usize {
            return Err(AttrError::Reset);
        }

        // Parse AFI.
        let afi = buf.get_u16();
        let Some(afi) = Afi::from_u16(afi) else {
            // Ignore unknown AFI.
            return Err(AttrError::Discard);
        };

        // Parse SAFI.
        let safi = buf.get_u8();
        if Safi::from_u8(safi) != Some(Safi::Unicast) {
            // Ignore unsupported SAFI.
            return Err(AttrError::Discard);
        };

        match afi {
            Afi::Ipv4 => {
                // IPv4 unicast reachability flows through the legacy NLRI
                // field of the UPDATE message.
                Err(AttrError::Discard)
            }
            Afi::Ipv6 => {
                let mut prefixes = Vec::new();
                let mut ll_nexthop = None;

                // Parse nexthop(s).
                let nexthop_len = buf.get_u8() as usize;
                if (nexthop_len != Ipv6Addr::LENGTH
                    && nexthop_len != Ipv6Addr::LENGTH * 2)
                    || nexthop_len > buf.remaining()
                {
                    return Err(AttrError::Reset);
                }
                let nexthop = buf.get_ipv6();
                if nexthop_len == Ipv6Addr::LENGTH * 2 {
                    ll_nexthop = Some(buf.get_ipv6());
                }

                // An IPv4-mapped IPv6 nexthop is never valid.
                if nexthop.is_ipv4_mapped()
                    || ll_nexthop.is_some_and(|addr| addr.is_ipv4_mapped())
                {
                    return Err(AttrError::Withdraw);
                }

                // Parse prefixes.
                let _reserved = buf.get_u8();
                while buf.remaining() > 0 {
                    if let Some(prefix) =
                        decode_ipv6_prefix(buf).map_err(|_| AttrError::Reset)?
                    {
                        prefixes.push(prefix);
                    }
                }

                *mp_reach = Some(MpReachNlri::Ipv6Unicast {
                    prefixes,
                    nexthop,
                    ll_nexthop,
                });

                Ok(())
            }
        }
    }
}

// ===== impl MpUnreachNlri =====

impl MpUnreachNlri {
    pub const MIN_LEN: u16 = 3;

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8((AttrFlags::OPTIONAL | AttrFlags::EXTENDED).bits());
        buf.put_u8(AttrType::MpUnreachNlri as u8);

        // The length field will be initialized later.
        let start_pos = buf.len();
        buf.put_u16(0);

        // Encode attribute data.
        match self {
            MpUnreachNlri::Ipv6Unicast { prefixes } => {
                buf.put_u16(Afi::Ipv6 as u16);
                buf.put_u8(Safi::Unicast as u8);
                for prefix in prefixes {
                    encode_ipv6_prefix(buf, prefix);
                }
            }
        }

        // Rewrite attribute length.
        let attr_len = (buf.len() - start_pos - 2) as u16;
        buf[start_pos..start_pos + 2].copy_from_slice(&attr_len.to_be_bytes());
    }

    fn decode(
        buf: &mut Bytes,
        mp_unreach: &mut Option<Self>,
    ) -> Result<(), AttrError> {
        if buf.remaining() < Self::MIN_LEN as usize {
            return Err(AttrError::Reset);
        }

        // Parse AFI.
        let afi = buf.get_u16();
        let Some(afi) = Afi::from_u16(afi) else {
            // Ignore unknown AFI.
            return Err(AttrError::Discard);
        };

        // Parse SAFI.
        let safi = buf.get_u8();
        if Safi::from_u8(safi) != Some(Safi::Unicast) {
            // Ignore unsupported SAFI.
            return Err(AttrError::Discard);
        };

        // Parse prefixes.
        match afi {
            Afi::Ipv4 => Err(AttrError::Discard),
            Afi::Ipv6 => {
                let mut prefixes = Vec::new();

                while buf.remaining() > 0 {
                    if let Some(prefix) =
                        decode_ipv6_prefix(buf).map_err(|_| AttrError::Reset)?
                    {
                        prefixes.push(prefix);
                    }
                }

                *mp_unreach = Some(MpUnreachNlri::Ipv6Unicast { prefixes });

                Ok(())
            }
        }
    }
}

// ===== helper functions =====

// Returns the expected Optional/Transitive flag combination of the given
// attribute type. Any other combination marks the attribute as malformed.
fn attribute_flags(attr_type: AttrType) -> AttrFlags {
    match attr_type {
        // Well-known.
        AttrType::Origin
        | AttrType::AsPath
        | AttrType::Nexthop
        | AttrType::LocalPref
        | AttrType::AtomicAggregate => AttrFlags::TRANSITIVE,

        // Optional non-transitive.
        AttrType::Med | AttrType::MpReachNlri | AttrType::MpUnreachNlri => {
            AttrFlags::OPTIONAL
        }

        // Optional transitive.
        AttrType::Aggregator
        | AttrType::Communities
        | AttrType::As4Path
        | AttrType::As4Aggregator => {
            AttrFlags::TRANSITIVE | AttrFlags::OPTIONAL
        }
    }
}

fn encode_asn(buf: &mut BytesMut, asn: u32, four_byte_asns: bool) {
    if four_byte_asns {
        buf.put_u32(asn)
    } else {
        buf.put_u16(asn as u16)
    }
}

fn decode_asn(buf: &mut Bytes, four_byte_asns: bool) -> u32 {
    if four_byte_asns {
        buf.get_u32()
    } else {
        buf.get_u16() as u32
    }
}
