// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Outbound update planning: turn a route change into one or more Update
//! messages that respect the 4096-byte message ceiling. Announcements
//! always travel with their attributes; a prefix announced in a message is
//! never withdrawn in the same one (the announcement supersedes); IPv6
//! reachability rides exclusively in MP_REACH_NLRI / MP_UNREACH_NLRI.

use crate::error::Error;
use crate::messages::{
    HEADER_SIZE, MAX_MESSAGE_SIZE, MpReachNlri, MpUnreachNlri, PathAttribute,
    PathAttributeTypeCode, PathOrigin, UpdateMessage,
};
use crate::Rib4;
use rib::{Prefix, Prefix4, Prefix6, lock};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Mutex};

/// Space available for the update body once the header is paid for.
const MAX_BODY: usize = MAX_MESSAGE_SIZE - HEADER_SIZE;

/// Withdrawn-length and attribute-length fields.
const BODY_FIXED: usize = 4;

/// Worst-case attribute header: flags, type, two length octets.
const ATTR_HEADER: usize = 4;

/// MP_REACH fixed part: afi, safi, nexthop length, reserved octet.
const MP_REACH_FIXED: usize = 5;

/// MP_UNREACH fixed part: afi, safi.
const MP_UNREACH_FIXED: usize = 3;

fn wire_len4(p: &Prefix4) -> usize {
    1 + (p.length as usize).div_ceil(8)
}

fn wire_len6(p: &Prefix6) -> usize {
    1 + (p.length as usize).div_ceil(8)
}

fn attrs_wire_len(attrs: &[PathAttribute]) -> Result<usize, Error> {
    let mut total = 0;
    for a in attrs {
        total += a.to_wire()?.len();
    }
    Ok(total)
}

fn is_mp(a: &PathAttribute) -> bool {
    matches!(
        a.type_code(),
        c if c == PathAttributeTypeCode::MpReachNlri as u8
            || c == PathAttributeTypeCode::MpUnreachNlri as u8
    )
}

/// Plan the messages for one outbound route change. `attrs` is the
/// prepared attribute list (nexthop set, local ASN prepended, non-transitive
/// attributes already dropped where required); `nexthop6` is attached to
/// IPv6 announcements.
pub fn plan(
    attrs: &[PathAttribute],
    announce: &[Prefix],
    withdraw: &[Prefix],
    nexthop6: Option<Ipv6Addr>,
) -> Result<Vec<UpdateMessage>, Error> {
    let withdraw: Vec<&Prefix> = withdraw
        .iter()
        .filter(|w| !announce.contains(*w))
        .collect();

    let mut announce4 = Vec::new();
    let mut announce6 = Vec::new();
    for p in announce {
        match p {
            Prefix::V4(p4) => announce4.push(*p4),
            Prefix::V6(p6) => announce6.push(*p6),
        }
    }
    let mut withdraw4 = Vec::new();
    let mut withdraw6 = Vec::new();
    for p in withdraw {
        match p {
            Prefix::V4(p4) => withdraw4.push(*p4),
            Prefix::V6(p6) => withdraw6.push(*p6),
        }
    }

    let mut updates = Vec::new();
    plan_withdraw4(&withdraw4, &mut updates);
    plan_withdraw6(&withdraw6, &mut updates)?;
    plan_announce4(attrs, &announce4, &mut updates)?;
    plan_announce6(attrs, &announce6, nexthop6, &mut updates)?;
    Ok(updates)
}

fn plan_withdraw4(withdraw: &[Prefix4], updates: &mut Vec<UpdateMessage>) {
    let mut current = UpdateMessage::default();
    let mut size = BODY_FIXED;
    for p in withdraw {
        if size + wire_len4(p) > MAX_BODY {
            updates.push(std::mem::take(&mut current));
            size = BODY_FIXED;
        }
        size += wire_len4(p);
        current.withdrawn.push(*p);
    }
    if !current.withdrawn.is_empty() {
        updates.push(current);
    }
}

fn plan_withdraw6(
    withdraw: &[Prefix6],
    updates: &mut Vec<UpdateMessage>,
) -> Result<(), Error> {
    let fixed = BODY_FIXED + ATTR_HEADER + MP_UNREACH_FIXED;
    let mut chunk = MpUnreachNlri::default();
    let mut size = fixed;
    for p in withdraw {
        if size + wire_len6(p) > MAX_BODY {
            let mut update = UpdateMessage::default();
            update.add_attr(PathAttribute::mp_unreach(std::mem::take(
                &mut chunk,
            )))?;
            updates.push(update);
            size = fixed;
        }
        size += wire_len6(p);
        chunk.withdrawn.push(*p);
    }
    if !chunk.withdrawn.is_empty() {
        let mut update = UpdateMessage::default();
        update.add_attr(PathAttribute::mp_unreach(chunk))?;
        updates.push(update);
    }
    Ok(())
}

fn plan_announce4(
    attrs: &[PathAttribute],
    announce: &[Prefix4],
    updates: &mut Vec<UpdateMessage>,
) -> Result<(), Error> {
    if announce.is_empty() {
        return Ok(());
    }
    let attrs: Vec<PathAttribute> =
        attrs.iter().filter(|a| !is_mp(a)).cloned().collect();
    let fixed = BODY_FIXED + attrs_wire_len(&attrs)?;
    if fixed + wire_len4(&announce[0]) > MAX_BODY {
        return Err(Error::TooLarge("attribute list".into()));
    }

    let mut current = UpdateMessage {
        path_attributes: attrs.clone(),
        ..Default::default()
    };
    let mut size = fixed;
    for p in announce {
        if size + wire_len4(p) > MAX_BODY {
            updates.push(current);
            current = UpdateMessage {
                path_attributes: attrs.clone(),
                ..Default::default()
            };
            size = fixed;
        }
        size += wire_len4(p);
        current.nlri.push(*p);
    }
    updates.push(current);
    Ok(())
}

fn plan_announce6(
    attrs: &[PathAttribute],
    announce: &[Prefix6],
    nexthop6: Option<Ipv6Addr>,
    updates: &mut Vec<UpdateMessage>,
) -> Result<(), Error> {
    if announce.is_empty() {
        return Ok(());
    }
    let nexthop = nexthop6.ok_or(Error::MissingNexthop)?;

    // MP announcements carry their nexthop inside MP_REACH_NLRI; the
    // top-level nexthop does not apply to them.
    let attrs: Vec<PathAttribute> = attrs
        .iter()
        .filter(|a| {
            !is_mp(a) && a.type_code() != PathAttributeTypeCode::NextHop as u8
        })
        .cloned()
        .collect();
    let fixed = BODY_FIXED
        + attrs_wire_len(&attrs)?
        + ATTR_HEADER
        + MP_REACH_FIXED
        + 16;
    if fixed + wire_len6(&announce[0]) > MAX_BODY {
        return Err(Error::TooLarge("attribute list".into()));
    }

    let mut chunk = Vec::new();
    let mut size = fixed;
    let mut flush = |chunk: &mut Vec<Prefix6>,
                     updates: &mut Vec<UpdateMessage>|
     -> Result<(), Error> {
        let mut update = UpdateMessage {
            path_attributes: attrs.clone(),
            ..Default::default()
        };
        update.add_attr(PathAttribute::mp_reach(MpReachNlri {
            nexthop: vec![nexthop],
            nlri: std::mem::take(chunk),
        }))?;
        updates.push(update);
        Ok(())
    };
    for p in announce {
        if size + wire_len6(p) > MAX_BODY {
            flush(&mut chunk, updates)?;
            size = fixed;
        }
        size += wire_len6(p);
        chunk.push(*p);
    }
    flush(&mut chunk, updates)?;
    Ok(())
}

/// The attribute set for a locally originated IPv4 route: IGP origin, an
/// empty AS path, the given nexthop.
pub fn origin_attrs(nexthop: Ipv4Addr) -> Vec<PathAttribute> {
    vec![
        PathAttribute::origin(PathOrigin::Igp),
        PathAttribute::as_path(crate::messages::AsPath::new(true)),
        PathAttribute::next_hop(nexthop),
    ]
}

/// Inject locally originated IPv4 routes into the shared RIB and hand back
/// the event the host publishes on the bus (with sender id 0) so every
/// established session advertises them.
pub fn originate4(
    rib: &Arc<Mutex<Rib4>>,
    prefixes: &[Prefix4],
    nexthop: Ipv4Addr,
    weight: u32,
) -> crate::fanout::RouteAddEvent {
    let attrs = Arc::new(origin_attrs(nexthop));
    let mut db = lock!(rib);
    for p in prefixes {
        db.originate(*p, Arc::clone(&attrs), weight);
    }
    crate::fanout::RouteAddEvent {
        prefixes: prefixes.iter().map(|p| Prefix::V4(*p)).collect(),
        attrs,
    }
}
