// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end tests: two engines wired back to back through in-memory
//! byte channels, with shared RIBs and a fanout bus where a scenario
//! needs them.

use crate::clock::ManualClock;
use crate::config::SessionConfig;
use crate::fanout::{Fanout, RouteEvent};
use crate::messages::{
    AS_TRANS, AsPath, AsPathSegment, AsSegmentType, ErrorCode, Message,
    NotificationMessage, OpenMessage, PathAttribute, PathAttributeTypeCode,
    PathOrigin, UpdateMessage,
};
use crate::planner;
use crate::session::{FsmState, RunOutcome, Session, TickOutcome, subscribe};
use crate::{Rib4, Rib6};
use rib::{Asn, PathInfo, Prefix4, lock};
use slog::Logger;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type TestSession = Session<Sender<Vec<u8>>>;

struct Speaker {
    session: Arc<Mutex<TestSession>>,
    rx: Receiver<Vec<u8>>,
    rib4: Arc<Mutex<Rib4>>,
    #[allow(dead_code)]
    rib6: Arc<Mutex<Rib6>>,
    bus: Arc<Mutex<Fanout>>,
    clock: ManualClock,
}

fn log() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}

fn config(name: &str, asn: u32, id: u32) -> SessionConfig {
    let mut c = SessionConfig::new(name, Asn::FourOctet(asn), id);
    c.hold_time = 90;
    c.nexthop = "203.0.113.1".parse().unwrap();
    c
}

/// A standalone speaker: its own RIBs and its own bus.
fn speaker(config: SessionConfig) -> Speaker {
    let rib4 = Arc::new(Mutex::new(Rib4::new(log())));
    let rib6 = Arc::new(Mutex::new(Rib6::new(log())));
    let bus = Arc::new(Mutex::new(Fanout::new(log())));
    speaker_on(config, rib4, rib6, bus)
}

/// Another session of an existing speaker: shares its RIBs and bus.
fn speaker_on(
    config: SessionConfig,
    rib4: Arc<Mutex<Rib4>>,
    rib6: Arc<Mutex<Rib6>>,
    bus: Arc<Mutex<Fanout>>,
) -> Speaker {
    let (tx, rx) = channel();
    let clock = ManualClock::new();
    let session = Arc::new(Mutex::new(Session::new(
        config,
        tx,
        Arc::clone(&rib4),
        Arc::clone(&rib6),
        Some(Arc::clone(&bus)),
        Arc::new(clock.clone()),
        log(),
    )));
    subscribe(&bus, &session);
    Speaker {
        session,
        rx,
        rib4,
        rib6,
        bus,
        clock,
    }
}

impl Speaker {
    fn output(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        while let Ok(chunk) = self.rx.try_recv() {
            buf.extend_from_slice(&chunk);
        }
        buf
    }

    fn run(&self, bytes: &[u8]) -> RunOutcome {
        lock!(self.session).run(bytes)
    }

    fn state(&self) -> FsmState {
        lock!(self.session).state()
    }
}

/// Shuttle bytes between two speakers until both go quiet.
fn pump(a: &Speaker, b: &Speaker) {
    for _ in 0..64 {
        let from_a = a.output();
        let from_b = b.output();
        if from_a.is_empty() && from_b.is_empty() {
            return;
        }
        if !from_a.is_empty() {
            b.run(&from_a);
        }
        if !from_b.is_empty() {
            a.run(&from_b);
        }
    }
    panic!("speakers never went quiet");
}

fn establish(a: &Speaker, b: &Speaker) {
    lock!(a.session).start().unwrap();
    pump(a, b);
    assert_eq!(a.state(), FsmState::Established);
    assert_eq!(b.state(), FsmState::Established);
}

fn ebgp_update(
    as_path: AsPath,
    nexthop: &str,
    prefixes: &[&str],
) -> UpdateMessage {
    let mut update = UpdateMessage::default();
    update.add_attr(PathAttribute::origin(PathOrigin::Igp)).unwrap();
    update.add_attr(PathAttribute::as_path(as_path)).unwrap();
    update
        .add_attr(PathAttribute::next_hop(nexthop.parse().unwrap()))
        .unwrap();
    for p in prefixes {
        update.nlri.push(p.parse().unwrap());
    }
    update
}

fn last_notification(buf: &[u8]) -> NotificationMessage {
    let mut sink = crate::sink::MessageSink::default();
    sink.fill(buf).unwrap();
    let mut last = None;
    while let Some(frame) = sink.pour().unwrap() {
        if let Message::Notification(n) =
            Message::from_wire(frame, true).unwrap()
        {
            last = Some(n);
        }
    }
    last.expect("no notification in output")
}

/// Open negotiation with both sides four-octet capable: the true ASNs ride
/// in the capability, AS_PATH is four-octet, AS4_PATH never appears.
#[test]
fn open_negotiation_4b_both_sides() {
    let a = speaker(config("a", 65536, 0x01010101));
    let b = speaker(config("b", 131072, 0x02020202));
    establish(&a, &b);

    {
        let sa = lock!(a.session);
        assert!(sa.uses_four_octet());
        assert_eq!(sa.peer_asn(), 131072);
        assert_eq!(sa.peer_bgp_id(), 0x02020202);
        assert_eq!(sa.negotiated_hold(), 90);
    }
    {
        let sb = lock!(b.session);
        assert!(sb.uses_four_octet());
        assert_eq!(sb.peer_asn(), 65536);
    }

    // a originates a route; its session announces with the 4-byte ASN
    // directly in AS_PATH.
    let prefix: Prefix4 = "10.10.0.0/16".parse().unwrap();
    let ev = planner::originate4(
        &a.rib4,
        &[prefix],
        "203.0.113.1".parse().unwrap(),
        0,
    );
    lock!(a.bus).publish(0, &RouteEvent::Add(ev));
    pump(&a, &b);

    let rib = lock!(b.rib4);
    let entry = rib.best(&prefix).expect("route on b");
    let path = entry
        .attrs
        .iter()
        .find_map(|at| match &at.value {
            crate::messages::PathAttributeValue::AsPath(p) => Some(p),
            _ => None,
        })
        .expect("as path");
    assert!(path.four_octet);
    assert_eq!(path.segments[0].value, vec![65536]);
    assert!(
        !entry
            .attrs
            .iter()
            .any(|at| at.type_code() == PathAttributeTypeCode::As4Path as u8)
    );
}

/// Asymmetric capability: the two-octet side speaks AS_TRANS plus
/// AS4_PATH, the four-octet side reconstructs the true path on ingress.
#[test]
fn open_negotiation_asymmetric_4b() {
    let mut ca = config("a", 64496, 0x01010101);
    ca.four_octet = false;
    let a = speaker(ca);
    let b = speaker(config("b", 131073, 0x02020202));
    establish(&a, &b);

    assert!(!lock!(b.session).uses_four_octet());
    assert!(!lock!(a.session).uses_four_octet());
    // b's reply still offered the four-octet capability, so the legacy
    // side learns b's true ASN rather than AS_TRANS.
    assert_eq!(lock!(a.session).peer_asn(), 131073);
    assert_eq!(lock!(b.session).peer_asn(), 64496);

    // The peer announces 10.0.0.0/8 with AS_PATH=[64496, AS_TRANS] and
    // AS4_PATH=[64496, 131072].
    let mut update = ebgp_update(
        AsPath {
            four_octet: false,
            segments: vec![AsPathSegment {
                typ: AsSegmentType::AsSequence,
                value: vec![64496, u32::from(AS_TRANS)],
            }],
        },
        "203.0.113.9",
        &["10.0.0.0/8"],
    );
    update
        .add_attr(PathAttribute::as4_path(AsPath {
            four_octet: true,
            segments: vec![AsPathSegment {
                typ: AsSegmentType::AsSequence,
                value: vec![64496, 131072],
            }],
        }))
        .unwrap();

    let r = b.run(&Message::Update(update).to_wire().unwrap());
    assert_eq!(r, RunOutcome::Ok);

    let prefix: Prefix4 = "10.0.0.0/8".parse().unwrap();
    let rib = lock!(b.rib4);
    let entry = rib.best(&prefix).expect("route stored");
    let path = entry
        .attrs
        .iter()
        .find_map(|at| match &at.value {
            crate::messages::PathAttributeValue::AsPath(p) => Some(p),
            _ => None,
        })
        .expect("as path");
    assert!(path.four_octet);
    assert_eq!(path.segments[0].value, vec![64496, 131072]);
    assert!(
        !entry
            .attrs
            .iter()
            .any(|at| at.type_code() == PathAttributeTypeCode::As4Path as u8)
    );
}

/// Both sides two-octet only: AS4_PATH is never attached to what we send.
#[test]
fn two_octet_only_speakers_never_attach_as4_path() {
    let mut ca = config("a", 64496, 0x01010101);
    ca.four_octet = false;
    let mut cb = config("b", 64497, 0x02020202);
    cb.four_octet = false;
    let a = speaker(ca);
    let b = speaker(cb);
    establish(&a, &b);

    let prefix: Prefix4 = "10.20.0.0/16".parse().unwrap();
    let ev = planner::originate4(
        &a.rib4,
        &[prefix],
        "203.0.113.1".parse().unwrap(),
        0,
    );
    lock!(a.bus).publish(0, &RouteEvent::Add(ev));
    pump(&a, &b);

    let rib = lock!(b.rib4);
    let entry = rib.best(&prefix).expect("route on b");
    assert!(
        !entry
            .attrs
            .iter()
            .any(|at| at.type_code() == PathAttributeTypeCode::As4Path as u8)
    );
}

/// A speaker with two peers announcing the same prefix selects the
/// shorter AS path and the route propagates through the event bus.
#[test]
fn best_path_by_as_path_length() {
    const C_ASN: u32 = 64500;
    let c_rib4 = Arc::new(Mutex::new(Rib4::new(log())));
    let c_rib6 = Arc::new(Mutex::new(Rib6::new(log())));
    let c_bus = Arc::new(Mutex::new(Fanout::new(log())));
    let ca = speaker_on(
        config("c-a", C_ASN, 0x0c0c0c0c),
        Arc::clone(&c_rib4),
        Arc::clone(&c_rib6),
        Arc::clone(&c_bus),
    );
    let cb = speaker_on(
        config("c-b", C_ASN, 0x0c0c0c0c),
        Arc::clone(&c_rib4),
        Arc::clone(&c_rib6),
        Arc::clone(&c_bus),
    );

    let a = speaker(config("a", 64501, 0x0a));
    let b = speaker(config("b", 64502, 0x0b));
    establish(&ca, &a);
    establish(&cb, &b);

    // Peer a offers a three-hop path, peer b a two-hop one.
    let from_a = ebgp_update(
        AsPath {
            four_octet: true,
            segments: vec![AsPathSegment {
                typ: AsSegmentType::AsSequence,
                value: vec![64501, 64510, 64511],
            }],
        },
        "203.0.113.9",
        &["192.0.2.0/24"],
    );
    ca.run(&Message::Update(from_a).to_wire().unwrap());
    pump(&ca, &a);
    pump(&cb, &b);

    let from_b = ebgp_update(
        AsPath {
            four_octet: true,
            segments: vec![AsPathSegment {
                typ: AsSegmentType::AsSequence,
                value: vec![64502, 64510],
            }],
        },
        "203.0.113.10",
        &["192.0.2.0/24"],
    );
    cb.run(&Message::Update(from_b).to_wire().unwrap());
    pump(&ca, &a);
    pump(&cb, &b);

    let rib = lock!(c_rib4);
    let best = rib.lookup("192.0.2.1".parse().unwrap()).expect("route");
    assert_eq!(best.src_router_id, 0x0b);

    // The first announcement was fanned out to the other peer with our
    // ASN prepended.
    let rib_b = lock!(b.rib4);
    let prefix: Prefix4 = "192.0.2.0/24".parse().unwrap();
    let propagated = rib_b.best(&prefix).expect("propagated route");
    assert_eq!(propagated.attrs.first_as(), Some(C_ASN));
}

/// Connection collision: the speaker with the numerically higher BGP id
/// keeps its session, the newcomer is Ceased.
#[test]
fn collision_resolution_drops_second_session() {
    let rib4 = Arc::new(Mutex::new(Rib4::new(log())));
    let rib6 = Arc::new(Mutex::new(Rib6::new(log())));
    let bus = Arc::new(Mutex::new(Fanout::new(log())));
    let s1 = speaker_on(
        config("s1", 64500, 0x05060708),
        Arc::clone(&rib4),
        Arc::clone(&rib6),
        Arc::clone(&bus),
    );
    let s2 = speaker_on(
        config("s2", 64500, 0x05060708),
        Arc::clone(&rib4),
        Arc::clone(&rib6),
        Arc::clone(&bus),
    );
    let peer = speaker(config("p", 64501, 0x01020304));

    // Bring the first session to OpenConfirm: our open out, peer's open
    // back in. The keepalive is withheld so it stays in OpenConfirm.
    lock!(s1.session).start().unwrap();
    peer.run(&s1.output());
    s1.run(&peer.output());
    assert_eq!(s1.state(), FsmState::OpenConfirm);
    assert_eq!(lock!(s1.session).peer_bgp_id(), 0x01020304);

    // A second inbound session claims the same peer.
    let open = OpenMessage::new4(64501, 90, 0x01020304);
    let r = s2.run(&Message::Open(open).to_wire().unwrap());
    assert_eq!(r, RunOutcome::LocalProtocolError);

    // Local id 5.6.7.8 is numerically higher than 1.2.3.4, so the second
    // session loses: Cease sent, back to Idle. The first survives.
    assert_eq!(s2.state(), FsmState::Idle);
    let n = last_notification(&s2.output());
    assert_eq!(n.error_code, ErrorCode::Cease as u8);
    assert_eq!(s1.state(), FsmState::OpenConfirm);
}

/// The losing side of a collision is the established one when the peer
/// holds the higher id.
#[test]
fn collision_resolution_yields_to_higher_peer() {
    let rib4 = Arc::new(Mutex::new(Rib4::new(log())));
    let rib6 = Arc::new(Mutex::new(Rib6::new(log())));
    let bus = Arc::new(Mutex::new(Fanout::new(log())));
    let s1 = speaker_on(
        config("s1", 64500, 0x01020304),
        Arc::clone(&rib4),
        Arc::clone(&rib6),
        Arc::clone(&bus),
    );
    let s2 = speaker_on(
        config("s2", 64500, 0x01020304),
        Arc::clone(&rib4),
        Arc::clone(&rib6),
        Arc::clone(&bus),
    );
    let peer = speaker(config("p", 64501, 0x05060708));

    lock!(s1.session).start().unwrap();
    peer.run(&s1.output());
    s1.run(&peer.output());
    assert_eq!(s1.state(), FsmState::OpenConfirm);

    let open = OpenMessage::new4(64501, 90, 0x05060708);
    let r = s2.run(&Message::Open(open).to_wire().unwrap());
    assert_eq!(r, RunOutcome::Ok);

    // This time the existing session folds and the new one proceeds.
    assert_eq!(s1.state(), FsmState::Idle);
    let n = last_notification(&s1.output());
    assert_eq!(n.error_code, ErrorCode::Cease as u8);
    assert_eq!(s2.state(), FsmState::OpenConfirm);
}

/// Hold timer expiry: 91 simulated seconds of silence on a 90 second hold
/// timer takes the session down with a notification.
#[test]
fn hold_timer_expiry() {
    let a = speaker(config("a", 64496, 1));
    let b = speaker(config("b", 64497, 2));
    establish(&a, &b);
    assert_eq!(lock!(a.session).negotiated_hold(), 90);
    a.output();

    // Nothing for 89 seconds: still up, keepalives flowing.
    a.clock.advance(Duration::from_secs(89));
    let r = lock!(a.session).tick().unwrap();
    assert_eq!(r, TickOutcome::KeepaliveSent);
    assert_eq!(a.state(), FsmState::Established);

    // Past the hold time: notification and Idle.
    a.clock.advance(Duration::from_secs(2));
    let r = lock!(a.session).tick().unwrap();
    assert_eq!(r, TickOutcome::HoldTimerExpired);
    assert_eq!(a.state(), FsmState::Idle);

    let n = last_notification(&a.output());
    assert_eq!(n.error_code, ErrorCode::HoldTimerExpired as u8);
}

/// Keepalives are emitted every third of the hold time.
#[test]
fn keepalive_interval() {
    let a = speaker(config("a", 64496, 1));
    let b = speaker(config("b", 64497, 2));
    establish(&a, &b);
    a.output();

    a.clock.advance(Duration::from_secs(30));
    assert_eq!(lock!(a.session).tick().unwrap(), TickOutcome::KeepaliveSent);
    // sending refreshed the timer, an immediate tick stays quiet
    assert_eq!(lock!(a.session).tick().unwrap(), TickOutcome::Ok);

    let out = a.output();
    let msg = Message::from_wire(&out, true).unwrap();
    assert_eq!(msg, Message::KeepAlive);
}

/// A peer going away takes its routes with it: prefixes with another
/// candidate fail over, the rest are withdrawn.
#[test]
fn discard_on_peer_drop() {
    let x = 0x0a0a0a0a;
    let y = 0x0b0b0b0b;
    let rib4 = Arc::new(Mutex::new(Rib4::new(log())));
    {
        let mut rib = lock!(rib4);
        let attrs_x = Arc::new(planner::origin_attrs(
            "203.0.113.9".parse().unwrap(),
        ));
        let attrs_y = Arc::new(planner::origin_attrs(
            "203.0.113.10".parse().unwrap(),
        ));
        let mut prefixes = Vec::new();
        for i in 0..10u8 {
            let p = Prefix4::new(
                format!("10.{i}.0.0").parse().unwrap(),
                16,
            );
            prefixes.push(p);
        }
        rib.insert_many(
            x,
            &prefixes,
            attrs_x,
            0,
            rib::RouteSource::Ebgp,
            None,
        );
        rib.insert_many(
            y,
            &prefixes[..4],
            attrs_y,
            0,
            rib::RouteSource::Ebgp,
            None,
        );
        assert_eq!(rib.len(), 14);
    }

    let mut rib = lock!(rib4);
    let d = rib.discard(x);
    assert_eq!(d.unreachable.len(), 6);
    assert_eq!(d.replacements.len(), 4);
    assert!(d.replacements.iter().all(|e| e.src_router_id == y));
    assert_eq!(rib.len(), 4);
}

/// Routes already in the RIB are advertised when a session comes up.
#[test]
fn table_dump_on_establishment() {
    let a = speaker(config("a", 64496, 1));
    let b = speaker(config("b", 64497, 2));

    let prefix: Prefix4 = "172.16.0.0/12".parse().unwrap();
    planner::originate4(
        &a.rib4,
        &[prefix],
        "203.0.113.1".parse().unwrap(),
        0,
    );

    establish(&a, &b);

    let rib = lock!(b.rib4);
    let entry = rib.best(&prefix).expect("dumped route");
    assert_eq!(entry.attrs.first_as(), Some(64496));
}

/// Ingress-filtered prefixes never make it into the RIB; the rest of the
/// update does.
#[test]
fn ingress_filter_drops_prefixes() {
    let a = speaker(config("a", 64496, 1));
    let mut cb = config("b", 64497, 2);
    cb.allow_import4 = crate::policy::FilterSet4::new(
        crate::policy::PolicyAction::Deny,
    );
    cb.allow_import4.add_rule(
        "192.0.2.0/24".parse().unwrap(),
        crate::policy::PolicyAction::Allow,
        10,
    );
    let b = speaker(cb);
    establish(&a, &b);

    let update = ebgp_update(
        AsPath {
            four_octet: true,
            segments: vec![AsPathSegment {
                typ: AsSegmentType::AsSequence,
                value: vec![64496],
            }],
        },
        "203.0.113.9",
        &["192.0.2.0/24", "198.51.100.0/24"],
    );
    b.run(&Message::Update(update).to_wire().unwrap());

    let rib = lock!(b.rib4);
    assert!(rib.best(&"192.0.2.0/24".parse().unwrap()).is_some());
    assert!(rib.best(&"198.51.100.0/24".parse().unwrap()).is_none());
}

