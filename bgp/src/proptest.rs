// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Property-based tests for the wire codec and the AS path
//! reconciliation operations.

use crate::messages::{
    AsPath, AsPathSegment, AsSegmentType, Message, NotificationMessage,
    OpenMessage, PathAttribute, PathOrigin, UpdateMessage,
};
use proptest::prelude::*;
use rib::Prefix4;
use std::net::Ipv4Addr;

fn prefix4_strategy() -> impl Strategy<Value = Prefix4> {
    (any::<u32>(), 0u8..=32).prop_map(|(addr, length)| {
        Prefix4::new(Ipv4Addr::from(addr), length)
    })
}

fn sequence_path_strategy() -> impl Strategy<Value = AsPath> {
    proptest::collection::vec(
        proptest::collection::vec(1u32..=u32::MAX, 1..6),
        1..3,
    )
    .prop_map(|segs| AsPath {
        four_octet: true,
        segments: segs
            .into_iter()
            .map(|value| AsPathSegment {
                typ: AsSegmentType::AsSequence,
                value,
            })
            .collect(),
    })
}

fn open_strategy() -> impl Strategy<Value = OpenMessage> {
    (any::<u32>(), any::<u16>(), any::<u32>(), any::<bool>()).prop_map(
        |(asn, hold, id, four_octet)| {
            if four_octet {
                OpenMessage::new4(asn, hold, id)
            } else {
                OpenMessage::new2(asn as u16, hold, id)
            }
        },
    )
}

fn update_strategy() -> impl Strategy<Value = UpdateMessage> {
    (
        sequence_path_strategy(),
        any::<u32>(),
        proptest::option::of(any::<u32>()),
        proptest::option::of(any::<u32>()),
        proptest::collection::vec(prefix4_strategy(), 0..8),
        proptest::collection::vec(prefix4_strategy(), 0..8),
    )
        .prop_map(|(path, nexthop, med, pref, nlri, withdrawn)| {
            let mut update = UpdateMessage {
                withdrawn,
                nlri,
                ..Default::default()
            };
            update
                .add_attr(PathAttribute::origin(PathOrigin::Igp))
                .unwrap();
            update.add_attr(PathAttribute::as_path(path)).unwrap();
            update
                .add_attr(PathAttribute::next_hop(Ipv4Addr::from(nexthop)))
                .unwrap();
            if let Some(med) = med {
                update
                    .add_attr(PathAttribute::multi_exit_disc(med))
                    .unwrap();
            }
            if let Some(pref) = pref {
                update.add_attr(PathAttribute::local_pref(pref)).unwrap();
            }
            update
        })
}

proptest! {
    /// Parsing a serialized message yields the message back.
    #[test]
    fn prop_open_round_trip(om in open_strategy()) {
        let msg = Message::Open(om);
        let wire = msg.to_wire().expect("open to wire");
        let parsed = Message::from_wire(&wire, true).expect("open from wire");
        prop_assert_eq!(msg, parsed);
    }

    #[test]
    fn prop_update_round_trip(um in update_strategy()) {
        let msg = Message::Update(um);
        let wire = msg.to_wire().expect("update to wire");
        let parsed =
            Message::from_wire(&wire, true).expect("update from wire");
        prop_assert_eq!(&msg, &parsed);

        // and serialization is stable byte for byte
        let wire2 = parsed.to_wire().expect("update to wire again");
        prop_assert_eq!(wire, wire2);
    }

    #[test]
    fn prop_notification_round_trip(
        code in 1u8..=6,
        subcode in any::<u8>(),
        data in proptest::collection::vec(any::<u8>(), 0..16),
    ) {
        let msg = Message::Notification(NotificationMessage {
            error_code: code,
            error_subcode: subcode,
            data,
        });
        let wire = msg.to_wire().expect("notification to wire");
        let parsed = Message::from_wire(&wire, false)
            .expect("notification from wire");
        prop_assert_eq!(msg, parsed);
    }

    /// Downgrading a freshly prepended four-octet path for a legacy
    /// session and restoring it on the other side reproduces exactly the
    /// path a four-octet session would have built.
    #[test]
    fn prop_as_path_reconciliation(
        x in 1u32..=u32::MAX,
        path in sequence_path_strategy(),
    ) {
        let mut via_2b = UpdateMessage::default();
        via_2b
            .add_attr(PathAttribute::as_path(path.clone()))
            .unwrap();
        via_2b.prepend4(x).unwrap();
        via_2b.downgrade_as_path().unwrap();

        // over the wire through a two-octet session
        let wire = via_2b.to_wire().unwrap();
        let mut received = UpdateMessage::from_wire(&wire, false).unwrap();
        received.restore_as_path().unwrap();

        let mut native_4b = UpdateMessage::default();
        native_4b.add_attr(PathAttribute::as_path(path)).unwrap();
        native_4b.prepend4(x).unwrap();

        let restored = received.as_path().unwrap();
        let native = native_4b.as_path().unwrap();
        prop_assert!(restored.four_octet);
        prop_assert_eq!(restored.sequence_asns(), native.sequence_asns());
        prop_assert!(received.as4_path().is_none());
    }

    /// Any sequence of add/update/drop operations leaves at most one
    /// attribute per type code.
    #[test]
    fn prop_attribute_set_unique(ops in proptest::collection::vec(
        (0usize..3, 0u32..200), 0..32,
    )) {
        let mut update = UpdateMessage::default();
        for (op, v) in ops {
            match op {
                0 => {
                    let _ = update.add_attr(PathAttribute::local_pref(v));
                }
                1 => update.update_attr(PathAttribute::multi_exit_disc(v)),
                _ => {
                    update.drop_attr((v % 20) as u8);
                }
            }
            let mut codes: Vec<u8> = update
                .path_attributes
                .iter()
                .map(|a| a.type_code())
                .collect();
            let before = codes.len();
            codes.sort_unstable();
            codes.dedup();
            prop_assert_eq!(before, codes.len());
        }
    }

    /// The framer reproduces frame boundaries no matter how the stream is
    /// chopped up.
    #[test]
    fn prop_sink_reframes_any_chunking(
        um in update_strategy(),
        cut in 1usize..64,
    ) {
        let frame = Message::Update(um).to_wire().unwrap();
        let mut stream = Vec::new();
        for _ in 0..3 {
            stream.extend_from_slice(&frame);
        }

        let mut sink = crate::sink::MessageSink::default();
        let mut frames = 0;
        for chunk in stream.chunks(cut) {
            sink.fill(chunk).unwrap();
            while let Some(got) = sink.pour().unwrap() {
                prop_assert_eq!(got, frame.as_slice());
                frames += 1;
            }
        }
        prop_assert_eq!(frames, 3);
    }
}
