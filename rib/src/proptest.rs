// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Property-based tests for prefix canonicalization and best-path
//! selection determinism.

use crate::bestpath::{best_of, preference};
use crate::db::Rib;
use crate::types::{PathInfo, Prefix4, RibEntry, RouteSource};
use proptest::prelude::*;
use slog::Logger;
use std::net::Ipv4Addr;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct ArbPath {
    local_pref: Option<u32>,
    med: Option<u32>,
    origin: Option<u8>,
    as_path: Vec<u32>,
}

impl PathInfo for ArbPath {
    fn local_pref(&self) -> Option<u32> {
        self.local_pref
    }
    fn multi_exit_disc(&self) -> Option<u32> {
        self.med
    }
    fn origin(&self) -> Option<u8> {
        self.origin
    }
    fn as_path_len(&self) -> usize {
        self.as_path.len()
    }
    fn first_as(&self) -> Option<u32> {
        self.as_path.first().copied()
    }
}

fn path_strategy() -> impl Strategy<Value = ArbPath> {
    (
        proptest::option::of(0u32..1000),
        proptest::option::of(0u32..1000),
        proptest::option::of(0u8..=2),
        proptest::collection::vec(64496u32..64510, 0..6),
    )
        .prop_map(|(local_pref, med, origin, as_path)| ArbPath {
            local_pref,
            med,
            origin,
            as_path,
        })
}

fn entry_strategy() -> impl Strategy<Value = RibEntry<Prefix4, ArbPath>> {
    (any::<u32>(), 0u32..16, any::<u64>(), path_strategy(), 0usize..3)
        .prop_map(|(src, weight, update_id, path, source)| RibEntry {
            prefix: Prefix4::new(Ipv4Addr::new(192, 0, 2, 0), 24),
            src_router_id: src,
            attrs: Arc::new(path),
            weight,
            update_id,
            source: match source {
                0 => RouteSource::Local,
                1 => RouteSource::Ebgp,
                _ => RouteSource::Ibgp,
            },
            ibgp_peer_asn: None,
        })
}

fn log() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}

proptest! {
    /// Preference is antisymmetric, so selection does not depend on
    /// argument order.
    #[test]
    fn prop_preference_antisymmetric(
        a in entry_strategy(),
        b in entry_strategy(),
    ) {
        prop_assert_eq!(preference(&a, &b), preference(&b, &a).reverse());
    }

    /// The selected best is invariant under candidate permutation.
    #[test]
    fn prop_best_path_deterministic(
        entries in proptest::collection::vec(entry_strategy(), 1..8),
        seed in any::<u64>(),
    ) {
        // Distinct (src, update_id) identities keep the order total.
        let mut entries = entries;
        for (i, e) in entries.iter_mut().enumerate() {
            e.update_id = i as u64;
        }

        let best = best_of(entries.iter())
            .map(|e| (e.src_router_id, e.update_id));

        let mut shuffled = entries.clone();
        let n = shuffled.len();
        let mut state = seed;
        for i in (1..n).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            shuffled.swap(i, (state >> 33) as usize % (i + 1));
        }

        let best_shuffled = best_of(shuffled.iter())
            .map(|e| (e.src_router_id, e.update_id));
        prop_assert_eq!(best, best_shuffled);
    }

    /// Withdrawing an absent entry never changes the store.
    #[test]
    fn prop_withdraw_idempotent(
        srcs in proptest::collection::vec(1u32..6, 0..4),
        absent in 100u32..200,
    ) {
        let prefix = Prefix4::new(Ipv4Addr::new(192, 0, 2, 0), 24);
        let mut rib: Rib<Prefix4, ArbPath> = Rib::new(log());
        for src in &srcs {
            rib.insert(
                *src,
                prefix,
                Arc::new(ArbPath {
                    local_pref: None,
                    med: None,
                    origin: None,
                    as_path: vec![64496],
                }),
                0,
                RouteSource::Ebgp,
                None,
            );
        }
        let before = rib.len();

        let w = rib.withdraw(absent, prefix);
        prop_assert!(!w.still_reachable);
        prop_assert!(w.replacement.is_none());
        prop_assert_eq!(rib.len(), before);
    }

    /// After a discard no entry from the discarded speaker survives, and
    /// the reported prefixes exactly cover what it owned.
    #[test]
    fn prop_discard_complete(
        routes in proptest::collection::vec(
            (1u32..5, 0u8..8, path_strategy()),
            0..24,
        ),
        victim in 1u32..5,
    ) {
        let mut rib: Rib<Prefix4, ArbPath> = Rib::new(log());
        for (src, octet, path) in routes {
            rib.insert(
                src,
                Prefix4::new(Ipv4Addr::new(10, octet, 0, 0), 16),
                Arc::new(path),
                0,
                RouteSource::Ebgp,
                None,
            );
        }
        let owned: Vec<Prefix4> = rib
            .iter()
            .filter(|e| e.src_router_id == victim)
            .map(|e| e.prefix)
            .collect();

        let d = rib.discard(victim);

        prop_assert!(rib.iter().all(|e| e.src_router_id != victim));
        for p in &d.unreachable {
            prop_assert!(owned.contains(p));
            prop_assert!(rib.candidates(p).is_empty());
        }
        for e in &d.replacements {
            prop_assert!(owned.contains(&e.prefix));
            prop_assert_ne!(e.src_router_id, victim);
        }
        for p in &owned {
            prop_assert!(
                d.unreachable.contains(p) || !rib.candidates(p).is_empty()
            );
        }
    }

    /// Prefix construction canonicalizes host bits and the network address
    /// is always included in its own prefix.
    #[test]
    fn prop_prefix4_canonical(addr in any::<u32>(), length in 0u8..=32) {
        let p = Prefix4::new(Ipv4Addr::from(addr), length);
        prop_assert!(p.host_bits_are_unset());
        prop_assert!(p.includes(p.value));
        prop_assert_eq!(p, Prefix4::new(p.value, length));
    }
}
