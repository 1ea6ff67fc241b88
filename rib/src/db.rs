// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-family route store. Keyed by prefix, holding every candidate
//! entry for that prefix (one per originating speaker), with best-path
//! selection over the candidates. The store is in-memory only; hosts that
//! need persistence snapshot it externally.

use crate::bestpath::best_of;
use crate::log::rib_log;
use crate::types::{PathInfo, RibEntry, RibPrefix, RouteSource};
use itertools::Itertools;
use slog::Logger;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of withdrawing a single `(prefix, src_router_id)` entry.
#[derive(Debug)]
pub struct Withdrawn<P, A> {
    /// False when no candidate for the prefix remains and the prefix must
    /// be withdrawn from peers.
    pub still_reachable: bool,

    /// Present when another candidate took over as best and must be
    /// re-advertised.
    pub replacement: Option<RibEntry<P, A>>,
}

/// Outcome of dropping every entry learned from one speaker.
#[derive(Debug)]
pub struct Discarded<P, A> {
    /// Prefixes with no remaining candidate.
    pub unreachable: Vec<P>,

    /// New best entries for prefixes that still have other candidates.
    pub replacements: Vec<RibEntry<P, A>>,
}

/// A single-family Routing Information Base. `Rib` is owned by the host;
/// sessions share it behind `Arc<Mutex<_>>` and hold the lock for the
/// duration of each call.
pub struct Rib<P: RibPrefix, A: PathInfo> {
    entries: HashMap<P, Vec<RibEntry<P, A>>>,
    update_id: u64,
    log: Logger,
}

impl<P: RibPrefix, A: PathInfo> Rib<P, A> {
    pub fn new(log: Logger) -> Self {
        Self {
            entries: HashMap::new(),
            update_id: 0,
            log,
        }
    }

    /// Total number of entries across all prefixes.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate every entry in the store.
    pub fn iter(&self) -> impl Iterator<Item = &RibEntry<P, A>> {
        self.entries.values().flatten()
    }

    /// All candidate entries for a prefix.
    pub fn candidates(&self, prefix: &P) -> &[RibEntry<P, A>] {
        self.entries.get(prefix).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The currently selected entry for a prefix.
    pub fn best(&self, prefix: &P) -> Option<&RibEntry<P, A>> {
        best_of(self.candidates(prefix))
    }

    /// Insert a route learned from a peer, replacing any existing entry
    /// with the same `(prefix, src_router_id)`. Returns the new best entry
    /// for the prefix when the selection changed, which is what must be
    /// re-advertised.
    pub fn insert(
        &mut self,
        src_router_id: u32,
        prefix: P,
        attrs: Arc<A>,
        weight: u32,
        source: RouteSource,
        ibgp_peer_asn: Option<u32>,
    ) -> Option<RibEntry<P, A>> {
        let changed = self.insert_grouped(
            src_router_id,
            prefix,
            attrs,
            weight,
            source,
            ibgp_peer_asn,
        );
        self.update_id += 1;
        changed
    }

    /// Insert a batch of routes that were announced together. All entries
    /// share one update id so they can later be packed into a single
    /// advertisement. Returns the changed-best entries.
    pub fn insert_many(
        &mut self,
        src_router_id: u32,
        prefixes: &[P],
        attrs: Arc<A>,
        weight: u32,
        source: RouteSource,
        ibgp_peer_asn: Option<u32>,
    ) -> Vec<RibEntry<P, A>> {
        let changed = prefixes
            .iter()
            .filter_map(|prefix| {
                self.insert_grouped(
                    src_router_id,
                    *prefix,
                    Arc::clone(&attrs),
                    weight,
                    source,
                    ibgp_peer_asn,
                )
            })
            .collect();
        self.update_id += 1;
        changed
    }

    /// Insert a locally originated route (scope `src_router_id = 0`).
    /// Originations that share an attribute vector share an update id, so
    /// routes injected with the same nexthop group into one advertisement.
    pub fn originate(
        &mut self,
        prefix: P,
        attrs: Arc<A>,
        weight: u32,
    ) -> Option<RibEntry<P, A>> {
        let group = self
            .entries
            .values()
            .flatten()
            .find(|e| {
                e.source == RouteSource::Local && Arc::ptr_eq(&e.attrs, &attrs)
            })
            .map(|e| e.update_id);

        match group {
            Some(id) => {
                self.insert_at(0, prefix, attrs, weight, RouteSource::Local, None, id)
            }
            None => {
                let changed = self.insert_grouped(
                    0,
                    prefix,
                    attrs,
                    weight,
                    RouteSource::Local,
                    None,
                );
                self.update_id += 1;
                changed
            }
        }
    }

    fn insert_grouped(
        &mut self,
        src_router_id: u32,
        prefix: P,
        attrs: Arc<A>,
        weight: u32,
        source: RouteSource,
        ibgp_peer_asn: Option<u32>,
    ) -> Option<RibEntry<P, A>> {
        let id = self.update_id;
        self.insert_at(src_router_id, prefix, attrs, weight, source, ibgp_peer_asn, id)
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_at(
        &mut self,
        src_router_id: u32,
        prefix: P,
        attrs: Arc<A>,
        weight: u32,
        source: RouteSource,
        ibgp_peer_asn: Option<u32>,
        update_id: u64,
    ) -> Option<RibEntry<P, A>> {
        let entry = RibEntry {
            prefix,
            src_router_id,
            attrs,
            weight,
            update_id,
            source,
            ibgp_peer_asn,
        };

        let cands = self.entries.entry(prefix).or_default();
        let old_best = best_of(cands.iter())
            .map(|e| (e.src_router_id, e.update_id));

        // Replacement is delete-then-insert, entries are never mutated in
        // place.
        cands.retain(|e| e.src_router_id != src_router_id);
        cands.push(entry);

        rib_log!(self, info, "insert: group {}, scope {:08x}, route {}",
            update_id, src_router_id, prefix);

        let new_best = best_of(cands.iter()).expect("candidate set not empty");
        if old_best == Some((new_best.src_router_id, new_best.update_id)) {
            None
        } else {
            Some(new_best.clone())
        }
    }

    /// Remove the entry for `(prefix, src_router_id)`. Withdrawing an
    /// entry that is not present is a no-op.
    pub fn withdraw(&mut self, src_router_id: u32, prefix: P) -> Withdrawn<P, A> {
        let Some(cands) = self.entries.get_mut(&prefix) else {
            return Withdrawn {
                still_reachable: false,
                replacement: None,
            };
        };

        if !cands.iter().any(|e| e.src_router_id == src_router_id) {
            return Withdrawn {
                still_reachable: false,
                replacement: None,
            };
        }

        let was_best = best_of(cands.iter())
            .map(|e| e.src_router_id == src_router_id)
            .unwrap_or(false);

        cands.retain(|e| e.src_router_id != src_router_id);
        rib_log!(self, info, "withdraw: scope {:08x}, route {}",
            src_router_id, prefix);

        if cands.is_empty() {
            self.entries.remove(&prefix);
            return Withdrawn {
                still_reachable: false,
                replacement: None,
            };
        }

        let replacement = if was_best {
            best_of(cands.iter()).cloned()
        } else {
            None
        };
        Withdrawn {
            still_reachable: true,
            replacement,
        }
    }

    /// Drop every entry learned from one speaker in a single pass, e.g.
    /// when its session goes down. The returned sets partition the
    /// speaker's prefixes into unreachable ones and ones that failed over
    /// to another candidate.
    pub fn discard(&mut self, src_router_id: u32) -> Discarded<P, A> {
        let mut unreachable = Vec::new();
        let mut replacements = Vec::new();

        self.entries.retain(|prefix, cands| {
            if !cands.iter().any(|e| e.src_router_id == src_router_id) {
                return true;
            }
            let was_best = best_of(cands.iter())
                .map(|e| e.src_router_id == src_router_id)
                .unwrap_or(false);

            cands.retain(|e| e.src_router_id != src_router_id);
            if cands.is_empty() {
                unreachable.push(*prefix);
                return false;
            }
            if was_best && let Some(best) = best_of(cands.iter()) {
                replacements.push(best.clone());
            }
            true
        });

        rib_log!(self, info,
            "discard: scope {:08x}, {} unreachable, {} replaced",
            src_router_id, unreachable.len(), replacements.len());

        Discarded {
            unreachable,
            replacements,
        }
    }

    /// Longest-prefix lookup of a destination address: the best entry
    /// among the most specific prefixes that include the destination.
    pub fn lookup(&self, dest: P::Addr) -> Option<&RibEntry<P, A>> {
        let longest = self
            .entries
            .iter()
            .filter(|(prefix, _)| prefix.includes(dest))
            .max_set_by_key(|(prefix, _)| prefix.length());

        best_of(longest.into_iter().flat_map(|(_, cands)| cands.iter()))
    }

    /// Scoped lookup, considering only routes learned from one speaker.
    pub fn lookup_from(
        &self,
        src_router_id: u32,
        dest: P::Addr,
    ) -> Option<&RibEntry<P, A>> {
        let longest = self
            .entries
            .iter()
            .filter(|(prefix, cands)| {
                prefix.includes(dest)
                    && cands.iter().any(|e| e.src_router_id == src_router_id)
            })
            .max_set_by_key(|(prefix, _)| prefix.length());

        best_of(
            longest
                .into_iter()
                .flat_map(|(_, cands)| cands.iter())
                .filter(|e| e.src_router_id == src_router_id),
        )
    }
}
