// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::types::{PathInfo, RibEntry};
use crate::DEFAULT_LOCAL_PREF;
use std::cmp::Ordering;

/// Relative preference of two candidate entries for the same prefix.
/// `Greater` means `a` is preferred. The order is total: ties fall through
/// to the originating router id and finally the update id, so selection is
/// deterministic for any candidate multiset.
///
/// Tie break order:
/// 1. higher weight
/// 2. higher LOCAL_PREF (unset counts as 100)
/// 3. locally originated over EBGP over IBGP
/// 4. shorter AS_PATH
/// 5. lower ORIGIN (unset counts as INCOMPLETE)
/// 6. lower MED, compared only between paths from the same neighbor AS
/// 7. lower originating router id, then lower update id
pub fn preference<P, A: PathInfo>(
    a: &RibEntry<P, A>,
    b: &RibEntry<P, A>,
) -> Ordering {
    if a.weight != b.weight {
        return a.weight.cmp(&b.weight);
    }

    let a_pref = a.attrs.local_pref().unwrap_or(DEFAULT_LOCAL_PREF);
    let b_pref = b.attrs.local_pref().unwrap_or(DEFAULT_LOCAL_PREF);
    if a_pref != b_pref {
        return a_pref.cmp(&b_pref);
    }

    if a.source != b.source {
        return a.source.rank().cmp(&b.source.rank());
    }

    let a_len = a.attrs.as_path_len();
    let b_len = b.attrs.as_path_len();
    if a_len != b_len {
        return b_len.cmp(&a_len);
    }

    let a_origin = a.attrs.origin().unwrap_or(2);
    let b_origin = b.attrs.origin().unwrap_or(2);
    if a_origin != b_origin {
        return b_origin.cmp(&a_origin);
    }

    if let (Some(a_as), Some(b_as)) = (a.attrs.first_as(), b.attrs.first_as())
        && a_as == b_as
    {
        let a_med = a.attrs.multi_exit_disc().unwrap_or(0);
        let b_med = b.attrs.multi_exit_disc().unwrap_or(0);
        if a_med != b_med {
            return b_med.cmp(&a_med);
        }
    }

    if a.src_router_id != b.src_router_id {
        return b.src_router_id.cmp(&a.src_router_id);
    }
    b.update_id.cmp(&a.update_id)
}

/// Pick the best entry from a candidate set.
pub fn best_of<'a, P, A: PathInfo>(
    candidates: impl IntoIterator<Item = &'a RibEntry<P, A>>,
) -> Option<&'a RibEntry<P, A>>
where
    P: 'a,
{
    candidates.into_iter().max_by(|a, b| preference(a, b))
}
