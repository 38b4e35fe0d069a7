//! Selection and deduplication of pending observations

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::types::{Observation, UnixSeconds};
use crate::window::{bucket_ceiling, Resolution};

/// True when a run for `window_start` (or a later window) already logged a success.
///
/// Compares the window recorded with the submission, not its write time, so a
/// slow run that lands after the boundary does not claim the next window.
pub fn window_already_served(
    last_served_window: Option<UnixSeconds>,
    window_start: UnixSeconds,
) -> bool {
    last_served_window.is_some_and(|served| served >= window_start)
}

/// Reduce pending observations to the set to submit for `window_start`.
///
/// Keeps the newest row per (source, symbol), lowest id on ties, then drops rows
/// whose ceiling-aligned timestamp lies after the window start. The result is
/// ordered by `updated_at` descending, then id ascending.
pub fn select_eligible(
    candidates: Vec<Observation>,
    window_start: UnixSeconds,
    resolution: Resolution,
) -> Vec<Observation> {
    let mut latest: HashMap<(u32, String), Observation> = HashMap::new();

    for obs in candidates.into_iter().filter(Observation::is_pending) {
        match latest.entry((obs.source, obs.symbol.clone())) {
            Entry::Vacant(slot) => {
                slot.insert(obs);
            }
            Entry::Occupied(mut slot) => {
                let kept = slot.get();
                let newer = obs.updated_at > kept.updated_at
                    || (obs.updated_at == kept.updated_at && obs.id < kept.id);
                if newer {
                    slot.insert(obs);
                }
            }
        }
    }

    let mut eligible: Vec<Observation> = latest
        .into_values()
        .filter(|obs| bucket_ceiling(obs.updated_at, resolution) <= window_start)
        .collect();

    eligible.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
    eligible
}
