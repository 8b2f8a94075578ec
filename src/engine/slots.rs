use crate::model::{Minute, Span};

use super::availability::EffectiveHours;

/// Offerable start minutes for a service of `duration` minutes.
///
/// Starts are not laid on a fixed clock grid. Each anchor (opening time, end of
/// the break, end of every booking) starts a walk in steps of `duration` that
/// runs until the next candidate would cross closing time, a booking or the
/// break. Candidates before `earliest` are skipped without ending the walk.
///
/// `occupied` must be sorted by start and non-overlapping.
pub fn offerable_starts(
    hours: &EffectiveHours,
    occupied: &[Span],
    duration: Minute,
    earliest: Minute,
) -> Vec<Minute> {
    if duration <= 0 {
        return Vec::new();
    }

    let mut anchors = Vec::with_capacity(occupied.len() + 2);
    anchors.push(hours.open);
    if let Some(b) = hours.break_window {
        anchors.push(b.end);
    }
    anchors.extend(occupied.iter().map(|s| s.end));

    let blocked = |candidate: &Span| {
        hours.break_window.is_some_and(|b| b.overlaps(candidate))
            || occupied.iter().any(|s| s.overlaps(candidate))
    };

    let mut starts = Vec::new();
    for anchor in anchors {
        if anchor < hours.open {
            continue;
        }
        let mut t = anchor;
        while duration <= hours.close - t {
            let candidate = Span::new(t, t + duration);
            if blocked(&candidate) {
                break;
            }
            if t >= earliest {
                starts.push(t);
            }
            t += duration;
        }
    }

    starts.sort_unstable();
    starts.dedup();
    starts
}
