use crate::model::{Minute, Span};

use super::availability::{merge_overlapping, subtract_intervals, EffectiveHours};

/// Maximal free intervals of a working day: `[open, close]` minus the break
/// minus `occupied`, then clipped to start no earlier than `earliest`.
///
/// `occupied` must be sorted by start.
pub fn day_gaps(hours: &EffectiveHours, occupied: &[Span], earliest: Minute) -> Vec<Span> {
    let busy = merge_overlapping(occupied);
    subtract_intervals(&hours.working_spans(), &busy)
        .into_iter()
        .filter_map(|gap| clip_from(gap, earliest))
        .collect()
}

/// The free interval around a just-freed span, widened to the neighbouring
/// bookings (or opening/closing time) and kept on the freed span's side of the
/// break. `remaining` are the worker's bookings after the removal.
pub fn merged_gap(
    hours: &EffectiveHours,
    remaining: &[Span],
    freed: Span,
    earliest: Minute,
) -> Option<Span> {
    let mut start = remaining
        .iter()
        .filter(|b| b.end <= freed.start)
        .map(|b| b.end)
        .max()
        .unwrap_or(hours.open)
        .max(hours.open);
    let mut end = remaining
        .iter()
        .filter(|b| b.start >= freed.end)
        .map(|b| b.start)
        .min()
        .unwrap_or(hours.close)
        .min(hours.close);

    if let Some(b) = hours.break_window {
        if freed.start < b.start {
            end = end.min(b.start);
        } else {
            start = start.max(b.end);
        }
    }

    clip_from(Span::try_new(start, end)?, earliest)
}

/// `gap` with its start moved up to `earliest`, or `None` if nothing is left.
pub fn clip_from(gap: Span, earliest: Minute) -> Option<Span> {
    Span::try_new(gap.start.max(earliest), gap.end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans(pairs: &[(Minute, Minute)]) -> Vec<Span> {
        pairs.iter().map(|&(s, e)| Span::new(s, e)).collect()
    }

    #[test]
    fn gaps_bookings_and_break_partition_the_day() {
        let hours = EffectiveHours::new(570, 1140, Some(Span::new(720, 840)));
        let occupied = spans(&[(570, 600), (660, 690), (700, 720), (900, 960), (1110, 1140)]);
        let gaps = day_gaps(&hours, &occupied, 0);
        assert_eq!(
            gaps,
            spans(&[(600, 660), (690, 700), (840, 900), (960, 1110)])
        );

        let mut pieces: Vec<Span> = gaps.iter().chain(&occupied).copied().collect();
        pieces.extend(hours.break_window);
        pieces.sort_by_key(|s| s.start);
        let mut cursor = hours.open;
        for piece in &pieces {
            assert_eq!(piece.start, cursor, "hole or overlap at {cursor}");
            cursor = piece.end;
        }
        assert_eq!(cursor, hours.close);
    }

    #[test]
    fn gap_touching_the_break_is_kept() {
        let hours = EffectiveHours::new(570, 1140, Some(Span::new(720, 840)));
        let occupied = spans(&[(570, 690)]);
        let gaps = day_gaps(&hours, &occupied, 0);
        assert_eq!(gaps[0], Span::new(690, 720));
    }

    #[test]
    fn day_gaps_clip_to_now() {
        let hours = EffectiveHours::new(540, 720, None);
        let gaps = day_gaps(&hours, &spans(&[(600, 630)]), 615);
        assert_eq!(gaps, spans(&[(630, 720)]));
        let gaps = day_gaps(&hours, &[], 580);
        assert_eq!(gaps, spans(&[(580, 720)]));
    }

    #[test]
    fn adjacent_cancellations_merge_in_either_order() {
        let hours = EffectiveHours::new(540, 1080, None);
        let first = Span::new(630, 645);
        let second = Span::new(645, 660);
        let neighbours = [Span::new(600, 630), Span::new(660, 690)];

        // cancel `first`, then `second`
        let mut remaining = vec![neighbours[0], second, neighbours[1]];
        assert_eq!(merged_gap(&hours, &remaining, first, 0), Some(first));
        remaining.retain(|s| *s != second);
        let a = merged_gap(&hours, &remaining, second, 0);

        // cancel `second`, then `first`
        let remaining = vec![neighbours[0], neighbours[1]];
        let b = merged_gap(&hours, &remaining, first, 0);

        // one 30-minute booking over the same span
        let c = merged_gap(&hours, &remaining, Span::new(630, 660), 0);

        assert_eq!(a, Some(Span::new(630, 660)));
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn merged_gap_extends_to_open_and_close() {
        let hours = EffectiveHours::new(540, 720, None);
        assert_eq!(
            merged_gap(&hours, &[], Span::new(600, 630), 0),
            Some(Span::new(540, 720))
        );
        assert_eq!(
            merged_gap(&hours, &spans(&[(540, 560)]), Span::new(600, 630), 0),
            Some(Span::new(560, 720))
        );
    }

    #[test]
    fn merged_gap_stays_on_its_side_of_the_break() {
        let hours = EffectiveHours::new(570, 1140, Some(Span::new(720, 840)));
        let remaining = spans(&[(600, 660), (900, 930)]);
        assert_eq!(
            merged_gap(&hours, &remaining, Span::new(690, 720), 0),
            Some(Span::new(660, 720))
        );
        assert_eq!(
            merged_gap(&hours, &remaining, Span::new(840, 870), 0),
            Some(Span::new(840, 900))
        );
    }

    #[test]
    fn merged_gap_clipped_to_now_or_gone() {
        let hours = EffectiveHours::new(540, 720, None);
        let remaining = spans(&[(540, 600), (630, 660)]);
        assert_eq!(
            merged_gap(&hours, &remaining, Span::new(600, 630), 610),
            Some(Span::new(610, 630))
        );
        assert_eq!(merged_gap(&hours, &remaining, Span::new(600, 630), 630), None);
    }
}
