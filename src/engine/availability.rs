use chrono::{Datelike, NaiveDate};
use tracing::warn;

use crate::model::*;
use crate::schedule::{DayHours, ScheduleConfig};

/// Hours a worker (or the business) actually works on one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveHours {
    pub open: Minute,
    pub close: Minute,
    /// Always inside `[open, close]` and non-empty when present.
    pub break_window: Option<Span>,
}

impl EffectiveHours {
    pub fn new(open: Minute, close: Minute, break_window: Option<Span>) -> Self {
        Self {
            open,
            close,
            break_window,
        }
    }

    pub fn span(&self) -> Span {
        Span::new(self.open, self.close)
    }

    /// `[open, close]` with the break cut out.
    pub fn working_spans(&self) -> Vec<Span> {
        match self.break_window {
            Some(b) => subtract_intervals(&[self.span()], &[b]),
            None => vec![self.span()],
        }
    }

    /// True if `span` sits inside opening hours without touching the break.
    pub fn admits(&self, span: &Span) -> bool {
        self.span().contains_span(span) && !self.break_window.is_some_and(|b| b.overlaps(span))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayAvailability {
    Open(EffectiveHours),
    Closed(ClosureReason),
}

impl DayAvailability {
    pub fn hours(&self) -> Option<&EffectiveHours> {
        match self {
            DayAvailability::Open(h) => Some(h),
            DayAvailability::Closed(_) => None,
        }
    }

    pub fn closure(&self) -> Option<ClosureReason> {
        match self {
            DayAvailability::Open(_) => None,
            DayAvailability::Closed(r) => Some(*r),
        }
    }
}

/// Decide whether `worker` (or the business, for `None`) takes bookings on `date`.
///
/// Closure checks run highest priority first and the first hit is reported:
/// holiday, weekly closure, global leave, worker day-off, worker leave.
pub fn resolve(schedule: &ScheduleConfig, date: NaiveDate, worker: Option<WorkerId>) -> DayAvailability {
    let weekday = date.weekday();
    let business_day = schedule.business_hours.day(weekday);

    if schedule.is_holiday(date) {
        return DayAvailability::Closed(ClosureReason::Holiday);
    }
    if !business_day.is_open {
        return DayAvailability::Closed(ClosureReason::WeeklyClosure);
    }
    if schedule.in_global_leave(date) {
        return DayAvailability::Closed(ClosureReason::GlobalLeave);
    }

    let day = match worker {
        None => business_day,
        Some(id) => {
            let Some(w) = schedule.worker(id) else {
                warn!("availability asked for unknown worker {id}");
                return DayAvailability::Closed(ClosureReason::Misconfigured);
            };
            let own = w.hours.as_ref().map(|h| h.day(weekday));
            if w.is_day_off(date) || own.is_some_and(|d| !d.is_open) {
                return DayAvailability::Closed(ClosureReason::WorkerOffDay);
            }
            if w.on_leave(date) {
                return DayAvailability::Closed(ClosureReason::WorkerLeave);
            }
            own.unwrap_or(business_day)
        }
    };

    match effective_hours(day) {
        Some(hours) => DayAvailability::Open(hours),
        None => {
            warn!(%date, ?worker, "unusable opening hours {day:?}; treating day as closed");
            DayAvailability::Closed(ClosureReason::Misconfigured)
        }
    }
}

fn effective_hours(day: &DayHours) -> Option<EffectiveHours> {
    let (open, close) = (day.open?, day.close?);
    if open >= close || close > MINUTES_PER_DAY {
        return None;
    }
    let break_window = match (day.break_start, day.break_end) {
        (Some(s), Some(e)) => Span::try_new(s, e).and_then(|b| b.intersect(&Span::new(open, close))),
        _ => None,
    };
    Some(EffectiveHours::new(open, close, break_window))
}

// ── Interval arithmetic ───────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::with_capacity(sorted.len());
    for &span in sorted {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}

/// `base` minus `to_remove`. Both sorted by start; `to_remove` may overlap itself.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut first = 0;

    for b in base {
        while first < to_remove.len() && to_remove[first].end <= b.start {
            first += 1;
        }
        let mut cursor = b.start;
        for r in to_remove[first..].iter().take_while(|r| r.start < b.end) {
            if r.start > cursor {
                result.push(Span::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
        }
        if cursor < b.end {
            result.push(Span::new(cursor, b.end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{WeekHours, WorkerSchedule};
    use chrono::Weekday;

    // 2026-03-09 is a Monday.
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 9).unwrap()
    }

    fn base() -> ScheduleConfig {
        ScheduleConfig::new(
            WeekHours::uniform(DayHours::open(540, 1080).with_break(720, 780))
                .set(Weekday::Sun, DayHours::closed()),
        )
        .with_worker(WorkerSchedule::new(1))
        .with_service("cut", 30)
    }

    #[test]
    fn open_day_uses_business_hours() {
        let schedule = base();
        let hours = EffectiveHours::new(540, 1080, Some(Span::new(720, 780)));
        assert_eq!(resolve(&schedule, monday(), None), DayAvailability::Open(hours));
        assert_eq!(resolve(&schedule, monday(), Some(1)), DayAvailability::Open(hours));
    }

    #[test]
    fn worker_hours_override_business_hours() {
        let mut w = WorkerSchedule::new(2);
        w.hours = Some(WeekHours::uniform(DayHours::open(600, 900)));
        let schedule = base().with_worker(w);
        assert_eq!(
            resolve(&schedule, monday(), Some(2)),
            DayAvailability::Open(EffectiveHours::new(600, 900, None))
        );
    }

    #[test]
    fn holiday_masks_everything() {
        let mut w = WorkerSchedule::new(2);
        w.days_off = vec![Weekday::Mon];
        w.leaves.push(crate::schedule::LeaveRange {
            start: monday(),
            end: monday(),
        });
        let schedule = base()
            .with_worker(w)
            .with_holiday(monday())
            .with_global_leave(monday(), monday());
        assert_eq!(
            resolve(&schedule, monday(), Some(2)),
            DayAvailability::Closed(ClosureReason::Holiday)
        );
    }

    #[test]
    fn weekly_closure_beats_leave() {
        let sunday = monday().pred_opt().unwrap();
        let schedule = base().with_global_leave(sunday, sunday);
        assert_eq!(
            resolve(&schedule, sunday, Some(1)),
            DayAvailability::Closed(ClosureReason::WeeklyClosure)
        );
        assert_eq!(
            resolve(&schedule, sunday, None),
            DayAvailability::Closed(ClosureReason::WeeklyClosure)
        );
    }

    #[test]
    fn global_leave_reported_even_with_personal_leave() {
        let mut w = WorkerSchedule::new(2);
        w.leaves.push(crate::schedule::LeaveRange {
            start: monday(),
            end: monday(),
        });
        let schedule = base().with_worker(w).with_global_leave(monday(), monday());
        assert_eq!(
            resolve(&schedule, monday(), Some(2)),
            DayAvailability::Closed(ClosureReason::GlobalLeave)
        );
    }

    #[test]
    fn day_off_beats_personal_leave() {
        let mut w = WorkerSchedule::new(2);
        w.days_off = vec![Weekday::Mon];
        w.leaves.push(crate::schedule::LeaveRange {
            start: monday(),
            end: monday(),
        });
        let schedule = base().with_worker(w);
        assert_eq!(
            resolve(&schedule, monday(), Some(2)),
            DayAvailability::Closed(ClosureReason::WorkerOffDay)
        );
        // the business itself is open
        assert!(resolve(&schedule, monday(), None).hours().is_some());
    }

    #[test]
    fn own_closed_weekday_is_a_day_off() {
        let mut w = WorkerSchedule::new(2);
        w.hours = Some(WeekHours::uniform(DayHours::open(600, 900)).set(Weekday::Mon, DayHours::closed()));
        let schedule = base().with_worker(w);
        assert_eq!(
            resolve(&schedule, monday(), Some(2)).closure(),
            Some(ClosureReason::WorkerOffDay)
        );
    }

    #[test]
    fn personal_leave() {
        let mut w = WorkerSchedule::new(2);
        w.leaves.push(crate::schedule::LeaveRange {
            start: monday().pred_opt().unwrap(),
            end: monday().succ_opt().unwrap(),
        });
        let schedule = base().with_worker(w);
        assert_eq!(
            resolve(&schedule, monday(), Some(2)).closure(),
            Some(ClosureReason::WorkerLeave)
        );
    }

    #[test]
    fn unreadable_or_inverted_hours_close_the_day() {
        let mut unreadable = DayHours::open(540, 1080);
        unreadable.open = None;
        let schedule = ScheduleConfig::new(WeekHours::uniform(unreadable));
        assert_eq!(
            resolve(&schedule, monday(), None).closure(),
            Some(ClosureReason::Misconfigured)
        );

        let schedule = ScheduleConfig::new(WeekHours::uniform(DayHours::open(1080, 540)));
        assert_eq!(
            resolve(&schedule, monday(), None).closure(),
            Some(ClosureReason::Misconfigured)
        );

        assert_eq!(
            resolve(&base(), monday(), Some(99)).closure(),
            Some(ClosureReason::Misconfigured)
        );
    }

    #[test]
    fn break_is_clipped_or_dropped() {
        let schedule = ScheduleConfig::new(WeekHours::uniform(DayHours::open(540, 720).with_break(700, 800)));
        assert_eq!(
            resolve(&schedule, monday(), None).hours().and_then(|h| h.break_window),
            Some(Span::new(700, 720))
        );
        let schedule = ScheduleConfig::new(WeekHours::uniform(DayHours::open(540, 720).with_break(800, 700)));
        assert_eq!(
            resolve(&schedule, monday(), None).hours().and_then(|h| h.break_window),
            None
        );
    }

    #[test]
    fn admits_respects_break_and_bounds() {
        let hours = EffectiveHours::new(570, 1140, Some(Span::new(720, 840)));
        assert!(hours.admits(&Span::new(690, 720)));
        assert!(hours.admits(&Span::new(840, 870)));
        assert!(!hours.admits(&Span::new(700, 730)));
        assert!(!hours.admits(&Span::new(560, 600)));
        assert!(!hours.admits(&Span::new(1120, 1150)));
        assert_eq!(
            hours.working_spans(),
            vec![Span::new(570, 720), Span::new(840, 1140)]
        );
    }

    // ── interval arithmetic ───────────────────────────────

    #[test]
    fn subtract_cases() {
        let base = [Span::new(100, 300)];
        assert_eq!(subtract_intervals(&base, &[]), base.to_vec());
        assert!(subtract_intervals(&[], &[Span::new(0, 10)]).is_empty());
        assert!(subtract_intervals(&base, &[Span::new(50, 350)]).is_empty());
        assert_eq!(
            subtract_intervals(&base, &[Span::new(150, 200)]),
            vec![Span::new(100, 150), Span::new(200, 300)]
        );
        assert_eq!(
            subtract_intervals(&base, &[Span::new(50, 150), Span::new(250, 400)]),
            vec![Span::new(150, 250)]
        );
        assert_eq!(
            subtract_intervals(&[Span::new(0, 100), Span::new(200, 300)], &[Span::new(100, 200)]),
            vec![Span::new(0, 100), Span::new(200, 300)]
        );
    }

    #[test]
    fn merge_cases() {
        assert!(merge_overlapping(&[]).is_empty());
        assert_eq!(
            merge_overlapping(&[Span::new(100, 300), Span::new(200, 400), Span::new(500, 600)]),
            vec![Span::new(100, 400), Span::new(500, 600)]
        );
        assert_eq!(
            merge_overlapping(&[Span::new(100, 200), Span::new(200, 300)]),
            vec![Span::new(100, 300)]
        );
    }
}
