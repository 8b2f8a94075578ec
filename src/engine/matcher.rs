use ulid::Ulid;

use crate::model::{Minute, Span, WaitingRequest, WorkerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedOffer {
    pub request_id: Ulid,
    pub span: Span,
}

/// Fill `gap` on `worker` from the waiting pool, oldest request first.
///
/// `pool` must already be in (created_at, id) order. Each pick takes the
/// earliest request that accepts the worker and whose service fits what is
/// left of the gap; the next pick starts where that service ends. Requests
/// whose service `duration_of` cannot resolve are skipped.
pub fn plan_offers(
    gap: Span,
    worker: WorkerId,
    pool: &[&WaitingRequest],
    duration_of: impl Fn(&str) -> Option<Minute>,
) -> Vec<PlannedOffer> {
    let mut remaining: Vec<(&WaitingRequest, Minute)> = pool
        .iter()
        .filter(|r| r.worker.accepts(worker))
        .filter_map(|r| duration_of(&r.service).filter(|d| *d > 0).map(|d| (*r, d)))
        .collect();

    let mut planned = Vec::new();
    let mut start = gap.start;
    while start < gap.end {
        let room = gap.end - start;
        let Some(pos) = remaining.iter().position(|(_, d)| *d <= room) else {
            break;
        };
        let (request, duration) = remaining.remove(pos);
        planned.push(PlannedOffer {
            request_id: request.id,
            span: Span::new(start, start + duration),
        });
        start += duration;
    }
    planned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Client, RequestStatus, WorkerPreference};
    use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 10)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn request(service: &str, worker: WorkerPreference, minutes_after: i64) -> WaitingRequest {
        WaitingRequest {
            id: Ulid::new(),
            client: Client {
                name: "client".into(),
                email: "client@example.com".into(),
                phone: None,
            },
            date: t0().date(),
            service: service.into(),
            worker,
            created_at: t0() + TimeDelta::minutes(minutes_after),
            status: RequestStatus::Waiting,
        }
    }

    fn catalog(name: &str) -> Option<Minute> {
        match name {
            "short" => Some(15),
            "cut" => Some(30),
            "colour" => Some(90),
            _ => None,
        }
    }

    #[test]
    fn oldest_fitting_request_wins() {
        let older = request("cut", WorkerPreference::Any, 0);
        let newer = request("cut", WorkerPreference::Any, 5);
        let planned = plan_offers(Span::new(630, 660), 1, &[&older, &newer], catalog);
        assert_eq!(
            planned,
            vec![PlannedOffer {
                request_id: older.id,
                span: Span::new(630, 660)
            }]
        );
    }

    #[test]
    fn ties_broken_by_pool_order() {
        let mut a = request("cut", WorkerPreference::Any, 0);
        let mut b = request("cut", WorkerPreference::Any, 0);
        a.id = Ulid::from_parts(1, 1);
        b.id = Ulid::from_parts(1, 2);
        let planned = plan_offers(Span::new(600, 630), 1, &[&a, &b], catalog);
        assert_eq!(planned[0].request_id, a.id);
    }

    #[test]
    fn too_long_and_wrong_worker_are_passed_over() {
        let long = request("colour", WorkerPreference::Any, 0);
        let elsewhere = request("cut", WorkerPreference::Specific(2), 1);
        let mine = request("cut", WorkerPreference::Specific(1), 2);
        let planned = plan_offers(Span::new(600, 660), 1, &[&long, &elsewhere, &mine], catalog);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].request_id, mine.id);
        assert_eq!(planned[0].span, Span::new(600, 630));
    }

    #[test]
    fn remainder_serves_further_requests() {
        let first = request("cut", WorkerPreference::Any, 0);
        let second = request("cut", WorkerPreference::Any, 1);
        let third = request("short", WorkerPreference::Any, 2);
        let fourth = request("short", WorkerPreference::Any, 3);
        let planned = plan_offers(
            Span::new(600, 675),
            1,
            &[&first, &second, &third, &fourth],
            catalog,
        );
        let got: Vec<(Ulid, Span)> = planned.iter().map(|p| (p.request_id, p.span)).collect();
        assert_eq!(
            got,
            vec![
                (first.id, Span::new(600, 630)),
                (second.id, Span::new(630, 660)),
                (third.id, Span::new(660, 675)),
            ]
        );
    }

    #[test]
    fn unknown_service_skipped() {
        let ghost = request("perm", WorkerPreference::Any, 0);
        let real = request("short", WorkerPreference::Any, 1);
        let planned = plan_offers(Span::new(600, 615), 1, &[&ghost, &real], catalog);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].request_id, real.id);
    }

    #[test]
    fn nothing_fits() {
        let r = request("colour", WorkerPreference::Any, 0);
        assert!(plan_offers(Span::new(600, 660), 1, &[&r], catalog).is_empty());
        assert!(plan_offers(Span::new(600, 660), 1, &[], catalog).is_empty());
    }
}
