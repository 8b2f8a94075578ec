use std::collections::VecDeque;

use futures::future;
use rand::Rng;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::clock::earliest_start;
use crate::limits::*;
use crate::messenger::{self, JoinedNotice, Notice, OfferNotice};
use crate::model::*;
use crate::observability::*;
use crate::schedule::ScheduleConfig;

use super::availability::{resolve, DayAvailability, EffectiveHours};
use super::conflict::{check_no_conflict, check_within_hours, validate_client, validate_date};
use super::gaps::{day_gaps, merged_gap};
use super::matcher::{plan_offers, PlannedOffer};
use super::{Engine, EngineError, SharedDayBook, WalCommand};

impl Engine {
    /// Create a CONFIRMED booking. With `WorkerPreference::Any` the first worker
    /// (by id) that can take the start is used.
    pub async fn book(
        &self,
        date: chrono::NaiveDate,
        worker: WorkerPreference,
        start: Minute,
        service: &str,
        client: Client,
    ) -> Result<Booking, EngineError> {
        validate_client(&client)?;
        let now = self.clock.now();
        validate_date(date, now.date())?;
        let schedule = self.schedule();
        let duration = schedule
            .service_duration(service)
            .ok_or_else(|| EngineError::UnknownService(service.to_string()))?;
        if !(0..MINUTES_PER_DAY).contains(&start) {
            return Err(EngineError::OutsideHours);
        }
        let span = start
            .checked_add(duration)
            .and_then(|end| Span::try_new(start, end))
            .ok_or(EngineError::OutsideHours)?;
        let candidates = match worker {
            WorkerPreference::Specific(id) => {
                if schedule.worker(id).is_none() {
                    return Err(EngineError::UnknownWorker(id));
                }
                vec![id]
            }
            WorkerPreference::Any => schedule.worker_ids(),
        };
        let earliest = earliest_start(date, now);

        let _permit = self.mutation_permit().await;
        let day_lock = self.day(date);
        let mut day = day_lock.write().await;

        let mut refusal: Option<EngineError> = None;
        for id in candidates {
            match check_bookable(&schedule, &day, id, &span, earliest) {
                Ok(()) => {
                    let booking = Booking {
                        id: Ulid::new(),
                        worker: id,
                        date,
                        span,
                        service: service.to_string(),
                        client,
                        status: BookingStatus::Confirmed,
                    };
                    let event = Event::BookingConfirmed {
                        booking: booking.clone(),
                    };
                    self.persist_and_apply(&mut day, &event).await?;
                    metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
                    info!(booking = %booking.id, worker = id, %date, span = %span, "booked");
                    return Ok(booking);
                }
                // a taken or out-of-hours start says more than a closed worker
                Err(e) => match refusal {
                    Some(EngineError::Closed(_)) | None => refusal = Some(e),
                    Some(_) => {}
                },
            }
        }
        Err(refusal.unwrap_or(EngineError::Closed(ClosureReason::Misconfigured)))
    }

    /// Remove a CONFIRMED booking and offer the merged gap around it to the waitlist.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Rematch, EngineError> {
        let _permit = self.mutation_permit().await;
        let mut day = self.resolve_booking_write(&id).await?;
        let booking = day.booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        if booking.status == BookingStatus::Hold {
            return Err(EngineError::OfferPending(id));
        }

        let event = Event::BookingCancelled {
            id,
            worker: booking.worker,
            date: booking.date,
        };
        self.persist_and_apply(&mut day, &event).await?;
        metrics::counter!(BOOKINGS_CANCELLED_TOTAL).increment(1);
        info!(booking = %id, worker = booking.worker, date = %booking.date, span = %booking.span, "booking cancelled");

        Ok(self.rematch_freed(&mut day, booking.worker, booking.span).await)
    }

    pub async fn join_waitlist(
        &self,
        date: chrono::NaiveDate,
        service: &str,
        worker: WorkerPreference,
        client: Client,
    ) -> Result<WaitingRequest, EngineError> {
        validate_client(&client)?;
        let now = self.clock.now();
        validate_date(date, now.date())?;
        let schedule = self.schedule();
        if schedule.service(service).is_none() {
            return Err(EngineError::UnknownService(service.to_string()));
        }
        let target = match worker {
            WorkerPreference::Specific(id) => {
                if schedule.worker(id).is_none() {
                    return Err(EngineError::UnknownWorker(id));
                }
                Some(id)
            }
            WorkerPreference::Any => None,
        };
        if let DayAvailability::Closed(reason) = resolve(&schedule, date, target) {
            return Err(EngineError::Closed(reason));
        }

        let _permit = self.mutation_permit().await;
        let day_lock = self.day(date);
        let mut day = day_lock.write().await;
        if day.requests.len() >= MAX_REQUESTS_PER_DATE {
            return Err(EngineError::LimitExceeded("too many waiting requests for date"));
        }

        let request = WaitingRequest {
            id: Ulid::new(),
            client,
            date,
            service: service.to_string(),
            worker,
            created_at: now,
            status: RequestStatus::Waiting,
        };
        let event = Event::RequestJoined {
            request: request.clone(),
        };
        self.persist_and_apply(&mut day, &event).await?;
        metrics::counter!(WAITLIST_JOINS_TOTAL).increment(1);
        info!(request = %request.id, %date, service, ?worker, "joined waitlist");

        messenger::dispatch(
            self.notifier.clone(),
            Notice::Joined(JoinedNotice {
                request_id: request.id,
                client: request.client.clone(),
                date,
                service: request.service.clone(),
                worker,
            }),
        );
        Ok(request)
    }

    /// Accept an offer: the HOLD becomes CONFIRMED. Expiry is checked here even
    /// if the sweep has not run yet.
    pub async fn confirm_offer(&self, token: &str) -> Result<Booking, EngineError> {
        let _permit = self.mutation_permit().await;
        let (request_id, offer, mut day) = self.resolve_offer_write(token).await?;
        if offer.expires_at <= self.clock.now() {
            return Err(EngineError::OfferExpired);
        }

        let event = Event::OfferResolved {
            request_id,
            date: day.date,
            resolution: Resolution::Booked,
        };
        self.persist_and_apply(&mut day, &event).await?;
        metrics::counter!(OFFERS_RESOLVED_TOTAL, "outcome" => Resolution::Booked.label()).increment(1);
        info!(request = %request_id, booking = %offer.hold_id, "offer confirmed");

        day.booking(offer.hold_id)
            .cloned()
            .ok_or(EngineError::NotFound(offer.hold_id))
    }

    /// Decline an offer: the HOLD is dropped and the freed span goes to the next
    /// waiting client.
    pub async fn refuse_offer(&self, token: &str) -> Result<Rematch, EngineError> {
        let _permit = self.mutation_permit().await;
        let (request_id, offer, mut day) = self.resolve_offer_write(token).await?;
        if offer.expires_at <= self.clock.now() {
            return Err(EngineError::OfferExpired);
        }

        let event = Event::OfferResolved {
            request_id,
            date: day.date,
            resolution: Resolution::Refused,
        };
        self.persist_and_apply(&mut day, &event).await?;
        metrics::counter!(OFFERS_RESOLVED_TOTAL, "outcome" => Resolution::Refused.label()).increment(1);
        info!(request = %request_id, "offer refused");

        Ok(self.rematch_freed(&mut day, offer.worker, offer.span).await)
    }

    /// Expire every outstanding offer whose deadline has passed and re-offer
    /// the freed spans. Offers already resolved are not touched.
    pub async fn expire_offers(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let now = self.clock.now();
        let days: Vec<SharedDayBook> = self.days.iter().map(|e| e.value().clone()).collect();

        for day_lock in days {
            {
                let day = day_lock.read().await;
                if !day.requests.iter().any(|r| is_due(r, now)) {
                    continue;
                }
            }

            let _permit = self.mutation_permit().await;
            let mut day = day_lock.write().await;
            let due: Vec<(Ulid, Offer)> = day
                .requests
                .iter()
                .filter(|r| is_due(r, now))
                .filter_map(|r| r.offer().map(|o| (r.id, o.clone())))
                .collect();

            for (request_id, offer) in due {
                let event = Event::OfferResolved {
                    request_id,
                    date: day.date,
                    resolution: Resolution::Expired,
                };
                if let Err(e) = self.persist_and_apply(&mut day, &event).await {
                    warn!(request = %request_id, "could not expire offer: {e}");
                    continue;
                }
                metrics::counter!(OFFERS_RESOLVED_TOTAL, "outcome" => Resolution::Expired.label())
                    .increment(1);
                info!(request = %request_id, date = %day.date, "offer expired");
                report.expired.push(request_id);

                let rematch = self.rematch_freed(&mut day, offer.worker, offer.span).await;
                report.offers.extend(rematch.offers);
            }
        }

        report
    }

    /// Drop the books of dates before `today` that have no outstanding offer,
    /// along with their index entries. Their events stay in the journal until
    /// the next compaction.
    pub async fn retire_past_days(&self, today: chrono::NaiveDate) -> usize {
        if !self.days.iter().any(|e| *e.key() < today) {
            return 0;
        }
        let _exclusive = self.write_gate.write().await;

        let past: Vec<(chrono::NaiveDate, SharedDayBook)> = self
            .days
            .iter()
            .filter(|e| *e.key() < today)
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        let mut retired = 0;
        for (date, day_lock) in past {
            let day = day_lock.read().await;
            if day.requests.iter().any(|r| r.offer().is_some()) {
                continue;
            }
            for booking in day.bookings.values().flatten() {
                self.index.bookings.remove(&booking.id);
            }
            for request in &day.requests {
                self.index.requests.remove(&request.id);
            }
            drop(day);
            self.days.remove(&date);
            retired += 1;
        }
        if retired > 0 {
            debug!(retired, %today, "retired past dates");
        }
        retired
    }

    /// Offer every free gap of every date from today on to its waiting
    /// requests. Catches matches missed by ordering races or schedule edits.
    pub async fn scan_waitlist(&self) -> Vec<OfferSummary> {
        let now = self.clock.now();
        let today = now.date();
        let schedule = self.schedule();
        let days: Vec<SharedDayBook> = self
            .days
            .iter()
            .filter(|e| *e.key() >= today)
            .map(|e| e.value().clone())
            .collect();

        let mut issued = Vec::new();
        for day_lock in days {
            {
                let day = day_lock.read().await;
                if !day.requests.iter().any(WaitingRequest::is_waiting) {
                    continue;
                }
            }

            let _permit = self.mutation_permit().await;
            let mut day = day_lock.write().await;
            let earliest = earliest_start(day.date, now);
            for worker in schedule.worker_ids() {
                if !day
                    .requests
                    .iter()
                    .any(|r| r.is_waiting() && r.worker.accepts(worker))
                {
                    continue;
                }
                let Some(hours) = resolve(&schedule, day.date, Some(worker)).hours().copied() else {
                    continue;
                };
                for gap in day_gaps(&hours, &day.occupied(worker), earliest) {
                    let offers = self
                        .fill_gap(&mut day, &schedule, &hours, worker, gap, earliest)
                        .await;
                    issued.extend(offers);
                }
            }
        }
        issued
    }

    /// Merge the gap around `freed` and hand it to the matcher.
    async fn rematch_freed(&self, day: &mut DayBook, worker: WorkerId, freed: Span) -> Rematch {
        let schedule = self.schedule();
        let Some(hours) = resolve(&schedule, day.date, Some(worker)).hours().copied() else {
            debug!(worker, date = %day.date, "worker no longer working; freed span not re-offered");
            return Rematch::default();
        };
        let earliest = earliest_start(day.date, self.clock.now());
        let Some(gap) = merged_gap(&hours, &day.occupied(worker), freed, earliest) else {
            return Rematch::default();
        };
        let offers = self
            .fill_gap(day, &schedule, &hours, worker, gap, earliest)
            .await;
        Rematch {
            gap: Some(gap),
            offers,
        }
    }

    /// Issue offers for `gap` until the matcher runs dry. A hold that collides
    /// with a booking the gap did not account for splits what is left of the
    /// gap around it; every piece is matched again, a bounded number of times.
    pub(super) async fn fill_gap(
        &self,
        day: &mut DayBook,
        schedule: &ScheduleConfig,
        hours: &EffectiveHours,
        worker: WorkerId,
        gap: Span,
        earliest: Minute,
    ) -> Vec<OfferSummary> {
        let mut issued = Vec::new();
        let mut retries = 0;
        let mut pending = VecDeque::from([gap]);

        while let Some(current) = pending.pop_front() {
            let planned = {
                let pool = day.waiting();
                plan_offers(current, worker, &pool, |s| schedule.service_duration(s))
            };
            for plan in planned {
                match self.issue_offer(day, worker, plan).await {
                    Ok(summary) => issued.push(summary),
                    Err(EngineError::SlotUnavailable(blocker)) if retries < MAX_MATCH_RETRIES => {
                        retries += 1;
                        metrics::counter!(MATCH_RETRIES_TOTAL).increment(1);
                        debug!(%blocker, span = %plan.span, "hold collided; recomputing gap");
                        let pieces: Vec<Span> =
                            day_gaps(hours, &day.occupied(worker), earliest.max(plan.span.start))
                                .into_iter()
                                .filter_map(|g| g.intersect(&current))
                                .collect();
                        for piece in pieces.into_iter().rev() {
                            pending.push_front(piece);
                        }
                        break;
                    }
                    Err(e) => {
                        warn!(request = %plan.request_id, span = %plan.span, "offer not issued: {e}");
                        return issued;
                    }
                }
            }
        }
        issued
    }

    async fn issue_offer(
        &self,
        day: &mut DayBook,
        worker: WorkerId,
        plan: PlannedOffer,
    ) -> Result<OfferSummary, EngineError> {
        check_no_conflict(day, worker, &plan.span)?;
        let request = day
            .request(plan.request_id)
            .filter(|r| r.is_waiting())
            .cloned()
            .ok_or(EngineError::NotFound(plan.request_id))?;

        let offer = Offer {
            token: self.new_offer_token(),
            expires_at: self.clock.now() + self.offer_ttl,
            worker,
            span: plan.span,
            hold_id: Ulid::new(),
        };
        let event = Event::OfferIssued {
            request_id: request.id,
            date: day.date,
            offer: offer.clone(),
        };
        self.persist_and_apply(day, &event).await?;
        metrics::counter!(OFFERS_ISSUED_TOTAL).increment(1);
        info!(request = %request.id, worker, date = %day.date, span = %offer.span, "offer issued");

        messenger::dispatch(
            self.notifier.clone(),
            Notice::Offered(OfferNotice {
                request_id: request.id,
                client: request.client,
                date: day.date,
                start: offer.span.start,
                service: request.service,
                worker,
                token: offer.token.clone(),
                expires_at: offer.expires_at,
            }),
        );

        Ok(OfferSummary {
            request_id: request.id,
            date: day.date,
            worker,
            span: offer.span,
            token: offer.token,
            expires_at: offer.expires_at,
        })
    }

    /// 192 random bits, hex encoded. Never reuses a live token.
    fn new_offer_token(&self) -> String {
        loop {
            let mut bytes = [0u8; 24];
            rand::rng().fill(&mut bytes);
            let token: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
            if !self.index.tokens.contains_key(&token) {
                return token;
            }
        }
    }

    /// Rewrite the journal from live state. HOLDs are carried by their
    /// `OfferIssued` event, so they are not emitted as bookings.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.write_gate.write().await;

        let days: Vec<SharedDayBook> = self.days.iter().map(|e| e.value().clone()).collect();
        let mut snapshot: Vec<DayBook> =
            future::join_all(days.iter().map(|day| async move { day.read().await.clone() })).await;
        snapshot.sort_by_key(|d| d.date);

        let mut events = Vec::new();
        for day in &snapshot {
            for booking in day.bookings.values().flatten() {
                if booking.status == BookingStatus::Confirmed {
                    events.push(Event::BookingConfirmed {
                        booking: booking.clone(),
                    });
                }
            }
            for request in &day.requests {
                match &request.status {
                    RequestStatus::OfferSent(offer) => {
                        let mut waiting = request.clone();
                        waiting.status = RequestStatus::Waiting;
                        events.push(Event::RequestJoined { request: waiting });
                        events.push(Event::OfferIssued {
                            request_id: request.id,
                            date: request.date,
                            offer: offer.clone(),
                        });
                    }
                    _ => events.push(Event::RequestJoined {
                        request: request.clone(),
                    }),
                }
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("journal compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn is_due(request: &WaitingRequest, now: chrono::NaiveDateTime) -> bool {
    request.offer().is_some_and(|o| o.expires_at <= now)
}

fn check_bookable(
    schedule: &ScheduleConfig,
    day: &DayBook,
    worker: WorkerId,
    span: &Span,
    earliest: Minute,
) -> Result<(), EngineError> {
    match resolve(schedule, day.date, Some(worker)) {
        DayAvailability::Closed(reason) => Err(EngineError::Closed(reason)),
        DayAvailability::Open(hours) => {
            check_within_hours(&hours, span, earliest)?;
            check_no_conflict(day, worker, span)
        }
    }
}
