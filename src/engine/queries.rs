use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::clock::earliest_start;
use crate::model::*;

use super::availability::{resolve, DayAvailability};
use super::gaps;
use super::slots::offerable_starts;
use super::{Engine, EngineError};

impl Engine {
    /// Business-local time as the engine sees it.
    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Opening state of `date` for a worker, or for the business with `None`.
    pub fn availability(&self, date: NaiveDate, worker: Option<WorkerId>) -> DayAvailability {
        resolve(&self.schedule(), date, worker)
    }

    /// Bookable start times for `service` with `worker` on `date`. A closed day
    /// is not an error: the list is empty and carries the reason.
    pub async fn available_slots(
        &self,
        date: NaiveDate,
        worker: WorkerId,
        service: &str,
    ) -> Result<SlotList, EngineError> {
        let schedule = self.schedule();
        let duration = schedule
            .service_duration(service)
            .ok_or_else(|| EngineError::UnknownService(service.to_string()))?;
        if schedule.worker(worker).is_none() {
            return Err(EngineError::UnknownWorker(worker));
        }

        let mut list = SlotList {
            date,
            worker,
            service: service.to_string(),
            slots: Vec::new(),
            closure: None,
        };
        let hours = match resolve(&schedule, date, Some(worker)) {
            DayAvailability::Open(hours) => hours,
            DayAvailability::Closed(reason) => {
                list.closure = Some(reason);
                return Ok(list);
            }
        };

        let occupied = self.occupied(date, worker).await;
        let earliest = earliest_start(date, self.clock.now());
        list.slots = offerable_starts(&hours, &occupied, duration, earliest);
        Ok(list)
    }

    /// Free intervals left in `worker`'s day from now on. Empty when closed.
    pub async fn day_gaps(&self, date: NaiveDate, worker: WorkerId) -> Result<Vec<Span>, EngineError> {
        let schedule = self.schedule();
        if schedule.worker(worker).is_none() {
            return Err(EngineError::UnknownWorker(worker));
        }
        let Some(hours) = resolve(&schedule, date, Some(worker)).hours().copied() else {
            return Ok(Vec::new());
        };
        let occupied = self.occupied(date, worker).await;
        let earliest = earliest_start(date, self.clock.now());
        Ok(gaps::day_gaps(&hours, &occupied, earliest))
    }

    /// CONFIRMED and HOLD bookings on `date`, by worker then start.
    pub async fn bookings_for(&self, date: NaiveDate, worker: Option<WorkerId>) -> Vec<Booking> {
        let Some(day) = self.existing_day(date) else {
            return Vec::new();
        };
        let guard = day.read().await;
        match worker {
            Some(w) => guard.worker_bookings(w).to_vec(),
            None => guard.bookings.values().flatten().cloned().collect(),
        }
    }

    /// Requests for `date` in join order, optionally only those whose status
    /// label (`waiting`, `offer_sent`, `booked`, `refused`, `expired`) matches.
    pub async fn requests_for(&self, date: NaiveDate, status: Option<&str>) -> Vec<WaitingRequest> {
        let Some(day) = self.existing_day(date) else {
            return Vec::new();
        };
        let guard = day.read().await;
        guard
            .requests
            .iter()
            .filter(|r| status.is_none_or(|s| r.status.label() == s))
            .cloned()
            .collect()
    }

    pub async fn get_request(&self, id: Ulid) -> Option<WaitingRequest> {
        let date = self.index.requests.get(&id).map(|e| *e.value())?;
        let day = self.existing_day(date)?;
        let guard = day.read().await;
        guard.request(id).cloned()
    }

    pub async fn get_booking(&self, id: Ulid) -> Option<Booking> {
        let date = self.index.bookings.get(&id).map(|e| *e.value())?;
        let day = self.existing_day(date)?;
        let guard = day.read().await;
        guard.booking(id).cloned()
    }

    /// The request behind a live offer token, for showing the offer before the
    /// client accepts or refuses it.
    pub async fn offer_for_token(&self, token: &str) -> Result<WaitingRequest, EngineError> {
        let (date, request_id) = self
            .index
            .tokens
            .get(token)
            .map(|e| *e.value())
            .ok_or(EngineError::TokenInvalid)?;
        let day = self.existing_day(date).ok_or(EngineError::TokenInvalid)?;
        let guard = day.read().await;
        let request = guard
            .request(request_id)
            .filter(|r| r.offer().is_some_and(|o| o.token == token))
            .cloned()
            .ok_or(EngineError::TokenInvalid)?;
        if request.offer().is_some_and(|o| o.expires_at <= self.clock.now()) {
            return Err(EngineError::OfferExpired);
        }
        Ok(request)
    }

    async fn occupied(&self, date: NaiveDate, worker: WorkerId) -> Vec<Span> {
        let Some(day) = self.existing_day(date) else {
            return Vec::new();
        };
        let guard = day.read().await;
        guard.occupied(worker)
    }
}
