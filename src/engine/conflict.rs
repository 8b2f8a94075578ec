use chrono::{NaiveDate, TimeDelta};

use crate::limits::*;
use crate::model::*;

use super::availability::EffectiveHours;
use super::EngineError;

/// Reject `span` if it overlaps any CONFIRMED or HOLD booking of `worker`.
pub(crate) fn check_no_conflict(day: &DayBook, worker: WorkerId, span: &Span) -> Result<(), EngineError> {
    match day.overlapping(worker, span).next() {
        Some(existing) => Err(EngineError::SlotUnavailable(existing.id)),
        None => Ok(()),
    }
}

/// Start must be at or after `earliest`, and the whole span inside hours and clear of the break.
pub(crate) fn check_within_hours(
    hours: &EffectiveHours,
    span: &Span,
    earliest: Minute,
) -> Result<(), EngineError> {
    if span.start < earliest || !hours.admits(span) {
        return Err(EngineError::OutsideHours);
    }
    Ok(())
}

pub(crate) fn validate_client(client: &Client) -> Result<(), EngineError> {
    if client.name.trim().is_empty() {
        return Err(EngineError::LimitExceeded("client name is empty"));
    }
    if client.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("client name too long"));
    }
    if client.email.len() > MAX_EMAIL_LEN || !client.email.contains('@') {
        return Err(EngineError::LimitExceeded("client email invalid"));
    }
    if client.phone.as_ref().is_some_and(|p| p.len() > MAX_PHONE_LEN) {
        return Err(EngineError::LimitExceeded("client phone too long"));
    }
    Ok(())
}

/// Only today and dates inside the booking horizon are accepted.
pub(crate) fn validate_date(date: NaiveDate, today: NaiveDate) -> Result<(), EngineError> {
    if date < today || date > today + TimeDelta::days(MAX_BOOKING_HORIZON_DAYS) {
        return Err(EngineError::DateOutOfRange(date));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
    }

    fn client() -> Client {
        Client {
            name: "Ada".into(),
            email: "ada@example.com".into(),
            phone: Some("+33 1 23 45 67 89".into()),
        }
    }

    #[test]
    fn conflict_reports_the_blocking_booking() {
        let mut day = DayBook::new(date());
        let id = Ulid::new();
        day.insert_booking(Booking {
            id,
            worker: 1,
            date: date(),
            span: Span::new(600, 630),
            service: "cut".into(),
            client: client(),
            status: BookingStatus::Hold,
        });
        assert_eq!(
            check_no_conflict(&day, 1, &Span::new(615, 645)),
            Err(EngineError::SlotUnavailable(id))
        );
        assert!(check_no_conflict(&day, 1, &Span::new(630, 660)).is_ok());
        assert!(check_no_conflict(&day, 2, &Span::new(600, 630)).is_ok());
    }

    #[test]
    fn hours_check() {
        let hours = EffectiveHours::new(540, 1080, Some(Span::new(720, 780)));
        assert!(check_within_hours(&hours, &Span::new(690, 720), 0).is_ok());
        assert_eq!(
            check_within_hours(&hours, &Span::new(700, 730), 0),
            Err(EngineError::OutsideHours)
        );
        assert_eq!(
            check_within_hours(&hours, &Span::new(600, 630), 601),
            Err(EngineError::OutsideHours)
        );
        assert!(check_within_hours(&hours, &Span::new(600, 630), 600).is_ok());
    }

    #[test]
    fn client_limits() {
        assert!(validate_client(&client()).is_ok());
        let mut c = client();
        c.name = " ".into();
        assert!(validate_client(&c).is_err());
        let mut c = client();
        c.email = "x".repeat(MAX_EMAIL_LEN) + "@";
        assert!(validate_client(&c).is_err());
        let mut c = client();
        c.phone = Some("1".repeat(MAX_PHONE_LEN + 1));
        assert!(validate_client(&c).is_err());
    }

    #[test]
    fn date_window() {
        let today = date();
        assert!(validate_date(today, today).is_ok());
        assert!(validate_date(today.pred_opt().unwrap(), today).is_err());
        assert!(validate_date(today + TimeDelta::days(MAX_BOOKING_HORIZON_DAYS), today).is_ok());
        assert!(validate_date(today + TimeDelta::days(MAX_BOOKING_HORIZON_DAYS + 1), today).is_err());
    }
}
