use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{ClosureReason, WorkerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Ulid),
    /// Overlaps the CONFIRMED or HOLD booking with this id.
    SlotUnavailable(Ulid),
    OutsideHours,
    Closed(ClosureReason),
    TokenInvalid,
    OfferExpired,
    UnknownService(String),
    UnknownWorker(WorkerId),
    /// The booking is a HOLD backing an outstanding offer.
    OfferPending(Ulid),
    DateOutOfRange(NaiveDate),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::SlotUnavailable(id) => write!(f, "slot already taken by booking {id}"),
            EngineError::OutsideHours => {
                write!(f, "start is outside opening hours, in a break, or in the past")
            }
            EngineError::Closed(reason) => write!(f, "closed: {reason}"),
            EngineError::TokenInvalid => write!(f, "offer token is invalid or already used"),
            EngineError::OfferExpired => write!(f, "offer has expired"),
            EngineError::UnknownService(name) => write!(f, "unknown service: {name}"),
            EngineError::UnknownWorker(id) => write!(f, "unknown worker: {id}"),
            EngineError::OfferPending(id) => {
                write!(f, "booking {id} is held for an outstanding offer")
            }
            EngineError::DateOutOfRange(date) => write!(f, "date out of range: {date}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
