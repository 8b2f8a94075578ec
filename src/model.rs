use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes since local midnight. The only time-of-day type.
pub type Minute = i32;

pub type WorkerId = u32;

pub const MINUTES_PER_DAY: Minute = 24 * 60;

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Build a span only if it is non-empty.
    pub fn try_new(start: Minute, end: Minute) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn minutes(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn intersect(&self, other: &Span) -> Option<Span> {
        Span::try_new(self.start.max(other.start), self.end.min(other.end))
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}–{}", format_hhmm(self.start), format_hhmm(self.end))
    }
}

/// Parse `HH:MM` (or `HH:MM:SS`, seconds ignored). `24:00` is accepted as end of day.
pub fn parse_hhmm(s: &str) -> Option<Minute> {
    let mut parts = s.trim().split(':');
    let h: Minute = parts.next()?.parse().ok()?;
    let m: Minute = parts.next()?.parse().ok()?;
    if let Some(sec) = parts.next() {
        let sec: u8 = sec.parse().ok()?;
        if sec >= 60 || parts.next().is_some() {
            return None;
        }
    }
    if !(0..60).contains(&m) || !(0..=24).contains(&h) || (h == 24 && m != 0) {
        return None;
    }
    Some(h * 60 + m)
}

pub fn format_hhmm(m: Minute) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

// ── Clients, bookings, waiting requests ─────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerPreference {
    Any,
    Specific(WorkerId),
}

impl WorkerPreference {
    pub fn accepts(&self, worker: WorkerId) -> bool {
        match self {
            WorkerPreference::Any => true,
            WorkerPreference::Specific(w) => *w == worker,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    /// Provisional reservation backing an outstanding offer.
    Hold,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub worker: WorkerId,
    pub date: NaiveDate,
    pub span: Span,
    pub service: String,
    pub client: Client,
    pub status: BookingStatus,
}

/// An outstanding offer. Only ever present inside `RequestStatus::OfferSent`,
/// so a token cannot outlive the state that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub token: String,
    pub expires_at: NaiveDateTime,
    pub worker: WorkerId,
    pub span: Span,
    pub hold_id: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Waiting,
    OfferSent(Offer),
    Booked { booking_id: Ulid },
    Refused,
    Expired,
}

impl RequestStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RequestStatus::Waiting => "waiting",
            RequestStatus::OfferSent(_) => "offer_sent",
            RequestStatus::Booked { .. } => "booked",
            RequestStatus::Refused => "refused",
            RequestStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Booked { .. } | RequestStatus::Refused | RequestStatus::Expired
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingRequest {
    pub id: Ulid,
    pub client: Client,
    pub date: NaiveDate,
    pub service: String,
    pub worker: WorkerPreference,
    pub created_at: NaiveDateTime,
    pub status: RequestStatus,
}

impl WaitingRequest {
    pub fn is_waiting(&self) -> bool {
        matches!(self.status, RequestStatus::Waiting)
    }

    pub fn offer(&self) -> Option<&Offer> {
        match &self.status {
            RequestStatus::OfferSent(offer) => Some(offer),
            _ => None,
        }
    }
}

/// How an outstanding offer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Booked,
    Refused,
    Expired,
}

impl Resolution {
    pub fn label(&self) -> &'static str {
        match self {
            Resolution::Booked => "booked",
            Resolution::Refused => "refused",
            Resolution::Expired => "expired",
        }
    }
}

/// Why a worker (or the whole business) is not taking bookings on a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClosureReason {
    Holiday,
    WeeklyClosure,
    GlobalLeave,
    WorkerOffDay,
    WorkerLeave,
    /// Opening hours could not be interpreted.
    Misconfigured,
}

impl ClosureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClosureReason::Holiday => "holiday",
            ClosureReason::WeeklyClosure => "weekly_closure",
            ClosureReason::GlobalLeave => "global_leave",
            ClosureReason::WorkerOffDay => "worker_off_day",
            ClosureReason::WorkerLeave => "worker_leave",
            ClosureReason::Misconfigured => "misconfigured",
        }
    }
}

impl std::fmt::Display for ClosureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Per-date state ──────────────────────────────────────────────

/// Everything the engine knows about one calendar date: every worker's
/// bookings plus the waitlist for that date.
#[derive(Debug, Clone)]
pub struct DayBook {
    pub date: NaiveDate,
    /// Per worker, sorted by `span.start`. Never overlapping within a worker.
    pub bookings: BTreeMap<WorkerId, Vec<Booking>>,
    /// In join order.
    pub requests: Vec<WaitingRequest>,
}

impl DayBook {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            bookings: BTreeMap::new(),
            requests: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let list = self.bookings.entry(booking.worker).or_default();
        let pos = list
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        list.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        for list in self.bookings.values_mut() {
            if let Some(pos) = list.iter().position(|b| b.id == id) {
                return Some(list.remove(pos));
            }
        }
        None
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.values().flatten().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.values_mut().flatten().find(|b| b.id == id)
    }

    pub fn worker_bookings(&self, worker: WorkerId) -> &[Booking] {
        self.bookings.get(&worker).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Occupied spans (confirmed and held) for a worker, in start order.
    pub fn occupied(&self, worker: WorkerId) -> Vec<Span> {
        self.worker_bookings(worker).iter().map(|b| b.span).collect()
    }

    /// Bookings of `worker` whose span overlaps the query window.
    /// Relies on per-worker bookings being disjoint, so ends are sorted too.
    pub fn overlapping(&self, worker: WorkerId, query: &Span) -> impl Iterator<Item = &Booking> {
        let list = self.worker_bookings(worker);
        let right_bound = list.partition_point(|b| b.span.start < query.end);
        list[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    pub fn request(&self, id: Ulid) -> Option<&WaitingRequest> {
        self.requests.iter().find(|r| r.id == id)
    }

    pub fn request_mut(&mut self, id: Ulid) -> Option<&mut WaitingRequest> {
        self.requests.iter_mut().find(|r| r.id == id)
    }

    /// WAITING requests, oldest first; ties broken by id.
    pub fn waiting(&self) -> Vec<&WaitingRequest> {
        let mut pool: Vec<&WaitingRequest> =
            self.requests.iter().filter(|r| r.is_waiting()).collect();
        pool.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pool
    }
}

/// The journal record format. Each event carries its date so replay can
/// route it to the right `DayBook`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingConfirmed {
        booking: Booking,
    },
    BookingCancelled {
        id: Ulid,
        worker: WorkerId,
        date: NaiveDate,
    },
    RequestJoined {
        request: WaitingRequest,
    },
    /// Creates the HOLD booking and moves the request to OFFER_SENT in one record.
    OfferIssued {
        request_id: Ulid,
        date: NaiveDate,
        offer: Offer,
    },
    /// Promotes or deletes the HOLD and moves the request to a terminal state.
    OfferResolved {
        request_id: Ulid,
        date: NaiveDate,
        resolution: Resolution,
    },
}

impl Event {
    pub fn date(&self) -> NaiveDate {
        match self {
            Event::BookingConfirmed { booking } => booking.date,
            Event::RequestJoined { request } => request.date,
            Event::BookingCancelled { date, .. }
            | Event::OfferIssued { date, .. }
            | Event::OfferResolved { date, .. } => *date,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotList {
    pub date: NaiveDate,
    pub worker: WorkerId,
    pub service: String,
    pub slots: Vec<Minute>,
    pub closure: Option<ClosureReason>,
}

impl SlotList {
    pub fn labels(&self) -> Vec<String> {
        self.slots.iter().map(|&m| format_hhmm(m)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferSummary {
    pub request_id: Ulid,
    pub date: NaiveDate,
    pub worker: WorkerId,
    pub span: Span,
    pub token: String,
    pub expires_at: NaiveDateTime,
}

/// Result of freeing an interval: the merged gap (if any) and the offers it produced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rematch {
    pub gap: Option<Span>,
    pub offers: Vec<OfferSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SweepReport {
    pub expired: Vec<Ulid>,
    pub offers: Vec<OfferSummary>,
}
