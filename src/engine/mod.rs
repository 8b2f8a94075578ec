mod availability;
mod conflict;
mod error;
mod gaps;
mod matcher;
mod mutations;
mod queries;
mod slots;

pub use availability::{merge_overlapping, resolve, subtract_intervals, DayAvailability, EffectiveHours};
pub use error::EngineError;
pub use gaps::{clip_from, day_gaps, merged_gap};
pub use matcher::{plan_offers, PlannedOffer};
pub use slots::offerable_starts;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, TimeDelta};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock, RwLockReadGuard};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::limits::DEFAULT_OFFER_TTL_MINUTES;
use crate::messenger::{LogNotifier, Notifier};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::schedule::ScheduleConfig;
use crate::wal::Wal;

pub type SharedDayBook = Arc<RwLock<DayBook>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match append_err.or(flush_err) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn respond_batch(batch: &mut Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

// ── Engine ───────────────────────────────────────────────

/// Collaborators the engine talks to. `Default` wires the production ones.
pub struct EngineDeps {
    pub notify: Arc<NotifyHub>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub offer_ttl: TimeDelta,
}

impl Default for EngineDeps {
    fn default() -> Self {
        Self {
            notify: Arc::new(NotifyHub::new()),
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
            offer_ttl: TimeDelta::minutes(DEFAULT_OFFER_TTL_MINUTES),
        }
    }
}

/// Reverse lookups from ids and tokens to the date that owns them.
#[derive(Default)]
pub(super) struct EntityIndex {
    pub bookings: DashMap<Ulid, NaiveDate>,
    pub requests: DashMap<Ulid, NaiveDate>,
    /// Live offer tokens only.
    pub tokens: DashMap<String, (NaiveDate, Ulid)>,
}

pub struct Engine {
    pub days: DashMap<NaiveDate, SharedDayBook>,
    schedule: std::sync::RwLock<Arc<ScheduleConfig>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) notifier: Arc<dyn Notifier>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) offer_ttl: TimeDelta,
    pub(super) index: EntityIndex,
    /// Shared by every mutation for its whole run, exclusive during compaction,
    /// so a compaction snapshot never misses an event already in the old journal.
    pub(super) write_gate: RwLock<()>,
}

/// Apply an event directly to a DayBook. The caller holds the lock.
fn apply_to_day(day: &mut DayBook, event: &Event, index: &EntityIndex) {
    match event {
        Event::BookingConfirmed { booking } => {
            index.bookings.insert(booking.id, booking.date);
            day.insert_booking(booking.clone());
        }
        Event::BookingCancelled { id, .. } => {
            day.remove_booking(*id);
            index.bookings.remove(id);
        }
        Event::RequestJoined { request } => {
            index.requests.insert(request.id, request.date);
            day.requests.push(request.clone());
        }
        Event::OfferIssued {
            request_id,
            date,
            offer,
        } => {
            let Some(request) = day.request_mut(*request_id) else {
                return;
            };
            let hold = Booking {
                id: offer.hold_id,
                worker: offer.worker,
                date: *date,
                span: offer.span,
                service: request.service.clone(),
                client: request.client.clone(),
                status: BookingStatus::Hold,
            };
            request.status = RequestStatus::OfferSent(offer.clone());
            day.insert_booking(hold);
            index.bookings.insert(offer.hold_id, *date);
            index.tokens.insert(offer.token.clone(), (*date, *request_id));
        }
        Event::OfferResolved {
            request_id,
            resolution,
            ..
        } => {
            let Some(request) = day.request_mut(*request_id) else {
                return;
            };
            let Some(offer) = request.offer().cloned() else {
                return;
            };
            request.status = match resolution {
                Resolution::Booked => RequestStatus::Booked {
                    booking_id: offer.hold_id,
                },
                Resolution::Refused => RequestStatus::Refused,
                Resolution::Expired => RequestStatus::Expired,
            };
            index.tokens.remove(&offer.token);
            match resolution {
                Resolution::Booked => {
                    if let Some(hold) = day.booking_mut(offer.hold_id) {
                        hold.status = BookingStatus::Confirmed;
                    }
                }
                Resolution::Refused | Resolution::Expired => {
                    day.remove_booking(offer.hold_id);
                    index.bookings.remove(&offer.hold_id);
                }
            }
        }
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, schedule: ScheduleConfig, deps: EngineDeps) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            days: DashMap::new(),
            schedule: std::sync::RwLock::new(Arc::new(schedule)),
            wal_tx,
            notify: deps.notify,
            notifier: deps.notifier,
            clock: deps.clock,
            offer_ttl: deps.offer_ttl,
            index: EntityIndex::default(),
            write_gate: RwLock::new(()),
        };

        // Sole owner of these Arcs, so try_write always succeeds. Never use
        // blocking_write here: this runs inside an async context.
        for event in &events {
            let day = engine.day(event.date());
            let mut guard = day.try_write().expect("replay: uncontended write");
            apply_to_day(&mut guard, event, &engine.index);
        }
        if !events.is_empty() {
            tracing::info!("replayed {} journal events over {} dates", events.len(), engine.days.len());
        }

        Ok(engine)
    }

    pub fn schedule(&self) -> Arc<ScheduleConfig> {
        self.schedule
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Swap in a new schedule. Existing bookings are kept as they are.
    pub fn set_schedule(&self, schedule: ScheduleConfig) {
        *self.schedule.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(schedule);
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// The book for `date`, created empty if nothing has happened on it yet.
    pub fn day(&self, date: NaiveDate) -> SharedDayBook {
        self.days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DayBook::new(date))))
            .clone()
    }

    pub fn existing_day(&self, date: NaiveDate) -> Option<SharedDayBook> {
        self.days.get(&date).map(|e| e.value().clone())
    }

    pub(super) async fn mutation_permit(&self) -> RwLockReadGuard<'_, ()> {
        self.write_gate.read().await
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(&self, day: &mut DayBook, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_day(day, event, &self.index);
        self.notify.send(day.date, event);
        Ok(())
    }

    /// Lookup booking → date, get the day, acquire its write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<DayBook>, EngineError> {
        let date = self
            .index
            .bookings
            .get(id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(*id))?;
        let day = self.existing_day(date).ok_or(EngineError::NotFound(*id))?;
        Ok(day.write_owned().await)
    }

    /// Lookup token → (date, request), acquire the day's write lock and
    /// re-validate the offer under it.
    pub(super) async fn resolve_offer_write(
        &self,
        token: &str,
    ) -> Result<(Ulid, Offer, tokio::sync::OwnedRwLockWriteGuard<DayBook>), EngineError> {
        let (date, request_id) = self
            .index
            .tokens
            .get(token)
            .map(|e| *e.value())
            .ok_or(EngineError::TokenInvalid)?;
        let day = self.existing_day(date).ok_or(EngineError::TokenInvalid)?;
        let guard = day.write_owned().await;
        let offer = guard
            .request(request_id)
            .and_then(WaitingRequest::offer)
            .filter(|o| o.token == token)
            .cloned()
            .ok_or(EngineError::TokenInvalid)?;
        Ok((request_id, offer, guard))
    }
}
