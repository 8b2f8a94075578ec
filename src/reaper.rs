use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::model::{OfferSummary, SweepReport};
use crate::observability::SWEEP_DURATION_SECONDS;

const COMPACT_CHECK_EVERY: Duration = Duration::from_secs(30);
const MIN_TICK: Duration = Duration::from_millis(100);

fn ticker(every: Duration) -> tokio::time::Interval {
    // a zero period panics inside tokio
    let mut interval = tokio::time::interval(every.max(MIN_TICK));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Background task that expires overdue offers and re-offers their slots.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = ticker(every);
    loop {
        interval.tick().await;
        sweep_once(&engine).await;
    }
}

pub async fn sweep_once(engine: &Engine) -> SweepReport {
    let started = Instant::now();
    let report = engine.expire_offers().await;
    metrics::histogram!(SWEEP_DURATION_SECONDS, "task" => "expire")
        .record(started.elapsed().as_secs_f64());
    if !report.expired.is_empty() {
        info!(
            "expired {} offers, issued {} replacements",
            report.expired.len(),
            report.offers.len()
        );
    }
    let today = engine.now().date();
    engine.notify.prune(today);
    engine.retire_past_days(today).await;
    report
}

/// Background task that offers free time to requests still waiting.
pub async fn run_scanner(engine: Arc<Engine>, every: Duration) {
    let mut interval = ticker(every);
    loop {
        interval.tick().await;
        scan_once(&engine).await;
    }
}

pub async fn scan_once(engine: &Engine) -> Vec<OfferSummary> {
    let started = Instant::now();
    let offers = engine.scan_waitlist().await;
    metrics::histogram!(SWEEP_DURATION_SECONDS, "task" => "scan")
        .record(started.elapsed().as_secs_f64());
    if offers.is_empty() {
        debug!("waitlist scan: nothing to offer");
    } else {
        info!("waitlist scan issued {} offers", offers.len());
    }
    offers
}

/// Background task that rewrites the journal once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = ticker(COMPACT_CHECK_EVERY);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted journal after {appends} appends");
            true
        }
        Err(e) => {
            warn!("journal compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::EngineDeps;
    use crate::model::*;
    use crate::schedule::{DayHours, ScheduleConfig, WeekHours, WorkerSchedule};
    use chrono::{NaiveDate, TimeDelta};
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotkeeper_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
    }

    fn client() -> Client {
        Client {
            name: "Ada".into(),
            email: "ada@example.com".into(),
            phone: None,
        }
    }

    fn setup(name: &str) -> (Arc<Engine>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(date().and_hms_opt(7, 0, 0).unwrap()));
        let schedule = ScheduleConfig::new(WeekHours::uniform(DayHours::open(540, 600)))
            .with_worker(WorkerSchedule::new(1))
            .with_service("cut", 30);
        let deps = EngineDeps {
            clock: clock.clone(),
            ..EngineDeps::default()
        };
        let engine = Arc::new(Engine::new(test_wal_path(name), schedule, deps).unwrap());
        (engine, clock)
    }

    #[tokio::test]
    async fn sweep_expires_overdue_offers() {
        let (engine, clock) = setup("sweep.wal");
        let request = engine
            .join_waitlist(date(), "cut", WorkerPreference::Any, client())
            .await
            .unwrap();
        assert_eq!(scan_once(&engine).await.len(), 1);

        assert!(sweep_once(&engine).await.expired.is_empty());
        clock.advance(TimeDelta::minutes(30));
        let report = sweep_once(&engine).await;
        assert_eq!(report.expired, vec![request.id]);
        assert_eq!(
            engine.get_request(request.id).await.unwrap().status,
            RequestStatus::Expired
        );
    }

    #[tokio::test]
    async fn sweep_retires_settled_past_days() {
        let (engine, clock) = setup("retire.wal");
        let booking = engine
            .book(date(), WorkerPreference::Specific(1), 540, "cut", client())
            .await
            .unwrap();
        engine
            .join_waitlist(date(), "cut", WorkerPreference::Any, client())
            .await
            .unwrap();
        assert_eq!(scan_once(&engine).await.len(), 1);

        clock.advance(TimeDelta::days(1));
        sweep_once(&engine).await;
        assert!(engine.existing_day(date()).is_none());
        assert!(engine.get_booking(booking.id).await.is_none());
    }

    #[tokio::test]
    async fn zero_period_ticker_still_ticks() {
        let mut interval = ticker(Duration::ZERO);
        interval.tick().await;
        assert_eq!(interval.period(), MIN_TICK);
    }

    #[tokio::test]
    async fn compaction_waits_for_threshold() {
        let (engine, _clock) = setup("compactor.wal");
        engine
            .book(date(), WorkerPreference::Specific(1), 540, "cut", client())
            .await
            .unwrap();
        assert!(!compact_if_due(&engine, 5).await);
        assert!(compact_if_due(&engine, 1).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }
}
