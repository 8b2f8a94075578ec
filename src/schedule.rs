//! Business configuration: opening hours, workers, leave, holidays, services.
//!
//! The JSON this is loaded from has grown several shapes over time (weekday
//! arrays vs. objects keyed by name, `{open, close}` vs. legacy
//! `{is_open, start, end}` days). All of them are normalized here into one
//! strongly typed [`ScheduleConfig`]; the engine never sees the raw shapes.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{parse_hhmm, Minute, WorkerId, MINUTES_PER_DAY};

const SUNDAY_FIRST: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    /// Minutes.
    pub duration: Minute,
}

/// One weekday's hours. `None` times mean the configured value was unreadable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayHours {
    pub is_open: bool,
    pub open: Option<Minute>,
    pub close: Option<Minute>,
    pub break_start: Option<Minute>,
    pub break_end: Option<Minute>,
}

impl DayHours {
    pub fn open(open: Minute, close: Minute) -> Self {
        Self {
            is_open: true,
            open: Some(open),
            close: Some(close),
            break_start: None,
            break_end: None,
        }
    }

    pub fn closed() -> Self {
        Self {
            is_open: false,
            open: None,
            close: None,
            break_start: None,
            break_end: None,
        }
    }

    pub fn with_break(mut self, start: Minute, end: Minute) -> Self {
        self.break_start = Some(start);
        self.break_end = Some(end);
        self
    }
}

/// Hours for each weekday, indexed Monday-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekHours([DayHours; 7]);

impl WeekHours {
    pub fn uniform(day: DayHours) -> Self {
        Self(std::array::from_fn(|_| day.clone()))
    }

    pub fn day(&self, weekday: Weekday) -> &DayHours {
        &self.0[weekday.num_days_from_monday() as usize]
    }

    pub fn set(mut self, weekday: Weekday, day: DayHours) -> Self {
        self.0[weekday.num_days_from_monday() as usize] = day;
        self
    }
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl LeaveRange {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSchedule {
    pub id: WorkerId,
    pub name: Option<String>,
    /// Own weekly hours; business hours apply when absent.
    pub hours: Option<WeekHours>,
    pub days_off: Vec<Weekday>,
    pub leaves: Vec<LeaveRange>,
}

impl WorkerSchedule {
    pub fn new(id: WorkerId) -> Self {
        Self {
            id,
            name: None,
            hours: None,
            days_off: Vec::new(),
            leaves: Vec::new(),
        }
    }

    pub fn is_day_off(&self, date: NaiveDate) -> bool {
        self.days_off.contains(&date.weekday())
    }

    pub fn on_leave(&self, date: NaiveDate) -> bool {
        self.leaves.iter().any(|l| l.covers(date))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub business_hours: WeekHours,
    pub workers: Vec<WorkerSchedule>,
    pub global_leaves: Vec<LeaveRange>,
    pub holidays: BTreeSet<NaiveDate>,
    pub services: Vec<Service>,
}

impl ScheduleConfig {
    pub fn new(business_hours: WeekHours) -> Self {
        Self {
            business_hours,
            workers: Vec::new(),
            global_leaves: Vec::new(),
            holidays: BTreeSet::new(),
            services: Vec::new(),
        }
    }

    pub fn with_worker(mut self, worker: WorkerSchedule) -> Self {
        self.workers.push(worker);
        self.workers.sort_by_key(|w| w.id);
        self
    }

    pub fn with_service(mut self, name: &str, duration: Minute) -> Self {
        self.services.push(Service {
            name: name.to_string(),
            duration,
        });
        self
    }

    pub fn with_holiday(mut self, date: NaiveDate) -> Self {
        self.holidays.insert(date);
        self
    }

    pub fn with_global_leave(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.global_leaves.push(LeaveRange { start, end });
        self
    }

    pub fn worker(&self, id: WorkerId) -> Option<&WorkerSchedule> {
        self.workers.iter().find(|w| w.id == id)
    }

    /// Worker ids in ascending order.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|w| w.id).collect()
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn service_duration(&self, name: &str) -> Option<Minute> {
        self.service(name).map(|s| s.duration)
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }

    pub fn in_global_leave(&self, date: NaiveDate) -> bool {
        self.global_leaves.iter().any(|l| l.covers(date))
    }

    pub fn from_json(json: &str) -> Result<Self, ScheduleError> {
        let raw: RawSchedule = serde_json::from_str(json).map_err(ScheduleError::Json)?;
        raw.normalize()
    }

    pub fn load(path: &Path) -> Result<Self, ScheduleError> {
        let json = std::fs::read_to_string(path).map_err(ScheduleError::Io)?;
        Self::from_json(&json)
    }
}

#[derive(Debug)]
pub enum ScheduleError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Invalid(String),
}

impl std::fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleError::Io(e) => write!(f, "cannot read schedule: {e}"),
            ScheduleError::Json(e) => write!(f, "malformed schedule JSON: {e}"),
            ScheduleError::Invalid(msg) => write!(f, "invalid schedule: {msg}"),
        }
    }
}

impl std::error::Error for ScheduleError {}

// ── Raw JSON shapes ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawSchedule {
    business_hours: RawWeek,
    #[serde(default)]
    workers: Vec<RawWorker>,
    #[serde(default)]
    global_leaves: Vec<LeaveRange>,
    #[serde(default)]
    holidays: Vec<NaiveDate>,
    services: Vec<Service>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawWeek {
    /// Seven entries, Sunday first. `null` marks a closed day.
    List(Vec<Option<RawDay>>),
    /// Keyed by weekday name; missing days are closed.
    Named(HashMap<String, RawDay>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDay {
    // Must stay first: the current shape has only optional fields and would
    // swallow legacy objects otherwise.
    Legacy {
        is_open: bool,
        #[serde(default)]
        start: Option<String>,
        #[serde(default)]
        end: Option<String>,
    },
    Current {
        #[serde(default)]
        open: Option<String>,
        #[serde(default)]
        close: Option<String>,
        #[serde(default)]
        break_start: Option<String>,
        #[serde(default)]
        break_end: Option<String>,
        #[serde(default)]
        closed: bool,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawWeekday {
    /// Sunday = 0.
    Index(u8),
    Name(String),
}

#[derive(Debug, Deserialize)]
struct RawWorker {
    id: WorkerId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    hours: Option<RawWeek>,
    #[serde(default)]
    days_off: Vec<RawWeekday>,
    #[serde(default)]
    leaves: Vec<LeaveRange>,
}

impl RawSchedule {
    fn normalize(self) -> Result<ScheduleConfig, ScheduleError> {
        let business_hours = self.business_hours.normalize()?;

        let mut workers = Vec::with_capacity(self.workers.len());
        for w in self.workers {
            if workers.iter().any(|existing: &WorkerSchedule| existing.id == w.id) {
                return Err(ScheduleError::Invalid(format!("duplicate worker id {}", w.id)));
            }
            let hours = w.hours.map(RawWeek::normalize).transpose()?;
            let days_off = w
                .days_off
                .into_iter()
                .map(RawWeekday::normalize)
                .collect::<Result<Vec<_>, _>>()?;
            workers.push(WorkerSchedule {
                id: w.id,
                name: w.name,
                hours,
                days_off,
                leaves: w.leaves,
            });
        }
        workers.sort_by_key(|w| w.id);

        for (i, s) in self.services.iter().enumerate() {
            if s.duration <= 0 || s.duration > MINUTES_PER_DAY {
                return Err(ScheduleError::Invalid(format!(
                    "service {:?} duration {} is not within a day",
                    s.name, s.duration
                )));
            }
            if self.services[..i].iter().any(|other| other.name == s.name) {
                return Err(ScheduleError::Invalid(format!("duplicate service {:?}", s.name)));
            }
        }

        for leave in self.global_leaves.iter().chain(workers.iter().flat_map(|w| &w.leaves)) {
            if leave.end < leave.start {
                return Err(ScheduleError::Invalid(format!(
                    "leave ends before it starts: {} > {}",
                    leave.start, leave.end
                )));
            }
        }

        Ok(ScheduleConfig {
            business_hours,
            workers,
            global_leaves: self.global_leaves,
            holidays: self.holidays.into_iter().collect(),
            services: self.services,
        })
    }
}

impl RawWeek {
    fn normalize(self) -> Result<WeekHours, ScheduleError> {
        let mut week = WeekHours::uniform(DayHours::closed());
        match self {
            RawWeek::List(days) => {
                if days.len() != 7 {
                    return Err(ScheduleError::Invalid(format!(
                        "weekly hours need 7 entries, got {}",
                        days.len()
                    )));
                }
                for (weekday, day) in SUNDAY_FIRST.into_iter().zip(days) {
                    if let Some(day) = day {
                        week = week.set(weekday, day.normalize(weekday));
                    }
                }
            }
            RawWeek::Named(days) => {
                for (name, day) in days {
                    let weekday: Weekday = name
                        .parse()
                        .map_err(|_| ScheduleError::Invalid(format!("unknown weekday {name:?}")))?;
                    week = week.set(weekday, day.normalize(weekday));
                }
            }
        }
        Ok(week)
    }
}

impl RawDay {
    fn normalize(self, weekday: Weekday) -> DayHours {
        let (is_open, open, close, break_start, break_end) = match self {
            RawDay::Legacy { is_open, start, end } => (is_open, start, end, None, None),
            RawDay::Current {
                open,
                close,
                break_start,
                break_end,
                closed,
            } => (!closed, open, close, break_start, break_end),
        };
        if !is_open {
            return DayHours::closed();
        }
        let time = |field: &str, value: Option<String>| -> Option<Minute> {
            let value = value?;
            let parsed = parse_hhmm(&value);
            if parsed.is_none() {
                warn!("ignoring unreadable {field} {value:?} for {weekday}");
            }
            parsed
        };
        DayHours {
            is_open,
            open: time("open", open),
            close: time("close", close),
            break_start: time("break_start", break_start),
            break_end: time("break_end", break_end),
        }
    }
}

impl RawWeekday {
    fn normalize(self) -> Result<Weekday, ScheduleError> {
        match self {
            RawWeekday::Index(i) => SUNDAY_FIRST
                .get(i as usize)
                .copied()
                .ok_or_else(|| ScheduleError::Invalid(format!("weekday index {i} out of range"))),
            RawWeekday::Name(name) => name
                .parse()
                .map_err(|_| ScheduleError::Invalid(format!("unknown weekday {name:?}"))),
        }
    }
}
