use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use tracing::warn;

use crate::limits::DEFAULT_OFFER_TTL_MINUTES;

/// Process settings, read from `SLOTKEEPER_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub schedule_path: PathBuf,
    pub offer_ttl: TimeDelta,
    pub sweep_every: Duration,
    pub scan_every: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = PathBuf::from(lookup("SLOTKEEPER_DATA_DIR").unwrap_or_else(|| "./data".into()));
        let schedule_path = lookup("SLOTKEEPER_SCHEDULE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("schedule.json"));
        Self {
            schedule_path,
            offer_ttl: TimeDelta::minutes(parsed(
                &lookup,
                "SLOTKEEPER_OFFER_TTL_MINUTES",
                DEFAULT_OFFER_TTL_MINUTES,
            )),
            sweep_every: Duration::from_secs(parsed(&lookup, "SLOTKEEPER_SWEEP_SECS", 30)),
            scan_every: Duration::from_secs(parsed(&lookup, "SLOTKEEPER_SCAN_SECS", 300)),
            compact_threshold: parsed(&lookup, "SLOTKEEPER_COMPACT_THRESHOLD", 1000),
            metrics_port: lookup("SLOTKEEPER_METRICS_PORT").and_then(|s| s.parse().ok()),
            data_dir,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotkeeper.wal")
    }
}

/// Every tunable is a positive count of seconds, minutes or appends. Zero,
/// negative and unparseable values fall back to `default`.
fn parsed<T: FromStr + PartialOrd + Default>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => value,
        Ok(_) => {
            warn!("ignoring {key}={raw:?}: must be greater than zero");
            default
        }
        Err(_) => {
            warn!("ignoring unparseable {key}={raw:?}");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]);
        assert_eq!(c.data_dir, PathBuf::from("./data"));
        assert_eq!(c.schedule_path, PathBuf::from("./data/schedule.json"));
        assert_eq!(c.wal_path(), PathBuf::from("./data/slotkeeper.wal"));
        assert_eq!(c.offer_ttl, TimeDelta::minutes(20));
        assert_eq!(c.sweep_every, Duration::from_secs(30));
        assert_eq!(c.scan_every, Duration::from_secs(300));
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.metrics_port, None);
    }

    #[test]
    fn overrides_and_bad_values() {
        let c = config(&[
            ("SLOTKEEPER_DATA_DIR", "/var/lib/slotkeeper"),
            ("SLOTKEEPER_SCHEDULE", "/etc/slotkeeper/hours.json"),
            ("SLOTKEEPER_OFFER_TTL_MINUTES", "45"),
            ("SLOTKEEPER_SWEEP_SECS", "soon"),
            ("SLOTKEEPER_METRICS_PORT", "9100"),
        ]);
        assert_eq!(c.schedule_path, PathBuf::from("/etc/slotkeeper/hours.json"));
        assert_eq!(c.wal_path(), PathBuf::from("/var/lib/slotkeeper/slotkeeper.wal"));
        assert_eq!(c.offer_ttl, TimeDelta::minutes(45));
        assert_eq!(c.sweep_every, Duration::from_secs(30));
        assert_eq!(c.metrics_port, Some(9100));

        let c = config(&[
            ("SLOTKEEPER_SWEEP_SECS", "0"),
            ("SLOTKEEPER_SCAN_SECS", "0"),
            ("SLOTKEEPER_OFFER_TTL_MINUTES", "-5"),
            ("SLOTKEEPER_COMPACT_THRESHOLD", "0"),
        ]);
        assert_eq!(c.sweep_every, Duration::from_secs(30));
        assert_eq!(c.scan_every, Duration::from_secs(300));
        assert_eq!(c.offer_ttl, TimeDelta::minutes(20));
        assert_eq!(c.compact_threshold, 1000);

        let c = config(&[("SLOTKEEPER_OFFER_TTL_MINUTES", "0")]);
        assert_eq!(c.offer_ttl, TimeDelta::minutes(20));
    }

    #[tokio::test]
    async fn configured_intervals_can_drive_a_ticker() {
        let c = config(&[("SLOTKEEPER_SWEEP_SECS", "0"), ("SLOTKEEPER_SCAN_SECS", "0")]);
        for every in [c.sweep_every, c.scan_every] {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
        }
    }
}
