//! Cron job scheduling.
//!
//! Parses `SECOND? MINUTE HOUR DOM MONTH DOW` expressions (five fields imply
//! second 0) plus the `@hourly`-style descriptors and `@every <duration>`.
//! A single tick task drives all entries; due jobs fire on spawned tasks so
//! a slow job never blocks the wheel.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::warn;

use crate::config::parse_duration;

/// Errors from parsing a cron spec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronParseError {
    #[error("expected 5 or 6 fields, got {0}")]
    WrongFieldCount(usize),
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
    #[error("unknown descriptor '{0}'")]
    UnknownDescriptor(String),
    #[error("invalid @every duration: {0}")]
    BadEvery(String),
}

/// A parsed cron expression; each field is the set of matching values.
#[derive(Debug, Clone)]
pub struct CronExpr {
    seconds: BTreeSet<u32>,
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    days_of_month: BTreeSet<u32>,
    months: BTreeSet<u32>,
    days_of_week: BTreeSet<u32>,
}

impl CronExpr {
    /// Parse a 5- or 6-field cron expression. With five fields the seconds
    /// field defaults to `0`.
    ///
    /// Fields support `*`, numbers, ranges (`1-5`), lists (`1,3,5`) and
    /// steps (`*/5`, `1-10/2`). Day-of-week 7 is an alias for Sunday.
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let fields: Vec<&str> = match fields.len() {
            5 => {
                let mut with_seconds = vec!["0"];
                with_seconds.extend(fields);
                with_seconds
            }
            6 => fields,
            n => return Err(CronParseError::WrongFieldCount(n)),
        };

        Ok(Self {
            seconds: Self::parse_field(fields[0], 0, 59, "second")?,
            minutes: Self::parse_field(fields[1], 0, 59, "minute")?,
            hours: Self::parse_field(fields[2], 0, 23, "hour")?,
            days_of_month: Self::parse_field(fields[3], 1, 31, "day-of-month")?,
            months: Self::parse_field(fields[4], 1, 12, "month")?,
            days_of_week: Self::parse_dow_field(fields[5])?,
        })
    }

    fn parse_field(
        field: &str,
        min: u32,
        max: u32,
        name: &str,
    ) -> Result<BTreeSet<u32>, CronParseError> {
        let mut result = BTreeSet::new();
        for part in field.split(',') {
            result.extend(Self::parse_field_part(part, min, max, name)?);
        }
        if result.is_empty() {
            return Err(CronParseError::InvalidField {
                field: field.to_string(),
                reason: format!("{name} field produced no valid values"),
            });
        }
        Ok(result)
    }

    /// Parse one comma-separated item: `*`, `*/step`, `N`, `N-M`, `N-M/step`.
    fn parse_field_part(
        part: &str,
        min: u32,
        max: u32,
        name: &str,
    ) -> Result<BTreeSet<u32>, CronParseError> {
        let make_err = |reason: String| CronParseError::InvalidField {
            field: part.to_string(),
            reason,
        };

        let (range_part, step) = if let Some((r, s)) = part.split_once('/') {
            let step: u32 = s
                .parse()
                .map_err(|_| make_err(format!("invalid step '{s}' in {name}")))?;
            if step == 0 {
                return Err(make_err(format!("step cannot be 0 in {name}")));
            }
            (r, Some(step))
        } else {
            (part, None)
        };

        let (range_min, range_max) = if range_part == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range_part.split_once('-') {
            let lo: u32 = lo
                .parse()
                .map_err(|_| make_err(format!("invalid range start '{lo}' in {name}")))?;
            let hi: u32 = hi
                .parse()
                .map_err(|_| make_err(format!("invalid range end '{hi}' in {name}")))?;
            if lo < min || hi > max {
                return Err(make_err(format!(
                    "range {lo}-{hi} out of bounds ({min}-{max}) for {name}"
                )));
            }
            if lo > hi {
                return Err(make_err(format!("range start {lo} > end {hi} in {name}")));
            }
            (lo, hi)
        } else {
            let val: u32 = range_part
                .parse()
                .map_err(|_| make_err(format!("invalid value '{range_part}' in {name}")))?;
            if val < min || val > max {
                return Err(make_err(format!(
                    "value {val} out of bounds ({min}-{max}) for {name}"
                )));
            }
            // a single value with a step extends up to max
            (val, if step.is_some() { max } else { val })
        };

        let step = step.unwrap_or(1);
        let mut set = BTreeSet::new();
        let mut v = range_min;
        while v <= range_max {
            set.insert(v);
            v += step;
        }
        Ok(set)
    }

    /// Day-of-week with 7 normalized to Sunday (0).
    fn parse_dow_field(field: &str) -> Result<BTreeSet<u32>, CronParseError> {
        let mut result = BTreeSet::new();
        for part in field.split(',') {
            result.extend(Self::parse_field_part(part, 0, 7, "day-of-week")?);
        }
        if result.remove(&7) {
            result.insert(0);
        }
        if result.is_empty() {
            return Err(CronParseError::InvalidField {
                field: field.to_string(),
                reason: "day-of-week field produced no valid values".to_string(),
            });
        }
        Ok(result)
    }

    fn minute_matches(&self, t: &DateTime<Utc>) -> bool {
        self.minutes.contains(&t.minute())
            && self.hours.contains(&t.hour())
            && self.days_of_month.contains(&t.day())
            && self.months.contains(&t.month())
            && self
                .days_of_week
                .contains(&t.weekday().num_days_from_sunday())
    }

    /// The next instant strictly after `after` that matches this expression.
    ///
    /// Searches up to ~4 years of minutes; returns `None` when nothing
    /// matches (e.g. Feb 31).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let t = after.with_nanosecond(0)? + ChronoDuration::seconds(1);

        // remaining seconds inside the current minute
        if self.minute_matches(&t) {
            if let Some(&s) = self.seconds.range(t.second()..).next() {
                return t.with_second(s);
            }
        }

        // then whole minutes
        let first_second = *self.seconds.iter().next()?;
        let mut m = (t + ChronoDuration::seconds(60 - t.second() as i64)).with_second(0)?;

        let max_iterations = 2_100_000u32;
        for _ in 0..max_iterations {
            if self.minute_matches(&m) {
                return m.with_second(first_second);
            }
            m += ChronoDuration::minutes(1);
        }
        None
    }
}

/// A schedule: either a cron expression or a fixed interval.
#[derive(Debug, Clone)]
pub enum Schedule {
    Cron(CronExpr),
    Every(std::time::Duration),
}

impl Schedule {
    /// Parse a spec: a cron expression, a descriptor (`@hourly`, `@daily`,
    /// `@midnight`, `@weekly`, `@monthly`, `@yearly`, `@annually`) or
    /// `@every <duration>`.
    pub fn parse(spec: &str) -> Result<Self, CronParseError> {
        let spec = spec.trim();

        if let Some(rest) = spec.strip_prefix("@every ") {
            let dur = parse_duration(rest).map_err(CronParseError::BadEvery)?;
            if dur.is_zero() {
                return Err(CronParseError::BadEvery("zero interval".to_string()));
            }
            return Ok(Self::Every(dur));
        }

        if let Some(descriptor) = spec.strip_prefix('@') {
            let expr = match descriptor {
                "hourly" => "0 0 * * * *",
                "daily" | "midnight" => "0 0 0 * * *",
                "weekly" => "0 0 0 * * 0",
                "monthly" => "0 0 0 1 * *",
                "yearly" | "annually" => "0 0 0 1 1 *",
                other => return Err(CronParseError::UnknownDescriptor(other.to_string())),
            };
            return Ok(Self::Cron(CronExpr::parse(expr)?));
        }

        Ok(Self::Cron(CronExpr::parse(spec)?))
    }

    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(expr) => expr.next_after(after),
            Self::Every(dur) => {
                after.checked_add_signed(ChronoDuration::from_std(*dur).ok()?)
            }
        }
    }
}

pub type EntryId = u64;

struct Entry {
    schedule: Schedule,
    job: Arc<dyn Fn() + Send + Sync>,
    next: DateTime<Utc>,
}

/// The scheduler. Entries registered with [`Cron::add_fn`] fire until
/// removed or until [`Cron::close`].
pub struct Cron {
    entries: Arc<Mutex<HashMap<EntryId, Entry>>>,
    next_id: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl Cron {
    /// Create the scheduler and start its tick task. Must run inside a tokio
    /// runtime.
    pub fn new() -> Self {
        let entries: Arc<Mutex<HashMap<EntryId, Entry>>> = Arc::new(Mutex::new(HashMap::new()));
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let tick_entries = entries.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(500));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                if *shutdown_rx.borrow() {
                    break;
                }

                let now = Utc::now();
                let due: Vec<Arc<dyn Fn() + Send + Sync>> = {
                    let mut entries = tick_entries.lock();
                    let mut fired = Vec::new();
                    for entry in entries.values_mut() {
                        if entry.next <= now {
                            fired.push(entry.job.clone());
                            match entry.schedule.next_after(now) {
                                Some(next) => entry.next = next,
                                // no future fire time; park the entry
                                None => entry.next = DateTime::<Utc>::MAX_UTC,
                            }
                        }
                    }
                    fired
                };

                for job in due {
                    tokio::spawn(async move { job() });
                }
            }
        });

        Self {
            entries,
            next_id: AtomicU64::new(1),
            shutdown,
        }
    }

    /// Register a job. Fails when the spec does not parse or never fires.
    pub fn add_fn(
        &self,
        spec: &str,
        job: impl Fn() + Send + Sync + 'static,
    ) -> Result<EntryId, CronParseError> {
        let schedule = Schedule::parse(spec)?;
        let next = schedule
            .next_after(Utc::now())
            .ok_or_else(|| CronParseError::InvalidField {
                field: spec.to_string(),
                reason: "schedule never fires".to_string(),
            })?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().insert(
            id,
            Entry {
                schedule,
                job: Arc::new(job),
                next,
            },
        );
        Ok(id)
    }

    pub fn remove(&self, id: EntryId) {
        self.entries.lock().remove(&id);
    }

    /// Stop the tick task. Idempotent; already-fired jobs keep running.
    pub fn close(&self) {
        if self.shutdown.send(true).is_err() {
            warn!("cron: tick task already gone");
        }
    }
}

impl Drop for Cron {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn five_fields_imply_second_zero() {
        let expr = CronExpr::parse("*/5 * * * *").unwrap();
        let next = expr.next_after(at(2024, 3, 1, 10, 2, 30)).unwrap();
        assert_eq!(next, at(2024, 3, 1, 10, 5, 0));
    }

    #[test]
    fn six_fields_use_seconds() {
        let expr = CronExpr::parse("*/10 * * * * *").unwrap();
        let next = expr.next_after(at(2024, 3, 1, 10, 2, 3)).unwrap();
        assert_eq!(next, at(2024, 3, 1, 10, 2, 10));

        // wraps into the next minute
        let next = expr.next_after(at(2024, 3, 1, 10, 2, 55)).unwrap();
        assert_eq!(next, at(2024, 3, 1, 10, 3, 0));
    }

    #[test]
    fn ranges_lists_steps() {
        let expr = CronExpr::parse("0 1-3,10 * * *").unwrap();
        assert_eq!(
            expr.next_after(at(2024, 3, 1, 1, 0, 0)).unwrap(),
            at(2024, 3, 1, 2, 0, 0)
        );
        assert_eq!(
            expr.next_after(at(2024, 3, 1, 3, 30, 0)).unwrap(),
            at(2024, 3, 1, 10, 0, 0)
        );
    }

    #[test]
    fn dow_seven_is_sunday() {
        let expr = CronExpr::parse("0 0 * * 7").unwrap();
        // 2024-03-01 is a Friday; next Sunday is the 3rd
        let next = expr.next_after(at(2024, 3, 1, 1, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 3, 3, 0, 0, 0));
    }

    #[test]
    fn descriptors() {
        let next = Schedule::parse("@hourly")
            .unwrap()
            .next_after(at(2024, 3, 1, 10, 2, 30))
            .unwrap();
        assert_eq!(next, at(2024, 3, 1, 11, 0, 0));

        let next = Schedule::parse("@daily")
            .unwrap()
            .next_after(at(2024, 3, 1, 10, 2, 30))
            .unwrap();
        assert_eq!(next, at(2024, 3, 2, 0, 0, 0));

        assert!(Schedule::parse("@fortnightly").is_err());
    }

    #[test]
    fn every_interval() {
        let next = Schedule::parse("@every 30s")
            .unwrap()
            .next_after(at(2024, 3, 1, 10, 0, 0))
            .unwrap();
        assert_eq!(next, at(2024, 3, 1, 10, 0, 30));

        assert!(Schedule::parse("@every nonsense").is_err());
        assert!(Schedule::parse("@every 0s").is_err());
    }

    #[test]
    fn rejects_malformed() {
        assert!(CronExpr::parse("* * *").is_err());
        assert!(CronExpr::parse("61 * * * *").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
        assert!(CronExpr::parse("5-2 * * * *").is_err());
        assert!(CronExpr::parse("a * * * *").is_err());
    }

    #[tokio::test]
    async fn fires_registered_job() {
        let cron = Cron::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        cron.add_fn("@every 1s", move || {
            let _ = tx.send(());
        })
        .unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("job should fire within the timeout")
            .expect("sender alive");

        cron.close();
    }

    #[tokio::test]
    async fn removed_job_stops_firing() {
        let cron = Cron::new();
        let id = cron.add_fn("@every 1s", || {}).unwrap();
        cron.remove(id);
        assert!(cron.entries.lock().is_empty());
        cron.close();
    }

    #[tokio::test]
    async fn bad_spec_rejected_at_registration() {
        let cron = Cron::new();
        assert!(cron.add_fn("not a spec", || {}).is_err());
        cron.close();
    }
}
