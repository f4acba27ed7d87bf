//! Recurring triggers for cycle tasks.
//!
//! Accepted expressions:
//!
//! - five fields, `min hour day month weekday`, fired at second zero.
//!   Weekdays count from Sunday = 0 (7 is Sunday too), or use `Sun`..`Sat`
//! - six or seven fields with a leading seconds field (and optional year),
//!   passed to the `cron` crate as is, so weekdays there count from Sunday = 1
//! - the shorthands `@yearly`, `@annually`, `@monthly`, `@weekly`, `@daily`,
//!   `@midnight` and `@hourly`
//! - `@every <duration>` where the duration is a sequence of decimal numbers
//!   with units `ns`, `us`, `µs`, `ms`, `s`, `m` or `h`, e.g. `@every 1h30m`
//!   or `@every 1.5s`
//!
//! Calendar schedules fire in local time.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::error::CronError;

/// Fired on every tick; the entry ends once it resolves to `false`.
pub type CronJob = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

#[derive(Debug, Clone)]
pub enum Schedule {
    Every(Duration),
    Cron(Box<cron::Schedule>),
}

impl Schedule {
    pub fn parse(expr: &str) -> Result<Schedule, CronError> {
        let invalid = |reason: &str| CronError::Invalid {
            expr: expr.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = expr.trim();
        if let Some(interval) = trimmed.strip_prefix("@every") {
            return parse_interval(interval.trim())
                .map(Schedule::Every)
                .ok_or_else(|| invalid("expected '@every <duration>' with a positive duration"));
        }

        let normalised = match trimmed {
            "@yearly" | "@annually" => "0 0 0 1 1 *".to_string(),
            "@monthly" => "0 0 0 1 * *".to_string(),
            "@weekly" => "0 0 0 * * Sun".to_string(),
            "@daily" | "@midnight" => "0 0 0 * * *".to_string(),
            "@hourly" => "0 0 * * * *".to_string(),
            other if other.starts_with('@') => return Err(invalid("unknown shorthand")),
            other => {
                let fields: Vec<&str> = other.split_whitespace().collect();
                match fields.as_slice() {
                    [minute, hour, day, month, weekday] => {
                        let weekday =
                            weekday_field(weekday).ok_or_else(|| invalid("bad weekday field"))?;
                        format!("0 {minute} {hour} {day} {month} {weekday}")
                    }
                    f if f.len() == 6 || f.len() == 7 => other.to_string(),
                    _ => return Err(invalid("expected 5, 6 or 7 fields")),
                }
            }
        };

        cron::Schedule::from_str(&normalised)
            .map(|s| Schedule::Cron(Box::new(s)))
            .map_err(|e| invalid(&e.to_string()))
    }

    /// Time to wait from `now` until the next tick; `None` when the
    /// schedule has no future ticks.
    pub fn next_delay<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<Duration> {
        match self {
            Schedule::Every(interval) => Some(*interval),
            Schedule::Cron(schedule) => {
                let next = schedule.after(now).next()?;
                Some(
                    next.signed_duration_since(now.clone())
                        .to_std()
                        .unwrap_or(Duration::ZERO),
                )
            }
        }
    }
}

impl FromStr for Schedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Schedule::parse(s)
    }
}

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Accepts 0..=7 (both ends Sunday) or a three-letter day name.
fn weekday_number(text: &str) -> Option<u32> {
    if let Ok(n) = text.parse::<u32>() {
        return (n <= 7).then_some(n);
    }
    WEEKDAYS
        .iter()
        .position(|d| d.eq_ignore_ascii_case(text))
        .map(|i| i as u32)
}

/// Rewrites a Sunday = 0 weekday field as an explicit list of day names.
fn weekday_field(field: &str) -> Option<String> {
    if field == "*" || field == "?" {
        return Some(field.to_string());
    }
    let mut days = BTreeSet::new();
    for part in field.split(',') {
        let (base, step) = match part.split_once('/') {
            Some((base, step)) => (base, step.parse::<usize>().ok().filter(|s| *s > 0)?),
            None => (part, 1),
        };
        let (start, end) = match base {
            "*" | "?" => (0, 6),
            _ => match base.split_once('-') {
                Some((from, to)) => (weekday_number(from)?, weekday_number(to)?),
                // `n/step` runs from n to the end of the week
                None if part.contains('/') => (weekday_number(base)?, 6),
                None => {
                    let day = weekday_number(base)?;
                    (day, day)
                }
            },
        };
        if start > end {
            return None;
        }
        days.extend((start..=end).step_by(step).map(|d| d % 7));
    }
    let names: Vec<&str> = days.into_iter().map(|d| WEEKDAYS[d as usize]).collect();
    Some(names.join(","))
}

/// Parses a duration such as `300ms`, `1.5s` or `1h30m`.
fn parse_interval(text: &str) -> Option<Duration> {
    if text.is_empty() {
        return None;
    }
    let mut rest = text;
    let mut nanos = 0f64;
    while !rest.is_empty() {
        let split = rest.find(|c: char| !(c.is_ascii_digit() || c == '.'))?;
        let (amount, tail) = rest.split_at(split);
        if amount.is_empty() || amount == "." {
            return None;
        }
        let amount: f64 = amount.parse().ok()?;
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        nanos += amount * scale;
        rest = tail;
    }
    if !nanos.is_finite() || nanos < 1.0 || nanos > u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(nanos as u64))
}

type Entries = Arc<Mutex<HashMap<u64, JoinHandle<()>>>>;

/// Runs one timer future per entry on the runtime.
#[derive(Debug)]
pub struct CronEngine {
    handle: Handle,
    entries: Entries,
    next_id: AtomicU64,
    stopped: AtomicBool,
}

impl CronEngine {
    pub fn new(handle: Handle) -> Self {
        CronEngine {
            handle,
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
        }
    }

    fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<u64, JoinHandle<()>>> {
        entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Registers `job` to fire on `schedule`. Returns the entry id.
    pub fn add(&self, schedule: Schedule, job: CronJob) -> Result<u64, CronError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(CronError::Stopped);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entries = Arc::clone(&self.entries);

        // held across spawn so the entry is recorded before it can remove itself
        let mut guard = Self::lock(&self.entries);
        let timer = self.handle.spawn(async move {
            loop {
                let Some(delay) = schedule.next_delay(&Local::now()) else {
                    log::info!("cron entry {} has no further ticks", id);
                    break;
                };
                tokio::time::sleep(delay).await;
                if !job().await {
                    log::info!("cron entry {} finished", id);
                    break;
                }
            }
            Self::lock(&entries).remove(&id);
        });
        guard.insert(id, timer);
        log::debug!("add cron entry {}", id);
        Ok(id)
    }

    /// Cancels one entry. Returns whether it was still active.
    pub fn remove(&self, id: u64) -> bool {
        match Self::lock(&self.entries).remove(&id) {
            Some(timer) => {
                timer.abort();
                log::info!("remove cron entry {}", id);
                true
            }
            None => false,
        }
    }

    /// Cancels every entry and rejects later registrations.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let mut entries = Self::lock(&self.entries);
        log::warn!("stop cron engine, cancel {} entries", entries.len());
        for (_, timer) in entries.drain() {
            timer.abort();
        }
    }

    /// Active entries.
    pub fn len(&self) -> usize {
        Self::lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike, Utc, Weekday};
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_parse_accepted_forms() {
        assert!(matches!(
            Schedule::parse("@every 250ms").unwrap(),
            Schedule::Every(d) if d == Duration::from_millis(250)
        ));
        assert!(matches!(
            Schedule::parse("@every 2m").unwrap(),
            Schedule::Every(d) if d == Duration::from_secs(120)
        ));
        assert!(matches!(
            Schedule::parse("@every 1h30m").unwrap(),
            Schedule::Every(d) if d == Duration::from_secs(5400)
        ));
        assert!(matches!(
            Schedule::parse("@every 1.5s").unwrap(),
            Schedule::Every(d) if d == Duration::from_millis(1500)
        ));
        assert!(matches!(
            Schedule::parse("@every 500us").unwrap(),
            Schedule::Every(d) if d == Duration::from_micros(500)
        ));
        assert!(matches!(Schedule::parse("*/5 * * * *").unwrap(), Schedule::Cron(_)));
        assert!(matches!(Schedule::parse("*/10 * * * * *").unwrap(), Schedule::Cron(_)));
        assert!(matches!(Schedule::parse("@hourly").unwrap(), Schedule::Cron(_)));
    }

    #[test]
    fn test_parse_rejects_bad_expressions() {
        for expr in [
            "",
            "* *",
            "@every",
            "@every 0s",
            "@every 5d",
            "@every 1h30",
            "@every .s",
            "@often",
            "a b c d e",
            "0 0 * * 8",
            "0 0 * * 5-1",
        ] {
            assert!(
                matches!(Schedule::parse(expr), Err(CronError::Invalid { .. })),
                "{expr} should be rejected"
            );
        }
    }

    #[test]
    fn test_five_field_fires_on_minute_boundary() {
        let schedule = Schedule::parse("* * * * *").unwrap();
        let delay = schedule.next_delay(&Local::now()).unwrap();
        assert!(delay <= Duration::from_secs(60));
    }

    fn next_fire(expr: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = Schedule::parse(expr).unwrap().next_delay(&now).unwrap();
        now + chrono::Duration::from_std(delay).unwrap()
    }

    #[test]
    fn test_five_field_weekdays_count_from_sunday_zero() {
        // a Friday
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();

        let monday = next_fire("0 9 * * 1", now);
        assert_eq!(monday.weekday(), Weekday::Mon);
        assert_eq!((monday.hour(), monday.minute()), (9, 0));

        assert_eq!(next_fire("0 0 * * 0", now).weekday(), Weekday::Sun);
        assert_eq!(next_fire("0 0 * * 7", now).weekday(), Weekday::Sun);
        assert_eq!(next_fire("0 0 * * sat", now).weekday(), Weekday::Sat);
        assert_eq!(next_fire("0 0 * * 1-5", now).weekday(), Weekday::Mon);
        assert_eq!(next_fire("0 0 * * 0,3", now).weekday(), Weekday::Sun);
        assert_eq!(next_fire("0 0 * * */2", now).weekday(), Weekday::Sat);
    }

    #[test]
    fn test_weekday_field_rewrites_to_names() {
        assert_eq!(weekday_field("1-5").unwrap(), "Mon,Tue,Wed,Thu,Fri");
        assert_eq!(weekday_field("0,7").unwrap(), "Sun");
        assert_eq!(weekday_field("*/3").unwrap(), "Sun,Wed,Sat");
        assert_eq!(weekday_field("Fri-Sat").unwrap(), "Fri,Sat");
        assert_eq!(weekday_field("*").unwrap(), "*");
        assert!(weekday_field("1/0").is_none());
    }

    fn counting_job(calls: Arc<AtomicUsize>, limit: usize) -> CronJob {
        Arc::new(move || {
            let calls = Arc::clone(&calls);
            async move { calls.fetch_add(1, Ordering::SeqCst) + 1 < limit }.boxed()
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_entry_ends_when_job_returns_false() {
        let engine = CronEngine::new(Handle::current());
        let calls = Arc::new(AtomicUsize::new(0));
        engine
            .add(
                Schedule::Every(Duration::from_millis(10)),
                counting_job(Arc::clone(&calls), 3),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(engine.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_cancels_entries() {
        let engine = CronEngine::new(Handle::current());
        let calls = Arc::new(AtomicUsize::new(0));
        let id = engine
            .add(
                Schedule::Every(Duration::from_millis(10)),
                counting_job(Arc::clone(&calls), usize::MAX),
            )
            .unwrap();
        assert_eq!(engine.len(), 1);

        engine.stop();
        assert!(!engine.remove(id));
        let seen = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(calls.load(Ordering::SeqCst) <= seen + 1);
        assert!(matches!(
            engine.add(
                Schedule::Every(Duration::from_millis(10)),
                counting_job(calls, 1)
            ),
            Err(CronError::Stopped)
        ));
    }
}
