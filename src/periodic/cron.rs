use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use indexmap::IndexSet;
use log::debug;

use crate::api::Periodic;
use crate::error::{OperatorError, Result};

const EVERY_PREFIX: &str = "@every ";

#[derive(Debug, Clone)]
enum Timing {
    Cron(Box<Schedule>),
    Every(chrono::Duration),
}

impl Timing {
    fn parse(expr: &str) -> Result<Self> {
        let invalid = |reason: String| OperatorError::InvalidCron {
            expr: expr.to_string(),
            reason,
        };

        if let Some(raw) = expr.strip_prefix(EVERY_PREFIX) {
            let every = parse_duration(raw.trim()).ok_or_else(|| invalid("bad duration".to_string()))?;
            if every <= chrono::Duration::zero() {
                return Err(invalid("duration must be positive".to_string()));
            }
            return Ok(Timing::Every(every));
        }

        // The cron crate wants a seconds field
        let normalized = match expr.split_whitespace().count() {
            5 => format!("0 {expr}"),
            _ => expr.to_string(),
        };
        Schedule::from_str(&normalized)
            .map(|s| Timing::Cron(Box::new(s)))
            .map_err(|e| invalid(e.to_string()))
    }

    fn next_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Timing::Cron(schedule) => schedule.after(&t).next(),
            Timing::Every(every) => Some(t + *every),
        }
    }
}

/// `30s`, `5m`, `2h`
fn parse_duration(raw: &str) -> Option<chrono::Duration> {
    let split = raw.find(|c: char| !c.is_ascii_digit())?;
    let (value, unit) = raw.split_at(split);
    let value: i64 = value.parse().ok()?;
    match unit {
        "s" => Some(chrono::Duration::seconds(value)),
        "m" => Some(chrono::Duration::minutes(value)),
        "h" => Some(chrono::Duration::hours(value)),
        _ => None,
    }
}

#[derive(Debug)]
struct Entry {
    expr: String,
    timing: Timing,
    next: Option<DateTime<Utc>>,
}

/// Cron entries of one config's periodic jobs, keyed by job name.
#[derive(Debug, Default)]
pub struct CronRegistry {
    entries: HashMap<String, Entry>,
    fired: IndexSet<String>,
}

impl CronRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds new periodic jobs, reschedules changed expressions and drops jobs
    /// that are no longer declared.
    ///
    /// # Errors
    ///
    /// Returns the first invalid cron expression. Valid entries are still
    /// applied.
    pub fn sync(&mut self, periodics: &[Periodic], now: DateTime<Utc>) -> Result<()> {
        self.entries
            .retain(|name, _| periodics.iter().any(|p| &p.job.name == name));
        self.fired
            .retain(|name| periodics.iter().any(|p| &p.job.name == name));

        let mut first_err = None;
        for periodic in periodics {
            let name = &periodic.job.name;
            if self
                .entries
                .get(name)
                .is_some_and(|e| e.expr == periodic.cron)
            {
                continue;
            }

            match Timing::parse(&periodic.cron) {
                Ok(timing) => {
                    debug!("Scheduling periodic job {} with '{}'", name, periodic.cron);
                    let next = timing.next_after(now);
                    self.entries.insert(
                        name.clone(),
                        Entry {
                            expr: periodic.cron.clone(),
                            timing,
                            next,
                        },
                    );
                }
                Err(e) => {
                    self.entries.remove(name);
                    first_err.get_or_insert(e);
                }
            }
        }

        first_err.map_or(Ok(()), Err)
    }

    /// Drains the names of jobs whose schedule fired at or before `now`.
    /// A job that fired several times since the last drain is reported once.
    pub fn queued_jobs(&mut self, now: DateTime<Utc>) -> Vec<String> {
        for (name, entry) in self.entries.iter_mut() {
            if entry.next.is_some_and(|next| next <= now) {
                self.fired.insert(name.clone());
                entry.next = entry.timing.next_after(now);
            }
        }
        self.fired.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
