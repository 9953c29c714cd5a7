//! Cron-driven creation of periodic jobs.

pub mod cron;
pub mod trigger;

pub use self::cron::CronRegistry;
pub use trigger::{PeriodicTrigger, TriggerRegistry};
