//! Cron-style rotation schedule
//!
//! Thin wrapper over the `cron` crate pinned to local time, exposing just
//! what the periodic rotation loop needs: parse once at startup, then ask
//! how long to sleep until the next fire.

use std::str::FromStr;
use std::time::Duration;

use chrono::Local;
use cron::Schedule as CronSchedule;

use crate::error::{CarrierError, Result};

pub struct Schedule(CronSchedule);

impl Schedule {
    /// Parses a cron expression; failures are config-invalid at startup
    pub fn parse(expr: &str) -> Result<Self> {
        CronSchedule::from_str(expr)
            .map(Self)
            .map_err(|e| CarrierError::ConfigValidation {
                field: "Logrotate.Schedule",
                reason: format!("cannot parse `{}`: {}", expr, e),
            })
    }

    /// Time to sleep until the schedule next fires
    ///
    /// `None` when the schedule has no upcoming occurrence.
    pub fn until_next(&self) -> Option<Duration> {
        let next = self.0.upcoming(Local).next()?;
        let now = Local::now();
        Some((next - now).to_std().unwrap_or(Duration::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_every_minute() {
        let s = Schedule::parse("0 * * * * *").unwrap();
        let delay = s.until_next().unwrap();
        assert!(delay <= Duration::from_secs(60));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Schedule::parse("definitely not cron").is_err());
        assert!(Schedule::parse("").is_err());
    }
}
