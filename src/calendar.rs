use chrono::{DateTime, Duration, FixedOffset, Months, NaiveDate, Utc};
use hourglass_rs::SafeTimeProvider;

use crate::config::CalendarConfig;
use crate::errors::{BillingError, Result};

/// Fixed civil calendar used for every due-date comparison.
///
/// Instants are shifted into the configured offset and truncated to whole
/// days, so "today" flips at local midnight regardless of where the engine runs.
#[derive(Debug, Clone, Copy)]
pub struct CivilCalendar {
    offset: FixedOffset,
}

impl CivilCalendar {
    pub fn new(config: &CalendarConfig) -> Result<Self> {
        let offset = FixedOffset::east_opt(config.utc_offset_seconds).ok_or_else(|| {
            BillingError::InvalidConfiguration {
                message: format!("invalid utc offset {}s", config.utc_offset_seconds),
            }
        })?;
        Ok(Self { offset })
    }

    /// civil day an instant falls on
    pub fn to_civil_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// current civil day
    pub fn today(&self, time_provider: &SafeTimeProvider) -> NaiveDate {
        self.to_civil_date(time_provider.now())
    }
}

/// whole days from `from` to `to`, negative when `to` is earlier
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

pub fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    date + Duration::days(days)
}

/// step forward by whole months, clamping to the last day of shorter months
pub fn add_months(date: NaiveDate, months: u32) -> Result<NaiveDate> {
    date.checked_add_months(Months::new(months)).ok_or_else(|| BillingError::CalculationError {
        message: format!("{} + {} months is out of range", date, months),
    })
}
