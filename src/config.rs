use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::decimal::{Money, Rate};
use crate::errors::{BillingError, Result};
use crate::repository::FineRateLookup;
use crate::types::{BillKind, FeeCategory};

/// engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub calendar: CalendarConfig,
    pub late_fee: LateFeeConfig,
    pub renewal: RenewalConfig,
}

/// civil calendar every due date is compared in
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    /// offset east of UTC, in seconds
    pub utc_offset_seconds: i32,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        // Asia/Bangkok, no DST
        Self { utc_offset_seconds: 7 * 3600 }
    }
}

/// late-fee accrual job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LateFeeConfig {
    /// grace days after the due date for standard installment bills
    pub standard_grace_days: u32,
    /// grace days after the due date for short-cycle loans
    pub short_cycle_grace_days: u32,
    /// worker threads in the batch pool
    pub workers: usize,
    /// reload-and-retry attempts after a version conflict
    pub max_conflict_retries: u32,
}

impl Default for LateFeeConfig {
    fn default() -> Self {
        Self {
            standard_grace_days: 15,
            short_cycle_grace_days: 3,
            workers: 2,
            max_conflict_retries: 3,
        }
    }
}

impl LateFeeConfig {
    pub fn grace_days_for(&self, kind: BillKind) -> u32 {
        match kind {
            BillKind::Standard => self.standard_grace_days,
            BillKind::ShortCycle | BillKind::TermLoan => self.short_cycle_grace_days,
        }
    }
}

/// short-cycle renewal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenewalConfig {
    /// length of one billing cycle in days
    pub cycle_days: u32,
    /// interest charged per full cycle, as a fraction of the loan
    pub interest_rate: Rate,
    /// grace days before a late renewal is charged fines
    pub grace_days: u32,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            cycle_days: 10,
            interest_rate: Rate::from_decimal(dec!(0.10)),
            grace_days: 3,
        }
    }
}

impl EngineConfig {
    /// parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json).map_err(|e| {
            BillingError::InvalidConfiguration { message: e.to_string() }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// read, parse and validate a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| BillingError::InvalidConfiguration {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.calendar.utc_offset_seconds.abs() >= 24 * 3600 {
            return Err(BillingError::InvalidConfiguration {
                message: format!("utc offset {}s is outside +/-24h", self.calendar.utc_offset_seconds),
            });
        }
        if self.late_fee.workers == 0 {
            return Err(BillingError::InvalidConfiguration {
                message: "late fee job needs at least one worker".to_string(),
            });
        }
        if self.renewal.cycle_days == 0 {
            return Err(BillingError::InvalidConfiguration {
                message: "cycle length must be at least one day".to_string(),
            });
        }
        if self.renewal.interest_rate.as_decimal() < Decimal::ZERO {
            return Err(BillingError::InvalidConfiguration {
                message: format!("negative cycle interest rate {}", self.renewal.interest_rate),
            });
        }
        Ok(())
    }
}

/// daily fine rates keyed by fee category
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FineTable {
    rates: BTreeMap<FeeCategory, Money>,
}

impl FineTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, category: FeeCategory, daily_rate: Money) -> Self {
        self.rates.insert(category, daily_rate);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let table: FineTable = serde_json::from_str(json).map_err(|e| {
            BillingError::InvalidConfiguration { message: e.to_string() }
        })?;
        if let Some((category, rate)) = table.rates.iter().find(|(_, r)| r.is_negative()) {
            return Err(BillingError::InvalidConfiguration {
                message: format!("negative fine rate {} for {:?}", rate, category),
            });
        }
        Ok(table)
    }
}

impl FineRateLookup for FineTable {
    fn daily_fine_rate(&self, category: FeeCategory) -> Result<Money> {
        self.rates.get(&category).copied().ok_or_else(|| BillingError::InvalidConfiguration {
            message: format!("no fine rate configured for {:?}", category),
        })
    }
}
