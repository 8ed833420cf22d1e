use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calendar::days_between;
use crate::decimal::Money;

/// late fee configuration for one bill kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LateFeeTerms {
    /// days after the due date before fines start
    pub grace_days: u32,
    /// fine charged per day past the grace period
    pub daily_rate: Money,
}

/// computes per-day fines after a grace period
#[derive(Debug, Clone, Copy)]
pub struct LateFeeCalculator {
    pub terms: LateFeeTerms,
}

impl LateFeeCalculator {
    pub fn new(grace_days: u32, daily_rate: Money) -> Self {
        Self {
            terms: LateFeeTerms { grace_days, daily_rate },
        }
    }

    /// fine for an installment due on `due_date`, as of `today`
    pub fn calculate(&self, due_date: NaiveDate, today: NaiveDate) -> LateFeeCalculation {
        self.calculate_for_days_overdue(days_between(due_date, today))
    }

    /// fine after `days_overdue` whole days past the due date
    pub fn calculate_for_days_overdue(&self, days_overdue: i64) -> LateFeeCalculation {
        let grace = self.terms.grace_days as i64;
        if days_overdue <= grace {
            return LateFeeCalculation {
                fee_amount: Money::ZERO,
                late_days: 0,
            };
        }

        let late_days = (days_overdue - grace) as u32;
        LateFeeCalculation {
            fee_amount: self.terms.daily_rate.times(late_days),
            late_days,
        }
    }
}

/// fine calculation result
#[derive(Debug, Clone, PartialEq)]
pub struct LateFeeCalculation {
    pub fee_amount: Money,
    /// days charged, i.e. days overdue beyond the grace period
    pub late_days: u32,
}
