use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::calendar::{add_days, days_between};
use crate::config::RenewalConfig;
use crate::decimal::{round_money, Money, Rate};

/// fixed-length interest cycle of a short-cycle loan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BillingCycle {
    pub cycle_days: u32,
    /// interest per full cycle, as a fraction of the loan
    pub interest_rate: Rate,
}

impl BillingCycle {
    pub fn new(cycle_days: u32, interest_rate: Rate) -> Self {
        Self { cycle_days, interest_rate }
    }

    pub fn from_config(config: &RenewalConfig) -> Self {
        Self::new(config.cycle_days, config.interest_rate)
    }

    /// interest for one full cycle
    pub fn cycle_interest(&self, loan: Money) -> Money {
        loan.apply_rate(self.interest_rate)
    }

    /// interest for `days` days of a cycle, rounded once at the end
    pub fn pro_rated_interest(&self, loan: Money, days: u32) -> Money {
        round_money(
            loan.as_decimal() * self.interest_rate.as_decimal() / Decimal::from(self.cycle_days)
                * Decimal::from(days),
        )
    }

    /// Cycles a late payment has to settle: every started cycle counts.
    ///
    /// One day late is one cycle, `cycle_days` late is still one, one more is two.
    pub fn cycles_elapsed(&self, late_days: u32) -> u32 {
        if late_days == 0 {
            return 1;
        }
        (late_days - 1) / self.cycle_days + 1
    }

    /// day number (1-based) inside the newest started cycle
    pub fn days_into_current_cycle(&self, late_days: u32) -> u32 {
        late_days - (self.cycles_elapsed(late_days) - 1) * self.cycle_days
    }

    /// first day of the cycle that ends on `due_date`
    pub fn cycle_start(&self, due_date: NaiveDate) -> NaiveDate {
        add_days(due_date, 1 - self.cycle_days as i64)
    }

    /// Days of the cycle ending on `due_date` that have started by `today`,
    /// counting today: 0 before the cycle, the whole cycle after it.
    pub fn days_passed(&self, due_date: NaiveDate, today: NaiveDate) -> u32 {
        let start = self.cycle_start(due_date);
        if today < start {
            0
        } else if today > due_date {
            self.cycle_days
        } else {
            days_between(start, today) as u32 + 1
        }
    }

    pub fn advance(&self, due_date: NaiveDate, cycles: u32) -> NaiveDate {
        add_days(due_date, (cycles * self.cycle_days) as i64)
    }
}

impl Default for BillingCycle {
    fn default() -> Self {
        Self::from_config(&RenewalConfig::default())
    }
}
