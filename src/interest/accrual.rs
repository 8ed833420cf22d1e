use chrono::NaiveDate;
use hourglass_rs::SafeTimeProvider;
use std::sync::Arc;

use crate::calendar::CivilCalendar;
use crate::config::EngineConfig;
use crate::errors::Result;
use crate::interest::cycle::BillingCycle;
use crate::repository::{retry_on_conflict, BillRepository};
use crate::types::BillId;

/// counts from one accrual pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccrualSummary {
    pub bills_scanned: usize,
    pub bills_updated: usize,
    pub bills_failed: usize,
}

/// Daily interest accrual for short-cycle loans.
///
/// Interest only ever rises to what the elapsed days of the current cycle
/// justify, so running it several times a day changes nothing.
pub struct CycleInterestAccrual<R: BillRepository> {
    repo: Arc<R>,
    cycle: BillingCycle,
    calendar: CivilCalendar,
    conflict_retries: u32,
}

impl<R: BillRepository> CycleInterestAccrual<R> {
    pub fn new(repo: Arc<R>, config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            repo,
            cycle: BillingCycle::from_config(&config.renewal),
            calendar: CivilCalendar::new(&config.calendar)?,
            conflict_retries: config.late_fee.max_conflict_retries,
        })
    }

    pub fn run(&self, time_provider: &SafeTimeProvider) -> Result<AccrualSummary> {
        self.run_for(self.calendar.today(time_provider))
    }

    /// accrue every active short-cycle loan as of `today`
    pub fn run_for(&self, today: NaiveDate) -> Result<AccrualSummary> {
        let bill_ids = self.repo.active_short_cycle_bills()?;
        let mut summary = AccrualSummary {
            bills_scanned: bill_ids.len(),
            ..Default::default()
        };

        for bill_id in bill_ids {
            match retry_on_conflict(bill_id, self.conflict_retries, || self.accrue_bill(bill_id, today)) {
                Ok(true) => summary.bills_updated += 1,
                Ok(false) => {}
                Err(e) => {
                    summary.bills_failed += 1;
                    log::warn!("bill={} interest accrual failed: {}", bill_id, e);
                }
            }
        }

        log::info!(
            "cycle interest accrual for {}: scanned {} updated {} failed {}",
            today,
            summary.bills_scanned,
            summary.bills_updated,
            summary.bills_failed
        );
        Ok(summary)
    }

    /// bring one bill's interest up to date, returning whether anything changed
    pub fn accrue_bill(&self, bill_id: BillId, today: NaiveDate) -> Result<bool> {
        let mut header = self.repo.get_bill(bill_id)?;
        let open = self.repo.open_installments(bill_id)?;
        // open rows come back earliest first
        let Some(mut detail) = open.into_iter().last() else {
            return Ok(false);
        };

        let fee_amount = header.fee_amount;
        let paid_amount = header.paid_amount;
        let terms = header.short_cycle_terms_mut()?;

        let days_passed = self.cycle.days_passed(detail.due_date, today);
        let expected = self.cycle.pro_rated_interest(terms.loan_amount, days_passed);
        if terms.interest_amount >= expected {
            return Ok(false);
        }

        log::debug!(
            "bill={} day {} of cycle ending {}: interest {} -> {}",
            bill_id,
            days_passed,
            detail.due_date,
            terms.interest_amount,
            expected
        );
        terms.interest_amount = expected;
        let owed = terms.loan_amount + expected;

        header.remaining_amount = (owed + fee_amount - paid_amount).floor_zero();
        header.net_installment = header.remaining_amount;
        detail.price = owed + detail.fee_amount;

        self.repo.transaction(|tx| {
            tx.update_installments(std::slice::from_ref(&detail))?;
            tx.update_bill(&header)
        })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bill::fixtures::date;
    use crate::decimal::Money;
    use crate::origination::{Originator, ShortCycleLoanRequest};
    use crate::repository::InMemoryBillRepository;
    use chrono::{Duration, TimeZone, Utc};
    use hourglass_rs::TimeSource;

    fn loan(repo: &Arc<InMemoryBillRepository>) -> BillId {
        Originator::new(repo.clone(), &EngineConfig::default())
            .create_short_cycle_loan(ShortCycleLoanRequest {
                invoice: "LOAN-7".to_string(),
                loan_amount: Money::from_major(2_000),
                collateral_price: Money::from_major(4_000),
                start_date: date(2024, 1, 1),
            })
            .unwrap()
            .id
    }

    #[test]
    fn test_interest_accrues_per_day_of_cycle() {
        let repo = Arc::new(InMemoryBillRepository::new());
        let bill_id = loan(&repo);
        let accrual = CycleInterestAccrual::new(repo.clone(), &EngineConfig::default()).unwrap();

        // cycle ending 2024-01-11 starts 2024-01-02
        assert!(!accrual.accrue_bill(bill_id, date(2024, 1, 1)).unwrap());

        assert!(accrual.accrue_bill(bill_id, date(2024, 1, 4)).unwrap());
        let header = repo.get_bill(bill_id).unwrap();
        assert_eq!(header.short_cycle.as_ref().unwrap().interest_amount, Money::from_major(60));
        assert_eq!(header.remaining_amount, Money::from_major(2_060));
        assert_eq!(repo.open_installments(bill_id).unwrap()[0].price, Money::from_major(2_060));

        // same day again is a no-op
        assert!(!accrual.accrue_bill(bill_id, date(2024, 1, 4)).unwrap());

        // past the due date the full cycle is charged and no more
        accrual.accrue_bill(bill_id, date(2024, 2, 1)).unwrap();
        let header = repo.get_bill(bill_id).unwrap();
        assert_eq!(header.short_cycle.as_ref().unwrap().interest_amount, Money::from_major(200));
        assert_eq!(header.remaining_amount, Money::from_major(2_200));
    }

    #[test]
    fn test_run_uses_civil_today() {
        let repo = Arc::new(InMemoryBillRepository::new());
        let bill_id = loan(&repo);
        let accrual = CycleInterestAccrual::new(repo.clone(), &EngineConfig::default()).unwrap();

        // 2024-01-02 18:00 UTC is already 2024-01-03 in Bangkok
        let time = SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2024, 1, 2, 18, 0, 0).unwrap()
        ));
        let summary = accrual.run(&time).unwrap();
        assert_eq!(summary.bills_scanned, 1);
        assert_eq!(summary.bills_updated, 1);
        let header = repo.get_bill(bill_id).unwrap();
        assert_eq!(header.short_cycle.as_ref().unwrap().interest_amount, Money::from_major(40));

        time.test_control().unwrap().advance(Duration::days(1));
        accrual.run(&time).unwrap();
        let header = repo.get_bill(bill_id).unwrap();
        assert_eq!(header.short_cycle.as_ref().unwrap().interest_amount, Money::from_major(60));
    }
}
