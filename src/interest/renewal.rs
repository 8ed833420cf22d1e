use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::bill::{BillDetail, BillHeader, NewInstallment};
use crate::calendar::{days_between, CivilCalendar};
use crate::config::EngineConfig;
use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::interest::cycle::BillingCycle;
use crate::interest::penalty::LateFeeCalculator;
use crate::repository::{retry_on_conflict, BillRepository, FineRateLookup};
use crate::types::{BillId, DetailStatus, FeeCategory};

/// what a renewal request did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RenewalOutcome {
    /// interest paid inside the current cycle, due date pushed one cycle out
    InCycle { bill: BillHeader },
    /// elapsed cycles and fines settled, a fresh cycle started
    LateRenewal {
        bill: BillHeader,
        quote: RenewalQuote,
    },
    /// pay date precedes the current cycle, nothing written
    NoChange { bill: BillHeader },
}

impl RenewalOutcome {
    pub fn bill(&self) -> &BillHeader {
        match self {
            RenewalOutcome::InCycle { bill }
            | RenewalOutcome::LateRenewal { bill, .. }
            | RenewalOutcome::NoChange { bill } => bill,
        }
    }
}

/// amounts owed to renew a loan after its due date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenewalQuote {
    pub late_days: u32,
    pub cycles_elapsed: u32,
    pub interest_due: Money,
    pub fee_due: Money,
    /// day number inside the newest cycle on the pay date
    pub days_into_new_cycle: u32,
    /// interest already accrued in the new cycle
    pub new_cycle_interest: Money,
}

impl RenewalQuote {
    pub fn total_due(&self) -> Money {
        self.interest_due + self.fee_due
    }
}

/// Renews short-cycle loans: interest-only payments that roll the due date
/// forward without reducing principal.
pub struct RenewalEngine<R: BillRepository, F: FineRateLookup> {
    repo: Arc<R>,
    fines: Arc<F>,
    cycle: BillingCycle,
    grace_days: u32,
    calendar: CivilCalendar,
    conflict_retries: u32,
}

impl<R: BillRepository, F: FineRateLookup> RenewalEngine<R, F> {
    pub fn new(repo: Arc<R>, fines: Arc<F>, config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            repo,
            fines,
            cycle: BillingCycle::from_config(&config.renewal),
            grace_days: config.renewal.grace_days,
            calendar: CivilCalendar::new(&config.calendar)?,
            conflict_retries: config.late_fee.max_conflict_retries,
        })
    }

    /// renew with a payment received at `paid_at`
    pub fn renew(&self, bill_id: BillId, pay_amount: Money, paid_at: DateTime<Utc>) -> Result<RenewalOutcome> {
        self.renew_on(bill_id, pay_amount, self.calendar.to_civil_date(paid_at))
    }

    /// renew with a payment dated on the civil day `pay_date`
    pub fn renew_on(&self, bill_id: BillId, pay_amount: Money, pay_date: NaiveDate) -> Result<RenewalOutcome> {
        if !pay_amount.is_positive() {
            return Err(BillingError::InvalidAmount {
                amount: pay_amount,
                reason: "renewal payment must be greater than zero".to_string(),
            });
        }
        retry_on_conflict(bill_id, self.conflict_retries, || {
            self.try_renew(bill_id, pay_amount, pay_date)
        })
    }

    /// amounts a late renewal on `pay_date` must pay; `None` while the cycle is still open
    pub fn quote(&self, bill_id: BillId, pay_date: NaiveDate) -> Result<Option<RenewalQuote>> {
        let header = self.repo.get_bill(bill_id)?;
        let terms = header.short_cycle_terms()?;
        if pay_date <= terms.next_due {
            return Ok(None);
        }
        self.late_quote(terms.loan_amount, days_between(terms.next_due, pay_date) as u32)
            .map(Some)
    }

    fn late_quote(&self, loan: Money, late_days: u32) -> Result<RenewalQuote> {
        let cycles_elapsed = self.cycle.cycles_elapsed(late_days);
        let interest_due = self.cycle.cycle_interest(loan).times(cycles_elapsed);

        let daily_rate = self.fines.daily_fine_rate(FeeCategory::ShortCycle)?;
        let fee = LateFeeCalculator::new(self.grace_days, daily_rate)
            .calculate_for_days_overdue(late_days as i64);

        let days_into_new_cycle = self.cycle.days_into_current_cycle(late_days);
        Ok(RenewalQuote {
            late_days,
            cycles_elapsed,
            interest_due,
            fee_due: fee.fee_amount,
            days_into_new_cycle,
            new_cycle_interest: self.cycle.pro_rated_interest(loan, days_into_new_cycle),
        })
    }

    fn try_renew(&self, bill_id: BillId, pay_amount: Money, pay_date: NaiveDate) -> Result<RenewalOutcome> {
        let header = self.repo.get_bill(bill_id)?;
        let terms = header.short_cycle_terms()?.clone();
        if !header.is_active() {
            return Err(BillingError::NothingToPay { bill_id });
        }

        if pay_date < terms.last_renew {
            log::warn!(
                "bill={} renewal dated {} precedes last renewal {}, ignored",
                bill_id,
                pay_date,
                terms.last_renew
            );
            return Ok(RenewalOutcome::NoChange { bill: header });
        }

        if pay_date <= terms.next_due {
            self.renew_in_cycle(header, pay_amount, pay_date)
        } else {
            self.renew_late(header, pay_amount, pay_date)
        }
    }

    fn renew_in_cycle(&self, mut header: BillHeader, pay_amount: Money, pay_date: NaiveDate) -> Result<RenewalOutcome> {
        let bill_id = header.id;
        let terms = header.short_cycle_terms_mut()?;
        if self.repo.has_interest_charge_between(bill_id, terms.last_renew, terms.next_due)? {
            return Err(BillingError::AlreadyRenewed {
                bill_id,
                window_start: terms.last_renew,
                window_end: terms.next_due,
            });
        }

        terms.interest_amount = pay_amount;
        terms.last_renew = pay_date;
        terms.next_due = self.cycle.advance(terms.next_due, 1);
        terms.renew_count += 1;
        let loan = terms.loan_amount;
        let next_due = terms.next_due;

        header.remaining_amount = loan + pay_amount;
        header.net_installment = header.remaining_amount;

        let (superseded, next_no) = self.supersede_open_rows(bill_id, |_| {})?;
        let row = NewInstallment::scheduled(
            next_no,
            format!("INTEREST-{}-{}", bill_id, pay_date.format("%Y%m%d")),
            header.remaining_amount,
            next_due,
        )
        .interest_only();

        header.version = self.commit(&header, &superseded, row)?;
        log::info!(
            "bill={} renewed in cycle: interest {} next due {} remaining {}",
            bill_id,
            pay_amount,
            next_due,
            header.remaining_amount
        );
        Ok(RenewalOutcome::InCycle { bill: header })
    }

    fn renew_late(&self, mut header: BillHeader, pay_amount: Money, pay_date: NaiveDate) -> Result<RenewalOutcome> {
        let bill_id = header.id;
        let terms = header.short_cycle_terms_mut()?;
        let late_days = days_between(terms.next_due, pay_date) as u32;
        let quote = self.late_quote(terms.loan_amount, late_days)?;

        let required = quote.total_due();
        if pay_amount != required {
            return Err(BillingError::AmountMismatch {
                required,
                provided: pay_amount,
            });
        }

        let loan = terms.loan_amount;
        terms.interest_amount = quote.new_cycle_interest;
        terms.last_renew = pay_date;
        terms.next_due = self.cycle.advance(terms.next_due, quote.cycles_elapsed);
        terms.renew_count += 1;
        let next_due = terms.next_due;

        header.remaining_amount = loan + quote.new_cycle_interest;
        header.net_installment = header.remaining_amount;
        header.fee_amount = Money::ZERO;
        header.late_day = 0;

        // the closed rows become the settlement receipt for the elapsed cycles
        let settlement_price = loan + required;
        let settlement_fee = quote.fee_due;
        let (superseded, next_no) = self.supersede_open_rows(bill_id, |detail| {
            detail.price = settlement_price;
            detail.fee_amount = settlement_fee;
            detail.paid_amount = Money::ZERO;
        })?;
        let row = NewInstallment::scheduled(
            next_no,
            format!("RENEW-{}", pay_date.format("%Y-%m-%d")),
            header.remaining_amount,
            next_due,
        )
        .interest_only();

        header.version = self.commit(&header, &superseded, row)?;
        log::info!(
            "bill={} late renewal: {} day(s) late, {} cycle(s), interest {} fee {} next due {}",
            bill_id,
            quote.late_days,
            quote.cycles_elapsed,
            quote.interest_due,
            quote.fee_due,
            next_due
        );
        Ok(RenewalOutcome::LateRenewal { bill: header, quote })
    }

    /// close every open row and return them with the next free installment number
    fn supersede_open_rows(
        &self,
        bill_id: BillId,
        mut settle: impl FnMut(&mut BillDetail),
    ) -> Result<(Vec<BillDetail>, u32)> {
        let all = self.repo.installments(bill_id)?;
        let next_no = all.iter().map(|d| d.installment_no).max().unwrap_or(0) + 1;
        let superseded = all
            .into_iter()
            .filter(|d| d.is_open())
            .map(|mut detail| {
                detail.status = DetailStatus::Superseded;
                settle(&mut detail);
                detail
            })
            .collect();
        Ok((superseded, next_no))
    }

    fn commit(&self, header: &BillHeader, superseded: &[BillDetail], row: NewInstallment) -> Result<u64> {
        self.repo.transaction(|tx| {
            tx.update_installments(superseded)?;
            tx.insert_installments(header.id, std::slice::from_ref(&row))?;
            tx.update_bill(header)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bill::fixtures::date;
    use crate::config::FineTable;
    use crate::origination::{Originator, ShortCycleLoanRequest};
    use crate::repository::InMemoryBillRepository;
    use crate::types::BillStatus;

    struct Fixture {
        repo: Arc<InMemoryBillRepository>,
        engine: RenewalEngine<InMemoryBillRepository, FineTable>,
        bill_id: BillId,
    }

    /// 2000 loan opened on 2024-01-01, due 2024-01-11, fine 50/day
    fn fixture() -> Fixture {
        let repo = Arc::new(InMemoryBillRepository::new());
        let fines = Arc::new(FineTable::new().with_rate(FeeCategory::ShortCycle, Money::from_major(50)));
        let config = EngineConfig::default();
        let originator = Originator::new(repo.clone(), &config);
        let bill = originator
            .create_short_cycle_loan(ShortCycleLoanRequest {
                invoice: "LOAN-1".to_string(),
                loan_amount: Money::from_major(2_000),
                collateral_price: Money::from_major(5_000),
                start_date: date(2024, 1, 1),
            })
            .unwrap();
        let engine = RenewalEngine::new(repo.clone(), fines, &config).unwrap();
        Fixture { repo, engine, bill_id: bill.id }
    }

    #[test]
    fn test_in_cycle_on_last_day() {
        let f = fixture();
        // day 10 after the last renewal
        let outcome = f.engine.renew_on(f.bill_id, Money::from_major(200), date(2024, 1, 11)).unwrap();
        let bill = match outcome {
            RenewalOutcome::InCycle { bill } => bill,
            other => panic!("expected in-cycle renewal, got {:?}", other),
        };
        let terms = bill.short_cycle.as_ref().unwrap();
        assert_eq!(terms.next_due, date(2024, 1, 21));
        assert_eq!(terms.last_renew, date(2024, 1, 11));
        assert_eq!(terms.renew_count, 1);
        assert_eq!(bill.remaining_amount, Money::from_major(2_200));

        let details = f.repo.installments(f.bill_id).unwrap();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].status, DetailStatus::Superseded);
        assert!(details[1].interest_only);
        assert_eq!(details[1].price, Money::from_major(2_200));
        assert_eq!(details[1].due_date, date(2024, 1, 21));
    }

    #[test]
    fn test_second_renewal_in_same_window_rejected() {
        let f = fixture();
        f.engine.renew_on(f.bill_id, Money::from_major(200), date(2024, 1, 5)).unwrap();
        let err = f.engine.renew_on(f.bill_id, Money::from_major(200), date(2024, 1, 6)).unwrap_err();
        assert!(matches!(err, BillingError::AlreadyRenewed { .. }));
        assert_eq!(f.repo.installments(f.bill_id).unwrap().len(), 2);
    }

    #[test]
    fn test_one_day_late_is_one_cycle() {
        let f = fixture();
        let quote = f.engine.quote(f.bill_id, date(2024, 1, 12)).unwrap().unwrap();
        assert_eq!(quote.cycles_elapsed, 1);
        assert_eq!(quote.fee_due, Money::ZERO);
        assert_eq!(quote.total_due(), Money::from_major(200));

        let outcome = f.engine.renew_on(f.bill_id, Money::from_major(200), date(2024, 1, 12)).unwrap();
        let bill = outcome.bill();
        let terms = bill.short_cycle.as_ref().unwrap();
        assert_eq!(terms.next_due, date(2024, 1, 21));
        assert_eq!(terms.interest_amount, Money::from_major(20));
        assert_eq!(bill.remaining_amount, Money::from_major(2_020));
    }

    #[test]
    fn test_eleven_days_late_is_two_cycles_with_fines() {
        let f = fixture();
        // day 21 after the last renewal
        let quote = f.engine.quote(f.bill_id, date(2024, 1, 22)).unwrap().unwrap();
        assert_eq!(quote.late_days, 11);
        assert_eq!(quote.cycles_elapsed, 2);
        assert_eq!(quote.interest_due, Money::from_major(400));
        assert_eq!(quote.fee_due, Money::from_major(400));
        assert_eq!(quote.days_into_new_cycle, 1);

        let err = f.engine.renew_on(f.bill_id, Money::from_major(400), date(2024, 1, 22)).unwrap_err();
        assert!(matches!(err, BillingError::AmountMismatch { .. }));

        let outcome = f.engine.renew_on(f.bill_id, Money::from_major(800), date(2024, 1, 22)).unwrap();
        let quote = match &outcome {
            RenewalOutcome::LateRenewal { quote, .. } => quote.clone(),
            other => panic!("expected late renewal, got {:?}", other),
        };
        assert_eq!(quote.cycles_elapsed, 2);

        let bill = outcome.bill();
        let terms = bill.short_cycle.as_ref().unwrap();
        assert_eq!(terms.next_due, date(2024, 1, 31));
        assert_eq!(terms.last_renew, date(2024, 1, 22));
        assert_eq!(bill.fee_amount, Money::ZERO);
        assert_eq!(bill.late_day, 0);
        assert_eq!(bill.remaining_amount, Money::from_major(2_020));

        let details = f.repo.installments(f.bill_id).unwrap();
        assert_eq!(details[0].status, DetailStatus::Superseded);
        assert_eq!(details[0].price, Money::from_major(2_800));
        assert_eq!(details[0].fee_amount, Money::from_major(400));
        assert_eq!(details[1].payment_no, "RENEW-2024-01-22");
        assert_eq!(details[1].status, DetailStatus::Unpaid);
    }

    #[test]
    fn test_pay_date_before_cycle_is_no_change() {
        let f = fixture();
        let before = f.repo.get_bill(f.bill_id).unwrap();
        let outcome = f.engine.renew_on(f.bill_id, Money::from_major(200), date(2023, 12, 31)).unwrap();
        assert!(matches!(outcome, RenewalOutcome::NoChange { .. }));
        assert_eq!(f.repo.get_bill(f.bill_id).unwrap(), before);
    }

    #[test]
    fn test_rejects_standard_and_closed_bills() {
        let f = fixture();
        let mut closed = f.repo.get_bill(f.bill_id).unwrap();
        closed.status = BillStatus::Closed;
        f.repo.transaction(|tx| tx.update_bill(&closed)).unwrap();
        let err = f.engine.renew_on(f.bill_id, Money::from_major(200), date(2024, 1, 5)).unwrap_err();
        assert!(matches!(err, BillingError::NothingToPay { .. }));

        let originator = Originator::new(f.repo.clone(), &EngineConfig::default());
        let standard = originator
            .create_standard_bill(crate::origination::StandardBillRequest {
                invoice: "INV-1".to_string(),
                principal: Money::from_major(1_000),
                markup_percent: 10,
                down_payment_percent: 0,
                months: 2,
                start_date: date(2024, 1, 1),
            })
            .unwrap();
        let err = f.engine.renew_on(standard.id, Money::from_major(200), date(2024, 1, 5)).unwrap_err();
        assert!(matches!(err, BillingError::NotShortCycle { .. }));

        let term_loan = originator
            .create_month_term_loan(crate::origination::MonthTermLoanRequest {
                invoice: "HPC-2".to_string(),
                loan_amount: Money::from_major(1_000),
                collateral_price: Money::from_major(2_000),
                extra_percent: 10,
                months: 2,
                start_date: date(2024, 1, 1),
            })
            .unwrap();
        let err = f.engine.renew_on(term_loan.id, Money::from_major(100), date(2024, 1, 5)).unwrap_err();
        assert!(matches!(err, BillingError::NotShortCycle { .. }));
    }
}
