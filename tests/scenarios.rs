use std::sync::Arc;

use installment_billing_rs::chrono::{NaiveDate, TimeZone, Utc};
use installment_billing_rs::{
    AllocationCase, BillRepository, BillStatus, BillingError, CycleInterestAccrual, DetailStatus,
    EngineConfig, FeeCategory, FineRateLookup, FineTable, InMemoryBillRepository,
    LateFeeAccrualJob, Money, Originator, PaymentAllocator, RenewalEngine, RenewalOutcome,
    SafeTimeProvider, ShortCycleLoanRequest, SqliteBillRepository, StandardBillRequest,
    TimeSource,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn sqlite_store() -> Arc<SqliteBillRepository> {
    let repo = SqliteBillRepository::in_memory().unwrap();
    repo.migrate().unwrap();
    repo.set_fine_rate(FeeCategory::Standard, Money::from_major(20)).unwrap();
    repo.set_fine_rate(FeeCategory::ShortCycle, Money::from_major(50)).unwrap();
    Arc::new(repo)
}

fn fine_table() -> Arc<FineTable> {
    Arc::new(
        FineTable::new()
            .with_rate(FeeCategory::Standard, Money::from_major(20))
            .with_rate(FeeCategory::ShortCycle, Money::from_major(50)),
    )
}

/// two-month purchase: late fee, payment of the fined installment, payoff
fn standard_bill_lifecycle<R: BillRepository, F: FineRateLookup>(repo: Arc<R>, fines: Arc<F>) {
    let config = EngineConfig::default();
    let bill = Originator::new(repo.clone(), &config)
        .create_standard_bill(StandardBillRequest {
            invoice: "INV-2024-0001".to_string(),
            principal: Money::from_major(1_000),
            markup_percent: 10,
            down_payment_percent: 0,
            months: 2,
            start_date: date(2024, 1, 1),
        })
        .unwrap();
    assert_eq!(bill.remaining_amount, Money::from_major(1_100));

    let job = LateFeeAccrualJob::new(repo.clone(), fines, &config).unwrap();
    let report = job.run_for(date(2024, 2, 20)).unwrap();
    assert_eq!(report.bills_updated, 1);
    assert!(report.failures.is_empty());

    let header = repo.get_bill(bill.id).unwrap();
    assert_eq!(header.fee_amount, Money::from_major(80));
    assert_eq!(header.late_day, 4);
    assert_eq!(header.remaining_amount, Money::from_major(1_180));

    let allocator = PaymentAllocator::new(repo.clone());
    let payment = Money::from_major(1_181);
    let err = allocator.allocate_payment(bill.id, None, payment).unwrap_err();
    assert!(matches!(err, BillingError::ExceedsBalance { .. }));

    let open = repo.open_installments(bill.id).unwrap();
    let receipt = allocator
        .allocate_payment(bill.id, Some(open[0].id), Money::from_major(630))
        .unwrap();
    assert_eq!(receipt.closed_installments(), 1);
    assert_eq!(receipt.outcomes[0].case, AllocationCase::A);
    assert_eq!(receipt.bill.remaining_amount, Money::from_major(550));
    assert_eq!(receipt.bill.paid_installments, 1);

    // the paid line keeps its fee; nothing else is overdue
    job.run_for(date(2024, 2, 20)).unwrap();
    let header = repo.get_bill(bill.id).unwrap();
    assert_eq!(header.late_day, 0);
    assert_eq!(header.fee_amount, Money::from_major(80));

    let receipt = allocator.allocate_payment(bill.id, None, Money::from_major(550)).unwrap();
    assert_eq!(receipt.bill.status, BillStatus::Closed);
    assert_eq!(receipt.bill.remaining_amount, Money::ZERO);
    assert_eq!(receipt.credit_after, Money::ZERO);
    assert!(repo.bills_with_open_installments().unwrap().is_empty());

    let paid: Money = repo.installments(bill.id).unwrap().iter().map(|d| d.paid_amount).sum();
    assert_eq!(paid + receipt.bill.credit_balance, receipt.bill.paid_amount);
}

/// short-cycle loan: daily interest, fines, late renewal, payoff
fn short_cycle_lifecycle<R: BillRepository, F: FineRateLookup>(repo: Arc<R>, fines: Arc<F>) {
    let config = EngineConfig::default();
    let bill = Originator::new(repo.clone(), &config)
        .create_short_cycle_loan(ShortCycleLoanRequest {
            invoice: "HPC-2024-0001".to_string(),
            loan_amount: Money::from_major(2_000),
            collateral_price: Money::from_major(3_500),
            start_date: date(2024, 1, 1),
        })
        .unwrap();

    let accrual = CycleInterestAccrual::new(repo.clone(), &config).unwrap();
    let job = LateFeeAccrualJob::new(repo.clone(), fines.clone(), &config).unwrap();
    let engine = RenewalEngine::new(repo.clone(), fines, &config).unwrap();

    assert_eq!(accrual.run_for(date(2024, 1, 4)).unwrap().bills_updated, 1);
    assert_eq!(repo.get_bill(bill.id).unwrap().remaining_amount, Money::from_major(2_060));

    // five days past the 2024-01-11 due date
    job.run_for(date(2024, 1, 16)).unwrap();
    accrual.run_for(date(2024, 1, 16)).unwrap();
    let header = repo.get_bill(bill.id).unwrap();
    assert_eq!(header.fee_amount, Money::from_major(100));
    assert_eq!(header.short_cycle.as_ref().unwrap().interest_amount, Money::from_major(200));
    assert_eq!(header.remaining_amount, Money::from_major(2_300));
    assert_eq!(repo.open_installments(bill.id).unwrap()[0].price, Money::from_major(2_300));

    let quote = engine.quote(bill.id, date(2024, 1, 16)).unwrap().unwrap();
    assert_eq!(quote.total_due(), Money::from_major(300));
    let outcome = engine.renew_on(bill.id, Money::from_major(300), date(2024, 1, 16)).unwrap();
    assert!(matches!(outcome, RenewalOutcome::LateRenewal { .. }));
    let renewed = outcome.bill().clone();
    let terms = renewed.short_cycle.as_ref().unwrap();
    assert_eq!(terms.next_due, date(2024, 1, 21));
    assert_eq!(terms.interest_amount, Money::from_major(100));
    assert_eq!(renewed.remaining_amount, Money::from_major(2_100));
    assert_eq!(renewed.fee_amount, Money::ZERO);

    // a renewal's state is already current for the daily jobs
    assert_eq!(job.run_for(date(2024, 1, 16)).unwrap().bills_updated, 0);
    assert_eq!(accrual.run_for(date(2024, 1, 16)).unwrap().bills_updated, 0);

    let err = engine.renew_on(bill.id, Money::from_major(200), date(2024, 1, 18)).unwrap_err();
    assert!(matches!(err, BillingError::AlreadyRenewed { .. }));

    let details = repo.installments(bill.id).unwrap();
    assert_eq!(details.len(), 2);
    assert_eq!(details[0].status, DetailStatus::Superseded);
    assert_eq!(details[0].price, Money::from_major(2_300));

    let receipt = PaymentAllocator::new(repo.clone())
        .pay_purchase_installment(bill.id, None, Money::from_major(2_100))
        .unwrap();
    assert_eq!(receipt.bill.status, BillStatus::Closed);
    assert!(repo.active_short_cycle_bills().unwrap().is_empty());
}

#[test]
fn test_standard_bill_lifecycle_in_memory() {
    init_logging();
    standard_bill_lifecycle(Arc::new(InMemoryBillRepository::new()), fine_table());
}

#[test]
fn test_standard_bill_lifecycle_sqlite() {
    init_logging();
    let repo = sqlite_store();
    standard_bill_lifecycle(repo.clone(), repo);
}

#[test]
fn test_short_cycle_lifecycle_in_memory() {
    init_logging();
    short_cycle_lifecycle(Arc::new(InMemoryBillRepository::new()), fine_table());
}

#[test]
fn test_short_cycle_lifecycle_sqlite() {
    init_logging();
    let repo = sqlite_store();
    short_cycle_lifecycle(repo.clone(), repo);
}

#[test]
fn test_renewal_from_clock_uses_civil_day() {
    init_logging();
    let repo = Arc::new(InMemoryBillRepository::new());
    let config = EngineConfig::default();
    let bill = Originator::new(repo.clone(), &config)
        .create_short_cycle_loan(ShortCycleLoanRequest {
            invoice: "HPC-2024-0002".to_string(),
            loan_amount: Money::from_major(2_000),
            collateral_price: Money::from_major(3_500),
            start_date: date(2024, 1, 1),
        })
        .unwrap();
    let engine = RenewalEngine::new(repo.clone(), fine_table(), &config).unwrap();

    // 2024-01-11 17:30 UTC is the 12th in Bangkok: one day late
    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 1, 11, 17, 30, 0).unwrap()
    ));
    let err = engine.renew(bill.id, Money::from_major(100), time.now()).unwrap_err();
    assert!(matches!(err, BillingError::AmountMismatch { .. }));

    let outcome = engine.renew(bill.id, Money::from_major(200), time.now()).unwrap();
    let terms = outcome.bill().short_cycle.clone().unwrap();
    assert_eq!(terms.last_renew, date(2024, 1, 12));
    assert_eq!(terms.next_due, date(2024, 1, 21));
    assert_eq!(terms.renew_count, 1);
}
