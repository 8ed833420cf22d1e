use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::bill::{BillHeader, NewInstallment, ShortCycleTerms};
use crate::calendar::{add_days, add_months};
use crate::config::EngineConfig;
use crate::decimal::{Money, Rate};
use crate::errors::{BillingError, Result};
use crate::interest::cycle::BillingCycle;
use crate::repository::BillRepository;
use crate::types::{BillId, BillKind, BillStatus, TermType};

/// monthly installment purchase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardBillRequest {
    pub invoice: String,
    /// product price before markup
    pub principal: Money,
    pub markup_percent: u32,
    pub down_payment_percent: u32,
    pub months: u32,
    pub start_date: NaiveDate,
}

/// short-cycle loan against collateral
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortCycleLoanRequest {
    pub invoice: String,
    pub loan_amount: Money,
    /// appraised price of the pledged item; the loan must stay below it
    pub collateral_price: Money,
    pub start_date: NaiveDate,
}

/// collateral loan repaid over whole months
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthTermLoanRequest {
    pub invoice: String,
    pub loan_amount: Money,
    pub collateral_price: Money,
    /// flat interest over the whole term, in percent of the loan
    pub extra_percent: u32,
    pub months: u32,
    pub start_date: NaiveDate,
}

/// creates bills and their installment schedules
pub struct Originator<R: BillRepository> {
    repo: Arc<R>,
    cycle: BillingCycle,
}

impl<R: BillRepository> Originator<R> {
    pub fn new(repo: Arc<R>, config: &EngineConfig) -> Self {
        Self {
            repo,
            cycle: BillingCycle::from_config(&config.renewal),
        }
    }

    /// Create a monthly installment bill.
    ///
    /// The financed amount and the installment price are rounded to whole
    /// currency units; installments fall due one calendar month apart.
    pub fn create_standard_bill(&self, request: StandardBillRequest) -> Result<BillHeader> {
        if !request.principal.is_positive() {
            return Err(BillingError::InvalidAmount {
                amount: request.principal,
                reason: "principal must be positive".to_string(),
            });
        }
        if request.months == 0 {
            return Err(BillingError::InvalidAmount {
                amount: request.principal,
                reason: "a bill needs at least one installment".to_string(),
            });
        }
        if request.down_payment_percent > 100 {
            return Err(BillingError::InvalidAmount {
                amount: request.principal,
                reason: format!("down payment of {}% exceeds the price", request.down_payment_percent),
            });
        }

        let total_price = request.principal + request.principal.apply_rate(Rate::from_percentage(request.markup_percent));
        let down_payment = total_price.apply_rate(Rate::from_percentage(request.down_payment_percent));
        let financed = (total_price - down_payment).round_whole();
        let net_installment = (financed / Decimal::from(request.months)).round_whole();

        let mut rows = Vec::with_capacity(request.months as usize);
        for no in 1..=request.months {
            let due = add_months(request.start_date, no)?;
            rows.push(NewInstallment::scheduled(no, no.to_string(), net_installment, due));
        }

        let header = BillHeader {
            id: 0,
            invoice: request.invoice,
            kind: BillKind::Standard,
            principal: request.principal,
            total_price,
            net_installment,
            total_installments: request.months,
            paid_installments: 0,
            remaining_installments: request.months,
            paid_amount: Money::ZERO,
            remaining_amount: financed,
            fee_amount: Money::ZERO,
            late_day: 0,
            credit_balance: Money::ZERO,
            status: BillStatus::Active,
            short_cycle: None,
            version: 0,
        };

        let bill_id = self.persist(&header, &rows)?;
        log::info!(
            "bill={} created {} x {} for invoice {}",
            bill_id,
            request.months,
            net_installment,
            header.invoice
        );
        self.repo.get_bill(bill_id)
    }

    /// Create a short-cycle loan with one installment due at the end of
    /// the first cycle. Interest starts at zero and accrues daily.
    pub fn create_short_cycle_loan(&self, request: ShortCycleLoanRequest) -> Result<BillHeader> {
        check_loan(request.loan_amount, request.collateral_price)?;

        let loan = request.loan_amount;
        let next_due = add_days(request.start_date, self.cycle.cycle_days as i64);
        let header = BillHeader {
            id: 0,
            invoice: request.invoice,
            kind: BillKind::ShortCycle,
            principal: loan,
            total_price: loan + self.cycle.cycle_interest(loan),
            net_installment: loan,
            total_installments: 1,
            paid_installments: 0,
            remaining_installments: 1,
            paid_amount: Money::ZERO,
            remaining_amount: loan,
            fee_amount: Money::ZERO,
            late_day: 0,
            credit_balance: Money::ZERO,
            status: BillStatus::Active,
            short_cycle: Some(ShortCycleTerms {
                loan_amount: loan,
                interest_amount: Money::ZERO,
                last_renew: request.start_date,
                next_due,
                term_type: TermType::Days,
                term_value: self.cycle.cycle_days,
                renew_count: 0,
            }),
            version: 0,
        };
        let row = NewInstallment::scheduled(1, "1".to_string(), loan, next_due);

        let bill_id = self.persist(&header, std::slice::from_ref(&row))?;
        log::info!("bill={} short-cycle loan of {} due {}", bill_id, loan, next_due);
        self.repo.get_bill(bill_id)
    }

    /// Create a month-term collateral loan.
    ///
    /// Interest is a flat percentage of the loan, rounded to whole units;
    /// loan plus interest is split into equal monthly installments, each
    /// rounded to whole units.
    pub fn create_month_term_loan(&self, request: MonthTermLoanRequest) -> Result<BillHeader> {
        check_loan(request.loan_amount, request.collateral_price)?;
        if request.months == 0 {
            return Err(BillingError::InvalidAmount {
                amount: request.loan_amount,
                reason: "a loan needs at least one month".to_string(),
            });
        }

        let loan = request.loan_amount;
        let interest = loan.apply_rate(Rate::from_percentage(request.extra_percent)).round_whole();
        let total_price = loan + interest;
        let net_installment = (total_price / Decimal::from(request.months)).round_whole();

        let mut rows = Vec::with_capacity(request.months as usize);
        for no in 1..=request.months {
            let due = add_months(request.start_date, no)?;
            rows.push(NewInstallment::scheduled(no, no.to_string(), net_installment, due));
        }
        let first_due = add_months(request.start_date, 1)?;

        let header = BillHeader {
            id: 0,
            invoice: request.invoice,
            kind: BillKind::TermLoan,
            principal: loan,
            total_price,
            net_installment,
            total_installments: request.months,
            paid_installments: 0,
            remaining_installments: request.months,
            paid_amount: Money::ZERO,
            remaining_amount: total_price.round_whole(),
            fee_amount: Money::ZERO,
            late_day: 0,
            credit_balance: Money::ZERO,
            status: BillStatus::Active,
            short_cycle: Some(ShortCycleTerms {
                loan_amount: loan,
                interest_amount: interest,
                last_renew: request.start_date,
                next_due: first_due,
                term_type: TermType::Months,
                term_value: request.months,
                renew_count: 0,
            }),
            version: 0,
        };

        let bill_id = self.persist(&header, &rows)?;
        log::info!(
            "bill={} month-term loan of {} over {} months at {}",
            bill_id,
            loan,
            request.months,
            net_installment
        );
        self.repo.get_bill(bill_id)
    }

    fn persist(&self, header: &BillHeader, rows: &[NewInstallment]) -> Result<BillId> {
        self.repo.transaction(|tx| {
            let bill_id = tx.insert_bill(header)?;
            tx.insert_installments(bill_id, rows)?;
            Ok(bill_id)
        })
    }
}

fn check_loan(loan_amount: Money, collateral_price: Money) -> Result<()> {
    if !loan_amount.is_positive() {
        return Err(BillingError::InvalidAmount {
            amount: loan_amount,
            reason: "loan amount must be positive".to_string(),
        });
    }
    if loan_amount >= collateral_price {
        return Err(BillingError::InvalidAmount {
            amount: loan_amount,
            reason: format!("loan must be below the collateral price {}", collateral_price),
        });
    }
    Ok(())
}
