use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::types::{BillId, BillKind, BillStatus, DetailId, DetailStatus, TermType};

/// collateral loan terms carried on the header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortCycleTerms {
    pub loan_amount: Money,
    /// interest accrued in the current cycle
    pub interest_amount: Money,
    pub last_renew: NaiveDate,
    pub next_due: NaiveDate,
    pub term_type: TermType,
    pub term_value: u32,
    pub renew_count: u32,
}

/// one loan or purchase contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillHeader {
    pub id: BillId,
    pub invoice: String,
    pub kind: BillKind,
    /// principal before markup or interest
    pub principal: Money,
    /// contract price including markup or a full cycle of interest
    pub total_price: Money,
    pub net_installment: Money,
    pub total_installments: u32,
    pub paid_installments: u32,
    pub remaining_installments: u32,
    /// cash received against the bill
    pub paid_amount: Money,
    pub remaining_amount: Money,
    pub fee_amount: Money,
    pub late_day: u32,
    /// overpayment carried forward to later installments
    pub credit_balance: Money,
    pub status: BillStatus,
    pub short_cycle: Option<ShortCycleTerms>,
    /// bumped on every committed update
    pub version: u64,
}

impl BillHeader {
    pub fn is_active(&self) -> bool {
        self.status == BillStatus::Active
    }

    pub fn is_closed(&self) -> bool {
        self.status == BillStatus::Closed
    }

    /// largest payment the bill can absorb
    pub fn payable_ceiling(&self) -> Money {
        self.remaining_amount + self.credit_balance
    }

    /// term unit of a loan, `None` for purchases
    pub fn term_type(&self) -> Option<TermType> {
        self.short_cycle.as_ref().map(|t| t.term_type)
    }

    /// terms of a loan renewed by cycle; month-term loans do not qualify
    pub fn short_cycle_terms(&self) -> Result<&ShortCycleTerms> {
        match &self.short_cycle {
            Some(terms) if terms.term_type == TermType::Days => Ok(terms),
            _ => Err(BillingError::NotShortCycle { bill_id: self.id }),
        }
    }

    pub fn short_cycle_terms_mut(&mut self) -> Result<&mut ShortCycleTerms> {
        let bill_id = self.id;
        match &mut self.short_cycle {
            Some(terms) if terms.term_type == TermType::Days => Ok(terms),
            _ => Err(BillingError::NotShortCycle { bill_id }),
        }
    }

    /// refresh installment counters from a paid count read inside the transaction
    pub fn apply_paid_count(&mut self, paid_installments: u32) {
        self.paid_installments = paid_installments;
        self.remaining_installments = self.total_installments.saturating_sub(paid_installments);
    }

    /// close once nothing is owed or every installment is paid
    pub fn close_if_settled(&mut self) -> bool {
        let settled = !self.remaining_amount.is_positive()
            || (self.total_installments > 0 && self.paid_installments >= self.total_installments);
        if settled {
            self.status = BillStatus::Closed;
        }
        settled
    }
}

/// one scheduled installment line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillDetail {
    pub id: DetailId,
    pub bill_id: BillId,
    pub installment_no: u32,
    pub payment_no: String,
    /// nominal price, including any fee currently charged on the line
    pub price: Money,
    pub paid_amount: Money,
    pub fee_amount: Money,
    pub credit_balance: Money,
    pub due_date: NaiveDate,
    pub status: DetailStatus,
    /// interest-only renewal charge rather than a principal installment
    pub interest_only: bool,
}

impl BillDetail {
    pub fn is_open(&self) -> bool {
        self.status == DetailStatus::Unpaid
    }

    pub fn unpaid(&self) -> Money {
        self.price - self.paid_amount
    }
}

/// installment line not yet stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInstallment {
    pub installment_no: u32,
    pub payment_no: String,
    pub price: Money,
    pub paid_amount: Money,
    pub fee_amount: Money,
    pub due_date: NaiveDate,
    pub status: DetailStatus,
    pub interest_only: bool,
}

impl NewInstallment {
    /// unpaid line with no fee
    pub fn scheduled(installment_no: u32, payment_no: String, price: Money, due_date: NaiveDate) -> Self {
        Self {
            installment_no,
            payment_no,
            price,
            paid_amount: Money::ZERO,
            fee_amount: Money::ZERO,
            due_date,
            status: DetailStatus::Unpaid,
            interest_only: false,
        }
    }

    pub fn interest_only(mut self) -> Self {
        self.interest_only = true;
        self
    }

    pub fn into_detail(self, id: DetailId, bill_id: BillId) -> BillDetail {
        BillDetail {
            id,
            bill_id,
            installment_no: self.installment_no,
            payment_no: self.payment_no,
            price: self.price,
            paid_amount: self.paid_amount,
            fee_amount: self.fee_amount,
            credit_balance: Money::ZERO,
            due_date: self.due_date,
            status: self.status,
            interest_only: self.interest_only,
        }
    }
}

/// sort installments into allocation order: due date, then id
pub fn sort_for_allocation(details: &mut [BillDetail]) {
    details.sort_by(|a, b| a.due_date.cmp(&b.due_date).then(a.id.cmp(&b.id)));
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub fn standard_header(remaining: Money, installments: u32) -> BillHeader {
        BillHeader {
            id: 1,
            invoice: "INV-0001".to_string(),
            kind: BillKind::Standard,
            principal: remaining,
            total_price: remaining,
            net_installment: Money::ZERO,
            total_installments: installments,
            paid_installments: 0,
            remaining_installments: installments,
            paid_amount: Money::ZERO,
            remaining_amount: remaining,
            fee_amount: Money::ZERO,
            late_day: 0,
            credit_balance: Money::ZERO,
            status: BillStatus::Active,
            short_cycle: None,
            version: 0,
        }
    }

    pub fn open_detail(id: DetailId, price: Money, due_date: NaiveDate) -> BillDetail {
        NewInstallment::scheduled(id as u32, format!("P-{}", id), price, due_date).into_detail(id, 1)
    }
}
