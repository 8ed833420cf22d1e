pub mod waterfall;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::bill::{BillDetail, BillHeader};
use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::repository::{retry_on_conflict, BillRepository};
use crate::types::{BillId, DetailId, DetailStatus, TermType};

pub use waterfall::{allocate, Allocation, InstallmentOutcome};

/// what a payment did to a bill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub bill_id: BillId,
    /// amount submitted
    pub amount: Money,
    /// amount that closed installments
    pub applied: Money,
    pub credit_before: Money,
    pub credit_after: Money,
    pub outcomes: Vec<InstallmentOutcome>,
    /// header as committed
    pub bill: BillHeader,
}

impl PaymentReceipt {
    pub fn closed_installments(&self) -> usize {
        self.outcomes.iter().filter(|o| o.closed).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PaymentRule {
    /// anything up to remaining balance plus credit
    UpToBalance,
    /// day-cycle loans take exactly the contract or cycle price, others up to the remaining amount
    Purchase,
}

/// Applies customer payments to bills.
///
/// Every payment is computed from a fresh read and committed in a single
/// transaction; a concurrent update to the same bill causes a reload and
/// recomputation.
pub struct PaymentAllocator<R: BillRepository> {
    repo: Arc<R>,
    conflict_retries: u32,
}

impl<R: BillRepository> PaymentAllocator<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo, conflict_retries: 3 }
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    /// Allocate `amount` plus the bill's carried credit across its open
    /// installments, earliest due first.
    ///
    /// `hint`, when given, must name the earliest open installment.
    pub fn allocate_payment(&self, bill_id: BillId, hint: Option<DetailId>, amount: Money) -> Result<PaymentReceipt> {
        ensure_positive(amount)?;
        retry_on_conflict(bill_id, self.conflict_retries, || {
            self.try_allocate(bill_id, hint, amount, PaymentRule::UpToBalance)
        })
    }

    /// Payment on a collateral loan.
    ///
    /// A day-cycle loan accepts only the full contract price or the current
    /// cycle price; any other bill accepts up to its remaining amount.
    pub fn pay_purchase_installment(&self, bill_id: BillId, hint: Option<DetailId>, amount: Money) -> Result<PaymentReceipt> {
        ensure_positive(amount)?;
        retry_on_conflict(bill_id, self.conflict_retries, || {
            self.try_allocate(bill_id, hint, amount, PaymentRule::Purchase)
        })
    }

    /// Partial payment against the earliest open installment, without carrying credit.
    pub fn add_extra_payment(&self, bill_id: BillId, detail_id: DetailId, amount: Money) -> Result<(BillHeader, BillDetail)> {
        ensure_positive(amount)?;
        retry_on_conflict(bill_id, self.conflict_retries, || {
            self.try_extra_payment(bill_id, detail_id, amount)
        })
    }

    fn try_allocate(
        &self,
        bill_id: BillId,
        hint: Option<DetailId>,
        amount: Money,
        rule: PaymentRule,
    ) -> Result<PaymentReceipt> {
        let mut header = self.repo.get_bill(bill_id)?;
        let open = self.repo.open_installments(bill_id)?;
        let first = earliest_payable(&open).ok_or(BillingError::NothingToPay { bill_id })?;
        if let Some(detail_id) = hint {
            check_hint(bill_id, detail_id, first, &open)?;
        }

        match rule {
            PaymentRule::UpToBalance => {
                let limit = header.payable_ceiling();
                if amount > limit {
                    return Err(BillingError::ExceedsBalance { amount, limit });
                }
            }
            PaymentRule::Purchase if header.term_type() == Some(TermType::Days) => {
                if amount != header.total_price && amount != header.remaining_amount {
                    return Err(BillingError::InvalidAmount {
                        amount,
                        reason: format!(
                            "short-cycle bills take exactly {} or {}",
                            header.total_price, header.remaining_amount
                        ),
                    });
                }
            }
            PaymentRule::Purchase => {
                if amount > header.remaining_amount {
                    return Err(BillingError::ExceedsBalance {
                        amount,
                        limit: header.remaining_amount,
                    });
                }
            }
        }

        let allocation = allocate(&open, amount, header.credit_balance);
        header.credit_balance = allocation.credit_after;
        header.paid_amount += amount;
        header.remaining_amount = (header.remaining_amount - allocation.applied).floor_zero();

        let version = self.repo.transaction(|tx| {
            tx.update_installments(&allocation.updated)?;
            let paid = tx.count_paid_installments(bill_id)?;
            header.apply_paid_count(paid);
            header.close_if_settled();
            tx.update_bill(&header)
        })?;
        header.version = version;

        log::info!(
            "bill={} payment {} applied {} credit {} -> {} closed {} installment(s) status {:?}",
            bill_id,
            amount,
            allocation.applied,
            allocation.credit_before,
            allocation.credit_after,
            allocation.updated.len(),
            header.status
        );

        Ok(PaymentReceipt {
            bill_id,
            amount,
            applied: allocation.applied,
            credit_before: allocation.credit_before,
            credit_after: allocation.credit_after,
            outcomes: allocation.outcomes,
            bill: header,
        })
    }

    fn try_extra_payment(&self, bill_id: BillId, detail_id: DetailId, amount: Money) -> Result<(BillHeader, BillDetail)> {
        let mut header = self.repo.get_bill(bill_id)?;
        let open = self.repo.open_installments(bill_id)?;
        let first = earliest_payable(&open).ok_or(BillingError::NothingToPay { bill_id })?;
        check_hint(bill_id, detail_id, first, &open)?;

        let mut detail = first.clone();
        let unpaid = detail.unpaid();
        if amount > unpaid {
            return Err(BillingError::ExceedsBalance { amount, limit: unpaid });
        }
        if amount > header.remaining_amount {
            return Err(BillingError::ExceedsBalance { amount, limit: header.remaining_amount });
        }

        detail.paid_amount += amount;
        if detail.paid_amount >= detail.price {
            detail.status = DetailStatus::Paid;
        }
        header.paid_amount += amount;
        header.remaining_amount = (header.remaining_amount - amount).floor_zero();

        let version = self.repo.transaction(|tx| {
            tx.update_installments(std::slice::from_ref(&detail))?;
            let paid = tx.count_paid_installments(bill_id)?;
            header.apply_paid_count(paid);
            header.close_if_settled();
            tx.update_bill(&header)
        })?;
        header.version = version;

        log::info!(
            "bill={} extra payment {} on installment {} paid {}/{}",
            bill_id,
            amount,
            detail.installment_no,
            detail.paid_amount,
            detail.price
        );
        Ok((header, detail))
    }
}

fn ensure_positive(amount: Money) -> Result<()> {
    if !amount.is_positive() {
        return Err(BillingError::InvalidAmount {
            amount,
            reason: "payment must be greater than zero".to_string(),
        });
    }
    Ok(())
}

fn earliest_payable(open: &[BillDetail]) -> Option<&BillDetail> {
    open.iter().find(|d| d.unpaid().is_positive())
}

fn check_hint(bill_id: BillId, detail_id: DetailId, first: &BillDetail, open: &[BillDetail]) -> Result<()> {
    if !open.iter().any(|d| d.id == detail_id) {
        return Err(BillingError::InstallmentNotFound { bill_id, detail_id });
    }
    if first.id != detail_id {
        return Err(BillingError::InstallmentOutOfOrder { detail_id, expected: first.id });
    }
    Ok(())
}
