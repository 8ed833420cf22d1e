use chrono::NaiveDate;
use thiserror::Error;

use crate::decimal::Money;
use crate::types::{BillId, DetailId};

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("bill not found: {bill_id}")]
    BillNotFound {
        bill_id: BillId,
    },

    #[error("installment {detail_id} not found among open installments of bill {bill_id}")]
    InstallmentNotFound {
        bill_id: BillId,
        detail_id: DetailId,
    },

    #[error("bill {bill_id} has no unpaid installments")]
    NothingToPay {
        bill_id: BillId,
    },

    #[error("invalid payment amount: {amount} ({reason})")]
    InvalidAmount {
        amount: Money,
        reason: String,
    },

    #[error("payment {amount} exceeds remaining balance plus credit {limit}")]
    ExceedsBalance {
        amount: Money,
        limit: Money,
    },

    #[error("payment {provided} does not match amount due {required}")]
    AmountMismatch {
        required: Money,
        provided: Money,
    },

    #[error("bill {bill_id} already renewed for the cycle {window_start} to {window_end}")]
    AlreadyRenewed {
        bill_id: BillId,
        window_start: NaiveDate,
        window_end: NaiveDate,
    },

    #[error("bill {bill_id} is not a short-cycle loan")]
    NotShortCycle {
        bill_id: BillId,
    },

    #[error("installment {detail_id} is not the earliest open installment (expected {expected})")]
    InstallmentOutOfOrder {
        detail_id: DetailId,
        expected: DetailId,
    },

    #[error("bill {bill_id} was modified concurrently: expected version {expected}, found {found}")]
    VersionConflict {
        bill_id: BillId,
        expected: u64,
        found: u64,
    },

    #[error("persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("stored data is corrupt: {message}")]
    CorruptRecord {
        message: String,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },

    #[error("calculation error: {message}")]
    CalculationError {
        message: String,
    },
}

impl BillingError {
    /// errors that are safe to retry after reloading the bill
    pub fn is_conflict(&self) -> bool {
        matches!(self, BillingError::VersionConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, BillingError>;
