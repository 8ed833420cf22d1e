pub mod memory;
pub mod sqlite;

use chrono::NaiveDate;

use crate::bill::{BillDetail, BillHeader, NewInstallment};
use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::types::{BillId, DetailId, FeeCategory};

pub use memory::InMemoryBillRepository;
pub use sqlite::SqliteBillRepository;

/// Read side of bill storage, plus the entry point for atomic writes.
///
/// Installment lists are always returned in allocation order: due date
/// ascending, then id ascending.
pub trait BillRepository: Send + Sync {
    fn find_bill(&self, bill_id: BillId) -> Result<Option<BillHeader>>;

    fn get_bill(&self, bill_id: BillId) -> Result<BillHeader> {
        self.find_bill(bill_id)?
            .ok_or(BillingError::BillNotFound { bill_id })
    }

    /// every installment of the bill, whatever its status
    fn installments(&self, bill_id: BillId) -> Result<Vec<BillDetail>>;

    /// unpaid installments only
    fn open_installments(&self, bill_id: BillId) -> Result<Vec<BillDetail>>;

    /// active bills with at least one unpaid installment
    fn bills_with_open_installments(&self) -> Result<Vec<BillId>>;

    /// active short-cycle loans
    fn active_short_cycle_bills(&self) -> Result<Vec<BillId>>;

    /// whether an interest-only charge is due within `[from, to]`
    fn has_interest_charge_between(&self, bill_id: BillId, from: NaiveDate, to: NaiveDate) -> Result<bool>;

    /// Run `work` as one unit: every write it makes is committed together
    /// when it returns `Ok`, and none are when it returns `Err`.
    ///
    /// The closure must not call back into the repository; adapters hold
    /// their lock for the whole unit.
    fn transaction<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn BillTransaction) -> Result<T>;
}

/// writes available inside [`BillRepository::transaction`]
pub trait BillTransaction {
    /// store a new header and return its id; the stored version starts at 0
    fn insert_bill(&mut self, header: &BillHeader) -> Result<BillId>;

    /// Overwrite a header if nobody committed since it was read.
    ///
    /// Fails with `VersionConflict` when the stored version differs from
    /// `header.version`; otherwise stores the header and returns the new version.
    fn update_bill(&mut self, header: &BillHeader) -> Result<u64>;

    fn update_installments(&mut self, details: &[BillDetail]) -> Result<()>;

    fn insert_installments(&mut self, bill_id: BillId, rows: &[NewInstallment]) -> Result<Vec<DetailId>>;

    /// installments with status PAID, as seen by this transaction
    fn count_paid_installments(&mut self, bill_id: BillId) -> Result<u32>;
}

/// daily fine rate per fee category
pub trait FineRateLookup: Send + Sync {
    fn daily_fine_rate(&self, category: FeeCategory) -> Result<Money>;
}

/// Re-run `op` after a version conflict, at most `retries` more times.
///
/// `op` must reload whatever it reads, so each attempt starts from committed state.
pub fn retry_on_conflict<T>(bill_id: BillId, retries: u32, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if e.is_conflict() && attempt < retries => {
                attempt += 1;
                log::warn!("bill={} modified concurrently, retrying ({}/{})", bill_id, attempt, retries);
            }
            other => return other,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::contract::seed_bill;
    use super::*;
    use crate::bill::fixtures::date;
    use std::cell::Cell;

    #[test]
    fn test_retry_reloads_after_stale_commit() {
        let repo = InMemoryBillRepository::new();
        let bill_id = seed_bill(&repo, &[(1, date(2024, 1, 1))]);
        let attempts = Cell::new(0);

        let version = retry_on_conflict(bill_id, 3, || {
            attempts.set(attempts.get() + 1);
            let mut header = repo.get_bill(bill_id)?;
            if attempts.get() == 1 {
                // another writer commits between this read and the write
                let mut other = header.clone();
                other.late_day = 7;
                repo.transaction(|tx| tx.update_bill(&other))?;
            }
            header.fee_amount += Money::from_major(10);
            repo.transaction(|tx| tx.update_bill(&header))
        })
        .unwrap();

        assert_eq!(attempts.get(), 2);
        assert_eq!(version, 2);
        let header = repo.get_bill(bill_id).unwrap();
        assert_eq!(header.fee_amount, Money::from_major(10));
        assert_eq!(header.late_day, 7);
    }

    #[test]
    fn test_retry_gives_up_after_limit() {
        let attempts = Cell::new(0);
        let err = retry_on_conflict(9, 2, || -> Result<()> {
            attempts.set(attempts.get() + 1);
            Err(BillingError::VersionConflict { bill_id: 9, expected: 0, found: 1 })
        })
        .unwrap_err();

        assert_eq!(attempts.get(), 3);
        assert!(matches!(err, BillingError::VersionConflict { bill_id: 9, .. }));
    }

    #[test]
    fn test_retry_leaves_other_errors_alone() {
        let attempts = Cell::new(0);
        let err = retry_on_conflict(9, 5, || -> Result<()> {
            attempts.set(attempts.get() + 1);
            Err(BillingError::BillNotFound { bill_id: 9 })
        })
        .unwrap_err();

        assert_eq!(attempts.get(), 1);
        assert!(matches!(err, BillingError::BillNotFound { bill_id: 9 }));
    }
}
