use chrono::NaiveDate;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::bill::{sort_for_allocation, BillDetail, BillHeader, NewInstallment};
use crate::errors::{BillingError, Result};
use crate::types::{BillId, BillKind, DetailId, DetailStatus};

use super::{BillRepository, BillTransaction};

#[derive(Debug, Default)]
struct Tables {
    bills: BTreeMap<BillId, BillHeader>,
    details: BTreeMap<DetailId, BillDetail>,
    /// detail ids per bill, in insertion order
    details_by_bill: BTreeMap<BillId, Vec<DetailId>>,
    next_bill_id: BillId,
    next_detail_id: DetailId,
}

impl Tables {
    fn bill_details(&self, bill_id: BillId) -> impl Iterator<Item = &BillDetail> + '_ {
        self.details_by_bill
            .get(&bill_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.details.get(id))
    }

    fn details_of(&self, bill_id: BillId, open_only: bool) -> Vec<BillDetail> {
        let mut rows: Vec<BillDetail> = self
            .bill_details(bill_id)
            .filter(|d| !open_only || d.is_open())
            .cloned()
            .collect();
        sort_for_allocation(&mut rows);
        rows
    }

    fn apply(&mut self, changes: Changes) {
        for (id, header) in changes.bills {
            self.bills.insert(id, header);
        }
        for (id, detail) in changes.details {
            if !self.details.contains_key(&id) {
                self.details_by_bill.entry(detail.bill_id).or_default().push(id);
            }
            self.details.insert(id, detail);
        }
        self.next_bill_id = changes.next_bill_id;
        self.next_detail_id = changes.next_detail_id;
    }
}

/// rows written by one transaction, keyed by id
#[derive(Debug, Default)]
struct Changes {
    bills: BTreeMap<BillId, BillHeader>,
    details: BTreeMap<DetailId, BillDetail>,
    /// detail ids inserted by this transaction, per bill
    inserted: BTreeMap<BillId, Vec<DetailId>>,
    next_bill_id: BillId,
    next_detail_id: DetailId,
}

/// In-memory bill store.
///
/// A transaction holds the write lock and stages only the rows it writes;
/// they are applied to the tables when the closure succeeds.
#[derive(Debug, Default)]
pub struct InMemoryBillRepository {
    tables: RwLock<Tables>,
}

impl InMemoryBillRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BillRepository for InMemoryBillRepository {
    fn find_bill(&self, bill_id: BillId) -> Result<Option<BillHeader>> {
        Ok(self.tables.read().bills.get(&bill_id).cloned())
    }

    fn installments(&self, bill_id: BillId) -> Result<Vec<BillDetail>> {
        Ok(self.tables.read().details_of(bill_id, false))
    }

    fn open_installments(&self, bill_id: BillId) -> Result<Vec<BillDetail>> {
        Ok(self.tables.read().details_of(bill_id, true))
    }

    fn bills_with_open_installments(&self) -> Result<Vec<BillId>> {
        let tables = self.tables.read();
        let ids = tables
            .bills
            .values()
            .filter(|b| b.is_active())
            .filter(|b| tables.bill_details(b.id).any(BillDetail::is_open))
            .map(|b| b.id)
            .collect();
        Ok(ids)
    }

    fn active_short_cycle_bills(&self) -> Result<Vec<BillId>> {
        let tables = self.tables.read();
        Ok(tables
            .bills
            .values()
            .filter(|b| b.is_active() && b.kind == BillKind::ShortCycle)
            .map(|b| b.id)
            .collect())
    }

    fn has_interest_charge_between(&self, bill_id: BillId, from: NaiveDate, to: NaiveDate) -> Result<bool> {
        let tables = self.tables.read();
        let found = tables
            .bill_details(bill_id)
            .any(|d| d.interest_only && d.due_date >= from && d.due_date <= to);
        Ok(found)
    }

    fn transaction<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn BillTransaction) -> Result<T>,
    {
        let mut live = self.tables.write();
        let mut staged = MemoryTransaction {
            changes: Changes {
                next_bill_id: live.next_bill_id,
                next_detail_id: live.next_detail_id,
                ..Default::default()
            },
            tables: &*live,
        };
        let value = work(&mut staged)?;
        let changes = staged.changes;
        live.apply(changes);
        Ok(value)
    }
}

struct MemoryTransaction<'a> {
    tables: &'a Tables,
    changes: Changes,
}

impl MemoryTransaction<'_> {
    fn bill(&self, bill_id: BillId) -> Option<&BillHeader> {
        self.changes.bills.get(&bill_id).or_else(|| self.tables.bills.get(&bill_id))
    }

    fn detail(&self, detail_id: DetailId) -> Option<&BillDetail> {
        self.changes
            .details
            .get(&detail_id)
            .or_else(|| self.tables.details.get(&detail_id))
    }
}

impl BillTransaction for MemoryTransaction<'_> {
    fn insert_bill(&mut self, header: &BillHeader) -> Result<BillId> {
        self.changes.next_bill_id += 1;
        let id = self.changes.next_bill_id;
        let mut stored = header.clone();
        stored.id = id;
        stored.version = 0;
        self.changes.bills.insert(id, stored);
        Ok(id)
    }

    fn update_bill(&mut self, header: &BillHeader) -> Result<u64> {
        let found = self
            .bill(header.id)
            .map(|stored| stored.version)
            .ok_or(BillingError::BillNotFound { bill_id: header.id })?;
        if found != header.version {
            return Err(BillingError::VersionConflict {
                bill_id: header.id,
                expected: header.version,
                found,
            });
        }
        let mut stored = header.clone();
        stored.version += 1;
        let version = stored.version;
        self.changes.bills.insert(header.id, stored);
        Ok(version)
    }

    fn update_installments(&mut self, details: &[BillDetail]) -> Result<()> {
        for detail in details {
            match self.detail(detail.id) {
                Some(stored) if stored.bill_id == detail.bill_id => {
                    self.changes.details.insert(detail.id, detail.clone());
                }
                _ => {
                    return Err(BillingError::InstallmentNotFound {
                        bill_id: detail.bill_id,
                        detail_id: detail.id,
                    })
                }
            }
        }
        Ok(())
    }

    fn insert_installments(&mut self, bill_id: BillId, rows: &[NewInstallment]) -> Result<Vec<DetailId>> {
        if self.bill(bill_id).is_none() {
            return Err(BillingError::BillNotFound { bill_id });
        }
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            self.changes.next_detail_id += 1;
            let id = self.changes.next_detail_id;
            self.changes.details.insert(id, row.clone().into_detail(id, bill_id));
            self.changes.inserted.entry(bill_id).or_default().push(id);
            ids.push(id);
        }
        Ok(ids)
    }

    fn count_paid_installments(&mut self, bill_id: BillId) -> Result<u32> {
        let stored = self.tables.details_by_bill.get(&bill_id).into_iter().flatten();
        let inserted = self.changes.inserted.get(&bill_id).into_iter().flatten();
        let count = stored
            .chain(inserted)
            .filter_map(|id| self.detail(*id))
            .filter(|d| d.status == DetailStatus::Paid)
            .count();
        Ok(count as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::super::contract;
    use super::*;

    #[test]
    fn test_ordering_and_lookup() {
        contract::ordering_and_lookup(&InMemoryBillRepository::new());
    }

    #[test]
    fn test_version_conflict() {
        contract::version_conflict(&InMemoryBillRepository::new());
    }

    #[test]
    fn test_rollback_on_error() {
        contract::rollback_on_error(&InMemoryBillRepository::new());
    }

    #[test]
    fn test_writes_visible_within_transaction() {
        contract::writes_visible_within_transaction(&InMemoryBillRepository::new());
    }

    #[test]
    fn test_interest_window() {
        contract::interest_window(&InMemoryBillRepository::new());
    }
}
