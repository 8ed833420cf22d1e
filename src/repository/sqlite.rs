//! SQLite adapter.
//!
//! Amounts are stored as decimal TEXT so no value ever passes through a
//! float; dates are ISO `YYYY-MM-DD` TEXT.

use chrono::NaiveDate;
use parking_lot::Mutex;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;

use crate::bill::{BillDetail, BillHeader, NewInstallment, ShortCycleTerms};
use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::types::{BillId, BillKind, BillStatus, DetailId, DetailStatus, FeeCategory, TermType};

use super::{BillRepository, BillTransaction, FineRateLookup};

const HEADER_COLUMNS: &str = "id, invoice, kind, principal, total_price, net_installment,
    total_installments, paid_installments, remaining_installments,
    paid_amount, remaining_amount, fee_amount, late_day, credit_balance, status,
    loan_amount, interest_amount, last_renew, next_due, term_type, term_value, renew_count,
    version";

/// header columns written by both insert and update, in bind order
const HEADER_FIELDS: [&str; 20] = [
    "invoice", "principal", "total_price", "net_installment", "total_installments",
    "paid_installments", "remaining_installments", "paid_amount", "remaining_amount",
    "fee_amount", "late_day", "credit_balance", "status", "loan_amount", "interest_amount",
    "last_renew", "next_due", "term_type", "term_value", "renew_count",
];

const DETAIL_COLUMNS: &str = "id, bill_id, installment_no, payment_no, price, paid_amount,
    fee_amount, credit_balance, due_date, status, interest_only";

pub struct SqliteBillRepository {
    conn: Mutex<Connection>,
}

impl SqliteBillRepository {
    /// open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// create tables and indexes
    pub fn migrate(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch(include_str!("../../migrations/001_billing.sql"))?;
        Ok(())
    }

    pub fn set_fine_rate(&self, category: FeeCategory, daily_rate: Money) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO fine_rate (category, daily_rate) VALUES (?1, ?2)
             ON CONFLICT(category) DO UPDATE SET daily_rate = excluded.daily_rate",
            params![category.code(), daily_rate.to_string()],
        )?;
        Ok(())
    }

    fn query_details(&self, sql_filter: &str, bill_id: BillId) -> Result<Vec<BillDetail>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM bill_detail WHERE bill_id = ?1 {} ORDER BY due_date ASC, id ASC",
            DETAIL_COLUMNS, sql_filter
        ))?;
        let rows = stmt.query_map(params![bill_id as i64], detail_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn query_ids(&self, sql: &str) -> Result<Vec<BillId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| Ok(row.get::<_, i64>(0)? as BillId))?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
    }
}

impl BillRepository for SqliteBillRepository {
    fn find_bill(&self, bill_id: BillId) -> Result<Option<BillHeader>> {
        let conn = self.conn.lock();
        let header = conn
            .query_row(
                &format!("SELECT {} FROM bill_header WHERE id = ?1", HEADER_COLUMNS),
                params![bill_id as i64],
                header_from_row,
            )
            .optional()?;
        Ok(header)
    }

    fn installments(&self, bill_id: BillId) -> Result<Vec<BillDetail>> {
        self.query_details("", bill_id)
    }

    fn open_installments(&self, bill_id: BillId) -> Result<Vec<BillDetail>> {
        self.query_details(&format!("AND status = {}", DetailStatus::Unpaid.code()), bill_id)
    }

    fn bills_with_open_installments(&self) -> Result<Vec<BillId>> {
        self.query_ids(&format!(
            "SELECT h.id FROM bill_header h
             WHERE h.status = {} AND EXISTS (
                 SELECT 1 FROM bill_detail d WHERE d.bill_id = h.id AND d.status = {}
             )
             ORDER BY h.id ASC",
            BillStatus::Active.code(),
            DetailStatus::Unpaid.code()
        ))
    }

    fn active_short_cycle_bills(&self) -> Result<Vec<BillId>> {
        self.query_ids(&format!(
            "SELECT id FROM bill_header WHERE status = {} AND kind = '{}' ORDER BY id ASC",
            BillStatus::Active.code(),
            BillKind::ShortCycle.as_str()
        ))
    }

    fn has_interest_charge_between(&self, bill_id: BillId, from: NaiveDate, to: NaiveDate) -> Result<bool> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM bill_detail
             WHERE bill_id = ?1 AND interest_only = 1 AND due_date BETWEEN ?2 AND ?3",
            params![bill_id as i64, from, to],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn transaction<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn BillTransaction) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let value = work(&mut SqliteTransaction { conn: &tx })?;
        tx.commit()?;
        Ok(value)
    }
}

impl FineRateLookup for SqliteBillRepository {
    fn daily_fine_rate(&self, category: FeeCategory) -> Result<Money> {
        let raw: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT daily_rate FROM fine_rate WHERE category = ?1",
                params![category.code()],
                |row| row.get(0),
            )
            .optional()?;
        let raw = raw.ok_or_else(|| BillingError::InvalidConfiguration {
            message: format!("no fine rate configured for {:?}", category),
        })?;
        Money::from_str_exact(&raw).map_err(|e| BillingError::CorruptRecord {
            message: format!("fine rate {:?}: {}", raw, e),
        })
    }
}

struct SqliteTransaction<'a> {
    conn: &'a Connection,
}

impl BillTransaction for SqliteTransaction<'_> {
    fn insert_bill(&mut self, header: &BillHeader) -> Result<BillId> {
        let placeholders: Vec<String> = (1..=HEADER_FIELDS.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO bill_header ({}, kind, version) VALUES ({}, ?{}, 0)",
            HEADER_FIELDS.join(", "),
            placeholders.join(", "),
            HEADER_FIELDS.len() + 1
        );
        let mut values = header_values(header);
        values.push(Value::Text(header.kind.as_str().to_string()));
        self.conn.execute(&sql, params_from_iter(values))?;
        Ok(self.conn.last_insert_rowid() as BillId)
    }

    fn update_bill(&mut self, header: &BillHeader) -> Result<u64> {
        let assignments: Vec<String> = HEADER_FIELDS
            .iter()
            .enumerate()
            .map(|(i, field)| format!("{} = ?{}", field, i + 1))
            .collect();
        let sql = format!(
            "UPDATE bill_header SET {}, version = version + 1 WHERE id = ?{} AND version = ?{}",
            assignments.join(", "),
            HEADER_FIELDS.len() + 1,
            HEADER_FIELDS.len() + 2
        );
        let mut values = header_values(header);
        values.push(Value::Integer(header.id as i64));
        values.push(Value::Integer(header.version as i64));
        if self.conn.execute(&sql, params_from_iter(values))? == 1 {
            return Ok(header.version + 1);
        }

        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT version FROM bill_header WHERE id = ?1",
                params![header.id as i64],
                |row| row.get(0),
            )
            .optional()?;
        match found {
            Some(found) => Err(BillingError::VersionConflict {
                bill_id: header.id,
                expected: header.version,
                found: found as u64,
            }),
            None => Err(BillingError::BillNotFound { bill_id: header.id }),
        }
    }

    fn update_installments(&mut self, details: &[BillDetail]) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "UPDATE bill_detail SET installment_no = ?1, payment_no = ?2, price = ?3, paid_amount = ?4,
                fee_amount = ?5, credit_balance = ?6, due_date = ?7, status = ?8, interest_only = ?9
             WHERE id = ?10 AND bill_id = ?11",
        )?;
        for detail in details {
            let changed = stmt.execute(params![
                detail.installment_no,
                detail.payment_no,
                detail.price.to_string(),
                detail.paid_amount.to_string(),
                detail.fee_amount.to_string(),
                detail.credit_balance.to_string(),
                detail.due_date,
                detail.status.code(),
                detail.interest_only,
                detail.id as i64,
                detail.bill_id as i64,
            ])?;
            if changed == 0 {
                return Err(BillingError::InstallmentNotFound {
                    bill_id: detail.bill_id,
                    detail_id: detail.id,
                });
            }
        }
        Ok(())
    }

    fn insert_installments(&mut self, bill_id: BillId, rows: &[NewInstallment]) -> Result<Vec<DetailId>> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO bill_detail (bill_id, installment_no, payment_no, price, paid_amount,
                fee_amount, credit_balance, due_date, status, interest_only)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, '0.00', ?7, ?8, ?9)",
        )?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let id = stmt.insert(params![
                bill_id as i64,
                row.installment_no,
                row.payment_no,
                row.price.to_string(),
                row.paid_amount.to_string(),
                row.fee_amount.to_string(),
                row.due_date,
                row.status.code(),
                row.interest_only,
            ])?;
            ids.push(id as DetailId);
        }
        Ok(ids)
    }

    fn count_paid_installments(&mut self, bill_id: BillId) -> Result<u32> {
        let count: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM bill_detail WHERE bill_id = ?1 AND status = ?2",
            params![bill_id as i64, DetailStatus::Paid.code()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn header_values(header: &BillHeader) -> Vec<Value> {
    let money = |m: Money| Value::Text(m.to_string());
    let count = |n: u32| Value::Integer(n as i64);
    let terms = header.short_cycle.as_ref();
    let optional = |value: Option<Value>| value.unwrap_or(Value::Null);
    vec![
        Value::Text(header.invoice.clone()),
        money(header.principal),
        money(header.total_price),
        money(header.net_installment),
        count(header.total_installments),
        count(header.paid_installments),
        count(header.remaining_installments),
        money(header.paid_amount),
        money(header.remaining_amount),
        money(header.fee_amount),
        count(header.late_day),
        money(header.credit_balance),
        Value::Integer(header.status.code()),
        optional(terms.map(|t| money(t.loan_amount))),
        optional(terms.map(|t| money(t.interest_amount))),
        optional(terms.map(|t| Value::Text(t.last_renew.to_string()))),
        optional(terms.map(|t| Value::Text(t.next_due.to_string()))),
        optional(terms.map(|t| Value::Integer(t.term_type.code()))),
        optional(terms.map(|t| count(t.term_value))),
        optional(terms.map(|t| count(t.renew_count))),
    ]
}

fn conversion_failure(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn money_at(row: &Row, idx: usize) -> rusqlite::Result<Money> {
    let raw: String = row.get(idx)?;
    Money::from_str_exact(&raw).map_err(|e| conversion_failure(idx, format!("amount {:?}: {}", raw, e)))
}

fn optional_money_at(row: &Row, idx: usize) -> rusqlite::Result<Option<Money>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => Money::from_str_exact(&raw)
            .map(Some)
            .map_err(|e| conversion_failure(idx, format!("amount {:?}: {}", raw, e))),
        None => Ok(None),
    }
}

fn required<T>(idx: usize, value: Option<T>) -> rusqlite::Result<T> {
    value.ok_or_else(|| conversion_failure(idx, "short-cycle column is null".to_string()))
}

fn header_from_row(row: &Row) -> rusqlite::Result<BillHeader> {
    let kind_raw: String = row.get(2)?;
    let kind = BillKind::parse(&kind_raw)
        .ok_or_else(|| conversion_failure(2, format!("bill kind {:?}", kind_raw)))?;
    let status_code: i64 = row.get(14)?;
    let status = BillStatus::from_code(status_code)
        .ok_or_else(|| conversion_failure(14, format!("bill status {}", status_code)))?;

    let short_cycle = match optional_money_at(row, 15)? {
        Some(loan_amount) => {
            let term_code: i64 = required(19, row.get(19)?)?;
            Some(ShortCycleTerms {
                loan_amount,
                interest_amount: required(16, optional_money_at(row, 16)?)?,
                last_renew: required(17, row.get(17)?)?,
                next_due: required(18, row.get(18)?)?,
                term_type: TermType::from_code(term_code)
                    .ok_or_else(|| conversion_failure(19, format!("term type {}", term_code)))?,
                term_value: required(20, row.get(20)?)?,
                renew_count: required(21, row.get(21)?)?,
            })
        }
        None => None,
    };

    Ok(BillHeader {
        id: row.get::<_, i64>(0)? as BillId,
        invoice: row.get(1)?,
        kind,
        principal: money_at(row, 3)?,
        total_price: money_at(row, 4)?,
        net_installment: money_at(row, 5)?,
        total_installments: row.get(6)?,
        paid_installments: row.get(7)?,
        remaining_installments: row.get(8)?,
        paid_amount: money_at(row, 9)?,
        remaining_amount: money_at(row, 10)?,
        fee_amount: money_at(row, 11)?,
        late_day: row.get(12)?,
        credit_balance: money_at(row, 13)?,
        status,
        short_cycle,
        version: row.get::<_, i64>(22)? as u64,
    })
}

fn detail_from_row(row: &Row) -> rusqlite::Result<BillDetail> {
    let status_code: i64 = row.get(9)?;
    Ok(BillDetail {
        id: row.get::<_, i64>(0)? as DetailId,
        bill_id: row.get::<_, i64>(1)? as BillId,
        installment_no: row.get(2)?,
        payment_no: row.get(3)?,
        price: money_at(row, 4)?,
        paid_amount: money_at(row, 5)?,
        fee_amount: money_at(row, 6)?,
        credit_balance: money_at(row, 7)?,
        due_date: row.get(8)?,
        status: DetailStatus::from_code(status_code)
            .ok_or_else(|| conversion_failure(9, format!("installment status {}", status_code)))?,
        interest_only: row.get(10)?,
    })
}
