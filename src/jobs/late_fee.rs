use chrono::NaiveDate;
use crossbeam::{channel, thread};
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::calendar::CivilCalendar;
use crate::config::{EngineConfig, LateFeeConfig};
use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::interest::penalty::LateFeeCalculator;
use crate::repository::{retry_on_conflict, BillRepository, FineRateLookup};
use crate::types::BillId;

/// what one bill's fee recomputation changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillFeeOutcome {
    pub bill_id: BillId,
    pub installments_updated: usize,
    /// header fee total after the run
    pub fee_amount: Money,
    pub late_day: u32,
    pub changed: bool,
}

impl BillFeeOutcome {
    fn unchanged(bill_id: BillId, fee_amount: Money, late_day: u32) -> Self {
        Self {
            bill_id,
            installments_updated: 0,
            fee_amount,
            late_day,
            changed: false,
        }
    }
}

/// summary of one batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LateFeeReport {
    pub run_id: Uuid,
    pub as_of: NaiveDate,
    pub bills_scanned: usize,
    pub bills_updated: usize,
    pub installments_updated: usize,
    /// bills skipped after an error, with the reason
    pub failures: Vec<(BillId, String)>,
}

/// Nightly late-fee recomputation.
///
/// Fees on every open installment are rebuilt from the due date and the
/// fine table each run, never added on top of last night's, so a second
/// run on the same day writes nothing.
pub struct LateFeeAccrualJob<R: BillRepository, F: FineRateLookup> {
    repo: Arc<R>,
    fines: Arc<F>,
    config: LateFeeConfig,
    calendar: CivilCalendar,
}

impl<R: BillRepository, F: FineRateLookup> LateFeeAccrualJob<R, F> {
    pub fn new(repo: Arc<R>, fines: Arc<F>, config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            repo,
            fines,
            config: config.late_fee.clone(),
            calendar: CivilCalendar::new(&config.calendar)?,
        })
    }

    /// run the batch for the current civil day
    pub fn run(&self, time_provider: &SafeTimeProvider) -> Result<LateFeeReport> {
        self.run_for(self.calendar.today(time_provider))
    }

    /// Run the batch as of `today`.
    ///
    /// Only enumerating the bills can fail the run; a failing bill is
    /// logged, listed in the report and skipped.
    pub fn run_for(&self, today: NaiveDate) -> Result<LateFeeReport> {
        let run_id = Uuid::new_v4();
        let bill_ids = self.repo.bills_with_open_installments()?;
        log::info!("late fee run {} as of {}: {} bills", run_id, today, bill_ids.len());

        let (work_tx, work_rx) = channel::bounded(bill_ids.len().max(1));
        for bill_id in &bill_ids {
            work_tx.send(*bill_id).map_err(|e| BillingError::CalculationError {
                message: format!("cannot queue bill {}: {}", e.0, e),
            })?;
        }
        // closed and pre-filled: workers stop once it drains
        drop(work_tx);

        let (result_tx, result_rx) = channel::unbounded();
        let workers = self.config.workers.clamp(1, bill_ids.len().max(1));

        thread::scope(|scope| {
            for worker in 0..workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move |_| {
                    let mut handled = 0usize;
                    for bill_id in work_rx.iter() {
                        let outcome = self.apply_to_bill(bill_id, today).map_err(|e| e.to_string());
                        handled += 1;
                        if result_tx.send((bill_id, outcome)).is_err() {
                            break;
                        }
                    }
                    log::debug!("late fee worker {} done after {} bills", worker, handled);
                });
            }
        })
        .map_err(|_| BillingError::CalculationError {
            message: format!("late fee run {} lost a worker", run_id),
        })?;
        drop(result_tx);

        let mut report = LateFeeReport {
            run_id,
            as_of: today,
            bills_scanned: bill_ids.len(),
            bills_updated: 0,
            installments_updated: 0,
            failures: Vec::new(),
        };
        for (bill_id, outcome) in result_rx {
            match outcome {
                Ok(outcome) if outcome.changed => {
                    report.bills_updated += 1;
                    report.installments_updated += outcome.installments_updated;
                }
                Ok(_) => {}
                Err(message) => {
                    log::error!("bill={} late fee skipped: {}", bill_id, message);
                    report.failures.push((bill_id, message));
                }
            }
        }
        report.failures.sort_by_key(|(bill_id, _)| *bill_id);

        log::info!(
            "late fee run {} finished: {} scanned, {} bills and {} installments updated, {} failed",
            run_id,
            report.bills_scanned,
            report.bills_updated,
            report.installments_updated,
            report.failures.len()
        );
        Ok(report)
    }

    /// recompute one bill's fees as of `today`, retrying on concurrent updates
    pub fn apply_to_bill(&self, bill_id: BillId, today: NaiveDate) -> Result<BillFeeOutcome> {
        retry_on_conflict(bill_id, self.config.max_conflict_retries, || self.recompute(bill_id, today))
    }

    fn recompute(&self, bill_id: BillId, today: NaiveDate) -> Result<BillFeeOutcome> {
        let mut header = self.repo.get_bill(bill_id)?;
        if !header.is_active() {
            return Ok(BillFeeOutcome::unchanged(bill_id, header.fee_amount, header.late_day));
        }

        let daily_rate = self.fines.daily_fine_rate(header.kind.fee_category())?;
        let calculator = LateFeeCalculator::new(self.config.grace_days_for(header.kind), daily_rate);

        let mut changed = Vec::new();
        let mut fee_delta = Money::ZERO;
        let mut late_day: u32 = 0;
        for mut detail in self.repo.open_installments(bill_id)? {
            let fine = calculator.calculate(detail.due_date, today);
            late_day = late_day.max(fine.late_days);
            if fine.fee_amount == detail.fee_amount {
                continue;
            }
            // reverse the previous fee before charging the new one
            fee_delta += fine.fee_amount - detail.fee_amount;
            detail.price = detail.price - detail.fee_amount + fine.fee_amount;
            detail.fee_amount = fine.fee_amount;
            changed.push(detail);
        }

        if changed.is_empty() && header.late_day == late_day {
            return Ok(BillFeeOutcome::unchanged(bill_id, header.fee_amount, header.late_day));
        }

        header.fee_amount = (header.fee_amount + fee_delta).floor_zero();
        header.remaining_amount = (header.remaining_amount + fee_delta).floor_zero();
        header.late_day = late_day;

        self.repo.transaction(|tx| {
            tx.update_installments(&changed)?;
            tx.update_bill(&header)
        })?;

        log::debug!(
            "bill={} fees {} (delta {}), late {} days, {} installments",
            bill_id,
            header.fee_amount,
            fee_delta,
            late_day,
            changed.len()
        );
        Ok(BillFeeOutcome {
            bill_id,
            installments_updated: changed.len(),
            fee_amount: header.fee_amount,
            late_day,
            changed: true,
        })
    }
}
