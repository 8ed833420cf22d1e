pub mod accrual;
pub mod cycle;
pub mod penalty;
pub mod renewal;

pub use accrual::{AccrualSummary, CycleInterestAccrual};
pub use cycle::BillingCycle;
pub use penalty::{LateFeeCalculation, LateFeeCalculator, LateFeeTerms};
pub use renewal::{RenewalEngine, RenewalOutcome, RenewalQuote};
