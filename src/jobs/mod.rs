pub mod late_fee;

pub use late_fee::{BillFeeOutcome, LateFeeAccrualJob, LateFeeReport};
