pub mod bill;
pub mod calendar;
pub mod config;
pub mod decimal;
pub mod errors;
pub mod interest;
pub mod jobs;
pub mod origination;
pub mod payments;
pub mod repository;
pub mod types;

// re-export key types
pub use bill::{BillDetail, BillHeader, NewInstallment, ShortCycleTerms};
pub use calendar::CivilCalendar;
pub use config::{EngineConfig, FineTable};
pub use decimal::{round_money, Money, Rate};
pub use errors::{BillingError, Result};
pub use interest::{
    BillingCycle, CycleInterestAccrual, LateFeeCalculator, RenewalEngine, RenewalOutcome,
    RenewalQuote,
};
pub use jobs::{LateFeeAccrualJob, LateFeeReport};
pub use origination::{MonthTermLoanRequest, Originator, ShortCycleLoanRequest, StandardBillRequest};
pub use payments::{InstallmentOutcome, PaymentAllocator, PaymentReceipt};
pub use repository::{
    BillRepository, BillTransaction, FineRateLookup, InMemoryBillRepository, SqliteBillRepository,
};
pub use types::{
    AllocationCase, BillId, BillKind, BillStatus, DetailId, DetailStatus, FeeCategory, TermType,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
