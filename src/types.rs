use serde::{Deserialize, Serialize};
use std::fmt;

/// unique identifier for a bill header
pub type BillId = u64;

/// unique identifier for an installment line
pub type DetailId = u64;

/// bill status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillStatus {
    /// created but not yet in force
    Draft,
    /// open, installments still owed
    Active,
    /// fully paid off
    Closed,
}

impl BillStatus {
    pub fn code(&self) -> i64 {
        match self {
            BillStatus::Draft => 0,
            BillStatus::Active => 1,
            BillStatus::Closed => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(BillStatus::Draft),
            1 => Some(BillStatus::Active),
            2 => Some(BillStatus::Closed),
            _ => None,
        }
    }
}

/// installment line status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetailStatus {
    Unpaid,
    Paid,
    /// closed by a renewal, kept as a receipt
    Superseded,
}

impl DetailStatus {
    pub fn code(&self) -> i64 {
        match self {
            DetailStatus::Unpaid => 0,
            DetailStatus::Paid => 1,
            DetailStatus::Superseded => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(DetailStatus::Unpaid),
            1 => Some(DetailStatus::Paid),
            2 => Some(DetailStatus::Superseded),
            _ => None,
        }
    }
}

/// kind of contract a bill represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillKind {
    /// monthly installment purchase
    Standard,
    /// interest-only pawn-style loan renewed every billing cycle
    ShortCycle,
    /// collateral loan repaid in monthly installments
    TermLoan,
}

impl BillKind {
    /// fine category the bill's late fees are charged under
    pub fn fee_category(&self) -> FeeCategory {
        match self {
            BillKind::Standard => FeeCategory::Standard,
            // collateral loans share one fine category whatever their term
            BillKind::ShortCycle | BillKind::TermLoan => FeeCategory::ShortCycle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BillKind::Standard => "standard",
            BillKind::ShortCycle => "short_cycle",
            BillKind::TermLoan => "term_loan",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(BillKind::Standard),
            "short_cycle" => Some(BillKind::ShortCycle),
            "term_loan" => Some(BillKind::TermLoan),
            _ => None,
        }
    }
}

/// unit of a collateral loan's term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermType {
    /// one installment per billing cycle of `term_value` days, renewed by paying interest
    Days,
    /// `term_value` monthly installments
    Months,
}

impl TermType {
    pub fn code(&self) -> i64 {
        match self {
            TermType::Days => 1,
            TermType::Months => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(TermType::Days),
            2 => Some(TermType::Months),
            _ => None,
        }
    }
}

/// fine configuration category, keyed by bill type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeCategory {
    Standard,
    ShortCycle,
}

impl FeeCategory {
    pub fn code(&self) -> i64 {
        match self {
            FeeCategory::Standard => 1,
            FeeCategory::ShortCycle => 2,
        }
    }
}

/// which waterfall branch closed (or stopped at) an installment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationCase {
    /// payment alone matched the unpaid amount exactly
    A,
    /// payment plus credit exceeded the unpaid amount, excess carried as credit
    B,
    /// payment short, carried credit made up exactly the rest
    C,
    /// payment and credit together fell short, installment left open
    D,
}

impl fmt::Display for AllocationCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            AllocationCase::A => "A",
            AllocationCase::B => "B",
            AllocationCase::C => "C",
            AllocationCase::D => "D",
        };
        write!(f, "{}", tag)
    }
}
