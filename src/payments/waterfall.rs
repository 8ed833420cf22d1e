use serde::{Deserialize, Serialize};

use crate::bill::BillDetail;
use crate::decimal::Money;
use crate::types::{AllocationCase, DetailId, DetailStatus};

/// audit record for one installment touched by a payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentOutcome {
    pub installment_no: u32,
    pub detail_id: DetailId,
    pub case: AllocationCase,
    pub message: String,
    /// carried credit after this installment
    pub credit_left: Money,
    /// paid amount on the line after allocation
    pub paid_amount: Money,
    pub closed: bool,
}

/// result of running funds through a bill's open installments
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub outcomes: Vec<InstallmentOutcome>,
    /// installments whose paid amount or status changed
    pub updated: Vec<BillDetail>,
    /// total added to installment paid amounts
    pub applied: Money,
    pub credit_before: Money,
    pub credit_after: Money,
}

/// Allocate a payment plus carried credit across installments in the order given.
///
/// Installments close earliest first. The case follows payment plus credit:
/// more than the unpaid amount is B, exactly the unpaid amount is A when the
/// payment alone covers it and C when credit is drawn, less is D. Each closed
/// line takes exactly its unpaid amount; leftover funds come back as carried
/// credit, so `credit_after == credit_before + payment - applied` always
/// holds. The first installment the funds cannot cover stays open and stops
/// the run.
pub fn allocate(installments: &[BillDetail], payment: Money, credit: Money) -> Allocation {
    let credit_before = credit;
    let mut remaining = payment;
    let mut credit = credit;
    let mut applied = Money::ZERO;
    let mut outcomes = Vec::new();
    let mut updated = Vec::new();

    for installment in installments.iter().filter(|d| d.is_open()) {
        let unpaid = installment.unpaid();
        if !unpaid.is_positive() {
            continue;
        }
        if !remaining.is_positive() && !credit.is_positive() {
            break;
        }

        let available = remaining + credit;
        if available < unpaid {
            // underfunded: hold everything as credit and stop here
            credit = available;
            remaining = Money::ZERO;
            outcomes.push(InstallmentOutcome {
                installment_no: installment.installment_no,
                detail_id: installment.id,
                case: AllocationCase::D,
                message: format!(
                    "installment {} needs {}, only {} available; held as credit",
                    installment.installment_no, unpaid, available
                ),
                credit_left: credit,
                paid_amount: installment.paid_amount,
                closed: false,
            });
            break;
        }

        let (case, message) = if available > unpaid {
            credit = available - unpaid;
            remaining = Money::ZERO;
            (AllocationCase::B, format!("overpaid, credit carried {}", credit))
        } else if remaining == unpaid {
            remaining = Money::ZERO;
            (AllocationCase::A, format!("paid exactly, installment {} closed", installment.installment_no))
        } else {
            // payment short, credit makes up exactly the rest
            credit = Money::ZERO;
            remaining = Money::ZERO;
            (AllocationCase::C, format!("credit used to close installment {}", installment.installment_no))
        };

        let mut closed = installment.clone();
        closed.paid_amount = closed.price;
        closed.status = DetailStatus::Paid;
        closed.credit_balance = if case == AllocationCase::B { credit } else { Money::ZERO };
        applied += unpaid;

        outcomes.push(InstallmentOutcome {
            installment_no: closed.installment_no,
            detail_id: closed.id,
            case,
            message,
            credit_left: credit,
            paid_amount: closed.paid_amount,
            closed: true,
        });
        updated.push(closed);
    }

    // funds left after the last open installment are carried too
    credit += remaining;

    Allocation {
        outcomes,
        updated,
        applied,
        credit_before,
        credit_after: credit,
    }
}
