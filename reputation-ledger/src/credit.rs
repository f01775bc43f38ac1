//! Credit rules
//!
//! Reservation: raising a question's priority costs the difference between the
//! requested and the already reserved level; lowering it is free and refunds
//! nothing. Redistribution: closing a question hands each answer's vote count
//! to its author as credits.

use crate::types::{Answer, UserId};
use crate::{Error, Result};

/// Credits charged when moving from `previously_reserved` to `requested`
pub fn reservation_charge(requested: i64, previously_reserved: i64) -> i64 {
    requested.saturating_sub(previously_reserved).max(0)
}

/// Validate a reservation against the owner's balance and return the charge
pub fn reserve(requested: i64, previously_reserved: i64, available: i64) -> Result<i64> {
    if requested < 0 {
        return Err(Error::Validation {
            field: "priority_level",
            message: "Priority level must be a number not greater than your credits".to_string(),
        });
    }

    let charge = reservation_charge(requested, previously_reserved);
    if charge > available {
        return Err(Error::InsufficientCredits {
            requested: charge,
            available,
        });
    }

    Ok(charge)
}

/// Sum vote counts per author, keeping first-seen author order
///
/// Each answer is visited exactly once. Authors with several answers get a
/// single entry so the caller writes each user row once.
pub fn close_payouts(answers: &[Answer]) -> Vec<(UserId, i64)> {
    let mut payouts: Vec<(UserId, i64)> = Vec::new();

    for answer in answers {
        match payouts.iter_mut().find(|(author, _)| *author == answer.author) {
            Some((_, earned)) => *earned += answer.votes,
            None => payouts.push((answer.author, answer.votes)),
        }
    }

    payouts
}

/// Apply a signed payout to a balance without going below zero
///
/// Returns `(applied, new_balance)`.
pub fn apply_payout(credits: i64, earned: i64) -> (i64, i64) {
    let new_balance = credits.saturating_add(earned).max(0);
    (new_balance - credits, new_balance)
}
