//! Vote state machine
//!
//! Decides, for one (answer, voter) pair, how an up/down request changes the
//! stored vote and which delta flows into the answer aggregate and the
//! author's points.
//!
//! | existing | request | new | delta |
//! |----------|---------|-----|-------|
//! | none     | up      | +1  | +1    |
//! | none     | down    | -1  | -1    |
//! | +1       | up      |  -  | conflict |
//! | +1       | down    | -1  | -2    |
//! | -1       | down    |  -  | conflict |
//! | -1       | up      | +1  | +2    |

use crate::types::{VoteDirection, VoteValue};
use crate::{Error, Result};

/// Accepted transition for one vote request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteTransition {
    /// Value stored before the request
    pub previous: Option<VoteValue>,
    /// Value to store
    pub next: VoteValue,
    /// `next - previous`, with a missing vote counting as 0
    pub delta: i64,
}

impl VoteTransition {
    /// Compute the transition, rejecting a request that repeats the stored direction
    pub fn compute(previous: Option<VoteValue>, direction: VoteDirection) -> Result<Self> {
        let next = VoteValue::from(direction);

        if previous == Some(next) {
            let msg = match direction {
                VoteDirection::Up => "You already upvoted this answer",
                VoteDirection::Down => "You already downvoted this answer",
            };
            return Err(Error::Conflict(msg.to_string()));
        }

        let delta = next.as_i64() - previous.map_or(0, VoteValue::as_i64);

        Ok(Self {
            previous,
            next,
            delta,
        })
    }

    /// True when an existing vote row is flipped rather than created
    pub fn is_flip(&self) -> bool {
        self.previous.is_some()
    }
}
