//! Core types for the ledger
//!
//! Rows are plain serde structs persisted with bincode. Identifiers are
//! UUIDv7 newtypes so that key order follows creation order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! row_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new time-ordered ID
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Wrap an existing UUID
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Big-endian key bytes
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// User identifier
    UserId
);
row_id!(
    /// Question identifier
    QuestionId
);
row_id!(
    /// Answer identifier
    AnswerId
);

/// Registered user with reputation and spendable balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User ID
    pub user_id: UserId,

    /// Display name
    pub display_name: String,

    /// Cumulative reputation (signed, unbounded)
    pub points: i64,

    /// Spendable balance, never negative
    pub credits: i64,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Points and credits snapshot
    pub fn balance(&self) -> Balance {
        Balance {
            user_id: self.user_id,
            points: self.points,
            credits: self.credits,
        }
    }
}

/// Question funded with credits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Question ID
    pub question_id: QuestionId,

    /// Owning user
    pub owner: UserId,

    /// Title
    pub title: String,

    /// Body
    pub body: String,

    /// Credits committed to this question's priority
    pub priority_level: i64,

    /// Terminal once true
    pub closed: bool,

    /// Last time an answer was posted
    pub responded_at: DateTime<Utc>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

/// Answer to a question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// Answer ID
    pub answer_id: AnswerId,

    /// Question this answer belongs to
    pub question_id: QuestionId,

    /// Author
    pub author: UserId,

    /// Body
    pub body: String,

    /// Aggregate of all vote values on this answer
    pub votes: i64,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

/// Requested vote direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteDirection {
    /// Upvote
    Up,
    /// Downvote
    Down,
}

impl VoteDirection {
    /// Metric/log label
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteDirection::Up => "up",
            VoteDirection::Down => "down",
        }
    }
}

impl fmt::Display for VoteDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored vote value; there is no neutral state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i8)]
pub enum VoteValue {
    /// +1
    Up = 1,
    /// -1
    Down = -1,
}

impl VoteValue {
    /// Signed value
    pub fn as_i64(self) -> i64 {
        self as i8 as i64
    }
}

impl From<VoteDirection> for VoteValue {
    fn from(direction: VoteDirection) -> Self {
        match direction {
            VoteDirection::Up => VoteValue::Up,
            VoteDirection::Down => VoteValue::Down,
        }
    }
}

/// One user's judgment of one answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Answer voted on
    pub answer_id: AnswerId,

    /// Voter
    pub voter: UserId,

    /// Current value
    pub val: VoteValue,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

/// Points and credits of one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// User ID
    pub user_id: UserId,
    /// Reputation
    pub points: i64,
    /// Spendable credits
    pub credits: i64,
}

/// Input for question creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQuestion {
    /// Title
    pub title: String,
    /// Body
    pub body: String,
    /// Requested priority level (credits to reserve)
    pub priority_level: i64,
}

/// Input for question update
pub type QuestionUpdate = NewQuestion;

/// Outcome of a credit reservation (create or update)
#[derive(Debug, Clone, Serialize)]
pub struct ReservationReceipt {
    /// Question as committed
    pub question: Question,
    /// Credits debited by this request
    pub charged: i64,
    /// Owner's credits after the debit
    pub credits_remaining: i64,
}

/// Outcome of a vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteReceipt {
    /// Answer voted on
    pub answer_id: AnswerId,
    /// Vote value now stored
    pub value: VoteValue,
    /// Change applied to the answer aggregate and author points
    pub delta: i64,
    /// Answer aggregate after the vote
    pub votes: i64,
    /// Author's points after the vote
    pub points: i64,
}

/// Credits released to one author at close
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Payout {
    /// Answer author
    pub author: UserId,
    /// Sum of vote counts over the author's answers
    pub earned: i64,
    /// Amount actually applied after flooring the balance at zero
    pub applied: i64,
    /// Author's credits after the payout
    pub credits: i64,
}

/// Outcome of closing a question
#[derive(Debug, Clone, Serialize)]
pub struct CloseReceipt {
    /// Closed question
    pub question_id: QuestionId,
    /// Number of answers redistributed
    pub answers: usize,
    /// One entry per distinct author
    pub payouts: Vec<Payout>,
}

/// Stored aggregate vs. re-derived tally for one answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteAudit {
    /// Answer audited
    pub answer_id: AnswerId,
    /// `answer.votes` as stored
    pub recorded: i64,
    /// Σ vote.val over the answer's vote rows
    pub tallied: i64,
    /// Number of vote rows
    pub vote_rows: usize,
}

impl VoteAudit {
    /// True when the stored aggregate matches the vote rows
    pub fn is_consistent(&self) -> bool {
        self.recorded == self.tallied
    }
}

/// Result of auditing every answer in the store
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    /// Answers inspected
    pub answers_checked: usize,
    /// Answers whose aggregate drifted
    pub drifted: Vec<VoteAudit>,
}

impl AuditReport {
    /// True when no answer drifted
    pub fn is_clean(&self) -> bool {
        self.drifted.is_empty()
    }
}
