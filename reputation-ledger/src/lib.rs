//! Reputation Ledger
//!
//! Vote and credit bookkeeping for a question and answer board.
//!
//! # Architecture
//!
//! - **Vote state machine**: one vote row per (answer, voter), flips apply a ±2 delta
//! - **Credit reservation**: raising a question's priority debits the owner
//! - **Redistribution**: closing a question pays each answer's votes to its author
//! - **Row locks**: operations lock only the rows they touch, in a fixed key order
//! - **Unit of work**: every operation commits its writes all-or-nothing
//!
//! # Invariants
//!
//! - `answer.votes == Σ vote.val` over the answer's vote rows
//! - Nobody votes on their own answer
//! - At most one vote row per (answer, voter)
//! - `user.credits >= 0` at all times
//! - A closed question accepts no further votes, reservations or answers

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod error;
pub mod vote;
pub mod credit;
pub mod validation;
pub mod lock;
pub mod storage;
pub mod memory;
pub mod unit_of_work;
pub mod ledger;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, ErrorKind, Result};
pub use types::{
    Answer, AnswerId, AuditReport, Balance, CloseReceipt, NewQuestion, Payout, Question,
    QuestionId, QuestionUpdate, ReservationReceipt, User, UserId, Vote, VoteAudit,
    VoteDirection, VoteReceipt, VoteValue,
};
pub use ledger::Ledger;
pub use config::Config;
pub use storage::{RocksStore, Store};
pub use memory::MemoryStore;
pub use lock::LockManager;
pub use metrics::Metrics;
