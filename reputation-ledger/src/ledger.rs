//! Main ledger orchestration layer
//!
//! This module ties together storage, row locks, the vote state machine and
//! the credit rules into a high-level API. Every mutating operation follows the
//! same shape: validate the payload, take its row locks in ascending key order,
//! re-read the rows under the locks, check preconditions, then stage all writes
//! in one unit of work.
//!
//! # Example
//!
//! ```no_run
//! use reputation_ledger::{Config, Ledger, NewQuestion, VoteDirection};
//!
//! #[tokio::main]
//! async fn main() -> reputation_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default())?;
//!
//!     let asker = ledger.register_user("Ada").await?;
//!     let helper = ledger.register_user("Grace").await?;
//!     let voter = ledger.register_user("Linus").await?;
//!
//!     let receipt = ledger
//!         .create_question(asker.user_id, NewQuestion {
//!             title: "Lifetimes".to_string(),
//!             body: "Why is 'a needed here?".to_string(),
//!             priority_level: 3,
//!         })
//!         .await?;
//!     let question_id = receipt.question.question_id;
//!
//!     let answer = ledger.create_answer(question_id, helper.user_id, "It ties the borrows").await?;
//!     ledger.vote(answer.answer_id, voter.user_id, VoteDirection::Up).await?;
//!     ledger.close_question(question_id, asker.user_id).await?;
//!
//!     Ok(())
//! }
//! ```

use crate::{
    credit,
    lock::{LockKey, LockManager},
    metrics::Metrics,
    storage::{RocksStore, Store},
    types::{
        Answer, AnswerId, AuditReport, Balance, CloseReceipt, NewQuestion, Payout, Question,
        QuestionId, QuestionUpdate, ReservationReceipt, User, UserId, Vote, VoteAudit,
        VoteDirection, VoteReceipt,
    },
    unit_of_work::atomically,
    validation,
    vote::VoteTransition,
    Config, Error, Result,
};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;

/// Main ledger interface
pub struct Ledger<S: Store = RocksStore> {
    /// Row store
    store: Arc<S>,

    /// Row lock table
    locks: LockManager,

    /// Metrics collector
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger<RocksStore> {
    /// Open a RocksDB-backed ledger
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(RocksStore::open(&config)?);
        Self::with_store(store, config)
    }
}

impl<S: Store> Ledger<S> {
    /// Build a ledger over an existing store
    pub fn with_store(store: Arc<S>, config: Config) -> Result<Self> {
        config.validate()?;
        let locks = LockManager::new(config.locking.acquire_timeout());
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;
        Ok(Self::from_parts(store, locks, metrics, config))
    }

    /// Assemble a ledger from its parts
    ///
    /// Ledgers sharing a store must share the lock manager too.
    pub fn from_parts(store: Arc<S>, locks: LockManager, metrics: Metrics, config: Config) -> Self {
        tracing::info!(service = %config.service_name, "Ledger ready");
        Self {
            store,
            locks,
            metrics,
            config,
        }
    }

    /// Register a new user with the configured starting credits
    pub async fn register_user(&self, display_name: &str) -> Result<User> {
        self.observe("register_user", self.insert_user(display_name)).await
    }

    /// Points and credits of a user
    pub async fn balance(&self, user_id: UserId) -> Result<Balance> {
        Ok(self.require_user(user_id)?.balance())
    }

    /// Create a question, reserving `priority_level` credits from the owner
    pub async fn create_question(&self, owner: UserId, input: NewQuestion) -> Result<ReservationReceipt> {
        self.observe("create_question", self.reserve_new_question(owner, input)).await
    }

    /// Update a question, charging only for a raised priority level
    pub async fn update_question(
        &self,
        question_id: QuestionId,
        actor: UserId,
        input: QuestionUpdate,
    ) -> Result<ReservationReceipt> {
        self.observe("update_question", self.reserve_question_update(question_id, actor, input)).await
    }

    /// Close a question and pay each answer's votes to its author as credits
    pub async fn close_question(&self, question_id: QuestionId, actor: UserId) -> Result<CloseReceipt> {
        self.observe("close_question", self.redistribute_and_close(question_id, actor)).await
    }

    /// Post an answer and bump the question's `responded_at`
    pub async fn create_answer(&self, question_id: QuestionId, author: UserId, body: &str) -> Result<Answer> {
        self.observe("create_answer", self.insert_answer(question_id, author, body)).await
    }

    /// Replace an answer's body and bump the question's `responded_at`
    pub async fn update_answer(&self, answer_id: AnswerId, actor: UserId, body: &str) -> Result<Answer> {
        self.observe("update_answer", self.rewrite_answer(answer_id, actor, body)).await
    }

    /// Apply an up/down vote of `voter` on an answer
    pub async fn vote(&self, answer_id: AnswerId, voter: UserId, direction: VoteDirection) -> Result<VoteReceipt> {
        self.observe("vote", self.apply_vote(answer_id, voter, direction)).await
    }

    /// Question by ID
    pub fn question(&self, question_id: QuestionId) -> Result<Question> {
        self.require_question(question_id)
    }

    /// Answer by ID
    pub fn answer(&self, answer_id: AnswerId) -> Result<Answer> {
        self.require_answer(answer_id)
    }

    /// Vote of `voter` on an answer, if any
    pub fn vote_of(&self, answer_id: AnswerId, voter: UserId) -> Result<Option<Vote>> {
        self.store.get_vote(answer_id, voter)
    }

    /// Answers of a question
    pub fn answers_for_question(&self, question_id: QuestionId) -> Result<Vec<Answer>> {
        self.require_question(question_id)?;
        self.store.answers_for_question(question_id)
    }

    /// Compare one answer's stored aggregate with its vote rows
    pub async fn audit_answer(&self, answer_id: AnswerId) -> Result<VoteAudit> {
        let planned = self.require_answer(answer_id)?;
        let _locks = self
            .locks
            .acquire([LockKey::Question(planned.question_id), LockKey::Answer(answer_id)])
            .await?;

        let answer = self.require_answer(answer_id)?;
        let votes = self.store.votes_for_answer(answer_id)?;
        let tallied = votes.iter().map(|vote| vote.val.as_i64()).sum();

        Ok(VoteAudit {
            answer_id,
            recorded: answer.votes,
            tallied,
            vote_rows: votes.len(),
        })
    }

    /// Audit every answer in the store
    ///
    /// Drift is reported, never repaired.
    pub async fn audit(&self) -> Result<AuditReport> {
        let mut report = AuditReport::default();

        for answer_id in self.store.answer_ids()? {
            let audit = self.audit_answer(answer_id).await?;
            report.answers_checked += 1;

            if !audit.is_consistent() {
                tracing::warn!(
                    answer_id = %answer_id,
                    recorded = audit.recorded,
                    tallied = audit.tallied,
                    "Vote aggregate drifted"
                );
                report.drifted.push(audit);
            }
        }

        tracing::info!(
            answers_checked = report.answers_checked,
            drifted = report.drifted.len(),
            "Audit finished"
        );

        Ok(report)
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Lock manager
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    async fn insert_user(&self, display_name: &str) -> Result<User> {
        validation::display_name(display_name)?;

        let now = Utc::now();
        let user = User {
            user_id: UserId::new(),
            display_name: display_name.to_string(),
            points: 0,
            credits: self.config.initial_credits,
            created_at: now,
            updated_at: now,
        };

        atomically(&*self.store, "register_user", |unit| {
            unit.put_user(user.clone());
            Ok(())
        })?;

        tracing::info!(user_id = %user.user_id, credits = user.credits, "User registered");
        Ok(user)
    }

    async fn reserve_new_question(&self, owner: UserId, input: NewQuestion) -> Result<ReservationReceipt> {
        validation::question(&input)?;

        let _locks = self.locks.acquire([LockKey::User(owner)]).await?;

        let mut user = self.require_user(owner)?;
        let charged = credit::reserve(input.priority_level, 0, user.credits)?;

        let now = Utc::now();
        let question = Question {
            question_id: QuestionId::new(),
            owner,
            title: input.title,
            body: input.body,
            priority_level: input.priority_level,
            closed: false,
            responded_at: now,
            created_at: now,
            updated_at: now,
        };
        user.credits -= charged;
        user.updated_at = now;
        let credits_remaining = user.credits;

        atomically(&*self.store, "create_question", |unit| {
            unit.put_question(question.clone());
            unit.put_user(user);
            Ok(())
        })?;

        self.metrics.record_reservation(charged);
        tracing::info!(
            question_id = %question.question_id,
            owner = %owner,
            charged,
            credits_remaining,
            "Question created"
        );

        Ok(ReservationReceipt {
            question,
            charged,
            credits_remaining,
        })
    }

    async fn reserve_question_update(
        &self,
        question_id: QuestionId,
        actor: UserId,
        input: QuestionUpdate,
    ) -> Result<ReservationReceipt> {
        validation::question(&input)?;

        // Owner never changes, so the lock plan can come from an unlocked read
        let owner = self.require_question(question_id)?.owner;
        let _locks = self
            .locks
            .acquire([LockKey::Question(question_id), LockKey::User(owner)])
            .await?;

        let mut question = self.require_question(question_id)?;
        if question.owner != actor {
            return Err(Error::Forbidden(format!("question {}", question_id)));
        }
        if question.closed {
            return Err(Error::Conflict("Question is closed".to_string()));
        }

        let mut user = self.require_user(owner)?;
        let charged = credit::reserve(input.priority_level, question.priority_level, user.credits)?;

        let now = Utc::now();
        let previous_level = question.priority_level;
        question.title = input.title;
        question.body = input.body;
        question.priority_level = input.priority_level;
        question.updated_at = now;
        user.credits -= charged;
        user.updated_at = now;
        let credits_remaining = user.credits;

        atomically(&*self.store, "update_question", |unit| {
            unit.put_question(question.clone());
            if charged > 0 {
                unit.put_user(user);
            }
            Ok(())
        })?;

        self.metrics.record_reservation(charged);
        tracing::info!(
            question_id = %question_id,
            previous_level,
            priority_level = question.priority_level,
            charged,
            "Question updated"
        );

        Ok(ReservationReceipt {
            question,
            charged,
            credits_remaining,
        })
    }

    async fn redistribute_and_close(&self, question_id: QuestionId, actor: UserId) -> Result<CloseReceipt> {
        let mut locks = self.locks.acquire([LockKey::Question(question_id)]).await?;

        let mut question = self.require_question(question_id)?;
        if question.owner != actor {
            return Err(Error::Forbidden(format!("question {}", question_id)));
        }
        if question.closed {
            return Err(Error::Conflict("Question is already closed".to_string()));
        }

        // Votes and new answers both need the question lock, so this list is stable
        let answers = self.store.answers_for_question(question_id)?;
        let earnings = credit::close_payouts(&answers);
        locks
            .extend(earnings.iter().map(|(author, _)| LockKey::User(*author)))
            .await?;

        let now = Utc::now();
        let mut authors = Vec::with_capacity(earnings.len());
        let mut payouts = Vec::with_capacity(earnings.len());
        for (author, earned) in earnings {
            let mut user = self.require_user(author)?;
            let (applied, credits) = credit::apply_payout(user.credits, earned);
            user.credits = credits;
            user.updated_at = now;
            authors.push(user);
            payouts.push(Payout {
                author,
                earned,
                applied,
                credits,
            });
        }

        question.closed = true;
        question.updated_at = now;

        atomically(&*self.store, "close_question", |unit| {
            unit.put_question(question);
            for user in authors {
                unit.put_user(user);
            }
            Ok(())
        })?;

        for payout in &payouts {
            self.metrics.record_payout(payout.applied);
            if payout.applied != payout.earned {
                tracing::debug!(
                    author = %payout.author,
                    earned = payout.earned,
                    applied = payout.applied,
                    "Payout floored at zero credits"
                );
            }
        }
        self.metrics.record_question_closed();
        tracing::info!(
            question_id = %question_id,
            answers = answers.len(),
            authors = payouts.len(),
            "Question closed"
        );

        Ok(CloseReceipt {
            question_id,
            answers: answers.len(),
            payouts,
        })
    }

    async fn insert_answer(&self, question_id: QuestionId, author: UserId, body: &str) -> Result<Answer> {
        validation::answer_body(body)?;

        let _locks = self.locks.acquire([LockKey::Question(question_id)]).await?;

        let mut question = self.require_question(question_id)?;
        if question.closed {
            return Err(Error::Conflict("Question is closed".to_string()));
        }
        self.require_user(author)?;

        let now = Utc::now();
        let answer = Answer {
            answer_id: AnswerId::new(),
            question_id,
            author,
            body: body.to_string(),
            votes: 0,
            created_at: now,
            updated_at: now,
        };
        question.responded_at = now;
        question.updated_at = now;

        atomically(&*self.store, "create_answer", |unit| {
            unit.put_answer(answer.clone());
            unit.put_question(question);
            Ok(())
        })?;

        tracing::info!(answer_id = %answer.answer_id, question_id = %question_id, "Answer created");
        Ok(answer)
    }

    async fn rewrite_answer(&self, answer_id: AnswerId, actor: UserId, body: &str) -> Result<Answer> {
        validation::answer_body(body)?;

        let planned = self.require_answer(answer_id)?;
        let _locks = self
            .locks
            .acquire([LockKey::Question(planned.question_id), LockKey::Answer(answer_id)])
            .await?;

        let mut answer = self.require_answer(answer_id)?;
        if answer.author != actor {
            return Err(Error::Forbidden(format!("answer {}", answer_id)));
        }
        let mut question = self.require_question(answer.question_id)?;
        if question.closed {
            return Err(Error::Conflict(
                "Cannot update the answer because the question has been closed".to_string(),
            ));
        }

        let now = Utc::now();
        answer.body = body.to_string();
        answer.updated_at = now;
        question.responded_at = now;
        question.updated_at = now;

        atomically(&*self.store, "update_answer", |unit| {
            unit.put_answer(answer.clone());
            unit.put_question(question);
            Ok(())
        })?;

        tracing::info!(answer_id = %answer_id, question_id = %answer.question_id, "Answer updated");
        Ok(answer)
    }

    async fn apply_vote(&self, answer_id: AnswerId, voter: UserId, direction: VoteDirection) -> Result<VoteReceipt> {
        // Question and author never change, so the lock plan can come from an unlocked read
        let planned = self.require_answer(answer_id)?;
        let _locks = self
            .locks
            .acquire([
                LockKey::Question(planned.question_id),
                LockKey::Answer(answer_id),
                LockKey::User(planned.author),
            ])
            .await?;

        let mut answer = self.require_answer(answer_id)?;
        if self.require_question(answer.question_id)?.closed {
            return Err(Error::Conflict("Question is closed".to_string()));
        }
        self.require_user(voter)?;
        if voter == answer.author {
            tracing::warn!(answer_id = %answer_id, voter = %voter, "Rejected vote on own answer");
            return Err(Error::InvalidOperation("You cannot vote your own answer".to_string()));
        }

        let existing = self.store.get_vote(answer_id, voter)?;
        let transition = VoteTransition::compute(existing.as_ref().map(|v| v.val), direction)?;
        let mut author = self.require_user(answer.author)?;

        let now = Utc::now();
        let vote = match existing {
            Some(mut vote) => {
                vote.val = transition.next;
                vote.updated_at = now;
                vote
            }
            None => Vote {
                answer_id,
                voter,
                val: transition.next,
                created_at: now,
                updated_at: now,
            },
        };
        answer.votes += transition.delta;
        answer.updated_at = now;
        author.points += transition.delta;
        author.updated_at = now;
        let votes = answer.votes;
        let points = author.points;

        atomically(&*self.store, "vote", |unit| {
            unit.put_vote(vote);
            unit.put_answer(answer);
            unit.put_user(author);
            Ok(())
        })?;

        self.metrics.record_vote(direction);
        tracing::info!(
            answer_id = %answer_id,
            voter = %voter,
            direction = %direction,
            delta = transition.delta,
            votes,
            flip = transition.is_flip(),
            "Vote applied"
        );

        Ok(VoteReceipt {
            answer_id,
            value: transition.next,
            delta: transition.delta,
            votes,
            points,
        })
    }

    /// Time an operation and count its rejection, if any
    async fn observe<T>(&self, operation: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let _timer = self.metrics.start_timer(operation);
        let result = fut.await;
        if let Err(ref e) = result {
            self.metrics.record_rejection(e);
            tracing::debug!(operation, error = %e, "Operation rejected");
        }
        result
    }

    fn require_user(&self, user_id: UserId) -> Result<User> {
        self.store
            .get_user(user_id)?
            .ok_or_else(|| Error::NotFound(format!("user {}", user_id)))
    }

    fn require_question(&self, question_id: QuestionId) -> Result<Question> {
        self.store
            .get_question(question_id)?
            .ok_or_else(|| Error::NotFound(format!("question {}", question_id)))
    }

    fn require_answer(&self, answer_id: AnswerId) -> Result<Answer> {
        self.store
            .get_answer(answer_id)?
            .ok_or_else(|| Error::NotFound(format!("answer {}", answer_id)))
    }
}

impl<S: Store> std::fmt::Debug for Ledger<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("service", &self.config.service_name)
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}
