//! In-memory store
//!
//! Same contract as the RocksDB store, kept behind one `RwLock` so a commit
//! is visible all at once. Commit failures can be injected to exercise the
//! rollback paths.

use crate::storage::{Mutation, Store, WriteSet};
use crate::types::{Answer, AnswerId, Question, QuestionId, User, UserId, Vote};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    questions: HashMap<QuestionId, Question>,
    answers: BTreeMap<AnswerId, Answer>,
    votes: BTreeMap<(AnswerId, UserId), Vote>,
}

/// Volatile store for tests and embedding
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    failing_commits: AtomicUsize,
    commits: AtomicUsize,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail without applying anything
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Number of successful commits so far
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Overwrite a row outside the ledger, bypassing every invariant
    ///
    /// Only useful for simulating drift in audits.
    pub fn force_answer_votes(&self, answer_id: AnswerId, votes: i64) -> Result<()> {
        let mut tables = self.tables.write();
        let answer = tables
            .answers
            .get_mut(&answer_id)
            .ok_or_else(|| Error::NotFound(format!("answer {}", answer_id)))?;
        answer.votes = votes;
        Ok(())
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("commits", &self.commit_count())
            .finish_non_exhaustive()
    }
}

impl Store for MemoryStore {
    fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        Ok(self.tables.read().users.get(&user_id).cloned())
    }

    fn get_question(&self, question_id: QuestionId) -> Result<Option<Question>> {
        Ok(self.tables.read().questions.get(&question_id).cloned())
    }

    fn get_answer(&self, answer_id: AnswerId) -> Result<Option<Answer>> {
        Ok(self.tables.read().answers.get(&answer_id).cloned())
    }

    fn get_vote(&self, answer_id: AnswerId, voter: UserId) -> Result<Option<Vote>> {
        Ok(self.tables.read().votes.get(&(answer_id, voter)).cloned())
    }

    fn answers_for_question(&self, question_id: QuestionId) -> Result<Vec<Answer>> {
        Ok(self
            .tables
            .read()
            .answers
            .values()
            .filter(|answer| answer.question_id == question_id)
            .cloned()
            .collect())
    }

    fn votes_for_answer(&self, answer_id: AnswerId) -> Result<Vec<Vote>> {
        Ok(self
            .tables
            .read()
            .votes
            .values()
            .filter(|vote| vote.answer_id == answer_id)
            .cloned()
            .collect())
    }

    fn answer_ids(&self) -> Result<Vec<AnswerId>> {
        Ok(self.tables.read().answers.keys().copied().collect())
    }

    fn commit(&self, writes: WriteSet) -> Result<()> {
        if self.take_injected_failure() {
            return Err(Error::Storage("injected commit failure".to_string()));
        }

        let mut tables = self.tables.write();
        for mutation in writes {
            match mutation {
                Mutation::PutUser(user) => {
                    tables.users.insert(user.user_id, user);
                }
                Mutation::PutQuestion(question) => {
                    tables.questions.insert(question.question_id, question);
                }
                Mutation::PutAnswer(answer) => {
                    tables.answers.insert(answer.answer_id, answer);
                }
                Mutation::PutVote(vote) => {
                    tables.votes.insert((vote.answer_id, vote.voter), vote);
                }
            }
        }
        self.commits.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }
}
