//! Scoped atomic unit of work
//!
//! Mutating operations stage their row writes here and commit them in one
//! [`Store::commit`]. Dropping a unit without committing discards everything
//! it staged, so an early `?` return can never leave a partial delta behind.

use crate::storage::{Mutation, Store, WriteSet};
use crate::types::{Answer, Question, User, Vote};
use crate::Result;

/// Writes staged by one ledger operation
pub struct UnitOfWork<'s, S: Store + ?Sized> {
    store: &'s S,
    operation: &'static str,
    writes: WriteSet,
}

impl<'s, S: Store + ?Sized> UnitOfWork<'s, S> {
    /// Begin a unit of work against `store`
    pub fn begin(store: &'s S, operation: &'static str) -> Self {
        Self {
            store,
            operation,
            writes: WriteSet::new(),
        }
    }

    /// Stage a user row
    pub fn put_user(&mut self, user: User) {
        self.writes.push(Mutation::PutUser(user));
    }

    /// Stage a question row
    pub fn put_question(&mut self, question: Question) {
        self.writes.push(Mutation::PutQuestion(question));
    }

    /// Stage an answer row
    pub fn put_answer(&mut self, answer: Answer) {
        self.writes.push(Mutation::PutAnswer(answer));
    }

    /// Stage a vote row
    pub fn put_vote(&mut self, vote: Vote) {
        self.writes.push(Mutation::PutVote(vote));
    }

    /// Number of staged writes
    pub fn staged(&self) -> usize {
        self.writes.len()
    }

    /// Commit every staged write atomically
    pub fn commit(mut self) -> Result<()> {
        let writes = std::mem::take(&mut self.writes);
        let count = writes.len();

        self.store.commit(writes).map_err(|e| {
            tracing::error!(operation = self.operation, error = %e, "Commit failed, rolled back");
            e
        })?;

        tracing::debug!(operation = self.operation, writes = count, "Unit of work committed");
        Ok(())
    }
}

impl<S: Store + ?Sized> std::fmt::Debug for UnitOfWork<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("operation", &self.operation)
            .field("staged", &self.writes.len())
            .finish()
    }
}

impl<S: Store + ?Sized> Drop for UnitOfWork<'_, S> {
    fn drop(&mut self) {
        if !self.writes.is_empty() {
            tracing::debug!(
                operation = self.operation,
                discarded = self.writes.len(),
                "Unit of work dropped without commit"
            );
        }
    }
}

/// Run `f` inside a unit of work, committing only if it returns `Ok`
pub fn atomically<S, T, F>(store: &S, operation: &'static str, f: F) -> Result<T>
where
    S: Store + ?Sized,
    F: FnOnce(&mut UnitOfWork<'_, S>) -> Result<T>,
{
    let mut unit = UnitOfWork::begin(store, operation);
    let value = f(&mut unit)?;
    unit.commit()?;
    Ok(value)
}
