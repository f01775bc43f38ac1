//! Storage layer
//!
//! The ledger talks to its rows through the [`Store`] trait: point reads by
//! primary key, two range scans, and one atomic [`Store::commit`] of a
//! [`WriteSet`]. [`RocksStore`] is the durable implementation.
//!
//! # Column Families
//!
//! - `users` - User rows (key: user_id)
//! - `questions` - Question rows (key: question_id)
//! - `answers` - Answer rows (key: answer_id)
//! - `votes` - Vote rows (key: answer_id || voter_id)
//! - `question_answers` - Index (key: question_id || answer_id -> empty)

use crate::{
    error::{Error, Result},
    types::{Answer, AnswerId, Question, QuestionId, User, UserId, Vote},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_USERS: &str = "users";
const CF_QUESTIONS: &str = "questions";
const CF_ANSWERS: &str = "answers";
const CF_VOTES: &str = "votes";
const CF_QUESTION_ANSWERS: &str = "question_answers";

/// One staged row write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Insert or replace a user row
    PutUser(User),
    /// Insert or replace a question row
    PutQuestion(Question),
    /// Insert or replace an answer row (and its question index entry)
    PutAnswer(Answer),
    /// Insert or replace a vote row
    PutVote(Vote),
}

/// Writes committed together or not at all
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSet {
    mutations: Vec<Mutation>,
}

impl WriteSet {
    /// Empty write set
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a mutation
    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    /// Number of staged mutations
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// True if nothing is staged
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Staged mutations in order
    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.mutations.iter()
    }
}

impl IntoIterator for WriteSet {
    type Item = Mutation;
    type IntoIter = std::vec::IntoIter<Mutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.mutations.into_iter()
    }
}

/// Row store backing the ledger
pub trait Store: Send + Sync {
    /// User by ID
    fn get_user(&self, user_id: UserId) -> Result<Option<User>>;

    /// Question by ID
    fn get_question(&self, question_id: QuestionId) -> Result<Option<Question>>;

    /// Answer by ID
    fn get_answer(&self, answer_id: AnswerId) -> Result<Option<Answer>>;

    /// Vote of `voter` on `answer_id`
    fn get_vote(&self, answer_id: AnswerId, voter: UserId) -> Result<Option<Vote>>;

    /// All answers of a question, oldest first
    fn answers_for_question(&self, question_id: QuestionId) -> Result<Vec<Answer>>;

    /// All vote rows of an answer
    fn votes_for_answer(&self, answer_id: AnswerId) -> Result<Vec<Vote>>;

    /// Every answer ID in the store
    fn answer_ids(&self) -> Result<Vec<AnswerId>>;

    /// Apply all writes atomically
    fn commit(&self, writes: WriteSet) -> Result<()>;
}

impl<S: Store + ?Sized> Store for Arc<S> {
    fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        (**self).get_user(user_id)
    }

    fn get_question(&self, question_id: QuestionId) -> Result<Option<Question>> {
        (**self).get_question(question_id)
    }

    fn get_answer(&self, answer_id: AnswerId) -> Result<Option<Answer>> {
        (**self).get_answer(answer_id)
    }

    fn get_vote(&self, answer_id: AnswerId, voter: UserId) -> Result<Option<Vote>> {
        (**self).get_vote(answer_id, voter)
    }

    fn answers_for_question(&self, question_id: QuestionId) -> Result<Vec<Answer>> {
        (**self).answers_for_question(question_id)
    }

    fn votes_for_answer(&self, answer_id: AnswerId) -> Result<Vec<Vote>> {
        (**self).votes_for_answer(answer_id)
    }

    fn answer_ids(&self) -> Result<Vec<AnswerId>> {
        (**self).answer_ids()
    }

    fn commit(&self, writes: WriteSet) -> Result<()> {
        (**self).commit(writes)
    }
}

/// RocksDB-backed store
pub struct RocksStore {
    db: DB,
    sync_writes: bool,
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_USERS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_QUESTIONS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_ANSWERS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_VOTES, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_QUESTION_ANSWERS, Self::cf_options_index()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB store");

        Ok(Self {
            db,
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    fn cf_options_rows() -> Options {
        let mut opts = Options::default();
        // Rows are read on every request, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_index() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn get_row<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf_handle(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Keys (and values) of `cf_name` that start with `prefix`
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.cf_handle(cf_name)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        let mut rows = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key, value));
        }

        Ok(rows)
    }

    fn composite_key(first: &[u8; 16], second: &[u8; 16]) -> Vec<u8> {
        let mut key = Vec::with_capacity(32);
        key.extend_from_slice(first);
        key.extend_from_slice(second);
        key
    }

    fn id_at(key: &[u8], offset: usize) -> Result<Uuid> {
        key.get(offset..offset + 16)
            .and_then(|bytes| <[u8; 16]>::try_from(bytes).ok())
            .map(Uuid::from_bytes)
            .ok_or_else(|| Error::Storage(format!("Malformed key of {} bytes", key.len())))
    }
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl Store for RocksStore {
    fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        self.get_row(CF_USERS, user_id.as_bytes())
    }

    fn get_question(&self, question_id: QuestionId) -> Result<Option<Question>> {
        self.get_row(CF_QUESTIONS, question_id.as_bytes())
    }

    fn get_answer(&self, answer_id: AnswerId) -> Result<Option<Answer>> {
        self.get_row(CF_ANSWERS, answer_id.as_bytes())
    }

    fn get_vote(&self, answer_id: AnswerId, voter: UserId) -> Result<Option<Vote>> {
        let key = Self::composite_key(answer_id.as_bytes(), voter.as_bytes());
        self.get_row(CF_VOTES, &key)
    }

    fn answers_for_question(&self, question_id: QuestionId) -> Result<Vec<Answer>> {
        let mut answers = Vec::new();

        for (key, _) in self.scan_prefix(CF_QUESTION_ANSWERS, question_id.as_bytes())? {
            let answer_id = AnswerId::from_uuid(Self::id_at(&key, 16)?);
            let answer = self.get_answer(answer_id)?.ok_or_else(|| {
                Error::Storage(format!("Index points at missing answer {}", answer_id))
            })?;
            answers.push(answer);
        }

        Ok(answers)
    }

    fn votes_for_answer(&self, answer_id: AnswerId) -> Result<Vec<Vote>> {
        self.scan_prefix(CF_VOTES, answer_id.as_bytes())?
            .into_iter()
            .map(|(_, value)| bincode::deserialize(&value).map_err(Error::from))
            .collect()
    }

    fn answer_ids(&self) -> Result<Vec<AnswerId>> {
        let cf = self.cf_handle(CF_ANSWERS)?;
        let mut ids = Vec::new();

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            ids.push(AnswerId::from_uuid(Self::id_at(&key, 0)?));
        }

        Ok(ids)
    }

    fn commit(&self, writes: WriteSet) -> Result<()> {
        let mut batch = WriteBatch::default();
        let count = writes.len();

        for mutation in writes {
            match mutation {
                Mutation::PutUser(user) => {
                    let cf = self.cf_handle(CF_USERS)?;
                    batch.put_cf(cf, user.user_id.as_bytes(), bincode::serialize(&user)?);
                }
                Mutation::PutQuestion(question) => {
                    let cf = self.cf_handle(CF_QUESTIONS)?;
                    batch.put_cf(
                        cf,
                        question.question_id.as_bytes(),
                        bincode::serialize(&question)?,
                    );
                }
                Mutation::PutAnswer(answer) => {
                    let cf = self.cf_handle(CF_ANSWERS)?;
                    batch.put_cf(cf, answer.answer_id.as_bytes(), bincode::serialize(&answer)?);

                    let cf_index = self.cf_handle(CF_QUESTION_ANSWERS)?;
                    let index_key =
                        Self::composite_key(answer.question_id.as_bytes(), answer.answer_id.as_bytes());
                    batch.put_cf(cf_index, &index_key, b"");
                }
                Mutation::PutVote(vote) => {
                    let cf = self.cf_handle(CF_VOTES)?;
                    let key = Self::composite_key(vote.answer_id.as_bytes(), vote.voter.as_bytes());
                    batch.put_cf(cf, &key, bincode::serialize(&vote)?);
                }
            }
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);

        // Atomic commit
        self.db.write_opt(batch, &write_opts)?;

        tracing::debug!(mutations = count, "Write set committed");

        Ok(())
    }
}
