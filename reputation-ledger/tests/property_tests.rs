//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Aggregate consistency: answer.votes == Σ vote.val, author points follow
//! - Single vote row per (answer, voter), whatever the request sequence
//! - Credit conservation: initial credits == balance + Σ charges, never negative

use proptest::prelude::*;
use reputation_ledger::{
    Config, Error, Ledger, MemoryStore, NewQuestion, Store, VoteDirection, VoteValue,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Strategy for generating vote directions
fn direction_strategy() -> impl Strategy<Value = VoteDirection> {
    prop_oneof![Just(VoteDirection::Up), Just(VoteDirection::Down)]
}

/// Strategy for generating (voter index, direction) requests
fn vote_requests(voters: usize) -> impl Strategy<Value = Vec<(usize, VoteDirection)>> {
    prop::collection::vec((0..voters, direction_strategy()), 1..40)
}

/// Create test ledger over an in-memory store
fn create_test_ledger(initial_credits: i64) -> (Ledger<MemoryStore>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let config = Config {
        initial_credits,
        ..Config::default()
    };
    (Ledger::with_store(store.clone(), config).unwrap(), store)
}

fn question(priority_level: i64) -> NewQuestion {
    NewQuestion {
        title: "Pinning".to_string(),
        body: "When do I need Pin?".to_string(),
        priority_level,
    }
}

const VOTER_NAMES: [&str; 5] = ["Alan", "Barbara", "Dennis", "Frances", "Ken"];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: stored aggregate and author points equal the sum of vote rows
    #[test]
    fn prop_aggregate_matches_vote_rows(requests in vote_requests(VOTER_NAMES.len())) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, store) = create_test_ledger(10);
            let asker = ledger.register_user("Ada").await.unwrap();
            let author = ledger.register_user("Grace").await.unwrap();
            let question_id = ledger
                .create_question(asker.user_id, question(0))
                .await
                .unwrap()
                .question
                .question_id;
            let answer = ledger
                .create_answer(question_id, author.user_id, "Self-referential futures")
                .await
                .unwrap();

            let mut voters = Vec::new();
            for name in VOTER_NAMES {
                voters.push(ledger.register_user(name).await.unwrap().user_id);
            }

            let mut expected: HashMap<usize, VoteValue> = HashMap::new();
            for (index, direction) in requests {
                let result = ledger.vote(answer.answer_id, voters[index], direction).await;
                let requested = VoteValue::from(direction);

                if expected.get(&index) == Some(&requested) {
                    prop_assert!(matches!(result, Err(Error::Conflict(_))));
                } else {
                    let receipt = result.unwrap();
                    prop_assert_eq!(receipt.value, requested);
                    expected.insert(index, requested);
                }
            }

            let expected_total: i64 = expected.values().map(|v| v.as_i64()).sum();
            let rows = store.votes_for_answer(answer.answer_id).unwrap();
            let tallied: i64 = rows.iter().map(|vote| vote.val.as_i64()).sum();

            prop_assert_eq!(tallied, expected_total);
            prop_assert_eq!(ledger.answer(answer.answer_id).unwrap().votes, expected_total);
            prop_assert_eq!(ledger.balance(author.user_id).await.unwrap().points, expected_total);
            prop_assert!(ledger.audit_answer(answer.answer_id).await.unwrap().is_consistent());
            Ok(())
        })?;
    }

    /// Property: at most one vote row per (answer, voter)
    #[test]
    fn prop_single_vote_row_per_voter(requests in vote_requests(3)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, store) = create_test_ledger(10);
            let asker = ledger.register_user("Ada").await.unwrap();
            let author = ledger.register_user("Grace").await.unwrap();
            let question_id = ledger
                .create_question(asker.user_id, question(0))
                .await
                .unwrap()
                .question
                .question_id;
            let answer = ledger
                .create_answer(question_id, author.user_id, "Use Box::pin")
                .await
                .unwrap();

            let mut voters = Vec::new();
            for name in &VOTER_NAMES[..3] {
                voters.push(ledger.register_user(name).await.unwrap().user_id);
            }

            let mut seen = std::collections::HashSet::new();
            for (index, direction) in requests {
                let _ = ledger.vote(answer.answer_id, voters[index], direction).await;
                seen.insert(index);
            }

            let rows = store.votes_for_answer(answer.answer_id).unwrap();
            prop_assert_eq!(rows.len(), seen.len());
            for index in seen {
                let own = rows.iter().filter(|vote| vote.voter == voters[index]).count();
                prop_assert_eq!(own, 1);
            }
            Ok(())
        })?;
    }

    /// Property: reservations conserve credits and never overdraw
    #[test]
    fn prop_reservation_conserves_credits(
        initial in 0i64..50,
        levels in prop::collection::vec(-2i64..60, 1..15),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _) = create_test_ledger(initial);
            let owner = ledger.register_user("Ada").await.unwrap();
            let question_id = ledger
                .create_question(owner.user_id, question(0))
                .await
                .unwrap()
                .question
                .question_id;

            let mut charged_total = 0;
            let mut level = 0;
            for requested in levels {
                let before = ledger.balance(owner.user_id).await.unwrap().credits;
                match ledger.update_question(question_id, owner.user_id, question(requested)).await {
                    Ok(receipt) => {
                        prop_assert_eq!(receipt.charged, (requested - level).max(0));
                        prop_assert_eq!(receipt.credits_remaining, before - receipt.charged);
                        charged_total += receipt.charged;
                        level = requested;
                    }
                    Err(err) => {
                        prop_assert_eq!(err.field(), Some("priority_level"));
                        prop_assert!(requested < 0 || requested - level > before);
                    }
                }

                let after = ledger.balance(owner.user_id).await.unwrap().credits;
                prop_assert!(after >= 0);
                prop_assert_eq!(ledger.question(question_id).unwrap().priority_level, level);
            }

            let credits = ledger.balance(owner.user_id).await.unwrap().credits;
            prop_assert_eq!(initial, credits + charged_total);
            Ok(())
        })?;
    }
}
