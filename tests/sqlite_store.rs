use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;

use oj_judge::models::{
    ContestStanding, ExecutionResult, NewSubmission, Problem, SubmissionStatus, TestCase, Verdict,
};
use oj_judge::store::{
    ContestStandingStore, ExecutionResultStore, ProblemStore, SqliteStore, SubmissionStore,
    TestCaseStore,
};

async fn open_store() -> (tempfile::TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("test.sqlite3"))
        .await
        .unwrap();
    (dir, store)
}

fn problem(id: u32, contest_id: u32) -> Problem {
    Problem {
        id,
        contest_id,
        title: format!("Problem {id}"),
        time_limit: 1.5,
        memory_limit: 128,
        weight: 2,
    }
}

fn new_submission(minute: u32) -> NewSubmission {
    NewSubmission {
        user_id: 4,
        problem_id: 10,
        contest_id: 1,
        language: "cpp".to_string(),
        source_code: "int main() {}".to_string(),
        submitted_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
    }
}

#[tokio::test]
async fn problems_and_test_cases() {
    let (_dir, store) = open_store().await;
    ProblemStore::create(&store, &problem(10, 1)).await.unwrap();
    ProblemStore::create(&store, &problem(11, 1)).await.unwrap();
    ProblemStore::create(&store, &problem(20, 2)).await.unwrap();

    assert_eq!(ProblemStore::get(&store, 10).await.unwrap(), Some(problem(10, 1)));
    assert_eq!(ProblemStore::get(&store, 99).await.unwrap(), None);
    let ids: Vec<u32> = ProblemStore::list_by_contest(&store, 1)
        .await
        .unwrap()
        .iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(ids, vec![10, 11]);

    for id in [3, 1, 2] {
        TestCaseStore::create(
            &store,
            &TestCase {
                id,
                problem_id: 10,
                input: format!("{id}\n"),
                expected_output: format!("{id}\n"),
                weight: 1,
                is_sample: id == 1,
            },
        )
        .await
        .unwrap();
    }
    let cases = store.list_by_problem(10).await.unwrap();
    let ids: Vec<u32> = cases.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(cases[0].is_sample);
    assert!(!cases[1].is_sample);
}

#[tokio::test]
async fn submission_lifecycle() {
    let (_dir, store) = open_store().await;
    ProblemStore::create(&store, &problem(10, 1)).await.unwrap();

    let late = SubmissionStore::create(&store, &new_submission(30)).await.unwrap();
    let early = SubmissionStore::create(&store, &new_submission(5)).await.unwrap();
    assert_eq!(late.status, SubmissionStatus::Pending);
    assert_ne!(late.id, early.id);

    assert_eq!(store.list_pending().await.unwrap(), vec![early.id, late.id]);

    store
        .update_status(late.id, SubmissionStatus::Judged(Verdict::WrongAnswer))
        .await
        .unwrap();
    store.update_score(late.id, 7).await.unwrap();

    let fetched = SubmissionStore::get(&store, late.id).await.unwrap().unwrap();
    assert_eq!(fetched.status, SubmissionStatus::Judged(Verdict::WrongAnswer));
    assert_eq!(fetched.score, 7);
    assert_eq!(fetched.submitted_at, late.submitted_at);
    assert_eq!(store.list_pending().await.unwrap(), vec![early.id]);

    let history: Vec<u32> = store
        .list_for_user(1, 10, 4)
        .await
        .unwrap()
        .iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(history, vec![early.id, late.id]);
    assert!(store.list_for_user(1, 10, 5).await.unwrap().is_empty());

    assert!(store.update_status(999, SubmissionStatus::Judging).await.is_err());
}

#[tokio::test]
async fn execution_results_are_replaced_on_clear() {
    let (_dir, store) = open_store().await;
    ProblemStore::create(&store, &problem(10, 1)).await.unwrap();
    let submission = SubmissionStore::create(&store, &new_submission(0)).await.unwrap();

    let result = |test_case_id, status| ExecutionResult {
        submission_id: submission.id,
        test_case_id,
        status,
        time_us: 1500,
        memory_kb: 2048,
        error: String::new(),
    };
    ExecutionResultStore::create(&store, &result(2, Verdict::WrongAnswer))
        .await
        .unwrap();
    ExecutionResultStore::create(&store, &result(1, Verdict::Accepted))
        .await
        .unwrap();
    assert_eq!(
        store.list_by_submission(submission.id).await.unwrap(),
        vec![result(1, Verdict::Accepted), result(2, Verdict::WrongAnswer)]
    );

    store.clear_for_submission(submission.id).await.unwrap();
    assert!(store.list_by_submission(submission.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn result_batches_are_all_or_nothing() {
    let (_dir, store) = open_store().await;
    ProblemStore::create(&store, &problem(10, 1)).await.unwrap();
    let submission = SubmissionStore::create(&store, &new_submission(0)).await.unwrap();

    let result = |test_case_id| ExecutionResult {
        submission_id: submission.id,
        test_case_id,
        status: Verdict::Accepted,
        time_us: 10,
        memory_kb: 10,
        error: String::new(),
    };
    // Test case 2 appears twice, so the batch breaks on the primary key
    assert!(
        store
            .create_many(&[result(1), result(2), result(2)])
            .await
            .is_err()
    );
    assert!(store.list_by_submission(submission.id).await.unwrap().is_empty());

    store.create_many(&[result(1), result(2)]).await.unwrap();
    assert_eq!(
        store.list_by_submission(submission.id).await.unwrap(),
        vec![result(1), result(2)]
    );
}

#[tokio::test]
async fn standings_upsert_overwrites() {
    let (_dir, store) = open_store().await;
    let mut standing = ContestStanding {
        contest_id: 1,
        user_id: 4,
        total_score: 10,
        solved: 1,
        penalty: 20,
        rank: 2,
    };
    store.upsert(&standing).await.unwrap();
    standing.rank = 1;
    standing.penalty = 0;
    store.upsert(&standing).await.unwrap();
    store
        .upsert(&ContestStanding {
            contest_id: 2,
            user_id: 4,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(
        ContestStandingStore::list_by_contest(&store, 1).await.unwrap(),
        vec![standing]
    );
}

#[tokio::test]
async fn standings_batch_upserts_every_entry() {
    let (_dir, store) = open_store().await;
    let standing = |user_id, rank| ContestStanding {
        contest_id: 3,
        user_id,
        total_score: 10 / rank,
        solved: 1,
        penalty: 0,
        rank,
    };
    store.upsert(&standing(2, 1)).await.unwrap();
    store
        .upsert_many(&[standing(1, 1), standing(2, 2)])
        .await
        .unwrap();

    assert_eq!(
        ContestStandingStore::list_by_contest(&store, 3).await.unwrap(),
        vec![standing(1, 1), standing(2, 2)]
    );
}

#[tokio::test]
async fn reopening_keeps_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("persist.sqlite3");
    {
        let store = SqliteStore::open(&path).await.unwrap();
        ProblemStore::create(&store, &problem(10, 1)).await.unwrap();
    }
    let store = SqliteStore::open(&path).await.unwrap();
    assert!(ProblemStore::get(&store, 10).await.unwrap().is_some());
}
