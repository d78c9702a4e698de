mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use oj_judge::config::{LanguageConfig, NamingConfig};
use oj_judge::language::LanguageRegistry;
use oj_judge::models::{SubmissionStatus, Verdict};
use oj_judge::sandbox::ProcessRunner;
use oj_judge::store::ExecutionResultStore;

use common::Fixture;

fn shell_languages() -> LanguageRegistry {
    let language = |name: &str, compile: Option<&[&str]>, run: &[&str]| LanguageConfig {
        name: name.to_string(),
        suffix: ".sh".to_string(),
        naming: NamingConfig::Fixed,
        compile: compile.map(|c| c.iter().map(|s| s.to_string()).collect()),
        run: run.iter().map(|s| s.to_string()).collect(),
        image: None,
    };

    LanguageRegistry::from_config(&[
        language("sh", None, &["sh", "%SOURCE%"]),
        // "Compiles" by turning the script into the executable artifact
        language(
            "sh-built",
            Some(&["sh", "-c", "cp %SOURCE% solution && chmod +x solution"]),
            &["%EXECUTABLE%"],
        ),
        language(
            "sh-broken",
            Some(&["sh", "-c", "echo 'syntax error near line 1' >&2; exit 1"]),
            &["%EXECUTABLE%"],
        ),
    ])
}

async fn judge_source(language: &str, source: &str, cases: &[&str]) -> (Fixture, Vec<Verdict>, SubmissionStatus) {
    let mut fixture = Fixture::new().await;
    for case in cases {
        fixture.add_case(case, 1).await;
    }
    let submission = fixture.submit_source(1, language, source).await;

    let judge = fixture.judge_with_languages(Arc::new(ProcessRunner::new(false)), 2, shell_languages());
    let report = judge
        .judge(submission.id, &CancellationToken::new())
        .await
        .unwrap();
    let verdicts = report.results.iter().map(|r| r.status).collect();
    (fixture, verdicts, report.status)
}

#[tokio::test]
async fn interpreted_solution_is_accepted() {
    let (_, verdicts, status) = judge_source("sh", "read line; echo \"$line\"\n", &["1 2", "hello"]).await;
    assert_eq!(verdicts, vec![Verdict::Accepted, Verdict::Accepted]);
    assert_eq!(status, SubmissionStatus::ACCEPTED);
}

#[tokio::test]
async fn compiled_artifact_is_run() {
    let (_, verdicts, status) =
        judge_source("sh-built", "#!/bin/sh\nread line; echo \"$line\"\n", &["42"]).await;
    assert_eq!(verdicts, vec![Verdict::Accepted]);
    assert_eq!(status, SubmissionStatus::ACCEPTED);
}

#[tokio::test]
async fn wrong_output_and_crash_are_told_apart() {
    let source = "read line\nif [ \"$line\" = crash ]; then exit 3; fi\necho wrong\n";
    let (fixture, verdicts, status) = judge_source("sh", source, &["crash", "42"]).await;
    assert_eq!(verdicts, vec![Verdict::RuntimeError, Verdict::WrongAnswer]);
    assert_eq!(status, SubmissionStatus::Judged(Verdict::RuntimeError));

    let results = fixture.store.list_by_submission(1).await.unwrap();
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn endless_loop_exceeds_time_limit() {
    let (_, verdicts, status) = judge_source("sh", "while :; do :; done\n", &["1"]).await;
    assert_eq!(verdicts, vec![Verdict::TimeLimitExceeded]);
    assert_eq!(status, SubmissionStatus::Judged(Verdict::TimeLimitExceeded));
}

#[tokio::test]
async fn compiler_output_is_recorded() {
    let (fixture, verdicts, status) = judge_source("sh-broken", "echo hi\n", &["1", "2"]).await;
    assert_eq!(verdicts, vec![Verdict::CompilationError; 2]);
    assert_eq!(status, SubmissionStatus::Judged(Verdict::CompilationError));

    let results = fixture.store.list_by_submission(1).await.unwrap();
    assert!(results.iter().all(|r| r.error.contains("syntax error near line 1")));
}
