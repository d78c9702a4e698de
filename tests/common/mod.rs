#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use oj_judge::judge::{Judge, JudgeSettings};
use oj_judge::language::{Adapter, LanguageRegistry, SourceFile};
use oj_judge::models::{
    ContestId, NewSubmission, Problem, ProblemId, Submission, TestCase, TestCaseId, UserId,
};
use oj_judge::sandbox::{CompileOutcome, ExecutionRequest, RunLimits, RunOutcome, Sandbox};
use oj_judge::store::{MemoryStore, ProblemStore, Stores, SubmissionStore, TestCaseStore};

type Behaviour = Box<dyn Fn(&str) -> Result<RunOutcome> + Send + Sync>;

/// Sandbox that answers from a script instead of running anything
pub struct ScriptedSandbox {
    compile_error: Option<String>,
    behaviour: Behaviour,
    delay: Duration,
    pub runs: AtomicUsize,
}

impl ScriptedSandbox {
    /// Every run answers with `behaviour(stdin)`
    pub fn new(behaviour: impl Fn(&str) -> Result<RunOutcome> + Send + Sync + 'static) -> Self {
        Self {
            compile_error: None,
            behaviour: Box::new(behaviour),
            delay: Duration::ZERO,
            runs: AtomicUsize::new(0),
        }
    }

    /// Every run prints its input back
    pub fn echo() -> Self {
        Self::new(|stdin| Ok(printed(stdin)))
    }

    pub fn failing_compile(message: &str) -> Self {
        Self {
            compile_error: Some(message.to_string()),
            ..Self::echo()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    fn name(&self) -> &'static str {
        "ScriptedSandbox"
    }

    async fn execute(&self, _request: ExecutionRequest<'_>) -> Result<RunOutcome> {
        bail!("scripted sandbox does not execute commands")
    }

    async fn compile(
        &self,
        _adapter: &Adapter,
        source: &SourceFile,
        build_dir: &Path,
        _timeout: Duration,
    ) -> Result<CompileOutcome> {
        if !build_dir.join(&source.file_name).exists() {
            bail!("source file {} was not written", source.file_name);
        }
        Ok(match &self.compile_error {
            Some(message) => CompileOutcome::failed(message.clone(), Duration::from_millis(5)),
            None => CompileOutcome::skipped(),
        })
    }

    async fn run(
        &self,
        _adapter: &Adapter,
        _source: &SourceFile,
        _build_dir: &Path,
        stdin: &str,
        _limits: RunLimits,
    ) -> Result<RunOutcome> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.behaviour)(stdin)
    }
}

/// Clean exit printing `stdout`
pub fn printed(stdout: &str) -> RunOutcome {
    RunOutcome {
        exit_code: 0,
        stdout: format!("{stdout}\n"),
        wall_time: Duration::from_millis(3),
        memory_kb: 1024,
        ..Default::default()
    }
}

pub fn exited(code: i32) -> RunOutcome {
    RunOutcome {
        exit_code: code,
        stderr: "Segmentation fault".to_string(),
        ..Default::default()
    }
}

pub const CONTEST: ContestId = 1;
pub const PROBLEM: ProblemId = 100;

/// A memory store seeded with one problem of [`CONTEST`]
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub stores: Stores,
    next_case: TestCaseId,
    minutes: i64,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_time_limit(1.0).await
    }

    pub async fn with_time_limit(time_limit: f64) -> Self {
        let store = Arc::new(MemoryStore::new());
        ProblemStore::create(
            store.as_ref(),
            &Problem {
                id: PROBLEM,
                contest_id: CONTEST,
                title: "A + B".to_string(),
                time_limit,
                memory_limit: 256,
                weight: 10,
            },
        )
        .await
        .unwrap();

        Self {
            stores: Stores::from_backend(store.clone()),
            store,
            next_case: 1,
            minutes: 0,
        }
    }

    /// Adds a test case whose expected output equals its input
    pub async fn add_case(&mut self, io: &str, weight: u32) -> TestCaseId {
        let id = self.next_case;
        self.next_case += 1;
        TestCaseStore::create(
            self.store.as_ref(),
            &TestCase {
                id,
                problem_id: PROBLEM,
                input: io.to_string(),
                expected_output: io.to_string(),
                weight,
                is_sample: id == 1,
            },
        )
        .await
        .unwrap();
        id
    }

    pub async fn submit(&mut self, user_id: UserId, language: &str) -> Submission {
        self.submit_source(user_id, language, "int main() { return 0; }")
            .await
    }

    pub async fn submit_source(
        &mut self,
        user_id: UserId,
        language: &str,
        source_code: &str,
    ) -> Submission {
        self.minutes += 1;
        SubmissionStore::create(
            self.store.as_ref(),
            &NewSubmission {
                user_id,
                problem_id: PROBLEM,
                contest_id: CONTEST,
                language: language.to_string(),
                source_code: source_code.to_string(),
                submitted_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
                    + chrono::Duration::minutes(self.minutes),
            },
        )
        .await
        .unwrap()
    }

    pub fn judge(&self, sandbox: Arc<dyn Sandbox>, parallelism: usize) -> Judge {
        self.judge_with_languages(sandbox, parallelism, LanguageRegistry::builtin())
    }

    pub fn judge_with_languages(
        &self,
        sandbox: Arc<dyn Sandbox>,
        parallelism: usize,
        languages: LanguageRegistry,
    ) -> Judge {
        Judge::new(
            self.stores.clone(),
            Arc::new(languages),
            sandbox,
            JudgeSettings {
                parallelism,
                compile_timeout: Duration::from_secs(30),
            },
        )
    }
}
