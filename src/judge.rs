use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::JudgeConfig;
use crate::error::JudgeError;
use crate::language::{Adapter, LanguageRegistry, SourceFile};
use crate::models::{
    ExecutionResult, Submission, SubmissionId, SubmissionStatus, TestCase, Verdict,
};
use crate::sandbox::{RunLimits, RunOutcome, Sandbox, Workspace};
use crate::store::Stores;
use crate::verdict::aggregate;

/// Stored error text is cut off beyond this many bytes
const ERROR_TEXT_LIMIT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JudgeSettings {
    /// Test cases of one submission running at the same time
    pub parallelism: usize,
    pub compile_timeout: Duration,
}

impl JudgeSettings {
    pub fn from_config(config: &JudgeConfig) -> Self {
        Self {
            parallelism: config.parallelism.unwrap_or_else(available_cpus).max(1),
            compile_timeout: Duration::from_secs(config.compile_timeout_secs),
        }
    }
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            parallelism: available_cpus(),
            compile_timeout: Duration::from_secs(30),
        }
    }
}

fn available_cpus() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

/// What a finished judging run produced
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct JudgeReport {
    pub submission_id: SubmissionId,
    pub status: SubmissionStatus,
    pub score: u32,
    /// In test case order
    pub results: Vec<ExecutionResult>,
}

/// Submissions currently being judged
#[derive(Default)]
struct JudgeLocks {
    active: Mutex<HashSet<SubmissionId>>,
}

struct JudgeLock<'a> {
    locks: &'a JudgeLocks,
    id: SubmissionId,
}

impl JudgeLocks {
    fn acquire(&self, id: SubmissionId) -> Option<JudgeLock<'_>> {
        self.active
            .lock()
            .insert(id)
            .then_some(JudgeLock { locks: self, id })
    }
}

impl Drop for JudgeLock<'_> {
    fn drop(&mut self) {
        self.locks.active.lock().remove(&self.id);
    }
}

/// Drives a submission from `Pending` to its final status
///
/// The source is compiled once into a build workspace, then every test case
/// runs against a private copy of it. Runs of one submission share a pool of
/// `parallelism` slots; results are persisted in test case order.
pub struct Judge {
    stores: Stores,
    languages: Arc<LanguageRegistry>,
    sandbox: Arc<dyn Sandbox>,
    settings: JudgeSettings,
    locks: JudgeLocks,
}

impl Judge {
    pub fn new(
        stores: Stores,
        languages: Arc<LanguageRegistry>,
        sandbox: Arc<dyn Sandbox>,
        settings: JudgeSettings,
    ) -> Self {
        Self {
            stores,
            languages,
            sandbox,
            settings,
            locks: JudgeLocks::default(),
        }
    }

    /// Judges (or rejudges) one submission
    ///
    /// Cancelling `token` kills the running programs and fails the attempt
    /// with [`JudgeError::Cancelled`].
    pub async fn judge(
        &self,
        submission_id: SubmissionId,
        token: &CancellationToken,
    ) -> Result<JudgeReport, JudgeError> {
        let _lock = self
            .locks
            .acquire(submission_id)
            .ok_or(JudgeError::AlreadyJudging(submission_id))?;

        let submission = self
            .stores
            .submissions
            .get(submission_id)
            .await?
            .ok_or(JudgeError::SubmissionNotFound(submission_id))?;

        match self.judge_submission(&submission, token).await {
            Ok(report) => Ok(report),
            Err(e) => {
                log::error!("Judging submission {submission_id} failed: {e}");
                if let Err(store_error) = self
                    .stores
                    .submissions
                    .update_status(submission_id, SubmissionStatus::ERROR)
                    .await
                {
                    log::error!(
                        "Failed to mark submission {submission_id} as Error: {store_error:#}"
                    );
                }
                Err(e)
            }
        }
    }

    async fn judge_submission(
        &self,
        submission: &Submission,
        token: &CancellationToken,
    ) -> Result<JudgeReport, JudgeError> {
        let id = submission.id;

        let problem = self
            .stores
            .problems
            .get(submission.problem_id)
            .await?
            .ok_or(JudgeError::ProblemNotFound(submission.problem_id))?;
        let time_limit = Duration::try_from_secs_f64(problem.time_limit).with_context(|| {
            format!("Problem {} has an invalid time limit {}", problem.id, problem.time_limit)
        })?;
        let test_cases = self.stores.test_cases.list_by_problem(problem.id).await?;

        self.stores
            .submissions
            .update_status(id, SubmissionStatus::Judging)
            .await?;
        self.stores.results.clear_for_submission(id).await?;
        self.stores.submissions.update_score(id, 0).await?;
        log::info!(
            "Judging submission {id} ({}, problem {}, {} test cases)",
            submission.language,
            problem.id,
            test_cases.len()
        );

        if test_cases.is_empty() {
            return Err(JudgeError::NoTestCases(problem.id));
        }

        let adapter = self.languages.resolve(&submission.language)?;
        let source = adapter.source_file(&submission.source_code);
        let build = Workspace::create()?;
        build.write_file(&source.file_name, &submission.source_code)?;

        let compiled = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(JudgeError::Cancelled(id)),
            outcome = self.sandbox.compile(&adapter, &source, build.path(), self.settings.compile_timeout) => outcome?,
        };

        if !compiled.ok {
            log::info!("Submission {id} failed to compile in {:?}", compiled.time);
            let error = truncate(&compiled.stderr);
            let results: Vec<ExecutionResult> = test_cases
                .iter()
                .map(|test_case| ExecutionResult {
                    submission_id: id,
                    test_case_id: test_case.id,
                    status: Verdict::CompilationError,
                    time_us: 0,
                    memory_kb: 0,
                    error: error.clone(),
                })
                .collect();
            return self.finish(submission, &test_cases, results).await;
        }
        log::debug!("Submission {id} compiled in {:?}", compiled.time);

        let limits = RunLimits {
            time_limit,
            memory_limit_mb: problem.memory_limit,
        };
        let (results, failure) = self
            .run_test_cases(id, &adapter, &source, build.path().to_path_buf(), &test_cases, limits, token)
            .await;

        if let Some(e) = failure {
            self.persist(id, &results).await?;
            return Err(e.into());
        }
        if token.is_cancelled() {
            self.persist(id, &results).await?;
            return Err(JudgeError::Cancelled(id));
        }

        self.finish(submission, &test_cases, results).await
    }

    /// Runs every test case, at most `parallelism` at a time
    ///
    /// Returns the results that completed, in test case order, and the first
    /// infrastructure fault if one stopped the remaining runs.
    #[allow(clippy::too_many_arguments)]
    async fn run_test_cases(
        &self,
        submission_id: SubmissionId,
        adapter: &Arc<Adapter>,
        source: &SourceFile,
        build_dir: PathBuf,
        test_cases: &[TestCase],
        limits: RunLimits,
        token: &CancellationToken,
    ) -> (Vec<ExecutionResult>, Option<anyhow::Error>) {
        let runs = token.child_token();
        let slots = Arc::new(Semaphore::new(self.settings.parallelism));
        let mut tasks = JoinSet::new();

        for (index, test_case) in test_cases.iter().enumerate() {
            let sandbox = Arc::clone(&self.sandbox);
            let adapter = Arc::clone(adapter);
            let source = source.clone();
            let build_dir = build_dir.clone();
            let input = test_case.input.clone();
            let slots = Arc::clone(&slots);
            let runs = runs.clone();

            tasks.spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    _ = runs.cancelled() => None,
                    outcome = async {
                        let _slot = slots.acquire_owned().await?;
                        sandbox.run(&adapter, &source, &build_dir, &input, limits).await
                    } => Some(outcome),
                };
                (index, outcome)
            });
        }

        let mut outcomes: Vec<Option<RunOutcome>> = vec![None; test_cases.len()];
        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok((index, Some(outcome))) => outcome.map(|outcome| (index, outcome)),
                Ok((_, None)) => continue,
                Err(e) => Err(anyhow!("Test case task failed: {e}")),
            };
            match outcome {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => {
                    if failure.is_none() {
                        log::warn!("Stopping remaining runs of submission {submission_id}: {e:#}");
                        runs.cancel();
                        failure = Some(e);
                    }
                }
            }
        }

        let results = test_cases
            .iter()
            .zip(outcomes)
            .filter_map(|(test_case, outcome)| {
                let outcome = outcome?;
                let status = outcome.verdict(&test_case.expected_output);
                log::debug!(
                    "Submission {submission_id} test case {}: {status} in {:?}",
                    test_case.id,
                    outcome.wall_time
                );
                Some(ExecutionResult {
                    submission_id,
                    test_case_id: test_case.id,
                    status,
                    time_us: u64::try_from(outcome.wall_time.as_micros()).unwrap_or(u64::MAX),
                    memory_kb: outcome.memory_kb,
                    error: truncate(&outcome.stderr),
                })
            })
            .collect();
        (results, failure)
    }

    async fn persist(
        &self,
        submission_id: SubmissionId,
        results: &[ExecutionResult],
    ) -> anyhow::Result<()> {
        self.stores
            .results
            .create_many(results)
            .await
            .with_context(|| format!("Failed to store results of submission {submission_id}"))
    }

    /// Persists a complete result set and settles the submission
    async fn finish(
        &self,
        submission: &Submission,
        test_cases: &[TestCase],
        results: Vec<ExecutionResult>,
    ) -> Result<JudgeReport, JudgeError> {
        self.persist(submission.id, &results).await?;

        let verdicts: Vec<Verdict> = results.iter().map(|r| r.status).collect();
        let status = SubmissionStatus::from(aggregate(&verdicts));
        let score = results
            .iter()
            .zip(test_cases)
            .filter(|(result, _)| result.status == Verdict::Accepted)
            .map(|(_, test_case)| test_case.weight)
            .sum();

        self.stores.submissions.update_score(submission.id, score).await?;
        self.stores.submissions.update_status(submission.id, status).await?;
        log::info!("Submission {} judged: {status} (score {score})", submission.id);

        Ok(JudgeReport {
            submission_id: submission.id,
            status,
            score,
            results,
        })
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= ERROR_TEXT_LIMIT {
        return text.to_string();
    }
    let mut end = ERROR_TEXT_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
