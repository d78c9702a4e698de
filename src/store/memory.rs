use std::collections::BTreeMap;

use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::RwLock;

use super::{
    ContestStandingStore, ExecutionResultStore, ProblemStore, SubmissionStore, TestCaseStore,
};
use crate::models::{
    ContestId, ContestStanding, ExecutionResult, NewSubmission, Problem, ProblemId, Submission,
    SubmissionId, SubmissionStatus, TestCase, TestCaseId, UserId,
};

#[derive(Default)]
struct Inner {
    problems: BTreeMap<ProblemId, Problem>,
    test_cases: BTreeMap<TestCaseId, TestCase>,
    submissions: BTreeMap<SubmissionId, Submission>,
    results: Vec<ExecutionResult>,
    standings: BTreeMap<(ContestId, UserId), ContestStanding>,
    /// Last id handed out; ids start at 1 like SQLite rowids
    next_submission_id: SubmissionId,
}

/// Store keeping everything in process memory
///
/// Used by tests and by embedders that persist elsewhere.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProblemStore for MemoryStore {
    async fn get(&self, id: ProblemId) -> Result<Option<Problem>> {
        Ok(self.inner.read().problems.get(&id).cloned())
    }

    async fn list_by_contest(&self, contest_id: ContestId) -> Result<Vec<Problem>> {
        Ok(self
            .inner
            .read()
            .problems
            .values()
            .filter(|p| p.contest_id == contest_id)
            .cloned()
            .collect())
    }

    async fn create(&self, problem: &Problem) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.problems.contains_key(&problem.id) {
            bail!("Problem {} already exists", problem.id);
        }
        inner.problems.insert(problem.id, problem.clone());
        Ok(())
    }
}

#[async_trait]
impl TestCaseStore for MemoryStore {
    async fn list_by_problem(&self, problem_id: ProblemId) -> Result<Vec<TestCase>> {
        Ok(self
            .inner
            .read()
            .test_cases
            .values()
            .filter(|t| t.problem_id == problem_id)
            .cloned()
            .collect())
    }

    async fn create(&self, test_case: &TestCase) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.test_cases.contains_key(&test_case.id) {
            bail!("Test case {} already exists", test_case.id);
        }
        inner.test_cases.insert(test_case.id, test_case.clone());
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn get(&self, id: SubmissionId) -> Result<Option<Submission>> {
        Ok(self.inner.read().submissions.get(&id).cloned())
    }

    async fn create(&self, new: &NewSubmission) -> Result<Submission> {
        let mut inner = self.inner.write();
        inner.next_submission_id += 1;
        let id = inner.next_submission_id;

        let submission = Submission {
            id,
            user_id: new.user_id,
            problem_id: new.problem_id,
            contest_id: new.contest_id,
            language: new.language.clone(),
            source_code: new.source_code.clone(),
            submitted_at: new.submitted_at,
            status: SubmissionStatus::Pending,
            score: 0,
        };
        inner.submissions.insert(id, submission.clone());
        Ok(submission)
    }

    async fn update_status(&self, id: SubmissionId, status: SubmissionStatus) -> Result<()> {
        match self.inner.write().submissions.get_mut(&id) {
            Some(submission) => {
                submission.status = status;
                Ok(())
            }
            None => bail!("Submission {id} does not exist"),
        }
    }

    async fn update_score(&self, id: SubmissionId, score: u32) -> Result<()> {
        match self.inner.write().submissions.get_mut(&id) {
            Some(submission) => {
                submission.score = score;
                Ok(())
            }
            None => bail!("Submission {id} does not exist"),
        }
    }

    async fn list_for_user(
        &self,
        contest_id: ContestId,
        problem_id: ProblemId,
        user_id: UserId,
    ) -> Result<Vec<Submission>> {
        let mut submissions: Vec<Submission> = self
            .inner
            .read()
            .submissions
            .values()
            .filter(|s| {
                s.contest_id == contest_id && s.problem_id == problem_id && s.user_id == user_id
            })
            .cloned()
            .collect();
        submissions.sort_by_key(|s| (s.submitted_at, s.id));
        Ok(submissions)
    }

    async fn list_pending(&self) -> Result<Vec<SubmissionId>> {
        let inner = self.inner.read();
        let mut pending: Vec<&Submission> = inner
            .submissions
            .values()
            .filter(|s| s.status == SubmissionStatus::Pending)
            .collect();
        pending.sort_by_key(|s| (s.submitted_at, s.id));
        Ok(pending.into_iter().map(|s| s.id).collect())
    }
}

#[async_trait]
impl ExecutionResultStore for MemoryStore {
    async fn clear_for_submission(&self, submission_id: SubmissionId) -> Result<()> {
        self.inner
            .write()
            .results
            .retain(|r| r.submission_id != submission_id);
        Ok(())
    }

    async fn create(&self, result: &ExecutionResult) -> Result<()> {
        self.inner.write().results.push(result.clone());
        Ok(())
    }

    async fn create_many(&self, results: &[ExecutionResult]) -> Result<()> {
        self.inner.write().results.extend_from_slice(results);
        Ok(())
    }

    async fn list_by_submission(&self, submission_id: SubmissionId) -> Result<Vec<ExecutionResult>> {
        Ok(self
            .inner
            .read()
            .results
            .iter()
            .filter(|r| r.submission_id == submission_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ContestStandingStore for MemoryStore {
    async fn upsert(&self, standing: &ContestStanding) -> Result<()> {
        self.inner
            .write()
            .standings
            .insert((standing.contest_id, standing.user_id), standing.clone());
        Ok(())
    }

    async fn upsert_many(&self, standings: &[ContestStanding]) -> Result<()> {
        let mut inner = self.inner.write();
        for standing in standings {
            inner
                .standings
                .insert((standing.contest_id, standing.user_id), standing.clone());
        }
        Ok(())
    }

    async fn list_by_contest(&self, contest_id: ContestId) -> Result<Vec<ContestStanding>> {
        Ok(self
            .inner
            .read()
            .standings
            .values()
            .filter(|s| s.contest_id == contest_id)
            .cloned()
            .collect())
    }
}
