mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, get_db_path, remove_db};

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    ContestId, ContestStanding, ExecutionResult, NewSubmission, Problem, ProblemId, Submission,
    SubmissionId, SubmissionStatus, TestCase, UserId,
};

#[async_trait]
pub trait ProblemStore: Send + Sync {
    async fn get(&self, id: ProblemId) -> Result<Option<Problem>>;
    async fn list_by_contest(&self, contest_id: ContestId) -> Result<Vec<Problem>>;
    async fn create(&self, problem: &Problem) -> Result<()>;
}

#[async_trait]
pub trait TestCaseStore: Send + Sync {
    /// Test cases of a problem, ordered by id
    async fn list_by_problem(&self, problem_id: ProblemId) -> Result<Vec<TestCase>>;
    async fn create(&self, test_case: &TestCase) -> Result<()>;
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn get(&self, id: SubmissionId) -> Result<Option<Submission>>;
    /// Stores a new submission in the `Pending` state
    async fn create(&self, submission: &NewSubmission) -> Result<Submission>;
    async fn update_status(&self, id: SubmissionId, status: SubmissionStatus) -> Result<()>;
    async fn update_score(&self, id: SubmissionId, score: u32) -> Result<()>;
    /// A user's submissions to one problem of a contest, oldest first
    async fn list_for_user(
        &self,
        contest_id: ContestId,
        problem_id: ProblemId,
        user_id: UserId,
    ) -> Result<Vec<Submission>>;
    /// Ids of submissions still waiting to be judged, oldest first
    async fn list_pending(&self) -> Result<Vec<SubmissionId>>;
}

#[async_trait]
pub trait ExecutionResultStore: Send + Sync {
    async fn clear_for_submission(&self, submission_id: SubmissionId) -> Result<()>;
    async fn create(&self, result: &ExecutionResult) -> Result<()>;
    /// Stores a whole result set, or none of it
    async fn create_many(&self, results: &[ExecutionResult]) -> Result<()>;
    async fn list_by_submission(&self, submission_id: SubmissionId) -> Result<Vec<ExecutionResult>>;
}

#[async_trait]
pub trait ContestStandingStore: Send + Sync {
    async fn upsert(&self, standing: &ContestStanding) -> Result<()>;
    /// Upserts every standing, or none of them
    async fn upsert_many(&self, standings: &[ContestStanding]) -> Result<()>;
    async fn list_by_contest(&self, contest_id: ContestId) -> Result<Vec<ContestStanding>>;
}

/// Handles to every store the judging core consumes
#[derive(Clone)]
pub struct Stores {
    pub problems: Arc<dyn ProblemStore>,
    pub test_cases: Arc<dyn TestCaseStore>,
    pub submissions: Arc<dyn SubmissionStore>,
    pub results: Arc<dyn ExecutionResultStore>,
    pub standings: Arc<dyn ContestStandingStore>,
}

impl Stores {
    /// All stores served by one backend
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: ProblemStore
            + TestCaseStore
            + SubmissionStore
            + ExecutionResultStore
            + ContestStandingStore
            + 'static,
    {
        Self {
            problems: backend.clone(),
            test_cases: backend.clone(),
            submissions: backend.clone(),
            results: backend.clone(),
            standings: backend,
        }
    }
}
