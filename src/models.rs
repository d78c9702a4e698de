use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ContestId = u32;
pub type ProblemId = u32;
pub type TestCaseId = u32;
pub type SubmissionId = u32;
pub type UserId = u32;

/// Outcome of running a submission against one test case
///
/// `Error` is not a legitimate verdict: it marks an infrastructure fault and
/// only appears so the aggregator can rank it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Accepted,
    #[serde(rename = "Wrong Answer")]
    WrongAnswer,
    #[serde(rename = "Time Limit Exceeded")]
    TimeLimitExceeded,
    #[serde(rename = "Runtime Error")]
    RuntimeError,
    #[serde(rename = "Compilation Error")]
    CompilationError,
    Error,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::WrongAnswer => "Wrong Answer",
            Self::TimeLimitExceeded => "Time Limit Exceeded",
            Self::RuntimeError => "Runtime Error",
            Self::CompilationError => "Compilation Error",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Accepted" => Ok(Self::Accepted),
            "Wrong Answer" => Ok(Self::WrongAnswer),
            "Time Limit Exceeded" => Ok(Self::TimeLimitExceeded),
            "Runtime Error" => Ok(Self::RuntimeError),
            "Compilation Error" => Ok(Self::CompilationError),
            "Error" => Ok(Self::Error),
            other => Err(anyhow::anyhow!("Unknown verdict: {other}")),
        }
    }
}

/// Lifecycle status of a whole submission
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(into = "String", try_from = "String")]
pub enum SubmissionStatus {
    Pending,
    Judging,
    Judged(Verdict),
}

impl SubmissionStatus {
    pub const ACCEPTED: Self = Self::Judged(Verdict::Accepted);
    pub const ERROR: Self = Self::Judged(Verdict::Error);

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Judging => "Judging",
            Self::Judged(verdict) => verdict.as_str(),
        }
    }

    /// Whether this status counts as an attempt for penalty purposes
    pub fn is_attempt(&self) -> bool {
        matches!(self, Self::Judged(v) if *v != Verdict::Error)
    }
}

impl From<Verdict> for SubmissionStatus {
    fn from(verdict: Verdict) -> Self {
        Self::Judged(verdict)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Judging" => Ok(Self::Judging),
            other => other.parse::<Verdict>().map(Self::Judged),
        }
    }
}

impl From<SubmissionStatus> for String {
    fn from(status: SubmissionStatus) -> Self {
        status.as_str().to_string()
    }
}

impl TryFrom<String> for SubmissionStatus {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Problem {
    pub id: ProblemId,
    pub contest_id: ContestId,
    pub title: String,
    /// Time limit in seconds
    pub time_limit: f64,
    /// Memory limit in MB
    pub memory_limit: u32,
    pub weight: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TestCase {
    pub id: TestCaseId,
    pub problem_id: ProblemId,
    pub input: String,
    pub expected_output: String,
    pub weight: u32,
    pub is_sample: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Submission {
    pub id: SubmissionId,
    pub user_id: UserId,
    pub problem_id: ProblemId,
    pub contest_id: ContestId,
    pub language: String,
    pub source_code: String,
    pub submitted_at: DateTime<Utc>,
    pub status: SubmissionStatus,
    /// Summed weight of the test cases passed in the latest judging run
    pub score: u32,
}

/// Fields needed to create a submission; the store assigns id and status
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewSubmission {
    pub user_id: UserId,
    pub problem_id: ProblemId,
    pub contest_id: ContestId,
    pub language: String,
    pub source_code: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub submission_id: SubmissionId,
    pub test_case_id: TestCaseId,
    pub status: Verdict,
    /// Wall time in microseconds
    pub time_us: u64,
    pub memory_kb: u64,
    pub error: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ContestStanding {
    pub contest_id: ContestId,
    pub user_id: UserId,
    pub total_score: u32,
    pub solved: u32,
    pub penalty: u32,
    pub rank: u32,
}
