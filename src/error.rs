use thiserror::Error;

use crate::models::{ProblemId, SubmissionId};

/// Error when a submission names a language with no registered adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported language: {0}")]
pub struct UnsupportedLanguage(pub String);

/// Ways a judging attempt can fail without producing a verdict
///
/// Verdicts such as `Wrong Answer` are data and never appear here. Every
/// variant except [`JudgeError::AlreadyJudging`] leaves the submission in the
/// `Error` state when the submission itself could be loaded.
#[derive(Error, Debug)]
pub enum JudgeError {
    #[error(transparent)]
    UnsupportedLanguage(#[from] UnsupportedLanguage),

    #[error("submission {0} not found")]
    SubmissionNotFound(SubmissionId),

    #[error("problem {0} not found")]
    ProblemNotFound(ProblemId),

    #[error("problem {0} has no test cases")]
    NoTestCases(ProblemId),

    #[error("submission {0} is already being judged")]
    AlreadyJudging(SubmissionId),

    #[error("judging of submission {0} was cancelled")]
    Cancelled(SubmissionId),

    /// Sandbox, filesystem or store failure; needs an explicit rejudge
    #[error("judging infrastructure failed: {0:#}")]
    Infra(#[from] anyhow::Error),
}
