use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::JudgeError;
use crate::judge::Judge;
use crate::models::SubmissionId;
use crate::queue::JudgeQueue;
use crate::scoring::ScoringEngine;
use crate::store::Stores;

/// Pops submissions off the queue, judges them and refreshes standings
///
/// A submission being judged when `token` fires is cancelled and left in
/// the `Error` state for an explicit rejudge.
pub async fn worker(
    id: u8,
    judge: Arc<Judge>,
    scoring: Arc<ScoringEngine>,
    stores: Stores,
    queue: Arc<JudgeQueue>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    log::info!("Worker {id} initialized");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("Worker {id} received shutdown signal, stopping");
                break;
            }

            submission_id = queue.pop() => {
                log::info!("Worker {id} got submission {submission_id} from queue");

                match judge.judge(submission_id, &token).await {
                    Ok(report) => {
                        log::info!("Submission {submission_id} finished on worker {id}: {}", report.status);
                    }
                    Err(JudgeError::AlreadyJudging(_)) => {
                        log::warn!("Submission {submission_id} is already being judged, skipped");
                        continue;
                    }
                    Err(JudgeError::SubmissionNotFound(_)) => {
                        log::error!("Submission {submission_id} vanished, discarded");
                        continue;
                    }
                    Err(e) => {
                        log::error!("Submission {submission_id} failed on worker {id}: {e}");
                    }
                }

                // Even a faulted judging can change the attempt count
                let submission = match stores.submissions.get(submission_id).await {
                    Ok(Some(submission)) => submission,
                    Ok(None) => continue,
                    Err(e) => {
                        log::error!("Failed to reload submission {submission_id}: {e:#}");
                        continue;
                    }
                };
                if let Err(e) = scoring
                    .recompute(submission.contest_id, submission.user_id)
                    .await
                {
                    log::error!(
                        "Failed to refresh standing of user {} in contest {}: {e:#}",
                        submission.user_id,
                        submission.contest_id
                    );
                }
            }
        };
    }

    log::info!("Worker {id} has shut down gracefully");
    Ok(())
}

/// Feeds `Pending` submissions from the store into the queue every `interval`
///
/// A submission is handed out once per stay in `Pending`; resetting it to
/// `Pending` later queues it again.
pub async fn poll_pending(
    stores: Stores,
    queue: Arc<JudgeQueue>,
    interval: Duration,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(interval);
    let mut dispatched: HashSet<SubmissionId> = HashSet::new();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let pending = match stores.submissions.list_pending().await {
                    Ok(pending) => pending,
                    Err(e) => {
                        log::error!("Failed to list pending submissions: {e:#}");
                        continue;
                    }
                };
                dispatched.retain(|id| pending.contains(id));

                for submission_id in pending {
                    if dispatched.insert(submission_id) && queue.push(submission_id).await {
                        log::debug!("Queued submission {submission_id}");
                    }
                }
            }
        }
    }

    log::info!("Stopped polling for pending submissions");
    Ok(())
}
