use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use crate::models::{ContestId, ContestStanding, Submission, SubmissionStatus, UserId};
use crate::store::Stores;

/// Penalty added for every rejected attempt before a problem's first acceptance
pub const PENALTY_PER_ATTEMPT: u32 = 10;

/// Recomputes contest standings from submission history
///
/// Standings are always derived from scratch for one (contest, user) pair,
/// so calling [`ScoringEngine::recompute`] twice is harmless. Recomputes
/// within one contest run one at a time.
pub struct ScoringEngine {
    stores: Stores,
    penalty_per_attempt: u32,
    contests: Mutex<HashMap<ContestId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ScoringEngine {
    pub fn new(stores: Stores, penalty_per_attempt: u32) -> Self {
        Self {
            stores,
            penalty_per_attempt,
            contests: Mutex::new(HashMap::new()),
        }
    }

    fn contest_lock(&self, contest_id: ContestId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.contests.lock().entry(contest_id).or_default())
    }

    pub async fn recompute(&self, contest_id: ContestId, user_id: UserId) -> Result<ContestStanding> {
        let lock = self.contest_lock(contest_id);
        let _guard = lock.lock().await;

        let problems = self.stores.problems.list_by_contest(contest_id).await?;

        let mut standing = ContestStanding {
            contest_id,
            user_id,
            ..Default::default()
        };
        for problem in &problems {
            let submissions = self
                .stores
                .submissions
                .list_for_user(contest_id, problem.id, user_id)
                .await?;
            if let Some(rejected) = rejected_before_acceptance(submissions) {
                standing.total_score += problem.weight;
                standing.solved += 1;
                standing.penalty += rejected * self.penalty_per_attempt;
            }
        }

        let mut standings = self.stores.standings.list_by_contest(contest_id).await?;
        let previous_ranks: HashMap<UserId, u32> =
            standings.iter().map(|s| (s.user_id, s.rank)).collect();
        standings.retain(|s| s.user_id != user_id);
        standings.push(standing);
        rank(&mut standings);

        let mut own = None;
        let mut changed = Vec::new();
        for ranked in standings {
            if ranked.user_id == user_id {
                own = Some(ranked.clone());
                changed.push(ranked);
            } else if previous_ranks.get(&ranked.user_id) != Some(&ranked.rank) {
                log::debug!(
                    "User {} moved to rank {} in contest {contest_id}",
                    ranked.user_id,
                    ranked.rank
                );
                changed.push(ranked);
            }
        }
        self.stores.standings.upsert_many(&changed).await?;

        // The user's entry was pushed above, so it is always found
        let standing = own.unwrap_or_default();
        log::info!(
            "Standing of user {user_id} in contest {contest_id}: score {} solved {} penalty {} rank {}",
            standing.total_score,
            standing.solved,
            standing.penalty,
            standing.rank
        );
        Ok(standing)
    }

    /// Ranked standings of a contest
    pub async fn standings(&self, contest_id: ContestId) -> Result<Vec<ContestStanding>> {
        let mut standings = self.stores.standings.list_by_contest(contest_id).await?;
        standings.sort_by_key(|s| (s.rank, s.user_id));
        Ok(standings)
    }
}

/// Rejected attempts before the earliest accepted submission, or `None` when
/// nothing was accepted
///
/// Submissions still waiting or hit by an infrastructure fault are not
/// attempts.
fn rejected_before_acceptance(mut submissions: Vec<Submission>) -> Option<u32> {
    submissions.sort_by_key(|s| (s.submitted_at, s.id));

    let mut rejected = 0;
    for submission in submissions.iter().filter(|s| s.status.is_attempt()) {
        if submission.status == SubmissionStatus::ACCEPTED {
            return Some(rejected);
        }
        rejected += 1;
    }
    None
}

/// Orders standings by score, then penalty, then user id and assigns
/// sequential ranks starting at 1
pub fn rank(standings: &mut [ContestStanding]) {
    standings.sort_by_key(|s| (Reverse(s.total_score), s.penalty, s.user_id));
    for (i, standing) in standings.iter_mut().enumerate() {
        standing.rank = i as u32 + 1;
    }
}
