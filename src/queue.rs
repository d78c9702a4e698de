use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::models::SubmissionId;

/// Submissions waiting for a worker, first in first out
pub struct JudgeQueue {
    queue: Mutex<VecDeque<SubmissionId>>,
    notify: Notify,
}

impl Default for JudgeQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JudgeQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Enqueues a submission unless it is already waiting
    pub async fn push(&self, submission_id: SubmissionId) -> bool {
        let mut queue = self.queue.lock().await;
        if queue.contains(&submission_id) {
            return false;
        }
        queue.push_back(submission_id);
        drop(queue);
        self.notify.notify_one();
        true
    }

    pub async fn pop(&self) -> SubmissionId {
        loop {
            if let Some(submission_id) = self.queue.lock().await.pop_front() {
                return submission_id;
            }
            self.notify.notified().await;
        }
    }
}
