//! Completion tracking for one push round.
//!
//! A round fans out into one task per (project, ref, destination). The total
//! number of tasks is only known once enumeration finishes, and tasks may
//! complete before that happens. [`ReplicationState`] therefore defers every
//! "done" decision until both `all_scheduled` is set and the relevant counts
//! are equal, checked by whichever side reaches the threshold last.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::processing::{PushResultProcessing, RefPushResult, RefUpdateStatus};

type RefKey = (String, String);

#[derive(Debug)]
struct RefReplicationStatus {
    project: String,
    git_ref: String,
    nodes_to_replicate: usize,
    replicated_nodes: usize,
}

impl RefReplicationStatus {
    const fn all_done(&self) -> bool {
        self.replicated_nodes == self.nodes_to_replicate
    }
}

/// Counters, ref table and completion bookkeeping guarded by one lock.
#[derive(Debug, Default)]
struct Counting {
    all_scheduled: bool,
    total_push_tasks: usize,
    finished_push_tasks: usize,
    status_by_project_ref: HashMap<RefKey, RefReplicationStatus>,
    /// Ref-level notifications claimed but not yet delivered.
    in_flight_notifications: usize,
    /// Round completion was triggered and the final notification is owed.
    completion_pending: bool,
    /// Round completion has been triggered; never reset.
    completed: bool,
}

impl Counting {
    fn round_finished(&self) -> bool {
        self.all_scheduled && self.finished_push_tasks == self.total_push_tasks
    }

    /// Marks the round complete and claims every ref still in the table.
    fn begin_completion(&mut self) -> Vec<RefReplicationStatus> {
        self.completed = true;
        self.completion_pending = true;
        let remaining: Vec<_> = self
            .status_by_project_ref
            .drain()
            .map(|(_, status)| status)
            .collect();
        self.in_flight_notifications += remaining.len();
        remaining
    }

    /// Claims the refs whose every task already reported.
    fn claim_finished_refs(&mut self) -> Vec<RefReplicationStatus> {
        let done: Vec<RefKey> = self
            .status_by_project_ref
            .iter()
            .filter(|(_, status)| status.all_done())
            .map(|(key, _)| key.clone())
            .collect();
        let claimed: Vec<_> = done
            .iter()
            .filter_map(|key| self.status_by_project_ref.remove(key))
            .collect();
        self.in_flight_notifications += claimed.len();
        claimed
    }

    /// Releases delivered notifications and hands back the round total when
    /// the caller is the one that must deliver the round-level notification.
    fn release(&mut self, delivered: usize) -> Option<usize> {
        self.in_flight_notifications = self.in_flight_notifications.saturating_sub(delivered);
        if self.completion_pending && self.in_flight_notifications == 0 {
            self.completion_pending = false;
            return Some(self.total_push_tasks);
        }
        None
    }
}

/// Tracks scheduled and finished push tasks for one replication round.
///
/// Every task calls [`increase_push_task_count`](Self::increase_push_task_count)
/// before it starts and [`notify_ref_replicated`](Self::notify_ref_replicated)
/// exactly once when it finishes. The enumerating side calls
/// [`mark_all_push_tasks_scheduled`](Self::mark_all_push_tasks_scheduled)
/// once it has submitted every task.
pub struct ReplicationState {
    processing: Arc<dyn PushResultProcessing>,
    counting: Mutex<Counting>,
    finished: watch::Sender<bool>,
}

impl std::fmt::Debug for ReplicationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationState")
            .field("counting", &self.counting)
            .finish_non_exhaustive()
    }
}

impl ReplicationState {
    /// Creates the tracker for a new round reporting to `processing`.
    #[must_use]
    pub fn new(processing: Arc<dyn PushResultProcessing>) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            processing,
            counting: Mutex::new(Counting::default()),
            finished,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counting> {
        self.counting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers one push task for `git_ref` of `project`.
    pub fn increase_push_task_count(&self, project: &str, git_ref: &str) {
        let mut counting = self.lock();
        if counting.completed {
            warn!(project, git_ref, "push task registered after round completion");
        }
        counting
            .status_by_project_ref
            .entry((project.to_owned(), git_ref.to_owned()))
            .or_insert_with(|| RefReplicationStatus {
                project: project.to_owned(),
                git_ref: git_ref.to_owned(),
                nodes_to_replicate: 0,
                replicated_nodes: 0,
            })
            .nodes_to_replicate += 1;
        counting.total_push_tasks += 1;
    }

    /// Returns `true` when at least one task was ever registered.
    #[must_use]
    pub fn has_push_task(&self) -> bool {
        self.lock().total_push_tasks != 0
    }

    /// Records the outcome of one push task.
    ///
    /// The per-node notification is forwarded immediately. A report for a
    /// ref that was never registered is forwarded but not counted.
    pub fn notify_ref_replicated(
        &self,
        project: &str,
        git_ref: &str,
        uri: &str,
        result: RefPushResult,
        status: RefUpdateStatus,
    ) {
        self.processing
            .on_ref_replicated_to_one_node(project, git_ref, uri, result, status);

        let mut claimed = Vec::new();
        {
            let mut counting = self.lock();
            if counting.completed {
                debug!(project, git_ref, uri, "push result reported after round completion");
                return;
            }

            let key = (project.to_owned(), git_ref.to_owned());
            let Some(ref_status) = counting.status_by_project_ref.get_mut(&key) else {
                warn!(project, git_ref, uri, "push result reported for unregistered ref");
                return;
            };
            if ref_status.all_done() {
                warn!(project, git_ref, uri, "more push results than registered tasks");
                return;
            }
            ref_status.replicated_nodes += 1;
            let ref_done = ref_status.all_done();
            counting.finished_push_tasks += 1;

            if counting.all_scheduled {
                if ref_done && let Some(done) = counting.status_by_project_ref.remove(&key) {
                    counting.in_flight_notifications += 1;
                    claimed.push(done);
                }
                if counting.round_finished() {
                    claimed.extend(counting.begin_completion());
                }
            }
        }

        self.deliver(claimed);
    }

    /// Declares that every task of the round has been registered.
    ///
    /// Refs whose tasks all reported are notified at once. The round
    /// completes immediately when every registered task already reported.
    /// Repeated calls are ignored.
    pub fn mark_all_push_tasks_scheduled(&self) {
        let claimed = {
            let mut counting = self.lock();
            if counting.all_scheduled {
                warn!("push tasks already marked as scheduled");
                return;
            }
            counting.all_scheduled = true;
            if counting.finished_push_tasks < counting.total_push_tasks {
                counting.claim_finished_refs()
            } else {
                counting.begin_completion()
            }
        };

        self.deliver(claimed);
    }

    /// Resolves once the round-level notification has been delivered.
    pub async fn wait_for_replication(&self) {
        let mut finished = self.finished.subscribe();
        if finished.wait_for(|done| *done).await.is_err() {
            debug!("replication state dropped before completion");
        }
    }

    /// Returns `true` once round completion has been delivered.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Forwards an informational message to the round's processor.
    pub fn write_std_out(&self, message: &str) {
        self.processing.write_std_out(message);
    }

    /// Forwards an error message to the round's processor.
    pub fn write_std_err(&self, message: &str) {
        self.processing.write_std_err(message);
    }

    fn deliver(&self, claimed: Vec<RefReplicationStatus>) {
        let delivered = claimed.len();
        for status in claimed {
            self.processing.on_ref_replicated_to_all_nodes(
                &status.project,
                &status.git_ref,
                status.nodes_to_replicate,
            );
        }

        let owed = {
            let mut counting = self.lock();
            counting.release(delivered)
        };
        if let Some(total_push_tasks) = owed {
            info!(total_push_tasks, "replication round completed");
            self.processing
                .on_all_refs_replicated_to_all_nodes(total_push_tasks);
            self.finished.send_replace(true);
        }
    }
}

#[cfg(test)]
mod tests;
