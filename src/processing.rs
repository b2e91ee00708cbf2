//! Result-processing collaborators notified as a push round progresses.
//!
//! [`ReplicationState`](crate::state::ReplicationState) forwards every
//! per-node outcome here and, once the round's counters settle, the ref-level
//! and round-level completions. Two implementations are provided: one that
//! renders progress for an interactive caller and one that only logs.

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::{info, warn};

/// Outcome of replicating one ref to one node.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RefPushResult {
    /// The ref was not successfully replicated.
    Failed,
    /// The ref is not configured to be replicated.
    NotAttempted,
    /// The ref was successfully replicated.
    Succeeded,
}

impl fmt::Display for RefPushResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Failed => "failed",
            Self::NotAttempted => "not-attempted",
            Self::Succeeded => "succeeded",
        };
        f.write_str(label)
    }
}

/// Status reported by the remote for a single ref update.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RefUpdateStatus {
    /// The update has not been attempted.
    NotAttempted,
    /// The remote already had the requested object.
    UpToDate,
    /// Rejected because it was not a fast-forward.
    RejectedNonFastForward,
    /// Rejected because the remote does not allow deletions.
    RejectedNoDelete,
    /// Rejected because the remote ref changed while pushing.
    RejectedRemoteChanged,
    /// Rejected for a reason given by the remote.
    RejectedOtherReason,
    /// Deletion requested for a ref the remote does not have.
    NonExisting,
    /// Sent, but the remote has not reported a status yet.
    AwaitingReport,
    /// The remote accepted the update.
    Ok,
}

impl fmt::Display for RefUpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotAttempted => "not-attempted",
            Self::UpToDate => "up-to-date",
            Self::RejectedNonFastForward => "rejected-nonfastforward",
            Self::RejectedNoDelete => "rejected-nodelete",
            Self::RejectedRemoteChanged => "rejected-remote-changed",
            Self::RejectedOtherReason => "rejected-other-reason",
            Self::NonExisting => "non-existing",
            Self::AwaitingReport => "awaiting-report",
            Self::Ok => "ok",
        };
        f.write_str(label)
    }
}

/// Receives the notifications produced by a push round.
///
/// Implementations are called from replication worker threads without any
/// tracker lock held, so they may block briefly but must be thread-safe.
pub trait PushResultProcessing: Send + Sync {
    /// Called once for every (ref, destination) task as soon as it reports.
    fn on_ref_replicated_to_one_node(
        &self,
        project: &str,
        git_ref: &str,
        uri: &str,
        result: RefPushResult,
        status: RefUpdateStatus,
    );

    /// Called once per ref after every task registered for it has reported.
    fn on_ref_replicated_to_all_nodes(&self, project: &str, git_ref: &str, node_count: usize);

    /// Called once per round after every registered task has reported.
    fn on_all_refs_replicated_to_all_nodes(&self, total_push_tasks: usize);

    /// Writes an informational message for the caller that owns the round.
    fn write_std_out(&self, _message: &str) {}

    /// Writes an error message for the caller that owns the round.
    fn write_std_err(&self, _message: &str) {}
}

/// Renders replication progress to a pair of writers.
///
/// Used when a caller waits interactively for a round; per-node failures go
/// to the error writer and the final line states whether any ref failed.
pub struct CommandProcessing {
    out: Mutex<Box<dyn Write + Send>>,
    err: Mutex<Box<dyn Write + Send>>,
    has_error: AtomicBool,
}

impl fmt::Debug for CommandProcessing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandProcessing")
            .field("has_error", &self.has_error.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl CommandProcessing {
    /// Builds a processor writing to the given stdout and stderr targets.
    #[must_use]
    pub fn new(out: Box<dyn Write + Send>, err: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            err: Mutex::new(err),
            has_error: AtomicBool::new(false),
        }
    }

    /// Returns `true` once any node reported a failed ref.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::Acquire)
    }

    fn write_line(target: &Mutex<Box<dyn Write + Send>>, message: &str) {
        let mut writer = target.lock().unwrap_or_else(PoisonError::into_inner);
        if writeln!(writer, "{message}").and_then(|()| writer.flush()).is_err() {
            warn!(message, "failed to write replication progress");
        }
    }
}

impl PushResultProcessing for CommandProcessing {
    fn on_ref_replicated_to_one_node(
        &self,
        project: &str,
        git_ref: &str,
        uri: &str,
        result: RefPushResult,
        status: RefUpdateStatus,
    ) {
        let outcome = match result {
            RefPushResult::Succeeded => "Succeeded!",
            RefPushResult::Failed => {
                self.has_error.store(true, Ordering::Release);
                "FAILED!"
            }
            RefPushResult::NotAttempted => "NOT ATTEMPTED!",
        };
        let line = format!("Replicate {project} ref {git_ref} to {uri}, {outcome} ({status})");
        if result == RefPushResult::Failed {
            self.write_std_err(&line);
        } else {
            self.write_std_out(&line);
        }
    }

    fn on_ref_replicated_to_all_nodes(&self, project: &str, git_ref: &str, node_count: usize) {
        let noun = if node_count == 1 { "node" } else { "nodes" };
        self.write_std_out(&format!(
            "Replication of {project} ref {git_ref} completed to {node_count} {noun}"
        ));
    }

    fn on_all_refs_replicated_to_all_nodes(&self, total_push_tasks: usize) {
        if total_push_tasks == 0 {
            return;
        }
        self.write_std_out("----------------------------------------------");
        if self.has_error() {
            self.write_std_out("Replication completed with some errors!");
        } else {
            self.write_std_out("Replication completed successfully!");
        }
    }

    fn write_std_out(&self, message: &str) {
        Self::write_line(&self.out, message);
    }

    fn write_std_err(&self, message: &str) {
        Self::write_line(&self.err, message);
    }
}

/// Reports round progress through `tracing` only.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingProcessing;

impl PushResultProcessing for LoggingProcessing {
    fn on_ref_replicated_to_one_node(
        &self,
        project: &str,
        git_ref: &str,
        uri: &str,
        result: RefPushResult,
        status: RefUpdateStatus,
    ) {
        if result == RefPushResult::Failed {
            warn!(project, git_ref, uri, %result, %status, "ref replication failed");
        } else {
            info!(project, git_ref, uri, %result, %status, "ref replicated");
        }
    }

    fn on_ref_replicated_to_all_nodes(&self, project: &str, git_ref: &str, node_count: usize) {
        info!(project, git_ref, node_count, "ref replicated to all nodes");
    }

    fn on_all_refs_replicated_to_all_nodes(&self, total_push_tasks: usize) {
        info!(total_push_tasks, "all refs replicated to all nodes");
    }

    fn write_std_out(&self, message: &str) {
        info!("{message}");
    }

    fn write_std_err(&self, message: &str) {
        warn!("{message}");
    }
}
