//! Bounded, cancellable waiting on child processes.

use std::io;
use std::process::{Child, ExitStatus};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How a wait on a child process ended.
#[derive(Debug)]
pub(crate) enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
    Abandoned,
}

/// Polls `child` until it exits, `timeout` elapses or `cancel` fires.
///
/// A `None` timeout waits without bound.
pub(crate) fn wait_bounded(
    child: &mut Child,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> io::Result<WaitOutcome> {
    let deadline = timeout.map(|limit| Instant::now() + limit);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(WaitOutcome::Exited(status));
        }
        if cancel.is_cancelled() {
            return Ok(WaitOutcome::Abandoned);
        }
        let now = Instant::now();
        if deadline.is_some_and(|limit| now >= limit) {
            return Ok(WaitOutcome::TimedOut);
        }
        let nap = deadline.map_or(POLL_INTERVAL, |limit| {
            POLL_INTERVAL.min(limit.saturating_duration_since(now))
        });
        thread::sleep(nap);
    }
}

/// Kills and reaps `child`, ignoring a process that already exited.
pub(crate) fn kill_and_reap(child: &mut Child) {
    if child.kill().is_ok() {
        let _status = child.wait();
    }
}

/// Joins the finished `handles` until `deadline`, then detaches the rest.
///
/// Returns the number of threads left running. A descendant of the remote
/// command may keep a stream open long after the command itself exited.
pub(crate) fn join_until(handles: Vec<JoinHandle<()>>, deadline: Instant) -> usize {
    let mut pending = handles;
    loop {
        let (finished, running): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(JoinHandle::is_finished);
        for handle in finished {
            if handle.join().is_err() {
                warn!("remote stream drain thread panicked");
            }
        }
        let now = Instant::now();
        if running.is_empty() || now >= deadline {
            return running.len();
        }
        thread::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(now)));
        pending = running;
    }
}
