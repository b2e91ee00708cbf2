//! Unit tests for delayed and fixed-rate scheduling.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rstest::{fixture, rstest};
use tokio::time::sleep;

use super::*;

#[fixture]
fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn running_queue() -> WorkQueue {
    let queue = WorkQueue::current("test-queue").expect("runtime should be available");
    queue.start();
    queue
}

fn bump(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + use<> {
    let shared = Arc::clone(counter);
    async move {
        shared.fetch_add(1, Ordering::SeqCst);
    }
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn delayed_task_runs_once_after_delay(counter: Arc<AtomicUsize>) {
    let queue = running_queue();
    let task = queue
        .schedule(Duration::from_secs(30), bump(&counter))
        .expect("schedule should succeed");

    sleep(Duration::from_millis(29_999)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    sleep(Duration::from_millis(2)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(task.is_finished());
    assert!(!task.cancel(), "finished task cannot be cancelled");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn fixed_rate_task_fires_on_schedule(counter: Arc<AtomicUsize>) {
    let queue = running_queue();
    let job_counter = Arc::clone(&counter);
    let _task = queue
        .schedule_at_fixed_rate(Duration::from_secs(120), Duration::from_secs(60), move || {
            bump(&job_counter)
        })
        .expect("schedule should succeed");

    sleep(Duration::from_secs(119)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);

    sleep(Duration::from_secs(120)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 4);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn cancel_succeeds_once_and_prevents_runs(counter: Arc<AtomicUsize>) {
    let queue = running_queue();
    let task = queue
        .schedule(Duration::from_secs(5), bump(&counter))
        .expect("schedule should succeed");

    assert!(task.cancel());
    assert!(!task.cancel(), "second cancel should report failure");
    assert!(task.is_cancelled());

    sleep(Duration::from_secs(10)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn stopping_queue_cancels_pending_work(counter: Arc<AtomicUsize>) {
    let queue = running_queue();
    let task = queue
        .schedule(Duration::from_secs(5), bump(&counter))
        .expect("schedule should succeed");

    queue.stop();
    assert!(!queue.is_running());
    assert!(task.is_cancelled());

    sleep(Duration::from_secs(10)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    let err = queue
        .schedule(Duration::from_secs(1), bump(&counter))
        .expect_err("stopped queue should reject work");
    assert_eq!(
        err,
        QueueError::NotRunning {
            queue: String::from("test-queue"),
        }
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn restarted_queue_accepts_work(counter: Arc<AtomicUsize>) {
    let queue = running_queue();
    queue.stop();
    queue.start();
    assert!(queue.is_running());

    let _task = queue
        .schedule(Duration::from_secs(1), bump(&counter))
        .expect("restarted queue should accept work");
    sleep(Duration::from_secs(2)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn zero_period_is_rejected(counter: Arc<AtomicUsize>) {
    let queue = running_queue();
    let err = queue
        .schedule_at_fixed_rate(Duration::ZERO, Duration::ZERO, move || bump(&counter))
        .expect_err("zero period should be rejected");
    assert!(matches!(err, QueueError::ZeroPeriod { .. }));
}

#[rstest]
fn queue_requires_a_runtime() {
    let err = WorkQueue::current("orphan").expect_err("no runtime should be available");
    assert!(matches!(err, QueueError::NoRuntime { ref queue, .. } if queue == "orphan"));
}
