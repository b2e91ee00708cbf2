//! Unit tests for round completion tracking.

use super::*;
use crate::test_support::{ProcessingEvent, RecordingProcessing};
use rstest::{fixture, rstest};

const PROJECT: &str = "platform/core";
const MIRROR: &str = "ssh://mirror.example.com/platform/core.git";

#[fixture]
fn recorder() -> Arc<RecordingProcessing> {
    Arc::new(RecordingProcessing::new())
}

fn state_for(recorder: &Arc<RecordingProcessing>) -> ReplicationState {
    ReplicationState::new(recorder.clone())
}

fn succeed(state: &ReplicationState, git_ref: &str) {
    state.notify_ref_replicated(
        PROJECT,
        git_ref,
        MIRROR,
        RefPushResult::Succeeded,
        RefUpdateStatus::Ok,
    );
}

#[rstest]
fn has_push_task_is_false_until_a_task_registers(recorder: Arc<RecordingProcessing>) {
    let state = state_for(&recorder);
    assert!(!state.has_push_task());

    state.increase_push_task_count(PROJECT, "refs/heads/main");

    assert!(state.has_push_task());
}

#[rstest]
fn single_ref_single_destination_completes_on_mark(recorder: Arc<RecordingProcessing>) {
    let state = state_for(&recorder);
    state.increase_push_task_count(PROJECT, "refs/heads/main");

    succeed(&state, "refs/heads/main");
    assert_eq!(recorder.all_nodes_events(), Vec::new());
    assert!(!state.is_finished());

    state.mark_all_push_tasks_scheduled();

    assert_eq!(
        recorder.all_nodes_events(),
        vec![(String::from(PROJECT), String::from("refs/heads/main"), 1)]
    );
    assert_eq!(recorder.round_totals(), vec![1]);
    assert!(state.is_finished());
}

#[rstest]
fn asymmetric_refs_complete_independently(recorder: Arc<RecordingProcessing>) {
    let state = state_for(&recorder);
    state.increase_push_task_count(PROJECT, "r1");
    state.increase_push_task_count(PROJECT, "r1");
    state.increase_push_task_count(PROJECT, "r2");

    succeed(&state, "r2");
    succeed(&state, "r1");
    state.mark_all_push_tasks_scheduled();

    assert_eq!(
        recorder.all_nodes_events(),
        vec![(String::from(PROJECT), String::from("r2"), 1)]
    );
    assert!(recorder.round_totals().is_empty());

    succeed(&state, "r1");

    assert_eq!(
        recorder.all_nodes_events(),
        vec![
            (String::from(PROJECT), String::from("r2"), 1),
            (String::from(PROJECT), String::from("r1"), 2),
        ]
    );
    assert_eq!(recorder.round_totals(), vec![3]);
}

#[rstest]
fn per_node_notifications_are_forwarded_before_counting(recorder: Arc<RecordingProcessing>) {
    let state = state_for(&recorder);
    state.increase_push_task_count(PROJECT, "refs/heads/main");
    state.mark_all_push_tasks_scheduled();

    state.notify_ref_replicated(
        PROJECT,
        "refs/heads/main",
        MIRROR,
        RefPushResult::Failed,
        RefUpdateStatus::RejectedOtherReason,
    );

    let events = recorder.events();
    assert_eq!(events.len(), 3, "events: {events:?}");
    assert!(matches!(
        events.first(),
        Some(ProcessingEvent::OneNode {
            result: RefPushResult::Failed,
            ..
        })
    ));
    assert!(matches!(
        events.get(1),
        Some(ProcessingEvent::AllNodes { node_count: 1, .. })
    ));
    assert!(matches!(
        events.get(2),
        Some(ProcessingEvent::AllRefs {
            total_push_tasks: 1
        })
    ));
}

#[rstest]
fn repeated_mark_does_not_refire_notifications(recorder: Arc<RecordingProcessing>) {
    let state = state_for(&recorder);
    state.increase_push_task_count(PROJECT, "refs/heads/main");
    succeed(&state, "refs/heads/main");

    state.mark_all_push_tasks_scheduled();
    state.mark_all_push_tasks_scheduled();

    assert_eq!(recorder.all_nodes_events().len(), 1);
    assert_eq!(recorder.round_totals(), vec![1]);
}

#[rstest]
fn empty_round_completes_with_zero_tasks(recorder: Arc<RecordingProcessing>) {
    let state = state_for(&recorder);

    state.mark_all_push_tasks_scheduled();

    assert!(recorder.all_nodes_events().is_empty());
    assert_eq!(recorder.round_totals(), vec![0]);
    assert!(state.is_finished());
}

#[rstest]
fn unregistered_report_is_forwarded_but_not_counted(recorder: Arc<RecordingProcessing>) {
    let state = state_for(&recorder);
    state.increase_push_task_count(PROJECT, "refs/heads/main");

    succeed(&state, "refs/heads/unknown");
    state.mark_all_push_tasks_scheduled();

    assert_eq!(recorder.one_node_count(), 1);
    assert!(recorder.round_totals().is_empty());

    succeed(&state, "refs/heads/main");

    assert_eq!(
        recorder.all_nodes_events(),
        vec![(String::from(PROJECT), String::from("refs/heads/main"), 1)]
    );
    assert_eq!(recorder.round_totals(), vec![1]);
}

#[rstest]
fn surplus_reports_do_not_complete_other_refs(recorder: Arc<RecordingProcessing>) {
    let state = state_for(&recorder);
    state.increase_push_task_count(PROJECT, "r1");
    state.increase_push_task_count(PROJECT, "r2");

    succeed(&state, "r1");
    succeed(&state, "r1");
    state.mark_all_push_tasks_scheduled();

    assert!(recorder.round_totals().is_empty());
    assert!(!state.is_finished());

    succeed(&state, "r2");

    assert_eq!(recorder.round_totals(), vec![2]);
}

#[rstest]
fn late_reports_after_completion_are_tolerated(recorder: Arc<RecordingProcessing>) {
    let state = state_for(&recorder);
    state.increase_push_task_count(PROJECT, "refs/heads/main");
    succeed(&state, "refs/heads/main");
    state.mark_all_push_tasks_scheduled();

    succeed(&state, "refs/heads/main");

    assert_eq!(recorder.one_node_count(), 2);
    assert_eq!(recorder.all_nodes_events().len(), 1);
    assert_eq!(recorder.round_totals(), vec![1]);
}

#[rstest]
fn std_streams_pass_through(recorder: Arc<RecordingProcessing>) {
    let state = state_for(&recorder);

    state.write_std_out("starting");
    state.write_std_err("oops");

    assert_eq!(
        recorder.events(),
        vec![
            ProcessingEvent::StdOut(String::from("starting")),
            ProcessingEvent::StdErr(String::from("oops")),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn wait_for_replication_resolves_after_completion(recorder: Arc<RecordingProcessing>) {
    let state = Arc::new(state_for(&recorder));
    state.increase_push_task_count(PROJECT, "refs/heads/main");

    let waiter = tokio::spawn({
        let state = Arc::clone(&state);
        async move { state.wait_for_replication().await }
    });
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    state.mark_all_push_tasks_scheduled();
    succeed(&state, "refs/heads/main");

    tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
        .await
        .expect("waiter should finish")
        .expect("waiter should not panic");
}
