//! Executes real local processes through the remote command runner.
//!
//! Sessions come from `LocalShellSessionFactory`, which runs each command
//! with `sh -c`, so exit codes, output capture and timeouts are observed on
//! genuine child processes.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use replication::test_support::LocalShellSessionFactory;
use replication::{ErrorBuffer, RemoteTarget, ReplicationConfig, SshError, SshHelper};
use rstest::{fixture, rstest};
use tokio_util::sync::CancellationToken;

#[fixture]
fn target() -> RemoteTarget {
    RemoteTarget::parse("git@mirror.example.com")
        .unwrap_or_else(|err| panic!("target should parse: {err}"))
}

fn helper(factory: &LocalShellSessionFactory) -> SshHelper<LocalShellSessionFactory> {
    SshHelper::new(&ReplicationConfig::default(), factory.clone())
}

#[rstest]
#[case("exit 0", Some(0))]
#[case("exit 3", Some(3))]
#[case("echo out; echo err >&2; exit 7", Some(7))]
#[case("kill -9 $$", None)]
fn exit_code_is_reported_as_returned_by_the_process(
    target: RemoteTarget,
    #[case] command: &str,
    #[case] expected: Option<i32>,
) {
    let factory = LocalShellSessionFactory::new();
    let runner = helper(&factory);

    let code = runner
        .execute_remote_ssh(&target, command, runner.new_error_buffer_stream())
        .unwrap_or_else(|err| panic!("command should run: {err}"));

    assert_eq!(code, expected);
    assert_eq!(factory.commands(), vec![command.to_owned()]);
    assert_eq!(factory.disconnects(), factory.connects());
}

#[rstest]
fn both_streams_are_captured(target: RemoteTarget) {
    let factory = LocalShellSessionFactory::new();
    let runner = helper(&factory);
    let sink = runner.new_error_buffer_stream();

    let code = runner
        .execute_remote_ssh(
            &target,
            "echo to-stdout; echo to-stderr >&2; exit 3",
            Arc::clone(&sink),
        )
        .unwrap_or_else(|err| panic!("command should run: {err}"));

    assert_eq!(code, Some(3));
    let captured = sink.to_string();
    let mut lines: Vec<&str> = captured.lines().collect();
    lines.sort_unstable();
    assert_eq!(lines, vec!["to-stderr", "to-stdout"]);
}

#[rstest]
fn carriage_returns_and_trailing_newlines_are_dropped(target: RemoteTarget) {
    let factory = LocalShellSessionFactory::new();
    let runner = helper(&factory);
    let sink = runner.new_error_buffer_stream();

    runner
        .execute_remote_ssh(&target, r"printf 'abc\r\ndef\n\n\n'", Arc::clone(&sink))
        .unwrap_or_else(|err| panic!("command should run: {err}"));

    assert_eq!(sink.to_string(), "abc\ndef");
}

#[rstest]
fn process_stderr_is_accepted_as_a_sink(target: RemoteTarget) {
    let factory = LocalShellSessionFactory::new();
    let runner = helper(&factory);

    let code = runner
        .execute_remote_ssh(&target, "echo diagnostics >&2", Arc::new(io::stderr()))
        .unwrap_or_else(|err| panic!("command should run: {err}"));

    assert_eq!(code, Some(0));
}

#[rstest]
fn commands_exceeding_the_timeout_are_killed(target: RemoteTarget) {
    let factory = LocalShellSessionFactory::new();
    let runner = helper(&factory).with_command_timeout(Some(Duration::from_millis(200)));
    let started = Instant::now();

    let err = runner
        .execute_remote_ssh(&target, "sleep 5", runner.new_error_buffer_stream())
        .expect_err("sleep should exceed the timeout");

    assert!(
        started.elapsed() < Duration::from_secs(3),
        "timeout took {:?}",
        started.elapsed()
    );
    assert_eq!(
        err,
        SshError::CommandTimeout {
            command: String::from("sleep 5"),
            timeout: Duration::from_millis(200),
        }
    );
    assert_eq!(factory.disconnects(), 1);
}

#[rstest]
fn background_children_holding_output_do_not_hold_the_caller(target: RemoteTarget) {
    let factory = LocalShellSessionFactory::new();
    let runner = helper(&factory).with_command_timeout(Some(Duration::from_secs(1)));
    let sink = runner.new_error_buffer_stream();
    let started = Instant::now();

    let code = runner
        .execute_remote_ssh(&target, "echo started; sleep 6 & exit 0", Arc::clone(&sink))
        .unwrap_or_else(|err| panic!("command should run: {err}"));

    assert_eq!(code, Some(0));
    assert!(
        started.elapsed() < Duration::from_secs(4),
        "caller held for {:?}",
        started.elapsed()
    );
    assert_eq!(sink.to_string(), "started");
    assert_eq!(factory.disconnects(), 1);
}

#[rstest]
fn cancelled_wait_returns_without_waiting_for_the_process(target: RemoteTarget) {
    let factory = LocalShellSessionFactory::new();
    let runner = helper(&factory).with_command_timeout(None);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let started = Instant::now();

    let code = runner
        .execute_remote_ssh_with_cancel(
            &target,
            "sleep 2",
            Arc::new(ErrorBuffer::new()),
            &cancel,
        )
        .unwrap_or_else(|err| panic!("cancelled wait should not fail: {err}"));

    assert_eq!(code, None);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(factory.disconnects(), 1);
}

#[rstest]
fn refused_sessions_never_disconnect(target: RemoteTarget) {
    let factory = LocalShellSessionFactory::refusing();
    let runner = helper(&factory);

    let err = runner
        .execute_remote_ssh(&target, "true", runner.new_error_buffer_stream())
        .expect_err("connection should be refused");

    assert!(matches!(err, SshError::Connect { .. }), "unexpected: {err}");
    assert_eq!(factory.connects(), 1);
    assert_eq!(factory.disconnects(), 0);
    assert!(factory.commands().is_empty());
}
