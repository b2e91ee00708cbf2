//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::io::{self, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::config::{ConfigError, ConfigSource, ReplicationConfig};
use crate::filter::ReplicationFilter;
use crate::lifecycle::{PushAll, PushFuture};
use crate::processing::{PushResultProcessing, RefPushResult, RefUpdateStatus};
use crate::ssh::{RemoteSession, RemoteTarget, SessionFactory, SshError};
use crate::state::ReplicationState;

/// Notification observed by [`RecordingProcessing`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProcessingEvent {
    /// A per-node outcome.
    OneNode {
        /// Project name.
        project: String,
        /// Ref name.
        git_ref: String,
        /// Destination URI.
        uri: String,
        /// Replication outcome.
        result: RefPushResult,
        /// Remote ref-update status.
        status: RefUpdateStatus,
    },
    /// A ref reached every node it was scheduled for.
    AllNodes {
        /// Project name.
        project: String,
        /// Ref name.
        git_ref: String,
        /// Number of nodes the ref was scheduled for.
        node_count: usize,
    },
    /// The round completed.
    AllRefs {
        /// Number of push tasks registered in the round.
        total_push_tasks: usize,
    },
    /// A message passed through to standard output.
    StdOut(String),
    /// A message passed through to standard error.
    StdErr(String),
}

/// Result processor that records every notification in arrival order.
#[derive(Debug, Default)]
pub struct RecordingProcessing {
    events: Mutex<Vec<ProcessingEvent>>,
}

impl RecordingProcessing {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the recorded notifications.
    #[must_use]
    pub fn events(&self) -> Vec<ProcessingEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns `(project, ref, node_count)` for every ref-level completion.
    #[must_use]
    pub fn all_nodes_events(&self) -> Vec<(String, String, usize)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProcessingEvent::AllNodes {
                    project,
                    git_ref,
                    node_count,
                } => Some((project, git_ref, node_count)),
                _ => None,
            })
            .collect()
    }

    /// Returns the totals of every round-level completion.
    #[must_use]
    pub fn round_totals(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProcessingEvent::AllRefs { total_push_tasks } => Some(total_push_tasks),
                _ => None,
            })
            .collect()
    }

    /// Counts the per-node notifications.
    #[must_use]
    pub fn one_node_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, ProcessingEvent::OneNode { .. }))
            .count()
    }

    fn record(&self, event: ProcessingEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl PushResultProcessing for RecordingProcessing {
    fn on_ref_replicated_to_one_node(
        &self,
        project: &str,
        git_ref: &str,
        uri: &str,
        result: RefPushResult,
        status: RefUpdateStatus,
    ) {
        self.record(ProcessingEvent::OneNode {
            project: project.to_owned(),
            git_ref: git_ref.to_owned(),
            uri: uri.to_owned(),
            result,
            status,
        });
    }

    fn on_ref_replicated_to_all_nodes(&self, project: &str, git_ref: &str, node_count: usize) {
        self.record(ProcessingEvent::AllNodes {
            project: project.to_owned(),
            git_ref: git_ref.to_owned(),
            node_count,
        });
    }

    fn on_all_refs_replicated_to_all_nodes(&self, total_push_tasks: usize) {
        self.record(ProcessingEvent::AllRefs { total_push_tasks });
    }

    fn write_std_out(&self, message: &str) {
        self.record(ProcessingEvent::StdOut(message.to_owned()));
    }

    fn write_std_err(&self, message: &str) {
        self.record(ProcessingEvent::StdErr(message.to_owned()));
    }
}

/// Cloneable in-memory writer for capturing rendered output.
#[derive(Clone, Debug, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Returns everything written so far, lossily decoded.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap_or_else(PoisonError::into_inner))
            .into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SessionCounters {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

/// Session factory that runs commands locally through `sh -c`.
///
/// Used to exercise the executor against real processes without a remote
/// host.
#[derive(Clone, Debug, Default)]
pub struct LocalShellSessionFactory {
    counters: Arc<SessionCounters>,
    refuse_connections: bool,
}

impl LocalShellSessionFactory {
    /// Creates a factory whose sessions always connect.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a factory that rejects every connection attempt.
    #[must_use]
    pub fn refusing() -> Self {
        Self {
            refuse_connections: true,
            ..Self::default()
        }
    }

    /// Number of connection attempts.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    /// Number of sessions disconnected.
    #[must_use]
    pub fn disconnects(&self) -> usize {
        self.counters.disconnects.load(Ordering::SeqCst)
    }

    /// Commands executed so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.counters
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SessionFactory for LocalShellSessionFactory {
    type Session = LocalShellSession;

    fn connect(
        &self,
        target: &RemoteTarget,
        _timeout: Duration,
    ) -> Result<Self::Session, SshError> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse_connections {
            return Err(SshError::Connect {
                target: target.to_string(),
                message: String::from("connection refused"),
            });
        }
        Ok(LocalShellSession {
            counters: Arc::clone(&self.counters),
            connected: true,
        })
    }
}

/// Session produced by [`LocalShellSessionFactory`].
#[derive(Debug)]
pub struct LocalShellSession {
    counters: Arc<SessionCounters>,
    connected: bool,
}

impl RemoteSession for LocalShellSession {
    fn exec(&mut self, command: &str) -> Result<Child, SshError> {
        self.counters
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.to_owned());
        Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| SshError::Spawn {
                program: String::from("sh"),
                message: err.to_string(),
            })
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Debug)]
enum ScriptedLoad {
    Config(ReplicationConfig),
    Error(ConfigError),
    Panic,
}

/// Configuration source that returns pre-seeded results in FIFO order.
///
/// Once the script is exhausted the most recently returned snapshot is
/// repeated.
#[derive(Debug)]
pub struct ScriptedConfigSource {
    script: Mutex<VecDeque<ScriptedLoad>>,
    last: Mutex<ReplicationConfig>,
    loads: AtomicUsize,
}

impl ScriptedConfigSource {
    /// Creates a source that serves `initial` until scripted otherwise.
    #[must_use]
    pub fn new(initial: ReplicationConfig) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(initial),
            loads: AtomicUsize::new(0),
        }
    }

    /// Queues a successful load.
    pub fn push_config(&self, config: ReplicationConfig) {
        self.push(ScriptedLoad::Config(config));
    }

    /// Queues a failed load.
    pub fn push_error(&self, err: ConfigError) {
        self.push(ScriptedLoad::Error(err));
    }

    /// Queues a load that panics, terminating whichever task runs it.
    pub fn push_panic(&self) {
        self.push(ScriptedLoad::Panic);
    }

    /// Number of loads performed.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn push(&self, load: ScriptedLoad) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(load);
    }
}

impl ConfigSource for ScriptedConfigSource {
    fn load(&self) -> Result<ReplicationConfig, ConfigError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match next {
            None => Ok(last.clone()),
            Some(ScriptedLoad::Config(config)) => {
                last.clone_from(&config);
                Ok(config)
            }
            Some(ScriptedLoad::Error(err)) => Err(err),
            Some(ScriptedLoad::Panic) => {
                drop(last);
                panic!("scripted configuration load panicked")
            }
        }
    }
}

/// One push task simulated by [`RecordingPushAll`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SimulatedPush {
    /// Project name.
    pub project: String,
    /// Ref name.
    pub git_ref: String,
    /// Destination URI.
    pub uri: String,
}

impl SimulatedPush {
    /// Describes a push of `git_ref` in `project` to `uri`.
    #[must_use]
    pub fn new(project: &str, git_ref: &str, uri: &str) -> Self {
        Self {
            project: project.to_owned(),
            git_ref: git_ref.to_owned(),
            uri: uri.to_owned(),
        }
    }
}

/// Push collaborator that records invocations and drives the round's
/// tracker through a scripted set of pushes.
#[derive(Debug, Default)]
pub struct RecordingPushAll {
    pushes: Vec<SimulatedPush>,
    hang_after_scheduling: bool,
    calls: Mutex<Vec<ReplicationFilter>>,
    states: Mutex<Vec<Arc<ReplicationState>>>,
}

impl RecordingPushAll {
    /// Creates a collaborator that schedules no pushes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a collaborator that registers and succeeds every push.
    #[must_use]
    pub fn with_pushes(pushes: Vec<SimulatedPush>) -> Self {
        Self {
            pushes,
            ..Self::default()
        }
    }

    /// Creates a collaborator that registers `pushes` and then never
    /// completes, like a round stuck on an unreachable node.
    #[must_use]
    pub fn hanging(pushes: Vec<SimulatedPush>) -> Self {
        Self {
            pushes,
            hang_after_scheduling: true,
            ..Self::default()
        }
    }

    /// Filters passed to each invocation.
    #[must_use]
    pub fn calls(&self) -> Vec<ReplicationFilter> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Trackers handed to each invocation.
    #[must_use]
    pub fn states(&self) -> Vec<Arc<ReplicationState>> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PushAll for RecordingPushAll {
    fn push_all(&self, filter: ReplicationFilter, state: Arc<ReplicationState>) -> PushFuture<'_> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(filter);
            self.states
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Arc::clone(&state));

            for push in &self.pushes {
                state.increase_push_task_count(&push.project, &push.git_ref);
            }
            if self.hang_after_scheduling {
                std::future::pending::<()>().await;
            }
            state.mark_all_push_tasks_scheduled();
            for push in &self.pushes {
                state.notify_ref_replicated(
                    &push.project,
                    &push.git_ref,
                    &push.uri,
                    RefPushResult::Succeeded,
                    RefUpdateStatus::Ok,
                );
            }
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
