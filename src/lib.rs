//! Core library for coordinating fan-out replication to remote nodes.
//!
//! The crate tracks the completion of push rounds across concurrently
//! finishing tasks, keeps the replication configuration hot-swappable in the
//! background and runs maintenance commands on remote nodes over SSH with
//! bounded timeouts.

pub mod config;
pub mod credentials;
pub mod filter;
pub mod lifecycle;
pub mod logging;
pub mod processing;
pub mod queue;
pub mod ssh;
pub mod state;
pub mod test_support;
pub mod util;

pub use config::{
    AutoReloadConfig, ConfigError, ConfigProvider, ConfigSource, OrthoConfigSource,
    ReplicationConfig, ReplicationSettings, ShutdownError,
};
pub use credentials::{Credentials, CredentialsError, CredentialsFactory, FileCredentialsFactory};
pub use filter::ReplicationFilter;
pub use lifecycle::{PushAll, PushFuture, ReplicationLifecycle, ServerState};
pub use processing::{
    CommandProcessing, LoggingProcessing, PushResultProcessing, RefPushResult, RefUpdateStatus,
};
pub use queue::{QueueError, ScheduledTask, WorkQueue};
pub use ssh::{ErrorBuffer, OpenSshSessionFactory, RemoteTarget, SshError, SshHelper};
pub use state::ReplicationState;
