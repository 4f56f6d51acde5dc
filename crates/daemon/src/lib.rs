pub mod cli;
pub mod error;
pub mod reactions;
pub mod rules_file;
pub mod shutdown;
pub mod tracing_init;
pub mod watcher;

pub use reactions::{LiveReactor, Reactor};
pub use rules_file::{DEFAULT_CONFIG_PATH, ReactionConfig};
pub use shutdown::Shutdown;
pub use watcher::{DaemonConfig, SnapshotDiffDaemon, TickReport};
