pub mod cascade;
pub mod census;
pub mod config;
pub mod double_fork;
pub mod error;
pub mod link;
pub mod lock;
pub mod mutate;
pub mod signal;
pub mod stdin_args;
pub mod store;

pub use cascade::{CascadeAction, CascadeReport, CascadeSignaler, KinGraph};
pub use census::{ProcessCensus, Snapshot, SysinfoCensus};
pub use config::StoreConfig;
pub use error::{ErrorKind, StoreError};
pub use link::{Link, Pid};
pub use mutate::{LinkFilter, LinkMutator, LinkPlan, Topology};
pub use signal::{KillSignaller, Signal, Signaller};
pub use store::{KinshipStore, TreeInfo};
