use std::{backtrace::Backtrace, path::PathBuf};

use snafu::Snafu;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum DaemonError {
    #[snafu(display("could not read rules from {}: {source}", path.display()))]
    ReadRules {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(backtrace)]
        backtrace: Backtrace,
    },
}

pub type Result<T, E = DaemonError> = std::result::Result<T, E>;
