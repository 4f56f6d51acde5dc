use std::{backtrace::Backtrace, path::PathBuf};

use snafu::Snafu;
use strum::Display;

/// Coarse classification of every [`StoreError`], used for exit codes and
/// for callers that only care about the failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    MalformedInput,
    IoFailure,
    PartialDelete,
}

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("no such tree: {name}"))]
    TreeNotFound {
        name: String,
        #[snafu(backtrace)]
        backtrace: Backtrace,
    },
    #[snafu(display("tree already exists: {name}"))]
    TreeExists {
        name: String,
        #[snafu(backtrace)]
        backtrace: Backtrace,
    },
    #[snafu(display("invalid tree name {name:?}: {reason}"))]
    InvalidTreeName { name: String, reason: &'static str },
    #[snafu(display("invalid link separator {separator:?}: {reason}"))]
    InvalidSeparator {
        separator: String,
        reason: &'static str,
    },
    #[snafu(display("{tree}:{line}: {reason}"))]
    MalformedLink {
        tree: String,
        line: usize,
        reason: String,
    },
    #[snafu(display("illegal pid: {literal:?}"))]
    InvalidPid { literal: String },
    #[snafu(display("a link needs at least two pids, got {count}"))]
    NotEnoughPids { count: usize },
    #[snafu(display("{} is not a regular file", path.display()))]
    NotRegularFile { path: PathBuf },
    #[snafu(display("I/O error on {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(backtrace)]
        backtrace: Backtrace,
    },
    #[snafu(display(
        "links of {name} were removed but its status marker could not be: \
         {source}"
    ))]
    PartialDelete {
        name: String,
        source: std::io::Error,
        #[snafu(backtrace)]
        backtrace: Backtrace,
    },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::TreeNotFound { .. } => ErrorKind::NotFound,
            StoreError::TreeExists { .. } => ErrorKind::AlreadyExists,
            StoreError::InvalidTreeName { .. }
            | StoreError::InvalidSeparator { .. }
            | StoreError::MalformedLink { .. }
            | StoreError::InvalidPid { .. }
            | StoreError::NotEnoughPids { .. }
            | StoreError::NotRegularFile { .. } => ErrorKind::MalformedInput,
            StoreError::Io { source, .. } => match source.kind() {
                std::io::ErrorKind::NotFound => ErrorKind::NotFound,
                _ => ErrorKind::IoFailure,
            },
            StoreError::PartialDelete { .. } => ErrorKind::PartialDelete,
        }
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
