use std::{
    fs::{File, OpenOptions},
    os::unix::fs::OpenOptionsExt,
    path::Path,
};

use rustix::fs::{FlockOperation, flock};
use snafu::ResultExt;
use tracing::trace;

use crate::{
    config::RW_MODE,
    error::{IoSnafu, Result},
};

/// Tree names never start with a dot, so this can't clash with a tree or a
/// status marker.
pub const LOCK_FILE_NAME: &str = "..lock";

/// Advisory `flock(2)` over the whole store. Dropping the guard closes the
/// descriptor, which releases the lock.
#[derive(Debug)]
pub struct StoreLock {
    _file: File,
}

impl StoreLock {
    pub fn shared(root: &Path) -> Result<Self> {
        Self::acquire(root, FlockOperation::LockShared)
    }

    pub fn exclusive(root: &Path) -> Result<Self> {
        Self::acquire(root, FlockOperation::LockExclusive)
    }

    fn acquire(root: &Path, op: FlockOperation) -> Result<Self> {
        let path = root.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(RW_MODE)
            .open(&path)
            .context(IoSnafu { path: &path })?;
        flock(&file, op)
            .map_err(std::io::Error::from)
            .context(IoSnafu { path: &path })?;
        trace!("acquired {op:?} on {}", path.display());
        Ok(Self { _file: file })
    }
}
