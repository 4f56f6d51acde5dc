use std::path::{Path, PathBuf};

/// Token written between the parent and the child pid of every link.
pub const DEFAULT_SEPARATOR: &str = "\t-> ";

/// Permission bits of freshly created tree files.
pub const RW_MODE: u32 = 0o600;
/// Permission bits of the store root when we have to create it.
pub const ROOT_MODE: u32 = 0o700;

pub const ROOT_ENV: &str = "MANGROVE_ROOT";

/// Everything a [`crate::store::KinshipStore`] needs to know about its
/// on-disk layout. Built once by the binaries and handed down explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub root: PathBuf,
    pub separator: String,
    pub file_mode: u32,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            separator: DEFAULT_SEPARATOR.to_string(),
            file_mode: RW_MODE,
        }
    }

    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    #[must_use]
    pub fn with_file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `$XDG_DATA_HOME/mangrove` (or the platform equivalent), falling back
    /// to a per-user directory under `/tmp`.
    pub fn default_root() -> PathBuf {
        dirs::data_local_dir().map_or_else(
            || {
                let uid = rustix::process::getuid().as_raw();
                PathBuf::from(format!("/tmp/mangrove-{uid}"))
            },
            |dir| dir.join("mangrove"),
        )
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(Self::default_root())
    }
}
