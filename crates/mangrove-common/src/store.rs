use std::{
    fs::{self, DirBuilder, File, OpenOptions},
    io::{self, BufReader},
    os::unix::fs::{DirBuilderExt, OpenOptionsExt},
    path::{Path, PathBuf},
};

use serde::Serialize;
use snafu::ResultExt;
use tracing::{debug, info};

use crate::{
    config::{ROOT_MODE, StoreConfig},
    error::{
        InvalidTreeNameSnafu, IoSnafu, NotRegularFileSnafu,
        PartialDeleteSnafu, Result, StoreError, TreeExistsSnafu,
        TreeNotFoundSnafu,
    },
    link::{Link, LinkCodec},
    lock::StoreLock,
};

/// Longest tree name we accept, in bytes (`NAME_MAX`).
pub const MAX_TREE_NAME: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeInfo {
    pub name: String,
    pub enabled: bool,
}

/// Named kinship trees living as flat files under one root directory.
///
/// `<root>/<name>` holds the links, `<root>/.<name>` exists iff the tree is
/// enabled. Every operation holds the store lock for its whole duration.
#[derive(Debug, Clone)]
pub struct KinshipStore {
    config: StoreConfig,
}

pub fn validate_tree_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.len() > MAX_TREE_NAME {
        Some("longer than 255 bytes")
    } else if name.starts_with('.') {
        Some("must not start with '.'")
    } else if name.contains(['/', '\0']) {
        Some("must not contain '/' or NUL")
    } else {
        None
    };
    match reason {
        Some(reason) => InvalidTreeNameSnafu {
            name: name.to_string(),
            reason,
        }
        .fail(),
        None => Ok(()),
    }
}

impl KinshipStore {
    /// Opens the store, creating its root (mode 0700) when missing.
    pub fn open(config: StoreConfig) -> Result<Self> {
        LinkCodec::new(&config.separator)?;
        DirBuilder::new()
            .recursive(true)
            .mode(ROOT_MODE)
            .create(&config.root)
            .context(IoSnafu { path: &config.root })?;
        debug!("opened kinship store at {}", config.root.display());
        Ok(Self { config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        self.config.root()
    }

    pub fn codec(&self) -> LinkCodec<'_> {
        LinkCodec::validated(&self.config.separator)
    }

    pub(crate) fn tree_path(&self, name: &str) -> PathBuf {
        self.root().join(name)
    }

    pub(crate) fn marker_path(&self, name: &str) -> PathBuf {
        self.root().join(format!(".{name}"))
    }

    pub(crate) fn lock_shared(&self) -> Result<StoreLock> {
        StoreLock::shared(self.root())
    }

    pub(crate) fn lock_exclusive(&self) -> Result<StoreLock> {
        StoreLock::exclusive(self.root())
    }

    /// Fails with `TreeNotFound` unless `name` is a valid, existing tree.
    pub(crate) fn ensure_tree(&self, name: &str) -> Result<PathBuf> {
        validate_tree_name(name)?;
        let path = self.tree_path(name);
        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => NotRegularFileSnafu { path }.fail(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                TreeNotFoundSnafu { name }.fail()
            }
            Err(e) => Err(e).context(IoSnafu { path }),
        }
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        match self.ensure_tree(name) {
            Ok(_) => Ok(true),
            Err(StoreError::TreeNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn create_tree(&self, name: &str) -> Result<()> {
        validate_tree_name(name)?;
        let _lock = self.lock_exclusive()?;
        let path = self.tree_path(name);
        let created = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(self.config.file_mode)
            .open(&path);
        match created {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return TreeExistsSnafu { name }.fail();
            }
            Err(e) => return Err(e).context(IoSnafu { path }),
        }
        // a marker left behind by a crashed delete must not enable the new tree
        remove_if_present(&self.marker_path(name))?;
        info!("created tree {name}");
        Ok(())
    }

    pub fn delete_tree(&self, name: &str) -> Result<()> {
        let _lock = self.lock_exclusive()?;
        let path = self.ensure_tree(name)?;
        fs::remove_file(&path).context(IoSnafu { path: &path })?;
        match fs::remove_file(self.marker_path(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(source).context(PartialDeleteSnafu { name });
            }
        }
        info!("deleted tree {name}");
        Ok(())
    }

    pub fn enable(&self, name: &str) -> Result<()> {
        let _lock = self.lock_exclusive()?;
        self.ensure_tree(name)?;
        let marker = self.marker_path(name);
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .mode(self.config.file_mode)
            .open(&marker)
            .context(IoSnafu { path: &marker })?;
        info!("enabled tree {name}");
        Ok(())
    }

    pub fn disable(&self, name: &str) -> Result<()> {
        let _lock = self.lock_exclusive()?;
        self.ensure_tree(name)?;
        remove_if_present(&self.marker_path(name))?;
        info!("disabled tree {name}");
        Ok(())
    }

    pub fn is_enabled(&self, name: &str) -> Result<bool> {
        let _lock = self.lock_shared()?;
        self.ensure_tree(name)?;
        self.marker_present(name)
    }

    fn marker_present(&self, name: &str) -> Result<bool> {
        let marker = self.marker_path(name);
        match fs::symlink_metadata(&marker) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).context(IoSnafu { path: marker }),
        }
    }

    /// Links of `name` in file order.
    pub fn list_links(&self, name: &str) -> Result<Vec<Link>> {
        let _lock = self.lock_shared()?;
        self.ensure_tree(name)?;
        self.read_links(name)
    }

    /// Reads a tree without taking the lock. A missing file is an empty tree.
    pub(crate) fn read_links(&self, name: &str) -> Result<Vec<Link>> {
        let lines = self.read_lines(name)?;
        Ok(lines.into_iter().filter_map(|(_, link)| link).collect())
    }

    /// Raw lines of a tree, see [`LinkCodec::read_lines`].
    pub(crate) fn read_lines(
        &self,
        name: &str,
    ) -> Result<Vec<(String, Option<Link>)>> {
        let path = self.tree_path(name);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e).context(IoSnafu { path }),
        };
        self.codec().read_lines(BufReader::new(file), name, &path)
    }

    /// Every tree under the root, sorted by name.
    pub fn list_trees(&self) -> Result<Vec<TreeInfo>> {
        let _lock = self.lock_shared()?;
        self.scan_trees()
    }

    pub(crate) fn scan_trees(&self) -> Result<Vec<TreeInfo>> {
        let root = self.root();
        let mut trees = Vec::new();
        for entry in fs::read_dir(root).context(IoSnafu { path: root })? {
            let entry = entry.context(IoSnafu { path: root })?;
            let Ok(name) = entry.file_name().into_string() else {
                debug!("skipping non UTF-8 entry {:?}", entry.file_name());
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let file_type =
                entry.file_type().context(IoSnafu { path: entry.path() })?;
            if !file_type.is_file() {
                continue;
            }
            let enabled = self.marker_present(&name)?;
            trees.push(TreeInfo { name, enabled });
        }
        trees.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(trees)
    }

    pub fn enabled_trees(&self) -> Result<Vec<String>> {
        Ok(self
            .list_trees()?
            .into_iter()
            .filter(|t| t.enabled)
            .map(|t| t.name)
            .collect())
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context(IoSnafu { path }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn store() -> (tempfile::TempDir, KinshipStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = KinshipStore::open(StoreConfig::new(dir.path())).unwrap();
        (dir, store)
    }

    #[test]
    fn test_tree_names_are_checked() {
        assert!(validate_tree_name("build").is_ok());
        assert!(validate_tree_name("").is_err());
        assert!(validate_tree_name(".hidden").is_err());
        assert!(validate_tree_name("a/b").is_err());
        assert!(validate_tree_name(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_new_tree_starts_empty_and_disabled() {
        let (_dir, store) = store();
        store.create_tree("web").unwrap();
        assert!(store.list_links("web").unwrap().is_empty());
        assert!(!store.is_enabled("web").unwrap());
        let err = store.create_tree("web").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_stale_marker_does_not_enable_new_tree() {
        let (dir, store) = store();
        File::create(dir.path().join(".ghost")).unwrap();
        store.create_tree("ghost").unwrap();
        assert!(!store.is_enabled("ghost").unwrap());
    }

    #[test]
    fn test_unknown_tree_is_not_found() {
        let (_dir, store) = store();
        for err in [
            store.list_links("nope").unwrap_err(),
            store.enable("nope").unwrap_err(),
            store.disable("nope").unwrap_err(),
            store.delete_tree("nope").unwrap_err(),
        ] {
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }
    }

    #[test]
    fn test_listing_skips_hidden_entries_and_directories() {
        let (dir, store) = store();
        store.create_tree("b").unwrap();
        store.create_tree("a").unwrap();
        store.enable("b").unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();
        File::create(dir.path().join(".mangrove-tmp")).unwrap();
        assert_eq!(
            store.list_trees().unwrap(),
            vec![
                TreeInfo {
                    name: "a".into(),
                    enabled: false
                },
                TreeInfo {
                    name: "b".into(),
                    enabled: true
                },
            ]
        );
        assert_eq!(store.enabled_trees().unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn test_open_rejects_bad_separator() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(dir.path()).with_separator("");
        assert!(KinshipStore::open(config).is_err());
    }
}
