use std::{
    fs::{self, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::Path,
};

use snafu::{ResultExt, ensure};
use strum::{Display, EnumString};
use tracing::{debug, info, warn};

use crate::{
    error::{IoSnafu, NotEnoughPidsSnafu, Result},
    link::{Link, Pid},
    store::KinshipStore,
};

/// Which links a removal targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFilter {
    ExactPair { parent: Pid, child: Pid },
    ByParent(Pid),
    ByChild(Pid),
    ByEither(Pid),
}

impl LinkFilter {
    pub fn matches(self, link: Link) -> bool {
        match self {
            LinkFilter::ExactPair { parent, child } => {
                link.parent == parent && link.child == child
            }
            LinkFilter::ByParent(pid) => link.parent == pid,
            LinkFilter::ByChild(pid) => link.child == pid,
            LinkFilter::ByEither(pid) => link.touches(pid),
        }
    }
}

/// Shape of the links built from a pid list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Topology {
    /// First pid is the parent of every other pid.
    #[default]
    Star,
    /// Every pid is the parent of the next one.
    Chain,
    /// A chain closed from the last pid back to the first.
    Ring,
}

/// A batch of links described by a pid list and a few shaping options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkPlan {
    pub pids: Vec<Pid>,
    pub topology: Topology,
    pub reverse: bool,
    pub bidirectional: bool,
}

impl LinkPlan {
    pub fn new(pids: impl Into<Vec<Pid>>) -> Self {
        Self {
            pids: pids.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    #[must_use]
    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    #[must_use]
    pub fn bidirectional(mut self, bidirectional: bool) -> Self {
        self.bidirectional = bidirectional;
        self
    }

    /// The links in write order: pairs from the topology, then the reversal,
    /// then mirroring.
    pub fn links(&self) -> Result<Vec<Link>> {
        let count = self.pids.len();
        ensure!(count >= 2, NotEnoughPidsSnafu { count });

        let mut pairs: Vec<Link> = match self.topology {
            Topology::Star => self.pids[1..]
                .iter()
                .map(|&child| Link::new(self.pids[0], child))
                .collect(),
            Topology::Chain | Topology::Ring => self
                .pids
                .windows(2)
                .map(|w| Link::new(w[0], w[1]))
                .collect(),
        };
        // two pids already form a ring through the bidirectional option
        if self.topology == Topology::Ring && count > 2 {
            pairs.push(Link::new(self.pids[count - 1], self.pids[0]));
        }

        let oriented = pairs
            .into_iter()
            .map(|l| if self.reverse { l.reversed() } else { l });
        Ok(if self.bidirectional {
            oriented.flat_map(Link::with_mirror).collect()
        } else {
            oriented.collect()
        })
    }
}

/// Structural edits of the trees of a [`KinshipStore`].
#[derive(Debug, Clone, Copy)]
pub struct LinkMutator<'a> {
    store: &'a KinshipStore,
}

impl<'a> LinkMutator<'a> {
    pub fn new(store: &'a KinshipStore) -> Self {
        Self { store }
    }

    pub fn append_link(
        &self,
        tree: &str,
        parent: Pid,
        child: Pid,
    ) -> Result<()> {
        self.append(tree, &[Link::new(parent, child)])
    }

    /// Appends `parent -> child` and `child -> parent` in a single write.
    pub fn append_bidirectional(
        &self,
        tree: &str,
        parent: Pid,
        child: Pid,
    ) -> Result<()> {
        self.append(tree, &Link::new(parent, child).with_mirror())
    }

    /// Appends every link of `plan`, returning what was written.
    pub fn append_links(
        &self,
        tree: &str,
        plan: &LinkPlan,
    ) -> Result<Vec<Link>> {
        let links = plan.links()?;
        self.append(tree, &links)?;
        Ok(links)
    }

    /// Replaces the whole content of `tree` with `links`.
    pub fn replace_links(&self, tree: &str, links: &[Link]) -> Result<()> {
        let _lock = self.store.lock_exclusive()?;
        let path = self.store.ensure_tree(tree)?;
        let codec = self.store.codec();
        let mut body = Vec::new();
        for &link in links {
            codec.encode(link, &mut body).context(IoSnafu { path: &path })?;
        }
        rewrite(&path, self.store.root(), &body)?;
        info!("replaced {tree} with {} links", links.len());
        Ok(())
    }

    pub fn clear_tree(&self, tree: &str) -> Result<()> {
        self.replace_links(tree, &[])
    }

    /// Removes every link matching `filter`. Removing nothing is fine.
    pub fn remove_links(
        &self,
        tree: &str,
        filter: LinkFilter,
    ) -> Result<usize> {
        Ok(self.remove_matching(tree, &[filter])?.len())
    }

    /// Removes links matching any of `filters` in one rewrite and returns
    /// them in file order.
    pub fn remove_matching(
        &self,
        tree: &str,
        filters: &[LinkFilter],
    ) -> Result<Vec<Link>> {
        self.remove_where(tree, |link| filters.iter().any(|f| f.matches(link)))
    }

    pub fn remove_where(
        &self,
        tree: &str,
        mut doomed: impl FnMut(Link) -> bool,
    ) -> Result<Vec<Link>> {
        let _lock = self.store.lock_exclusive()?;
        let path = self.store.ensure_tree(tree)?;
        self.remove_locked(tree, &path, &mut doomed)
    }

    /// Filtered rewrite of a tree whose lock the caller already holds.
    pub(crate) fn remove_locked(
        &self,
        tree: &str,
        path: &Path,
        doomed: &mut dyn FnMut(Link) -> bool,
    ) -> Result<Vec<Link>> {
        let mut removed = Vec::new();
        let mut kept = String::new();
        for (text, link) in self.store.read_lines(tree)? {
            match link {
                Some(link) if doomed(link) => removed.push(link),
                // kept lines go back untouched, blank ones too
                _ => kept.push_str(&text),
            }
        }
        if removed.is_empty() {
            debug!("nothing to remove from {tree}");
            return Ok(removed);
        }
        if !kept.is_empty() && !kept.ends_with('\n') {
            kept.push('\n');
        }
        rewrite(path, self.store.root(), kept.as_bytes())?;
        for link in &removed {
            debug!("unlinked {link} in {tree}");
        }
        info!("removed {} links from {tree}", removed.len());
        Ok(removed)
    }

    fn append(&self, tree: &str, links: &[Link]) -> Result<()> {
        let _lock = self.store.lock_exclusive()?;
        let path = self.store.ensure_tree(tree)?;
        let codec = self.store.codec();

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&path)
            .context(IoSnafu { path: &path })?;
        let original_len = file
            .metadata()
            .context(IoSnafu { path: &path })?
            .len();

        let mut buf = Vec::new();
        if original_len > 0 && !ends_with_newline(&mut file, original_len)
            .context(IoSnafu { path: &path })?
        {
            buf.push(b'\n');
        }
        for &link in links {
            codec
                .encode(link, &mut buf)
                .context(IoSnafu { path: &path })?;
        }

        write_batch(&mut file, &buf, original_len)
            .context(IoSnafu { path: &path })?;
        for link in links {
            debug!("linked {link} in {tree}");
        }
        info!("appended {} links to {tree}", links.len());
        Ok(())
    }
}

/// Where an append lands: written in one go, synced, cut back on failure.
trait AppendTarget: Write {
    fn sync(&mut self) -> io::Result<()>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl AppendTarget for fs::File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Writes all of `buf` or, on failure, cuts `target` back to `original_len`
/// so none of the batch stays.
fn write_batch(
    target: &mut impl AppendTarget,
    buf: &[u8],
    original_len: u64,
) -> io::Result<()> {
    let written = target.write_all(buf).and_then(|()| target.sync());
    if let Err(source) = written {
        if let Err(e) = target.truncate(original_len) {
            warn!("could not roll back a failed append: {e}");
        }
        return Err(source);
    }
    Ok(())
}

fn ends_with_newline(file: &mut fs::File, len: u64) -> io::Result<bool> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Writes `body` into a temporary sibling of `path` and renames it over the
/// original, keeping the original permissions.
fn rewrite(path: &Path, root: &Path, body: &[u8]) -> Result<()> {
    let perms = fs::metadata(path)
        .context(IoSnafu { path })?
        .permissions();
    let tmp = tempfile::Builder::new()
        .prefix(".mangrove-")
        .tempfile_in(root)
        .context(IoSnafu { path: root })?;
    tmp.as_file().write_all(body).context(IoSnafu { path })?;
    fs::set_permissions(tmp.path(), perms).context(IoSnafu { path })?;
    tmp.as_file().sync_all().context(IoSnafu { path })?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .context(IoSnafu { path })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(links: &[Link]) -> Vec<(Pid, Pid)> {
        links.iter().map(|l| (l.parent, l.child)).collect()
    }

    #[test]
    fn test_star_is_the_default_topology() {
        let plan = LinkPlan::new(vec![1, 2, 3]);
        assert_eq!(pairs(&plan.links().unwrap()), [(1, 2), (1, 3)]);
    }

    #[test]
    fn test_chain_and_ring() {
        let chain = LinkPlan::new(vec![1, 2, 3]).topology(Topology::Chain);
        assert_eq!(pairs(&chain.links().unwrap()), [(1, 2), (2, 3)]);
        let ring = chain.clone().topology(Topology::Ring);
        assert_eq!(pairs(&ring.links().unwrap()), [(1, 2), (2, 3), (3, 1)]);
        let short = LinkPlan::new(vec![1, 2]).topology(Topology::Ring);
        assert_eq!(pairs(&short.links().unwrap()), [(1, 2)]);
    }

    #[test]
    fn test_reverse_happens_before_mirroring() {
        let plan = LinkPlan::new(vec![1, 2, 3])
            .topology(Topology::Chain)
            .reverse(true)
            .bidirectional(true);
        assert_eq!(
            pairs(&plan.links().unwrap()),
            [(2, 1), (1, 2), (3, 2), (2, 3)]
        );
    }

    #[test]
    fn test_single_pid_is_rejected() {
        assert!(LinkPlan::new(vec![1]).links().is_err());
        assert!(LinkPlan::new(Vec::new()).links().is_err());
    }

    #[test]
    fn test_filters() {
        let link = Link::new(4, 5);
        assert!(LinkFilter::ExactPair { parent: 4, child: 5 }.matches(link));
        assert!(!LinkFilter::ExactPair { parent: 5, child: 4 }.matches(link));
        assert!(LinkFilter::ByParent(4).matches(link));
        assert!(!LinkFilter::ByParent(5).matches(link));
        assert!(LinkFilter::ByChild(5).matches(link));
        assert!(LinkFilter::ByEither(5).matches(link));
        assert!(LinkFilter::ByEither(4).matches(link));
        assert!(!LinkFilter::ByEither(6).matches(link));
    }

    /// Accepts `budget` bytes, then fails every write.
    struct FullDisk {
        data: Vec<u8>,
        budget: usize,
    }

    impl Write for FullDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::other("no space left"));
            }
            let n = buf.len().min(self.budget);
            self.data.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl AppendTarget for FullDisk {
        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            self.data.truncate(usize::try_from(len).unwrap());
            Ok(())
        }
    }

    #[test]
    fn test_failed_append_rolls_back_to_original_length() {
        let original = b"1\t-> 2\n".to_vec();
        let mut disk = FullDisk {
            data: original.clone(),
            budget: 5,
        };

        let batch = b"2\t-> 1\n3\t-> 4\n";
        assert!(write_batch(&mut disk, batch, original.len() as u64).is_err());

        assert_eq!(disk.data, original);
    }

    #[test]
    fn test_complete_append_is_kept() {
        let mut disk = FullDisk {
            data: Vec::new(),
            budget: 64,
        };
        write_batch(&mut disk, b"1\t-> 2\n", 0).unwrap();
        assert_eq!(disk.data, b"1\t-> 2\n");
    }
}
