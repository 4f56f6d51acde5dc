use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    error::Result,
    link::{Link, Pid},
    mutate::LinkMutator,
    signal::{Errno, Signal, Signaller},
    store::KinshipStore,
};

/// What happens to every pid a cascade reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeAction {
    Signal(Signal),
    /// Drop every link whose parent was reached.
    Unlink,
}

impl Default for CascadeAction {
    fn default() -> Self {
        CascadeAction::Signal(Signal::SIGKILL)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
    /// Pids the action was applied to, in visit order.
    pub visited: Vec<Pid>,
    /// Pids whose signal could not be delivered.
    #[serde(serialize_with = "serialize_failures")]
    pub failures: Vec<(Pid, Errno)>,
    /// Links removed after the walk.
    pub pruned: usize,
}

fn serialize_failures<S: serde::Serializer>(
    failures: &[(Pid, Errno)],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(failures.iter().map(|(pid, e)| (pid, e.desc())))
}

impl CascadeReport {
    /// Visited pids whose action succeeded.
    pub fn delivered(&self) -> impl Iterator<Item = Pid> + '_ {
        self.visited
            .iter()
            .copied()
            .filter(|pid| !self.failures.iter().any(|(f, _)| f == pid))
    }

    /// Folds the reports of several independent cascades.
    pub fn combine(reports: impl IntoIterator<Item = CascadeReport>) -> Self {
        let mut all = CascadeReport::default();
        for report in reports {
            all.merge(report);
        }
        all
    }

    fn merge(&mut self, other: CascadeReport) {
        self.visited.extend(other.visited);
        self.failures.extend(other.failures);
        self.pruned += other.pruned;
    }
}

/// Adjacency of one or more trees. Children keep link order.
#[derive(Debug, Clone, Default)]
pub struct KinGraph {
    children: HashMap<Pid, Vec<Pid>>,
}

impl KinGraph {
    pub fn extend(&mut self, links: impl IntoIterator<Item = Link>) {
        for link in links {
            self.children.entry(link.parent).or_default().push(link.child);
        }
    }

    pub fn children_of(&self, pid: Pid) -> &[Pid] {
        self.children.get(&pid).map_or(&[], Vec::as_slice)
    }

    /// Breadth-first walk from `roots`, calling `visit` once per pid that is
    /// not in `visited` yet. Roots are only marked, not visited, unless
    /// `include_roots` is set.
    pub fn walk(
        &self,
        roots: &[Pid],
        include_roots: bool,
        visited: &mut HashSet<Pid>,
        mut visit: impl FnMut(Pid),
    ) {
        let mut queue = VecDeque::new();
        for &root in roots {
            if visited.insert(root) {
                if include_roots {
                    visit(root);
                }
                queue.push_back(root);
            }
        }
        while let Some(pid) = queue.pop_front() {
            for &child in self.children_of(pid) {
                if visited.insert(child) {
                    visit(child);
                    queue.push_back(child);
                }
            }
        }
    }

    /// Every pid reachable from `root`, `root` first.
    pub fn closure(&self, root: Pid) -> Vec<Pid> {
        let mut out = Vec::new();
        self.walk(&[root], true, &mut HashSet::new(), |pid| out.push(pid));
        out
    }
}

impl FromIterator<Link> for KinGraph {
    fn from_iter<I: IntoIterator<Item = Link>>(iter: I) -> Self {
        let mut graph = Self::default();
        graph.extend(iter);
        graph
    }
}

/// Applies a [`CascadeAction`] to everything reachable from a pid.
pub struct CascadeSignaler<'s, S> {
    store: &'s KinshipStore,
    signaller: S,
}

impl<'s, S: Signaller> CascadeSignaler<'s, S> {
    pub fn new(store: &'s KinshipStore, signaller: S) -> Self {
        Self { store, signaller }
    }

    pub fn signaller(&mut self) -> &mut S {
        &mut self.signaller
    }

    pub fn cascade(
        &mut self,
        tree: &str,
        root: Pid,
        action: CascadeAction,
    ) -> Result<CascadeReport> {
        self.cascade_trees(&[tree], &[root], action)
    }

    /// Cascade over the union of every enabled tree.
    pub fn cascade_enabled(
        &mut self,
        roots: &[Pid],
        action: CascadeAction,
    ) -> Result<CascadeReport> {
        let trees = self.store.enabled_trees()?;
        self.cascade_trees(&trees, roots, action)
    }

    /// Roots share one visited set, so no pid gets the action twice.
    pub fn cascade_trees<T: AsRef<str>>(
        &mut self,
        trees: &[T],
        roots: &[Pid],
        action: CascadeAction,
    ) -> Result<CascadeReport> {
        let report = if action == CascadeAction::Unlink {
            let _lock = self.store.lock_exclusive()?;
            let graph = self.load_locked(trees)?;
            let mut report = self.apply(&graph, roots, true, action);
            report.pruned = self.prune_locked(trees, &report.visited)?;
            report
        } else {
            let graph = self.load(trees)?;
            self.apply(&graph, roots, true, action)
        };
        info!(
            "cascade from {roots:?} reached {} pids ({} failures)",
            report.visited.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Signals `roots` and their descendants, then drops every link out of
    /// the reached pids. The store stays locked from the first read to the
    /// last removal.
    pub fn cascade_and_prune<T: AsRef<str>>(
        &mut self,
        trees: &[T],
        roots: &[Pid],
        signal: Signal,
    ) -> Result<CascadeReport> {
        let _lock = self.store.lock_exclusive()?;
        let graph = self.load_locked(trees)?;
        let mut report =
            self.apply(&graph, roots, true, CascadeAction::Signal(signal));
        report.pruned = self.prune_locked(trees, &report.visited)?;
        info!(
            "cascade from {roots:?} reached {} pids, pruned {} links",
            report.visited.len(),
            report.pruned
        );
        Ok(report)
    }

    /// Signals the descendants of `root` but not `root` itself, then drops
    /// every link out of the reached pids and `root`.
    pub fn cascade_descendants<T: AsRef<str>>(
        &mut self,
        trees: &[T],
        root: Pid,
        signal: Signal,
    ) -> Result<CascadeReport> {
        let _lock = self.store.lock_exclusive()?;
        let graph = self.load_locked(trees)?;
        let mut report = self.apply(
            &graph,
            &[root],
            false,
            CascadeAction::Signal(signal),
        );
        let mut parents = report.visited.clone();
        parents.push(root);
        report.pruned = self.prune_locked(trees, &parents)?;
        Ok(report)
    }

    /// Removes, from each tree, every link whose parent is in `parents`.
    fn prune_locked<T: AsRef<str>>(
        &self,
        trees: &[T],
        parents: &[Pid],
    ) -> Result<usize> {
        let parents: HashSet<Pid> = parents.iter().copied().collect();
        let mutator = LinkMutator::new(self.store);
        let mut pruned = 0;
        for tree in trees {
            let tree = tree.as_ref();
            let path = self.store.ensure_tree(tree)?;
            pruned += mutator
                .remove_locked(tree, &path, &mut |l: Link| {
                    parents.contains(&l.parent)
                })?
                .len();
        }
        Ok(pruned)
    }

    fn load<T: AsRef<str>>(&self, trees: &[T]) -> Result<KinGraph> {
        let _lock = self.store.lock_shared()?;
        self.load_locked(trees)
    }

    fn load_locked<T: AsRef<str>>(&self, trees: &[T]) -> Result<KinGraph> {
        let mut graph = KinGraph::default();
        for tree in trees {
            let tree = tree.as_ref();
            self.store.ensure_tree(tree)?;
            graph.extend(self.store.read_links(tree)?);
        }
        Ok(graph)
    }

    fn apply(
        &mut self,
        graph: &KinGraph,
        roots: &[Pid],
        include_roots: bool,
        action: CascadeAction,
    ) -> CascadeReport {
        let mut report = CascadeReport::default();
        let signaller = &mut self.signaller;
        let mut visited = HashSet::new();
        graph.walk(roots, include_roots, &mut visited, |pid| {
            report.visited.push(pid);
            let CascadeAction::Signal(signal) = action else {
                return;
            };
            match signaller.deliver(pid, signal) {
                Ok(()) => debug!("sent {signal} to {pid}"),
                Err(e) => {
                    warn!("could not send {signal} to {pid}: {e}");
                    report.failures.push((pid, e));
                }
            }
        });
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_is_breadth_first_in_link_order() {
        let graph: KinGraph = [(1, 2), (1, 3), (2, 4), (3, 5), (2, 6)]
            .into_iter()
            .map(Link::from)
            .collect();
        assert_eq!(graph.closure(1), vec![1, 2, 3, 4, 6, 5]);
    }

    #[test]
    fn test_root_without_children_is_still_visited() {
        let graph = KinGraph::default();
        assert_eq!(graph.closure(42), vec![42]);
    }

    #[test]
    fn test_shared_visited_set_across_roots() {
        let graph: KinGraph =
            [(1, 3), (2, 3), (3, 4)].into_iter().map(Link::from).collect();
        let mut visited = HashSet::new();
        let mut seen = Vec::new();
        graph.walk(&[1, 2], true, &mut visited, |p| seen.push(p));
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_roots_can_be_skipped() {
        let graph: KinGraph =
            [(1, 2), (2, 1)].into_iter().map(Link::from).collect();
        let mut seen = Vec::new();
        graph.walk(&[1], false, &mut HashSet::new(), |p| seen.push(p));
        assert_eq!(seen, vec![2]);
    }

    #[test]
    fn test_delivered_excludes_failures() {
        let report = CascadeReport {
            visited: vec![1, 2, 3],
            failures: vec![(2, Errno::ESRCH)],
            pruned: 0,
        };
        assert_eq!(report.delivered().collect::<Vec<_>>(), vec![1, 3]);
    }
}
