use mangrove_common::{
    CascadeAction, CascadeSignaler, KinshipStore, Link, LinkMutator, Pid,
    Signal, Signaller, StoreConfig, lock::LOCK_FILE_NAME, signal::Errno,
};
use tempfile::TempDir;

/// Records deliveries instead of calling kill(2). Pids listed in `dead`
/// fail like an already reaped process would.
#[derive(Default)]
struct RecordingSignaller {
    sent: Vec<(Pid, Signal)>,
    dead: Vec<Pid>,
}

impl Signaller for RecordingSignaller {
    fn deliver(&mut self, pid: Pid, signal: Signal) -> Result<(), Errno> {
        self.sent.push((pid, signal));
        if self.dead.contains(&pid) {
            Err(Errno::ESRCH)
        } else {
            Ok(())
        }
    }
}

fn store_with(trees: &[(&str, &[(Pid, Pid)])]) -> (TempDir, KinshipStore) {
    let dir = TempDir::new().expect("Failed to create temp root");
    let store = KinshipStore::open(StoreConfig::new(dir.path())).unwrap();
    let mutator = LinkMutator::new(&store);
    for (name, pairs) in trees {
        store.create_tree(name).unwrap();
        for &(p, c) in *pairs {
            mutator.append_link(name, p, c).unwrap();
        }
    }
    (dir, store)
}

fn sorted(mut pids: Vec<Pid>) -> Vec<Pid> {
    pids.sort_unstable();
    pids
}

#[test]
fn test_chain_is_visited_once_whatever_the_insertion_order() {
    let orders: [&[(Pid, Pid)]; 3] = [
        &[(1, 2), (2, 3), (3, 4)],
        &[(3, 4), (2, 3), (1, 2)],
        &[(2, 3), (3, 4), (1, 2)],
    ];
    for links in orders {
        let (_dir, store) = store_with(&[("chain", links)]);
        let mut signals = RecordingSignaller::default();
        let report = CascadeSignaler::new(&store, &mut signals)
            .cascade("chain", 1, CascadeAction::default())
            .unwrap();

        assert_eq!(report.visited, vec![1, 2, 3, 4]);
        assert_eq!(signals.sent.len(), 4);
        assert!(signals.sent.iter().all(|(_, s)| *s == Signal::SIGKILL));
    }
}

#[test]
fn test_cycle_terminates() {
    let (_dir, store) = store_with(&[("loop", &[(10, 20), (20, 10)])]);
    let mut signals = RecordingSignaller::default();

    let report = CascadeSignaler::new(&store, &mut signals)
        .cascade("loop", 10, CascadeAction::Signal(Signal::SIGTERM))
        .unwrap();

    assert_eq!(report.visited, vec![10, 20]);
    assert_eq!(
        signals.sent,
        vec![(10, Signal::SIGTERM), (20, Signal::SIGTERM)]
    );
}

#[test]
fn test_failures_do_not_stop_the_walk() {
    let (_dir, store) = store_with(&[("t", &[(1, 2), (2, 3)])]);
    let mut signals = RecordingSignaller {
        dead: vec![2],
        ..Default::default()
    };

    let report = CascadeSignaler::new(&store, &mut signals)
        .cascade("t", 1, CascadeAction::default())
        .unwrap();

    assert_eq!(report.visited, vec![1, 2, 3]);
    assert_eq!(report.failures, vec![(2, Errno::ESRCH)]);
    assert_eq!(report.delivered().collect::<Vec<_>>(), vec![1, 3]);
}

#[test]
fn test_unlink_action_prunes_reached_parents() {
    let (_dir, store) = store_with(&[("t", &[(1, 2), (2, 3), (9, 8), (3, 1)])]);
    let mut signals = RecordingSignaller::default();

    let report = CascadeSignaler::new(&store, &mut signals)
        .cascade("t", 2, CascadeAction::Unlink)
        .unwrap();

    assert!(signals.sent.is_empty());
    assert_eq!(report.visited, vec![2, 3, 1]);
    assert_eq!(report.pruned, 3);
    assert_eq!(store.list_links("t").unwrap(), vec![Link::new(9, 8)]);
}

#[test]
fn test_enabled_trees_form_one_graph() {
    let (_dir, store) = store_with(&[
        ("a", &[(1, 2)]),
        ("b", &[(2, 3)]),
        ("off", &[(3, 4)]),
    ]);
    store.enable("a").unwrap();
    store.enable("b").unwrap();
    let mut signals = RecordingSignaller::default();

    let report = CascadeSignaler::new(&store, &mut signals)
        .cascade_enabled(&[1], CascadeAction::default())
        .unwrap();

    assert_eq!(report.visited, vec![1, 2, 3]);
}

#[test]
fn test_multiple_roots_share_visits() {
    let (_dir, store) = store_with(&[("t", &[(1, 3), (2, 3), (3, 4)])]);
    let mut signals = RecordingSignaller::default();

    let report = CascadeSignaler::new(&store, &mut signals)
        .cascade_trees(&["t"], &[1, 2], CascadeAction::default())
        .unwrap();

    assert_eq!(sorted(report.visited), vec![1, 2, 3, 4]);
    assert_eq!(signals.sent.len(), 4);
}

#[test]
fn test_descendants_spare_the_root_and_prune_it() {
    let (_dir, store) = store_with(&[("t", &[(5, 6), (6, 7), (8, 9)])]);
    let mut signals = RecordingSignaller::default();

    let report = CascadeSignaler::new(&store, &mut signals)
        .cascade_descendants(&["t"], 5, Signal::SIGKILL)
        .unwrap();

    assert_eq!(report.visited, vec![6, 7]);
    assert_eq!(report.pruned, 2);
    assert_eq!(store.list_links("t").unwrap(), vec![Link::new(8, 9)]);
}

/// Notes, at every delivery, whether another descriptor could take a shared
/// lock on the store.
struct LockCheckingSignaller {
    lock_path: std::path::PathBuf,
    lock_free: Vec<bool>,
}

impl Signaller for LockCheckingSignaller {
    fn deliver(&mut self, _pid: Pid, _signal: Signal) -> Result<(), Errno> {
        let file = std::fs::File::open(&self.lock_path).unwrap();
        let taken = rustix::fs::flock(
            &file,
            rustix::fs::FlockOperation::NonBlockingLockShared,
        );
        self.lock_free.push(taken.is_ok());
        Ok(())
    }
}

#[test]
fn test_cascade_and_prune_holds_the_store_lock() {
    let (dir, store) =
        store_with(&[("a", &[(1, 2), (2, 3), (7, 8)]), ("b", &[(3, 4)])]);
    let mut signals = LockCheckingSignaller {
        lock_path: dir.path().join(LOCK_FILE_NAME),
        lock_free: Vec::new(),
    };

    let report = CascadeSignaler::new(&store, &mut signals)
        .cascade_and_prune(&["a", "b"], &[1], Signal::SIGTERM)
        .unwrap();

    assert_eq!(report.visited, vec![1, 2, 3, 4]);
    assert_eq!(report.pruned, 3);
    assert_eq!(signals.lock_free, [false; 4]);
    assert_eq!(store.list_links("a").unwrap(), vec![Link::new(7, 8)]);
    assert!(store.list_links("b").unwrap().is_empty());
}
