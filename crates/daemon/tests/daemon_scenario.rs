use std::{collections::VecDeque, fs, io};

use mangd::{
    DaemonConfig, ReactionConfig, Reactor, Shutdown, SnapshotDiffDaemon,
};
use mangd_rules::{Action, Rule};
use mangrove_common::{
    KinshipStore, Link, LinkMutator, Pid, ProcessCensus, Signal, Signaller,
    Snapshot, StoreConfig, signal::Errno,
};

/// Plays back canned censuses, repeating the last one once exhausted.
struct ScriptedCensus {
    frames: VecDeque<Snapshot>,
    last: Snapshot,
}

impl ScriptedCensus {
    fn new<const N: usize>(frames: [&[(Pid, &str)]; N]) -> Self {
        Self {
            frames: frames
                .iter()
                .map(|frame| frame.iter().copied().collect())
                .collect(),
            last: Snapshot::default(),
        }
    }
}

impl ProcessCensus for ScriptedCensus {
    fn capture(&mut self) -> Snapshot {
        if let Some(frame) = self.frames.pop_front() {
            self.last = frame;
        }
        self.last.clone()
    }
}

#[derive(Default)]
struct RecordingReactor {
    signals: Vec<(Pid, Signal)>,
    commands: Vec<String>,
    dead: Vec<Pid>,
}

impl Signaller for RecordingReactor {
    fn deliver(&mut self, pid: Pid, signal: Signal) -> Result<(), Errno> {
        if self.dead.contains(&pid) {
            return Err(Errno::ESRCH);
        }
        self.signals.push((pid, signal));
        Ok(())
    }
}

impl Reactor for RecordingReactor {
    fn exec(&mut self, command: &str) -> io::Result<()> {
        self.commands.push(command.to_string());
        Ok(())
    }
}

fn daemon(
    census: ScriptedCensus,
    rules: Vec<Rule>,
    config: DaemonConfig,
    store: Option<KinshipStore>,
) -> SnapshotDiffDaemon<ScriptedCensus, RecordingReactor> {
    SnapshotDiffDaemon::new(
        census,
        RecordingReactor::default(),
        ReactionConfig::from_rules(rules),
        config,
        store,
    )
}

#[test]
fn test_vanished_parent_kills_named_child_once() {
    let census = ScriptedCensus::new([
        &[(10, "agent"), (11, "worker")],
        &[(11, "worker")],
    ]);
    let mut daemon = daemon(
        census,
        vec![Rule::new("agent", "worker")],
        DaemonConfig::default(),
        None,
    );

    let report = daemon.tick();

    assert_eq!(report.vanished, [10]);
    assert_eq!(report.kills, [11]);
    assert_eq!(daemon.reactor().signals, [(11, Signal::SIGKILL)]);

    // nothing else disappears on the next round
    let report = daemon.tick();
    assert!(report.vanished.is_empty());
    assert!(report.is_quiet());
    assert_eq!(daemon.reactor().signals.len(), 1);
}

#[test]
fn test_unrelated_disappearance_is_ignored() {
    let census = ScriptedCensus::new([
        &[(10, "agent"), (11, "worker"), (12, "bystander")],
        &[(10, "agent"), (11, "worker")],
    ]);
    let mut daemon = daemon(
        census,
        vec![Rule::new("agent", "worker")],
        DaemonConfig::default(),
        None,
    );

    let report = daemon.tick();

    assert_eq!(report.vanished, [12]);
    assert!(report.is_quiet());
    assert!(daemon.reactor().signals.is_empty());
}

#[test]
fn test_every_process_of_the_child_name_is_killed() {
    let census = ScriptedCensus::new([
        &[(10, "agent"), (11, "worker"), (12, "worker"), (13, "other")],
        &[(11, "worker"), (12, "worker"), (13, "other")],
    ]);
    let mut daemon = daemon(
        census,
        vec![Rule::new("agent", "worker")],
        DaemonConfig::default(),
        None,
    );

    let report = daemon.tick();

    assert_eq!(report.kills, [11, 12]);
}

#[test]
fn test_exec_rule_runs_command() {
    let census = ScriptedCensus::new([
        &[(10, "agent"), (11, "worker")],
        &[(11, "worker")],
    ]);
    let rules = vec![
        Rule::new("agent", "logger -t mangd agent gone")
            .with_action(Action::Exec),
    ];
    let mut daemon = daemon(census, rules, DaemonConfig::default(), None);

    let report = daemon.tick();

    assert_eq!(report.execs, ["logger -t mangd agent gone"]);
    assert_eq!(daemon.reactor().commands, ["logger -t mangd agent gone"]);
    assert!(daemon.reactor().signals.is_empty());
}

#[test]
fn test_default_action_applies_to_bare_rules() {
    let census = ScriptedCensus::new([
        &[(10, "agent"), (11, "worker")],
        &[(11, "worker")],
    ]);
    let config = DaemonConfig {
        default_action: Action::Exec,
        ..DaemonConfig::default()
    };
    let mut daemon =
        daemon(census, vec![Rule::new("agent", "restart")], config, None);

    let report = daemon.tick();

    assert_eq!(report.execs, ["restart"]);
    assert!(report.kills.is_empty());
}

#[test]
fn test_long_names_match_truncated_comm() {
    let census = ScriptedCensus::new([
        &[(10, "supervisor-daem"), (11, "worker")],
        &[(11, "worker")],
    ]);
    let mut daemon = daemon(
        census,
        vec![Rule::new("supervisor-daemon", "worker")],
        DaemonConfig::default(),
        None,
    );

    assert_eq!(daemon.tick().kills, [11]);
}

#[test]
fn test_failed_kill_is_reported() {
    let census = ScriptedCensus::new([
        &[(10, "agent"), (11, "worker")],
        &[(11, "worker")],
    ]);
    let mut daemon = SnapshotDiffDaemon::new(
        census,
        RecordingReactor {
            dead: vec![11],
            ..RecordingReactor::default()
        },
        ReactionConfig::from_rules(vec![Rule::new("agent", "worker")]),
        DaemonConfig::default(),
        None,
    );

    let report = daemon.tick();

    assert!(report.kills.is_empty());
    assert_eq!(report.failures, [(11, Errno::ESRCH)]);
}

#[test]
fn test_cascade_over_enabled_trees() {
    let dir = tempfile::tempdir().unwrap();
    let store = KinshipStore::open(StoreConfig::new(dir.path())).unwrap();
    store.create_tree("job").unwrap();
    store.create_tree("off").unwrap();
    store.enable("job").unwrap();
    let mutator = LinkMutator::new(&store);
    mutator.append_link("job", 10, 20).unwrap();
    mutator.append_link("job", 20, 30).unwrap();
    mutator.append_link("job", 40, 41).unwrap();
    mutator.append_link("off", 30, 50).unwrap();

    let census = ScriptedCensus::new([
        &[(10, "lead"), (20, "a"), (30, "b"), (40, "c"), (41, "d")],
        &[(20, "a"), (30, "b"), (40, "c"), (41, "d")],
    ]);
    let config = DaemonConfig {
        cascade: true,
        ..DaemonConfig::default()
    };
    let mut daemon = daemon(census, Vec::new(), config, Some(store));

    let report = daemon.tick();

    assert_eq!(report.cascaded, [20, 30]);
    assert_eq!(
        daemon.reactor().signals,
        [(20, Signal::SIGKILL), (30, Signal::SIGKILL)]
    );

    let store = KinshipStore::open(StoreConfig::new(dir.path())).unwrap();
    assert_eq!(
        store.list_links("job").unwrap(),
        [Link::new(40, 41)]
    );
    assert_eq!(store.list_links("off").unwrap().len(), 1);
}

#[test]
fn test_cascade_reads_trees_with_custom_separator() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::new(dir.path()).with_separator(" => ");
    let store = KinshipStore::open(config.clone()).unwrap();
    store.create_tree("job").unwrap();
    store.enable("job").unwrap();
    LinkMutator::new(&store).append_link("job", 10, 20).unwrap();
    let stored = fs::read_to_string(dir.path().join("job")).unwrap();
    assert_eq!(stored, "10 => 20\n");

    let census = ScriptedCensus::new([
        &[(10, "lead"), (20, "a")],
        &[(20, "a")],
    ]);
    let daemon_config = DaemonConfig {
        cascade: true,
        ..DaemonConfig::default()
    };
    let mut daemon = daemon(census, Vec::new(), daemon_config, Some(store));

    let report = daemon.tick();

    assert_eq!(report.cascaded, [20]);
    assert!(report.failures.is_empty());
    let store = KinshipStore::open(config).unwrap();
    assert!(store.list_links("job").unwrap().is_empty());
}

#[test]
fn test_rule_file_changes_are_picked_up() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mangd.conf");
    fs::write(&path, "'agent'->'worker';").unwrap();
    let rules = ReactionConfig::load(&path).unwrap();

    let census = ScriptedCensus::new([
        &[(10, "agent"), (11, "worker"), (12, "other")],
        &[(10, "agent"), (11, "worker"), (12, "other")],
        &[(11, "worker"), (12, "other")],
    ]);
    let mut daemon = SnapshotDiffDaemon::new(
        census,
        RecordingReactor::default(),
        rules,
        DaemonConfig::default(),
        None,
    );
    assert!(daemon.tick().vanished.is_empty());

    fs::write(&path, "exec 'agent'->'true';\n'agent'->'other';").unwrap();
    // some filesystems only keep whole seconds
    let later = fs::metadata(&path).unwrap().modified().unwrap()
        + std::time::Duration::from_secs(2);
    fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(later)
        .unwrap();

    let report = daemon.tick();

    assert_eq!(daemon.rules().rules().len(), 2);
    assert_eq!(report.execs, ["true"]);
    assert_eq!(report.kills, [12]);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let census = ScriptedCensus::new([&[(1, "init")]]);
    let mut daemon =
        daemon(census, Vec::new(), DaemonConfig::default(), None);
    let shutdown = Shutdown::new();
    shutdown.trigger();

    daemon.run(shutdown).await;

    assert!(daemon.reactor().signals.is_empty());
}
