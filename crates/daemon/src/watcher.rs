use std::time::Duration;

use mangd_rules::Action;
use mangrove_common::{
    CascadeSignaler, KinshipStore, Pid, ProcessCensus, Signal, Snapshot,
    signal::Errno,
};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::{
    reactions::Reactor, rules_file::ReactionConfig, shutdown::Shutdown,
};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonConfig {
    pub interval: Duration,
    /// Action of rules that don't name one.
    pub default_action: Action,
    /// Also cascade SIGKILL from every vanished pid over the enabled trees.
    pub cascade: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            default_action: Action::Kill,
            cascade: false,
        }
    }
}

/// What one census round did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub vanished: Vec<Pid>,
    /// Pids SIGKILLed by rules, in delivery order.
    pub kills: Vec<Pid>,
    pub execs: Vec<String>,
    /// Pids signalled by tree cascades.
    pub cascaded: Vec<Pid>,
    pub failures: Vec<(Pid, Errno)>,
}

impl TickReport {
    pub fn is_quiet(&self) -> bool {
        self.kills.is_empty()
            && self.execs.is_empty()
            && self.cascaded.is_empty()
    }
}

/// Compares consecutive process censuses and reacts to the processes that
/// disappeared in between.
pub struct SnapshotDiffDaemon<C, R> {
    census: C,
    reactor: R,
    rules: ReactionConfig,
    config: DaemonConfig,
    store: Option<KinshipStore>,
    previous: Snapshot,
}

impl<C: ProcessCensus, R: Reactor> SnapshotDiffDaemon<C, R> {
    /// Takes the first census right away.
    pub fn new(
        mut census: C,
        reactor: R,
        rules: ReactionConfig,
        config: DaemonConfig,
        store: Option<KinshipStore>,
    ) -> Self {
        let previous = census.capture();
        info!("initial census: {} processes", previous.len());
        Self {
            census,
            reactor,
            rules,
            config,
            store,
            previous,
        }
    }

    pub fn reactor(&self) -> &R {
        &self.reactor
    }

    pub fn rules(&self) -> &ReactionConfig {
        &self.rules
    }

    /// One round: census, diff, reactions.
    pub fn tick(&mut self) -> TickReport {
        let Self {
            census,
            reactor,
            rules,
            config,
            store,
            previous,
        } = self;

        rules.reload_if_changed();
        let current = census.capture();
        let mut report = TickReport {
            vanished: previous.vanished_since(&current),
            ..TickReport::default()
        };
        // taken at most once, and only when some rule fires
        let mut live: Option<Snapshot> = None;
        let mut enabled_trees: Option<Vec<String>> = None;

        for &pid in &report.vanished {
            let Some(name) = previous.name_of(pid) else {
                continue;
            };
            debug!("{name} ({pid}) vanished");
            for rule in rules.matching(name) {
                match rule.action_or(config.default_action) {
                    Action::Kill => {
                        let live = live.get_or_insert_with(|| census.capture());
                        for target in live.pids_named(&rule.child) {
                            match reactor.deliver(target, Signal::SIGKILL) {
                                Ok(()) => {
                                    info!(
                                        "{name} ({pid}) gone, killed {} \
                                         ({target})",
                                        rule.child
                                    );
                                    report.kills.push(target);
                                }
                                Err(e) => {
                                    warn!("could not kill {target}: {e}");
                                    report.failures.push((target, e));
                                }
                            }
                        }
                    }
                    Action::Exec => match reactor.exec(&rule.child) {
                        Ok(()) => {
                            info!(
                                "{name} ({pid}) gone, started {:?}",
                                rule.child
                            );
                            report.execs.push(rule.child.clone());
                        }
                        Err(e) => {
                            error!("could not run {:?}: {e}", rule.child);
                        }
                    },
                }
            }

            if let Some(store) = store.as_ref().filter(|_| config.cascade) {
                if enabled_trees.is_none() {
                    match store.enabled_trees() {
                        Ok(trees) => enabled_trees = Some(trees),
                        Err(e) => {
                            error!("cannot list enabled trees: {e}");
                            continue;
                        }
                    }
                }
                let trees = enabled_trees.as_deref().unwrap_or_default();
                let mut cascade = CascadeSignaler::new(store, &mut *reactor);
                match cascade.cascade_descendants(trees, pid, Signal::SIGKILL) {
                    Ok(cascaded) => {
                        report.failures.extend_from_slice(&cascaded.failures);
                        report.cascaded.extend(cascaded.delivered());
                    }
                    Err(e) => error!("cascade from {pid} failed: {e}"),
                }
            }
        }

        *previous = current;
        report
    }

    /// Ticks every `config.interval` until `shutdown` fires. Late ticks are
    /// skipped rather than bunched up.
    pub async fn run(&mut self, shutdown: Shutdown) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                () = shutdown.wait() => {
                    info!("census loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let report = self.tick();
                    if !report.is_quiet() {
                        debug!("{report:?}");
                    }
                }
            }
        }
    }
}
