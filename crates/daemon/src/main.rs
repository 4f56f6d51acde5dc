use std::{
    io::{self, Write},
    path::Path,
    process::{self, exit},
    time::Duration,
};

use clap::Parser;
use eyre::{WrapErr, bail};
use mangd::{
    DaemonConfig, LiveReactor, ReactionConfig, Shutdown, SnapshotDiffDaemon,
    cli::Args,
    rules_file::{read_rule_file, write_rules},
    tracing_init::init_tracing,
};
use mangd_rules::{Action, NameLinking, rules_from_names};
use mangrove_common::{
    KinshipStore, StoreConfig, SysinfoCensus, double_fork::daemon_double_fork,
    stdin_args::expand_dash,
};
use mimalloc::MiMalloc;
use tracing::{error, info};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            exit(1);
        }
        // --help and --version
        Err(e) => e.exit(),
    };
    let args = args
        .with_absolute_paths()
        .wrap_err("could not resolve the paths of mangd run")?;

    if let Args::Run {
        daemonize: true,
        config,
        ..
    } = &args
    {
        // complain while stderr is still attached
        read_rule_file(config)?;
        daemon_double_fork().wrap_err("could not daemonize")?;
    }
    init_tracing(&args).wrap_err("could not initialize logging")?;

    match args {
        Args::Run {
            config,
            interval_ms,
            default_action,
            cascade,
            root,
            separator,
            ..
        } => {
            let store = cascade.then(|| {
                let root = root.unwrap_or_else(StoreConfig::default_root);
                StoreConfig::new(root).with_separator(separator)
            });
            let result = run(&config, interval_ms, default_action, store);
            if let Err(e) = &result {
                // stderr is gone once daemonized
                error!("mangd stopped: {e:#}");
            }
            result
        }
        Args::Check { config, json } => check(&config, json),
        Args::Rules {
            chain,
            reverse,
            bidirectional,
            names,
        } => print_rules(
            names,
            NameLinking {
                chain,
                reverse,
                bidirectional,
            },
        ),
    }
}

fn run(
    config_path: &Path,
    interval_ms: u64,
    default_action: Action,
    store: Option<StoreConfig>,
) -> eyre::Result<()> {
    if !sysinfo::IS_SUPPORTED_SYSTEM {
        bail!("process listing is not supported on this system");
    }
    let rules = ReactionConfig::load(config_path)?;
    let store = store.map(KinshipStore::open).transpose()?;
    let config = DaemonConfig {
        interval: Duration::from_millis(interval_ms.max(1)),
        default_action,
        cascade: store.is_some(),
    };
    info!(
        "mangd {} watching every {:?} with {} rules",
        process::id(),
        config.interval,
        rules.rules().len()
    );

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .wrap_err("unable to initialize tokio runtime")?
        .block_on(async move {
            let shutdown = Shutdown::new();
            shutdown.trigger_on_signals();
            let mut daemon = SnapshotDiffDaemon::new(
                SysinfoCensus::new(),
                LiveReactor::default(),
                rules,
                config,
                store,
            );
            daemon.run(shutdown).await;
        });
    Ok(())
}

fn check(path: &Path, json: bool) -> eyre::Result<()> {
    let (rules, errors) = read_rule_file(path)?;
    write_rules(&rules, json, &mut io::stdout().lock())?;
    for e in &errors {
        eprintln!("{}:{e}", path.display());
    }
    if !errors.is_empty() {
        bail!("{} malformed rules in {}", errors.len(), path.display());
    }
    Ok(())
}

fn print_rules(names: Vec<String>, linking: NameLinking) -> eyre::Result<()> {
    // no name at all reads them all from stdin
    let names = if names.is_empty() {
        vec!["-".to_string()]
    } else {
        names
    };
    let names = expand_dash(names, io::stdin().lock())?;
    let mut out = io::stdout().lock();
    for rule in rules_from_names(&names, linking) {
        writeln!(out, "{rule}")?;
    }
    Ok(())
}
