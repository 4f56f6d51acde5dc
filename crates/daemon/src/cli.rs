use std::{
    io,
    path::{self, PathBuf},
};

use mangd_rules::Action;
use mangrove_common::config::{DEFAULT_SEPARATOR, ROOT_ENV};

use crate::rules_file::DEFAULT_CONFIG_PATH;

static HELP_STR_CONFIG: &str = "Reaction rule file. Each rule reads \
                                [kill|exec] 'parent' -> 'child'; and fires \
                                when a process named parent disappears. \
                                Example value: \"/etc/mangd.conf\"";

#[derive(clap::Parser)]
#[command(
    name = "mangd",
    version,
    about = "mangd",
    long_about = "Watches the process table and reacts to processes \
                  disappearing: kills processes named after them, runs \
                  commands, or cascades over the enabled mangrove trees"
)]
pub enum Args {
    /// Watch the process table until SIGINT or SIGTERM.
    Run {
        #[arg(
            long,
            short,
            value_name = "CONFIG_PATH",
            help = HELP_STR_CONFIG,
            default_value = DEFAULT_CONFIG_PATH
        )]
        config: PathBuf,

        #[arg(
            long,
            short,
            value_name = "MILLISECONDS",
            help = "Delay between two censuses",
            default_value_t = 100
        )]
        interval_ms: u64,

        #[arg(
            long,
            value_name = "ACTION",
            help = "Action of rules that name none: kill or exec",
            default_value = "kill"
        )]
        default_action: Action,

        #[arg(
            long,
            help = "Also SIGKILL, through the enabled trees, the descendants \
                    of every vanished process"
        )]
        cascade: bool,

        #[arg(
            long,
            env = ROOT_ENV,
            value_name = "DIR",
            help = "Tree directory used with --cascade"
        )]
        root: Option<PathBuf>,

        #[arg(
            long,
            value_name = "SEPARATOR",
            help = "Text between parent and child in tree files, as given \
                    to mangrove --separator",
            default_value = DEFAULT_SEPARATOR
        )]
        separator: String,

        #[arg(
            long,
            short = 'f',
            help = "Run in background (double-fork)"
        )]
        daemonize: bool,

        #[arg(
            long,
            short = 'l',
            value_name = "LOG_PATH",
            help = "Optional log path value. If not provided, logs will \
                    placed in /tmp/mangd-$PID.log"
        )]
        log_path: Option<PathBuf>,

        #[arg(
            long,
            conflicts_with_all = ["log_path", "daemonize"],
            help = "Log to stderr instead of a file"
        )]
        foreground_log: bool,
    },
    /// Parse a rule file, print its rules and report malformed ones.
    Check {
        #[arg(
            long,
            short,
            value_name = "CONFIG_PATH",
            help = HELP_STR_CONFIG,
            default_value = DEFAULT_CONFIG_PATH
        )]
        config: PathBuf,

        #[arg(long, help = "Print the parsed rules as JSON")]
        json: bool,
    },
    /// Print rules linking process names. `-` or no name reads names from
    /// stdin.
    Rules {
        #[arg(short, long, help = "Each name is the parent of the next")]
        chain: bool,

        #[arg(short, long, help = "Swap parents and children")]
        reverse: bool,

        #[arg(
            short,
            long,
            help = "Print every rule in both directions, overrides -r"
        )]
        bidirectional: bool,

        names: Vec<String>,
    },
}

impl Args {
    /// Resolves relative paths of `run` against the current directory, as
    /// a daemonized run changes its directory to `/`.
    pub fn with_absolute_paths(mut self) -> io::Result<Self> {
        if let Args::Run {
            config,
            root,
            log_path,
            ..
        } = &mut self
        {
            *config = path::absolute(&*config)?;
            for given in [root, log_path].into_iter().flatten() {
                *given = path::absolute(&*given)?;
            }
        }
        Ok(self)
    }
}
