use std::path::PathBuf;

use clap::ArgAction;
use mangrove_common::{
    Pid, Signal, Topology,
    config::{DEFAULT_SEPARATOR, ROOT_ENV},
    signal::parse_signal,
};

static HELP_STR_ROOT: &str = "Directory holding the trees. Defaults to \
                              $XDG_DATA_HOME/mangrove, or \
                              /tmp/mangrove-$UID without a data directory. \
                              Example value: \"/run/user/1000/mangrove\"";

static HELP_STR_PIDS: &str = "Pids; `-` reads more of them, separated by \
                              whitespace, from stdin";

#[derive(clap::Parser)]
#[command(
    name = "mangrove",
    version,
    about = "mangrove",
    long_about = "Records which process spawned which in named trees, and \
                  kills processes together with everything they spawned"
)]
pub struct Args {
    #[arg(
        long,
        global = true,
        env = ROOT_ENV,
        value_name = "DIR",
        help = HELP_STR_ROOT
    )]
    pub root: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_name = "TOKEN",
        help = "Token between the two pids of a stored link",
        default_value = DEFAULT_SEPARATOR
    )]
    pub separator: String,

    #[arg(
        short,
        long,
        global = true,
        action = ArgAction::Count,
        help = "Log what is done (-v) and every link touched (-vv) to stderr"
    )]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Create empty, disabled trees.
    New {
        #[arg(required = true, help = "Tree names; `-` reads them from stdin")]
        trees: Vec<String>,
    },
    /// Delete trees with their links.
    Delete {
        #[arg(required = true, help = "Tree names; `-` reads them from stdin")]
        trees: Vec<String>,
    },
    /// Make `kill` and `mangd --cascade` follow a tree by default.
    Enable { tree: String },
    Disable { tree: String },
    /// Print every tree, `[*]` marking the enabled ones.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Print the links of trees.
    Links {
        #[arg(long, help = "Print links exactly as stored")]
        raw: bool,

        #[arg(long, conflicts_with = "raw")]
        json: bool,

        #[arg(required = true)]
        trees: Vec<String>,
    },
    /// Link pids. The first one is the parent of all the others unless
    /// --chain or --ring is given.
    Link {
        tree: String,

        #[arg(
            long,
            conflicts_with = "ring",
            help = "Each pid is the parent of the next"
        )]
        chain: bool,

        #[arg(
            long,
            help = "Like --chain, and the last pid is the parent of the first"
        )]
        ring: bool,

        #[arg(short, long, help = "Swap parents and children")]
        reverse: bool,

        #[arg(
            short,
            long,
            help = "Also store every link in the other direction"
        )]
        bidirectional: bool,

        #[arg(
            long,
            help = "Replace the links of the tree instead of appending"
        )]
        overwrite: bool,

        #[arg(required = true, help = HELP_STR_PIDS)]
        pids: Vec<String>,
    },
    /// Remove links. Removing nothing is not an error.
    Unlink {
        tree: String,

        #[arg(long, value_name = "PID", help = "Remove the links out of PID")]
        parent: Vec<Pid>,

        #[arg(long, value_name = "PID", help = "Remove the links into PID")]
        child: Vec<Pid>,

        #[arg(
            long,
            value_name = "PID",
            help = "Remove every link touching PID"
        )]
        either: Vec<Pid>,

        #[arg(
            help = "Exact links as PARENT CHILD pairs; `-` reads them from \
                    stdin"
        )]
        pairs: Vec<String>,
    },
    /// Remove every link of a tree.
    Clear { tree: String },
    /// Signal pids and all their descendants.
    Kill {
        #[arg(
            long,
            short,
            value_name = "TREE",
            help = "Trees to follow, instead of every enabled tree"
        )]
        tree: Vec<String>,

        #[arg(
            long,
            short,
            value_name = "SIGNAL",
            value_parser = signal_arg,
            default_value = "KILL"
        )]
        signal: Signal,

        #[arg(long, help = "Do not drop the links out of the signalled pids")]
        keep_links: bool,

        #[arg(long, help = "Print the full report as JSON")]
        json: bool,

        #[arg(required = true, help = HELP_STR_PIDS)]
        pids: Vec<String>,
    },
}

fn signal_arg(literal: &str) -> Result<Signal, String> {
    parse_signal(literal).ok_or_else(|| format!("unknown signal {literal:?}"))
}

/// `Star` unless one of the two flags asks otherwise.
pub fn topology(chain: bool, ring: bool) -> Topology {
    match (chain, ring) {
        (_, true) => Topology::Ring,
        (true, false) => Topology::Chain,
        (false, false) => Topology::Star,
    }
}
