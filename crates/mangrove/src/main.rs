use std::{io, process::exit};

use clap::Parser;
use mangrove_common::{KinshipStore, StoreConfig};
use mimalloc::MiMalloc;

pub mod cli;
pub mod commands;
pub mod tracing_init;

use crate::{cli::Args, commands::execute, tracing_init::init_tracing};

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
    init_tracing(args.verbose);

    let root = args.root.unwrap_or_else(StoreConfig::default_root);
    let store = KinshipStore::open(
        StoreConfig::new(root).with_separator(args.separator),
    )?;
    execute(args.command, &store, io::stdin().lock(), &mut io::stdout().lock())
}
