use std::{fs::File, io, path::PathBuf};

use rustix::process::getpid;
use tracing_subscriber::{
    EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::cli::Args;

/// `run` logs to a file (default `info`) unless told to use stderr; the one
/// shot commands log warnings to stderr. `RUST_LOG` overrides the level.
pub fn init_tracing(args: &Args) -> io::Result<()> {
    let log_path = match args {
        Args::Run {
            log_path,
            foreground_log: false,
            ..
        } => log_path.clone().unwrap_or_else(|| {
            let pid = getpid().as_raw_nonzero();
            PathBuf::from(format!("/tmp/mangd-{pid}.log"))
        }),
        Args::Run { .. } => {
            stderr_subscriber("info");
            return Ok(());
        }
        Args::Check { .. } | Args::Rules { .. } => {
            stderr_subscriber("warn");
            return Ok(());
        }
    };

    let file = File::create(&log_path)?;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(false),
        )
        .init();
    Ok(())
}

fn stderr_subscriber(default_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}
