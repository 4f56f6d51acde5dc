use std::{io, process::Stdio};

use mangrove_common::{
    KillSignaller, Pid, Signal, Signaller, signal::Errno,
};
use tracing::debug;

/// Where the daemon's reactions end up: signals, and shell commands.
pub trait Reactor: Signaller {
    /// Starts `command` without waiting for it.
    fn exec(&mut self, command: &str) -> io::Result<()>;
}

impl<R: Reactor + ?Sized> Reactor for &mut R {
    fn exec(&mut self, command: &str) -> io::Result<()> {
        (**self).exec(command)
    }
}

/// Real signals, and commands run through `/bin/sh -c`. Must be used from
/// inside a tokio runtime, which reaps the children.
#[derive(Debug, Default)]
pub struct LiveReactor {
    signaller: KillSignaller,
}

impl Signaller for LiveReactor {
    fn deliver(&mut self, pid: Pid, signal: Signal) -> Result<(), Errno> {
        self.signaller.deliver(pid, signal)
    }
}

impl Reactor for LiveReactor {
    fn exec(&mut self, command: &str) -> io::Result<()> {
        let child = tokio::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .spawn()?;
        debug!("spawned {:?} for {command:?}", child.id());
        Ok(())
    }
}
