pub use nix::{errno::Errno, sys::signal::Signal};
use nix::sys::signal::kill;

use crate::link::Pid;

/// Anything able to deliver a signal to a pid.
pub trait Signaller {
    fn deliver(&mut self, pid: Pid, signal: Signal) -> Result<(), Errno>;
}

impl<S: Signaller + ?Sized> Signaller for &mut S {
    fn deliver(&mut self, pid: Pid, signal: Signal) -> Result<(), Errno> {
        (**self).deliver(pid, signal)
    }
}

/// Delivers through `kill(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct KillSignaller;

impl Signaller for KillSignaller {
    fn deliver(&mut self, pid: Pid, signal: Signal) -> Result<(), Errno> {
        // 0 and negative pids address process groups, never a single process
        if pid <= 0 {
            return Err(Errno::ESRCH);
        }
        kill(nix::unistd::Pid::from_raw(pid), signal)
    }
}

/// Parses `KILL`, `SIGKILL`, `kill` or a signal number.
pub fn parse_signal(literal: &str) -> Option<Signal> {
    let literal = literal.trim();
    if let Ok(num) = literal.parse::<i32>() {
        return Signal::try_from(num).ok();
    }
    let upper = literal.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    name.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_spellings() {
        assert_eq!(parse_signal("KILL"), Some(Signal::SIGKILL));
        assert_eq!(parse_signal("sigterm"), Some(Signal::SIGTERM));
        assert_eq!(parse_signal("9"), Some(Signal::SIGKILL));
        assert_eq!(parse_signal("NOPE"), None);
    }

    #[test]
    fn test_group_pids_are_refused() {
        assert_eq!(
            KillSignaller.deliver(0, Signal::SIGKILL),
            Err(Errno::ESRCH)
        );
        assert_eq!(
            KillSignaller.deliver(-1, Signal::SIGKILL),
            Err(Errno::ESRCH)
        );
    }
}
