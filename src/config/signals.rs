//! Program termination signals.
//!
//! The guest init delivers one of these to a program when the machine is
//! asked to stop. The set is closed: anything else is rejected at
//! configuration load time.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Signal sent to a program on termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TerminateSignal {
    #[serde(rename = "SIGINT")]
    Int,
    #[serde(rename = "SIGKILL")]
    Kill,
    #[serde(rename = "SIGQUIT")]
    Quit,
    #[serde(rename = "SIGPWR")]
    Pwr,
    #[serde(rename = "SIGSTOP")]
    Stop,
    #[default]
    #[serde(rename = "SIGTERM")]
    Term,
    #[serde(rename = "SIGUSR1")]
    Usr1,
    #[serde(rename = "SIGUSR2")]
    Usr2,
}

/// All supported signals, in declaration order.
pub const SUPPORTED_SIGNALS: &[(&str, TerminateSignal)] = &[
    ("SIGINT", TerminateSignal::Int),
    ("SIGKILL", TerminateSignal::Kill),
    ("SIGQUIT", TerminateSignal::Quit),
    ("SIGPWR", TerminateSignal::Pwr),
    ("SIGSTOP", TerminateSignal::Stop),
    ("SIGTERM", TerminateSignal::Term),
    ("SIGUSR1", TerminateSignal::Usr1),
    ("SIGUSR2", TerminateSignal::Usr2),
];

impl TerminateSignal {
    /// Parse a signal name, failing with the full supported list.
    pub fn parse(name: &str) -> Result<Self> {
        for (candidate, signal) in SUPPORTED_SIGNALS {
            if *candidate == name {
                return Ok(*signal);
            }
        }
        let supported = SUPPORTED_SIGNALS
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ");
        bail!("terminate signal '{name}' is not supported; supported signals: {supported}")
    }

    /// The canonical signal name.
    pub fn name(self) -> &'static str {
        match self {
            TerminateSignal::Int => "SIGINT",
            TerminateSignal::Kill => "SIGKILL",
            TerminateSignal::Quit => "SIGQUIT",
            TerminateSignal::Pwr => "SIGPWR",
            TerminateSignal::Stop => "SIGSTOP",
            TerminateSignal::Term => "SIGTERM",
            TerminateSignal::Usr1 => "SIGUSR1",
            TerminateSignal::Usr2 => "SIGUSR2",
        }
    }

    /// The numeric signal value delivered inside the guest.
    pub fn number(self) -> libc::c_int {
        match self {
            TerminateSignal::Int => libc::SIGINT,
            TerminateSignal::Kill => libc::SIGKILL,
            TerminateSignal::Quit => libc::SIGQUIT,
            TerminateSignal::Pwr => libc::SIGPWR,
            TerminateSignal::Stop => libc::SIGSTOP,
            TerminateSignal::Term => libc::SIGTERM,
            TerminateSignal::Usr1 => libc::SIGUSR1,
            TerminateSignal::Usr2 => libc::SIGUSR2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_sigterm() {
        assert_eq!(TerminateSignal::default(), TerminateSignal::Term);
    }

    #[test]
    fn parse_accepts_every_supported_signal() {
        for (name, signal) in SUPPORTED_SIGNALS {
            assert_eq!(TerminateSignal::parse(name).unwrap(), *signal);
        }
    }

    #[test]
    fn parse_rejection_lists_alternatives() {
        let err = TerminateSignal::parse("SIGHUP").unwrap_err().to_string();
        assert!(err.contains("SIGHUP"));
        for (name, _) in SUPPORTED_SIGNALS {
            assert!(err.contains(name), "missing {name} in: {err}");
        }
    }

    #[test]
    fn numbers_match_libc() {
        assert_eq!(TerminateSignal::Term.number(), 15);
        assert_eq!(TerminateSignal::Kill.number(), 9);
    }
}
