pub mod ssh;

use crate::config::HostConfig;
use itertools::Itertools;
use std::{
    fmt, io,
    process::{Child, ExitStatus},
    time::Duration,
};
use wait_timeout::ChildExt;

/// A fully resolved program invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", std::iter::once(&self.program).chain(&self.args).join(" "))
    }
}

/// Handle to a spawned process that can be checked for completion
pub trait ProcessHandle {
    /// non-blocking check, `None` while the process is still running
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;

    /// block for at most `timeout` waiting for the process to exit
    fn wait_for(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>>;
}

impl ProcessHandle for Child {
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        Child::try_wait(self)
    }

    fn wait_for(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        ChildExt::wait_timeout(self, timeout)
    }
}

/// How a resolved command reaches a host
pub trait Transport {
    type Handle: ProcessHandle;

    /// wrap `command` so that it runs on `host`
    fn invocation(&self, host: &HostConfig, command: Vec<String>) -> Invocation;

    /// start `invocation` without waiting for it
    fn spawn(&self, invocation: &Invocation) -> io::Result<Self::Handle>;
}
