use super::{Invocation, Transport};
use crate::config::HostConfig;
use std::{
    io,
    process::{Child, Command, Stdio},
};
use tracing::debug;

/// Runs commands on remote hosts through a remote shell such as `ssh`
#[derive(Clone, Debug)]
pub struct SshTransport {
    program: String,
}

impl SshTransport {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new("ssh")
    }
}

impl Transport for SshTransport {
    type Handle = Child;

    fn invocation(&self, host: &HostConfig, command: Vec<String>) -> Invocation {
        let mut args = Vec::with_capacity(command.len() + 1);
        args.push(format!("{}@{}", host.user_name, host.host_name));
        args.extend(command);

        Invocation {
            program: self.program.clone(),
            args,
        }
    }

    fn spawn(&self, invocation: &Invocation) -> io::Result<Child> {
        // stdin stays with the argument reader, the remote shell would drain it otherwise
        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .spawn()?;

        debug!(pid = child.id(), "Spawned {invocation}");

        Ok(child)
    }
}
