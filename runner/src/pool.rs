//! Worker slot allocation and process lifecycle tracking.
//!
//! Every configured host contributes `max_processes` numbered slots. A slot is
//! either queued as idle or mapped to the process running on it, never both.
//! Allocation takes the slot idle the longest, reclamation puts freed slots at
//! the back of the queue.

use crate::{
    config::{ConfigErrors, HostRegistry},
    executors::{ProcessHandle, Transport},
    template::CommandTemplate,
};
use std::{
    collections::{BTreeMap, VecDeque},
    fmt, io,
    string::FromUtf8Error,
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, error, info, instrument, trace, warn};
use tracing_unwrap::OptionExt;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("failed to spawn `{invocation}` for slot {slot}: {source}")]
    Spawn {
        slot: SlotId,
        invocation: String,
        source: io::Error,
    },
    #[error("failed to check process on slot {slot}: {source}")]
    Wait { slot: SlotId, source: io::Error },
    #[error("argument is not valid UTF-8")]
    Encoding(#[from] FromUtf8Error),
}

/// One unit of execution capacity on a host
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId {
    pub host_name: String,
    pub number: usize,
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.host_name, self.number)
    }
}

/// Summary of a finished run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub spawned: usize,
    pub failed: usize,
}

pub struct WorkerPool<T: Transport> {
    hosts: HostRegistry,
    template: CommandTemplate,
    transport: T,
    echo: bool,
    poll_interval: Duration,
    capacity: usize,
    idle: VecDeque<SlotId>,
    running: BTreeMap<SlotId, T::Handle>,
    report: DrainReport,
}

impl<T: Transport> WorkerPool<T> {
    pub fn new(
        hosts: HostRegistry,
        template: CommandTemplate,
        transport: T,
        echo: bool,
    ) -> Result<Self, ConfigErrors> {
        if hosts.is_empty() {
            return Err(ConfigErrors::NoHosts);
        }

        // registry iteration is sorted by host name, which fixes the initial slot order
        let idle: VecDeque<SlotId> = hosts
            .iter()
            .flat_map(|host| {
                (1..=host.max_processes).map(|number| SlotId {
                    host_name: host.host_name.clone(),
                    number,
                })
            })
            .collect();

        debug!(slots = idle.len(), hosts = hosts.len(), "Created worker pool");

        Ok(Self {
            capacity: idle.len(),
            hosts,
            template,
            transport,
            echo,
            poll_interval: DEFAULT_POLL_INTERVAL,
            idle,
            running: BTreeMap::new(),
            report: DrainReport::default(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn has_running_processes(&self) -> bool {
        !self.running.is_empty()
    }

    /// run `chunk` on the next free slot, waiting for one if all are busy
    #[instrument(skip_all, level = "debug", fields(arguments = chunk.len()))]
    pub fn submit(&mut self, chunk: &[Vec<u8>]) -> Result<SlotId, PoolError> {
        let chunk = chunk
            .iter()
            .map(|argument| String::from_utf8(argument.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        let slot = self.allocate()?;
        let host = self
            .hosts
            .get(&slot.host_name)
            .expect_or_log("slot refers to a host missing from the registry");

        let invocation = self
            .transport
            .invocation(host, self.template.resolve(&chunk));

        if self.echo {
            eprintln!("{invocation}");
        }

        match self.transport.spawn(&invocation) {
            Ok(handle) => {
                trace!(slot = %slot, "Started {invocation}");
                self.running.insert(slot.clone(), handle);
                self.report.spawned += 1;

                Ok(slot)
            }
            Err(source) => {
                // keep the slot accounted for while the error propagates
                self.idle.push_front(slot.clone());

                Err(PoolError::Spawn {
                    slot,
                    invocation: invocation.to_string(),
                    source,
                })
            }
        }
    }

    /// wait for every running process to exit and tear down the pool
    pub fn drain(mut self) -> Result<DrainReport, PoolError> {
        while self.has_running_processes() {
            self.reclaim()?;
        }

        if self.report.failed > 0 {
            warn!(
                failed = self.report.failed,
                spawned = self.report.spawned,
                "Some processes exited unsuccessfully"
            );
        } else {
            info!(spawned = self.report.spawned, "All processes finished");
        }

        Ok(self.report)
    }

    fn allocate(&mut self) -> Result<SlotId, PoolError> {
        if self.running.len() >= self.capacity {
            self.reclaim()?;
        }

        let slot = self
            .idle
            .pop_front()
            .expect_or_log("no idle slot although fewer processes than slots are running");

        if self.running.contains_key(&slot) {
            error!(slot = %slot, "Idle slot is also marked as running");
            panic!("slot {slot} is both idle and running");
        }

        Ok(slot)
    }

    /// block until at least one running process exited, returns the freed slots
    fn reclaim(&mut self) -> Result<Vec<SlotId>, PoolError> {
        if self.running.is_empty() {
            return Ok(Vec::new());
        }

        loop {
            let mut finished = Vec::new();

            for (slot, handle) in self.running.iter_mut() {
                match handle.try_wait() {
                    Ok(Some(status)) => finished.push((slot.clone(), status)),
                    Ok(None) => {}
                    Err(source) => {
                        return Err(PoolError::Wait {
                            slot: slot.clone(),
                            source,
                        })
                    }
                }
            }

            if finished.is_empty() {
                // bounded wait on one child instead of a plain sleep, returns early if it exits
                if let Some((slot, handle)) = self.running.iter_mut().next() {
                    match handle.wait_for(self.poll_interval) {
                        Ok(Some(status)) => finished.push((slot.clone(), status)),
                        Ok(None) => {}
                        Err(source) => {
                            return Err(PoolError::Wait {
                                slot: slot.clone(),
                                source,
                            })
                        }
                    }
                }
            }

            if finished.is_empty() {
                continue;
            }

            return Ok(finished
                .into_iter()
                .map(|(slot, status)| {
                    self.running.remove(&slot);

                    if status.success() {
                        debug!(slot = %slot, "Process finished");
                    } else {
                        self.report.failed += 1;
                        warn!(slot = %slot, status = %status, "Process exited unsuccessfully");
                    }

                    self.idle.push_back(slot.clone());
                    slot
                })
                .collect());
        }
    }
}

#[cfg(test)]
mod pool_test;
