use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs, io,
    net::{Ipv4Addr, Ipv6Addr},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, warn};

pub const CONFIG_FILE_NAME: &str = "conf.distxargs.yaml";
pub const SAMPLE_CONFIG_FILE_NAME: &str = "conf.distxargs.yaml.sample";

pub const SAMPLE_CONFIG: &str = r#"default:
  user_name: "alibaba"

hosts:
- host_name: "localhost"
  max_processes: 4
- host_name: "flyingcarpet"
  max_processes: 4
"#;

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("no configuration file found at {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("failed to read configuration file: {0}")]
    Read(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("hosts[{index}].host_name must be a non-empty string")]
    EmptyHostName { index: usize },
    #[error("host {host} has no user_name and no default user_name is configured")]
    MissingUserName { host: String },
    #[error("host {host} has no max_processes and no default max_processes is configured")]
    MissingMaxProcesses { host: String },
    #[error("host {host}: max_processes must be at least 1, got {value}")]
    InvalidMaxProcesses { host: String, value: i64 },
    #[error("no hosts are left to run on")]
    NoHosts,
}

/// Raw configuration document as read from disk
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct DistConfig {
    // values every host falls back to
    #[serde(default)]
    pub default: Option<DefaultConfig>,
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct DefaultConfig {
    pub user_name: Option<String>,
    pub max_processes: Option<i64>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct HostEntry {
    pub host_name: String,
    pub user_name: Option<String>,
    pub max_processes: Option<i64>,
}

/// Validated execution parameters of a single host
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostConfig {
    pub host_name: String,
    pub user_name: String,
    pub max_processes: usize,
}

/// Hosts keyed by name, iterated in sorted order
#[derive(Clone, Debug, Default)]
pub struct HostRegistry {
    hosts: BTreeMap<String, HostConfig>,
}

impl DistConfig {
    pub fn parse(input: &str) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_str(input)?)
    }
}

impl HostRegistry {
    /// read and validate the configuration file at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        debug!(path = ?path, "Loading host configuration");

        let content = fs::read_to_string(path)?;
        Self::from_config(DistConfig::parse(&content)?)
    }

    /// resolve per-host overrides against the default block
    pub fn from_config(config: DistConfig) -> Result<Self, ConfigErrors> {
        let defaults = config.default.unwrap_or_default();
        let mut hosts = BTreeMap::new();

        for (index, entry) in config.hosts.into_iter().enumerate() {
            if entry.host_name.is_empty() {
                return Err(ConfigErrors::EmptyHostName { index });
            }

            let user_name = match entry.user_name.or_else(|| defaults.user_name.clone()) {
                Some(user_name) if !user_name.is_empty() => user_name,
                _ => {
                    return Err(ConfigErrors::MissingUserName {
                        host: entry.host_name,
                    })
                }
            };

            let max_processes = match entry.max_processes.or(defaults.max_processes) {
                Some(value) if value >= 1 => value as usize,
                Some(value) => {
                    return Err(ConfigErrors::InvalidMaxProcesses {
                        host: entry.host_name,
                        value,
                    })
                }
                None => {
                    return Err(ConfigErrors::MissingMaxProcesses {
                        host: entry.host_name,
                    })
                }
            };

            let host = HostConfig {
                host_name: entry.host_name,
                user_name,
                max_processes,
            };

            if let Some(previous) = hosts.insert(host.host_name.clone(), host) {
                warn!(
                    host = previous.host_name,
                    "Host is listed more than once, the last entry wins"
                );
            }
        }

        Ok(Self { hosts })
    }

    /// keep only the hosts whose name satisfies `predicate`
    pub fn filter<P>(self, predicate: P) -> Self
    where
        P: Fn(&str) -> bool,
    {
        Self {
            hosts: self
                .hosts
                .into_iter()
                .filter(|(name, _)| predicate(name))
                .collect(),
        }
    }

    pub fn local_only(self) -> Self {
        self.filter(is_localhost)
    }

    pub fn get(&self, host_name: &str) -> Option<&HostConfig> {
        self.hosts.get(host_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostConfig> {
        self.hosts.values()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// number of slots a pool over these hosts provides
    pub fn total_slots(&self) -> usize {
        self.hosts.values().map(|host| host.max_processes).sum()
    }
}

/// check if a host name addresses the local machine via loopback
pub fn is_localhost(host_name: &str) -> bool {
    if host_name == "localhost" {
        return true;
    }

    // parsing accepts every notation of ::1 (compressed, zero-suppressed, expanded)
    if let Ok(address) = host_name.parse::<Ipv6Addr>() {
        return address == Ipv6Addr::LOCALHOST;
    }

    host_name
        .parse::<Ipv4Addr>()
        .map(|address| address == Ipv4Addr::LOCALHOST)
        .unwrap_or(false)
}

/// find the configuration file, `config` may point to a file or a directory
pub fn resolve_config_path(config: Option<&Path>) -> Result<PathBuf, ConfigErrors> {
    let path = match config {
        None => PathBuf::from(".").join(CONFIG_FILE_NAME),
        Some(dir) if dir.is_dir() => {
            let candidates = [
                dir.join(CONFIG_FILE_NAME),
                dir.join(".config").join("distxargs").join(CONFIG_FILE_NAME),
            ];

            match candidates.iter().find(|candidate| candidate.is_file()) {
                Some(found) => found.clone(),
                None => dir.to_path_buf(),
            }
        }
        Some(file) => file.to_path_buf(),
    };

    if path.is_file() {
        Ok(path)
    } else {
        Err(ConfigErrors::FileNotFound(path))
    }
}

/// write the sample configuration into `dir`, returns the written path
pub fn write_sample_config(dir: &Path) -> Result<PathBuf, ConfigErrors> {
    let path = dir.join(SAMPLE_CONFIG_FILE_NAME);
    fs::write(&path, SAMPLE_CONFIG)?;

    Ok(path)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
