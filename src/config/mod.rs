//! Machine configuration model.
//!
//! A configuration describes what runs inside the built image: program
//! entries, VM resource settings, filesystem options, and network
//! interfaces. Configurations are TOML on disk. Multiple fragments may be
//! merged; the merge is a deep override where the later fragment wins per
//! field, applied in a defined order — file-sourced fragments first, in the
//! order given, then explicit override values last.

pub mod signals;

pub use signals::TerminateSignal;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// The filesystem this builder knows how to lay out.
pub const SUPPORTED_FILESYSTEM: &str = "ext2";

/// A byte quantity. Accepts plain integers or strings with a binary
/// suffix: "64 MiB", "512k", "2g".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Size(pub u64);

impl Size {
    pub fn bytes(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Size {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let (digits, suffix) = s.split_at(split);
        if digits.is_empty() {
            bail!("invalid size '{s}': expected a number with an optional K/M/G suffix");
        }
        let value: u64 = digits
            .parse()
            .with_context(|| format!("invalid size '{s}'"))?;
        let multiplier: u64 = match suffix.trim().to_ascii_lowercase().as_str() {
            "" | "b" => 1,
            "k" | "kb" | "kib" => 1 << 10,
            "m" | "mb" | "mib" => 1 << 20,
            "g" | "gb" | "gib" => 1 << 30,
            other => bail!("invalid size '{s}': unknown suffix '{other}'"),
        };
        Ok(Size(value * multiplier))
    }
}

impl<'de> Deserialize<'de> for Size {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Size, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Str(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Ok(Size(n)),
            Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// One program entry: the binary the guest init launches, with its
/// arguments, environment, and termination behaviour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Program {
    pub binary: Option<String>,
    pub args: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    pub cwd: Option<String>,
    pub terminate: Option<TerminateSignal>,
}

impl Program {
    fn override_with(&mut self, other: Program) {
        if other.binary.is_some() {
            self.binary = other.binary;
        }
        if other.args.is_some() {
            self.args = other.args;
        }
        if !other.env.is_empty() {
            self.env = other.env;
        }
        if other.cwd.is_some() {
            self.cwd = other.cwd;
        }
        if other.terminate.is_some() {
            self.terminate = other.terminate;
        }
    }
}

/// VM resource settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VmSettings {
    pub cpus: Option<u32>,
    pub ram: Option<Size>,
    #[serde(rename = "disk-size")]
    pub disk_size: Option<Size>,
    pub inodes: Option<u32>,
    pub kernel: Option<String>,
}

impl VmSettings {
    fn override_with(&mut self, other: VmSettings) {
        if other.cpus.is_some() {
            self.cpus = other.cpus;
        }
        if other.ram.is_some() {
            self.ram = other.ram;
        }
        if other.disk_size.is_some() {
            self.disk_size = other.disk_size;
        }
        if other.inodes.is_some() {
            self.inodes = other.inodes;
        }
        if other.kernel.is_some() {
            self.kernel = other.kernel;
        }
    }
}

/// System-wide guest settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemSettings {
    pub filesystem: Option<String>,
    #[serde(rename = "kernel-args")]
    pub kernel_args: Option<String>,
    #[serde(rename = "max-fds")]
    pub max_fds: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sysctl: BTreeMap<String, String>,
}

impl SystemSettings {
    fn override_with(&mut self, other: SystemSettings) {
        if other.filesystem.is_some() {
            self.filesystem = other.filesystem;
        }
        if other.kernel_args.is_some() {
            self.kernel_args = other.kernel_args;
        }
        if other.max_fds.is_some() {
            self.max_fds = other.max_fds;
        }
        for (key, value) in other.sysctl {
            self.sysctl.insert(key, value);
        }
    }
}

/// One virtual network interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkInterface {
    pub ip: Option<String>,
    pub mask: Option<String>,
    pub gateway: Option<String>,
    pub mtu: Option<u32>,
}

impl NetworkInterface {
    fn override_with(&mut self, other: NetworkInterface) {
        if other.ip.is_some() {
            self.ip = other.ip;
        }
        if other.mask.is_some() {
            self.mask = other.mask;
        }
        if other.gateway.is_some() {
            self.gateway = other.gateway;
        }
        if other.mtu.is_some() {
            self.mtu = other.mtu;
        }
    }
}

/// Descriptive metadata carried through to archive-style output formats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InfoSettings {
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub url: Option<String>,
}

impl InfoSettings {
    fn override_with(&mut self, other: InfoSettings) {
        if other.name.is_some() {
            self.name = other.name;
        }
        if other.description.is_some() {
            self.description = other.description;
        }
        if other.version.is_some() {
            self.version = other.version;
        }
        if other.url.is_some() {
            self.url = other.url;
        }
    }
}

/// A validated machine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineConfig {
    #[serde(default)]
    pub info: InfoSettings,
    #[serde(default, rename = "program", skip_serializing_if = "Vec::is_empty")]
    pub programs: Vec<Program>,
    #[serde(default)]
    pub vm: VmSettings,
    #[serde(default)]
    pub system: SystemSettings,
    #[serde(default, rename = "network", skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkInterface>,
}

impl MachineConfig {
    /// Parse a configuration fragment from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("parsing machine configuration")
    }

    /// Load a configuration fragment from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration '{}'", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("parsing configuration '{}'", path.display()))
    }

    /// Serialize to TOML text.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).context("serializing machine configuration")
    }

    /// Deep override with a later fragment. Scalar fields: a set value in
    /// `other` wins. List fields merge slot by slot with extra entries
    /// appended; map fields merge per key.
    pub fn merge(&mut self, other: MachineConfig) {
        self.info.override_with(other.info);
        self.vm.override_with(other.vm);
        self.system.override_with(other.system);

        for (index, program) in other.programs.into_iter().enumerate() {
            match self.programs.get_mut(index) {
                Some(existing) => existing.override_with(program),
                None => self.programs.push(program),
            }
        }
        for (index, network) in other.networks.into_iter().enumerate() {
            match self.networks.get_mut(index) {
                Some(existing) => existing.override_with(network),
                None => self.networks.push(network),
            }
        }
    }

    /// Check the closed-set and range constraints before the configuration
    /// is used by the builder.
    pub fn validate(&self) -> Result<()> {
        if let Some(fs) = &self.system.filesystem {
            if fs != SUPPORTED_FILESYSTEM {
                bail!(
                    "unsupported filesystem '{fs}'; expected '{SUPPORTED_FILESYSTEM}'"
                );
            }
        }
        if let Some(cpus) = self.vm.cpus {
            if cpus == 0 {
                bail!("vm.cpus must be at least 1");
            }
        }
        for (index, program) in self.programs.iter().enumerate() {
            if program.binary.as_deref().unwrap_or("").is_empty() {
                bail!("program {index} has no binary");
            }
        }
        Ok(())
    }

    /// Effective termination signal for a program entry.
    pub fn terminate_signal(&self, program: usize) -> TerminateSignal {
        self.programs
            .get(program)
            .and_then(|p| p.terminate)
            .unwrap_or_default()
    }
}
