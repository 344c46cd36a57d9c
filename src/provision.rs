//! Provisioner contract.
//!
//! Cloud provisioning itself (upload, registration) is out of scope; the
//! build pipeline only needs to know which disk format and size alignment
//! each platform demands, plus validated platform settings. The platform
//! set is closed: a provisioner document is a JSON object whose tag names
//! one of the registered platforms, and construction goes through the
//! registry keyed by that tag.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::disk::Format;

/// Key of the platform tag inside a provisioner document.
pub const TAG_KEY: &str = "platform";

/// The closed set of provisioning platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Amazon,
    Azure,
    Google,
}

/// Registry of platform tags.
pub const REGISTRY: &[(&str, Platform)] = &[
    ("amazon-ec2", Platform::Amazon),
    ("azure", Platform::Azure),
    ("google-compute", Platform::Google),
];

impl Platform {
    pub fn tag(self) -> &'static str {
        match self {
            Platform::Amazon => "amazon-ec2",
            Platform::Azure => "azure",
            Platform::Google => "google-compute",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Platform> {
        for (candidate, platform) in REGISTRY {
            if *candidate == tag {
                return Ok(*platform);
            }
        }
        let known = REGISTRY
            .iter()
            .map(|(tag, _)| *tag)
            .collect::<Vec<_>>()
            .join(", ");
        bail!("unknown provisioner platform '{tag}'; expected one of: {known}")
    }

    /// Disk format the platform's import pipeline accepts.
    pub fn required_disk_format(self) -> Format {
        match self {
            Platform::Amazon => Format::Raw,
            Platform::Azure => Format::Vhd,
            Platform::Google => Format::Gcp,
        }
    }

    /// Raw disk size alignment the platform demands.
    pub fn required_size_alignment(self) -> u64 {
        match self {
            Platform::Amazon | Platform::Google => 1 << 30,
            Platform::Azure => 1 << 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AmazonSettings {
    pub key: String,
    pub secret: String,
    pub region: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AzureSettings {
    pub key: String,
    pub container: String,
    pub location: String,
    #[serde(rename = "resource-group")]
    pub resource_group: String,
    #[serde(rename = "storage-account-name")]
    pub storage_account_name: String,
    #[serde(rename = "storage-account-key")]
    pub storage_account_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleSettings {
    pub bucket: String,
    pub key: String,
}

/// A validated provisioner: the platform plus its settings.
#[derive(Debug, Clone)]
pub enum Provisioner {
    Amazon(AmazonSettings),
    Azure(AzureSettings),
    Google(GoogleSettings),
}

impl Provisioner {
    /// Construct from a JSON provisioner document, dispatching on the
    /// embedded tag through the registry.
    pub fn initialize(document: &str) -> Result<Provisioner> {
        let value: serde_json::Value =
            serde_json::from_str(document).context("parsing provisioner document")?;
        let tag = value
            .get(TAG_KEY)
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("provisioner document has no '{TAG_KEY}' tag"))?;

        let provisioner = match Platform::from_tag(tag)? {
            Platform::Amazon => Provisioner::Amazon(
                AmazonSettings::deserialize(&value).context("parsing amazon-ec2 settings")?,
            ),
            Platform::Azure => Provisioner::Azure(
                AzureSettings::deserialize(&value).context("parsing azure settings")?,
            ),
            Platform::Google => Provisioner::Google(
                GoogleSettings::deserialize(&value).context("parsing google-compute settings")?,
            ),
        };
        provisioner.validate()?;
        Ok(provisioner)
    }

    pub fn platform(&self) -> Platform {
        match self {
            Provisioner::Amazon(_) => Platform::Amazon,
            Provisioner::Azure(_) => Platform::Azure,
            Provisioner::Google(_) => Platform::Google,
        }
    }

    pub fn required_disk_format(&self) -> Format {
        self.platform().required_disk_format()
    }

    pub fn required_size_alignment(&self) -> u64 {
        self.platform().required_size_alignment()
    }

    fn validate(&self) -> Result<()> {
        let missing = |field: &str, platform: Platform| -> anyhow::Error {
            anyhow::anyhow!("{} provisioner is missing '{field}'", platform.tag())
        };
        match self {
            Provisioner::Amazon(s) => {
                if s.key.is_empty() {
                    return Err(missing("key", Platform::Amazon));
                }
                if s.secret.is_empty() {
                    return Err(missing("secret", Platform::Amazon));
                }
                if s.region.is_empty() {
                    return Err(missing("region", Platform::Amazon));
                }
            }
            Provisioner::Azure(s) => {
                if s.key.is_empty() {
                    return Err(missing("key", Platform::Azure));
                }
                if s.container.is_empty() {
                    return Err(missing("container", Platform::Azure));
                }
                if s.resource_group.is_empty() {
                    return Err(missing("resource-group", Platform::Azure));
                }
            }
            Provisioner::Google(s) => {
                if s.bucket.is_empty() {
                    return Err(missing("bucket", Platform::Google));
                }
                if s.key.is_empty() {
                    return Err(missing("key", Platform::Google));
                }
            }
        }
        Ok(())
    }
}
