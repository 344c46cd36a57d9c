//! Kernel selection.
//!
//! Kernels are versioned binaries in a per-user cache directory, one file
//! per version, with a `-shell` variant that carries an interactive shell
//! for debugging guests. Selection is by explicit version or latest
//! available; a missing version is fetched from the kernel repository.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::MachineConfig;
use crate::package::source::{Cancel, ProgressReader};

/// Environment override for the kernel cache directory.
pub const CACHE_DIR_ENV: &str = "APPLIANCE_KERNEL_DIR";
/// Environment override for the kernel repository base URL.
pub const REPOSITORY_ENV: &str = "APPLIANCE_KERNEL_REPOSITORY";
/// Default kernel repository.
pub const DEFAULT_REPOSITORY: &str = "https://downloads.appliance-build.io/kernels";

/// Kernel selection options for one build invocation.
#[derive(Debug, Clone, Default)]
pub struct KernelOptions {
    /// Kernel version; the configuration's `vm.kernel` is the fallback,
    /// then the newest cached version.
    pub version: Option<String>,
    /// Use the interactive-shell kernel variant.
    pub shell: bool,
    /// Explicit kernel binary, bypassing cache and repository.
    pub path: Option<PathBuf>,
}

/// Cache directory for downloaded kernels.
pub fn cache_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let base = dirs::cache_dir().context("no cache directory on this host")?;
    Ok(base.join("appliance-builder").join("kernels"))
}

fn file_name(version: &str, shell: bool) -> String {
    if shell {
        format!("kernel-{version}-shell")
    } else {
        format!("kernel-{version}")
    }
}

/// Resolve the kernel binary for a build.
pub fn locate(opts: &KernelOptions, config: &MachineConfig) -> Result<PathBuf> {
    if let Some(path) = &opts.path {
        if !path.is_file() {
            bail!("kernel '{}' does not exist", path.display());
        }
        return Ok(path.clone());
    }

    let dir = cache_dir()?;
    let version = opts
        .version
        .clone()
        .or_else(|| config.vm.kernel.clone());

    match version {
        Some(version) => {
            let path = dir.join(file_name(&version, opts.shell));
            if path.is_file() {
                return Ok(path);
            }
            fetch(&version, opts.shell, &Cancel::new())
        }
        None => latest_cached(&dir, opts.shell),
    }
}

/// Newest cached kernel version for the requested variant.
fn latest_cached(dir: &Path, shell: bool) -> Result<PathBuf> {
    let mut versions: Vec<String> = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => bail!(
            "no kernels cached under '{}'; pass a kernel version to fetch one",
            dir.display()
        ),
    };
    for entry in entries {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let Some(rest) = name.strip_prefix("kernel-") else {
            continue;
        };
        let version = match (shell, rest.strip_suffix("-shell")) {
            (true, Some(version)) => version,
            (false, None) => rest,
            _ => continue,
        };
        versions.push(version.to_string());
    }
    versions.sort_by(|a, b| compare_versions(a, b));
    match versions.pop() {
        Some(version) => Ok(dir.join(file_name(&version, shell))),
        None => bail!(
            "no kernels cached under '{}'; pass a kernel version to fetch one",
            dir.display()
        ),
    }
}

/// Order dotted version strings numerically, segment by segment.
fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|seg| seg.chars().take_while(|c| c.is_ascii_digit()).collect::<String>())
            .map(|seg| seg.parse().unwrap_or(0))
            .collect()
    };
    parse(a).cmp(&parse(b))
}

/// Download a kernel into the cache. The download lands in a named
/// temporary file that only persists on success; a failed or cancelled
/// fetch leaves nothing behind.
pub fn fetch(version: &str, shell: bool, cancel: &Cancel) -> Result<PathBuf> {
    let dir = cache_dir()?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating kernel cache '{}'", dir.display()))?;

    let name = file_name(version, shell);
    let base = std::env::var(REPOSITORY_ENV).unwrap_or_else(|_| DEFAULT_REPOSITORY.to_string());
    let url = format!("{}/{name}", base.trim_end_matches('/'));

    info!("fetching kernel {version} from {url}");
    let response = reqwest::blocking::get(&url)
        .with_context(|| format!("requesting kernel '{url}'"))?
        .error_for_status()
        .with_context(|| format!("requesting kernel '{url}'"))?;
    let total = response.content_length();
    let mut reader = ProgressReader::new(response, "downloading kernel", total, cancel.clone());

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)
        .with_context(|| format!("creating temporary file in '{}'", dir.display()))?;
    std::io::copy(&mut reader, &mut tmp)
        .with_context(|| format!("downloading kernel '{url}'"))?;

    let path = dir.join(&name);
    tmp.persist(&path)
        .with_context(|| format!("placing kernel at '{}'", path.display()))?;
    Ok(path)
}

/// List cached kernel versions, newest first. The shell variant is
/// reported separately.
pub fn list_cached() -> Result<Vec<String>> {
    let dir = cache_dir()?;
    let mut names = Vec::new();
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Ok(names);
    };
    for entry in entries {
        let entry = entry?;
        if let Ok(name) = entry.file_name().into_string() {
            if name.starts_with("kernel-") {
                names.push(name);
            }
        }
    }
    names.sort();
    names.reverse();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins() {
        let dir = tempfile::TempDir::new().unwrap();
        let kernel = dir.path().join("bzImage");
        std::fs::write(&kernel, b"\x90\x90").unwrap();
        let opts = KernelOptions {
            path: Some(kernel.clone()),
            ..Default::default()
        };
        let found = locate(&opts, &MachineConfig::default()).unwrap();
        assert_eq!(found, kernel);
    }

    #[test]
    fn missing_explicit_path_fails() {
        let opts = KernelOptions {
            path: Some(PathBuf::from("/no/such/kernel")),
            ..Default::default()
        };
        assert!(locate(&opts, &MachineConfig::default()).is_err());
    }

    #[test]
    fn latest_cached_orders_numerically() {
        let dir = tempfile::TempDir::new().unwrap();
        for version in ["1.2.0", "1.10.0", "1.9.3"] {
            std::fs::write(dir.path().join(format!("kernel-{version}")), b"k").unwrap();
        }
        std::fs::write(dir.path().join("kernel-9.0.0-shell"), b"k").unwrap();

        let found = latest_cached(dir.path(), false).unwrap();
        assert_eq!(found, dir.path().join("kernel-1.10.0"));
        let found = latest_cached(dir.path(), true).unwrap();
        assert_eq!(found, dir.path().join("kernel-9.0.0-shell"));
    }

    #[test]
    fn empty_cache_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(latest_cached(dir.path(), false).is_err());
    }

    #[test]
    fn version_compare_is_numeric() {
        use std::cmp::Ordering;
        assert_eq!(compare_versions("1.10.0", "1.9.3"), Ordering::Greater);
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Less);
        assert_eq!(compare_versions("2.0.0", "2.0.0"), Ordering::Equal);
    }
}
