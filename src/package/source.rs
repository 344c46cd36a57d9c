//! Package source resolution.
//!
//! A package source string is classified in a strict order: URL parsing
//! first, filesystem checks second. The order matters — a malformed local
//! path can parse as a relative URL, so only a well-formed absolute URL
//! (scheme, host and path all present) is treated as one; everything else
//! falls through to stat-based classification.

use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::{project, Builder};
use crate::error::BuildError;

/// What a source string turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Url,
    File,
    Directory,
    Invalid,
}

/// Ordered classification of a package source string.
pub fn classify(source: &str) -> SourceType {
    if let Ok(url) = url::Url::parse(source) {
        if !url.scheme().is_empty() && url.has_host() && !url.path().is_empty() {
            return SourceType::Url;
        }
    }
    match std::fs::metadata(source) {
        Ok(meta) if !meta.is_dir() => SourceType::File,
        Ok(_) => SourceType::Directory,
        Err(_) => SourceType::Invalid,
    }
}

/// Cooperative cancellation handle for long-running operations.
#[derive(Debug, Clone, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A read proxy that reports progress keyed off the expected length and
/// honours cancellation between reads.
pub struct ProgressReader<R> {
    inner: R,
    label: &'static str,
    total: Option<u64>,
    read: u64,
    last_reported: u64,
    cancel: Cancel,
}

impl<R: Read> ProgressReader<R> {
    pub fn new(inner: R, label: &'static str, total: Option<u64>, cancel: Cancel) -> Self {
        ProgressReader {
            inner,
            label,
            total,
            read: 0,
            last_reported: 0,
            cancel,
        }
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                format!("{} cancelled", self.label),
            ));
        }
        let n = self.inner.read(buf)?;
        self.read += n as u64;
        match self.total {
            // Report at 10% steps when the length is known.
            Some(total) if total > 0 => {
                let percent = self.read * 100 / total;
                if percent >= self.last_reported + 10 {
                    self.last_reported = percent - percent % 10;
                    info!("{}: {percent}% ({} / {total} bytes)", self.label, self.read);
                }
            }
            // Otherwise once per 8 MiB.
            _ => {
                if self.read >= self.last_reported + (8 << 20) {
                    self.last_reported = self.read;
                    info!("{}: {} bytes", self.label, self.read);
                }
            }
        }
        Ok(n)
    }
}

/// Resolve a source string into a package builder. `argument` names the
/// offending CLI argument in resolution errors.
pub fn builder_from_source(argument: &str, source: &str, cancel: &Cancel) -> Result<Builder> {
    match classify(source) {
        SourceType::Url => builder_from_url(source, cancel),
        SourceType::File => {
            debug!("loading package archive '{source}'");
            let file = std::fs::File::open(source)
                .with_context(|| format!("opening package '{source}'"))?;
            Builder::from_archive(file)
                .with_context(|| format!("reading package '{source}'"))
        }
        SourceType::Directory => {
            let root = Path::new(source);
            if !root.join(project::PROJECT_FILE).is_file() {
                return Err(BuildError::SourceResolution {
                    argument: argument.to_string(),
                    value: source.to_string(),
                }
                .into());
            }
            project::Project::load(root)?.builder(None)
        }
        SourceType::Invalid => {
            // A trailing ":target" selects a build target inside a
            // project directory.
            let (path, target) = project::split_source(source);
            if path != source && Path::new(path).is_dir() {
                return project::Project::load(Path::new(path))?.builder(target);
            }
            Err(BuildError::SourceResolution {
                argument: argument.to_string(),
                value: source.to_string(),
            }
            .into())
        }
    }
}

fn builder_from_url(source: &str, cancel: &Cancel) -> Result<Builder> {
    info!("downloading package '{source}'");
    let response = reqwest::blocking::get(source)
        .with_context(|| format!("requesting '{source}'"))?
        .error_for_status()
        .with_context(|| format!("requesting '{source}'"))?;
    let total = response.content_length();
    let reader = ProgressReader::new(response, "downloading package", total, cancel.clone());
    Builder::from_archive(reader).with_context(|| format!("reading package from '{source}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_urls_win_over_filesystem() {
        assert_eq!(classify("https://example.com/pkg.tar.gz"), SourceType::Url);
        assert_eq!(classify("http://host/pkg"), SourceType::Url);
    }

    #[test]
    fn relative_uris_fall_through_to_filesystem() {
        // These parse as URIs but have no scheme+host, so they are paths.
        assert_eq!(classify("./pkg"), SourceType::Invalid);
        assert_eq!(classify("pkg.tar.gz"), SourceType::Invalid);
        // A scheme without a host is not a URL either.
        assert_eq!(classify("file:///tmp/x"), SourceType::Invalid);
    }

    #[test]
    fn files_and_directories_classify_by_stat() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("pkg.tar.gz");
        std::fs::write(&file, b"x").unwrap();
        assert_eq!(classify(file.to_str().unwrap()), SourceType::File);
        assert_eq!(classify(dir.path().to_str().unwrap()), SourceType::Directory);
        assert_eq!(
            classify(dir.path().join("missing").to_str().unwrap()),
            SourceType::Invalid
        );
    }

    #[test]
    fn invalid_source_error_names_the_argument() {
        let err = builder_from_source("SOURCE", "no/such/thing", &Cancel::new()).unwrap_err();
        match err.downcast_ref::<BuildError>() {
            Some(BuildError::SourceResolution { argument, value }) => {
                assert_eq!(argument, "SOURCE");
                assert_eq!(value, "no/such/thing");
            }
            other => panic!("unexpected error kind: {other:?}"),
        }
    }

    #[test]
    fn progress_reader_passes_data_through() {
        let data = vec![9u8; 4096];
        let mut reader =
            ProgressReader::new(data.as_slice(), "test", Some(4096), Cancel::new());
        let mut out = Vec::new();
        std::io::copy(&mut reader, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn cancellation_interrupts_the_stream() {
        let cancel = Cancel::new();
        let data = vec![0u8; 1024];
        let mut reader = ProgressReader::new(data.as_slice(), "test", None, cancel.clone());
        cancel.cancel();
        let mut out = Vec::new();
        let err = std::io::copy(&mut reader, &mut out).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Interrupted);
        assert!(out.is_empty());

        // Cancellation mid-stream leaves no partial destination behind
        // when the destination is a scoped temporary file.
        let dir = tempfile::TempDir::new().unwrap();
        let tmp = tempfile::NamedTempFile::new_in(dir.path()).unwrap();
        let mut reader = ProgressReader::new(data.as_slice(), "test", None, cancel);
        let copy = std::io::copy(&mut reader, &mut tmp.as_file().try_clone().unwrap());
        assert!(copy.is_err());
        drop(tmp);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
