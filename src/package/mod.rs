//! Package model and builder.
//!
//! A package is an ordered file tree, one machine configuration, and an
//! optional icon. Packages come from three kinds of sources — a remote
//! URL, a local archive file, or a project directory — and all three end
//! up in the same [`Builder`], which supports configuration merging and
//! icon/file injection before it is finalized into an immutable
//! [`Package`] for the disk assembler.

pub mod project;
pub mod source;

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::config::MachineConfig;

/// Name of the configuration entry inside a package archive.
pub const ARCHIVE_CONFIG_NAME: &str = "machine.toml";
/// Name of the icon entry inside a package archive.
pub const ARCHIVE_ICON_NAME: &str = "icon.png";
/// Directory prefix of the file tree inside a package archive.
pub const ARCHIVE_TREE_PREFIX: &str = "fs";

/// Where a file's bytes come from when the image is written.
#[derive(Debug, Clone)]
pub enum FileSource {
    Bytes(Vec<u8>),
    Host(PathBuf),
}

impl FileSource {
    pub fn len(&self) -> Result<u64> {
        match self {
            FileSource::Bytes(bytes) => Ok(bytes.len() as u64),
            FileSource::Host(path) => Ok(std::fs::metadata(path)
                .with_context(|| format!("reading metadata of '{}'", path.display()))?
                .len()),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn open(&self) -> Result<Box<dyn Read + '_>> {
        match self {
            FileSource::Bytes(bytes) => Ok(Box::new(bytes.as_slice())),
            FileSource::Host(path) => {
                let file = std::fs::File::open(path)
                    .with_context(|| format!("opening '{}'", path.display()))?;
                Ok(Box::new(file))
            }
        }
    }
}

/// One object in a package tree.
#[derive(Debug, Clone)]
pub enum Entry {
    Directory,
    File(FileSource),
    Symlink(String),
}

/// An ordered file tree. Keys are slash-separated paths relative to the
/// tree root, never empty and never absolute; the root directory itself is
/// implicit.
#[derive(Debug, Clone, Default)]
pub struct FileTree {
    entries: BTreeMap<String, Entry>,
}

impl FileTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(path: &str) -> Result<String> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            bail!("empty path");
        }
        for component in trimmed.split('/') {
            if component.is_empty() || component == "." || component == ".." {
                bail!("invalid path '{path}': bad component '{component}'");
            }
        }
        Ok(trimmed.to_string())
    }

    fn insert(&mut self, path: &str, entry: Entry) -> Result<()> {
        let key = Self::normalize(path)?;
        // Implicit parent directories.
        let mut at = 0usize;
        while let Some(next) = key[at..].find('/') {
            let parent = &key[..at + next];
            match self.entries.get(parent) {
                None => {
                    self.entries.insert(parent.to_string(), Entry::Directory);
                }
                Some(Entry::Directory) => {}
                Some(_) => bail!("'{parent}' is not a directory"),
            }
            at += next + 1;
        }
        if let Some(Entry::Directory) = self.entries.get(&key) {
            if !matches!(entry, Entry::Directory) {
                bail!("'{key}' already exists as a directory");
            }
        }
        self.entries.insert(key, entry);
        Ok(())
    }

    pub fn insert_dir(&mut self, path: &str) -> Result<()> {
        self.insert(path, Entry::Directory)
    }

    pub fn insert_file(&mut self, path: &str, source: FileSource) -> Result<()> {
        self.insert(path, Entry::File(source))
    }

    pub fn insert_symlink(&mut self, path: &str, target: &str) -> Result<()> {
        self.insert(path, Entry::Symlink(target.to_string()))
    }

    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Direct children of a directory, in name order. Pass "" for the
    /// tree root.
    pub fn children<'a>(&'a self, dir: &str) -> Vec<(&'a str, &'a Entry)> {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };
        self.entries
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| !key[prefix.len()..].contains('/'))
            .map(|(key, entry)| (&key[prefix.len()..], entry))
            .collect()
    }

    /// Capture a host directory tree, preserving symlinks.
    pub fn from_dir(root: &Path) -> Result<Self> {
        let mut tree = FileTree::new();
        for result in walkdir::WalkDir::new(root).min_depth(1).follow_links(false) {
            let entry = result
                .with_context(|| format!("walking directory '{}'", root.display()))?;
            let relative = entry
                .path()
                .strip_prefix(root)
                .expect("walkdir yields paths under its root");
            let Some(relative) = relative.to_str() else {
                bail!("non-UTF-8 path '{}'", entry.path().display());
            };
            let file_type = entry.file_type();
            if file_type.is_symlink() {
                let target = std::fs::read_link(entry.path())
                    .with_context(|| format!("reading symlink '{}'", entry.path().display()))?;
                let Some(target) = target.to_str() else {
                    bail!("non-UTF-8 symlink target in '{}'", entry.path().display());
                };
                tree.insert_symlink(relative, target)?;
            } else if file_type.is_dir() {
                tree.insert_dir(relative)?;
            } else {
                tree.insert_file(relative, FileSource::Host(entry.path().to_path_buf()))?;
            }
        }
        Ok(tree)
    }
}

/// A finalized package, ready for the disk assembler. Immutable.
#[derive(Debug, Clone)]
pub struct Package {
    tree: FileTree,
    config: MachineConfig,
    icon: Option<Vec<u8>>,
}

impl Package {
    pub fn tree(&self) -> &FileTree {
        &self.tree
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn icon(&self) -> Option<&[u8]> {
        self.icon.as_deref()
    }

    /// Write the package as a gzip-compressed tar archive.
    pub fn write_archive<W: Write>(&self, w: W) -> Result<()> {
        let gz = GzEncoder::new(w, Compression::default());
        let mut archive = tar::Builder::new(gz);

        let config_text = self.config.to_toml()?;
        append_bytes(&mut archive, ARCHIVE_CONFIG_NAME, config_text.as_bytes(), 0o644)?;
        if let Some(icon) = &self.icon {
            append_bytes(&mut archive, ARCHIVE_ICON_NAME, icon, 0o644)?;
        }

        for (path, entry) in self.tree.iter() {
            let name = format!("{ARCHIVE_TREE_PREFIX}/{path}");
            match entry {
                Entry::Directory => {
                    let mut header = tar::Header::new_gnu();
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_size(0);
                    header.set_mode(0o755);
                    header.set_cksum();
                    archive.append_data(&mut header, &name, std::io::empty())?;
                }
                Entry::File(source) => {
                    let mut header = tar::Header::new_gnu();
                    header.set_entry_type(tar::EntryType::Regular);
                    header.set_size(source.len()?);
                    header.set_mode(0o644);
                    header.set_cksum();
                    archive.append_data(&mut header, &name, source.open()?)?;
                }
                Entry::Symlink(target) => {
                    let mut header = tar::Header::new_gnu();
                    header.set_entry_type(tar::EntryType::Symlink);
                    header.set_size(0);
                    header.set_mode(0o777);
                    header.set_cksum();
                    archive.append_link(&mut header, &name, target)?;
                }
            }
        }

        archive
            .into_inner()
            .context("finishing package archive")?
            .finish()
            .context("finishing package compression")?;
        Ok(())
    }
}

fn append_bytes<W: Write>(
    archive: &mut tar::Builder<W>,
    name: &str,
    data: &[u8],
    mode: u32,
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    header.set_cksum();
    archive
        .append_data(&mut header, name, data)
        .with_context(|| format!("writing archive entry '{name}'"))?;
    Ok(())
}

/// Incrementally assembles a package.
#[derive(Debug, Default)]
pub struct Builder {
    tree: FileTree,
    config: MachineConfig,
    icon: Option<Vec<u8>>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a package from a gzip-compressed tar archive stream.
    pub fn from_archive<R: Read>(r: R) -> Result<Self> {
        let mut builder = Builder::new();
        let mut archive = tar::Archive::new(GzDecoder::new(r));
        let mut saw_config = false;
        let tree_prefix = format!("{ARCHIVE_TREE_PREFIX}/");

        for result in archive.entries().context("reading package archive")? {
            let mut entry = result.context("reading package archive entry")?;
            let path = entry.path().context("reading package archive entry path")?;
            let Some(name) = path.to_str().map(str::to_string) else {
                bail!("non-UTF-8 entry name in package archive");
            };
            let name = name.trim_end_matches('/').to_string();

            if name == ARCHIVE_CONFIG_NAME {
                let mut text = String::new();
                entry.read_to_string(&mut text)?;
                builder.config = MachineConfig::from_toml(&text)?;
                saw_config = true;
            } else if name == ARCHIVE_ICON_NAME {
                let mut bytes = Vec::new();
                entry.read_to_end(&mut bytes)?;
                builder.icon = Some(bytes);
            } else if let Some(relative) = name.strip_prefix(&tree_prefix) {
                if relative.is_empty() {
                    continue;
                }
                match entry.header().entry_type() {
                    tar::EntryType::Directory => builder.tree.insert_dir(relative)?,
                    tar::EntryType::Symlink => {
                        let target = entry
                            .link_name()?
                            .and_then(|t| t.to_str().map(str::to_string))
                            .ok_or_else(|| {
                                anyhow::anyhow!("symlink entry '{relative}' has no target")
                            })?;
                        builder.tree.insert_symlink(relative, &target)?;
                    }
                    tar::EntryType::Regular => {
                        let mut bytes = Vec::with_capacity(entry.size() as usize);
                        entry.read_to_end(&mut bytes)?;
                        builder.tree.insert_file(relative, FileSource::Bytes(bytes))?;
                    }
                    other => bail!(
                        "unsupported entry type {other:?} for '{relative}' in package archive"
                    ),
                }
            }
        }

        if !saw_config {
            bail!("package archive has no '{ARCHIVE_CONFIG_NAME}' entry");
        }
        Ok(builder)
    }

    /// Build directly over an existing tree.
    pub fn from_tree(tree: FileTree) -> Self {
        Builder {
            tree,
            ..Default::default()
        }
    }

    pub fn tree_mut(&mut self) -> &mut FileTree {
        &mut self.tree
    }

    /// Replace the package icon.
    pub fn set_icon(&mut self, icon: Vec<u8>) {
        self.icon = Some(icon);
    }

    /// Merge a configuration fragment. Later calls win per field, so file
    /// fragments go first, in order, and explicit overrides go last.
    pub fn merge_config(&mut self, fragment: MachineConfig) {
        self.config.merge(fragment);
    }

    /// Copy a host file into the package tree.
    pub fn inject_file(&mut self, host: &Path, dest: &str) -> Result<()> {
        if !host.is_file() {
            bail!("injection source '{}' is not a file", host.display());
        }
        self.tree
            .insert_file(dest, FileSource::Host(host.to_path_buf()))
    }

    /// Validate and freeze into a read-only package.
    pub fn finish(self) -> Result<Package> {
        self.config.validate().context("validating configuration")?;
        Ok(Package {
            tree: self.tree,
            config: self.config,
            icon: self.icon,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_creates_implicit_parents() {
        let mut tree = FileTree::new();
        tree.insert_file("etc/app/config", FileSource::Bytes(vec![1]))
            .unwrap();
        assert!(matches!(tree.get("etc"), Some(Entry::Directory)));
        assert!(matches!(tree.get("etc/app"), Some(Entry::Directory)));
        assert!(matches!(tree.get("etc/app/config"), Some(Entry::File(_))));
    }

    #[test]
    fn tree_rejects_conflicts_and_bad_components() {
        let mut tree = FileTree::new();
        tree.insert_file("etc", FileSource::Bytes(vec![])).unwrap();
        assert!(tree.insert_file("etc/passwd", FileSource::Bytes(vec![])).is_err());
        assert!(tree.insert_dir("a/../b").is_err());
        assert!(tree.insert_dir("").is_err());
    }

    #[test]
    fn children_lists_only_direct_descendants() {
        let mut tree = FileTree::new();
        tree.insert_file("bin/app", FileSource::Bytes(vec![])).unwrap();
        tree.insert_file("bin/sub/tool", FileSource::Bytes(vec![])).unwrap();
        tree.insert_file("etc.conf", FileSource::Bytes(vec![])).unwrap();

        let root: Vec<&str> = tree.children("").iter().map(|(n, _)| *n).collect();
        assert_eq!(root, vec!["bin", "etc.conf"]);
        let bin: Vec<&str> = tree.children("bin").iter().map(|(n, _)| *n).collect();
        assert_eq!(bin, vec!["app", "sub"]);
    }

    #[test]
    fn archive_round_trip() {
        let mut builder = Builder::new();
        builder
            .tree_mut()
            .insert_file("bin/app", FileSource::Bytes(b"#!/bin/sh\n".to_vec()))
            .unwrap();
        builder.tree_mut().insert_symlink("bin/alias", "app").unwrap();
        builder.tree_mut().insert_dir("tmp").unwrap();
        builder.merge_config(
            MachineConfig::from_toml("[[program]]\nbinary = \"/bin/app\"\n").unwrap(),
        );
        builder.set_icon(vec![0x89, b'P', b'N', b'G']);
        let package = builder.finish().unwrap();

        let mut archive = Vec::new();
        package.write_archive(&mut archive).unwrap();

        let reloaded = Builder::from_archive(archive.as_slice())
            .unwrap()
            .finish()
            .unwrap();
        assert_eq!(reloaded.config().programs[0].binary.as_deref(), Some("/bin/app"));
        assert_eq!(reloaded.icon(), Some(&[0x89, b'P', b'N', b'G'][..]));
        assert!(matches!(reloaded.tree().get("bin/app"), Some(Entry::File(_))));
        match reloaded.tree().get("bin/alias") {
            Some(Entry::Symlink(target)) => assert_eq!(target, "app"),
            other => panic!("expected symlink, got {other:?}"),
        }
        assert!(matches!(reloaded.tree().get("tmp"), Some(Entry::Directory)));
    }

    #[test]
    fn archive_without_config_is_rejected() {
        let gz = GzEncoder::new(Vec::new(), Compression::default());
        let mut archive = tar::Builder::new(gz);
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(2);
        header.set_cksum();
        archive.append_data(&mut header, "fs/hello", &b"hi"[..]).unwrap();
        let bytes = archive.into_inner().unwrap().finish().unwrap();

        assert!(Builder::from_archive(bytes.as_slice()).is_err());
    }
}
