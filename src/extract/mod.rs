//! Disk image extraction.
//!
//! Opens a built disk image read-only, resolves the root directory, and
//! reconstructs the file tree on the host. Symlinks are not created during
//! the walk: the walk records (link path, target) pairs and a second pass
//! applies them once the whole tree exists, so links whose targets sort
//! later in traversal order still resolve. Failures in that second pass
//! carry their own error kind, letting callers tell "extraction
//! incomplete" apart from "extraction done, links broken".

use anyhow::{Context, Result};
use std::fs;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::disk::assemble;
use crate::error::BuildError;
use crate::ext2::reader::Filesystem;

/// Options for one extraction run.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Only extract objects whose last-access time shows the image has
    /// read them; directories and the root are always kept.
    pub touched_only: bool,
    /// Replace an existing destination instead of failing.
    pub force: bool,
}

/// What an extraction did.
#[derive(Debug, Clone)]
pub struct ExtractReport {
    /// Objects visited, the root included.
    pub visited: u64,
    /// Symlinks applied in the deferred pass.
    pub symlinks: usize,
    /// Set when the touched filter was active and nothing beyond the
    /// root was visited: the image shows no evidence of having run.
    pub untouched_advisory: bool,
    /// Where the tree root landed.
    pub root: PathBuf,
}

/// A deferred symlink: created only after the full tree walk.
struct SymlinkJob {
    link: PathBuf,
    target: String,
}

/// Extract `image` to `dest`. If `dest` is an existing directory the tree
/// nests under a name derived from the image file; otherwise `dest`
/// itself becomes the tree root.
pub fn extract_image(image: &Path, dest: &Path, opts: &ExtractOptions) -> Result<ExtractReport> {
    let file = fs::File::open(image)
        .with_context(|| format!("opening disk image '{}'", image.display()))?;
    let (file, partition) = assemble::open_partition(file)
        .with_context(|| format!("reading disk image '{}'", image.display()))?;
    let mut fs = Filesystem::open(file, partition)
        .with_context(|| format!("parsing filesystem of '{}'", image.display()))?;

    let root = if dest.is_dir() {
        let stem = image
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image");
        dest.join(stem)
    } else {
        dest.to_path_buf()
    };
    prepare_destination(&root, opts.force)?;

    let root_ino = fs.resolve_path("/")?;
    let mut walker = Walker {
        fs: &mut fs,
        touched_only: opts.touched_only,
        visited: 0,
        symlinks: Vec::new(),
    };
    walker.walk(root_ino, "/", &root)?;

    let visited = walker.visited;
    let symlinks = walker.symlinks;
    for job in &symlinks {
        debug!(link = %job.link.display(), target = %job.target, "creating symlink");
        std::os::unix::fs::symlink(&job.target, &job.link).map_err(|e| {
            BuildError::SymlinkPhase {
                link: job.link.display().to_string(),
                target: job.target.clone(),
                detail: e.to_string(),
            }
        })?;
    }

    let untouched_advisory = opts.touched_only && visited <= 1;
    if untouched_advisory {
        warn!("no touched files detected; are you sure this disk has been run?");
    }

    Ok(ExtractReport {
        visited,
        symlinks: symlinks.len(),
        untouched_advisory,
        root,
    })
}

/// Destination rules: an empty directory is reusable, anything else needs
/// force. Force deletes the destination and recreates its parent chain.
fn prepare_destination(root: &Path, force: bool) -> Result<()> {
    if !root.exists() && !root.is_symlink() {
        return Ok(());
    }
    let reusable = root.is_dir() && dir_is_empty(root)?;
    if reusable {
        return Ok(());
    }
    if !force {
        return Err(BuildError::DestinationConflict {
            kind: "destination",
            path: root.display().to_string(),
        }
        .into());
    }
    if root.is_dir() {
        fs::remove_dir_all(root)
            .with_context(|| format!("removing existing destination '{}'", root.display()))?;
    } else {
        fs::remove_file(root)
            .with_context(|| format!("removing existing destination '{}'", root.display()))?;
    }
    if let Some(parent) = root.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating parent directory '{}'", parent.display()))?;
    }
    Ok(())
}

fn dir_is_empty(path: &Path) -> Result<bool> {
    let mut entries = fs::read_dir(path)
        .with_context(|| format!("reading directory '{}'", path.display()))?;
    Ok(entries.next().is_none())
}

fn ensure_not_exists(path: &Path) -> Result<()> {
    if path.exists() || path.is_symlink() {
        return Err(BuildError::DestinationConflict {
            kind: "file",
            path: path.display().to_string(),
        }
        .into());
    }
    Ok(())
}

struct Walker<'a, R> {
    fs: &'a mut Filesystem<R>,
    touched_only: bool,
    visited: u64,
    symlinks: Vec<SymlinkJob>,
}

impl<R: Read + Seek> Walker<'_, R> {
    fn walk(&mut self, ino: u32, rpath: &str, dest: &Path) -> Result<()> {
        let inode = self.fs.resolve_inode(ino)?;

        if self.touched_only && inode.atime == 0 && !inode.is_directory() && rpath != "/" {
            debug!("skipping untouched object: {rpath}");
            return Ok(());
        }

        self.visited += 1;
        debug!("copying {rpath}");

        if inode.is_regular() {
            ensure_not_exists(dest)?;
            let mut out = fs::File::create(dest)
                .with_context(|| format!("creating '{}'", dest.display()))?;
            self.fs
                .copy_data(&inode, &mut out)
                .with_context(|| format!("extracting '{rpath}'"))?;
            return Ok(());
        }

        if inode.is_symlink() {
            let target = self.fs.symlink_target(&inode)?;
            self.symlinks.push(SymlinkJob {
                link: dest.to_path_buf(),
                target,
            });
            return Ok(());
        }

        if !inode.is_directory() {
            warn!("skipping abnormal file: {rpath}");
            return Ok(());
        }

        // Directory. An existing empty directory (the prepared root) is
        // fine; anything else on the way is a conflict.
        if dest.exists() {
            if !dest.is_dir() || !dir_is_empty(dest)? {
                return Err(BuildError::DestinationConflict {
                    kind: "directory",
                    path: dest.display().to_string(),
                }
                .into());
            }
        } else {
            fs::create_dir_all(dest)
                .with_context(|| format!("creating directory '{}'", dest.display()))?;
        }

        for entry in self.fs.read_dir(&inode)? {
            if entry.name == "." || entry.name == ".." {
                continue;
            }
            let child_rpath = if rpath == "/" {
                format!("/{}", entry.name)
            } else {
                format!("{rpath}/{}", entry.name)
            };
            self.walk(entry.inode, &child_rpath, &dest.join(&entry.name))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MachineConfig, Size};
    use crate::package::{Builder, FileSource, Package};
    use std::io::{Seek, SeekFrom, Write};

    fn sample_package() -> Package {
        let mut builder = Builder::new();
        let tree = builder.tree_mut();
        tree.insert_file("bin/app", FileSource::Bytes(b"#!/bin/sh\necho hi\n".to_vec()))
            .unwrap();
        tree.insert_file("etc/hosts", FileSource::Bytes(b"127.0.0.1 localhost\n".to_vec()))
            .unwrap();
        tree.insert_dir("var/log").unwrap();
        // The link's directory entry sorts before its target's: only the
        // deferred pass makes this work.
        tree.insert_symlink("bin/a-link", "z-target").unwrap();
        tree.insert_file("bin/z-target", FileSource::Bytes(b"pointed at\n".to_vec()))
            .unwrap();
        let mut config = MachineConfig::default();
        config.vm.disk_size = Some(Size(16 << 20));
        builder.merge_config(config);
        builder.finish().unwrap()
    }

    fn build_image(dir: &Path, package: &Package) -> PathBuf {
        let kernel = dir.join("kernel-1.0.0");
        fs::write(&kernel, vec![0x90u8; 8192]).unwrap();
        let image_path = dir.join("demo.raw");
        let mut image = fs::File::create(&image_path).unwrap();
        assemble::assemble(&mut image, package, &kernel, 1 << 20, 1_700_000_000).unwrap();
        image_path
    }

    #[test]
    fn extraction_recovers_the_package_tree() {
        let dir = tempfile::TempDir::new().unwrap();
        let package = sample_package();
        let image = build_image(dir.path(), &package);

        let dest = dir.path().join("out");
        let report = extract_image(&image, &dest, &ExtractOptions::default()).unwrap();

        assert_eq!(
            fs::read(dest.join("bin/app")).unwrap(),
            b"#!/bin/sh\necho hi\n"
        );
        assert_eq!(
            fs::read(dest.join("etc/hosts")).unwrap(),
            b"127.0.0.1 localhost\n"
        );
        assert!(dest.join("var/log").is_dir());
        let link = dest.join("bin/a-link");
        assert!(link.is_symlink());
        assert_eq!(fs::read_link(&link).unwrap().to_str(), Some("z-target"));
        // The deferred pass ran after the target existed: the link
        // resolves.
        assert_eq!(fs::read(&link).unwrap(), b"pointed at\n");
        assert_eq!(report.symlinks, 1);
        assert!(!report.untouched_advisory);
        // Root, 3 dirs (bin, etc, var), var/log, 3 files, 1 symlink.
        assert_eq!(report.visited, 9);
    }

    #[test]
    fn existing_directory_destination_nests_by_image_stem() {
        let dir = tempfile::TempDir::new().unwrap();
        let package = sample_package();
        let image = build_image(dir.path(), &package);

        let dest = dir.path().join("out");
        fs::create_dir(&dest).unwrap();
        let report = extract_image(&image, &dest, &ExtractOptions::default()).unwrap();
        assert_eq!(report.root, dest.join("demo"));
        assert!(dest.join("demo/bin/app").is_file());
    }

    #[test]
    fn conflict_without_force_writes_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let package = sample_package();
        let image = build_image(dir.path(), &package);

        let dest = dir.path().join("taken");
        fs::create_dir(&dest).unwrap();
        fs::write(dest.join("keep.txt"), "existing").unwrap();

        // A non-empty directory under the chosen root name.
        let err = extract_image(
            &image,
            &dest.join("keep.txt"),
            &ExtractOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::DestinationConflict { .. })
        ));
        assert_eq!(fs::read_to_string(dest.join("keep.txt")).unwrap(), "existing");
    }

    #[test]
    fn force_replaces_the_destination() {
        let dir = tempfile::TempDir::new().unwrap();
        let package = sample_package();
        let image = build_image(dir.path(), &package);

        let dest = dir.path().join("out");
        fs::create_dir(&dest).unwrap();
        fs::write(dest.join("stale.txt"), "old").unwrap();

        let err = extract_image(&image, &dest, &ExtractOptions::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::DestinationConflict { .. })
        ));

        let report = extract_image(
            &image,
            &dest,
            &ExtractOptions {
                force: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(report.root, dest);
        assert!(!dest.join("stale.txt").exists());
        assert!(dest.join("bin/app").is_file());
    }

    #[test]
    fn touched_filter_yields_a_subset_and_honours_patched_atime() {
        let dir = tempfile::TempDir::new().unwrap();
        let package = sample_package();
        let image = build_image(dir.path(), &package);

        // Freshly built: nothing was ever read, so only directories come
        // out.
        let fresh_dest = dir.path().join("fresh");
        let report = extract_image(
            &image,
            &fresh_dest,
            &ExtractOptions {
                touched_only: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(fresh_dest.join("bin").is_dir());
        assert!(!fresh_dest.join("bin/app").exists());
        assert!(!report.untouched_advisory); // directories were visited

        // Mark /bin/app as read by patching its access time in place,
        // the way a prior run of the image would have.
        {
            let file = fs::File::open(&image).unwrap();
            let (file, partition) = assemble::open_partition(file).unwrap();
            let mut fs_reader = Filesystem::open(file, partition).unwrap();
            let ino = fs_reader.resolve_path("/bin/app").unwrap();
            let position = fs_reader.inode_position(ino).unwrap();

            let mut rw = fs::OpenOptions::new().write(true).open(&image).unwrap();
            rw.seek(SeekFrom::Start(position + 8)).unwrap(); // atime field
            rw.write_all(&1_700_000_100u32.to_le_bytes()).unwrap();
        }

        let touched_dest = dir.path().join("touched");
        extract_image(
            &image,
            &touched_dest,
            &ExtractOptions {
                touched_only: true,
                ..Default::default()
            },
        )
        .unwrap();
        // The touched file and its ancestors are present; untouched
        // siblings are not.
        assert!(touched_dest.join("bin/app").is_file());
        assert!(!touched_dest.join("etc/hosts").exists());
        assert!(!touched_dest.join("bin/z-target").exists());

        // Subset of the full extraction.
        let full_dest = dir.path().join("full");
        extract_image(&image, &full_dest, &ExtractOptions::default()).unwrap();
        for entry in walkdir::WalkDir::new(&touched_dest).min_depth(1) {
            let entry = entry.unwrap();
            let relative = entry.path().strip_prefix(&touched_dest).unwrap();
            assert!(
                full_dest.join(relative).exists() || full_dest.join(relative).is_symlink(),
                "{relative:?} extracted under touched-only but missing from full"
            );
        }
    }

    #[test]
    fn missing_image_file_fails_cleanly() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = extract_image(
            &dir.path().join("nope.raw"),
            &dir.path().join("out"),
            &ExtractOptions::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("nope.raw"));
    }
}
