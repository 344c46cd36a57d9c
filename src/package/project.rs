//! Project directories.
//!
//! A project is a directory whose tree is the package content, described
//! by an `appliance.toml` at its root. The project file defines one or
//! more named build targets, each selecting configuration fragments and
//! an icon; a target is picked with a `path:target` source string. The
//! project file, fragment files, the icon, and any ignored paths stay out
//! of the package tree.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::{Builder, FileSource, FileTree};
use crate::config::MachineConfig;

/// Project definition filename.
pub const PROJECT_FILE: &str = "appliance.toml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectToml {
    /// Path prefixes excluded from the package tree.
    #[serde(default)]
    ignore: Vec<String>,
    #[serde(rename = "target")]
    targets: Vec<TargetToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetToml {
    name: String,
    /// Configuration fragments, merged in order.
    #[serde(default)]
    config: Vec<String>,
    icon: Option<String>,
}

/// A loaded project directory.
pub struct Project {
    root: PathBuf,
    spec: ProjectToml,
}

/// Split a `path[:target]` source string. The split happens at the last
/// ':' and only when the prefix names an existing path, so paths that
/// merely contain colons stay whole.
pub fn split_source(source: &str) -> (&str, Option<&str>) {
    if Path::new(source).exists() {
        return (source, None);
    }
    if let Some((path, target)) = source.rsplit_once(':') {
        if !target.is_empty() && Path::new(path).exists() {
            return (path, Some(target));
        }
    }
    (source, None)
}

impl Project {
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(PROJECT_FILE);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading project file '{}'", path.display()))?;
        let spec: ProjectToml = toml::from_str(&text)
            .with_context(|| format!("parsing project file '{}'", path.display()))?;
        if spec.targets.is_empty() {
            bail!("project '{}' defines no targets", path.display());
        }
        Ok(Project {
            root: root.to_path_buf(),
            spec,
        })
    }

    pub fn target_names(&self) -> Vec<&str> {
        self.spec.targets.iter().map(|t| t.name.as_str()).collect()
    }

    fn target(&self, name: Option<&str>) -> Result<&TargetToml> {
        match name {
            // The first target is the default.
            None => Ok(&self.spec.targets[0]),
            Some(name) => self
                .spec
                .targets
                .iter()
                .find(|t| t.name == name)
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "project has no target '{name}'; available targets: {}",
                        self.target_names().join(", ")
                    )
                }),
        }
    }

    /// Assemble a builder for one target: the project tree minus project
    /// metadata, plus the target's configuration fragments and icon.
    pub fn builder(&self, target: Option<&str>) -> Result<Builder> {
        let target = self.target(target)?;

        let mut excluded: Vec<String> = vec![PROJECT_FILE.to_string()];
        excluded.extend(target.config.iter().cloned());
        if let Some(icon) = &target.icon {
            excluded.push(icon.clone());
        }

        let mut tree = FileTree::new();
        for result in walkdir::WalkDir::new(&self.root).min_depth(1).follow_links(false) {
            let entry = result
                .with_context(|| format!("walking project '{}'", self.root.display()))?;
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .expect("walkdir yields paths under its root");
            let Some(relative) = relative.to_str() else {
                bail!("non-UTF-8 path '{}'", entry.path().display());
            };
            if self.is_ignored(relative, &excluded) {
                continue;
            }
            let file_type = entry.file_type();
            if file_type.is_symlink() {
                let link = std::fs::read_link(entry.path())
                    .with_context(|| format!("reading symlink '{}'", entry.path().display()))?;
                let Some(link) = link.to_str() else {
                    bail!("non-UTF-8 symlink target in '{}'", entry.path().display());
                };
                tree.insert_symlink(relative, link)?;
            } else if file_type.is_dir() {
                tree.insert_dir(relative)?;
            } else {
                tree.insert_file(relative, FileSource::Host(entry.path().to_path_buf()))?;
            }
        }

        let mut builder = Builder::from_tree(tree);
        for fragment in &target.config {
            let path = self.root.join(fragment);
            builder.merge_config(MachineConfig::load(&path)?);
        }
        if let Some(icon) = &target.icon {
            let path = self.root.join(icon);
            let bytes = std::fs::read(&path)
                .with_context(|| format!("reading icon '{}'", path.display()))?;
            builder.set_icon(bytes);
        }
        Ok(builder)
    }

    fn is_ignored(&self, relative: &str, excluded: &[String]) -> bool {
        if excluded.iter().any(|e| e == relative) {
            return true;
        }
        self.spec
            .ignore
            .iter()
            .any(|prefix| relative == prefix || relative.starts_with(&format!("{prefix}/")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::Entry;
    use std::fs;

    fn write_project(dir: &Path) {
        fs::write(
            dir.join(PROJECT_FILE),
            r#"
ignore = ["scratch"]

[[target]]
name = "default"
config = ["base.toml"]

[[target]]
name = "debug"
config = ["base.toml", "debug.toml"]
icon = "logo.png"
"#,
        )
        .unwrap();
        fs::write(
            dir.join("base.toml"),
            "[[program]]\nbinary = \"/bin/app\"\n\n[vm]\ncpus = 1\n",
        )
        .unwrap();
        fs::write(dir.join("debug.toml"), "[vm]\ncpus = 2\n").unwrap();
        fs::write(dir.join("logo.png"), [0x89, b'P']).unwrap();
        fs::create_dir(dir.join("bin")).unwrap();
        fs::write(dir.join("bin/app"), "payload").unwrap();
        fs::create_dir(dir.join("scratch")).unwrap();
        fs::write(dir.join("scratch/tmp.o"), "junk").unwrap();
    }

    #[test]
    fn first_target_is_the_default() {
        let dir = tempfile::TempDir::new().unwrap();
        write_project(dir.path());
        let project = Project::load(dir.path()).unwrap();
        let package = project.builder(None).unwrap().finish().unwrap();
        assert_eq!(package.config().vm.cpus, Some(1));
        assert!(package.icon().is_none());
    }

    #[test]
    fn named_target_merges_fragments_in_order() {
        let dir = tempfile::TempDir::new().unwrap();
        write_project(dir.path());
        let project = Project::load(dir.path()).unwrap();
        let package = project.builder(Some("debug")).unwrap().finish().unwrap();
        // debug.toml merged after base.toml wins.
        assert_eq!(package.config().vm.cpus, Some(2));
        assert_eq!(package.config().programs[0].binary.as_deref(), Some("/bin/app"));
        assert!(package.icon().is_some());
    }

    #[test]
    fn project_metadata_stays_out_of_the_tree() {
        let dir = tempfile::TempDir::new().unwrap();
        write_project(dir.path());
        let project = Project::load(dir.path()).unwrap();
        let package = project.builder(Some("debug")).unwrap().finish().unwrap();
        let tree = package.tree();
        assert!(matches!(tree.get("bin/app"), Some(Entry::File(_))));
        assert!(tree.get(PROJECT_FILE).is_none());
        assert!(tree.get("base.toml").is_none());
        assert!(tree.get("debug.toml").is_none());
        assert!(tree.get("logo.png").is_none());
        assert!(tree.get("scratch").is_none());
        assert!(tree.get("scratch/tmp.o").is_none());
    }

    #[test]
    fn unknown_target_lists_alternatives() {
        let dir = tempfile::TempDir::new().unwrap();
        write_project(dir.path());
        let project = Project::load(dir.path()).unwrap();
        let err = project.builder(Some("release")).unwrap_err().to_string();
        assert!(err.contains("default"));
        assert!(err.contains("debug"));
    }

    #[test]
    fn split_source_only_splits_on_existing_prefixes() {
        let dir = tempfile::TempDir::new().unwrap();
        write_project(dir.path());
        let root = dir.path().to_str().unwrap().to_string();

        let with_target = format!("{root}:debug");
        assert_eq!(split_source(&with_target), (root.as_str(), Some("debug")));
        // An existing path wins even if it contains a colon.
        assert_eq!(split_source(&root), (root.as_str(), None));
        // Nothing exists: the string stays whole.
        assert_eq!(split_source("no/such:thing"), ("no/such:thing", None));
    }

    #[test]
    fn base_target_in_default_tree_keeps_non_default_icon_out() {
        let dir = tempfile::TempDir::new().unwrap();
        write_project(dir.path());
        let project = Project::load(dir.path()).unwrap();
        // "default" does not reference logo.png or debug.toml, so both
        // are package content for it.
        let package = project.builder(None).unwrap().finish().unwrap();
        assert!(package.tree().get("logo.png").is_some());
        assert!(package.tree().get("debug.toml").is_some());
    }
}
