use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use appliance_builder::config::{MachineConfig, Size};
use appliance_builder::disk::{self, BuildArgs, Format};
use appliance_builder::extract::{extract_image, ExtractOptions};
use appliance_builder::kernel::{self, KernelOptions};
use appliance_builder::package::source::{builder_from_source, Cancel};

#[derive(Parser)]
#[command(name = "appliance-builder", version)]
#[command(about = "Builds bootable appliance disk images from application packages")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a disk image from a package source (URL, archive file, or
    /// project directory with an optional ":target" suffix).
    Build {
        source: String,
        /// Output path; defaults to the image name with the format's
        /// suffix.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Output format.
        #[arg(short, long, default_value = "raw")]
        format: String,
        /// Configuration fragments merged over the package's own, in
        /// order.
        #[arg(long = "config")]
        configs: Vec<PathBuf>,
        /// Override the machine name.
        #[arg(long)]
        name: Option<String>,
        /// Override the machine description.
        #[arg(long)]
        description: Option<String>,
        /// Override the vCPU count.
        #[arg(long)]
        cpus: Option<u32>,
        /// Override guest memory, e.g. "512 MiB".
        #[arg(long)]
        ram: Option<String>,
        /// Override the disk capacity, e.g. "1 GiB".
        #[arg(long)]
        disk_size: Option<String>,
        /// Round the raw disk up to this alignment instead of the
        /// format's default, e.g. "1 GiB" for cloud imports.
        #[arg(long)]
        size_align: Option<String>,
        /// Replace the package icon.
        #[arg(long)]
        icon: Option<PathBuf>,
        /// Kernel version to boot.
        #[arg(long)]
        kernel: Option<String>,
        /// Explicit kernel binary, bypassing the cache.
        #[arg(long)]
        kernel_file: Option<PathBuf>,
        /// Use the interactive-shell kernel variant.
        #[arg(long)]
        shell: bool,
        /// Overwrite the output if it exists.
        #[arg(short = 'f', long)]
        force: bool,
    },
    /// Extract the file tree of a built disk image to a directory.
    Extract {
        image: PathBuf,
        dest: PathBuf,
        /// Only extract objects the image has actually read.
        #[arg(long)]
        touched: bool,
        /// Replace the destination if it exists.
        #[arg(short = 'f', long)]
        force: bool,
    },
    /// List the supported output formats.
    Formats,
    /// List cached kernels.
    Kernels,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match Cli::parse().command {
        Command::Build {
            source,
            output,
            format,
            configs,
            name,
            description,
            cpus,
            ram,
            disk_size,
            size_align,
            icon,
            kernel,
            kernel_file,
            shell,
            force,
        } => {
            let format = Format::parse(&format)?;
            let size_align = size_align
                .as_deref()
                .map(str::parse::<Size>)
                .transpose()?
                .map(|s| s.bytes())
                .unwrap_or(0);
            let cancel = Cancel::new();

            let mut builder = builder_from_source("SOURCE", &source, &cancel)?;
            if let Some(icon) = icon {
                let bytes = std::fs::read(&icon)
                    .with_context(|| format!("reading icon '{}'", icon.display()))?;
                builder.set_icon(bytes);
            }
            // File fragments first, in order; explicit overrides last.
            for path in &configs {
                builder.merge_config(MachineConfig::load(path)?);
            }
            builder.merge_config(override_fragment(
                name,
                description,
                cpus,
                ram.as_deref(),
                disk_size.as_deref(),
            )?);
            let package = builder.finish()?;

            let output = output.unwrap_or_else(|| {
                let stem = package
                    .config()
                    .info
                    .name
                    .clone()
                    .unwrap_or_else(|| "appliance".to_string());
                PathBuf::from(format!("{stem}.{}", format.suffix()))
            });
            check_output(&output, force)?;

            let args = BuildArgs {
                format,
                size_align,
                kernel: KernelOptions {
                    version: kernel,
                    shell,
                    path: kernel_file,
                },
            };

            // Build into a temporary file next to the output so a failed
            // build never leaves a partial artifact.
            let parent = output.parent().filter(|p| !p.as_os_str().is_empty());
            let mut tmp = tempfile::NamedTempFile::new_in(parent.unwrap_or(Path::new(".")))
                .context("creating temporary output file")?;
            disk::build(tmp.as_file_mut(), &package, &args)?;
            tmp.persist(&output)
                .with_context(|| format!("placing image at '{}'", output.display()))?;

            println!("created {} image: {}", format, output.display());
        }

        Command::Extract {
            image,
            dest,
            touched,
            force,
        } => {
            let report = extract_image(
                &image,
                &dest,
                &ExtractOptions {
                    touched_only: touched,
                    force,
                },
            )?;
            println!(
                "extracted {} object(s) to {}",
                report.visited,
                report.root.display()
            );
            if report.untouched_advisory {
                println!("warning: no touched files detected; has this disk been run?");
            }
        }

        Command::Formats => {
            for format in Format::ALL {
                println!("{format}");
            }
        }

        Command::Kernels => {
            for name in kernel::list_cached()? {
                println!("{name}");
            }
        }
    }
    Ok(())
}

/// Explicit CLI overrides as one configuration fragment, merged last.
fn override_fragment(
    name: Option<String>,
    description: Option<String>,
    cpus: Option<u32>,
    ram: Option<&str>,
    disk_size: Option<&str>,
) -> Result<MachineConfig> {
    let mut fragment = MachineConfig::default();
    fragment.info.name = name;
    fragment.info.description = description;
    fragment.vm.cpus = cpus;
    fragment.vm.ram = ram.map(str::parse::<Size>).transpose()?;
    fragment.vm.disk_size = disk_size.map(str::parse::<Size>).transpose()?;
    Ok(fragment)
}

/// Refuse to clobber an existing output unless forced; force removes it
/// and recreates its parent directory.
fn check_output(path: &Path, force: bool) -> Result<()> {
    if !path.exists() && !path.is_symlink() {
        return Ok(());
    }
    if !force {
        anyhow::bail!(
            "output '{}' already exists (use '--force' to overwrite)",
            path.display()
        );
    }
    if path.is_dir() {
        std::fs::remove_dir_all(path)
            .with_context(|| format!("removing existing output '{}'", path.display()))?;
    } else {
        std::fs::remove_file(path)
            .with_context(|| format!("removing existing output '{}'", path.display()))?;
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating parent directory '{}'", parent.display()))?;
    }
    Ok(())
}
