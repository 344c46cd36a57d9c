//! Disk image assembly and container format encoders.
//!
//! `build()` is the single entrypoint of the build direction: it lays the
//! package out as a raw bootable disk and hands the result to the encoder
//! for the requested format. Every encoder is a pure function of the raw
//! image plus descriptive metadata.

pub mod assemble;
pub mod gcp;
pub mod vhd;
pub mod vmdk;
pub mod xva;
mod xva_template;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::io::{Seek, SeekFrom, Write};

use crate::error::BuildError;
use crate::kernel::{self, KernelOptions};
use crate::package::Package;

/// Supported output container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// The raw bootable disk, unwrapped.
    Raw,
    /// Stream-optimized VMDK (compressed sparse extent).
    Vmdk,
    /// Fixed-size VHD.
    Vhd,
    /// XVA archive: XML descriptor plus chunked disk in a tar.
    Xva,
    /// GCP import archive: disk.raw inside a gzip-compressed tar.
    Gcp,
}

impl Format {
    pub const ALL: [Format; 5] = [
        Format::Raw,
        Format::Vmdk,
        Format::Vhd,
        Format::Xva,
        Format::Gcp,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Format::Raw => "raw",
            Format::Vmdk => "vmdk",
            Format::Vhd => "vhd",
            Format::Xva => "xva",
            Format::Gcp => "gcp",
        }
    }

    /// Conventional file suffix for artifacts in this format.
    pub fn suffix(self) -> &'static str {
        match self {
            Format::Raw => "raw",
            Format::Vmdk => "vmdk",
            Format::Vhd => "vhd",
            Format::Xva => "xva",
            Format::Gcp => "tar.gz",
        }
    }

    /// Size alignment the raw disk must satisfy before encoding.
    pub fn alignment(self) -> u64 {
        match self {
            Format::Raw | Format::Vmdk | Format::Vhd => 2 << 20,
            Format::Xva => 1 << 20,
            Format::Gcp => 1 << 30,
        }
    }

    /// Parse a format identifier. Unsupported values fail listing every
    /// valid alternative.
    pub fn parse(value: &str) -> Result<Format> {
        for format in Format::ALL {
            if format.name() == value {
                return Ok(format);
            }
        }
        let valid = Format::ALL
            .iter()
            .map(|f| f.name())
            .collect::<Vec<_>>()
            .join(", ");
        Err(BuildError::InvalidFormat(format!(
            "unsupported format '{value}' -- try one of these: {valid}"
        ))
        .into())
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Default for Format {
    fn default() -> Self {
        Format::Raw
    }
}

/// Descriptive VM metadata consumed by the archive-style encoders.
#[derive(Debug, Clone)]
pub struct VmMeta {
    pub name: String,
    pub description: String,
    /// Guest memory in bytes.
    pub ram: u64,
    pub cpus: u32,
    /// Virtual disk size in bytes.
    pub disk_size: u64,
    /// Number of virtual network interfaces.
    pub nics: u32,
}

impl VmMeta {
    fn from_package(package: &Package, disk_size: u64) -> Self {
        let config = package.config();
        VmMeta {
            name: config
                .info
                .name
                .clone()
                .unwrap_or_else(|| "appliance".to_string()),
            description: config.info.description.clone().unwrap_or_default(),
            ram: config.vm.ram.map(|s| s.bytes()).unwrap_or(512 << 20),
            cpus: config.vm.cpus.unwrap_or(1),
            disk_size,
            nics: config.networks.len() as u32,
        }
    }
}

/// Configuration for one build invocation. Not persisted.
#[derive(Debug, Clone, Default)]
pub struct BuildArgs {
    pub format: Format,
    /// Raw disk size alignment in bytes; 0 means the format's default.
    pub size_align: u64,
    pub kernel: KernelOptions,
}

/// Build a disk image for `package` into `w` in the requested format.
///
/// The pipeline is sequential: filesystem layout completes before
/// assembly, assembly before encoding. Intermediate raw disks for the
/// wrapped formats live in an unnamed temporary file that the OS reclaims
/// on every exit path.
pub fn build<W: Write + Seek>(w: &mut W, package: &Package, args: &BuildArgs) -> Result<()> {
    let kernel_path = kernel::locate(&args.kernel, package.config())?;
    let timestamp = time::OffsetDateTime::now_utc().unix_timestamp() as u32;
    let align = if args.size_align > 0 {
        args.size_align
    } else {
        args.format.alignment()
    };

    tracing::info!(format = %args.format, "building disk image");

    if args.format == Format::Raw {
        assemble::assemble(w, package, &kernel_path, align, timestamp)?;
        return Ok(());
    }

    let mut raw = tempfile::tempfile().context("creating temporary raw disk")?;
    let raw_len = assemble::assemble(&mut raw, package, &kernel_path, align, timestamp)?;
    raw.seek(SeekFrom::Start(0))?;

    match args.format {
        Format::Raw => unreachable!("handled above"),
        Format::Vmdk => vmdk::encode(&mut raw, raw_len, w)?,
        Format::Vhd => {
            let meta = VmMeta::from_package(package, raw_len);
            vhd::encode(&mut raw, raw_len, w, timestamp, vhd_uuid(&meta.name))?;
        }
        Format::Xva => {
            let meta = VmMeta::from_package(package, raw_len);
            xva::encode(&mut raw, raw_len, w, &meta, timestamp)?;
        }
        Format::Gcp => gcp::encode(&mut raw, raw_len, w, timestamp)?,
    }
    Ok(())
}

/// Deterministic footer UUID so identical inputs produce identical VHDs.
fn vhd_uuid(name: &str) -> [u8; 16] {
    let digest = Sha256::digest(name.as_bytes());
    let mut uuid = [0u8; 16];
    uuid.copy_from_slice(&digest[..16]);
    uuid
}

/// Round `value` up to the next multiple of `align` (a power of two or
/// any positive alignment).
pub(crate) fn align_up(value: u64, align: u64) -> u64 {
    if align == 0 {
        return value;
    }
    value.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MachineConfig, Size};
    use crate::extract::{extract_image, ExtractOptions};
    use crate::package::{Builder, FileSource};
    use std::io::Cursor;
    use std::path::Path;

    fn sample_package() -> Package {
        let mut builder = Builder::new();
        builder
            .tree_mut()
            .insert_file("bin/server", FileSource::Bytes(b"ELF...".to_vec()))
            .unwrap();
        builder
            .tree_mut()
            .insert_symlink("bin/srv", "server")
            .unwrap();
        let mut config = MachineConfig::default();
        config.info.name = Some("demo".to_string());
        config.vm.disk_size = Some(Size(16 << 20));
        config.vm.cpus = Some(2);
        config.vm.ram = Some(Size(256 << 20));
        builder.merge_config(config);
        builder.finish().unwrap()
    }

    fn build_args(dir: &Path, format: Format) -> BuildArgs {
        let kernel = dir.join("kernel-1.0.0");
        std::fs::write(&kernel, vec![0x90u8; 4096]).unwrap();
        BuildArgs {
            format,
            size_align: 0,
            kernel: KernelOptions {
                path: Some(kernel),
                ..Default::default()
            },
        }
    }

    #[test]
    fn raw_build_round_trips_through_extraction() {
        let dir = tempfile::TempDir::new().unwrap();
        let package = sample_package();
        let args = build_args(dir.path(), Format::Raw);

        let image_path = dir.path().join("demo.raw");
        let mut image = std::fs::File::create(&image_path).unwrap();
        build(&mut image, &package, &args).unwrap();
        drop(image);

        let dest = dir.path().join("out");
        extract_image(&image_path, &dest, &ExtractOptions::default()).unwrap();
        assert_eq!(std::fs::read(dest.join("bin/server")).unwrap(), b"ELF...");
        assert_eq!(
            std::fs::read_link(dest.join("bin/srv")).unwrap().to_str(),
            Some("server")
        );
    }

    #[test]
    fn vhd_build_ends_with_a_footer() {
        let dir = tempfile::TempDir::new().unwrap();
        let package = sample_package();
        let args = build_args(dir.path(), Format::Vhd);

        let mut out = Cursor::new(Vec::new());
        build(&mut out, &package, &args).unwrap();
        let bytes = out.into_inner();
        assert_eq!(&bytes[bytes.len() - 512..bytes.len() - 504], b"conectix");
        // Raw payload is format aligned.
        assert_eq!((bytes.len() - 512) as u64 % Format::Vhd.alignment(), 0);
    }

    #[test]
    fn xva_build_is_a_tar_led_by_the_descriptor() {
        let dir = tempfile::TempDir::new().unwrap();
        let package = sample_package();
        let args = build_args(dir.path(), Format::Xva);

        let mut out = Cursor::new(Vec::new());
        build(&mut out, &package, &args).unwrap();
        let bytes = out.into_inner();

        let mut archive = tar::Archive::new(bytes.as_slice());
        let mut entries = archive.entries().unwrap();
        let mut first = entries.next().unwrap().unwrap();
        assert_eq!(first.path().unwrap().to_str(), Some("ova.xml"));
        let mut xml = String::new();
        std::io::Read::read_to_string(&mut first, &mut xml).unwrap();
        assert!(xml.contains("<value>demo</value>"));
        assert!(xml.contains("<value>268435456</value>")); // 256 MiB RAM
    }

    #[test]
    fn vmdk_build_produces_the_sparse_magic() {
        let dir = tempfile::TempDir::new().unwrap();
        let package = sample_package();
        let args = build_args(dir.path(), Format::Vmdk);

        let mut out = Cursor::new(Vec::new());
        build(&mut out, &package, &args).unwrap();
        assert_eq!(&out.into_inner()[0..4], b"KDMV");
    }

    #[test]
    fn parse_accepts_every_format() {
        for format in Format::ALL {
            assert_eq!(Format::parse(format.name()).unwrap(), format);
        }
    }

    #[test]
    fn parse_rejection_lists_all_formats() {
        let err = Format::parse("bogus").unwrap_err();
        let kind = err.downcast_ref::<BuildError>();
        assert!(matches!(kind, Some(BuildError::InvalidFormat(_))));
        let text = err.to_string();
        for format in Format::ALL {
            assert!(text.contains(format.name()), "missing {format} in: {text}");
        }
    }

    #[test]
    fn alignment_rounds_up() {
        assert_eq!(align_up(1, 1 << 20), 1 << 20);
        assert_eq!(align_up(1 << 20, 1 << 20), 1 << 20);
        assert_eq!(align_up((1 << 20) + 1, 1 << 20), 2 << 20);
        assert_eq!(align_up(0, 1 << 20), 0);
    }

    #[test]
    fn vhd_uuid_is_deterministic() {
        assert_eq!(vhd_uuid("test-vm"), vhd_uuid("test-vm"));
        assert_ne!(vhd_uuid("a"), vhd_uuid("b"));
    }
}
