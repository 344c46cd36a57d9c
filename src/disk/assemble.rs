//! Raw bootable disk assembly.
//!
//! The raw disk layout, in order: an MBR at sector 0 (boot stub plus one
//! partition entry), the kernel payload from sector 1, and the filesystem
//! partition at the next MiB boundary past the kernel. The partition entry
//! records where the filesystem starts, which is also how the extraction
//! side finds it. The final image size is rounded up to the alignment the
//! output format (or provisioner) requires.

use anyhow::{bail, Context, Result};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use super::align_up;
use crate::error::BuildError;
use crate::ext2::layout::{self, LayoutOptions};
use crate::package::Package;

/// Disk sector size in bytes.
pub const SECTOR_SIZE: u64 = 512;
/// The kernel payload starts right after the MBR.
pub const KERNEL_OFFSET: u64 = SECTOR_SIZE;
/// The filesystem partition starts on a MiB boundary.
pub const PARTITION_ALIGNMENT: u64 = 1 << 20;
/// Disk capacity used when the configuration does not set one.
pub const DEFAULT_DISK_SIZE: u64 = 64 << 20;

/// MBR partition type for a Linux filesystem.
const PARTITION_TYPE_LINUX: u8 = 0x83;
/// Offset of the first partition entry within the MBR.
const PARTITION_ENTRY_OFFSET: usize = 446;

/// Placeholder boot code: a tight halt loop. Supported hypervisors load
/// the kernel from its fixed offset directly; the stub only has to be
/// harmless when executed by a BIOS.
const BOOT_STUB: [u8; 4] = [0xEB, 0xFE, 0x90, 0x90];

/// Compose the MBR, kernel, and filesystem into one raw bootable image.
/// Returns the final (aligned) image size in bytes.
pub fn assemble<W: Write + Seek>(
    w: &mut W,
    package: &Package,
    kernel: &Path,
    size_align: u64,
    timestamp: u32,
) -> Result<u64> {
    let kernel_len = std::fs::metadata(kernel)
        .with_context(|| format!("reading kernel '{}'", kernel.display()))?
        .len();
    if kernel_len == 0 {
        bail!("kernel '{}' is empty", kernel.display());
    }

    let partition_start = align_up(KERNEL_OFFSET + kernel_len, PARTITION_ALIGNMENT);
    let capacity = package
        .config()
        .vm
        .disk_size
        .map(|s| s.bytes())
        .unwrap_or(DEFAULT_DISK_SIZE);
    if capacity <= partition_start {
        return Err(BuildError::SizeExceeded {
            needed: partition_start + PARTITION_ALIGNMENT,
            capacity,
        }
        .into());
    }

    // Filesystem partition.
    tracing::debug!(offset = partition_start, "laying out filesystem");
    let mut partition = OffsetWriter {
        inner: &mut *w,
        base: partition_start,
    };
    let fs_len = layout::write_filesystem(
        &mut partition,
        package.tree(),
        &LayoutOptions {
            capacity: capacity - partition_start,
            inode_count: package.config().vm.inodes,
            timestamp,
        },
    )
    .context("laying out filesystem partition")?;

    // Kernel payload.
    let mut kernel_file = std::fs::File::open(kernel)
        .with_context(|| format!("opening kernel '{}'", kernel.display()))?;
    w.seek(SeekFrom::Start(KERNEL_OFFSET))?;
    std::io::copy(&mut kernel_file, w)
        .with_context(|| format!("copying kernel '{}'", kernel.display()))?;

    // Boot sector, now that the partition geometry is known.
    let mbr = build_mbr(partition_start, fs_len);
    w.seek(SeekFrom::Start(0))?;
    w.write_all(&mbr)?;

    // Round the whole image up to the requested alignment.
    let total = align_up(partition_start + fs_len, size_align.max(1));
    let current = w.seek(SeekFrom::End(0))?;
    if current < total {
        w.seek(SeekFrom::Start(total - 1))?;
        w.write_all(&[0])?;
    }
    tracing::info!(bytes = total, "assembled raw disk");
    Ok(total)
}

/// One bootable LBA-addressed partition entry; CHS fields are pinned to
/// the "use LBA" sentinel.
fn build_mbr(partition_start: u64, partition_len: u64) -> [u8; 512] {
    let mut mbr = [0u8; 512];
    mbr[..BOOT_STUB.len()].copy_from_slice(&BOOT_STUB);

    let entry = &mut mbr[PARTITION_ENTRY_OFFSET..PARTITION_ENTRY_OFFSET + 16];
    entry[0] = 0x80; // bootable
    entry[1] = 0xFF; // CHS start: LBA sentinel
    entry[2] = 0xFF;
    entry[3] = 0xFF;
    entry[4] = PARTITION_TYPE_LINUX;
    entry[5] = 0xFF; // CHS end: LBA sentinel
    entry[6] = 0xFF;
    entry[7] = 0xFF;
    let start_lba = (partition_start / SECTOR_SIZE) as u32;
    let sectors = partition_len.div_ceil(SECTOR_SIZE) as u32;
    entry[8..12].copy_from_slice(&start_lba.to_le_bytes());
    entry[12..16].copy_from_slice(&sectors.to_le_bytes());

    mbr[510] = 0x55;
    mbr[511] = 0xAA;
    mbr
}

/// Parse the first partition entry of an MBR: (byte offset, byte length).
pub fn read_partition(mbr: &[u8; 512]) -> Result<(u64, u64)> {
    if mbr[510] != 0x55 || mbr[511] != 0xAA {
        return Err(BuildError::InodeResolution(
            "missing MBR boot signature; not a built disk image".to_string(),
        )
        .into());
    }
    let entry = &mbr[PARTITION_ENTRY_OFFSET..PARTITION_ENTRY_OFFSET + 16];
    let start_lba = u32::from_le_bytes(entry[8..12].try_into().unwrap()) as u64;
    let sectors = u32::from_le_bytes(entry[12..16].try_into().unwrap()) as u64;
    if start_lba == 0 || sectors == 0 {
        return Err(BuildError::InodeResolution(
            "MBR has no filesystem partition".to_string(),
        )
        .into());
    }
    Ok((start_lba * SECTOR_SIZE, sectors * SECTOR_SIZE))
}

/// Adapts absolute block addressing to a fixed offset inside a larger
/// stream, so the layout engine can write a partition in place.
struct OffsetWriter<'a, W> {
    inner: &'a mut W,
    base: u64,
}

impl<W: Write> Write for OffsetWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Seek> Seek for OffsetWriter<'_, W> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let at = match pos {
            SeekFrom::Start(offset) => self.inner.seek(SeekFrom::Start(self.base + offset))?,
            SeekFrom::Current(delta) => self.inner.seek(SeekFrom::Current(delta))?,
            SeekFrom::End(delta) => self.inner.seek(SeekFrom::End(delta))?,
        };
        Ok(at.saturating_sub(self.base))
    }
}

/// Open a raw disk image and return a reader positioned over its
/// filesystem partition: (reader, partition byte offset).
pub fn open_partition<R: Read + Seek>(mut r: R) -> Result<(R, u64)> {
    let mut mbr = [0u8; 512];
    r.seek(SeekFrom::Start(0))?;
    r.read_exact(&mut mbr)
        .map_err(|e| BuildError::InodeResolution(format!("reading boot sector: {e}")))?;
    let (offset, _) = read_partition(&mbr)?;
    Ok((r, offset))
}
