//! Fixed-size VHD encoder.
//!
//! A fixed VHD is the raw disk followed by one 512-byte big-endian footer.
//! The footer carries CHS geometry derived from the virtual size, a
//! timestamp counted from the VHD epoch (2000-01-01T00:00:00Z), and a
//! ones-complement byte-sum checksum.

use anyhow::{bail, Context, Result};
use std::io::{Read, Write};

/// Seconds between the Unix epoch and the VHD epoch.
const VHD_EPOCH_OFFSET: u32 = 946_684_800;
/// Footer cookie mandated by the format.
const COOKIE: &[u8; 8] = b"conectix";
/// Creator application tag (four bytes, padded).
const CREATOR_APP: &[u8; 4] = b"apbd";
/// Creator host OS: the format defines Windows and Mac tokens; import
/// tooling expects one of them.
const CREATOR_OS: &[u8; 4] = b"Wi2k";
/// Disk type 2: fixed.
const DISK_TYPE_FIXED: u32 = 2;

/// CHS geometry per the VHD specification's algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub cylinders: u16,
    pub heads: u8,
    pub sectors_per_track: u8,
}

pub fn geometry(total_sectors: u64) -> Geometry {
    let mut total = total_sectors.min(65535 * 16 * 255);
    let mut sectors_per_track: u64;
    let mut heads: u64;
    let mut cylinder_times_heads: u64;

    if total >= 65535 * 16 * 63 {
        total = 65535 * 16 * 255;
        sectors_per_track = 255;
        heads = 16;
        cylinder_times_heads = total / sectors_per_track;
    } else {
        sectors_per_track = 17;
        cylinder_times_heads = total / sectors_per_track;
        heads = ((cylinder_times_heads + 1023) / 1024).max(4);
        if cylinder_times_heads >= heads * 1024 || heads > 16 {
            sectors_per_track = 31;
            heads = 16;
            cylinder_times_heads = total / sectors_per_track;
        }
        if cylinder_times_heads >= heads * 1024 {
            sectors_per_track = 63;
            heads = 16;
            cylinder_times_heads = total / sectors_per_track;
        }
    }

    Geometry {
        cylinders: (cylinder_times_heads / heads) as u16,
        heads: heads as u8,
        sectors_per_track: sectors_per_track as u8,
    }
}

/// Encode `raw_len` bytes from `r` as a fixed VHD. `timestamp` is Unix
/// seconds; `uuid` identifies the virtual disk.
pub fn encode<R: Read, W: Write>(
    r: &mut R,
    raw_len: u64,
    w: &mut W,
    timestamp: u32,
    uuid: [u8; 16],
) -> Result<()> {
    if raw_len % 512 != 0 {
        bail!("raw disk size {raw_len} is not sector aligned");
    }
    let copied = std::io::copy(&mut r.take(raw_len), w).context("copying raw disk")?;
    if copied != raw_len {
        bail!("raw disk ended early: copied {copied} of {raw_len} bytes");
    }
    w.write_all(&footer(raw_len, timestamp, uuid))
        .context("writing VHD footer")?;
    Ok(())
}

pub fn footer(raw_len: u64, timestamp: u32, uuid: [u8; 16]) -> [u8; 512] {
    let mut f = [0u8; 512];
    f[0..8].copy_from_slice(COOKIE);
    f[8..12].copy_from_slice(&2u32.to_be_bytes()); // features: reserved bit
    f[12..16].copy_from_slice(&0x0001_0000u32.to_be_bytes()); // version 1.0
    f[16..24].copy_from_slice(&u64::MAX.to_be_bytes()); // no dynamic header
    let vhd_time = timestamp.saturating_sub(VHD_EPOCH_OFFSET);
    f[24..28].copy_from_slice(&vhd_time.to_be_bytes());
    f[28..32].copy_from_slice(CREATOR_APP);
    f[32..36].copy_from_slice(&0x0001_0000u32.to_be_bytes()); // creator version
    f[36..40].copy_from_slice(CREATOR_OS);
    f[40..48].copy_from_slice(&raw_len.to_be_bytes()); // original size
    f[48..56].copy_from_slice(&raw_len.to_be_bytes()); // current size
    let geo = geometry(raw_len / 512);
    f[56..58].copy_from_slice(&geo.cylinders.to_be_bytes());
    f[58] = geo.heads;
    f[59] = geo.sectors_per_track;
    f[60..64].copy_from_slice(&DISK_TYPE_FIXED.to_be_bytes());
    f[68..84].copy_from_slice(&uuid);
    // saved state byte 84 stays 0
    let checksum = checksum(&f);
    f[64..68].copy_from_slice(&checksum.to_be_bytes());
    f
}

/// Ones complement of the byte sum, computed with the checksum field
/// zeroed.
fn checksum(footer: &[u8; 512]) -> u32 {
    let mut sum: u32 = 0;
    for (at, byte) in footer.iter().enumerate() {
        if (64..68).contains(&at) {
            continue;
        }
        sum = sum.wrapping_add(*byte as u32);
    }
    !sum
}
