//! GCP import archive encoder.
//!
//! Compute Engine imports a gzip-compressed tar archive containing a
//! single member named `disk.raw`, whose size must be a whole number of
//! GiB — the caller aligns the raw disk before encoding.

use anyhow::{bail, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Archive member name mandated by the import tooling.
pub const MEMBER_NAME: &str = "disk.raw";

pub fn encode<R: Read, W: Write>(
    r: &mut R,
    raw_len: u64,
    w: &mut W,
    timestamp: u32,
) -> Result<()> {
    if raw_len % (1 << 30) != 0 {
        bail!(
            "raw disk size {raw_len} is not GiB aligned; GCP rejects unaligned disks"
        );
    }

    let gz = GzEncoder::new(w, Compression::default());
    let mut archive = tar::Builder::new(gz);

    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(raw_len);
    header.set_mode(0o644);
    header.set_mtime(timestamp as u64);
    header.set_cksum();
    archive
        .append_data(&mut header, MEMBER_NAME, r.take(raw_len))
        .context("writing disk.raw archive member")?;

    archive
        .into_inner()
        .context("finishing archive")?
        .finish()
        .context("finishing compression")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;

    #[test]
    fn archive_contains_single_disk_member() {
        // A constant-byte reader stands in for a 1 GiB raw disk so the
        // test does not allocate one.
        let mut raw = std::io::repeat(0x5A).take(1 << 30);
        let mut out = Vec::new();
        encode(&mut raw, 1 << 30, &mut out, 1_700_000_000).unwrap();

        let mut archive = tar::Archive::new(GzDecoder::new(out.as_slice()));
        let mut entries = archive.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        assert_eq!(entry.path().unwrap().to_str(), Some(MEMBER_NAME));
        assert_eq!(entry.size(), 1 << 30);
        let mut first = [0u8; 16];
        entry.read_exact(&mut first).unwrap();
        assert_eq!(first, [0x5Au8; 16]);
    }

    #[test]
    fn unaligned_disk_is_rejected() {
        let raw = vec![0u8; 1024];
        let mut out = Vec::new();
        assert!(encode(&mut raw.as_slice(), 1024, &mut out, 0).is_err());
    }
}
