//! Stream-optimized VMDK encoder.
//!
//! The stream-optimized variant is a sparse extent written strictly
//! front-to-back: header, embedded text descriptor, zlib-compressed
//! grains, then grain tables, the grain directory, a footer carrying the
//! real grain directory offset, and an end-of-stream marker. Zero grains
//! are elided. Everything is little-endian.

use anyhow::{bail, Context, Result};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

const SECTOR: u64 = 512;
/// Grain size in sectors (64 KiB of virtual disk per grain).
const GRAIN_SECTORS: u64 = 128;
const GRAIN_BYTES: usize = (GRAIN_SECTORS * SECTOR) as usize;
/// Grain table entries per table.
const GTES_PER_GT: u64 = 512;
/// Sectors occupied by one grain table (512 entries * 4 bytes).
const GT_SECTORS: u64 = GTES_PER_GT * 4 / SECTOR;
/// Sector of the embedded descriptor.
const DESCRIPTOR_OFFSET: u64 = 1;
/// Sectors reserved for the embedded descriptor.
const DESCRIPTOR_SECTORS: u64 = 20;
/// Total header overhead before grain data starts.
const OVERHEAD_SECTORS: u64 = 128;

const MAGIC: u32 = 0x564D_444B; // "KDMV"
const VERSION: u32 = 3;
/// Valid newline detection, compressed grains, markers.
const FLAGS: u32 = 0x0003_0001;
const COMPRESSION_DEFLATE: u16 = 1;

/// Marker types for the metadata sectors between grain data.
mod marker {
    pub const EOS: u32 = 0;
    pub const GRAIN_TABLE: u32 = 1;
    pub const GRAIN_DIRECTORY: u32 = 2;
    pub const FOOTER: u32 = 3;
}

/// Fixed content ID: encoding is a pure function of the raw image.
const CID: &str = "7e862b44";

fn descriptor(capacity_sectors: u64) -> String {
    let cylinders = capacity_sectors / (255 * 63);
    format!(
        "# Disk DescriptorFile\n\
         version=1\n\
         CID={CID}\n\
         parentCID=ffffffff\n\
         createType=\"streamOptimized\"\n\
         \n\
         # Extent description\n\
         RW {capacity_sectors} SPARSE \"disk.vmdk\"\n\
         \n\
         # The Disk Data Base\n\
         #DDB\n\
         \n\
         ddb.adapterType = \"lsilogic\"\n\
         ddb.geometry.cylinders = \"{cylinders}\"\n\
         ddb.geometry.heads = \"255\"\n\
         ddb.geometry.sectors = \"63\"\n\
         ddb.virtualHWVersion = \"10\"\n"
    )
}

fn header(capacity_sectors: u64, gd_offset: u64) -> [u8; 512] {
    let mut h = [0u8; 512];
    h[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    h[4..8].copy_from_slice(&VERSION.to_le_bytes());
    h[8..12].copy_from_slice(&FLAGS.to_le_bytes());
    h[12..20].copy_from_slice(&capacity_sectors.to_le_bytes());
    h[20..28].copy_from_slice(&GRAIN_SECTORS.to_le_bytes());
    h[28..36].copy_from_slice(&DESCRIPTOR_OFFSET.to_le_bytes());
    h[36..44].copy_from_slice(&DESCRIPTOR_SECTORS.to_le_bytes());
    h[44..48].copy_from_slice(&(GTES_PER_GT as u32).to_le_bytes());
    // 48..56: redundant grain directory, unused
    h[56..64].copy_from_slice(&gd_offset.to_le_bytes());
    h[64..72].copy_from_slice(&OVERHEAD_SECTORS.to_le_bytes());
    // 72: clean shutdown
    h[73] = b'\n';
    h[74] = b' ';
    h[75] = b'\r';
    h[76] = b'\n';
    h[77..79].copy_from_slice(&COMPRESSION_DEFLATE.to_le_bytes());
    h
}

/// In the streamed layout the header cannot know the grain directory
/// offset yet; the footer carries the real one.
const GD_AT_END: u64 = u64::MAX;

struct SectorWriter<'a, W> {
    w: &'a mut W,
    sector: u64,
}

impl<W: Write> SectorWriter<'_, W> {
    /// Write `data` padded with zeros to a whole number of sectors.
    /// Returns the sector the data started at.
    fn write_padded(&mut self, data: &[u8]) -> std::io::Result<u64> {
        let at = self.sector;
        self.w.write_all(data)?;
        let sectors = (data.len() as u64).div_ceil(SECTOR);
        let pad = (sectors * SECTOR) as usize - data.len();
        if pad > 0 {
            self.w.write_all(&vec![0u8; pad])?;
        }
        self.sector += sectors;
        Ok(at)
    }

    fn metadata_marker(&mut self, num_sectors: u64, kind: u32) -> std::io::Result<()> {
        let mut sector = [0u8; 512];
        sector[0..8].copy_from_slice(&num_sectors.to_le_bytes());
        // 8..12: size, zero for metadata markers
        sector[12..16].copy_from_slice(&kind.to_le_bytes());
        self.write_padded(&sector)?;
        Ok(())
    }
}

/// Encode `raw_len` bytes of raw disk from `r` as a stream-optimized
/// VMDK.
pub fn encode<R: Read, W: Write>(r: &mut R, raw_len: u64, w: &mut W) -> Result<()> {
    if raw_len % (GRAIN_SECTORS * SECTOR) != 0 {
        bail!("raw disk size {raw_len} is not grain aligned (64 KiB)");
    }
    let capacity_sectors = raw_len / SECTOR;
    let grain_count = raw_len / (GRAIN_SECTORS * SECTOR);

    let mut out = SectorWriter { w, sector: 0 };

    out.write_padded(&header(capacity_sectors, GD_AT_END))
        .context("writing header")?;
    out.write_padded(descriptor(capacity_sectors).as_bytes())
        .context("writing descriptor")?;
    // Pad the overhead region so grain data starts at a fixed sector.
    while out.sector < OVERHEAD_SECTORS {
        out.write_padded(&[0u8; 512])?;
    }

    // Grains.
    let mut gtes: Vec<u32> = Vec::with_capacity(grain_count as usize);
    let mut grain = vec![0u8; GRAIN_BYTES];
    for index in 0..grain_count {
        r.read_exact(&mut grain)
            .with_context(|| format!("reading grain {index} of the raw disk"))?;
        if grain.iter().all(|b| *b == 0) {
            gtes.push(0);
            continue;
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&grain)?;
        let compressed = encoder.finish()?;

        let mut packet = Vec::with_capacity(12 + compressed.len());
        packet.extend_from_slice(&(index * GRAIN_SECTORS).to_le_bytes());
        packet.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        packet.extend_from_slice(&compressed);
        let at = out.write_padded(&packet)?;
        gtes.push(at as u32);
    }

    // Grain tables, one marker + table per 512 grains.
    let mut gdes: Vec<u32> = Vec::new();
    for table in gtes.chunks(GTES_PER_GT as usize) {
        let mut data = vec![0u8; (GT_SECTORS * SECTOR) as usize];
        for (slot, gte) in table.iter().enumerate() {
            data[slot * 4..slot * 4 + 4].copy_from_slice(&gte.to_le_bytes());
        }
        out.metadata_marker(GT_SECTORS, marker::GRAIN_TABLE)?;
        let at = out.write_padded(&data)?;
        gdes.push(at as u32);
    }

    // Grain directory.
    let mut gd_data = Vec::with_capacity(gdes.len() * 4);
    for gde in &gdes {
        gd_data.extend_from_slice(&gde.to_le_bytes());
    }
    let gd_sectors = (gd_data.len() as u64).div_ceil(SECTOR).max(1);
    out.metadata_marker(gd_sectors, marker::GRAIN_DIRECTORY)?;
    let gd_offset = if gd_data.is_empty() {
        out.write_padded(&[0u8; 512])?
    } else {
        out.write_padded(&gd_data)?
    };

    // Footer with the real grain directory offset, then end-of-stream.
    out.metadata_marker(1, marker::FOOTER)?;
    out.write_padded(&header(capacity_sectors, gd_offset))?;
    out.metadata_marker(0, marker::EOS)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_raw() -> Vec<u8> {
        // 2 MiB: one zero grain, then patterned grains.
        let mut raw = vec![0u8; 2 << 20];
        for (at, byte) in raw.iter_mut().enumerate().skip(GRAIN_BYTES) {
            *byte = (at % 253) as u8;
        }
        raw
    }

    #[test]
    fn header_magic_and_capacity() {
        let h = header(4096, GD_AT_END);
        assert_eq!(&h[0..4], b"KDMV");
        assert_eq!(u64::from_le_bytes(h[12..20].try_into().unwrap()), 4096);
        assert_eq!(u64::from_le_bytes(h[20..28].try_into().unwrap()), 128);
        assert_eq!(u64::from_le_bytes(h[56..64].try_into().unwrap()), u64::MAX);
    }

    #[test]
    fn encode_is_sector_aligned_and_sparse() {
        let raw = sample_raw();
        let mut out = Vec::new();
        encode(&mut raw.as_slice(), raw.len() as u64, &mut out).unwrap();
        assert_eq!(out.len() % 512, 0);
        // Compressed output of mostly-patterned data is far smaller than
        // the raw disk.
        assert!(out.len() < raw.len());
        assert_eq!(&out[0..4], b"KDMV");

        // The embedded descriptor is in sector 1.
        let descriptor_text = std::str::from_utf8(&out[512..1024]).unwrap();
        assert!(descriptor_text.contains("createType=\"streamOptimized\""));
        assert!(descriptor_text.contains("RW 4096 SPARSE"));
    }

    #[test]
    fn first_grain_marker_references_lba_of_first_nonzero_grain() {
        let raw = sample_raw();
        let mut out = Vec::new();
        encode(&mut raw.as_slice(), raw.len() as u64, &mut out).unwrap();
        // Grain data starts right after the overhead region; the first
        // stored grain is grain 1 (grain 0 is all zeros).
        let at = (OVERHEAD_SECTORS * SECTOR) as usize;
        let lba = u64::from_le_bytes(out[at..at + 8].try_into().unwrap());
        assert_eq!(lba, GRAIN_SECTORS);
        let size = u32::from_le_bytes(out[at + 8..at + 12].try_into().unwrap());
        assert!(size > 0);
    }

    #[test]
    fn unaligned_input_is_rejected() {
        let raw = vec![0u8; 1000];
        let mut out = Vec::new();
        assert!(encode(&mut raw.as_slice(), 1000, &mut out).is_err());
    }

    #[test]
    fn deterministic_output() {
        let raw = sample_raw();
        let mut a = Vec::new();
        let mut b = Vec::new();
        encode(&mut raw.as_slice(), raw.len() as u64, &mut a).unwrap();
        encode(&mut raw.as_slice(), raw.len() as u64, &mut b).unwrap();
        assert_eq!(a, b);
    }
}
