//! On-disk ext2 structures.
//!
//! Both directions of the pipeline speak this format: the layout engine
//! writes it and the extraction reader parses it straight from bytes. The
//! geometry is fixed at 1 KiB blocks with 128-byte inodes, revision 1 with
//! the filetype directory-entry feature — small images stay small and every
//! structure fits the simplest form of the format.

pub mod layout;
pub mod reader;

use anyhow::{bail, Result};

/// Filesystem block size in bytes.
pub const BLOCK_SIZE: u32 = 1024;
/// On-disk inode record size.
pub const INODE_SIZE: u32 = 128;
/// Blocks per block group (one bitmap block's worth of bits).
pub const BLOCKS_PER_GROUP: u32 = 8 * BLOCK_SIZE;
/// Upper bound on inodes per group (one bitmap block's worth of bits).
pub const MAX_INODES_PER_GROUP: u32 = 8 * BLOCK_SIZE;
/// Superblock magic.
pub const SUPERBLOCK_MAGIC: u16 = 0xEF53;
/// Byte offset of the primary superblock within the filesystem.
pub const SUPERBLOCK_OFFSET: u64 = 1024;
/// Inode number of the root directory.
pub const ROOT_INO: u32 = 2;
/// First inode number available for allocation.
pub const FIRST_FREE_INO: u32 = 11;
/// Number of reserved inodes (1 through 10, root included).
pub const RESERVED_INODES: u32 = 10;
/// Directory entries carry a file type byte.
pub const FEATURE_INCOMPAT_FILETYPE: u32 = 0x0002;
/// Pointer slots in an inode: 12 direct, then single/double/triple indirect.
pub const INODE_BLOCK_SLOTS: usize = 15;
/// Direct pointer slots.
pub const DIRECT_BLOCKS: usize = 12;
/// Block pointers held by one indirect block.
pub const POINTERS_PER_BLOCK: u32 = BLOCK_SIZE / 4;
/// Symlink targets shorter than this are stored inside the inode itself.
pub const INLINE_SYMLINK_MAX: usize = 60;
/// Longest directory entry name.
pub const MAX_NAME_LEN: usize = 255;

mod mode {
    pub const REGULAR: u16 = 0x8000;
    pub const DIRECTORY: u16 = 0x4000;
    pub const SYMLINK: u16 = 0xA000;
    pub const TYPE_MASK: u16 = 0xF000;
}

/// Directory entry file type tags.
pub mod file_type {
    pub const REGULAR: u8 = 1;
    pub const DIRECTORY: u8 = 2;
    pub const SYMLINK: u8 = 7;
}

fn get_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn get_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn put_u16(buf: &mut [u8], off: usize, value: u16) {
    buf[off..off + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], off: usize, value: u32) {
    buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

/// The filesystem superblock. Only the fields this crate reads and writes
/// are represented; everything else is zero on disk.
#[derive(Debug, Clone, Default)]
pub struct Superblock {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub wtime: u32,
}

impl Superblock {
    /// Number of block groups described by this superblock.
    pub fn group_count(&self) -> u32 {
        let covered = self.blocks_count - self.first_data_block;
        covered.div_ceil(self.blocks_per_group)
    }

    /// Serialize into a full block. `group_nr` is the group a backup copy
    /// lands in (0 for the primary).
    pub fn encode(&self, group_nr: u16) -> Vec<u8> {
        let mut buf = vec![0u8; BLOCK_SIZE as usize];
        put_u32(&mut buf, 0, self.inodes_count);
        put_u32(&mut buf, 4, self.blocks_count);
        // 8: reserved blocks count stays zero
        put_u32(&mut buf, 12, self.free_blocks_count);
        put_u32(&mut buf, 16, self.free_inodes_count);
        put_u32(&mut buf, 20, self.first_data_block);
        // 24: log block size (0 => 1 KiB), 28: log fragment size
        put_u32(&mut buf, 32, self.blocks_per_group);
        put_u32(&mut buf, 36, self.blocks_per_group); // fragments per group
        put_u32(&mut buf, 40, self.inodes_per_group);
        put_u32(&mut buf, 44, self.wtime); // mount time slot reused as build time
        put_u32(&mut buf, 48, self.wtime);
        put_u16(&mut buf, 54, 0xFFFF); // max mount count: unlimited
        put_u16(&mut buf, 56, SUPERBLOCK_MAGIC);
        put_u16(&mut buf, 58, 1); // state: clean
        put_u16(&mut buf, 60, 1); // on error: continue
        put_u32(&mut buf, 64, self.wtime); // last check
        put_u32(&mut buf, 76, 1); // revision level
        put_u32(&mut buf, 84, FIRST_FREE_INO);
        put_u16(&mut buf, 88, INODE_SIZE as u16);
        put_u16(&mut buf, 90, group_nr);
        put_u32(&mut buf, 96, FEATURE_INCOMPAT_FILETYPE);
        buf
    }

    /// Parse from the raw superblock block, validating the magic.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 128 {
            bail!("superblock truncated: {} bytes", buf.len());
        }
        let magic = get_u16(buf, 56);
        if magic != SUPERBLOCK_MAGIC {
            bail!("bad superblock magic {magic:#06x} (expected {SUPERBLOCK_MAGIC:#06x})");
        }
        let log_block_size = get_u32(buf, 24);
        if log_block_size != 0 {
            bail!("unsupported block size {} bytes", 1024u32 << log_block_size);
        }
        let sb = Superblock {
            inodes_count: get_u32(buf, 0),
            blocks_count: get_u32(buf, 4),
            free_blocks_count: get_u32(buf, 12),
            free_inodes_count: get_u32(buf, 16),
            first_data_block: get_u32(buf, 20),
            blocks_per_group: get_u32(buf, 32),
            inodes_per_group: get_u32(buf, 40),
            wtime: get_u32(buf, 48),
        };
        if sb.blocks_per_group == 0 || sb.inodes_per_group == 0 {
            bail!("superblock group geometry is zero");
        }
        Ok(sb)
    }
}

/// One block group descriptor.
#[derive(Debug, Clone, Default)]
pub struct GroupDesc {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
}

impl GroupDesc {
    pub const SIZE: usize = 32;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        put_u32(&mut buf, 0, self.block_bitmap);
        put_u32(&mut buf, 4, self.inode_bitmap);
        put_u32(&mut buf, 8, self.inode_table);
        put_u16(&mut buf, 12, self.free_blocks_count);
        put_u16(&mut buf, 14, self.free_inodes_count);
        put_u16(&mut buf, 16, self.used_dirs_count);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            bail!("group descriptor truncated: {} bytes", buf.len());
        }
        Ok(GroupDesc {
            block_bitmap: get_u32(buf, 0),
            inode_bitmap: get_u32(buf, 4),
            inode_table: get_u32(buf, 8),
            free_blocks_count: get_u16(buf, 12),
            free_inodes_count: get_u16(buf, 14),
            used_dirs_count: get_u16(buf, 16),
        })
    }
}

/// One on-disk inode.
#[derive(Debug, Clone, Default)]
pub struct Inode {
    pub mode: u16,
    pub size: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub links_count: u16,
    /// Allocated storage in 512-byte sectors, indirect blocks included.
    pub sectors: u32,
    pub block: [u32; INODE_BLOCK_SLOTS],
}

impl Inode {
    pub fn is_regular(&self) -> bool {
        self.mode & mode::TYPE_MASK == mode::REGULAR
    }

    pub fn is_directory(&self) -> bool {
        self.mode & mode::TYPE_MASK == mode::DIRECTORY
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & mode::TYPE_MASK == mode::SYMLINK
    }

    /// Short symlink targets live in the pointer area itself.
    pub fn has_inline_symlink(&self) -> bool {
        self.is_symlink() && (self.size as usize) < INLINE_SYMLINK_MAX && self.sectors == 0
    }

    pub fn regular(size: u32, perms: u16, ctime: u32) -> Self {
        Inode {
            mode: mode::REGULAR | perms,
            size,
            ctime,
            mtime: ctime,
            links_count: 1,
            ..Default::default()
        }
    }

    pub fn directory(size: u32, links: u16, ctime: u32) -> Self {
        Inode {
            mode: mode::DIRECTORY | 0o755,
            size,
            ctime,
            mtime: ctime,
            links_count: links,
            ..Default::default()
        }
    }

    pub fn symlink(target_len: u32, ctime: u32) -> Self {
        Inode {
            mode: mode::SYMLINK | 0o777,
            size: target_len,
            ctime,
            mtime: ctime,
            links_count: 1,
            ..Default::default()
        }
    }

    pub fn encode(&self) -> [u8; INODE_SIZE as usize] {
        let mut buf = [0u8; INODE_SIZE as usize];
        put_u16(&mut buf, 0, self.mode);
        put_u32(&mut buf, 4, self.size);
        put_u32(&mut buf, 8, self.atime);
        put_u32(&mut buf, 12, self.ctime);
        put_u32(&mut buf, 16, self.mtime);
        put_u16(&mut buf, 26, self.links_count);
        put_u32(&mut buf, 28, self.sectors);
        for (slot, value) in self.block.iter().enumerate() {
            put_u32(&mut buf, 40 + slot * 4, *value);
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < INODE_SIZE as usize {
            bail!("inode record truncated: {} bytes", buf.len());
        }
        let mut block = [0u32; INODE_BLOCK_SLOTS];
        for (slot, value) in block.iter_mut().enumerate() {
            *value = get_u32(buf, 40 + slot * 4);
        }
        Ok(Inode {
            mode: get_u16(buf, 0),
            size: get_u32(buf, 4),
            atime: get_u32(buf, 8),
            ctime: get_u32(buf, 12),
            mtime: get_u32(buf, 16),
            links_count: get_u16(buf, 26),
            sectors: get_u32(buf, 28),
            block,
        })
    }

    /// The raw pointer area as bytes, for inline symlink targets.
    pub fn inline_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(INODE_BLOCK_SLOTS * 4);
        for value in &self.block {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    /// Store an inline symlink target in the pointer area.
    pub fn set_inline_bytes(&mut self, data: &[u8]) {
        debug_assert!(data.len() < INLINE_SYMLINK_MAX);
        let mut raw = [0u8; INODE_BLOCK_SLOTS * 4];
        raw[..data.len()].copy_from_slice(data);
        for (slot, chunk) in raw.chunks_exact(4).enumerate() {
            self.block[slot] = u32::from_le_bytes(chunk.try_into().unwrap());
        }
    }
}

/// One parsed directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: u32,
    pub file_type: u8,
    pub name: String,
}

/// Serialize directory entries into whole blocks. Entries never span a
/// block boundary; the last entry of each block absorbs the remainder via
/// its record length.
pub fn encode_dir_entries(entries: &[(u32, u8, &str)]) -> Vec<u8> {
    let bs = BLOCK_SIZE as usize;
    let mut out: Vec<u8> = Vec::new();
    let mut block_start = 0usize;
    let mut last_entry: Option<usize> = None;

    for (inode, ftype, name) in entries {
        let record = 8 + name.len().div_ceil(4) * 4;
        let used = out.len() - block_start;
        if bs - used < record {
            // Close the current block: the previous entry stretches to the
            // block end.
            if let Some(at) = last_entry {
                let rec_len = (block_start + bs - at) as u16;
                put_u16(&mut out, at + 4, rec_len);
            }
            out.resize(block_start + bs, 0);
            block_start = out.len();
            last_entry = None;
        }
        let at = out.len();
        out.resize(at + record, 0);
        put_u32(&mut out, at, *inode);
        put_u16(&mut out, at + 4, record as u16);
        out[at + 6] = name.len() as u8;
        out[at + 7] = *ftype;
        out[at + 8..at + 8 + name.len()].copy_from_slice(name.as_bytes());
        last_entry = Some(at);
    }

    if let Some(at) = last_entry {
        let rec_len = (block_start + bs - at) as u16;
        put_u16(&mut out, at + 4, rec_len);
    }
    out.resize(block_start + bs, 0);
    out
}

/// Parse the directory entries contained in one or more data blocks.
pub fn decode_dir_entries(data: &[u8]) -> Result<Vec<DirEntry>> {
    let bs = BLOCK_SIZE as usize;
    let mut entries = Vec::new();
    let mut block_off = 0usize;
    while block_off < data.len() {
        let block_end = (block_off + bs).min(data.len());
        let mut at = block_off;
        while at + 8 <= block_end {
            let inode = get_u32(data, at);
            let rec_len = get_u16(data, at + 4) as usize;
            if rec_len < 8 || at + rec_len > block_end {
                bail!("corrupt directory entry at offset {at}: record length {rec_len}");
            }
            let name_len = data[at + 6] as usize;
            if 8 + name_len > rec_len {
                bail!("corrupt directory entry at offset {at}: name length {name_len}");
            }
            if inode != 0 {
                let name = std::str::from_utf8(&data[at + 8..at + 8 + name_len])
                    .map_err(|_| anyhow::anyhow!("directory entry name is not UTF-8"))?
                    .to_string();
                entries.push(DirEntry {
                    inode,
                    file_type: data[at + 7],
                    name,
                });
            }
            at += rec_len;
        }
        block_off += bs;
    }
    Ok(entries)
}

/// Round a byte count up to whole blocks.
pub fn blocks_for(bytes: u64) -> u64 {
    bytes.div_ceil(BLOCK_SIZE as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superblock_round_trip() {
        let sb = Superblock {
            inodes_count: 128,
            blocks_count: 4096,
            free_blocks_count: 1000,
            free_inodes_count: 100,
            first_data_block: 1,
            blocks_per_group: BLOCKS_PER_GROUP,
            inodes_per_group: 128,
            wtime: 1_700_000_000,
        };
        let decoded = Superblock::decode(&sb.encode(0)).unwrap();
        assert_eq!(decoded.inodes_count, 128);
        assert_eq!(decoded.blocks_count, 4096);
        assert_eq!(decoded.free_blocks_count, 1000);
        assert_eq!(decoded.inodes_per_group, 128);
        assert_eq!(decoded.group_count(), 1);
    }

    #[test]
    fn superblock_rejects_bad_magic() {
        let mut raw = Superblock::default().encode(0);
        raw[56] = 0;
        raw[57] = 0;
        assert!(Superblock::decode(&raw).is_err());
    }

    #[test]
    fn inode_round_trip_preserves_type() {
        let mut inode = Inode::regular(4242, 0o644, 77);
        inode.block[0] = 9;
        inode.block[12] = 10;
        let decoded = Inode::decode(&inode.encode()).unwrap();
        assert!(decoded.is_regular());
        assert!(!decoded.is_directory());
        assert_eq!(decoded.size, 4242);
        assert_eq!(decoded.block[0], 9);
        assert_eq!(decoded.block[12], 10);
    }

    #[test]
    fn inline_symlink_bytes_round_trip() {
        let mut inode = Inode::symlink(11, 0);
        inode.set_inline_bytes(b"bin/busybox");
        assert!(inode.has_inline_symlink());
        let decoded = Inode::decode(&inode.encode()).unwrap();
        assert_eq!(&decoded.inline_bytes()[..11], b"bin/busybox");
    }

    #[test]
    fn dir_entries_round_trip() {
        let entries = vec![
            (ROOT_INO, file_type::DIRECTORY, "."),
            (ROOT_INO, file_type::DIRECTORY, ".."),
            (11, file_type::REGULAR, "app"),
            (12, file_type::SYMLINK, "link"),
        ];
        let data = encode_dir_entries(&entries);
        assert_eq!(data.len(), BLOCK_SIZE as usize);
        let decoded = decode_dir_entries(&data).unwrap();
        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded[2].name, "app");
        assert_eq!(decoded[2].file_type, file_type::REGULAR);
        assert_eq!(decoded[3].inode, 12);
    }

    #[test]
    fn dir_entries_spill_into_second_block() {
        let names: Vec<String> = (0..80).map(|i| format!("entry-{i:04}")).collect();
        let mut entries = vec![
            (ROOT_INO, file_type::DIRECTORY, "."),
            (ROOT_INO, file_type::DIRECTORY, ".."),
        ];
        for (i, name) in names.iter().enumerate() {
            entries.push((20 + i as u32, file_type::REGULAR, name.as_str()));
        }
        let data = encode_dir_entries(&entries);
        assert_eq!(data.len() % BLOCK_SIZE as usize, 0);
        assert!(data.len() > BLOCK_SIZE as usize);
        let decoded = decode_dir_entries(&data).unwrap();
        assert_eq!(decoded.len(), entries.len());
        assert_eq!(decoded.last().unwrap().name, "entry-0079");
    }
}
