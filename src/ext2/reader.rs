//! Read-only filesystem access over raw bytes.
//!
//! Parses the structures written by the layout engine — or by anything
//! else that writes the same revision of the format — without mounting.
//! All failures surface as [`BuildError::InodeResolution`] so callers can
//! tell a malformed image apart from host-side I/O problems.

use anyhow::{Context, Result};
use std::io::{Read, Seek, SeekFrom, Write};

use super::{
    decode_dir_entries, DirEntry, GroupDesc, Inode, Superblock, BLOCK_SIZE, DIRECT_BLOCKS,
    INODE_SIZE, POINTERS_PER_BLOCK, ROOT_INO, SUPERBLOCK_OFFSET,
};
use crate::error::BuildError;

/// A filesystem opened read-only at some byte offset of an image.
#[derive(Debug)]
pub struct Filesystem<R> {
    r: R,
    /// Byte offset of the filesystem within the underlying stream.
    base: u64,
    superblock: Superblock,
    groups: Vec<GroupDesc>,
}

fn malformed(detail: impl Into<String>) -> anyhow::Error {
    BuildError::InodeResolution(detail.into()).into()
}

impl<R: Read + Seek> Filesystem<R> {
    /// Open a filesystem whose first byte is at `base` in `r`.
    pub fn open(mut r: R, base: u64) -> Result<Self> {
        let mut raw = vec![0u8; BLOCK_SIZE as usize];
        r.seek(SeekFrom::Start(base + SUPERBLOCK_OFFSET))
            .context("seeking to superblock")?;
        r.read_exact(&mut raw)
            .map_err(|e| malformed(format!("reading superblock: {e}")))?;
        let superblock = Superblock::decode(&raw).map_err(|e| malformed(e.to_string()))?;

        let group_count = superblock.group_count();
        let gdt_bytes = (group_count as usize) * GroupDesc::SIZE;
        let gdt_block = superblock.first_data_block + 1;
        let mut raw = vec![0u8; gdt_bytes];
        r.seek(SeekFrom::Start(base + gdt_block as u64 * BLOCK_SIZE as u64))?;
        r.read_exact(&mut raw)
            .map_err(|e| malformed(format!("reading group descriptors: {e}")))?;
        let mut groups = Vec::with_capacity(group_count as usize);
        for g in 0..group_count as usize {
            groups.push(
                GroupDesc::decode(&raw[g * GroupDesc::SIZE..])
                    .map_err(|e| malformed(e.to_string()))?,
            );
        }

        Ok(Filesystem {
            r,
            base,
            superblock,
            groups,
        })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    fn read_block(&mut self, block: u32, buf: &mut [u8]) -> Result<()> {
        if block >= self.superblock.blocks_count {
            return Err(malformed(format!(
                "block {block} is outside the filesystem ({} blocks)",
                self.superblock.blocks_count
            )));
        }
        self.r
            .seek(SeekFrom::Start(self.base + block as u64 * BLOCK_SIZE as u64))?;
        self.r
            .read_exact(buf)
            .map_err(|e| malformed(format!("reading block {block}: {e}")))?;
        Ok(())
    }

    /// Absolute byte position of an inode record in the underlying
    /// stream.
    pub(crate) fn inode_position(&self, ino: u32) -> Result<u64> {
        if ino == 0 || ino > self.superblock.inodes_count {
            return Err(malformed(format!(
                "inode {ino} is out of range (1..={})",
                self.superblock.inodes_count
            )));
        }
        let index = ino - 1;
        let group = (index / self.superblock.inodes_per_group) as usize;
        let slot = index % self.superblock.inodes_per_group;
        let desc = self
            .groups
            .get(group)
            .ok_or_else(|| malformed(format!("inode {ino} points past the last group")))?;
        Ok(self.base
            + desc.inode_table as u64 * BLOCK_SIZE as u64
            + slot as u64 * INODE_SIZE as u64)
    }

    /// Look up an inode by number.
    pub fn resolve_inode(&mut self, ino: u32) -> Result<Inode> {
        let offset = self.inode_position(ino)?;
        let mut raw = [0u8; INODE_SIZE as usize];
        self.r.seek(SeekFrom::Start(offset))?;
        self.r
            .read_exact(&mut raw)
            .map_err(|e| malformed(format!("reading inode {ino}: {e}")))?;
        Inode::decode(&raw).map_err(|e| malformed(e.to_string()))
    }

    /// The ordered data block numbers of an inode, indirect blocks
    /// resolved. Zero entries are holes.
    fn data_blocks(&mut self, inode: &Inode) -> Result<Vec<u32>> {
        let total = super::blocks_for(inode.size as u64) as usize;
        let mut blocks = Vec::with_capacity(total);

        for slot in 0..DIRECT_BLOCKS.min(total) {
            blocks.push(inode.block[slot]);
        }
        for (slot, depth) in [
            (DIRECT_BLOCKS, 1u8),
            (DIRECT_BLOCKS + 1, 2),
            (DIRECT_BLOCKS + 2, 3),
        ] {
            if blocks.len() >= total {
                break;
            }
            self.append_indirect(inode.block[slot], depth, total, &mut blocks)?;
        }
        if blocks.len() < total {
            return Err(malformed(format!(
                "inode needs {total} blocks but only {} are addressable",
                blocks.len()
            )));
        }
        Ok(blocks)
    }

    fn append_indirect(
        &mut self,
        table_block: u32,
        depth: u8,
        total: usize,
        blocks: &mut Vec<u32>,
    ) -> Result<()> {
        if table_block == 0 {
            // A hole covering the whole table.
            let span = (POINTERS_PER_BLOCK as usize).pow(depth as u32);
            let missing = (total - blocks.len()).min(span);
            blocks.resize(blocks.len() + missing, 0);
            return Ok(());
        }
        let mut raw = vec![0u8; BLOCK_SIZE as usize];
        self.read_block(table_block, &mut raw)?;
        for chunk in raw.chunks_exact(4) {
            if blocks.len() >= total {
                break;
            }
            let pointer = u32::from_le_bytes(chunk.try_into().unwrap());
            if depth == 1 {
                blocks.push(pointer);
            } else {
                self.append_indirect(pointer, depth - 1, total, blocks)?;
            }
        }
        Ok(())
    }

    /// Copy an inode's content into `w`, reading exactly the declared
    /// size. Holes read as zeros. Returns the number of bytes written.
    pub fn copy_data<W: Write>(&mut self, inode: &Inode, w: &mut W) -> Result<u64> {
        if inode.has_inline_symlink() {
            let bytes = inode.inline_bytes();
            w.write_all(&bytes[..inode.size as usize])?;
            return Ok(inode.size as u64);
        }
        let blocks = self.data_blocks(inode)?;
        let mut remaining = inode.size as u64;
        let mut buf = vec![0u8; BLOCK_SIZE as usize];
        for block in blocks {
            let take = remaining.min(BLOCK_SIZE as u64) as usize;
            if block == 0 {
                buf[..take].fill(0);
            } else {
                self.read_block(block, &mut buf)?;
            }
            w.write_all(&buf[..take])?;
            remaining -= take as u64;
        }
        Ok(inode.size as u64 - remaining)
    }

    /// An inode's full content as bytes.
    pub fn read_data(&mut self, inode: &Inode) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(inode.size as usize);
        self.copy_data(inode, &mut out)?;
        Ok(out)
    }

    /// List a directory's entries, "." and ".." included.
    pub fn read_dir(&mut self, inode: &Inode) -> Result<Vec<DirEntry>> {
        if !inode.is_directory() {
            return Err(malformed("read_dir on a non-directory inode"));
        }
        let data = self.read_data(inode)?;
        decode_dir_entries(&data).map_err(|e| malformed(e.to_string()))
    }

    /// The target string of a symlink inode.
    pub fn symlink_target(&mut self, inode: &Inode) -> Result<String> {
        if !inode.is_symlink() {
            return Err(malformed("symlink_target on a non-symlink inode"));
        }
        let bytes = self.read_data(inode)?;
        String::from_utf8(bytes).map_err(|_| malformed("symlink target is not UTF-8"))
    }

    /// Resolve an absolute path to an inode number by walking directory
    /// entries component by component.
    pub fn resolve_path(&mut self, path: &str) -> Result<u32> {
        let mut ino = ROOT_INO;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let inode = self.resolve_inode(ino)?;
            if !inode.is_directory() {
                return Err(malformed(format!(
                    "'{component}' looked up inside a non-directory"
                )));
            }
            let entries = self.read_dir(&inode)?;
            ino = entries
                .iter()
                .find(|e| e.name == component)
                .map(|e| e.inode)
                .ok_or_else(|| malformed(format!("no such file or directory: '{path}'")))?;
        }
        Ok(ino)
    }
}
