//! Filesystem layout engine.
//!
//! Given a package file tree and a target capacity, deterministically
//! allocates inodes and blocks and writes a complete filesystem image:
//! superblock and group descriptors (with backups in every group), block
//! and inode bitmaps, inode tables, directory data, and file data with
//! direct, single-indirect and double-indirect pointers. Inode numbers and
//! block addresses depend only on the tree, so the same input produces the
//! same image.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom, Write};

use super::{
    blocks_for, encode_dir_entries, file_type, GroupDesc, Inode, Superblock, BLOCKS_PER_GROUP,
    BLOCK_SIZE, DIRECT_BLOCKS, FIRST_FREE_INO, INLINE_SYMLINK_MAX, INODE_SIZE,
    MAX_INODES_PER_GROUP, MAX_NAME_LEN, POINTERS_PER_BLOCK, RESERVED_INODES, ROOT_INO,
};
use crate::error::BuildError;
use crate::package::{Entry, FileSource, FileTree};

/// Parameters for one layout run.
#[derive(Debug, Clone)]
pub struct LayoutOptions {
    /// Image capacity in bytes. The filesystem fills the whole capacity,
    /// rounded down to a whole block.
    pub capacity: u64,
    /// Minimum number of inodes. The actual count is rounded up to the
    /// group geometry.
    pub inode_count: Option<u32>,
    /// Creation/modification time stamped on every inode. Access times
    /// are left at zero: a freshly built image has never been run.
    pub timestamp: u32,
}

enum NodeKind<'a> {
    Directory,
    File(&'a FileSource),
    Symlink(&'a str),
}

struct Node<'a> {
    ino: u32,
    kind: NodeKind<'a>,
    links: u16,
    /// Serialized directory entries (directories only).
    dir_data: Vec<u8>,
    size: u64,
    data_blocks: u64,
    pointer_blocks: u64,
}

/// Write a filesystem image for `tree` into `w`. Returns the number of
/// bytes the filesystem occupies.
pub fn write_filesystem<W: Write + Seek>(
    w: &mut W,
    tree: &FileTree,
    opts: &LayoutOptions,
) -> Result<u64> {
    let bs = BLOCK_SIZE as u64;

    validate_names(tree)?;
    let inos = assign_inodes(tree);
    let nodes = plan_nodes(tree, &inos)?;

    let needed_data: u64 = nodes
        .iter()
        .map(|n| n.data_blocks + n.pointer_blocks)
        .sum();

    // Geometry.
    let blocks_count = (opts.capacity / bs) as u32;
    if blocks_count < 2 {
        return Err(size_exceeded(needed_data, 1, 8, opts.capacity));
    }
    let groups = (blocks_count - 1).div_ceil(BLOCKS_PER_GROUP);
    let wanted_inodes = opts
        .inode_count
        .unwrap_or(0)
        .max(RESERVED_INODES + (nodes.len() as u32 - 1))
        .max(16);
    let inodes_per_group = wanted_inodes.div_ceil(groups).next_multiple_of(8);
    if inodes_per_group > MAX_INODES_PER_GROUP {
        bail!(
            "inode count {wanted_inodes} does not fit in {groups} block group(s) \
             (at most {} per group)",
            MAX_INODES_PER_GROUP
        );
    }
    let inodes_count = inodes_per_group * groups;
    let gdt_blocks = (groups * GroupDesc::SIZE as u32).div_ceil(BLOCK_SIZE);
    let itable_blocks = inodes_per_group / 8;
    let overhead = 1 + gdt_blocks + 2 + itable_blocks;

    // Per-group data ranges.
    let mut group_ranges = Vec::with_capacity(groups as usize);
    let mut available = 0u64;
    for g in 0..groups {
        let start = 1 + g * BLOCKS_PER_GROUP;
        let end = (start + BLOCKS_PER_GROUP).min(blocks_count);
        let data_start = start + overhead;
        if data_start > end {
            return Err(size_exceeded(needed_data, groups, overhead, opts.capacity));
        }
        available += (end - data_start) as u64;
        group_ranges.push((start, data_start, end));
    }
    if needed_data > available {
        return Err(size_exceeded(needed_data, groups, overhead, opts.capacity));
    }

    // Allocate and write node data.
    let mut alloc = Allocator {
        ranges: &group_ranges,
        used: vec![0u32; groups as usize],
        current: 0,
    };
    let mut inode_records: BTreeMap<u32, Inode> = BTreeMap::new();
    for node in &nodes {
        let mut inode = match &node.kind {
            NodeKind::Directory => {
                Inode::directory(node.size as u32, node.links, opts.timestamp)
            }
            NodeKind::File(_) => Inode::regular(node.size as u32, 0o755, opts.timestamp),
            NodeKind::Symlink(_) => Inode::symlink(node.size as u32, opts.timestamp),
        };

        match &node.kind {
            NodeKind::Directory => {
                let placed =
                    write_data(w, &mut alloc, &mut node.dir_data.as_slice(), node.size)?;
                placed.apply(&mut inode);
            }
            NodeKind::File(source) => {
                let mut reader = source.open()?;
                let placed = write_data(w, &mut alloc, &mut reader, node.size)?;
                placed.apply(&mut inode);
            }
            NodeKind::Symlink(target) => {
                if (target.len()) < INLINE_SYMLINK_MAX {
                    inode.set_inline_bytes(target.as_bytes());
                } else {
                    let placed =
                        write_data(w, &mut alloc, &mut target.as_bytes(), node.size)?;
                    placed.apply(&mut inode);
                }
            }
        }
        inode_records.insert(node.ino, inode);
    }

    // Metadata: bitmaps, inode tables, superblock and descriptor copies.
    let used_inodes = RESERVED_INODES + (nodes.len() as u32 - 1);
    let mut descriptors = Vec::with_capacity(groups as usize);
    for (g, &(start, data_start, end)) in group_ranges.iter().enumerate() {
        let used_data = alloc.used[g];
        let dirs_in_group = nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Directory))
            .filter(|n| (n.ino - 1) / inodes_per_group == g as u32)
            .count() as u16;
        let inos_in_group = {
            let first = g as u32 * inodes_per_group + 1;
            let last = first + inodes_per_group - 1;
            used_inodes.min(last).saturating_sub(first - 1) as u16
        };
        descriptors.push(GroupDesc {
            block_bitmap: start + 1 + gdt_blocks,
            inode_bitmap: start + 2 + gdt_blocks,
            inode_table: start + 3 + gdt_blocks,
            free_blocks_count: ((end - data_start) - used_data) as u16,
            free_inodes_count: (inodes_per_group as u16) - inos_in_group,
            used_dirs_count: dirs_in_group,
        });
    }

    let mut gdt_bytes = vec![0u8; (gdt_blocks * BLOCK_SIZE) as usize];
    for (g, desc) in descriptors.iter().enumerate() {
        gdt_bytes[g * GroupDesc::SIZE..(g + 1) * GroupDesc::SIZE]
            .copy_from_slice(&desc.encode());
    }

    let superblock = Superblock {
        inodes_count,
        blocks_count,
        free_blocks_count: (available - needed_data) as u32,
        free_inodes_count: inodes_count - used_inodes,
        first_data_block: 1,
        blocks_per_group: BLOCKS_PER_GROUP,
        inodes_per_group,
        wtime: opts.timestamp,
    };

    for (g, &(start, _, end)) in group_ranges.iter().enumerate() {
        // Superblock copy and descriptor table.
        write_block(w, start, &superblock.encode(g as u16))?;
        write_block(w, start + 1, &gdt_bytes)?;

        // Block bitmap: metadata, the used-data prefix, and the padding
        // bits past the end of the filesystem are all marked in-use.
        let mut bitmap = vec![0u8; BLOCK_SIZE as usize];
        let in_use = overhead + alloc.used[g];
        set_bit_range(&mut bitmap, 0, in_use);
        set_bit_range(&mut bitmap, end - start, BLOCKS_PER_GROUP);
        write_block(w, descriptors[g].block_bitmap, &bitmap)?;

        // Inode bitmap: the used range is contiguous from inode 1.
        let mut bitmap = vec![0u8; BLOCK_SIZE as usize];
        let first = g as u32 * inodes_per_group + 1;
        let used_here = used_inodes
            .min(first + inodes_per_group - 1)
            .saturating_sub(first - 1);
        set_bit_range(&mut bitmap, 0, used_here);
        set_bit_range(&mut bitmap, inodes_per_group, MAX_INODES_PER_GROUP);
        write_block(w, descriptors[g].inode_bitmap, &bitmap)?;

        // Inode table.
        let mut table = vec![0u8; (itable_blocks * BLOCK_SIZE) as usize];
        let last = first + inodes_per_group - 1;
        for (ino, inode) in inode_records.range(first..=last) {
            let at = ((ino - first) * INODE_SIZE) as usize;
            table[at..at + INODE_SIZE as usize].copy_from_slice(&inode.encode());
        }
        write_block(w, descriptors[g].inode_table, &table)?;
    }

    // Make the image exactly as long as the filesystem claims to be.
    let total = blocks_count as u64 * bs;
    let current = w.seek(SeekFrom::End(0))?;
    if current < total {
        w.seek(SeekFrom::Start(total - 1))?;
        w.write_all(&[0])?;
    }
    Ok(total)
}

fn size_exceeded(needed_data: u64, groups: u32, overhead: u32, capacity: u64) -> anyhow::Error {
    let needed = (1 + groups as u64 * overhead as u64 + needed_data) * BLOCK_SIZE as u64;
    BuildError::SizeExceeded { needed, capacity }.into()
}

fn validate_names(tree: &FileTree) -> Result<()> {
    for (path, _) in tree.iter() {
        let name = path.rsplit('/').next().unwrap_or(path);
        if name.len() > MAX_NAME_LEN {
            return Err(BuildError::InvalidName {
                name: name.to_string(),
                reason: format!("longer than {MAX_NAME_LEN} bytes"),
            }
            .into());
        }
        if name.bytes().any(|b| b == 0) {
            return Err(BuildError::InvalidName {
                name: name.to_string(),
                reason: "contains a NUL byte".to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// Root gets inode 2; everything else is numbered from 11 in tree order.
fn assign_inodes(tree: &FileTree) -> BTreeMap<String, u32> {
    let mut inos = BTreeMap::new();
    inos.insert(String::new(), ROOT_INO);
    let mut next = FIRST_FREE_INO;
    for (path, _) in tree.iter() {
        inos.insert(path.to_string(), next);
        next += 1;
    }
    inos
}

fn plan_nodes<'a>(tree: &'a FileTree, inos: &BTreeMap<String, u32>) -> Result<Vec<Node<'a>>> {
    let mut nodes = Vec::with_capacity(tree.len() + 1);
    nodes.push(plan_directory(tree, inos, "")?);
    for (path, entry) in tree.iter() {
        let ino = inos[path];
        let node = match entry {
            Entry::Directory => plan_directory(tree, inos, path)?,
            Entry::File(source) => {
                let size = source.len()?;
                if size > u32::MAX as u64 {
                    bail!("file '/{path}' is larger than the filesystem supports");
                }
                let data_blocks = blocks_for(size);
                Node {
                    ino,
                    kind: NodeKind::File(source),
                    links: 1,
                    dir_data: Vec::new(),
                    size,
                    data_blocks,
                    pointer_blocks: pointer_blocks(data_blocks)
                        .with_context(|| format!("laying out '/{path}'"))?,
                }
            }
            Entry::Symlink(target) => {
                if target.len() > BLOCK_SIZE as usize {
                    bail!(
                        "symlink '/{path}' target is {} bytes; at most {} supported",
                        target.len(),
                        BLOCK_SIZE
                    );
                }
                let data_blocks = if target.len() < INLINE_SYMLINK_MAX { 0 } else { 1 };
                Node {
                    ino,
                    kind: NodeKind::Symlink(target),
                    links: 1,
                    dir_data: Vec::new(),
                    size: target.len() as u64,
                    data_blocks,
                    pointer_blocks: 0,
                }
            }
        };
        nodes.push(node);
    }
    Ok(nodes)
}

fn plan_directory<'a>(
    tree: &'a FileTree,
    inos: &BTreeMap<String, u32>,
    path: &str,
) -> Result<Node<'a>> {
    let ino = inos[path];
    let parent_ino = if path.is_empty() {
        ROOT_INO
    } else {
        let parent = path.rfind('/').map(|at| &path[..at]).unwrap_or("");
        inos[parent]
    };

    let mut entries: Vec<(u32, u8, &str)> = vec![
        (ino, file_type::DIRECTORY, "."),
        (parent_ino, file_type::DIRECTORY, ".."),
    ];
    let mut subdirs = 0u16;
    let children = tree.children(path);
    for (name, entry) in &children {
        let child_path = if path.is_empty() {
            name.to_string()
        } else {
            format!("{path}/{name}")
        };
        let child_ino = inos[child_path.as_str()];
        let ftype = match entry {
            Entry::Directory => {
                subdirs += 1;
                file_type::DIRECTORY
            }
            Entry::File(_) => file_type::REGULAR,
            Entry::Symlink(_) => file_type::SYMLINK,
        };
        entries.push((child_ino, ftype, name));
    }

    let dir_data = encode_dir_entries(&entries);
    let size = dir_data.len() as u64;
    let data_blocks = blocks_for(size);
    Ok(Node {
        ino,
        kind: NodeKind::Directory,
        links: 2 + subdirs,
        dir_data,
        size,
        data_blocks,
        pointer_blocks: pointer_blocks(data_blocks)
            .with_context(|| format!("laying out directory '/{path}'"))?,
    })
}

/// Indirect-block overhead for a given data block count: one table per
/// started single-indirect tier, plus the intermediate tables of the
/// double and triple tiers.
fn pointer_blocks(data_blocks: u64) -> Result<u64> {
    let direct = DIRECT_BLOCKS as u64;
    let per = POINTERS_PER_BLOCK as u64;
    let single_span = per;
    let double_span = per * per;
    let triple_span = per * per * per;

    let mut rest = data_blocks.saturating_sub(direct);
    let mut tables = 0u64;
    if rest == 0 {
        return Ok(0);
    }

    // Single indirect.
    tables += 1;
    rest = rest.saturating_sub(single_span);
    if rest == 0 {
        return Ok(tables);
    }

    // Double indirect.
    let in_double = rest.min(double_span);
    tables += 1 + in_double.div_ceil(per);
    rest -= in_double;
    if rest == 0 {
        return Ok(tables);
    }

    // Triple indirect.
    if rest > triple_span {
        bail!(
            "content of {data_blocks} blocks exceeds the triple-indirect limit of {} blocks",
            direct + single_span + double_span + triple_span
        );
    }
    tables += 1 + rest.div_ceil(double_span) + rest.div_ceil(per);
    Ok(tables)
}

struct Allocator<'a> {
    ranges: &'a [(u32, u32, u32)],
    used: Vec<u32>,
    current: usize,
}

impl Allocator<'_> {
    fn next(&mut self) -> u32 {
        loop {
            let (_, data_start, end) = self.ranges[self.current];
            let used = self.used[self.current];
            if data_start + used < end {
                self.used[self.current] += 1;
                return data_start + used;
            }
            self.current += 1;
        }
    }
}

struct PlacedData {
    slots: [u32; super::INODE_BLOCK_SLOTS],
    sectors: u32,
}

impl PlacedData {
    fn apply(self, inode: &mut Inode) {
        inode.block = self.slots;
        inode.sectors = self.sectors;
    }
}

/// Stream `len` bytes from `r` into newly allocated blocks, then build
/// the inode pointer structure (direct, single, double, and triple
/// indirect) over the allocated block list.
fn write_data<W: Write + Seek>(
    w: &mut W,
    alloc: &mut Allocator<'_>,
    r: &mut dyn Read,
    len: u64,
) -> Result<PlacedData> {
    let bs = BLOCK_SIZE as u64;
    let total = blocks_for(len);
    let per = POINTERS_PER_BLOCK as u64;

    let mut data_blocks = Vec::with_capacity(total as usize);
    let mut buf = vec![0u8; BLOCK_SIZE as usize];
    for i in 0..total {
        let want = (len - i * bs).min(bs) as usize;
        r.read_exact(&mut buf[..want])
            .context("content ended before its declared size")?;
        buf[want..].fill(0);
        let block = alloc.next();
        write_block(w, block, &buf)?;
        data_blocks.push(block);
    }

    let mut slots = [0u32; super::INODE_BLOCK_SLOTS];
    let mut pointer_block_count = 0u64;
    let direct_take = data_blocks.len().min(DIRECT_BLOCKS);
    slots[..direct_take].copy_from_slice(&data_blocks[..direct_take]);

    let mut rest = &data_blocks[direct_take..];
    for (slot, depth) in [
        (DIRECT_BLOCKS, 1u32),
        (DIRECT_BLOCKS + 1, 2),
        (DIRECT_BLOCKS + 2, 3),
    ] {
        if rest.is_empty() {
            break;
        }
        let span = (per as usize).pow(depth).min(rest.len());
        let (tier, remaining) = rest.split_at(span);
        slots[slot] = write_pointer_tree(w, alloc, tier, depth, &mut pointer_block_count)?;
        rest = remaining;
    }
    if !rest.is_empty() {
        bail!(
            "content of {total} blocks exceeds the triple-indirect limit of {} blocks",
            DIRECT_BLOCKS as u64 + per + per * per + per * per * per
        );
    }

    Ok(PlacedData {
        slots,
        sectors: ((total + pointer_block_count) * (BLOCK_SIZE as u64 / 512)) as u32,
    })
}

/// Write the pointer table tree for one indirection tier and return the
/// tier's root block.
fn write_pointer_tree<W: Write + Seek>(
    w: &mut W,
    alloc: &mut Allocator<'_>,
    blocks: &[u32],
    depth: u32,
    pointer_block_count: &mut u64,
) -> Result<u32> {
    let per = POINTERS_PER_BLOCK as usize;
    let pointers: Vec<u32> = if depth == 1 {
        blocks.to_vec()
    } else {
        let child_span = per.pow(depth - 1);
        let mut children = Vec::with_capacity(blocks.len().div_ceil(child_span));
        for chunk in blocks.chunks(child_span) {
            children.push(write_pointer_tree(w, alloc, chunk, depth - 1, pointer_block_count)?);
        }
        children
    };

    let root = alloc.next();
    *pointer_block_count += 1;
    let mut table = vec![0u8; BLOCK_SIZE as usize];
    for (slot, pointer) in pointers.iter().enumerate() {
        table[slot * 4..slot * 4 + 4].copy_from_slice(&pointer.to_le_bytes());
    }
    write_block(w, root, &table)?;
    Ok(root)
}

fn write_block<W: Write + Seek>(w: &mut W, block: u32, data: &[u8]) -> Result<()> {
    w.seek(SeekFrom::Start(block as u64 * BLOCK_SIZE as u64))?;
    w.write_all(data)?;
    Ok(())
}

/// Set bits [from, to) in a little-endian bitmap.
fn set_bit_range(bitmap: &mut [u8], from: u32, to: u32) {
    for bit in from..to {
        bitmap[(bit / 8) as usize] |= 1 << (bit % 8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ext2::reader::Filesystem;
    use std::io::Cursor;

    fn build(tree: &FileTree, capacity: u64) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let opts = LayoutOptions {
            capacity,
            inode_count: None,
            timestamp: 1_700_000_000,
        };
        write_filesystem(&mut cursor, tree, &opts).unwrap();
        cursor.into_inner()
    }

    #[test]
    fn empty_tree_produces_valid_filesystem() {
        let tree = FileTree::new();
        let image = build(&tree, 1 << 20);
        assert_eq!(image.len(), 1 << 20);

        let mut fs = Filesystem::open(Cursor::new(image), 0).unwrap();
        let root = fs.resolve_inode(ROOT_INO).unwrap();
        assert!(root.is_directory());
        let entries = fs.read_dir(&root).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![".", ".."]);
    }

    #[test]
    fn files_round_trip_through_the_reader() {
        let mut tree = FileTree::new();
        tree.insert_file("bin/app", FileSource::Bytes(b"hello world".to_vec()))
            .unwrap();
        // Spans the direct/indirect boundary.
        let big: Vec<u8> = (0..40_000u32).flat_map(|i| i.to_le_bytes()).collect();
        tree.insert_file("data/big.bin", FileSource::Bytes(big.clone()))
            .unwrap();
        tree.insert_symlink("bin/alias", "app").unwrap();
        tree.insert_symlink(
            "bin/longlink",
            &"../".repeat(40), // 120 bytes: stored in a data block
        )
        .unwrap();

        let image = build(&tree, 4 << 20);
        let mut fs = Filesystem::open(Cursor::new(image), 0).unwrap();

        let ino = fs.resolve_path("/bin/app").unwrap();
        let inode = fs.resolve_inode(ino).unwrap();
        assert!(inode.is_regular());
        assert_eq!(fs.read_data(&inode).unwrap(), b"hello world");

        let ino = fs.resolve_path("/data/big.bin").unwrap();
        let inode = fs.resolve_inode(ino).unwrap();
        assert_eq!(inode.size as usize, big.len());
        assert_eq!(fs.read_data(&inode).unwrap(), big);

        let ino = fs.resolve_path("/bin/alias").unwrap();
        let inode = fs.resolve_inode(ino).unwrap();
        assert!(inode.is_symlink());
        assert_eq!(fs.symlink_target(&inode).unwrap(), "app");

        let ino = fs.resolve_path("/bin/longlink").unwrap();
        let inode = fs.resolve_inode(ino).unwrap();
        assert_eq!(fs.symlink_target(&inode).unwrap(), "../".repeat(40));
    }

    #[test]
    fn double_indirect_files_round_trip() {
        // 300 KiB needs 300 blocks: direct (12) + single (256) + double.
        let big: Vec<u8> = (0..300 * 1024u32).map(|i| (i % 251) as u8).collect();
        let mut tree = FileTree::new();
        tree.insert_file("big", FileSource::Bytes(big.clone())).unwrap();

        let image = build(&tree, 2 << 20);
        let mut fs = Filesystem::open(Cursor::new(image), 0).unwrap();
        let ino = fs.resolve_path("/big").unwrap();
        let inode = fs.resolve_inode(ino).unwrap();
        assert_eq!(fs.read_data(&inode).unwrap(), big);
    }

    #[test]
    fn capacity_overflow_is_size_exceeded() {
        let mut tree = FileTree::new();
        tree.insert_file("big", FileSource::Bytes(vec![7u8; 512 * 1024]))
            .unwrap();
        let mut cursor = Cursor::new(Vec::new());
        let err = write_filesystem(
            &mut cursor,
            &tree,
            &LayoutOptions {
                capacity: 256 * 1024,
                inode_count: None,
                timestamp: 0,
            },
        )
        .unwrap_err();
        let kind = err.downcast_ref::<BuildError>();
        assert!(
            matches!(kind, Some(BuildError::SizeExceeded { .. })),
            "unexpected error: {err:#}"
        );
    }

    #[test]
    fn oversized_names_are_invalid() {
        let mut tree = FileTree::new();
        let name = "x".repeat(300);
        tree.insert_file(&name, FileSource::Bytes(vec![])).unwrap();
        let mut cursor = Cursor::new(Vec::new());
        let err = write_filesystem(
            &mut cursor,
            &tree,
            &LayoutOptions {
                capacity: 1 << 20,
                inode_count: None,
                timestamp: 0,
            },
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::InvalidName { .. })
        ));
    }

    #[test]
    fn multiple_block_groups() {
        // 16 MiB at 1 KiB blocks = 16384 blocks = 2 groups.
        let mut tree = FileTree::new();
        tree.insert_file("a", FileSource::Bytes(vec![1u8; 3000])).unwrap();
        let image = build(&tree, 16 << 20);
        let mut fs = Filesystem::open(Cursor::new(image), 0).unwrap();
        assert_eq!(fs.superblock().group_count(), 2);
        let ino = fs.resolve_path("/a").unwrap();
        let inode = fs.resolve_inode(ino).unwrap();
        assert_eq!(fs.read_data(&inode).unwrap(), vec![1u8; 3000]);
    }

    #[test]
    fn free_space_accounting_is_consistent() {
        let mut tree = FileTree::new();
        tree.insert_file("f", FileSource::Bytes(vec![9u8; 2048])).unwrap();
        let image = build(&tree, 1 << 20);
        let fs = Filesystem::open(Cursor::new(image), 0).unwrap();
        let sb = fs.superblock();
        assert!(sb.free_blocks_count > 0);
        assert!(sb.free_blocks_count < sb.blocks_count);
        // Root (reserved range) plus one file.
        assert_eq!(sb.free_inodes_count, sb.inodes_count - RESERVED_INODES - 1);
    }
}
