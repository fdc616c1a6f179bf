//! In-file edit primitives over an open handle: absolute-offset writes,
//! ranged reads, move-within-file and truncation.
//!
//! Every mutation goes through a full read-modify-rewrite of the file
//! content. Blocks already owned by the inode are reused in place; growth
//! allocates the lowest free blocks and shrinkage returns the tail blocks to
//! the bitmap in the same read-modify-write.

use std::str::FromStr;

use blockfs_disk::{Inode, SuperBlock, BLOCK_SIZE, INODE_DIRECT_BLOCKS};

use crate::bitmap::{Bitmap, BitmapKind};
use crate::device::BlockDevice;
use crate::error::FsError;
use crate::inode::{read_inode, write_inode};
use crate::unix_now;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    Append,
}

impl OpenMode {
    /// Whether the host image must be opened read-write for this mode.
    pub fn writable(self) -> bool {
        !matches!(self, OpenMode::Read)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OpenMode::Read => "r",
            OpenMode::Write => "w",
            OpenMode::Append => "a",
        }
    }
}

impl FromStr for OpenMode {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" => Ok(OpenMode::Read),
            "w" => Ok(OpenMode::Write),
            "a" => Ok(OpenMode::Append),
            other => Err(FsError::BadMode(other.to_string())),
        }
    }
}

/// An open file: a handle-owned descriptor on the image plus a cached inode.
///
/// The cache is refreshed from the store at the start of every operation and
/// after every mutation; two handles on the same file (even in different
/// workers) therefore never act on a stale size while the gate is held.
pub struct OpenFile {
    dev: BlockDevice,
    inode_num: u32,
    mode: OpenMode,
    inode: Inode,
    offset: u64,
}

impl OpenFile {
    pub fn new(dev: BlockDevice, inode_num: u32, mode: OpenMode, inode: Inode) -> Self {
        Self {
            dev,
            inode_num,
            mode,
            inode,
            offset: 0,
        }
    }

    pub fn inode_num(&self) -> u32 {
        self.inode_num
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn size(&self) -> u64 {
        self.inode.file_size
    }

    /// Logical offset left behind by the last read or write.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn refresh(&mut self, sb: &SuperBlock) -> Result<(), FsError> {
        self.inode = read_inode(&mut self.dev, sb, self.inode_num)?;
        Ok(())
    }

    /// Reads `len` bytes starting at `start`, stopping early at an
    /// unallocated direct block (sparse-file policy).
    fn read_bytes(&mut self, start: u64, len: u64) -> Result<Vec<u8>, FsError> {
        let mut out = Vec::with_capacity(len as usize);
        let mut pos = start;
        let end = start + len;
        let mut buf = [0u8; BLOCK_SIZE];
        while pos < end {
            let index = (pos / BLOCK_SIZE as u64) as usize;
            if index >= INODE_DIRECT_BLOCKS {
                break;
            }
            let block = self.inode.direct_blocks[index];
            if block == 0 {
                break;
            }
            let in_block = (pos % BLOCK_SIZE as u64) as usize;
            let n = (BLOCK_SIZE - in_block).min((end - pos) as usize);
            self.dev.read_block(block, &mut buf)?;
            out.extend_from_slice(&buf[in_block..in_block + n]);
            pos += n as u64;
        }
        Ok(out)
    }

    /// Replaces the file content with `content`, reusing blocks in place,
    /// allocating growth from the lowest free bits and freeing the tail on
    /// shrinkage. The inode is untouched when the new size is over the
    /// direct-block cap.
    fn rewrite(&mut self, sb: &SuperBlock, content: &[u8]) -> Result<(), FsError> {
        let need = Inode::blocks_needed(content.len() as u64);
        if need > INODE_DIRECT_BLOCKS {
            return Err(FsError::FileTooLarge);
        }

        let mut map = Bitmap::load(&mut self.dev, sb, BitmapKind::Block)?;
        let mut blocks = self.inode.direct_blocks;
        let mut dirty = false;
        for slot in blocks.iter_mut().take(need) {
            if *slot == 0 {
                let index = map.find_first_free().ok_or(FsError::NoSpace)?;
                map.set(index, true);
                *slot = sb.block_for_index(index);
                dirty = true;
            }
        }
        for slot in blocks.iter_mut().skip(need) {
            if *slot != 0 {
                map.set(sb.index_for_block(*slot), false);
                *slot = 0;
                dirty = true;
            }
        }

        for (chunk, &block) in content.chunks(BLOCK_SIZE).zip(&blocks) {
            self.dev.write_block(block, chunk)?;
        }

        self.inode.direct_blocks = blocks;
        self.inode.file_size = content.len() as u64;
        self.inode.modification_time = unix_now();
        if dirty {
            map.store(&mut self.dev, sb)?;
        }
        write_inode(&mut self.dev, sb, self.inode_num, &self.inode)
    }

    /// Writes `text` at absolute position `index`. A gap between the current
    /// end of file and `index` is filled with ASCII spaces; bytes past the
    /// end of the written range are preserved.
    pub fn write_at(&mut self, sb: &SuperBlock, index: u64, text: &[u8]) -> Result<(), FsError> {
        if index.saturating_add(text.len() as u64) > blockfs_disk::MAX_FILE_SIZE {
            return Err(FsError::FileTooLarge);
        }
        self.refresh(sb)?;
        let mut content = self.read_bytes(0, self.inode.file_size)?;
        let index = index as usize;
        if index > content.len() {
            content.resize(index, b' ');
        }
        let overlap = text.len().min(content.len() - index);
        content[index..index + overlap].copy_from_slice(&text[..overlap]);
        content.extend_from_slice(&text[overlap..]);

        self.rewrite(sb, &content)?;
        self.offset = (index + text.len()) as u64;
        Ok(())
    }

    /// Appends `text` at the current end of file.
    pub fn append(&mut self, sb: &SuperBlock, text: &[u8]) -> Result<(), FsError> {
        self.refresh(sb)?;
        self.write_at(sb, self.inode.file_size, text)
    }

    /// Reads `range` (or the whole file when `None`) as UTF-8 text. A start
    /// at or past the end of file yields the empty string; the length is
    /// clamped to the end of file.
    pub fn read_range(
        &mut self,
        sb: &SuperBlock,
        range: Option<(u64, u64)>,
    ) -> Result<String, FsError> {
        self.refresh(sb)?;
        let file_size = self.inode.file_size;
        let (start, len) = match range {
            None => (0, file_size),
            Some((start, _)) if start >= file_size => return Ok(String::new()),
            Some((start, size)) => (start, size.min(file_size - start)),
        };
        let bytes = self.read_bytes(start, len)?;
        self.offset = start + bytes.len() as u64;
        Ok(String::from_utf8(bytes)?)
    }

    /// Removes the `size` bytes at `start` and reinserts them at `target`
    /// (clamped to the remaining length), rewriting the file from offset 0.
    pub fn move_within(
        &mut self,
        sb: &SuperBlock,
        start: u64,
        size: u64,
        target: u64,
    ) -> Result<(), FsError> {
        self.refresh(sb)?;
        let end = start.checked_add(size).ok_or(FsError::InvalidRange)?;
        if end > self.inode.file_size {
            return Err(FsError::InvalidRange);
        }
        let mut content = self.read_bytes(0, self.inode.file_size)?;
        if end as usize > content.len() {
            // Sparse hole inside the range.
            return Err(FsError::InvalidRange);
        }
        let segment: Vec<u8> = content.drain(start as usize..end as usize).collect();
        let target = (target as usize).min(content.len());
        content.splice(target..target, segment);
        self.rewrite(sb, &content)
    }

    /// Shrinks the file to `max_size` bytes, or pads it with ASCII spaces up
    /// to `max_size`. Equal size is a no-op.
    pub fn truncate(&mut self, sb: &SuperBlock, max_size: u64) -> Result<(), FsError> {
        if max_size > blockfs_disk::MAX_FILE_SIZE {
            return Err(FsError::FileTooLarge);
        }
        self.refresh(sb)?;
        let file_size = self.inode.file_size;
        if max_size == file_size {
            return Ok(());
        }
        if max_size < file_size {
            let mut content = self.read_bytes(0, file_size)?;
            content.truncate(max_size as usize);
            self.rewrite(sb, &content)
        } else {
            let pad = vec![b' '; (max_size - file_size) as usize];
            self.write_at(sb, file_size, &pad)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::create_file;
    use crate::format::format;
    use proptest::prelude::*;

    fn fresh_file(content: &[u8]) -> (tempfile::TempDir, SuperBlock, OpenFile) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.img");
        let sb = format(&path, 10).unwrap();

        let mut dev = BlockDevice::open(&path, true).unwrap();
        let slot = create_file(&mut dev, &sb, 0, "f", content).unwrap();
        let inode = read_inode(&mut dev, &sb, slot).unwrap();
        let file = OpenFile::new(dev, slot, OpenMode::Write, inode);
        (dir, sb, file)
    }

    fn block_map_used(file: &mut OpenFile, sb: &SuperBlock) -> usize {
        Bitmap::load(&mut file.dev, sb, BitmapKind::Block)
            .unwrap()
            .count_used()
    }

    #[test]
    fn overwrite_in_the_middle() {
        let (_dir, sb, mut file) = fresh_file(b"hello world");
        file.write_at(&sb, 5, b"_HEY_").unwrap();
        let text = file.read_range(&sb, None).unwrap();
        assert_eq!(text, "hello_HEY_world");
        assert_eq!(file.size(), 15);
    }

    #[test]
    fn write_past_eof_pads_with_spaces() {
        let (_dir, sb, mut file) = fresh_file(b"ab");
        file.write_at(&sb, 5, b"x").unwrap();
        assert_eq!(file.read_range(&sb, None).unwrap(), "ab   x");
    }

    #[test]
    fn write_identity_is_a_no_op() {
        let (_dir, sb, mut file) = fresh_file(b"some stable content");
        let before = file.read_range(&sb, None).unwrap();
        let used = block_map_used(&mut file, &sb);

        file.write_at(&sb, 0, before.as_bytes()).unwrap();
        assert_eq!(file.read_range(&sb, None).unwrap(), before);
        assert_eq!(file.size(), before.len() as u64);
        assert_eq!(block_map_used(&mut file, &sb), used);
    }

    #[test]
    fn growth_allocates_and_straddles_blocks() {
        let (_dir, sb, mut file) = fresh_file(b"");
        let used = block_map_used(&mut file, &sb);

        let text = vec![b'z'; BLOCK_SIZE + 100];
        file.write_at(&sb, 0, &text).unwrap();
        assert_eq!(file.size(), text.len() as u64);
        assert_eq!(block_map_used(&mut file, &sb), used + 2);

        let tail = file
            .read_range(&sb, Some((BLOCK_SIZE as u64 - 5, 10)))
            .unwrap();
        assert_eq!(tail, "zzzzzzzzzz");
    }

    #[test]
    fn oversized_write_leaves_the_inode_alone() {
        let (_dir, sb, mut file) = fresh_file(b"abc");
        let used = block_map_used(&mut file, &sb);
        let text = vec![b'q'; 10 * BLOCK_SIZE + 1];
        assert!(matches!(
            file.write_at(&sb, 0, &text),
            Err(FsError::FileTooLarge)
        ));
        assert_eq!(file.read_range(&sb, None).unwrap(), "abc");
        assert_eq!(file.size(), 3);
        assert_eq!(block_map_used(&mut file, &sb), used);
    }

    #[test]
    fn append_lands_at_the_end() {
        let (_dir, sb, mut file) = fresh_file(b"one");
        file.append(&sb, b" two").unwrap();
        assert_eq!(file.read_range(&sb, None).unwrap(), "one two");
        assert_eq!(file.offset(), 7);
    }

    #[test]
    fn read_clamps_and_empties_past_eof() {
        let (_dir, sb, mut file) = fresh_file(b"0123456789");
        assert_eq!(file.read_range(&sb, Some((10, 4))).unwrap(), "");
        assert_eq!(file.read_range(&sb, Some((200, 4))).unwrap(), "");
        assert_eq!(file.read_range(&sb, Some((6, 4096))).unwrap(), "6789");
        assert_eq!(file.read_range(&sb, Some((2, 3))).unwrap(), "234");
    }

    #[test]
    fn invalid_utf8_is_propagated() {
        let (_dir, sb, mut file) = fresh_file(&[0xff, 0xfe, 0x41]);
        assert!(matches!(
            file.read_range(&sb, None),
            Err(FsError::Utf8(_))
        ));
    }

    #[test]
    fn move_within_relocates_a_segment() {
        let (_dir, sb, mut file) = fresh_file(b"abcdef");
        // Remove "cd", reinsert at the front.
        file.move_within(&sb, 2, 2, 0).unwrap();
        assert_eq!(file.read_range(&sb, None).unwrap(), "cdabef");
        assert_eq!(file.size(), 6);
    }

    #[test]
    fn move_within_clamps_the_target() {
        let (_dir, sb, mut file) = fresh_file(b"abcdef");
        file.move_within(&sb, 0, 2, 999).unwrap();
        assert_eq!(file.read_range(&sb, None).unwrap(), "cdefab");
    }

    #[test]
    fn move_within_round_trips() {
        let (_dir, sb, mut file) = fresh_file(b"the quick brown fox");
        file.move_within(&sb, 4, 6, 10).unwrap();
        file.move_within(&sb, 10, 6, 4).unwrap();
        assert_eq!(file.read_range(&sb, None).unwrap(), "the quick brown fox");
    }

    #[test]
    fn move_within_rejects_out_of_range() {
        let (_dir, sb, mut file) = fresh_file(b"short");
        assert!(matches!(
            file.move_within(&sb, 3, 3, 0),
            Err(FsError::InvalidRange)
        ));
        assert!(matches!(
            file.move_within(&sb, u64::MAX, 2, 0),
            Err(FsError::InvalidRange)
        ));
        assert_eq!(file.read_range(&sb, None).unwrap(), "short");
    }

    #[test]
    fn truncate_shrink_frees_tail_blocks() {
        let content = vec![b'a'; 10241]; // three blocks
        let (_dir, sb, mut file) = fresh_file(&content);
        let used = block_map_used(&mut file, &sb);

        file.truncate(&sb, 5000).unwrap();
        assert_eq!(file.size(), 5000);
        assert_eq!(block_map_used(&mut file, &sb), used - 1);
        assert_eq!(
            file.read_range(&sb, None).unwrap(),
            "a".repeat(5000)
        );
    }

    #[test]
    fn truncate_grow_pads_with_spaces() {
        let (_dir, sb, mut file) = fresh_file(b"ab");
        file.truncate(&sb, 6).unwrap();
        assert_eq!(file.read_range(&sb, None).unwrap(), "ab    ");
    }

    #[test]
    fn truncate_to_same_size_is_idempotent() {
        let (_dir, sb, mut file) = fresh_file(b"stay");
        let used = block_map_used(&mut file, &sb);
        file.truncate(&sb, 4).unwrap();
        file.truncate(&sb, 2).unwrap();
        file.truncate(&sb, 2).unwrap();
        assert_eq!(file.read_range(&sb, None).unwrap(), "st");
        assert_eq!(block_map_used(&mut file, &sb), used);
    }

    #[test]
    fn truncate_to_zero_releases_every_block() {
        let content = vec![b'b'; 2 * BLOCK_SIZE];
        let (_dir, sb, mut file) = fresh_file(&content);
        let used = block_map_used(&mut file, &sb);

        file.truncate(&sb, 0).unwrap();
        assert_eq!(file.size(), 0);
        assert_eq!(file.read_range(&sb, None).unwrap(), "");
        assert_eq!(block_map_used(&mut file, &sb), used - 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn created_content_reads_back(content in "[ -~]{0,8192}") {
            let (_dir, sb, mut file) = fresh_file(content.as_bytes());
            prop_assert_eq!(file.read_range(&sb, None).unwrap(), content);
        }
    }
}
