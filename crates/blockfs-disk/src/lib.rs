//! On-disk record formats for blockfs images.
//!
//! Every record is encoded with bincode using fixed-width integers, so each
//! field has a deterministic size and offset. Records are zero-padded to their
//! region (block or inode slot) on write, and a fully zeroed region decodes to
//! the record's default value: an empty directory, or an inode with no size
//! and no allocated blocks.

use serde::{Deserialize, Serialize};

pub const BLOCK_SIZE: usize = 4096;
pub const MAGIC: u32 = 0x424C_4653; // "BLFS"
pub const INODE_SIZE: usize = 256;
pub const INODE_DIRECT_BLOCKS: usize = 10;
pub const TOTAL_INODES: u32 = 128;

/// Largest file the direct pointers can address.
pub const MAX_FILE_SIZE: u64 = (INODE_DIRECT_BLOCKS * BLOCK_SIZE) as u64;

// Image geometry. The superblock records these so readers never have to
// hard-code them, but the formatter always lays images out this way:
// block 0 superblock, block 1 inode bitmap, blocks 2-9 inode table
// (128 slots of 256 bytes), block 10 data-block bitmap, data from block 11.
pub const INODE_BITMAP_BLOCK: u32 = 1;
pub const INODE_TABLE_BLOCK: u32 = 2;
pub const FREE_SPACE_MAP_BLOCK: u32 =
    INODE_TABLE_BLOCK + (TOTAL_INODES * INODE_SIZE as u32) / BLOCK_SIZE as u32;

fn config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_fixed_int_encoding()
        .with_limit::<BLOCK_SIZE>()
}

/// Encodes `value` into `dst`, which must already be zeroed. Returns the
/// number of bytes written; the remainder of `dst` is the padding.
pub fn encode<T: Serialize>(
    value: &T,
    dst: &mut [u8],
) -> Result<usize, bincode::error::EncodeError> {
    bincode::serde::encode_into_slice(value, dst, config())
}

pub fn decode<T: serde::de::DeserializeOwned>(
    src: &[u8],
) -> Result<T, bincode::error::DecodeError> {
    bincode::serde::decode_from_slice(src, config()).map(|(value, _)| value)
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    pub magic: u32,
    pub block_size: u32,
    pub total_blocks: u32,
    pub total_inodes: u32,
    pub inode_table_start: u32,
    pub inode_bitmap_start: u32,
    pub free_space_map_start: u32,
    pub root_dir_inode: u32,
}

impl SuperBlock {
    pub fn for_image(total_blocks: u32) -> Self {
        Self {
            magic: MAGIC,
            block_size: BLOCK_SIZE as u32,
            total_blocks,
            total_inodes: TOTAL_INODES,
            inode_table_start: INODE_TABLE_BLOCK,
            inode_bitmap_start: INODE_BITMAP_BLOCK,
            free_space_map_start: FREE_SPACE_MAP_BLOCK,
            root_dir_inode: 0,
        }
    }

    /// First block usable for file or directory data.
    pub fn data_start(&self) -> u32 {
        self.free_space_map_start + 1
    }

    /// Number of data blocks the image holds, bounded by what one bitmap
    /// block can address.
    pub fn data_block_count(&self) -> u32 {
        self.total_blocks
            .saturating_sub(self.data_start())
            .min(BLOCK_SIZE as u32)
    }

    /// Maps a data-block bitmap index to the absolute block number.
    pub fn block_for_index(&self, index: u32) -> u32 {
        index + self.free_space_map_start + 1
    }

    /// Inverse of [`SuperBlock::block_for_index`].
    pub fn index_for_block(&self, block: u32) -> u32 {
        block - self.free_space_map_start - 1
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    pub file_size: u64,
    pub is_directory: bool,
    pub creation_time: u64,
    pub modification_time: u64,
    /// Direct block pointers; 0 means unallocated (block 0 is the
    /// superblock, never file data).
    pub direct_blocks: [u32; INODE_DIRECT_BLOCKS],
}

impl Default for Inode {
    fn default() -> Self {
        Self {
            file_size: 0,
            is_directory: false,
            creation_time: 0,
            modification_time: 0,
            direct_blocks: [0; INODE_DIRECT_BLOCKS],
        }
    }
}

impl Inode {
    pub fn new_file(now: u64) -> Self {
        Self {
            creation_time: now,
            modification_time: now,
            ..Self::default()
        }
    }

    pub fn new_directory(now: u64, first_block: u32) -> Self {
        let mut inode = Self::new_file(now);
        inode.is_directory = true;
        inode.direct_blocks[0] = first_block;
        inode
    }

    /// Number of direct blocks a file of `len` bytes occupies.
    pub fn blocks_needed(len: u64) -> usize {
        len.div_ceil(BLOCK_SIZE as u64) as usize
    }

    pub fn allocated_blocks(&self) -> impl Iterator<Item = u32> + '_ {
        self.direct_blocks.iter().copied().filter(|&b| b != 0)
    }
}

/// One entry in a directory's serialized entry list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub inode: u32,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, inode: u32) -> Self {
        Self {
            name: name.into(),
            inode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zeroed_slot_decodes_to_default_inode() {
        let slot = [0u8; INODE_SIZE];
        let inode: Inode = decode(&slot).unwrap();
        assert_eq!(inode, Inode::default());
    }

    #[test]
    fn zeroed_block_decodes_to_empty_directory() {
        let block = [0u8; BLOCK_SIZE];
        let entries: Vec<DirEntry> = decode(&block).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn superblock_round_trip() {
        let sb = SuperBlock::for_image(2560);
        let mut block = [0u8; BLOCK_SIZE];
        encode(&sb, &mut block).unwrap();
        assert_eq!(decode::<SuperBlock>(&block).unwrap(), sb);
    }

    #[test]
    fn geometry_regions_do_not_overlap() {
        let sb = SuperBlock::for_image(2560);
        let table_blocks = (sb.total_inodes * INODE_SIZE as u32) / BLOCK_SIZE as u32;
        assert!(sb.inode_bitmap_start < sb.inode_table_start);
        assert_eq!(sb.free_space_map_start, sb.inode_table_start + table_blocks);
        assert_eq!(sb.data_start(), sb.free_space_map_start + 1);
        assert_eq!(sb.index_for_block(sb.block_for_index(7)), 7);
    }

    proptest! {
        #[test]
        fn inode_round_trip_fits_a_slot(
            file_size in 0..=MAX_FILE_SIZE,
            is_directory: bool,
            creation_time: u64,
            modification_time: u64,
            direct_blocks: [u32; INODE_DIRECT_BLOCKS],
        ) {
            let inode = Inode {
                file_size,
                is_directory,
                creation_time,
                modification_time,
                direct_blocks,
            };
            let mut slot = [0u8; INODE_SIZE];
            let written = encode(&inode, &mut slot).unwrap();
            prop_assert!(written <= INODE_SIZE);
            prop_assert_eq!(decode::<Inode>(&slot).unwrap(), inode);
        }

        #[test]
        fn directory_round_trip(
            names in proptest::collection::vec("[a-zA-Z0-9_.]{1,24}", 0..32),
        ) {
            let entries: Vec<DirEntry> = names
                .iter()
                .enumerate()
                .map(|(i, name)| DirEntry::new(name.clone(), i as u32))
                .collect();
            let mut block = [0u8; BLOCK_SIZE];
            encode(&entries, &mut block).unwrap();
            prop_assert_eq!(decode::<Vec<DirEntry>>(&block).unwrap(), entries);
        }
    }
}
