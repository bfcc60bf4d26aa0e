use std::cmp::Ordering;

use bincode::{
    de::Decoder,
    enc::Encoder,
    error::{DecodeError, EncodeError},
    Decode, Encode,
};
use consts::*;

pub mod consts;

/// Seconds since 1904-01-01 00:00 GMT.
pub type DateTime = u32;

/// Catalog node ID
pub type CatalogNodeId = u32;

#[derive(bincode::Decode, bincode::Encode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BtNodeDescriptor {
    pub forward_link: u32,
    pub backward_link: u32,
    pub kind: i8,
    pub height: u8,
    pub num_records: u16,
    pub reserved: u16,
}

#[derive(bincode::Decode, bincode::Encode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BtHeaderRec {
    pub tree_depth: u16,
    pub root_node: u32,
    pub leaf_records: u32,
    pub first_leaf_node: u32,
    pub last_leaf_node: u32,
    pub node_size: u16,
    pub max_key_length: u16,
    pub total_nodes: u32,
    pub free_nodes: u32,
    pub reserved1: u16,
    pub clump_size: u32,
    pub btree_type: u8,
    pub key_compare_type: u8,
    pub attributes: u32,
    pub reserved3: [u32; 16],
}

/// `HFSUniStr255`: a length-prefixed run of UTF-16 code units. Only `length`
/// units are stored on disk, so it cannot be a fixed array.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HfsUniStr(pub Vec<u16>);

#[derive(bincode::Decode, bincode::Encode, Debug, Clone, PartialEq, Eq)]
pub struct CatalogKey {
    pub key_length: u16,
    pub parent_id: CatalogNodeId,
    pub node_name: HfsUniStr,
}

#[derive(bincode::Decode, bincode::Encode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BsdInfo {
    pub owner_id: u32,
    pub group_id: u32,
    pub admin_flags: u8,
    pub owner_flags: u8,
    pub file_mode: u16,
    /// Link reference count, hard link count or raw device number.
    pub special: u32,
}

#[derive(bincode::Decode, bincode::Encode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogFolder {
    pub record_type: u16,
    pub flags: u16,
    pub valence: u32,
    pub folder_id: CatalogNodeId,
    pub create_date: DateTime,
    pub content_mod_date: DateTime,
    pub attribute_mod_date: DateTime,
    pub access_date: DateTime,
    pub backup_date: DateTime,
    pub permissions: BsdInfo,
    pub user_info: [u8; 16],
    pub finder_info: [u8; 16],
    pub text_encoding: u32,
    pub reserved: u32,
}

#[derive(bincode::Decode, bincode::Encode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogFile {
    pub record_type: u16,
    pub flags: u16,
    pub reserved1: u32,
    pub file_id: CatalogNodeId,
    pub create_date: DateTime,
    pub content_mod_date: DateTime,
    pub attribute_mod_date: DateTime,
    pub access_date: DateTime,
    pub backup_date: DateTime,
    pub permissions: BsdInfo,
    pub user_info: [u8; 16],
    pub finder_info: [u8; 16],
    pub text_encoding: u32,
    pub reserved2: u32,
    pub data_fork: ForkData,
    pub resource_fork: ForkData,
}

#[derive(bincode::Decode, bincode::Encode, Debug, Clone, PartialEq, Eq)]
pub struct CatalogThread {
    pub record_type: u16,
    pub reserved: u16,
    pub parent_id: CatalogNodeId,
    pub node_name: HfsUniStr,
}

#[derive(bincode::Decode, bincode::Encode, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtentDescriptor {
    pub start_block: u32,
    pub block_count: u32,
}

pub type ExtentRecord = [ExtentDescriptor; EXTENT_DENSITY];

#[derive(bincode::Decode, bincode::Encode, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForkData {
    pub logical_size: u64,
    pub clump_size: u32,
    pub total_blocks: u32,
    pub extents: ExtentRecord,
}

#[derive(bincode::Decode, bincode::Encode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentKey {
    pub key_length: u16,
    pub fork_type: u8,
    pub pad: u8,
    pub file_id: CatalogNodeId,
    pub start_block: u32,
}

#[derive(bincode::Decode, bincode::Encode, Debug, Clone, Copy)]
pub struct VolumeHeader {
    pub signature: [u8; 2],
    pub version: u16,
    pub attributes: u32,
    pub last_mounted_version: u32,
    pub journal_info_block: u32,

    pub create_date: DateTime,
    pub modify_date: DateTime,
    pub backup_date: DateTime,
    pub checked_date: DateTime,

    pub file_count: u32,
    pub folder_count: u32,

    pub block_size: u32,
    pub total_blocks: u32,
    pub free_blocks: u32,

    pub next_allocation: u32,
    pub rsrc_clump_size: u32,
    pub data_clump_size: u32,
    pub next_catalog_id: CatalogNodeId,

    pub write_count: u32,
    pub encodings_bitmap: u64,

    pub finder_info: [u32; 8],

    pub allocation_file: ForkData,
    pub extents_file: ForkData,
    pub catalog_file: ForkData,
    pub attributes_file: ForkData,
    pub startup_file: ForkData,
}

impl<Context> Decode<Context> for HfsUniStr {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let length = u16::decode(decoder)?;
        if length > MAX_NAME_LENGTH {
            return Err(DecodeError::Other("HFSUniStr255 longer than 255 units"));
        }
        let mut unicode = Vec::with_capacity(length as usize);
        for _ in 0..length {
            unicode.push(u16::decode(decoder)?);
        }
        Ok(HfsUniStr(unicode))
    }
}

bincode::impl_borrow_decode!(HfsUniStr);

impl Encode for HfsUniStr {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        (self.0.len() as u16).encode(encoder)?;
        for unit in &self.0 {
            unit.encode(encoder)?;
        }
        Ok(())
    }
}

impl HfsUniStr {
    pub fn from_name(name: &str) -> Self {
        HfsUniStr(name.encode_utf16().collect())
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.0)
    }

    /// Encoded size, including the length prefix.
    pub fn encoded_len(&self) -> u16 {
        (2 + 2 * self.0.len()) as u16
    }

    pub fn cmp_binary(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }

    /// Case-insensitive order. Approximates Apple's FastUnicodeCompare by
    /// lower-casing each decoded character; ignorable code points are not
    /// skipped.
    pub fn cmp_case_folding(&self, other: &Self) -> Ordering {
        let fold = |name: &HfsUniStr| {
            char::decode_utf16(name.0.iter().copied())
                .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                .flat_map(char::to_lowercase)
                .collect::<Vec<char>>()
        };
        fold(self).cmp(&fold(other))
    }
}

impl CatalogKey {
    pub fn new(parent_id: CatalogNodeId, name: &str) -> Self {
        let node_name = HfsUniStr::from_name(name);
        Self {
            key_length: 4 + node_name.encoded_len(),
            parent_id,
            node_name,
        }
    }

    pub fn name(&self) -> String {
        self.node_name.to_string_lossy()
    }
}

impl ExtentKey {
    pub fn new(file_id: CatalogNodeId, fork_type: u8, start_block: u32) -> Self {
        Self {
            key_length: 10,
            fork_type,
            pad: 0,
            file_id,
            start_block,
        }
    }
}

impl BtNodeDescriptor {
    pub fn get_kind(&self) -> Option<NodeKind> {
        NodeKind::from_i8(self.kind)
    }
}

impl BtHeaderRec {
    pub fn has_attribute(&self, mask: u32) -> bool {
        self.attributes & mask != 0
    }

    pub fn is_empty(&self) -> bool {
        self.root_node == INVALID_NODE_ID
    }
}

impl VolumeHeader {
    pub fn check_signature(&self) -> bool {
        (self.signature == HFS_PLUS_SIGNATURE && self.version == HFS_PLUS_VERSION)
            || (self.signature == HFSX_SIGNATURE && self.version == HFSX_VERSION)
    }

    pub fn is_hfsx(&self) -> bool {
        self.signature == HFSX_SIGNATURE
    }
}

impl ForkData {
    pub fn inline_blocks(&self) -> u64 {
        self.extents.iter().map(|e| e.block_count as u64).sum()
    }
}
