pub const VOLUME_HEADER_OFFSET: u64 = 1024;
pub const VOLUME_HEADER_SIZE: u64 = 512;

pub const HFS_PLUS_SIGNATURE: [u8; 2] = *b"H+";
pub const HFSX_SIGNATURE: [u8; 2] = *b"HX";
pub const HFS_PLUS_VERSION: u16 = 4;
pub const HFSX_VERSION: u16 = 5;

pub const BT_NODE_DESCRIPTOR_SIZE: usize = 14;
pub const BT_HEADER_REC_SIZE: usize = 106;
pub const RECORD_OFFSET_SIZE: usize = 2;
/// Length of the `keyLength` prefix for trees with `kBTBigKeysMask` set.
pub const KEY_LENGTH_SIZE: usize = 2;
pub const CHILD_NODE_INDEX_SIZE: usize = 4;

pub const MIN_NODE_SIZE: u16 = 512;

pub const BT_BAD_CLOSE_MASK: u32 = 0x0000_0001;
pub const BT_BIG_KEYS_MASK: u32 = 0x0000_0002;
pub const BT_VARIABLE_INDEX_KEYS_MASK: u32 = 0x0000_0004;

pub const HFS_CASE_FOLDING: u8 = 0xCF;
pub const HFS_BINARY_COMPARE: u8 = 0xBC;

pub const EXTENT_DENSITY: usize = 8;
pub const MAX_NAME_LENGTH: u16 = 255;

pub const FORK_TYPE_DATA: u8 = 0x00;
pub const FORK_TYPE_RESOURCE: u8 = 0xFF;

pub const INVALID_NODE_ID: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf = -1,
    Index = 0,
    Header = 1,
    Map = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogRecordType {
    Folder = 0x0001,
    File = 0x0002,
    FolderThread = 0x0003,
    FileThread = 0x0004,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialCatalogNodeId {
	RootParent = 1,
	RootFolder = 2,
	ExtentsFile = 3,
	CatalogFile = 4,
	BadBlockFile = 5,
	AllocationFile = 6,
	StartupFile = 7,
	AttributesFile = 8,
	RepairCatalogFile = 14,
	BogusExtentFile = 15,
	FirstUserCatalogNode = 16,
}

impl NodeKind {
    pub fn from_i8(kind: i8) -> Option<NodeKind> {
        match kind {
            -1 => Some(NodeKind::Leaf),
            0 => Some(NodeKind::Index),
            1 => Some(NodeKind::Header),
            2 => Some(NodeKind::Map),
            _ => None,
        }
    }
}

impl CatalogRecordType {
    pub fn from_u16(record_type: u16) -> Option<CatalogRecordType> {
        match record_type {
            0x0001 => Some(CatalogRecordType::Folder),
            0x0002 => Some(CatalogRecordType::File),
            0x0003 => Some(CatalogRecordType::FolderThread),
            0x0004 => Some(CatalogRecordType::FileThread),
            _ => None,
        }
    }
}
