//! Builders for synthetic tree images used by the unit tests.

use std::collections::BTreeMap;

use super::data_source::serialize;
use super::layout::{consts::*, *};

pub struct TreeImageBuilder {
    node_size: u16,
    header: BtHeaderRec,
    nodes: BTreeMap<u32, Vec<u8>>,
}

impl TreeImageBuilder {
    pub fn new(node_size: u16) -> Self {
        Self {
            node_size,
            header: BtHeaderRec {
                tree_depth: 0,
                root_node: 0,
                leaf_records: 0,
                first_leaf_node: 0,
                last_leaf_node: 0,
                node_size,
                max_key_length: 516,
                total_nodes: 0,
                free_nodes: 0,
                reserved1: 0,
                clump_size: 0,
                btree_type: 0,
                key_compare_type: HFS_CASE_FOLDING,
                attributes: BT_BIG_KEYS_MASK | BT_VARIABLE_INDEX_KEYS_MASK,
                reserved3: [0; 16],
            },
            nodes: BTreeMap::new(),
        }
    }

    pub fn root(mut self, root_node: u32, tree_depth: u16) -> Self {
        self.header.root_node = root_node;
        self.header.tree_depth = tree_depth;
        self
    }

    pub fn leaves(mut self, first_leaf_node: u32, last_leaf_node: u32, leaf_records: u32) -> Self {
        self.header.first_leaf_node = first_leaf_node;
        self.header.last_leaf_node = last_leaf_node;
        self.header.leaf_records = leaf_records;
        self
    }

    pub fn key_compare_type(mut self, key_compare_type: u8) -> Self {
        self.header.key_compare_type = key_compare_type;
        self
    }

    pub fn node(
        mut self,
        index: u32,
        kind: NodeKind,
        height: u8,
        forward_link: u32,
        backward_link: u32,
        records: &[Vec<u8>],
    ) -> Self {
        let descriptor = BtNodeDescriptor {
            forward_link,
            backward_link,
            kind: kind as i8,
            height,
            num_records: records.len() as u16,
            reserved: 0,
        };
        let node = encode_node(self.node_size, &descriptor, records);
        self.nodes.insert(index, node);
        self
    }

    /// Overwrites the kind byte of the header node.
    pub fn build_with_header_kind(self, kind: i8) -> Vec<u8> {
        let mut image = self.build();
        image[8] = kind as u8;
        image
    }

    pub fn build(mut self) -> Vec<u8> {
        let node_count = self.nodes.keys().next_back().map_or(1, |last| last + 1);
        self.header.total_nodes = node_count;

        let descriptor = BtNodeDescriptor {
            forward_link: 0,
            backward_link: 0,
            kind: NodeKind::Header as i8,
            height: 0,
            num_records: 3,
            reserved: 0,
        };
        let map_length = self.node_size as usize
            - BT_NODE_DESCRIPTOR_SIZE
            - BT_HEADER_REC_SIZE
            - 128
            - 4 * RECORD_OFFSET_SIZE;
        let header_node = encode_node(
            self.node_size,
            &descriptor,
            &[serialize(&self.header).unwrap(), vec![0; 128], vec![0; map_length]],
        );

        let mut image = vec![0u8; node_count as usize * self.node_size as usize];
        image[..self.node_size as usize].copy_from_slice(&header_node);
        for (index, node) in self.nodes {
            let start = index as usize * self.node_size as usize;
            image[start..start + node.len()].copy_from_slice(&node);
        }
        image
    }
}

fn encode_node(node_size: u16, descriptor: &BtNodeDescriptor, records: &[Vec<u8>]) -> Vec<u8> {
    let mut node = serialize(descriptor).unwrap();
    let mut offsets = Vec::with_capacity(records.len() + 1);
    for record in records {
        offsets.push(node.len() as u16);
        node.extend_from_slice(record);
    }
    offsets.push(node.len() as u16);

    let table_size = offsets.len() * RECORD_OFFSET_SIZE;
    assert!(node.len() + table_size <= node_size as usize, "records overflow the node");
    node.resize(node_size as usize - table_size, 0);
    for offset in offsets.iter().rev() {
        node.extend_from_slice(&offset.to_be_bytes());
    }
    node
}

pub fn catalog_key_bytes(parent_id: CatalogNodeId, name: &str) -> Vec<u8> {
    serialize(&CatalogKey::new(parent_id, name)).unwrap()
}

pub fn index_record(parent_id: CatalogNodeId, name: &str, child: u32) -> Vec<u8> {
    let mut record = catalog_key_bytes(parent_id, name);
    record.extend_from_slice(&child.to_be_bytes());
    record
}

pub fn raw_record(parent_id: CatalogNodeId, name: &str, payload: &[u8]) -> Vec<u8> {
    let mut record = catalog_key_bytes(parent_id, name);
    record.extend_from_slice(payload);
    record
}

pub fn empty_bsd_info() -> BsdInfo {
    BsdInfo {
        owner_id: 0,
        group_id: 0,
        admin_flags: 0,
        owner_flags: 0,
        file_mode: 0,
        special: 0,
    }
}

pub fn file_payload(file_id: CatalogNodeId) -> CatalogFile {
    CatalogFile {
        record_type: CatalogRecordType::File as u16,
        flags: 0,
        reserved1: 0,
        file_id,
        create_date: 0,
        content_mod_date: 0,
        attribute_mod_date: 0,
        access_date: 0,
        backup_date: 0,
        permissions: empty_bsd_info(),
        user_info: [0; 16],
        finder_info: [0; 16],
        text_encoding: 0,
        reserved2: 0,
        data_fork: ForkData::default(),
        resource_fork: ForkData::default(),
    }
}

pub fn file_record(parent_id: CatalogNodeId, name: &str, file_id: CatalogNodeId) -> Vec<u8> {
    raw_record(parent_id, name, &serialize(&file_payload(file_id)).unwrap())
}

pub fn folder_record(
    parent_id: CatalogNodeId,
    name: &str,
    folder_id: CatalogNodeId,
    valence: u32,
) -> Vec<u8> {
    let folder = CatalogFolder {
        record_type: CatalogRecordType::Folder as u16,
        flags: 0,
        valence,
        folder_id,
        create_date: 0,
        content_mod_date: 0,
        attribute_mod_date: 0,
        access_date: 0,
        backup_date: 0,
        permissions: empty_bsd_info(),
        user_info: [0; 16],
        finder_info: [0; 16],
        text_encoding: 0,
        reserved: 0,
    };
    raw_record(parent_id, name, &serialize(&folder).unwrap())
}

pub fn thread_record(
    cnid: CatalogNodeId,
    record_type: CatalogRecordType,
    parent_id: CatalogNodeId,
    name: &str,
) -> Vec<u8> {
    let thread = CatalogThread {
        record_type: record_type as u16,
        reserved: 0,
        parent_id,
        node_name: HfsUniStr::from_name(name),
    };
    raw_record(cnid, "", &serialize(&thread).unwrap())
}

pub fn extent_record(file_id: CatalogNodeId, fork_type: u8, start_block: u32, extents: &[(u32, u32)]) -> Vec<u8> {
    let mut record = serialize(&ExtentKey::new(file_id, fork_type, start_block)).unwrap();
    let mut descriptors = [ExtentDescriptor::default(); EXTENT_DENSITY];
    for (descriptor, (start_block, block_count)) in descriptors.iter_mut().zip(extents) {
        descriptor.start_block = *start_block;
        descriptor.block_count = *block_count;
    }
    record.extend_from_slice(&serialize(&descriptors).unwrap());
    record
}

pub fn extent_index_record(file_id: CatalogNodeId, fork_type: u8, start_block: u32, child: u32) -> Vec<u8> {
    let mut record = serialize(&ExtentKey::new(file_id, fork_type, start_block)).unwrap();
    record.extend_from_slice(&child.to_be_bytes());
    record
}

pub const CATALOG_NODE_SIZE: u16 = 4096;

/// Index root at node 5 over leaves 10 and 12, three file records each:
/// leaf 10 holds ("a", "b", "c") and leaf 12 holds ("m", "n", "o"), all in
/// folder 2, file IDs 100.. in key order.
pub fn two_leaf_catalog() -> Vec<u8> {
    TreeImageBuilder::new(CATALOG_NODE_SIZE)
        .root(5, 2)
        .leaves(10, 12, 6)
        .node(
            5,
            NodeKind::Index,
            2,
            0,
            0,
            &[index_record(2, "a", 10), index_record(2, "m", 12)],
        )
        .node(
            10,
            NodeKind::Leaf,
            1,
            12,
            0,
            &[
                file_record(2, "a", 100),
                file_record(2, "b", 101),
                file_record(2, "c", 102),
            ],
        )
        .node(
            12,
            NodeKind::Leaf,
            1,
            0,
            10,
            &[
                file_record(2, "m", 103),
                file_record(2, "n", 104),
                file_record(2, "o", 105),
            ],
        )
        .build()
}
