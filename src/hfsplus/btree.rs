use std::{
    cmp::Ordering,
    collections::HashSet,
    fmt,
    marker::PhantomData,
};

use tracing::{debug, trace, warn};

use super::{data_source::*, layout::consts::*, layout::*};

pub mod catalog;
pub mod extent;
pub mod node;

use node::NodeView;

#[derive(Debug)]
pub enum BtreeError {
    DataSourceError(DataSourceError),
    WrongHeaderNodeKind(i8),
    InvalidNodeSize(u16),
    NodeIndexOutOfBounds(u32),
    RecordIndexOutOfBounds(u32, u16),
    RecordOffsetOutOfBounds(u32, u16),
    KeyLengthOutOfBounds(u32, u16, u16),
    EmptyIndexNode(u32),
    UnexpectedNodeKind(u32, i8),
    LinkCycle(u32),
}

/// Non-fatal irregularities met while walking a tree.
#[derive(Debug)]
pub enum DecodeWarning {
    UndecodableKey(BtreeError),
    UndecodableRecord(BtreeError),
    BadChildLink(BtreeError),
    UnreadableNode(BtreeError),
    UnknownNodeKind(i8),
    RevisitedNode,
}

/// Turns raw leaf keys and payloads into typed values for a particular tree
/// (catalog, extents overflow, ...). The tree core itself never looks inside
/// a key.
pub trait RecordDecoder {
    type Key: fmt::Debug;
    type Record: fmt::Debug;

    fn decode_key(bytes: &[u8]) -> Result<Self::Key, BtreeError>;
    fn decode_record(bytes: &[u8]) -> Result<Self::Record, BtreeError>;
}

/// An HFS+ B-tree file (catalog, extents overflow or attributes), loaded in
/// full and never modified.
#[derive(Debug)]
pub struct Btree {
    tree: Vec<u8>,
    header: BtHeaderRec,
}

/// A leaf record, addressed by its node and its slot in the offset table.
#[derive(Debug, Clone, Copy)]
pub struct RecordRef<'a> {
    pub node: NodeView<'a>,
    pub index: u16,
}

pub struct BtreeRecordsIterator<'a> {
    btree: &'a Btree,
    node: Option<NodeView<'a>>,
    record_index: u16,
    visited: HashSet<u32>,
}

#[derive(Debug)]
pub enum WalkEvent<K, R> {
    IndexNode { node: u32, records: u16 },
    IndexRecord { node: u32, record: u16, key: K, child: u32 },
    LeafNode { node: u32, forward_link: u32, records: u16 },
    LeafRecord { node: u32, record: u16, key: K, value: R },
    HeaderNode { node: u32 },
    MapNode { node: u32 },
    Warning { node: u32, record: Option<u16>, warning: DecodeWarning },
}

struct WalkFrame<'a> {
    node: NodeView<'a>,
    next_record: u16,
}

/// Lazy pre-order traversal from the root: an index record is reported just
/// before the subtree of its child.
pub struct Walk<'a, D: RecordDecoder> {
    btree: &'a Btree,
    stack: Vec<WalkFrame<'a>>,
    enter: Option<u32>,
    visited: HashSet<u32>,
    _decoder: PhantomData<D>,
}

impl Btree {
    pub fn new<B: ByteSource + ?Sized>(fork: &B) -> Result<Btree, BtreeError> {
        let size = fork.size()?;
        debug!("Tree size: {}", size);
        let tree = fork.read_bytes_at(0, size)?;
        Self::from_bytes(tree)
    }

    pub fn from_bytes(tree: Vec<u8>) -> Result<Btree, BtreeError> {
        let descriptor_bytes = tree
            .get(..BT_NODE_DESCRIPTOR_SIZE)
            .ok_or(BtreeError::NodeIndexOutOfBounds(0))?;
        let descriptor: BtNodeDescriptor = deserialize(descriptor_bytes)?;
        if descriptor.get_kind() != Some(NodeKind::Header) {
            return Err(BtreeError::WrongHeaderNodeKind(descriptor.kind));
        }

        let header_bytes = tree
            .get(BT_NODE_DESCRIPTOR_SIZE..BT_NODE_DESCRIPTOR_SIZE + BT_HEADER_REC_SIZE)
            .ok_or(BtreeError::NodeIndexOutOfBounds(0))?;
        let header: BtHeaderRec = deserialize(header_bytes)?;

        debug!("leaf records: {}", header.leaf_records);
        debug!("node size: {}", header.node_size);

        if !header.is_empty() {
            debug!("root node: {}, depth: {}", header.root_node, header.tree_depth);
            if header.node_size < MIN_NODE_SIZE || (header.node_size as usize) > tree.len() {
                return Err(BtreeError::InvalidNodeSize(header.node_size));
            }
        }

        Ok(Btree { tree, header })
    }

    pub fn header(&self) -> &BtHeaderRec {
        &self.header
    }

    pub fn node_size(&self) -> u16 {
        self.header.node_size
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty()
    }

    /// Number of whole nodes in the image.
    pub fn node_count(&self) -> u32 {
        match self.header.node_size {
            0 => 0,
            node_size => (self.tree.len() / node_size as usize) as u32,
        }
    }

    pub fn node(&self, node_index: u32) -> Result<NodeView<'_>, BtreeError> {
        NodeView::new(&self.tree, node_index, self.header.node_size)
    }

    /// Descends from the root to the leaf that `key` would live in.
    ///
    /// `comparator(record_key, key)` orders a record key against the sought
    /// key. The returned leaf is not checked for actually holding `key`.
    /// `Ok(None)` means the tree is empty.
    pub fn find_leaf_node<C>(&self, key: &[u8], comparator: C) -> Result<Option<NodeView<'_>>, BtreeError>
    where
        C: Fn(&[u8], &[u8]) -> Ordering,
    {
        if self.is_empty() {
            return Ok(None);
        }

        let mut node_index = self.header.root_node;
        for _ in 0..self.node_count() {
            let node = self.node(node_index)?;
            match node.kind() {
                Some(NodeKind::Leaf) => return Ok(Some(node)),
                Some(NodeKind::Index) => {
                    let position = Self::search_index_node(&node, key, &comparator)?;
                    let child = node.child_node_index(position)?;
                    trace!("index node {} record {} -> node {}", node_index, position, child);
                    node_index = child;
                }
                _ => {
                    return Err(BtreeError::UnexpectedNodeKind(
                        node_index,
                        node.descriptor().kind,
                    ))
                }
            }
        }
        Err(BtreeError::LinkCycle(node_index))
    }

    /// Picks the record of an index node to descend through.
    ///
    /// Starts in the middle and moves by a halving distance, stopping as soon
    /// as the distance drops to 1. The final position is taken as is, so for
    /// small nodes the chosen child may be one off from the exact lower bound.
    fn search_index_node<C>(node: &NodeView<'_>, key: &[u8], comparator: &C) -> Result<u16, BtreeError>
    where
        C: Fn(&[u8], &[u8]) -> Ordering,
    {
        let record_count = node.record_count();
        if record_count == 0 {
            return Err(BtreeError::EmptyIndexNode(node.index()));
        }

        let mut position = record_count / 2;
        let mut distance = position;
        while distance > 1 {
            let record_key = node.record_key_bytes(position)?;
            distance /= 2;
            if comparator(record_key, key) != Ordering::Less {
                position -= distance;
            } else {
                position += distance;
            }
        }
        Ok(position)
    }

    /// The leaf `key` descends to, followed by every forward sibling whose
    /// first key still compares `Equal` to `key`.
    ///
    /// Meant for fan-out comparators that only look at part of the key, such
    /// as "all records of one parent folder". A broken or looping forward
    /// link ends the scan with what was collected so far.
    pub fn find_leaf_nodes<C>(&self, key: &[u8], comparator: C) -> Result<Vec<NodeView<'_>>, BtreeError>
    where
        C: Fn(&[u8], &[u8]) -> Ordering,
    {
        match self.find_leaf_node(key, &comparator)? {
            Some(leaf) => Ok(self.scan_forward(leaf, key, &comparator)),
            None => Ok(Vec::new()),
        }
    }

    fn scan_forward<'a, C>(&'a self, start: NodeView<'a>, key: &[u8], comparator: &C) -> Vec<NodeView<'a>>
    where
        C: Fn(&[u8], &[u8]) -> Ordering,
    {
        let mut current = start;
        let mut visited = HashSet::from([current.index()]);
        let mut leaves = vec![current];

        while current.forward_link() != INVALID_NODE_ID {
            let next_index = current.forward_link();
            if !visited.insert(next_index) {
                warn!("leaf chain loops back to node {}", next_index);
                break;
            }
            let next = match self.node(next_index) {
                Ok(node) if node.kind() == Some(NodeKind::Leaf) => node,
                Ok(node) => {
                    warn!("forward link of node {} points to a non-leaf node {} (kind {})", current.index(), next_index, node.descriptor().kind);
                    break;
                }
                Err(e) => {
                    warn!("forward link of node {} is unreadable: {}", current.index(), e);
                    break;
                }
            };

            match next.first_key_bytes() {
                Ok(first_key) if comparator(first_key, key) == Ordering::Equal => {}
                Ok(_) => break,
                Err(e) => {
                    warn!("leaf node {} has no usable first key: {}", next_index, e);
                    break;
                }
            }

            leaves.push(next);
            current = next;
        }

        leaves
    }

    /// The index search may stop one child away from the right one at every
    /// level, so the located leaf is moved along its sibling links until its
    /// key range brackets `key`.
    pub fn settle_leaf<'a, C>(&'a self, mut leaf: NodeView<'a>, key: &[u8], comparator: C) -> NodeView<'a>
    where
        C: Fn(&[u8], &[u8]) -> Ordering,
    {
        let mut visited = HashSet::from([leaf.index()]);
        loop {
            let first_key = leaf.first_key_bytes().ok();
            let last_key = leaf
                .record_count()
                .checked_sub(1)
                .and_then(|last| leaf.record_key_bytes(last).ok());

            let next_index = match (first_key, last_key) {
                (Some(first), _) if comparator(first, key) == Ordering::Greater => leaf.backward_link(),
                (_, Some(last)) if comparator(last, key) == Ordering::Less => {
                    let forward = leaf.forward_link();
                    if forward == INVALID_NODE_ID {
                        return leaf;
                    }
                    // only step forward if the sibling still starts at or before the key
                    match self.node(forward).ok().and_then(|next| next.first_key_bytes().ok()) {
                        Some(next_first) if comparator(next_first, key) != Ordering::Greater => forward,
                        _ => INVALID_NODE_ID,
                    }
                }
                _ => INVALID_NODE_ID,
            };

            if next_index == INVALID_NODE_ID || !visited.insert(next_index) {
                return leaf;
            }
            match self.node(next_index) {
                Ok(next) if next.kind() == Some(NodeKind::Leaf) => {
                    trace!("settling leaf {} -> {}", leaf.index(), next_index);
                    leaf = next
                }
                _ => return leaf,
            }
        }
    }

    /// Every leaf that may hold a key comparing `Equal` to `key`, in forward
    /// order: the descended leaf is settled first, then the run is extended
    /// forward through [`Btree::find_leaf_nodes`]' rule and backward through
    /// preceding leaves whose last key still compares `Equal`.
    pub fn find_leaf_range<C>(&self, key: &[u8], comparator: C) -> Result<Vec<NodeView<'_>>, BtreeError>
    where
        C: Fn(&[u8], &[u8]) -> Ordering,
    {
        let leaf = match self.find_leaf_node(key, &comparator)? {
            Some(leaf) => self.settle_leaf(leaf, key, &comparator),
            None => return Ok(Vec::new()),
        };
        let mut leaves = self.scan_forward(leaf, key, &comparator);
        let mut visited: HashSet<u32> = leaves.iter().map(|leaf| leaf.index()).collect();

        while let Some(first) = leaves.first().copied() {
            let backward_link = first.backward_link();
            if backward_link == INVALID_NODE_ID || !visited.insert(backward_link) {
                break;
            }
            let previous = match self.node(backward_link) {
                Ok(previous) if previous.kind() == Some(NodeKind::Leaf) => previous,
                _ => break,
            };
            let last_key = previous
                .record_count()
                .checked_sub(1)
                .and_then(|last| previous.record_key_bytes(last).ok());
            match last_key {
                Some(last) if comparator(last, key) == Ordering::Equal => leaves.insert(0, previous),
                _ => break,
            }
        }

        Ok(leaves)
    }

    /// Leaf records in key order, starting at `record_index` of `start_node`.
    pub fn records_iter(&self, start_node: u32, record_index: u16) -> Result<BtreeRecordsIterator<'_>, BtreeError> {
        let node = self.node(start_node)?;
        Ok(BtreeRecordsIterator {
            btree: self,
            node: Some(node),
            record_index,
            visited: HashSet::from([start_node]),
        })
    }

    /// Every leaf record, following the chain from the first leaf node.
    pub fn leaf_records(&self) -> Result<BtreeRecordsIterator<'_>, BtreeError> {
        if self.is_empty() || self.header.first_leaf_node == INVALID_NODE_ID {
            return Ok(BtreeRecordsIterator {
                btree: self,
                node: None,
                record_index: 0,
                visited: HashSet::new(),
            });
        }
        self.records_iter(self.header.first_leaf_node, 0)
    }

    pub fn walk_with<D: RecordDecoder>(&self) -> Walk<'_, D> {
        Walk {
            btree: self,
            stack: Vec::new(),
            enter: (!self.is_empty()).then_some(self.header.root_node),
            visited: HashSet::new(),
            _decoder: PhantomData,
        }
    }
}

impl<'a> RecordRef<'a> {
    pub fn key_bytes(&self) -> Result<&'a [u8], BtreeError> {
        self.node.record_key_bytes(self.index)
    }

    pub fn data_bytes(&self) -> Result<&'a [u8], BtreeError> {
        self.node.record_data_bytes(self.index)
    }

    pub fn decode<D: RecordDecoder>(&self) -> Result<(D::Key, D::Record), BtreeError> {
        Ok((
            D::decode_key(self.key_bytes()?)?,
            D::decode_record(self.data_bytes()?)?,
        ))
    }
}

impl<'a> Iterator for BtreeRecordsIterator<'a> {
    type Item = RecordRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let node = self.node?;
            if self.record_index < node.record_count() {
                let record = RecordRef {
                    node,
                    index: self.record_index,
                };
                self.record_index += 1;
                return Some(record);
            }

            let next_index = node.forward_link();
            self.node = None;
            self.record_index = 0;
            if next_index == INVALID_NODE_ID {
                return None;
            }
            if !self.visited.insert(next_index) {
                warn!("leaf chain loops back to node {}", next_index);
                return None;
            }
            match self.btree.node(next_index) {
                Ok(next) if next.kind() == Some(NodeKind::Leaf) => self.node = Some(next),
                Ok(next) => {
                    warn!("forward link {} is not a leaf node (kind {})", next_index, next.descriptor().kind);
                    return None;
                }
                Err(e) => {
                    warn!("forward link {} is unreadable: {}", next_index, e);
                    return None;
                }
            }
        }
    }
}

impl<'a, D: RecordDecoder> Walk<'a, D> {
    fn warning(node: u32, record: Option<u16>, warning: DecodeWarning) -> WalkEvent<D::Key, D::Record> {
        warn!("node {} record {:?}: {:?}", node, record, warning);
        WalkEvent::Warning {
            node,
            record,
            warning,
        }
    }

    fn enter_node(&mut self, node_index: u32) -> WalkEvent<D::Key, D::Record> {
        if !self.visited.insert(node_index) {
            return Self::warning(node_index, None, DecodeWarning::RevisitedNode);
        }
        let node = match self.btree.node(node_index) {
            Ok(node) => node,
            Err(e) => return Self::warning(node_index, None, DecodeWarning::UnreadableNode(e)),
        };

        match node.kind() {
            Some(NodeKind::Index) => {
                self.stack.push(WalkFrame { node, next_record: 0 });
                WalkEvent::IndexNode {
                    node: node_index,
                    records: node.record_count(),
                }
            }
            Some(NodeKind::Leaf) => {
                self.stack.push(WalkFrame { node, next_record: 0 });
                WalkEvent::LeafNode {
                    node: node_index,
                    forward_link: node.forward_link(),
                    records: node.record_count(),
                }
            }
            Some(NodeKind::Header) => WalkEvent::HeaderNode { node: node_index },
            Some(NodeKind::Map) => WalkEvent::MapNode { node: node_index },
            None => Self::warning(
                node_index,
                None,
                DecodeWarning::UnknownNodeKind(node.descriptor().kind),
            ),
        }
    }

    fn index_record(&mut self, node: NodeView<'a>, record: u16) -> WalkEvent<D::Key, D::Record> {
        let node_index = node.index();
        let child = match node.child_node_index(record) {
            Ok(child) => child,
            Err(e) => return Self::warning(node_index, Some(record), DecodeWarning::BadChildLink(e)),
        };
        self.enter = Some(child);

        match node.record_key_bytes(record).and_then(D::decode_key) {
            Ok(key) => WalkEvent::IndexRecord {
                node: node_index,
                record,
                key,
                child,
            },
            Err(e) => Self::warning(node_index, Some(record), DecodeWarning::UndecodableKey(e)),
        }
    }

    fn leaf_record(node: NodeView<'a>, record: u16) -> WalkEvent<D::Key, D::Record> {
        let node_index = node.index();
        let key = match node.record_key_bytes(record).and_then(D::decode_key) {
            Ok(key) => key,
            Err(e) => return Self::warning(node_index, Some(record), DecodeWarning::UndecodableKey(e)),
        };
        match node.record_data_bytes(record).and_then(D::decode_record) {
            Ok(value) => WalkEvent::LeafRecord {
                node: node_index,
                record,
                key,
                value,
            },
            Err(e) => Self::warning(node_index, Some(record), DecodeWarning::UndecodableRecord(e)),
        }
    }
}

impl<'a, D: RecordDecoder> Iterator for Walk<'a, D> {
    type Item = WalkEvent<D::Key, D::Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(node_index) = self.enter.take() {
            return Some(self.enter_node(node_index));
        }

        loop {
            let frame = self.stack.last_mut()?;
            if frame.next_record >= frame.node.record_count() {
                self.stack.pop();
                continue;
            }
            let node = frame.node;
            let record = frame.next_record;
            frame.next_record += 1;

            return Some(match node.kind() {
                Some(NodeKind::Index) => self.index_record(node, record),
                _ => Self::leaf_record(node, record),
            });
        }
    }
}

impl From<DataSourceError> for BtreeError {
    fn from(value: DataSourceError) -> Self {
        BtreeError::DataSourceError(value)
    }
}

impl fmt::Display for BtreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataSourceError(e) => write!(f, "{e}"),
            Self::WrongHeaderNodeKind(kind) => write!(f, "wrong kind of B-tree header node: {kind}"),
            Self::InvalidNodeSize(size) => write!(f, "invalid node size {size}"),
            Self::NodeIndexOutOfBounds(node) => write!(f, "node {node} is outside of the tree"),
            Self::RecordIndexOutOfBounds(node, record) => {
                write!(f, "node {node} has no record {record}")
            }
            Self::RecordOffsetOutOfBounds(node, offset) => {
                write!(f, "node {node} has a record offset {offset} outside of the node")
            }
            Self::KeyLengthOutOfBounds(node, record, length) => {
                write!(f, "node {node} record {record} has a key length {length} past the node")
            }
            Self::EmptyIndexNode(node) => write!(f, "index node {node} has no records"),
            Self::UnexpectedNodeKind(node, kind) => {
                write!(f, "node {node} has kind {kind} where an index or leaf node was expected")
            }
            Self::LinkCycle(node) => write!(f, "links loop back through node {node}"),
        }
    }
}

impl std::error::Error for BtreeError {}
