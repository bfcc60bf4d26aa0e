use bincode::Decode;

use super::*;

/// Read-only projection of one node of a tree image.
///
/// Built on demand from `(buffer, node index, node size)`; only the descriptor
/// is decoded up front, records are located through the offset table at the
/// tail of the node whenever they are asked for.
#[derive(Debug, Clone, Copy)]
pub struct NodeView<'a> {
    buffer: &'a [u8],
    node_index: u32,
    node_size: u16,
    descriptor: BtNodeDescriptor,
}

impl<'a> NodeView<'a> {
    pub fn new(buffer: &'a [u8], node_index: u32, node_size: u16) -> Result<NodeView<'a>, BtreeError> {
        let start = node_index as u64 * node_size as u64;
        let end = start + node_size as u64;
        if node_size == 0 || end > buffer.len() as u64 {
            return Err(BtreeError::NodeIndexOutOfBounds(node_index));
        }
        let buffer = &buffer[start as usize..end as usize];
        let descriptor: BtNodeDescriptor = deserialize(&buffer[..BT_NODE_DESCRIPTOR_SIZE.min(buffer.len())])?;

        Ok(NodeView {
            buffer,
            node_index,
            node_size,
            descriptor,
        })
    }

    pub fn index(&self) -> u32 {
        self.node_index
    }

    pub fn node_size(&self) -> u16 {
        self.node_size
    }

    pub fn descriptor(&self) -> &BtNodeDescriptor {
        &self.descriptor
    }

    /// `None` for a kind byte outside of Leaf/Index/Header/Map.
    pub fn kind(&self) -> Option<NodeKind> {
        self.descriptor.get_kind()
    }

    pub fn record_count(&self) -> u16 {
        self.descriptor.num_records
    }

    pub fn forward_link(&self) -> u32 {
        self.descriptor.forward_link
    }

    pub fn backward_link(&self) -> u32 {
        self.descriptor.backward_link
    }

    pub fn height(&self) -> u8 {
        self.descriptor.height
    }

    fn offset_table_entry(&self, index: u16) -> Result<u16, BtreeError> {
        let entry_position = (index as usize + 1)
            .checked_mul(RECORD_OFFSET_SIZE)
            .and_then(|from_end| self.buffer.len().checked_sub(from_end))
            .filter(|position| *position >= BT_NODE_DESCRIPTOR_SIZE)
            .ok_or(BtreeError::RecordIndexOutOfBounds(self.node_index, index))?;
        let entry = &self.buffer[entry_position..entry_position + RECORD_OFFSET_SIZE];
        Ok(u16::from_be_bytes([entry[0], entry[1]]))
    }

    /// Offset of record `index` from the start of the node. Entry `i` of the
    /// table lives at `node_size - 2 * (i + 1)`.
    pub fn record_offset(&self, index: u16) -> Result<u16, BtreeError> {
        if index >= self.record_count() {
            return Err(BtreeError::RecordIndexOutOfBounds(self.node_index, index));
        }
        let offset = self.offset_table_entry(index)?;
        if (offset as usize) < BT_NODE_DESCRIPTOR_SIZE || offset as usize >= self.offset_table_start() {
            return Err(BtreeError::RecordOffsetOutOfBounds(self.node_index, offset));
        }
        Ok(offset)
    }

    /// The extra entry after the last record: where free space begins.
    pub fn free_space_offset(&self) -> Result<u16, BtreeError> {
        self.offset_table_entry(self.record_count())
    }

    fn offset_table_start(&self) -> usize {
        self.buffer
            .len()
            .saturating_sub(RECORD_OFFSET_SIZE * (self.record_count() as usize + 1))
    }

    /// End of record `index`: the next record's offset, or the free space
    /// marker for the last one. Falls back to the offset table when the
    /// marker is unusable.
    fn record_end(&self, index: u16) -> usize {
        let table_start = self.offset_table_start();
        let next = if index + 1 < self.record_count() {
            self.record_offset(index + 1).ok()
        } else {
            self.free_space_offset().ok()
        };
        match next.map(|offset| offset as usize) {
            Some(end) if end <= table_start => end,
            _ => table_start,
        }
    }

    /// The whole key of record `index`, `keyLength` prefix included.
    pub fn record_key_bytes(&self, index: u16) -> Result<&'a [u8], BtreeError> {
        let start = self.record_offset(index)? as usize;
        let key_length = self
            .buffer
            .get(start..start + KEY_LENGTH_SIZE)
            .map(|bytes| u16::from_be_bytes([bytes[0], bytes[1]]) as usize)
            .ok_or(BtreeError::RecordOffsetOutOfBounds(self.node_index, start as u16))?;
        let end = start + KEY_LENGTH_SIZE + key_length;
        if end > self.offset_table_start() {
            return Err(BtreeError::KeyLengthOutOfBounds(self.node_index, index, key_length as u16));
        }
        Ok(&self.buffer[start..end])
    }

    /// The payload of record `index`: everything between the end of its key
    /// and the start of the next record.
    pub fn record_data_bytes(&self, index: u16) -> Result<&'a [u8], BtreeError> {
        let key = self.record_key_bytes(index)?;
        let start = self.record_offset(index)? as usize + key.len();
        let end = self.record_end(index).max(start);
        Ok(&self.buffer[start..end])
    }

    pub fn get_record_key<K: Decode<()>>(&self, index: u16) -> Result<K, BtreeError> {
        Ok(deserialize(self.record_key_bytes(index)?)?)
    }

    pub fn get_record_data<D: Decode<()>>(&self, index: u16) -> Result<D, BtreeError> {
        Ok(deserialize(self.record_data_bytes(index)?)?)
    }

    /// Key of the first record, used as the node's representative key.
    /// Typed form of [`NodeView::first_key_bytes`], for callers that work
    /// with decoded keys rather than comparators.
    pub fn get_key<K: Decode<()>>(&self) -> Result<K, BtreeError> {
        self.get_record_key(0)
    }

    pub fn first_key_bytes(&self) -> Result<&'a [u8], BtreeError> {
        self.record_key_bytes(0)
    }

    /// Child node index stored as the payload of an index record.
    pub fn child_node_index(&self, index: u16) -> Result<u32, BtreeError> {
        if self.record_data_bytes(index)?.len() < CHILD_NODE_INDEX_SIZE {
            return Err(BtreeError::RecordOffsetOutOfBounds(self.node_index, self.record_offset(index)?));
        }
        self.get_record_data::<u32>(index)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::hfsplus::testing::*;

    #[test]
    fn descriptor_fields_are_read_big_endian() {
        let records = vec![catalog_key_bytes(2, "a")];
        let image = TreeImageBuilder::new(512)
            .node(3, NodeKind::Leaf, 1, 7, 2, &records)
            .build();

        let node = NodeView::new(&image, 3, 512).unwrap();
        assert_eq!(node.kind(), Some(NodeKind::Leaf));
        assert_eq!(node.forward_link(), 7);
        assert_eq!(node.backward_link(), 2);
        assert_eq!(node.height(), 1);
        assert_eq!(node.record_count(), 1);
    }

    #[test]
    fn node_past_the_buffer_is_reported() {
        let image = TreeImageBuilder::new(512).build();
        assert!(matches!(
            NodeView::new(&image, 4, 512),
            Err(BtreeError::NodeIndexOutOfBounds(4))
        ));
    }

    #[test]
    fn key_and_payload_are_split_by_key_length() {
        let key = catalog_key_bytes(16, "file");
        let mut record = key.clone();
        record.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        let image = TreeImageBuilder::new(512)
            .node(1, NodeKind::Leaf, 1, 0, 0, &[record])
            .build();

        let node = NodeView::new(&image, 1, 512).unwrap();
        assert_eq!(node.record_key_bytes(0).unwrap(), key.as_slice());
        assert_eq!(node.record_data_bytes(0).unwrap(), &[0xAA, 0xBB, 0xCC]);
        let decoded: CatalogKey = node.get_key().unwrap();
        assert_eq!(decoded, CatalogKey::new(16, "file"));
    }

    #[test]
    fn record_index_past_count_is_an_error() {
        let image = TreeImageBuilder::new(512)
            .node(1, NodeKind::Leaf, 1, 0, 0, &[catalog_key_bytes(2, "x")])
            .build();
        let node = NodeView::new(&image, 1, 512).unwrap();
        assert!(matches!(
            node.record_offset(1),
            Err(BtreeError::RecordIndexOutOfBounds(1, 1))
        ));
    }

    #[test]
    fn corrupt_offset_is_an_error() {
        let mut image = TreeImageBuilder::new(512)
            .node(1, NodeKind::Leaf, 1, 0, 0, &[catalog_key_bytes(2, "x")])
            .build();
        // first entry of node 1's offset table
        image[1024 - 2] = 0x01;
        image[1024 - 1] = 0xFF;
        let node = NodeView::new(&image, 1, 512).unwrap();
        assert!(matches!(
            node.record_offset(0),
            Err(BtreeError::RecordOffsetOutOfBounds(1, 0x01FF))
        ));
    }

    #[test]
    fn child_index_follows_index_key() {
        let image = TreeImageBuilder::new(512)
            .node(1, NodeKind::Index, 2, 0, 0, &[index_record(2, "m", 42)])
            .build();
        let node = NodeView::new(&image, 1, 512).unwrap();
        assert_eq!(node.child_node_index(0).unwrap(), 42);
    }

    #[test]
    fn short_child_pointer_is_an_error() {
        let image = TreeImageBuilder::new(512)
            .node(1, NodeKind::Index, 2, 0, 0, &[raw_record(2, "m", &[0, 42])])
            .build();
        let node = NodeView::new(&image, 1, 512).unwrap();
        assert!(matches!(
            node.child_node_index(0),
            Err(BtreeError::RecordOffsetOutOfBounds(1, 14))
        ));
    }

    #[test]
    fn typed_payload_is_decoded_after_the_key() {
        let image = TreeImageBuilder::new(512)
            .node(1, NodeKind::Leaf, 1, 0, 0, &[folder_record(2, "Docs", 16, 3), file_record(16, "a.txt", 18)])
            .build();
        let node = NodeView::new(&image, 1, 512).unwrap();

        let folder: CatalogFolder = node.get_record_data(0).unwrap();
        assert_eq!(folder.folder_id, 16);
        assert_eq!(folder.valence, 3);

        let file: CatalogFile = node.get_record_data(1).unwrap();
        assert_eq!(file, file_payload(18));
        let key: CatalogKey = node.get_record_key(1).unwrap();
        assert_eq!(key, CatalogKey::new(16, "a.txt"));
    }

    proptest! {
        #[test]
        fn offset_table_round_trips(lengths in prop::collection::vec(8usize..40, 1..10)) {
            let records: Vec<Vec<u8>> = lengths
                .iter()
                .map(|length| {
                    let mut record = (*length as u16 - 2).to_be_bytes().to_vec();
                    record.resize(*length, 0x5A);
                    record
                })
                .collect();
            let image = TreeImageBuilder::new(512)
                .node(1, NodeKind::Leaf, 1, 0, 0, &records)
                .build();
            let node = NodeView::new(&image, 1, 512).unwrap();

            let mut expected = BT_NODE_DESCRIPTOR_SIZE as u16;
            for (index, length) in lengths.iter().enumerate() {
                prop_assert_eq!(node.record_offset(index as u16).unwrap(), expected);
                prop_assert_eq!(node.record_key_bytes(index as u16).unwrap().len(), *length);
                expected += *length as u16;
            }
            prop_assert_eq!(node.free_space_offset().unwrap(), expected);
        }
    }
}
