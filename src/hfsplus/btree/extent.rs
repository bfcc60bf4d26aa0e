use super::*;

pub struct ExtentDecoder;

impl RecordDecoder for ExtentDecoder {
    type Key = ExtentKey;
    type Record = ExtentRecord;

    fn decode_key(bytes: &[u8]) -> Result<ExtentKey, BtreeError> {
        Ok(deserialize(bytes)?)
    }

    fn decode_record(bytes: &[u8]) -> Result<ExtentRecord, BtreeError> {
        Ok(deserialize(bytes)?)
    }
}

fn compare_extent_keys_by(record_key: &[u8], key: &[u8], with_start_block: bool) -> Ordering {
    match (deserialize::<ExtentKey>(record_key), deserialize::<ExtentKey>(key)) {
        (Ok(record_key), Ok(key)) => {
            let ordering = record_key
                .file_id
                .cmp(&key.file_id)
                .then(record_key.fork_type.cmp(&key.fork_type));
            if with_start_block {
                ordering.then(record_key.start_block.cmp(&key.start_block))
            } else {
                ordering
            }
        }
        _ => record_key.cmp(key),
    }
}

/// Extents overflow key order: file ID, fork type, start block.
pub fn compare_extent_keys(record_key: &[u8], key: &[u8]) -> Ordering {
    compare_extent_keys_by(record_key, key, true)
}

/// Fan-out comparator: every extent record of one fork is `Equal`.
pub fn compare_extent_forks(record_key: &[u8], key: &[u8]) -> Ordering {
    compare_extent_keys_by(record_key, key, false)
}

#[derive(Debug)]
pub struct ExtentTree {
    pub btree: Btree,
}

impl ExtentTree {
    pub fn new<B: ByteSource + ?Sized>(fork: &B) -> Result<ExtentTree, BtreeError> {
        let btree = Btree::new(fork)?;
        Ok(ExtentTree { btree })
    }

    /// Extents of a fork beyond the eight kept in its fork data, in file
    /// order.
    pub fn overflow_extents(&self, file_id: CatalogNodeId, fork_type: u8) -> Result<Vec<ExtentDescriptor>, BtreeError> {
        let key = serialize(&ExtentKey::new(file_id, fork_type, 0))?;
        let leaves = self.btree.find_leaf_range(&key, compare_extent_forks)?;

        let mut records: Vec<(u32, ExtentRecord)> = Vec::new();
        for leaf in leaves {
            for index in 0..leaf.record_count() {
                let record = RecordRef { node: leaf, index };
                if compare_extent_forks(record.key_bytes()?, &key) != Ordering::Equal {
                    continue;
                }
                let (extent_key, extents) = record.decode::<ExtentDecoder>()?;
                records.push((extent_key.start_block, extents));
            }
        }
        records.sort_by_key(|(start_block, _)| *start_block);

        Ok(records
            .into_iter()
            .flat_map(|(_, extents)| extents)
            .filter(|extent| extent.block_count != 0)
            .collect())
    }
}
