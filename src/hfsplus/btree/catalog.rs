use super::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogRecord {
    Folder(CatalogFolder),
    File(CatalogFile),
    FolderThread(CatalogThread),
    FileThread(CatalogThread),
    /// Record type outside of the four known ones; the payload is left alone.
    Unknown(u16),
}

pub struct CatalogDecoder;

impl RecordDecoder for CatalogDecoder {
    type Key = CatalogKey;
    type Record = CatalogRecord;

    fn decode_key(bytes: &[u8]) -> Result<CatalogKey, BtreeError> {
        Ok(deserialize(bytes)?)
    }

    fn decode_record(bytes: &[u8]) -> Result<CatalogRecord, BtreeError> {
        decode_catalog_record(bytes)
    }
}

pub fn decode_catalog_record(bytes: &[u8]) -> Result<CatalogRecord, BtreeError> {
    let record_type: u16 = deserialize(bytes)?;
    let record = match CatalogRecordType::from_u16(record_type) {
        Some(CatalogRecordType::Folder) => CatalogRecord::Folder(deserialize(bytes)?),
        Some(CatalogRecordType::File) => CatalogRecord::File(deserialize(bytes)?),
        Some(CatalogRecordType::FolderThread) => CatalogRecord::FolderThread(deserialize(bytes)?),
        Some(CatalogRecordType::FileThread) => CatalogRecord::FileThread(deserialize(bytes)?),
        None => CatalogRecord::Unknown(record_type),
    };
    Ok(record)
}

fn parent_id_of(key: &[u8]) -> Option<CatalogNodeId> {
    key.get(KEY_LENGTH_SIZE..KEY_LENGTH_SIZE + 4)
        .map(|bytes| u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn compare_catalog_keys_by(
    record_key: &[u8],
    key: &[u8],
    compare_names: fn(&HfsUniStr, &HfsUniStr) -> Ordering,
) -> Ordering {
    match (deserialize::<CatalogKey>(record_key), deserialize::<CatalogKey>(key)) {
        (Ok(record_key), Ok(key)) => record_key
            .parent_id
            .cmp(&key.parent_id)
            .then_with(|| compare_names(&record_key.node_name, &key.node_name)),
        _ => record_key.cmp(key),
    }
}

/// Catalog key order on HFSX volumes with `kHFSBinaryCompare`.
pub fn compare_catalog_keys_binary(record_key: &[u8], key: &[u8]) -> Ordering {
    compare_catalog_keys_by(record_key, key, HfsUniStr::cmp_binary)
}

/// Catalog key order on HFS+ volumes (and HFSX with `kHFSCaseFolding`).
pub fn compare_catalog_keys_case_folding(record_key: &[u8], key: &[u8]) -> Ordering {
    compare_catalog_keys_by(record_key, key, HfsUniStr::cmp_case_folding)
}

/// Fan-out comparator: every key of the same parent folder is `Equal`.
pub fn compare_parent_ids(record_key: &[u8], key: &[u8]) -> Ordering {
    match (parent_id_of(record_key), parent_id_of(key)) {
        (Some(record_parent), Some(parent)) => record_parent.cmp(&parent),
        _ => record_key.cmp(key),
    }
}

impl Btree {
    /// Walks the tree decoding leaf records as catalog keys and records.
    pub fn walk(&self) -> Walk<'_, CatalogDecoder> {
        self.walk_with()
    }
}

#[derive(Debug)]
pub struct CatalogTree {
    pub btree: Btree,
    binary_compare: bool,
}

impl CatalogTree {
    pub fn new<B: ByteSource + ?Sized>(fork: &B) -> Result<CatalogTree, BtreeError> {
        Ok(Self::from_btree(Btree::new(fork)?))
    }

    pub fn from_btree(btree: Btree) -> CatalogTree {
        let binary_compare = btree.header().key_compare_type == HFS_BINARY_COMPARE;
        CatalogTree {
            btree,
            binary_compare,
        }
    }

    pub fn compare_keys(&self, record_key: &[u8], key: &[u8]) -> Ordering {
        if self.binary_compare {
            compare_catalog_keys_binary(record_key, key)
        } else {
            compare_catalog_keys_case_folding(record_key, key)
        }
    }

    pub fn find_record(
        &self,
        parent_id: CatalogNodeId,
        name: &str,
    ) -> Result<Option<(CatalogKey, CatalogRecord)>, BtreeError> {
        let key = serialize(&CatalogKey::new(parent_id, name))?;
        let leaf = match self.btree.find_leaf_node(&key, |a, b| self.compare_keys(a, b))? {
            Some(leaf) => self.btree.settle_leaf(leaf, &key, |a, b| self.compare_keys(a, b)),
            None => return Ok(None),
        };

        for index in 0..leaf.record_count() {
            let record_key = leaf.record_key_bytes(index)?;
            if self.compare_keys(record_key, &key) == Ordering::Equal {
                let record = RecordRef { node: leaf, index };
                return record.decode::<CatalogDecoder>().map(Some);
            }
        }
        Ok(None)
    }

    /// Folder and file records whose parent is `parent_id`, in key order.
    pub fn children(&self, parent_id: CatalogNodeId) -> Result<Vec<(CatalogKey, CatalogRecord)>, BtreeError> {
        let key = serialize(&CatalogKey::new(parent_id, ""))?;
        let leaves = self.btree.find_leaf_range(&key, compare_parent_ids)?;

        let mut children = Vec::new();
        for leaf in leaves {
            for index in 0..leaf.record_count() {
                let record = RecordRef { node: leaf, index };
                if compare_parent_ids(record.key_bytes()?, &key) != Ordering::Equal {
                    continue;
                }
                match record.decode::<CatalogDecoder>() {
                    Ok((_, CatalogRecord::FolderThread(_) | CatalogRecord::FileThread(_))) => {}
                    Ok(child) => children.push(child),
                    Err(e) => warn!("skipping child {} of node {}: {}", index, leaf.index(), e),
                }
            }
        }
        Ok(children)
    }

    /// Thread record of `cnid`: its parent and its own name.
    pub fn thread(&self, cnid: CatalogNodeId) -> Result<Option<CatalogThread>, BtreeError> {
        match self.find_record(cnid, "")? {
            Some((_, CatalogRecord::FolderThread(thread) | CatalogRecord::FileThread(thread))) => Ok(Some(thread)),
            _ => Ok(None),
        }
    }

    /// Absolute path of `cnid`, rebuilt from thread records up to the root
    /// folder. `None` when a thread record on the way is missing.
    pub fn path_of(&self, cnid: CatalogNodeId) -> Result<Option<String>, BtreeError> {
        let root_folder = SpecialCatalogNodeId::RootFolder as CatalogNodeId;
        let mut components = Vec::new();
        let mut visited = HashSet::new();
        let mut current = cnid;

        while current != root_folder {
            if !visited.insert(current) {
                return Err(BtreeError::LinkCycle(current));
            }
            let thread = match self.thread(current)? {
                Some(thread) => thread,
                None => return Ok(None),
            };
            components.push(thread.node_name.to_string_lossy());
            current = thread.parent_id;
        }

        components.reverse();
        Ok(Some(format!("/{}", components.join("/"))))
    }

    pub fn all_records_iterator(&self) -> Result<BtreeRecordsIterator<'_>, BtreeError> {
        self.btree.leaf_records()
    }
}
