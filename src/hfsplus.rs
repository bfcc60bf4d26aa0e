use std::fmt;

use tracing::{debug, info};

use self::{
    btree::{catalog::CatalogTree, extent::ExtentTree, BtreeError},
    data_source::*,
    layout::consts::*,
    layout::*,
};

pub mod btree;
pub mod data_source;
pub mod layout;

#[cfg(test)]
pub(crate) mod testing;

#[derive(Debug)]
pub enum HfsPlusError {
    BtreeError(BtreeError),
    DataSourceError(DataSourceError),
    InvalidVolumeSignature([u8; 2], u16),
    BtreesAreNotInitialized,
    IncompleteFork {
        file_id: CatalogNodeId,
        total_blocks: u32,
        found_blocks: u64,
    },
}

pub struct HfsPlus<'a, S: ByteSource + ?Sized> {
    data_source: &'a S,
    volume_header: VolumeHeader,

    extent_btree: Option<ExtentTree>,
    catalog_btree: Option<CatalogTree>,
}

impl<'a, S: ByteSource + ?Sized> HfsPlus<'a, S> {
    pub fn new(data_source: &'a S) -> Result<HfsPlus<'a, S>, HfsPlusError> {
        let volume_header: VolumeHeader = data_source
            .read_at(VOLUME_HEADER_OFFSET, VOLUME_HEADER_SIZE)?
            .data;

        if !volume_header.check_signature() {
            return Err(HfsPlusError::InvalidVolumeSignature(
                volume_header.signature,
                volume_header.version,
            ));
        }

        info!(
            "HFS{} volume: block size {}, {} files, {} folders",
            if volume_header.is_hfsx() { "X" } else { "+" },
            volume_header.block_size,
            volume_header.file_count,
            volume_header.folder_count
        );

        Ok(Self {
            data_source,
            volume_header,

            extent_btree: None,
            catalog_btree: None,
        })
    }

    pub fn get_volume_header(&self) -> &VolumeHeader {
        &self.volume_header
    }

    pub fn block_size(&self) -> u32 {
        self.volume_header.block_size
    }

    /// Byte source of a special file's data fork. Extents past the eight
    /// inline ones come from the extents overflow tree, which must already be
    /// loaded when they are needed.
    fn special_file_fork(
        &self,
        file_id: SpecialCatalogNodeId,
        fork: &ForkData,
    ) -> Result<ForkSource<'a, S>, HfsPlusError> {
        let file_id = file_id as CatalogNodeId;
        let mut extents = fork.extents.to_vec();
        let mut found_blocks = fork.inline_blocks();

        if found_blocks < fork.total_blocks as u64 {
            let extent_btree = self
                .extent_btree
                .as_ref()
                .ok_or(HfsPlusError::BtreesAreNotInitialized)?;
            let overflow = extent_btree.overflow_extents(file_id, FORK_TYPE_DATA)?;
            debug!("file {}: {} overflow extents", file_id, overflow.len());
            found_blocks += overflow.iter().map(|e| e.block_count as u64).sum::<u64>();
            extents.extend(overflow);
        }

        if found_blocks < fork.total_blocks as u64 {
            return Err(HfsPlusError::IncompleteFork {
                file_id,
                total_blocks: fork.total_blocks,
                found_blocks,
            });
        }

        Ok(ForkSource::new(
            self.data_source,
            self.volume_header.block_size,
            fork.logical_size,
            extents,
        ))
    }

    pub fn init_btrees(&mut self) -> Result<(), HfsPlusError> {
        let extents_file = self.volume_header.extents_file;
        let fork = self.special_file_fork(SpecialCatalogNodeId::ExtentsFile, &extents_file)?;
        self.extent_btree = Some(ExtentTree::new(&fork)?);

        let catalog_file = self.volume_header.catalog_file;
        let fork = self.special_file_fork(SpecialCatalogNodeId::CatalogFile, &catalog_file)?;
        self.catalog_btree = Some(CatalogTree::new(&fork)?);
        Ok(())
    }

    pub fn catalog(&self) -> Result<&CatalogTree, HfsPlusError> {
        self.catalog_btree
            .as_ref()
            .ok_or(HfsPlusError::BtreesAreNotInitialized)
    }

    pub fn extents(&self) -> Result<&ExtentTree, HfsPlusError> {
        self.extent_btree
            .as_ref()
            .ok_or(HfsPlusError::BtreesAreNotInitialized)
    }
}

impl From<DataSourceError> for HfsPlusError {
    fn from(value: DataSourceError) -> Self {
        HfsPlusError::DataSourceError(value)
    }
}

impl From<BtreeError> for HfsPlusError {
    fn from(value: BtreeError) -> Self {
        HfsPlusError::BtreeError(value)
    }
}

impl fmt::Display for HfsPlusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BtreeError(e) => write!(f, "{e}"),
            Self::DataSourceError(e) => write!(f, "{e}"),
            Self::InvalidVolumeSignature(signature, version) => write!(
                f,
                "not an HFS+ volume: signature {:02x?}, version {}",
                signature, version
            ),
            Self::BtreesAreNotInitialized => write!(f, "B-trees are not loaded"),
            Self::IncompleteFork {
                file_id,
                total_blocks,
                found_blocks,
            } => write!(
                f,
                "file {file_id} has {total_blocks} blocks but only {found_blocks} are mapped"
            ),
        }
    }
}

impl std::error::Error for HfsPlusError {}
