use std::{
    cell::RefCell,
    fmt,
    fs::File,
    io::{self, Cursor, Read, Seek},
};

use bincode::{config::Config, Decode, Encode};

use super::layout::ExtentDescriptor;

pub trait DataSourceSource: Read + Seek {}

impl DataSourceSource for File {}
impl DataSourceSource for Cursor<Vec<u8>> {}
impl<'a> DataSourceSource for Cursor<&'a [u8]> {}

#[derive(Debug)]
pub struct DataSource<S: DataSourceSource> {
    source: RefCell<S>,
}

#[derive(Debug, Clone, Copy)]
pub struct DataPointer<T> {
    pub data: T,
    pub position: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSourceError {
    ReadDataError,
    OutOfRange { position: u64, size: u64, available: u64 },
    SerializeError,
    DeserializeError,
}

/// Bounded random access to a byte stream: a whole volume, or a single fork of it.
pub trait ByteSource {
    fn size(&self) -> Result<u64, DataSourceError>;

    /// Fills `buf` from `position`. A short read is an error.
    fn read_into(&self, position: u64, buf: &mut [u8]) -> Result<(), DataSourceError>;

    fn read_bytes_at(&self, position: u64, size: u64) -> Result<Vec<u8>, DataSourceError> {
        let available = self.size()?;
        if position.checked_add(size).map_or(true, |end| end > available) {
            return Err(DataSourceError::OutOfRange {
                position,
                size,
                available,
            });
        }
        let mut buf = vec![0u8; size as usize];
        self.read_into(position, buf.as_mut_slice())?;
        Ok(buf)
    }

    fn read_at<R: Decode<()>>(&self, position: u64, size: u64) -> Result<DataPointer<R>, DataSourceError> {
        let bytes = self.read_bytes_at(position, size)?;
        deserialize(&bytes).map(|data| DataPointer { data, position })
    }
}

/// All on-disk structures are big-endian with fixed-width integers.
pub fn bincode_config() -> impl Config {
    bincode::config::legacy().with_big_endian()
}

pub fn deserialize<R: Decode<()>>(data: &[u8]) -> Result<R, DataSourceError> {
    bincode::decode_from_slice(data, bincode_config())
        .map_err(|_| DataSourceError::DeserializeError)
        .map(|(result, _)| result)
}

pub fn serialize<W: Encode>(data: &W) -> Result<Vec<u8>, DataSourceError> {
    bincode::encode_to_vec(data, bincode_config()).map_err(|_| DataSourceError::SerializeError)
}

impl<S: DataSourceSource> ByteSource for DataSource<S> {
    fn size(&self) -> Result<u64, DataSourceError> {
        self.source
            .borrow_mut()
            .seek(io::SeekFrom::End(0))
            .map_err(|_| DataSourceError::ReadDataError)
    }

    fn read_into(&self, position: u64, buf: &mut [u8]) -> Result<(), DataSourceError> {
        let mut source = self.source.borrow_mut();
        source
            .seek(io::SeekFrom::Start(position))
            .map_err(|_| DataSourceError::ReadDataError)?;
        source
            .read_exact(buf)
            .map_err(|_| DataSourceError::ReadDataError)
    }
}

impl<S: DataSourceSource> DataSource<S> {
    pub fn from_source(source: S) -> DataSource<S> {
        DataSource {
            source: RefCell::new(source),
        }
    }
}

impl ByteSource for [u8] {
    fn size(&self) -> Result<u64, DataSourceError> {
        Ok(self.len() as u64)
    }

    fn read_into(&self, position: u64, buf: &mut [u8]) -> Result<(), DataSourceError> {
        let out_of_range = DataSourceError::OutOfRange {
            position,
            size: buf.len() as u64,
            available: self.len() as u64,
        };
        let start = usize::try_from(position).map_err(|_| out_of_range.clone())?;
        let bytes = start
            .checked_add(buf.len())
            .and_then(|end| self.get(start..end))
            .ok_or(out_of_range)?;
        buf.copy_from_slice(bytes);
        Ok(())
    }
}

impl ByteSource for Vec<u8> {
    fn size(&self) -> Result<u64, DataSourceError> {
        self.as_slice().size()
    }

    fn read_into(&self, position: u64, buf: &mut [u8]) -> Result<(), DataSourceError> {
        self.as_slice().read_into(position, buf)
    }
}

/// A fork's logical byte stream, stitched together from allocation-block
/// extents of the underlying volume.
#[derive(Debug)]
pub struct ForkSource<'a, B: ByteSource + ?Sized> {
    volume: &'a B,
    block_size: u64,
    logical_size: u64,
    extents: Vec<ExtentDescriptor>,
}

impl<'a, B: ByteSource + ?Sized> ForkSource<'a, B> {
    pub fn new(
        volume: &'a B,
        block_size: u32,
        logical_size: u64,
        extents: impl IntoIterator<Item = ExtentDescriptor>,
    ) -> Self {
        Self {
            volume,
            block_size: block_size as u64,
            logical_size,
            extents: extents
                .into_iter()
                .filter(|extent| extent.block_count != 0)
                .collect(),
        }
    }

    pub fn extents(&self) -> &[ExtentDescriptor] {
        &self.extents
    }

    fn mapped_size(&self) -> u64 {
        self.extents
            .iter()
            .map(|extent| extent.block_count as u64 * self.block_size)
            .sum()
    }
}

impl<'a, B: ByteSource + ?Sized> ByteSource for ForkSource<'a, B> {
    fn size(&self) -> Result<u64, DataSourceError> {
        Ok(self.logical_size.min(self.mapped_size()))
    }

    fn read_into(&self, position: u64, buf: &mut [u8]) -> Result<(), DataSourceError> {
        let available = self.size()?;
        let size = buf.len() as u64;
        if position.checked_add(size).map_or(true, |end| end > available) {
            return Err(DataSourceError::OutOfRange {
                position,
                size,
                available,
            });
        }

        let mut done = 0usize;
        let mut extent_start = 0u64;
        for extent in &self.extents {
            if done == buf.len() {
                break;
            }
            let extent_length = extent.block_count as u64 * self.block_size;
            let extent_end = extent_start + extent_length;
            let wanted = position + done as u64;
            if wanted < extent_end {
                let offset_in_extent = wanted - extent_start;
                let chunk = (extent_end - wanted).min((buf.len() - done) as u64) as usize;
                let volume_position = extent.start_block as u64 * self.block_size + offset_in_extent;
                self.volume
                    .read_into(volume_position, &mut buf[done..done + chunk])?;
                done += chunk;
            }
            extent_start = extent_end;
        }

        if done != buf.len() {
            return Err(DataSourceError::ReadDataError);
        }
        Ok(())
    }
}

impl fmt::Display for DataSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadDataError => write!(f, "read from data source failed"),
            Self::OutOfRange {
                position,
                size,
                available,
            } => write!(
                f,
                "read of {size} bytes at {position} is outside of {available} available bytes"
            ),
            Self::SerializeError => write!(f, "cannot encode structure"),
            Self::DeserializeError => write!(f, "cannot decode structure"),
        }
    }
}

impl std::error::Error for DataSourceError {}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn slice_source_rejects_reads_past_the_end() {
        let bytes = vec![1u8, 2, 3, 4];
        assert_eq!(bytes.read_bytes_at(1, 3).unwrap(), vec![2, 3, 4]);
        assert_eq!(
            bytes.read_bytes_at(2, 3),
            Err(DataSourceError::OutOfRange {
                position: 2,
                size: 3,
                available: 4
            })
        );
        assert!(bytes.read_bytes_at(u64::MAX, 1).is_err());
    }

    #[test]
    fn file_source_reads_through_seek() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&[0xAB; 16]).unwrap();
        file.write_all(&[0x00, 0x2A]).unwrap();

        let source = DataSource::from_source(file);
        assert_eq!(source.size().unwrap(), 18);
        let value: DataPointer<u16> = source.read_at(16, 2).unwrap();
        assert_eq!(value.data, 42);
        assert_eq!(value.position, 16);
        assert_eq!(source.read_bytes_at(17, 2), Err(DataSourceError::OutOfRange {
            position: 17,
            size: 2,
            available: 18
        }));
    }

    #[test]
    fn fork_source_stitches_extents_in_order() {
        // four blocks of 4 bytes each, block n filled with n
        let volume: Vec<u8> = (0u8..4).flat_map(|block| [block; 4]).collect();
        let fork = ForkSource::new(
            &volume,
            4,
            10,
            [
                ExtentDescriptor {
                    start_block: 3,
                    block_count: 1,
                },
                ExtentDescriptor {
                    start_block: 1,
                    block_count: 2,
                },
                ExtentDescriptor {
                    start_block: 0,
                    block_count: 0,
                },
            ],
        );

        assert_eq!(fork.size().unwrap(), 10);
        assert_eq!(fork.extents().len(), 2);
        assert_eq!(
            fork.read_bytes_at(2, 8).unwrap(),
            vec![3, 3, 1, 1, 1, 1, 2, 2]
        );
        assert!(fork.read_bytes_at(8, 4).is_err());
    }

    #[test]
    fn big_endian_config_round_trips_fixed_integers() {
        let bytes = serialize(&(0x0102u16, 0x0304_0506u32)).unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4, 5, 6]);
        let decoded: (u16, u32) = deserialize(&bytes).unwrap();
        assert_eq!(decoded, (0x0102, 0x0304_0506));
    }
}
