//! Data endpoints for a pipeline run.
//!
//! A source or sink is ultimately just a typed address in the job record;
//! these wrappers build that address from the caller's intent (a host
//! buffer, a card DRAM region, a stored file, the null device) and carry
//! the extent list a file endpoint needs mapped before the run starts.

use crate::common::{AccelFsError, AccelFsResult};
use crate::fpga::{Address, AddressType, MapType};
use crate::fs::Filesystem;
use crate::models::Extent;
use crate::BLOCK_SIZE;

/// Where the first operator reads its bytes from.
#[derive(Debug)]
pub struct DataSource {
    address: Address,
    extents: Option<Vec<Extent>>,
}

impl DataSource {
    /// Read from a host memory buffer. The buffer must stay alive and
    /// unmoved until the run completes.
    pub fn host(buf: &[u8]) -> Self {
        Self {
            address: Address {
                addr: buf.as_ptr() as u64,
                size: buf.len() as u32,
                ty: AddressType::Host,
                map: MapType::None,
            },
            extents: None,
        }
    }

    /// Read from a region of card-attached DRAM.
    pub fn card_dram(addr: u64, size: u32) -> Self {
        Self {
            address: Address {
                addr,
                size,
                ty: AddressType::CardDram,
                map: MapType::None,
            },
            extents: None,
        }
    }

    /// Card-generated pattern data; useful for throughput measurements
    /// with no memory behind the source.
    pub fn random(size: u32) -> Self {
        Self {
            address: Address {
                addr: 0,
                size,
                ty: AddressType::Random,
                map: MapType::None,
            },
            extents: None,
        }
    }

    /// Read a byte range of a stored file. A `size` of zero means
    /// everything from `offset` to the end of the file.
    pub fn file(
        fs: &Filesystem,
        path: &str,
        offset: u64,
        size: u64,
        ty: AddressType,
        map: MapType,
    ) -> AccelFsResult<Self> {
        let (extents, length) = fs.file_extents(path)?;
        if offset > length {
            return Err(AccelFsError::InvalidArgument);
        }
        let size = if size == 0 { length - offset } else { size };
        if offset + size > length {
            return Err(AccelFsError::InvalidArgument);
        }
        Ok(Self {
            address: Address {
                // File addresses are block-granular device offsets; the
                // extent map translates them on the card.
                addr: offset / BLOCK_SIZE * BLOCK_SIZE,
                size: size as u32,
                ty,
                map,
            },
            extents: Some(extents),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub(crate) fn extents(&self) -> Option<&[Extent]> {
        self.extents.as_deref()
    }
}

/// Where the last operator writes its bytes to.
#[derive(Debug)]
pub struct DataSink {
    address: Address,
    extents: Option<Vec<Extent>>,
}

impl DataSink {
    /// Write into a host memory buffer. The buffer must stay alive and
    /// unmoved until the run completes.
    pub fn host(buf: &mut [u8]) -> Self {
        Self {
            address: Address {
                addr: buf.as_mut_ptr() as u64,
                size: buf.len() as u32,
                ty: AddressType::Host,
                map: MapType::None,
            },
            extents: None,
        }
    }

    /// Write into a region of card-attached DRAM.
    pub fn card_dram(addr: u64, size: u32) -> Self {
        Self {
            address: Address {
                addr,
                size,
                ty: AddressType::CardDram,
                map: MapType::None,
            },
            extents: None,
        }
    }

    /// Discard the output; the run still reports how many bytes arrived.
    pub fn null() -> Self {
        Self {
            address: Address::none(),
            extents: None,
        }
    }

    /// Write a byte range of a stored file. A `size` of zero means
    /// everything from `offset` to the end of the file's extents.
    pub fn file(
        fs: &Filesystem,
        path: &str,
        offset: u64,
        size: u64,
        ty: AddressType,
        map: MapType,
    ) -> AccelFsResult<Self> {
        let (extents, length) = fs.file_extents(path)?;
        let capacity: u64 = extents.iter().map(|e| e.length * BLOCK_SIZE).sum();
        if offset > capacity {
            return Err(AccelFsError::InvalidArgument);
        }
        let size = if size == 0 { length.max(capacity) - offset } else { size };
        Ok(Self {
            address: Address {
                addr: offset / BLOCK_SIZE * BLOCK_SIZE,
                size: size as u32,
                ty,
                map,
            },
            extents: Some(extents),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub(crate) fn extents(&self) -> Option<&[Extent]> {
        self.extents.as_deref()
    }
}
