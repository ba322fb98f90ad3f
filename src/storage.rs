//! Extent-mapped storage backend.
//!
//! Logical byte offsets are translated through the active extent list: the
//! walk keeps a running extent index plus the logical offset at which that
//! extent begins, advancing past extents that end at or before the current
//! position and copying at most the bytes remaining in the current extent.
//!
//! This layer provides no locking; `&mut self` in the trait makes callers
//! serialize.

use log::debug;

use crate::common::{AccelFsError, AccelFsResult};
use crate::models::Extent;
use crate::{BLOCK_SIZE, NUM_BLOCKS};

#[derive(Debug, Clone, Copy)]
pub struct StorageMetadata {
    pub num_blocks: u64,
    pub block_size: u64,
}

/// Block storage addressed through an extent list.
///
/// `read` and `write` operate on the logical address space formed by
/// concatenating the active extents. Requests that run past the mapped
/// region fail with `InvalidArgument` rather than faulting.
pub trait StorageBackend {
    fn metadata(&self) -> StorageMetadata;

    /// Replace the extent list consulted by subsequent reads and writes.
    fn set_active_extent_list(&mut self, extents: &[Extent]);

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> AccelFsResult<()>;

    fn write(&mut self, offset: u64, buf: &[u8]) -> AccelFsResult<()>;
}

/// One contiguous piece of a logical request, resolved to physical bytes.
struct Span {
    physical: usize,
    buffer: usize,
    len: usize,
}

/// Emulated card storage held in host memory, used in place of the real
/// NVMe drive. The backing buffer is allocated lazily on first access.
pub struct InMemoryStorage {
    store: Option<Vec<u8>>,
    extents: Vec<Extent>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            store: None,
            extents: Vec::new(),
        }
    }

    fn store_mut(&mut self) -> &mut Vec<u8> {
        self.store
            .get_or_insert_with(|| vec![0u8; (NUM_BLOCKS * BLOCK_SIZE) as usize])
    }

    /// Walk the extent list and break `[offset, offset + length)` into
    /// physically contiguous spans.
    fn spans(&self, offset: u64, length: u64) -> AccelFsResult<Vec<Span>> {
        let capacity = NUM_BLOCKS * BLOCK_SIZE;
        let mut spans = Vec::new();

        let mut remaining = length;
        let mut current_offset = offset;
        let mut extent = 0usize;
        // Logical offset at which `extent` begins.
        let mut extent_offset = 0u64;

        while remaining > 0 {
            // Advance to the extent containing the current logical offset.
            while extent < self.extents.len()
                && extent_offset + self.extents[extent].length * BLOCK_SIZE <= current_offset
            {
                extent_offset += self.extents[extent].length * BLOCK_SIZE;
                extent += 1;
            }
            if extent == self.extents.len() {
                // The request runs past the mapped region.
                return Err(AccelFsError::InvalidArgument);
            }

            let within = current_offset - extent_offset;
            let left_in_extent = self.extents[extent].length * BLOCK_SIZE - within;
            let len = remaining.min(left_in_extent);

            let physical = self.extents[extent].offset * BLOCK_SIZE + within;
            if physical + len > capacity {
                return Err(AccelFsError::InvalidArgument);
            }

            spans.push(Span {
                physical: physical as usize,
                buffer: (current_offset - offset) as usize,
                len: len as usize,
            });
            current_offset += len;
            remaining -= len;
        }

        Ok(spans)
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for InMemoryStorage {
    fn metadata(&self) -> StorageMetadata {
        StorageMetadata {
            num_blocks: NUM_BLOCKS,
            block_size: BLOCK_SIZE,
        }
    }

    fn set_active_extent_list(&mut self, extents: &[Extent]) {
        debug!("activating extent list with {} extents", extents.len());
        self.extents = extents.to_vec();
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> AccelFsResult<()> {
        let spans = self.spans(offset, buf.len() as u64)?;
        let store = self.store_mut();
        for span in spans {
            buf[span.buffer..span.buffer + span.len]
                .copy_from_slice(&store[span.physical..span.physical + span.len]);
        }
        Ok(())
    }

    fn write(&mut self, offset: u64, buf: &[u8]) -> AccelFsResult<()> {
        let spans = self.spans(offset, buf.len() as u64)?;
        let store = self.store_mut();
        for span in spans {
            store[span.physical..span.physical + span.len]
                .copy_from_slice(&buf[span.buffer..span.buffer + span.len]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn roundtrip_within_single_extent() {
        let mut storage = InMemoryStorage::new();
        storage.set_active_extent_list(&[Extent { offset: 4, length: 2 }]);

        let data = patterned(100);
        storage.write(17, &data).unwrap();

        let mut out = vec![0u8; 100];
        storage.read(17, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn roundtrip_spanning_uneven_extents() {
        let mut storage = InMemoryStorage::new();
        // 1 + 3 + 2 blocks, deliberately non-adjacent and out of order
        // physically.
        storage.set_active_extent_list(&[
            Extent { offset: 9, length: 1 },
            Extent { offset: 2, length: 3 },
            Extent { offset: 20, length: 2 },
        ]);

        // Crosses all three extents.
        let data = patterned(5 * BLOCK_SIZE as usize);
        storage.write(BLOCK_SIZE / 2, &data).unwrap();

        let mut out = vec![0u8; data.len()];
        storage.read(BLOCK_SIZE / 2, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn distinct_extent_lists_address_distinct_blocks() {
        let mut storage = InMemoryStorage::new();

        storage.set_active_extent_list(&[Extent { offset: 0, length: 1 }]);
        storage.write(0, b"first").unwrap();

        storage.set_active_extent_list(&[Extent { offset: 1, length: 1 }]);
        storage.write(0, b"other").unwrap();

        storage.set_active_extent_list(&[Extent { offset: 0, length: 1 }]);
        let mut out = [0u8; 5];
        storage.read(0, &mut out).unwrap();
        assert_eq!(&out, b"first");
    }

    #[test]
    fn io_past_mapped_region_is_reported() {
        let mut storage = InMemoryStorage::new();
        storage.set_active_extent_list(&[Extent { offset: 0, length: 1 }]);

        let mut buf = vec![0u8; BLOCK_SIZE as usize + 1];
        assert!(matches!(
            storage.read(0, &mut buf),
            Err(AccelFsError::InvalidArgument)
        ));
        assert!(matches!(
            storage.write(BLOCK_SIZE, b"x"),
            Err(AccelFsError::InvalidArgument)
        ));
    }

    #[test]
    fn io_with_empty_extent_list_is_reported() {
        let mut storage = InMemoryStorage::new();
        assert!(matches!(
            storage.write(0, b"x"),
            Err(AccelFsError::InvalidArgument)
        ));
    }

    #[test]
    fn zero_length_io_succeeds_without_extents() {
        let mut storage = InMemoryStorage::new();
        storage.read(0, &mut []).unwrap();
        storage.write(0, &[]).unwrap();
    }
}
