//! accelfs - offloading byte-stream transformation pipelines onto an FPGA
//! accelerator card.
//!
//! The crate is organised bottom-up:
//!
//! - [`models`] / [`storage`]: extent-mapped block storage and the packed
//!   on-disk record formats.
//! - [`inode`] / [`fs`]: file and directory metadata persisted in a
//!   transactional key-value store (jammdb), keyed by 64-bit inode id.
//! - [`pipeline`]: compiles an ordered operator list into an enable mask and
//!   a stream-switch routing table.
//! - [`fpga`] / [`card`] / [`job`]: the synchronous job protocol against the
//!   card, one job in flight at a time.
//! - [`data`] / [`runner`]: source/sink descriptions and the
//!   configure-map-run control flow.

pub mod card;
pub mod common;
pub mod data;
pub mod fpga;
pub mod fs;
pub mod inode;
pub mod job;
pub mod models;
pub mod pipeline;
pub mod runner;
pub mod storage;

#[cfg(test)]
mod protocol_test;

pub use common::{AccelFsError, AccelFsResult};
pub use fs::Filesystem;
pub use models::Extent;

#[macro_export]
macro_rules! u32 {
    ($x:expr) => {
        u32::from_be_bytes($x.try_into().unwrap())
    };
}

#[macro_export]
macro_rules! u64 {
    ($x:expr) => {
        u64::from_be_bytes($x.try_into().unwrap())
    };
}

/// Storage block size in bytes. Extent offsets and lengths count these.
pub const BLOCK_SIZE: u64 = 4096;

/// Capacity of the emulated in-memory device, in blocks (128 MiB).
pub const NUM_BLOCKS: u64 = 128 * 256;

/// Inode id of the root directory, fixed at volume initialization.
pub const ROOT_INODE_ID: u64 = 0;
