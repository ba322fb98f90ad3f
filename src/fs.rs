//! Volume handle: owns the metadata database and the transaction
//! discipline.
//!
//! Storage transactions follow acquire-scope-commit/abort; the closure
//! helpers below commit on success and roll back on drop. Callers must not
//! hold a transaction across a hardware job call - the two resources have
//! independent failure and retry policies.

use std::path::Path;

use jammdb::{Tx, DB};
use log::debug;

use crate::common::{AccelFsError, AccelFsResult};
use crate::inode::{self, INODES_BUCKET, SUPER_BUCKET};
use crate::models::Extent;
use crate::ROOT_INODE_ID;

pub struct Filesystem {
    db: DB,
}

impl Filesystem {
    /// Open (or create) a volume. On a fresh database this bootstraps the
    /// metadata buckets, the inode id counter, and the root directory -
    /// exactly once; reopening an existing volume leaves it untouched.
    pub fn open<P: AsRef<Path>>(path: P) -> AccelFsResult<Self> {
        let db = DB::open(path)?;
        let fs = Self { db };
        fs.write_txn(|tx| {
            tx.get_or_create_bucket(INODES_BUCKET)?;
            tx.get_or_create_bucket(SUPER_BUCKET)?;
            inode::create_root_directory(tx)
        })?;
        debug!("volume opened");
        Ok(fs)
    }

    /// Run `f` inside a read-only transaction.
    pub fn read_txn<R>(&self, f: impl FnOnce(&Tx) -> AccelFsResult<R>) -> AccelFsResult<R> {
        let tx = self.db.tx(false)?;
        f(&tx)
    }

    /// Run `f` inside a writable transaction; commits if `f` succeeds,
    /// rolls back otherwise.
    pub fn write_txn<R>(&self, f: impl FnOnce(&Tx) -> AccelFsResult<R>) -> AccelFsResult<R> {
        let tx = self.db.tx(true)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Resolve an absolute path to an inode id, component by component.
    pub fn resolve_path(&self, path: &str) -> AccelFsResult<u64> {
        self.read_txn(|tx| resolve_components(tx, path))
    }

    pub fn create_file(&self, path: &str) -> AccelFsResult<u64> {
        let (parent, name) = split_parent(path)?;
        self.write_txn(|tx| {
            let parent_id = resolve_components(tx, parent)?;
            inode::create_file_in_directory(tx, parent_id, name.as_bytes())
        })
    }

    pub fn create_directory(&self, path: &str) -> AccelFsResult<u64> {
        let (parent, name) = split_parent(path)?;
        self.write_txn(|tx| {
            let parent_id = resolve_components(tx, parent)?;
            inode::create_directory_in_directory(tx, parent_id, name.as_bytes())
        })
    }

    /// Load the extent list and logical byte length backing a file.
    pub fn file_extents(&self, path: &str) -> AccelFsResult<(Vec<Extent>, u64)> {
        self.read_txn(|tx| {
            let id = resolve_components(tx, path)?;
            inode::load_file_extents(tx, id)
        })
    }

    /// Bind a file's content to an extent list covering `byte_length`
    /// logical bytes.
    pub fn set_file_extents(
        &self,
        path: &str,
        extents: &[Extent],
        byte_length: u64,
    ) -> AccelFsResult<()> {
        self.write_txn(|tx| {
            let id = resolve_components(tx, path)?;
            inode::set_file_extents(tx, id, extents, byte_length)
        })
    }
}

fn resolve_components(tx: &Tx, path: &str) -> AccelFsResult<u64> {
    let mut current = ROOT_INODE_ID;
    for component in path.split('/').filter(|c| !c.is_empty()) {
        current = inode::resolve_in_directory(tx, current, component.as_bytes())?;
    }
    Ok(current)
}

fn split_parent(path: &str) -> AccelFsResult<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    let (parent, name) = trimmed.rsplit_once('/').unwrap_or(("", trimmed));
    if name.is_empty() {
        return Err(AccelFsError::InvalidArgument);
    }
    Ok((parent, name))
}
