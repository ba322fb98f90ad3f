//! Inode and directory metadata, persisted in the transactional key-value
//! store.
//!
//! Every operation runs inside a caller-supplied `jammdb::Tx`; commit and
//! rollback stay with the caller (see [`crate::fs::Filesystem`] for the
//! scoped helpers). Values in the `inodes` bucket are the 41-byte inode
//! header followed by the variable data payload: packed directory entries
//! for directories, a packed extent list for files on the accelerator path.

use jammdb::Tx;

use crate::common::{unix_now, AccelFsError, AccelFsResult};
use crate::models::{
    encode_entry, extents_from_bytes, extents_to_bytes, DirEntries, Extent, Inode, InodeKind,
    ENTRY_HEAD_BYTES, INODE_HEAD_BYTES, NAME_MAX,
};
use crate::{u64, ROOT_INODE_ID};

pub(crate) const INODES_BUCKET: &str = "inodes";
pub(crate) const SUPER_BUCKET: &str = "superblock";
const NEXT_INODE_KEY: &str = "next_inode";

/// Load an inode header and its trailing data payload.
pub fn load_inode(tx: &Tx, id: u64) -> AccelFsResult<(Inode, Vec<u8>)> {
    let bucket = tx.get_bucket(INODES_BUCKET)?;
    let kv = bucket
        .get_kv(id.to_be_bytes())
        .ok_or(AccelFsError::NoEntry)?;
    let value = kv.value();
    let inode = Inode::from_bytes(value)?;
    Ok((inode, value[INODE_HEAD_BYTES..].to_vec()))
}

/// Upsert an inode; any previous value for `id` is replaced atomically
/// within the transaction.
pub fn put_inode(tx: &Tx, id: u64, inode: &Inode, data: &[u8]) -> AccelFsResult<()> {
    let bucket = tx.get_bucket(INODES_BUCKET)?;
    let mut value = Vec::with_capacity(INODE_HEAD_BYTES + data.len());
    value.extend_from_slice(&inode.to_bytes());
    value.extend_from_slice(data);
    bucket.put(id.to_be_bytes(), value)?;
    Ok(())
}

/// Allocate a fresh inode id from the counter persisted in the superblock
/// bucket. The increment commits or rolls back with the caller's
/// transaction.
pub fn next_inode_id(tx: &Tx) -> AccelFsResult<u64> {
    let bucket = tx.get_bucket(SUPER_BUCKET)?;
    let id = bucket
        .get_kv(NEXT_INODE_KEY)
        .map(|kv| u64!(kv.value()))
        .unwrap_or(1);
    bucket.put(NEXT_INODE_KEY, (id + 1).to_be_bytes())?;
    Ok(id)
}

/// Resolve `name` within a directory by linear scan.
pub fn resolve_in_directory(tx: &Tx, dir_id: u64, name: &[u8]) -> AccelFsResult<u64> {
    let (dir, data) = load_inode(tx, dir_id)?;
    if dir.kind != InodeKind::Directory {
        return Err(AccelFsError::NotDirectory);
    }

    for entry in DirEntries::new(&data) {
        // Names are not null-terminated; reject on length before touching
        // the bytes.
        if entry.name.len() != name.len() {
            continue;
        }
        if entry.name == name {
            return Ok(entry.inode_id);
        }
    }

    Err(AccelFsError::NoEntry)
}

/// Append a (name, id) entry to a directory.
///
/// Rebuilds the whole entry blob, so inserting is O(directory size) and
/// building an n-entry directory is O(n^2). Directories are expected to
/// stay small.
pub fn append_entry_to_directory(
    tx: &Tx,
    dir_id: u64,
    name: &[u8],
    new_id: u64,
) -> AccelFsResult<()> {
    if name.is_empty() || name.len() > NAME_MAX {
        return Err(AccelFsError::InvalidArgument);
    }

    let (mut dir, data) = load_inode(tx, dir_id)?;
    if dir.kind != InodeKind::Directory {
        return Err(AccelFsError::NotDirectory);
    }

    for entry in DirEntries::new(&data) {
        if entry.name.len() == name.len() && entry.name == name {
            return Err(AccelFsError::AlreadyExists);
        }
    }

    let mut blob = data;
    blob.reserve(ENTRY_HEAD_BYTES + name.len());
    encode_entry(&mut blob, new_id, name);

    dir.length = blob.len() as u64;
    dir.modified = unix_now();
    put_inode(tx, dir_id, &dir, &blob)
}

/// Create a directory under `parent_id`, seeded with `.` and `..` entries.
pub fn create_directory_in_directory(tx: &Tx, parent_id: u64, name: &[u8]) -> AccelFsResult<u64> {
    let id = next_inode_id(tx)?;
    append_entry_to_directory(tx, parent_id, name, id)?;

    let mut blob = Vec::new();
    encode_entry(&mut blob, id, b".");
    encode_entry(&mut blob, parent_id, b"..");

    let mut inode = Inode::new_directory(0, 0, unix_now());
    inode.length = blob.len() as u64;
    put_inode(tx, id, &inode, &blob)?;
    Ok(id)
}

/// Create an empty file under `parent_id`.
pub fn create_file_in_directory(tx: &Tx, parent_id: u64, name: &[u8]) -> AccelFsResult<u64> {
    let id = next_inode_id(tx)?;
    append_entry_to_directory(tx, parent_id, name, id)?;

    put_inode(tx, id, &Inode::new_file(0, 0, unix_now()), &[])?;
    Ok(id)
}

/// One-time bootstrap of the root directory (inode id 0). The root is its
/// own parent, so both `.` and `..` resolve back to it. A second call on
/// the same volume is a no-op.
pub fn create_root_directory(tx: &Tx) -> AccelFsResult<()> {
    match load_inode(tx, ROOT_INODE_ID) {
        Ok(_) => return Ok(()),
        Err(AccelFsError::NoEntry) => {}
        Err(e) => return Err(e),
    }

    let mut blob = Vec::new();
    encode_entry(&mut blob, ROOT_INODE_ID, b".");
    encode_entry(&mut blob, ROOT_INODE_ID, b"..");

    let mut inode = Inode::new_directory(0, 0, unix_now());
    inode.length = blob.len() as u64;
    put_inode(tx, ROOT_INODE_ID, &inode, &blob)
}

/// Record the extent list backing a file's content, along with the logical
/// byte length covered by it.
pub fn set_file_extents(
    tx: &Tx,
    id: u64,
    extents: &[Extent],
    byte_length: u64,
) -> AccelFsResult<()> {
    let (mut inode, _) = load_inode(tx, id)?;
    if inode.kind != InodeKind::File {
        return Err(AccelFsError::InvalidArgument);
    }

    inode.length = byte_length;
    inode.modified = unix_now();
    put_inode(tx, id, &inode, &extents_to_bytes(extents))
}

/// Load a file's extent list and logical byte length.
pub fn load_file_extents(tx: &Tx, id: u64) -> AccelFsResult<(Vec<Extent>, u64)> {
    let (inode, data) = load_inode(tx, id)?;
    if inode.kind != InodeKind::File {
        return Err(AccelFsError::InvalidArgument);
    }

    Ok((extents_from_bytes(&data)?, inode.length))
}
