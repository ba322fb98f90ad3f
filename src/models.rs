//! Packed on-disk records shared by the inode layer and the accelerator
//! path.
//!
//! Everything here is hand-encoded big-endian: the same byte layout crosses
//! the host/device boundary when extent lists are mapped into the card, so
//! the host byte order never leaks into persisted data.

use crate::common::{AccelFsError, AccelFsResult};
use crate::{u32, u64};

/// Longest directory entry name; `name_len` is stored in a single byte.
pub const NAME_MAX: usize = 255;

/// Serialized inode header size: kind, length, user, group, three
/// timestamps.
pub const INODE_HEAD_BYTES: usize = 41;

/// Directory entry head: inode id (8) + name_len (1). The name bytes follow
/// immediately, not null-terminated.
pub const ENTRY_HEAD_BYTES: usize = 9;

/// Serialized extent size: offset (8) + length (8), both in block units.
pub const EXTENT_BYTES: usize = 16;

/// A contiguous run of physical storage blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    /// Starting block number.
    pub offset: u64,
    /// Run length in blocks.
    pub length: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    File,
    Directory,
}

impl InodeKind {
    fn to_u8(self) -> u8 {
        match self {
            InodeKind::File => 0,
            InodeKind::Directory => 1,
        }
    }

    fn from_u8(raw: u8) -> AccelFsResult<Self> {
        match raw {
            0 => Ok(InodeKind::File),
            1 => Ok(InodeKind::Directory),
            _ => Err(AccelFsError::Corrupt),
        }
    }
}

/// Fixed-size inode metadata record.
///
/// `length` is the byte length of the trailing variable data: the packed
/// entry blob for directories, the packed extent list for files on the
/// accelerator path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub kind: InodeKind,
    pub length: u64,
    pub user: u32,
    pub group: u32,
    pub accessed: u64,
    pub modified: u64,
    pub created: u64,
}

impl Inode {
    pub fn new_file(user: u32, group: u32, now: u64) -> Self {
        Self {
            kind: InodeKind::File,
            length: 0,
            user,
            group,
            accessed: now,
            modified: now,
            created: now,
        }
    }

    pub fn new_directory(user: u32, group: u32, now: u64) -> Self {
        Self {
            kind: InodeKind::Directory,
            length: 0,
            user,
            group,
            accessed: now,
            modified: now,
            created: now,
        }
    }

    pub fn to_bytes(&self) -> [u8; INODE_HEAD_BYTES] {
        let mut buf = [0u8; INODE_HEAD_BYTES];
        buf[0] = self.kind.to_u8();
        buf[1..9].copy_from_slice(&self.length.to_be_bytes());
        buf[9..13].copy_from_slice(&self.user.to_be_bytes());
        buf[13..17].copy_from_slice(&self.group.to_be_bytes());
        buf[17..25].copy_from_slice(&self.accessed.to_be_bytes());
        buf[25..33].copy_from_slice(&self.modified.to_be_bytes());
        buf[33..41].copy_from_slice(&self.created.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> AccelFsResult<Self> {
        if buf.len() < INODE_HEAD_BYTES {
            return Err(AccelFsError::Corrupt);
        }
        Ok(Self {
            kind: InodeKind::from_u8(buf[0])?,
            length: u64!(&buf[1..9]),
            user: u32!(&buf[9..13]),
            group: u32!(&buf[13..17]),
            accessed: u64!(&buf[17..25]),
            modified: u64!(&buf[25..33]),
            created: u64!(&buf[33..41]),
        })
    }
}

/// One directory entry, with the name borrowed from the entry blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry<'a> {
    pub inode_id: u64,
    pub name: &'a [u8],
}

/// Bounds-checked cursor over a packed directory entry blob.
///
/// An entry is yielded only if its head and all of its name bytes fit within
/// the blob; a truncated tail ends iteration instead of being read past.
pub struct DirEntries<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DirEntries<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for DirEntries<'a> {
    type Item = DirEntry<'a>;

    fn next(&mut self) -> Option<DirEntry<'a>> {
        let head_end = self.pos.checked_add(ENTRY_HEAD_BYTES)?;
        if head_end > self.data.len() {
            return None;
        }
        let inode_id = u64!(&self.data[self.pos..self.pos + 8]);
        let name_len = self.data[self.pos + 8] as usize;
        let entry_end = head_end + name_len;
        if entry_end > self.data.len() {
            return None;
        }
        let name = &self.data[head_end..entry_end];
        self.pos = entry_end;
        Some(DirEntry { inode_id, name })
    }
}

/// Append a serialized entry to a directory blob.
pub fn encode_entry(blob: &mut Vec<u8>, inode_id: u64, name: &[u8]) {
    blob.extend_from_slice(&inode_id.to_be_bytes());
    blob.push(name.len() as u8);
    blob.extend_from_slice(name);
}

/// Serialize an extent list as a file inode's data payload.
pub fn extents_to_bytes(extents: &[Extent]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(extents.len() * EXTENT_BYTES);
    for extent in extents {
        buf.extend_from_slice(&extent.offset.to_be_bytes());
        buf.extend_from_slice(&extent.length.to_be_bytes());
    }
    buf
}

pub fn extents_from_bytes(data: &[u8]) -> AccelFsResult<Vec<Extent>> {
    if data.len() % EXTENT_BYTES != 0 {
        return Err(AccelFsError::Corrupt);
    }
    let mut extents = Vec::with_capacity(data.len() / EXTENT_BYTES);
    for chunk in data.chunks_exact(EXTENT_BYTES) {
        extents.push(Extent {
            offset: u64!(&chunk[..8]),
            length: u64!(&chunk[8..]),
        });
    }
    Ok(extents)
}
