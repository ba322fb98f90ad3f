//! Crate-wide error taxonomy and small shared helpers.

use onlyerror::Error;

/// Errors surfaced by the filesystem, pipeline and hardware layers.
///
/// Nothing in this crate retries on failure; every error propagates to the
/// caller, who decides whether (for example) `AlreadyExists` is benign.
#[derive(Debug, Error)]
pub enum AccelFsError {
    /// no such file or directory
    NoEntry,
    /// not a directory
    NotDirectory,
    /// file already exists
    AlreadyExists,
    /// invalid argument
    InvalidArgument,
    /// card transport failure (code {0})
    Transport(i32),
    /// hardware reported job failure (retc {0})
    JobFailed(u32),
    /// job timed out, completion status unknown
    Timeout,
    /// metadata database error
    Database(#[from] jammdb::Error),
    /// malformed on-disk record
    Corrupt,
}

pub type AccelFsResult<T> = Result<T, AccelFsError>;

/// Seconds since the Unix epoch, for inode timestamps.
pub fn unix_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
