//! Btrfs conversions.

use crate::error::{CrashError, CrashResult};
use crate::session::Session;
use crate::value::Value;

/// Length of a btrfs filesystem id (`BTRFS_FSID_SIZE`)
pub const BTRFS_FSID_SIZE: usize = 16;

/// The `btrfs_inode` embedding a VFS inode
pub fn btrfs_inode(vfs_inode: &Value) -> CrashResult<Value>
{
    vfs_inode.container_of("btrfs_inode", "vfs_inode")
}

/// The filesystem-private `btrfs_fs_info` of a btrfs superblock
pub fn btrfs_fs_info(sb: &Value) -> CrashResult<Value>
{
    sb.cast_pointer("s_fs_info", "btrfs_fs_info")
}

/// Raw filesystem id bytes of a mounted btrfs
pub fn btrfs_fsid(fs_info: &Value) -> CrashResult<[u8; BTRFS_FSID_SIZE]>
{
    let bytes = fs_info.field_bytes("fsid")?;
    bytes
        .get(..BTRFS_FSID_SIZE)
        .and_then(|prefix| <[u8; BTRFS_FSID_SIZE]>::try_from(prefix).ok())
        .ok_or_else(|| CrashError::TypeMismatch {
            expected: format!("{BTRFS_FSID_SIZE}-byte fsid"),
            found: format!("{} bytes", bytes.len()),
        })
}

/// Every mounted btrfs superblock
pub fn mounts(session: &Session) -> CrashResult<impl Iterator<Item = CrashResult<Value>>>
{
    super::super_blocks_of_type(session, "btrfs")
}
