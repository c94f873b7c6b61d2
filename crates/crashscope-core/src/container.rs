//! Container-of downcasting.
//!
//! Kernel objects are linked and dispatched through members embedded in a
//! larger structure: a `list_head` inside an inode, an `xfs_log_item` inside
//! a buffer log item, a `struct device` inside a gendisk. Given the member's
//! address, the enclosing structure starts `offsetof(owner, member)` bytes
//! earlier.

use std::sync::Arc;

use crate::error::{CrashError, CrashResult};
use crate::session::Session;
use crate::types::{Address, StructLayout};
use crate::value::Value;

/// View of the `owner` structure that embeds `member_path` at `member_address`
///
/// Only arithmetic is performed; nothing is read, so the result is valid to
/// construct even when the memory behind it is not. `member_path` may be
/// dotted (`"part0.__dev"`).
///
/// ## Errors
///
/// - `FieldNotFound` if `owner` has no such member
/// - `InvalidArgument` if `member_address` is smaller than the member offset
///   (a garbage or NULL member pointer)
///
/// ## Example
///
/// ```rust
/// use std::sync::Arc;
///
/// use crashscope_core::container::container_of;
/// use crashscope_core::image::SnapshotImage;
/// use crashscope_core::session::Session;
/// use crashscope_core::types::{Address, FieldLayout, StructLayout};
///
/// let session = Session::new(SnapshotImage::builder().build());
/// let xfs_inode = Arc::new(
///     StructLayout::new("xfs_inode", 0x200).with_field(FieldLayout::embedded("i_vnode", 0x100, 0x80, "inode")),
/// );
///
/// let owner = container_of(&session, Address::from(0x5100), &xfs_inode, "i_vnode").unwrap();
/// assert_eq!(owner.address(), Address::from(0x5000));
/// ```
pub fn container_of(
    session: &Session,
    member_address: Address,
    owner: &Arc<StructLayout>,
    member_path: &str,
) -> CrashResult<Value>
{
    let probe = Value::new(session.clone(), Arc::clone(owner), Address::NULL);
    let offset = probe.offset_of(member_path)?;

    let base = member_address.checked_sub(offset).ok_or_else(|| {
        CrashError::InvalidArgument(format!(
            "{member_address} is below the offset of {}.{member_path} ({offset:#x})",
            owner.name()
        ))
    })?;

    Ok(Value::new(session.clone(), Arc::clone(owner), base))
}
