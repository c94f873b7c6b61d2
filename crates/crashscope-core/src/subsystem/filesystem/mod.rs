//! VFS helpers and per-filesystem decoders.

pub mod btrfs;
pub mod xfs;

use crate::error::CrashResult;
use crate::list::{list_for_each_entry, ListIter};
use crate::session::Session;
use crate::types::Address;
use crate::value::Value;

/// Walk every mounted superblock on the global `super_blocks` list
pub fn for_each_super_block(session: &Session) -> CrashResult<ListIter>
{
    let head = session.symbol_value("super_blocks", "list_head")?;
    list_for_each_entry(&head, "super_block", "s_list")
}

/// Superblocks whose filesystem type is `fstype`
///
/// Errors from the list walk, and from reading a superblock's type name, are
/// passed through rather than skipped.
pub fn super_blocks_of_type<'a>(
    session: &Session,
    fstype: &'a str,
) -> CrashResult<impl Iterator<Item = CrashResult<Value>> + 'a>
{
    let blocks = for_each_super_block(session)?;
    Ok(blocks.filter_map(move |sb| {
        let sb = match sb {
            Ok(sb) => sb,
            Err(err) => return Some(Err(err)),
        };
        match super_fstype(&sb) {
            Ok(name) if name == fstype => Some(Ok(sb)),
            Ok(_) => None,
            Err(err) => Some(Err(err)),
        }
    }))
}

/// View `address` as a `struct super_block`
pub fn get_super_block(session: &Session, address: Address) -> CrashResult<Value>
{
    session.value_at(address, "super_block")
}

/// Filesystem type name (`sb->s_type->name`)
pub fn super_fstype(sb: &Value) -> CrashResult<String>
{
    sb.deref("s_type")?.read_string_pointer("name")
}

/// Device identifier string (`sb->s_id`)
pub fn super_id(sb: &Value) -> CrashResult<String>
{
    sb.read_cstring("s_id")
}
