//! Common module for library exports

pub use crate::config::SessionConfig;
pub use crate::container::container_of;
pub use crate::decoder::{ChainEntry, DecodeChain, DecodeFn, DecoderRegistry};
pub use crate::error::{CrashError, CrashResult};
pub use crate::image::{ElfCoreImage, MemoryImage, SnapshotImage};
pub use crate::lazy::Deferred;
pub use crate::list::{list_for_each_entry, ListIter};
pub use crate::session::Session;
pub use crate::subsystem::filesystem::{btrfs, xfs};
pub use crate::subsystem::storage;
pub use crate::types::{Address, FieldKind, FieldLayout, StructLayout};
pub use crate::value::Value;
