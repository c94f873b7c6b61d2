//! # XFS
//!
//! Walking the Active Item List (AIL) and decoding what is on it.
//!
//! Every object XFS logs embeds a generic `struct xfs_log_item` whose
//! `li_type` tag says which structure surrounds it. [`classify`] reads the tag
//! and downcasts to the enclosing log item; the `IUNLINK` tag has no
//! enclosing structure and is reported by its raw value alone.
//!
//! Layout differences between kernel releases are decided once per session
//! by [`Xfs::attach`]:
//!
//! - `struct xfs_ail` names its list head `ail_head` (newer) or `xa_ail`
//!   (older), with the other AIL members prefixed to match.
//! - `uuid_t` keeps its bytes in `b` (newer) or `__u_bits` (older).
//!
//! ## Example
//!
//! ```rust,no_run
//! use crashscope_core::image::ElfCoreImage;
//! use crashscope_core::session::Session;
//! use crashscope_core::subsystem::filesystem::xfs::{LogItem, Xfs};
//!
//! # fn main() -> crashscope_core::error::CrashResult<()> {
//! let session = Session::new(ElfCoreImage::open("vmcore", "vmlinux")?);
//! let xfs = Xfs::attach(&session);
//!
//! for mp in xfs.mounts()? {
//!     for item in xfs.for_each_ail_log_item_typed(&mp?)? {
//!         match item {
//!             Ok(LogItem::Buffer(bli)) => println!("buf {}", bli.deref("bli_buf")?.read_u64("b_bn")?),
//!             Ok(other) => println!("{}", other.item_type().short_name()),
//!             Err(err) => println!("skipped: {err}"),
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use super::super_blocks_of_type;
use crate::decoder::ChainEntry;
use crate::error::{CrashError, CrashResult};
use crate::lazy::Deferred;
use crate::list::{list_for_each_entry, ListIter};
use crate::session::Session;
use crate::subsystem::storage::block_device_name;
use crate::types::{Address, StructLayout};
use crate::value::Value;

pub const XFS_LI_EFI: u64 = 0x1236;
pub const XFS_LI_EFD: u64 = 0x1237;
pub const XFS_LI_IUNLINK: u64 = 0x1238;
/// Aligned inode chunks, variable-size inode buffers
pub const XFS_LI_INODE: u64 = 0x123b;
/// v2 buffers, variable-size inode buffers
pub const XFS_LI_BUF: u64 = 0x123c;
pub const XFS_LI_DQUOT: u64 = 0x123d;
pub const XFS_LI_QUOTAOFF: u64 = 0x123e;

const FSTYPE: &str = "xfs";

/// Kind of an AIL log item, as carried in `xfs_log_item.li_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogItemType
{
    ExtentFreeIntent,
    ExtentFreeDone,
    Unlink,
    Inode,
    Buffer,
    Quota,
    QuotaOff,
}

impl LogItemType
{
    pub const ALL: [LogItemType; 7] = [
        LogItemType::ExtentFreeIntent,
        LogItemType::ExtentFreeDone,
        LogItemType::Unlink,
        LogItemType::Inode,
        LogItemType::Buffer,
        LogItemType::Quota,
        LogItemType::QuotaOff,
    ];

    pub fn from_raw(tag: u64) -> Option<Self>
    {
        Self::ALL.into_iter().find(|kind| kind.raw() == tag)
    }

    pub const fn raw(self) -> u64
    {
        match self {
            LogItemType::ExtentFreeIntent => XFS_LI_EFI,
            LogItemType::ExtentFreeDone => XFS_LI_EFD,
            LogItemType::Unlink => XFS_LI_IUNLINK,
            LogItemType::Inode => XFS_LI_INODE,
            LogItemType::Buffer => XFS_LI_BUF,
            LogItemType::Quota => XFS_LI_DQUOT,
            LogItemType::QuotaOff => XFS_LI_QUOTAOFF,
        }
    }

    /// Kernel constant name (`XFS_LI_BUF`)
    pub const fn name(self) -> &'static str
    {
        match self {
            LogItemType::ExtentFreeIntent => "XFS_LI_EFI",
            LogItemType::ExtentFreeDone => "XFS_LI_EFD",
            LogItemType::Unlink => "XFS_LI_IUNLINK",
            LogItemType::Inode => "XFS_LI_INODE",
            LogItemType::Buffer => "XFS_LI_BUF",
            LogItemType::Quota => "XFS_LI_DQUOT",
            LogItemType::QuotaOff => "XFS_LI_QUOTAOFF",
        }
    }

    /// Constant name without the `XFS_LI_` prefix
    pub fn short_name(self) -> &'static str
    {
        &self.name()["XFS_LI_".len()..]
    }

    /// Enclosing structure and the member that embeds the `xfs_log_item`
    ///
    /// `None` for `IUNLINK`, which has no enclosing structure.
    pub const fn embedding(self) -> Option<(&'static str, &'static str)>
    {
        match self {
            LogItemType::ExtentFreeIntent => Some(("xfs_efi_log_item", "efi_item")),
            LogItemType::ExtentFreeDone => Some(("xfs_efd_log_item", "efd_item")),
            LogItemType::Unlink => None,
            LogItemType::Inode => Some(("xfs_inode_log_item", "ili_item")),
            LogItemType::Buffer => Some(("xfs_buf_log_item", "bli_item")),
            LogItemType::Quota => Some(("xfs_dq_logitem", "qli_item")),
            LogItemType::QuotaOff => Some(("xfs_qoff_logitem", "qql_item")),
        }
    }
}

impl fmt::Display for LogItemType
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

/// A log item downcast to its enclosing structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogItem
{
    /// `struct xfs_buf_log_item`
    Buffer(Value),
    /// `struct xfs_inode_log_item`
    Inode(Value),
    /// `struct xfs_efi_log_item`
    ExtentFreeIntent(Value),
    /// `struct xfs_efd_log_item`
    ExtentFreeDone(Value),
    /// `struct xfs_dq_logitem`
    Quota(Value),
    /// `struct xfs_qoff_logitem`
    QuotaOff(Value),
    /// Inode unlink item; carries only its raw tag
    Unlink(u64),
}

impl LogItem
{
    pub fn item_type(&self) -> LogItemType
    {
        match self {
            LogItem::Buffer(_) => LogItemType::Buffer,
            LogItem::Inode(_) => LogItemType::Inode,
            LogItem::ExtentFreeIntent(_) => LogItemType::ExtentFreeIntent,
            LogItem::ExtentFreeDone(_) => LogItemType::ExtentFreeDone,
            LogItem::Quota(_) => LogItemType::Quota,
            LogItem::QuotaOff(_) => LogItemType::QuotaOff,
            LogItem::Unlink(_) => LogItemType::Unlink,
        }
    }

    /// The enclosing structure, `None` for unlink items
    pub fn value(&self) -> Option<&Value>
    {
        match self {
            LogItem::Buffer(value)
            | LogItem::Inode(value)
            | LogItem::ExtentFreeIntent(value)
            | LogItem::ExtentFreeDone(value)
            | LogItem::Quota(value)
            | LogItem::QuotaOff(value) => Some(value),
            LogItem::Unlink(_) => None,
        }
    }
}

/// Read and decode the tag of an `xfs_log_item`
///
/// ## Errors
///
/// `UnknownTag` carrying the raw value when the tag is not a known item type.
pub fn log_item_type(item: &Value) -> CrashResult<LogItemType>
{
    let tag = item.read_u64("li_type")?;
    LogItemType::from_raw(tag).ok_or(CrashError::UnknownTag { tag })
}

/// Downcast a generic `xfs_log_item` to the structure its tag names
pub fn classify(item: &Value) -> CrashResult<LogItem>
{
    let kind = log_item_type(item)?;
    let Some((owner, member)) = kind.embedding() else {
        return Ok(LogItem::Unlink(kind.raw()));
    };

    let value = item.container_of(owner, member)?;
    Ok(match kind {
        LogItemType::Buffer => LogItem::Buffer(value),
        LogItemType::Inode => LogItem::Inode(value),
        LogItemType::ExtentFreeIntent => LogItem::ExtentFreeIntent(value),
        LogItemType::ExtentFreeDone => LogItem::ExtentFreeDone(value),
        LogItemType::Quota => LogItem::Quota(value),
        LogItemType::QuotaOff => LogItem::QuotaOff(value),
        LogItemType::Unlink => LogItem::Unlink(kind.raw()),
    })
}

/// Downcast `item` to `wanted`'s enclosing structure, checking the tag first
///
/// ## Errors
///
/// `TypeMismatch` when the tag names another item type, or when `wanted` is
/// `Unlink` (which has no enclosing structure).
pub fn item_to(item: &Value, wanted: LogItemType) -> CrashResult<Value>
{
    let tag = item.read_u64("li_type")?;
    if tag != wanted.raw() {
        return Err(CrashError::TypeMismatch {
            expected: wanted.name().to_string(),
            found: LogItemType::from_raw(tag).map_or_else(|| format!("tag {tag:#x}"), |kind| kind.name().to_string()),
        });
    }
    let (owner, member) = wanted.embedding().ok_or_else(|| CrashError::TypeMismatch {
        expected: "log item with an enclosing structure".to_string(),
        found: wanted.name().to_string(),
    })?;
    item.container_of(owner, member)
}

/// Naming of the AIL list head and its companion members
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AilLayout
{
    /// `ail_head`, `ail_target`, `ail_last_pushed_lsn`
    AilHead,
    /// `xa_ail`, `xa_target`, `xa_last_pushed_lsn`
    XaAil,
}

impl AilLayout
{
    pub fn detect(layout: &StructLayout) -> Self
    {
        if layout.has_field("ail_head") {
            AilLayout::AilHead
        } else {
            AilLayout::XaAil
        }
    }

    pub const fn head_field(self) -> &'static str
    {
        match self {
            AilLayout::AilHead => "ail_head",
            AilLayout::XaAil => "xa_ail",
        }
    }

    const fn prefix(self) -> &'static str
    {
        match self {
            AilLayout::AilHead => "ail_",
            AilLayout::XaAil => "xa_",
        }
    }
}

/// Where `uuid_t` keeps its sixteen bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UuidLayout
{
    B,
    UBits,
}

impl UuidLayout
{
    pub fn detect(layout: &StructLayout) -> Self
    {
        if layout.has_field("b") {
            UuidLayout::B
        } else {
            UuidLayout::UBits
        }
    }

    pub const fn member(self) -> &'static str
    {
        match self {
            UuidLayout::B => "b",
            UuidLayout::UBits => "__u_bits",
        }
    }
}

bitflags! {
    /// `xfs_buf_log_item.bli_flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BliFlags: u32 {
        const HOLD = 0x01;
        const DIRTY = 0x02;
        const STALE = 0x04;
        const LOGGED = 0x08;
        const INODE_ALLOC = 0x10;
        const STALE_INODE = 0x20;
        const INODE_BUF = 0x40;
    }
}

bitflags! {
    /// `xfs_buf.b_flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufFlags: u32 {
        /// Buffer intended for reading from device
        const READ = 1 << 0;
        /// Buffer intended for writing to device
        const WRITE = 1 << 1;
        /// `b_addr` is valid
        const MAPPED = 1 << 2;
        /// Initiator will not wait for completion
        const ASYNC = 1 << 4;
        /// All pages in the buffer are uptodate
        const DONE = 1 << 5;
        const DELWRI = 1 << 6;
        /// Staled; lookups will not find it
        const STALE = 1 << 7;
        const ORDERED = 1 << 11;
        const READ_AHEAD = 1 << 12;
        const LOG_BUFFER = 1 << 13;

        // access-routine arguments, never expected on a live buffer
        const LOCK = 1 << 14;
        const TRYLOCK = 1 << 15;
        const DONT_BLOCK = 1 << 16;

        const PAGES = 1 << 18;
        const RUN_QUEUES = 1 << 19;
        const KMEM = 1 << 20;
        const DELWRI_Q = 1 << 21;
        const LRU_DISPOSE = 1 << 24;
    }
}

/// Progress counters of an AIL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AilSummary
{
    pub address: Address,
    pub target: u64,
    pub last_pushed_lsn: u64,
    /// Only present on kernels that track it
    pub log_flush: Option<u64>,
}

/// State of an `xfs_buf`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufSummary
{
    pub address: Address,
    pub block_number: u64,
    pub flags: BufFlags,
    /// `b_pin_count` is nonzero
    pub pinned: bool,
    /// `b_sema` count is not negative
    pub locked: bool,
}

struct XfsVersion
{
    ail: Deferred<AilLayout>,
    uuid: Deferred<UuidLayout>,
}

/// XFS support bound to one session
#[derive(Clone)]
pub struct Xfs
{
    session: Session,
    version: Arc<XfsVersion>,
}

impl Xfs
{
    /// Register the layout probes and the bio decoder with `session`
    ///
    /// Probes for types and symbols that are already resolvable run before
    /// this returns; the rest run whenever they first resolve.
    pub fn attach(session: &Session) -> Self
    {
        let version = Arc::new(XfsVersion {
            ail: Deferred::new("xfs_ail layout"),
            uuid: Deferred::new("uuid_t layout"),
        });

        let cells = Arc::clone(&version);
        session.on_type_available("struct xfs_ail", move |_, layout| {
            let detected = AilLayout::detect(layout);
            tracing::debug!(?detected, "detected xfs_ail layout");
            cells.ail.set(detected);
            Ok(())
        });

        let cells = Arc::clone(&version);
        session.on_type_available("uuid_t", move |_, layout| {
            let detected = UuidLayout::detect(layout);
            tracing::debug!(?detected, "detected uuid_t layout");
            cells.uuid.set(detected);
            Ok(())
        });

        session.on_symbol_available("xfs_buf_bio_end_io", |session, address| {
            session
                .decoders()
                .register(address, "xfs_buf_bio_end_io", decode_xfs_buf_bio_end_io);
            Ok(())
        });

        Self {
            session: session.clone(),
            version,
        }
    }

    pub fn ail_layout(&self) -> CrashResult<AilLayout>
    {
        self.version.ail.get().copied()
    }

    pub fn uuid_layout(&self) -> CrashResult<UuidLayout>
    {
        self.version.uuid.get().copied()
    }

    /// Superblocks of every mounted XFS filesystem
    pub fn mounts(&self) -> CrashResult<impl Iterator<Item = CrashResult<Value>>>
    {
        super_blocks_of_type(&self.session, FSTYPE)
    }

    /// The `xfs_mount` behind an XFS superblock
    pub fn xfs_mount(&self, sb: &Value) -> CrashResult<Value>
    {
        sb.cast_pointer("s_fs_info", "xfs_mount")
    }

    /// The `xfs_inode` embedding a VFS inode
    pub fn xfs_inode(&self, vfs_inode: &Value) -> CrashResult<Value>
    {
        vfs_inode.container_of("xfs_inode", "i_vnode")
    }

    /// Walk the generic `xfs_log_item`s on an AIL
    ///
    /// ## Errors
    ///
    /// `Unavailable` if `struct xfs_ail` never resolved in this image.
    pub fn for_each_ail_entry(&self, ail: &Value) -> CrashResult<ListIter>
    {
        let head = ail.member(self.ail_layout()?.head_field())?;
        list_for_each_entry(&head, "xfs_log_item", "li_ail")
    }

    /// Walk the AIL of a mount
    pub fn for_each_ail_log_item(&self, mp: &Value) -> CrashResult<ListIter>
    {
        self.for_each_ail_entry(&mp.deref("m_ail")?)
    }

    /// Walk the AIL of a mount, downcasting each item
    ///
    /// A bad tag fails only its own item; the walk continues.
    pub fn for_each_ail_log_item_typed(&self, mp: &Value) -> CrashResult<impl Iterator<Item = CrashResult<LogItem>>>
    {
        Ok(self
            .for_each_ail_log_item(mp)?
            .map(|item| item.and_then(|item| classify(&item))))
    }

    pub fn ail_summary(&self, ail: &Value) -> CrashResult<AilSummary>
    {
        let prefix = self.ail_layout()?.prefix();
        let log_flush_field = format!("{prefix}log_flush");
        let log_flush = if ail.layout().has_field(&log_flush_field) {
            Some(ail.read_u64(&log_flush_field)?)
        } else {
            None
        };
        Ok(AilSummary {
            address: ail.address(),
            target: ail.read_u64(&format!("{prefix}target"))?,
            last_pushed_lsn: ail.read_u64(&format!("{prefix}last_pushed_lsn"))?,
            log_flush,
        })
    }

    /// Raw UUID bytes from a mount's in-core superblock
    pub fn uuid(&self, mp: &Value) -> CrashResult<[u8; 16]>
    {
        let member = self.uuid_layout()?.member();
        let bytes = mp.field_bytes(&format!("m_sb.sb_uuid.{member}"))?;
        <[u8; 16]>::try_from(bytes.as_slice()).map_err(|_| CrashError::TypeMismatch {
            expected: "16-byte uuid".to_string(),
            found: format!("{} bytes", bytes.len()),
        })
    }

    /// Buffers queued for delayed write on a buffer target
    pub fn for_each_delwri_buf(&self, buftarg: &Value) -> CrashResult<ListIter>
    {
        list_for_each_entry(&buftarg.member("bt_delwrite_queue")?, "xfs_buf", "b_list")
    }
}

impl fmt::Debug for Xfs
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Xfs")
            .field("ail", &self.version.ail.get().ok())
            .field("uuid", &self.version.uuid.get().ok())
            .finish_non_exhaustive()
    }
}

/// Block number, flags and lock state of an `xfs_buf`
pub fn buf_summary(buf: &Value) -> CrashResult<BufSummary>
{
    Ok(BufSummary {
        address: buf.address(),
        block_number: buf.read_u64("b_bn")?,
        flags: BufFlags::from_bits_retain(read_flags(buf, "b_flags")?),
        pinned: buf.read_i64("b_pin_count.counter")? != 0,
        locked: buf.read_i64("b_sema.count")? >= 0,
    })
}

/// Flags of an `xfs_buf_log_item`
pub fn bli_flags(bli: &Value) -> CrashResult<BliFlags>
{
    Ok(BliFlags::from_bits_retain(read_flags(bli, "bli_flags")?))
}

/// A 32-bit flag word; wider fields must not carry bits above it
fn read_flags(value: &Value, path: &str) -> CrashResult<u32>
{
    let raw = value.read_u64(path)?;
    u32::try_from(raw).map_err(|_| CrashError::TypeMismatch {
        expected: format!("32-bit flags in {}.{path}", value.type_name()),
        found: format!("{raw:#x}"),
    })
}

/// Describe an `xfs_buf`
pub fn decode_xfsbuf(buf: &Value) -> CrashResult<ChainEntry>
{
    let description = format!(
        "{:x} xfsbuf: offset {}, size {}, block number {}",
        buf.address(),
        buf.read_u64("b_file_offset")?,
        buf.read_u64("b_buffer_length")?,
        buf.read_u64("b_bn")?
    );
    Ok(ChainEntry::new(description).with_fstype(FSTYPE).with_value(buf.clone()))
}

/// Describe a bio completed by `xfs_buf_bio_end_io`; its successor is the
/// `xfs_buf` stored in `bi_private`
pub fn decode_xfs_buf_bio_end_io(bio: &Value) -> CrashResult<ChainEntry>
{
    let xfsbuf = bio.cast_pointer("bi_private", "xfs_buf")?;
    let devname = block_device_name(&bio.deref("bi_bdev")?)?;
    Ok(
        ChainEntry::new(format!("{:x} bio: {FSTYPE} buffer on {devname}", bio.address()))
            .with_value(bio.clone())
            .with_fstype(FSTYPE)
            .with_devname(devname)
            .with_next(xfsbuf, decode_xfsbuf),
    )
}
