//! Block layer helpers.
//!
//! Naming block devices, mapping inodes to the devices they live on, and
//! decoding `struct bio` through the session's
//! [`DecoderRegistry`](crate::decoder::DecoderRegistry).
//!
//! Whole disks are `struct gendisk`; partitions are `struct hd_struct`.
//! Both embed a `struct device`, which is how the device model links them.
//! Every such device is registered with `block_class`, and its
//! `device_type` pointer (`&disk_type` or `&part_type`) says which of the two
//! embeds it.

use std::fmt;
use std::sync::Arc;

use crate::decoder::{ChainEntry, DecodeChain};
use crate::error::{CrashError, CrashResult};
use crate::lazy::Deferred;
use crate::list::list_for_each_entry;
use crate::session::Session;
use crate::types::{Address, StructLayout};
use crate::value::Value;

/// Member of `struct bio` that keys the decoder registry
pub const BIO_DECODER_KEY: &str = "bi_end_io";

/// The `gendisk` embedding `dev` as its whole-disk device
///
/// No check is made that `dev` really belongs to a gendisk.
pub fn dev_to_gendisk(dev: &Value) -> CrashResult<Value>
{
    dev.container_of("gendisk", "part0.__dev")
}

/// The `hd_struct` embedding `dev` as a partition device
pub fn dev_to_part(dev: &Value) -> CrashResult<Value>
{
    dev.container_of("hd_struct", "__dev")
}

pub fn gendisk_to_dev(gendisk: &Value) -> CrashResult<Value>
{
    gendisk.member("part0.__dev")
}

pub fn part_to_dev(part: &Value) -> CrashResult<Value>
{
    part.member("__dev")
}

/// Name of a disk (`sda`) or partition (`sda1`)
///
/// ## Errors
///
/// `TypeMismatch` if `disk` is neither a `gendisk` nor an `hd_struct`.
pub fn gendisk_name(disk: &Value) -> CrashResult<String>
{
    match disk.type_name() {
        "gendisk" => disk.read_cstring("disk_name"),
        "hd_struct" => {
            let parent = part_to_dev(disk)?.deref("parent")?;
            let whole = dev_to_gendisk(&parent)?;
            Ok(format!("{}{}", gendisk_name(&whole)?, disk.read_u64("partno")?))
        }
        other => Err(CrashError::TypeMismatch {
            expected: "gendisk or hd_struct".to_string(),
            found: other.to_string(),
        }),
    }
}

/// Name of the disk behind a `struct block_device`
pub fn block_device_name(bdev: &Value) -> CrashResult<String>
{
    gendisk_name(&bdev.deref("bd_disk")?)
}

/// Whether `inode` is a block device inode (lives on the bdev pseudo filesystem)
pub fn is_bdev_inode(inode: &Value) -> CrashResult<bool>
{
    let session = inode.session();
    let blockdev_superblock = session.read_pointer(session.symbol("blockdev_superblock")?)?;
    Ok(inode.read_pointer("i_sb")? == blockdev_superblock)
}

/// The block device a block device inode describes
///
/// ## Errors
///
/// `TypeMismatch` if `inode` is not a block device inode.
pub fn inode_to_block_device(inode: &Value) -> CrashResult<Value>
{
    if !is_bdev_inode(inode)? {
        return Err(CrashError::TypeMismatch {
            expected: "block device inode".to_string(),
            found: format!("inode at {}", inode.address()),
        });
    }
    inode.container_of("bdev_inode", "vfs_inode")?.member("bdev")
}

/// The block device an inode's data lives on
///
/// For a block device inode that is the device itself; otherwise it is the
/// device under the inode's superblock.
pub fn inode_on_bdev(inode: &Value) -> CrashResult<Value>
{
    if is_bdev_inode(inode)? {
        inode_to_block_device(inode)
    } else {
        inode.deref("i_sb")?.deref("s_bdev")
    }
}

/// Describe a single bio
///
/// Uses the decoder registered for its `bi_end_io` when there is one, and a
/// generic description otherwise.
pub fn decode_bio(bio: &Value) -> CrashResult<ChainEntry>
{
    let end_io = bio.read_pointer(BIO_DECODER_KEY)?;
    if let Some(decoder) = bio.session().decoders().lookup(end_io) {
        return (decoder.decode)(bio);
    }

    let devname = block_device_name(&bio.deref("bi_bdev")?)?;
    Ok(ChainEntry::new(format!(
        "{:x} bio: undecoded bio on {devname} ({end_io})",
        bio.address()
    ))
    .with_value(bio.clone())
    .with_devname(devname))
}

/// Decode every object in the storage stack under `bio`
///
/// The first entry comes from the decoder registered for `bi_end_io`; an
/// unregistered callback makes the first item an
/// [`UndecodableHandle`](CrashError::UndecodableHandle) error.
pub fn for_each_bio_in_stack(bio: &Value) -> DecodeChain
{
    bio.session().decode_chain(bio.clone(), BIO_DECODER_KEY)
}

/// Where a device's `block_class` list node lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassLink
{
    /// `device_private.knode_class`, reached back through `device_private.device`
    DevicePrivate,
    /// `device.knode_class`, in older kernels
    Device,
}

impl ClassLink
{
    pub fn detect(device: &StructLayout) -> Self
    {
        if device.has_field("knode_class") {
            ClassLink::Device
        } else {
            ClassLink::DevicePrivate
        }
    }
}

/// The devices registered with `class`, in registration order
///
/// `class` is a `struct class`; its devices hang off
/// `class->p->klist_devices`.
pub fn for_each_class_device(
    class: &Value,
    link: ClassLink,
) -> CrashResult<Box<dyn Iterator<Item = CrashResult<Value>>>>
{
    let head = class.deref("p")?.member("klist_devices.k_list")?;
    Ok(match link {
        ClassLink::Device => Box::new(list_for_each_entry(&head, "device", "knode_class.n_node")?),
        ClassLink::DevicePrivate => Box::new(
            list_for_each_entry(&head, "device_private", "knode_class.n_node")?
                .map(|private| private.and_then(|private| private.deref("device"))),
        ),
    })
}

/// Which structure a block class device is embedded in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockDeviceKind
{
    /// `struct gendisk`, typed by `disk_type`
    Disk,
    /// `struct hd_struct`, typed by `part_type`
    Partition,
}

impl BlockDeviceKind
{
    /// Symbol of the `struct device_type` that marks this kind
    pub const fn type_symbol(self) -> &'static str
    {
        match self {
            BlockDeviceKind::Disk => "disk_type",
            BlockDeviceKind::Partition => "part_type",
        }
    }
}

/// A device on `block_class`, downcast to its enclosing structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockDevice
{
    /// `struct gendisk`
    Disk(Value),
    /// `struct hd_struct`
    Partition(Value),
}

impl BlockDevice
{
    pub fn kind(&self) -> BlockDeviceKind
    {
        match self {
            BlockDevice::Disk(_) => BlockDeviceKind::Disk,
            BlockDevice::Partition(_) => BlockDeviceKind::Partition,
        }
    }

    pub fn value(&self) -> &Value
    {
        match self {
            BlockDevice::Disk(value) | BlockDevice::Partition(value) => value,
        }
    }

    /// `sda` or `sda1`
    pub fn name(&self) -> CrashResult<String>
    {
        gendisk_name(self.value())
    }
}

struct DeviceTypes
{
    disk_type: Deferred<Address>,
    part_type: Deferred<Address>,
    class_link: Deferred<ClassLink>,
}

impl DeviceTypes
{
    fn address(&self, kind: BlockDeviceKind) -> CrashResult<Address>
    {
        match kind {
            BlockDeviceKind::Disk => self.disk_type.get().copied(),
            BlockDeviceKind::Partition => self.part_type.get().copied(),
        }
    }
}

/// Block layer support bound to one session
#[derive(Clone)]
pub struct Storage
{
    session: Session,
    types: Arc<DeviceTypes>,
}

impl Storage
{
    /// Record the `disk_type` and `part_type` addresses and the class list
    /// layout as they become resolvable
    pub fn attach(session: &Session) -> Self
    {
        let types = Arc::new(DeviceTypes {
            disk_type: Deferred::new("disk_type address"),
            part_type: Deferred::new("part_type address"),
            class_link: Deferred::new("block class device layout"),
        });

        for kind in [BlockDeviceKind::Disk, BlockDeviceKind::Partition] {
            let cells = Arc::clone(&types);
            session.on_symbol_available(kind.type_symbol(), move |_, address| {
                tracing::debug!(?kind, %address, "found block device type");
                match kind {
                    BlockDeviceKind::Disk => cells.disk_type.set(address),
                    BlockDeviceKind::Partition => cells.part_type.set(address),
                };
                Ok(())
            });
        }

        let cells = Arc::clone(&types);
        session.on_type_available("struct device", move |_, layout| {
            let detected = ClassLink::detect(layout);
            tracing::debug!(?detected, "detected class device layout");
            cells.class_link.set(detected);
            Ok(())
        });

        Self {
            session: session.clone(),
            types,
        }
    }

    pub fn class_link(&self) -> CrashResult<ClassLink>
    {
        self.types.class_link.get().copied()
    }

    /// Kind of a `struct device`, from its `type` pointer
    ///
    /// ## Errors
    ///
    /// `TypeMismatch` if the device is neither a disk nor a partition, and
    /// `Unavailable` if a device type symbol never resolved.
    pub fn device_kind(&self, dev: &Value) -> CrashResult<BlockDeviceKind>
    {
        let device_type = dev.read_pointer("type")?;
        for kind in [BlockDeviceKind::Disk, BlockDeviceKind::Partition] {
            if device_type == self.types.address(kind)? {
                return Ok(kind);
            }
        }
        Err(CrashError::TypeMismatch {
            expected: "disk_type or part_type".to_string(),
            found: format!("device type {device_type} on device at {}", dev.address()),
        })
    }

    /// Downcast a block class `struct device` to its gendisk or hd_struct
    pub fn classify_device(&self, dev: &Value) -> CrashResult<BlockDevice>
    {
        match self.device_kind(dev)? {
            BlockDeviceKind::Disk => dev_to_gendisk(dev).map(BlockDevice::Disk),
            BlockDeviceKind::Partition => dev_to_part(dev).map(BlockDevice::Partition),
        }
    }

    /// Every disk and partition on `block_class`, optionally only one kind
    ///
    /// A device of an unexpected type is an error item; the walk goes on
    /// past it.
    pub fn for_each_block_device(
        &self,
        subtype: Option<BlockDeviceKind>,
    ) -> CrashResult<impl Iterator<Item = CrashResult<BlockDevice>>>
    {
        let wanted = subtype.map(|kind| self.types.address(kind)).transpose()?;
        let class = self.session.symbol_value("block_class", "class")?;
        let devices = for_each_class_device(&class, self.class_link()?)?;
        let storage = self.clone();

        Ok(devices.filter_map(move |dev| {
            let dev = match dev {
                Ok(dev) => dev,
                Err(err) => return Some(Err(err)),
            };
            if let Some(wanted) = wanted {
                match dev.read_pointer("type") {
                    Ok(device_type) if device_type != wanted => return None,
                    Ok(_) => {}
                    Err(err) => return Some(Err(err)),
                }
            }
            Some(storage.classify_device(&dev))
        }))
    }

    /// Every whole disk on `block_class`
    pub fn for_each_disk(&self) -> CrashResult<impl Iterator<Item = CrashResult<BlockDevice>>>
    {
        self.for_each_block_device(Some(BlockDeviceKind::Disk))
    }
}

impl fmt::Debug for Storage
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Storage")
            .field("disk_type", &self.types.disk_type.get().ok())
            .field("part_type", &self.types.part_type.get().ok())
            .field("class_link", &self.types.class_link.get().ok())
            .finish_non_exhaustive()
    }
}
