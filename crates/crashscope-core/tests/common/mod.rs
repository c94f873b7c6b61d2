//! Synthetic kernel memory shared by the integration tests.
//!
//! Layouts mimic the kernel structures closely enough for the walkers and
//! decoders. Log items embed their `xfs_log_item` at nonzero offsets so that
//! a missing container-of shows up as a wrong address.

#![allow(dead_code)]

use crashscope_core::config::SessionConfig;
use crashscope_core::image::{SnapshotBuilder, SnapshotImage};
use crashscope_core::session::Session;
use crashscope_core::subsystem::filesystem::xfs::{XFS_LI_BUF, XFS_LI_INODE, XFS_LI_IUNLINK};
use crashscope_core::types::{FieldLayout, StructLayout};

pub const HEAP: u64 = 0x10000;
pub const HEAP_LEN: usize = 0x10000;

pub const AIL: u64 = 0x11000;
pub const AIL_HEAD: u64 = AIL + 0x08;
pub const MOUNT: u64 = 0x12000;

pub const BUF_LOG_ITEM: u64 = 0x13000;
pub const BUF_LOG_ITEM_LINK: u64 = BUF_LOG_ITEM + 0x10;
pub const XFS_BUF: u64 = 0x14000;
pub const BLOCK_NUMBER: u64 = 0x4242;

pub const INODE_LOG_ITEM: u64 = 0x15000;
pub const INODE_LOG_ITEM_LINK: u64 = INODE_LOG_ITEM + 0x08;
pub const XFS_INODE: u64 = 0x16000;
pub const INODE_NUMBER: u64 = 133;

pub const UNLINK_ITEM: u64 = 0x17000;

pub const BIO: u64 = 0x18000;
pub const BLOCK_DEVICE: u64 = 0x19000;
pub const GENDISK: u64 = 0x1a000;
pub const PARTITION: u64 = 0x1b000;

pub const SUPER_BLOCKS: u64 = 0x1c000;
pub const XFS_SUPER: u64 = 0x1c100;
pub const EXT4_SUPER: u64 = 0x1c200;
pub const XFS_FSTYPE: u64 = 0x1c400;
pub const EXT4_FSTYPE: u64 = 0x1c440;
pub const XFS_NAME: u64 = 0x1c480;
pub const EXT4_NAME: u64 = 0x1c4c0;

pub const BLOCK_CLASS: u64 = 0x1f000;
pub const SUBSYS_PRIVATE: u64 = 0x1f100;
pub const CLASS_DEVICES: u64 = SUBSYS_PRIVATE + 0x28;
pub const DISK_TYPE: u64 = 0x1f200;
pub const PART_TYPE: u64 = 0x1f240;
pub const DISK_PRIVATE: u64 = 0x1f300;
pub const PART_PRIVATE: u64 = 0x1f400;

pub const XFS_BUF_BIO_END_IO: u64 = 0xffff_ffff_8123_4560;

pub const UUID: [u8; 16] = [
    0x5e, 0x1f, 0x3a, 0x77, 0x01, 0x02, 0x43, 0x04, 0x85, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c,
];

/// Mapped heap plus every layout the tests use
pub fn kernel() -> SnapshotBuilder
{
    layouts().into_iter().fold(SnapshotImage::builder().map(HEAP, HEAP_LEN), SnapshotBuilder::layout)
}

pub fn session(builder: SnapshotBuilder) -> Session
{
    crashscope_utils::init_test_logging();
    Session::with_config(builder.build(), SessionConfig::default())
}

pub fn session_with(builder: SnapshotBuilder, config: SessionConfig) -> Session
{
    crashscope_utils::init_test_logging();
    Session::with_config(builder.build(), config)
}

/// Link `nodes` (addresses of their `list_head`s) into a ring headed at `head`
pub fn link_ring(builder: SnapshotBuilder, head: u64, nodes: &[u64]) -> SnapshotBuilder
{
    let mut ring = Vec::with_capacity(nodes.len() + 1);
    ring.push(head);
    ring.extend_from_slice(nodes);

    let mut builder = builder;
    for (idx, &node) in ring.iter().enumerate() {
        let next = ring[(idx + 1) % ring.len()];
        let prev = ring[(idx + ring.len() - 1) % ring.len()];
        builder = builder.write_u64(node, next).write_u64(node + 8, prev);
    }
    builder
}

/// An AIL holding a buffer item, an inode item and an unlink item, in that order
pub fn xfs_ail(builder: SnapshotBuilder) -> SnapshotBuilder
{
    let builder = builder
        // xfs_mount
        .write_bytes(MOUNT + 0x10, &UUID)
        .write_u64(MOUNT + 0x80, AIL)
        // xfs_ail
        .write_u64(AIL, MOUNT)
        .write_u64(AIL + 0x18, 0x0000_0002_0000_1000)
        .write_u64(AIL + 0x20, 0x0000_0002_0000_0800)
        // buffer item and its xfs_buf
        .write_u32(BUF_LOG_ITEM_LINK + 0x18, XFS_LI_BUF as u32)
        .write_u64(BUF_LOG_ITEM + 0x50, XFS_BUF)
        .write_u32(BUF_LOG_ITEM + 0x58, 0x02)
        .write_u64(XFS_BUF, BLOCK_NUMBER)
        .write_u32(XFS_BUF + 0x08, 0x21)
        .write_u32(XFS_BUF + 0x0c, 1)
        .write_u64(XFS_BUF + 0x30, 0x2000)
        .write_u32(XFS_BUF + 0x38, 4096)
        // inode item and its xfs_inode
        .write_u32(INODE_LOG_ITEM_LINK + 0x18, XFS_LI_INODE as u32)
        .write_u64(INODE_LOG_ITEM + 0x48, XFS_INODE)
        .write_u64(XFS_INODE + 0x08, INODE_NUMBER)
        // unlink item, bare
        .write_u32(UNLINK_ITEM + 0x18, XFS_LI_IUNLINK as u32);
    link_ring(builder, AIL_HEAD, &[BUF_LOG_ITEM_LINK, INODE_LOG_ITEM_LINK, UNLINK_ITEM])
}

/// A bio on `sda` completed by `xfs_buf_bio_end_io`, carrying [`XFS_BUF`]
///
/// `sda1` is set up as a partition of the same disk.
pub fn block_layer(builder: SnapshotBuilder, end_io: u64) -> SnapshotBuilder
{
    builder
        .symbol("xfs_buf_bio_end_io", XFS_BUF_BIO_END_IO)
        .write_u64(BIO + 0x08, BLOCK_DEVICE)
        .write_u64(BIO + 0x10, end_io)
        .write_u64(BIO + 0x18, XFS_BUF)
        .write_u64(BLOCK_DEVICE + 0x10, GENDISK)
        .write_cstr(GENDISK, "sda")
        .write_u64(PARTITION + 0x20, GENDISK + 0x60)
        .write_u32(PARTITION + 0xa0, 1)
        .write_u64(XFS_BUF, BLOCK_NUMBER)
        .write_u64(XFS_BUF + 0x30, 0x2000)
        .write_u32(XFS_BUF + 0x38, 4096)
}

/// `block_class` holding `sda` and then `sda1`, linked through `device_private`
///
/// Builds on [`block_layer`] for the disk and partition themselves.
pub fn block_class(builder: SnapshotBuilder) -> SnapshotBuilder
{
    let builder = builder
        .symbol("block_class", BLOCK_CLASS)
        .symbol("disk_type", DISK_TYPE)
        .symbol("part_type", PART_TYPE)
        .write_u64(BLOCK_CLASS + 0x10, SUBSYS_PRIVATE)
        .write_u64(DISK_PRIVATE + 0x60, GENDISK + 0x60)
        .write_u64(PART_PRIVATE + 0x60, PARTITION + 0x20)
        .write_u64(GENDISK + 0x60 + 0x08, DISK_TYPE)
        .write_u64(PARTITION + 0x20 + 0x08, PART_TYPE);
    link_ring(builder, CLASS_DEVICES, &[DISK_PRIVATE + 0x38, PART_PRIVATE + 0x38])
}

/// `super_blocks` holding an xfs and an ext4 superblock; the xfs one points at [`MOUNT`]
pub fn super_blocks(builder: SnapshotBuilder) -> SnapshotBuilder
{
    let builder = builder
        .symbol("super_blocks", SUPER_BLOCKS)
        .write_u64(XFS_SUPER + 0x10, XFS_FSTYPE)
        .write_cstr(XFS_SUPER + 0x20, "sda1")
        .write_u64(XFS_SUPER + 0x40, MOUNT)
        .write_u64(EXT4_SUPER + 0x10, EXT4_FSTYPE)
        .write_cstr(EXT4_SUPER + 0x20, "sdb")
        .write_u64(XFS_FSTYPE, XFS_NAME)
        .write_cstr(XFS_NAME, "xfs")
        .write_u64(EXT4_FSTYPE, EXT4_NAME)
        .write_cstr(EXT4_NAME, "ext4");
    link_ring(builder, SUPER_BLOCKS, &[XFS_SUPER, EXT4_SUPER])
}

fn layouts() -> Vec<StructLayout>
{
    vec![
        StructLayout::new("list_head", 16)
            .with_field(FieldLayout::pointer("next", 0, "list_head"))
            .with_field(FieldLayout::pointer("prev", 8, "list_head")),
        StructLayout::new("atomic_t", 4).with_field(FieldLayout::signed("counter", 0, 4)),
        StructLayout::new("semaphore", 24)
            .with_field(FieldLayout::unsigned("lock", 0, 4))
            .with_field(FieldLayout::signed("count", 4, 4))
            .with_field(FieldLayout::embedded("wait_list", 8, 16, "list_head")),
        StructLayout::new("file_system_type", 0x40).with_field(FieldLayout::raw_pointer("name", 0)),
        StructLayout::new("super_block", 0x100)
            .with_field(FieldLayout::embedded("s_list", 0, 16, "list_head"))
            .with_field(FieldLayout::pointer("s_type", 0x10, "file_system_type"))
            .with_field(FieldLayout::pointer("s_bdev", 0x18, "block_device"))
            .with_field(FieldLayout::char_array("s_id", 0x20, 32))
            .with_field(FieldLayout::raw_pointer("s_fs_info", 0x40)),
        StructLayout::new("inode", 0x80)
            .with_field(FieldLayout::pointer("i_sb", 0, "super_block"))
            .with_field(FieldLayout::unsigned("i_ino", 8, 8)),
        StructLayout::new("uuid_t", 16).with_field(FieldLayout::char_array("b", 0, 16)),
        StructLayout::new("xfs_sb", 0x40)
            .with_field(FieldLayout::unsigned("sb_magicnum", 0, 4))
            .with_field(FieldLayout::embedded("sb_uuid", 0x10, 16, "uuid_t")),
        StructLayout::new("xfs_mount", 0x100)
            .with_field(FieldLayout::embedded("m_sb", 0, 0x40, "xfs_sb"))
            .with_field(FieldLayout::pointer("m_ail", 0x80, "xfs_ail")),
        StructLayout::new("xfs_ail", 0x80)
            .with_field(FieldLayout::pointer("ail_mount", 0, "xfs_mount"))
            .with_field(FieldLayout::embedded("ail_head", 0x08, 16, "list_head"))
            .with_field(FieldLayout::unsigned("ail_target", 0x18, 8))
            .with_field(FieldLayout::unsigned("ail_last_pushed_lsn", 0x20, 8)),
        StructLayout::new("xfs_log_item", 0x40)
            .with_field(FieldLayout::embedded("li_ail", 0, 16, "list_head"))
            .with_field(FieldLayout::unsigned("li_lsn", 0x10, 8))
            .with_field(FieldLayout::unsigned("li_type", 0x18, 4))
            .with_field(FieldLayout::pointer("li_mountp", 0x20, "xfs_mount")),
        StructLayout::new("xfs_buf_log_item", 0x80)
            .with_field(FieldLayout::embedded("bli_item", 0x10, 0x40, "xfs_log_item"))
            .with_field(FieldLayout::pointer("bli_buf", 0x50, "xfs_buf"))
            .with_field(FieldLayout::unsigned("bli_flags", 0x58, 4)),
        StructLayout::new("xfs_inode_log_item", 0x80)
            .with_field(FieldLayout::embedded("ili_item", 0x08, 0x40, "xfs_log_item"))
            .with_field(FieldLayout::pointer("ili_inode", 0x48, "xfs_inode")),
        StructLayout::new("xfs_efi_log_item", 0x80)
            .with_field(FieldLayout::embedded("efi_item", 0x20, 0x40, "xfs_log_item")),
        StructLayout::new("xfs_efd_log_item", 0x80)
            .with_field(FieldLayout::embedded("efd_item", 0x28, 0x40, "xfs_log_item")),
        StructLayout::new("xfs_dq_logitem", 0x80)
            .with_field(FieldLayout::embedded("qli_item", 0x30, 0x40, "xfs_log_item")),
        StructLayout::new("xfs_qoff_logitem", 0x80)
            .with_field(FieldLayout::embedded("qql_item", 0x38, 0x40, "xfs_log_item")),
        StructLayout::new("xfs_inode", 0x200)
            .with_field(FieldLayout::unsigned("i_ino", 0x08, 8))
            .with_field(FieldLayout::embedded("i_vnode", 0x100, 0x80, "inode")),
        StructLayout::new("xfs_buf", 0x100)
            .with_field(FieldLayout::unsigned("b_bn", 0, 8))
            .with_field(FieldLayout::unsigned("b_flags", 0x08, 4))
            .with_field(FieldLayout::embedded("b_pin_count", 0x0c, 4, "atomic_t"))
            .with_field(FieldLayout::embedded("b_sema", 0x10, 24, "semaphore"))
            .with_field(FieldLayout::unsigned("b_file_offset", 0x30, 8))
            .with_field(FieldLayout::unsigned("b_buffer_length", 0x38, 4))
            .with_field(FieldLayout::embedded("b_list", 0x40, 16, "list_head")),
        StructLayout::new("xfs_buftarg", 0x80)
            .with_field(FieldLayout::embedded("bt_delwrite_queue", 0x20, 16, "list_head")),
        StructLayout::new("bio", 0x80)
            .with_field(FieldLayout::pointer("bi_next", 0, "bio"))
            .with_field(FieldLayout::pointer("bi_bdev", 0x08, "block_device"))
            .with_field(FieldLayout::raw_pointer("bi_end_io", 0x10))
            .with_field(FieldLayout::raw_pointer("bi_private", 0x18)),
        StructLayout::new("block_device", 0x80).with_field(FieldLayout::pointer("bd_disk", 0x10, "gendisk")),
        StructLayout::new("device", 0x80)
            .with_field(FieldLayout::pointer("parent", 0, "device"))
            .with_field(FieldLayout::pointer("type", 0x08, "device_type"))
            .with_field(FieldLayout::pointer("p", 0x10, "device_private")),
        StructLayout::new("device_type", 0x40).with_field(FieldLayout::raw_pointer("name", 0)),
        StructLayout::new("klist", 0x28).with_field(FieldLayout::embedded("k_list", 0x08, 16, "list_head")),
        StructLayout::new("klist_node", 0x20)
            .with_field(FieldLayout::raw_pointer("n_klist", 0))
            .with_field(FieldLayout::embedded("n_node", 0x08, 16, "list_head")),
        StructLayout::new("device_private", 0x80)
            .with_field(FieldLayout::embedded("knode_class", 0x30, 0x20, "klist_node"))
            .with_field(FieldLayout::pointer("device", 0x60, "device")),
        StructLayout::new("subsys_private", 0x80)
            .with_field(FieldLayout::embedded("klist_devices", 0x20, 0x28, "klist")),
        StructLayout::new("class", 0x80).with_field(FieldLayout::pointer("p", 0x10, "subsys_private")),
        StructLayout::new("hd_struct", 0x100)
            .with_field(FieldLayout::embedded("__dev", 0x20, 0x80, "device"))
            .with_field(FieldLayout::signed("partno", 0xa0, 4)),
        StructLayout::new("gendisk", 0x200)
            .with_field(FieldLayout::char_array("disk_name", 0, 32))
            .with_field(FieldLayout::embedded("part0", 0x40, 0x100, "hd_struct")),
    ]
}
