//! Tests for XFS AIL walking and log item dispatch

mod common;

use common::{
    kernel, session, super_blocks, xfs_ail, AIL, BLOCK_NUMBER, BUF_LOG_ITEM, BUF_LOG_ITEM_LINK, INODE_LOG_ITEM,
    INODE_NUMBER, MOUNT, UNLINK_ITEM, UUID, XFS_BUF, XFS_SUPER,
};
use crashscope_core::error::CrashError;
use crashscope_core::subsystem::filesystem::xfs::{
    bli_flags, buf_summary, classify, item_to, log_item_type, AilLayout, BliFlags, BufFlags, LogItem, LogItemType,
    UuidLayout, Xfs, XFS_LI_DQUOT, XFS_LI_EFD, XFS_LI_EFI, XFS_LI_IUNLINK, XFS_LI_QUOTAOFF,
};
use crashscope_core::subsystem::filesystem::{super_fstype, super_id};
use crashscope_core::types::{Address, FieldLayout, StructLayout};

#[test]
fn test_attach_detects_layouts()
{
    let session = session(kernel());
    let xfs = Xfs::attach(&session);
    assert_eq!(xfs.ail_layout().unwrap(), AilLayout::AilHead);
    assert_eq!(xfs.uuid_layout().unwrap(), UuidLayout::B);
}

#[test]
fn test_typed_walk_downcasts_in_order()
{
    let session = session(xfs_ail(kernel()));
    let xfs = Xfs::attach(&session);
    let mp = session.value_at(Address::from(MOUNT), "xfs_mount").unwrap();

    let items: Vec<LogItem> = xfs
        .for_each_ail_log_item_typed(&mp)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(items.len(), 3);

    let LogItem::Buffer(bli) = &items[0] else {
        panic!("expected a buffer item, got {:?}", items[0]);
    };
    assert_eq!(bli.address(), Address::from(BUF_LOG_ITEM));
    assert_eq!(bli.deref("bli_buf").unwrap().read_u64("b_bn").unwrap(), BLOCK_NUMBER);

    let LogItem::Inode(ili) = &items[1] else {
        panic!("expected an inode item, got {:?}", items[1]);
    };
    assert_eq!(ili.address(), Address::from(INODE_LOG_ITEM));
    assert_eq!(ili.deref("ili_inode").unwrap().read_u64("i_ino").unwrap(), INODE_NUMBER);

    assert_eq!(items[2], LogItem::Unlink(XFS_LI_IUNLINK));
    assert_eq!(items[2].value(), None);
}

#[test]
fn test_generic_walk_yields_log_items()
{
    let session = session(xfs_ail(kernel()));
    let xfs = Xfs::attach(&session);
    let ail = session.value_at(Address::from(AIL), "xfs_ail").unwrap();

    let kinds: Vec<LogItemType> = xfs
        .for_each_ail_entry(&ail)
        .unwrap()
        .map(|item| log_item_type(&item.unwrap()).unwrap())
        .collect();
    assert_eq!(kinds, vec![LogItemType::Buffer, LogItemType::Inode, LogItemType::Unlink]);
}

#[test]
fn test_unknown_tag_carries_raw_value()
{
    let session = session(kernel().write_u32(UNLINK_ITEM + 0x18, 0x9999));
    let item = session.value_at(Address::from(UNLINK_ITEM), "xfs_log_item").unwrap();

    let err = classify(&item).unwrap_err();
    assert!(matches!(err, CrashError::UnknownTag { tag: 0x9999 }));
    assert_eq!(err.to_string(), "Unknown AIL item type 9999");
}

#[test]
fn test_unknown_tag_does_not_end_walk()
{
    let builder = xfs_ail(kernel()).write_u32(BUF_LOG_ITEM_LINK + 0x18, 0x1);
    let session = session(builder);
    let xfs = Xfs::attach(&session);
    let mp = session.value_at(Address::from(MOUNT), "xfs_mount").unwrap();

    let items: Vec<_> = xfs.for_each_ail_log_item_typed(&mp).unwrap().collect();
    assert_eq!(items.len(), 3);
    assert!(matches!(items[0], Err(CrashError::UnknownTag { tag: 0x1 })));
    assert!(matches!(items[1], Ok(LogItem::Inode(_))));
    assert!(matches!(items[2], Ok(LogItem::Unlink(_))));
}

#[test]
fn test_item_to_checks_tag()
{
    let session = session(xfs_ail(kernel()));
    let item = session.value_at(Address::from(BUF_LOG_ITEM_LINK), "xfs_log_item").unwrap();

    let bli = item_to(&item, LogItemType::Buffer).unwrap();
    assert_eq!(bli.address(), Address::from(BUF_LOG_ITEM));
    assert_eq!(bli.type_name(), "xfs_buf_log_item");

    let err = item_to(&item, LogItemType::Inode).unwrap_err();
    assert!(matches!(
        err,
        CrashError::TypeMismatch { ref expected, ref found } if expected == "XFS_LI_INODE" && found == "XFS_LI_BUF"
    ));
}

#[test]
fn test_classify_every_embedded_item()
{
    const ITEMS: u64 = 0x1d800;
    let cases = [
        (XFS_LI_EFI, 0x20, LogItemType::ExtentFreeIntent, "xfs_efi_log_item"),
        (XFS_LI_EFD, 0x28, LogItemType::ExtentFreeDone, "xfs_efd_log_item"),
        (XFS_LI_DQUOT, 0x30, LogItemType::Quota, "xfs_dq_logitem"),
        (XFS_LI_QUOTAOFF, 0x38, LogItemType::QuotaOff, "xfs_qoff_logitem"),
    ];

    let builder = cases.iter().enumerate().fold(kernel(), |builder, (idx, &(tag, offset, ..))| {
        builder.write_u32(ITEMS + idx as u64 * 0x100 + offset + 0x18, tag as u32)
    });
    let session = session(builder);

    for (idx, &(_, offset, kind, type_name)) in cases.iter().enumerate() {
        let owner = ITEMS + idx as u64 * 0x100;
        let item = session.value_at(Address::from(owner + offset), "xfs_log_item").unwrap();

        let classified = classify(&item).unwrap();
        assert_eq!(classified.item_type(), kind);
        let value = classified.value().unwrap();
        assert_eq!(value.address(), Address::from(owner), "{type_name}");
        assert_eq!(value.type_name(), type_name);
    }
}

#[test]
fn test_item_to_unlink_is_mismatch()
{
    let session = session(xfs_ail(kernel()));
    let item = session.value_at(Address::from(UNLINK_ITEM), "xfs_log_item").unwrap();
    assert!(matches!(item_to(&item, LogItemType::Unlink), Err(CrashError::TypeMismatch { .. })));
}

#[test]
fn test_ail_summary()
{
    let session = session(xfs_ail(kernel()));
    let xfs = Xfs::attach(&session);
    let ail = session.value_at(Address::from(AIL), "xfs_ail").unwrap();

    let summary = xfs.ail_summary(&ail).unwrap();
    assert_eq!(summary.address, Address::from(AIL));
    assert_eq!(summary.target, 0x0000_0002_0000_1000);
    assert_eq!(summary.last_pushed_lsn, 0x0000_0002_0000_0800);
    assert_eq!(summary.log_flush, None);
}

#[test]
fn test_older_ail_naming()
{
    let old_ail = StructLayout::new("xfs_ail", 0x80)
        .with_field(FieldLayout::embedded("xa_ail", 0x08, 16, "list_head"))
        .with_field(FieldLayout::unsigned("xa_target", 0x18, 8))
        .with_field(FieldLayout::unsigned("xa_last_pushed_lsn", 0x20, 8))
        .with_field(FieldLayout::unsigned("xa_log_flush", 0x28, 4));
    let builder = xfs_ail(kernel()).layout(old_ail).write_u32(AIL + 0x28, 7);
    let session = session(builder);
    let xfs = Xfs::attach(&session);
    assert_eq!(xfs.ail_layout().unwrap(), AilLayout::XaAil);

    let mp = session.value_at(Address::from(MOUNT), "xfs_mount").unwrap();
    assert_eq!(xfs.for_each_ail_log_item(&mp).unwrap().count(), 3);

    let summary = xfs.ail_summary(&mp.deref("m_ail").unwrap()).unwrap();
    assert_eq!(summary.target, 0x0000_0002_0000_1000);
    assert_eq!(summary.log_flush, Some(7));
}

#[test]
fn test_uuid()
{
    let session = session(xfs_ail(kernel()));
    let xfs = Xfs::attach(&session);
    let mp = session.value_at(Address::from(MOUNT), "xfs_mount").unwrap();
    assert_eq!(xfs.uuid(&mp).unwrap(), UUID);
}

#[test]
fn test_older_uuid_naming()
{
    let builder = xfs_ail(kernel())
        .layout(StructLayout::new("uuid_t", 16).with_field(FieldLayout::char_array("__u_bits", 0, 16)));
    let session = session(builder);
    let xfs = Xfs::attach(&session);
    let mp = session.value_at(Address::from(MOUNT), "xfs_mount").unwrap();

    assert_eq!(xfs.uuid_layout().unwrap(), UuidLayout::UBits);
    assert_eq!(xfs.uuid(&mp).unwrap(), UUID);
}

#[test]
fn test_buffer_state()
{
    let session = session(xfs_ail(kernel()));
    let buf = session.value_at(Address::from(XFS_BUF), "xfs_buf").unwrap();
    let summary = buf_summary(&buf).unwrap();

    assert_eq!(summary.block_number, BLOCK_NUMBER);
    assert_eq!(summary.flags, BufFlags::READ | BufFlags::DONE);
    assert!(summary.pinned);
    assert!(summary.locked);

    let bli = session.value_at(Address::from(BUF_LOG_ITEM), "xfs_buf_log_item").unwrap();
    assert_eq!(bli_flags(&bli).unwrap(), BliFlags::DIRTY);
}

#[test]
fn test_wide_flags_field_rejects_high_bits()
{
    let wide = StructLayout::new("xfs_buf_log_item", 0x80)
        .with_field(FieldLayout::embedded("bli_item", 0x10, 0x40, "xfs_log_item"))
        .with_field(FieldLayout::unsigned("bli_flags", 0x58, 8));
    let session = session(kernel().layout(wide).write_u64(BUF_LOG_ITEM + 0x58, 0x1_0000_0002));
    let bli = session.value_at(Address::from(BUF_LOG_ITEM), "xfs_buf_log_item").unwrap();

    let err = bli_flags(&bli).unwrap_err();
    assert!(matches!(err, CrashError::TypeMismatch { ref found, .. } if found == "0x100000002"));
}

#[test]
fn test_mounts_from_super_blocks()
{
    let session = session(super_blocks(xfs_ail(kernel())));
    let xfs = Xfs::attach(&session);

    let mounts: Vec<_> = xfs.mounts().unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts[0].address(), Address::from(XFS_SUPER));
    assert_eq!(super_fstype(&mounts[0]).unwrap(), "xfs");
    assert_eq!(super_id(&mounts[0]).unwrap(), "sda1");

    let mp = xfs.xfs_mount(&mounts[0]).unwrap();
    assert_eq!(mp.address(), Address::from(MOUNT));
    assert_eq!(xfs.for_each_ail_log_item(&mp).unwrap().count(), 3);
}

#[test]
fn test_delwri_queue()
{
    const BUFTARG: u64 = 0x1d000;
    let builder = common::link_ring(kernel(), BUFTARG + 0x20, &[XFS_BUF + 0x40]).write_u64(XFS_BUF, BLOCK_NUMBER);
    let session = session(builder);
    let xfs = Xfs::attach(&session);
    let buftarg = session.value_at(Address::from(BUFTARG), "xfs_buftarg").unwrap();

    let bufs: Vec<_> = xfs.for_each_delwri_buf(&buftarg).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(bufs.len(), 1);
    assert_eq!(bufs[0].read_u64("b_bn").unwrap(), BLOCK_NUMBER);
}

#[test]
fn test_xfs_inode_from_vfs_inode()
{
    let session = session(xfs_ail(kernel()));
    let xfs = Xfs::attach(&session);
    let vfs_inode = session.value_at(Address::from(common::XFS_INODE + 0x100), "inode").unwrap();
    assert_eq!(xfs.xfs_inode(&vfs_inode).unwrap().read_u64("i_ino").unwrap(), INODE_NUMBER);
}
