//! Tests for DWARF layout extraction, run against this test binary's own debug info

#![cfg(target_os = "linux")]

use crashscope_core::debuginfo::KernelDebugInfo;
use crashscope_core::types::FieldKind;

#[repr(C)]
struct DwarfListNode
{
    a: i32,
    b: u64,
    next: *const DwarfListNode,
}

fn own_debuginfo() -> KernelDebugInfo
{
    crashscope_utils::init_test_logging();
    let node = DwarfListNode {
        a: -1,
        b: 2,
        next: std::ptr::null(),
    };
    std::hint::black_box(&node);
    assert!(node.next.is_null() && node.a < 0 && node.b == 2);

    let exe = std::env::current_exe().unwrap();
    KernelDebugInfo::open(exe).unwrap()
}

#[test]
fn test_struct_layout_from_dwarf()
{
    let info = own_debuginfo();
    let layout = info.lookup_type("DwarfListNode").unwrap().unwrap();

    assert_eq!(layout.name(), "DwarfListNode");
    assert_eq!(layout.size(), 24);

    let fields: Vec<(&str, u64, u64)> = layout.fields().map(|f| (f.name.as_str(), f.offset, f.size)).collect();
    assert_eq!(fields, vec![("a", 0, 4), ("b", 8, 8), ("next", 16, 8)]);

    assert_eq!(layout.field("a").unwrap().kind, FieldKind::Integer { signed: true });
    assert_eq!(layout.field("b").unwrap().kind, FieldKind::Integer { signed: false });
    assert_eq!(
        layout.field("next").unwrap().kind,
        FieldKind::Pointer {
            target: Some("DwarfListNode".to_string())
        }
    );
}

#[test]
fn test_struct_prefix_is_ignored()
{
    let info = own_debuginfo();
    let plain = info.lookup_type("DwarfListNode").unwrap().unwrap();
    let tagged = info.lookup_type("struct DwarfListNode").unwrap().unwrap();
    assert_eq!(plain.size(), tagged.size());
}

#[test]
fn test_missing_type_is_none()
{
    let info = own_debuginfo();
    assert!(info.lookup_type("no_such_structure_anywhere").unwrap().is_none());
}

#[test]
fn test_symbols_and_target_properties()
{
    let info = own_debuginfo();
    assert!(info.symbol_count() > 0);
    assert_eq!(info.pointer_size(), std::mem::size_of::<usize>());
    assert_eq!(info.is_little_endian(), cfg!(target_endian = "little"));
    assert!(info.symbol("no_such_symbol_anywhere").is_none());
}
