//! Tests for decoder registration and chain decoding

mod common;

use common::{block_layer, kernel, session, session_with, BIO, BLOCK_NUMBER, XFS_BUF, XFS_BUF_BIO_END_IO};
use crashscope_core::config::SessionConfig;
use crashscope_core::decoder::{ChainEntry, DecodeChain};
use crashscope_core::error::{CrashError, CrashResult};
use crashscope_core::subsystem::filesystem::xfs::{decode_xfs_buf_bio_end_io, decode_xfsbuf, Xfs};
use crashscope_core::subsystem::storage::for_each_bio_in_stack;
use crashscope_core::types::Address;
use crashscope_core::value::Value;

fn endless(value: &Value) -> CrashResult<ChainEntry>
{
    Ok(ChainEntry::new("again").with_next(value.clone(), endless))
}

#[test]
fn test_xfs_bio_chain()
{
    let session = session(block_layer(kernel(), XFS_BUF_BIO_END_IO));
    Xfs::attach(&session);
    let bio = session.value_at(Address::from(BIO), "bio").unwrap();

    let entries: Vec<ChainEntry> = for_each_bio_in_stack(&bio).collect::<Result<_, _>>().unwrap();
    assert_eq!(entries.len(), 2);

    assert_eq!(entries[0].description, format!("{BIO:x} bio: xfs buffer on sda"));
    assert_eq!(entries[0].fstype, Some("xfs"));
    assert_eq!(entries[0].devname.as_deref(), Some("sda"));
    assert_eq!(entries[0].value.as_ref(), Some(&bio));

    assert_eq!(
        entries[1].description,
        format!("{XFS_BUF:x} xfsbuf: offset 8192, size 4096, block number {BLOCK_NUMBER}")
    );
    assert_eq!(entries[1].fstype, Some("xfs"));
    assert!(entries[1].next.is_none());
    assert_eq!(entries[1].value.as_ref().map(Value::address), Some(Address::from(XFS_BUF)));
}

#[test]
fn test_registration_follows_symbol()
{
    let session = session(block_layer(kernel(), XFS_BUF_BIO_END_IO));
    assert!(session.decoders().is_empty());

    Xfs::attach(&session);
    let decoder = session.decoders().lookup(Address::from(XFS_BUF_BIO_END_IO)).unwrap();
    assert_eq!(decoder.name, "xfs_buf_bio_end_io");
    assert_eq!(session.decoders().len(), 1);
}

#[test]
fn test_first_registration_wins()
{
    let session = session(kernel());
    let key = Address::from(XFS_BUF_BIO_END_IO);
    assert!(session.decoders().register(key, "xfs_buf_bio_end_io", decode_xfs_buf_bio_end_io));
    assert!(!session.decoders().register(key, "again", endless));
    assert_eq!(session.decoders().lookup(key).unwrap().name, "xfs_buf_bio_end_io");
}

#[test]
fn test_unregistered_key_is_undecodable()
{
    let session = session(block_layer(kernel(), 0xffff_ffff_8199_0000));
    Xfs::attach(&session);
    let bio = session.value_at(Address::from(BIO), "bio").unwrap();

    let results: Vec<_> = for_each_bio_in_stack(&bio).collect();
    assert_eq!(results.len(), 1);
    assert!(matches!(
        results[0],
        Err(CrashError::UndecodableHandle { handle, key: 0xffff_ffff_8199_0000 }) if handle == BIO
    ));
}

#[test]
fn test_failed_step_ends_chain()
{
    // bi_private is NULL, so the xfs_buf successor cannot be named
    let builder = block_layer(kernel(), XFS_BUF_BIO_END_IO).write_u64(BIO + 0x18, 0);
    let session = session(builder);
    Xfs::attach(&session);
    let bio = session.value_at(Address::from(BIO), "bio").unwrap();

    let results: Vec<_> = for_each_bio_in_stack(&bio).collect();
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(CrashError::NullPointer { .. })));
}

#[test]
fn test_chain_depth_limit()
{
    let session = session(kernel());
    let start = session.value_at(Address::from(XFS_BUF), "xfs_buf").unwrap();

    let results: Vec<_> = DecodeChain::starting_with(start, endless, 5).collect();
    assert_eq!(results.len(), 6);
    assert!(results[..5].iter().all(Result::is_ok));
    assert!(matches!(results[5], Err(CrashError::ChainTooDeep { depth: 5 })));
}

#[test]
fn test_configured_chain_depth()
{
    let config = SessionConfig::default().with_max_chain_depth(1);
    let session = session_with(block_layer(kernel(), XFS_BUF_BIO_END_IO), config);
    Xfs::attach(&session);
    let bio = session.value_at(Address::from(BIO), "bio").unwrap();

    let results: Vec<_> = for_each_bio_in_stack(&bio).collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(CrashError::ChainTooDeep { depth: 1 })));
}

#[test]
fn test_chain_is_lazy()
{
    // the successor is unreadable; only advancing past the first entry touches it
    let builder = block_layer(kernel(), XFS_BUF_BIO_END_IO).write_u64(BIO + 0x18, 0x9000_0000);
    let session = session(builder);
    Xfs::attach(&session);
    let bio = session.value_at(Address::from(BIO), "bio").unwrap();

    let mut chain = for_each_bio_in_stack(&bio);
    assert!(chain.next().unwrap().is_ok());
    assert!(matches!(chain.next(), Some(Err(CrashError::MemoryAccess { .. }))));
    assert!(chain.next().is_none());
}

#[test]
fn test_explicit_start()
{
    let session = session(block_layer(kernel(), 0));
    let buf = session.value_at(Address::from(XFS_BUF), "xfs_buf").unwrap();

    let entries: Vec<_> = DecodeChain::starting_with(buf, decode_xfsbuf, 8).collect();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].as_ref().unwrap().description.ends_with(&format!("block number {BLOCK_NUMBER}")));
}
