//! # Memory Images
//!
//! The read-only snapshot being analyzed.
//!
//! A [`MemoryImage`] answers three questions: what bytes live at an address,
//! what a named structure looks like, and where a named symbol lives. Everything
//! else in this crate is built on top of those three primitives.
//!
//! Two implementations ship with the crate:
//!
//! - [`SnapshotImage`]: sparse in-memory regions plus hand-registered layouts
//!   and symbols. Used for synthetic fixtures and for hosts that already hold
//!   the data in memory.
//! - [`ElfCoreImage`]: an ELF vmcore for memory, with the matching vmlinux for
//!   DWARF layouts and the symbol table.

pub mod elf;
pub mod snapshot;

pub use elf::ElfCoreImage;
pub use object::Endianness;
pub use snapshot::{SnapshotBuilder, SnapshotImage};

use crate::error::{CrashError, CrashResult};
use crate::types::{Address, StructLayout};

/// Read-only access to a captured memory image
///
/// Implementations must never fabricate bytes: a read that is not fully backed
/// by the image fails with [`CrashError::MemoryAccess`].
///
/// ## Thread Safety
///
/// Images are shared between every value created in a session, so the trait
/// requires `Send + Sync`. Nothing writes to an image after it is built.
pub trait MemoryImage: Send + Sync
{
    /// Fill `buf` with the bytes starting at `address`
    ///
    /// ## Errors
    ///
    /// `MemoryAccess` if any byte of `[address, address + buf.len())` is not
    /// readable.
    fn read_into(&self, address: Address, buf: &mut [u8]) -> CrashResult<()>;

    /// Layout of the named structure, `Ok(None)` if the image has none
    ///
    /// `name` is already canonical (no `struct ` prefix). Errors are reserved
    /// for debug information that exists but cannot be parsed.
    fn lookup_type(&self, name: &str) -> CrashResult<Option<StructLayout>>;

    /// Address of the named symbol, `None` if the image has none
    fn lookup_symbol(&self, name: &str) -> Option<Address>;

    /// Byte order of the captured system
    fn endian(&self) -> Endianness
    {
        Endianness::Little
    }

    /// Pointer width of the captured system, in bytes
    fn pointer_size(&self) -> usize
    {
        8
    }

    /// Read `length` bytes starting at `address`
    fn read_bytes(&self, address: Address, length: usize) -> CrashResult<Vec<u8>>
    {
        let mut buf = vec![0u8; length];
        self.read_into(address, &mut buf)?;
        Ok(buf)
    }
}

/// Decode an unsigned integer of 1, 2, 4 or 8 bytes
pub(crate) fn decode_unsigned(bytes: &[u8], endian: Endianness) -> CrashResult<u64>
{
    if !matches!(bytes.len(), 1 | 2 | 4 | 8) {
        return Err(CrashError::TypeMismatch {
            expected: "integer of 1, 2, 4 or 8 bytes".to_string(),
            found: format!("{} bytes", bytes.len()),
        });
    }

    let mut value = 0u64;
    match endian {
        Endianness::Little => {
            for byte in bytes.iter().rev() {
                value = (value << 8) | u64::from(*byte);
            }
        }
        Endianness::Big => {
            for byte in bytes {
                value = (value << 8) | u64::from(*byte);
            }
        }
    }
    Ok(value)
}

/// Decode a signed integer of 1, 2, 4 or 8 bytes, sign-extending to 64 bits
#[allow(clippy::cast_possible_wrap)]
pub(crate) fn decode_signed(bytes: &[u8], endian: Endianness) -> CrashResult<i64>
{
    let raw = decode_unsigned(bytes, endian)?;
    let shift = 64 - 8 * bytes.len() as u32;
    Ok(((raw << shift) as i64) >> shift)
}

/// Encode `value` in `size` bytes; used by fixtures that lay out synthetic memory
pub(crate) fn encode_unsigned(value: u64, size: usize, endian: Endianness) -> Vec<u8>
{
    let le = value.to_le_bytes();
    let mut bytes = le[..size.min(8)].to_vec();
    if endian == Endianness::Big {
        bytes.reverse();
    }
    bytes
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_decode_little_endian()
    {
        assert_eq!(decode_unsigned(&[0x3c, 0x12, 0, 0], Endianness::Little).unwrap(), 0x123c);
        assert_eq!(decode_unsigned(&[0xff], Endianness::Little).unwrap(), 0xff);
    }

    #[test]
    fn test_decode_big_endian()
    {
        assert_eq!(decode_unsigned(&[0, 0, 0x12, 0x3c], Endianness::Big).unwrap(), 0x123c);
    }

    #[test]
    fn test_decode_signed_sign_extends()
    {
        assert_eq!(decode_signed(&[0xff, 0xff, 0xff, 0xff], Endianness::Little).unwrap(), -1);
        assert_eq!(decode_signed(&[0xfe], Endianness::Little).unwrap(), -2);
        assert_eq!(decode_signed(&[0x01, 0, 0, 0, 0, 0, 0, 0x80], Endianness::Little).unwrap(), i64::MIN + 1);
    }

    #[test]
    fn test_decode_rejects_odd_sizes()
    {
        assert!(decode_unsigned(&[0, 0, 0], Endianness::Little).is_err());
        assert!(decode_unsigned(&[], Endianness::Little).is_err());
    }

    #[test]
    fn test_encode_round_trips_through_decode()
    {
        let bytes = encode_unsigned(0x1237, 4, Endianness::Big);
        assert_eq!(bytes, vec![0, 0, 0x12, 0x37]);
        assert_eq!(decode_unsigned(&bytes, Endianness::Big).unwrap(), 0x1237);
    }
}
