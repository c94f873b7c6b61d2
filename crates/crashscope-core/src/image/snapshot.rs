//! In-memory snapshot image.
//!
//! [`SnapshotImage`] holds a sparse set of mapped regions together with the
//! layouts and symbols that describe them. It is the image used by synthetic
//! fixtures, and by hosts that have already pulled the interesting pages out
//! of a dump.
//!
//! ```rust
//! use crashscope_core::image::{MemoryImage, SnapshotImage};
//! use crashscope_core::types::{Address, FieldLayout, StructLayout};
//!
//! let image = SnapshotImage::builder()
//!     .map(0x1000, 0x100)
//!     .write_u64(0x1008, 0xabcd)
//!     .layout(StructLayout::new("pair", 16).with_field(FieldLayout::unsigned("b", 8, 8)))
//!     .symbol("pair_instance", 0x1000)
//!     .build();
//!
//! assert_eq!(image.read_bytes(Address::from(0x1008), 2).unwrap(), vec![0xcd, 0xab]);
//! assert!(image.read_bytes(Address::from(0x10f8), 16).is_err());
//! ```

use std::collections::{BTreeMap, HashMap};

use super::{encode_unsigned, Endianness, MemoryImage};
use crate::error::{CrashError, CrashResult};
use crate::types::{canonical_type_name, Address, StructLayout};

/// Sparse, immutable memory snapshot with attached metadata
#[derive(Debug, Clone)]
pub struct SnapshotImage
{
    regions: BTreeMap<u64, Vec<u8>>,
    layouts: HashMap<String, StructLayout>,
    symbols: HashMap<String, Address>,
    endian: Endianness,
    pointer_size: usize,
}

impl SnapshotImage
{
    pub fn builder() -> SnapshotBuilder
    {
        SnapshotBuilder::default()
    }

    /// Number of mapped regions.
    pub fn region_count(&self) -> usize
    {
        self.regions.len()
    }

    fn region_for(&self, address: u64, length: usize) -> Option<&[u8]>
    {
        let (&start, bytes) = self.regions.range(..=address).next_back()?;
        let offset = usize::try_from(address - start).ok()?;
        let end = offset.checked_add(length)?;
        bytes.get(offset..end)
    }
}

impl MemoryImage for SnapshotImage
{
    fn read_into(&self, address: Address, buf: &mut [u8]) -> CrashResult<()>
    {
        let source = self
            .region_for(address.value(), buf.len())
            .ok_or(CrashError::MemoryAccess {
                address: address.value(),
                length: buf.len(),
            })?;
        buf.copy_from_slice(source);
        Ok(())
    }

    fn lookup_type(&self, name: &str) -> CrashResult<Option<StructLayout>>
    {
        Ok(self.layouts.get(canonical_type_name(name)).cloned())
    }

    fn lookup_symbol(&self, name: &str) -> Option<Address>
    {
        self.symbols.get(name).copied()
    }

    fn endian(&self) -> Endianness
    {
        self.endian
    }

    fn pointer_size(&self) -> usize
    {
        self.pointer_size
    }
}

/// Builder for [`SnapshotImage`]
///
/// Writes that fall outside every mapped region are dropped with a warning;
/// fixtures should [`map`](SnapshotBuilder::map) first.
#[derive(Debug)]
pub struct SnapshotBuilder
{
    regions: BTreeMap<u64, Vec<u8>>,
    layouts: HashMap<String, StructLayout>,
    symbols: HashMap<String, Address>,
    endian: Endianness,
    pointer_size: usize,
}

impl Default for SnapshotBuilder
{
    fn default() -> Self
    {
        Self {
            regions: BTreeMap::new(),
            layouts: HashMap::new(),
            symbols: HashMap::new(),
            endian: Endianness::Little,
            pointer_size: 8,
        }
    }
}

impl SnapshotBuilder
{
    /// Map `length` zeroed bytes at `start`
    ///
    /// Regions must not overlap; an overlapping region replaces the earlier one
    /// starting at the same address and is otherwise undefined.
    #[must_use]
    pub fn map(mut self, start: u64, length: usize) -> Self
    {
        self.regions.insert(start, vec![0u8; length]);
        self
    }

    /// Map a region with the given contents
    #[must_use]
    pub fn region(mut self, start: u64, bytes: Vec<u8>) -> Self
    {
        self.regions.insert(start, bytes);
        self
    }

    /// Copy `bytes` into already mapped memory
    #[must_use]
    pub fn write_bytes(mut self, address: u64, bytes: &[u8]) -> Self
    {
        let target = self
            .regions
            .range_mut(..=address)
            .next_back()
            .and_then(|(&start, region)| {
                let offset = usize::try_from(address - start).ok()?;
                let end = offset.checked_add(bytes.len())?;
                region.get_mut(offset..end)
            });

        match target {
            Some(slot) => slot.copy_from_slice(bytes),
            None => tracing::warn!(address = format_args!("{address:#x}"), len = bytes.len(), "write outside mapped snapshot memory"),
        }
        self
    }

    #[must_use]
    pub fn write_u64(self, address: u64, value: u64) -> Self
    {
        let bytes = encode_unsigned(value, 8, self.endian);
        self.write_bytes(address, &bytes)
    }

    #[must_use]
    pub fn write_u32(self, address: u64, value: u32) -> Self
    {
        let bytes = encode_unsigned(u64::from(value), 4, self.endian);
        self.write_bytes(address, &bytes)
    }

    /// Write a NUL-terminated string
    #[must_use]
    pub fn write_cstr(self, address: u64, text: &str) -> Self
    {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        self.write_bytes(address, &bytes)
    }

    /// Register a layout under its canonical name
    #[must_use]
    pub fn layout(mut self, layout: StructLayout) -> Self
    {
        self.layouts.insert(layout.name().to_string(), layout);
        self
    }

    #[must_use]
    pub fn symbol(mut self, name: &str, address: u64) -> Self
    {
        self.symbols.insert(name.to_string(), Address::from(address));
        self
    }

    /// Byte order used by subsequent `write_*` calls and by readers
    #[must_use]
    pub fn endian(mut self, endian: Endianness) -> Self
    {
        self.endian = endian;
        self
    }

    #[must_use]
    pub fn pointer_size(mut self, size: usize) -> Self
    {
        self.pointer_size = size;
        self
    }

    pub fn build(self) -> SnapshotImage
    {
        SnapshotImage {
            regions: self.regions,
            layouts: self.layouts,
            symbols: self.symbols,
            endian: self.endian,
            pointer_size: self.pointer_size,
        }
    }
}
