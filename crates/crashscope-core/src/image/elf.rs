//! ELF vmcore image.
//!
//! Memory comes from the `PT_LOAD` segments of an ELF core file (the format
//! written by kdump with `makedumpfile -E` and by `/proc/vmcore`). Only the
//! file-backed part of a segment is readable: bytes past `p_filesz` were
//! excluded from the dump and reading them is a `MemoryAccess` error, never
//! zero fill.
//!
//! Structure layouts and symbols come from the matching `vmlinux`.

use std::fs;
use std::path::Path;

use object::{Object, ObjectSegment};

use super::{Endianness, MemoryImage};
use crate::debuginfo::KernelDebugInfo;
use crate::error::{CrashError, CrashResult};
use crate::types::{Address, StructLayout};

/// One file-backed `PT_LOAD` range
#[derive(Debug, Clone, Copy)]
struct LoadSegment
{
    start: u64,
    file_offset: u64,
    file_size: u64,
}

impl LoadSegment
{
    fn contains(&self, address: u64, length: u64) -> bool
    {
        address >= self.start
            && address
                .checked_add(length)
                .is_some_and(|end| end <= self.start.saturating_add(self.file_size))
    }
}

/// A kernel crash dump in ELF core format
pub struct ElfCoreImage
{
    data: Vec<u8>,
    segments: Vec<LoadSegment>,
    debuginfo: KernelDebugInfo,
    endian: Endianness,
    pointer_size: usize,
    kaslr_offset: u64,
}

impl ElfCoreImage
{
    /// Open a vmcore together with the vmlinux it was captured from
    ///
    /// ## Errors
    ///
    /// - `Io` if either file cannot be read
    /// - `InvalidArgument` if the vmcore is not an ELF core file, or the two
    ///   files disagree on pointer width
    pub fn open(vmcore: impl AsRef<Path>, vmlinux: impl AsRef<Path>) -> CrashResult<Self>
    {
        let vmcore = vmcore.as_ref();
        let data = fs::read(vmcore)?;
        let debuginfo = KernelDebugInfo::open(vmlinux)?;

        let (segments, endian, pointer_size) = {
            let file = object::File::parse(&*data)
                .map_err(|err| CrashError::InvalidArgument(format!("failed to parse {}: {err}", vmcore.display())))?;
            if file.kind() != object::ObjectKind::Core {
                return Err(CrashError::InvalidArgument(format!(
                    "{} is not an ELF core file",
                    vmcore.display()
                )));
            }

            let mut segments = Vec::new();
            for segment in file.segments() {
                let (file_offset, file_size) = segment.file_range();
                if file_size == 0 {
                    continue;
                }
                segments.push(LoadSegment {
                    start: segment.address(),
                    file_offset,
                    file_size,
                });
            }
            segments.sort_by_key(|segment| segment.start);

            let endian = if file.is_little_endian() {
                Endianness::Little
            } else {
                Endianness::Big
            };
            (segments, endian, if file.is_64() { 8 } else { 4 })
        };

        if pointer_size != debuginfo.pointer_size() {
            return Err(CrashError::InvalidArgument(format!(
                "vmcore is {}-bit but {} is {}-bit",
                pointer_size * 8,
                debuginfo.path().display(),
                debuginfo.pointer_size() * 8
            )));
        }

        tracing::info!(
            vmcore = %vmcore.display(),
            vmlinux = %debuginfo.path().display(),
            segments = segments.len(),
            "opened ELF crash dump"
        );

        Ok(Self {
            data,
            segments,
            debuginfo,
            endian,
            pointer_size,
            kaslr_offset: 0,
        })
    }

    /// Relocate every symbol by `offset`
    ///
    /// Kernels built with `CONFIG_RANDOMIZE_BASE` load at a random offset from
    /// their link address; the offset is recorded as `KERNELOFFSET` in the
    /// dump's VMCOREINFO note.
    #[must_use]
    pub fn with_kaslr_offset(mut self, offset: u64) -> Self
    {
        self.kaslr_offset = offset;
        self
    }

    pub fn debuginfo(&self) -> &KernelDebugInfo
    {
        &self.debuginfo
    }

    pub fn segment_count(&self) -> usize
    {
        self.segments.len()
    }

    fn file_slice(&self, address: u64, length: usize) -> Option<&[u8]>
    {
        let wanted = u64::try_from(length).ok()?;
        let idx = self.segments.partition_point(|segment| segment.start <= address);
        let segment = self.segments.get(idx.checked_sub(1)?)?;
        if !segment.contains(address, wanted) {
            return None;
        }
        let start = usize::try_from(segment.file_offset + (address - segment.start)).ok()?;
        self.data.get(start..start.checked_add(length)?)
    }
}

impl MemoryImage for ElfCoreImage
{
    fn read_into(&self, address: Address, buf: &mut [u8]) -> CrashResult<()>
    {
        let source = self
            .file_slice(address.value(), buf.len())
            .ok_or(CrashError::MemoryAccess {
                address: address.value(),
                length: buf.len(),
            })?;
        buf.copy_from_slice(source);
        Ok(())
    }

    fn lookup_type(&self, name: &str) -> CrashResult<Option<StructLayout>>
    {
        self.debuginfo.lookup_type(name)
    }

    fn lookup_symbol(&self, name: &str) -> Option<Address>
    {
        self.debuginfo
            .symbol(name)
            .map(|address| address + self.kaslr_offset)
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
