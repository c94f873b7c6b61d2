//! # Kernel Debug Information
//!
//! Structure layouts and symbols read from an uncompressed `vmlinux` (or a
//! separate `.debug` file) with DWARF.
//!
//! Section bytes are loaded eagerly with `object`; the DWARF itself is parsed
//! lazily with `gimli` the first time a layout is requested, because a
//! distribution kernel carries hundreds of megabytes of debug information and
//! many sessions only ever need the symbol table.

mod extractor;

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gimli::{Dwarf, EndianArcSlice, RunTimeEndian, SectionId, Unit};
use object::{Object, ObjectSection, ObjectSymbol};
use once_cell::sync::OnceCell;

use self::extractor::LayoutExtractor;
use crate::error::{CrashError, CrashResult};
use crate::types::{canonical_type_name, Address, StructLayout};

type OwnedReader = EndianArcSlice<RunTimeEndian>;
type OwnedDwarf = Dwarf<OwnedReader>;

/// DWARF layouts and the ELF symbol table of one kernel image
pub struct KernelDebugInfo
{
    path: PathBuf,
    endian: RunTimeEndian,
    pointer_size: usize,
    debug_sections: HashMap<&'static str, Arc<[u8]>>,
    symbols: HashMap<String, u64>,
    dwarf_cache: OnceCell<OwnedDwarf>,
    unit_cache: OnceCell<Vec<Unit<OwnedReader>>>,
}

impl KernelDebugInfo
{
    /// Load the debug sections and symbol table of `path`
    ///
    /// ## Errors
    ///
    /// - `Io` if the file cannot be read
    /// - `InvalidArgument` if it is not a parseable object file
    pub fn open(path: impl AsRef<Path>) -> CrashResult<Self>
    {
        let path = path.as_ref().to_path_buf();
        let bytes = fs::read(&path)?;
        let file = object::File::parse(&*bytes)
            .map_err(|err| CrashError::InvalidArgument(format!("failed to parse {}: {err}", path.display())))?;

        let endian = if file.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };
        let pointer_size = if file.is_64() { 8 } else { 4 };

        let mut debug_sections = HashMap::new();
        for name in DWARF_SECTIONS {
            debug_sections.insert(*name, load_section_bytes(&file, name)?);
        }

        let mut symbols = HashMap::new();
        for symbol in file.symbols() {
            let Ok(name) = symbol.name() else {
                continue;
            };
            if name.is_empty() || symbol.address() == 0 || !symbol.is_definition() {
                continue;
            }
            symbols.entry(name.to_string()).or_insert(symbol.address());
        }

        tracing::debug!(
            path = %path.display(),
            symbols = symbols.len(),
            debug_info = debug_sections.get(".debug_info").map_or(0, |data| data.len()),
            "loaded kernel debug information"
        );

        Ok(Self {
            path,
            endian,
            pointer_size,
            debug_sections,
            symbols,
            dwarf_cache: OnceCell::new(),
            unit_cache: OnceCell::new(),
        })
    }

    pub fn path(&self) -> &Path
    {
        &self.path
    }

    pub fn pointer_size(&self) -> usize
    {
        self.pointer_size
    }

    pub fn is_little_endian(&self) -> bool
    {
        matches!(self.endian, RunTimeEndian::Little)
    }

    /// Link-time address of `name`, before any KASLR relocation
    pub fn symbol(&self, name: &str) -> Option<Address>
    {
        self.symbols.get(name).copied().map(Address::from)
    }

    pub fn symbol_count(&self) -> usize
    {
        self.symbols.len()
    }

    /// Extract the layout of the named structure or union
    ///
    /// Declarations (`struct foo;`) are skipped in favour of the first full
    /// definition.
    pub fn lookup_type(&self, name: &str) -> CrashResult<Option<StructLayout>>
    {
        let dwarf = self.dwarf()?;
        let units = self.units()?;
        LayoutExtractor::new(dwarf, units).describe(canonical_type_name(name))
    }

    fn dwarf(&self) -> CrashResult<&OwnedDwarf>
    {
        self.dwarf_cache.get_or_try_init(|| {
            Dwarf::load(|section| Ok::<_, gimli::Error>(self.section_reader(section)))
                .map_err(|err| map_dwarf_error("loading DWARF", err))
        })
    }

    fn units(&self) -> CrashResult<&[Unit<OwnedReader>]>
    {
        self.unit_cache
            .get_or_try_init(|| {
                let dwarf = self.dwarf()?;
                let mut units = Vec::new();
                let mut headers = dwarf.units();
                while let Some(header) = headers
                    .next()
                    .map_err(|err| map_dwarf_error("reading .debug_info unit header", err))?
                {
                    units.push(dwarf.unit(header).map_err(|err| map_dwarf_error("parsing compilation unit", err))?);
                }
                tracing::debug!(units = units.len(), "parsed DWARF compilation units");
                Ok(units)
            })
            .map(Vec::as_slice)
    }

    fn section_reader(&self, id: SectionId) -> OwnedReader
    {
        let data = self
            .debug_sections
            .get(id.name())
            .cloned()
            .unwrap_or_else(|| Arc::<[u8]>::from(Vec::new()));
        EndianArcSlice::new(data, self.endian)
    }
}

const DWARF_SECTIONS: &[&str] = &[
    ".debug_abbrev",
    ".debug_addr",
    ".debug_info",
    ".debug_line",
    ".debug_line_str",
    ".debug_ranges",
    ".debug_rnglists",
    ".debug_str",
    ".debug_str_offsets",
    ".debug_types",
    ".debug_loc",
    ".debug_loclists",
];

fn load_section_bytes(file: &object::File<'_>, name: &str) -> CrashResult<Arc<[u8]>>
{
    let Some(section) = file.section_by_name(name) else {
        return Ok(Arc::<[u8]>::from(Vec::new()));
    };
    let data = section
        .uncompressed_data()
        .map_err(|err| CrashError::InvalidArgument(format!("failed to read {name}: {err}")))?;
    Ok(match data {
        Cow::Borrowed(bytes) => Arc::<[u8]>::from(bytes.to_vec()),
        Cow::Owned(vec) => vec.into(),
    })
}

/// Map a gimli DWARF error to a `CrashError` with context.
pub(crate) fn map_dwarf_error(context: &str, err: gimli::Error) -> CrashError
{
    CrashError::InvalidArgument(format!("{context}: {err}"))
}
