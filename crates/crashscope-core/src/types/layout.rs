//! Structure layout descriptors.
//!
//! A [`StructLayout`] is the resolved shape of a named structure: its total
//! size and every field's byte offset, byte size and kind. Layouts are built
//! either from DWARF (see [`crate::debuginfo`]) or by hand for synthetic
//! images, and are immutable once built.

use std::collections::HashMap;
use std::fmt;

use crate::error::{CrashError, CrashResult};

/// Kind of a structure field, as far as introspection cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind
{
    /// Integer-like scalar (base types, enums, bool, char)
    Integer
    {
        /// Whether the value is sign-extended when read
        signed: bool,
    },
    /// Pointer, with the pointee structure name when it is a named struct/union
    Pointer
    {
        /// Pointee type name, `None` for `void *`, scalars and function pointers
        target: Option<String>,
    },
    /// Embedded named structure or union
    Struct(String),
    /// Fixed-size array
    Array
    {
        /// Kind of each element
        element: Box<FieldKind>,
        /// Total number of elements (all dimensions multiplied)
        count: u64,
    },
    /// Anything else (floats, anonymous aggregates, function types)
    Other,
}

impl fmt::Display for FieldKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            FieldKind::Integer { signed: true } => write!(f, "signed integer"),
            FieldKind::Integer { signed: false } => write!(f, "unsigned integer"),
            FieldKind::Pointer { target: Some(target) } => write!(f, "pointer to {target}"),
            FieldKind::Pointer { target: None } => write!(f, "pointer"),
            FieldKind::Struct(name) => write!(f, "struct {name}"),
            FieldKind::Array { element, count } => write!(f, "{element}[{count}]"),
            FieldKind::Other => write!(f, "opaque"),
        }
    }
}

/// A single field of a [`StructLayout`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout
{
    pub name: String,
    pub offset: u64,
    pub size: u64,
    pub kind: FieldKind,
}

impl FieldLayout
{
    pub fn new(name: impl Into<String>, offset: u64, size: u64, kind: FieldKind) -> Self
    {
        Self {
            name: name.into(),
            offset,
            size,
            kind,
        }
    }

    /// Unsigned integer field of `size` bytes.
    pub fn unsigned(name: impl Into<String>, offset: u64, size: u64) -> Self
    {
        Self::new(name, offset, size, FieldKind::Integer { signed: false })
    }

    /// Signed integer field of `size` bytes.
    pub fn signed(name: impl Into<String>, offset: u64, size: u64) -> Self
    {
        Self::new(name, offset, size, FieldKind::Integer { signed: true })
    }

    /// 64-bit pointer to a named structure.
    pub fn pointer(name: impl Into<String>, offset: u64, target: &str) -> Self
    {
        Self::new(
            name,
            offset,
            8,
            FieldKind::Pointer {
                target: Some(canonical_type_name(target).to_string()),
            },
        )
    }

    /// 64-bit untyped pointer (`void *`, function pointers).
    pub fn raw_pointer(name: impl Into<String>, offset: u64) -> Self
    {
        Self::new(name, offset, 8, FieldKind::Pointer { target: None })
    }

    /// Embedded structure of type `type_name` occupying `size` bytes.
    pub fn embedded(name: impl Into<String>, offset: u64, size: u64, type_name: &str) -> Self
    {
        Self::new(name, offset, size, FieldKind::Struct(canonical_type_name(type_name).to_string()))
    }

    /// Inline `char name[len]`.
    pub fn char_array(name: impl Into<String>, offset: u64, len: u64) -> Self
    {
        Self::new(
            name,
            offset,
            len,
            FieldKind::Array {
                element: Box::new(FieldKind::Integer { signed: true }),
                count: len,
            },
        )
    }

    /// One past the last byte of this field, relative to the structure start
    pub fn end(&self) -> u64
    {
        self.offset.saturating_add(self.size)
    }
}

/// Resolved layout of a named structure or union
///
/// Fields keep their declaration order; lookup by name goes through an index
/// built when the field is added. When two fields share a name (possible after
/// anonymous members are flattened) the first one wins, matching C's own
/// name lookup order.
#[derive(Debug, Clone)]
pub struct StructLayout
{
    name: String,
    size: u64,
    fields: Vec<FieldLayout>,
    index: HashMap<String, usize>,
}

impl StructLayout
{
    /// Create an empty layout; `name` is canonicalized (`struct ` is stripped).
    pub fn new(name: &str, size: u64) -> Self
    {
        Self {
            name: canonical_type_name(name).to_string(),
            size,
            fields: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Builder-style [`StructLayout::push_field`].
    #[must_use]
    pub fn with_field(mut self, field: FieldLayout) -> Self
    {
        self.push_field(field);
        self
    }

    /// Append a field
    pub fn push_field(&mut self, field: FieldLayout)
    {
        self.index.entry(field.name.clone()).or_insert(self.fields.len());
        self.fields.push(field);
    }

    pub fn name(&self) -> &str
    {
        &self.name
    }

    /// Total size in bytes (`sizeof`)
    pub fn size(&self) -> u64
    {
        self.size
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldLayout>
    {
        self.fields.iter()
    }

    pub fn has_field(&self, name: &str) -> bool
    {
        self.index.contains_key(name)
    }

    /// Look up a field by name
    ///
    /// ## Errors
    ///
    /// `FieldNotFound` carrying this type's name when the field is absent.
    pub fn field(&self, name: &str) -> CrashResult<&FieldLayout>
    {
        self.index
            .get(name)
            .map(|&idx| &self.fields[idx])
            .ok_or_else(|| CrashError::FieldNotFound {
                type_name: self.name.clone(),
                field: name.to_string(),
            })
    }

    /// Byte offset of a direct field
    pub fn offset_of(&self, name: &str) -> CrashResult<u64>
    {
        self.field(name).map(|field| field.offset)
    }
}

impl PartialEq for StructLayout
{
    fn eq(&self, other: &Self) -> bool
    {
        self.name == other.name && self.size == other.size && self.fields == other.fields
    }
}

impl Eq for StructLayout {}

/// Strip C aggregate keywords so `struct xfs_ail` and `xfs_ail` share a cache key
///
/// ```rust
/// use crashscope_core::types::canonical_type_name;
///
/// assert_eq!(canonical_type_name("struct xfs_ail"), "xfs_ail");
/// assert_eq!(canonical_type_name("  union  u "), "u");
/// assert_eq!(canonical_type_name("list_head"), "list_head");
/// ```
pub fn canonical_type_name(name: &str) -> &str
{
    let trimmed = name.trim();
    for keyword in ["struct ", "union ", "enum "] {
        if let Some(rest) = trimmed.strip_prefix(keyword) {
            return rest.trim();
        }
    }
    trimmed
}
