//! # Typed Values
//!
//! A [`Value`] is an address plus the layout of the structure that lives
//! there. It owns no bytes: every read goes back to the image and is checked
//! against readable memory, so a value over a dangling pointer is cheap to
//! make and fails only when something is actually read through it.
//!
//! Member paths may be dotted (`"part0.__dev"`, `"b_pin_count.counter"`);
//! every segment but the last must name an embedded structure.
//!
//! ```rust
//! use crashscope_core::image::SnapshotImage;
//! use crashscope_core::session::Session;
//! use crashscope_core::types::{Address, FieldLayout, StructLayout};
//!
//! let image = SnapshotImage::builder()
//!     .map(0x1000, 0x40)
//!     .write_u64(0x1008, 42)
//!     .layout(
//!         StructLayout::new("atomic_t", 4).with_field(FieldLayout::signed("counter", 0, 4)),
//!     )
//!     .layout(
//!         StructLayout::new("xfs_buf", 0x40)
//!             .with_field(FieldLayout::unsigned("b_bn", 8, 8))
//!             .with_field(FieldLayout::embedded("b_pin_count", 0x10, 4, "atomic_t")),
//!     )
//!     .build();
//! let session = Session::new(image);
//!
//! let buf = session.value_at(Address::from(0x1000), "struct xfs_buf").unwrap();
//! assert_eq!(buf.read_u64("b_bn").unwrap(), 42);
//! assert_eq!(buf.read_i64("b_pin_count.counter").unwrap(), 0);
//! ```

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::container;
use crate::error::{CrashError, CrashResult};
use crate::image::{decode_signed, decode_unsigned};
use crate::session::Session;
use crate::types::{Address, FieldKind, FieldLayout, StructLayout};

/// A structure instance inside the analyzed image
#[derive(Clone)]
pub struct Value
{
    session: Session,
    layout: Arc<StructLayout>,
    address: Address,
}

impl Value
{
    pub fn new(session: Session, layout: Arc<StructLayout>, address: Address) -> Self
    {
        Self {
            session,
            layout,
            address,
        }
    }

    pub fn address(&self) -> Address
    {
        self.address
    }

    pub fn layout(&self) -> &Arc<StructLayout>
    {
        &self.layout
    }

    pub fn type_name(&self) -> &str
    {
        self.layout.name()
    }

    pub fn session(&self) -> &Session
    {
        &self.session
    }

    pub fn size(&self) -> u64
    {
        self.layout.size()
    }

    /// Resolve a (possibly dotted) member path to its absolute offset and field
    fn locate(&self, path: &str) -> CrashResult<(u64, FieldLayout)>
    {
        let segments: SmallVec<[&str; 4]> = path.split('.').collect();
        let mut layout = Arc::clone(&self.layout);
        let mut offset = 0u64;

        for (idx, segment) in segments.iter().enumerate() {
            let field = layout.field(segment)?.clone();
            offset = offset.saturating_add(field.offset);
            if idx + 1 == segments.len() {
                return Ok((offset, field));
            }
            match &field.kind {
                FieldKind::Struct(inner) => layout = self.session.resolve_type(inner)?,
                other => {
                    return Err(CrashError::TypeMismatch {
                        expected: format!("embedded structure at {}.{segment}", layout.name()),
                        found: other.to_string(),
                    })
                }
            }
        }

        Err(CrashError::InvalidArgument(format!("empty member path on {}", self.type_name())))
    }

    /// Byte offset of a member path from the start of this structure
    pub fn offset_of(&self, path: &str) -> CrashResult<u64>
    {
        self.locate(path).map(|(offset, _)| offset)
    }

    /// Absolute address of a member
    pub fn field_address(&self, path: &str) -> CrashResult<Address>
    {
        let offset = self.offset_of(path)?;
        self.offset_address(offset)
    }

    fn offset_address(&self, offset: u64) -> CrashResult<Address>
    {
        self.address.checked_add(offset).ok_or(CrashError::MemoryAccess {
            address: self.address.value(),
            length: 0,
        })
    }

    /// Embedded structure member as a value of its own type
    pub fn member(&self, path: &str) -> CrashResult<Value>
    {
        let (offset, field) = self.locate(path)?;
        let FieldKind::Struct(type_name) = &field.kind else {
            return Err(self.mismatch(path, "embedded structure", &field.kind));
        };
        let layout = self.session.resolve_type(type_name)?;
        Ok(Value::new(self.session.clone(), layout, self.offset_address(offset)?))
    }

    /// Raw bytes of a member
    pub fn field_bytes(&self, path: &str) -> CrashResult<Vec<u8>>
    {
        let (offset, field) = self.locate(path)?;
        let length = usize::try_from(field.size)
            .map_err(|_| CrashError::InvalidArgument(format!("{}.{path} is too large to read", self.type_name())))?;
        self.session.read_bytes(self.offset_address(offset)?, length)
    }

    /// Raw bytes of the whole structure
    pub fn read_bytes(&self) -> CrashResult<Vec<u8>>
    {
        let length = usize::try_from(self.size())
            .map_err(|_| CrashError::InvalidArgument(format!("{} is too large to read", self.type_name())))?;
        self.session.read_bytes(self.address, length)
    }

    fn scalar_bytes(&self, path: &str) -> CrashResult<Vec<u8>>
    {
        let (offset, field) = self.locate(path)?;
        if matches!(field.kind, FieldKind::Struct(_) | FieldKind::Array { .. }) {
            return Err(self.mismatch(path, "scalar", &field.kind));
        }
        let length = match field.size {
            size @ (1 | 2 | 4 | 8) => size as usize,
            size => {
                return Err(CrashError::TypeMismatch {
                    expected: format!("scalar of 1, 2, 4 or 8 bytes at {}.{path}", self.type_name()),
                    found: format!("{size} bytes"),
                })
            }
        };
        self.session.read_bytes(self.offset_address(offset)?, length)
    }

    /// Read an integer member, zero-extended
    pub fn read_u64(&self, path: &str) -> CrashResult<u64>
    {
        let bytes = self.scalar_bytes(path)?;
        decode_unsigned(&bytes, self.session.image().endian())
    }

    /// Read an integer member, sign-extended
    pub fn read_i64(&self, path: &str) -> CrashResult<i64>
    {
        let bytes = self.scalar_bytes(path)?;
        decode_signed(&bytes, self.session.image().endian())
    }

    /// Read a pointer member; NULL is returned as [`Address::NULL`], not an error
    pub fn read_pointer(&self, path: &str) -> CrashResult<Address>
    {
        let (_, field) = self.locate(path)?;
        if !matches!(field.kind, FieldKind::Pointer { .. } | FieldKind::Integer { .. }) {
            return Err(self.mismatch(path, "pointer", &field.kind));
        }
        self.read_u64(path).map(Address::from)
    }

    /// Follow a pointer member whose pointee type is known from the layout
    ///
    /// ## Errors
    ///
    /// - `NullPointer` if the member is NULL
    /// - `TypeMismatch` if the member is not a pointer to a named structure
    pub fn deref(&self, path: &str) -> CrashResult<Value>
    {
        let (_, field) = self.locate(path)?;
        let FieldKind::Pointer { target: Some(target) } = &field.kind else {
            return Err(self.mismatch(path, "pointer to a named structure", &field.kind));
        };
        self.cast_pointer(path, target)
    }

    /// Follow a pointer member, viewing the pointee as `type_name`
    ///
    /// Used for `void *` members (`bi_private`, `s_fs_info`) whose real type
    /// is known only from context.
    pub fn cast_pointer(&self, path: &str, type_name: &str) -> CrashResult<Value>
    {
        let pointer = self.read_pointer(path)?;
        if pointer.is_null() {
            return Err(CrashError::NullPointer {
                type_name: self.type_name().to_string(),
                field: path.to_string(),
            });
        }
        self.session.value_at(pointer, type_name)
    }

    /// The same address viewed as another structure type
    pub fn cast(&self, type_name: &str) -> CrashResult<Value>
    {
        self.session.value_at(self.address, type_name)
    }

    /// The `type_name` structure that embeds this value as `member`
    ///
    /// See [`container::container_of`].
    pub fn container_of(&self, type_name: &str, member: &str) -> CrashResult<Value>
    {
        let owner = self.session.resolve_type(type_name)?;
        container::container_of(&self.session, self.address, &owner, member)
    }

    /// Decode an inline `char name[N]` member up to its first NUL
    pub fn read_cstring(&self, path: &str) -> CrashResult<String>
    {
        let (_, field) = self.locate(path)?;
        if !matches!(field.kind, FieldKind::Array { .. }) {
            return Err(self.mismatch(path, "character array", &field.kind));
        }
        let bytes = self.field_bytes(path)?;
        let end = bytes.iter().position(|&byte| byte == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// Follow a `char *` member and decode the string it points to
    pub fn read_string_pointer(&self, path: &str) -> CrashResult<String>
    {
        let pointer = self.read_pointer(path)?;
        if pointer.is_null() {
            return Err(CrashError::NullPointer {
                type_name: self.type_name().to_string(),
                field: path.to_string(),
            });
        }
        self.session.read_c_string(pointer)
    }

    fn mismatch(&self, path: &str, expected: &str, found: &FieldKind) -> CrashError
    {
        CrashError::TypeMismatch {
            expected: format!("{expected} at {}.{path}", self.type_name()),
            found: found.to_string(),
        }
    }
}

impl PartialEq for Value
{
    fn eq(&self, other: &Self) -> bool
    {
        self.address == other.address && self.layout.name() == other.layout.name()
    }
}

impl Eq for Value {}

impl fmt::Debug for Value
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Value")
            .field("type", &self.layout.name())
            .field("address", &self.address)
            .finish()
    }
}

impl fmt::Display for Value
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "(struct {} *){}", self.layout.name(), self.address)
    }
}
