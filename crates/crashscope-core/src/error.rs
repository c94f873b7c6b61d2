//! # Error Types
//!
//! Error handling for crash dump introspection.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.
//!
//! Every variant is a local, recoverable condition. The analyzed image is a
//! frozen snapshot of a crashed system, so a dangling pointer or an unexpected
//! tag is data, not a bug: callers decide whether to skip one record, print a
//! partial result, or stop the whole report.

use thiserror::Error;

/// Main error type for introspection operations
///
/// ## Error Categories
///
/// 1. **Metadata errors**: TypeNotFound, SymbolNotFound, FieldNotFound, Unavailable
/// 2. **Memory errors**: MemoryAccess, NullPointer
/// 3. **Integrity errors**: CorruptList, ChainTooDeep, UnknownTag
/// 4. **Usage errors**: TypeMismatch, InvalidArgument, UndecodableHandle
/// 5. **I/O errors**: Io (opening dump and debuginfo files)
#[derive(Error, Debug)]
pub enum CrashError
{
    /// No layout for the named type exists in this image
    ///
    /// This happens when the owning module is not loaded or its debug
    /// information was stripped.
    #[error("Type not found: {0}")]
    TypeNotFound(String),

    /// No address for the named symbol exists in this image
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// The type resolved, but it has no field with this name
    ///
    /// Distinct from `TypeNotFound` so that callers can recognize version
    /// skew (a field renamed between kernel releases).
    #[error("Field not found: {type_name}.{field}")]
    FieldNotFound
    {
        /// Name of the type that was searched
        type_name: String,
        /// Name of the missing field
        field: String,
    },

    /// The requested byte range is not backed by the image
    ///
    /// Raised for dangling or garbage pointers. Unreadable memory is never
    /// reported as zeroes.
    #[error("Cannot access memory at 0x{address:016x} ({length} bytes)")]
    MemoryAccess
    {
        /// First address of the failed read
        address: u64,
        /// Number of bytes requested
        length: usize,
    },

    /// A pointer field that must be followed holds NULL
    #[error("NULL pointer in {type_name}.{field}")]
    NullPointer
    {
        /// Type containing the pointer
        type_name: String,
        /// Pointer field name
        field: String,
    },

    /// A list traversal ran past its step ceiling or hit a NULL link
    ///
    /// `last` is the last link address that was visited successfully (or the
    /// list head when the failure happened on the first step).
    #[error("Corrupt list: gave up after {steps} steps, last good link 0x{last:016x}")]
    CorruptList
    {
        /// Number of nodes yielded before the failure
        steps: usize,
        /// Last good link address
        last: u64,
    },

    /// A decoder chain did not terminate within the configured depth
    #[error("Decoder chain exceeded {depth} entries")]
    ChainTooDeep
    {
        /// Number of entries produced before giving up
        depth: usize,
    },

    /// A tagged record carried a tag outside the known set
    #[error("Unknown AIL item type {tag:x}")]
    UnknownTag
    {
        /// The raw tag value as read from the image
        tag: u64,
    },

    /// No decoder is registered for the handle's key
    #[error("No decoder registered for handle 0x{handle:016x} (key 0x{key:016x})")]
    UndecodableHandle
    {
        /// Address of the handle that could not be decoded
        handle: u64,
        /// Lookup key read from the handle (usually a function address)
        key: u64,
    },

    /// A version-dependent setting was never finalized for this image
    ///
    /// The type or symbol that decides it has not been resolved, so there is
    /// no value to fall back to.
    #[error("{0} is not available in this image")]
    Unavailable(String),

    /// A value was used as a type it is not
    ///
    /// Examples:
    /// - Converting a log item to a buffer item when its tag says inode
    /// - Projecting a pointer field as if it were an embedded structure
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch
    {
        /// What the operation required
        expected: String,
        /// What the value actually is
        found: String,
    },

    /// Invalid argument or malformed metadata
    ///
    /// Also used for DWARF and object file parse failures, with the parse
    /// context in the message.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error while opening dump or debuginfo files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrashError
{
    /// `true` for errors caused by memory contents rather than missing metadata
    ///
    /// Presentation code uses this to decide between "skip this record" and
    /// "this image cannot answer the question at all".
    pub fn is_data_error(&self) -> bool
    {
        matches!(
            self,
            CrashError::MemoryAccess { .. }
                | CrashError::NullPointer { .. }
                | CrashError::CorruptList { .. }
                | CrashError::ChainTooDeep { .. }
                | CrashError::UnknownTag { .. }
                | CrashError::UndecodableHandle { .. }
        )
    }
}

/// Convenience type alias for `Result<T, CrashError>`
///
/// ```rust
/// use crashscope_core::error::CrashResult;
/// fn foo() -> CrashResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type CrashResult<T> = std::result::Result<T, CrashError>;
