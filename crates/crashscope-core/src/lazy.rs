//! # Lazy Resolution
//!
//! Kernel structures change between releases: fields get renamed, moved into
//! sub-structures, or disappear. Code that must work across versions decides
//! which variant it is looking at once, the first time the deciding type or
//! symbol becomes resolvable, and records the answer in a [`Deferred`] cell.
//!
//! Registrations live in the session's [`LazyRegistry`] until their subject
//! resolves. The resolver consults the registry on every successful
//! resolution, so a callback fires no matter which code path first needed
//! the type. Each callback runs exactly once.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use crashscope_core::image::SnapshotImage;
//! use crashscope_core::lazy::Deferred;
//! use crashscope_core::session::Session;
//! use crashscope_core::types::{FieldLayout, StructLayout};
//!
//! let image = SnapshotImage::builder()
//!     .layout(StructLayout::new("xfs_ail", 64).with_field(FieldLayout::unsigned("ail_head", 0, 16)))
//!     .build();
//! let session = Session::new(image);
//!
//! let modern = Arc::new(Deferred::new("xfs_ail layout"));
//! let cell = Arc::clone(&modern);
//! session.on_type_available("struct xfs_ail", move |_, layout| {
//!     cell.set(layout.has_field("ail_head"));
//!     Ok(())
//! });
//!
//! assert!(*modern.get().unwrap());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use once_cell::sync::OnceCell;

use crate::error::{CrashError, CrashResult};
use crate::session::Session;
use crate::types::{canonical_type_name, Address, StructLayout};

/// Callback run when a type first resolves
pub type TypeCallback = Box<dyn FnOnce(&Session, &StructLayout) -> CrashResult<()> + Send>;

/// Callback run when a symbol first resolves
pub type SymbolCallback = Box<dyn FnOnce(&Session, Address) -> CrashResult<()> + Send>;

/// What a registration waits for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject
{
    /// A structure layout, by canonical name
    Type(String),
    /// A symbol, by exact name
    Symbol(String),
}

impl Subject
{
    pub fn type_name(name: &str) -> Self
    {
        Subject::Type(canonical_type_name(name).to_string())
    }

    pub fn symbol(name: &str) -> Self
    {
        Subject::Symbol(name.to_string())
    }
}

impl fmt::Display for Subject
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Subject::Type(name) => write!(f, "type {name}"),
            Subject::Symbol(name) => write!(f, "symbol {name}"),
        }
    }
}

pub(crate) enum Pending
{
    Type(TypeCallback),
    Symbol(SymbolCallback),
}

/// Pending finalize callbacks, keyed by subject
///
/// The lock is only held to insert or remove registrations; callbacks run
/// after it is released so they may resolve further types and register more
/// callbacks.
#[derive(Default)]
pub struct LazyRegistry
{
    pending: Mutex<HashMap<Subject, Vec<Pending>>>,
}

impl LazyRegistry
{
    pub(crate) fn push(&self, subject: Subject, callback: Pending)
    {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.entry(subject).or_default().push(callback);
    }

    /// Remove and return every callback waiting on `subject`
    pub(crate) fn take(&self, subject: &Subject) -> Vec<Pending>
    {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.remove(subject).unwrap_or_default()
    }

    /// Subjects that still have callbacks waiting
    pub fn pending_subjects(&self) -> Vec<Subject>
    {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.keys().cloned().collect()
    }

    /// Number of callbacks that have not run yet
    pub fn pending_count(&self) -> usize
    {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.values().map(Vec::len).sum()
    }

    pub fn is_pending(&self, subject: &Subject) -> bool
    {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.contains_key(subject)
    }
}

impl fmt::Debug for LazyRegistry
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("LazyRegistry")
            .field("pending", &self.pending_subjects())
            .finish()
    }
}

/// A write-once setting decided by a lazy callback
///
/// Reading it before the deciding callback ran is an
/// [`Unavailable`](CrashError::Unavailable) error: there is no default to fall
/// back to, because any default would be wrong for some kernel version.
pub struct Deferred<T>
{
    name: &'static str,
    cell: OnceCell<T>,
}

impl<T> Deferred<T>
{
    pub const fn new(name: &'static str) -> Self
    {
        Self {
            name,
            cell: OnceCell::new(),
        }
    }

    /// Record the value; returns `false` (and keeps the first value) if it
    /// was already set
    pub fn set(&self, value: T) -> bool
    {
        let first = self.cell.set(value).is_ok();
        if !first {
            tracing::debug!(setting = self.name, "ignoring second finalization");
        }
        first
    }

    pub fn get(&self) -> CrashResult<&T>
    {
        self.cell
            .get()
            .ok_or_else(|| CrashError::Unavailable(self.name.to_string()))
    }

    pub fn is_set(&self) -> bool
    {
        self.cell.get().is_some()
    }

    pub fn name(&self) -> &'static str
    {
        self.name
    }
}

impl<T: fmt::Debug> fmt::Debug for Deferred<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Deferred")
            .field("name", &self.name)
            .field("value", &self.cell.get())
            .finish()
    }
}
