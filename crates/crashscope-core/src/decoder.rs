//! # Decoder Chains
//!
//! Some kernel objects only say what they are through a function pointer: a
//! `struct bio` is finished by `bi_end_io`, and whoever set that callback also
//! stashed its own context in `bi_private`. Decoding such an object means
//! looking up a decoder by the callback's address, which describes the object
//! and may name the next object in the stack (the XFS buffer behind the bio,
//! for example) together with the decoder for it.
//!
//! The key is a symbol address used only as a lookup key; nothing in the
//! image is ever executed.

use std::collections::HashMap;
use std::fmt;
use std::iter::FusedIterator;
use std::sync::{PoisonError, RwLock};

use crate::error::{CrashError, CrashResult};
use crate::types::Address;
use crate::value::Value;

/// Describe one object and optionally point at the next one
pub type DecodeFn = fn(&Value) -> CrashResult<ChainEntry>;

/// The successor named by a [`ChainEntry`]
#[derive(Clone)]
pub struct NextHop
{
    pub value: Value,
    pub decoder: DecodeFn,
}

impl fmt::Debug for NextHop
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("NextHop").field("value", &self.value).finish_non_exhaustive()
    }
}

/// One decoded object in a chain
#[derive(Debug, Clone)]
pub struct ChainEntry
{
    /// Human-readable one-line description
    pub description: String,
    /// Filesystem that owns the object, when known
    pub fstype: Option<&'static str>,
    /// Block device name, when known
    pub devname: Option<String>,
    /// The decoded object itself, for consumers that want to dig further
    pub value: Option<Value>,
    pub next: Option<NextHop>,
}

impl ChainEntry
{
    pub fn new(description: impl Into<String>) -> Self
    {
        Self {
            description: description.into(),
            fstype: None,
            devname: None,
            value: None,
            next: None,
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: Value) -> Self
    {
        self.value = Some(value);
        self
    }

    #[must_use]
    pub fn with_fstype(mut self, fstype: &'static str) -> Self
    {
        self.fstype = Some(fstype);
        self
    }

    #[must_use]
    pub fn with_devname(mut self, devname: impl Into<String>) -> Self
    {
        self.devname = Some(devname.into());
        self
    }

    /// Name `value` as the next object, decoded by `decoder`
    #[must_use]
    pub fn with_next(mut self, value: Value, decoder: DecodeFn) -> Self
    {
        self.next = Some(NextHop { value, decoder });
        self
    }
}

/// A registered decoder
#[derive(Clone, Copy)]
pub struct RegisteredDecoder
{
    /// Symbol the decoder was registered for
    pub name: &'static str,
    pub decode: DecodeFn,
}

impl fmt::Debug for RegisteredDecoder
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("RegisteredDecoder").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Callback address → decoder, owned by the session
#[derive(Default)]
pub struct DecoderRegistry
{
    table: RwLock<HashMap<Address, RegisteredDecoder>>,
}

impl DecoderRegistry
{
    /// Register `decode` for handles whose key equals `key`
    ///
    /// A key registers once; later registrations for the same key are
    /// ignored and return `false`.
    pub fn register(&self, key: Address, name: &'static str, decode: DecodeFn) -> bool
    {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = table.get(&key) {
            tracing::debug!(%key, name, existing = existing.name, "decoder already registered");
            return false;
        }
        tracing::debug!(%key, name, "registered decoder");
        table.insert(key, RegisteredDecoder { name, decode });
        true
    }

    pub fn lookup(&self, key: Address) -> Option<RegisteredDecoder>
    {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied()
    }

    /// Decode `handle` with the decoder registered for its `key_field` pointer
    ///
    /// ## Errors
    ///
    /// `UndecodableHandle` when no decoder is registered for the key.
    pub fn decode(&self, handle: &Value, key_field: &str) -> CrashResult<ChainEntry>
    {
        let key = handle.read_pointer(key_field)?;
        let decoder = self.lookup(key).ok_or(CrashError::UndecodableHandle {
            handle: handle.address().value(),
            key: key.value(),
        })?;
        (decoder.decode)(handle)
    }

    pub fn len(&self) -> usize
    {
        self.table.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }
}

impl fmt::Debug for DecoderRegistry
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("DecoderRegistry").field("len", &self.len()).finish()
    }
}

enum Step
{
    Keyed
    {
        handle: Value,
        key_field: String,
    },
    Hop(NextHop),
}

/// Lazily extended chain of [`ChainEntry`] values
///
/// Each entry is decoded only when the iterator is advanced. A failed step
/// is yielded as an error and ends the chain.
pub struct DecodeChain
{
    pending: Option<Step>,
    produced: usize,
    limit: usize,
}

impl DecodeChain
{
    /// Chain starting with the registered decoder for `handle`'s `key_field`
    pub fn keyed(handle: Value, key_field: &str, limit: usize) -> Self
    {
        Self {
            pending: Some(Step::Keyed {
                handle,
                key_field: key_field.to_string(),
            }),
            produced: 0,
            limit,
        }
    }

    /// Chain starting with an explicit decoder
    pub fn starting_with(value: Value, decoder: DecodeFn, limit: usize) -> Self
    {
        Self {
            pending: Some(Step::Hop(NextHop { value, decoder })),
            produced: 0,
            limit,
        }
    }
}

impl Iterator for DecodeChain
{
    type Item = CrashResult<ChainEntry>;

    fn next(&mut self) -> Option<Self::Item>
    {
        let step = self.pending.take()?;
        if self.produced >= self.limit {
            tracing::warn!(depth = self.produced, "decoder chain too deep");
            return Some(Err(CrashError::ChainTooDeep { depth: self.produced }));
        }

        let decoded = match step {
            Step::Keyed { handle, key_field } => handle.session().decoders().decode(&handle, &key_field),
            Step::Hop(hop) => (hop.decoder)(&hop.value),
        };

        match decoded {
            Ok(entry) => {
                self.produced += 1;
                self.pending = entry.next.clone().map(Step::Hop);
                Some(Ok(entry))
            }
            Err(err) => {
                tracing::debug!(depth = self.produced, error = %err, "decoder chain stopped");
                Some(Err(err))
            }
        }
    }
}

impl FusedIterator for DecodeChain {}
