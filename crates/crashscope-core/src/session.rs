//! # Session
//!
//! One analysis of one memory image.
//!
//! The session owns everything whose lifetime is "until the dump is closed":
//! the image, the memoized type and symbol tables, pending lazy
//! registrations, and the decoder registry. It is cheap to clone (an `Arc`
//! inside), and every [`Value`] carries a clone so that it can never outlive
//! the image it points into.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::SessionConfig;
use crate::decoder::{DecodeChain, DecoderRegistry};
use crate::error::{CrashError, CrashResult};
use crate::image::{decode_unsigned, MemoryImage};
use crate::lazy::{LazyRegistry, Pending, Subject};
use crate::types::{canonical_type_name, Address, StructLayout};
use crate::value::Value;

struct SessionInner
{
    image: Arc<dyn MemoryImage>,
    config: SessionConfig,
    types: RwLock<HashMap<String, Arc<StructLayout>>>,
    symbols: RwLock<HashMap<String, Address>>,
    lazy: LazyRegistry,
    decoders: DecoderRegistry,
}

/// Shared handle to an analysis session
///
/// ## Thread Safety
///
/// `Session` is `Send + Sync`. Lookups take short read locks on the caches;
/// lazy callbacks run without any session lock held.
#[derive(Clone)]
pub struct Session
{
    inner: Arc<SessionInner>,
}

impl Session
{
    /// Start a session with limits taken from the environment
    pub fn new(image: impl MemoryImage + 'static) -> Self
    {
        Self::with_config(image, SessionConfig::from_env())
    }

    pub fn with_config(image: impl MemoryImage + 'static, config: SessionConfig) -> Self
    {
        Self::from_shared(Arc::new(image), config)
    }

    /// Start a session over an image that is shared with other owners
    pub fn from_shared(image: Arc<dyn MemoryImage>, config: SessionConfig) -> Self
    {
        tracing::debug!(?config, "starting analysis session");
        Self {
            inner: Arc::new(SessionInner {
                image,
                config,
                types: RwLock::new(HashMap::new()),
                symbols: RwLock::new(HashMap::new()),
                lazy: LazyRegistry::default(),
                decoders: DecoderRegistry::default(),
            }),
        }
    }

    pub fn image(&self) -> &dyn MemoryImage
    {
        self.inner.image.as_ref()
    }

    pub fn config(&self) -> &SessionConfig
    {
        &self.inner.config
    }

    pub fn lazy(&self) -> &LazyRegistry
    {
        &self.inner.lazy
    }

    pub fn decoders(&self) -> &DecoderRegistry
    {
        &self.inner.decoders
    }

    /// Resolve a structure layout by name
    ///
    /// `struct `/`union ` prefixes are ignored. The first successful lookup is
    /// memoized; misses are not, so a type from debug information loaded
    /// later still resolves.
    ///
    /// ## Errors
    ///
    /// `TypeNotFound` if the image has no layout for `name`.
    pub fn resolve_type(&self, name: &str) -> CrashResult<Arc<StructLayout>>
    {
        self.try_resolve_type(name)?
            .ok_or_else(|| CrashError::TypeNotFound(canonical_type_name(name).to_string()))
    }

    /// Like [`resolve_type`](Self::resolve_type), with a missing type as `Ok(None)`
    pub fn try_resolve_type(&self, name: &str) -> CrashResult<Option<Arc<StructLayout>>>
    {
        let name = canonical_type_name(name);
        let cached = self
            .inner
            .types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();

        let layout = match cached {
            Some(layout) => layout,
            None => {
                let Some(found) = self.inner.image.lookup_type(name)? else {
                    return Ok(None);
                };
                tracing::debug!(name, size = found.size(), "resolved type");
                let mut types = self.inner.types.write().unwrap_or_else(PoisonError::into_inner);
                Arc::clone(types.entry(name.to_string()).or_insert_with(|| Arc::new(found)))
            }
        };

        self.fire(&Subject::Type(name.to_string()), |pending| {
            if let Pending::Type(callback) = pending {
                callback(self, &layout)
            } else {
                Ok(())
            }
        });
        Ok(Some(layout))
    }

    /// Resolve a symbol address
    ///
    /// ## Errors
    ///
    /// `SymbolNotFound` if the image has no such symbol.
    pub fn symbol(&self, name: &str) -> CrashResult<Address>
    {
        self.try_symbol(name)
            .ok_or_else(|| CrashError::SymbolNotFound(name.to_string()))
    }

    pub fn try_symbol(&self, name: &str) -> Option<Address>
    {
        let cached = self
            .inner
            .symbols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied();

        let address = match cached {
            Some(address) => address,
            None => {
                let address = self.inner.image.lookup_symbol(name)?;
                tracing::debug!(name, %address, "resolved symbol");
                self.inner
                    .symbols
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(name.to_string(), address);
                address
            }
        };

        self.fire(&Subject::symbol(name), |pending| {
            if let Pending::Symbol(callback) = pending {
                callback(self, address)
            } else {
                Ok(())
            }
        });
        Some(address)
    }

    /// Run `callback` once, as soon as `name` resolves
    ///
    /// The type is probed immediately, so if it already resolves the callback
    /// has run by the time this returns.
    pub fn on_type_available<F>(&self, name: &str, callback: F)
    where
        F: FnOnce(&Session, &StructLayout) -> CrashResult<()> + Send + 'static,
    {
        let subject = Subject::type_name(name);
        tracing::debug!(%subject, "registered lazy callback");
        self.inner.lazy.push(subject, Pending::Type(Box::new(callback)));
        if let Err(err) = self.try_resolve_type(name) {
            tracing::warn!(name, error = %err, "probing type failed; callback stays pending");
        }
    }

    /// Run `callback` once, as soon as symbol `name` resolves
    pub fn on_symbol_available<F>(&self, name: &str, callback: F)
    where
        F: FnOnce(&Session, Address) -> CrashResult<()> + Send + 'static,
    {
        let subject = Subject::symbol(name);
        tracing::debug!(%subject, "registered lazy callback");
        self.inner.lazy.push(subject, Pending::Symbol(Box::new(callback)));
        let _ = self.try_symbol(name);
    }

    /// Re-probe every pending subject, returning how many callbacks are still waiting
    ///
    /// Hosts call this after loading more debug information (a module's
    /// symbols, for instance).
    pub fn probe_pending(&self) -> usize
    {
        for subject in self.inner.lazy.pending_subjects() {
            match &subject {
                Subject::Type(name) => {
                    if let Err(err) = self.try_resolve_type(name) {
                        tracing::warn!(%subject, error = %err, "probing type failed");
                    }
                }
                Subject::Symbol(name) => {
                    let _ = self.try_symbol(name);
                }
            }
        }
        let remaining = self.inner.lazy.pending_count();
        tracing::debug!(remaining, "probed pending lazy registrations");
        remaining
    }

    fn fire(&self, subject: &Subject, mut run: impl FnMut(Pending) -> CrashResult<()>)
    {
        for pending in self.inner.lazy.take(subject) {
            tracing::debug!(%subject, "running lazy callback");
            if let Err(err) = run(pending) {
                tracing::warn!(%subject, error = %err, "lazy callback failed");
            }
        }
    }

    /// Typed view of `address` as structure `type_name`
    pub fn value_at(&self, address: Address, type_name: &str) -> CrashResult<Value>
    {
        let layout = self.resolve_type(type_name)?;
        Ok(Value::new(self.clone(), layout, address))
    }

    /// Typed view of the global variable `symbol`
    pub fn symbol_value(&self, symbol: &str, type_name: &str) -> CrashResult<Value>
    {
        let address = self.symbol(symbol)?;
        self.value_at(address, type_name)
    }

    pub fn read_bytes(&self, address: Address, length: usize) -> CrashResult<Vec<u8>>
    {
        self.inner.image.read_bytes(address, length)
    }

    /// Read an unsigned integer of `size` bytes in the image's byte order
    pub fn read_unsigned(&self, address: Address, size: usize) -> CrashResult<u64>
    {
        let bytes = self.read_bytes(address, size)?;
        decode_unsigned(&bytes, self.inner.image.endian())
    }

    pub fn read_pointer(&self, address: Address) -> CrashResult<Address>
    {
        self.read_unsigned(address, self.inner.image.pointer_size())
            .map(Address::from)
    }

    /// Read a NUL-terminated string, at most `max_string_len` bytes
    ///
    /// Reads go in chunks that never cross a 256-byte boundary, so a string
    /// ending just before unreadable memory still decodes.
    pub fn read_c_string(&self, address: Address) -> CrashResult<String>
    {
        const CHUNK: u64 = 256;
        let limit = self.inner.config.max_string_len;
        let mut bytes = Vec::new();
        let mut cursor = address;
        while bytes.len() < limit {
            let to_boundary = CHUNK - (cursor.value() % CHUNK);
            let want = usize::try_from(to_boundary).unwrap_or(usize::MAX).min(limit - bytes.len());
            let chunk = self.read_bytes(cursor, want)?;
            if let Some(end) = chunk.iter().position(|&byte| byte == 0) {
                bytes.extend_from_slice(&chunk[..end]);
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }
            bytes.extend_from_slice(&chunk);
            cursor = cursor + want as u64;
        }
        tracing::debug!(%address, limit, "string truncated at limit");
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Lazily decode the chain that starts at `handle`
    ///
    /// The first decoder is the one registered for the pointer stored in
    /// `handle.key_field`; each entry may then name its successor.
    pub fn decode_chain(&self, handle: Value, key_field: &str) -> DecodeChain
    {
        DecodeChain::keyed(handle, key_field, self.inner.config.max_chain_depth)
    }
}

impl fmt::Debug for Session
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let types = self.inner.types.read().map_or(0, |types| types.len());
        let symbols = self.inner.symbols.read().map_or(0, |symbols| symbols.len());
        f.debug_struct("Session")
            .field("config", &self.inner.config)
            .field("cached_types", &types)
            .field("cached_symbols", &symbols)
            .field("lazy", &self.inner.lazy)
            .finish()
    }
}
