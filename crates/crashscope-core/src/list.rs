//! # Intrusive Lists
//!
//! Walks a kernel `struct list_head` ring, yielding the structure that embeds
//! each link.
//!
//! A well-formed ring returns to its head. A corrupted one may loop forever
//! without ever revisiting the head, or contain a NULL link; both end the
//! walk with [`CrashError::CorruptList`] instead of hanging or faulting.
//! Nodes yielded before the failure remain valid results.
//!
//! ```rust
//! use crashscope_core::image::SnapshotImage;
//! use crashscope_core::list::list_for_each_entry;
//! use crashscope_core::session::Session;
//! use crashscope_core::types::{Address, FieldLayout, StructLayout};
//!
//! let image = SnapshotImage::builder()
//!     .map(0x1000, 0x100)
//!     // head at 0x1000 -> node link at 0x1048 -> head
//!     .write_u64(0x1000, 0x1048)
//!     .write_u64(0x1048, 0x1000)
//!     .layout(
//!         StructLayout::new("list_head", 16)
//!             .with_field(FieldLayout::pointer("next", 0, "list_head"))
//!             .with_field(FieldLayout::pointer("prev", 8, "list_head")),
//!     )
//!     .layout(StructLayout::new("item", 0x58).with_field(FieldLayout::embedded("link", 0x48, 16, "list_head")))
//!     .build();
//! let session = Session::new(image);
//!
//! let head = session.value_at(Address::from(0x1000), "list_head").unwrap();
//! let items: Vec<_> = list_for_each_entry(&head, "item", "link").unwrap().collect();
//! assert_eq!(items.len(), 1);
//! assert_eq!(items[0].as_ref().unwrap().address(), Address::from(0x1000));
//! ```

use std::iter::FusedIterator;
use std::sync::Arc;

use crate::error::{CrashError, CrashResult};
use crate::session::Session;
use crate::types::{Address, StructLayout};
use crate::value::Value;

/// Iterator over the payloads of a `list_head` ring
///
/// Lazy, finite and not restartable. After the first error it yields nothing.
pub struct ListIter
{
    session: Session,
    head: Address,
    payload: Arc<StructLayout>,
    link_offset: u64,
    next_offset: u64,
    current: Address,
    steps: usize,
    limit: usize,
    done: bool,
}

impl ListIter
{
    /// Walk the ring whose head `list_head` is at `head`
    ///
    /// Each node is viewed as `payload`, which embeds its link at
    /// `link_field` (dotted paths allowed).
    ///
    /// ## Errors
    ///
    /// `TypeNotFound` without a `list_head` layout, `FieldNotFound` if
    /// `payload` has no `link_field`.
    pub fn new(session: &Session, head: Address, payload: Arc<StructLayout>, link_field: &str) -> CrashResult<Self>
    {
        let list_head = session.resolve_type("list_head")?;
        let next_offset = list_head.offset_of("next")?;
        let link_offset = Value::new(session.clone(), Arc::clone(&payload), Address::NULL).offset_of(link_field)?;

        tracing::trace!(%head, payload = payload.name(), link_field, link_offset, "starting list walk");
        Ok(Self {
            session: session.clone(),
            head,
            payload,
            link_offset,
            next_offset,
            current: head,
            steps: 0,
            limit: session.config().max_list_steps,
            done: false,
        })
    }

    /// Number of nodes yielded so far
    pub fn steps(&self) -> usize
    {
        self.steps
    }

    fn corrupt(&mut self, reason: &str) -> CrashError
    {
        self.done = true;
        tracing::warn!(head = %self.head, steps = self.steps, last = %self.current, reason, "corrupt list");
        CrashError::CorruptList {
            steps: self.steps,
            last: self.current.value(),
        }
    }

    fn advance(&mut self) -> CrashResult<Option<Value>>
    {
        let next = self.session.read_pointer(self.current + self.next_offset)?;
        if next == self.head {
            return Ok(None);
        }
        if next.is_null() {
            return Err(self.corrupt("null link"));
        }
        if self.steps >= self.limit {
            return Err(self.corrupt("step limit reached"));
        }

        let base = next.checked_sub(self.link_offset).ok_or_else(|| self.corrupt("link below member offset"))?;
        self.steps += 1;
        self.current = next;
        tracing::trace!(node = %base, step = self.steps, "list node");
        Ok(Some(Value::new(self.session.clone(), Arc::clone(&self.payload), base)))
    }
}

impl Iterator for ListIter
{
    type Item = CrashResult<Value>;

    fn next(&mut self) -> Option<Self::Item>
    {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl FusedIterator for ListIter {}

/// Iterate the `payload_type` structures linked through `link_field` into
/// the ring headed by `head`
///
/// `head` is the `list_head` value itself, typically obtained with
/// [`Value::member`] or [`Session::symbol_value`].
pub fn list_for_each_entry(head: &Value, payload_type: &str, link_field: &str) -> CrashResult<ListIter>
{
    let session = head.session();
    let payload = session.resolve_type(payload_type)?;
    ListIter::new(session, head.address(), payload, link_field)
}
