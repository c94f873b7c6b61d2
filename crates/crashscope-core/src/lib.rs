//! # crashscope-core
//!
//! Typed memory introspection over kernel crash dumps.
//!
//! This crate provides the substrate that postmortem filesystem and block
//! layer analysis is built on:
//! - Structure layouts resolved by name at analysis time, memoized per session
//! - Typed values over raw image bytes, with bounds-checked field reads
//! - Callbacks that settle version differences once a type or symbol resolves
//! - Intrusive `list_head` walks that survive cycles and NULL links
//! - Container-of downcasting
//! - Tagged record dispatch (XFS log items) and decoder chains (bios)
//!
//! ## Images
//!
//! Everything reads through a [`MemoryImage`](image::MemoryImage). Two
//! implementations ship with the crate: [`SnapshotImage`](image::SnapshotImage)
//! for in-memory regions, and [`ElfCoreImage`](image::ElfCoreImage) for an ELF
//! vmcore paired with its vmlinux.
//!
//! ## Failure model
//!
//! The image is a frozen snapshot of a crashed machine. Dangling pointers,
//! looping lists and unknown tags are expected input: every operation returns
//! a [`CrashResult`], iterators yield per-item results, and nothing is ever
//! guessed or zero-filled.
//!
//! ```rust
//! use crashscope_core::prelude::*;
//!
//! let image = SnapshotImage::builder()
//!     .map(0x1000, 0x40)
//!     .write_cstr(0x1010, "sda")
//!     .layout(StructLayout::new("gendisk", 0x40).with_field(FieldLayout::char_array("disk_name", 0x10, 32)))
//!     .build();
//! let session = Session::new(image);
//!
//! let disk = session.value_at(Address::from(0x1000), "struct gendisk")?;
//! assert_eq!(storage::gendisk_name(&disk)?, "sda");
//! # Ok::<(), CrashError>(())
//! ```

pub mod config;
pub mod container;
pub mod debuginfo;
pub mod decoder;
pub mod error;
pub mod image;
pub mod lazy;
pub mod list;
pub mod prelude;
pub mod session;
pub mod subsystem;
pub mod types;
pub mod value;

// Re-export commonly used types
pub use config::SessionConfig;
pub use error::{CrashError, CrashResult};
pub use session::Session;
pub use types::{Address, StructLayout};
pub use value::Value;
