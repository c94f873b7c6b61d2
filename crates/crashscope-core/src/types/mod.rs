//! # Types
//!
//! Addresses and structure layouts shared by every layer of the crate.

pub mod address;
pub mod layout;

// Re-export all public types
pub use address::Address;
pub use layout::{canonical_type_name, FieldKind, FieldLayout, StructLayout};
