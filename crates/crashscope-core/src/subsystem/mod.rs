//! # Kernel Subsystems
//!
//! Helpers that know the shape of specific kernel subsystems. They are thin
//! layers over [`Value`](crate::value::Value): every structure is resolved by
//! name at use time, so the same code reads any kernel whose debug
//! information carries the named fields.

pub mod filesystem;
pub mod storage;
