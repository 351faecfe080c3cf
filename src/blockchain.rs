// Thin re-export module: implementation is in `blockchain/core.rs`, split into
// the block type, the append-only store and chain validation.

pub mod core;
pub use self::core::*;
