//! Hyperstore Arrow
//!
//! Row-at-a-time iteration over a relation split into a plain child relation and
//! a compressed child relation, where each compressed record packs many logical
//! rows as columnar Arrow data. The crate provides the row identifier codec that
//! addresses individual rows inside compressed records, the mapping between the
//! logical and the compressed schema, a cache of decompressed columns, and the
//! [`ArrowSlot`](arrow_slot::ArrowSlot) iteration state tying them together.

pub mod arrow_cache;
pub mod arrow_slot;
pub mod attr_set;
pub mod child_slot;
pub mod compressed_schema;
pub mod decompress;
pub mod offset_map;
pub mod options;
pub mod tid;
