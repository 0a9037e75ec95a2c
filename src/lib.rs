//! A longest prefix match table for IPv4/IPv6 route lookup.
//!
//! The table maps prefixes of up to 128 bits to payloads of an
//! arbitrary clonable type and answers, for a full-length key, with the
//! payload of the most specific stored prefix covering it.
//!
//! Two structures back every table: a binary trie holding the
//! authoritative prefix set, and a 256-way stride-8 multibit trie
//! derived from it by controlled prefix expansion, which bounds a
//! lookup at sixteen memory reads. Mutations keep the two consistent,
//! including rollback on allocation failure and reclamation of blocks
//! that lose their last supporting prefix.

mod bit_trie;
mod multi_trie;
mod table;
pub mod types;

pub use table::{LookupResult, LpmTable};
pub use types::errors::LpmError;
pub use types::DebugCategory;
pub use types::prefix::{
    search_key, LpmPrefix, LEVEL_MAX, MASKLEN_MAX, PREFIX_KEY_SIZE, STRIDE,
};
pub use types::stats::TableStats;
