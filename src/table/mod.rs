//! The table facade: argument validation, the default-route slot, the
//! search datapath and the walk, on top of the binary trie and the
//! expansion and deletion engines.

mod deletion;
mod expansion;


use std::fmt;
use std::mem::size_of;
use std::ops::ControlFlow;

use log::{debug, info};

use crate::bit_trie::{self, TrieNode};
use crate::multi_trie::{self, MtrieBlock};
use crate::types::debug::{DebugCategory, DebugFlags};
use crate::types::errors::LpmError;
use crate::types::prefix::{LpmPrefix, LEVEL_MAX, MASKLEN_MAX};
use crate::types::stats::TableStats;

/// Table name limit in bytes, an implied terminator included.
const TABLE_NAME_LEN: usize = 32;
const TABLE_DEFAULT_NAME: &str = "Unknown";

//------------ LpmTable ------------------------------------------------------

/// A longest prefix match table over keys of up to 128 bits.
///
/// Prefixes map to payloads of an arbitrary clonable type `P`; the
/// caller stays responsible for what a payload means and for its
/// lifetime beyond the clones the table holds. Internally the table
/// keeps the inserted prefixes in a binary trie and derives a stride-8
/// multibit trie from it, so [`search`] costs at most sixteen entry
/// reads regardless of how many prefixes are stored.
///
/// All mutating methods take `&mut self`: one writer at a time, while
/// [`search`], [`find_exact`] and [`walk`] share the table freely.
///
/// [`search`]: Self::search
/// [`find_exact`]: Self::find_exact
/// [`walk`]: Self::walk
pub struct LpmTable<P> {
    name: String,
    btrie_root: Box<TrieNode<P>>,
    mtrie_root: Box<MtrieBlock<P>>,
    default_route: Option<DefaultRoute<P>>,
    debug: DebugFlags,
    stats: TableStats,
}

#[derive(Debug, Clone)]
struct DefaultRoute<P> {
    payload: P,
    prefix: LpmPrefix,
}

//------------ LookupResult --------------------------------------------------

/// What a [`LpmTable::search`] found: the effective payload, if any,
/// and whether it came from the default slot instead of a stored
/// prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupResult<'a, P> {
    pub payload: Option<&'a P>,
    pub used_default: bool,
}

impl<P> LpmTable<P> {
    /// Create an empty table. The root trie node and the level-0 block
    /// exist from here to the end of the table's life.
    ///
    /// The name is truncated to 31 bytes; an empty name turns into
    /// `"Unknown"`.
    pub fn new(name: &str) -> Self {
        let mut stats = TableStats::new(
            size_of::<TrieNode<P>>(),
            size_of::<MtrieBlock<P>>(),
        );
        let btrie_root = TrieNode::new_boxed(&mut stats);
        let mtrie_root = MtrieBlock::new_boxed(&mut stats);

        let mut name = if name.is_empty() {
            TABLE_DEFAULT_NAME.to_owned()
        } else {
            name.to_owned()
        };
        if name.len() >= TABLE_NAME_LEN {
            let mut end = TABLE_NAME_LEN - 1;
            while !name.is_char_boundary(end) {
                end -= 1;
            }
            name.truncate(end);
        }

        info!("created LPM table [{}]", name);

        LpmTable {
            name,
            btrie_root,
            mtrie_root,
            default_route: None,
            debug: DebugFlags::default(),
            stats,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &TableStats {
        &self.stats
    }

    /// Toggle a runtime diagnostics category for this table.
    pub fn set_debug(&mut self, category: DebugCategory, on: bool) {
        self.debug.set(category, on);
        if self.debug.logging() {
            debug!("[{}] debug {:?} set to {}", self.name, category, on);
        }
    }

    /// The payload stored for exactly this prefix, if any. Only the
    /// binary trie is consulted.
    pub fn find_exact(&self, prefix: &LpmPrefix) -> Option<&P> {
        if prefix.len() > MASKLEN_MAX {
            return None;
        }
        let prefix = prefix.truncate_to_len();
        bit_trie::find_node(&self.btrie_root, &prefix.addr(), prefix.len())
            .and_then(|node| node.payload.as_ref())
    }

    /// The datapath: follow the key one byte per level through the
    /// m-trie, remember the deepest non-empty payload passed, stop
    /// where no deeper block is linked. When nothing matched, the
    /// default payload is reported with `used_default` set, whether or
    /// not a default has been promoted.
    ///
    /// A stored zero-length prefix is not consulted here; it only
    /// answers searches after [`set_default_route`] promoted it.
    ///
    /// [`set_default_route`]: Self::set_default_route
    pub fn search<'a>(&'a self, addr: &[u8; LEVEL_MAX]) -> LookupResult<'a, P> {
        let mut payload = None;
        let mut block = Some(&*self.mtrie_root);
        let mut level = 0;
        while let Some(current) = block {
            let entry = &current.entries[addr[level] as usize];
            if entry.payload.is_some() {
                payload = entry.payload.as_ref();
            }
            block = entry.next.as_deref();
            level += 1;
        }

        match payload {
            Some(payload) => LookupResult {
                payload: Some(payload),
                used_default: false,
            },
            None => LookupResult {
                payload: self.default_route.as_ref().map(|d| &d.payload),
                used_default: true,
            },
        }
    }

    /// Visit every stored prefix in pre-order, then the default entry
    /// if one is set. `ControlFlow::Break` from the callback aborts the
    /// traversal and surfaces as [`LpmError::WalkAborted`].
    pub fn walk<F>(&self, mut op: F) -> Result<(), LpmError>
    where
        F: FnMut(LpmPrefix, &P) -> ControlFlow<()>,
    {
        bit_trie::walk(&self.btrie_root, &mut |addr, masklen, payload| {
            op(LpmPrefix::from_parts(*addr, masklen), payload)
        })?;

        if let Some(default) = &self.default_route {
            if op(default.prefix, &default.payload).is_break() {
                return Err(LpmError::WalkAborted);
            }
        }

        Ok(())
    }

    /// Drop the default route. The prefix it was copied from stays in
    /// the table.
    pub fn clear_default_route(&mut self) -> Result<(), LpmError> {
        if self.default_route.take().is_none() {
            if self.debug.normal() {
                debug!("[{}] no default route to clear", self.name);
            }
            return Err(LpmError::PrefixNotFound);
        }
        if self.debug.logging() {
            debug!("[{}] default route cleared", self.name);
        }
        Ok(())
    }
}

impl<P: Clone + PartialEq> LpmTable<P> {
    /// Add a prefix. More specific prefixes already stored keep their
    /// claim on the key space they cover.
    ///
    /// Adding a prefix that is present returns [`LpmError::AlreadyExists`]
    /// when the payload compares equal and [`LpmError::Conflict`]
    /// otherwise; neither changes the table. On allocation failure the
    /// table is rolled back to the state before the call and
    /// [`LpmError::AllocFailed`] is returned.
    pub fn insert(
        &mut self,
        prefix: &LpmPrefix,
        payload: P,
    ) -> Result<(), LpmError> {
        check_len(prefix.len())?;
        let masklen = prefix.len();
        let addr = prefix.truncate_to_len().addr();

        let added = bit_trie::add_path(
            &mut self.btrie_root,
            &addr,
            masklen,
            &mut self.stats,
            self.debug,
        )?;

        let node =
            bit_trie::find_node_mut(&mut self.btrie_root, &addr, masklen)
                .unwrap();
        if let Some(existing) = &node.payload {
            // an occupied node means the whole path pre-existed, so
            // there is no appended chain to undo
            if *existing == payload {
                if self.debug.normal() {
                    debug!("[{}] {} already stored", self.name, prefix);
                }
                return Err(LpmError::AlreadyExists);
            }
            if self.debug.normal() {
                debug!(
                    "[{}] {} stored with a different payload",
                    self.name, prefix
                );
            }
            return Err(LpmError::Conflict);
        }

        node.payload = Some(payload);
        self.stats.inc_payloads(masklen);

        // The zero route lives in the root node alone; the m-trie
        // never holds it.
        if masklen == 0 {
            if self.debug.logging() {
                debug!("[{}] added {}", self.name, prefix);
            }
            return Ok(());
        }

        let mut scratch = addr;
        let result = {
            let node =
                bit_trie::find_node(&self.btrie_root, &addr, masklen).unwrap();
            expansion::expand(
                &mut self.mtrie_root,
                node,
                &mut scratch,
                masklen - 1,
                node.payload.as_ref(),
                &mut self.stats,
                self.debug,
            )
        };

        if let Err(err) = result {
            if err != LpmError::AllocFailed {
                panic!("prefix expansion failed: {}", err);
            }
            // roll the authoritative trie back to the pre-call state
            let node =
                bit_trie::find_node_mut(&mut self.btrie_root, &addr, masklen)
                    .unwrap();
            node.payload = None;
            self.stats.dec_payloads(masklen);
            match added {
                Some(graft) => bit_trie::free_appended_chain(
                    &mut self.btrie_root,
                    &addr,
                    graft,
                    &mut self.stats,
                    self.debug,
                ),
                None => {
                    if self.debug.algorithm() {
                        debug!(
                            "[{}] b-trie path existed but the m-trie \
                            expansion ran out of blocks",
                            self.name
                        );
                    }
                }
            }
            return Err(err);
        }

        if self.debug.logging() {
            debug!("[{}] added {}", self.name, prefix);
        }
        Ok(())
    }

    /// Replace the payload of a stored prefix and re-derive its m-trie
    /// coverage. The prefix must have been inserted before.
    pub fn update(
        &mut self,
        prefix: &LpmPrefix,
        payload: P,
    ) -> Result<(), LpmError> {
        check_len(prefix.len())?;
        let masklen = prefix.len();
        let addr = prefix.truncate_to_len().addr();

        match bit_trie::find_node_mut(&mut self.btrie_root, &addr, masklen) {
            Some(node) if node.payload.is_some() => {
                node.payload = Some(payload);
            }
            _ => {
                if self.debug.normal() {
                    debug!("[{}] {} is not stored", self.name, prefix);
                }
                return Err(LpmError::PrefixNotFound);
            }
        }

        if masklen == 0 {
            if self.debug.logging() {
                debug!("[{}] updated {}", self.name, prefix);
            }
            return Ok(());
        }

        let mut scratch = addr;
        let node =
            bit_trie::find_node(&self.btrie_root, &addr, masklen).unwrap();
        expansion::expand(
            &mut self.mtrie_root,
            node,
            &mut scratch,
            masklen - 1,
            node.payload.as_ref(),
            &mut self.stats,
            self.debug,
        )?;

        if self.debug.logging() {
            debug!("[{}] updated {}", self.name, prefix);
        }
        Ok(())
    }

    /// Delete a stored prefix and hand its m-trie coverage back to the
    /// nearest less specific prefix, if any. Branches and blocks that
    /// no longer support a prefix are reclaimed.
    ///
    /// The default-route slot is a copy and is not touched: deleting
    /// the prefix it was promoted from leaves the copy in place until
    /// [`clear_default_route`]. Repaints already performed are not
    /// undone if the rest of the operation fails.
    ///
    /// [`clear_default_route`]: Self::clear_default_route
    pub fn remove(&mut self, prefix: &LpmPrefix) -> Result<(), LpmError> {
        check_len(prefix.len())?;
        let masklen = prefix.len();
        let addr = prefix.truncate_to_len().addr();

        if masklen == 0 {
            if self.btrie_root.payload.is_none() {
                if self.debug.normal() {
                    debug!("[{}] no zero route to delete", self.name);
                }
                return Err(LpmError::PrefixNotFound);
            }
            self.btrie_root.payload = None;
            self.stats.dec_payloads(0);
            if self.debug.logging() {
                debug!("[{}] deleted {}", self.name, prefix);
            }
            return Ok(());
        }

        deletion::remove(
            &mut self.btrie_root,
            &mut self.mtrie_root,
            &addr,
            masklen,
            &mut self.stats,
            self.debug,
        )?;

        if self.debug.logging() {
            debug!("[{}] deleted {}", self.name, prefix);
        }
        Ok(())
    }

    /// Copy the payload of a stored prefix into the default slot, along
    /// with the masked prefix itself. [`search`] falls back to this
    /// copy when no stored prefix matches.
    ///
    /// [`search`]: Self::search
    pub fn set_default_route(
        &mut self,
        prefix: &LpmPrefix,
    ) -> Result<(), LpmError> {
        check_len(prefix.len())?;
        let prefix = prefix.truncate_to_len();
        let payload = match self.find_exact(&prefix) {
            Some(payload) => payload.clone(),
            None => {
                if self.debug.normal() {
                    debug!(
                        "[{}] no stored payload to promote at {}",
                        self.name, prefix
                    );
                }
                return Err(LpmError::PrefixNotFound);
            }
        };
        self.default_route = Some(DefaultRoute { payload, prefix });
        if self.debug.logging() {
            debug!("[{}] default route set from {}", self.name, prefix);
        }
        Ok(())
    }
}

impl<P> Drop for LpmTable<P> {
    fn drop(&mut self) {
        // The counters must match a fresh count of what is actually
        // reachable, or frees went unaccounted somewhere.
        debug_assert_eq!(
            self.stats.node_count(),
            bit_trie::count_nodes(&self.btrie_root),
            "b-trie statistics diverge from the live tree"
        );
        debug_assert_eq!(
            self.stats.block_count(),
            multi_trie::count_blocks(&self.mtrie_root),
            "m-trie statistics diverge from the live tree"
        );
        info!("destroyed LPM table [{}]", self.name);
    }
}

impl<P> fmt::Display for LpmTable<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "LPM table [{}] statistics:", self.name)?;
        writeln!(f, "{}", self.stats)?;

        let total = self.stats.payload_count();
        for masklen in 0..=MASKLEN_MAX {
            let count = self.stats.payload_count_for_len(masklen);
            if count == 0 {
                continue;
            }
            let width = ((count as u64 * 100) / total as u64).clamp(1, 100);
            let bar = "*".repeat(width as usize);
            #[cfg(feature = "cli")]
            let bar = ansi_term::Colour::Green.paint(bar);
            writeln!(f, "\t  /{:<3} [{:>4}]: {}", masklen, count, bar)?;
        }
        Ok(())
    }
}

fn check_len(masklen: u8) -> Result<(), LpmError> {
    if masklen > MASKLEN_MAX {
        return Err(LpmError::PrefixLengthInvalid);
    }
    Ok(())
}
