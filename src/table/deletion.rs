//! Deletion: take a prefix out of the binary trie, repaint the m-trie
//! coverage it vacates with the nearest less specific payload (or
//! nothing), then prune payload-free branches and reclaim the m-trie
//! blocks that become unreachable at stride boundaries.

use log::{debug, warn};

use crate::bit_trie::{self, TrieNode};
use crate::multi_trie::MtrieBlock;
use crate::table::expansion;
use crate::types::debug::DebugFlags;
use crate::types::errors::LpmError;
use crate::types::prefix::{bit_at, LEVEL_MAX, RECURSION_DEPTH_WARN};
use crate::types::stats::TableStats;

/// Delete `addr/masklen` from both tries. `masklen` is at least 1 and
/// `addr` is already masked; the zero-length prefix never reaches this
/// point.
pub(crate) fn remove<P: Clone>(
    btrie_root: &mut TrieNode<P>,
    mtrie_root: &mut MtrieBlock<P>,
    addr: &[u8; LEVEL_MAX],
    masklen: u8,
    stats: &mut TableStats,
    flags: DebugFlags,
) -> Result<(), LpmError> {
    // Find the target, remembering the deepest strict ancestor that
    // carries its own payload. Its coverage takes the vacated key space
    // back. The root is never recorded here; the zero route does not
    // take part in restoration.
    let mut restorer_depth: Option<u8> = None;
    {
        let mut node = &*btrie_root;
        for pos in 0..masklen {
            node = match node.children[bit_at(addr, pos) as usize].as_deref() {
                Some(next) => next,
                None => {
                    if flags.normal() {
                        debug!("no b-trie node for the deleted prefix");
                    }
                    return Err(LpmError::PrefixNotFound);
                }
            };
            if node.payload.is_some() && pos != masklen - 1 {
                restorer_depth = Some(pos + 1);
            }
        }
        if node.payload.is_none() {
            if flags.normal() {
                debug!("no payload on the deleted prefix");
            }
            return Err(LpmError::PrefixNotFound);
        }
    }

    // The authoritative store lets go of the payload first.
    let target = bit_trie::find_node_mut(btrie_root, addr, masklen).unwrap();
    let has_more_specifics = !target.is_leaf();
    target.payload = None;
    stats.dec_payloads(masklen);

    // Repaint the coverage the payload leaves behind.
    let bitpos = masklen - 1;
    let mut scratch = *addr;
    match restorer_depth {
        Some(depth) if (depth - 1) >> 3 == bitpos >> 3 => {
            // The restorer sits in the same block as the target:
            // re-expanding it overwrites the stale entries directly.
            let restorer = bit_trie::find_node(btrie_root, addr, depth).unwrap();
            expansion::expand(
                mtrie_root,
                restorer,
                &mut scratch,
                depth - 1,
                restorer.payload.as_ref(),
                stats,
                flags,
            )?;
        }
        Some(_) => {
            // The restorer answers from a shallower block; erasing the
            // target's own footprint is enough, lookups fall back to
            // the deepest non-empty entry they passed.
            let target = bit_trie::find_node(btrie_root, addr, masklen).unwrap();
            expansion::expand(
                mtrie_root,
                target,
                &mut scratch,
                bitpos,
                None,
                stats,
                flags,
            )?;
        }
        None if has_more_specifics => {
            // No restorer, but deeper prefixes exist: erase the
            // footprint, the more specifics keep answering through
            // their own blocks.
            let target = bit_trie::find_node(btrie_root, addr, masklen).unwrap();
            expansion::expand(
                mtrie_root,
                target,
                &mut scratch,
                bitpos,
                None,
                stats,
                flags,
            )?;
        }
        None => zero_out(mtrie_root, addr, masklen, flags)?,
    }

    // Prune branches that no longer hold any payload, and the m-trie
    // blocks that become unreachable with them.
    match restorer_depth {
        Some(depth) => {
            let restorer =
                bit_trie::find_node_mut(btrie_root, addr, depth).unwrap();
            prune(restorer, addr, depth, false, mtrie_root, stats, flags, 0);
        }
        None => {
            prune(btrie_root, addr, 0, true, mtrie_root, stats, flags, 0);
        }
    }

    Ok(())
}

/// Post-order check below `node`: a subtree is deletable iff it holds
/// no payload anywhere. Deletable children are freed here; the return
/// value tells the caller whether `node` itself may go. Whenever a
/// freed branch crosses a stride boundary, the m-trie block below that
/// boundary has lost its last supporting prefix and is unlinked.
#[allow(clippy::too_many_arguments)]
fn prune<P>(
    node: &mut TrieNode<P>,
    addr: &[u8; LEVEL_MAX],
    depth: u8,
    is_trie_root: bool,
    mtrie_root: &mut MtrieBlock<P>,
    stats: &mut TableStats,
    flags: DebugFlags,
    recursion: u32,
) -> bool {
    if recursion > RECURSION_DEPTH_WARN {
        warn!("prune recursion depth {}, past any valid path", recursion);
    }

    if node.is_leaf() {
        return node.payload.is_none();
    }

    for bit in 0..2 {
        if node.children[bit].is_some() {
            let child = node.children[bit].as_deref_mut().unwrap();
            if !prune(
                child,
                addr,
                depth + 1,
                false,
                mtrie_root,
                stats,
                flags,
                recursion + 1,
            ) {
                // a payload further down keeps this whole branch alive
                return false;
            }
            let subtree = node.children[bit].take().unwrap();
            let freed = bit_trie::free_subtree(subtree);
            if flags.memory() {
                debug!("pruned {} b-trie nodes", freed);
            }
            stats.dec_nodes(freed);
        }
    }

    if !is_trie_root {
        if depth != 0 && depth & 7 == 0 {
            unlink_block(mtrie_root, addr, depth, stats, flags);
        }
        return true;
    }

    false
}

/// A pruned branch crossed the stride boundary at `depth`: no prefix
/// longer than `depth` bits leads through this byte path anymore, so
/// the block below the boundary is unhooked and freed. An orphan that
/// still links deeper blocks means the two tries disagree, which is a
/// bug, not a recoverable state.
fn unlink_block<P>(
    mtrie_root: &mut MtrieBlock<P>,
    addr: &[u8; LEVEL_MAX],
    depth: u8,
    stats: &mut TableStats,
    flags: DebugFlags,
) {
    let parent_level = (depth >> 3) as usize - 1;

    let mut block = &mut *mtrie_root;
    for lvl in 0..parent_level {
        block = match block.entries[addr[lvl] as usize].next.as_deref_mut() {
            Some(next) => next,
            None => {
                if flags.algorithm() {
                    debug!("m-trie chain already gone at level {}", lvl);
                }
                return;
            }
        };
    }

    let entry = &mut block.entries[addr[parent_level] as usize];
    if let Some(orphan) = entry.next.take() {
        assert!(
            orphan.entries.iter().all(|e| e.next.is_none()),
            "unlinked m-trie block still links deeper blocks"
        );
        let freed = orphan.release();
        stats.dec_blocks(freed);
        if flags.memory() {
            debug!("unlinked m-trie block below level {}", parent_level);
        }
    }
}

/// Fast path for a prefix with neither a restorer above nor more
/// specifics below: walk straight down the key bytes, dropping the
/// en-route entry payloads so ancestors stop answering with stale
/// data, and erase the covered range in the final block.
fn zero_out<P: Clone>(
    mtrie_root: &mut MtrieBlock<P>,
    addr: &[u8; LEVEL_MAX],
    masklen: u8,
    flags: DebugFlags,
) -> Result<(), LpmError> {
    let mut block = &mut *mtrie_root;
    for level in 0..LEVEL_MAX {
        if masklen - (level as u8) * 8 <= 8 {
            block.write_pattern(addr[level], masklen - 1, None);
            return Ok(());
        }
        let entry = &mut block.entries[addr[level] as usize];
        entry.payload = None;
        block = match entry.next.as_deref_mut() {
            Some(next) => next,
            None => {
                if flags.algorithm() {
                    debug!("m-trie chain ends before the deleted prefix");
                }
                return Err(LpmError::Internal);
            }
        };
    }
    Ok(())
}
