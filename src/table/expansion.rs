//! Controlled prefix expansion. A prefix shorter than a stride multiple
//! is replicated into every m-trie entry of the stride-aligned range it
//! covers, except sub-ranges already claimed by a more specific prefix
//! in the binary trie.

use log::{debug, warn};

use crate::bit_trie::TrieNode;
use crate::multi_trie::MtrieBlock;
use crate::types::debug::DebugFlags;
use crate::types::errors::LpmError;
use crate::types::prefix::{
    clear_bit, is_boundary, set_bit, LEVEL_MAX, RECURSION_DEPTH_WARN,
};
use crate::types::stats::TableStats;

/// What happens to the key bit after `bitpos` in a terminal write: kept
/// as it is in the scratch address, or forced to one side because the
/// matching binary-trie child is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextBit {
    Keep,
    Zero,
    One,
}

/// Write `payload` into every m-trie entry covered by the prefix whose
/// last bit sits at `bitpos`, skipping ranges that the binary trie
/// shows to be owned by a more specific prefix below `node`. `payload`
/// may be `None` to erase the coverage.
///
/// `addr` is a scratch copy of the prefix address; the recursion flips
/// bits on descent and restores them on the way back, so the caller
/// sees it unchanged.
pub(crate) fn expand<P: Clone>(
    mtrie: &mut MtrieBlock<P>,
    node: &TrieNode<P>,
    addr: &mut [u8; LEVEL_MAX],
    bitpos: u8,
    payload: Option<&P>,
    stats: &mut TableStats,
    flags: DebugFlags,
) -> Result<(), LpmError> {
    expand_from(mtrie, node, addr, bitpos, payload, stats, flags, 0)
}

#[allow(clippy::too_many_arguments)]
fn expand_from<P: Clone>(
    mtrie: &mut MtrieBlock<P>,
    node: &TrieNode<P>,
    addr: &mut [u8; LEVEL_MAX],
    bitpos: u8,
    payload: Option<&P>,
    stats: &mut TableStats,
    flags: DebugFlags,
    depth: u32,
) -> Result<(), LpmError> {
    if depth > RECURSION_DEPTH_WARN {
        warn!("expansion recursion depth {}, past any valid path", depth);
    }

    // A boundary bit pins a single entry, and a leaf owns its whole
    // range: one write covers either case.
    if is_boundary(bitpos) || node.is_leaf() {
        return write_combinations(
            mtrie,
            addr,
            bitpos,
            payload,
            NextBit::Keep,
            stats,
            flags,
        );
    }

    match node.children[0].as_deref() {
        Some(child) if child.payload.is_none() => {
            clear_bit(addr, bitpos + 1);
            expand_from(
                mtrie,
                child,
                addr,
                bitpos + 1,
                payload,
                stats,
                flags,
                depth + 1,
            )?;
        }
        Some(_) => {
            // a more specific prefix owns the zero half outright
        }
        None => {
            write_combinations(
                mtrie,
                addr,
                bitpos,
                payload,
                NextBit::Zero,
                stats,
                flags,
            )?;
        }
    }

    match node.children[1].as_deref() {
        Some(child) if child.payload.is_none() => {
            set_bit(addr, bitpos + 1);
            let res = expand_from(
                mtrie,
                child,
                addr,
                bitpos + 1,
                payload,
                stats,
                flags,
                depth + 1,
            );
            clear_bit(addr, bitpos + 1);
            res?;
        }
        Some(_) => {
            // a more specific prefix owns the one half outright
        }
        None => {
            write_combinations(
                mtrie,
                addr,
                bitpos,
                payload,
                NextBit::One,
                stats,
                flags,
            )?;
        }
    }

    Ok(())
}

/// One terminal write: reach the block that holds the covered range and
/// stamp the pattern, with the bit after `bitpos` forced for an
/// absent-child half.
fn write_combinations<P: Clone>(
    mtrie: &mut MtrieBlock<P>,
    addr: &[u8; LEVEL_MAX],
    bitpos: u8,
    payload: Option<&P>,
    next_bit: NextBit,
    stats: &mut TableStats,
    flags: DebugFlags,
) -> Result<(), LpmError> {
    let level = (bitpos >> 3) as usize;
    let block = reach_level(mtrie, addr, level, stats, flags)?;

    let idx = addr[level];
    match next_bit {
        NextBit::Keep => block.write_pattern(idx, bitpos, payload),
        NextBit::Zero => {
            debug_assert!(!is_boundary(bitpos));
            block.write_pattern(
                idx & !(1 << (7 - ((bitpos + 1) & 7))),
                bitpos + 1,
                payload,
            );
        }
        NextBit::One => {
            debug_assert!(!is_boundary(bitpos));
            block.write_pattern(
                idx | 1 << (7 - ((bitpos + 1) & 7)),
                bitpos + 1,
                payload,
            );
        }
    }

    Ok(())
}

/// Return the block at `level` along the bytes of `addr`, building any
/// missing tail of the chain. New blocks are linked among themselves
/// first and hooked into the reachable trie with a single assignment,
/// from the bottom up: a failed allocation only ever drops blocks that
/// were never reachable, and a concurrent-reader model never observes a
/// partially initialised chain.
fn reach_level<'a, P>(
    mtrie: &'a mut MtrieBlock<P>,
    addr: &[u8; LEVEL_MAX],
    level: usize,
    stats: &mut TableStats,
    flags: DebugFlags,
) -> Result<&'a mut MtrieBlock<P>, LpmError> {
    // deepest level already linked on this byte path
    let mut have = 0;
    {
        let mut block = &*mtrie;
        while have < level {
            match block.entries[addr[have] as usize].next.as_deref() {
                Some(next) => {
                    block = next;
                    have += 1;
                }
                None => break,
            }
        }
    }

    if have < level {
        let mut chain: Option<Box<MtrieBlock<P>>> = None;
        for lvl in (have + 1..=level).rev() {
            let mut block = match MtrieBlock::try_alloc(stats, flags) {
                Ok(block) => block,
                Err(err) => {
                    if let Some(partial) = chain.take() {
                        let freed = partial.release();
                        stats.dec_blocks(freed);
                        if flags.memory() {
                            debug!("freed {} unhooked m-trie blocks", freed);
                        }
                    }
                    return Err(err);
                }
            };
            block.entries[addr[lvl] as usize].next = chain.take();
            chain = Some(block);
        }

        let mut block = &mut *mtrie;
        for lvl in 0..have {
            block =
                block.entries[addr[lvl] as usize].next.as_deref_mut().unwrap();
        }
        block.entries[addr[have] as usize].next = chain;
    }

    let mut block = &mut *mtrie;
    for lvl in 0..level {
        block = block.entries[addr[lvl] as usize].next.as_deref_mut().unwrap();
    }
    Ok(block)
}
