//! The authoritative prefix store: a binary trie with one edge per key
//! bit. Every mutation lands here first; the stride-8 lookup trie is
//! derived from it afterwards.

use std::ops::ControlFlow;

use log::{debug, warn};

use crate::types::debug::DebugFlags;
use crate::types::errors::LpmError;
use crate::types::prefix::{
    bit_at, clear_bit, set_bit, LEVEL_MAX, RECURSION_DEPTH_WARN,
};
use crate::types::stats::TableStats;

//------------ TrieNode ------------------------------------------------------

/// One node of the binary trie. A node with a payload represents a
/// stored prefix whose bits spell the path from the root; the root
/// itself is the zero-length prefix.
#[derive(Debug)]
pub(crate) struct TrieNode<P> {
    pub payload: Option<P>,
    pub children: [Option<Box<TrieNode<P>>>; 2],
}

impl<P> TrieNode<P> {
    fn empty() -> Box<Self> {
        Box::new(TrieNode {
            payload: None,
            children: [None, None],
        })
    }

    /// Infallible allocation, for the root at table creation.
    pub(crate) fn new_boxed(stats: &mut TableStats) -> Box<Self> {
        stats.inc_nodes(1);
        Self::empty()
    }

    pub(crate) fn try_alloc(
        stats: &mut TableStats,
        flags: DebugFlags,
    ) -> Result<Box<Self>, LpmError> {
        if !stats.allow_alloc() {
            stats.note_node_failure();
            if flags.memory() {
                debug!("b-trie node alloc refused");
            }
            return Err(LpmError::AllocFailed);
        }
        stats.inc_nodes(1);
        Ok(Self::empty())
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.children[0].is_none() && self.children[1].is_none()
    }
}

//------------ Path operations -----------------------------------------------

/// Walk `masklen` bits of `addr`; `None` if any child on the way is
/// missing. A zero `masklen` returns the root.
pub(crate) fn find_node<'a, P>(
    root: &'a TrieNode<P>,
    addr: &[u8; LEVEL_MAX],
    masklen: u8,
) -> Option<&'a TrieNode<P>> {
    let mut node = root;
    for pos in 0..masklen {
        node = node.children[bit_at(addr, pos) as usize].as_deref()?;
    }
    Some(node)
}

pub(crate) fn find_node_mut<'a, P>(
    root: &'a mut TrieNode<P>,
    addr: &[u8; LEVEL_MAX],
    masklen: u8,
) -> Option<&'a mut TrieNode<P>> {
    let mut node = root;
    for pos in 0..masklen {
        node = node.children[bit_at(addr, pos) as usize].as_deref_mut()?;
    }
    Some(node)
}

/// Where a freshly appended chain hangs off the pre-existing path:
/// `child[bit]` of the node at `depth` is the first new node.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GraftPoint {
    pub depth: u8,
    pub bit: u8,
}

/// Walk `masklen` bits from the root, allocating missing children. The
/// appended part is always a linear chain. `None` means the whole path
/// was already present; `Some` carries the graft point of the appended
/// chain for a later rollback. If an allocation fails mid-path, the
/// nodes appended so far are detached and freed again before the error
/// is returned.
pub(crate) fn add_path<P>(
    root: &mut TrieNode<P>,
    addr: &[u8; LEVEL_MAX],
    masklen: u8,
    stats: &mut TableStats,
    flags: DebugFlags,
) -> Result<Option<GraftPoint>, LpmError> {
    let mut anchor = GraftPoint {
        depth: 0,
        bit: if masklen > 0 { bit_at(addr, 0) } else { 0 },
    };
    let mut created = false;
    let mut failed = false;

    let mut node = &mut *root;
    for pos in 0..masklen {
        let bit = bit_at(addr, pos) as usize;
        if node.children[bit].is_none() {
            match TrieNode::try_alloc(stats, flags) {
                Ok(fresh) => {
                    node.children[bit] = Some(fresh);
                    created = true;
                }
                Err(_) => {
                    failed = true;
                    break;
                }
            }
        } else {
            anchor.depth = pos + 1;
            if pos + 1 < masklen {
                anchor.bit = bit_at(addr, pos + 1);
            }
        }
        node = node.children[bit].as_deref_mut().unwrap();
    }

    if failed {
        if created {
            free_appended_chain(root, addr, anchor, stats, flags);
        }
        return Err(LpmError::AllocFailed);
    }

    Ok(if created { Some(anchor) } else { None })
}

/// Detach the chain appended at `graft` and free it. The chain must be
/// linear; a node with two children in it was never a pure appended
/// chain, which is a bug, not a recoverable state.
pub(crate) fn free_appended_chain<P>(
    root: &mut TrieNode<P>,
    addr: &[u8; LEVEL_MAX],
    graft: GraftPoint,
    stats: &mut TableStats,
    flags: DebugFlags,
) {
    let parent = find_node_mut(root, addr, graft.depth).unwrap();
    let mut next = parent.children[graft.bit as usize].take();
    let mut freed = 0;
    while let Some(mut node) = next {
        next = match (node.children[0].take(), node.children[1].take()) {
            (Some(_), Some(_)) => {
                panic!("appended b-trie nodes cannot have two children")
            }
            (Some(child), None) | (None, Some(child)) => Some(child),
            (None, None) => None,
        };
        freed += 1;
    }
    if flags.memory() {
        debug!("freed {} appended b-trie nodes", freed);
    }
    stats.dec_nodes(freed);
}

/// Free the subtree rooted at `node`, post-order, returning how many
/// nodes were dropped. The caller settles the statistics.
pub(crate) fn free_subtree<P>(node: Box<TrieNode<P>>) -> u32 {
    fn recurse<P>(mut node: Box<TrieNode<P>>, depth: u32) -> u32 {
        if depth > RECURSION_DEPTH_WARN {
            warn!("b-trie free recursion depth {}, past any valid path", depth);
        }
        let mut freed = 1;
        if let Some(child) = node.children[0].take() {
            freed += recurse(child, depth + 1);
        }
        if let Some(child) = node.children[1].take() {
            freed += recurse(child, depth + 1);
        }
        freed
    }
    recurse(node, 0)
}

pub(crate) fn count_nodes<P>(node: &TrieNode<P>) -> u32 {
    1 + node
        .children
        .iter()
        .flatten()
        .map(|child| count_nodes(child))
        .sum::<u32>()
}

//------------ Walk ----------------------------------------------------------

/// Pre-order walk over every payload-bearing node. The callback sees
/// the prefix bits accumulated in a single scratch address; bits past
/// the reported length are zero.
pub(crate) fn walk<P, F>(root: &TrieNode<P>, op: &mut F) -> Result<(), LpmError>
where
    F: FnMut(&[u8; LEVEL_MAX], u8, &P) -> ControlFlow<()>,
{
    let mut scratch = [0u8; LEVEL_MAX];
    walk_from(root, &mut scratch, 0, op, 0)
}

fn walk_from<P, F>(
    node: &TrieNode<P>,
    addr: &mut [u8; LEVEL_MAX],
    bitpos: u8,
    op: &mut F,
    depth: u32,
) -> Result<(), LpmError>
where
    F: FnMut(&[u8; LEVEL_MAX], u8, &P) -> ControlFlow<()>,
{
    if depth > RECURSION_DEPTH_WARN {
        warn!("b-trie walk recursion depth {}, past any valid path", depth);
    }

    if let Some(payload) = &node.payload {
        if op(addr, bitpos, payload).is_break() {
            return Err(LpmError::WalkAborted);
        }
    }

    if let Some(child) = &node.children[0] {
        clear_bit(addr, bitpos);
        walk_from(child, addr, bitpos + 1, op, depth + 1)?;
    }

    if let Some(child) = &node.children[1] {
        set_bit(addr, bitpos);
        let res = walk_from(child, addr, bitpos + 1, op, depth + 1);
        // The set bit would leak into the caller's next descent unless
        // it is cleared on the way out.
        clear_bit(addr, bitpos);
        res?;
    }

    Ok(())
}
