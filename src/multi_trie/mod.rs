//! The derived lookup trie: 256-way blocks, one per consumed key byte.
//! Readers only ever touch this structure; its contents are recomputed
//! from the binary trie on every mutation.

use log::{debug, warn};

use crate::types::debug::DebugFlags;
use crate::types::errors::LpmError;
use crate::types::prefix::{is_boundary, RECURSION_DEPTH_WARN, STRIDE};
use crate::types::stats::TableStats;

/// Entries per block, the full fan-out of one stride.
pub(crate) const BLOCK_ENTRIES: usize = 1 << STRIDE;

//------------ MtrieBlock ----------------------------------------------------

/// One lookup entry. `payload` is the effective answer for keys that
/// stop here; a non-empty `next` continues the lookup into the block
/// for the following key byte, where a deeper override may live.
#[derive(Debug)]
pub(crate) struct MtrieEntry<P> {
    pub payload: Option<P>,
    pub next: Option<Box<MtrieBlock<P>>>,
}

/// The 256 entries of one stride level along one byte path.
#[derive(Debug)]
pub(crate) struct MtrieBlock<P> {
    pub entries: [MtrieEntry<P>; BLOCK_ENTRIES],
}

impl<P> MtrieBlock<P> {
    fn empty() -> Box<Self> {
        Box::new(MtrieBlock {
            entries: std::array::from_fn(|_| MtrieEntry {
                payload: None,
                next: None,
            }),
        })
    }

    /// Infallible allocation, for the level-0 block at table creation.
    pub(crate) fn new_boxed(stats: &mut TableStats) -> Box<Self> {
        stats.inc_blocks(1);
        Self::empty()
    }

    pub(crate) fn try_alloc(
        stats: &mut TableStats,
        flags: DebugFlags,
    ) -> Result<Box<Self>, LpmError> {
        if !stats.allow_alloc() {
            stats.note_block_failure();
            if flags.memory() {
                debug!("m-trie block alloc refused");
            }
            return Err(LpmError::AllocFailed);
        }
        stats.inc_blocks(1);
        Ok(Self::empty())
    }

    /// Overwrite the payload of every entry covered by a prefix ending
    /// at `bitpos` around index `idx`. A boundary position covers `idx`
    /// alone; otherwise the unused low index bits fan out to a
    /// power-of-two range. `None` erases.
    pub(crate) fn write_pattern(
        &mut self,
        idx: u8,
        bitpos: u8,
        payload: Option<&P>,
    ) where
        P: Clone,
    {
        let mask: u8 = if is_boundary(bitpos) {
            0xFF
        } else {
            let used = (bitpos + 1) % 8;
            !((1u8 << (8 - used)) - 1)
        };
        let lo = (idx & mask) as usize;
        let hi = (idx | !mask) as usize;
        for entry in &mut self.entries[lo..=hi] {
            entry.payload = payload.cloned();
        }
    }

    /// Drop this block and every block below it, post-order, returning
    /// the number of blocks freed. The caller settles the statistics.
    pub(crate) fn release(self: Box<Self>) -> u32 {
        fn recurse<P>(mut block: Box<MtrieBlock<P>>, depth: u32) -> u32 {
            if depth > RECURSION_DEPTH_WARN {
                warn!(
                    "m-trie free recursion depth {}, past any valid path",
                    depth
                );
            }
            let mut freed = 1;
            for entry in block.entries.iter_mut() {
                if let Some(child) = entry.next.take() {
                    freed += recurse(child, depth + 1);
                }
            }
            freed
        }
        recurse(self, 0)
    }
}

pub(crate) fn count_blocks<P>(block: &MtrieBlock<P>) -> u32 {
    1 + block
        .entries
        .iter()
        .filter_map(|entry| entry.next.as_deref())
        .map(count_blocks)
        .sum::<u32>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads(block: &MtrieBlock<u32>) -> Vec<(usize, u32)> {
        block
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.payload.map(|p| (i, p)))
            .collect()
    }

    #[test]
    fn boundary_pattern_is_single_entry() {
        let mut stats = TableStats::new(1, 1);
        let mut block = MtrieBlock::new_boxed(&mut stats);
        block.write_pattern(10, 7, Some(&7));
        assert_eq!(payloads(&block), vec![(10, 7)]);
        block.write_pattern(10, 15, Some(&8));
        assert_eq!(payloads(&block), vec![(10, 8)]);
    }

    #[test]
    fn short_pattern_fans_out() {
        let mut stats = TableStats::new(1, 1);
        let mut block = MtrieBlock::new_boxed(&mut stats);

        // two significant bits: 10xx_xxxx covers 128..=191
        block.write_pattern(128, 1, Some(&1));
        let hits = payloads(&block);
        assert_eq!(hits.len(), 64);
        assert_eq!(hits.first(), Some(&(128, 1)));
        assert_eq!(hits.last(), Some(&(191, 1)));

        // host bits in the index do not widen the range
        let mut other = MtrieBlock::new_boxed(&mut stats);
        other.write_pattern(0b1011_0101, 1, Some(&2));
        assert_eq!(payloads(&other), hits.iter().map(|(i, _)| (*i, 2)).collect::<Vec<_>>());
    }

    #[test]
    fn pattern_erases_with_none() {
        let mut stats = TableStats::new(1, 1);
        let mut block = MtrieBlock::<u32>::new_boxed(&mut stats);
        block.write_pattern(64, 2, Some(&1)); // 010x_xxxx: 64..=95
        block.write_pattern(64, 3, None); // 0100_xxxx: 64..=79
        let hits = payloads(&block);
        assert_eq!(hits.len(), 16);
        assert_eq!(hits.first(), Some(&(80, 1)));
        assert_eq!(hits.last(), Some(&(95, 1)));
    }

    #[test]
    fn release_counts_the_sub_dag() {
        let mut stats = TableStats::new(1, 1);
        let mut top = MtrieBlock::<u32>::new_boxed(&mut stats);
        let mut mid = MtrieBlock::<u32>::try_alloc(
            &mut stats,
            DebugFlags::default(),
        )
        .unwrap();
        let bottom = MtrieBlock::<u32>::try_alloc(
            &mut stats,
            DebugFlags::default(),
        )
        .unwrap();
        mid.entries[3].next = Some(bottom);
        top.entries[200].next = Some(mid);

        assert_eq!(count_blocks(&top), 3);
        let freed = top.release();
        assert_eq!(freed, 3);
        stats.dec_blocks(freed);
        assert_eq!(stats.block_count(), 0);
    }
}
