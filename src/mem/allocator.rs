use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::hash::BuildHasherDefault;

use log::debug;
use thiserror::Error;
use zwohash::ZwoHasher;

use crate::mem::block::{Block, BlockArena, BlockId};
use crate::utils::math::{ceil_log2, ceil_pow2};
use crate::INV;

type UsedMap = HashMap<u64, BlockId, BuildHasherDefault<ZwoHasher>>;

/// Construction parameter out of range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidArgument {
    #[error("total pages must be > 0 and < {INV} (got {pages})")]
    TotalPages { pages: u64 },
    #[error("min block size must be > 0 and <= total pages (got {min_block_size} of {pages})")]
    MinBlockSize { min_block_size: u64, pages: u64 },
}

/// Tracks ownership of the pages `0..N` as a chain of disjoint blocks,
/// each either free or used.
///
/// Free blocks are indexed by power-of-two segregation classes; within a
/// class the free list is sorted ascending by size, so the first block
/// large enough is also the best fit of that class. Used blocks are
/// indexed by their base page, which doubles as the caller's handle.
///
/// Failed operations leave the allocator untouched: [`create_block`]
/// signals failure with [`INV`], the other mutators with `false`.
/// Internal inconsistencies are programming errors and panic.
///
/// [`create_block`]: Self::create_block
pub struct PageAllocator {
    pages: u64,
    min_block_size: u64,

    arena: BlockArena,
    // upper size bound per segregation class, doubling; the top one is
    // promoted to u64::MAX so every size has a home
    class_sizes: Vec<u64>,
    free_lists: Vec<Vec<BlockId>>,
    used_map: UsedMap,

    free_blocks: u64,
    used_blocks: u64,
    free_pages: u64,
    used_pages: u64,
}

impl PageAllocator {
    /// Creates an allocator over `pages` pages with a minimum block size
    /// of `min_block_size`. The entire page space starts as one large
    /// free block.
    pub fn new(pages: u64, min_block_size: u64) -> Result<Self, InvalidArgument> {
        if pages == 0 || pages == INV {
            return Err(InvalidArgument::TotalPages { pages });
        }
        if min_block_size == 0 || min_block_size > pages {
            return Err(InvalidArgument::MinBlockSize {
                min_block_size,
                pages,
            });
        }

        let num_classes = (ceil_log2(pages) - ceil_log2(min_block_size) + 2) as usize;
        let mut class_sizes = Vec::with_capacity(num_classes);
        let mut cur_size = ceil_pow2(min_block_size);
        for _ in 0..num_classes {
            class_sizes.push(cur_size);
            cur_size = cur_size.saturating_mul(2);
        }
        class_sizes[num_classes - 1] = u64::MAX;

        let mut this = Self {
            pages,
            min_block_size,
            arena: BlockArena::new(),
            class_sizes,
            free_lists: vec![Vec::new(); num_classes],
            used_map: UsedMap::default(),
            free_blocks: 1,
            used_blocks: 0,
            free_pages: pages,
            used_pages: 0,
        };

        let initial = this.arena.insert(Block::new(0, pages, false, None, None));
        this.link_free_block(initial);

        Ok(this)
    }

    /// Allocates a block of at least `pages` pages (requests below the
    /// minimum block size round up silently) and returns its base page,
    /// or [`INV`] if the request is zero or cannot be satisfied.
    pub fn create_block(&mut self, pages: u64) -> u64 {
        // the caller is asking for nothing
        if pages == 0 {
            return INV;
        }

        let pages = pages.max(self.min_block_size);

        // scan each qualifying class in order; the lists are sorted
        // ascending, so the first block large enough is the best fit of
        // its class
        let mut found = None;
        'classes: for list_index in self.free_list_index(pages)..self.free_lists.len() {
            for (pos, &id) in self.free_lists[list_index].iter().enumerate() {
                debug_assert!(!self.arena[id].used);

                if self.arena[id].size >= pages {
                    found = Some((list_index, pos, id));
                    break 'classes;
                }
            }
        }

        let (list_index, pos, id) = match found {
            Some(found) => found,
            None => return INV,
        };
        self.free_lists[list_index].remove(pos);

        let size = self.arena[id].size;
        self.free_blocks -= 1;
        self.used_blocks += 1;
        self.free_pages -= size;
        self.used_pages += size;

        let base = self.arena[id].base;
        self.arena[id].used = true;
        let evicted = self.used_map.insert(base, id);
        assert!(evicted.is_none());

        // no free neighbor can appear here, so no coalescing
        self.split_block(id, pages, false);

        base
    }

    /// Frees an allocated block, coalescing it with free neighbors.
    /// Returns false if `block` is not the base of a used block.
    pub fn free_block(&mut self, block: u64) -> bool {
        if block == INV {
            return false;
        }
        let id = match self.used_map.remove(&block) {
            Some(id) => id,
            None => return false,
        };
        self.arena[id].used = false;

        let size = self.arena[id].size;
        self.free_blocks += 1;
        self.used_blocks -= 1;
        self.free_pages += size;
        self.used_pages -= size;

        self.coalesce_backward(id);
        self.coalesce_forward(id);

        self.link_free_block(id);

        true
    }

    /// Shrinks an allocated block to `pages` total pages, returning the
    /// tail to free space when it is at least the minimum block size.
    ///
    /// Shrinking to zero frees the block. Returns false if `block` is
    /// not a used block or `pages` exceeds its current size.
    pub fn shrink_block(&mut self, block: u64, pages: u64) -> bool {
        if block == INV {
            return false;
        }
        let id = match self.used_map.get(&block) {
            Some(&id) => id,
            None => return false,
        };
        let size = self.arena[id].size;

        if pages > size {
            // growing is not this operation's job
            return false;
        }
        if pages == size {
            return true;
        }
        if pages == 0 {
            return self.free_block(block);
        }

        // the freed tail may touch a free block forward in the chain
        self.split_block(id, pages, true);

        true
    }

    /// Grows an allocated block to at least `pages` total pages by
    /// consuming the forward chain neighbor's free space. The base page
    /// never moves - no migration is performed.
    ///
    /// A block already large enough succeeds as-is; callers wanting an
    /// exact size must chain [`shrink_block`](Self::shrink_block).
    /// Returns false if `block` is not a used block, or the forward
    /// neighbor is missing, used, or too small.
    pub fn grow_block(&mut self, block: u64, pages: u64) -> bool {
        if block == INV {
            return false;
        }
        let id = match self.used_map.get(&block) {
            Some(&id) => id,
            None => return false,
        };
        let size = self.arena[id].size;

        if pages <= size {
            // the caller might already hold more than they asked for
            return true;
        }

        let next_id = match self.arena[id].next {
            Some(next_id) => next_id,
            None => return false,
        };
        let next = &self.arena[next_id];
        if next.used || size + next.size < pages {
            // consuming the next block won't work
            return false;
        }

        // the absorbed pages change category before the merge
        self.free_pages -= next.size;
        self.used_pages += next.size;

        let merged = self.coalesce_forward(id);
        assert!(merged);
        assert!(self.arena[id].size >= pages);

        // the forward neighbor was just consumed, no coalescing
        self.split_block(id, pages, false);

        true
    }

    /// The total number of blocks, free and used.
    pub fn total_blocks(&self) -> u64 {
        self.free_blocks + self.used_blocks
    }

    pub fn free_blocks(&self) -> u64 {
        self.free_blocks
    }

    pub fn used_blocks(&self) -> u64 {
        self.used_blocks
    }

    /// The total number of pages, equal to the construction-time count.
    pub fn total_pages(&self) -> u64 {
        self.pages
    }

    pub fn free_pages(&self) -> u64 {
        self.free_pages
    }

    pub fn used_pages(&self) -> u64 {
        self.used_pages
    }

    /// Asserts the consistency of the chain, the used map, the free
    /// lists and the counters; with `print` set, dumps the state through
    /// `log::debug!` along the way. Panics on any violation.
    pub fn verify(&self, print: bool) {
        // find any block and rewind to the chain head
        let mut cursor = self
            .used_map
            .values()
            .next()
            .copied()
            .or_else(|| self.free_lists.iter().find_map(|list| list.first().copied()))
            .unwrap_or_else(|| unreachable!("at least one block always exists"));

        while let Some(prev) = self.arena[cursor].prev {
            cursor = prev;
        }

        if print {
            debug!("blocks in page order:");
        }

        // scan all blocks forward: contiguity, coverage, eager coalescing
        let mut forward = Vec::new();
        let mut chain_free_blocks = 0u64;
        let mut expected_base = 0u64;
        let mut prev_was_free = false;
        let mut walker = Some(cursor);
        while let Some(id) = walker {
            let block = &self.arena[id];
            if print {
                debug!(
                    "id={:?} base={} size={} used={} prev={:?} next={:?}",
                    id, block.base, block.size, block.used, block.prev, block.next
                );
            }

            assert_eq!(block.base, expected_base, "chain has a gap or an overlap");
            assert!(block.size > 0);
            if block.used {
                assert_eq!(self.used_map.get(&block.base), Some(&id));
            } else {
                assert!(!prev_was_free, "two adjacent free blocks");
                chain_free_blocks += 1;
            }

            prev_was_free = !block.used;
            expected_base += block.size;
            forward.push(id);
            walker = block.next;
        }
        assert_eq!(expected_base, self.pages, "chain does not cover all pages");
        assert_eq!(forward.len() as u64, self.total_blocks());
        assert_eq!(forward.len(), self.arena.len());
        assert_eq!(self.used_map.len() as u64, self.used_blocks);

        // scan all blocks backward, verifying identity with the forward pass
        let mut backward = forward.clone();
        let mut walker = forward.last().copied();
        while let Some(id) = walker {
            assert_eq!(backward.pop(), Some(id));
            walker = self.arena[id].prev;
        }
        assert!(backward.is_empty());

        // free lists: class membership and the ascending order
        if print {
            debug!("free lists:");
        }
        let mut listed_free_blocks = 0u64;
        let mut listed_free_pages = 0u64;
        for (list_index, list) in self.free_lists.iter().enumerate() {
            let class_size = self.class_sizes[list_index];
            if print {
                debug!("list_index={} class_size={}", list_index, class_size);
            }

            let mut prev_size = 0u64;
            for &id in list {
                let block = &self.arena[id];
                if print {
                    debug!("id={:?} base={} size={}", id, block.base, block.size);
                }

                assert!(!block.used);
                assert!(block.size <= class_size);
                assert_eq!(self.free_list_index(block.size), list_index);
                assert!(prev_size <= block.size, "free list not sorted by size");

                prev_size = block.size;
                listed_free_blocks += 1;
                listed_free_pages += block.size;
            }
        }
        assert_eq!(chain_free_blocks, listed_free_blocks);
        assert_eq!(listed_free_pages, self.free_pages);
        assert_eq!(self.free_pages + self.used_pages, self.pages);
    }

    /// Splits the tail beyond `pages` off the used block into a new free
    /// block, unless the leftover would be below the minimum block size
    /// (then the block silently keeps its whole range). With `coalesce`
    /// set, the new tail is merged with a free forward neighbor.
    fn split_block(&mut self, id: BlockId, pages: u64, coalesce: bool) {
        let block = self.arena[id];
        assert!(block.size >= pages);

        let leftover = block.size - pages;
        if leftover < self.min_block_size {
            return;
        }

        let tail_id = self.arena.insert(Block::new(
            block.base + pages,
            leftover,
            false,
            Some(id),
            block.next,
        ));
        self.arena[id].size = pages;
        self.arena[id].next = Some(tail_id);
        if let Some(after) = block.next {
            self.arena[after].prev = Some(tail_id);
        }

        self.free_blocks += 1;
        self.free_pages += leftover;
        self.used_pages -= leftover;

        // forward only
        if coalesce {
            self.coalesce_forward(tail_id);
        }

        self.link_free_block(tail_id);
    }

    /// Absorbs a free forward neighbor into the block, keeping the
    /// block's base. Page counters are untouched - the pages stay in
    /// their category.
    fn coalesce_forward(&mut self, id: BlockId) -> bool {
        let next_id = match self.arena[id].next {
            Some(next_id) => next_id,
            None => return false,
        };
        if self.arena[next_id].used {
            return false;
        }

        self.unlink_free_block(next_id);

        let next = self.arena.remove(next_id);
        let block = &mut self.arena[id];
        block.size += next.size;
        block.next = next.next;
        if let Some(after) = next.next {
            self.arena[after].prev = Some(id);
        }

        self.free_blocks -= 1;

        true
    }

    /// Absorbs a free backward neighbor; the block takes over the
    /// neighbor's base.
    fn coalesce_backward(&mut self, id: BlockId) -> bool {
        let prev_id = match self.arena[id].prev {
            Some(prev_id) => prev_id,
            None => return false,
        };
        if self.arena[prev_id].used {
            return false;
        }

        self.unlink_free_block(prev_id);

        let prev = self.arena.remove(prev_id);
        let block = &mut self.arena[id];
        block.base = prev.base;
        block.size += prev.size;
        block.prev = prev.prev;
        if let Some(before) = prev.prev {
            self.arena[before].next = Some(id);
        }

        self.free_blocks -= 1;

        true
    }

    /// The smallest class whose upper bound covers `pages`.
    fn free_list_index(&self, pages: u64) -> usize {
        self.class_sizes
            .iter()
            .position(|&class_size| pages <= class_size)
            .unwrap_or_else(|| unreachable!("the top class accepts any size"))
    }

    /// Inserts a free block into its class, keeping the list ascending
    /// by size; a tie goes before the peer.
    fn link_free_block(&mut self, id: BlockId) {
        let size = self.arena[id].size;
        let list_index = self.free_list_index(size);

        let list = &self.free_lists[list_index];
        let pos = list
            .iter()
            .position(|&other| size <= self.arena[other].size)
            .unwrap_or(list.len());

        self.free_lists[list_index].insert(pos, id);
    }

    fn unlink_free_block(&mut self, id: BlockId) {
        let list_index = self.free_list_index(self.arena[id].size);

        let list = &mut self.free_lists[list_index];
        let pos = list
            .iter()
            .position(|&other| other == id)
            .unwrap_or_else(|| unreachable!("free block missing from its size class"));
        list.remove(pos);
    }
}

impl Debug for PageAllocator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut d = f.debug_struct("PageAllocator");

        d.field("total_pages", &self.pages)
            .field("min_block_size", &self.min_block_size)
            .field("free_blocks", &self.free_blocks)
            .field("used_blocks", &self.used_blocks)
            .field("free_pages", &self.free_pages)
            .field("used_pages", &self.used_pages);

        for (list_index, list) in self.free_lists.iter().enumerate() {
            let mut class = vec![];

            if list.is_empty() {
                class.push(String::from("EMPTY"));
            } else {
                for &id in list {
                    let block = &self.arena[id];
                    class.push(format!("[{}; {})", block.base, block.base + block.size));
                }
            }

            d.field(
                format!("up to {}", self.class_sizes[list_index]).as_str(),
                &class,
            );
        }

        d.finish()
    }
}
