use std::ops::{Index, IndexMut};

/// Stable handle of a block record inside a [`BlockArena`].
///
/// Ids stay valid until the record is released; released slots are
/// recycled by later insertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BlockId(u32);

/// A half-open page range `[base, base + size)`.
///
/// `prev` and `next` chain blocks in ascending base order; they are
/// `None` only at the chain head and tail.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Block {
    pub base: u64,
    pub size: u64,
    pub used: bool,
    pub prev: Option<BlockId>,
    pub next: Option<BlockId>,
}

impl Block {
    #[inline]
    pub fn new(base: u64, size: u64, used: bool, prev: Option<BlockId>, next: Option<BlockId>) -> Self {
        Self {
            base,
            size,
            used,
            prev,
            next,
        }
    }
}

/// A slab of [`Block`] records addressed by [`BlockId`].
///
/// Index-based links instead of pointers keep the chain free of lifetime
/// concerns; indexing a released slot is a programming error and panics.
#[derive(Debug, Default)]
pub(crate) struct BlockArena {
    slots: Vec<Option<Block>>,
    vacant: Vec<u32>,
    live: usize,
}

impl BlockArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of live records.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn insert(&mut self, block: Block) -> BlockId {
        self.live += 1;

        match self.vacant.pop() {
            Some(slot) => {
                self.slots[slot as usize] = Some(block);

                BlockId(slot)
            }
            None => {
                self.slots.push(Some(block));

                BlockId((self.slots.len() - 1) as u32)
            }
        }
    }

    /// Releases the record, returning its final state. The id must not be
    /// used afterwards.
    pub fn remove(&mut self, id: BlockId) -> Block {
        let block = self.slots[id.0 as usize]
            .take()
            .unwrap_or_else(|| unreachable!("block slot already vacant"));

        self.vacant.push(id.0);
        self.live -= 1;

        block
    }
}

impl Index<BlockId> for BlockArena {
    type Output = Block;

    fn index(&self, id: BlockId) -> &Block {
        self.slots[id.0 as usize]
            .as_ref()
            .unwrap_or_else(|| unreachable!("block slot is vacant"))
    }
}

impl IndexMut<BlockId> for BlockArena {
    fn index_mut(&mut self, id: BlockId) -> &mut Block {
        self.slots[id.0 as usize]
            .as_mut()
            .unwrap_or_else(|| unreachable!("block slot is vacant"))
    }
}
