// Copyright 2017 The Australian National University
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Card marking for the generational write barrier: a byte per 256-byte
//! card of the heap, set whenever the mutator stores a pointer into the old
//! generation, consumed and cleared by minor collections.

use utils::mem::malloc_zero;
use utils::mem::free;
use utils::Address;
use utils::ByteSize;

use std::mem;

pub const LOG_BYTES_IN_CARD: usize = 8;
pub const BYTES_IN_CARD: ByteSize = 1 << LOG_BYTES_IN_CARD;

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CardMark {
    Clean = 0,
    Dirty = 1
}

pub struct CardTable {
    start: Address,
    ptr: *mut CardMark,
    len: usize
}

impl CardTable {
    pub fn new(start: Address, end: Address) -> CardTable {
        debug_assert!(start.is_aligned_to(BYTES_IN_CARD));
        let len = (end - start + BYTES_IN_CARD - 1) >> LOG_BYTES_IN_CARD;
        let ptr = unsafe { malloc_zero(mem::size_of::<CardMark>() * len) } as *mut CardMark;

        CardTable { start, ptr, len }
    }

    #[inline(always)]
    fn index_of(&self, addr: Address) -> usize {
        debug_assert!(addr >= self.start);
        (addr - self.start) >> LOG_BYTES_IN_CARD
    }

    #[inline(always)]
    fn get(&self, index: usize) -> CardMark {
        debug_assert!(index < self.len);
        unsafe { *self.ptr.offset(index as isize) }
    }

    #[inline(always)]
    fn set(&mut self, index: usize, value: CardMark) {
        debug_assert!(index < self.len);
        unsafe { *self.ptr.offset(index as isize) = value };
    }

    /// the write barrier: dirties the card containing `addr`
    #[inline(always)]
    pub fn mark_card(&mut self, addr: Address) {
        let index = self.index_of(addr);
        self.set(index, CardMark::Dirty);
    }

    #[inline(always)]
    pub fn is_dirty(&self, addr: Address) -> bool {
        self.get(self.index_of(addr)) == CardMark::Dirty
    }

    /// true iff any card overlapping `[start, end)` is dirty
    pub fn range_is_dirty(&self, start: Address, end: Address) -> bool {
        debug_assert!(end > start);
        let first = self.index_of(start);
        let last = self.index_of(end - 1);
        (first..last + 1).any(|i| self.get(i) == CardMark::Dirty)
    }

    /// maximal dirty card runs as half-open address ranges, low to high
    pub fn dirty_ranges(&self) -> Vec<(Address, Address)> {
        let mut ret = vec![];
        let mut run_start = None;

        for i in 0..self.len {
            match (self.get(i), run_start) {
                (CardMark::Dirty, None) => run_start = Some(i),
                (CardMark::Clean, Some(s)) => {
                    ret.push((self.card_to_address(s), self.card_to_address(i)));
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = run_start {
            ret.push((self.card_to_address(s), self.card_to_address(self.len)));
        }

        ret
    }

    fn card_to_address(&self, index: usize) -> Address {
        self.start + (index << LOG_BYTES_IN_CARD)
    }

    /// forgets all dirty bits; called only after the minor collection that
    /// scanned them, or when the whole heap was just collected
    pub fn clear_all(&mut self) {
        for i in 0..self.len {
            self.set(i, CardMark::Clean);
        }
    }
}

impl Drop for CardTable {
    fn drop(&mut self) {
        unsafe { free(self.ptr as *mut u8) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CardTable {
        let base = Address::from_usize(0x10000);
        CardTable::new(base, base + 16 * BYTES_IN_CARD)
    }

    #[test]
    fn test_mark_and_query() {
        let mut t = table();
        let base = Address::from_usize(0x10000);

        assert!(!t.is_dirty(base));
        t.mark_card(base + 5usize);
        assert!(t.is_dirty(base));
        assert!(t.is_dirty(base + 255usize));
        assert!(!t.is_dirty(base + 256usize));
    }

    #[test]
    fn test_dirty_ranges_merge_runs() {
        let mut t = table();
        let base = Address::from_usize(0x10000);

        t.mark_card(base);
        t.mark_card(base + BYTES_IN_CARD);
        t.mark_card(base + 5 * BYTES_IN_CARD);

        let ranges = t.dirty_ranges();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0], (base, base + 2 * BYTES_IN_CARD));
        assert_eq!(ranges[1], (base + 5 * BYTES_IN_CARD, base + 6 * BYTES_IN_CARD));
    }

    #[test]
    fn test_clear_all() {
        let mut t = table();
        let base = Address::from_usize(0x10000);

        t.mark_card(base + 3 * BYTES_IN_CARD);
        t.clear_all();
        assert!(t.dirty_ranges().is_empty());
    }
}
