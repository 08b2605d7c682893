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

//! The heap: one contiguous mmap'd byte range. The old generation grows
//! upward from `start`; the nursery is the fixed window at the top of the
//! range and is where the mutator bump-allocates.
//!
//! ```text
//! start          old_frontier        nursery_start   frontier     limit
//!   |  old generation  |   (free)         |  nursery live |  free  |
//! ```
//!
//! The heap never collects or grows on its own: `try_alloc` returning None
//! is the control signal the scheduler consumes.

use objectmodel::OBJECT_HEADER_SIZE;
use utils::mem;
use utils::Address;
use utils::ByteSize;

pub mod cards;
pub mod gc;

pub const DEFAULT_HEAP_SIZE: ByteSize = 512 << 20;
/// share of the heap reserved for the nursery window
pub const DEFAULT_NURSERY_RATIO: f64 = 0.25;

#[derive(Debug, PartialEq, Eq)]
pub enum HeapError {
    /// the platform could not provide the requested range; the heap is
    /// unchanged
    OutOfAddressSpace(ByteSize),
    /// requested size cannot hold the live data plus the nursery window
    TooSmall(ByteSize)
}

/// address translation for a heap whose backing store moved: callers use it
/// to rewrite every objptr after grow/shrink
pub struct HeapRemap {
    pub old_start: Address,
    pub old_end: Address,
    pub new_start: Address
}

impl HeapRemap {
    #[inline(always)]
    pub fn covers(&self, addr: Address) -> bool {
        addr >= self.old_start && addr < self.old_end
    }

    #[inline(always)]
    pub fn translate(&self, addr: Address) -> Address {
        debug_assert!(self.covers(addr));
        self.new_start + (addr - self.old_start)
    }
}

#[repr(C)]
pub struct Heap {
    // frontier and limit first: compiled allocation sequences address them
    // by constant offsets published below
    frontier: Address,
    limit: Address,
    start: Address,
    size: ByteSize,
    old_frontier: Address,
    nursery_start: Address,
    nursery_size: ByteSize
}

lazy_static! {
    pub static ref FRONTIER_OFFSET: usize = offset_of!(Heap => frontier).get_byte_offset();
    pub static ref LIMIT_OFFSET: usize = offset_of!(Heap => limit).get_byte_offset();
}

impl Heap {
    pub fn new(size: ByteSize, nursery_size: ByteSize) -> Heap {
        match Heap::try_new(size, nursery_size) {
            Some(heap) => heap,
            None => panic!("failed to mmap {} bytes of heap", size)
        }
    }

    pub fn try_new(size: ByteSize, nursery_size: ByteSize) -> Option<Heap> {
        assert!(nursery_size < size, "nursery {} must fit in heap {}", nursery_size, size);

        let start = match mem::try_mmap_large(size) {
            Some(addr) => addr,
            None => return None
        };
        let limit = start + size;
        let nursery_start = limit - nursery_size;

        debug!(
            "heap: [{} .. {}), {} bytes, nursery at {}",
            start, limit, size, nursery_start
        );

        Some(Heap {
            frontier: nursery_start,
            limit,
            start,
            size,
            old_frontier: start,
            nursery_start,
            nursery_size
        })
    }

    #[inline(always)]
    pub fn start(&self) -> Address {
        self.start
    }
    #[inline(always)]
    pub fn limit(&self) -> Address {
        self.limit
    }
    #[inline(always)]
    pub fn size(&self) -> ByteSize {
        self.size
    }
    #[inline(always)]
    pub fn frontier(&self) -> Address {
        self.frontier
    }
    #[inline(always)]
    pub fn old_frontier(&self) -> Address {
        self.old_frontier
    }
    #[inline(always)]
    pub fn nursery_start(&self) -> Address {
        self.nursery_start
    }
    #[inline(always)]
    pub fn nursery_size(&self) -> ByteSize {
        self.nursery_size
    }

    #[inline(always)]
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.limit
    }

    #[inline(always)]
    pub fn in_nursery(&self, addr: Address) -> bool {
        addr >= self.nursery_start && addr < self.limit
    }

    #[inline(always)]
    pub fn in_old_gen(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.old_frontier
    }

    pub fn nursery_used(&self) -> ByteSize {
        self.frontier - self.nursery_start
    }

    pub fn old_gen_used(&self) -> ByteSize {
        self.old_frontier - self.start
    }

    /// free room between the old generation and the nursery window, i.e.
    /// how much a minor collection could promote
    pub fn promotion_room(&self) -> ByteSize {
        self.nursery_start - self.old_frontier
    }

    /// bump-allocates header + payload in the nursery. Returns the payload
    /// address, or None when the allocation would cross `limit`.
    #[inline(always)]
    pub fn try_alloc(&mut self, payload: ByteSize) -> Option<Address> {
        debug_assert!(payload % OBJECT_HEADER_SIZE == 0);

        let obj_start = self.frontier;
        let end = obj_start + OBJECT_HEADER_SIZE + payload;
        if end > self.limit {
            None
        } else {
            self.frontier = end;
            Some(obj_start + OBJECT_HEADER_SIZE)
        }
    }

    /// bump-allocates header + payload in the old generation, bounded by
    /// the nursery window. Used for promotion and for objects too large for
    /// the nursery.
    #[inline(always)]
    pub fn try_promote_alloc(&mut self, payload: ByteSize) -> Option<Address> {
        debug_assert!(payload % OBJECT_HEADER_SIZE == 0);

        let obj_start = self.old_frontier;
        let end = obj_start + OBJECT_HEADER_SIZE + payload;
        if end > self.nursery_start {
            None
        } else {
            self.old_frontier = end;
            Some(obj_start + OBJECT_HEADER_SIZE)
        }
    }

    /// empties the nursery; only a completed minor or major collection may
    /// do this
    pub fn reset_nursery(&mut self) {
        self.frontier = self.nursery_start;
    }

    /// moves the heap to a larger backing store, preserving the old
    /// generation. The nursery must be empty (resize happens at collection
    /// boundaries). On failure the heap is untouched; on success the caller
    /// must rewrite every objptr through the returned remap.
    pub fn grow(&mut self, new_size: ByteSize) -> Result<HeapRemap, HeapError> {
        assert!(new_size > self.size);
        self.remap(new_size)
    }

    /// moves the heap to a smaller backing store. Same contract as `grow`.
    pub fn shrink(&mut self, new_size: ByteSize) -> Result<HeapRemap, HeapError> {
        assert!(new_size < self.size);
        if self.old_gen_used() + self.nursery_size >= new_size {
            return Err(HeapError::TooSmall(new_size));
        }
        self.remap(new_size)
    }

    fn remap(&mut self, new_size: ByteSize) -> Result<HeapRemap, HeapError> {
        assert_eq!(
            self.frontier, self.nursery_start,
            "heap resize with a non-empty nursery"
        );

        let new_start = match mem::try_mmap_large(new_size) {
            Some(addr) => addr,
            None => return Err(HeapError::OutOfAddressSpace(new_size))
        };

        let live = self.old_gen_used();
        unsafe {
            new_start.memcpy(self.start, live);
        }
        mem::munmap(self.start, self.size);

        let remap = HeapRemap {
            old_start: self.start,
            old_end: self.old_frontier,
            new_start
        };

        info!(
            "heap remapped: {} -> {} bytes at {}",
            self.size, new_size, new_start
        );

        self.start = new_start;
        self.size = new_size;
        self.limit = new_start + new_size;
        self.old_frontier = new_start + live;
        self.nursery_start = self.limit - self.nursery_size;
        self.frontier = self.nursery_start;

        Ok(remap)
    }

    /// start ≤ old_frontier ≤ nursery_start ≤ frontier ≤ limit = start + size
    pub fn assert_invariant(&self) {
        assert!(self.start <= self.old_frontier);
        assert!(self.old_frontier <= self.nursery_start);
        assert!(self.nursery_start <= self.frontier);
        assert!(self.frontier <= self.limit);
        assert_eq!(self.limit, self.start + self.size);
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        mem::munmap(self.start, self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_alloc() {
        let mut heap = Heap::new(1 << 20, 1 << 16);
        heap.assert_invariant();

        let a = heap.try_alloc(24).unwrap();
        let b = heap.try_alloc(24).unwrap();
        assert_eq!(b - a, 32);
        assert!(heap.in_nursery(a));
        assert_eq!(heap.nursery_used(), 64);
        heap.assert_invariant();
    }

    #[test]
    fn test_alloc_respects_limit() {
        let mut heap = Heap::new(1 << 20, 1 << 12);

        let mut n = 0;
        while heap.try_alloc(56).is_some() {
            n += 1;
        }
        // 4096 / 64 objects fit exactly
        assert_eq!(n, 64);
        heap.assert_invariant();
    }

    #[test]
    fn test_promote_alloc() {
        let mut heap = Heap::new(1 << 20, 1 << 16);

        let p = heap.try_promote_alloc(24).unwrap();
        assert!(heap.in_old_gen(p));
        assert_eq!(heap.old_gen_used(), 32);
    }

    #[test]
    fn test_grow_preserves_old_gen() {
        let mut heap = Heap::new(1 << 20, 1 << 16);

        let p = heap.try_promote_alloc(24).unwrap();
        unsafe { p.store::<u64>(0xfeed) };

        let remap = heap.grow(2 << 20).unwrap();
        heap.assert_invariant();
        assert_eq!(heap.size(), 2 << 20);

        let moved = remap.translate(p);
        assert!(heap.in_old_gen(moved));
        assert_eq!(unsafe { moved.load::<u64>() }, 0xfeed);
    }

    #[test]
    fn test_shrink_rejects_too_small() {
        let mut heap = Heap::new(1 << 20, 1 << 16);
        for _ in 0..100 {
            heap.try_promote_alloc(56).unwrap();
        }
        match heap.shrink(1 << 16) {
            Err(HeapError::TooSmall(_)) => {}
            other => panic!("expected TooSmall, got {:?}", other.is_ok())
        }
    }
}
