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

//! Root-set enumeration. Roots are *slots* (addresses holding an objptr),
//! not values: a relocating traversal rewrites them in place.
//!
//! Enumeration order is fixed for reproducibility: the global pointer table
//! in index order, then the stack frame by frame from `stack_top` down,
//! then the thread handoff slots.

use objectmodel;
use state::Gc;
use utils::Address;
use utils::ByteSize;
use utils::Word;
use utils::WORD_SIZE;

/// one row of the frame-info table: how big a frame is and where its live
/// objptr slots sit, both relative to the frame base. The word at the top
/// of every frame is the return address; live offsets never overlap it.
#[derive(Clone, Debug)]
pub struct FrameInfo {
    pub frame_size: ByteSize,
    pub live_offsets: Vec<ByteSize>
}

impl FrameInfo {
    pub fn validate(&self, max_frame_size: ByteSize) -> Result<(), String> {
        if self.frame_size % WORD_SIZE != 0 || self.frame_size < WORD_SIZE {
            return Err(format!("frame size {} not a positive word multiple", self.frame_size));
        }
        if self.frame_size > max_frame_size {
            return Err(format!(
                "frame size {} exceeds max frame size {}",
                self.frame_size, max_frame_size
            ));
        }
        for &off in self.live_offsets.iter() {
            if off % WORD_SIZE != 0 || off + WORD_SIZE > self.frame_size - WORD_SIZE {
                return Err(format!("live offset {} overlaps return address word", off));
            }
        }
        Ok(())
    }
}

/// resolves a return address to a frame-info index. Failure to resolve is a
/// corrupted stack or a codegen/metadata mismatch, and is fatal at the call
/// sites.
pub type FrameResolver = Box<Fn(Word) -> Option<usize> + Send>;

pub fn resolve_frame_index(gc: &Gc, return_address: Word) -> usize {
    match (gc.resolve_frame)(return_address) {
        Some(idx) if idx < gc.frame_infos.len() => idx,
        Some(idx) => {
            error!(
                "return address 0x{:x} resolved to frame index {} out of {}",
                return_address,
                idx,
                gc.frame_infos.len()
            );
            panic!("frame index out of bounds: corrupted frame metadata");
        }
        None => {
            error!("cannot resolve return address 0x{:x} to a frame", return_address);
            panic!("unresolved return address: corrupted stack or stale frame table");
        }
    }
}

/// walks the stack `[stack_bottom, stack_top)` frame by frame, most recent
/// first, yielding every live objptr slot
pub fn for_each_stack_slot<F: FnMut(Address)>(gc: &Gc, f: &mut F) {
    let mut top = gc.stack_top;

    while top > gc.stack_bottom {
        let return_address = unsafe { (top - WORD_SIZE).load::<Word>() };
        let index = resolve_frame_index(gc, return_address);
        let info = &gc.frame_infos[index];
        let base = top - info.frame_size;

        trace!(
            "  frame {} at {}: {} bytes, {} live slots",
            index,
            base,
            info.frame_size,
            info.live_offsets.len()
        );

        for &off in info.live_offsets.iter() {
            f(base + off);
        }
        top = base;
    }
    debug_assert_eq!(top, gc.stack_bottom);
}

/// the global pointer table plus the thread handoff slots: the roots a
/// whole-universe query (`size_all`) starts from
pub fn global_slots(gc: &Gc) -> Vec<Address> {
    let mut slots = Vec::with_capacity(gc.globals.len() + 4);
    for slot in gc.globals.iter() {
        slots.push(Address::from_ptr(slot as *const _));
    }
    gc.push_handoff_slots(&mut slots);
    slots
}

/// the full root set, in enumeration order
pub fn root_slots(gc: &Gc) -> Vec<Address> {
    let mut slots = Vec::with_capacity(gc.globals.len() + 16);
    for slot in gc.globals.iter() {
        slots.push(Address::from_ptr(slot as *const _));
    }
    for_each_stack_slot(gc, &mut |slot| slots.push(slot));
    gc.push_handoff_slots(&mut slots);

    trace!("root set: {} slots", slots.len());
    slots
}

/// old-generation slots covered by dirty cards: the pseudo-roots a minor
/// collection scans instead of the whole old generation
pub fn remembered_slots(gc: &Gc) -> Vec<Address> {
    let mut slots = vec![];
    let mut scanned = 0usize;

    let mut cursor = gc.heap.start();
    let old_frontier = gc.heap.old_frontier();
    while cursor < old_frontier {
        let obj = unsafe { (cursor + objectmodel::OBJECT_HEADER_SIZE).to_object_reference() };
        let ty = &gc.types[objectmodel::get_type_index(obj) as usize];
        let end = obj.to_address() + ty.size;

        if !ty.ref_offsets.is_empty() && gc.cards.range_is_dirty(cursor, end) {
            scanned += 1;
            // weak referent slots are scanned strongly here: weak semantics
            // are applied by major collections only
            for &off in ty.ref_offsets.iter() {
                slots.push(obj.to_address() + off);
            }
        }
        cursor = end;
    }

    trace!(
        "remembered set: {} slots from {} dirty objects",
        slots.len(),
        scanned
    );
    slots
}
