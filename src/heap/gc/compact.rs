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

//! In-place mark-compact, the major collection used when a secondary heap
//! cannot be mapped. Classic sliding compaction:
//!
//! 1. mark from the roots (the shared traversal engine, weak linking on)
//! 2. assign each marked object its slide-left target address
//! 3. rewrite every strong slot (objects, roots) through the forward table
//! 4. sweep the weak ledger, then
//! 5. slide the marked objects down and clear their mark bits
//!
//! Nursery survivors compact into the old generation like everything else,
//! so the nursery is empty afterwards.

use heap::gc::trace;
use heap::gc::trace::MarkTrace;
use heap::gc::trace::TraceMode;
use heap::gc::walk_objects;
use objectmodel;
use objectmodel::ObjectKind;
use objectmodel::OBJECT_HEADER_SIZE;
use objectmodel::WEAK_REFERENT_OFFSET;
use roots;
use state::Gc;
use utils::Address;
use utils::ByteSize;
use utils::ObjectReference;
use weak;
use weak::WeakFate;

use std::collections::HashMap;

pub fn collect_mark_compact(gc: &mut Gc) -> ByteSize {
    debug!("major mark-compact collection");

    // 1. mark
    let root_slots = roots::root_slots(gc);
    gc.mark_state.mode = TraceMode::Mark;
    gc.mark_state.size = 0;
    gc.mark_state.visited = 0;
    gc.mark_state.should_link_weaks = true;
    gc.mark_state.should_hash_cons = gc.hash_cons_during_gc;
    gc.weaks = ObjectReference::null();
    {
        let Gc {
            ref mut mark_state,
            ref types,
            ref mut weaks,
            ..
        } = *gc;
        let mut policy = MarkTrace {
            state: mark_state,
            types,
            weaks
        };
        trace::trace_from_slots(&mut policy, types, &root_slots);
    }
    let live_bytes = gc.mark_state.size;
    debug!(
        "marked {} objects, {} live bytes",
        gc.mark_state.visited, live_bytes
    );

    if gc.mark_state.should_hash_cons {
        run_hash_cons_pass(gc);
    }

    // 2. forward addresses
    let regions = [
        (gc.heap.start(), gc.heap.old_frontier()),
        (gc.heap.nursery_start(), gc.heap.frontier())
    ];
    let mut forward: HashMap<ObjectReference, ObjectReference> = HashMap::new();
    let mut target = gc.heap.start();
    for &(start, end) in regions.iter() {
        walk_objects(&gc.types, start, end, |obj, ty| {
            if objectmodel::is_marked(obj) {
                let new_obj = unsafe { (target + OBJECT_HEADER_SIZE).to_object_reference() };
                forward.insert(obj, new_obj);
                target = target + OBJECT_HEADER_SIZE + ty.size;
            }
        });
    }
    let new_old_frontier = target;
    if new_old_frontier > gc.heap.nursery_start() {
        error!(
            "{} live bytes exceed the old generation capacity and the heap cannot grow",
            live_bytes
        );
        panic!("out of memory: live data exceeds compacted heap capacity");
    }

    // 3. fix strong slots
    for &(start, end) in regions.iter() {
        walk_objects(&gc.types, start, end, |obj, ty| {
            if !objectmodel::is_marked(obj) {
                return;
            }
            for &off in ty.ref_offsets.iter() {
                if ty.kind == ObjectKind::Weak && off == WEAK_REFERENT_OFFSET {
                    continue;
                }
                let slot = obj.to_address() + off;
                forward_slot(&forward, slot);
            }
        });
    }
    for &slot in root_slots.iter() {
        forward_slot(&forward, slot);
    }

    // 4. weak sweep, old node addresses still valid
    let old_nodes = weak::nodes(gc.weaks);
    weak::sweep(gc.weaks, |referent| {
        if objectmodel::is_marked(referent) {
            WeakFate::Keep(forward[&referent])
        } else {
            WeakFate::Clear
        }
    });

    // 5. slide and unmark
    for &(start, end) in regions.iter() {
        walk_objects(&gc.types, start, end, |obj, ty| {
            if !objectmodel::is_marked(obj) {
                return;
            }
            objectmodel::set_marked(obj, false);
            let new_obj = forward[&obj];
            if new_obj != obj {
                unsafe {
                    (new_obj.to_address() - OBJECT_HEADER_SIZE).memmove(
                        obj.to_address() - OBJECT_HEADER_SIZE,
                        OBJECT_HEADER_SIZE + ty.size
                    );
                }
            }
        });
    }

    // the ledger nodes moved: relink at their final locations
    gc.weaks = ObjectReference::null();
    for &node in old_nodes.iter().rev() {
        weak::link(&mut gc.weaks, forward[&node]);
    }

    gc.heap.old_frontier = new_old_frontier;
    gc.heap.reset_nursery();
    gc.mark_state.should_link_weaks = false;
    gc.mark_state.should_hash_cons = false;

    live_bytes
}

#[inline(always)]
fn forward_slot(forward: &HashMap<ObjectReference, ObjectReference>, slot: Address) {
    let obj = unsafe { slot.load::<ObjectReference>() };
    if obj.is_null() {
        return;
    }
    debug_assert!(
        objectmodel::is_marked(obj),
        "strong slot {} holds unmarked object {}",
        slot,
        obj
    );
    unsafe { slot.store::<ObjectReference>(forward[&obj]) };
}

/// offers every live object to the installed hash conser. Sharing is
/// advisory until a dedup-capable conser is installed: the shipped default
/// never proposes one.
fn run_hash_cons_pass(gc: &mut Gc) {
    let mut candidates = 0usize;
    let regions = [
        (gc.heap.start(), gc.heap.old_frontier()),
        (gc.heap.nursery_start(), gc.heap.frontier())
    ];
    let Gc {
        ref types,
        ref mut hash_conser,
        ..
    } = *gc;
    for &(start, end) in regions.iter() {
        walk_objects(types, start, end, |obj, ty| {
            if objectmodel::is_marked(obj) && hash_conser.try_share(obj, ty).is_some() {
                candidates += 1;
            }
        });
    }
    debug!("hash cons pass: {} candidate shares", candidates);
}
