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

//! The traversal engine: one depth-first walk over objptr slots,
//! parameterized by a policy. Marking, unmarking, and relocation share the
//! same skeleton; only the per-edge behavior differs.
//!
//! The walk is edge-centric: a policy sees the *slot* holding a reference,
//! so a relocating policy can rewrite it in place before the walk follows
//! it. Recursion is an explicit work stack, so deep object chains cannot
//! overflow the native stack.

use heap::Heap;
use objectmodel;
use objectmodel::ObjectKind;
use objectmodel::ObjectType;
use objectmodel::OBJECT_HEADER_SIZE;
use objectmodel::WEAK_REFERENT_OFFSET;
use utils::Address;
use utils::ByteSize;
use utils::ObjectReference;
use weak;

const TRACE_TRACE: bool = false;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TraceMode {
    Mark,
    Unmark
}

/// transient state of one in-flight traversal; owned by the GC state so
/// statistics survive the walk, but only ever touched by one traversal at
/// a time (`active` guards against a second one starting)
pub struct MarkState {
    pub mode: TraceMode,
    /// accumulated header + payload bytes of objects first-visited in Mark
    pub size: ByteSize,
    /// objects first-visited by the current pass; Mark and Unmark over the
    /// same graph must agree on this count
    pub visited: usize,
    pub should_hash_cons: bool,
    pub should_link_weaks: bool,
    pub active: bool
}

impl MarkState {
    pub fn new() -> MarkState {
        MarkState {
            mode: TraceMode::Mark,
            size: 0,
            visited: 0,
            should_hash_cons: false,
            should_link_weaks: false,
            active: false
        }
    }
}

pub trait TracePolicy {
    /// processes the edge stored in `slot`. Returns the object whose fields
    /// the engine should scan when this edge led to a first visit, None on
    /// a revisit, a null edge, or an edge the policy does not follow.
    fn process_slot(&mut self, slot: Address) -> Option<ObjectReference>;

    /// whether the referent slot of a weak node is followed like a strong
    /// slot. Collecting traversals return false and leave the referent to
    /// the weak sweep.
    fn trace_weak_referent(&self) -> bool;
}

/// depth-first traversal from each slot in turn
pub fn trace_from_slots<P: TracePolicy>(policy: &mut P, types: &[ObjectType], slots: &[Address]) {
    let mut pending: Vec<ObjectReference> = vec![];

    for &slot in slots {
        if let Some(obj) = policy.process_slot(slot) {
            pending.push(obj);
            drain(policy, types, &mut pending);
        }
    }
}

fn drain<P: TracePolicy>(policy: &mut P, types: &[ObjectType], pending: &mut Vec<ObjectReference>) {
    while let Some(obj) = pending.pop() {
        let ty = &types[objectmodel::get_type_index(obj) as usize];
        trace_if!(
            TRACE_TRACE,
            "  scan {} ({:?}, {} bytes, {} refs)",
            obj,
            ty.kind,
            ty.size,
            ty.ref_offsets.len()
        );

        for &off in ty.ref_offsets.iter() {
            if ty.kind == ObjectKind::Weak && off == WEAK_REFERENT_OFFSET
                && !policy.trace_weak_referent()
            {
                continue;
            }
            if let Some(child) = policy.process_slot(obj.to_address() + off) {
                pending.push(child);
            }
        }
    }
}

/// mark/unmark policy backing `size`/`size_all` and the mark phase of the
/// in-place compactor
pub struct MarkTrace<'a> {
    pub state: &'a mut MarkState,
    pub types: &'a [ObjectType],
    /// ledger head, relinked during a collecting mark
    pub weaks: &'a mut ObjectReference
}

impl<'a> TracePolicy for MarkTrace<'a> {
    fn process_slot(&mut self, slot: Address) -> Option<ObjectReference> {
        let obj = unsafe { slot.load::<ObjectReference>() };
        if obj.is_null() {
            return None;
        }

        match self.state.mode {
            TraceMode::Mark => {
                if objectmodel::is_marked(obj) {
                    return None;
                }
                objectmodel::set_marked(obj, true);
                self.state.visited += 1;

                let ty = &self.types[objectmodel::get_type_index(obj) as usize];
                self.state.size += OBJECT_HEADER_SIZE + ty.size;

                if ty.kind == ObjectKind::Weak && self.state.should_link_weaks {
                    weak::link(self.weaks, obj);
                }
                Some(obj)
            }
            TraceMode::Unmark => {
                if !objectmodel::is_marked(obj) {
                    return None;
                }
                objectmodel::set_marked(obj, false);
                self.state.visited += 1;
                Some(obj)
            }
        }
    }

    fn trace_weak_referent(&self) -> bool {
        !self.state.should_link_weaks
    }
}

/// relocation policy: evacuates every reachable object inside
/// `[from_start, from_end)` into the target heap's old generation,
/// forwarding the old location and rewriting each slot before following it
pub struct CopyTrace<'a> {
    pub to_space: &'a mut Heap,
    pub from_start: Address,
    pub from_end: Address,
    pub types: &'a [ObjectType],
    /// rebuild the ledger with the new node locations (major collections)
    pub link_weaks: bool,
    pub weaks: &'a mut ObjectReference,
    pub copied_bytes: ByteSize,
    pub copied_objects: usize
}

impl<'a> CopyTrace<'a> {
    #[inline(always)]
    fn in_from_range(&self, addr: Address) -> bool {
        addr >= self.from_start && addr < self.from_end
    }

    fn evacuate(&mut self, obj: ObjectReference) -> ObjectReference {
        let ty = &self.types[objectmodel::get_type_index(obj) as usize];

        let new_payload = match self.to_space.try_promote_alloc(ty.size) {
            Some(addr) => addr,
            None => {
                // we are mid-relocation: part of the live set has already
                // moved, there is no safe rollback
                error!(
                    "target space exhausted while relocating {} ({} bytes)",
                    obj, ty.size
                );
                panic!("heap exhausted during relocation");
            }
        };

        unsafe {
            (new_payload - OBJECT_HEADER_SIZE).memcpy(
                obj.to_address() - OBJECT_HEADER_SIZE,
                OBJECT_HEADER_SIZE + ty.size
            );
        }
        let new_obj = unsafe { new_payload.to_object_reference() };
        objectmodel::set_forwarding(obj, new_obj);

        self.copied_bytes += OBJECT_HEADER_SIZE + ty.size;
        self.copied_objects += 1;

        if self.link_weaks && ty.kind == ObjectKind::Weak {
            weak::link(self.weaks, new_obj);
        }

        trace_if!(TRACE_TRACE, "  moved {} -> {}", obj, new_obj);
        new_obj
    }
}

impl<'a> TracePolicy for CopyTrace<'a> {
    fn process_slot(&mut self, slot: Address) -> Option<ObjectReference> {
        let obj = unsafe { slot.load::<ObjectReference>() };
        if obj.is_null() || !self.in_from_range(obj.to_address()) {
            return None;
        }

        if objectmodel::is_forwarded(obj) {
            let new_obj = objectmodel::get_forwarding(obj);
            unsafe { slot.store::<ObjectReference>(new_obj) };
            None
        } else {
            let new_obj = self.evacuate(obj);
            unsafe { slot.store::<ObjectReference>(new_obj) };
            Some(new_obj)
        }
    }

    fn trace_weak_referent(&self) -> bool {
        // minor collections keep weak referents alive one more generation;
        // major collections leave them to the sweep
        !self.link_weaks
    }
}
