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

//! Collection scheduling. The world is stopped whenever these entry points
//! run; the phase field exists to turn a re-entrant request (a bug in the
//! caller, e.g. allocation from inside a GC hook) into a loud failure
//! instead of heap corruption.
//!
//! A minor collection evacuates the nursery into the old generation. A
//! major collection copies the whole live set into a freshly mapped heap;
//! if the platform cannot provide one, it falls back to in-place
//! mark-compact. A minor collection that promotes more than the configured
//! threshold escalates to a major one.

use heap::cards::CardTable;
use heap::Heap;
use heap::HeapError;
use heap::HeapRemap;
use objectmodel;
use objectmodel::ObjectType;
use objectmodel::OBJECT_HEADER_SIZE;
use roots;
use state::Gc;
use utils::math;
use utils::Address;
use utils::ByteSize;
use utils::ObjectReference;
use weak;
use weak::WeakFate;

use std::cmp;
use std::mem;

use time;

pub mod compact;
pub mod trace;

use self::trace::CopyTrace;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    MinorCollecting,
    MajorCollecting
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CollectionKind {
    Minor,
    Major
}

/// walks the objects laid out back to back in `[start, end)`
pub fn walk_objects<F: FnMut(ObjectReference, &ObjectType)>(
    types: &[ObjectType],
    start: Address,
    end: Address,
    mut f: F
) {
    let mut cursor = start;
    while cursor < end {
        let obj = unsafe { (cursor + OBJECT_HEADER_SIZE).to_object_reference() };
        let ty = &types[objectmodel::get_type_index(obj) as usize];
        f(obj, ty);
        cursor = obj.to_address() + ty.size;
    }
    debug_assert_eq!(cursor, end);
}

impl Gc {
    pub fn collect(&mut self, kind: CollectionKind) {
        if self.phase != Phase::Idle {
            error!("collection requested while already {:?}", self.phase);
            panic!("re-entrant garbage collection");
        }

        let t_start = time::precise_time_ns();

        // a minor collection must be able to promote the whole nursery in
        // the worst case; run a major one instead when it cannot
        let kind = if kind == CollectionKind::Minor
            && self.heap.promotion_room() < self.heap.nursery_used()
        {
            debug!(
                "only {} bytes of promotion room for {} nursery bytes, going major",
                self.heap.promotion_room(),
                self.heap.nursery_used()
            );
            CollectionKind::Major
        } else {
            kind
        };

        match kind {
            CollectionKind::Minor => {
                self.phase = Phase::MinorCollecting;
                let promoted = self.collect_minor();
                self.stats.num_minor_gcs += 1;
                self.phase = Phase::Idle;

                if promoted > self.config.promotion_threshold {
                    debug!(
                        "promoted {} bytes > threshold {}, escalating to major",
                        promoted, self.config.promotion_threshold
                    );
                    self.phase = Phase::MajorCollecting;
                    self.collect_major();
                    self.phase = Phase::Idle;
                }
            }
            CollectionKind::Major => {
                self.phase = Phase::MajorCollecting;
                self.collect_major();
                self.phase = Phase::Idle;
            }
        }

        let pause = time::precise_time_ns() - t_start;
        self.stats.gc_time_ns += pause;
        info!("{:?} collection done in {} us", kind, pause / 1000);
    }

    /// evacuates live nursery objects into the old generation. Roots are the
    /// real root set plus the old-generation slots under dirty cards.
    /// Returns the number of bytes promoted.
    fn collect_minor(&mut self) -> ByteSize {
        debug!(
            "minor collection: nursery {} bytes used",
            self.heap.nursery_used()
        );

        let mut slots = roots::root_slots(self);
        slots.extend(roots::remembered_slots(self));

        let from_start = self.heap.nursery_start();
        let from_end = self.heap.frontier();

        let promoted;
        {
            let Gc {
                ref mut heap,
                ref types,
                ref mut weaks,
                ..
            } = *self;
            let mut policy = CopyTrace {
                to_space: heap,
                from_start,
                from_end,
                types,
                link_weaks: false,
                weaks,
                copied_bytes: 0,
                copied_objects: 0
            };
            trace::trace_from_slots(&mut policy, types, &slots);
            debug!(
                "promoted {} objects, {} bytes",
                policy.copied_objects, policy.copied_bytes
            );
            promoted = policy.copied_bytes;
        }

        // ledger nodes that stayed in the nursery are dead; promoted ones
        // moved. The old copies stay readable until reset_nursery below.
        weak::relink_after_minor(&mut self.weaks, |node| {
            let addr = node.to_address();
            if addr >= from_start && addr < from_end {
                if objectmodel::is_forwarded(node) {
                    Some(objectmodel::get_forwarding(node))
                } else {
                    None
                }
            } else {
                Some(node)
            }
        });

        self.heap.reset_nursery();
        self.cards.clear_all();
        self.heap.assert_invariant();

        promoted
    }

    fn collect_major(&mut self) {
        let copied = if self.config.use_mark_compact {
            None
        } else {
            self.major_copy()
        };
        let live = match copied {
            Some(live) => {
                self.stats.num_copying_gcs += 1;
                live
            }
            None => {
                let live = compact::collect_mark_compact(self);
                self.cards.clear_all();
                self.stats.num_markcompact_gcs += 1;
                live
            }
        };

        self.last_major.bytes_live = live;
        self.stats.max_bytes_live = cmp::max(self.stats.max_bytes_live, live);
        self.heap.assert_invariant();
    }

    /// copying major collection: evacuates the live set into a second heap
    /// and swaps it in. Returns None (leaving the heap untouched) when the
    /// second heap cannot be mapped, Some(live bytes) on success.
    fn major_copy(&mut self) -> Option<ByteSize> {
        // size the target so relocation cannot run out: everything currently
        // allocated might survive
        let worst_case =
            self.heap.old_gen_used() + self.heap.nursery_used() + self.heap.nursery_size();
        let new_size = cmp::max(self.heap.size(), math::align_up(worst_case, 4096));

        let mut to_space = match Heap::try_new(new_size, self.heap.nursery_size()) {
            Some(heap) => heap,
            None => {
                info!("cannot map a second heap, falling back to mark-compact");
                return None;
            }
        };

        debug!("major copying collection into fresh heap at {}", to_space.start());

        let slots = roots::root_slots(self);
        let from_start = self.heap.start();
        let from_end = self.heap.limit();

        // the ledger is rebuilt with the nodes' new locations as they are
        // evacuated
        self.weaks = ObjectReference::null();

        let live;
        {
            let Gc {
                ref types,
                ref mut weaks,
                ..
            } = *self;
            let mut policy = CopyTrace {
                to_space: &mut to_space,
                from_start,
                from_end,
                types,
                link_weaks: true,
                weaks,
                copied_bytes: 0,
                copied_objects: 0
            };
            trace::trace_from_slots(&mut policy, types, &slots);
            debug!(
                "copied {} objects, {} bytes",
                policy.copied_objects, policy.copied_bytes
            );
            live = policy.copied_bytes;
        }

        // referent slots still hold from-space addresses; the from-space
        // headers are readable until the old heap is dropped below
        weak::sweep(self.weaks, |referent| {
            if objectmodel::is_forwarded(referent) {
                WeakFate::Keep(objectmodel::get_forwarding(referent))
            } else {
                WeakFate::Clear
            }
        });

        let old_heap = mem::replace(&mut self.heap, to_space);
        drop(old_heap);

        self.cards = CardTable::new(self.heap.start(), self.heap.limit());

        Some(live)
    }

    /// moves the heap to a larger backing store and rewrites every objptr in
    /// the universe. A minor collection runs first if the nursery is not
    /// empty, since resize happens only at collection boundaries.
    pub fn grow_heap(&mut self, new_size: ByteSize) -> Result<(), HeapError> {
        if self.heap.nursery_used() > 0 {
            self.collect(CollectionKind::Minor);
        }
        let remap = self.heap.grow(new_size)?;
        self.after_remap(&remap);
        Ok(())
    }

    /// moves the heap to a smaller backing store. Fails without side effects
    /// if the live data plus the nursery window would not fit.
    pub fn shrink_heap(&mut self, new_size: ByteSize) -> Result<(), HeapError> {
        if self.heap.nursery_used() > 0 {
            self.collect(CollectionKind::Minor);
        }
        let remap = self.heap.shrink(new_size)?;
        self.after_remap(&remap);
        Ok(())
    }

    fn after_remap(&mut self, remap: &HeapRemap) {
        self.translate_all(remap);
        self.cards = CardTable::new(self.heap.start(), self.heap.limit());
        self.heap.assert_invariant();
    }

    /// rewrites every objptr after the backing store moved: root slots,
    /// objptr fields of old-generation objects, and the weak ledger words
    fn translate_all(&mut self, remap: &HeapRemap) {
        let translate = |obj: ObjectReference| -> ObjectReference {
            if !obj.is_null() && remap.covers(obj.to_address()) {
                unsafe { remap.translate(obj.to_address()).to_object_reference() }
            } else {
                obj
            }
        };

        for &slot in roots::root_slots(self).iter() {
            let obj = unsafe { slot.load::<ObjectReference>() };
            unsafe { slot.store::<ObjectReference>(translate(obj)) };
        }

        {
            let Gc {
                ref heap,
                ref types,
                ..
            } = *self;
            walk_objects(types, heap.start(), heap.old_frontier(), |obj, ty| {
                for &off in ty.ref_offsets.iter() {
                    let slot = obj.to_address() + off;
                    let v = unsafe { slot.load::<ObjectReference>() };
                    unsafe { slot.store::<ObjectReference>(translate(v)) };
                }
            });
        }

        // link words are not objptr fields, so the object walk above missed
        // them
        weak::translate_links(&mut self.weaks, &translate);
    }
}
