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

extern crate gc;
extern crate utils;

use gc::objectmodel::ObjectType;
use gc::roots::FrameInfo;
use gc::state::Gc;
use gc::state::GcConfig;
use gc::state::RuntimeTables;
use utils::Word;

const TY_PAIR: u32 = 0;
const TY_LEAF: u32 = 1;
const TY_WEAK: u32 = 2;

const RA_MAIN: Word = 0xbeef0;

const HEAP_SIZE: usize = 4 << 20;
const NURSERY_SIZE: usize = 256 << 10;
const STACK_SIZE: usize = 64 << 10;

pub fn config() -> GcConfig {
    GcConfig {
        heap_size: HEAP_SIZE,
        nursery_size: NURSERY_SIZE,
        stack_size: STACK_SIZE,
        promotion_threshold: NURSERY_SIZE / 2,
        growth_factor: 2.0,
        use_mark_compact: false
    }
}

pub fn tables() -> RuntimeTables {
    RuntimeTables {
        object_types: vec![
            ObjectType::new(16, vec![0, 8]),
            ObjectType::new_noref(24),
            ObjectType::new_weak()
        ],
        frame_infos: vec![FrameInfo {
            frame_size: 32,
            live_offsets: vec![0, 8]
        }],
        resolve_frame: Box::new(|ra| if ra == RA_MAIN { Some(0) } else { None }),
        max_frame_size: 256,
        num_globals: 8
    }
}

pub fn setup(config: GcConfig) -> Gc {
    gc::start_logging_trace();
    Gc::new(config, tables()).unwrap()
}

#[test]
fn test_alloc_is_zeroed_and_typed() {
    let mut gc = setup(config());

    let pair = gc.alloc(TY_PAIR);
    assert!(gc.object_load_ref(pair, 0).is_null());
    assert!(gc.object_load_ref(pair, 8).is_null());

    let leaf = gc.alloc(TY_LEAF);
    assert_eq!(gc.object_load_word(leaf, 0), 0);
    gc.object_store_word(leaf, 0, 0xdead);
    assert_eq!(gc.object_load_word(leaf, 0), 0xdead);
}

#[test]
fn test_bytes_allocated_accumulates() {
    let mut gc = setup(config());

    gc.alloc(TY_LEAF);
    gc.alloc(TY_LEAF);
    // 24 bytes payload + 8 bytes header each
    assert_eq!(gc.cumulative_statistics().bytes_allocated, 64);
}

#[test]
fn test_stack_push_store_pop() {
    let mut gc = setup(config());

    gc.push_frame(RA_MAIN);
    let obj = gc.alloc(TY_LEAF);
    gc.store_stack_slot(0, obj);
    assert_eq!(gc.load_stack_slot(0), obj);
    assert!(gc.load_stack_slot(8).is_null());

    gc.push_frame(RA_MAIN);
    // the new frame is zeroed, not inheriting the caller's slots
    assert!(gc.load_stack_slot(0).is_null());
    gc.pop_frame();

    assert_eq!(gc.load_stack_slot(0), obj);
    gc.pop_frame();
    assert_eq!(gc.stack_top, gc.stack_bottom);
}

#[test]
#[should_panic(expected = "shadow stack overflow")]
fn test_stack_overflow_is_fatal() {
    let mut gc = setup(config());
    loop {
        gc.push_frame(RA_MAIN);
    }
}

#[test]
#[should_panic(expected = "unresolved return address")]
fn test_unresolvable_return_address_is_fatal() {
    let mut gc = setup(config());
    gc.push_frame(0xbad);
}

#[test]
fn test_thread_handoff_slots() {
    let mut gc = setup(config());

    let t = gc.alloc(TY_LEAF);
    gc.set_current_thread(t);
    assert_eq!(gc.current_thread(), t);
    assert!(gc.saved_thread().is_null());

    gc.set_saved_thread(t);
    gc.set_signal_handler_thread(t);
    gc.set_call_from_c_handler_thread(t);
    assert_eq!(gc.saved_thread(), t);
    assert_eq!(gc.signal_handler_thread(), t);
    assert_eq!(gc.call_from_c_handler_thread(), t);
}

#[test]
fn test_signal_and_atomic_bookkeeping() {
    let mut gc = setup(config());

    assert!(gc.am_original());
    gc.set_am_original(false);
    assert!(!gc.am_original());

    gc.set_signal_is_pending(true);
    gc.set_gc_signal_pending(true);
    gc.set_gc_signal_handled(true);
    gc.set_am_in_signal_handler(true);
    assert!(gc.signal_is_pending());
    assert!(gc.gc_signal_pending());
    assert!(gc.gc_signal_handled());
    assert!(gc.am_in_signal_handler());

    assert_eq!(gc.atomic_state(), 0);
    gc.atomic_begin();
    gc.atomic_begin();
    assert_eq!(gc.atomic_state(), 2);
    gc.atomic_end();
    gc.atomic_end();
    assert_eq!(gc.atomic_state(), 0);
}

#[test]
fn test_invalid_tables_rejected() {
    let mut t = tables();
    // a ref offset past the payload
    t.object_types.push(ObjectType::new(16, vec![24]));
    assert!(Gc::new(config(), t).is_err());

    let mut t = tables();
    t.frame_infos.push(FrameInfo {
        frame_size: 512,
        live_offsets: vec![]
    });
    // larger than max_frame_size
    assert!(Gc::new(config(), t).is_err());
}

#[test]
fn test_debug_display() {
    let gc = setup(config());
    let s = format!("{:?}", gc);
    assert!(s.contains("heap"));
    assert!(s.contains("stack"));
    assert!(s.contains("Idle"));
}

#[test]
fn test_weak_node_links_at_alloc() {
    let mut gc = setup(config());

    let target = gc.alloc(TY_LEAF);
    let weak = gc.alloc(TY_WEAK);
    gc.object_store_ref(weak, 0, target);

    assert_eq!(gc.weak_referent(weak), Some(target));
}
