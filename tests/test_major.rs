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

use gc::heap::HeapError;
use gc::objectmodel::ObjectType;
use gc::roots::FrameInfo;
use gc::state::Gc;
use gc::state::GcConfig;
use gc::state::RuntimeTables;
use gc::CollectionKind;
use utils::Word;

const TY_PAIR: u32 = 0;
const TY_LEAF: u32 = 1;
const TY_BIG: u32 = 2;

const RA_MAIN: Word = 0xbeef0;

const HEAP_SIZE: usize = 4 << 20;
const NURSERY_SIZE: usize = 256 << 10;

const PAIR_ALLOC: usize = 8 + 16;
const LEAF_ALLOC: usize = 8 + 24;

const WORK_LOAD: usize = 1000;

fn config(use_mark_compact: bool) -> GcConfig {
    GcConfig {
        heap_size: HEAP_SIZE,
        nursery_size: NURSERY_SIZE,
        stack_size: 64 << 10,
        promotion_threshold: NURSERY_SIZE / 2,
        growth_factor: 2.0,
        use_mark_compact
    }
}

fn setup(config: GcConfig) -> Gc {
    gc::start_logging_trace();
    let tables = RuntimeTables {
        object_types: vec![
            ObjectType::new(16, vec![0, 8]),
            ObjectType::new_noref(24),
            // larger than the whole nursery window
            ObjectType::new_noref(NURSERY_SIZE)
        ],
        frame_infos: vec![FrameInfo {
            frame_size: 32,
            live_offsets: vec![0, 8]
        }],
        resolve_frame: Box::new(|ra| if ra == RA_MAIN { Some(0) } else { None }),
        max_frame_size: 256,
        num_globals: 8
    };
    Gc::new(config, tables).unwrap()
}

/// cons a list of `n` pairs rooted in stack slot 0, each tail in field 0
fn build_list(gc: &mut Gc, n: usize) {
    for _ in 0..n {
        let node = gc.alloc(TY_PAIR);
        let tail = gc.load_stack_slot(0);
        gc.object_store_ref(node, 0, tail);
        gc.store_stack_slot(0, node);
    }
}

fn list_len(gc: &Gc) -> usize {
    let mut n = 0;
    let mut cur = gc.load_stack_slot(0);
    while !cur.is_null() {
        n += 1;
        cur = gc.object_load_ref(cur, 0);
    }
    n
}

#[test]
fn test_copying_major_preserves_graph() {
    let mut gc = setup(config(false));
    gc.push_frame(RA_MAIN);
    build_list(&mut gc, WORK_LOAD);

    gc.collect(CollectionKind::Major);

    assert_eq!(gc.stats.num_copying_gcs, 1);
    assert_eq!(list_len(&gc), WORK_LOAD);
    assert_eq!(gc.last_major_bytes_live(), WORK_LOAD * PAIR_ALLOC);
    // everything lives in the old generation of the fresh heap
    assert_eq!(gc.heap.nursery_used(), 0);
    assert_eq!(gc.heap.old_gen_used(), WORK_LOAD * PAIR_ALLOC);
}

#[test]
fn test_mark_compact_major_preserves_graph() {
    let mut gc = setup(config(true));
    gc.push_frame(RA_MAIN);
    build_list(&mut gc, WORK_LOAD);

    // a data leaf at the end of the list
    let leaf = gc.alloc(TY_LEAF);
    gc.object_store_word(leaf, 0, 0x5a5a);
    let head = gc.load_stack_slot(0);
    gc.object_store_ref(head, 8, leaf);

    gc.collect(CollectionKind::Major);

    assert_eq!(gc.stats.num_markcompact_gcs, 1);
    assert_eq!(list_len(&gc), WORK_LOAD);

    let head = gc.load_stack_slot(0);
    let leaf = gc.object_load_ref(head, 8);
    assert_eq!(gc.object_load_word(leaf, 0), 0x5a5a);

    // compaction slides the survivors to the bottom of the heap
    assert_eq!(gc.heap.nursery_used(), 0);
    assert_eq!(
        gc.heap.old_gen_used(),
        WORK_LOAD * PAIR_ALLOC + LEAF_ALLOC
    );
}

#[test]
fn test_repeated_majors_are_stable() {
    let mut gc = setup(config(false));
    gc.push_frame(RA_MAIN);
    build_list(&mut gc, WORK_LOAD);

    for _ in 0..5 {
        gc.collect(CollectionKind::Major);
        assert_eq!(list_len(&gc), WORK_LOAD);
        assert_eq!(gc.last_major_bytes_live(), WORK_LOAD * PAIR_ALLOC);
    }
}

#[test]
fn test_major_on_empty_state() {
    let mut gc = setup(config(false));
    gc.collect(CollectionKind::Major);

    assert_eq!(gc.stats.num_copying_gcs, 1);
    assert_eq!(gc.last_major_bytes_live(), 0);
    assert_eq!(gc.heap.old_gen_used(), 0);
}

#[test]
fn test_large_object_goes_to_old_gen() {
    let mut gc = setup(config(false));

    let big = gc.alloc(TY_BIG);
    assert!(gc.heap.in_old_gen(big.to_address()));

    gc.object_store_word(big, 0, 0x88);
    gc.set_global(0, big);
    gc.collect(CollectionKind::Major);

    let big = gc.global(0);
    assert_eq!(gc.object_load_word(big, 0), 0x88);
}

#[test]
fn test_grow_heap_preserves_data() {
    let mut gc = setup(config(false));

    let leaf = gc.alloc(TY_LEAF);
    gc.object_store_word(leaf, 0, 0x1234);
    gc.set_global(0, leaf);

    let old_size = gc.heap.size();
    gc.grow_heap(old_size * 2).unwrap();

    assert_eq!(gc.heap.size(), old_size * 2);
    let leaf = gc.global(0);
    assert!(gc.heap.in_old_gen(leaf.to_address()));
    assert_eq!(gc.object_load_word(leaf, 0), 0x1234);
}

#[test]
fn test_shrink_heap() {
    let mut gc = setup(config(false));

    let leaf = gc.alloc(TY_LEAF);
    gc.object_store_word(leaf, 0, 0x4321);
    gc.set_global(0, leaf);

    gc.shrink_heap(HEAP_SIZE / 2).unwrap();
    assert_eq!(gc.heap.size(), HEAP_SIZE / 2);
    assert_eq!(gc.object_load_word(gc.global(0), 0), 0x4321);

    // smaller than live data + nursery window must fail without damage
    match gc.shrink_heap(NURSERY_SIZE) {
        Err(HeapError::TooSmall(_)) => {}
        other => panic!("expected TooSmall, got {:?}", other)
    }
    assert_eq!(gc.object_load_word(gc.global(0), 0), 0x4321);
}

#[test]
fn test_stack_roots_survive_collections() {
    let mut gc = setup(config(false));
    gc.push_frame(RA_MAIN);

    let a = gc.alloc(TY_LEAF);
    gc.object_store_word(a, 0, 0x11);
    gc.store_stack_slot(0, a);

    gc.push_frame(RA_MAIN);
    let b = gc.alloc(TY_LEAF);
    gc.object_store_word(b, 0, 0x22);
    gc.store_stack_slot(8, b);

    gc.collect(CollectionKind::Major);

    assert_eq!(gc.object_load_word(gc.load_stack_slot(8), 0), 0x22);
    gc.pop_frame();
    assert_eq!(gc.object_load_word(gc.load_stack_slot(0), 0), 0x11);
}
