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

//! The collector state: one explicit `Gc` value owning the heap, the card
//! table, the runtime tables, the shadow stack, the weak ledger, and all
//! the bookkeeping around them. There is no global instance; the embedding
//! runtime creates one and threads it through every call.

use common::SIZE_1MB;
use heap::cards::CardTable;
use heap::gc::trace::MarkState;
use heap::gc::trace::MarkTrace;
use heap::gc::trace::TraceMode;
use heap::gc::CollectionKind;
use heap::gc::Phase;
use heap::gc::trace;
use heap::Heap;
use objectmodel;
use objectmodel::hashcons::HashConser;
use objectmodel::hashcons::NoHashCons;
use objectmodel::ObjectKind;
use objectmodel::ObjectType;
use objectmodel::TypeIndex;
use objectmodel::OBJECT_HEADER_SIZE;
use objectmodel::WEAK_REFERENT_OFFSET;
use roots;
use roots::FrameInfo;
use roots::FrameResolver;
use utils::math;
use utils::mem;
use utils::Address;
use utils::ByteSize;
use utils::ObjectReference;
use utils::Word;
use utils::WORD_SIZE;
use weak;

use std::cmp;
use std::fmt;

/// tunables fixed at state creation
pub struct GcConfig {
    pub heap_size: ByteSize,
    pub nursery_size: ByteSize,
    pub stack_size: ByteSize,
    /// bytes promoted by one minor collection beyond which it escalates to
    /// a major one
    pub promotion_threshold: ByteSize,
    /// multiplier applied to the heap size when allocation needs more room
    pub growth_factor: f64,
    /// skip the copying path and always compact in place (diagnostics)
    pub use_mark_compact: bool
}

impl Default for GcConfig {
    fn default() -> GcConfig {
        let heap_size = ::heap::DEFAULT_HEAP_SIZE;
        let nursery_size = (heap_size as f64 * ::heap::DEFAULT_NURSERY_RATIO) as ByteSize;
        GcConfig {
            heap_size,
            nursery_size: math::align_up(nursery_size, 4096),
            stack_size: 4 * SIZE_1MB,
            promotion_threshold: nursery_size / 2,
            growth_factor: 2.0,
            use_mark_compact: false
        }
    }
}

/// everything the compiler embeds in the executable and hands over at
/// startup: object layouts, frame layouts, and the mapping from return
/// addresses to frames
pub struct RuntimeTables {
    pub object_types: Vec<ObjectType>,
    pub frame_infos: Vec<FrameInfo>,
    pub resolve_frame: FrameResolver,
    pub max_frame_size: ByteSize,
    pub num_globals: usize
}

#[derive(Clone, Debug, Default)]
pub struct CumulativeStatistics {
    pub bytes_allocated: u64,
    pub num_minor_gcs: u64,
    pub num_copying_gcs: u64,
    pub num_markcompact_gcs: u64,
    pub max_bytes_live: ByteSize,
    pub gc_time_ns: u64
}

#[derive(Clone, Debug, Default)]
pub struct LastMajorStatistics {
    pub bytes_live: ByteSize
}

pub struct Gc {
    pub heap: Heap,
    pub cards: CardTable,
    pub types: Vec<ObjectType>,
    pub frame_infos: Vec<FrameInfo>,
    pub resolve_frame: FrameResolver,
    pub max_frame_size: ByteSize,

    /// the global objptr table, all roots
    pub globals: Vec<ObjectReference>,

    // shadow stack region: [stack_bottom, stack_top) holds live frames,
    // stack_limit leaves max_frame_size of slop at the top
    pub stack_bottom: Address,
    pub stack_top: Address,
    pub stack_limit: Address,
    stack_size: ByteSize,

    // thread handoff slots, objptrs the embedding runtime parks here across
    // context switches; traced as roots, never interpreted
    current_thread: ObjectReference,
    saved_thread: ObjectReference,
    call_from_c_handler_thread: ObjectReference,
    signal_handler_thread: ObjectReference,

    /// weak ledger head
    pub weaks: ObjectReference,
    pub mark_state: MarkState,
    pub phase: Phase,

    pub hash_cons_during_gc: bool,
    pub hash_conser: Box<HashConser>,

    // signal bookkeeping: the embedding runtime's signal handler only sets
    // flags; servicing happens after the collector returns
    am_original: bool,
    signal_is_pending: bool,
    gc_signal_pending: bool,
    gc_signal_handled: bool,
    am_in_signal_handler: bool,
    atomic_state: u32,

    pub stats: CumulativeStatistics,
    pub last_major: LastMajorStatistics,
    pub config: GcConfig
}

impl Gc {
    pub fn new(config: GcConfig, tables: RuntimeTables) -> Result<Gc, String> {
        for (i, ty) in tables.object_types.iter().enumerate() {
            ty.validate().map_err(|e| format!("object type {}: {}", i, e))?;
        }
        for (i, info) in tables.frame_infos.iter().enumerate() {
            info.validate(tables.max_frame_size)
                .map_err(|e| format!("frame info {}: {}", i, e))?;
        }
        if tables.max_frame_size >= config.stack_size {
            return Err(format!(
                "max frame size {} does not fit the {} byte stack",
                tables.max_frame_size, config.stack_size
            ));
        }

        let heap = Heap::new(config.heap_size, config.nursery_size);
        let cards = CardTable::new(heap.start(), heap.limit());

        let stack_bottom = mem::mmap_large(config.stack_size);
        let stack_limit = stack_bottom + config.stack_size - tables.max_frame_size;

        info!(
            "gc state up: heap {} bytes, nursery {} bytes, stack {} bytes, {} types, {} frames",
            config.heap_size,
            config.nursery_size,
            config.stack_size,
            tables.object_types.len(),
            tables.frame_infos.len()
        );

        Ok(Gc {
            heap,
            cards,
            types: tables.object_types,
            frame_infos: tables.frame_infos,
            resolve_frame: tables.resolve_frame,
            max_frame_size: tables.max_frame_size,
            globals: vec![ObjectReference::null(); tables.num_globals],
            stack_bottom,
            stack_top: stack_bottom,
            stack_limit,
            stack_size: config.stack_size,
            current_thread: ObjectReference::null(),
            saved_thread: ObjectReference::null(),
            call_from_c_handler_thread: ObjectReference::null(),
            signal_handler_thread: ObjectReference::null(),
            weaks: ObjectReference::null(),
            mark_state: MarkState::new(),
            phase: Phase::Idle,
            hash_cons_during_gc: false,
            hash_conser: Box::new(NoHashCons),
            am_original: true,
            signal_is_pending: false,
            gc_signal_pending: false,
            gc_signal_handled: false,
            am_in_signal_handler: false,
            atomic_state: 0,
            stats: CumulativeStatistics::default(),
            last_major: LastMajorStatistics::default(),
            config
        })
    }

    // ---- allocation ----

    /// allocates a zeroed object of type `ty`, collecting (and as a last
    /// resort growing the heap) as needed. Only ever returns a valid
    /// reference; exhausting memory entirely is fatal.
    pub fn alloc(&mut self, ty: TypeIndex) -> ObjectReference {
        debug_assert!((ty as usize) < self.types.len());
        let size = self.types[ty as usize].size;

        if let Some(payload) = self.heap.try_alloc(size) {
            return self.finish_alloc(payload, ty, size);
        }

        self.collect(CollectionKind::Minor);
        if let Some(payload) = self.heap.try_alloc(size) {
            return self.finish_alloc(payload, ty, size);
        }

        // the nursery is empty, so the object does not fit it at all: place
        // it directly in the old generation
        if let Some(payload) = self.heap.try_promote_alloc(size) {
            return self.finish_alloc(payload, ty, size);
        }

        self.collect(CollectionKind::Major);
        if let Some(payload) = self.heap.try_promote_alloc(size) {
            return self.finish_alloc(payload, ty, size);
        }

        let needed = self.heap.old_gen_used()
            + OBJECT_HEADER_SIZE
            + size
            + self.heap.nursery_size();
        let grown = (self.heap.size() as f64 * self.config.growth_factor) as ByteSize;
        let new_size = math::align_up(cmp::max(grown, needed), 4096);
        info!(
            "allocation of {} bytes needs more room, growing heap to {}",
            size, new_size
        );
        if let Err(e) = self.grow_heap(new_size) {
            error!("cannot grow heap to {} bytes: {:?}", new_size, e);
            panic!("out of memory");
        }

        match self.heap.try_promote_alloc(size) {
            Some(payload) => self.finish_alloc(payload, ty, size),
            None => panic!("out of memory")
        }
    }

    fn finish_alloc(&mut self, payload: Address, ty: TypeIndex, size: ByteSize) -> ObjectReference {
        let obj = unsafe { payload.to_object_reference() };
        objectmodel::init_header(obj, ty);
        unsafe { payload.memset(0, size) };

        if self.types[ty as usize].kind == ObjectKind::Weak {
            weak::link(&mut self.weaks, obj);
        }

        self.stats.bytes_allocated += (OBJECT_HEADER_SIZE + size) as u64;
        obj
    }

    // ---- object accessors ----

    /// stores an objptr into a field, dirtying the card when the object
    /// lives in the old generation (the generational write barrier)
    pub fn object_store_ref(&mut self, obj: ObjectReference, offset: ByteSize, value: ObjectReference) {
        debug_assert!(self.is_ref_field(obj, offset));
        let slot = obj.to_address() + offset;
        unsafe { slot.store::<ObjectReference>(value) };

        if self.heap.in_old_gen(obj.to_address()) {
            self.cards.mark_card(slot);
        }
    }

    pub fn object_load_ref(&self, obj: ObjectReference, offset: ByteSize) -> ObjectReference {
        debug_assert!(self.is_ref_field(obj, offset));
        unsafe { (obj.to_address() + offset).load::<ObjectReference>() }
    }

    /// stores a non-pointer word; no barrier
    pub fn object_store_word(&mut self, obj: ObjectReference, offset: ByteSize, value: Word) {
        debug_assert!(!self.is_ref_field(obj, offset));
        unsafe { (obj.to_address() + offset).store::<Word>(value) };
    }

    pub fn object_load_word(&self, obj: ObjectReference, offset: ByteSize) -> Word {
        unsafe { (obj.to_address() + offset).load::<Word>() }
    }

    fn is_ref_field(&self, obj: ObjectReference, offset: ByteSize) -> bool {
        let ty = &self.types[objectmodel::get_type_index(obj) as usize];
        offset + WORD_SIZE <= ty.size && ty.ref_offsets.contains(&offset)
    }

    /// the referent of a weak node, None once it has been cleared
    pub fn weak_referent(&self, weak: ObjectReference) -> Option<ObjectReference> {
        debug_assert_eq!(
            self.types[objectmodel::get_type_index(weak) as usize].kind,
            ObjectKind::Weak
        );
        if objectmodel::is_weak_cleared(weak) {
            return None;
        }
        let referent =
            unsafe { (weak.to_address() + WEAK_REFERENT_OFFSET).load::<ObjectReference>() };
        if referent.is_null() {
            None
        } else {
            Some(referent)
        }
    }

    // ---- globals ----

    pub fn global(&self, index: usize) -> ObjectReference {
        self.globals[index]
    }

    pub fn set_global(&mut self, index: usize, value: ObjectReference) {
        self.globals[index] = value;
    }

    // ---- shadow stack ----

    /// pushes a zeroed frame for `return_address`; overflow past the
    /// reserved slop is fatal
    pub fn push_frame(&mut self, return_address: Word) {
        let index = roots::resolve_frame_index(self, return_address);
        let frame_size = self.frame_infos[index].frame_size;

        let new_top = self.stack_top + frame_size;
        if new_top > self.stack_limit {
            error!(
                "stack overflow pushing frame {} ({} bytes) at {}",
                index, frame_size, self.stack_top
            );
            panic!("shadow stack overflow");
        }

        unsafe {
            self.stack_top.memset(0, frame_size);
            (new_top - WORD_SIZE).store::<Word>(return_address);
        }
        self.stack_top = new_top;
    }

    pub fn pop_frame(&mut self) {
        assert!(self.stack_top > self.stack_bottom, "popping an empty stack");
        let return_address = unsafe { (self.stack_top - WORD_SIZE).load::<Word>() };
        let index = roots::resolve_frame_index(self, return_address);
        self.stack_top = self.stack_top - self.frame_infos[index].frame_size;
    }

    /// stores an objptr into a live slot of the topmost frame. Stack slots
    /// are roots, so no barrier applies.
    pub fn store_stack_slot(&mut self, offset: ByteSize, value: ObjectReference) {
        assert!(self.stack_top > self.stack_bottom, "no frame to store into");
        let return_address = unsafe { (self.stack_top - WORD_SIZE).load::<Word>() };
        let index = roots::resolve_frame_index(self, return_address);
        let info = &self.frame_infos[index];
        debug_assert!(info.live_offsets.contains(&offset));

        let base = self.stack_top - info.frame_size;
        unsafe { (base + offset).store::<ObjectReference>(value) };
    }

    pub fn load_stack_slot(&self, offset: ByteSize) -> ObjectReference {
        assert!(self.stack_top > self.stack_bottom, "no frame to load from");
        let return_address = unsafe { (self.stack_top - WORD_SIZE).load::<Word>() };
        let index = roots::resolve_frame_index(self, return_address);
        let info = &self.frame_infos[index];
        debug_assert!(info.live_offsets.contains(&offset));

        let base = self.stack_top - info.frame_size;
        unsafe { (base + offset).load::<ObjectReference>() }
    }

    // ---- size queries ----

    /// bytes (headers included) reachable from `root`
    pub fn size(&mut self, root: ObjectReference) -> ByteSize {
        let mut slot = root;
        let slots = [Address::from_mut_ptr(&mut slot as *mut ObjectReference)];
        self.size_from(&slots)
    }

    /// bytes reachable from the globals and the handoff slots; the stack is
    /// deliberately not part of this query
    pub fn size_all(&mut self) -> ByteSize {
        let slots = roots::global_slots(self);
        self.size_from(&slots)
    }

    /// Mark then Unmark over the same graph; the two passes must agree on
    /// the object count or the mark bits are corrupted, which is fatal
    fn size_from(&mut self, slots: &[Address]) -> ByteSize {
        assert!(!self.mark_state.active, "size query during another traversal");
        self.mark_state.active = true;
        self.mark_state.should_hash_cons = false;
        self.mark_state.should_link_weaks = false;

        let marked = self.run_trace(TraceMode::Mark, slots);
        let size = self.mark_state.size;
        let unmarked = self.run_trace(TraceMode::Unmark, slots);

        if marked != unmarked {
            error!(
                "mark pass visited {} objects but unmark pass visited {}",
                marked, unmarked
            );
            panic!("mark/unmark asymmetry: corrupted mark bits");
        }

        self.mark_state.active = false;
        size
    }

    fn run_trace(&mut self, mode: TraceMode, slots: &[Address]) -> usize {
        self.mark_state.mode = mode;
        self.mark_state.size = 0;
        self.mark_state.visited = 0;

        let Gc {
            ref mut mark_state,
            ref types,
            ref mut weaks,
            ..
        } = *self;
        let mut policy = MarkTrace {
            state: mark_state,
            types,
            weaks
        };
        trace::trace_from_slots(&mut policy, types, slots);
        self.mark_state.visited
    }

    // ---- thread handoff ----

    pub fn current_thread(&self) -> ObjectReference {
        self.current_thread
    }
    pub fn set_current_thread(&mut self, t: ObjectReference) {
        self.current_thread = t;
    }
    pub fn saved_thread(&self) -> ObjectReference {
        self.saved_thread
    }
    pub fn set_saved_thread(&mut self, t: ObjectReference) {
        self.saved_thread = t;
    }
    pub fn call_from_c_handler_thread(&self) -> ObjectReference {
        self.call_from_c_handler_thread
    }
    pub fn set_call_from_c_handler_thread(&mut self, t: ObjectReference) {
        self.call_from_c_handler_thread = t;
    }
    pub fn signal_handler_thread(&self) -> ObjectReference {
        self.signal_handler_thread
    }
    pub fn set_signal_handler_thread(&mut self, t: ObjectReference) {
        self.signal_handler_thread = t;
    }

    /// slot addresses of the non-null handoff objptrs, in the fixed
    /// enumeration order
    pub fn push_handoff_slots(&self, slots: &mut Vec<Address>) {
        let fields = [
            &self.call_from_c_handler_thread,
            &self.saved_thread,
            &self.signal_handler_thread,
            &self.current_thread
        ];
        for field in fields.iter() {
            if !field.is_null() {
                slots.push(Address::from_ptr(*field as *const ObjectReference));
            }
        }
    }

    // ---- signal and atomic bookkeeping ----

    pub fn am_original(&self) -> bool {
        self.am_original
    }
    pub fn set_am_original(&mut self, b: bool) {
        self.am_original = b;
    }
    pub fn signal_is_pending(&self) -> bool {
        self.signal_is_pending
    }
    pub fn set_signal_is_pending(&mut self, b: bool) {
        self.signal_is_pending = b;
    }
    pub fn gc_signal_pending(&self) -> bool {
        self.gc_signal_pending
    }
    pub fn set_gc_signal_pending(&mut self, b: bool) {
        self.gc_signal_pending = b;
    }
    pub fn gc_signal_handled(&self) -> bool {
        self.gc_signal_handled
    }
    pub fn set_gc_signal_handled(&mut self, b: bool) {
        self.gc_signal_handled = b;
    }
    pub fn am_in_signal_handler(&self) -> bool {
        self.am_in_signal_handler
    }
    pub fn set_am_in_signal_handler(&mut self, b: bool) {
        self.am_in_signal_handler = b;
    }

    pub fn atomic_state(&self) -> u32 {
        self.atomic_state
    }
    pub fn atomic_begin(&mut self) {
        self.atomic_state += 1;
    }
    pub fn atomic_end(&mut self) {
        assert!(self.atomic_state > 0, "atomic_end without atomic_begin");
        self.atomic_state -= 1;
    }

    // ---- statistics ----

    pub fn cumulative_statistics(&self) -> &CumulativeStatistics {
        &self.stats
    }

    pub fn last_major_bytes_live(&self) -> ByteSize {
        self.last_major.bytes_live
    }
}

impl fmt::Debug for Gc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "GC state")?;
        writeln!(
            f,
            "  heap      [{} .. {}), {} bytes",
            self.heap.start(),
            self.heap.limit(),
            self.heap.size()
        )?;
        writeln!(
            f,
            "  old gen   {} bytes used, nursery {} / {} bytes",
            self.heap.old_gen_used(),
            self.heap.nursery_used(),
            self.heap.nursery_size()
        )?;
        writeln!(
            f,
            "  stack     [{} .. {}), top {}",
            self.stack_bottom,
            self.stack_bottom + self.stack_size,
            self.stack_top
        )?;
        writeln!(f, "  phase     {:?}", self.phase)?;
        writeln!(f, "  atomic    {}", self.atomic_state)?;
        writeln!(
            f,
            "  stats     {} bytes allocated, {} minor / {} copying / {} mark-compact gcs",
            self.stats.bytes_allocated,
            self.stats.num_minor_gcs,
            self.stats.num_copying_gcs,
            self.stats.num_markcompact_gcs
        )?;
        write!(
            f,
            "  stats     max {} bytes live, last major {} bytes live, {} ns in gc",
            self.stats.max_bytes_live,
            self.last_major.bytes_live,
            self.stats.gc_time_ns
        )
    }
}

impl Drop for Gc {
    fn drop(&mut self) {
        mem::munmap(self.stack_bottom, self.stack_size);
    }
}
