use std::{collections::HashMap, ops::AddAssign};

use log::{debug, info, trace, warn};

use crate::{
    dispatch::{init_dispatch_tables, DispatchTables, ScavFn, TransFn},
    forward::{ObjectState, FORWARDING_MARKER},
    gc_assert,
    hash_table::WeakTableWorklist,
    heap::{Heap, PageKind, RegionKind},
    lose,
    tag_ptr::{Address, LispObj, PointerKind, Word, N_WORD_BYTES},
    thread::ThreadState,
    widetag::SIMPLE_FUN_HEADER_WIDETAG,
};

/// Figures for one collection, or summed over all of them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    pub words_copied: u64,
    pub objects_copied: u64,
    pub weak_pointers_broken: u64,
    pub weak_entries_removed: u64,
    pub tables_needing_rehash: u64,
}

impl AddAssign for GcStats {
    fn add_assign(&mut self, rhs: Self) {
        self.words_copied += rhs.words_copied;
        self.objects_copied += rhs.objects_copied;
        self.weak_pointers_broken += rhs.weak_pointers_broken;
        self.weak_entries_removed += rhs.weak_entries_removed;
        self.tables_needing_rehash += rhs.tables_needing_rehash;
    }
}

/// State of one collection. Creating a collector flips the heap, so every
/// dynamic object becomes from-space until [`Collector::finish`].
pub struct Collector<'h> {
    pub(crate) heap: &'h mut Heap,
    pub(crate) tables: &'static DispatchTables,
    /// Head of the weak pointers transported this cycle, linked through
    /// their `next` slots. Zero ends the list.
    pub(crate) weak_pointers: Address,
    pub(crate) weak_tables: WeakTableWorklist,
    /// Words of each to-space region already traced.
    scanned: HashMap<usize, u64>,
    pub(crate) stats: GcStats,
}

impl<'h> Collector<'h> {
    pub fn begin(heap: &'h mut Heap) -> Self {
        heap.flip();
        Collector {
            heap,
            tables: init_dispatch_tables(),
            weak_pointers: 0,
            weak_tables: WeakTableWorklist::default(),
            scanned: HashMap::new(),
            stats: GcStats::default(),
        }
    }

    pub fn heap(&self) -> &Heap {
        self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        self.heap
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    /// Release from-space and fold this cycle into the heap's totals.
    pub fn finish(self) -> GcStats {
        gc_assert!(
            self.weak_pointers == 0,
            "weak pointer list not drained before releasing from-space"
        );
        self.heap.release_from_space();
        self.heap.record_cycle(self.stats);
        self.stats
    }

    // ---------------------------------------------------------------------
    // Scavenging
    // ---------------------------------------------------------------------

    /// Trace the `nwords` words starting at `start`, rewriting every
    /// from-space pointer in place. The span must hold whole objects.
    pub fn scavenge(&mut self, start: Address, nwords: u64) {
        let end = start + nwords * N_WORD_BYTES;
        let mut cursor = start;
        while cursor < end {
            cursor += self.scavenge_one(cursor) * N_WORD_BYTES;
        }
        gc_assert!(
            cursor == end,
            "scavenge of {:#x}+{} words ended at {:#x}, not {:#x}",
            start,
            nwords,
            cursor,
            end
        );
    }

    /// Process the word at `where_` and return how many words it accounts
    /// for: 1 for anything but an object header.
    pub fn scavenge_one(&mut self, where_: Address) -> u64 {
        let object = self.heap.load(where_);
        if object.raw() == FORWARDING_MARKER {
            lose!("unexpected forwarding pointer in scavenge at {:#x}", where_);
        }
        match object.decode() {
            Word::Fixnum(_) => 1,
            Word::Pointer { addr, kind } => {
                if self.heap.from_space_addr_p(addr) {
                    self.scavenge_pointer(where_, object, kind);
                }
                1
            }
            Word::Other { widetag, .. } => self.scavenge_header(where_, object, widetag),
        }
    }

    fn scavenge_pointer(&mut self, where_: Address, object: LispObj, kind: PointerKind) {
        let new = match self.heap.object_state(object.native_pointer()) {
            ObjectState::Forwarded(new) => new,
            ObjectState::Unscanned(_) => self.transport_pointer(object, kind),
        };
        self.heap.store(where_, new);
    }

    fn scavenge_header(&mut self, where_: Address, header: LispObj, widetag: u8) -> u64 {
        match self.tables.scav(widetag) {
            ScavFn::Lose => lose!(
                "no scavenge function for object {:#x} (widetag {:#x}) at {:#x}",
                header.raw(),
                widetag,
                where_
            ),
            ScavFn::Immediate | ScavFn::Boxed => 1,
            ScavFn::Unboxed => self.tables.size_of(self.heap, where_),
            ScavFn::Instance => self.scav_instance(where_, header),
            ScavFn::Closure => self.scav_closure(where_),
            ScavFn::Fdefn => self.scav_fdefn(where_),
            ScavFn::Vector => self.scav_vector(where_, header),
            ScavFn::CodeHeader => self.scav_code_header(where_, header),
            ScavFn::FunHeader | ScavFn::ReturnPcHeader => lose!(
                "attempted to scavenge a {} at {:#x} outside its code object",
                crate::widetag::widetag_name(widetag),
                where_
            ),
            ScavFn::WeakPointer => self.scav_weak_pointer(where_),
            ScavFn::ListPointer
            | ScavFn::FunPointer
            | ScavFn::InstancePointer
            | ScavFn::OtherPointer => {
                lose!("pointer handler selected for header {:#x} at {:#x}", header.raw(), where_)
            }
        }
    }

    /// Copy the from-space object `object` points to, leaving a forwarding
    /// pointer behind, and return the tagged pointer to the copy.
    pub(crate) fn transport_pointer(&mut self, object: LispObj, kind: PointerKind) -> LispObj {
        let addr = object.native_pointer();
        let new = match self.tables.scav_pointer(kind) {
            ScavFn::ListPointer => self.trans_list(object),
            ScavFn::InstancePointer => self.trans_boxed(object, PageKind::Boxed),
            ScavFn::FunPointer => {
                if self.heap.load(addr).widetag() == SIMPLE_FUN_HEADER_WIDETAG {
                    self.trans_fun_header(object)
                } else {
                    self.trans_boxed(object, PageKind::Boxed)
                }
            }
            ScavFn::OtherPointer => self.transport_other(object),
            other => lose!("no pointer handler {:?} for {:?}", other, object),
        };
        self.heap.install_forward(addr, new)
    }

    fn transport_other(&mut self, object: LispObj) -> LispObj {
        let header = self.heap.load(object.native_pointer());
        match self.tables.trans(header.widetag()) {
            TransFn::Lose => lose!(
                "no transport function for object {:?} (widetag {:#x})",
                object,
                header.widetag()
            ),
            TransFn::Boxed => self.trans_boxed(object, PageKind::Boxed),
            TransFn::Unboxed => self.trans_boxed(object, PageKind::Unboxed),
            TransFn::Code => {
                LispObj::from_pointer(self.trans_code(object.native_pointer()), PointerKind::Other)
            }
            TransFn::FunHeader => self.trans_fun_header(object),
            TransFn::ReturnPcHeader => self.trans_return_pc_header(object),
            TransFn::WeakPointer => self.trans_weak_pointer(object),
        }
    }

    /// Relocate a single root value and return it, rewritten if it moved.
    /// Non-descriptors that reach a `Lose` slot are reported and left as
    /// they are.
    pub fn scavenge_value(&mut self, value: LispObj) -> LispObj {
        match value.decode() {
            Word::Fixnum(_) => value,
            Word::Pointer { addr, kind } => {
                if !self.heap.from_space_addr_p(addr) {
                    return value;
                }
                match self.heap.object_state(addr) {
                    ObjectState::Forwarded(new) => new,
                    ObjectState::Unscanned(_) => self.transport_pointer(value, kind),
                }
            }
            Word::Other { widetag, .. } => {
                if self.tables.scav(widetag) == ScavFn::Lose {
                    warn!("Scavenging a non-descriptor value {:#x}", value.raw());
                }
                value
            }
        }
    }

    // ---------------------------------------------------------------------
    // Newspace
    // ---------------------------------------------------------------------

    /// Trace everything copied since the last call, repeating until the
    /// copies stop producing further copies. Returns whether any work was
    /// done.
    pub fn scavenge_newspace(&mut self) -> bool {
        let mut did_work = false;
        loop {
            let mut progressed = false;
            for index in self.heap.live_dynamic_regions() {
                let Some(region) = self.heap.region_at(index) else {
                    continue;
                };
                if region.kind() == RegionKind::Dynamic(PageKind::Unboxed) {
                    continue;
                }
                let (base, fill) = (region.base(), region.fill_words());
                let done = self.scanned.get(&index).copied().unwrap_or(0);
                if done < fill {
                    trace!("Scanning newspace region {} words {}..{}", index, done, fill);
                    self.scanned.insert(index, fill);
                    self.scavenge(base + done * N_WORD_BYTES, fill - done);
                    progressed = true;
                }
            }
            if !progressed {
                return did_work;
            }
            did_work = true;
        }
    }

    // ---------------------------------------------------------------------
    // Cycle
    // ---------------------------------------------------------------------

    /// Scavenge the static space as a root span.
    pub fn scavenge_static_space(&mut self) {
        let space = self.heap.static_space();
        let (base, fill) = (space.base(), space.fill_words());
        debug!("Scavenging static space, {} words", fill);
        self.scavenge(base, fill);
    }

    /// Trace from every root, finish the weak passes and release
    /// from-space.
    pub fn run(mut self, threads: &mut [ThreadState]) -> GcStats {
        debug!("Scavenging roots");
        self.scavenge_handles();
        self.scavenge_static_space();
        for thread in threads.iter_mut() {
            self.scavenge_thread(thread);
        }

        debug!("Scavenging newspace");
        loop {
            self.scavenge_newspace();
            let copied = self.stats.objects_copied;
            self.scav_weak_hash_tables();
            if self.stats.objects_copied == copied {
                break;
            }
        }

        debug!("Scanning weak hash tables");
        self.scan_weak_hash_tables();
        debug!("Scanning weak pointers");
        self.scan_weak_pointers();
        self.finish()
    }
}

impl Heap {
    /// Run a full collection with `threads` stopped.
    pub fn collect(&mut self, threads: &mut [ThreadState]) -> GcStats {
        trace!("Starting GC");
        let before = self.metadata().currently_allocated;
        let stats = Collector::begin(self).run(threads);
        info!(
            "GC {} done: {} -> {} words, {} objects copied, {} weak pointers broken, {} weak entries removed",
            self.metadata().gc_count,
            before,
            self.metadata().currently_allocated,
            stats.objects_copied,
            stats.weak_pointers_broken,
            stats.weak_entries_removed
        );
        stats
    }
}
