use std::ops::Range;

use log::{debug, trace};
use memmap2::MmapMut;
use slotmap::{new_key_type, SlotMap};

use crate::{
    code::{IcacheFlusher, LoggingFlusher},
    config::GcConfig,
    error::GcError,
    gc::GcStats,
    layout::symbol,
    lose,
    tag_ptr::{Address, LispObj, N_WORD_BYTES, OTHER_POINTER_LOWTAG},
    widetag::{SYMBOL_HEADER_WIDETAG, UNBOUND_MARKER_WIDETAG},
};

/// Every region owns a `1 << REGION_SHIFT` byte window of the address space.
pub const REGION_SHIFT: u32 = 32;
const MAX_REGION_WORDS: u64 = (1 << REGION_SHIFT) / N_WORD_BYTES;

const READ_ONLY_REGION: usize = 0;
const STATIC_REGION: usize = 1;

pub const READ_ONLY_SPACE_START: Address = region_base(READ_ONLY_REGION);
pub const STATIC_SPACE_START: Address = region_base(STATIC_REGION);

const SYMBOL_BYTES: u64 = symbol::SIZE * N_WORD_BYTES;

pub const NIL: LispObj = LispObj(STATIC_SPACE_START | OTHER_POINTER_LOWTAG as u64);
pub const T: LispObj = LispObj((STATIC_SPACE_START + SYMBOL_BYTES) | OTHER_POINTER_LOWTAG as u64);
/// Marker symbol hash tables store in vacant key/value slots.
pub const EMPTY_HASH_SLOT: LispObj =
    LispObj((STATIC_SPACE_START + 2 * SYMBOL_BYTES) | OTHER_POINTER_LOWTAG as u64);

const fn region_base(index: usize) -> Address {
    ((index as u64) + 1) << REGION_SHIFT
}

/// Page classification for dynamic allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    Boxed,
    Unboxed,
    Code,
}

impl PageKind {
    const fn index(self) -> usize {
        match self {
            PageKind::Boxed => 0,
            PageKind::Unboxed => 1,
            PageKind::Code => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    ReadOnly,
    Static,
    ControlStack,
    Dynamic(PageKind),
}

/// One anonymous mapping, addressed from `base`.
pub struct Region {
    base: Address,
    kind: RegionKind,
    mem: MmapMut,
    fill: u64,
    from_space: bool,
}

impl Region {
    fn map(base: Address, kind: RegionKind, words: u64) -> Result<Self, GcError> {
        if words > MAX_REGION_WORDS {
            return Err(GcError::SpaceExhausted {
                space: "region",
                words,
            });
        }
        let bytes = (words * N_WORD_BYTES) as usize;
        let mem = MmapMut::map_anon(bytes).map_err(|source| GcError::Map { bytes, source })?;
        trace!("Mapped {:?} region at {:#x}, {} words", kind, base, words);
        Ok(Region {
            base,
            kind,
            mem,
            fill: 0,
            from_space: false,
        })
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    pub fn capacity_words(&self) -> u64 {
        self.mem.len() as u64 / N_WORD_BYTES
    }

    /// Words handed out so far.
    pub fn fill_words(&self) -> u64 {
        self.fill
    }

    /// First address past the allocated part.
    pub fn free_pointer(&self) -> Address {
        self.base + self.fill * N_WORD_BYTES
    }

    pub fn is_from_space(&self) -> bool {
        self.from_space
    }

    fn limit(&self) -> Address {
        self.base + self.mem.len() as u64
    }

    fn contains(&self, addr: Address) -> bool {
        addr >= self.base && addr < self.limit()
    }

    fn offset(&self, addr: Address) -> usize {
        (addr - self.base) as usize
    }

    fn load(&self, addr: Address) -> u64 {
        let off = self.offset(addr);
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.mem[off..off + 8]);
        u64::from_ne_bytes(buf)
    }

    fn store(&mut self, addr: Address, value: u64) {
        let off = self.offset(addr);
        self.mem[off..off + 8].copy_from_slice(&value.to_ne_bytes());
    }

    fn bump(&mut self, nwords: u64) -> Option<Address> {
        if self.capacity_words() - self.fill < nwords {
            return None;
        }
        let addr = self.free_pointer();
        self.fill += nwords;
        Some(addr)
    }
}

new_key_type! {
    pub struct HandleKey;
}

/// A root held by the mutator. The collector rewrites the referenced
/// object whenever it moves.
pub struct Handle {
    key: HandleKey,
}

#[derive(Debug, Default, Clone)]
pub struct HeapMeta {
    pub currently_allocated: u64,
    pub gc_count: usize,
    pub total_allocated: u64,
    pub high_water_mark: u64,
    /// Totals over every collection so far.
    pub collected: GcStats,
}

/// The collector's address space: read-only and static spaces, control
/// stacks, and the dynamic regions that get collected.
pub struct Heap {
    regions: Vec<Option<Region>>,
    free_slots: Vec<usize>,
    open: [Option<usize>; 3],

    config: GcConfig,
    handles: SlotMap<HandleKey, LispObj>,
    in_gc: bool,
    icache: Box<dyn IcacheFlusher>,

    gc_count: usize,
    meta_total_allocated: u64,
    meta_high_water_mark: u64,
    totals: GcStats,
}

impl Heap {
    pub fn new() -> Result<Self, GcError> {
        Self::with_config(GcConfig::default())
    }

    pub fn with_config(config: GcConfig) -> Result<Self, GcError> {
        let read_only = Region::map(
            region_base(READ_ONLY_REGION),
            RegionKind::ReadOnly,
            config.read_only_space_words,
        )?;
        let static_space = Region::map(
            region_base(STATIC_REGION),
            RegionKind::Static,
            config.static_space_words,
        )?;

        let mut heap = Heap {
            regions: vec![Some(read_only), Some(static_space)],
            free_slots: Vec::new(),
            open: [None; 3],
            config,
            handles: SlotMap::with_key(),
            in_gc: false,
            icache: Box::new(LoggingFlusher),
            gc_count: 0,
            meta_total_allocated: 0,
            meta_high_water_mark: 0,
            totals: GcStats::default(),
        };
        heap.init_static_symbols()?;
        Ok(heap)
    }

    fn init_static_symbols(&mut self) -> Result<(), GcError> {
        for (sym, value) in [
            (NIL, NIL),
            (T, T),
            (EMPTY_HASH_SLOT, LispObj::header(UNBOUND_MARKER_WIDETAG, 0)),
        ] {
            let addr = self.allocate_static(symbol::SIZE)?;
            debug_assert_eq!(addr, sym.native_pointer());
            self.store(addr, LispObj::header(SYMBOL_HEADER_WIDETAG, symbol::SIZE - 1));
            self.store_slot(addr, symbol::VALUE, value);
            self.store_slot(addr, symbol::HASH, LispObj::fixnum(0));
            self.store_slot(addr, symbol::PLIST, NIL);
            self.store_slot(addr, symbol::NAME, NIL);
            self.store_slot(addr, symbol::PACKAGE, NIL);
        }
        Ok(())
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub fn metadata(&self) -> HeapMeta {
        HeapMeta {
            currently_allocated: self.dynamic_words_in_use(),
            gc_count: self.gc_count,
            total_allocated: self.meta_total_allocated,
            high_water_mark: self.meta_high_water_mark,
            collected: self.totals,
        }
    }

    pub(crate) fn record_cycle(&mut self, stats: GcStats) {
        self.totals += stats;
    }

    fn dynamic_words_in_use(&self) -> u64 {
        self.regions
            .iter()
            .flatten()
            .filter(|r| matches!(r.kind, RegionKind::Dynamic(_)))
            .map(|r| r.fill)
            .sum()
    }

    pub fn set_icache_flusher(&mut self, flusher: Box<dyn IcacheFlusher>) {
        self.icache = flusher;
    }

    pub(crate) fn flush_icache(&mut self, start: Address, bytes: u64) {
        self.icache.flush_icache(start, bytes);
    }

    // ---------------------------------------------------------------------
    // Regions
    // ---------------------------------------------------------------------

    fn map_region(&mut self, kind: RegionKind, words: u64) -> Result<usize, GcError> {
        let index = match self.free_slots.pop() {
            Some(index) => index,
            None => {
                self.regions.push(None);
                self.regions.len() - 1
            }
        };
        match Region::map(region_base(index), kind, words) {
            Ok(region) => {
                self.regions[index] = Some(region);
                Ok(index)
            }
            Err(err) => {
                self.free_slots.push(index);
                Err(err)
            }
        }
    }

    pub fn region(&self, addr: Address) -> Option<&Region> {
        let index = (addr >> REGION_SHIFT).checked_sub(1)? as usize;
        self.regions
            .get(index)?
            .as_ref()
            .filter(|r| r.contains(addr))
    }

    fn region_mut(&mut self, addr: Address) -> Option<&mut Region> {
        let index = (addr >> REGION_SHIFT).checked_sub(1)? as usize;
        self.regions
            .get_mut(index)?
            .as_mut()
            .filter(|r| r.contains(addr))
    }

    pub(crate) fn region_at(&self, index: usize) -> Option<&Region> {
        self.regions.get(index)?.as_ref()
    }

    /// Indices of the regions allocation currently lands in, excluding
    /// from-space.
    pub(crate) fn live_dynamic_regions(&self) -> Vec<usize> {
        self.regions
            .iter()
            .enumerate()
            .filter_map(|(i, r)| match r {
                Some(r) if matches!(r.kind, RegionKind::Dynamic(_)) && !r.from_space => Some(i),
                _ => None,
            })
            .collect()
    }

    pub fn read_only_space(&self) -> &Region {
        self.fixed_region(READ_ONLY_REGION)
    }

    pub fn static_space(&self) -> &Region {
        self.fixed_region(STATIC_REGION)
    }

    fn fixed_region(&self, index: usize) -> &Region {
        match self.regions[index].as_ref() {
            Some(region) => region,
            None => lose!("fixed region {} is not mapped", index),
        }
    }

    /// All dynamic regions, from-space included while a collection runs.
    pub fn dynamic_regions(&self) -> impl Iterator<Item = &Region> {
        self.regions
            .iter()
            .flatten()
            .filter(|r| matches!(r.kind, RegionKind::Dynamic(_)))
    }

    /// Map a control stack of `words` words (the configured default when
    /// `None`) and return its address range.
    pub fn new_control_stack(&mut self, words: Option<u64>) -> Result<Range<Address>, GcError> {
        let words = words.unwrap_or(self.config.control_stack_words);
        let index = self.map_region(RegionKind::ControlStack, words)?;
        let base = region_base(index);
        if let Some(region) = self.regions[index].as_mut() {
            region.fill = words;
        }
        Ok(base..base + words * N_WORD_BYTES)
    }

    // ---------------------------------------------------------------------
    // Word access
    // ---------------------------------------------------------------------

    pub fn load(&self, addr: Address) -> LispObj {
        LispObj(self.load_raw(addr))
    }

    pub fn store(&mut self, addr: Address, obj: LispObj) {
        self.store_raw(addr, obj.raw());
    }

    pub fn load_raw(&self, addr: Address) -> u64 {
        match self.region(addr) {
            Some(region) => region.load(addr),
            None => lose!("load from unmapped address {:#x}", addr),
        }
    }

    pub fn store_raw(&mut self, addr: Address, value: u64) {
        match self.region_mut(addr) {
            Some(region) => region.store(addr, value),
            None => lose!("store to unmapped address {:#x}", addr),
        }
    }

    /// Load the `slot`th word of the object starting at `base`.
    pub fn load_slot(&self, base: Address, slot: u64) -> LispObj {
        self.load(base + slot * N_WORD_BYTES)
    }

    pub fn store_slot(&mut self, base: Address, slot: u64, obj: LispObj) {
        self.store(base + slot * N_WORD_BYTES, obj);
    }

    pub fn load_bytes(&self, addr: Address, len: usize) -> Vec<u8> {
        match self.region(addr) {
            Some(region) => {
                let off = region.offset(addr);
                region.mem[off..off + len].to_vec()
            }
            None => lose!("load from unmapped address {:#x}", addr),
        }
    }

    pub fn store_bytes(&mut self, addr: Address, bytes: &[u8]) {
        match self.region_mut(addr) {
            Some(region) => {
                let off = region.offset(addr);
                region.mem[off..off + bytes.len()].copy_from_slice(bytes);
            }
            None => lose!("store to unmapped address {:#x}", addr),
        }
    }

    pub(crate) fn copy_words(&mut self, from: Address, to: Address, nwords: u64) {
        for i in 0..nwords {
            let word = self.load_raw(from + i * N_WORD_BYTES);
            self.store_raw(to + i * N_WORD_BYTES, word);
        }
    }

    // ---------------------------------------------------------------------
    // Space predicates
    // ---------------------------------------------------------------------

    /// Whether `addr` lies in a region being evacuated.
    pub fn from_space_addr_p(&self, addr: Address) -> bool {
        self.region(addr).is_some_and(|r| r.from_space)
    }

    /// Whether `obj` is a pointer into from-space.
    pub fn from_space_p(&self, obj: LispObj) -> bool {
        obj.is_pointer() && self.from_space_addr_p(obj.native_pointer())
    }

    pub fn in_gc(&self) -> bool {
        self.in_gc
    }

    // ---------------------------------------------------------------------
    // Allocation
    // ---------------------------------------------------------------------

    /// Allocate `nwords` zeroed words on a page of the given kind.
    pub fn allocate(&mut self, nwords: u64, kind: PageKind) -> Result<Address, GcError> {
        if self.in_gc {
            return Err(GcError::AllocationDuringGc);
        }
        self.alloc_words(nwords, kind)
    }

    pub(crate) fn alloc_words(&mut self, nwords: u64, kind: PageKind) -> Result<Address, GcError> {
        let slot = kind.index();
        if let Some(index) = self.open[slot] {
            if let Some(addr) = self.regions[index].as_mut().and_then(|r| r.bump(nwords)) {
                self.note_allocation(nwords);
                return Ok(addr);
            }
        }

        let words = nwords.max(self.config.region_words);
        trace!("Opening {:?} region of {} words for {} word request", kind, words, nwords);
        let index = self.map_region(RegionKind::Dynamic(kind), words)?;
        self.open[slot] = Some(index);
        match self.regions[index].as_mut().and_then(|r| r.bump(nwords)) {
            Some(addr) => {
                self.note_allocation(nwords);
                Ok(addr)
            }
            None => Err(GcError::SpaceExhausted {
                space: "dynamic",
                words: nwords,
            }),
        }
    }

    fn note_allocation(&mut self, nwords: u64) {
        if self.in_gc {
            return;
        }
        self.meta_total_allocated += nwords;
        self.meta_high_water_mark = self.meta_high_water_mark.max(self.dynamic_words_in_use());
    }

    pub fn allocate_static(&mut self, nwords: u64) -> Result<Address, GcError> {
        self.allocate_fixed(STATIC_REGION, "static", nwords)
    }

    pub fn allocate_read_only(&mut self, nwords: u64) -> Result<Address, GcError> {
        self.allocate_fixed(READ_ONLY_REGION, "read-only", nwords)
    }

    fn allocate_fixed(&mut self, index: usize, space: &'static str, nwords: u64) -> Result<Address, GcError> {
        self.regions[index]
            .as_mut()
            .and_then(|r| r.bump(nwords))
            .ok_or(GcError::SpaceExhausted { space, words: nwords })
    }

    // ---------------------------------------------------------------------
    // Collection bookkeeping
    // ---------------------------------------------------------------------

    /// Turn every dynamic region into from-space. Subsequent allocation
    /// opens fresh to-space regions.
    pub(crate) fn flip(&mut self) {
        if self.in_gc {
            lose!("Recursive GC");
        }
        self.in_gc = true;
        self.gc_count += 1;
        for region in self.regions.iter_mut().flatten() {
            if matches!(region.kind, RegionKind::Dynamic(_)) {
                region.from_space = true;
            }
        }
        self.open = [None; 3];
        debug!("Flipped; from-space holds {} words", self.from_space_words());
    }

    fn from_space_words(&self) -> u64 {
        self.regions
            .iter()
            .flatten()
            .filter(|r| r.from_space)
            .map(|r| r.fill)
            .sum()
    }

    /// Unmap from-space once nothing can refer to it any more.
    pub(crate) fn release_from_space(&mut self) {
        let mut released = 0;
        for (index, slot) in self.regions.iter_mut().enumerate() {
            if slot.as_ref().is_some_and(|r| r.from_space) {
                *slot = None;
                self.free_slots.push(index);
                released += 1;
            }
        }
        self.in_gc = false;
        self.meta_high_water_mark = self.meta_high_water_mark.max(self.dynamic_words_in_use());
        debug!("Released {} from-space regions", released);
    }

    // ---------------------------------------------------------------------
    // Handles
    // ---------------------------------------------------------------------

    /// Register `obj` as a root.
    pub fn acquire_handle(&mut self, obj: LispObj) -> Handle {
        let key = self.handles.insert(obj);
        Handle { key }
    }

    pub fn get_handle(&self, handle: &Handle) -> LispObj {
        self.handles[handle.key]
    }

    pub fn set_handle(&mut self, handle: &Handle, obj: LispObj) {
        self.handles[handle.key] = obj;
    }

    pub fn release_handle(&mut self, handle: Handle) {
        self.handles.remove(handle.key);
    }

    pub(crate) fn handle_values_mut(&mut self) -> impl Iterator<Item = &mut LispObj> {
        self.handles.values_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag_ptr::PointerKind;

    #[test]
    fn static_symbols_are_laid_out_back_to_back() {
        let heap = Heap::new().unwrap();
        for sym in [NIL, T, EMPTY_HASH_SLOT] {
            let hdr = heap.load(sym.native_pointer());
            assert_eq!(hdr.widetag(), SYMBOL_HEADER_WIDETAG);
        }
        assert_eq!(heap.load_slot(NIL.native_pointer(), symbol::VALUE), NIL);
        assert_eq!(heap.load_slot(T.native_pointer(), symbol::VALUE), T);
        assert_eq!(heap.static_space().fill_words(), 3 * symbol::SIZE);
    }

    #[test]
    fn allocation_is_zeroed_and_bumps() {
        let mut heap = Heap::new().unwrap();
        let a = heap.allocate(4, PageKind::Boxed).unwrap();
        let b = heap.allocate(2, PageKind::Boxed).unwrap();
        assert_eq!(b, a + 4 * N_WORD_BYTES);
        assert_eq!(heap.load_raw(a), 0);
        heap.store_raw(a, 0xdead_beef);
        assert_eq!(heap.load_raw(a), 0xdead_beef);
        assert_eq!(heap.metadata().currently_allocated, 6);
    }

    #[test]
    fn fixed_spaces_are_sized_by_config() {
        let config = GcConfig::default()
            .with_static_space_words(3 * symbol::SIZE + 4)
            .with_read_only_space_words(4);
        let mut heap = Heap::with_config(config).unwrap();
        assert_eq!(heap.static_space().capacity_words(), 3 * symbol::SIZE + 4);
        heap.allocate_static(4).unwrap();
        assert!(matches!(
            heap.allocate_static(2),
            Err(GcError::SpaceExhausted { space: "static", .. })
        ));
        heap.allocate_read_only(4).unwrap();
        assert!(matches!(
            heap.allocate_read_only(2),
            Err(GcError::SpaceExhausted { space: "read-only", .. })
        ));
    }

    #[test]
    fn page_kinds_get_separate_regions() {
        let mut heap = Heap::new().unwrap();
        let boxed = heap.allocate(2, PageKind::Boxed).unwrap();
        let unboxed = heap.allocate(2, PageKind::Unboxed).unwrap();
        let code = heap.allocate(2, PageKind::Code).unwrap();
        assert_eq!(
            heap.region(boxed).unwrap().kind(),
            RegionKind::Dynamic(PageKind::Boxed)
        );
        assert_eq!(
            heap.region(unboxed).unwrap().kind(),
            RegionKind::Dynamic(PageKind::Unboxed)
        );
        assert_eq!(heap.region(code).unwrap().kind(), RegionKind::Dynamic(PageKind::Code));
    }

    #[test]
    fn oversized_requests_get_their_own_region() {
        let mut heap = Heap::with_config(GcConfig::default().with_region_words(16)).unwrap();
        let small = heap.allocate(8, PageKind::Unboxed).unwrap();
        let big = heap.allocate(100, PageKind::Unboxed).unwrap();
        assert_ne!(small >> REGION_SHIFT, big >> REGION_SHIFT);
        assert_eq!(heap.region(big).unwrap().capacity_words(), 100);
    }

    #[test]
    fn flip_marks_from_space_and_release_unmaps_it() {
        let mut heap = Heap::new().unwrap();
        let old = heap.allocate(2, PageKind::Boxed).unwrap();
        let ptr = LispObj::from_pointer(old, PointerKind::List);
        assert!(!heap.from_space_p(ptr));

        heap.flip();
        assert!(heap.from_space_p(ptr));
        assert!(!heap.from_space_p(NIL));
        assert!(matches!(
            heap.allocate(2, PageKind::Boxed),
            Err(GcError::AllocationDuringGc)
        ));
        let new = heap.alloc_words(2, PageKind::Boxed).unwrap();
        assert!(!heap.from_space_addr_p(new));

        heap.release_from_space();
        assert!(heap.region(old).is_none());
        assert!(!heap.in_gc());
    }

    #[test]
    #[should_panic(expected = "unmapped address")]
    fn loading_outside_any_region_is_fatal() {
        let heap = Heap::new().unwrap();
        heap.load(0x10);
    }

    #[test]
    fn handles_hold_objects() {
        let mut heap = Heap::new().unwrap();
        let h = heap.acquire_handle(T);
        assert_eq!(heap.get_handle(&h), T);
        heap.set_handle(&h, NIL);
        assert_eq!(heap.get_handle(&h), NIL);
        heap.release_handle(h);
    }
}
