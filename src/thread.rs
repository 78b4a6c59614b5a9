//! Mutator thread state as the collector sees it: a control stack of call
//! frames and the register files saved by interrupts.
//!
//! The control stack grows upward. A frame starts with the caller's frame
//! pointer (a raw address, zero for the outermost frame), then the saved
//! return address (a return-PC object, or NIL when the frame was
//! interrupted before it could save one), then the code object, then the
//! frame's locals.

use std::ops::Range;

use log::warn;

use crate::{
    error::GcError,
    heap::{Heap, NIL},
    tag_ptr::{Address, LispObj, FUN_POINTER_LOWTAG, N_WORD_BYTES},
    widetag::{CODE_HEADER_WIDETAG, RETURN_PC_HEADER_WIDETAG, SIMPLE_FUN_HEADER_WIDETAG},
};

pub const FRAME_OLD_CONT: u64 = 0;
pub const FRAME_SAVED_LRA: u64 = 1;
pub const FRAME_CODE: u64 = 2;
pub const FRAME_HEADER_WORDS: u64 = 3;

/// Words cleared per step of [`ThreadState::scrub_control_stack`].
const SCRUB_BLOCK_WORDS: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterId {
    Pc,
    Npc,
    Gpr(usize),
}

/// Which registers of a saved context hold what.
#[derive(Debug, Clone)]
pub struct RegisterLayout {
    pub n_regs: usize,
    /// Registers that always hold tagged words.
    pub boxed: Vec<usize>,
    /// Registers that may point into the middle of an object.
    pub interior: Vec<RegisterId>,
    pub cfp: usize,
    pub csp: usize,
    pub ocfp: usize,
    pub lra: usize,
    pub code: usize,
}

impl RegisterLayout {
    pub const SPARC_A0: usize = 16;
    pub const SPARC_OCFP: usize = 22;
    pub const SPARC_LRA: usize = 23;
    pub const SPARC_FDEFN: usize = 24;
    pub const SPARC_LEXENV: usize = 25;
    pub const SPARC_L0: usize = 26;
    pub const SPARC_CODE: usize = 29;
    pub const SPARC_LIP: usize = 31;
    pub const SPARC_CSP: usize = 3;
    pub const SPARC_CFP: usize = 4;

    pub fn sparc() -> Self {
        let mut boxed: Vec<usize> = (Self::SPARC_A0..Self::SPARC_A0 + 6).collect();
        boxed.extend([
            Self::SPARC_FDEFN,
            Self::SPARC_LEXENV,
            Self::SPARC_OCFP,
            Self::SPARC_LRA,
            Self::SPARC_L0,
            Self::SPARC_CODE,
        ]);
        RegisterLayout {
            n_regs: 32,
            boxed,
            interior: vec![RegisterId::Pc, RegisterId::Npc, RegisterId::Gpr(Self::SPARC_LIP)],
            cfp: Self::SPARC_CFP,
            csp: Self::SPARC_CSP,
            ocfp: Self::SPARC_OCFP,
            lra: Self::SPARC_LRA,
            code: Self::SPARC_CODE,
        }
    }
}

/// One saved execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile {
    regs: Vec<LispObj>,
    pc: LispObj,
    npc: LispObj,
}

impl RegisterFile {
    pub fn new(layout: &RegisterLayout) -> Self {
        RegisterFile {
            regs: vec![LispObj::ZERO; layout.n_regs],
            pc: LispObj::ZERO,
            npc: LispObj::ZERO,
        }
    }

    pub fn get(&self, id: RegisterId) -> LispObj {
        match id {
            RegisterId::Pc => self.pc,
            RegisterId::Npc => self.npc,
            RegisterId::Gpr(i) => self.regs[i],
        }
    }

    pub fn set(&mut self, id: RegisterId, value: LispObj) {
        *self.slot_mut(id) = value;
    }

    pub fn slot_mut(&mut self, id: RegisterId) -> &mut LispObj {
        match id {
            RegisterId::Pc => &mut self.pc,
            RegisterId::Npc => &mut self.npc,
            RegisterId::Gpr(i) => &mut self.regs[i],
        }
    }

    pub fn register(&self, i: usize) -> LispObj {
        self.regs[i]
    }

    pub fn set_register(&mut self, i: usize, value: LispObj) {
        self.regs[i] = value;
    }
}

/// Where a paused call will return to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    pub frame: Address,
    pub interrupted: bool,
    pub code: Option<Address>,
    pub lra: LispObj,
    /// Byte offset from the start of the code's instructions.
    pub pc: u64,
}

pub struct ThreadState {
    layout: RegisterLayout,
    stack: Range<Address>,
    frame_pointer: Address,
    stack_pointer: Address,
    contexts: Vec<RegisterFile>,
}

impl ThreadState {
    pub fn new(heap: &mut Heap, layout: RegisterLayout) -> Result<Self, GcError> {
        let stack = heap.new_control_stack(None)?;
        Ok(ThreadState {
            layout,
            stack_pointer: stack.start,
            stack,
            frame_pointer: 0,
            contexts: Vec::new(),
        })
    }

    pub fn layout(&self) -> &RegisterLayout {
        &self.layout
    }

    pub fn stack_bounds(&self) -> Range<Address> {
        self.stack.clone()
    }

    pub fn frame_pointer(&self) -> Address {
        self.frame_pointer
    }

    pub fn stack_pointer(&self) -> Address {
        self.stack_pointer
    }

    /// Push a frame returning to `lra` and running `code`; returns its
    /// frame pointer.
    pub fn push_frame(
        &mut self,
        heap: &mut Heap,
        lra: LispObj,
        code: LispObj,
        locals: &[LispObj],
    ) -> Result<Address, GcError> {
        let nwords = FRAME_HEADER_WORDS + locals.len() as u64;
        let fp = self.stack_pointer;
        if fp + nwords * N_WORD_BYTES > self.stack.end {
            return Err(GcError::SpaceExhausted {
                space: "control stack",
                words: nwords,
            });
        }
        heap.store_raw(fp, self.frame_pointer);
        heap.store_slot(fp, FRAME_SAVED_LRA, lra);
        heap.store_slot(fp, FRAME_CODE, code);
        for (i, local) in locals.iter().enumerate() {
            heap.store_slot(fp, FRAME_HEADER_WORDS + i as u64, *local);
        }
        self.frame_pointer = fp;
        self.stack_pointer = fp + nwords * N_WORD_BYTES;
        Ok(fp)
    }

    pub fn pop_frame(&mut self, heap: &Heap) {
        if self.frame_pointer == 0 {
            return;
        }
        self.stack_pointer = self.frame_pointer;
        self.frame_pointer = heap.load_raw(self.frame_pointer);
    }

    pub fn push_interrupt_context(&mut self, context: RegisterFile) {
        self.contexts.push(context);
    }

    pub fn pop_interrupt_context(&mut self) -> Option<RegisterFile> {
        self.contexts.pop()
    }

    pub fn interrupt_contexts(&self) -> &[RegisterFile] {
        &self.contexts
    }

    pub(crate) fn interrupt_contexts_mut(&mut self) -> &mut [RegisterFile] {
        &mut self.contexts
    }

    /// Each frame's start and end, innermost first. The walk stops at the
    /// outermost frame or at the first frame pointer outside the stack.
    pub fn frame_extents(&self, heap: &Heap) -> Vec<Range<Address>> {
        let mut out = Vec::new();
        let mut fp = self.frame_pointer;
        let mut end = self.stack_pointer;
        while fp != 0 {
            if fp < self.stack.start || fp >= end {
                warn!("Bogus frame pointer {:#x}, ending stack walk", fp);
                break;
            }
            out.push(fp..end);
            let caller = heap.load_raw(fp);
            if caller == fp {
                break;
            }
            end = fp;
            fp = caller;
        }
        out
    }

    fn valid_frame_p(&self, frame: Address) -> bool {
        frame >= self.stack.start && frame < self.stack_pointer
    }

    /// Return addresses of every paused call, innermost first.
    pub fn call_frames(&self, heap: &Heap) -> Vec<CallInfo> {
        let mut info = CallInfo {
            frame: self.frame_pointer,
            interrupted: false,
            code: None,
            lra: LispObj::ZERO,
            pc: 0,
        };
        let mut out = Vec::new();
        while self.previous_info(heap, &mut info) {
            out.push(info.clone());
        }
        out
    }

    fn previous_info(&self, heap: &Heap, info: &mut CallInfo) -> bool {
        if !self.valid_frame_p(info.frame) {
            warn!("Bogus callee value ({:#x})", info.frame);
            return false;
        }
        let this_frame = info.frame;
        info.lra = heap.load_slot(this_frame, FRAME_SAVED_LRA);
        info.frame = heap.load_raw(this_frame + FRAME_OLD_CONT * N_WORD_BYTES);
        info.interrupted = false;

        if info.frame == 0 || info.frame == this_frame {
            return false;
        }

        if info.lra == NIL {
            // Interrupted: the most recent context running in the caller
            // frame knows where it was.
            let context = self
                .contexts
                .iter()
                .rev()
                .find(|ctx| ctx.register(self.layout.cfp).raw() == info.frame);
            if let Some(context) = context {
                self.call_info_from_context(heap, info, context);
            }
        } else {
            info.code = code_pointer(heap, info.lra);
            info.pc = pc_offset(heap, info.code, info.lra.native_pointer());
        }
        true
    }

    fn call_info_from_context(&self, heap: &Heap, info: &mut CallInfo, context: &RegisterFile) {
        info.interrupted = true;
        let code_reg = context.register(self.layout.code);
        let pc = if code_reg.lowtag() == FUN_POINTER_LOWTAG {
            // Died calling a function before CODE was set up.
            info.frame = context.register(self.layout.ocfp).raw();
            info.lra = context.register(self.layout.lra);
            info.code = code_pointer(heap, info.lra);
            info.lra.native_pointer()
        } else {
            info.frame = context.register(self.layout.cfp).raw();
            info.code = code_pointer(heap, code_reg);
            info.lra = NIL;
            context.get(RegisterId::Pc).raw()
        };
        info.pc = pc_offset(heap, info.code, pc);
    }

    /// Zero the stack above the stack pointer so stale words cannot be
    /// mistaken for live data. Stops at the first block that is already
    /// clear. Returns the number of words cleared.
    pub fn scrub_control_stack(&self, heap: &mut Heap) -> u64 {
        let mut cleared = 0;
        let mut addr = self.stack_pointer;
        while addr < self.stack.end {
            let block_end = (addr + SCRUB_BLOCK_WORDS * N_WORD_BYTES).min(self.stack.end);
            let mut dirty = false;
            while addr < block_end {
                if heap.load_raw(addr) != 0 {
                    heap.store_raw(addr, 0);
                    cleared += 1;
                    dirty = true;
                }
                addr += N_WORD_BYTES;
            }
            if !dirty {
                break;
            }
        }
        cleared
    }
}

/// The code object `obj` points into, if it is a code object, a simple
/// fun or a return-PC.
pub fn code_pointer(heap: &Heap, obj: LispObj) -> Option<Address> {
    if !obj.is_pointer() {
        return None;
    }
    let addr = obj.native_pointer();
    heap.region(addr)?;
    let header = heap.load(addr);
    match header.widetag() {
        CODE_HEADER_WIDETAG => Some(addr),
        RETURN_PC_HEADER_WIDETAG | SIMPLE_FUN_HEADER_WIDETAG => match header.header_value() {
            0 => None,
            len => Some(addr - len * N_WORD_BYTES),
        },
        _ => None,
    }
}

fn pc_offset(heap: &Heap, code: Option<Address>, pc: u64) -> u64 {
    match code {
        Some(code) => {
            let nheader = heap.load(code).header_value();
            pc.wrapping_sub(code + nheader * N_WORD_BYTES)
        }
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_chain_back_to_the_outermost() {
        let mut heap = Heap::new().unwrap();
        let mut thread = ThreadState::new(&mut heap, RegisterLayout::sparc()).unwrap();
        let outer = thread.push_frame(&mut heap, NIL, NIL, &[]).unwrap();
        let inner = thread
            .push_frame(&mut heap, NIL, NIL, &[LispObj::fixnum(1), LispObj::fixnum(2)])
            .unwrap();

        let extents = thread.frame_extents(&heap);
        assert_eq!(extents, vec![inner..thread.stack_pointer(), outer..inner]);

        thread.pop_frame(&heap);
        assert_eq!(thread.frame_pointer(), outer);
        assert_eq!(thread.stack_pointer(), inner);
    }

    #[test]
    fn call_frames_use_the_saved_return_pc() {
        let mut heap = Heap::new().unwrap();
        let code = heap.make_code(&[], 16, &[]).unwrap();
        let lra = heap.make_return_pc(code, 4).unwrap();
        let mut thread = ThreadState::new(&mut heap, RegisterLayout::sparc()).unwrap();
        let outer = thread.push_frame(&mut heap, NIL, code, &[]).unwrap();
        thread.push_frame(&mut heap, lra, NIL, &[]).unwrap();

        let frames = thread.call_frames(&heap);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame, outer);
        assert!(!frames[0].interrupted);
        assert_eq!(frames[0].code, Some(code.native_pointer()));
        assert_eq!(frames[0].pc, 4 * N_WORD_BYTES);
    }

    #[test]
    fn interrupted_frames_take_their_pc_from_the_context() {
        let mut heap = Heap::new().unwrap();
        let code = heap.make_code(&[], 16, &[]).unwrap();
        let layout = RegisterLayout::sparc();
        let mut thread = ThreadState::new(&mut heap, layout.clone()).unwrap();
        let outer = thread.push_frame(&mut heap, NIL, code, &[]).unwrap();
        thread.push_frame(&mut heap, NIL, NIL, &[]).unwrap();

        let (nheader, _) = heap.code_extent(code.native_pointer());
        let mut ctx = RegisterFile::new(&layout);
        ctx.set_register(layout.cfp, LispObj(outer));
        ctx.set_register(layout.code, code);
        ctx.set(
            RegisterId::Pc,
            LispObj(code.native_pointer() + nheader * N_WORD_BYTES + 12),
        );
        thread.push_interrupt_context(ctx);

        let frames = thread.call_frames(&heap);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].interrupted);
        assert_eq!(frames[0].frame, outer);
        assert_eq!(frames[0].lra, NIL);
        assert_eq!(frames[0].pc, 12);
    }

    #[test]
    fn bogus_frame_pointer_ends_the_walk() {
        let mut heap = Heap::new().unwrap();
        let mut thread = ThreadState::new(&mut heap, RegisterLayout::sparc()).unwrap();
        let fp = thread.push_frame(&mut heap, NIL, NIL, &[]).unwrap();
        heap.store_raw(fp, 0x10);
        assert_eq!(thread.frame_extents(&heap).len(), 1);
        // The bogus caller is reported once and the walk stops there.
        let frames = thread.call_frames(&heap);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame, 0x10);
    }

    #[test]
    fn scrubbing_clears_stale_words_above_the_stack_pointer() {
        let mut heap = Heap::new().unwrap();
        let mut thread = ThreadState::new(&mut heap, RegisterLayout::sparc()).unwrap();
        thread.push_frame(&mut heap, NIL, NIL, &[LispObj::fixnum(1); 4]).unwrap();
        thread.pop_frame(&heap);

        // Header, lra, code and four locals, less the zero outer link.
        assert_eq!(thread.scrub_control_stack(&mut heap), 6);
        let start = thread.stack_bounds().start;
        for i in 0..7 {
            assert_eq!(heap.load_raw(start + i * N_WORD_BYTES), 0);
        }
        assert_eq!(thread.scrub_control_stack(&mut heap), 0);
    }
}
