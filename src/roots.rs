use log::{debug, trace};

use crate::{
    gc::Collector,
    tag_ptr::{LispObj, LOWTAG_MASK, N_WORD_BYTES},
    thread::{RegisterFile, RegisterId, RegisterLayout, ThreadState},
};

/// A place outside the heap that holds a root.
pub trait RootSlot {
    fn read(&self) -> LispObj;
    fn write(&mut self, value: LispObj);
}

impl RootSlot for LispObj {
    fn read(&self) -> LispObj {
        *self
    }

    fn write(&mut self, value: LispObj) {
        *self = value;
    }
}

/// The boxed register whose untagged value is closest below `pointer`,
/// and the distance to it. Non-pointer registers are never chosen.
pub fn pair_interior_pointer(
    context: &RegisterFile,
    layout: &RegisterLayout,
    pointer: u64,
) -> Option<(usize, u64)> {
    let mut best: Option<(usize, u64)> = None;
    for &index in &layout.boxed {
        let reg = context.register(index);
        if !reg.is_pointer() || reg.native_pointer() > pointer {
            continue;
        }
        let offset = pointer - reg.native_pointer();
        if best.map_or(true, |(_, saved)| offset < saved) {
            best = Some((index, offset));
        }
    }
    best
}

impl Collector<'_> {
    /// Relocate the object a root refers to, writing the slot back only
    /// if the value changed.
    pub fn scavenge_root<S: RootSlot + ?Sized>(&mut self, slot: &mut S) {
        let old = slot.read();
        let new = self.scavenge_value(old);
        if new != old {
            slot.write(new);
        }
    }

    pub fn scavenge_handles(&mut self) {
        let mut roots: Vec<LispObj> = self.heap.handle_values_mut().map(|v| *v).collect();
        debug!("Scavenging {} handles", roots.len());
        for root in roots.iter_mut() {
            self.scavenge_root(root);
        }
        for (slot, root) in self.heap.handle_values_mut().zip(roots) {
            slot.write(root);
        }
    }

    /// Scavenge the boxed registers of a saved context. Interior pointers
    /// are re-derived from whichever boxed register they were paired with.
    pub fn scavenge_interrupt_context(&mut self, context: &mut RegisterFile, layout: &RegisterLayout) {
        let pairs: Vec<(RegisterId, Option<(usize, u64)>)> = layout
            .interior
            .iter()
            .map(|&id| (id, pair_interior_pointer(context, layout, context.get(id).raw())))
            .collect();

        for &index in &layout.boxed {
            self.scavenge_root(context.slot_mut(RegisterId::Gpr(index)));
        }

        for (id, pair) in pairs {
            if let Some((base_reg, offset)) = pair {
                let base = context.register(base_reg).raw() & !LOWTAG_MASK;
                let fixed = LispObj(base + offset);
                if fixed != context.get(id) {
                    trace!("Fixing interior pointer {:?} to {:#x}", id, fixed.raw());
                    context.set(id, fixed);
                }
            }
        }
    }

    /// Scavenge every frame on a thread's control stack.
    pub fn scavenge_control_stack(&mut self, thread: &ThreadState) {
        for frame in thread.frame_extents(self.heap) {
            let nwords = (frame.end - frame.start) / N_WORD_BYTES;
            trace!("Scavenging frame {:#x}, {} words", frame.start, nwords);
            self.scavenge(frame.start + N_WORD_BYTES, nwords - 1);
        }
    }

    pub fn scavenge_thread(&mut self, thread: &mut ThreadState) {
        debug!(
            "Scavenging thread: {} interrupt contexts, stack {:#x}..{:#x}",
            thread.interrupt_contexts().len(),
            thread.stack_bounds().start,
            thread.stack_pointer()
        );
        let layout = thread.layout().clone();
        for context in thread.interrupt_contexts_mut().iter_mut() {
            self.scavenge_interrupt_context(context, &layout);
        }
        self.scavenge_control_stack(thread);
    }
}
