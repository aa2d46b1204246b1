//! Physical frame allocation.
//!
//! Free RAM is a stack of disjoint spans. Allocation peels one frame off
//! the start of the top span and pops the span once drained; freeing grows
//! the top span when the frame happens to be adjacent, and otherwise pushes
//! a fresh one-page span. Only the top is ever examined, so frames freed
//! out of locality order stay in separate entries.

use arrayvec::ArrayVec;
use log::{error, info};

use crate::constants::memory::{MAX_RESERVED_SPANS, PAGE_SIZE};
use crate::memory::addr::{MemorySpan, PhysAddr};

/// Most pieces a single firmware region can shatter into: one more than
/// the reserved spans punched out of it.
const MAX_SPLITS: usize = MAX_RESERVED_SPANS + 1;

pub struct PhysicalFrameStack {
    slots: &'static mut [MemorySpan],
    len: usize,
}

impl PhysicalFrameStack {
    pub fn new(slots: &'static mut [MemorySpan]) -> Self {
        PhysicalFrameStack { slots, len: 0 }
    }

    /// Builds the stack from the firmware's available regions minus the
    /// reserved spans (kernel image, boot modules).
    ///
    /// The stack needs a page of storage before it can track anything, so
    /// the very first free page is not pushed: it is handed to `bootstrap`,
    /// which maps it and returns the slot array it now backs. Only the
    /// remainder of that first piece becomes the first logical entry.
    /// Returns `None` when the map yields no free page at all.
    pub fn init<I, F>(regions: I, reserved: &[MemorySpan], bootstrap: F) -> Option<Self>
    where
        I: IntoIterator<Item = MemorySpan>,
        F: FnOnce(PhysAddr) -> &'static mut [MemorySpan],
    {
        info!("populating the free physical memory stack");
        let mut stack: Option<PhysicalFrameStack> = None;
        let mut bootstrap = Some(bootstrap);
        for region in regions {
            let mut pieces: ArrayVec<MemorySpan, MAX_SPLITS> = ArrayVec::new();
            region.subtract_all(reserved, &mut pieces);
            for mut piece in pieces {
                if stack.is_none() {
                    let bootstrap = bootstrap.take().expect("storage bootstrapped once");
                    info!("backing the stack itself with {:?}", piece.start);
                    let slots = bootstrap(piece.start);
                    piece.start = piece.start.offset(PAGE_SIZE as u32);
                    stack = Some(PhysicalFrameStack::new(slots));
                    if piece.is_empty() {
                        continue;
                    }
                }
                stack
                    .as_mut()
                    .expect("stack storage exists")
                    .push_span(piece);
            }
        }
        if stack.is_none() {
            error!("no free physical memory to host the frame stack");
        }
        stack
    }

    /// Pushes a whole free span. Also how more memory would be donated to
    /// the pool after init.
    pub fn push_span(&mut self, span: MemorySpan) {
        debug_assert!(!span.is_empty());
        debug_assert!(span.start.is_page_aligned() && span.end.is_page_aligned());
        if self.len == self.slots.len() {
            error!("frame stack is full, dropping {:?}", span);
            return;
        }
        info!("pushing free physical span {:?}", span);
        self.slots[self.len] = span;
        self.len += 1;
    }

    /// Takes one frame off the top span. An empty stack means physical
    /// memory is exhausted; that is reported, not repaired.
    pub fn pop(&mut self) -> Option<PhysAddr> {
        if self.len == 0 {
            error!("no physical memory left on the stack");
            return None;
        }
        let top = &mut self.slots[self.len - 1];
        if top.len() < PAGE_SIZE as u32 {
            error!("top span {:?} is smaller than a frame", top);
            return None;
        }
        let frame = top.start;
        top.start = top.start.offset(PAGE_SIZE as u32);
        if top.is_empty() {
            self.len -= 1;
        }
        Some(frame)
    }

    /// Returns one frame to the pool. Adjacent to the top span on either
    /// side extends it; anything else becomes a new one-page span.
    pub fn push(&mut self, frame: PhysAddr) {
        if !frame.is_page_aligned() {
            error!("tried to free non-frame physical address {:?}", frame);
            return;
        }
        if self.len > 0 {
            let top = &mut self.slots[self.len - 1];
            if frame == top.end {
                top.end = top.end.offset(PAGE_SIZE as u32);
                return;
            }
            if frame.offset(PAGE_SIZE as u32) == top.start {
                top.start = frame;
                return;
            }
        }
        self.push_span(MemorySpan::new(frame, frame.offset(PAGE_SIZE as u32)));
    }

    pub fn top(&self) -> Option<MemorySpan> {
        self.len.checked_sub(1).map(|i| self.slots[i])
    }

    pub fn spans(&self) -> &[MemorySpan] {
        &self.slots[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start: u32, end: u32) -> MemorySpan {
        MemorySpan::new(PhysAddr::new(start), PhysAddr::new(end))
    }

    fn storage() -> &'static mut [MemorySpan] {
        Box::leak(vec![MemorySpan::default(); 512].into_boxed_slice())
    }

    fn stack_over(regions: &[MemorySpan], reserved: &[MemorySpan]) -> PhysicalFrameStack {
        PhysicalFrameStack::init(regions.iter().copied(), reserved, |_| storage())
            .expect("regions hold at least one free page")
    }

    #[test]
    fn init_yields_regions_minus_reserved() {
        let mut bootstrap_frame = None;
        let stack = PhysicalFrameStack::init(
            [span(0x10_0000, 0x50_0000)],
            &[span(0x20_0000, 0x30_0000)],
            |first| {
                bootstrap_frame = Some(first);
                storage()
            },
        )
        .unwrap();

        // The first free page hosts the stack itself.
        assert_eq!(bootstrap_frame, Some(PhysAddr::new(0x10_0000)));
        assert_eq!(
            stack.spans(),
            &[span(0x10_1000, 0x20_0000), span(0x30_0000, 0x50_0000)]
        );
        assert!(stack.spans().iter().all(|s| !s.is_empty()));
    }

    #[test]
    fn init_splits_regions_around_interior_reservations() {
        let stack = stack_over(
            &[span(0x0, 0x40_0000), span(0x100_0000, 0x100_2000)],
            &[span(0x10_0000, 0x20_0000)],
        );
        assert_eq!(
            stack.spans(),
            &[
                span(0x1000, 0x10_0000),
                span(0x20_0000, 0x40_0000),
                span(0x100_0000, 0x100_2000),
            ]
        );
    }

    #[test]
    fn init_without_any_free_page_fails() {
        let region = [span(0x10_0000, 0x20_0000)];
        let reserved = [span(0x10_0000, 0x20_0000)];
        assert!(PhysicalFrameStack::init(region, &reserved, |_| storage()).is_none());
    }

    #[test]
    fn pop_peels_frames_off_the_top_span() {
        let mut stack = stack_over(&[span(0x10_0000, 0x10_4000)], &[]);
        // 0x100000 went to storage; three frames remain.
        assert_eq!(stack.pop(), Some(PhysAddr::new(0x10_1000)));
        assert_eq!(stack.pop(), Some(PhysAddr::new(0x10_2000)));
        assert_eq!(stack.pop(), Some(PhysAddr::new(0x10_3000)));
        assert_eq!(stack.pop(), None);
        assert!(stack.is_empty());
    }

    #[test]
    fn pop_then_push_restores_the_top_span_exactly() {
        let mut stack = stack_over(&[span(0x10_0000, 0x18_0000)], &[]);
        let before = stack.top().unwrap();
        let frame = stack.pop().unwrap();
        stack.push(frame);
        assert_eq!(stack.top().unwrap(), before);
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn push_extends_the_top_span_at_its_end() {
        let mut stack = stack_over(&[span(0x10_0000, 0x12_0000)], &[]);
        let before = stack.top().unwrap();
        stack.push(before.end);
        assert_eq!(stack.top().unwrap(), span(0x10_1000, 0x12_1000));
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn push_of_distant_frame_starts_a_new_span() {
        let mut stack = stack_over(&[span(0x10_0000, 0x12_0000)], &[]);
        stack.push(PhysAddr::new(0x80_0000));
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.top().unwrap(), span(0x80_0000, 0x80_1000));
        // Frames freed out of locality order are not merged downward.
        stack.push(PhysAddr::new(0x10_F000));
        assert_eq!(stack.len(), 3);
    }

    #[test]
    fn misaligned_push_is_ignored() {
        let mut stack = stack_over(&[span(0x10_0000, 0x12_0000)], &[]);
        let before = stack.top().unwrap();
        stack.push(PhysAddr::new(0x10_0123));
        assert_eq!(stack.top().unwrap(), before);
        assert_eq!(stack.len(), 1);
    }
}
