//! Test doubles for the hardware seams.
//!
//! The real window edits frames through a staging mapping and `invlpg`;
//! neither works in a hosted test, so physical memory becomes a map of
//! lazily created, zero-filled frames and invalidation a no-op. Everything
//! above the `FrameWindow` trait runs unmodified.

use std::collections::BTreeMap;

use crate::memory::addr::{MemorySpan, PhysAddr, VirtAddr};
use crate::memory::buddy::VirtualBuddyAllocator;
use crate::memory::frame_allocator::PhysicalFrameStack;
use crate::memory::page_table::PageTable;
use crate::memory::paging::Mapper;
use crate::memory::window::{Frame, FrameWindow};
use crate::memory::MemoryManager;

pub struct SimPhysicalMemory {
    frames: BTreeMap<u32, Box<Frame>>,
}

impl SimPhysicalMemory {
    pub fn new() -> Self {
        SimPhysicalMemory {
            frames: BTreeMap::new(),
        }
    }
}

impl FrameWindow for SimPhysicalMemory {
    fn with_frame<R>(&mut self, frame: PhysAddr, f: impl FnOnce(&mut Frame) -> R) -> R {
        let frame = self
            .frames
            .entry(frame.align_down().as_u32())
            .or_insert_with(|| Box::new(Frame::zeroed()));
        f(frame)
    }

    fn invalidate(&mut self, _vaddr: VirtAddr) {}
}

/// Virtual space of the simulated machine: 2^18 bytes, 64 pages.
pub const SIM_SPACE_LOG2: u32 = 18;

/// A manager over a small simulated machine: half a megabyte of RAM at
/// 1 MiB, a bounded virtual space, an initially empty page directory.
pub fn manager() -> MemoryManager<SimPhysicalMemory> {
    manager_with(
        &[MemorySpan::new(
            PhysAddr::new(0x10_0000),
            PhysAddr::new(0x18_0000),
        )],
        &[],
    )
}

pub fn manager_with(
    regions: &[MemorySpan],
    reserved: &[MemorySpan],
) -> MemoryManager<SimPhysicalMemory> {
    let slots = Box::leak(vec![MemorySpan::default(); 64].into_boxed_slice());
    let frames = PhysicalFrameStack::init(regions.iter().copied(), reserved, move |_| slots)
        .expect("the simulated machine has free memory");
    let bits = Box::leak(
        vec![0u8; VirtualBuddyAllocator::bitmap_len(SIM_SPACE_LOG2)].into_boxed_slice(),
    );
    let vspace = VirtualBuddyAllocator::new(bits, SIM_SPACE_LOG2);
    let directory = Box::leak(Box::new(PageTable::new()));
    let mapper = Mapper::new(directory, SimPhysicalMemory::new());
    MemoryManager {
        frames,
        vspace,
        mapper,
    }
}
