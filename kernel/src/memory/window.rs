//! Scoped access to non-resident physical frames.
//!
//! A page table is only reachable through its physical frame, which is
//! normally not mapped anywhere. The kernel keeps one page of its own
//! virtual space reserved as a staging slot: point the slot's entry at the
//! target frame, invalidate that single TLB entry, and the frame is
//! editable at the staging address.

use crate::constants::memory::PAGE_SIZE;
use crate::memory::addr::{PhysAddr, VirtAddr};
use crate::memory::page_table::{EntryFlags, PageTable, PageTableEntry};
use crate::memory::tlb;

/// One page of physical memory, seen through a window mapping.
#[repr(C, align(4096))]
pub struct Frame {
    bytes: [u8; PAGE_SIZE],
}

impl Frame {
    pub const fn zeroed() -> Self {
        Frame {
            bytes: [0; PAGE_SIZE],
        }
    }

    pub fn zero(&mut self) {
        self.bytes.fill(0);
    }

    /// Views the frame as a page table. Sound because a `PageTable` is
    /// exactly one page, page-aligned, and valid for any bit pattern.
    pub fn as_table_mut(&mut self) -> &mut PageTable {
        unsafe { &mut *(self as *mut Frame as *mut PageTable) }
    }

    pub fn read<T: Copy>(&self, offset: usize) -> T {
        assert!(offset + core::mem::size_of::<T>() <= PAGE_SIZE);
        unsafe { core::ptr::read_unaligned(self.bytes.as_ptr().add(offset) as *const T) }
    }

    pub fn write<T: Copy>(&mut self, offset: usize, value: T) {
        assert!(offset + core::mem::size_of::<T>() <= PAGE_SIZE);
        unsafe { core::ptr::write_unaligned(self.bytes.as_mut_ptr().add(offset) as *mut T, value) }
    }
}

/// The seam between the paging code and the machine.
///
/// `with_frame` hands out exclusive, scoped access to one physical frame at
/// a time; `invalidate` drops any cached translation for a virtual page.
/// Tests substitute an in-memory frame store.
pub trait FrameWindow {
    fn with_frame<R>(&mut self, frame: PhysAddr, f: impl FnOnce(&mut Frame) -> R) -> R;

    fn invalidate(&mut self, vaddr: VirtAddr);
}

/// The hardware window: one reserved entry in the kernel's own page table.
pub struct StagingWindow {
    kernel_table: *mut PageTable,
    staging_vaddr: VirtAddr,
    staging_slot: usize,
}

// The staging slot is exclusively owned and only ever used behind the
// memory manager's lock.
unsafe impl Send for StagingWindow {}

impl StagingWindow {
    /// # Safety
    ///
    /// `kernel_table` must be the resident page table owning
    /// `staging_vaddr`, and nothing else may ever touch that slot or read
    /// through the staging address.
    pub unsafe fn new(kernel_table: *mut PageTable, staging_vaddr: VirtAddr) -> Self {
        StagingWindow {
            kernel_table,
            staging_vaddr,
            staging_slot: staging_vaddr.table_index(),
        }
    }
}

impl FrameWindow for StagingWindow {
    fn with_frame<R>(&mut self, frame: PhysAddr, f: impl FnOnce(&mut Frame) -> R) -> R {
        unsafe {
            // The TLB must be invalidated on every remap, or the access
            // below goes through a stale translation. The slot stays
            // pointed at `frame` afterwards; the next use remaps it.
            (&mut (*self.kernel_table))[self.staging_slot] =
                PageTableEntry::new(frame, EntryFlags::PRESENT | EntryFlags::WRITABLE);
            tlb::flush(self.staging_vaddr);
            f(&mut *(self.staging_vaddr.as_u32() as usize as *mut Frame))
        }
    }

    fn invalidate(&mut self, vaddr: VirtAddr) {
        tlb::flush(vaddr);
    }
}
