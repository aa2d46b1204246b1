//! Kernel memory management.
//!
//! Physical RAM is discovered from the firmware memory map and kept as a
//! stack of free spans; virtual space is carved out of a buddy-tree bitmap
//! over the whole 4 GiB; the two meet in the page tables, edited through a
//! single staging window. On top sit `malloc`/`free` and the boot-module
//! mapper.
//!
//! Everything here is single-threaded by design: interrupts stay disabled
//! for the whole init sequence, nothing in this module is called from
//! interrupt context, and the only lock is the mutex handing out the
//! manager itself. Operations run to completion; exhaustion and misuse are
//! logged and reported through sentinels, never fixed up behind the
//! caller's back.

pub mod addr;
pub mod buddy;
pub mod frame_allocator;
pub mod heap;
pub mod modules;
pub mod page_table;
pub mod paging;
#[cfg(test)]
pub(crate) mod sim;
pub mod tlb;
pub mod window;

use spin::Mutex;

use crate::bootinfo::BootModule;
use crate::memory::addr::VirtAddr;
use crate::memory::buddy::VirtualBuddyAllocator;
use crate::memory::frame_allocator::PhysicalFrameStack;
use crate::memory::paging::Mapper;
use crate::memory::window::{FrameWindow, StagingWindow};

/// Everything the allocator operations need, in one place, so that
/// exclusive access is a visible precondition instead of an ambient
/// assumption.
pub struct MemoryManager<W: FrameWindow> {
    pub frames: PhysicalFrameStack,
    pub vspace: VirtualBuddyAllocator,
    pub mapper: Mapper<W>,
}

/// The kernel's memory manager; `None` until `init` has run to completion.
pub static MEMORY: Mutex<Option<MemoryManager<StagingWindow>>> = Mutex::new(None);

pub fn is_initialized() -> bool {
    MEMORY.lock().is_some()
}

pub fn with_memory_manager<F, R>(f: F) -> R
where
    F: FnOnce(&mut MemoryManager<StagingWindow>) -> R,
{
    let mut guard = MEMORY.lock();
    match &mut *guard {
        Some(manager) => f(manager),
        None => panic!("memory manager is not initialized"),
    }
}

pub fn malloc(size: usize) -> Option<VirtAddr> {
    with_memory_manager(|manager| manager.malloc(size))
}

pub fn free(ptr: VirtAddr) {
    with_memory_manager(|manager| manager.free(ptr))
}

pub fn map_module(module: &BootModule) -> Option<VirtAddr> {
    with_memory_manager(|manager| manager.map_module(module))
}

#[cfg(target_os = "none")]
mod boot {
    use arrayvec::ArrayVec;
    use log::{error, info};

    use super::{MemoryManager, Mapper, PhysicalFrameStack, StagingWindow, VirtualBuddyAllocator, MEMORY};
    use crate::bootinfo::{KernelLocation, MultibootInfo};
    use crate::constants::memory::{
        BUDDY_BITMAP_BYTES, BUDDY_SPACE_LOG2, EXPECTED_BOOT_MODULES, FRAME_STACK_SLOTS,
        MAX_RESERVED_SPANS, PAGE_SIZE,
    };
    use crate::memory::addr::{MemorySpan, PhysAddr};
    use crate::memory::page_table::PageTable;

    extern "C" {
        /// Set up by the boot assembly, 4 KiB aligned.
        static mut page_directory: PageTable;
        /// The kernel's own page table, covering the higher-half image.
        static mut os_page_table: PageTable;
    }

    /// Brings up the whole memory subsystem from the loader handoff.
    ///
    /// # Safety
    ///
    /// Must run once, with interrupts disabled, with `boot_info` valid and
    /// the boot page tables live. On success the manager is published in
    /// [`MEMORY`]; on failure it stays `None` and the kernel limps on
    /// without an allocator.
    pub unsafe fn init(boot_info: &MultibootInfo, mut kernel: KernelLocation) {
        let module_count = boot_info.mods_count as usize;
        if module_count != EXPECTED_BOOT_MODULES {
            error!(
                "expected {} boot modules, found {}; leaving paging uninitialized",
                EXPECTED_BOOT_MODULES, module_count
            );
            return;
        }

        // Bookkeeping pages go directly after the kernel image: the staging
        // slot, the frame stack's storage page, then the buddy bitmap. All
        // of it lands in the region the kernel's own page table already
        // covers.
        let staging_vaddr = kernel.virtual_end;
        kernel.virtual_end = kernel.virtual_end.offset(PAGE_SIZE as u32);
        let stack_vaddr = kernel.virtual_end;
        kernel.virtual_end = kernel.virtual_end.offset(PAGE_SIZE as u32);
        let bitmap_vaddr = kernel.virtual_end;
        kernel.virtual_end = kernel.virtual_end.offset(BUDDY_BITMAP_BYTES as u32);

        let window = StagingWindow::new(core::ptr::addr_of_mut!(os_page_table), staging_vaddr);
        let directory = &mut *core::ptr::addr_of_mut!(page_directory);
        let mut mapper = Mapper::new(directory, window);

        // The kernel image and the boot modules never enter the free pool.
        let mut reserved: ArrayVec<MemorySpan, MAX_RESERVED_SPANS> = ArrayVec::new();
        reserved.push(MemorySpan::new(
            kernel.physical_start.align_down(),
            kernel.physical_end.align_up(),
        ));
        for module in boot_info.modules() {
            reserved.push(MemorySpan::new(
                PhysAddr::new(module.mod_start).align_down(),
                PhysAddr::new(module.mod_end).align_up(),
            ));
        }

        let frames = PhysicalFrameStack::init(
            boot_info.available_regions(),
            &reserved,
            |first| {
                mapper.map_page(stack_vaddr, first);
                unsafe {
                    core::slice::from_raw_parts_mut(
                        stack_vaddr.as_u32() as *mut MemorySpan,
                        FRAME_STACK_SLOTS,
                    )
                }
            },
        );
        let Some(mut frames) = frames else {
            error!("cannot set up paging without free physical memory");
            return;
        };

        // Materialize the buddy bitmap, then mark everything the kernel
        // already occupies (image plus the bookkeeping pages above) as
        // permanently claimed.
        if !mapper.map_range(bitmap_vaddr, BUDDY_BITMAP_BYTES, &mut frames) {
            error!("could not materialize the virtual space bitmap");
            return;
        }
        let bits =
            core::slice::from_raw_parts_mut(bitmap_vaddr.as_u32() as *mut u8, BUDDY_BITMAP_BYTES);
        let mut vspace = VirtualBuddyAllocator::new(bits, BUDDY_SPACE_LOG2);
        vspace.seed_reserved(kernel.virtual_start, kernel.virtual_end);

        *MEMORY.lock() = Some(MemoryManager {
            frames,
            vspace,
            mapper,
        });
        info!("memory manager initialized");
    }
}

#[cfg(target_os = "none")]
pub use boot::init;
