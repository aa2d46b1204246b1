//! Multiboot boot information.
//!
//! The loader leaves its info structure in low physical memory; once the
//! higher half is live the kernel reads it through the fixed
//! `KERNEL_VIRTUAL_BASE` offset. Memory-map entries are self-describing:
//! each records its own size, *not counting the size field itself*, so the
//! cursor advances by `size + 4`.

use core::mem::size_of;

use crate::constants::memory::KERNEL_VIRTUAL_BASE;
use crate::memory::addr::{MemorySpan, PhysAddr, VirtAddr};

/// What a compliant bootloader leaves in EAX.
pub const MULTIBOOT_BOOTLOADER_MAGIC: u32 = 0x2BAD_B002;

/// Memory-map entry type for RAM the kernel may use.
pub const MEMORY_AVAILABLE: u32 = 1;

/// The multiboot information structure, as laid out by the loader.
#[repr(C)]
pub struct MultibootInfo {
    pub flags: u32,
    pub mem_lower: u32,
    pub mem_upper: u32,
    pub boot_device: u32,
    pub cmdline: u32,
    pub mods_count: u32,
    pub mods_addr: u32,
    syms: [u32; 4],
    pub mmap_length: u32,
    pub mmap_addr: u32,
}

impl MultibootInfo {
    /// # Safety
    ///
    /// `paddr` must be the address the loader handed over, with paging and
    /// the higher-half mapping already enabled.
    pub unsafe fn from_paddr(paddr: u32) -> &'static MultibootInfo {
        &*((paddr + KERNEL_VIRTUAL_BASE) as *const MultibootInfo)
    }

    pub fn memory_map(&self) -> MemoryMapIter {
        unsafe {
            MemoryMapIter::new(
                (self.mmap_addr + KERNEL_VIRTUAL_BASE) as *const u8,
                self.mmap_length,
            )
        }
    }

    /// Available-RAM regions, rounded inward to whole frames.
    pub fn available_regions(&self) -> impl Iterator<Item = MemorySpan> {
        self.memory_map()
            .filter(MemoryMapEntry::is_available)
            .map(|entry| entry.span())
            .filter(|span| !span.is_empty())
    }

    pub fn modules(&self) -> &[BootModule] {
        unsafe {
            core::slice::from_raw_parts(
                (self.mods_addr + KERNEL_VIRTUAL_BASE) as *const BootModule,
                self.mods_count as usize,
            )
        }
    }
}

/// One entry of the firmware memory map.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct MemoryMapEntry {
    pub size: u32,
    pub base_addr_low: u32,
    pub base_addr_high: u32,
    pub length_low: u32,
    pub length_high: u32,
    pub entry_type: u32,
}

impl MemoryMapEntry {
    pub fn is_available(&self) -> bool {
        self.entry_type == MEMORY_AVAILABLE
    }

    /// The entry's range as a page-aligned physical span.
    pub fn span(&self) -> MemorySpan {
        let base = self.base_addr_low as u64;
        MemorySpan::inner(base, base + self.length_low as u64)
    }
}

/// Walks the raw memory-map entry stream.
pub struct MemoryMapIter {
    cursor: *const u8,
    remaining: u32,
}

impl MemoryMapIter {
    /// # Safety
    ///
    /// `base` must point at `length` readable bytes of map entries.
    pub unsafe fn new(base: *const u8, length: u32) -> Self {
        MemoryMapIter {
            cursor: base,
            remaining: length,
        }
    }
}

impl Iterator for MemoryMapIter {
    type Item = MemoryMapEntry;

    fn next(&mut self) -> Option<MemoryMapEntry> {
        if self.remaining < size_of::<MemoryMapEntry>() as u32 {
            return None;
        }
        let entry = unsafe { core::ptr::read_unaligned(self.cursor as *const MemoryMapEntry) };
        // The size field does not count itself.
        let step = entry.size + 4;
        self.cursor = unsafe { self.cursor.add(step as usize) };
        self.remaining = self.remaining.saturating_sub(step);
        Some(entry)
    }
}

/// One boot module: a program image at `[mod_start, mod_end)` plus an
/// optional command-line string.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct BootModule {
    pub mod_start: u32,
    pub mod_end: u32,
    pub string: u32,
    pub reserved: u32,
}

/// Physical and virtual extents of the loaded kernel image.
#[derive(Clone, Copy, Debug)]
pub struct KernelLocation {
    pub physical_start: PhysAddr,
    pub physical_end: PhysAddr,
    pub virtual_start: VirtAddr,
    pub virtual_end: VirtAddr,
}
