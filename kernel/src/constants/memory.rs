pub const PAGE_SIZE: usize = 4096;
pub const PAGE_BITS: u32 = 12;

/// Higher-half split. Physical boot structures (multiboot info, memory map,
/// module list) are readable at this fixed offset once paging is on.
pub const KERNEL_VIRTUAL_BASE: u32 = 0xC000_0000;

/// The buddy tree covers the whole 32-bit virtual address space.
pub const BUDDY_SPACE_LOG2: u32 = 32;

/// 2^21 tree nodes at one bit apiece, 256 KiB.
pub const BUDDY_BITMAP_BYTES: usize = 1 << 18;

/// The frame stack's backing storage is a single page of 8-byte span slots.
pub const FRAME_STACK_SLOTS: usize = PAGE_SIZE / 8;

/// The loader is expected to hand over exactly this many boot modules.
pub const EXPECTED_BOOT_MODULES: usize = 1;

/// Upper bound on reserved physical spans (kernel image plus modules).
pub const MAX_RESERVED_SPANS: usize = 8;
