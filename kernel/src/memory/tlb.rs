//! TLB maintenance.
//!
//! Single core, interrupts off during paging work, so a local `invlpg` is
//! all that is ever needed; there is no shootdown protocol.

use crate::memory::addr::VirtAddr;

/// Drops the TLB entry covering one virtual page.
pub fn flush(vaddr: VirtAddr) {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    unsafe {
        core::arch::asm!(
            "invlpg [{}]",
            in(reg) vaddr.as_u32() as usize,
            options(nostack, preserves_flags)
        );
    }
    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    let _ = vaddr;
}
