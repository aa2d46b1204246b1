//! The kernel byte allocator.
//!
//! `malloc` carves a power-of-two virtual block out of the buddy tree and
//! backs it page by page with popped frames; a small header in front of the
//! returned pointer records the size class so `free` can undo all of it.

use core::mem::size_of;

use log::{error, warn};

use crate::constants::memory::{PAGE_BITS, PAGE_SIZE};
use crate::memory::addr::VirtAddr;
use crate::memory::buddy::size_class;
use crate::memory::window::FrameWindow;
use crate::memory::MemoryManager;

/// Prefixed to every allocation: log2 of the bytes actually reserved,
/// header included.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(C)]
pub struct AllocationHeader {
    pub log2_size: u32,
}

pub const HEADER_SIZE: usize = size_of::<AllocationHeader>();

impl<W: FrameWindow> MemoryManager<W> {
    /// Allocates `size` bytes and returns the address just past the header,
    /// or `None` on overflow or exhaustion.
    pub fn malloc(&mut self, size: usize) -> Option<VirtAddr> {
        let Some(mut total) = size.checked_add(HEADER_SIZE) else {
            error!("allocation of {} bytes overflows", size);
            return None;
        };
        if total < PAGE_SIZE {
            total = PAGE_SIZE;
        }
        let log2_size = size_class(total);
        let block = self.vspace.claim(total)?;

        // TODO: a block wider than one directory slot (4 MiB) needs a page
        // table per slot; only the first is set up here.
        if !self.mapper.ensure_page_table(block, &mut self.frames) {
            return None;
        }

        let bytes = 1u64 << log2_size;
        let mut first_frame = None;
        let mut offset = 0u64;
        while offset < bytes {
            let page = block.offset(offset as u32);
            let Some(frame) = self.frames.pop() else {
                error!("out of physical memory while backing {:?}", block);
                return None;
            };
            if !self.mapper.map_page(page, frame) {
                return None;
            }
            if offset == 0 {
                first_frame = Some(frame);
            }
            offset += PAGE_SIZE as u64;
        }

        let frame = first_frame.expect("a block holds at least one page");
        self.mapper
            .window
            .with_frame(frame, |f| f.write(0, AllocationHeader { log2_size }));
        Some(block.offset(HEADER_SIZE as u32))
    }

    /// Releases an allocation returned by `malloc`: every constituent page
    /// goes back to the buddy tree and its frame back onto the stack.
    pub fn free(&mut self, ptr: VirtAddr) {
        let header_addr = VirtAddr::new(ptr.as_u32().wrapping_sub(HEADER_SIZE as u32));
        if !header_addr.is_page_aligned() {
            error!("tried to free {:?}, which is not an allocation start", ptr);
            return;
        }
        let Some(header_frame) = self.mapper.translate(header_addr) else {
            error!("tried to free unmapped address {:?}", ptr);
            return;
        };
        let header: AllocationHeader = self
            .mapper
            .window
            .with_frame(header_frame, |f| f.read(0));
        if header.log2_size < PAGE_BITS || header.log2_size > self.vspace.space_log2() {
            error!(
                "header at {:?} holds bogus size class {}",
                header_addr, header.log2_size
            );
            return;
        }

        let bytes = 1u64 << header.log2_size;
        let mut offset = 0u64;
        while offset < bytes {
            let page = header_addr.offset(offset as u32);
            self.vspace.release(page);
            match self.mapper.unmap_page(page) {
                Some(frame) => self.frames.push(frame),
                // A page that never got backed, or a double free; not fatal.
                None => warn!("{:?} was already unmapped, skipping", page),
            }
            offset += PAGE_SIZE as u64;
        }
    }
}
