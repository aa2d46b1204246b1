//! Page-table editing.
//!
//! All edits go through the frame window, so it makes no difference whether
//! the table being edited is resident anywhere. The page directory itself
//! is the boot-time one; it is never reallocated, and page-table pages,
//! once installed, are never freed.

use log::{error, info, warn};

use crate::constants::memory::PAGE_SIZE;
use crate::memory::addr::{PhysAddr, VirtAddr};
use crate::memory::frame_allocator::PhysicalFrameStack;
use crate::memory::page_table::{EntryFlags, PageTable, PageTableEntry};
use crate::memory::window::FrameWindow;

pub struct Mapper<W: FrameWindow> {
    directory: &'static mut PageTable,
    pub window: W,
}

impl<W: FrameWindow> Mapper<W> {
    pub fn new(directory: &'static mut PageTable, window: W) -> Self {
        Mapper { directory, window }
    }

    /// Installs a present, read/write mapping `vaddr -> paddr` in whichever
    /// page table owns `vaddr`'s directory slot. The table must already
    /// exist; call `ensure_page_table` first.
    pub fn map_page(&mut self, vaddr: VirtAddr, paddr: PhysAddr) -> bool {
        info!("mapping {:?} -> {:?}", vaddr, paddr);
        if !vaddr.is_page_aligned() {
            error!("tried to map non-page virtual address {:?}", vaddr);
            return false;
        }
        if !paddr.is_page_aligned() {
            error!("tried to map non-page physical address {:?}", paddr);
            return false;
        }
        let directory_entry = self.directory[vaddr.directory_index()];
        if !directory_entry.is_present() {
            error!("no page table covers {:?}", vaddr);
            return false;
        }
        let slot = vaddr.table_index();
        self.window.with_frame(directory_entry.frame(), |frame| {
            frame.as_table_mut()[slot] =
                PageTableEntry::new(paddr, EntryFlags::PRESENT | EntryFlags::WRITABLE);
        });
        true
    }

    /// Reads back the current mapping for `vaddr`.
    pub fn translate(&mut self, vaddr: VirtAddr) -> Option<PhysAddr> {
        let directory_entry = self.directory[vaddr.directory_index()];
        if !directory_entry.is_present() {
            warn!("{:?} has no page table, cannot translate", vaddr);
            return None;
        }
        let slot = vaddr.table_index();
        let entry = self
            .window
            .with_frame(directory_entry.frame(), |frame| frame.as_table_mut()[slot]);
        if !entry.is_present() {
            warn!("{:?} is not mapped", vaddr);
            return None;
        }
        Some(PhysAddr::new(entry.frame().as_u32() | vaddr.page_offset()))
    }

    /// Removes the mapping for `vaddr` and returns the frame it covered,
    /// or `None` when there was nothing to remove.
    pub fn unmap_page(&mut self, vaddr: VirtAddr) -> Option<PhysAddr> {
        let directory_entry = self.directory[vaddr.directory_index()];
        if !directory_entry.is_present() {
            return None;
        }
        let slot = vaddr.table_index();
        let entry = self.window.with_frame(directory_entry.frame(), |frame| {
            let table = frame.as_table_mut();
            let entry = table[slot];
            if entry.is_present() {
                table[slot].clear();
            }
            entry
        });
        if !entry.is_present() {
            return None;
        }
        self.window.invalidate(vaddr);
        Some(entry.frame())
    }

    /// Makes sure a page table exists for `vaddr`'s directory slot,
    /// popping and zeroing a frame for a new table when there is none.
    /// Idempotent.
    pub fn ensure_page_table(&mut self, vaddr: VirtAddr, frames: &mut PhysicalFrameStack) -> bool {
        let index = vaddr.directory_index();
        if self.directory[index].is_present() {
            return true;
        }
        let Some(frame) = frames.pop() else {
            error!("out of physical memory for a page table");
            return false;
        };
        info!(
            "new page table at {:?} for directory slot {}",
            frame, index
        );
        self.window.with_frame(frame, |f| f.zero());
        self.directory[index] =
            PageTableEntry::new(frame, EntryFlags::PRESENT | EntryFlags::WRITABLE);
        true
    }

    /// Backs `size` bytes starting at `vaddr` with freshly popped, zeroed
    /// frames, creating page tables on demand.
    pub fn map_range(
        &mut self,
        vaddr: VirtAddr,
        size: usize,
        frames: &mut PhysicalFrameStack,
    ) -> bool {
        for offset in (0..size).step_by(PAGE_SIZE) {
            let page = vaddr.offset(offset as u32);
            if !self.ensure_page_table(page, frames) {
                return false;
            }
            let Some(frame) = frames.pop() else {
                error!("out of physical memory backing {:?}", page);
                return false;
            };
            self.window.with_frame(frame, |f| f.zero());
            if !self.map_page(page, frame) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::sim;

    #[test]
    fn map_page_requires_an_existing_table() {
        let mut m = sim::manager();
        assert!(!m.mapper.map_page(VirtAddr::new(0x1000), PhysAddr::new(0x20_0000)));
        assert_eq!(m.mapper.translate(VirtAddr::new(0x1000)), None);
    }

    #[test]
    fn map_translate_unmap_round_trip() {
        let mut m = sim::manager();
        let vaddr = VirtAddr::new(0x3000);
        let paddr = PhysAddr::new(0x20_0000);
        assert!(m.mapper.ensure_page_table(vaddr, &mut m.frames));
        assert!(m.mapper.map_page(vaddr, paddr));
        assert_eq!(m.mapper.translate(vaddr), Some(paddr));
        // Translation keeps the byte offset.
        assert_eq!(
            m.mapper.translate(VirtAddr::new(0x3123)),
            Some(PhysAddr::new(0x20_0123))
        );
        assert_eq!(m.mapper.unmap_page(vaddr), Some(paddr));
        assert_eq!(m.mapper.translate(vaddr), None);
        assert_eq!(m.mapper.unmap_page(vaddr), None);
    }

    #[test]
    fn misaligned_mappings_are_rejected() {
        let mut m = sim::manager();
        let vaddr = VirtAddr::new(0x4000);
        assert!(m.mapper.ensure_page_table(vaddr, &mut m.frames));
        assert!(!m.mapper.map_page(VirtAddr::new(0x4001), PhysAddr::new(0x20_0000)));
        assert!(!m.mapper.map_page(vaddr, PhysAddr::new(0x20_0001)));
        assert_eq!(m.mapper.translate(vaddr), None);
    }

    #[test]
    fn ensure_page_table_is_idempotent() {
        let mut m = sim::manager();
        let vaddr = VirtAddr::new(0x5000);
        assert!(m.mapper.ensure_page_table(vaddr, &mut m.frames));
        let remaining = m.frames.top().unwrap();
        // Same directory slot: no second frame is consumed.
        assert!(m.mapper.ensure_page_table(VirtAddr::new(0x6000), &mut m.frames));
        assert_eq!(m.frames.top().unwrap(), remaining);
    }

    #[test]
    fn map_range_backs_every_page_with_its_own_frame() {
        let mut m = sim::manager();
        let base = VirtAddr::new(0x10_000);
        assert!(m.mapper.map_range(base, 3 * PAGE_SIZE, &mut m.frames));
        let frames: Vec<PhysAddr> = (0..3)
            .map(|i| {
                m.mapper
                    .translate(base.offset(i * PAGE_SIZE as u32))
                    .expect("page is mapped")
            })
            .collect();
        assert_eq!(frames.len(), 3);
        for pair in frames.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }
}
