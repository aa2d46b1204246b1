//! Boot-module mapping.
//!
//! The loader leaves program images in physical memory; before the kernel
//! can run one it needs the image in its own virtual space. The image is
//! not copied: its frames are mapped 1:1, in physical order, onto a freshly
//! claimed virtual block.

use log::{error, info};

use crate::bootinfo::BootModule;
use crate::constants::memory::PAGE_SIZE;
use crate::memory::addr::{PhysAddr, VirtAddr};
use crate::memory::window::FrameWindow;
use crate::memory::MemoryManager;

impl<W: FrameWindow> MemoryManager<W> {
    /// Maps a boot module into kernel virtual space and returns its base
    /// address, the entry point as far as the kernel is concerned.
    pub fn map_module(&mut self, module: &BootModule) -> Option<VirtAddr> {
        let start = PhysAddr::new(module.mod_start);
        let end = PhysAddr::new(module.mod_end).align_up();
        if !start.is_page_aligned() {
            error!("module start {:?} is not page aligned", start);
            return None;
        }
        if end.as_u32() <= start.as_u32() {
            error!("module [{:?}, {:?}) is empty", start, end);
            return None;
        }

        let size = (end.as_u32() - start.as_u32()) as usize;
        let base = self.vspace.claim(size)?;
        for offset in (0..size).step_by(PAGE_SIZE) {
            let page = base.offset(offset as u32);
            if !self.mapper.ensure_page_table(page, &mut self.frames) {
                return None;
            }
            if !self.mapper.map_page(page, start.offset(offset as u32)) {
                return None;
            }
        }
        info!("module [{:?}, {:?}) mapped at {:?}", start, end, base);
        Some(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::sim;

    fn module(mod_start: u32, mod_end: u32) -> BootModule {
        BootModule {
            mod_start,
            mod_end,
            string: 0,
            reserved: 0,
        }
    }

    #[test]
    fn module_pages_map_one_to_one_in_physical_order() {
        let mut m = sim::manager();
        let base = m.map_module(&module(0x20_0000, 0x20_2800)).unwrap();
        assert!(base.is_page_aligned());
        for i in 0..3u32 {
            assert_eq!(
                m.mapper.translate(base.offset(i * PAGE_SIZE as u32)),
                Some(PhysAddr::new(0x20_0000 + i * PAGE_SIZE as u32))
            );
        }
    }

    #[test]
    fn module_end_rounds_up_to_a_whole_page() {
        let mut m = sim::manager();
        let base = m.map_module(&module(0x10_0000, 0x10_0123)).unwrap();
        assert!(base.is_page_aligned());
        assert_eq!(
            m.mapper.translate(base),
            Some(PhysAddr::new(0x10_0000))
        );
    }

    #[test]
    fn misaligned_module_start_is_rejected() {
        let mut m = sim::manager();
        assert_eq!(m.map_module(&module(0x10_0123, 0x10_2000)), None);
    }

    #[test]
    fn empty_module_is_rejected() {
        let mut m = sim::manager();
        assert_eq!(m.map_module(&module(0x10_0000, 0x10_0000)), None);
    }
}
