#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
use log::{error, info};
#[cfg(target_os = "none")]
use vireo::{
    bootinfo::{KernelLocation, MultibootInfo, MULTIBOOT_BOOTLOADER_MAGIC},
    idle_loop, logging, memory,
    memory::addr::{PhysAddr, VirtAddr},
    serial_println,
};

#[cfg(target_os = "none")]
extern "C" {
    // Linker-script symbols delimiting the kernel image.
    static kernel_physical_start: u8;
    static kernel_physical_end: u8;
    static kernel_virtual_start: u8;
    static kernel_virtual_end: u8;
}

/// Multiboot entry point. The boot assembly has already switched to the
/// higher half and enabled paging; interrupts are still disabled and stay
/// that way through the whole memory bring-up.
#[cfg(target_os = "none")]
#[no_mangle]
pub extern "C" fn kmain(magic: u32, multiboot_info_paddr: u32) -> ! {
    serial_println!("vireo booting");
    logging::init();

    if magic != MULTIBOOT_BOOTLOADER_MAGIC {
        error!("bad bootloader magic {:#x}", magic);
        idle_loop();
    }

    let kernel = unsafe {
        KernelLocation {
            physical_start: PhysAddr::new(&kernel_physical_start as *const u8 as u32),
            physical_end: PhysAddr::new(&kernel_physical_end as *const u8 as u32),
            virtual_start: VirtAddr::new(&kernel_virtual_start as *const u8 as u32),
            virtual_end: VirtAddr::new(&kernel_virtual_end as *const u8 as u32),
        }
    };
    info!("kernel image {:?}", kernel);

    let boot_info = unsafe { MultibootInfo::from_paddr(multiboot_info_paddr) };
    unsafe { memory::init(boot_info, kernel) };

    if memory::is_initialized() {
        for module in boot_info.modules() {
            match memory::map_module(module) {
                Some(entry) => info!("boot module mapped, entry point {:?}", entry),
                None => error!(
                    "boot module [{:#x}, {:#x}) could not be mapped",
                    module.mod_start, module.mod_end
                ),
            }
        }
    }

    info!("boot complete");
    idle_loop()
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    serial_println!("kernel panic: {}", info);
    idle_loop()
}

#[cfg(not(target_os = "none"))]
fn main() {}
