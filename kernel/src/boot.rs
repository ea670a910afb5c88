//! Boot path
//!
//! The kernel is a multiboot1 payload: the loader leaves the machine in
//! flat protected mode and hands `_start` a magic value in eax and the
//! boot information block in ebx.  `_start` installs the boot stack and
//! calls [`kernel_main`], which captures the filesystem image (the first
//! boot module) before paging replaces the loader's view of memory, then
//! brings the subsystems up in dependency order and idles.  The first
//! timer tick after that takes over the CPU for good.

use crate::pit::SCHED_HZ;
use crate::{arch, fs, gdt, interrupts, keyboard, paging, pit, rtc, syscall, terminal};

const MULTIBOOT_HEADER_MAGIC: u32 = 0x1BAD_B002;
const MULTIBOOT_LOADER_MAGIC: u32 = 0x2BAD_B002;

/// Page-align modules, supply memory info.
const MULTIBOOT_HEADER_FLAGS: u32 = 0x0000_0003;

const MODS_FLAG: u32 = 1 << 3;

const BOOT_STACK_SIZE: usize = 0x4000;

/// The header the loader scans the image head for.
#[allow(dead_code)]
#[repr(C)]
struct MultibootHeader {
    magic: u32,
    flags: u32,
    checksum: u32,
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
#[used]
#[link_section = ".multiboot"]
static MULTIBOOT_HEADER: MultibootHeader = MultibootHeader {
    magic: MULTIBOOT_HEADER_MAGIC,
    flags: MULTIBOOT_HEADER_FLAGS,
    checksum: 0u32
        .wrapping_sub(MULTIBOOT_HEADER_MAGIC)
        .wrapping_sub(MULTIBOOT_HEADER_FLAGS),
};

/// Leading fields of the loader's information block; only the module
/// list matters here.
#[repr(C)]
struct MultibootInfo {
    flags: u32,
    mem_lower: u32,
    mem_upper: u32,
    boot_device: u32,
    cmdline: u32,
    mods_count: u32,
    mods_addr: u32,
}

#[repr(C)]
struct MultibootModule {
    start: u32,
    end: u32,
    string: u32,
    reserved: u32,
}

#[allow(dead_code)]
#[repr(C, align(16))]
struct BootStack([u8; BOOT_STACK_SIZE]);

#[allow(dead_code)]
static BOOT_STACK: BootStack = BootStack([0; BOOT_STACK_SIZE]);

#[cfg(all(target_arch = "x86", target_os = "none"))]
core::arch::global_asm!(
    r#"
    .global _start
    _start:
        lea esp, [{stack} + {stack_size}]
        push ebx
        push eax
        call {main}
    1:
        hlt
        jmp 1b
    "#,
    stack = sym BOOT_STACK,
    stack_size = const BOOT_STACK_SIZE,
    main = sym kernel_main,
);

/// Finds the filesystem image among the boot modules.  Must run before
/// paging flips on: the information block lives in loader memory that the
/// kernel never maps.
fn find_filesystem_image(info_addr: u32) -> Option<&'static [u8]> {
    let info = unsafe { &*(info_addr as *const MultibootInfo) };
    if info.flags & MODS_FLAG == 0 || info.mods_count == 0 {
        return None;
    }
    let module = unsafe { &*(info.mods_addr as *const MultibootModule) };
    let len = module.end.checked_sub(module.start)?;
    Some(unsafe { core::slice::from_raw_parts(module.start as *const u8, len as usize) })
}

/// Kernel entry proper.
pub extern "C" fn kernel_main(magic: u32, info_addr: u32) -> ! {
    serial_boot_banner();

    if magic != MULTIBOOT_LOADER_MAGIC {
        crate::log_error!("bad loader magic {:#x}", magic);
        arch::hang();
    }

    let Some(image) = find_filesystem_image(info_addr) else {
        crate::log_error!("no filesystem module supplied by the loader");
        arch::hang();
    };

    gdt::init();
    interrupts::init();
    rtc::init();
    keyboard::init();
    paging::init();

    if fs::init(image).is_err() {
        crate::log_error!("filesystem image is malformed");
        arch::hang();
    }

    terminal::init();
    syscall::init();
    pit::init(SCHED_HZ);

    crate::log!("boot complete, handing over to the scheduler");
    arch::enable_interrupts();
    arch::idle()
}

fn serial_boot_banner() {
    crate::serial::init();
    crate::log!("TriadOS starting");
}
