//! Page tables and the per-process user mapping
//!
//! One page directory for the whole system.  The kernel owns two fixed
//! mappings installed at boot and never touched again: a 4 KB-grained
//! table for the first 4 MB (covering the text console and the terminal
//! back buffers) and a 4 MB identity page for the kernel image at 4-8 MB.
//!
//! Two slots do change at runtime:
//!
//! * the directory entry covering [`USER_VBASE`] is rewritten on every
//!   process switch to point at that process's physical 4 MB page, and
//! * a user-visible 4 KB table at the top of the address space aliases one
//!   page per terminal onto either the console or that terminal's back
//!   buffer (the `vidmap` window).
//!
//! Every rewrite flushes the TLB by reloading CR3.

use core::cell::UnsafeCell;

use bitflags::bitflags;

use crate::arch;

pub const ENTRIES: usize = 1024;

/// Virtual base the program image loads at; inside the user 4 MB page.
pub const USER_VBASE: u32 = 0x0804_8000;

/// Directory slot that covers the user 4 MB page.
pub const USER_PDE_INDEX: usize = (USER_VBASE >> 22) as usize;

/// Base of the user-visible video alias pages, one 4 KB page per terminal.
pub const USER_VID_BASE: u32 = 0xFFC0_0000;

const USER_VID_PDE_INDEX: usize = (USER_VID_BASE >> 22) as usize;

const KERNEL_BASE: u32 = 0x40_0000;

bitflags! {
    /// Attribute bits shared by directory and table entries.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const PAGE_SIZE = 1 << 7;
    }
}

/// Entry attributes for a process's user 4 MB page.
pub fn user_page_attrs() -> PageFlags {
    PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER | PageFlags::PAGE_SIZE
}

#[repr(C, align(4096))]
struct PageTable(UnsafeCell<[u32; ENTRIES]>);

// Single CPU; all mutation happens with interrupts disabled.
unsafe impl Sync for PageTable {}

impl PageTable {
    const fn new() -> Self {
        Self(UnsafeCell::new([0; ENTRIES]))
    }

    fn set(&self, index: usize, entry: u32) {
        unsafe {
            (*self.0.get())[index] = entry;
        }
    }

    fn phys_addr(&self) -> u32 {
        self.0.get() as u32
    }
}

static PAGE_DIRECTORY: PageTable = PageTable::new();
static LOW_PAGE_TABLE: PageTable = PageTable::new();
static USER_VID_TABLE: PageTable = PageTable::new();

/// Builds the boot mappings and turns paging on.
///
/// Layout: directory slot 0 → 4 KB table for the first 4 MB (video pages
/// present, everything else absent); slot 1 → the kernel 4 MB identity
/// page; the last slot → the user video alias table.
pub fn init() {
    let not_present = PageFlags::WRITABLE.bits();
    for i in 0..ENTRIES {
        PAGE_DIRECTORY.set(i, not_present);
        LOW_PAGE_TABLE.set(i, not_present);
        // user-mode, not present until a terminal claims the slot
        USER_VID_TABLE.set(i, (PageFlags::WRITABLE | PageFlags::USER).bits());
    }

    let kernel_rw = (PageFlags::PRESENT | PageFlags::WRITABLE).bits();

    // Console page plus the three terminal back buffers.
    let video = crate::vga::CONSOLE_PHYS;
    for page in 0..4 {
        let addr = video + page * 0x1000;
        LOW_PAGE_TABLE.set((addr >> 12) as usize, addr | kernel_rw);
    }

    PAGE_DIRECTORY.set(0, LOW_PAGE_TABLE.phys_addr() | kernel_rw);
    PAGE_DIRECTORY.set(
        1,
        KERNEL_BASE | (PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::PAGE_SIZE).bits(),
    );
    PAGE_DIRECTORY.set(
        USER_VID_PDE_INDEX,
        USER_VID_TABLE.phys_addr()
            | (PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER).bits(),
    );

    unsafe {
        arch::enable_paging(PAGE_DIRECTORY.phys_addr());
    }
    crate::log!(
        "paging on, directory at {:#x}",
        PAGE_DIRECTORY.phys_addr()
    );
}

/// Rewrites one page directory entry and flushes the TLB.
///
/// The scheduler and the process lifecycle use this for the slot at
/// [`USER_PDE_INDEX`]; nothing else is ever rewritten.
pub fn set_pde(index: usize, entry: u32) {
    PAGE_DIRECTORY.set(index, entry);
    arch::flush_tlb();
}

/// Points terminal `index`'s user video alias page at `phys` and flushes.
pub fn set_user_video(index: usize, phys: u32) {
    let attrs = (PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER).bits();
    USER_VID_TABLE.set(index, phys | attrs);
    arch::flush_tlb();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_slot_covers_the_image_base() {
        // 0x08048000 sits in the 4 MB covered by directory entry 32.
        assert_eq!(USER_PDE_INDEX, 32);
        assert_eq!(USER_VBASE >> 22, 32);
        // The user stack top lives in the same 4 MB page.
        assert_eq!((crate::arch::USER_STACK_TOP >> 22) as usize, USER_PDE_INDEX);
    }

    #[test]
    fn user_page_attrs_match_the_hardware_bits() {
        // user | write | present | 4 MB page = 0x87
        assert_eq!(user_page_attrs().bits(), 0x87);
    }

    #[test]
    fn video_alias_lives_in_the_last_directory_slot() {
        assert_eq!(USER_VID_PDE_INDEX, ENTRIES - 1);
    }
}
