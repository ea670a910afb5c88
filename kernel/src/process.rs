//! Process control blocks
//!
//! Six fixed process slots.  Slot `pid` owns the 8 KB kernel stack ending
//! at `KERNEL_MEM_END - pid * KSTACK_SIZE`; the PCB itself sits at the
//! base of that stack, so `pcb_ptr` is pure address arithmetic and the
//! stack and PCB are released together when the slot frees.
//!
//! Parent links are pids, not pointers, so a freed slot can never leave a
//! dangling reference behind.

use spin::Mutex;

use crate::arch::{self, KernelContext};
use crate::error::{KernelError, Result};
use crate::file::{self, FileTable};
use crate::gdt::KERNEL_DS;

/// Most processes alive at once.
pub const MAX_PCB: usize = 6;

/// End of the kernel's 4 MB page; kernel stacks grow down from here.
pub const KERNEL_MEM_END: u32 = 0x0080_0000;

/// Per-process kernel stack size, PCB included.
pub const KSTACK_SIZE: u32 = 0x2000;

/// Command-line argument storage, NUL terminator included.
pub const ARGS_MAX: usize = 128;

/// One process control block.
#[repr(C)]
pub struct Pcb {
    pub pid: u32,
    /// None for a terminal's root shell.
    pub parent: Option<u32>,
    pub files: FileTable,
    /// Kernel stack pointer for the TSS while this process runs.
    pub esp0: u32,
    pub ss0: u16,
    /// Kernel register file captured at this process's `execute` site;
    /// `halt` rejoins the parent through it.
    pub context: KernelContext,
    /// Page directory entry for this process's user 4 MB page.
    pub pd_entry: u32,
    pub args: [u8; ARGS_MAX],
}

impl Pcb {
    fn fresh(pid: u32, parent: Option<u32>) -> Self {
        Self {
            pid,
            parent,
            files: file::new_table(),
            esp0: kstack_top(pid),
            ss0: KERNEL_DS,
            context: KernelContext::new(),
            pd_entry: 0,
            args: [0; ARGS_MAX],
        }
    }
}

/// Which pids are live.
static SLOT_USED: Mutex<[bool; MAX_PCB]> = Mutex::new([false; MAX_PCB]);

/// Address of pid's PCB: the base of its kernel stack.
pub fn pcb_addr(pid: u32) -> u32 {
    KERNEL_MEM_END - KSTACK_SIZE * (pid + 1)
}

/// Initial kernel stack pointer for pid: the top dword of its stack.
pub fn kstack_top(pid: u32) -> u32 {
    KERNEL_MEM_END - KSTACK_SIZE * pid - 4
}

/// The PCB behind a live pid.
///
/// # Safety
///
/// `pid` must be a live slot, and the caller must be the only one touching
/// this PCB (single CPU, mutation under disabled interrupts).
pub unsafe fn pcb_mut(pid: u32) -> &'static mut Pcb {
    &mut *(pcb_addr(pid) as *mut Pcb)
}

/// Claims the lowest free pid and plants a fresh PCB on its stack base.
pub fn allocate(parent: Option<u32>) -> Result<u32> {
    let pid = arch::without_interrupts(|| {
        let mut used = SLOT_USED.lock();
        let pid = used.iter().position(|&u| !u).ok_or(KernelError::Exhausted)?;
        used[pid] = true;
        Ok(pid as u32)
    })?;

    unsafe {
        core::ptr::write(pcb_addr(pid) as *mut Pcb, Pcb::fresh(pid, parent));
    }
    Ok(pid)
}

/// Tears a process down: closes whatever files stayed open, then frees
/// the slot.
pub fn release(pid: u32) -> Result<()> {
    if pid as usize >= MAX_PCB {
        return Err(KernelError::BadArgument);
    }

    unsafe {
        let pcb = pcb_mut(pid);
        for fd in pcb.files.iter_mut() {
            if fd.is_open() {
                file::fd_close(fd);
            }
        }
        pcb.parent = None;
        pcb.esp0 = 0;
        pcb.ss0 = 0;
        pcb.context = KernelContext::new();
        pcb.pd_entry = 0;
        pcb.args = [0; ARGS_MAX];
    }

    arch::without_interrupts(|| {
        SLOT_USED.lock()[pid as usize] = false;
    });
    Ok(())
}

/// Number of live process slots.
pub fn live_count() -> usize {
    arch::without_interrupts(|| SLOT_USED.lock().iter().filter(|&&u| u).count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcbs_sit_at_the_base_of_their_kernel_stacks() {
        // 8 MB minus one 8 KB stack per pid, in order.
        assert_eq!(pcb_addr(0), 0x0080_0000 - 0x2000);
        assert_eq!(pcb_addr(1), 0x0080_0000 - 2 * 0x2000);
        assert_eq!(pcb_addr(5), 0x0080_0000 - 6 * 0x2000);
    }

    #[test]
    fn stack_tops_leave_room_for_the_first_push() {
        assert_eq!(kstack_top(0), 0x0080_0000 - 4);
        assert_eq!(kstack_top(1), 0x0080_0000 - 0x2000 - 4);
        // Each stack's top sits one slot above the next pid's PCB.
        for pid in 0..(MAX_PCB as u32 - 1) {
            assert_eq!(kstack_top(pid + 1), pcb_addr(pid) - 4);
        }
    }

    #[test]
    fn stacks_and_pcbs_do_not_overlap() {
        for pid in 0..MAX_PCB as u32 {
            let base = pcb_addr(pid);
            let top = kstack_top(pid);
            assert!(base < top);
            assert_eq!(top - base, KSTACK_SIZE - 4);
            // The PCB fits well inside its stack region.
            assert!(core::mem::size_of::<Pcb>() < KSTACK_SIZE as usize / 2);
        }
    }
}
