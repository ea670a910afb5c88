//! Round-robin scheduler
//!
//! Runs on every timer tick.  Rotation is by terminal, not by pid: each of
//! the three terminals gets every third tick, and whichever program is
//! innermost on that terminal resumes.  A terminal with no program yet
//! gets a shell booted on the spot; that `execute` drops to user mode
//! and never comes back here; the shell's eventual `halt` re-executes a
//! fresh shell to keep the terminal alive.
//!
//! Per-terminal saved contexts live outside the terminal lock: the tick
//! runs with interrupts already masked, and a resume abandons the current
//! stack, so nothing lockable may be held across it.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::arch::{self, KernelContext};
use crate::terminal::{self, NUM_TERMINALS};
use crate::{gdt, paging, process, syscall};

struct ContextSlot(UnsafeCell<KernelContext>);
// Touched only from the tick path, which runs with interrupts masked.
unsafe impl Sync for ContextSlot {}

/// One saved kernel context per terminal.
static CONTEXTS: [ContextSlot; NUM_TERMINALS] = [
    ContextSlot(UnsafeCell::new(KernelContext::new())),
    ContextSlot(UnsafeCell::new(KernelContext::new())),
    ContextSlot(UnsafeCell::new(KernelContext::new())),
];

/// Terminal chosen for the upcoming switch; scratch between save and
/// resume.
static NEXT: AtomicUsize = AtomicUsize::new(0);

/// Timer tick entry: save the on-CPU flow, rotate to the next terminal.
///
/// Called from the timer interrupt with interrupts masked.  Returns
/// normally in exactly two cases: the saved flow was just resumed by a
/// later tick, or the rotation stayed on the same spot because no switch
/// was possible.
pub fn tick() {
    let prev = terminal::processing();
    let next = (prev + 1) % NUM_TERMINALS;
    NEXT.store(next, Ordering::Release);

    // Save this terminal's kernel flow.  When some future tick resumes
    // it, this call returns nonzero and the interrupt unwinds naturally.
    if unsafe { arch::context_save(CONTEXTS[prev].0.get()) } != 0 {
        return;
    }

    let next_pid = terminal::with_terminals(|terminals| {
        if terminals[next].num_processes == 0 {
            None
        } else {
            terminals[next].cur_pid
        }
    });

    match next_pid {
        None => {
            // Nothing on that terminal yet: boot its shell.  execute()
            // enters user mode and does not return; the frames it leaves
            // on this stack are dead weight that the next save overwrites.
            terminal::set_processing(next);
            arch::enable_interrupts();
            syscall::execute(syscall::SHELL_COMMAND);
            // Only reachable when the shell image is missing.
            crate::log_error!("unable to start shell on terminal {}", next);
            terminal::set_processing(prev);
        }
        Some(pid) => {
            terminal::set_processing(next);
            let (esp0, ss0, pd_entry) = unsafe {
                let pcb = process::pcb_mut(pid);
                (pcb.esp0, pcb.ss0, pcb.pd_entry)
            };
            gdt::set_kernel_stack(esp0, ss0);
            paging::set_pde(paging::USER_PDE_INDEX, pd_entry);
            unsafe {
                arch::context_resume(CONTEXTS[next].0.get());
            }
        }
    }
}
