//! Vector table population and service routines
//!
//! Exceptions raised from ring 3 terminate the offending program through
//! the halt path with exit status 256; exceptions raised from ring 0 are
//! fatal and park the machine.  Hardware lines hand off to their drivers.
//! Vector 0x80 enters through a register-saving assembly thunk so the
//! dispatcher sees the user's eax/ebx/ecx/edx and its return value lands
//! back in eax.

use core::cell::UnsafeCell;

use super::idt::{IdtEntry, IDT_ENTRIES, INTERRUPT_GATE, TRAP_GATE, USER_TRAP_GATE};
use super::{KEYBOARD_VECTOR, RTC_VECTOR, SYSCALL_VECTOR, TIMER_VECTOR};
use crate::gdt::KERNEL_CS;
use crate::{arch, keyboard, pit, rtc, syscall, terminal};

/// What the CPU pushes for a same-privilege fault; for ring-3 faults the
/// user esp/ss follow but are not needed here.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct InterruptStackFrame {
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

struct IdtCell(UnsafeCell<[IdtEntry; IDT_ENTRIES]>);
// Written once during init, read by the CPU afterwards.
unsafe impl Sync for IdtCell {}

static IDT: IdtCell = IdtCell(UnsafeCell::new([IdtEntry::missing(); IDT_ENTRIES]));

core::arch::global_asm!(
    r#"
    .global syscall_entry
    syscall_entry:
        push ebp
        push edi
        push esi
        push edx
        push ecx
        push ebx
        push edx
        push ecx
        push ebx
        push eax
        call {dispatch}
        add esp, 16
        pop ebx
        pop ecx
        pop edx
        pop esi
        pop edi
        pop ebp
        iretd
    "#,
    dispatch = sym syscall::dispatch,
);

extern "C" {
    fn syscall_entry();
}

/// Populates every gate and loads the table.
pub fn init() {
    unsafe {
        let table = &mut *IDT.0.get();

        let mut trap = |vector: usize, handler: u32| {
            table[vector] = IdtEntry::new(handler, KERNEL_CS, TRAP_GATE);
        };
        trap(0, divide_error as usize as u32);
        trap(1, debug_trap as usize as u32);
        trap(2, nmi as usize as u32);
        trap(3, breakpoint as usize as u32);
        trap(4, overflow as usize as u32);
        trap(5, bound_range as usize as u32);
        trap(6, invalid_opcode as usize as u32);
        trap(7, device_not_available as usize as u32);
        trap(8, double_fault as usize as u32);
        trap(9, coprocessor_overrun as usize as u32);
        trap(10, invalid_tss as usize as u32);
        trap(11, segment_not_present as usize as u32);
        trap(12, stack_segment_fault as usize as u32);
        trap(13, general_protection as usize as u32);
        trap(14, page_fault as usize as u32);
        trap(16, fpu_error as usize as u32);
        trap(17, alignment_check as usize as u32);
        trap(18, machine_check as usize as u32);
        trap(19, simd_error as usize as u32);

        table[TIMER_VECTOR as usize] =
            IdtEntry::new(timer_interrupt as usize as u32, KERNEL_CS, INTERRUPT_GATE);
        table[KEYBOARD_VECTOR as usize] =
            IdtEntry::new(keyboard_interrupt as usize as u32, KERNEL_CS, INTERRUPT_GATE);
        table[RTC_VECTOR as usize] =
            IdtEntry::new(rtc_interrupt as usize as u32, KERNEL_CS, INTERRUPT_GATE);

        table[SYSCALL_VECTOR as usize] =
            IdtEntry::new(syscall_entry as usize as u32, KERNEL_CS, USER_TRAP_GATE);

        arch::load_idt(IDT.0.get() as u32, (IDT_ENTRIES * 8 - 1) as u16);
    }
    crate::log_debug!("IDT loaded");
}

/// Shared tail for every exception: kill the user program, or park the
/// machine when the kernel itself faulted.
fn fault(name: &str, frame: &InterruptStackFrame) {
    // Trap gates leave IF as the faulting context had it; the teardown
    // below must not be preempted.
    arch::disable_interrupts();
    if frame.cs & 0x3 == 0x3 {
        crate::log_error!("user exception: {} at eip {:#x}", name, frame.eip);
        terminal::print_str(b"EXCEPTION: ");
        terminal::print_banner(name.as_bytes());
        syscall::exception_terminate();
    }
    crate::log_error!("kernel exception: {} at eip {:#x}", name, frame.eip);
    arch::hang();
}

macro_rules! exception {
    ($fn_name:ident, $name:expr) => {
        extern "x86-interrupt" fn $fn_name(frame: InterruptStackFrame) {
            fault($name, &frame);
        }
    };
}

macro_rules! exception_with_code {
    ($fn_name:ident, $name:expr) => {
        extern "x86-interrupt" fn $fn_name(frame: InterruptStackFrame, error_code: u32) {
            crate::log_error!("{}: error code {:#x}", $name, error_code);
            fault($name, &frame);
        }
    };
}

exception!(divide_error, "Divide Error");
exception!(debug_trap, "Debug");
exception!(nmi, "NMI Interrupt");
exception!(breakpoint, "Breakpoint");
exception!(overflow, "Overflow");
exception!(bound_range, "BOUND Range Exceeded");
exception!(invalid_opcode, "Invalid Opcode");
exception!(device_not_available, "Device Not Available");
exception_with_code!(double_fault, "Double Fault");
exception!(coprocessor_overrun, "Coprocessor Segment Overrun");
exception_with_code!(invalid_tss, "Invalid TSS");
exception_with_code!(segment_not_present, "Segment Not Present");
exception_with_code!(stack_segment_fault, "Stack-Segment Fault");
exception_with_code!(general_protection, "General Protection");
exception!(fpu_error, "x87 FPU Floating-Point Error");
exception_with_code!(alignment_check, "Alignment Check");
exception!(machine_check, "Machine Check");
exception!(simd_error, "SIMD Floating-Point Exception");

extern "x86-interrupt" fn page_fault(frame: InterruptStackFrame, error_code: u32) {
    crate::log_error!(
        "Page Fault: address {:#x}, error code {:#x}",
        arch::read_cr2(),
        error_code
    );
    fault("Page Fault", &frame);
}

extern "x86-interrupt" fn timer_interrupt(_frame: InterruptStackFrame) {
    pit::handle_interrupt();
}

extern "x86-interrupt" fn keyboard_interrupt(_frame: InterruptStackFrame) {
    keyboard::handle_interrupt();
}

extern "x86-interrupt" fn rtc_interrupt(_frame: InterruptStackFrame) {
    rtc::handle_interrupt();
}
