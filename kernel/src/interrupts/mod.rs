//! Interrupt plumbing
//!
//! Owns the IDT and the 8259 pair, and routes each vector to its service
//! routine: exceptions to the fault path, IRQ 0/1/8 to the timer,
//! keyboard, and RTC drivers, vector 0x80 to the syscall dispatcher.

pub mod idt;
pub mod pic;

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod handlers;

/// System-call gate.
pub const SYSCALL_VECTOR: u8 = 0x80;

pub const TIMER_VECTOR: u8 = pic::IRQ_BASE;
pub const KEYBOARD_VECTOR: u8 = pic::IRQ_BASE + 1;
pub const RTC_VECTOR: u8 = pic::IRQ_BASE + 8;

/// Builds and loads the IDT, then brings up the PIC with all lines
/// masked.  Interrupts stay disabled; the boot flow enables them once
/// every driver is ready.
pub fn init() {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    handlers::init();
    pic::init();
}
