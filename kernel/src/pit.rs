//! Programmable interval timer
//!
//! Channel 0 in square-wave mode drives the scheduler.  Every interrupt
//! advances the logger tick, acknowledges the PIC, and hands control to
//! the scheduler, which may not return on this stack.

use crate::arch;
use crate::interrupts::pic;
use crate::{logger, scheduler};

pub const TIMER_IRQ: u8 = 0;

/// Scheduler tick rate.
pub const SCHED_HZ: u32 = 100;

const PIT_COMMAND_PORT: u16 = 0x43;
const PIT_CHANNEL0_PORT: u16 = 0x40;

/// Channel 0, lobyte/hibyte access, mode 3.
const PIT_COMMAND: u8 = 0x36;

/// Input clock of the chip.
const PIT_BASE_HZ: u32 = 1_193_182;

/// Programs channel 0 for `freq` interrupts per second and unmasks IRQ 0.
pub fn init(freq: u32) {
    let divisor = PIT_BASE_HZ / freq;
    arch::port_out(PIT_COMMAND_PORT, PIT_COMMAND);
    arch::port_out(PIT_CHANNEL0_PORT, (divisor & 0xFF) as u8);
    arch::port_out(PIT_CHANNEL0_PORT, ((divisor >> 8) & 0xFF) as u8);
    pic::enable_irq(TIMER_IRQ);
    crate::log!("timer at {} Hz", freq);
}

/// IRQ 0 service routine.  The EOI goes out before the scheduler runs:
/// when the scheduler switches stacks, this frame is not unwound until
/// the terminal's next turn.
pub fn handle_interrupt() {
    logger::tick();
    pic::send_eoi(TIMER_IRQ);
    scheduler::tick();
}
