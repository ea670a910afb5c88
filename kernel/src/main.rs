//! Bare-metal binary shim
//!
//! The kernel proper lives in the library crate (boot path included, so
//! it stays testable on the host); this binary contributes the pieces
//! only a final image may define.  Host builds of the workspace get an
//! empty `main` instead.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
use triad_kernel::arch;

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    triad_kernel::log_error!("kernel panic: {}", info);
    arch::hang()
}

#[cfg(not(target_os = "none"))]
fn main() {}
