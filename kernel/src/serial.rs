//! Serial port driver for debug output
//!
//! 16550 UART on COM1, used for early boot messages and kernel logging.
//! Output goes out with interrupts masked so an IRQ handler can never
//! deadlock against a half-finished line.

use core::fmt;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::arch;

/// Standard COM1 port address
const SERIAL_IO_PORT: u16 = 0x3F8;

/// A 16550-compatible UART addressed by its base I/O port.
pub struct SerialPort {
    base: u16,
}

impl SerialPort {
    const fn new(base: u16) -> Self {
        Self { base }
    }

    /// Programs 115200 8N1 with FIFOs enabled.
    fn init(&mut self) {
        arch::port_out(self.base + 1, 0x00); // no UART interrupts
        arch::port_out(self.base + 3, 0x80); // DLAB on
        arch::port_out(self.base, 0x01); // divisor 1 = 115200 baud
        arch::port_out(self.base + 1, 0x00);
        arch::port_out(self.base + 3, 0x03); // 8 bits, no parity, one stop
        arch::port_out(self.base + 2, 0xC7); // FIFO on, 14-byte threshold
        arch::port_out(self.base + 4, 0x0B); // DTR + RTS + OUT2
    }

    fn write_byte(&mut self, byte: u8) {
        // Wait for the transmit holding register to drain.
        while arch::port_in(self.base + 5) & 0x20 == 0 {
            core::hint::spin_loop();
        }
        arch::port_out(self.base, byte);
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
        Ok(())
    }
}

lazy_static! {
    /// Global serial port instance protected by spinlock
    pub static ref SERIAL1: Mutex<SerialPort> = {
        let mut serial_port = SerialPort::new(SERIAL_IO_PORT);
        serial_port.init();
        Mutex::new(serial_port)
    };
}

/// Force initialization during boot so the first real message is not the
/// one paying for setup.
pub fn init() {
    let _ = SERIAL1.lock();
}

/// Print to serial port (internal use)
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    arch::without_interrupts(|| {
        let _ = SERIAL1.lock().write_fmt(args);
    });
}

/// Print to serial port
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*))
    };
}

/// Print to serial port with newline
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($fmt:expr) => ($crate::serial_print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::serial_print!(
        concat!($fmt, "\n"), $($arg)*
    ));
}
