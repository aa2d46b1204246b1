//! COM1 serial output.
//!
//! Every diagnostic the kernel produces leaves through this port; QEMU
//! mirrors it to stdio, real hardware to whatever is on the other end of
//! the cable.

use lazy_static::lazy_static;
use spin::Mutex;
use uart_16550::SerialPort;

use crate::constants::ports::COM1;

lazy_static! {
    /// The first serial port, initialized on first use.
    pub static ref COM1_PORT: Mutex<SerialPort> = {
        let mut port = unsafe { SerialPort::new(COM1) };
        port.init();
        Mutex::new(port)
    };
}

#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    use core::fmt::Write;
    COM1_PORT
        .lock()
        .write_fmt(args)
        .expect("serial write failed");
}

/// Writes formatted text to COM1.
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*))
    };
}

/// Writes formatted text to COM1, followed by a newline.
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => ($crate::serial_print!("{}\n", format_args!($($arg)*)));
}
