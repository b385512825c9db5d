//! Early serial console.
//!
//! Bare metal: COM1 16550 UART, polled, 115200 8N1. Hosted: the process's
//! stderr (through `eprint!`, so the test harness captures it).

pub use imp::{init, write_fmt, write_str};

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
mod imp {
    use core::fmt;

    use spin::Mutex;
    use x86_64::instructions::port::Port;

    /// COM1 base port address
    const COM1_PORT: u16 = 0x3F8;

    /// Line status register bit: transmit holding register empty.
    const LSR_THR_EMPTY: u8 = 0x20;

    struct Uart {
        data: Port<u8>,
        int_enable: Port<u8>,
        fifo_ctrl: Port<u8>,
        line_ctrl: Port<u8>,
        modem_ctrl: Port<u8>,
        line_status: Port<u8>,
        ready: bool,
    }

    impl Uart {
        const fn new(base: u16) -> Self {
            Self {
                data: Port::new(base),
                int_enable: Port::new(base + 1),
                fifo_ctrl: Port::new(base + 2),
                line_ctrl: Port::new(base + 3),
                modem_ctrl: Port::new(base + 4),
                line_status: Port::new(base + 5),
                ready: false,
            }
        }

        fn init(&mut self) {
            // SAFETY: COM1 is a standard PC port; these writes only
            // program the UART.
            unsafe {
                self.int_enable.write(0x00);
                // DLAB on, divisor 1 (115200 baud), DLAB off with 8N1.
                self.line_ctrl.write(0x80);
                self.data.write(0x01);
                self.int_enable.write(0x00);
                self.line_ctrl.write(0x03);
                // FIFO on, cleared, 14-byte threshold.
                self.fifo_ctrl.write(0xC7);
                // DTR, RTS, OUT2. We poll, so UART interrupts stay off.
                self.modem_ctrl.write(0x0B);
            }
            self.ready = true;
        }

        fn write_byte(&mut self, byte: u8) {
            if !self.ready {
                return;
            }
            // SAFETY: reading LSR and writing THR have no side effects
            // beyond transmitting the byte.
            unsafe {
                while self.line_status.read() & LSR_THR_EMPTY == 0 {
                    core::hint::spin_loop();
                }
                self.data.write(byte);
            }
        }
    }

    impl fmt::Write for Uart {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for byte in s.bytes() {
                if byte == b'\n' {
                    self.write_byte(b'\r');
                }
                self.write_byte(byte);
            }
            Ok(())
        }
    }

    static COM1: Mutex<Uart> = Mutex::new(Uart::new(COM1_PORT));

    pub fn init() {
        COM1.lock().init();
    }

    pub fn write_str(s: &str) {
        use fmt::Write;
        let _ = COM1.lock().write_str(s);
    }

    pub fn write_fmt(args: fmt::Arguments) {
        use fmt::Write;
        let _ = COM1.lock().write_fmt(args);
    }
}

#[cfg(not(target_os = "none"))]
mod imp {
    use core::fmt;

    pub fn init() {}

    pub fn write_str(s: &str) {
        eprint!("{}", s);
    }

    pub fn write_fmt(args: fmt::Arguments) {
        eprint!("{}", args);
    }
}
