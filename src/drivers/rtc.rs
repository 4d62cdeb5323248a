//! CMOS real-time clock as a periodic tick source.

pub const DEFAULT_HZ: u32 = 2;
pub const MAX_HZ: u32 = 1024;

/// Register A rate bits for `hz`, where `hz = 32768 >> (rate - 1)`.
pub fn rate_for(hz: u32) -> Option<u8> {
    if !hz.is_power_of_two() || !(DEFAULT_HZ..=MAX_HZ).contains(&hz) {
        return None;
    }
    Some((16 - hz.trailing_zeros()) as u8)
}

#[cfg(target_os = "none")]
mod hw {
    use core::sync::atomic::{AtomicBool, Ordering};

    use x86_64::instructions::interrupts;
    use x86_64::instructions::port::Port;

    use super::{rate_for, DEFAULT_HZ};
    use crate::drivers::Rtc;

    const INDEX_PORT: u16 = 0x70;
    const DATA_PORT: u16 = 0x71;
    // Bit 7 of the index keeps NMIs off while a register is selected.
    const REGISTER_A: u8 = 0x8A;
    const REGISTER_B: u8 = 0x8B;
    const REGISTER_C: u8 = 0x0C;

    fn read_register(reg: u8) -> u8 {
        let mut index: Port<u8> = Port::new(INDEX_PORT);
        let mut data: Port<u8> = Port::new(DATA_PORT);
        unsafe {
            index.write(reg);
            data.read()
        }
    }

    fn write_register(reg: u8, value: u8) {
        let mut index: Port<u8> = Port::new(INDEX_PORT);
        let mut data: Port<u8> = Port::new(DATA_PORT);
        unsafe {
            index.write(reg);
            data.write(value);
        }
    }

    pub struct CmosRtc {
        ticked: AtomicBool,
    }

    pub static RTC: CmosRtc = CmosRtc { ticked: AtomicBool::new(false) };

    impl CmosRtc {
        fn program_rate(&self, rate: u8) {
            interrupts::without_interrupts(|| {
                let previous = read_register(REGISTER_A);
                write_register(REGISTER_A, (previous & 0xF0) | rate);
            });
        }

        /// IRQ 8. Register C must be read or the chip stops interrupting.
        pub fn handle_interrupt(&self) {
            read_register(REGISTER_C);
            self.ticked.store(true, Ordering::Release);
        }
    }

    impl Rtc for CmosRtc {
        fn open(&self) {
            if let Some(rate) = rate_for(DEFAULT_HZ) {
                self.program_rate(rate);
            }
        }

        fn wait_tick(&self) {
            self.ticked.store(false, Ordering::Release);
            while !self.ticked.load(Ordering::Acquire) {
                interrupts::enable_and_hlt();
            }
        }

        fn set_frequency(&self, hz: u32) -> bool {
            match rate_for(hz) {
                Some(rate) => {
                    self.program_rate(rate);
                    true
                }
                None => false,
            }
        }

        fn close(&self) {}
    }

    pub fn init() {
        interrupts::without_interrupts(|| {
            let previous = read_register(REGISTER_B);
            write_register(REGISTER_B, previous | 0x40);
        });
        crate::log_info!("RTC periodic interrupt enabled.");
    }
}

#[cfg(target_os = "none")]
pub use hw::{init, CmosRtc, RTC};
