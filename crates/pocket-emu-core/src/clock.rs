/// IF bit raised when TIMA is reloaded after an overflow.
pub const TIMER_INTERRUPT: u8 = 0x04;

/// CPU cycles in one machine cycle. The clock never advances by less.
pub const M_CYCLE: u32 = 4;

/// Master CPU clock in Hz (2^22).
pub const CPU_FREQUENCY: u64 = 1 << CPU_FREQUENCY_POWER;
pub const CPU_FREQUENCY_POWER: u32 = 22;

pub struct SystemClock {
    /// Total CPU cycles since power-on.
    clock: u64,
    /// Free-running divider. DIV is bits 8-15.
    div: u32,
    /// Timer counter
    pub tima: u8,
    /// Timer modulo
    pub tma: u8,
    /// Timer control
    pub tac: u8,
    last_signal: bool,
    /// Set on the M-cycle TIMA wraps; the reload happens on the following one.
    tima_overflow: bool,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            clock: 0,
            div: 0,
            tima: 0,
            tma: 0,
            tac: 0,
            last_signal: false,
            tima_overflow: false,
        }
    }

    /// Current value of the master cycle counter.
    pub fn now(&self) -> u64 {
        self.clock
    }

    /// Raw value of the internal divider.
    pub fn divider(&self) -> u32 {
        self.div
    }

    pub fn overflow_pending(&self) -> bool {
        self.tima_overflow
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF04 => (self.div >> 8) as u8,
            0xFF05 => self.tima,
            0xFF06 => self.tma,
            0xFF07 => self.tac | 0xF8,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8, if_reg: &mut u8) {
        match addr {
            0xFF04 => self.reset_div(if_reg),
            0xFF05 => {
                // writing TIMA inside the reload window cancels the reload
                self.tima = val;
                self.tima_overflow = false;
            }
            0xFF06 => {
                // the reload reads TMA when it happens, so a write here lands in it
                self.tma = val;
            }
            0xFF07 => {
                self.tac = val & 0x07;
                self.evaluate_edge();
                // a TAC write finishes a pending reload without requesting
                // the interrupt
                if self.tima_overflow {
                    self.tima_overflow = false;
                    self.tima = self.tma;
                }
            }
            _ => {}
        }
    }

    /// Advance the clock by `cycles` CPU cycles, one machine cycle at a time,
    /// and update IF when a TIMA reload fires.
    pub fn advance(&mut self, cycles: u32, if_reg: &mut u8) {
        debug_assert!(cycles % M_CYCLE == 0);
        for _ in 0..cycles / M_CYCLE {
            if self.tima_overflow {
                self.reload(if_reg);
            }
            self.clock += M_CYCLE as u64;
            self.div = self.div.wrapping_add(M_CYCLE);
            self.evaluate_edge();
        }
    }

    /// Reset the divider. A tap bit that was high produces a falling edge
    /// right away.
    pub fn reset_div(&mut self, if_reg: &mut u8) {
        if self.tima_overflow {
            self.reload(if_reg);
        }
        self.div = 0;
        self.evaluate_edge();
    }

    fn reload(&mut self, if_reg: &mut u8) {
        self.tima_overflow = false;
        self.tima = self.tma;
        *if_reg |= TIMER_INTERRUPT;
    }

    fn evaluate_edge(&mut self) {
        let new = Self::signal_with(self.div, self.tac);
        if self.last_signal && !new {
            self.increment();
        }
        self.last_signal = new;
    }

    fn increment(&mut self) {
        if self.tima == 0xFF {
            self.tima = 0;
            self.tima_overflow = true;
        } else {
            self.tima += 1;
        }
    }

    /// Divider bit watched by the timer for a given TAC.
    pub fn tap_bit(tac: u8) -> u32 {
        match tac & 0x03 {
            0x00 => 9,
            0x01 => 3,
            0x02 => 5,
            _ => 7,
        }
    }

    fn signal_with(div: u32, tac: u8) -> bool {
        tac & 0x04 != 0 && (div >> Self::tap_bit(tac)) & 1 != 0
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn falling_edges(start: u32, cycles: u32, bit: u32) -> u32 {
        let mut count = 0;
        let mut prev = (start >> bit) & 1;
        let mut div = start;
        for _ in 0..cycles / M_CYCLE {
            div = div.wrapping_add(M_CYCLE);
            let cur = (div >> bit) & 1;
            if prev == 1 && cur == 0 {
                count += 1;
            }
            prev = cur;
        }
        count
    }

    #[test]
    fn tima_follows_tap_bit_falling_edges() {
        for tac in 0u8..16 {
            let mut clock = SystemClock::new();
            let mut if_reg = 0;
            clock.write(0xFF07, tac, &mut if_reg);
            let start = clock.divider();
            clock.advance(2048, &mut if_reg);

            let expected = if tac & 0x04 != 0 {
                falling_edges(start, 2048, SystemClock::tap_bit(tac))
            } else {
                0
            };
            assert_eq!(clock.tima as u32, expected, "TAC={tac:#04X}");
            assert_eq!(clock.read(0xFF07), (tac & 0x07) | 0xF8);
        }
    }

    #[test]
    fn div_write_reevaluates_edge() {
        let mut clock = SystemClock::new();
        let mut if_reg = 0;
        clock.write(0xFF07, 0x05, &mut if_reg);
        // bit 3 goes high after 8 cycles
        clock.advance(8, &mut if_reg);
        assert_eq!(clock.tima, 0);
        clock.write(0xFF04, 0x12, &mut if_reg);
        assert_eq!(clock.tima, 1);
        assert_eq!(clock.read(0xFF04), 0);
    }

    #[test]
    fn div_is_upper_byte_of_counter() {
        let mut clock = SystemClock::new();
        let mut if_reg = 0;
        clock.advance(256 * 3, &mut if_reg);
        assert_eq!(clock.read(0xFF04), 3);
        assert_eq!(clock.now(), 768);
    }

    #[test]
    fn overflow_reload_is_deferred_one_step() {
        let mut clock = SystemClock::new();
        let mut if_reg = 0;
        clock.tima = 0xFF;
        clock.tma = 0x10;
        clock.write(0xFF07, 0x05, &mut if_reg);
        while !clock.overflow_pending() {
            clock.advance(4, &mut if_reg);
        }
        assert_eq!(clock.tima, 0);
        assert_eq!(if_reg & TIMER_INTERRUPT, 0);

        clock.advance(4, &mut if_reg);
        assert_eq!(clock.tima, 0x10);
        assert_eq!(if_reg & TIMER_INTERRUPT, TIMER_INTERRUPT);
    }

    #[test]
    fn tma_write_inside_window_changes_reload() {
        let mut clock = SystemClock::new();
        let mut if_reg = 0;
        clock.tima = 0xFF;
        clock.tma = 0x10;
        clock.write(0xFF07, 0x05, &mut if_reg);
        while !clock.overflow_pending() {
            clock.advance(4, &mut if_reg);
        }
        clock.write(0xFF06, 0x80, &mut if_reg);
        clock.advance(4, &mut if_reg);
        assert_eq!(clock.tima, 0x80);
    }

    #[test]
    fn tima_write_inside_window_cancels_reload() {
        let mut clock = SystemClock::new();
        let mut if_reg = 0;
        clock.tima = 0xFF;
        clock.tma = 0x10;
        clock.write(0xFF07, 0x05, &mut if_reg);
        while !clock.overflow_pending() {
            clock.advance(4, &mut if_reg);
        }
        clock.write(0xFF05, 0x42, &mut if_reg);
        clock.advance(4, &mut if_reg);
        assert_eq!(clock.tima, 0x42);
        assert_eq!(if_reg & TIMER_INTERRUPT, 0);
    }

    #[test]
    fn tac_write_inside_window_reloads_without_interrupt() {
        let mut clock = SystemClock::new();
        let mut if_reg = 0;
        clock.tima = 0xFF;
        clock.tma = 0x10;
        clock.write(0xFF07, 0x05, &mut if_reg);
        while !clock.overflow_pending() {
            clock.advance(4, &mut if_reg);
        }
        clock.write(0xFF07, 0x04, &mut if_reg);
        assert_eq!(clock.tima, 0x10);
        assert!(!clock.overflow_pending());
        clock.advance(4, &mut if_reg);
        assert_eq!(clock.tima, 0x10);
        assert_eq!(if_reg & TIMER_INTERRUPT, 0);
    }
}
