use std::sync::Arc;

use crate::host::DateTimeProvider;

/// Size of the persisted RTC state: an f64 timestamp plus padding.
pub const RTC_FILE_SIZE: usize = 12;

const SECONDS_PER_DAY: u64 = 86_400;
const DAY_COUNTER_LIMIT: u64 = 512;

const DAY_HIGH_MSB: u8 = 0x01;
const DAY_HIGH_HALT: u8 = 0x40;
const DAY_HIGH_CARRY: u8 = 0x80;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtcRegisters {
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    /// 9-bit day counter.
    pub days: u16,
    pub halt: bool,
    pub carry: bool,
}

impl RtcRegisters {
    fn from_elapsed(elapsed: u64, halt: bool) -> Self {
        let days = elapsed / SECONDS_PER_DAY;
        Self {
            seconds: (elapsed % 60) as u8,
            minutes: (elapsed / 60 % 60) as u8,
            hours: (elapsed / 3600 % 24) as u8,
            days: (days % DAY_COUNTER_LIMIT) as u16,
            halt,
            carry: days >= DAY_COUNTER_LIMIT,
        }
    }

    fn total_seconds(&self) -> f64 {
        let days = self.days as u64 + if self.carry { DAY_COUNTER_LIMIT } else { 0 };
        (self.seconds as u64 + self.minutes as u64 * 60 + self.hours as u64 * 3600
            + days * SECONDS_PER_DAY) as f64
    }

    fn same_time(&self, other: &Self) -> bool {
        Self { halt: false, ..*self } == Self { halt: false, ..*other }
    }

    pub fn read(&self, reg: u8) -> u8 {
        match reg {
            0x08 => self.seconds,
            0x09 => self.minutes,
            0x0A => self.hours,
            0x0B => self.days as u8,
            0x0C => {
                let mut out = ((self.days >> 8) as u8) & DAY_HIGH_MSB;
                if self.halt {
                    out |= DAY_HIGH_HALT;
                }
                if self.carry {
                    out |= DAY_HIGH_CARRY;
                }
                out
            }
            _ => 0xFF,
        }
    }

    fn write(&mut self, reg: u8, val: u8) {
        match reg {
            0x08 => self.seconds = val % 60,
            0x09 => self.minutes = val % 60,
            0x0A => self.hours = val % 24,
            0x0B => self.days = (self.days & 0x100) | val as u16,
            0x0C => {
                self.days = (self.days & 0xFF) | (((val & DAY_HIGH_MSB) as u16) << 8);
                self.halt = val & DAY_HIGH_HALT != 0;
                self.carry = val & DAY_HIGH_CARRY != 0;
            }
            _ => {}
        }
    }
}

/// MBC3 real-time clock.
///
/// Time is not counted by the emulator; the registers are derived from the
/// wall clock relative to `start_time`, so the clock keeps running while the
/// emulator is closed.
pub struct Rtc {
    start_time: f64,
    stopped_at: Option<f64>,
    /// Values written while halted, applied when the clock resumes.
    written: Option<RtcRegisters>,
    latched: RtcRegisters,
    latch_armed: bool,
    dirty: bool,
    datetime: Arc<dyn DateTimeProvider>,
}

impl Rtc {
    /// A clock reading zero right now, unless a saved start time is given.
    pub fn new(datetime: Arc<dyn DateTimeProvider>, saved_start: Option<f64>) -> Self {
        let now = datetime.now();
        let mut rtc = Self {
            start_time: saved_start.unwrap_or(now),
            stopped_at: None,
            written: None,
            latched: RtcRegisters::default(),
            latch_armed: false,
            dirty: saved_start.is_none(),
            datetime,
        };
        rtc.latched = rtc.current();
        rtc
    }

    /// Live register values.
    pub fn current(&self) -> RtcRegisters {
        if let Some(regs) = self.written {
            return regs;
        }
        let end = self.stopped_at.unwrap_or_else(|| self.datetime.now());
        let elapsed = (end - self.start_time).max(0.0) as u64;
        RtcRegisters::from_elapsed(elapsed, self.stopped_at.is_some())
    }

    pub fn latched(&self) -> RtcRegisters {
        self.latched
    }

    pub fn read(&self, reg: u8) -> u8 {
        self.latched.read(reg)
    }

    /// Writes to 0x6000-0x7FFF. Writing 0 arms the latch; the next non-zero
    /// write copies the live registers into the readable snapshot.
    pub fn write_latch(&mut self, val: u8) {
        if val == 0 {
            self.latch_armed = true;
        } else {
            if self.latch_armed {
                self.latched = self.current();
            }
            self.latch_armed = false;
        }
    }

    pub fn write(&mut self, reg: u8, val: u8) {
        let before = self.current();
        let mut regs = before;
        regs.write(reg, val);
        let now = self.datetime.now();

        if regs.halt {
            self.stopped_at.get_or_insert(now);
            if self.written.is_some() || !regs.same_time(&before) {
                self.written = Some(regs);
            }
            return;
        }

        match self.stopped_at.take() {
            Some(stopped) if self.written.is_none() && regs.same_time(&before) => {
                self.start_time += now - stopped;
            }
            _ => {
                self.start_time = now - regs.total_seconds();
            }
        }
        self.written = None;
        self.dirty = true;
    }

    /// Whether the reference time changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Start time adjusted so that a halted clock reloads with its frozen value.
    fn persisted_start(&self) -> f64 {
        match self.stopped_at {
            Some(_) => self.datetime.now() - self.current().total_seconds(),
            None => self.start_time,
        }
    }

    pub fn to_bytes(&self) -> [u8; RTC_FILE_SIZE] {
        let mut out = [0u8; RTC_FILE_SIZE];
        out[..8].copy_from_slice(&self.persisted_start().to_le_bytes());
        out
    }

    pub fn start_from_bytes(data: &[u8]) -> Option<f64> {
        let bytes: [u8; 8] = data.get(..8)?.try_into().ok()?;
        let start = f64::from_le_bytes(bytes);
        start.is_finite().then_some(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeClock(Mutex<f64>);

    impl FakeClock {
        fn set(&self, t: f64) {
            *self.0.lock().unwrap() = t;
        }
    }

    impl DateTimeProvider for FakeClock {
        fn now(&self) -> f64 {
            *self.0.lock().unwrap()
        }
    }

    fn clock_at(t: f64) -> Arc<FakeClock> {
        Arc::new(FakeClock(Mutex::new(t)))
    }

    #[test]
    fn registers_follow_wall_clock() {
        let clock = clock_at(1000.0);
        let rtc = Rtc::new(clock.clone(), None);
        clock.set(1000.0 + 3.0 * 86400.0 + 5.0 * 3600.0 + 7.0 * 60.0 + 9.0);
        let regs = rtc.current();
        assert_eq!(
            (regs.days, regs.hours, regs.minutes, regs.seconds),
            (3, 5, 7, 9)
        );
        assert!(!regs.carry);
    }

    #[test]
    fn day_counter_overflow_sets_carry() {
        let clock = clock_at(0.0);
        let rtc = Rtc::new(clock.clone(), None);
        clock.set(513.0 * 86400.0);
        let regs = rtc.current();
        assert_eq!(regs.days, 1);
        assert!(regs.carry);
        assert_eq!(regs.read(0x0C) & DAY_HIGH_CARRY, DAY_HIGH_CARRY);
    }

    #[test]
    fn latch_needs_zero_then_nonzero() {
        let clock = clock_at(0.0);
        let mut rtc = Rtc::new(clock.clone(), None);
        clock.set(42.0);
        rtc.write_latch(1);
        assert_eq!(rtc.read(0x08), 0);

        rtc.write_latch(0);
        rtc.write_latch(1);
        assert_eq!(rtc.read(0x08), 42);

        clock.set(50.0);
        assert_eq!(rtc.read(0x08), 42);
    }

    #[test]
    fn halt_freezes_and_resume_shifts_start() {
        let clock = clock_at(0.0);
        let mut rtc = Rtc::new(clock.clone(), None);
        clock.set(10.0);
        rtc.write(0x0C, DAY_HIGH_HALT);
        clock.set(100.0);
        assert_eq!(rtc.current().seconds, 10);
        assert!(rtc.current().halt);

        rtc.write(0x0C, 0);
        clock.set(105.0);
        assert_eq!(rtc.current().seconds, 15);
    }

    #[test]
    fn registers_written_while_halted_apply_on_resume() {
        let clock = clock_at(0.0);
        let mut rtc = Rtc::new(clock.clone(), None);
        rtc.take_dirty();
        rtc.write(0x0C, DAY_HIGH_HALT);
        rtc.write(0x09, 30);
        rtc.write(0x08, 5);
        assert!(!rtc.take_dirty());

        clock.set(1000.0);
        rtc.write(0x0C, 0);
        assert!(rtc.take_dirty());
        clock.set(1001.0);
        let regs = rtc.current();
        assert_eq!((regs.minutes, regs.seconds), (30, 6));
    }

    #[test]
    fn persisted_bytes_round_trip() {
        let clock = clock_at(5000.0);
        let rtc = Rtc::new(clock.clone(), Some(1234.5));
        let bytes = rtc.to_bytes();
        assert_eq!(bytes.len(), RTC_FILE_SIZE);
        assert_eq!(&bytes[8..], &[0, 0, 0, 0]);
        assert_eq!(Rtc::start_from_bytes(&bytes), Some(1234.5));
        assert_eq!(Rtc::start_from_bytes(&bytes[..4]), None);
    }
}
