use std::ops::Range;
use std::sync::Arc;

use crate::clock::{CPU_FREQUENCY, CPU_FREQUENCY_POWER};
use crate::publishing::{AUDIO_FRAME_LEN, AudioFrame, AudioQueue, StereoSample};

#[cfg(feature = "apu-trace")]
macro_rules! apu_trace {
    ($($arg:tt)*) => {
        log::trace!($($arg)*);
    };
}
#[cfg(not(feature = "apu-trace"))]
macro_rules! apu_trace {
    ($($arg:tt)*) => {};
}

pub const SAMPLE_RATE: u64 = 44100;
const FRAME_SEQUENCER_RATE: u64 = 512;
const INT16_MAX: i32 = i16::MAX as i32;
const FIXED_POINT_UNIT: u64 = 1 << 16;

// Eight duty steps per byte, step n is bit n.
const DUTY_TABLE: [u8; 4] = [0x80, 0x81, 0xE1, 0x7E];

/// Shadow frequency value marking channel 1 as silenced by a sweep overflow.
const SWEEP_DISABLED: u16 = 2048;
const MAX_AUDIBLE_FREQUENCY: u16 = 2041;

/// Converts the CPU clock into a slower tick count.
#[derive(Debug, Clone, Copy)]
struct ClockDivider {
    dst_frequency: u64,
    last: Option<u64>,
}

impl ClockDivider {
    fn new(dst_frequency: u64) -> Self {
        Self {
            dst_frequency,
            last: None,
        }
    }

    fn reset(&mut self) {
        self.last = None;
    }

    /// Ticks that elapsed since the previous call. Right after a reset only
    /// the current tick is reported.
    fn update(&mut self, source_clock: u64) -> Range<u64> {
        let time =
            ((source_clock as u128 * self.dst_frequency as u128) >> CPU_FREQUENCY_POWER) as u64;
        let first = match self.last {
            Some(last) => last + 1,
            None => time,
        };
        self.last = Some(time);
        first..time + 1
    }
}

/// Which units the frame sequencer clocks on a given 512 Hz tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SequencerEvents {
    pub length: bool,
    pub envelope: bool,
    pub sweep: bool,
}

pub fn frame_sequencer_events(tick: u64) -> SequencerEvents {
    SequencerEvents {
        length: tick % 2 == 0,
        envelope: tick % 8 == 7,
        sweep: tick % 4 == 2,
    }
}

#[derive(Default, Clone, Copy)]
struct LengthCounter {
    value: u16,
    enabled: bool,
}

impl LengthCounter {
    fn clock(&mut self) {
        if self.value > 0 {
            self.value -= 1;
        }
    }

    fn active(&self) -> bool {
        !self.enabled || self.value > 0
    }

    fn trigger(&mut self, max: u16) {
        if self.value == 0 {
            self.value = max;
        }
    }
}

#[derive(Default, Clone, Copy)]
struct Envelope {
    initial: u8,
    period: u8,
    add: bool,
    volume: u8,
    timer: u8,
}

impl Envelope {
    fn write(&mut self, val: u8) {
        self.initial = val >> 4;
        self.volume = self.initial;
        self.period = val & 0x07;
        self.add = val & 0x08 != 0;
    }

    fn trigger(&mut self) {
        self.timer = self.period;
        self.volume = self.initial;
    }

    fn clock(&mut self) {
        if self.period == 0 || self.timer == 0 {
            return;
        }
        self.timer -= 1;
        if self.timer != 0 {
            return;
        }
        self.timer = self.period;
        if self.add && self.volume < 15 {
            self.volume += 1;
        } else if !self.add && self.volume > 0 {
            self.volume -= 1;
        }
    }

    fn render(&self, high: bool) -> i32 {
        let sign = if high { 1 } else { -1 };
        sign * self.volume as i32 * INT16_MAX / 15
    }
}

/// Waveform position of a frequency-driven channel, derived from the sample
/// number relative to a reference point instead of being stepped per cycle.
#[derive(Default, Clone, Copy)]
struct Phase {
    frequency: u16,
    position: u32,
    reference: Option<(u64, u32)>,
}

impl Phase {
    fn set_frequency(&mut self, frequency: u16) {
        if frequency != self.frequency {
            self.frequency = frequency;
            self.reference = None;
        }
    }

    fn set_low(&mut self, val: u8) {
        self.set_frequency((self.frequency & 0x700) | val as u16);
    }

    fn set_high(&mut self, val: u8) {
        self.set_frequency((self.frequency & 0xFF) | ((val as u16 & 0x07) << 8));
    }

    fn restart(&mut self) {
        self.position = 0;
        self.reference = None;
    }

    /// `period` is in CPU cycles per waveform step; `shift` is log2 of the
    /// position units per step.
    fn advance(&mut self, sample_no: u64, period: u64, shift: u32) {
        match self.reference {
            None => self.reference = Some((sample_no, self.position)),
            Some((ref_sample, ref_position)) => {
                let delta = sample_no.saturating_sub(ref_sample) as u128;
                let steps =
                    delta * ((CPU_FREQUENCY as u128) << shift) / (SAMPLE_RATE * period) as u128;
                self.position = (ref_position + (steps as u32 & 0xFFFF)) & 0xFFFF;
            }
        }
    }
}

#[derive(Default, Clone, Copy)]
struct Sweep {
    period: u8,
    negate: bool,
    shift: u8,
    timer: u8,
    shadow: u16,
}

impl Sweep {
    fn write(&mut self, val: u8) {
        self.period = (val & 0x70) >> 4;
        self.negate = val & 0x08 != 0;
        self.shift = val & 0x07;
    }
}

#[derive(Default, Clone, Copy)]
struct SquareChannel {
    duty: u8,
    length: LengthCounter,
    envelope: Envelope,
    phase: Phase,
    sweep: Option<Sweep>,
}

impl SquareChannel {
    fn new(with_sweep: bool) -> Self {
        Self {
            sweep: with_sweep.then(Sweep::default),
            ..Default::default()
        }
    }

    fn enabled(&self) -> bool {
        self.length.active()
            && self.envelope.volume > 0
            && (1..=MAX_AUDIBLE_FREQUENCY).contains(&self.phase.frequency)
            && self.sweep.is_none_or(|s| s.shadow != SWEEP_DISABLED)
    }

    fn period(&self) -> u64 {
        (2048 - self.phase.frequency as u64) * 4
    }

    fn write_length(&mut self, val: u8) {
        self.duty = val >> 6;
        self.length.value = 64 - (val & 0x3F) as u16;
    }

    fn write_control(&mut self, val: u8) {
        self.phase.set_high(val);
        self.length.enabled = val & 0x40 != 0;
        if val & 0x80 != 0 {
            self.trigger();
        }
    }

    fn trigger(&mut self) {
        self.envelope.trigger();
        self.length.trigger(64);
        self.phase.restart();
        if let Some(sweep) = self.sweep.as_mut() {
            sweep.shadow = self.phase.frequency;
            sweep.timer = sweep.period;
            if sweep.period != 0 && sweep.shift != 0 {
                self.sweep_event(true);
            }
        }
    }

    fn sweep_event(&mut self, force: bool) {
        let Some(sweep) = self.sweep.as_mut() else {
            return;
        };
        if !force {
            if sweep.period == 0 || sweep.shift == 0 || sweep.timer == 0 {
                return;
            }
            sweep.timer -= 1;
            if sweep.timer != 0 {
                return;
            }
        }
        sweep.timer = sweep.period;
        self.phase.set_frequency(sweep.shadow);
        let delta = sweep.shadow >> sweep.shift;
        let next = if sweep.negate {
            sweep.shadow.saturating_sub(delta)
        } else {
            sweep.shadow + delta
        };
        if next >= 2048 {
            sweep.timer = 0;
            sweep.shadow = SWEEP_DISABLED;
        } else {
            sweep.shadow = next;
        }
    }

    fn render(&mut self, sample_no: u64) -> i32 {
        self.phase.advance(sample_no, self.period(), 13);
        if !self.enabled() {
            return 0;
        }
        let step = self.phase.position >> 13;
        self.envelope
            .render(DUTY_TABLE[self.duty as usize] & (1 << step) != 0)
    }
}

struct WaveChannel {
    dac_power: bool,
    length: LengthCounter,
    volume_shift: u8,
    phase: Phase,
    table: [u8; 32],
}

impl Default for WaveChannel {
    fn default() -> Self {
        Self {
            dac_power: false,
            length: LengthCounter::default(),
            volume_shift: 4,
            phase: Phase::default(),
            table: [0; 32],
        }
    }
}

impl WaveChannel {
    fn enabled(&self) -> bool {
        self.length.active() && self.volume_shift != 4 && self.phase.frequency != 0 && self.dac_power
    }

    fn period(&self) -> u64 {
        (2048 - self.phase.frequency as u64) * 2
    }

    fn write_volume(&mut self, val: u8) {
        self.volume_shift = (((val >> 5) & 3) + 4) % 5;
    }

    fn write_control(&mut self, val: u8) {
        self.phase.set_high(val);
        self.length.enabled = val & 0x40 != 0;
        if val & 0x80 != 0 {
            self.phase.restart();
            self.length.trigger(256);
            self.dac_power = true;
        }
    }

    fn write_table(&mut self, pos: usize, val: u8) {
        let pos = (pos % 16) * 2;
        self.table[pos] = val >> 4;
        self.table[pos + 1] = val & 0x0F;
    }

    fn render(&mut self, sample_no: u64) -> i32 {
        self.phase.advance(sample_no, self.period(), 11);
        if !self.enabled() {
            return 0;
        }
        let sample = (self.table[(self.phase.position >> 11) as usize] >> self.volume_shift) as i32;
        sample * 2 * INT16_MAX / 15 - INT16_MAX
    }
}

struct NoiseChannel {
    length: LengthCounter,
    envelope: Envelope,
    /// Bit the feedback is written into: 14 for 15-bit mode, 6 for 7-bit.
    width: u8,
    lfsr: u16,
    output: bool,
    scheduler: Option<ClockDivider>,
}

impl Default for NoiseChannel {
    fn default() -> Self {
        Self {
            length: LengthCounter::default(),
            envelope: Envelope::default(),
            width: 14,
            lfsr: 1,
            output: true,
            scheduler: None,
        }
    }
}

impl NoiseChannel {
    fn enabled(&self) -> bool {
        self.length.active() && self.envelope.volume > 0
    }

    fn write_polynomial(&mut self, val: u8) {
        self.width = 14 - (val & 0x08);
        let shift = (val >> 4) as u32;
        let divisor = (val & 0x07) as u64;
        let base = if divisor == 0 {
            1 << 20
        } else {
            (1 << 19) / divisor
        };
        self.scheduler = Some(ClockDivider::new(base >> (shift + 1)));
    }

    fn write_control(&mut self, val: u8) {
        self.length.enabled = val & 0x40 != 0;
        if val & 0x80 != 0 {
            self.envelope.trigger();
            self.length.trigger(64);
            self.lfsr = 0x7FFF;
        }
    }

    fn step_lfsr(&mut self) {
        let out = (self.lfsr ^ (self.lfsr >> 1)) & 1;
        self.lfsr >>= 1;
        self.lfsr &= !(1 << self.width);
        self.lfsr |= out << self.width;
        self.lfsr &= 0x7FFF;
        self.output ^= out != 0;
    }

    fn update(&mut self, clock: u64) {
        let Some(scheduler) = self.scheduler.as_mut() else {
            return;
        };
        for _ in scheduler.update(clock) {
            self.step_lfsr();
        }
    }

    fn render(&self) -> i32 {
        if !self.enabled() {
            return 0;
        }
        self.envelope.render(self.output)
    }
}

/// Single-pole high-pass filter removing the DC offset of the mix.
#[derive(Default, Clone, Copy)]
struct CapacitorFilter {
    state: i64,
}

impl CapacitorFilter {
    fn update(&mut self, input: i32) -> i32 {
        let input = input as i64;
        let out = input - self.state;
        // 15/16 + 61355/2^20 is the charge factor per sample at 44.1 kHz
        self.state = input - (((out * 15) >> 4) + ((out * 61355) >> 20));
        out as i32
    }
}

pub struct Apu {
    regs: [u8; 0x30],
    master_enable: bool,
    left_volume: u8,
    right_volume: u8,
    panning: u8,

    ch1: SquareChannel,
    ch2: SquareChannel,
    ch3: WaveChannel,
    ch4: NoiseChannel,

    now: u64,
    turned_on_at: u64,
    frame_sequencer: ClockDivider,
    sample_clock: ClockDivider,
    filter_left: CapacitorFilter,
    filter_right: CapacitorFilter,

    speed_multiplier: u64,
    speed_counter_a: u64,
    speed_counter_b: u64,
    sample_counter: u64,
    last_sample: StereoSample,

    frame: Box<AudioFrame>,
    frame_position: usize,
    frame_no: u64,
    queue: Arc<AudioQueue>,
}

impl Apu {
    pub fn new(queue: Arc<AudioQueue>) -> Self {
        Self {
            regs: [0; 0x30],
            master_enable: false,
            left_volume: 0,
            right_volume: 0,
            panning: 0,
            ch1: SquareChannel::new(true),
            ch2: SquareChannel::new(false),
            ch3: WaveChannel::default(),
            ch4: NoiseChannel::default(),
            now: 0,
            turned_on_at: 0,
            frame_sequencer: ClockDivider::new(FRAME_SEQUENCER_RATE),
            sample_clock: ClockDivider::new(SAMPLE_RATE),
            filter_left: CapacitorFilter::default(),
            filter_right: CapacitorFilter::default(),
            speed_multiplier: FIXED_POINT_UNIT,
            speed_counter_a: 0,
            speed_counter_b: 0,
            sample_counter: 0,
            last_sample: StereoSample::default(),
            frame: Box::default(),
            frame_position: 0,
            frame_no: 0,
            queue,
        }
    }

    /// Register values the boot ROM leaves behind.
    pub fn apply_post_boot(&mut self) {
        self.write_reg(0xFF26, 0x80);
        self.write_reg(0xFF11, 0x80);
        self.write_reg(0xFF12, 0xF3);
        self.write_reg(0xFF24, 0x77);
        self.write_reg(0xFF25, 0xF3);
    }

    pub fn audio_queue(&self) -> &Arc<AudioQueue> {
        &self.queue
    }

    /// Stereo samples rendered since the sound hardware was powered on.
    pub fn samples_rendered(&self) -> u64 {
        self.sample_counter
    }

    /// 1.0 plays in real time; below it samples are repeated, above it they
    /// are dropped. Queued frames are discarded.
    pub fn set_speed_multiplier(&mut self, multiplier: f64) {
        let fixed = (multiplier * FIXED_POINT_UNIT as f64) as u64;
        self.speed_multiplier = fixed.max(1);
        self.speed_counter_a = 0;
        self.speed_counter_b = 0;
        self.queue.clear();
    }

    fn read_mask(addr: u16) -> u8 {
        match addr {
            0xFF10 => 0x80,
            0xFF11 => 0x3F,
            0xFF12 => 0x00,
            0xFF13 => 0xFF,
            0xFF14 => 0xBF,
            0xFF16 => 0x3F,
            0xFF17 => 0x00,
            0xFF18 => 0xFF,
            0xFF19 => 0xBF,
            0xFF1A => 0x7F,
            0xFF1B => 0xFF,
            0xFF1C => 0x9F,
            0xFF1D => 0xFF,
            0xFF1E => 0xBF,
            0xFF20 => 0xFF,
            0xFF21 => 0x00,
            0xFF22 => 0x00,
            0xFF23 => 0xBF,
            0xFF24 => 0x00,
            0xFF25 => 0x00,
            0xFF26 => 0x70,
            0xFF15 | 0xFF1F => 0xFF,
            0xFF30..=0xFF3F => 0x00,
            _ => 0xFF,
        }
    }

    fn channel_status(&self) -> u8 {
        (self.ch1.enabled() as u8)
            | (self.ch2.enabled() as u8) << 1
            | (self.ch3.enabled() as u8) << 2
            | (self.ch4.enabled() as u8) << 3
    }

    pub fn read_reg(&self, addr: u16) -> u8 {
        match addr {
            0xFF26 => ((self.master_enable as u8) << 7) | 0x70 | self.channel_status(),
            0xFF10..=0xFF3F => self.regs[(addr - 0xFF10) as usize] | Apu::read_mask(addr),
            _ => 0xFF,
        }
    }

    pub fn write_reg(&mut self, addr: u16, val: u8) {
        if !(0xFF10..=0xFF3F).contains(&addr) {
            return;
        }
        if addr == 0xFF26 {
            self.write_power(val);
            return;
        }
        if !self.master_enable && addr < 0xFF30 {
            return;
        }
        self.regs[(addr - 0xFF10) as usize] = val;
        apu_trace!("APU write {:04X}={:02X} at {}", addr, val, self.now);
        match addr {
            0xFF10 => {
                if let Some(sweep) = self.ch1.sweep.as_mut() {
                    sweep.write(val);
                }
            }
            0xFF11 => self.ch1.write_length(val),
            0xFF12 => self.ch1.envelope.write(val),
            0xFF13 => self.ch1.phase.set_low(val),
            0xFF14 => self.ch1.write_control(val),
            0xFF16 => self.ch2.write_length(val),
            0xFF17 => self.ch2.envelope.write(val),
            0xFF18 => self.ch2.phase.set_low(val),
            0xFF19 => self.ch2.write_control(val),
            0xFF1A => self.ch3.dac_power = val & 0x80 != 0,
            0xFF1B => self.ch3.length.value = 256 - val as u16,
            0xFF1C => self.ch3.write_volume(val),
            0xFF1D => self.ch3.phase.set_low(val),
            0xFF1E => self.ch3.write_control(val),
            0xFF20 => self.ch4.length.value = 64 - (val & 0x3F) as u16,
            0xFF21 => self.ch4.envelope.write(val),
            0xFF22 => self.ch4.write_polynomial(val),
            0xFF23 => self.ch4.write_control(val),
            0xFF24 => {
                self.left_volume = (val >> 4) & 0x07;
                self.right_volume = val & 0x07;
            }
            0xFF25 => self.panning = val,
            0xFF30..=0xFF3F => self.ch3.write_table((addr - 0xFF30) as usize, val),
            _ => {}
        }
    }

    fn write_power(&mut self, val: u8) {
        let was_on = self.master_enable;
        self.master_enable = val & 0x80 != 0;
        if self.master_enable && !was_on {
            self.turned_on_at = self.now;
            self.frame_sequencer.reset();
            self.sample_clock.reset();
            self.sample_counter = 0;
            self.speed_counter_a = 0;
            self.speed_counter_b = 0;
            self.last_sample = StereoSample::default();
        } else if !self.master_enable && was_on {
            let table = self.ch3.table;
            self.regs[..0x16].fill(0);
            self.ch1 = SquareChannel::new(true);
            self.ch2 = SquareChannel::new(false);
            self.ch3 = WaveChannel {
                table,
                ..WaveChannel::default()
            };
            self.ch4 = NoiseChannel::default();
            self.left_volume = 0;
            self.right_volume = 0;
            self.panning = 0;
        }
    }

    /// Catch up with the system clock.
    pub fn update(&mut self, now: u64) {
        self.now = now;
        let t = now - self.turned_on_at;
        self.ch4.update(t);
        for tick in self.frame_sequencer.update(t) {
            self.frame_sequencer_tick(tick);
        }
        for _ in self.sample_clock.update(t) {
            self.sample_tick();
        }
    }

    fn frame_sequencer_tick(&mut self, tick: u64) {
        if !self.master_enable {
            return;
        }
        let events = frame_sequencer_events(tick);
        if events.length {
            self.ch1.length.clock();
            self.ch2.length.clock();
            self.ch3.length.clock();
            self.ch4.length.clock();
        }
        if events.envelope {
            self.ch1.envelope.clock();
            self.ch2.envelope.clock();
            self.ch4.envelope.clock();
        }
        if events.sweep {
            self.ch1.sweep_event(false);
        }
    }

    fn compute_sample(&mut self) -> StereoSample {
        let sample_no = self.sample_counter;
        self.sample_counter += 1;
        if !self.master_enable {
            return StereoSample::default();
        }

        let channels = [
            self.ch1.render(sample_no),
            self.ch2.render(sample_no),
            self.ch3.render(sample_no),
            self.ch4.render(),
        ];
        let (mut left, mut right) = (0i32, 0i32);
        for (ch, value) in channels.into_iter().enumerate() {
            if self.panning & (1 << (ch + 4)) != 0 {
                left += value;
            }
            if self.panning & (1 << ch) != 0 {
                right += value;
            }
        }
        left = self.filter_left.update(left / 4);
        right = self.filter_right.update(right / 4);
        left = left * (self.left_volume as i32 + 1) / 8;
        right = right * (self.right_volume as i32 + 1) / 8;

        StereoSample {
            left: left.clamp(i16::MIN as i32, INT16_MAX) as i16,
            right: right.clamp(i16::MIN as i32, INT16_MAX) as i16,
        }
    }

    fn write_sample(&mut self) {
        self.frame.samples[self.frame_position] = self.last_sample;
        self.frame_position += 1;
        if self.frame_position >= AUDIO_FRAME_LEN {
            self.frame_position = 0;
            self.queue.publish(&mut self.frame);
            self.frame_no += 1;
            self.frame.frame_no = self.frame_no;
            self.frame.samples.fill(StereoSample::default());
        }
    }

    fn sample_tick(&mut self) {
        if self.speed_multiplier == FIXED_POINT_UNIT {
            self.last_sample = self.compute_sample();
            self.write_sample();
            return;
        }

        if self.speed_multiplier < FIXED_POINT_UNIT {
            while self.speed_counter_a >= self.speed_counter_b {
                self.write_sample();
                self.speed_counter_b += self.speed_multiplier;
            }
            self.last_sample = self.compute_sample();
            self.speed_counter_a += FIXED_POINT_UNIT;
            return;
        }

        self.last_sample = self.compute_sample();
        let skip = self.speed_counter_a <= self.speed_counter_b;
        self.speed_counter_a += FIXED_POINT_UNIT;
        if skip {
            return;
        }
        self.write_sample();
        self.speed_counter_b += self.speed_multiplier;
    }
}
