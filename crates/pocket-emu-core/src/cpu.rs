use crate::bus::Bus;
use crate::clock::M_CYCLE;
use crate::error::EmuError;
use crate::registers::{FLAG_C, FLAG_H, FLAG_N, FLAG_Z, Registers};

#[cfg(feature = "cpu-trace")]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {
        log::trace!($($arg)*);
    };
}
#[cfg(not(feature = "cpu-trace"))]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {};
}

// Interrupt vectors (gbdev.io/pandocs/Interrupts.html)
const INTERRUPT_VECTOR_BASE: u16 = 0x40;

/// Opcodes with no instruction behind them. Executing one locks up real
/// hardware.
const ILLEGAL_OPCODES: [u8; 11] = [
    0xD3, 0xDB, 0xDD, 0xE3, 0xE4, 0xEB, 0xEC, 0xED, 0xF4, 0xFC, 0xFD,
];

/// HL operand index in the 3-bit register encoding.
const HL_INDIRECT: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    Running,
    Halted,
    /// Waiting for a button press.
    Stopped,
}

pub struct Cpu {
    pub regs: Registers,
    pub ime: bool,
    pub state: CpuState,
    /// EI was the previous instruction; IME turns on after the current one.
    ei_delay: bool,
    /// The next opcode fetch does not increment PC.
    halt_bug: bool,
    /// Cycles spent by the step in progress.
    cycles: u32,
}

impl Cpu {
    /// Power-on state, starting at the boot ROM.
    pub fn new() -> Self {
        Self::with_registers(Registers::power_on())
    }

    /// State the boot ROM leaves behind, starting at 0x0100.
    pub fn post_boot() -> Self {
        Self::with_registers(Registers::post_boot())
    }

    fn with_registers(regs: Registers) -> Self {
        Self {
            regs,
            ime: false,
            state: CpuState::Running,
            ei_delay: false,
            halt_bug: false,
            cycles: 0,
        }
    }

    fn idle(&mut self) {
        self.cycles += M_CYCLE;
    }

    fn read8(&mut self, bus: &Bus, addr: u16) -> u8 {
        self.cycles += M_CYCLE;
        bus.read(addr)
    }

    fn write8(&mut self, bus: &mut Bus, addr: u16, val: u8) {
        self.cycles += M_CYCLE;
        bus.write(addr, val);
    }

    fn fetch8(&mut self, bus: &Bus) -> u8 {
        let val = self.read8(bus, self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        val
    }

    fn fetch16(&mut self, bus: &Bus) -> u16 {
        let lo = self.fetch8(bus);
        let hi = self.fetch8(bus);
        u16::from_le_bytes([lo, hi])
    }

    fn push16(&mut self, bus: &mut Bus, val: u16) {
        let [hi, lo] = val.to_be_bytes();
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.write8(bus, self.regs.sp, hi);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.write8(bus, self.regs.sp, lo);
    }

    fn pop16(&mut self, bus: &Bus) -> u16 {
        let lo = self.read8(bus, self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        let hi = self.read8(bus, self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        u16::from_le_bytes([lo, hi])
    }

    fn read_operand(&mut self, bus: &Bus, index: u8) -> u8 {
        if index == HL_INDIRECT {
            self.read8(bus, self.regs.hl())
        } else {
            self.regs.get8(index)
        }
    }

    fn write_operand(&mut self, bus: &mut Bus, index: u8, val: u8) {
        if index == HL_INDIRECT {
            self.write8(bus, self.regs.hl(), val);
        } else {
            self.regs.set8(index, val);
        }
    }

    /// Condition encoded in bits 3-4: NZ, Z, NC, C.
    fn condition(&self, opcode: u8) -> bool {
        match (opcode >> 3) & 0x03 {
            0 => !self.regs.flag(FLAG_Z),
            1 => self.regs.flag(FLAG_Z),
            2 => !self.regs.flag(FLAG_C),
            _ => self.regs.flag(FLAG_C),
        }
    }

    /// Push PC and jump to the highest-priority pending vector.
    fn service_interrupt(&mut self, bus: &mut Bus, pending: u8) {
        let bit = pending.trailing_zeros() as u16;
        let mask = 1u8 << bit;
        cpu_trace!("Servicing interrupt {} from {:04X}", bit, self.regs.pc);
        self.ime = false;
        bus.acknowledge_interrupt(mask);
        self.idle();
        self.idle();
        self.push16(bus, self.regs.pc);
        self.regs.pc = INTERRUPT_VECTOR_BASE + 8 * bit;
        self.idle();
    }

    /// Execute one instruction, or service one interrupt, and return the
    /// cycles it took. Pending OAM DMA is performed first.
    pub fn step(&mut self, bus: &mut Bus) -> Result<u32, EmuError> {
        self.cycles = 0;
        bus.run_pending_dma()?;

        match self.state {
            CpuState::Stopped => {
                if bus.any_button_held() {
                    self.state = CpuState::Running;
                }
                return Ok(M_CYCLE);
            }
            CpuState::Halted => {
                if bus.pending_interrupts() == 0 {
                    return Ok(M_CYCLE);
                }
                self.state = CpuState::Running;
            }
            CpuState::Running => {}
        }

        let pending = bus.pending_interrupts();
        if self.ime && pending != 0 {
            self.service_interrupt(bus, pending);
            return Ok(self.cycles);
        }

        let enable_ime = std::mem::take(&mut self.ei_delay);
        let pc = self.regs.pc;
        let opcode = if self.halt_bug {
            self.halt_bug = false;
            self.read8(bus, pc)
        } else {
            self.fetch8(bus)
        };
        cpu_trace!("{:04X}: {:02X} {:?}", pc, opcode, self.regs);

        self.execute(bus, opcode, pc, enable_ime)?;
        if enable_ime && opcode != 0xF3 {
            self.ime = true;
        }
        Ok(self.cycles)
    }

    fn execute(&mut self, bus: &mut Bus, opcode: u8, pc: u16, enable_ime: bool) -> Result<(), EmuError> {
        match opcode {
            0x00 => {}
            0x01 | 0x11 | 0x21 | 0x31 => {
                let val = self.fetch16(bus);
                self.regs.set_pair(Registers::pair_sp(opcode >> 4), val);
            }
            0x02 | 0x12 => {
                let addr = self.regs.pair(Registers::pair_sp(opcode >> 4));
                self.write8(bus, addr, self.regs.a);
            }
            0x22 | 0x32 => {
                let addr = self.regs.hl();
                self.write8(bus, addr, self.regs.a);
                self.regs.set_hl(Self::step_hl(addr, opcode));
            }
            0x0A | 0x1A => {
                let addr = self.regs.pair(Registers::pair_sp(opcode >> 4));
                self.regs.a = self.read8(bus, addr);
            }
            0x2A | 0x3A => {
                let addr = self.regs.hl();
                self.regs.a = self.read8(bus, addr);
                self.regs.set_hl(Self::step_hl(addr, opcode));
            }
            0x03 | 0x13 | 0x23 | 0x33 => {
                let pair = Registers::pair_sp(opcode >> 4);
                self.regs.set_pair(pair, self.regs.pair(pair).wrapping_add(1));
                self.idle();
            }
            0x0B | 0x1B | 0x2B | 0x3B => {
                let pair = Registers::pair_sp(opcode >> 4);
                self.regs.set_pair(pair, self.regs.pair(pair).wrapping_sub(1));
                self.idle();
            }
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C => {
                let r = (opcode >> 3) & 0x07;
                let val = self.read_operand(bus, r);
                let res = val.wrapping_add(1);
                self.regs.set_flag(FLAG_Z, res == 0);
                self.regs.set_flag(FLAG_N, false);
                self.regs.set_flag(FLAG_H, val & 0x0F == 0x0F);
                self.write_operand(bus, r, res);
            }
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D => {
                let r = (opcode >> 3) & 0x07;
                let val = self.read_operand(bus, r);
                let res = val.wrapping_sub(1);
                self.regs.set_flag(FLAG_Z, res == 0);
                self.regs.set_flag(FLAG_N, true);
                self.regs.set_flag(FLAG_H, val & 0x0F == 0);
                self.write_operand(bus, r, res);
            }
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x36 | 0x3E => {
                let val = self.fetch8(bus);
                self.write_operand(bus, (opcode >> 3) & 0x07, val);
            }
            // RLCA, RRCA, RLA, RRA: the CB rotations on A with Z cleared
            0x07 | 0x0F | 0x17 | 0x1F => {
                let res = self.rotate_shift(opcode >> 3, self.regs.a);
                self.regs.a = res;
                self.regs.set_flag(FLAG_Z, false);
            }
            0x08 => {
                let addr = self.fetch16(bus);
                let [hi, lo] = self.regs.sp.to_be_bytes();
                self.write8(bus, addr, lo);
                self.write8(bus, addr.wrapping_add(1), hi);
            }
            0x09 | 0x19 | 0x29 | 0x39 => {
                let hl = self.regs.hl();
                let val = self.regs.pair(Registers::pair_sp(opcode >> 4));
                let (res, carry) = hl.overflowing_add(val);
                self.regs.set_flag(FLAG_N, false);
                self.regs.set_flag(FLAG_H, (hl & 0x0FFF) + (val & 0x0FFF) > 0x0FFF);
                self.regs.set_flag(FLAG_C, carry);
                self.regs.set_hl(res);
                self.idle();
            }
            0x10 => {
                // STOP is two bytes long
                self.fetch8(bus);
                bus.reset_divider();
                self.state = CpuState::Stopped;
            }
            0x18 => {
                let offset = self.fetch8(bus) as i8;
                self.jump_relative(offset);
            }
            0x20 | 0x28 | 0x30 | 0x38 => {
                let offset = self.fetch8(bus) as i8;
                if self.condition(opcode) {
                    self.jump_relative(offset);
                }
            }
            0x27 => self.daa(),
            0x2F => {
                self.regs.a = !self.regs.a;
                self.regs.set_flag(FLAG_N, true);
                self.regs.set_flag(FLAG_H, true);
            }
            0x37 => {
                self.regs.set_flag(FLAG_N, false);
                self.regs.set_flag(FLAG_H, false);
                self.regs.set_flag(FLAG_C, true);
            }
            0x3F => {
                let carry = self.regs.flag(FLAG_C);
                self.regs.set_flag(FLAG_N, false);
                self.regs.set_flag(FLAG_H, false);
                self.regs.set_flag(FLAG_C, !carry);
            }
            0x76 => self.halt(bus, enable_ime),
            0x40..=0x7F => {
                let val = self.read_operand(bus, opcode & 0x07);
                self.write_operand(bus, (opcode >> 3) & 0x07, val);
            }
            0x80..=0xBF => {
                let val = self.read_operand(bus, opcode & 0x07);
                self.alu(opcode >> 3, val);
            }
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let val = self.fetch8(bus);
                self.alu(opcode >> 3, val);
            }
            0xC0 | 0xC8 | 0xD0 | 0xD8 => {
                self.idle();
                if self.condition(opcode) {
                    self.regs.pc = self.pop16(bus);
                    self.idle();
                }
            }
            0xC9 => {
                self.regs.pc = self.pop16(bus);
                self.idle();
            }
            0xD9 => {
                self.regs.pc = self.pop16(bus);
                self.idle();
                self.ime = true;
            }
            0xC1 | 0xD1 | 0xE1 | 0xF1 => {
                let val = self.pop16(bus);
                self.regs.set_pair(Registers::pair_af(opcode >> 4), val);
            }
            0xC5 | 0xD5 | 0xE5 | 0xF5 => {
                let val = self.regs.pair(Registers::pair_af(opcode >> 4));
                self.idle();
                self.push16(bus, val);
            }
            0xC2 | 0xCA | 0xD2 | 0xDA => {
                let addr = self.fetch16(bus);
                if self.condition(opcode) {
                    self.regs.pc = addr;
                    self.idle();
                }
            }
            0xC3 => {
                self.regs.pc = self.fetch16(bus);
                self.idle();
            }
            0xC4 | 0xCC | 0xD4 | 0xDC => {
                let addr = self.fetch16(bus);
                if self.condition(opcode) {
                    self.call(bus, addr);
                }
            }
            0xCD => {
                let addr = self.fetch16(bus);
                self.call(bus, addr);
            }
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                self.call(bus, (opcode & 0x38) as u16);
            }
            0xCB => {
                let cb = self.fetch8(bus);
                self.execute_cb(bus, cb);
            }
            0xE0 => {
                let offset = self.fetch8(bus);
                self.write8(bus, 0xFF00 | offset as u16, self.regs.a);
            }
            0xF0 => {
                let offset = self.fetch8(bus);
                self.regs.a = self.read8(bus, 0xFF00 | offset as u16);
            }
            0xE2 => {
                self.write8(bus, 0xFF00 | self.regs.c as u16, self.regs.a);
            }
            0xF2 => {
                self.regs.a = self.read8(bus, 0xFF00 | self.regs.c as u16);
            }
            0xEA => {
                let addr = self.fetch16(bus);
                self.write8(bus, addr, self.regs.a);
            }
            0xFA => {
                let addr = self.fetch16(bus);
                self.regs.a = self.read8(bus, addr);
            }
            0xE8 => {
                let offset = self.fetch8(bus);
                self.regs.sp = self.sp_plus(offset);
                self.idle();
                self.idle();
            }
            0xF8 => {
                let offset = self.fetch8(bus);
                let res = self.sp_plus(offset);
                self.regs.set_hl(res);
                self.idle();
            }
            0xF9 => {
                self.regs.sp = self.regs.hl();
                self.idle();
            }
            0xE9 => self.regs.pc = self.regs.hl(),
            0xF3 => {
                self.ime = false;
            }
            0xFB => {
                self.ei_delay = true;
            }
            _ => {
                debug_assert!(ILLEGAL_OPCODES.contains(&opcode));
                return Err(EmuError::IllegalOpcode { opcode, pc });
            }
        }
        Ok(())
    }

    fn halt(&mut self, bus: &Bus, enable_ime: bool) {
        let pending = bus.pending_interrupts() != 0;
        if enable_ime && pending {
            // EI; HALT with an interrupt waiting: the interrupt is taken right
            // away and returns to the HALT, which then runs again.
            self.regs.pc = self.regs.pc.wrapping_sub(1);
        } else if !self.ime && pending {
            self.halt_bug = true;
        } else {
            self.state = CpuState::Halted;
        }
    }

    fn call(&mut self, bus: &mut Bus, addr: u16) {
        self.idle();
        self.push16(bus, self.regs.pc);
        self.regs.pc = addr;
    }

    fn jump_relative(&mut self, offset: i8) {
        self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
        self.idle();
    }

    fn step_hl(addr: u16, opcode: u8) -> u16 {
        if opcode & 0x10 == 0 {
            addr.wrapping_add(1)
        } else {
            addr.wrapping_sub(1)
        }
    }

    /// SP plus a signed offset; flags come from the unsigned low-byte add.
    fn sp_plus(&mut self, offset: u8) -> u16 {
        let sp = self.regs.sp;
        let res = sp.wrapping_add(offset as i8 as u16);
        self.regs.set_flags(
            false,
            false,
            (sp & 0x0F) + (offset as u16 & 0x0F) > 0x0F,
            (sp & 0xFF) + offset as u16 > 0xFF,
        );
        res
    }

    /// ADD, ADC, SUB, SBC, AND, XOR, OR, CP selected by bits 3-5.
    fn alu(&mut self, op: u8, val: u8) {
        let a = self.regs.a;
        let carry_in = self.regs.flag(FLAG_C) as u8;
        match op & 0x07 {
            0 | 1 => {
                let c = if op & 0x07 == 1 { carry_in } else { 0 };
                let res = a as u16 + val as u16 + c as u16;
                self.regs.a = res as u8;
                self.regs.set_flags(
                    res as u8 == 0,
                    false,
                    (a & 0x0F) + (val & 0x0F) + c > 0x0F,
                    res > 0xFF,
                );
            }
            2 | 3 | 7 => {
                let c = if op & 0x07 == 3 { carry_in } else { 0 };
                let res = (a as i16) - (val as i16) - (c as i16);
                self.regs.set_flags(
                    res as u8 == 0,
                    true,
                    ((a & 0x0F) as i16) - ((val & 0x0F) as i16) - (c as i16) < 0,
                    res < 0,
                );
                if op & 0x07 != 7 {
                    self.regs.a = res as u8;
                }
            }
            4 => {
                self.regs.a = a & val;
                self.regs.set_flags(self.regs.a == 0, false, true, false);
            }
            5 => {
                self.regs.a = a ^ val;
                self.regs.set_flags(self.regs.a == 0, false, false, false);
            }
            _ => {
                self.regs.a = a | val;
                self.regs.set_flags(self.regs.a == 0, false, false, false);
            }
        }
    }

    fn daa(&mut self) {
        let mut correction = 0u8;
        let mut carry = false;
        let subtract = self.regs.flag(FLAG_N);
        if self.regs.flag(FLAG_H) || (!subtract && (self.regs.a & 0x0F) > 9) {
            correction |= 0x06;
        }
        if self.regs.flag(FLAG_C) || (!subtract && self.regs.a > 0x99) {
            correction |= 0x60;
            carry = true;
        }
        self.regs.a = if subtract {
            self.regs.a.wrapping_sub(correction)
        } else {
            self.regs.a.wrapping_add(correction)
        };
        self.regs.set_flags(self.regs.a == 0, subtract, false, carry);
    }

    /// RLC, RRC, RL, RR, SLA, SRA, SWAP, SRL selected by bits 3-5.
    fn rotate_shift(&mut self, op: u8, val: u8) -> u8 {
        let carry_in = self.regs.flag(FLAG_C) as u8;
        let (res, carry) = match op & 0x07 {
            0 => (val.rotate_left(1), val & 0x80 != 0),
            1 => (val.rotate_right(1), val & 0x01 != 0),
            2 => ((val << 1) | carry_in, val & 0x80 != 0),
            3 => ((val >> 1) | (carry_in << 7), val & 0x01 != 0),
            4 => (val << 1, val & 0x80 != 0),
            5 => ((val >> 1) | (val & 0x80), val & 0x01 != 0),
            6 => (val.rotate_left(4), false),
            _ => (val >> 1, val & 0x01 != 0),
        };
        self.regs.set_flags(res == 0, false, false, carry);
        res
    }

    fn execute_cb(&mut self, bus: &mut Bus, opcode: u8) {
        let r = opcode & 0x07;
        let bit = (opcode >> 3) & 0x07;
        let val = self.read_operand(bus, r);
        match opcode {
            0x00..=0x3F => {
                let res = self.rotate_shift(bit, val);
                self.write_operand(bus, r, res);
            }
            0x40..=0x7F => {
                self.regs.set_flag(FLAG_Z, val & (1 << bit) == 0);
                self.regs.set_flag(FLAG_N, false);
                self.regs.set_flag(FLAG_H, true);
            }
            0x80..=0xBF => self.write_operand(bus, r, val & !(1 << bit)),
            _ => self.write_operand(bus, r, val | (1 << bit)),
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
