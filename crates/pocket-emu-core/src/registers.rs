// CPU flag bits as documented in gbdev.io/pandocs/The_CPU_Flags.html
pub const FLAG_Z: u8 = 0x80; // Zero
pub const FLAG_N: u8 = 0x40; // Subtract
pub const FLAG_H: u8 = 0x20; // Half Carry
pub const FLAG_C: u8 = 0x10; // Carry

// Post-boot DMG register state from gbdev.io/pandocs/Power_Up_State.html
const DMG_BOOT_AF: u16 = 0x01B0;
const DMG_BOOT_BC: u16 = 0x0013;
const DMG_BOOT_DE: u16 = 0x00D8;
const DMG_BOOT_HL: u16 = 0x014D;
const BOOT_SP: u16 = 0xFFFE;
const BOOT_PC: u16 = 0x0100;

/// 16-bit register pairs addressable by the instruction encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pair {
    AF,
    BC,
    DE,
    HL,
    SP,
}

/// The LR35902 register file. The low nibble of F always reads zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registers {
    pub a: u8,
    f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub sp: u16,
    pub pc: u16,
}

impl Registers {
    /// All registers zeroed, PC at the boot ROM entry point.
    pub fn power_on() -> Self {
        Self::default()
    }

    /// Register state the DMG boot ROM leaves behind when it jumps to 0x0100.
    pub fn post_boot() -> Self {
        let mut regs = Self::default();
        regs.set_pair(Pair::AF, DMG_BOOT_AF);
        regs.set_pair(Pair::BC, DMG_BOOT_BC);
        regs.set_pair(Pair::DE, DMG_BOOT_DE);
        regs.set_pair(Pair::HL, DMG_BOOT_HL);
        regs.sp = BOOT_SP;
        regs.pc = BOOT_PC;
        regs
    }

    pub fn f(&self) -> u8 {
        self.f
    }

    pub fn set_f(&mut self, val: u8) {
        self.f = val & 0xF0;
    }

    pub fn pair(&self, pair: Pair) -> u16 {
        match pair {
            Pair::AF => u16::from_be_bytes([self.a, self.f]),
            Pair::BC => u16::from_be_bytes([self.b, self.c]),
            Pair::DE => u16::from_be_bytes([self.d, self.e]),
            Pair::HL => u16::from_be_bytes([self.h, self.l]),
            Pair::SP => self.sp,
        }
    }

    pub fn set_pair(&mut self, pair: Pair, val: u16) {
        let [hi, lo] = val.to_be_bytes();
        match pair {
            Pair::AF => {
                self.a = hi;
                self.set_f(lo);
            }
            Pair::BC => {
                self.b = hi;
                self.c = lo;
            }
            Pair::DE => {
                self.d = hi;
                self.e = lo;
            }
            Pair::HL => {
                self.h = hi;
                self.l = lo;
            }
            Pair::SP => self.sp = val,
        }
    }

    pub fn hl(&self) -> u16 {
        self.pair(Pair::HL)
    }

    pub fn set_hl(&mut self, val: u16) {
        self.set_pair(Pair::HL, val);
    }

    /// 8-bit register by its 3-bit opcode index. Index 6 is (HL) and is
    /// handled by the CPU, not here.
    pub fn get8(&self, index: u8) -> u8 {
        match index {
            0 => self.b,
            1 => self.c,
            2 => self.d,
            3 => self.e,
            4 => self.h,
            5 => self.l,
            7 => self.a,
            _ => 0xFF,
        }
    }

    pub fn set8(&mut self, index: u8, val: u8) {
        match index {
            0 => self.b = val,
            1 => self.c = val,
            2 => self.d = val,
            3 => self.e = val,
            4 => self.h = val,
            5 => self.l = val,
            7 => self.a = val,
            _ => {}
        }
    }

    /// Pair selected by bits 4-5 of LD/INC/DEC/ADD HL opcodes.
    pub fn pair_sp(index: u8) -> Pair {
        match index & 0x03 {
            0 => Pair::BC,
            1 => Pair::DE,
            2 => Pair::HL,
            _ => Pair::SP,
        }
    }

    /// Pair selected by bits 4-5 of PUSH/POP opcodes.
    pub fn pair_af(index: u8) -> Pair {
        match index & 0x03 {
            0 => Pair::BC,
            1 => Pair::DE,
            2 => Pair::HL,
            _ => Pair::AF,
        }
    }

    pub fn flag(&self, mask: u8) -> bool {
        self.f & mask != 0
    }

    pub fn set_flag(&mut self, mask: u8, on: bool) {
        if on {
            self.f |= mask;
        } else {
            self.f &= !mask;
        }
    }

    /// Replace all four flags at once.
    pub fn set_flags(&mut self, z: bool, n: bool, h: bool, c: bool) {
        self.f = if z { FLAG_Z } else { 0 }
            | if n { FLAG_N } else { 0 }
            | if h { FLAG_H } else { 0 }
            | if c { FLAG_C } else { 0 };
    }
}
