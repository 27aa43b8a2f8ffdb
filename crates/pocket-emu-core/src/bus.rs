use std::sync::Arc;

use log::debug;

use crate::apu::Apu;
use crate::boot_rom::BootRom;
use crate::cartridge::Cartridge;
use crate::clock::SystemClock;
use crate::error::EmuError;
use crate::input::{InputController, JOYPAD_INTERRUPT, Joypad};
use crate::ppu::{Ppu, RenderedFrame};
use crate::publishing::{AudioQueue, FrameSlot};

const WRAM_SIZE: usize = 0x2000;
const HRAM_SIZE: usize = 0x7F;
const OAM_DMA_LEN: u16 = 0xA0;

/// Unused IF bits always read back as 1.
const IF_UNUSED_BITS: u8 = 0xE0;
const INTERRUPT_MASK: u8 = 0x1F;

/// Queues the bus hands to the host side.
#[derive(Clone)]
pub struct Outputs {
    pub video: Arc<FrameSlot<RenderedFrame>>,
    pub audio: Arc<AudioQueue>,
    pub input: Arc<InputController>,
}

impl Default for Outputs {
    fn default() -> Self {
        Self {
            video: Arc::new(FrameSlot::new()),
            audio: Arc::new(AudioQueue::default()),
            input: Arc::new(InputController::new()),
        }
    }
}

/// The memory controller. Every CPU access goes through [`Bus::read`] and
/// [`Bus::write`], which dispatch purely on the address.
pub struct Bus {
    cartridge: Cartridge,
    /// Mapped over 0x0000-0x00FF while present.
    boot_rom: Option<BootRom>,
    wram: [u8; WRAM_SIZE],
    hram: [u8; HRAM_SIZE],
    ie: u8,
    if_reg: u8,
    serial_data: u8,
    serial_control: u8,
    pub clock: SystemClock,
    pub ppu: Ppu,
    pub apu: Apu,
    pub joypad: Joypad,
    dma_pending: Option<u8>,
}

impl Bus {
    pub fn new(cartridge: Cartridge, outputs: &Outputs) -> Self {
        Self {
            cartridge,
            boot_rom: None,
            wram: [0; WRAM_SIZE],
            hram: [0; HRAM_SIZE],
            ie: 0,
            if_reg: IF_UNUSED_BITS,
            serial_data: 0,
            serial_control: 0,
            clock: SystemClock::new(),
            ppu: Ppu::new(Arc::clone(&outputs.video)),
            apu: Apu::new(Arc::clone(&outputs.audio)),
            joypad: Joypad::new(Arc::clone(&outputs.input)),
            dma_pending: None,
        }
    }

    pub fn map_boot_rom(&mut self, boot_rom: BootRom) {
        self.boot_rom = Some(boot_rom);
    }

    pub fn boot_rom_mapped(&self) -> bool {
        self.boot_rom.is_some()
    }

    /// I/O state the boot ROM leaves behind, for starting directly at 0x0100.
    pub fn apply_post_boot(&mut self) {
        self.if_reg = IF_UNUSED_BITS | 0x01;
        self.ppu.apply_post_boot();
        self.apu.apply_post_boot();
    }

    pub fn cartridge(&self) -> &Cartridge {
        &self.cartridge
    }

    pub fn cartridge_mut(&mut self) -> &mut Cartridge {
        &mut self.cartridge
    }

    pub fn interrupt_flags(&self) -> u8 {
        self.if_reg
    }

    pub fn interrupt_enable(&self) -> u8 {
        self.ie
    }

    /// Interrupts that are both requested and enabled.
    pub fn pending_interrupts(&self) -> u8 {
        self.ie & self.if_reg & INTERRUPT_MASK
    }

    pub fn request_interrupt(&mut self, mask: u8) {
        self.if_reg |= mask & INTERRUPT_MASK;
    }

    pub fn acknowledge_interrupt(&mut self, mask: u8) {
        self.if_reg &= !mask;
    }

    /// Used by STOP.
    pub fn reset_divider(&mut self) {
        self.clock.reset_div(&mut self.if_reg);
    }

    pub fn any_button_held(&self) -> bool {
        self.joypad.controller().state().bits() != 0
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x00FF if self.boot_rom.is_some() => self
                .boot_rom
                .as_ref()
                .map_or(0xFF, |boot| boot.read(addr)),
            0x0000..=0x7FFF | 0xA000..=0xBFFF => self.cartridge.read(addr),
            0x8000..=0x9FFF => {
                if self.ppu.vram_accessible() {
                    self.ppu.vram[(addr - 0x8000) as usize]
                } else {
                    0xFF
                }
            }
            0xC000..=0xDFFF => self.wram[(addr - 0xC000) as usize],
            0xE000..=0xFDFF => self.wram[(addr - 0xE000) as usize],
            0xFE00..=0xFE9F => {
                if self.ppu.oam_accessible() {
                    self.ppu.oam[(addr - 0xFE00) as usize]
                } else {
                    0xFF
                }
            }
            0xFEA0..=0xFEFF => 0x00,
            0xFF00 => self.joypad.read(),
            0xFF01 => self.serial_data,
            0xFF02 => self.serial_control | 0x7E,
            0xFF04..=0xFF07 => self.clock.read(addr),
            0xFF0F => self.if_reg,
            0xFF10..=0xFF3F => self.apu.read_reg(addr),
            0xFF40..=0xFF4B => self.ppu.read_reg(addr),
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize],
            0xFFFF => self.ie,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => self.cartridge.write(addr, val),
            0x8000..=0x9FFF => {
                if self.ppu.vram_accessible() {
                    self.ppu.vram[(addr - 0x8000) as usize] = val;
                }
            }
            0xC000..=0xDFFF => self.wram[(addr - 0xC000) as usize] = val,
            0xE000..=0xFDFF => self.wram[(addr - 0xE000) as usize] = val,
            0xFE00..=0xFE9F => {
                if self.ppu.oam_accessible() {
                    self.ppu.oam[(addr - 0xFE00) as usize] = val;
                }
            }
            0xFEA0..=0xFEFF => {}
            0xFF00 => self.joypad.write(val),
            0xFF01 => self.serial_data = val,
            0xFF02 => self.serial_control = val & 0x81,
            0xFF04..=0xFF07 => self.clock.write(addr, val, &mut self.if_reg),
            0xFF0F => self.if_reg = (val & INTERRUPT_MASK) | IF_UNUSED_BITS,
            0xFF10..=0xFF3F => self.apu.write_reg(addr, val),
            0xFF46 => {
                self.ppu.write_reg(addr, val);
                self.dma_pending = Some(val);
            }
            0xFF40..=0xFF4B => self.ppu.write_reg(addr, val),
            0xFF50 => {
                if val != 0 && self.boot_rom.take().is_some() {
                    debug!("Boot ROM disabled at clock {}", self.clock.now());
                }
            }
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize] = val,
            0xFFFF => self.ie = val,
            _ => {}
        }
    }

    pub fn dma_pending(&self) -> bool {
        self.dma_pending.is_some()
    }

    /// Copy the 160-byte OAM image requested by the last 0xFF46 write. The
    /// PPU's access gating is lifted for the duration of the copy.
    pub fn run_pending_dma(&mut self) -> Result<(), EmuError> {
        let Some(page) = self.dma_pending.take() else {
            return Ok(());
        };
        let src = (page as u16) << 8;
        if page == 0xFE {
            return Err(EmuError::DmaOverlap { addr: src });
        }
        let gating = self.ppu.force_access();
        for i in 0..OAM_DMA_LEN {
            let val = self.read(src + i);
            self.ppu.oam[i as usize] = val;
        }
        self.ppu.restore_access(gating);
        Ok(())
    }

    /// Advance the clock and the devices driven by it. Returns true at a
    /// display frame boundary.
    pub fn advance(&mut self, cycles: u32) -> bool {
        self.clock.advance(cycles, &mut self.if_reg);
        let now = self.clock.now();
        let frame_boundary = self.ppu.update(now, &mut self.if_reg);
        self.apu.update(now);
        if self.joypad.controller().take_button_down() {
            self.if_reg |= JOYPAD_INTERRUPT;
        }
        frame_boundary
    }
}
