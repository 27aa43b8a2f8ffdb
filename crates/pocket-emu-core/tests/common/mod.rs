#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;
use pocket_emu_core::cartridge::Cartridge;
use pocket_emu_core::host::{DateTimeProvider, HostServices, StdStorage};

pub const ROM_BANK_SIZE: usize = 0x4000;

/// Eight-bank MBC1 image whose banks start with their own index.
pub static MBC1_ROM: Lazy<Vec<u8>> = Lazy::new(|| banked_rom(0x01, 0x02, 0x00));

/// A header-only image of the given type, sized from the ROM size code.
/// Byte 0 of every bank holds the bank number.
pub fn banked_rom(cart_type: u8, rom_code: u8, ram_code: u8) -> Vec<u8> {
    let banks = 2usize << rom_code;
    let mut rom = vec![0u8; ROM_BANK_SIZE * banks];
    for bank in 1..banks {
        rom[bank * ROM_BANK_SIZE] = bank as u8;
    }
    rom[0x0147] = cart_type;
    rom[0x0148] = rom_code;
    rom[0x0149] = ram_code;
    rom
}

/// A 32 KiB ROM-only image running `code` from the entry point.
pub fn program_rom(code: &[u8]) -> Vec<u8> {
    let mut rom = banked_rom(0x00, 0x00, 0x00);
    rom[0x0100..0x0100 + code.len()].copy_from_slice(code);
    rom
}

pub fn program(code: &[u8]) -> Cartridge {
    Cartridge::from_bytes(program_rom(code)).unwrap()
}

/// Wall clock that only moves when told to.
#[derive(Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn at(seconds: f64) -> Arc<Self> {
        let clock = Arc::new(Self::default());
        clock.set(seconds);
        clock
    }

    pub fn set(&self, seconds: f64) {
        self.bits.store(seconds.to_bits(), Ordering::SeqCst);
    }
}

impl DateTimeProvider for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

pub fn services(clock: Arc<ManualClock>) -> HostServices {
    HostServices {
        storage: Arc::new(StdStorage::new()),
        datetime: clock,
    }
}

pub fn write_rom(dir: &Path, name: &str, rom: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, rom).unwrap();
    path
}
