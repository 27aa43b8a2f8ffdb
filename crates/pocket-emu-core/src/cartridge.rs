use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

use crate::error::CartridgeError;
use crate::external_ram::ExternalRamBuffer;
use crate::host::{HostServices, SaveFileType, StorageProvider};

pub mod rtc;

use rtc::{RTC_FILE_SIZE, Rtc};

pub const ROM_BANK_SIZE: usize = 0x4000;
pub const RAM_BANK_SIZE: usize = 0x2000;

const HEADER_END: usize = 0x150;
const MAX_ROM_SIZE: usize = 8 << 20;
const RAM_SIZES: [usize; 6] = [0, 0x800, 0x2000, 0x8000, 0x20000, 0x10000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbcFamily {
    RomOnly,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc4,
    Mbc5,
    Mbc6,
    Mbc7,
    Mmm01,
    /// Camera, TAMA5, HuC1, HuC3.
    Special,
}

impl MbcFamily {
    fn from_type(code: u8) -> Option<Self> {
        Some(match code {
            0x00 | 0x08 | 0x09 => Self::RomOnly,
            0x01..=0x03 => Self::Mbc1,
            0x05 | 0x06 => Self::Mbc2,
            0x0B..=0x0D => Self::Mmm01,
            0x0F..=0x13 => Self::Mbc3,
            0x15..=0x17 => Self::Mbc4,
            0x19..=0x1E => Self::Mbc5,
            0x20 => Self::Mbc6,
            0x22 => Self::Mbc7,
            0xFC..=0xFF => Self::Special,
            _ => return None,
        })
    }
}

/// What the header says the cartridge contains. Fixed once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub cart_type: u8,
    pub family: MbcFamily,
    pub has_ram: bool,
    pub has_battery: bool,
    pub has_timer: bool,
    pub has_rumble: bool,
    pub ram_size: usize,
    pub rom_bank_count: usize,
}

impl Capability {
    pub fn from_header(rom: &[u8]) -> Result<Self, CartridgeError> {
        if rom.len() < HEADER_END {
            return Err(CartridgeError::Truncated { len: rom.len() });
        }
        let cart_type = rom[0x0147];
        let family = MbcFamily::from_type(cart_type).ok_or(CartridgeError::UnknownType(cart_type))?;

        let rom_code = rom[0x0148];
        let rom_bank_count = match rom_code {
            0x00..=0x07 => 1usize << (rom_code + 1),
            0x52 => 72,
            0x53 => 80,
            0x54 => 96,
            _ => return Err(CartridgeError::InvalidRomSize(rom_code)),
        };

        let ram_code = rom[0x0149];
        let ram_size = *RAM_SIZES
            .get(ram_code as usize)
            .ok_or(CartridgeError::InvalidRamSize(ram_code))?;

        let has_ram = matches!(
            cart_type,
            0x02 | 0x03
                | 0x08
                | 0x09
                | 0x0C
                | 0x0D
                | 0x10
                | 0x12
                | 0x13
                | 0x16
                | 0x17
                | 0x19
                | 0x1A
                | 0x1B
                | 0x1D
                | 0x1E
                | 0x22
        );

        Ok(Self {
            cart_type,
            family,
            has_ram,
            has_battery: matches!(
                cart_type,
                0x03 | 0x06 | 0x09 | 0x0D | 0x0F | 0x10 | 0x13 | 0x17 | 0x1B | 0x1E | 0x22
            ),
            has_timer: matches!(cart_type, 0x0F | 0x10),
            has_rumble: matches!(cart_type, 0x0C | 0x0D | 0x0E | 0x22),
            ram_size: if has_ram { ram_size } else { 0 },
            rom_bank_count,
        })
    }
}

struct Header<'a> {
    data: &'a [u8],
}

impl<'a> Header<'a> {
    fn parse(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn cgb_flag(&self) -> bool {
        matches!(self.data.get(0x0143), Some(0x80 | 0xC0))
    }

    fn title(&self) -> String {
        let end = if self.cgb_flag() { 0x013F } else { 0x0144 };
        let mut slice = self.data.get(0x0134..end).unwrap_or(&[]);
        if let Some(pos) = slice.iter().position(|&b| b == 0) {
            slice = &slice[..pos];
        }
        String::from_utf8_lossy(slice).trim().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mbc3Select {
    Ram(u8),
    Rtc(u8),
}

enum MbcState {
    RomOnly,
    Mbc1 {
        rom_bank: u8,
        bank_high: u8,
        mode: u8,
        ram_enable: bool,
    },
    Mbc3 {
        rom_bank: u8,
        select: Mbc3Select,
        ram_enable: bool,
        rtc: Option<Rtc>,
    },
}

struct SaveTarget {
    ram_path: PathBuf,
    rtc_path: PathBuf,
    storage: Arc<dyn StorageProvider>,
}

pub struct Cartridge {
    rom: Vec<u8>,
    ram: ExternalRamBuffer,
    pub capability: Capability,
    pub title: String,
    pub cgb: bool,
    mbc_state: MbcState,
    save: Option<SaveTarget>,
    pending_commit: Option<ExternalRamBuffer>,
}

impl std::fmt::Debug for Cartridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cartridge")
            .field("capability", &self.capability)
            .field("title", &self.title)
            .field("cgb", &self.cgb)
            .finish_non_exhaustive()
    }
}

impl Cartridge {
    /// Build a cartridge from a ROM image without any save files.
    pub fn from_bytes(rom: Vec<u8>) -> Result<Self, CartridgeError> {
        Self::from_bytes_with_services(rom, &HostServices::default())
    }

    pub fn from_bytes_with_services(
        rom: Vec<u8>,
        services: &HostServices,
    ) -> Result<Self, CartridgeError> {
        let capability = Capability::from_header(&rom)?;
        let header = Header::parse(&rom);
        let title = header.title();
        let cgb = header.cgb_flag();

        let mbc_state = match capability.family {
            MbcFamily::RomOnly => MbcState::RomOnly,
            MbcFamily::Mbc1 => MbcState::Mbc1 {
                rom_bank: 1,
                bank_high: 0,
                mode: 0,
                ram_enable: false,
            },
            MbcFamily::Mbc3 => MbcState::Mbc3 {
                rom_bank: 1,
                select: Mbc3Select::Ram(0),
                ram_enable: false,
                rtc: capability
                    .has_timer
                    .then(|| Rtc::new(Arc::clone(&services.datetime), None)),
            },
            family => {
                return Err(CartridgeError::Unsupported {
                    code: capability.cart_type,
                    family,
                });
            }
        };

        let full_size = capability.rom_bank_count * ROM_BANK_SIZE;
        if rom.len() < full_size {
            return Err(CartridgeError::ShortImage {
                expected: full_size,
                actual: rom.len(),
            });
        }

        Ok(Self {
            rom,
            ram: ExternalRamBuffer::new(capability.ram_size),
            capability,
            title,
            cgb,
            mbc_state,
            save: None,
            pending_commit: None,
        })
    }

    /// Load a ROM from disk, then restore its battery RAM and RTC through the
    /// host's storage provider.
    pub fn from_file<P: AsRef<Path>>(path: P, services: &HostServices) -> Result<Self, CartridgeError> {
        let path = path.as_ref();
        let rom = services
            .storage
            .load_file(path, MAX_ROM_SIZE)?
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))?;
        let mut cart = Self::from_bytes_with_services(rom, services)?;
        cart.post_load(path, services);

        info!(
            "Loaded ROM: {} ({:?}, {} ROM banks, {} bytes RAM{}{})",
            cart.title,
            cart.capability.family,
            cart.capability.rom_bank_count,
            cart.capability.ram_size,
            if cart.capability.has_battery { ", battery" } else { "" },
            if cart.capability.has_timer { ", RTC" } else { "" },
        );
        Ok(cart)
    }

    fn post_load(&mut self, rom_path: &Path, services: &HostServices) {
        let storage = Arc::clone(&services.storage);
        let target = SaveTarget {
            ram_path: storage.save_location(rom_path, SaveFileType::Ram),
            rtc_path: storage.save_location(rom_path, SaveFileType::Rtc),
            storage,
        };

        if self.capability.has_battery && !self.ram.is_empty() {
            match target.storage.load_file(&target.ram_path, self.ram.len()) {
                Ok(Some(bytes)) if bytes.len() >= self.ram.len() => self.ram.load(&bytes),
                Ok(Some(bytes)) => warn!(
                    "Ignoring short save file {} ({} of {} bytes)",
                    target.ram_path.display(),
                    bytes.len(),
                    self.ram.len()
                ),
                Ok(None) => {}
                Err(e) => warn!("Failed to read {}: {e}", target.ram_path.display()),
            }
        }

        if let MbcState::Mbc3 { rtc: Some(rtc), .. } = &mut self.mbc_state {
            let saved = match target.storage.load_file(&target.rtc_path, RTC_FILE_SIZE) {
                Ok(bytes) => bytes.as_deref().and_then(Rtc::start_from_bytes),
                Err(e) => {
                    warn!("Failed to read {}: {e}", target.rtc_path.display());
                    None
                }
            };
            *rtc = Rtc::new(Arc::clone(&services.datetime), saved);
        }

        self.save = Some(target);
        self.flush_rtc();
    }

    pub fn ram(&self) -> &ExternalRamBuffer {
        &self.ram
    }

    pub fn ram_save_path(&self) -> Option<&Path> {
        self.save.as_ref().map(|s| s.ram_path.as_path())
    }

    pub fn storage(&self) -> Option<&Arc<dyn StorageProvider>> {
        self.save.as_ref().map(|s| &s.storage)
    }

    /// RAM snapshot taken when the game last disabled modified RAM.
    pub fn take_ram_commit(&mut self) -> Option<ExternalRamBuffer> {
        self.pending_commit.take()
    }

    /// Snapshot of the current RAM if it changed since the last commit.
    pub fn uncommitted_ram(&mut self) -> Option<ExternalRamBuffer> {
        if !self.capability.has_battery || !self.ram.is_modified() {
            return None;
        }
        self.ram.reset_modified();
        Some(self.ram.snapshot())
    }

    /// Bank mapped at 0x4000-0x7FFF, or -1 when the cartridge has no banking.
    pub fn current_rom_bank(&self) -> i32 {
        let count = self.capability.rom_bank_count;
        match &self.mbc_state {
            MbcState::RomOnly => -1,
            MbcState::Mbc1 {
                rom_bank,
                bank_high,
                mode,
                ..
            } => mbc1_rom_bank(*rom_bank, *bank_high, *mode, count) as i32,
            MbcState::Mbc3 { rom_bank, .. } => wrap_rom_bank(*rom_bank as usize, count) as i32,
        }
    }

    fn rom_byte(&self, bank: usize, addr: u16) -> u8 {
        let offset = bank * ROM_BANK_SIZE + (addr as usize & (ROM_BANK_SIZE - 1));
        self.rom.get(offset).copied().unwrap_or(0xFF)
    }

    pub fn read(&self, addr: u16) -> u8 {
        match (&self.mbc_state, addr) {
            (_, 0x0000..=0x3FFF) => self.rom_byte(0, addr),
            (MbcState::RomOnly, 0x4000..=0x7FFF) => self.rom_byte(1, addr),
            (MbcState::RomOnly, 0xA000..=0xBFFF) => self.ram.read(addr as usize - 0xA000),
            (
                MbcState::Mbc1 {
                    rom_bank,
                    bank_high,
                    mode,
                    ..
                },
                0x4000..=0x7FFF,
            ) => self.rom_byte(
                mbc1_rom_bank(*rom_bank, *bank_high, *mode, self.capability.rom_bank_count),
                addr,
            ),
            (
                MbcState::Mbc1 {
                    ram_enable,
                    bank_high,
                    mode,
                    ..
                },
                0xA000..=0xBFFF,
            ) => {
                if *ram_enable {
                    self.ram
                        .read(mbc1_ram_offset(*bank_high, *mode, self.ram.len(), addr))
                } else {
                    0xFF
                }
            }
            (MbcState::Mbc3 { rom_bank, .. }, 0x4000..=0x7FFF) => self.rom_byte(
                wrap_rom_bank(*rom_bank as usize, self.capability.rom_bank_count),
                addr,
            ),
            (
                MbcState::Mbc3 {
                    select,
                    ram_enable,
                    rtc,
                    ..
                },
                0xA000..=0xBFFF,
            ) => {
                if !*ram_enable {
                    return 0xFF;
                }
                match select {
                    Mbc3Select::Ram(bank) => self
                        .ram
                        .read(*bank as usize * RAM_BANK_SIZE + (addr as usize - 0xA000)),
                    Mbc3Select::Rtc(reg) => rtc.as_ref().map(|r| r.read(*reg)).unwrap_or(0xFF),
                }
            }
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        let mut disabled_ram = false;
        let mut rtc_written = false;
        match (&mut self.mbc_state, addr) {
            (MbcState::RomOnly, 0xA000..=0xBFFF) => {
                self.ram.write(addr as usize - 0xA000, val);
            }
            (MbcState::Mbc1 { ram_enable, .. }, 0x0000..=0x1FFF)
            | (MbcState::Mbc3 { ram_enable, .. }, 0x0000..=0x1FFF) => {
                let enable = val & 0x0F == 0x0A;
                disabled_ram = *ram_enable && !enable;
                *ram_enable = enable;
            }
            (MbcState::Mbc1 { rom_bank, .. }, 0x2000..=0x3FFF) => {
                *rom_bank = val & 0x1F;
            }
            (MbcState::Mbc1 { bank_high, .. }, 0x4000..=0x5FFF) => {
                *bank_high = val & 0x03;
            }
            (MbcState::Mbc1 { mode, .. }, 0x6000..=0x7FFF) => {
                *mode = val & 0x01;
            }
            (
                MbcState::Mbc1 {
                    ram_enable: true,
                    bank_high,
                    mode,
                    ..
                },
                0xA000..=0xBFFF,
            ) => {
                let offset = mbc1_ram_offset(*bank_high, *mode, self.ram.len(), addr);
                self.ram.write(offset, val);
            }
            (MbcState::Mbc3 { rom_bank, .. }, 0x2000..=0x3FFF) => {
                *rom_bank = val & 0x7F;
            }
            (MbcState::Mbc3 { select, .. }, 0x4000..=0x5FFF) => match val {
                0x00..=0x03 => *select = Mbc3Select::Ram(val),
                0x08..=0x0C => *select = Mbc3Select::Rtc(val),
                _ => {}
            },
            (MbcState::Mbc3 { rtc, .. }, 0x6000..=0x7FFF) => {
                if let Some(rtc) = rtc {
                    rtc.write_latch(val);
                }
            }
            (
                MbcState::Mbc3 {
                    select,
                    ram_enable: true,
                    rtc,
                    ..
                },
                0xA000..=0xBFFF,
            ) => match *select {
                Mbc3Select::Ram(bank) => {
                    self.ram
                        .write(bank as usize * RAM_BANK_SIZE + (addr as usize - 0xA000), val);
                }
                Mbc3Select::Rtc(reg) => {
                    if let Some(rtc) = rtc {
                        rtc.write(reg, val);
                        rtc_written = true;
                    }
                }
            },
            _ => {}
        }

        if disabled_ram {
            self.commit_ram();
        }
        if rtc_written {
            self.flush_rtc();
        }
    }

    fn commit_ram(&mut self) {
        if let Some(snapshot) = self.uncommitted_ram() {
            self.pending_commit = Some(snapshot);
        }
    }

    /// Persist the RTC reference time if it changed.
    pub fn flush_rtc(&mut self) {
        let (MbcState::Mbc3 { rtc: Some(rtc), .. }, Some(save)) = (&mut self.mbc_state, &self.save)
        else {
            return;
        };
        if !rtc.take_dirty() {
            return;
        }
        if let Err(e) = save.storage.save_file(&save.rtc_path, &rtc.to_bytes()) {
            warn!("Failed to save RTC to {}: {e}", save.rtc_path.display());
        }
    }

    /// Unconditionally write the RTC file, used at shutdown.
    pub fn save_rtc(&mut self) {
        let (MbcState::Mbc3 { rtc: Some(rtc), .. }, Some(save)) = (&mut self.mbc_state, &self.save)
        else {
            return;
        };
        rtc.take_dirty();
        if let Err(e) = save.storage.save_file(&save.rtc_path, &rtc.to_bytes()) {
            warn!("Failed to save RTC to {}: {e}", save.rtc_path.display());
        }
    }
}

fn wrap_rom_bank(bank: usize, count: usize) -> usize {
    match bank % count {
        0 => 1,
        b => b,
    }
}

/// In mode 0 the two-bit register supplies ROM bank bits 5-6.
fn mbc1_rom_bank(rom_bank: u8, bank_high: u8, mode: u8, count: usize) -> usize {
    let high = if mode == 0 { (bank_high as usize) << 5 } else { 0 };
    wrap_rom_bank(high | rom_bank as usize, count)
}

fn mbc1_ram_offset(bank_high: u8, mode: u8, ram_len: usize, addr: u16) -> usize {
    let bank = if mode == 1 { bank_high as usize } else { 0 };
    let offset = bank * RAM_BANK_SIZE + (addr as usize - 0xA000);
    if ram_len == 0x800 { offset & 0x7FF } else { offset }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom_with_type(cart_type: u8, rom_code: u8, ram_code: u8) -> Vec<u8> {
        let mut rom = vec![0u8; ROM_BANK_SIZE * (2usize << rom_code)];
        rom[0x0147] = cart_type;
        rom[0x0148] = rom_code;
        rom[0x0149] = ram_code;
        rom
    }

    #[test]
    fn capability_flags_from_type_byte() {
        let cap = Capability::from_header(&rom_with_type(0x13, 0x02, 0x03)).unwrap();
        assert_eq!(cap.family, MbcFamily::Mbc3);
        assert!(cap.has_ram && cap.has_battery && !cap.has_timer);
        assert_eq!(cap.ram_size, 0x8000);
        assert_eq!(cap.rom_bank_count, 8);

        let cap = Capability::from_header(&rom_with_type(0x0F, 0x00, 0x00)).unwrap();
        assert!(cap.has_timer && cap.has_battery && !cap.has_ram);
    }

    #[test]
    fn odd_rom_size_codes() {
        let mut rom = rom_with_type(0x01, 0x00, 0x00);
        rom[0x0148] = 0x53;
        assert_eq!(Capability::from_header(&rom).unwrap().rom_bank_count, 80);
        rom[0x0148] = 0x09;
        assert!(matches!(
            Capability::from_header(&rom),
            Err(CartridgeError::InvalidRomSize(0x09))
        ));
    }

    #[test]
    fn title_is_shorter_with_cgb_flag() {
        let mut rom = rom_with_type(0x00, 0x00, 0x00);
        rom[0x0134..0x0144].copy_from_slice(b"POKEMON RED\0\0\0\0\0");
        assert_eq!(Header::parse(&rom).title(), "POKEMON RED");
        rom[0x0134..0x0144].copy_from_slice(b"ABCDEFGHIJKLMNOP");
        rom[0x0143] = 0x80;
        assert_eq!(Header::parse(&rom).title(), "ABCDEFGHIJK");
    }

    #[test]
    fn mbc1_mode1_moves_high_bits_to_ram() {
        let mut rom = rom_with_type(0x03, 0x06, 0x03);
        for bank in 0..128 {
            rom[bank * ROM_BANK_SIZE] = bank as u8;
        }
        let mut cart = Cartridge::from_bytes(rom).unwrap();
        cart.write(0x2000, 0x03);
        cart.write(0x4000, 0x01);
        assert_eq!(cart.read(0x4000), 0x23);

        cart.write(0x6000, 0x01);
        assert_eq!(cart.read(0x4000), 0x03);

        cart.write(0x0000, 0x0A);
        cart.write(0xA000, 0x99);
        cart.write(0x4000, 0x00);
        assert_eq!(cart.read(0xA000), 0x00);
        cart.write(0x4000, 0x01);
        assert_eq!(cart.read(0xA000), 0x99);
    }

    #[test]
    fn disabled_ram_reads_open_bus_and_ignores_writes() {
        let mut cart = Cartridge::from_bytes(rom_with_type(0x03, 0x01, 0x02)).unwrap();
        cart.write(0xA000, 0x12);
        assert_eq!(cart.read(0xA000), 0xFF);
        cart.write(0x0000, 0x0A);
        assert_eq!(cart.read(0xA000), 0x00);
    }

    #[test]
    fn small_mbc1_ram_is_mirrored() {
        let mut cart = Cartridge::from_bytes(rom_with_type(0x03, 0x01, 0x01)).unwrap();
        cart.write(0x0000, 0x0A);
        cart.write(0xA001, 0x42);
        assert_eq!(cart.read(0xA801), 0x42);
        assert_eq!(cart.read(0xB801), 0x42);

        cart.write(0xBFFF, 0x17);
        assert_eq!(cart.read(0xA7FF), 0x17);
        assert_eq!(cart.ram().len(), 0x800);

        // mode 1 bank select cannot reach past the single 2 KiB chip
        cart.write(0x6000, 0x01);
        cart.write(0x4000, 0x03);
        assert_eq!(cart.read(0xA001), 0x42);
    }

    #[test]
    fn disabling_modified_ram_commits_snapshot() {
        let mut cart = Cartridge::from_bytes(rom_with_type(0x03, 0x01, 0x02)).unwrap();
        cart.write(0x0000, 0x0A);
        cart.write(0xA010, 0x77);
        assert!(cart.take_ram_commit().is_none());

        cart.write(0x0000, 0x00);
        let snapshot = cart.take_ram_commit().expect("commit after disable");
        assert_eq!(snapshot.read(0x10), 0x77);

        cart.write(0x0000, 0x0A);
        cart.write(0x0000, 0x00);
        assert!(cart.take_ram_commit().is_none());
    }

    #[test]
    fn mbc3_bank_select_wraps_and_skips_zero() {
        let mut rom = rom_with_type(0x11, 0x02, 0x00);
        for bank in 0..8 {
            rom[bank * ROM_BANK_SIZE + 1] = 0x40 + bank as u8;
        }
        let mut cart = Cartridge::from_bytes(rom).unwrap();
        cart.write(0x2000, 0x00);
        assert_eq!(cart.current_rom_bank(), 1);
        cart.write(0x2000, 0x0B);
        assert_eq!(cart.current_rom_bank(), 3);
        assert_eq!(cart.read(0x4001), 0x43);
    }

    #[test]
    fn mbc3_invalid_selector_is_ignored() {
        let mut cart = Cartridge::from_bytes(rom_with_type(0x13, 0x01, 0x03)).unwrap();
        cart.write(0x0000, 0x0A);
        cart.write(0x4000, 0x01);
        cart.write(0xA000, 0x5A);
        cart.write(0x4000, 0x07);
        assert_eq!(cart.read(0xA000), 0x5A);
    }

    #[test]
    fn unsupported_families_fail_fast() {
        for code in [0x05u8, 0x0B, 0x15, 0x19, 0x20, 0x22, 0xFC, 0xFF] {
            let rom = rom_with_type(code, 0x01, 0x00);
            assert!(
                matches!(
                    Cartridge::from_bytes(rom),
                    Err(CartridgeError::Unsupported { code: c, .. }) if c == code
                ),
                "type {code:#04X}"
            );
        }
        assert!(matches!(
            Cartridge::from_bytes(rom_with_type(0x04, 0x01, 0x00)),
            Err(CartridgeError::UnknownType(0x04))
        ));
    }

    #[test]
    fn short_image_is_rejected() {
        assert!(matches!(
            Cartridge::from_bytes(vec![0; 0x100]),
            Err(CartridgeError::Truncated { len: 0x100 })
        ));
    }

    #[test]
    fn image_smaller_than_declared_banks_is_rejected() {
        let mut rom = rom_with_type(0x01, 0x00, 0x00);
        rom[0x0148] = 0x02;
        assert!(matches!(
            Cartridge::from_bytes(rom),
            Err(CartridgeError::ShortImage {
                expected: 0x20000,
                actual: 0x8000
            })
        ));
    }
}
