mod common;

use std::fs;

use common::{MBC1_ROM, ManualClock, banked_rom, program_rom, services, write_rom};
use pocket_emu_core::bus::Outputs;
use pocket_emu_core::cartridge::{Cartridge, MbcFamily};
use pocket_emu_core::error::CartridgeError;
use pocket_emu_core::gameboy::Machine;
use pocket_emu_core::host::HostServices;
use tempfile::tempdir;

#[test]
fn rom_only_image_has_no_banking() {
    let cart = Cartridge::from_bytes(program_rom(&[0x00])).unwrap();
    assert_eq!(cart.capability.family, MbcFamily::RomOnly);
    assert_eq!(cart.current_rom_bank(), -1);
    assert_eq!(cart.read(0x4000), 1);
}

#[test]
fn mbc1_bank_select_switches_upper_window() {
    let mut cart = Cartridge::from_bytes(MBC1_ROM.clone()).unwrap();
    assert_eq!(cart.read(0x4000), 1);
    cart.write(0x2000, 0x05);
    assert_eq!(cart.current_rom_bank(), 5);
    assert_eq!(cart.read(0x4000), 5);
}

#[test]
fn mbc1_bank_register_wraps_and_never_selects_zero() {
    let mut cart = Cartridge::from_bytes(MBC1_ROM.clone()).unwrap();
    let count = cart.capability.rom_bank_count;
    for value in 0u8..32 {
        cart.write(0x2000, value);
        let expected = match value as usize % count {
            0 => 1,
            b => b,
        };
        assert_eq!(cart.read(0x4000) as usize, expected, "value {value}");
    }
}

#[test]
fn unsupported_cartridge_is_rejected_before_running() {
    let err = Cartridge::from_bytes(banked_rom(0x19, 0x01, 0x00)).unwrap_err();
    assert!(matches!(
        err,
        CartridgeError::Unsupported {
            family: MbcFamily::Mbc5,
            ..
        }
    ));
    let err = Cartridge::from_bytes(banked_rom(0x42, 0x01, 0x00)).unwrap_err();
    assert!(matches!(err, CartridgeError::UnknownType(0x42)));
}

#[test]
fn missing_rom_file_is_an_io_error() {
    let dir = tempdir().unwrap();
    let err = Cartridge::from_file(dir.path().join("absent.gb"), &HostServices::default())
        .unwrap_err();
    assert!(matches!(err, CartridgeError::Io(_)));
}

#[test]
fn battery_ram_round_trips_through_save_file() {
    let dir = tempdir().unwrap();
    // MBC1 + RAM + battery, 8 KiB RAM
    let rom_path = write_rom(dir.path(), "game.gb", &banked_rom(0x03, 0x01, 0x02));
    let services = HostServices::default();

    let cart = Cartridge::from_file(&rom_path, &services).unwrap();
    let mut machine = Machine::new(cart, None, &Outputs::default());
    machine.bus.write(0x0000, 0x0A);
    for i in 0..64u16 {
        machine.bus.write(0xA000 + i, (i as u8).wrapping_mul(7));
    }
    machine.bus.write(0x0000, 0x00);
    machine.run_cycles(4).unwrap();

    // still inside the debounce window
    assert!(!machine.try_save_ram(false));
    machine.flush();

    let save = fs::read(rom_path.with_extension("sav")).unwrap();
    assert_eq!(save.len(), 0x2000);

    let mut reloaded = Cartridge::from_file(&rom_path, &services).unwrap();
    reloaded.write(0x0000, 0x0A);
    for i in 0..64u16 {
        assert_eq!(reloaded.read(0xA000 + i), (i as u8).wrapping_mul(7));
    }
}

#[test]
fn ram_left_enabled_is_still_saved_on_flush() {
    let dir = tempdir().unwrap();
    let rom_path = write_rom(dir.path(), "open.gb", &banked_rom(0x03, 0x01, 0x02));

    let cart = Cartridge::from_file(&rom_path, &HostServices::default()).unwrap();
    let mut machine = Machine::new(cart, None, &Outputs::default());
    machine.bus.write(0x0000, 0x0A);
    machine.bus.write(0xA010, 0x5A);
    machine.flush();

    let save = fs::read(rom_path.with_extension("sav")).unwrap();
    assert_eq!(save[0x10], 0x5A);
}

#[test]
fn rtc_keeps_counting_across_reloads() {
    let dir = tempdir().unwrap();
    // MBC3 + timer + battery
    let rom_path = write_rom(dir.path(), "clock.gb", &banked_rom(0x0F, 0x01, 0x00));
    let clock = ManualClock::at(1_000.0);

    let mut cart = Cartridge::from_file(&rom_path, &services(clock.clone())).unwrap();
    assert_eq!(fs::read(rom_path.with_extension("rtc")).unwrap().len(), 12);

    clock.set(1_000.0 + 3_725.0);
    cart.write(0x0000, 0x0A);
    cart.write(0x6000, 0x00);
    cart.write(0x6000, 0x01);
    let read_reg = |cart: &mut Cartridge, reg: u8| {
        cart.write(0x4000, reg);
        cart.read(0xA000)
    };
    assert_eq!(read_reg(&mut cart, 0x08), 5);
    assert_eq!(read_reg(&mut cart, 0x09), 2);
    assert_eq!(read_reg(&mut cart, 0x0A), 1);
    cart.save_rtc();
    drop(cart);

    clock.set(1_000.0 + 7_210.0);
    let mut cart = Cartridge::from_file(&rom_path, &services(clock)).unwrap();
    cart.write(0x0000, 0x0A);
    cart.write(0x6000, 0x00);
    cart.write(0x6000, 0x01);
    assert_eq!(read_reg(&mut cart, 0x08), 10);
    assert_eq!(read_reg(&mut cart, 0x09), 0);
    assert_eq!(read_reg(&mut cart, 0x0A), 2);
}
