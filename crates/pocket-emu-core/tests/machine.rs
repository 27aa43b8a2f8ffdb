mod common;

use std::sync::Arc;

use common::program;
use pocket_emu_core::bus::Outputs;
use pocket_emu_core::gameboy::Machine;
use pocket_emu_core::ppu::{MODE_HBLANK, MODE_OAM, MODE_TRANSFER, MODE_VBLANK, Ppu, REFRESH_PERIOD};
use pocket_emu_core::publishing::FrameSlot;

#[test]
fn one_refresh_period_visits_modes_in_order() {
    let mut ppu = Ppu::new(Arc::new(FrameSlot::new()));
    let mut if_reg = 0;
    ppu.write_reg(0xFF40, 0x91);
    ppu.update(0, &mut if_reg);

    let mut start = 0;
    while !ppu.is_enabled() {
        start += 4;
        ppu.update(start, &mut if_reg);
    }

    let mut modes = Vec::new();
    for now in (start..start + REFRESH_PERIOD).step_by(4) {
        ppu.update(now, &mut if_reg);
        let ly = ppu.read_reg(0xFF44);
        let mode = ppu.read_reg(0xFF41) & 0x03;
        assert_eq!(mode, ppu.mode());
        assert_eq!(mode == MODE_VBLANK, ly >= 144, "ly {ly} mode {mode}");
        if modes.last() != Some(&mode) {
            modes.push(mode);
        }
    }

    let mut expected = Vec::new();
    for _ in 0..144 {
        expected.extend([MODE_OAM, MODE_TRANSFER, MODE_HBLANK]);
    }
    expected.push(MODE_VBLANK);
    assert_eq!(modes, expected);
}

#[test]
fn oam_dma_copies_whole_page_before_next_instruction() {
    // LD A,C0; LDH (46),A; NOP; JR -2
    let mut machine = Machine::new(
        program(&[0x3E, 0xC0, 0xE0, 0x46, 0x00, 0x18, 0xFE]),
        None,
        &Outputs::default(),
    );
    for i in 0..0xA0u16 {
        machine.bus.write(0xC000 + i, i as u8 ^ 0x5A);
    }
    machine.step().unwrap();
    machine.step().unwrap();
    assert!(machine.bus.dma_pending());
    machine.step().unwrap();
    assert!(!machine.bus.dma_pending());
    for i in 0..0xA0usize {
        assert_eq!(machine.bus.ppu.oam[i], i as u8 ^ 0x5A);
    }
}

#[test]
fn timer_program_counts_every_sixteen_cycles() {
    // LD A,05; LDH (07),A; then NOPs
    let mut machine = Machine::new(program(&[0x3E, 0x05, 0xE0, 0x07]), None, &Outputs::default());
    machine.step().unwrap();
    machine.step().unwrap();
    assert_eq!(machine.bus.read(0xFF07), 0xFD);

    // TAC=05 taps divider bit 3, which falls when the divider crosses a
    // multiple of 16. Every NOP is one machine cycle.
    let start = machine.bus.read(0xFF05);
    while machine.bus.clock.divider() & 0x0F != 0x0C {
        machine.step().unwrap();
        assert_eq!(machine.bus.read(0xFF05), start);
    }
    machine.step().unwrap();
    assert_eq!(machine.bus.read(0xFF05), start.wrapping_add(1));
    for _ in 0..3 {
        machine.step().unwrap();
        assert_eq!(machine.bus.read(0xFF05), start.wrapping_add(1));
    }
    machine.step().unwrap();
    assert_eq!(machine.bus.read(0xFF05), start.wrapping_add(2));

    // aligned on an edge now, so 100 periods are exactly 100 ticks
    machine.run_cycles(16 * 100).unwrap();
    assert_eq!(machine.bus.read(0xFF05), start.wrapping_add(102));
}

#[test]
fn timer_interrupt_is_serviced_at_vector() {
    // TMA=FE, TAC=05, IE=04, EI, then spin. The handler at 0x50 spins too.
    let code = [
        0x3E, 0xFE, 0xE0, 0x06, // LD A,FE; LDH (06),A
        0x3E, 0x05, 0xE0, 0x07, // LD A,05; LDH (07),A
        0x3E, 0x04, 0xE0, 0xFF, // LD A,04; LDH (FF),A
        0xAF, 0xE0, 0x0F, // XOR A; LDH (0F),A
        0xFB, // EI
        0x18, 0xFE, // JR -2
    ];
    let mut rom = common::program_rom(&code);
    rom[0x50] = 0x18;
    rom[0x51] = 0xFE;
    let cart = pocket_emu_core::Cartridge::from_bytes(rom).unwrap();
    let mut machine = Machine::new(cart, None, &Outputs::default());

    machine.run_cycles(16 * 300 + 400).unwrap();
    assert!((0x50..=0x51).contains(&machine.cpu.regs.pc));
    assert!(!machine.cpu.ime);
}
