//! Game Boy (DMG) emulation core.
//!
//! The hardware components are plain structs stepped in lockstep by
//! [`gameboy::Machine`]. [`gameboy::Gameboy`] runs a machine on its own thread
//! and paces it against wall-clock time; frontends talk to it through the
//! traits in [`host`] and the buffers in [`publishing`].

/// Sound controller: four channels, frame sequencer, sample generation.
pub mod apu;

/// Built-in DMG boot image.
pub mod boot_rom;

/// Memory map and I/O dispatch.
pub mod bus;

/// Cartridge header parsing and the memory bank controllers.
pub mod cartridge;

/// Cycle counter and the DIV/TIMA/TMA/TAC timer.
pub mod clock;

/// SM83 interpreter.
pub mod cpu;

pub mod error;

/// Battery-backed cartridge RAM.
pub mod external_ram;

/// Machine, threaded orchestrator.
pub mod gameboy;

/// Platform services and frontend traits.
pub mod host;

/// Joypad register and host button state.
pub mod input;

/// Display controller.
pub mod ppu;

/// Video frame slot and audio frame queue.
pub mod publishing;

pub mod registers;

/// Host run loop.
pub mod system;

pub use bus::Outputs;
pub use cartridge::Cartridge;
pub use error::{CartridgeError, EmuError};
pub use gameboy::{Gameboy, GameboyOptions, Machine};
pub use system::HostSystem;
