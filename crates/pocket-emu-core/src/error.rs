use std::io;

use thiserror::Error;

use crate::cartridge::MbcFamily;

/// Failures detected while parsing a ROM image. Nothing is emulated when one of
/// these is returned.
#[derive(Error, Debug)]
pub enum CartridgeError {
    #[error("ROM image is truncated ({len} bytes, header needs 0x150)")]
    Truncated { len: usize },

    #[error("ROM image is {actual} bytes but the header declares {expected}")]
    ShortImage { expected: usize, actual: usize },

    #[error("unknown cartridge type byte {0:#04X}")]
    UnknownType(u8),

    #[error("cartridge type {code:#04X} ({family:?}) is not supported")]
    Unsupported { code: u8, family: MbcFamily },

    #[error("invalid ROM size code {0:#04X}")]
    InvalidRomSize(u8),

    #[error("invalid RAM size code {0:#04X}")]
    InvalidRamSize(u8),

    #[error("failed to read ROM: {0}")]
    Io(#[from] io::Error),
}

/// Fatal conditions raised while the machine is running.
#[derive(Error, Debug)]
pub enum EmuError {
    #[error("illegal opcode {opcode:#04X} at {pc:#06X}")]
    IllegalOpcode { opcode: u8, pc: u16 },

    #[error("OAM DMA source {addr:#06X} overlaps OAM")]
    DmaOverlap { addr: u16 },

    #[error("boot ROM must be 256 bytes, got {len}")]
    InvalidBootRom { len: usize },

    #[error("failed to start emulation thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    #[error("emulation thread panicked")]
    ThreadPanicked,

    #[error(transparent)]
    Cartridge(#[from] CartridgeError),
}
