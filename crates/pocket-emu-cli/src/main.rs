mod config;
mod output;

use std::cell::RefCell;
use std::error::Error;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{info, warn};
use pocket_emu_core::boot_rom::BootRom;
use pocket_emu_core::cartridge::Cartridge;
use pocket_emu_core::gameboy::{Gameboy, GameboyOptions};
use pocket_emu_core::host::{HostServices, StdStorage, StorageProvider};
use pocket_emu_core::system::HostSystem;

use crate::config::Config;
use crate::output::{FrameGrabber, HeadlessEvents, WavRecorder};

#[derive(Parser)]
#[command(version, about = "Headless DMG emulator")]
struct Args {
    /// Path to ROM file
    rom: PathBuf,

    /// Path to a 256-byte boot ROM image
    #[arg(long)]
    bootrom: Option<PathBuf>,

    /// Start in the built-in DMG boot ROM
    #[arg(long, conflicts_with = "bootrom")]
    builtin_boot_rom: bool,

    /// Number of frames to run
    #[arg(long)]
    frames: Option<u64>,

    /// Number of seconds to run
    #[arg(long)]
    seconds: Option<f64>,

    /// Run as fast as possible instead of in real time
    #[arg(long)]
    unpaced: bool,

    /// Speed multiplier, 1.0 being real time
    #[arg(long)]
    speed: Option<f64>,

    /// Write the last frame as PNG
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// Record audio to a WAV file
    #[arg(long)]
    wav: Option<PathBuf>,

    /// Write a VRAM image after the run
    #[arg(long)]
    dump_vram: Option<PathBuf>,

    /// Config file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Store the effective settings in the config file
    #[arg(long)]
    save_config: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn apply_to(&self, cfg: &mut Config) {
        if let Some(path) = &self.bootrom {
            cfg.boot_rom_path = Some(path.clone());
            cfg.builtin_boot_rom = false;
        }
        if self.builtin_boot_rom {
            cfg.builtin_boot_rom = true;
        }
        if let Some(speed) = self.speed {
            if speed.is_finite() && speed > 0.0 {
                cfg.speed = speed;
            } else {
                warn!("Ignoring invalid --speed {speed}");
            }
        }
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn load_boot_rom(cfg: &Config) -> Result<Option<BootRom>, Box<dyn Error>> {
    if cfg.builtin_boot_rom {
        return Ok(Some(BootRom::dmg()));
    }
    match &cfg.boot_rom_path {
        Some(path) => {
            let bytes = std::fs::read(path)
                .map_err(|e| format!("failed to read boot ROM {}: {e}", path.display()))?;
            Ok(Some(BootRom::from_bytes(&bytes)?))
        }
        None => Ok(None),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.debug);

    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);
    let mut cfg = config::load_from_file(&config_path);
    args.apply_to(&mut cfg);
    if args.save_config {
        config::save_to_file(&config_path, &cfg)?;
        info!("Saved config to {}", config_path.display());
    }

    let storage: Arc<dyn StorageProvider> = match &cfg.save_dir {
        Some(dir) => Arc::new(StdStorage::with_save_dir(dir)),
        None => Arc::new(StdStorage::new()),
    };
    let services = HostServices {
        storage,
        ..HostServices::default()
    };
    let cartridge = Cartridge::from_file(&args.rom, &services)?;

    let options = GameboyOptions {
        speed_multiplier: cfg.speed,
        paced: !args.unpaced,
        boot_rom: load_boot_rom(&cfg)?,
    };
    let time_limit = args
        .seconds
        .map(Duration::try_from_secs_f64)
        .transpose()
        .map_err(|e| format!("invalid --seconds: {e}"))?;
    let gameboy = Gameboy::new(cartridge, options);
    let events = HeadlessEvents::new(Arc::clone(gameboy.frame_slot()), args.frames, time_limit);

    let last_frame = Rc::new(RefCell::new(None));
    let mut system = HostSystem::new(gameboy).with_events(Box::new(events));
    if args.screenshot.is_some() {
        system = system.with_graphics(Box::new(FrameGrabber::new(Rc::clone(&last_frame))));
    }
    if let Some(path) = &args.wav {
        system = system.with_audio(Box::new(WavRecorder::create(path)?));
    }

    let result = system.run();

    if let Some(path) = &args.screenshot {
        match last_frame.borrow().as_deref() {
            Some(frame) => output::write_png(path, frame)?,
            None => warn!("No frame was rendered, {} not written", path.display()),
        }
    }
    if let Some(path) = &args.dump_vram {
        system.gameboy_mut().stop_and_dump_vram(path)?;
        info!("Wrote VRAM to {}", path.display());
    }

    result?;
    Ok(())
}
