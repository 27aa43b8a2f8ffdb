//! The synchronous [`Machine`] and the threaded [`Gameboy`] that drives it
//! against wall-clock time.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, warn};

use crate::boot_rom::BootRom;
use crate::bus::{Bus, Outputs};
use crate::cartridge::Cartridge;
use crate::clock::CPU_FREQUENCY;
use crate::cpu::Cpu;
use crate::error::EmuError;
use crate::external_ram::ExternalRamBuffer;
use crate::input::InputController;
use crate::ppu::{REFRESH_PERIOD, RenderedFrame};
use crate::publishing::{AudioQueue, FrameSlot};

/// Longest single sleep of the pacing and pause waits.
const WAIT_SLICE: Duration = Duration::from_millis(250);
/// How long `toggle_pause` waits for the emulation thread to respond.
const PAUSE_ACK_TIMEOUT: Duration = Duration::from_millis(1000);
/// VRAM dumps are laid out as a full 0x0000-0x9FFF address space image.
const VRAM_DUMP_OFFSET: usize = 0x8000;

#[derive(Debug, Clone)]
pub struct GameboyOptions {
    /// 1.0 is real time.
    pub speed_multiplier: f64,
    /// When false the emulation thread runs as fast as it can.
    pub paced: bool,
    /// Start in the boot ROM instead of the post-boot state.
    pub boot_rom: Option<BootRom>,
}

impl Default for GameboyOptions {
    fn default() -> Self {
        Self {
            speed_multiplier: 1.0,
            paced: true,
            boot_rom: None,
        }
    }
}

/// CPU and bus stepped in lockstep on the calling thread.
pub struct Machine {
    pub cpu: Cpu,
    pub bus: Bus,
    ram_to_save: Option<ExternalRamBuffer>,
}

impl Machine {
    pub fn new(cartridge: Cartridge, boot_rom: Option<BootRom>, outputs: &Outputs) -> Self {
        let mut bus = Bus::new(cartridge, outputs);
        let cpu = match boot_rom {
            Some(boot_rom) => {
                bus.map_boot_rom(boot_rom);
                Cpu::new()
            }
            None => {
                bus.apply_post_boot();
                Cpu::post_boot()
            }
        };
        Self {
            cpu,
            bus,
            ram_to_save: None,
        }
    }

    /// Execute one instruction and let the rest of the hardware catch up.
    /// Returns true when a display frame was completed.
    pub fn step(&mut self) -> Result<bool, EmuError> {
        let cycles = self.cpu.step(&mut self.bus)?;
        Ok(self.bus.advance(cycles))
    }

    /// Run until the next frame boundary. With the LCD off there are no
    /// boundaries, so one refresh period worth of cycles counts as a frame.
    pub fn run_frame(&mut self) -> Result<(), EmuError> {
        let start = self.bus.clock.now();
        loop {
            if self.step()? {
                break;
            }
            if !self.bus.ppu.is_enabled() && self.bus.clock.now() - start >= REFRESH_PERIOD {
                break;
            }
        }
        self.collect_ram_commit();
        Ok(())
    }

    /// Run for at least `cycles` clock cycles.
    pub fn run_cycles(&mut self, cycles: u64) -> Result<(), EmuError> {
        let end = self.bus.clock.now() + cycles;
        while self.bus.clock.now() < end {
            self.step()?;
        }
        self.collect_ram_commit();
        Ok(())
    }

    fn collect_ram_commit(&mut self) {
        if let Some(mut snapshot) = self.bus.cartridge_mut().take_ram_commit() {
            snapshot.request_save();
            self.ram_to_save = Some(snapshot);
        }
    }

    /// Write pending cartridge RAM once its debounce has run out. `force`
    /// also picks up RAM the game modified without disabling it.
    pub fn try_save_ram(&mut self, force: bool) -> bool {
        if force {
            self.collect_ram_commit();
            if let Some(mut snapshot) = self.bus.cartridge_mut().uncommitted_ram() {
                snapshot.request_save();
                self.ram_to_save = Some(snapshot);
            }
        }
        let cartridge = self.bus.cartridge();
        let (Some(storage), Some(path)) = (cartridge.storage(), cartridge.ram_save_path()) else {
            self.ram_to_save = None;
            return false;
        };
        let Some(ram) = self.ram_to_save.as_mut() else {
            return false;
        };
        let saved = ram.try_save(storage.as_ref(), path, force);
        if !ram.save_pending() {
            self.ram_to_save = None;
        }
        saved
    }

    /// Persist everything battery-backed, regardless of debounce.
    pub fn flush(&mut self) {
        self.try_save_ram(true);
        self.bus.cartridge_mut().save_rtc();
    }

    pub fn dump_vram(&self, path: &Path) -> io::Result<()> {
        let mut image = vec![0u8; VRAM_DUMP_OFFSET];
        image.extend_from_slice(&self.bus.ppu.vram);
        fs::write(path, image)
    }
}

#[derive(Debug)]
struct Control {
    running: bool,
    paused: bool,
    /// Bumped by the emulation thread on every pause transition it observes.
    pause_acks: u64,
    speed: f64,
    speed_changed: bool,
}

struct Shared {
    control: Mutex<Control>,
    wake: Condvar,
    error: Mutex<Option<EmuError>>,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Control>, timeout: Duration) -> MutexGuard<'a, Control> {
        match self.wake.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(e) => e.into_inner().0,
        }
    }

    fn set_error(&self, err: EmuError) {
        *self.error.lock().unwrap_or_else(|e| e.into_inner()) = Some(err);
    }
}

/// Wall-clock reference scaled by the speed multiplier. Time spent paused
/// does not count.
struct Pacer {
    speed: f64,
    accumulated: f64,
    segment_start: Instant,
}

impl Pacer {
    /// `start` is the emulated time in seconds the machine has already run.
    fn new(speed: f64, start: f64) -> Self {
        Self {
            speed,
            accumulated: start,
            segment_start: Instant::now(),
        }
    }

    fn real_time(&self) -> f64 {
        self.accumulated + self.segment_start.elapsed().as_secs_f64() * self.speed
    }

    fn set_speed(&mut self, speed: f64) {
        self.suspend();
        self.speed = speed;
        self.resume();
    }

    fn suspend(&mut self) {
        self.accumulated = self.real_time();
    }

    fn resume(&mut self) {
        self.segment_start = Instant::now();
    }

    /// Sleep until real time catches up with `emulated` seconds. Any change
    /// of the control state cuts the wait short.
    fn wait_for(&self, emulated: f64, shared: &Shared) {
        let mut control = shared.control();
        loop {
            if !control.running || control.paused || control.speed_changed {
                return;
            }
            let ahead = emulated - self.real_time();
            if ahead <= 0.0 {
                return;
            }
            let wait = Duration::from_secs_f64(ahead / self.speed).min(WAIT_SLICE);
            control = shared.wait(control, wait);
        }
    }
}

/// A [`Machine`] running on its own thread.
///
/// The thread is the only owner of the machine while it runs; the host talks
/// to it through the shared control block and reads results out of the
/// [`Outputs`] queues.
pub struct Gameboy {
    outputs: Outputs,
    options: GameboyOptions,
    shared: Arc<Shared>,
    machine: Option<Machine>,
    thread: Option<JoinHandle<Machine>>,
}

impl Gameboy {
    pub fn new(cartridge: Cartridge, options: GameboyOptions) -> Self {
        let outputs = Outputs::default();
        let machine = Machine::new(cartridge, options.boot_rom.clone(), &outputs);
        let shared = Arc::new(Shared {
            control: Mutex::new(Control {
                running: false,
                paused: false,
                pause_acks: 0,
                speed: options.speed_multiplier,
                speed_changed: false,
            }),
            wake: Condvar::new(),
            error: Mutex::new(None),
        });
        Self {
            outputs,
            options,
            shared,
            machine: Some(machine),
            thread: None,
        }
    }

    pub fn outputs(&self) -> &Outputs {
        &self.outputs
    }

    pub fn frame_slot(&self) -> &Arc<FrameSlot<RenderedFrame>> {
        &self.outputs.video
    }

    pub fn audio_queue(&self) -> &Arc<AudioQueue> {
        &self.outputs.audio
    }

    pub fn input(&self) -> &Arc<InputController> {
        &self.outputs.input
    }

    /// Latest published frame, to be handed back with [`Self::return_used_frame`].
    pub fn get_current_frame(&self) -> Option<Box<RenderedFrame>> {
        self.outputs.video.get_public()
    }

    pub fn return_used_frame(&self, frame: Box<RenderedFrame>) {
        self.outputs.video.return_public(frame);
    }

    /// The machine, while the emulation thread is not running.
    pub fn machine(&self) -> Option<&Machine> {
        self.machine.as_ref()
    }

    pub fn machine_mut(&mut self) -> Option<&mut Machine> {
        self.machine.as_mut()
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some() && self.shared.control().running
    }

    pub fn is_paused(&self) -> bool {
        self.shared.control().paused
    }

    /// Start the emulation thread. Does nothing if it is already running or
    /// the machine was lost to a panic.
    pub fn run(&mut self) -> Result<(), EmuError> {
        if self.thread.is_some() {
            return Ok(());
        }
        let Some(machine) = self.machine.take() else {
            return Ok(());
        };
        self.shared.control().running = true;
        let shared = Arc::clone(&self.shared);
        let paced = self.options.paced;
        let spawned = thread::Builder::new()
            .name("emulation".into())
            .spawn(move || emulation_thread(machine, shared, paced));
        match spawned {
            Ok(handle) => {
                debug!("Emulation thread started");
                self.thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.control().running = false;
                Err(EmuError::ThreadSpawn(e))
            }
        }
    }

    /// Stop the thread, then flush battery RAM and the RTC.
    pub fn stop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        self.shared.control().running = false;
        self.shared.wake.notify_all();
        match handle.join() {
            Ok(mut machine) => {
                machine.flush();
                self.machine = Some(machine);
                debug!("Emulation thread stopped");
            }
            Err(_) => {
                error!("Emulation thread panicked");
                self.shared.set_error(EmuError::ThreadPanicked);
            }
        }
    }

    /// Stop, then write the VRAM image to `path`.
    pub fn stop_and_dump_vram(&mut self, path: &Path) -> io::Result<()> {
        self.stop();
        match &self.machine {
            Some(machine) => machine.dump_vram(path),
            None => Err(io::Error::other("no machine state to dump")),
        }
    }

    /// `Some(true)` pauses, `Some(false)` resumes, `None` flips. Returns
    /// false if the emulation thread did not acknowledge in time.
    pub fn toggle_pause(&self, pause: Option<bool>) -> bool {
        let mut control = self.shared.control();
        let target = pause.unwrap_or(!control.paused);
        if target == control.paused {
            return true;
        }
        control.paused = target;
        if self.thread.is_none() || !control.running {
            return true;
        }
        let wanted = control.pause_acks + 1;
        self.shared.wake.notify_all();
        let deadline = Instant::now() + PAUSE_ACK_TIMEOUT;
        while control.pause_acks < wanted && control.running {
            let now = Instant::now();
            if now >= deadline {
                warn!("Emulation thread did not acknowledge pause request (paused = {target})");
                return false;
            }
            control = self.shared.wait(control, deadline - now);
        }
        true
    }

    /// Takes effect at the next frame boundary. Queued audio is dropped.
    pub fn set_speed_multiplier(&self, speed: f64) {
        if !(speed.is_finite() && speed > 0.0) {
            warn!("Ignoring invalid speed multiplier {speed}");
            return;
        }
        let mut control = self.shared.control();
        control.speed = speed;
        // a stopped machine picks the new speed up when the thread starts
        control.speed_changed = self.thread.is_some();
        self.shared.wake.notify_all();
    }

    /// The fatal error that ended the emulation thread, if any.
    pub fn take_error(&self) -> Option<EmuError> {
        self.shared.error.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

impl Drop for Gameboy {
    fn drop(&mut self) {
        self.stop();
    }
}

fn emulation_thread(mut machine: Machine, shared: Arc<Shared>, paced: bool) -> Machine {
    let start = machine.bus.clock.now() as f64 / CPU_FREQUENCY as f64;
    let mut pacer = Pacer::new(shared.control().speed, start);
    machine.bus.apu.set_speed_multiplier(pacer.speed);
    loop {
        {
            let mut control = shared.control();
            if !control.running {
                break;
            }
            if control.paused {
                pacer.suspend();
                execute_pause(&shared, control);
                pacer.resume();
                continue;
            }
            if control.speed_changed {
                control.speed_changed = false;
                let speed = control.speed;
                drop(control);
                pacer.set_speed(speed);
                machine.bus.apu.set_speed_multiplier(speed);
                debug!("Speed multiplier set to {speed}");
            }
        }

        if let Err(e) = machine.run_frame() {
            error!("Emulation stopped: {e}");
            shared.set_error(e);
            shared.control().running = false;
            shared.wake.notify_all();
            break;
        }
        machine.try_save_ram(false);

        if paced {
            let emulated = machine.bus.clock.now() as f64 / CPU_FREQUENCY as f64;
            pacer.wait_for(emulated, &shared);
        }
    }
    machine
}

/// Acknowledge the pause, sleep until resumed or stopped, acknowledge again.
fn execute_pause(shared: &Shared, mut control: MutexGuard<'_, Control>) {
    control.pause_acks += 1;
    shared.wake.notify_all();
    while control.paused && control.running {
        control = shared.wait(control, WAIT_SLICE);
    }
    control.pause_acks += 1;
    shared.wake.notify_all();
}
